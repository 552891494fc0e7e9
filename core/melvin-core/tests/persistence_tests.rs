// 영속성 테스트 — 재시작, 손상 인덱스 복구, prune, JSONL, 동시성

use melvin_core::storage::{INDEX_TREE, SledBackend, StorageBackend};
use melvin_core::{
    DimensionDef, DomainSchema, DurabilityLevel, Engine, EngineConfig, Granularity, IndexShape, IngestRecord,
    MeasureDef, MelvinError, MelvinResult, PlanSource, RecordId, Value,
};
use std::sync::Arc;
use std::thread;
use tempfile::TempDir;

// ─── Helpers ────────────────────────────────────────────

const JAN_1: i64 = 1_704_067_200_000;
const DAY: i64 = 86_400_000;

fn qa_schema() -> DomainSchema {
    DomainSchema::new("qa")
        .with_measure(MeasureDef::integer("tokens"))
        .with_dimension(DimensionDef::categorical("engine"))
        .with_dimension(DimensionDef::date("day", Granularity::Day))
}

fn open(dir: &TempDir) -> MelvinResult<Engine> {
    melvin_core::logging::init_test();
    Engine::open_with_config(EngineConfig::new().with_data_dir(dir.path()).with_durability(DurabilityLevel::Full))
}

fn seed(engine: &Engine) -> MelvinResult<()> {
    engine.register_schema(qa_schema())?;
    for (day, name, tokens) in [(0, "gpt-4", 100), (1, "gpt-4", 50), (2, "claude", 7), (3, "claude", 3)] {
        engine.append(
            "qa",
            IngestRecord::new()
                .at(JAN_1 + day * DAY)
                .field("engine", name)
                .field("tokens", tokens),
        )?;
    }
    Ok(())
}

// ═══════════════════════════════════════════════════════════
// Restart
// ═══════════════════════════════════════════════════════════

#[test]
fn test_reopen_keeps_schemas_records_and_indexes() -> MelvinResult<()> {
    let dir = TempDir::new()?;
    let shape = IndexShape::new(["engine"]);
    let before = {
        let engine = open(&dir)?;
        seed(&engine)?;
        engine.build_or_refresh_index("qa", &shape)?;
        let result = engine.query("tokens by engine")?;
        engine.flush()?;
        result
    };

    let engine = open(&dir)?;
    assert_eq!(engine.domains(), vec!["qa".to_string()]);
    assert_eq!(engine.store().len("qa")?, 4);
    assert_eq!(engine.store().last_id("qa")?, Some(RecordId(4)));

    let descriptors = engine.index_descriptors("qa");
    assert_eq!(descriptors.len(), 1);
    assert_eq!(descriptors[0].watermark, Some(RecordId(4)));

    let plan = engine.plan(&engine.parse("tokens by engine")?)?;
    assert!(matches!(plan.source, PlanSource::ExactIndex { .. }));
    assert_eq!(engine.execute(&plan)?, before);

    // id 할당은 재시작 후에도 이어진다
    let id = engine.append("qa", IngestRecord::new().at(JAN_1).field("engine", "x").field("tokens", 1))?;
    assert_eq!(id, RecordId(5));
    Ok(())
}

#[test]
fn test_schema_evolution_survives_restart() -> MelvinResult<()> {
    let dir = TempDir::new()?;
    {
        let engine = open(&dir)?;
        seed(&engine)?;
        engine.register_schema(qa_schema().with_measure(MeasureDef::decimal("latency")))?;
        engine.flush()?;
    }
    let engine = open(&dir)?;
    assert_eq!(engine.registry().current_version("qa")?, 2);
    assert!(engine.schema("qa")?.measure("latency").is_some());
    assert!(matches!(
        engine.register_schema(DomainSchema::new("qa").with_measure(MeasureDef::integer("tokens"))),
        Err(MelvinError::SchemaConflict { .. })
    ));
    Ok(())
}

#[test]
fn test_corrupt_index_is_rebuilt_on_open() -> MelvinResult<()> {
    let dir = TempDir::new()?;
    let shape = IndexShape::new(["engine"]);
    {
        let engine = open(&dir)?;
        seed(&engine)?;
        engine.build_or_refresh_index("qa", &shape)?;
        engine.flush()?;
    }
    {
        let backend = SledBackend::open(dir.path())?;
        backend.put_meta(INDEX_TREE, &format!("qa/{}", shape.key()), b"garbage")?;
        backend.flush()?;
    }

    let engine = open(&dir)?;
    let snapshot = engine.lookup_index("qa", &shape)?;
    assert_eq!(snapshot.records, 4);
    assert_eq!(snapshot.watermark, Some(RecordId(4)));
    let result = engine.query("tokens by engine")?;
    assert_eq!(result.get(0, "engine"), Some(&Value::from("claude")));
    assert_eq!(result.get(0, "tokens"), Some(&Value::Int(10)));
    assert_eq!(result.get(1, "tokens"), Some(&Value::Int(150)));
    Ok(())
}

// ═══════════════════════════════════════════════════════════
// Retention
// ═══════════════════════════════════════════════════════════

#[test]
fn test_prune_rebuilds_indexes_from_remaining_records() -> MelvinResult<()> {
    let dir = TempDir::new()?;
    let engine = open(&dir)?;
    seed(&engine)?;
    let shape = IndexShape::new(["engine", "day"]);
    engine.build_or_refresh_index("qa", &shape)?;

    assert_eq!(engine.prune("qa", JAN_1 + 2 * DAY)?, 2);
    assert_eq!(engine.prune("qa", JAN_1 + 2 * DAY)?, 0);
    assert_eq!(engine.prune("unknown", JAN_1)?, 0);

    let snapshot = engine.lookup_index("qa", &shape)?;
    assert_eq!(snapshot.records, 2);
    let plan = engine.plan(&engine.parse("tokens by engine")?)?;
    assert!(!plan.source.is_raw_scan());
    let result = engine.execute(&plan)?;
    assert_eq!(result.len(), 1);
    assert_eq!(result.get(0, "tokens"), Some(&Value::Int(10)));

    // prune 이후에도 id는 재사용되지 않는다
    let next = engine.append("qa", IngestRecord::new().at(JAN_1 + 5 * DAY).field("engine", "a").field("tokens", 1))?;
    assert_eq!(next, RecordId(5));
    assert!(matches!(
        engine.append("qa", IngestRecord::new().with_id(1).field("engine", "a").field("tokens", 1)),
        Err(MelvinError::InvalidArgument(_))
    ));
    Ok(())
}

// ═══════════════════════════════════════════════════════════
// JSONL
// ═══════════════════════════════════════════════════════════

#[test]
fn test_jsonl_export_into_fresh_engine() -> MelvinResult<()> {
    let dir = TempDir::new()?;
    let source = open(&dir)?;
    seed(&source)?;
    let mut buffer = Vec::new();
    assert_eq!(source.export_jsonl("qa", &mut buffer)?, 4);

    let target = Engine::open_in_memory()?;
    target.register_schema(qa_schema())?;
    let summary = target.import_jsonl("qa", buffer.as_slice())?;
    assert_eq!(summary.imported, 4);
    assert_eq!(summary.duplicates, 0);
    assert_eq!(target.query("tokens by engine")?, source.query("tokens by engine")?);

    let again = target.import_jsonl("qa", buffer.as_slice())?;
    assert_eq!(again.imported, 0);
    assert_eq!(again.duplicates, 4);
    Ok(())
}

// ═══════════════════════════════════════════════════════════
// Concurrency
// ═══════════════════════════════════════════════════════════

#[test]
fn test_queries_run_while_appending() -> MelvinResult<()> {
    let dir = TempDir::new()?;
    let engine = Arc::new(Engine::open_with_config(
        EngineConfig::new()
            .with_data_dir(dir.path())
            .with_refresh_on_append(true),
    )?);
    engine.register_schema(qa_schema())?;
    engine.build_or_refresh_index("qa", &IndexShape::new(["engine"]))?;

    let writers: Vec<_> = (0..4)
        .map(|w| {
            let engine = Arc::clone(&engine);
            thread::spawn(move || -> MelvinResult<()> {
                for i in 0..50 {
                    engine.append(
                        "qa",
                        IngestRecord::new()
                            .at(JAN_1 + i * DAY)
                            .field("engine", format!("e{w}"))
                            .field("tokens", 1),
                    )?;
                }
                Ok(())
            })
        })
        .collect();
    let readers: Vec<_> = (0..2)
        .map(|_| {
            let engine = Arc::clone(&engine);
            thread::spawn(move || -> MelvinResult<()> {
                let mut last = 0;
                for _ in 0..50 {
                    let total = match engine.query("tokens")?.scalar() {
                        Some(Value::Int(v)) => *v,
                        other => panic!("unexpected total {other:?}"),
                    };
                    // 결과는 항상 커밋된 prefix에 대한 값
                    assert!(total >= last && total <= 200);
                    last = total;
                }
                Ok(())
            })
        })
        .collect();

    for handle in writers.into_iter().chain(readers) {
        handle.join().expect("worker panicked")?;
    }
    assert_eq!(engine.query("tokens")?.scalar(), Some(&Value::Int(200)));
    let by_engine = engine.query("tokens by engine")?;
    assert_eq!(by_engine.len(), 4);
    assert!((0..4).all(|i| by_engine.get(i, "tokens") == Some(&Value::Int(50))));
    Ok(())
}
