//! 기본 사용 예제 — 스키마 등록, 수집, 인덱스, 쿼리
//!
//! 실행: cargo run --example basic_usage --features logging

use melvin_core::{
    DimensionDef, DomainSchema, Engine, Granularity, IndexShape, IngestRecord, MeasureDef, Value,
};

const JAN_1: i64 = 1_704_067_200_000;
const DAY: i64 = 86_400_000;

fn main() -> melvin_core::MelvinResult<()> {
    melvin_core::logging::init();

    println!("=== MELVIN 기본 예제 ===\n");

    // 1. 엔진 생성과 스키마 등록
    println!("1. 스키마 등록...");
    let engine = Engine::open_in_memory()?;
    let version = engine.register_schema(
        DomainSchema::new("qa")
            .with_measure(MeasureDef::integer("tokens"))
            .with_measure(MeasureDef::count("queries"))
            .with_dimension(DimensionDef::categorical("engine"))
            .with_dimension(DimensionDef::multi_categorical("tags"))
            .with_dimension(DimensionDef::date("day", Granularity::Day).with_hierarchy(&["month"]))
            .with_dimension(DimensionDef::date("month", Granularity::Month)),
    )?;
    println!("   ✓ qa v{version}\n");

    // 2. 레코드 수집
    println!("2. 레코드 수집...");
    let samples = [
        (0, "gpt-4", 120, vec!["cached"]),
        (0, "claude-3", 80, vec![]),
        (1, "gpt-4", 200, vec!["retry", "cold"]),
        (2, "claude-3", 90, vec!["cached"]),
        (9, "gpt-4", 60, vec![]),
    ];
    for (day, name, tokens, tags) in samples {
        engine.append(
            "qa",
            IngestRecord::new()
                .at(JAN_1 + day * DAY)
                .field("engine", name)
                .field("tokens", tokens)
                .field("tags", Value::tags(tags)),
        )?;
    }
    println!("   ✓ {}개 레코드\n", engine.store().len("qa")?);

    // 3. raw scan 쿼리
    println!("3. tokens by engine");
    println!("{}", engine.explain("tokens by engine")?);
    println!("{}\n", engine.query("tokens by engine")?);

    // 4. 인덱스 생성 후 roll-up
    println!("4. 인덱스 (engine, day) 생성...");
    let outcome = engine.build_or_refresh_index("qa", &IndexShape::new(["engine", "day"]))?;
    println!("   ✓ {}개 레코드 반영\n", outcome.incorporated);
    println!("{}", engine.explain("queries by month")?);
    println!("{}\n", engine.query("queries by month")?);

    // 5. 필터와 변환
    for text in [
        "tokens by engine where tags contains cached",
        "tokens by day | rolling 3d avg",
        "tokens by engine | percent",
        "avg(tokens) by engine | sort desc | top 1",
    ] {
        println!("5. {text}");
        println!("{}\n", engine.query(text)?);
    }

    // 6. JSON 결과
    println!("6. JSON");
    println!("{}", engine.query("tokens by engine")?.to_json());
    Ok(())
}
