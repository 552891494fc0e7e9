//! # MELVIN — Dimensional Query Engine
//!
//! MELVIN은 도메인별 append-only 레코드 위에서 차원 분석 쿼리를 실행하는 임베디드 엔진입니다.
//! 스키마로 타입이 지정된 레코드를 저장하고, 차원 shape별 사전 집계 인덱스를 증분 갱신하며,
//! 짧은 쿼리 언어로 집계·필터·변환을 수행합니다.
//!
//! ## 주요 특징
//!
//! - **Schema Registry**: 도메인별 measure/dimension 선언, 가산적(additive) 스키마 버전 관리
//! - **Record Store**: sled 또는 인메모리 백엔드, id 순서 스캔, 보존 정리(prune)
//! - **Index Set**: watermark 기반 증분 갱신, 원자적 스냅샷 교체, roll-up
//! - **Query Language**: `[domain.]measure by dim where ... | transform`
//!
//! ## 빠른 시작
//!
//! ```rust
//! use melvin_core::{DimensionDef, DomainSchema, Engine, IngestRecord, MeasureDef, Value};
//!
//! # fn main() -> melvin_core::MelvinResult<()> {
//! let engine = Engine::open_in_memory()?;
//! engine.register_schema(
//!     DomainSchema::new("qa")
//!         .with_measure(MeasureDef::integer("tokens"))
//!         .with_dimension(DimensionDef::categorical("engine")),
//! )?;
//!
//! engine.append("qa", IngestRecord::new().field("engine", "gpt-4").field("tokens", 100))?;
//! engine.append("qa", IngestRecord::new().field("engine", "gpt-4").field("tokens", 50))?;
//!
//! let result = engine.query("tokens by engine")?;
//! assert_eq!(result.get(0, "tokens"), Some(&Value::Int(150)));
//! # Ok(())
//! # }
//! ```
//!
//! ## 쿼리 파이프라인
//!
//! ```text
//! 쿼리 문자열 → Lexer → Parser → Query
//!          → Planner (index / roll-up / raw scan) → ExecutionPlan → Executor → ResultSet
//! ```
//!
//! ## 모듈 구조
//!
//! - [`engine`] — 엔진 진입점 ([`Engine`])
//! - [`schema`] — 스키마 정의와 레지스트리
//! - [`storage`] — 레코드 저장소와 백엔드
//! - [`index`] — 사전 집계 인덱스
//! - [`query`] — 쿼리 언어 (AST, 파서, 포맷터)
//! - [`planner`] — 실행 계획
//! - [`executor`] — 계획 실행과 결과

pub mod config;
pub mod engine;
pub mod error;
pub mod executor;
pub mod index;
pub mod planner;
pub mod query;
pub mod record;
pub mod schema;
pub mod storage;
pub mod suggest;
pub mod time;
pub mod value;

// 로깅 유틸리티
pub mod logging;

// 자주 쓰는 타입 재노출
pub use config::{DurabilityLevel, EngineConfig};
pub use engine::Engine;
pub use error::{FieldKind, MelvinError, MelvinResult};
pub use executor::{ResultRow, ResultSet};
pub use index::{IndexDescriptor, IndexShape, RefreshOutcome};
pub use planner::{ExecutionPlan, PlanSource};
pub use query::{Query, QueryParser, format_query};
pub use record::{IngestRecord, Record, RecordId};
pub use schema::{AggregateFunction, DimensionDef, DomainSchema, FieldType, MeasureDef, SchemaRegistry};
pub use time::{Granularity, TimeRange};
pub use value::Value;
