//! 로깅 초기화 — tracing subscriber 설치 헬퍼
//!
//! 엔진 내부는 `tracing` 매크로로만 기록합니다. subscriber가 설치되지 않으면 아무것도
//! 출력되지 않으며, `logging` feature가 꺼져 있으면 아래 함수들은 no-op입니다.
//!
//! 필터 우선순위: `MELVIN_LOG` → `RUST_LOG` → 인자로 받은 기본 레벨.

/// Filter variable consulted before `RUST_LOG`.
pub const LOG_ENV: &str = "MELVIN_LOG";

#[cfg(feature = "logging")]
mod imp {
    use super::LOG_ENV;
    use tracing_subscriber::fmt::format::FmtSpan;
    use tracing_subscriber::{EnvFilter, fmt};

    fn filter(default_level: &str) -> EnvFilter {
        EnvFilter::try_from_env(LOG_ENV)
            .or_else(|_| EnvFilter::try_from_default_env())
            .unwrap_or_else(|_| EnvFilter::new(format!("melvin_core={default_level}")))
    }

    pub fn init_with_level(level: &str) {
        // span close events carry the elapsed time of instrumented queries
        let _ = fmt()
            .with_env_filter(filter(level))
            .with_span_events(FmtSpan::CLOSE)
            .with_target(true)
            .with_thread_ids(true)
            .try_init();
    }

    pub fn init_test() {
        let _ = fmt()
            .with_env_filter(filter("debug"))
            .with_test_writer()
            .try_init();
    }
}

/// Installs a subscriber at `info`.
///
/// ```rust
/// melvin_core::logging::init();
/// ```
pub fn init() {
    init_with_level("info")
}

/// Installs a subscriber; `level` is used only when neither `MELVIN_LOG` nor
/// `RUST_LOG` is set. A subscriber installed earlier by the host wins.
pub fn init_with_level(level: &str) {
    #[cfg(feature = "logging")]
    imp::init_with_level(level);
    #[cfg(not(feature = "logging"))]
    let _ = level;
}

/// Debug-level subscriber writing through the test harness capture.
pub fn init_test() {
    #[cfg(feature = "logging")]
    imp::init_test();
}
