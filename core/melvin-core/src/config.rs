//! Engine configuration — environment, JSON file and builder setters.
//!
//! 우선순위: 기본값 → 설정 파일 → 환경 변수

use crate::error::{MelvinError, MelvinResult};
use crate::suggest::DEFAULT_SIMILARITY_THRESHOLD;
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

pub const ENV_DATA_DIR: &str = "MELVIN_DIR";
pub const ENV_DURABILITY: &str = "MELVIN_DURABILITY";
pub const ENV_REFRESH_ON_APPEND: &str = "MELVIN_REFRESH_ON_APPEND";
pub const ENV_DEFAULT_DOMAIN: &str = "MELVIN_DEFAULT_DOMAIN";
pub const ENV_SUGGESTION_THRESHOLD: &str = "MELVIN_SUGGESTION_THRESHOLD";

/// 쓰기 내구성 수준 정책
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DurabilityLevel {
    /// append가 반환되기 전에 flush (최대 안전)
    Full,
    /// 백그라운드 주기적 flush
    #[default]
    Lazy,
    /// 명시적 flush 또는 종료 시에만 기록
    None,
}

impl DurabilityLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            DurabilityLevel::Full => "full",
            DurabilityLevel::Lazy => "lazy",
            DurabilityLevel::None => "none",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "full" => Some(DurabilityLevel::Full),
            "lazy" => Some(DurabilityLevel::Lazy),
            "none" => Some(DurabilityLevel::None),
            _ => None,
        }
    }
}

/// Engine settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Store directory; `None` keeps everything in memory.
    pub data_dir: Option<PathBuf>,
    pub durability: DurabilityLevel,
    /// Refresh every index of a domain after each append to it.
    pub refresh_on_append: bool,
    /// Domain used when a query names no domain prefix.
    pub default_domain: Option<String>,
    /// Minimum similarity for did-you-mean suggestions.
    pub suggestion_threshold: f64,
    /// Background flush interval under `DurabilityLevel::Lazy`.
    pub flush_every_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            data_dir: None,
            durability: DurabilityLevel::Lazy,
            refresh_on_append: false,
            default_domain: None,
            suggestion_threshold: DEFAULT_SIMILARITY_THRESHOLD,
            flush_every_ms: 500,
        }
    }
}

impl EngineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Defaults overridden by `MELVIN_*` environment variables.
    pub fn from_env() -> MelvinResult<Self> {
        let mut config = Self::default();
        config.apply_env()?;
        Ok(config)
    }

    /// Loads a JSON config file; missing keys keep their defaults.
    pub fn from_file(path: impl AsRef<Path>) -> MelvinResult<Self> {
        let json = fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn save_to_file(&self, path: impl AsRef<Path>) -> MelvinResult<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    /// Applies environment overrides in place.
    pub fn apply_env(&mut self) -> MelvinResult<()> {
        if let Ok(dir) = env::var(ENV_DATA_DIR)
            && !dir.is_empty()
        {
            self.data_dir = Some(PathBuf::from(dir));
        }
        if let Ok(value) = env::var(ENV_DURABILITY) {
            self.durability = DurabilityLevel::parse(&value).ok_or_else(|| {
                MelvinError::InvalidArgument(format!("{ENV_DURABILITY}: unknown level '{value}'"))
            })?;
        }
        if let Ok(value) = env::var(ENV_REFRESH_ON_APPEND) {
            self.refresh_on_append = value.eq_ignore_ascii_case("true") || value == "1";
        }
        if let Ok(domain) = env::var(ENV_DEFAULT_DOMAIN) {
            self.default_domain = Some(domain).filter(|d| !d.is_empty());
        }
        if let Ok(value) = env::var(ENV_SUGGESTION_THRESHOLD) {
            self.suggestion_threshold = value.parse().map_err(|_| {
                MelvinError::InvalidArgument(format!(
                    "{ENV_SUGGESTION_THRESHOLD}: expected a number, got '{value}'"
                ))
            })?;
        }
        self.validate()
    }

    pub fn validate(&self) -> MelvinResult<()> {
        if !(0.0..=1.0).contains(&self.suggestion_threshold) {
            return Err(MelvinError::InvalidArgument(format!(
                "suggestion threshold must be within [0, 1], got {}",
                self.suggestion_threshold
            )));
        }
        Ok(())
    }

    pub fn with_data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.data_dir = Some(dir.into());
        self
    }

    pub fn with_durability(mut self, durability: DurabilityLevel) -> Self {
        self.durability = durability;
        self
    }

    pub fn with_refresh_on_append(mut self, enabled: bool) -> Self {
        self.refresh_on_append = enabled;
        self
    }

    pub fn with_default_domain(mut self, domain: impl Into<String>) -> Self {
        self.default_domain = Some(domain.into());
        self
    }

    pub fn with_suggestion_threshold(mut self, threshold: f64) -> Self {
        self.suggestion_threshold = threshold;
        self
    }

    pub fn with_flush_every_ms(mut self, ms: u64) -> Self {
        self.flush_every_ms = ms;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.durability, DurabilityLevel::Lazy);
        assert!(config.data_dir.is_none());
        assert!(!config.refresh_on_append);
        assert!((config.suggestion_threshold - 0.7).abs() < f64::EPSILON);
    }

    #[test]
    fn test_durability_parse() {
        assert_eq!(DurabilityLevel::parse("FULL"), Some(DurabilityLevel::Full));
        assert_eq!(DurabilityLevel::parse("none"), Some(DurabilityLevel::None));
        assert_eq!(DurabilityLevel::parse("sometimes"), None);
    }

    #[test]
    fn test_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("conf/melvin.json");
        let config = EngineConfig::new()
            .with_durability(DurabilityLevel::Full)
            .with_default_domain("qa")
            .with_refresh_on_append(true);
        config.save_to_file(&path).unwrap();

        let loaded = EngineConfig::from_file(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("melvin.json");
        fs::write(&path, r#"{"default_domain": "git"}"#).unwrap();

        let loaded = EngineConfig::from_file(&path).unwrap();
        assert_eq!(loaded.default_domain.as_deref(), Some("git"));
        assert_eq!(loaded.flush_every_ms, 500);
    }

    #[test]
    fn test_threshold_validation() {
        let config = EngineConfig::new().with_suggestion_threshold(1.5);
        assert!(config.validate().is_err());
    }
}
