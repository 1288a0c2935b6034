//! 설정 관리 — certwatch.toml 파싱 및 런타임 설정
//!
//! [`CertwatchConfig`]는 모든 크레이트의 설정을 담는 최상위 구조체입니다.
//!
//! # 설정 로딩 우선순위
//! 1. CLI 인자 (최고 우선)
//! 2. 환경변수 (`CERTWATCH_OBSERVER_NAMESPACE=csi-test` 형식)
//! 3. 설정 파일 (`certwatch.toml`)
//! 4. 기본값 (`Default` 구현)
//!
//! # 사용 예시
//! ```no_run
//! # async fn example() -> Result<(), certwatch_core::error::CertwatchError> {
//! use certwatch_core::config::CertwatchConfig;
//!
//! // 파일에서 로드 + 환경변수 오버라이드
//! let config = CertwatchConfig::load("certwatch.toml").await?;
//!
//! // TOML 문자열에서 직접 파싱
//! let config = CertwatchConfig::parse("[general]\nlog_level = \"debug\"")?;
//! # Ok(())
//! # }
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{CertwatchError, ConfigError};

/// watch 최대 유지 시간 상한 (24시간)
const MAX_WATCH_TIMEOUT_SECS: u64 = 86_400;

/// certwatch 통합 설정
///
/// `certwatch.toml` 파일의 최상위 구조를 나타냅니다.
/// 각 크레이트는 자기 섹션만 읽어 사용합니다.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CertwatchConfig {
    /// 일반 설정
    #[serde(default)]
    pub general: GeneralConfig,
    /// observer 설정
    #[serde(default)]
    pub observer: ObserverSection,
    /// 이벤트 스토어 설정
    #[serde(default)]
    pub store: StoreSection,
    /// Prometheus 메트릭 설정
    #[serde(default)]
    pub metrics: MetricsSection,
}

impl CertwatchConfig {
    /// TOML 파일에서 설정을 로드하고 환경변수 오버라이드를 적용합니다.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, CertwatchError> {
        let mut config = Self::from_file(path).await?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// TOML 파일에서 설정을 로드합니다 (환경변수 오버라이드 없음).
    pub async fn from_file(path: impl AsRef<Path>) -> Result<Self, CertwatchError> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                CertwatchError::Config(ConfigError::FileNotFound {
                    path: path.display().to_string(),
                })
            } else {
                CertwatchError::Io(e)
            }
        })?;
        let config = Self::parse(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// TOML 문자열에서 설정을 파싱합니다.
    pub fn parse(toml_str: &str) -> Result<Self, CertwatchError> {
        toml::from_str(toml_str).map_err(|e| {
            CertwatchError::Config(ConfigError::ParseFailed {
                reason: e.to_string(),
            })
        })
    }

    /// 환경변수로 설정값을 오버라이드합니다.
    ///
    /// 환경변수 네이밍 규칙: `CERTWATCH_{SECTION}_{FIELD}`
    pub fn apply_env_overrides(&mut self) {
        override_string(&mut self.general.log_level, "CERTWATCH_GENERAL_LOG_LEVEL");
        override_string(&mut self.general.log_format, "CERTWATCH_GENERAL_LOG_FORMAT");

        override_u64(
            &mut self.observer.watch_timeout_secs,
            "CERTWATCH_OBSERVER_WATCH_TIMEOUT_SECS",
        );
        override_u64(
            &mut self.observer.count_poll_interval_ms,
            "CERTWATCH_OBSERVER_COUNT_POLL_INTERVAL_MS",
        );
        override_string(&mut self.observer.namespace, "CERTWATCH_OBSERVER_NAMESPACE");
        override_usize(
            &mut self.observer.notification_buffer,
            "CERTWATCH_OBSERVER_NOTIFICATION_BUFFER",
        );

        override_string(&mut self.store.backend, "CERTWATCH_STORE_BACKEND");
        override_string(&mut self.store.path, "CERTWATCH_STORE_PATH");

        override_bool(&mut self.metrics.enabled, "CERTWATCH_METRICS_ENABLED");
        override_string(&mut self.metrics.listen_addr, "CERTWATCH_METRICS_LISTEN_ADDR");
        override_u16(&mut self.metrics.port, "CERTWATCH_METRICS_PORT");
    }

    /// 설정값의 유효성을 검증합니다.
    pub fn validate(&self) -> Result<(), CertwatchError> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.general.log_level.as_str()) {
            return Err(invalid(
                "general.log_level",
                format!("must be one of: {}", valid_levels.join(", ")),
            ));
        }

        let valid_formats = ["json", "pretty"];
        if !valid_formats.contains(&self.general.log_format.as_str()) {
            return Err(invalid(
                "general.log_format",
                format!("must be one of: {}", valid_formats.join(", ")),
            ));
        }

        if self.observer.watch_timeout_secs == 0
            || self.observer.watch_timeout_secs > MAX_WATCH_TIMEOUT_SECS
        {
            return Err(invalid(
                "observer.watch_timeout_secs",
                format!("must be 1-{MAX_WATCH_TIMEOUT_SECS}"),
            ));
        }

        if self.observer.count_poll_interval_ms == 0 {
            return Err(invalid(
                "observer.count_poll_interval_ms",
                "must be greater than 0".to_owned(),
            ));
        }

        if self.observer.notification_buffer == 0 {
            return Err(invalid(
                "observer.notification_buffer",
                "must be greater than 0".to_owned(),
            ));
        }

        let valid_backends = ["sqlite", "memory"];
        if !valid_backends.contains(&self.store.backend.as_str()) {
            return Err(invalid(
                "store.backend",
                format!("must be one of: {}", valid_backends.join(", ")),
            ));
        }

        if self.store.backend == "sqlite" && self.store.path.is_empty() {
            return Err(invalid(
                "store.path",
                "path must not be empty for the sqlite backend".to_owned(),
            ));
        }

        if self.metrics.enabled && self.metrics.port == 0 {
            return Err(invalid(
                "metrics.port",
                "port must not be 0 when metrics are enabled".to_owned(),
            ));
        }

        Ok(())
    }
}

fn invalid(field: &str, reason: String) -> CertwatchError {
    ConfigError::InvalidValue {
        field: field.to_owned(),
        reason,
    }
    .into()
}

/// 일반 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// 로그 레벨 (trace, debug, info, warn, error)
    pub log_level: String,
    /// 로그 형식 (json, pretty)
    pub log_format: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_owned(),
            log_format: "json".to_owned(),
        }
    }
}

/// observer 설정 섹션 (`[observer]`)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ObserverSection {
    /// watch 한 번의 최대 유지 시간 (초). 만료되면 세션이 flush 없이 끝납니다.
    pub watch_timeout_secs: u64,
    /// 엔티티 개수 샘플링 주기 (밀리초)
    pub count_poll_interval_ms: u64,
    /// 관찰할 네임스페이스 (빈 문자열이면 전체)
    pub namespace: String,
    /// observer별 알림 채널 버퍼 크기
    pub notification_buffer: usize,
}

impl Default for ObserverSection {
    fn default() -> Self {
        Self {
            watch_timeout_secs: 3600,
            count_poll_interval_ms: 1000,
            namespace: String::new(),
            notification_buffer: 256,
        }
    }
}

/// 이벤트 스토어 설정 섹션 (`[store]`)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreSection {
    /// 백엔드 종류 (sqlite, memory)
    pub backend: String,
    /// SQLite 데이터베이스 파일 경로
    pub path: String,
}

impl Default for StoreSection {
    fn default() -> Self {
        Self {
            backend: "sqlite".to_owned(),
            path: "/var/lib/certwatch/certwatch.db".to_owned(),
        }
    }
}

/// Prometheus 메트릭 설정 섹션 (`[metrics]`)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsSection {
    /// 익스포터 활성화 여부
    pub enabled: bool,
    /// 바인드 주소
    pub listen_addr: String,
    /// 바인드 포트
    pub port: u16,
}

impl Default for MetricsSection {
    fn default() -> Self {
        Self {
            enabled: true,
            listen_addr: "127.0.0.1".to_owned(),
            port: 9100,
        }
    }
}

// --- 환경변수 오버라이드 헬퍼 ---

fn override_string(target: &mut String, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        *target = val;
    }
}

fn override_bool(target: &mut bool, env_key: &str) {
    override_parsed(target, env_key, "bool");
}

fn override_usize(target: &mut usize, env_key: &str) {
    override_parsed(target, env_key, "usize");
}

fn override_u16(target: &mut u16, env_key: &str) {
    override_parsed(target, env_key, "u16");
}

fn override_u64(target: &mut u64, env_key: &str) {
    override_parsed(target, env_key, "u64");
}

fn override_parsed<T: std::str::FromStr>(target: &mut T, env_key: &str, type_name: &str) {
    if let Ok(val) = std::env::var(env_key) {
        match val.parse::<T>() {
            Ok(parsed) => *target = parsed,
            Err(_) => warn!(
                env_key,
                value = val.as_str(),
                expected = type_name,
                "failed to parse env var, ignoring"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_sane_values() {
        let config = CertwatchConfig::default();
        assert_eq!(config.general.log_level, "info");
        assert_eq!(config.general.log_format, "json");
        assert_eq!(config.observer.watch_timeout_secs, 3600);
        assert_eq!(config.observer.count_poll_interval_ms, 1000);
        assert!(config.observer.namespace.is_empty());
        assert_eq!(config.store.backend, "sqlite");
        assert!(config.metrics.enabled);
    }

    #[test]
    fn default_config_passes_validation() {
        CertwatchConfig::default().validate().unwrap();
    }

    #[test]
    fn parse_empty_toml_uses_defaults() {
        let config = CertwatchConfig::parse("").unwrap();
        assert_eq!(config.general.log_level, "info");
        assert_eq!(config.observer.notification_buffer, 256);
    }

    #[test]
    fn parse_partial_toml_merges_with_defaults() {
        let toml = r#"
[observer]
namespace = "csi-test"

[store]
backend = "memory"
"#;
        let config = CertwatchConfig::parse(toml).unwrap();
        assert_eq!(config.observer.namespace, "csi-test");
        assert_eq!(config.observer.watch_timeout_secs, 3600);
        assert_eq!(config.store.backend, "memory");
        assert_eq!(config.general.log_format, "json");
    }

    #[test]
    fn parse_full_toml() {
        let toml = r#"
[general]
log_level = "debug"
log_format = "pretty"

[observer]
watch_timeout_secs = 600
count_poll_interval_ms = 250
namespace = "storage"
notification_buffer = 1024

[store]
backend = "sqlite"
path = "/tmp/certwatch.db"

[metrics]
enabled = false
listen_addr = "0.0.0.0"
port = 9200
"#;
        let config = CertwatchConfig::parse(toml).unwrap();
        assert_eq!(config.general.log_level, "debug");
        assert_eq!(config.observer.watch_timeout_secs, 600);
        assert_eq!(config.observer.count_poll_interval_ms, 250);
        assert_eq!(config.observer.notification_buffer, 1024);
        assert_eq!(config.store.path, "/tmp/certwatch.db");
        assert!(!config.metrics.enabled);
        assert_eq!(config.metrics.port, 9200);
    }

    #[test]
    fn parse_invalid_toml_returns_error() {
        let err = CertwatchConfig::parse("invalid = [[[toml").unwrap_err();
        assert!(matches!(
            err,
            CertwatchError::Config(ConfigError::ParseFailed { .. })
        ));
    }

    #[test]
    fn validate_rejects_invalid_log_level() {
        let mut config = CertwatchConfig::default();
        config.general.log_level = "verbose".to_owned();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("log_level"));
    }

    #[test]
    fn validate_rejects_zero_watch_timeout() {
        let mut config = CertwatchConfig::default();
        config.observer.watch_timeout_secs = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("watch_timeout_secs"));
    }

    #[test]
    fn validate_rejects_excessive_watch_timeout() {
        let mut config = CertwatchConfig::default();
        config.observer.watch_timeout_secs = MAX_WATCH_TIMEOUT_SECS + 1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_unknown_backend() {
        let mut config = CertwatchConfig::default();
        config.store.backend = "postgres".to_owned();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("store.backend"));
    }

    #[test]
    fn validate_rejects_empty_sqlite_path() {
        let mut config = CertwatchConfig::default();
        config.store.path = String::new();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("store.path"));
    }

    #[test]
    fn validate_accepts_empty_path_for_memory_backend() {
        let mut config = CertwatchConfig::default();
        config.store.backend = "memory".to_owned();
        config.store.path = String::new();
        config.validate().unwrap();
    }

    #[test]
    fn validate_rejects_zero_port_when_metrics_enabled() {
        let mut config = CertwatchConfig::default();
        config.metrics.port = 0;
        assert!(config.validate().is_err());

        config.metrics.enabled = false;
        config.validate().unwrap();
    }

    #[test]
    #[serial_test::serial]
    fn env_override_string() {
        let mut val = "original".to_owned();
        // SAFETY: serial 테스트에서만 환경변수를 조작합니다.
        unsafe { std::env::set_var("TEST_CERTWATCH_STR", "overridden") };
        override_string(&mut val, "TEST_CERTWATCH_STR");
        assert_eq!(val, "overridden");
        unsafe { std::env::remove_var("TEST_CERTWATCH_STR") };
    }

    #[test]
    #[serial_test::serial]
    fn env_override_bool_invalid_keeps_original() {
        let mut val = false;
        // SAFETY: serial 테스트에서만 환경변수를 조작합니다.
        unsafe { std::env::set_var("TEST_CERTWATCH_BOOL_BAD", "not-a-bool") };
        override_bool(&mut val, "TEST_CERTWATCH_BOOL_BAD");
        assert!(!val);
        unsafe { std::env::remove_var("TEST_CERTWATCH_BOOL_BAD") };
    }

    #[test]
    #[serial_test::serial]
    fn env_override_u64() {
        let mut val = 10_u64;
        // SAFETY: serial 테스트에서만 환경변수를 조작합니다.
        unsafe { std::env::set_var("TEST_CERTWATCH_U64", "42") };
        override_u64(&mut val, "TEST_CERTWATCH_U64");
        assert_eq!(val, 42);
        unsafe { std::env::remove_var("TEST_CERTWATCH_U64") };
    }

    #[test]
    fn env_override_missing_var_keeps_original() {
        let mut val = "original".to_owned();
        override_string(&mut val, "TEST_CERTWATCH_NONEXISTENT_12345");
        assert_eq!(val, "original");
    }

    #[test]
    fn config_serialize_roundtrip() {
        let config = CertwatchConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed = CertwatchConfig::parse(&toml_str).unwrap();
        assert_eq!(config.general.log_level, parsed.general.log_level);
        assert_eq!(config.store.path, parsed.store.path);
        assert_eq!(config.metrics.port, parsed.metrics.port);
    }

    #[tokio::test]
    async fn from_file_not_found() {
        let err = CertwatchConfig::from_file("/nonexistent/path/certwatch.toml")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            CertwatchError::Config(ConfigError::FileNotFound { .. })
        ));
    }
}
