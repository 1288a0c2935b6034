//! observer 설정
//!
//! [`ObserverConfig`]는 core의 [`ObserverSection`](certwatch_core::config::ObserverSection)을
//! 기반으로 observer 전용 설정을 제공합니다.
//!
//! # 사용 예시
//! ```ignore
//! use certwatch_core::config::CertwatchConfig;
//! use certwatch_observer::config::ObserverConfig;
//!
//! let core_config = CertwatchConfig::default();
//! let config = ObserverConfig::from_core(&core_config.observer);
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ObserverError;

/// 설정 상한값 상수
const MAX_WATCH_TIMEOUT_SECS: u64 = 86_400;
const MAX_COUNT_POLL_INTERVAL_MS: u64 = 60_000;
const MAX_NOTIFICATION_BUFFER: usize = 65_536;

/// observer 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObserverConfig {
    /// watch 한 번의 최대 유지 시간 (초)
    pub watch_timeout_secs: u64,
    /// 엔티티 개수 샘플링 주기 (밀리초)
    pub count_poll_interval_ms: u64,
    /// 관찰 네임스페이스 (빈 문자열이면 전체)
    pub namespace: String,
    /// watch 알림 채널 버퍼 크기
    pub notification_buffer: usize,
}

impl Default for ObserverConfig {
    fn default() -> Self {
        Self {
            watch_timeout_secs: 3600,
            count_poll_interval_ms: 1000,
            namespace: String::new(),
            notification_buffer: 256,
        }
    }
}

impl ObserverConfig {
    /// core의 `ObserverSection`에서 observer 설정을 생성합니다.
    pub fn from_core(core: &certwatch_core::config::ObserverSection) -> Self {
        Self {
            watch_timeout_secs: core.watch_timeout_secs,
            count_poll_interval_ms: core.count_poll_interval_ms,
            namespace: core.namespace.clone(),
            notification_buffer: core.notification_buffer,
        }
    }

    /// watch 최대 유지 시간
    pub fn watch_timeout(&self) -> Duration {
        Duration::from_secs(self.watch_timeout_secs)
    }

    /// 개수 샘플링 주기
    pub fn count_poll_interval(&self) -> Duration {
        Duration::from_millis(self.count_poll_interval_ms)
    }

    /// 설정값의 유효성을 검증합니다.
    pub fn validate(&self) -> Result<(), ObserverError> {
        if self.watch_timeout_secs == 0 || self.watch_timeout_secs > MAX_WATCH_TIMEOUT_SECS {
            return Err(ObserverError::Config {
                field: "watch_timeout_secs".to_owned(),
                reason: format!("must be 1-{MAX_WATCH_TIMEOUT_SECS}"),
            });
        }

        if self.count_poll_interval_ms == 0
            || self.count_poll_interval_ms > MAX_COUNT_POLL_INTERVAL_MS
        {
            return Err(ObserverError::Config {
                field: "count_poll_interval_ms".to_owned(),
                reason: format!("must be 1-{MAX_COUNT_POLL_INTERVAL_MS}"),
            });
        }

        if self.notification_buffer == 0 || self.notification_buffer > MAX_NOTIFICATION_BUFFER {
            return Err(ObserverError::Config {
                field: "notification_buffer".to_owned(),
                reason: format!("must be 1-{MAX_NOTIFICATION_BUFFER}"),
            });
        }

        Ok(())
    }
}

/// observer 설정 빌더
#[derive(Default)]
pub struct ObserverConfigBuilder {
    config: ObserverConfig,
}

impl ObserverConfigBuilder {
    /// 새 빌더를 생성합니다.
    pub fn new() -> Self {
        Self::default()
    }

    /// watch 최대 유지 시간(초)을 설정합니다.
    pub fn watch_timeout_secs(mut self, secs: u64) -> Self {
        self.config.watch_timeout_secs = secs;
        self
    }

    /// 개수 샘플링 주기(밀리초)를 설정합니다.
    pub fn count_poll_interval_ms(mut self, ms: u64) -> Self {
        self.config.count_poll_interval_ms = ms;
        self
    }

    /// 관찰 네임스페이스를 설정합니다.
    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.config.namespace = namespace.into();
        self
    }

    /// 알림 채널 버퍼 크기를 설정합니다.
    pub fn notification_buffer(mut self, size: usize) -> Self {
        self.config.notification_buffer = size;
        self
    }

    /// 설정을 검증하고 `ObserverConfig`를 생성합니다.
    pub fn build(self) -> Result<ObserverConfig, ObserverError> {
        self.config.validate()?;
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        ObserverConfig::default().validate().unwrap();
    }

    #[test]
    fn from_core_preserves_values() {
        let core = certwatch_core::config::ObserverSection {
            watch_timeout_secs: 120,
            count_poll_interval_ms: 500,
            namespace: "storage".to_owned(),
            notification_buffer: 64,
        };
        let config = ObserverConfig::from_core(&core);
        assert_eq!(config.watch_timeout(), Duration::from_secs(120));
        assert_eq!(config.count_poll_interval(), Duration::from_millis(500));
        assert_eq!(config.namespace, "storage");
        assert_eq!(config.notification_buffer, 64);
    }

    #[test]
    fn validate_rejects_zero_timeout() {
        let config = ObserverConfig {
            watch_timeout_secs: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_excessive_poll_interval() {
        let config = ObserverConfig {
            count_poll_interval_ms: 120_000,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_zero_buffer() {
        let config = ObserverConfig {
            notification_buffer: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn builder_creates_valid_config() {
        let config = ObserverConfigBuilder::new()
            .watch_timeout_secs(30)
            .count_poll_interval_ms(100)
            .namespace("csi")
            .notification_buffer(16)
            .build()
            .unwrap();
        assert_eq!(config.watch_timeout_secs, 30);
        assert_eq!(config.namespace, "csi");
    }

    #[test]
    fn builder_rejects_invalid_config() {
        let result = ObserverConfigBuilder::new().notification_buffer(0).build();
        assert!(result.is_err());
    }
}
