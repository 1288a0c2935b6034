//! observer 에러 타입
//!
//! [`ObserverError`]는 watch 열기, 리스트 조회, 설정, 러너 생명주기 에러를 표현합니다.
//! `From<ObserverError> for CertwatchError` 변환이 구현되어 있어
//! 상위 레이어에서 `?` 연산자로 전파할 수 있습니다.
//!
//! 세션 내부 에러는 러너로 전파되지 않고 [`SessionEnd`](crate::observer::SessionEnd)로 보고됩니다.

use certwatch_core::error::{CertwatchError, ObservationError, StoreError};

/// observer 도메인 에러
#[derive(Debug, thiserror::Error)]
pub enum ObserverError {
    /// watch 스트림 열기 실패
    #[error("failed to open watch for {kind}: {reason}")]
    WatchOpen {
        /// 리소스 종류
        kind: String,
        /// 실패 사유
        reason: String,
    },

    /// 열린 watch 스트림에서 발생한 에러
    #[error("watch stream error: {0}")]
    WatchStream(String),

    /// 리소스 목록 조회 실패
    #[error("failed to list {kind}: {reason}")]
    List {
        /// 리소스 종류
        kind: String,
        /// 실패 사유
        reason: String,
    },

    /// 설정 에러
    #[error("config error: {field}: {reason}")]
    Config {
        /// 설정 필드명
        field: String,
        /// 에러 사유
        reason: String,
    },

    /// 러너 생명주기 위반 (중복 start 등)
    #[error("runner lifecycle error: {0}")]
    Lifecycle(String),

    /// 스토어 에러
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

impl From<ObserverError> for CertwatchError {
    fn from(err: ObserverError) -> Self {
        match err {
            ObserverError::WatchOpen { kind, reason } => {
                CertwatchError::Observation(ObservationError::WatchOpen { kind, reason })
            }
            ObserverError::List { kind, reason } => {
                CertwatchError::Observation(ObservationError::List { kind, reason })
            }
            ObserverError::Store(e) => CertwatchError::Store(e),
            ObserverError::Config { field, reason } => {
                CertwatchError::Config(certwatch_core::error::ConfigError::InvalidValue {
                    field,
                    reason,
                })
            }
            ObserverError::WatchStream(_) | ObserverError::Lifecycle(_) => {
                CertwatchError::Observation(ObservationError::Lifecycle(err.to_string()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn watch_open_display() {
        let err = ObserverError::WatchOpen {
            kind: "Pod".to_owned(),
            reason: "connection refused".to_owned(),
        };
        let msg = err.to_string();
        assert!(msg.contains("Pod"));
        assert!(msg.contains("connection refused"));
    }

    #[test]
    fn converts_watch_open_to_observation_error() {
        let err: CertwatchError = ObserverError::WatchOpen {
            kind: "Pod".to_owned(),
            reason: "x".to_owned(),
        }
        .into();
        assert!(matches!(
            err,
            CertwatchError::Observation(ObservationError::WatchOpen { .. })
        ));
    }

    #[test]
    fn converts_config_to_config_error() {
        let err: CertwatchError = ObserverError::Config {
            field: "notification_buffer".to_owned(),
            reason: "must be greater than 0".to_owned(),
        }
        .into();
        assert!(matches!(err, CertwatchError::Config(_)));
        assert!(err.to_string().contains("notification_buffer"));
    }

    #[test]
    fn store_error_passes_through() {
        let err: CertwatchError = ObserverError::from(StoreError::Query("locked".to_owned())).into();
        assert!(matches!(err, CertwatchError::Store(StoreError::Query(_))));
    }

    #[test]
    fn lifecycle_converts_with_message() {
        let err: CertwatchError = ObserverError::Lifecycle("already running".to_owned()).into();
        assert!(err.to_string().contains("already running"));
    }
}
