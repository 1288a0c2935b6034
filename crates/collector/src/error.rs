//! 수집기 에러 타입

use certwatch_core::error::{CertwatchError, MetricsError, StoreError};

/// 수집기 도메인 에러
#[derive(Debug, thiserror::Error)]
pub enum CollectorError {
    /// 테스트 케이스 또는 엔티티가 없음
    #[error("run not found: {0}")]
    RunNotFound(String),

    /// 스토어 조회 실패
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

impl From<CollectorError> for CertwatchError {
    fn from(err: CollectorError) -> Self {
        match err {
            CollectorError::RunNotFound(what) => {
                CertwatchError::Metrics(MetricsError::RunNotFound(what))
            }
            CollectorError::Store(e) => CertwatchError::Store(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_not_found_maps_to_metrics_error() {
        let err: CertwatchError = CollectorError::RunNotFound("tc 3".to_owned()).into();
        assert!(matches!(
            err,
            CertwatchError::Metrics(MetricsError::RunNotFound(ref what)) if what == "tc 3"
        ));
    }

    #[test]
    fn store_error_is_preserved() {
        let err: CertwatchError =
            CollectorError::Store(StoreError::Query("boom".to_owned())).into();
        assert!(err.to_string().contains("boom"));
    }
}
