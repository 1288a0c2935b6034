//! 에러 타입 — 도메인별 에러 정의
//!
//! 각 크레이트는 자체 에러 타입을 가지며, `From` 변환을 통해
//! 최상위 [`CertwatchError`]로 `?` 전파할 수 있습니다.

/// certwatch 최상위 에러 타입
#[derive(Debug, thiserror::Error)]
pub enum CertwatchError {
    /// 설정 관련 에러
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    /// 이벤트 스토어 에러
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// 관찰(watch) 에러
    #[error("observation error: {0}")]
    Observation(#[from] ObservationError),

    /// 메트릭 수집 에러
    #[error("metrics error: {0}")]
    Metrics(#[from] MetricsError),

    /// I/O 에러
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// 설정 관련 에러
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// 설정 파일을 찾을 수 없음
    #[error("config file not found: {path}")]
    FileNotFound { path: String },

    /// 설정 파싱 실패
    #[error("failed to parse config: {reason}")]
    ParseFailed { reason: String },

    /// 유효하지 않은 설정 값
    #[error("invalid config value for '{field}': {reason}")]
    InvalidValue { field: String, reason: String },
}

/// 이벤트 스토어 에러
///
/// [`Duplicate`](StoreError::Duplicate)는 자연 키 충돌을 나타냅니다.
/// 엔티티 저장에서는 성공으로 취급되므로 호출자에게 거의 노출되지 않습니다.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// 스토어 연결/열기 실패
    #[error("connection failed: {0}")]
    Connection(String),

    /// 쿼리 실패
    #[error("query failed: {0}")]
    Query(String),

    /// 유일성 제약 위반
    #[error("duplicate key: {0}")]
    Duplicate(String),

    /// 참조 대상 없음
    #[error("not found: {0}")]
    NotFound(String),
}

/// 관찰 파이프라인 에러
#[derive(Debug, thiserror::Error)]
pub enum ObservationError {
    /// watch 스트림 열기 실패
    #[error("failed to open watch for {kind}: {reason}")]
    WatchOpen { kind: String, reason: String },

    /// 리소스 목록 조회 실패
    #[error("failed to list {kind}: {reason}")]
    List { kind: String, reason: String },

    /// 러너 생명주기 위반
    #[error("runner lifecycle error: {0}")]
    Lifecycle(String),
}

/// 메트릭 수집 에러
#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    /// 테스트 케이스/런에 해당하는 엔티티가 없음
    #[error("run not found: {0}")]
    RunNotFound(String),

    /// 스토어 읽기 실패
    #[error("failed to read store: {0}")]
    StoreRead(String),
}
