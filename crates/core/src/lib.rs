//! certwatch 공통 크레이트
//!
//! 모든 크레이트가 공유하는 도메인 모델, [`EventStore`] trait,
//! 에러 타입, 설정, 메트릭 이름을 정의합니다.

pub mod config;
pub mod error;
pub mod event;
pub mod metrics;
pub mod store;
pub mod types;

// --- 주요 타입 re-export ---

// 에러
pub use error::{CertwatchError, ConfigError, MetricsError, ObservationError, StoreError};

// 설정
pub use config::CertwatchConfig;

// 이벤트
pub use event::{Event, EventType};

// 스토어 trait
pub use store::EventStore;

// 도메인 타입
pub use types::{Entity, EntityCount, EntityId, EntityType, TestCase, TestCaseId};
