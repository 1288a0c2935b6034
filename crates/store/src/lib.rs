//! certwatch 이벤트 스토어 구현
//!
//! # Module Structure
//!
//! - [`memory`]: 인메모리 스토어 (`MemoryStore`)
//! - [`sqlite`]: SQLite 스토어 (`SqliteStore`)
//!
//! [`StoreBackend`]는 설정의 `[store] backend` 값에 따라 둘 중 하나를 선택합니다.

pub mod memory;
pub mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use certwatch_core::config::StoreSection;
use certwatch_core::error::{ConfigError, StoreError};
use certwatch_core::event::Event;
use certwatch_core::store::EventStore;
use certwatch_core::types::{Entity, EntityCount, EntityId, TestCase, TestCaseId};
use certwatch_core::CertwatchError;

/// 설정으로 선택되는 스토어 백엔드
#[derive(Clone)]
pub enum StoreBackend {
    /// 인메모리
    Memory(MemoryStore),
    /// SQLite 파일
    Sqlite(SqliteStore),
}

impl StoreBackend {
    /// `[store]` 설정 섹션으로 백엔드를 엽니다.
    pub fn from_config(config: &StoreSection) -> Result<Self, CertwatchError> {
        match config.backend.as_str() {
            "memory" => Ok(Self::Memory(MemoryStore::new())),
            "sqlite" => Ok(Self::Sqlite(SqliteStore::open(&config.path)?)),
            other => Err(ConfigError::InvalidValue {
                field: "store.backend".to_owned(),
                reason: format!("unknown backend: {other}"),
            }
            .into()),
        }
    }

    /// 백엔드 이름
    pub fn name(&self) -> &'static str {
        match self {
            Self::Memory(_) => "memory",
            Self::Sqlite(_) => "sqlite",
        }
    }
}

macro_rules! delegate {
    ($self:ident, $store:ident => $call:expr) => {
        match $self {
            StoreBackend::Memory($store) => $call.await,
            StoreBackend::Sqlite($store) => $call.await,
        }
    };
}

impl EventStore for StoreBackend {
    async fn save_entities(&self, entities: &mut [Entity]) -> Result<(), StoreError> {
        delegate!(self, s => s.save_entities(entities))
    }

    async fn save_events(&self, events: &[Event]) -> Result<(), StoreError> {
        delegate!(self, s => s.save_events(events))
    }

    async fn save_entity_counts(&self, counts: &[EntityCount]) -> Result<(), StoreError> {
        delegate!(self, s => s.save_entity_counts(counts))
    }

    async fn create_test_case(&self, test_case: &mut TestCase) -> Result<(), StoreError> {
        delegate!(self, s => s.create_test_case(test_case))
    }

    async fn finish_test_case(&self, tc_id: TestCaseId, success: bool) -> Result<(), StoreError> {
        delegate!(self, s => s.finish_test_case(tc_id, success))
    }

    async fn get_test_case(&self, tc_id: TestCaseId) -> Result<Option<TestCase>, StoreError> {
        delegate!(self, s => s.get_test_case(tc_id))
    }

    async fn get_test_cases_by_run(&self, run_name: &str) -> Result<Vec<TestCase>, StoreError> {
        delegate!(self, s => s.get_test_cases_by_run(run_name))
    }

    async fn get_entities(&self, tc_id: TestCaseId) -> Result<Vec<Entity>, StoreError> {
        delegate!(self, s => s.get_entities(tc_id))
    }

    async fn get_entities_by_ids(&self, ids: &[EntityId]) -> Result<Vec<Entity>, StoreError> {
        delegate!(self, s => s.get_entities_by_ids(ids))
    }

    async fn get_events(&self, tc_id: TestCaseId) -> Result<Vec<Event>, StoreError> {
        delegate!(self, s => s.get_events(tc_id))
    }

    async fn get_entity_counts(&self, tc_id: TestCaseId) -> Result<Vec<EntityCount>, StoreError> {
        delegate!(self, s => s.get_entity_counts(tc_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_backend_from_config() {
        let section = StoreSection {
            backend: "memory".to_owned(),
            path: String::new(),
        };
        let store = StoreBackend::from_config(&section).unwrap();
        assert_eq!(store.name(), "memory");
    }

    #[test]
    fn sqlite_backend_from_config() {
        let dir = tempfile::tempdir().unwrap();
        let section = StoreSection {
            backend: "sqlite".to_owned(),
            path: dir.path().join("cw.db").display().to_string(),
        };
        let store = StoreBackend::from_config(&section).unwrap();
        assert_eq!(store.name(), "sqlite");
    }

    #[test]
    fn unknown_backend_is_rejected() {
        let section = StoreSection {
            backend: "postgres".to_owned(),
            path: String::new(),
        };
        assert!(StoreBackend::from_config(&section).is_err());
    }
}
