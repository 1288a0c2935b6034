//! 인메모리 이벤트 스토어
//!
//! 테스트와 dry run에서 사용합니다. 프로세스 종료 시 내용이 사라집니다.
//! 단일 `Mutex` 아래에서 배치를 처리하므로 배치 단위 원자성이 보장됩니다.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::Mutex;
use tracing::debug;

use certwatch_core::error::StoreError;
use certwatch_core::event::Event;
use certwatch_core::metrics as m;
use certwatch_core::store::EventStore;
use certwatch_core::types::{Entity, EntityCount, EntityId, TestCase, TestCaseId};

#[derive(Default)]
struct Inner {
    next_tc_id: i64,
    next_entity_id: i64,
    next_event_id: i64,
    test_cases: Vec<TestCase>,
    entities: Vec<Entity>,
    events: Vec<Event>,
    counts: Vec<EntityCount>,
}

impl Inner {
    fn find_existing(&self, entity: &Entity) -> Option<i64> {
        self.entities
            .iter()
            .find(|e| {
                (e.entity_type == entity.entity_type
                    && e.name == entity.name
                    && e.tc_id == entity.tc_id)
                    || e.k8s_uid == entity.k8s_uid
            })
            .map(|e| e.id)
    }
}

/// 인메모리 [`EventStore`] 구현
///
/// `Clone`은 같은 저장소를 공유하는 핸들을 만듭니다.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryStore {
    /// 빈 스토어를 생성합니다.
    pub fn new() -> Self {
        Self::default()
    }

    /// 저장된 엔티티 수
    pub async fn entity_count(&self) -> usize {
        self.inner.lock().await.entities.len()
    }

    /// 저장된 이벤트 수
    pub async fn event_count(&self) -> usize {
        self.inner.lock().await.events.len()
    }
}

impl EventStore for MemoryStore {
    async fn save_entities(&self, entities: &mut [Entity]) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        for entity in entities.iter_mut() {
            if let Some(existing) = inner.find_existing(entity) {
                debug!(entity = %entity, existing, "entity already stored");
                metrics::counter!(m::STORE_ENTITY_DUPLICATES_TOTAL).increment(1);
                entity.id = existing;
                continue;
            }
            inner.next_entity_id += 1;
            entity.id = inner.next_entity_id;
            inner.entities.push(entity.clone());
        }
        Ok(())
    }

    async fn save_events(&self, events: &[Event]) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;

        // 먼저 전체 배치를 검증하고, 통과한 경우에만 반영
        let mut names: HashSet<&str> = inner.events.iter().map(|e| e.name.as_str()).collect();
        for event in events {
            if !inner.entities.iter().any(|e| e.id == event.entity_id) {
                return Err(StoreError::NotFound(format!(
                    "entity {} referenced by {}",
                    event.entity_id, event.name
                )));
            }
            if !names.insert(event.name.as_str()) {
                return Err(StoreError::Duplicate(event.name.clone()));
            }
        }

        for event in events {
            inner.next_event_id += 1;
            let mut stored = event.clone();
            stored.id = Some(inner.next_event_id);
            inner.events.push(stored);
        }
        Ok(())
    }

    async fn save_entity_counts(&self, counts: &[EntityCount]) -> Result<(), StoreError> {
        self.inner.lock().await.counts.extend_from_slice(counts);
        Ok(())
    }

    async fn create_test_case(&self, test_case: &mut TestCase) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        inner.next_tc_id += 1;
        test_case.id = inner.next_tc_id;
        inner.test_cases.push(test_case.clone());
        Ok(())
    }

    async fn finish_test_case(&self, tc_id: TestCaseId, success: bool) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        let tc = inner
            .test_cases
            .iter_mut()
            .find(|tc| tc.id == tc_id)
            .ok_or_else(|| StoreError::NotFound(format!("test case {tc_id}")))?;
        tc.ended_at = Some(Utc::now());
        tc.success = Some(success);
        Ok(())
    }

    async fn get_test_case(&self, tc_id: TestCaseId) -> Result<Option<TestCase>, StoreError> {
        let inner = self.inner.lock().await;
        Ok(inner.test_cases.iter().find(|tc| tc.id == tc_id).cloned())
    }

    async fn get_test_cases_by_run(&self, run_name: &str) -> Result<Vec<TestCase>, StoreError> {
        let inner = self.inner.lock().await;
        let mut cases: Vec<TestCase> = inner
            .test_cases
            .iter()
            .filter(|tc| tc.run_name == run_name)
            .cloned()
            .collect();
        cases.sort_by_key(|tc| (tc.started_at, tc.id));
        Ok(cases)
    }

    async fn get_entities(&self, tc_id: TestCaseId) -> Result<Vec<Entity>, StoreError> {
        let inner = self.inner.lock().await;
        Ok(inner
            .entities
            .iter()
            .filter(|e| e.tc_id == tc_id)
            .cloned()
            .collect())
    }

    async fn get_entities_by_ids(&self, ids: &[EntityId]) -> Result<Vec<Entity>, StoreError> {
        let inner = self.inner.lock().await;
        Ok(inner
            .entities
            .iter()
            .filter(|e| ids.contains(&e.id))
            .cloned()
            .collect())
    }

    async fn get_events(&self, tc_id: TestCaseId) -> Result<Vec<Event>, StoreError> {
        let inner = self.inner.lock().await;
        Ok(inner
            .events
            .iter()
            .filter(|e| e.tc_id == tc_id)
            .cloned()
            .collect())
    }

    async fn get_entity_counts(&self, tc_id: TestCaseId) -> Result<Vec<EntityCount>, StoreError> {
        let inner = self.inner.lock().await;
        Ok(inner
            .counts
            .iter()
            .filter(|c| c.tc_id == tc_id)
            .copied()
            .collect())
    }
}
