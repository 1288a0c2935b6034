//! 이벤트 스토어 trait — 엔티티/이벤트 영속화 경계
//!
//! observer는 [`EventStore`]를 통해서만 저장소에 접근합니다.
//! 구현체는 `certwatch-store` 크레이트에 있습니다 (`MemoryStore`, `SqliteStore`).
//!
//! # 보장 사항
//! - [`save_entities`](EventStore::save_entities): 자연 키 중복은 성공으로 취급하고,
//!   이미 저장된 ID를 채워 돌려줍니다.
//! - [`save_events`](EventStore::save_events): 배치 단위 원자성 (전부 보이거나 전부 안 보임)

use std::future::Future;

use crate::error::StoreError;
use crate::event::Event;
use crate::types::{Entity, EntityCount, EntityId, TestCase, TestCaseId};

/// 엔티티와 이벤트의 영속 저장소
///
/// 여러 observer 태스크와 러너가 동시에 호출하므로 `Send + Sync + 'static`이어야 합니다.
pub trait EventStore: Send + Sync + 'static {
    /// 엔티티 배치를 저장하고 각 엔티티의 `id`를 채웁니다.
    ///
    /// (종류, 이름, 테스트 케이스) 또는 UID가 이미 존재하면 에러 없이
    /// 기존 행의 ID를 사용합니다. 그 외 실패는 에러로 반환합니다.
    fn save_entities(
        &self,
        entities: &mut [Entity],
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// 이벤트 배치를 원자적으로 저장합니다.
    fn save_events(&self, events: &[Event]) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// 엔티티 개수 샘플 배치를 저장합니다.
    fn save_entity_counts(
        &self,
        counts: &[EntityCount],
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// 테스트 케이스를 생성하고 ID를 부여합니다.
    fn create_test_case(
        &self,
        test_case: &mut TestCase,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// 테스트 케이스의 종료 시각과 성공 여부를 기록합니다.
    fn finish_test_case(
        &self,
        tc_id: TestCaseId,
        success: bool,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// ID로 테스트 케이스를 조회합니다.
    fn get_test_case(
        &self,
        tc_id: TestCaseId,
    ) -> impl Future<Output = Result<Option<TestCase>, StoreError>> + Send;

    /// 런 이름으로 테스트 케이스 목록을 조회합니다 (시작 시각 순).
    fn get_test_cases_by_run(
        &self,
        run_name: &str,
    ) -> impl Future<Output = Result<Vec<TestCase>, StoreError>> + Send;

    /// 테스트 케이스의 모든 엔티티를 조회합니다.
    fn get_entities(
        &self,
        tc_id: TestCaseId,
    ) -> impl Future<Output = Result<Vec<Entity>, StoreError>> + Send;

    /// ID로 엔티티를 조회합니다. 없는 ID는 건너뜁니다.
    ///
    /// UID 중복으로 이전 테스트 케이스의 엔티티에 연결된 이벤트를
    /// 해석할 때 사용합니다.
    fn get_entities_by_ids(
        &self,
        ids: &[EntityId],
    ) -> impl Future<Output = Result<Vec<Entity>, StoreError>> + Send;

    /// 테스트 케이스의 모든 이벤트를 조회합니다.
    fn get_events(
        &self,
        tc_id: TestCaseId,
    ) -> impl Future<Output = Result<Vec<Event>, StoreError>> + Send;

    /// 테스트 케이스의 엔티티 개수 샘플을 조회합니다.
    fn get_entity_counts(
        &self,
        tc_id: TestCaseId,
    ) -> impl Future<Output = Result<Vec<EntityCount>, StoreError>> + Send;
}
