//! 수집기 통합 테스트 -- 스토어에 기록된 타임라인으로 메트릭 계산

use std::sync::Arc;

use chrono::{DateTime, TimeDelta, Utc};

use certwatch_collector::{CollectorError, MetricsCollector, Stage};
use certwatch_core::event::{Event, EventType};
use certwatch_core::store::EventStore;
use certwatch_core::types::{Entity, EntityCount, EntityType, TestCase, TestCaseId};
use certwatch_store::{MemoryStore, SqliteStore};

fn at(base: DateTime<Utc>, secs: i64) -> DateTime<Utc> {
    base + TimeDelta::seconds(secs)
}

/// claim 두 개와 Pod 하나의 전체 생명주기를 기록합니다.
async fn seed(store: &MemoryStore, run: &str) -> TestCaseId {
    let mut tc = TestCase::new("VolumeLifecycle", run);
    store.create_test_case(&mut tc).await.unwrap();
    let base = Utc::now();

    let mut entities = [
        Entity::new("pvc-a", format!("{}-uid-a", tc.id), EntityType::Pvc, tc.id),
        Entity::new("pvc-b", format!("{}-uid-b", tc.id), EntityType::Pvc, tc.id),
        Entity::new("pod-a", format!("{}-uid-p", tc.id), EntityType::Pod, tc.id),
    ];
    store.save_entities(&mut entities).await.unwrap();
    let (a, b, p) = (entities[0].id, entities[1].id, entities[2].id);

    let events = [
        Event::new(EventType::PvcAdded, tc.id, a, at(base, 0)),
        Event::new(EventType::PvcBound, tc.id, a, at(base, 2)),
        Event::new(EventType::PvcAdded, tc.id, b, at(base, 1)),
        Event::new(EventType::PvcBound, tc.id, b, at(base, 5)),
        Event::new(EventType::PvcAttachStarted, tc.id, a, at(base, 6)),
        Event::new(EventType::PvcAttachEnded, tc.id, a, at(base, 9)),
        Event::new(EventType::PodAdded, tc.id, p, at(base, 5)),
        Event::new(EventType::PodReady, tc.id, p, at(base, 15)),
    ];
    store.save_events(&events).await.unwrap();

    let mut peak = EntityCount::empty(tc.id, at(base, 3));
    peak.pvc_bound = 1;
    peak.pvc_creating = 1;
    let mut later = EntityCount::empty(tc.id, at(base, 10));
    later.pvc_bound = 2;
    later.pods_ready = 1;
    store.save_entity_counts(&[peak, later]).await.unwrap();

    tc.id
}

#[tokio::test]
async fn stage_durations_and_counts() {
    let store = Arc::new(MemoryStore::new());
    let tc_id = seed(&store, "run-1").await;
    let collector = MetricsCollector::new(Arc::clone(&store));

    let metrics = collector.collect(tc_id).await.unwrap();
    assert_eq!(metrics.entity_count(), 3);
    assert_eq!(metrics.test_case.as_ref().unwrap().run_name, "run-1");

    let creation = metrics.stage(Stage::PvcCreation);
    assert_eq!(creation.count, 2);
    assert_eq!(creation.min_secs, 2.0);
    assert_eq!(creation.max_secs, 4.0);
    assert_eq!(creation.median_secs, 3.0);

    assert_eq!(metrics.stage(Stage::PvcAttachment).avg_secs, 3.0);
    assert_eq!(metrics.stage(Stage::PodCreation).max_secs, 10.0);

    assert_eq!(metrics.count(EventType::PvcAdded), 2);
    assert_eq!(metrics.peaks.pvc_bound, 2);
    assert_eq!(metrics.peaks.pvc_creating, 1);
    assert_eq!(metrics.peaks.samples, 2);
}

#[tokio::test]
async fn missing_transitions_are_zero_not_errors() {
    let store = Arc::new(MemoryStore::new());
    let tc_id = seed(&store, "run-1").await;
    let metrics = MetricsCollector::new(store).collect(tc_id).await.unwrap();

    assert_eq!(metrics.count(EventType::PvcDeletingEnded), 0);
    assert_eq!(metrics.event_counts.len(), EventType::ALL.len());
    assert_eq!(metrics.stage(Stage::PodDeletion).count, 0);
    assert_eq!(metrics.stages.len(), Stage::ALL.len());
}

#[tokio::test]
async fn unknown_test_case_is_run_not_found() {
    let store = Arc::new(MemoryStore::new());
    let mut empty = TestCase::new("NothingHappened", "run-empty");
    store.create_test_case(&mut empty).await.unwrap();
    let collector = MetricsCollector::new(store);

    assert!(matches!(
        collector.collect(empty.id).await,
        Err(CollectorError::RunNotFound(_))
    ));
    assert!(matches!(
        collector.collect(404).await,
        Err(CollectorError::RunNotFound(_))
    ));
    assert!(matches!(
        collector.collect_run("run-empty").await,
        Err(CollectorError::RunNotFound(_))
    ));
    assert!(matches!(
        collector.collect_run("no-such-run").await,
        Err(CollectorError::RunNotFound(_))
    ));
}

#[tokio::test]
async fn run_collects_every_test_case() {
    let store = Arc::new(MemoryStore::new());
    let first = seed(&store, "run-2").await;
    let second = seed(&store, "run-2").await;
    seed(&store, "other-run").await;

    let run = MetricsCollector::new(store).collect_run("run-2").await.unwrap();
    assert_eq!(run.run_name, "run-2");
    let ids: Vec<TestCaseId> = run.test_cases.iter().map(|m| m.tc_id).collect();
    assert_eq!(ids, vec![first, second]);
}

#[tokio::test]
async fn metrics_serialize_to_json() {
    let store = Arc::new(MemoryStore::new());
    let tc_id = seed(&store, "run-3").await;
    let metrics = MetricsCollector::new(store).collect(tc_id).await.unwrap();

    let json = serde_json::to_value(&metrics).unwrap();
    assert_eq!(json["stages"]["PvcCreation"]["count"], 2);
    assert_eq!(json["event_counts"]["PodReady"], 1);
}

/// 첫 테스트 케이스에서 저장된 claim이 다음 테스트 케이스의 watch에 다시 나타난 경우
async fn carried_over_claim<S: EventStore>(store: Arc<S>) {
    let mut tc1 = TestCase::new("First", "run-carry");
    store.create_test_case(&mut tc1).await.unwrap();
    let mut tc2 = TestCase::new("Second", "run-carry");
    store.create_test_case(&mut tc2).await.unwrap();

    let mut original = [Entity::new("pvc-1", "uid-carry", EntityType::Pvc, tc1.id)];
    store.save_entities(&mut original).await.unwrap();
    let mut replayed = [Entity::new("pvc-1", "uid-carry", EntityType::Pvc, tc2.id)];
    store.save_entities(&mut replayed).await.unwrap();
    assert_eq!(replayed[0].id, original[0].id);

    let base = Utc::now();
    let events = [
        Event::new(EventType::PvcDeletingStarted, tc2.id, replayed[0].id, at(base, 0)),
        Event::new(EventType::PvcDeletingEnded, tc2.id, replayed[0].id, at(base, 4)),
    ];
    store.save_events(&events).await.unwrap();

    let collector = MetricsCollector::new(Arc::clone(&store));
    let metrics = collector.collect(tc2.id).await.unwrap();
    assert_eq!(metrics.entity_count(), 1);
    assert_eq!(metrics.timelines[0].events.len(), 2);
    assert_eq!(metrics.count(EventType::PvcDeletingEnded), 1);
    assert_eq!(metrics.stage(Stage::PvcDeletion).max_secs, 4.0);

    // 이벤트가 없는 첫 테스트 케이스도 자신의 엔티티로 수집됩니다
    let first = collector.collect(tc1.id).await.unwrap();
    assert_eq!(first.count(EventType::PvcDeletingEnded), 0);

    let run = collector.collect_run("run-carry").await.unwrap();
    assert_eq!(run.test_cases.len(), 2);
}

#[tokio::test]
async fn carried_over_entity_events_are_collected_memory() {
    carried_over_claim(Arc::new(MemoryStore::new())).await;
}

#[tokio::test]
async fn carried_over_entity_events_are_collected_sqlite() {
    carried_over_claim(Arc::new(SqliteStore::open_in_memory().unwrap())).await;
}
