//! 메트릭 수집기 — 저장된 타임라인에서 통계를 도출합니다.
//!
//! 러너가 모든 observer의 완료를 기다린 뒤에만 호출해야 부분 타임라인을 읽지 않습니다.
//! 순서는 도착 순서가 아니라 저장된 시각으로만 재구성합니다.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use chrono::TimeDelta;
use serde::Serialize;
use tracing::{debug, info, warn};

use certwatch_core::event::{Event, EventType};
use certwatch_core::store::EventStore;
use certwatch_core::types::{Entity, EntityCount, EntityId, TestCase, TestCaseId};

use crate::error::CollectorError;
use crate::stats::DurationStats;

/// 짝지어진 두 전이 사이의 단계
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum Stage {
    /// `PvcAdded` → `PvcBound`
    PvcCreation,
    /// `PvcAttachStarted` → `PvcAttachEnded`
    PvcAttachment,
    /// `PvcUnattachStarted` → `PvcUnattachEnded`
    PvcUnattachment,
    /// `PvcDeletingStarted` → `PvcDeletingEnded`
    PvcDeletion,
    /// `PodAdded` → `PodReady`
    PodCreation,
    /// `PodTerminating` → `PodDeleted`
    PodDeletion,
}

impl Stage {
    /// 모든 단계
    pub const ALL: [Stage; 6] = [
        Self::PvcCreation,
        Self::PvcAttachment,
        Self::PvcUnattachment,
        Self::PvcDeletion,
        Self::PodCreation,
        Self::PodDeletion,
    ];

    /// 시작과 끝 이벤트 타입
    pub fn bounds(&self) -> (EventType, EventType) {
        match self {
            Self::PvcCreation => (EventType::PvcAdded, EventType::PvcBound),
            Self::PvcAttachment => (EventType::PvcAttachStarted, EventType::PvcAttachEnded),
            Self::PvcUnattachment => (EventType::PvcUnattachStarted, EventType::PvcUnattachEnded),
            Self::PvcDeletion => (EventType::PvcDeletingStarted, EventType::PvcDeletingEnded),
            Self::PodCreation => (EventType::PodAdded, EventType::PodReady),
            Self::PodDeletion => (EventType::PodTerminating, EventType::PodDeleted),
        }
    }

    /// 표시 이름
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PvcCreation => "PVC_CREATION",
            Self::PvcAttachment => "PVC_ATTACHMENT",
            Self::PvcUnattachment => "PVC_UNATTACHMENT",
            Self::PvcDeletion => "PVC_DELETION",
            Self::PodCreation => "POD_CREATION",
            Self::PodDeletion => "POD_DELETION",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 엔티티 하나의 시각순 이벤트
#[derive(Debug, Clone, Serialize)]
pub struct EntityTimeline {
    /// 엔티티
    pub entity: Entity,
    /// 시각순 이벤트 (같은 시각이면 저장 순서 유지)
    pub events: Vec<Event>,
}

impl EntityTimeline {
    /// 해당 타입의 첫 이벤트
    pub fn first(&self, event_type: EventType) -> Option<&Event> {
        self.events.iter().find(|e| e.event_type == event_type)
    }

    /// 단계의 소요 시간. 두 이벤트가 모두 있어야 합니다.
    pub fn duration(&self, stage: Stage) -> Option<TimeDelta> {
        let (start, end) = stage.bounds();
        let start = self.first(start)?;
        let end = self.first(end)?;
        Some(end.timestamp - start.timestamp)
    }
}

/// 상태별 엔티티 개수의 최댓값
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CountPeaks {
    /// 샘플 수
    pub samples: usize,
    pub pods_creating: u32,
    pub pods_ready: u32,
    pub pods_terminating: u32,
    pub pvc_creating: u32,
    pub pvc_bound: u32,
    pub pvc_terminating: u32,
}

impl CountPeaks {
    fn from_samples(samples: &[EntityCount]) -> Self {
        samples.iter().fold(
            Self {
                samples: samples.len(),
                ..Self::default()
            },
            |peak, c| Self {
                samples: peak.samples,
                pods_creating: peak.pods_creating.max(c.pods_creating),
                pods_ready: peak.pods_ready.max(c.pods_ready),
                pods_terminating: peak.pods_terminating.max(c.pods_terminating),
                pvc_creating: peak.pvc_creating.max(c.pvc_creating),
                pvc_bound: peak.pvc_bound.max(c.pvc_bound),
                pvc_terminating: peak.pvc_terminating.max(c.pvc_terminating),
            },
        )
    }
}

/// 테스트 케이스 하나의 메트릭
#[derive(Debug, Clone, Serialize)]
pub struct TestCaseMetrics {
    /// 테스트 케이스 ID
    pub tc_id: TestCaseId,
    /// 테스트 케이스 정보 (스토어에 있을 때)
    pub test_case: Option<TestCase>,
    /// 엔티티별 타임라인 (엔티티 ID 순)
    pub timelines: Vec<EntityTimeline>,
    /// 이벤트 타입별 개수 (없는 타입은 0)
    pub event_counts: BTreeMap<EventType, usize>,
    /// 단계별 소요 시간 요약 (표본이 없으면 0)
    pub stages: BTreeMap<Stage, DurationStats>,
    /// 개수 샘플 최댓값
    pub peaks: CountPeaks,
}

impl TestCaseMetrics {
    /// 엔티티 수
    pub fn entity_count(&self) -> usize {
        self.timelines.len()
    }

    /// 이벤트 타입의 개수
    pub fn count(&self, event_type: EventType) -> usize {
        self.event_counts.get(&event_type).copied().unwrap_or(0)
    }

    /// 단계 요약
    pub fn stage(&self, stage: Stage) -> DurationStats {
        self.stages.get(&stage).copied().unwrap_or_default()
    }
}

/// 실행(run) 하나의 메트릭
#[derive(Debug, Clone, Serialize)]
pub struct RunMetrics {
    /// 실행 이름
    pub run_name: String,
    /// 테스트 케이스별 메트릭 (시작 시각 순)
    pub test_cases: Vec<TestCaseMetrics>,
}

/// 스토어 기반 메트릭 수집기
pub struct MetricsCollector<S: EventStore> {
    store: Arc<S>,
}

impl<S: EventStore> MetricsCollector<S> {
    /// 새 수집기를 생성합니다.
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// 테스트 케이스 하나의 메트릭을 계산합니다.
    ///
    /// 이벤트가 가리키는 엔티티가 이전 테스트 케이스에 저장된 행이면
    /// (UID 중복) 그 행도 타임라인에 포함합니다.
    /// 엔티티와 이벤트가 모두 없으면 [`CollectorError::RunNotFound`].
    pub async fn collect(&self, tc_id: TestCaseId) -> Result<TestCaseMetrics, CollectorError> {
        let mut entities = self.store.get_entities(tc_id).await?;
        let events = self.store.get_events(tc_id).await?;
        if entities.is_empty() && events.is_empty() {
            return Err(CollectorError::RunNotFound(format!("test case {tc_id}")));
        }

        let known: HashSet<EntityId> = entities.iter().map(|e| e.id).collect();
        let mut carried: Vec<EntityId> = events
            .iter()
            .map(|e| e.entity_id)
            .filter(|id| !known.contains(id))
            .collect();
        carried.sort_unstable();
        carried.dedup();
        if !carried.is_empty() {
            debug!(tc_id, carried = carried.len(), "resolving entities from earlier test cases");
            entities.extend(self.store.get_entities_by_ids(&carried).await?);
        }
        if entities.is_empty() {
            return Err(CollectorError::RunNotFound(format!("test case {tc_id}")));
        }
        let counts = self.store.get_entity_counts(tc_id).await?;
        let test_case = self.store.get_test_case(tc_id).await?;

        let timelines = build_timelines(entities, events);

        let mut event_counts: BTreeMap<EventType, usize> =
            EventType::ALL.iter().map(|t| (*t, 0)).collect();
        for event in timelines.iter().flat_map(|t| &t.events) {
            *event_counts.entry(event.event_type).or_default() += 1;
        }

        let stages = Stage::ALL
            .iter()
            .map(|stage| {
                let samples: Vec<TimeDelta> =
                    timelines.iter().filter_map(|t| t.duration(*stage)).collect();
                (*stage, DurationStats::from_samples(&samples))
            })
            .collect();

        let metrics = TestCaseMetrics {
            tc_id,
            test_case,
            event_counts,
            stages,
            peaks: CountPeaks::from_samples(&counts),
            timelines,
        };
        info!(
            tc_id,
            entities = metrics.entity_count(),
            samples = metrics.peaks.samples,
            "test case metrics collected"
        );
        Ok(metrics)
    }

    /// 실행에 속한 모든 테스트 케이스의 메트릭을 계산합니다.
    ///
    /// 엔티티가 없는 테스트 케이스는 건너뜁니다. 남는 것이 없으면 `RunNotFound`.
    pub async fn collect_run(&self, run_name: &str) -> Result<RunMetrics, CollectorError> {
        let cases = self.store.get_test_cases_by_run(run_name).await?;
        let mut test_cases = Vec::with_capacity(cases.len());
        for case in &cases {
            match self.collect(case.id).await {
                Ok(metrics) => test_cases.push(metrics),
                Err(CollectorError::RunNotFound(_)) => {
                    warn!(run = run_name, tc_id = case.id, test_case = case.name.as_str(), "test case has no lifecycle data, skipping");
                }
                Err(e) => return Err(e),
            }
        }
        if test_cases.is_empty() {
            return Err(CollectorError::RunNotFound(format!("run {run_name}")));
        }
        Ok(RunMetrics {
            run_name: run_name.to_owned(),
            test_cases,
        })
    }
}

/// 이벤트를 엔티티별로 묶고 시각순으로 정렬합니다.
fn build_timelines(entities: Vec<Entity>, events: Vec<Event>) -> Vec<EntityTimeline> {
    let mut by_entity: HashMap<EntityId, Vec<Event>> = HashMap::new();
    for event in events {
        by_entity.entry(event.entity_id).or_default().push(event);
    }

    let mut timelines: Vec<EntityTimeline> = entities
        .into_iter()
        .map(|entity| {
            let mut events = by_entity.remove(&entity.id).unwrap_or_default();
            events.sort_by_key(|e| e.timestamp);
            EntityTimeline { entity, events }
        })
        .collect();
    timelines.sort_by_key(|t| t.entity.id);

    for (entity_id, orphans) in by_entity {
        warn!(entity_id, count = orphans.len(), "events reference an unknown entity, ignoring");
    }
    debug!(timelines = timelines.len(), "timelines rebuilt");
    timelines
}

#[cfg(test)]
mod tests {
    use super::*;
    use certwatch_core::types::EntityType;
    use chrono::{DateTime, Utc};

    fn entity(id: EntityId, name: &str, kind: EntityType) -> Entity {
        let mut e = Entity::new(name, format!("uid-{name}"), kind, 1);
        e.id = id;
        e
    }

    fn at(base: DateTime<Utc>, secs: i64) -> DateTime<Utc> {
        base + TimeDelta::seconds(secs)
    }

    #[test]
    fn stage_bounds_pair_start_and_end() {
        for stage in Stage::ALL {
            let (start, end) = stage.bounds();
            assert_ne!(start, end);
            assert_eq!(start.entity_type(), end.entity_type());
            assert!(!start.is_terminal());
        }
    }

    #[test]
    fn timelines_sort_by_timestamp_not_arrival() {
        let base = Utc::now();
        let events = vec![
            Event::new(EventType::PvcBound, 1, 10, at(base, 5)),
            Event::new(EventType::PvcAdded, 1, 10, at(base, 0)),
        ];
        let timelines = build_timelines(vec![entity(10, "pvc-a", EntityType::Pvc)], events);
        assert_eq!(timelines[0].events[0].event_type, EventType::PvcAdded);
        assert_eq!(
            timelines[0].duration(Stage::PvcCreation),
            Some(TimeDelta::seconds(5))
        );
        assert_eq!(timelines[0].duration(Stage::PvcDeletion), None);
    }

    #[test]
    fn orphan_events_are_dropped() {
        let base = Utc::now();
        let events = vec![Event::new(EventType::PodAdded, 1, 99, base)];
        let timelines = build_timelines(vec![entity(1, "pod-a", EntityType::Pod)], events);
        assert_eq!(timelines.len(), 1);
        assert!(timelines[0].events.is_empty());
    }

    #[test]
    fn peaks_take_maximum_per_field() {
        let now = Utc::now();
        let mut a = EntityCount::empty(1, now);
        a.pods_creating = 3;
        a.pvc_bound = 1;
        let mut b = EntityCount::empty(1, now);
        b.pods_ready = 2;
        b.pvc_bound = 4;
        let peaks = CountPeaks::from_samples(&[a, b]);
        assert_eq!(peaks.samples, 2);
        assert_eq!(peaks.pods_creating, 3);
        assert_eq!(peaks.pods_ready, 2);
        assert_eq!(peaks.pvc_bound, 4);
    }
}
