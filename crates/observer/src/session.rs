//! 관찰 세션 상태 — 가드, 버퍼, 보류 중인 어태치먼트
//!
//! 세션은 `start_watching` 호출 하나의 수명과 같습니다.
//! 가드 맵과 버퍼는 세션이 끝나면 버려지므로 테스트 케이스 간에 새지 않습니다.

use std::collections::{HashMap, HashSet};
use std::time::Instant;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use certwatch_core::error::StoreError;
use certwatch_core::event::{Event, EventType};
use certwatch_core::metrics as m;
use certwatch_core::store::EventStore;
use certwatch_core::types::{Entity, EntityCount, EntityType, TestCaseId};

use crate::kinds::{ObserverKind, Target, Transition};
use crate::registry::HandoffRegistry;
use crate::watch::{ChangeType, Notification, ResourceSnapshot};

/// 레지스트리에서 claim을 아직 찾지 못한 어태치먼트
#[derive(Debug)]
struct ParkedAttachment {
    volume: String,
    events: Vec<(EventType, DateTime<Utc>)>,
}

/// 개수 observer의 폴링 결과 하나
#[derive(Debug, Clone)]
pub(crate) struct CountSample {
    pub pods: Vec<ResourceSnapshot>,
    pub claims: Vec<ResourceSnapshot>,
    pub observed_at: DateTime<Utc>,
}

/// 세션이 flush한 양
#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct Flushed {
    pub events: usize,
    pub counts: usize,
    pub unresolved: usize,
}

pub(crate) struct Session<'a, S: EventStore> {
    kind: ObserverKind,
    observer: &'static str,
    tc_id: TestCaseId,
    store: &'a S,
    registry: &'a HandoffRegistry,
    /// 이름 → 저장된 엔티티
    entities: HashMap<String, Entity>,
    /// 이름 → 이미 발생한 이벤트 타입
    fired: HashMap<String, HashSet<EventType>>,
    /// 마지막 이벤트가 기록된 이름
    terminated: HashSet<String>,
    /// 어태치먼트 이름 → 보류 중인 이벤트
    parked: HashMap<String, ParkedAttachment>,
    events: Vec<Event>,
    counts: Vec<EntityCount>,
    last_timestamp: Option<DateTime<Utc>>,
    pub(crate) handled: u64,
    pub(crate) ignored: u64,
}

impl<'a, S: EventStore> Session<'a, S> {
    pub(crate) fn new(
        kind: ObserverKind,
        tc_id: TestCaseId,
        store: &'a S,
        registry: &'a HandoffRegistry,
    ) -> Self {
        Self {
            kind,
            observer: kind.name(),
            tc_id,
            store,
            registry,
            entities: HashMap::new(),
            fired: HashMap::new(),
            terminated: HashSet::new(),
            parked: HashMap::new(),
            events: Vec::new(),
            counts: Vec::new(),
            last_timestamp: None,
            handled: 0,
            ignored: 0,
        }
    }

    /// 버퍼에 남아 있는 이벤트와 샘플 수
    pub(crate) fn buffered(&self) -> usize {
        self.events.len() + self.counts.len()
    }

    /// 아직 claim을 찾지 못한 어태치먼트 수
    pub(crate) fn unresolved(&self) -> usize {
        self.parked.len()
    }

    /// 기록된 이벤트 (테스트 및 보고용)
    #[cfg(test)]
    pub(crate) fn events(&self) -> &[Event] {
        &self.events
    }

    /// watch 알림 하나를 처리합니다.
    pub(crate) async fn handle_notification(&mut self, notification: Notification) {
        self.handled += 1;

        let Some(snapshot) = notification.object else {
            self.ignore("empty_payload");
            warn!(observer = self.observer, change = %notification.change, "notification without payload, ignoring");
            return;
        };

        if let ChangeType::Other(other) = &notification.change {
            self.ignore("unknown_change");
            warn!(observer = self.observer, change = other.as_str(), resource = snapshot.name(), "unhandled change type, ignoring");
            return;
        }

        let Some(transition) = self.kind.transition(&notification.change, &snapshot) else {
            self.ignore("wrong_kind");
            warn!(
                observer = self.observer,
                expected = ?self.kind.resource(),
                got = %snapshot.kind(),
                "unexpected resource kind, ignoring"
            );
            return;
        };

        if self.terminated.contains(&transition.key) {
            self.ignore("terminated");
            debug!(observer = self.observer, resource = transition.key.as_str(), "resource already terminated, ignoring");
            return;
        }

        let mut candidates = transition.candidates.clone();
        let created_fired = self
            .fired
            .get(&transition.key)
            .is_some_and(|set| set.contains(&transition.created));
        if notification.change == ChangeType::Modified && !created_fired {
            // Added를 놓친 경우: 생성 이벤트를 먼저 기록
            candidates.insert(0, transition.created);
        }

        let observed_at = notification.observed_at;
        match &transition.target {
            Target::Own(entity_type) => {
                self.apply_own(&transition, *entity_type, &candidates, observed_at)
                    .await;
            }
            Target::Claim(volume) => {
                let volume = volume.clone();
                self.apply_attachment(&transition, volume, &candidates, observed_at);
            }
        }
    }

    /// 개수 샘플 하나를 기록합니다.
    pub(crate) fn handle_counts(&mut self, sample: CountSample) {
        self.handled += 1;
        let timestamp = self.stamp(sample.observed_at);
        let mut count = EntityCount::empty(self.tc_id, timestamp);

        for pod in &sample.pods {
            if let ResourceSnapshot::Pod(p) = pod {
                if p.deletion_timestamp.is_some() {
                    count.pods_terminating += 1;
                } else if p.ready {
                    count.pods_ready += 1;
                } else {
                    count.pods_creating += 1;
                }
            }
        }
        for claim in &sample.claims {
            if let ResourceSnapshot::Claim(c) = claim {
                if c.deletion_timestamp.is_some() {
                    count.pvc_terminating += 1;
                } else if c.is_bound() {
                    count.pvc_bound += 1;
                } else {
                    count.pvc_creating += 1;
                }
            }
        }

        debug!(observer = self.observer, ?count, "entity count sampled");
        self.counts.push(count);
    }

    /// 보류 중인 작업을 마무리하고 버퍼를 한 번에 저장합니다.
    pub(crate) async fn flush(&mut self) -> Result<Flushed, StoreError> {
        let keys: Vec<String> = self.parked.keys().cloned().collect();
        for key in keys {
            self.try_resolve(&key);
        }
        for (key, parked) in &self.parked {
            warn!(
                observer = self.observer,
                attachment = key.as_str(),
                volume = parked.volume.as_str(),
                dropped = parked.events.len(),
                "attachment never correlated with a claim"
            );
            metrics::counter!(m::OBSERVER_HANDOFF_UNRESOLVED_TOTAL).increment(1);
        }

        // 보류 후 해소된 이벤트가 뒤에 붙으므로 시각 순으로 정렬 (안정 정렬)
        self.events.sort_by_key(|e| e.timestamp);

        let started = Instant::now();
        if !self.events.is_empty() {
            self.store.save_events(&self.events).await?;
        }
        if !self.counts.is_empty() {
            self.store.save_entity_counts(&self.counts).await?;
        }
        metrics::histogram!(m::OBSERVER_FLUSH_DURATION_SECONDS)
            .record(started.elapsed().as_secs_f64());

        let flushed = Flushed {
            events: self.events.len(),
            counts: self.counts.len(),
            unresolved: self.parked.len(),
        };
        info!(
            observer = self.observer,
            tc_id = self.tc_id,
            events = flushed.events,
            counts = flushed.counts,
            "session buffer persisted"
        );
        self.events.clear();
        self.counts.clear();
        Ok(flushed)
    }

    async fn apply_own(
        &mut self,
        transition: &Transition,
        entity_type: EntityType,
        candidates: &[EventType],
        observed_at: DateTime<Utc>,
    ) {
        if candidates.is_empty() {
            return;
        }
        let Some(entity) = self
            .ensure_entity(&transition.key, &transition.uid, entity_type)
            .await
        else {
            self.ignore("entity_unavailable");
            return;
        };

        let timestamp = self.stamp(observed_at);
        for &event_type in candidates {
            if !self.mark_fired(&transition.key, event_type) {
                continue;
            }
            self.record(event_type, &entity, timestamp);

            if let Some((trigger, volume)) = &transition.publish {
                if *trigger == event_type {
                    self.registry.publish(volume.clone(), entity.clone());
                    debug!(observer = self.observer, entity = %entity, volume = volume.as_str(), "claim published for hand-off");
                }
            }
            if event_type == transition.terminal {
                self.terminated.insert(transition.key.clone());
            }
        }
    }

    fn apply_attachment(
        &mut self,
        transition: &Transition,
        volume: Option<String>,
        candidates: &[EventType],
        observed_at: DateTime<Utc>,
    ) {
        let Some(volume) = volume else {
            self.ignore("no_volume");
            warn!(observer = self.observer, attachment = transition.key.as_str(), "attachment has no persistent volume, ignoring");
            return;
        };

        // 이전에 보류된 이벤트부터 재시도
        self.try_resolve(&transition.key);

        let timestamp = self.stamp(observed_at);
        let fresh: Vec<EventType> = candidates
            .iter()
            .copied()
            .filter(|t| self.mark_fired(&transition.key, *t))
            .collect();
        if fresh.iter().any(|t| *t == transition.terminal) {
            self.terminated.insert(transition.key.clone());
        }
        if fresh.is_empty() {
            return;
        }

        match self.registry.lookup(&volume) {
            Some(claim) if !self.parked.contains_key(&transition.key) => {
                for event_type in fresh {
                    self.record(event_type, &claim, timestamp);
                }
            }
            _ => {
                metrics::counter!(m::OBSERVER_HANDOFF_MISSES_TOTAL).increment(1);
                debug!(observer = self.observer, attachment = transition.key.as_str(), volume = volume.as_str(), "claim not yet published, parking");
                let parked = self
                    .parked
                    .entry(transition.key.clone())
                    .or_insert_with(|| ParkedAttachment {
                        volume,
                        events: Vec::new(),
                    });
                parked
                    .events
                    .extend(fresh.into_iter().map(|t| (t, timestamp)));
            }
        }
    }

    /// 보류된 어태치먼트를 레지스트리에서 다시 찾아봅니다.
    fn try_resolve(&mut self, key: &str) {
        let Some(volume) = self.parked.get(key).map(|p| p.volume.clone()) else {
            return;
        };
        let Some(claim) = self.registry.lookup(&volume) else {
            return;
        };
        if let Some(parked) = self.parked.remove(key) {
            debug!(observer = self.observer, attachment = key, claim = %claim, "parked attachment resolved");
            for (event_type, timestamp) in parked.events {
                self.record(event_type, &claim, timestamp);
            }
        }
    }

    /// 캐시된 엔티티를 반환하거나 새로 저장합니다.
    async fn ensure_entity(
        &mut self,
        name: &str,
        uid: &str,
        entity_type: EntityType,
    ) -> Option<Entity> {
        if let Some(entity) = self.entities.get(name) {
            return Some(entity.clone());
        }
        let mut batch = [Entity::new(name, uid, entity_type, self.tc_id)];
        match self.store.save_entities(&mut batch).await {
            Ok(()) => {
                let [entity] = batch;
                debug!(observer = self.observer, entity = %entity, "entity registered");
                self.entities.insert(name.to_owned(), entity.clone());
                Some(entity)
            }
            Err(e) => {
                warn!(observer = self.observer, resource = name, error = %e, "failed to save entity");
                None
            }
        }
    }

    /// 처음 발생한 타입이면 `true`
    fn mark_fired(&mut self, key: &str, event_type: EventType) -> bool {
        self.fired
            .entry(key.to_owned())
            .or_default()
            .insert(event_type)
    }

    fn record(&mut self, event_type: EventType, entity: &Entity, timestamp: DateTime<Utc>) {
        let event = Event::new(event_type, self.tc_id, entity.id, timestamp);
        debug!(observer = self.observer, entity = %entity, event_type = event_type.as_str(), "event recorded");
        metrics::counter!(
            m::OBSERVER_EVENTS_RECORDED_TOTAL,
            m::LABEL_OBSERVER => self.observer,
            m::LABEL_EVENT_TYPE => event_type.as_str()
        )
        .increment(1);
        self.events.push(event);
    }

    /// 관찰 시각을 단조 증가하도록 보정합니다.
    fn stamp(&mut self, observed_at: DateTime<Utc>) -> DateTime<Utc> {
        let timestamp = match self.last_timestamp {
            Some(last) if observed_at < last => last,
            _ => observed_at,
        };
        self.last_timestamp = Some(timestamp);
        timestamp
    }

    fn ignore(&mut self, reason: &'static str) {
        self.ignored += 1;
        metrics::counter!(
            m::OBSERVER_NOTIFICATIONS_IGNORED_TOTAL,
            m::LABEL_OBSERVER => self.observer,
            m::LABEL_REASON => reason
        )
        .increment(1);
    }
}
