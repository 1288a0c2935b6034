//! 러너 — 테스트 케이스 하나 동안 observer들을 함께 실행합니다.
//!
//! 러너는 hand-off 레지스트리, 스토어, watch 소스, 부모 취소 토큰,
//! 완료 장벽(`JoinSet`)을 소유합니다. 각 observer는 자기 태스크에서 실행되며
//! 세션 결과는 [`RunnerReport`]로 모입니다.
//!
//! # 사용 예시
//! ```ignore
//! let mut runner = RunnerBuilder::new()
//!     .source(Arc::new(source))
//!     .store(Arc::new(store))
//!     .config(config)
//!     .with_default_observers()
//!     .build()?;
//!
//! runner.start(&test_case)?;
//! // ... 워크로드 실행 ...
//! let report = runner.stop_and_wait().await;
//! ```

use std::sync::Arc;

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use certwatch_core::metrics as m;
use certwatch_core::store::EventStore;
use certwatch_core::types::{TestCase, TestCaseId};

use crate::config::ObserverConfig;
use crate::error::ObserverError;
use crate::kinds::ObserverKind;
use crate::observer::{Observer, SessionReport};
use crate::registry::HandoffRegistry;
use crate::watch::WatchSource;

/// observer 세션에 주입되는 공유 자원
pub struct RunnerHandle<W, S> {
    /// watch 소스
    pub source: Arc<W>,
    /// 이벤트 스토어
    pub store: Arc<S>,
    /// 테스트 케이스 단위 hand-off 레지스트리
    pub registry: HandoffRegistry,
    /// 현재 테스트 케이스
    pub tc_id: TestCaseId,
}

impl<W, S> Clone for RunnerHandle<W, S> {
    fn clone(&self) -> Self {
        Self {
            source: Arc::clone(&self.source),
            store: Arc::clone(&self.store),
            registry: self.registry.clone(),
            tc_id: self.tc_id,
        }
    }
}

/// 러너 실행 상태
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunnerState {
    /// 생성됨, 아직 시작하지 않음
    Initialized,
    /// 실행 중
    Running,
    /// 정지됨 (다시 start 가능)
    Stopped,
}

/// 테스트 케이스 하나의 관찰 결과
#[derive(Debug, Clone)]
pub struct RunnerReport {
    /// 테스트 케이스 ID
    pub tc_id: TestCaseId,
    /// observer별 세션 결과
    pub sessions: Vec<SessionReport>,
    /// 결과 없이 끝난 observer 태스크 수 (panic 또는 취소)
    pub failed_tasks: usize,
}

impl RunnerReport {
    /// 정지 요청 전에 끝난 세션이 있는지 확인합니다.
    pub fn ended_early(&self) -> bool {
        self.failed_tasks > 0 || self.sessions.iter().any(SessionReport::ended_early)
    }

    /// 모든 세션이 정상 종료했는지 확인합니다.
    pub fn is_clean(&self) -> bool {
        self.failed_tasks == 0
            && self
                .sessions
                .iter()
                .all(|s| s.end == crate::observer::SessionEnd::Shutdown)
    }

    /// 저장된 이벤트 총합
    pub fn events_persisted(&self) -> usize {
        self.sessions.iter().map(|s| s.events_persisted).sum()
    }

    /// 이름으로 세션 결과를 찾습니다.
    pub fn session(&self, observer: &str) -> Option<&SessionReport> {
        self.sessions.iter().find(|s| s.observer == observer)
    }
}

/// observer 러너
pub struct Runner<W: WatchSource, S: EventStore> {
    observers: Vec<Arc<Observer>>,
    source: Arc<W>,
    store: Arc<S>,
    registry: HandoffRegistry,
    current: Option<TestCase>,
    ctx: CancellationToken,
    tasks: JoinSet<SessionReport>,
    state: RunnerState,
}

impl<W: WatchSource, S: EventStore> Runner<W, S> {
    /// 현재 상태
    pub fn state(&self) -> RunnerState {
        self.state
    }

    /// 관리 중인 observer 이름 목록
    pub fn observer_names(&self) -> Vec<&'static str> {
        self.observers.iter().map(|o| o.name()).collect()
    }

    /// 현재 테스트 케이스
    pub fn current_test_case(&self) -> Option<&TestCase> {
        self.current.as_ref()
    }

    /// hand-off 레지스트리 핸들
    pub fn registry(&self) -> &HandoffRegistry {
        &self.registry
    }

    /// 테스트 케이스에 대해 모든 observer를 시작합니다.
    ///
    /// 테스트 케이스는 이미 스토어에 생성되어 있어야 합니다.
    pub fn start(&mut self, test_case: &TestCase) -> Result<(), ObserverError> {
        if self.state == RunnerState::Running {
            return Err(ObserverError::Lifecycle(
                "runner is already running".to_owned(),
            ));
        }

        self.registry.clear();
        self.ctx = CancellationToken::new();
        self.current = Some(test_case.clone());

        let handle = RunnerHandle {
            source: Arc::clone(&self.source),
            store: Arc::clone(&self.store),
            registry: self.registry.clone(),
            tc_id: test_case.id,
        };

        for observer in &self.observers {
            observer.reset();
            let observer = Arc::clone(observer);
            let handle = handle.clone();
            let ctx = self.ctx.clone();
            self.tasks
                .spawn(async move { observer.start_watching(ctx, handle).await });
        }

        metrics::gauge!(m::RUNNER_ACTIVE_SESSIONS).set(self.tasks.len() as f64);
        self.state = RunnerState::Running;
        info!(
            tc_id = test_case.id,
            test_case = test_case.name.as_str(),
            observers = self.observers.len(),
            "runner started"
        );
        Ok(())
    }

    /// 모든 observer에 정지를 요청합니다. 여러 번 호출해도 안전합니다.
    pub fn stop(&self) {
        for observer in &self.observers {
            observer.stop_watching();
        }
        self.ctx.cancel();
    }

    /// 모든 세션이 끝날 때까지 기다립니다.
    ///
    /// 정지 요청 없이 호출하면 모든 watch가 만료될 때까지 기다립니다.
    pub async fn wait(&mut self) -> RunnerReport {
        let mut sessions = Vec::with_capacity(self.observers.len());
        let mut failed_tasks = 0;
        while let Some(joined) = self.tasks.join_next().await {
            match joined {
                Ok(report) => {
                    if report.ended_early() {
                        warn!(observer = report.observer, end = ?report.end, "observer ended early");
                    }
                    sessions.push(report);
                }
                Err(e) => {
                    error!(error = %e, "observer task failed");
                    failed_tasks += 1;
                }
            }
            metrics::gauge!(m::RUNNER_ACTIVE_SESSIONS).set(self.tasks.len() as f64);
        }

        let tc_id = self.current.as_ref().map(|tc| tc.id).unwrap_or_default();
        if self.state == RunnerState::Running {
            self.state = RunnerState::Stopped;
        }
        info!(tc_id, sessions = sessions.len(), failed_tasks, "runner finished");
        RunnerReport {
            tc_id,
            sessions,
            failed_tasks,
        }
    }

    /// 정지를 요청하고 모든 세션이 끝날 때까지 기다립니다.
    pub async fn stop_and_wait(&mut self) -> RunnerReport {
        self.stop();
        self.wait().await
    }
}

/// 러너 빌더
pub struct RunnerBuilder<W: WatchSource, S: EventStore> {
    source: Option<Arc<W>>,
    store: Option<Arc<S>>,
    config: ObserverConfig,
    kinds: Vec<ObserverKind>,
    registry: Option<HandoffRegistry>,
}

impl<W: WatchSource, S: EventStore> Default for RunnerBuilder<W, S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<W: WatchSource, S: EventStore> RunnerBuilder<W, S> {
    /// 새 빌더를 생성합니다.
    pub fn new() -> Self {
        Self {
            source: None,
            store: None,
            config: ObserverConfig::default(),
            kinds: Vec::new(),
            registry: None,
        }
    }

    /// watch 소스를 설정합니다.
    pub fn source(mut self, source: Arc<W>) -> Self {
        self.source = Some(source);
        self
    }

    /// 이벤트 스토어를 설정합니다.
    pub fn store(mut self, store: Arc<S>) -> Self {
        self.store = Some(store);
        self
    }

    /// observer 설정을 지정합니다.
    pub fn config(mut self, config: ObserverConfig) -> Self {
        self.config = config;
        self
    }

    /// observer를 추가합니다. 같은 종류는 한 번만 등록됩니다.
    pub fn observer(mut self, kind: ObserverKind) -> Self {
        if !self.kinds.contains(&kind) {
            self.kinds.push(kind);
        }
        self
    }

    /// 네 종류의 observer를 모두 추가합니다.
    pub fn with_default_observers(mut self) -> Self {
        for kind in ObserverKind::ALL {
            self = self.observer(kind);
        }
        self
    }

    /// 외부 레지스트리를 사용합니다. 설정하지 않으면 새로 생성합니다.
    pub fn registry(mut self, registry: HandoffRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    /// 설정을 검증하고 러너를 생성합니다.
    pub fn build(self) -> Result<Runner<W, S>, ObserverError> {
        self.config.validate()?;

        let source = self.source.ok_or_else(|| ObserverError::Config {
            field: "source".to_owned(),
            reason: "watch source must be provided".to_owned(),
        })?;
        let store = self.store.ok_or_else(|| ObserverError::Config {
            field: "store".to_owned(),
            reason: "event store must be provided".to_owned(),
        })?;
        if self.kinds.is_empty() {
            return Err(ObserverError::Config {
                field: "observers".to_owned(),
                reason: "at least one observer is required".to_owned(),
            });
        }

        let observers = self
            .kinds
            .into_iter()
            .map(|kind| Arc::new(Observer::new(kind, self.config.clone())))
            .collect();

        Ok(Runner {
            observers,
            source,
            store,
            registry: self.registry.unwrap_or_default(),
            current: None,
            ctx: CancellationToken::new(),
            tasks: JoinSet::new(),
            state: RunnerState::Initialized,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::watch::{MockWatchSource, ResourceKind};
    use certwatch_store::MemoryStore;

    fn builder() -> RunnerBuilder<MockWatchSource, MemoryStore> {
        RunnerBuilder::new()
            .source(Arc::new(MockWatchSource::new()))
            .store(Arc::new(MemoryStore::new()))
    }

    fn test_case(id: TestCaseId) -> TestCase {
        let mut tc = TestCase::new(format!("tc-{id}"), "run-1");
        tc.id = id;
        tc
    }

    #[test]
    fn build_requires_source() {
        let result = RunnerBuilder::<MockWatchSource, MemoryStore>::new()
            .store(Arc::new(MemoryStore::new()))
            .with_default_observers()
            .build();
        assert!(matches!(result, Err(ObserverError::Config { ref field, .. }) if field == "source"));
    }

    #[test]
    fn build_requires_observers() {
        let result = builder().build();
        assert!(matches!(result, Err(ObserverError::Config { ref field, .. }) if field == "observers"));
    }

    #[test]
    fn default_observers_are_unique() {
        let runner = builder()
            .observer(ObserverKind::Pod)
            .with_default_observers()
            .build()
            .unwrap();
        assert_eq!(
            runner.observer_names(),
            vec![
                "PodObserver",
                "PersistentVolumeClaimObserver",
                "VolumeAttachmentObserver",
                "EntityNumberObserver",
            ]
        );
        assert_eq!(runner.state(), RunnerState::Initialized);
    }

    #[tokio::test]
    async fn double_start_is_rejected() {
        let mut runner = builder().observer(ObserverKind::Pod).build().unwrap();
        runner.start(&test_case(1)).unwrap();
        assert!(matches!(
            runner.start(&test_case(2)),
            Err(ObserverError::Lifecycle(_))
        ));
        let report = runner.stop_and_wait().await;
        assert_eq!(report.tc_id, 1);
        assert_eq!(report.sessions.len(), 1);
        assert!(report.is_clean());
    }

    #[tokio::test]
    async fn restart_after_stop_clears_registry() {
        let mut runner = builder()
            .observer(ObserverKind::Pod)
            .observer(ObserverKind::PersistentVolumeClaim)
            .build()
            .unwrap();

        runner.start(&test_case(1)).unwrap();
        runner.registry().publish(
            "pv-a",
            certwatch_core::types::Entity::new("pvc-a", "uid", certwatch_core::types::EntityType::Pvc, 1),
        );
        let first = runner.stop_and_wait().await;
        assert_eq!(runner.state(), RunnerState::Stopped);
        assert!(first.is_clean());

        runner.start(&test_case(2)).unwrap();
        assert!(runner.registry().is_empty());
        let second = runner.stop_and_wait().await;
        assert_eq!(second.tc_id, 2);
        assert_eq!(second.sessions.len(), 2);
        assert!(second.is_clean());
    }

    #[tokio::test]
    async fn failed_watch_is_reported_per_observer() {
        let mut runner = RunnerBuilder::new()
            .source(Arc::new(
                MockWatchSource::new().with_failing_watch(ResourceKind::VolumeAttachment),
            ))
            .store(Arc::new(MemoryStore::new()))
            .observer(ObserverKind::VolumeAttachment)
            .observer(ObserverKind::Pod)
            .build()
            .unwrap();

        runner.start(&test_case(1)).unwrap();
        let report = runner.stop_and_wait().await;

        assert!(report.ended_early());
        assert!(!report.is_clean());
        assert!(
            report
                .session("VolumeAttachmentObserver")
                .is_some_and(SessionReport::ended_early)
        );
        assert!(
            report
                .session("PodObserver")
                .is_some_and(|s| !s.ended_early())
        );
    }

    #[tokio::test]
    async fn lost_task_makes_report_unclean() {
        let mut runner = builder()
            .observer(ObserverKind::Pod)
            .observer(ObserverKind::PersistentVolumeClaim)
            .build()
            .unwrap();
        runner.start(&test_case(1)).unwrap();
        runner.tasks.abort_all();

        let report = runner.wait().await;
        assert_eq!(report.failed_tasks, 2);
        assert!(report.sessions.is_empty());
        assert!(report.ended_early());
        assert!(!report.is_clean());
    }
}
