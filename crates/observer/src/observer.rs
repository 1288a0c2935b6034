//! Observer — 리소스 종류 하나를 관찰하는 실행 루프
//!
//! 모든 종류가 같은 루프를 공유합니다. 종류별 차이는 [`kinds`](crate::kinds)의
//! 전이 표와 피드 종류(watch 또는 목록 폴링)뿐입니다.
//!
//! # 종료 경로
//! - 정지 토큰 또는 부모 토큰 취소: 버퍼를 한 번에 저장하고 반환
//! - 피드 종료 (watch 만료): 저장 없이 반환, 버퍼는 유실
//! - watch 열기 실패: 루프에 들어가지 않고 반환

use std::pin::Pin;
use std::sync::Mutex;

use chrono::Utc;
use tokio::time::{Instant, Interval, MissedTickBehavior, Sleep};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use certwatch_core::metrics as m;
use certwatch_core::store::EventStore;

use crate::config::ObserverConfig;
use crate::error::ObserverError;
use crate::kinds::ObserverKind;
use crate::runner::RunnerHandle;
use crate::session::{CountSample, Session};
use crate::watch::{Notification, ResourceKind, WatchHandle, WatchSource};

/// 세션 종료 사유
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEnd {
    /// 정지 요청으로 정상 종료 (버퍼 저장 완료)
    Shutdown,
    /// 정지 요청 전에 피드가 닫힘. 버퍼에 있던 `dropped`개는 저장되지 않음
    WatchExpired {
        /// 유실된 이벤트와 샘플 수
        dropped: usize,
    },
    /// watch를 열지 못함
    WatchFailed {
        /// 실패 사유
        reason: String,
    },
    /// 종료 시 저장 실패
    FlushFailed {
        /// 실패 사유
        reason: String,
    },
}

/// 세션 하나의 결과
#[derive(Debug, Clone)]
pub struct SessionReport {
    /// observer 이름
    pub observer: &'static str,
    /// 종료 사유
    pub end: SessionEnd,
    /// 저장된 이벤트 수
    pub events_persisted: usize,
    /// 저장된 개수 샘플 수
    pub counts_persisted: usize,
    /// 처리한 알림 또는 샘플 수
    pub handled: u64,
    /// 무시한 알림 수
    pub ignored: u64,
    /// claim과 연결하지 못한 어태치먼트 수
    pub unresolved_attachments: usize,
}

impl SessionReport {
    /// 정지 요청 전에 끝난 세션인지 확인합니다.
    pub fn ended_early(&self) -> bool {
        matches!(
            self.end,
            SessionEnd::WatchExpired { .. } | SessionEnd::WatchFailed { .. }
        )
    }

    fn failed_to_open(observer: &'static str, reason: String) -> Self {
        Self {
            observer,
            end: SessionEnd::WatchFailed { reason },
            events_persisted: 0,
            counts_persisted: 0,
            handled: 0,
            ignored: 0,
            unresolved_attachments: 0,
        }
    }
}

/// 피드에서 꺼낸 항목
enum Item {
    Notification(Notification),
    Sample(CountSample),
}

/// 목록 폴링 피드 (개수 observer)
struct CountPoller<'a, W> {
    source: &'a W,
    interval: Interval,
    deadline: Pin<Box<Sleep>>,
}

impl<W: WatchSource> CountPoller<'_, W> {
    async fn next(&mut self) -> Option<CountSample> {
        loop {
            tokio::select! {
                _ = &mut self.deadline => return None,
                _ = self.interval.tick() => {
                    if let Some(sample) = self.sample().await {
                        return Some(sample);
                    }
                }
            }
        }
    }

    async fn sample(&self) -> Option<CountSample> {
        let pods = self.source.list(ResourceKind::Pod).await;
        let claims = self.source.list(ResourceKind::PersistentVolumeClaim).await;
        match (pods, claims) {
            (Ok(pods), Ok(claims)) => Some(CountSample {
                pods,
                claims,
                observed_at: Utc::now(),
            }),
            (Err(e), _) | (_, Err(e)) => {
                warn!(error = %e, "entity count listing failed, skipping tick");
                None
            }
        }
    }
}

/// observer 입력
enum Feed<'a, W> {
    Watch(WatchHandle),
    Poll(CountPoller<'a, W>),
}

impl<W: WatchSource> Feed<'_, W> {
    /// 다음 항목. 피드가 끝나면 `None`.
    async fn next(&mut self) -> Option<Item> {
        match self {
            Self::Watch(handle) => handle.recv().await.map(Item::Notification),
            Self::Poll(poller) => poller.next().await.map(Item::Sample),
        }
    }
}

/// 루프 탈출 사유
enum Exit {
    Stop,
    Closed,
}

/// 리소스 종류 하나의 observer
///
/// 러너가 `Arc`로 공유하며 테스트 케이스마다 [`reset`](Self::reset) 후 재사용합니다.
pub struct Observer {
    kind: ObserverKind,
    config: ObserverConfig,
    stop: Mutex<CancellationToken>,
}

impl Observer {
    /// 새 observer를 생성합니다.
    pub fn new(kind: ObserverKind, config: ObserverConfig) -> Self {
        Self {
            kind,
            config,
            stop: Mutex::new(CancellationToken::new()),
        }
    }

    /// observer 종류
    pub fn kind(&self) -> ObserverKind {
        self.kind
    }

    /// 고정된 observer 이름
    pub fn name(&self) -> &'static str {
        self.kind.name()
    }

    /// 새 정지 토큰을 설치합니다. 재사용 전에 호출해야 합니다.
    pub fn reset(&self) {
        let mut stop = self.stop.lock().unwrap_or_else(|e| e.into_inner());
        *stop = CancellationToken::new();
    }

    /// 정지를 요청합니다. 여러 번 호출해도 안전합니다.
    pub fn stop_watching(&self) {
        self.stop_token().cancel();
    }

    fn stop_token(&self) -> CancellationToken {
        self.stop.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// 정지 요청 또는 피드 종료까지 관찰합니다.
    ///
    /// 에러는 반환하지 않고 [`SessionReport::end`]로 보고합니다.
    pub async fn start_watching<W, S>(
        &self,
        ctx: CancellationToken,
        handle: RunnerHandle<W, S>,
    ) -> SessionReport
    where
        W: WatchSource,
        S: EventStore,
    {
        let observer = self.name();
        let stop = self.stop_token();

        let mut feed = match self.open_feed(handle.source.as_ref()).await {
            Ok(feed) => feed,
            Err(e) => {
                error!(observer, tc_id = handle.tc_id, error = %e, "failed to open watch");
                return SessionReport::failed_to_open(observer, e.to_string());
            }
        };

        let mut session = Session::new(
            self.kind,
            handle.tc_id,
            handle.store.as_ref(),
            &handle.registry,
        );
        info!(observer, tc_id = handle.tc_id, "observer started");

        let exit = loop {
            tokio::select! {
                biased;
                _ = stop.cancelled() => break Exit::Stop,
                _ = ctx.cancelled() => break Exit::Stop,
                item = feed.next() => match item {
                    Some(Item::Notification(n)) => session.handle_notification(n).await,
                    Some(Item::Sample(s)) => session.handle_counts(s),
                    None => break Exit::Closed,
                },
            }
        };
        drop(feed);

        let mut report = SessionReport {
            observer,
            end: SessionEnd::Shutdown,
            events_persisted: 0,
            counts_persisted: 0,
            handled: session.handled,
            ignored: session.ignored,
            unresolved_attachments: session.unresolved(),
        };

        match exit {
            Exit::Closed => {
                let dropped = session.buffered();
                warn!(observer, tc_id = handle.tc_id, dropped, "watch ended before shutdown, buffered events dropped");
                metrics::counter!(m::OBSERVER_SESSIONS_EXPIRED_TOTAL, m::LABEL_OBSERVER => observer)
                    .increment(1);
                report.end = SessionEnd::WatchExpired { dropped };
            }
            Exit::Stop => match session.flush().await {
                Ok(flushed) => {
                    report.events_persisted = flushed.events;
                    report.counts_persisted = flushed.counts;
                    report.unresolved_attachments = flushed.unresolved;
                }
                Err(e) => {
                    error!(observer, tc_id = handle.tc_id, error = %e, "failed to persist session buffer");
                    metrics::counter!(m::OBSERVER_FLUSH_FAILURES_TOTAL, m::LABEL_OBSERVER => observer)
                        .increment(1);
                    report.end = SessionEnd::FlushFailed {
                        reason: e.to_string(),
                    };
                }
            },
        }

        info!(observer, tc_id = handle.tc_id, end = ?report.end, "observer stopped");
        report
    }

    async fn open_feed<'a, W: WatchSource>(
        &self,
        source: &'a W,
    ) -> Result<Feed<'a, W>, ObserverError> {
        let timeout = self.config.watch_timeout();
        match self.kind.resource() {
            Some(kind) => {
                debug!(observer = self.name(), resource = %kind, ?timeout, "opening watch");
                let handle = source.watch(kind, timeout).await?;
                Ok(Feed::Watch(handle))
            }
            None => {
                let period = self.config.count_poll_interval();
                let mut interval = tokio::time::interval(period);
                interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
                debug!(observer = self.name(), ?period, ?timeout, "starting count poller");
                Ok(Feed::Poll(CountPoller {
                    source,
                    interval,
                    deadline: Box::pin(tokio::time::sleep_until(Instant::now() + timeout)),
                }))
            }
        }
    }
}

impl std::fmt::Debug for Observer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Observer")
            .field("kind", &self.kind)
            .field("stopped", &self.stop_token().is_cancelled())
            .finish()
    }
}
