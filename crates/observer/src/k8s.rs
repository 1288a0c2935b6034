//! Kubernetes watch 소스
//!
//! `kube::Api::watch`로 리소스 변경을 구독하고 `k8s-openapi` 객체를
//! [`ResourceSnapshot`]으로 변환해 채널로 전달합니다.
//!
//! API 서버의 watch 타임아웃은 295초 미만이어야 하므로, 요청한 최대 유지 시간이
//! 끝날 때까지 마지막 resourceVersion부터 watch를 다시 엽니다. 연속 실패 시에는
//! 지수적으로 늘어나는 대기 후 다시 엽니다.

use std::fmt::Debug;
use std::time::Duration;

use futures::StreamExt;
use k8s_openapi::NamespaceResourceScope;
use k8s_openapi::api::core::v1::{PersistentVolumeClaim, Pod};
use k8s_openapi::api::storage::v1::VolumeAttachment;
use kube::api::{Api, ListParams, WatchEvent, WatchParams};
use kube::{Client, Resource, ResourceExt};
use serde::de::DeserializeOwned;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::ObserverError;
use crate::watch::{
    AttachmentSnapshot, ChangeType, ClaimSnapshot, Notification, PodSnapshot, ResourceKind,
    ResourceSnapshot, WatchHandle, WatchSource,
};

/// 서버 측 watch 한 번의 최대 길이 (초)
const MAX_WINDOW_SECS: u64 = 290;

/// 처음부터 보기 위한 resourceVersion
const FROM_START: &str = "0";

/// `410 Gone`: 저장된 resourceVersion이 만료됨
const GONE: u16 = 410;

/// k8s 객체 → 스냅샷 변환
trait IntoSnapshot {
    fn into_snapshot(self) -> ResourceSnapshot;
}

impl IntoSnapshot for PersistentVolumeClaim {
    fn into_snapshot(self) -> ResourceSnapshot {
        ResourceSnapshot::Claim(ClaimSnapshot {
            name: self.name_any(),
            uid: self.uid().unwrap_or_default(),
            phase: self.status.as_ref().and_then(|s| s.phase.clone()),
            volume_name: self.spec.as_ref().and_then(|s| s.volume_name.clone()),
            deletion_timestamp: self.metadata.deletion_timestamp.as_ref().map(|t| t.0),
        })
    }
}

impl IntoSnapshot for Pod {
    fn into_snapshot(self) -> ResourceSnapshot {
        let status = self.status.as_ref();
        let ready = status
            .and_then(|s| s.conditions.as_ref())
            .is_some_and(|conditions| {
                conditions
                    .iter()
                    .any(|c| c.type_ == "Ready" && c.status == "True")
            });
        ResourceSnapshot::Pod(PodSnapshot {
            name: self.name_any(),
            uid: self.uid().unwrap_or_default(),
            phase: status.and_then(|s| s.phase.clone()),
            ready,
            deletion_timestamp: self.metadata.deletion_timestamp.as_ref().map(|t| t.0),
        })
    }
}

impl IntoSnapshot for VolumeAttachment {
    fn into_snapshot(self) -> ResourceSnapshot {
        ResourceSnapshot::VolumeAttachment(AttachmentSnapshot {
            name: self.name_any(),
            uid: self.uid().unwrap_or_default(),
            persistent_volume_name: self.spec.source.persistent_volume_name.clone(),
            attached: self.status.as_ref().is_some_and(|s| s.attached),
            deletion_timestamp: self.metadata.deletion_timestamp.as_ref().map(|t| t.0),
        })
    }
}

/// watch 가능한 k8s 객체
trait Watched:
    Resource + Clone + DeserializeOwned + Debug + IntoSnapshot + Send + Sync + 'static
{
}

impl<K> Watched for K where
    K: Resource + Clone + DeserializeOwned + Debug + IntoSnapshot + Send + Sync + 'static
{
}

/// 남은 시간에 맞는 서버 측 watch 길이
fn window_secs(remaining: Duration) -> u32 {
    // MAX_WINDOW_SECS 이하로 제한되므로 u32 변환은 손실 없음
    remaining.as_secs().clamp(1, MAX_WINDOW_SECS) as u32
}

/// Kubernetes API 서버 기반 [`WatchSource`]
#[derive(Clone)]
pub struct KubeWatchSource {
    client: Client,
    namespace: Option<String>,
    buffer: usize,
}

impl KubeWatchSource {
    /// 클라이언트로 소스를 생성합니다. 빈 네임스페이스는 전체 네임스페이스를 뜻합니다.
    pub fn new(client: Client, namespace: impl Into<String>, buffer: usize) -> Self {
        let namespace = namespace.into();
        Self {
            client,
            namespace: (!namespace.is_empty()).then_some(namespace),
            buffer,
        }
    }

    /// kubeconfig 또는 in-cluster 설정으로 소스를 생성합니다.
    pub async fn try_default(
        namespace: impl Into<String>,
        buffer: usize,
    ) -> Result<Self, ObserverError> {
        let client = Client::try_default()
            .await
            .map_err(|e| ObserverError::Config {
                field: "kubernetes_client".to_owned(),
                reason: e.to_string(),
            })?;
        Ok(Self::new(client, namespace, buffer))
    }

    fn scoped<K>(&self) -> Api<K>
    where
        K: Resource<Scope = NamespaceResourceScope>,
        <K as Resource>::DynamicType: Default,
    {
        match &self.namespace {
            Some(ns) => Api::namespaced(self.client.clone(), ns),
            None => Api::all(self.client.clone()),
        }
    }

    async fn spawn_watch<K: Watched>(
        &self,
        api: Api<K>,
        kind: ResourceKind,
        timeout: Duration,
    ) -> Result<WatchHandle, ObserverError> {
        let (tx, rx) = mpsc::channel(self.buffer);
        let (opened_tx, opened_rx) = oneshot::channel();
        let stop = CancellationToken::new();
        let deadline = Instant::now() + timeout;

        tokio::spawn(pump(api, kind, deadline, tx, stop.clone(), opened_tx));

        match opened_rx.await {
            Ok(Ok(())) => {
                info!(resource = %kind, namespace = ?self.namespace, ?timeout, "watch opened");
                Ok(WatchHandle::new(rx, stop))
            }
            Ok(Err(e)) => Err(e),
            Err(_) => Err(ObserverError::WatchOpen {
                kind: kind.to_string(),
                reason: "watch task ended before opening".to_owned(),
            }),
        }
    }
}

impl WatchSource for KubeWatchSource {
    async fn watch(
        &self,
        kind: ResourceKind,
        timeout: Duration,
    ) -> Result<WatchHandle, ObserverError> {
        match kind {
            ResourceKind::PersistentVolumeClaim => {
                self.spawn_watch(self.scoped::<PersistentVolumeClaim>(), kind, timeout)
                    .await
            }
            ResourceKind::Pod => {
                self.spawn_watch(self.scoped::<Pod>(), kind, timeout)
                    .await
            }
            ResourceKind::VolumeAttachment => {
                let api = Api::<VolumeAttachment>::all(self.client.clone());
                self.spawn_watch(api, kind, timeout).await
            }
        }
    }

    async fn list(&self, kind: ResourceKind) -> Result<Vec<ResourceSnapshot>, ObserverError> {
        match kind {
            ResourceKind::PersistentVolumeClaim => {
                list_as(self.scoped::<PersistentVolumeClaim>(), kind).await
            }
            ResourceKind::Pod => list_as(self.scoped::<Pod>(), kind).await,
            ResourceKind::VolumeAttachment => {
                list_as(Api::<VolumeAttachment>::all(self.client.clone()), kind).await
            }
        }
    }
}

async fn list_as<K: Watched>(
    api: Api<K>,
    kind: ResourceKind,
) -> Result<Vec<ResourceSnapshot>, ObserverError> {
    let list = api
        .list(&ListParams::default())
        .await
        .map_err(|e| ObserverError::List {
            kind: kind.to_string(),
            reason: e.to_string(),
        })?;
    Ok(list
        .items
        .into_iter()
        .map(IntoSnapshot::into_snapshot)
        .collect())
}

/// 재연결 대기의 시작값
const BACKOFF_BASE: Duration = Duration::from_millis(250);

/// 재연결 대기의 상한
const BACKOFF_MAX: Duration = Duration::from_secs(30);

/// watch 재개 상태
///
/// 다음 창을 열 resourceVersion과 연속 실패 횟수를 추적합니다.
/// 객체 이벤트나 북마크를 받으면 실패 횟수가 초기화됩니다.
#[derive(Debug)]
struct Resume {
    version: String,
    failures: u32,
}

impl Resume {
    fn new() -> Self {
        Self {
            version: FROM_START.to_owned(),
            failures: 0,
        }
    }

    /// 스트림 항목 하나를 반영하고, 전달할 알림이 있으면 돌려줍니다.
    fn on_event<K: Watched>(&mut self, event: WatchEvent<K>) -> Option<Notification> {
        let (change, obj) = match event {
            WatchEvent::Added(obj) => (ChangeType::Added, obj),
            WatchEvent::Modified(obj) => (ChangeType::Modified, obj),
            WatchEvent::Deleted(obj) => (ChangeType::Deleted, obj),
            WatchEvent::Bookmark(bookmark) => {
                self.version = bookmark.metadata.resource_version;
                self.failures = 0;
                return None;
            }
            WatchEvent::Error(e) => {
                if e.code == GONE {
                    self.version = FROM_START.to_owned();
                }
                self.failures += 1;
                return Some(Notification::new(
                    ChangeType::Other(format!("ERROR {}", e.code)),
                    None,
                ));
            }
        };
        if let Some(rv) = obj.resource_version() {
            self.version = rv;
        }
        self.failures = 0;
        Some(Notification::new(change, Some(obj.into_snapshot())))
    }

    /// 스트림 전송 오류
    fn on_stream_error(&mut self) {
        self.failures += 1;
    }

    /// 다음 창을 열기 전 대기 시간. 남은 시간을 넘지 않습니다.
    fn backoff(&self, remaining: Duration) -> Duration {
        if self.failures == 0 {
            return Duration::ZERO;
        }
        let factor = 1u32 << (self.failures - 1).min(16);
        BACKOFF_BASE
            .saturating_mul(factor)
            .min(BACKOFF_MAX)
            .min(remaining)
    }
}

/// 다음 창의 서버 측 타임아웃. 마감이 지났으면 `None`.
fn next_window(deadline: Instant, now: Instant) -> Option<u32> {
    let remaining = deadline.saturating_duration_since(now);
    (!remaining.is_zero()).then(|| window_secs(remaining))
}

/// 마감 시각까지 watch를 이어 열며 알림을 전달합니다.
///
/// 첫 열기 결과만 `opened`로 보고합니다. 이후 실패는 채널을 닫아 만료로 보이게 합니다.
async fn pump<K: Watched>(
    api: Api<K>,
    kind: ResourceKind,
    deadline: Instant,
    tx: mpsc::Sender<Notification>,
    stop: CancellationToken,
    opened: oneshot::Sender<Result<(), ObserverError>>,
) {
    let mut opened = Some(opened);
    let mut resume = Resume::new();

    loop {
        let delay = resume.backoff(deadline.saturating_duration_since(Instant::now()));
        if !delay.is_zero() {
            debug!(resource = %kind, failures = resume.failures, ?delay, "backing off before re-open");
            tokio::select! {
                _ = stop.cancelled() => return,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        let Some(window) = next_window(deadline, Instant::now()) else {
            debug!(resource = %kind, "watch deadline reached");
            return;
        };

        let params = WatchParams::default().timeout(window);
        let stream = match api.watch(&params, &resume.version).await {
            Ok(stream) => {
                if let Some(opened) = opened.take() {
                    let _ = opened.send(Ok(()));
                }
                stream
            }
            Err(e) => {
                let err = ObserverError::WatchOpen {
                    kind: kind.to_string(),
                    reason: e.to_string(),
                };
                match opened.take() {
                    Some(opened) => {
                        let _ = opened.send(Err(err));
                    }
                    None => warn!(resource = %kind, error = %err, "failed to re-open watch"),
                }
                return;
            }
        };
        let mut stream = std::pin::pin!(stream);

        loop {
            let next = tokio::select! {
                _ = stop.cancelled() => return,
                _ = tokio::time::sleep_until(deadline) => return,
                next = stream.next() => next,
            };

            let notification = match next {
                // 서버 측 창이 끝남: 다시 연다
                None => break,
                Some(Err(e)) => {
                    warn!(resource = %kind, error = %e, "watch stream error, re-opening");
                    resume.on_stream_error();
                    break;
                }
                Some(Ok(event)) => match resume.on_event(event) {
                    Some(notification) => notification,
                    None => continue,
                },
            };

            if tx.send(notification).await.is_err() {
                debug!(resource = %kind, "watch receiver dropped");
                return;
            }
        }
    }
}
