//! watch 추상화 — 클러스터 리소스 변경 알림 스트림
//!
//! [`WatchSource`] trait은 오케스트레이터 API를 추상화합니다.
//! 운영 코드는 [`KubeWatchSource`](crate::k8s::KubeWatchSource)를, 테스트는
//! `MockWatchSource`를 사용합니다.
//!
//! # 알림 의미
//! - 최대 한 번 전달 (at-most-once): 누락될 수 있습니다.
//! - 같은 리소스의 알림 순서는 유지되지만 리소스 종류 간 순서는 보장되지 않습니다.
//! - watch가 만료되면 채널이 닫힙니다.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::ObserverError;

/// 관찰 대상 리소스 종류
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    /// PersistentVolumeClaim
    PersistentVolumeClaim,
    /// Pod
    Pod,
    /// VolumeAttachment
    VolumeAttachment,
}

impl ResourceKind {
    /// API 리소스 이름
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PersistentVolumeClaim => "PersistentVolumeClaim",
            Self::Pod => "Pod",
            Self::VolumeAttachment => "VolumeAttachment",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 알림의 변경 종류
///
/// `Other`는 북마크, 스트림 에러 등 observer가 해석하지 않는 알림입니다.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeType {
    /// 리소스 생성
    Added,
    /// 리소스 변경
    Modified,
    /// 리소스 삭제 완료
    Deleted,
    /// 그 외 알림
    Other(String),
}

impl fmt::Display for ChangeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Added => f.write_str("ADDED"),
            Self::Modified => f.write_str("MODIFIED"),
            Self::Deleted => f.write_str("DELETED"),
            Self::Other(kind) => write!(f, "OTHER({kind})"),
        }
    }
}

/// PVC 스냅샷
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ClaimSnapshot {
    /// 리소스 이름
    pub name: String,
    /// UID
    pub uid: String,
    /// `status.phase` (Pending, Bound, Lost)
    pub phase: Option<String>,
    /// 바인딩된 PersistentVolume 이름 (`spec.volumeName`)
    pub volume_name: Option<String>,
    /// 삭제 요청 시각
    pub deletion_timestamp: Option<DateTime<Utc>>,
}

impl ClaimSnapshot {
    /// `Bound` 상태인지 확인합니다.
    pub fn is_bound(&self) -> bool {
        self.phase.as_deref() == Some("Bound")
    }
}

/// Pod 스냅샷
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PodSnapshot {
    /// 리소스 이름
    pub name: String,
    /// UID
    pub uid: String,
    /// `status.phase`
    pub phase: Option<String>,
    /// `Ready=True` 조건 여부
    pub ready: bool,
    /// 삭제 요청 시각
    pub deletion_timestamp: Option<DateTime<Utc>>,
}

/// VolumeAttachment 스냅샷
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AttachmentSnapshot {
    /// 리소스 이름
    pub name: String,
    /// UID
    pub uid: String,
    /// 대상 PersistentVolume 이름 (`spec.source.persistentVolumeName`)
    pub persistent_volume_name: Option<String>,
    /// `status.attached`
    pub attached: bool,
    /// 삭제 요청 시각
    pub deletion_timestamp: Option<DateTime<Utc>>,
}

/// 알림에 실린 리소스 스냅샷
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourceSnapshot {
    /// PVC
    Claim(ClaimSnapshot),
    /// Pod
    Pod(PodSnapshot),
    /// VolumeAttachment
    VolumeAttachment(AttachmentSnapshot),
}

impl ResourceSnapshot {
    /// 스냅샷의 리소스 종류
    pub fn kind(&self) -> ResourceKind {
        match self {
            Self::Claim(_) => ResourceKind::PersistentVolumeClaim,
            Self::Pod(_) => ResourceKind::Pod,
            Self::VolumeAttachment(_) => ResourceKind::VolumeAttachment,
        }
    }

    /// 리소스 이름
    pub fn name(&self) -> &str {
        match self {
            Self::Claim(c) => &c.name,
            Self::Pod(p) => &p.name,
            Self::VolumeAttachment(a) => &a.name,
        }
    }
}

/// watch 알림 하나
#[derive(Debug, Clone)]
pub struct Notification {
    /// 변경 종류
    pub change: ChangeType,
    /// 리소스 스냅샷 (비어 있을 수 있음)
    pub object: Option<ResourceSnapshot>,
    /// 수신 시각
    pub observed_at: DateTime<Utc>,
}

impl Notification {
    /// 지금 수신한 알림을 생성합니다.
    pub fn new(change: ChangeType, object: Option<ResourceSnapshot>) -> Self {
        Self {
            change,
            object,
            observed_at: Utc::now(),
        }
    }

    /// 수신 시각을 지정합니다.
    pub fn at(mut self, observed_at: DateTime<Utc>) -> Self {
        self.observed_at = observed_at;
        self
    }
}

/// 열린 watch 하나
///
/// 채널이 닫히면 watch가 끝난 것입니다. 핸들이 drop되면 생산자 태스크도 멈춥니다.
pub struct WatchHandle {
    rx: mpsc::Receiver<Notification>,
    stop: CancellationToken,
}

impl WatchHandle {
    /// 수신 채널과 정지 토큰으로 핸들을 생성합니다.
    pub fn new(rx: mpsc::Receiver<Notification>, stop: CancellationToken) -> Self {
        Self { rx, stop }
    }

    /// 다음 알림을 기다립니다. watch가 끝나면 `None`.
    ///
    /// cancel-safe 하므로 `select!` 분기로 사용할 수 있습니다.
    pub async fn recv(&mut self) -> Option<Notification> {
        self.rx.recv().await
    }

    /// 생산자에게 정지를 요청합니다.
    pub fn stop(&self) {
        self.stop.cancel();
    }
}

impl Drop for WatchHandle {
    fn drop(&mut self) {
        self.stop.cancel();
    }
}

/// 리소스 변경 알림 공급원
///
/// 여러 observer 태스크가 공유하므로 `Send + Sync + 'static`이어야 합니다.
pub trait WatchSource: Send + Sync + 'static {
    /// 리소스 종류에 대한 watch를 엽니다.
    ///
    /// `timeout`이 지나면 채널이 닫힙니다. 열기 실패는 즉시 에러로 반환합니다.
    fn watch(
        &self,
        kind: ResourceKind,
        timeout: Duration,
    ) -> impl Future<Output = Result<WatchHandle, ObserverError>> + Send;

    /// 리소스 종류의 현재 목록을 조회합니다.
    fn list(
        &self,
        kind: ResourceKind,
    ) -> impl Future<Output = Result<Vec<ResourceSnapshot>, ObserverError>> + Send;
}

/// 테스트용 Mock watch 소스
///
/// `feed()`로 얻은 송신자로 알림을 직접 밀어 넣습니다.
/// 송신자를 drop하면 watch 만료와 같습니다.
#[cfg(test)]
#[derive(Default)]
pub struct MockWatchSource {
    feeds: std::sync::Mutex<
        std::collections::HashMap<ResourceKind, mpsc::Receiver<Notification>>,
    >,
    idle: std::sync::Mutex<Vec<mpsc::Sender<Notification>>>,
    failing: Vec<ResourceKind>,
    listed: Vec<ResourceSnapshot>,
}

#[cfg(test)]
impl MockWatchSource {
    /// 빈 mock 소스를 생성합니다.
    pub fn new() -> Self {
        Self::default()
    }

    /// 해당 종류의 watch 열기가 실패하도록 설정합니다.
    pub fn with_failing_watch(mut self, kind: ResourceKind) -> Self {
        self.failing.push(kind);
        self
    }

    /// `list()`가 반환할 스냅샷을 설정합니다.
    pub fn with_listed(mut self, snapshots: Vec<ResourceSnapshot>) -> Self {
        self.listed = snapshots;
        self
    }

    /// 해당 종류의 알림 송신자를 생성합니다.
    pub fn feed(&self, kind: ResourceKind) -> mpsc::Sender<Notification> {
        let (tx, rx) = mpsc::channel(64);
        self.feeds
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(kind, rx);
        tx
    }
}

#[cfg(test)]
impl WatchSource for MockWatchSource {
    async fn watch(
        &self,
        kind: ResourceKind,
        _timeout: Duration,
    ) -> Result<WatchHandle, ObserverError> {
        if self.failing.contains(&kind) {
            return Err(ObserverError::WatchOpen {
                kind: kind.to_string(),
                reason: "mock failure".to_owned(),
            });
        }
        let scripted = self
            .feeds
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&kind);
        let rx = match scripted {
            Some(rx) => rx,
            None => {
                // 스크립트가 없으면 열린 채로 아무것도 보내지 않음
                let (tx, rx) = mpsc::channel(1);
                self.idle.lock().unwrap_or_else(|e| e.into_inner()).push(tx);
                rx
            }
        };
        Ok(WatchHandle::new(rx, CancellationToken::new()))
    }

    async fn list(&self, kind: ResourceKind) -> Result<Vec<ResourceSnapshot>, ObserverError> {
        Ok(self
            .listed
            .iter()
            .filter(|s| s.kind() == kind)
            .cloned()
            .collect())
    }
}
