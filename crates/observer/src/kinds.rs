//! observer 종류와 종류별 전이 표
//!
//! 실행 루프는 [`observer`](crate::observer)에 한 번만 구현되어 있고,
//! 종류마다 다른 것은 알림을 이벤트 후보로 바꾸는 이 표뿐입니다.
//!
//! | 종류 | Added | Modified | Deleted |
//! |---|---|---|---|
//! | PVC | `PvcAdded` | Bound → `PvcBound`, 삭제 요청 → `PvcDeletingStarted` | `PvcDeletingEnded` |
//! | Pod | `PodAdded` | Ready → `PodReady`, 삭제 요청 → `PodTerminating` | `PodDeleted` |
//! | VolumeAttachment | `PvcAttachStarted` | attached → `PvcAttachEnded`, 삭제 요청 → `PvcUnattachStarted` | `PvcUnattachEnded` |

use std::fmt;

use certwatch_core::event::EventType;
use certwatch_core::types::EntityType;

use crate::watch::{ChangeType, ResourceKind, ResourceSnapshot};

/// observer 종류 (닫힌 집합)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObserverKind {
    /// PVC 생명주기
    PersistentVolumeClaim,
    /// Pod 생명주기
    Pod,
    /// 볼륨 어태치/디태치 (이벤트는 claim 엔티티에 기록)
    VolumeAttachment,
    /// 상태별 엔티티 개수 샘플링
    EntityCount,
}

impl ObserverKind {
    /// 기본 observer 구성
    pub const ALL: [ObserverKind; 4] = [
        Self::PersistentVolumeClaim,
        Self::Pod,
        Self::VolumeAttachment,
        Self::EntityCount,
    ];

    /// 고정된 observer 이름
    pub fn name(&self) -> &'static str {
        match self {
            Self::PersistentVolumeClaim => "PersistentVolumeClaimObserver",
            Self::Pod => "PodObserver",
            Self::VolumeAttachment => "VolumeAttachmentObserver",
            Self::EntityCount => "EntityNumberObserver",
        }
    }

    /// watch 대상 리소스. 개수 observer는 watch 대신 목록 폴링을 사용합니다.
    pub fn resource(&self) -> Option<ResourceKind> {
        match self {
            Self::PersistentVolumeClaim => Some(ResourceKind::PersistentVolumeClaim),
            Self::Pod => Some(ResourceKind::Pod),
            Self::VolumeAttachment => Some(ResourceKind::VolumeAttachment),
            Self::EntityCount => None,
        }
    }

    /// 알림을 전이 후보로 변환합니다.
    ///
    /// 스냅샷 종류가 맞지 않거나 변경 종류를 해석할 수 없으면 `None`.
    pub(crate) fn transition(
        &self,
        change: &ChangeType,
        snapshot: &ResourceSnapshot,
    ) -> Option<Transition> {
        let table = match (self, snapshot) {
            (Self::PersistentVolumeClaim, ResourceSnapshot::Claim(c)) => Transition {
                key: c.name.clone(),
                uid: c.uid.clone(),
                target: Target::Own(EntityType::Pvc),
                created: EventType::PvcAdded,
                terminal: EventType::PvcDeletingEnded,
                // 순서대로 평가: 한 알림이 Bound와 삭제 시작을 모두 만족할 수 있음
                predicates: vec![
                    (c.is_bound(), EventType::PvcBound),
                    (c.deletion_timestamp.is_some(), EventType::PvcDeletingStarted),
                ],
                publish: c
                    .volume_name
                    .clone()
                    .map(|volume| (EventType::PvcBound, volume)),
                candidates: Vec::new(),
            },
            (Self::Pod, ResourceSnapshot::Pod(p)) => Transition {
                key: p.name.clone(),
                uid: p.uid.clone(),
                target: Target::Own(EntityType::Pod),
                created: EventType::PodAdded,
                terminal: EventType::PodDeleted,
                predicates: vec![
                    (p.ready, EventType::PodReady),
                    (p.deletion_timestamp.is_some(), EventType::PodTerminating),
                ],
                publish: None,
                candidates: Vec::new(),
            },
            (Self::VolumeAttachment, ResourceSnapshot::VolumeAttachment(a)) => Transition {
                key: a.name.clone(),
                uid: a.uid.clone(),
                target: Target::Claim(a.persistent_volume_name.clone()),
                created: EventType::PvcAttachStarted,
                terminal: EventType::PvcUnattachEnded,
                predicates: vec![
                    (a.attached, EventType::PvcAttachEnded),
                    (a.deletion_timestamp.is_some(), EventType::PvcUnattachStarted),
                ],
                publish: None,
                candidates: Vec::new(),
            },
            _ => return None,
        };
        table.resolve(change)
    }
}

impl fmt::Display for ObserverKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// 이벤트를 기록할 엔티티
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Target {
    /// 리소스 자신의 엔티티
    Own(EntityType),
    /// PersistentVolume 이름으로 hand-off 레지스트리에서 찾은 claim
    Claim(Option<String>),
}

/// 알림 하나에서 도출된 전이 후보
#[derive(Debug, Clone)]
pub(crate) struct Transition {
    /// 가드 키 (리소스 이름)
    pub key: String,
    /// 리소스 UID
    pub uid: String,
    /// 기록 대상
    pub target: Target,
    /// 생성 이벤트 타입
    pub created: EventType,
    /// 마지막 이벤트 타입
    pub terminal: EventType,
    /// Modified 알림에서 평가할 (조건, 이벤트) 목록
    predicates: Vec<(bool, EventType)>,
    /// 이 이벤트가 기록되면 엔티티를 해당 키로 게시
    pub publish: Option<(EventType, String)>,
    /// 변경 종류를 반영한 이벤트 후보 (순서 유지)
    pub candidates: Vec<EventType>,
}

impl Transition {
    fn resolve(mut self, change: &ChangeType) -> Option<Self> {
        self.candidates = match change {
            ChangeType::Added => vec![self.created],
            ChangeType::Modified => self
                .predicates
                .iter()
                .filter(|(hit, _)| *hit)
                .map(|(_, t)| *t)
                .collect(),
            ChangeType::Deleted => vec![self.terminal],
            ChangeType::Other(_) => return None,
        };
        Some(self)
    }
}
