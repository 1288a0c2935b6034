//! 이벤트 — 엔티티 생명주기 전이의 불변 기록
//!
//! [`Event`]는 "엔티티 E가 시각 t에 전이 T를 겪었다"는 사실을 나타냅니다.
//! observer가 메모리에 누적한 뒤 세션 종료 시 한 번에 저장하며,
//! 저장 이후에는 수정/삭제되지 않습니다.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{EntityId, EntityType, TestCaseId};

/// 생명주기 전이 종류
///
/// 볼륨 어태치먼트 관련 이벤트도 PVC 엔티티에 기록되므로 `Pvc*` 접두어를 사용합니다.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EventType {
    /// PVC 생성 관찰
    PvcAdded,
    /// PVC 바인딩 완료
    PvcBound,
    /// 볼륨 어태치 시작
    PvcAttachStarted,
    /// 볼륨 어태치 완료
    PvcAttachEnded,
    /// 볼륨 디태치 시작
    PvcUnattachStarted,
    /// 볼륨 디태치 완료
    PvcUnattachEnded,
    /// PVC 삭제 요청됨 (deletionTimestamp 설정)
    PvcDeletingStarted,
    /// PVC 삭제 완료
    PvcDeletingEnded,
    /// Pod 생성 관찰
    PodAdded,
    /// Pod Ready
    PodReady,
    /// Pod 종료 시작
    PodTerminating,
    /// Pod 삭제 완료
    PodDeleted,
}

impl EventType {
    /// 모든 이벤트 타입 (집계 시 0 카운트 채우기에 사용)
    pub const ALL: [EventType; 12] = [
        Self::PvcAdded,
        Self::PvcBound,
        Self::PvcAttachStarted,
        Self::PvcAttachEnded,
        Self::PvcUnattachStarted,
        Self::PvcUnattachEnded,
        Self::PvcDeletingStarted,
        Self::PvcDeletingEnded,
        Self::PodAdded,
        Self::PodReady,
        Self::PodTerminating,
        Self::PodDeleted,
    ];

    /// 스토어에 저장되는 문자열 표현
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PvcAdded => "PVC_ADDED",
            Self::PvcBound => "PVC_BOUND",
            Self::PvcAttachStarted => "PVC_ATTACH_STARTED",
            Self::PvcAttachEnded => "PVC_ATTACH_ENDED",
            Self::PvcUnattachStarted => "PVC_UNATTACH_STARTED",
            Self::PvcUnattachEnded => "PVC_UNATTACH_ENDED",
            Self::PvcDeletingStarted => "PVC_DELETING_STARTED",
            Self::PvcDeletingEnded => "PVC_DELETING_ENDED",
            Self::PodAdded => "POD_ADDED",
            Self::PodReady => "POD_READY",
            Self::PodTerminating => "POD_TERMINATING",
            Self::PodDeleted => "POD_DELETED",
        }
    }

    /// 이 이벤트가 기록되는 엔티티 종류
    pub fn entity_type(&self) -> EntityType {
        match self {
            Self::PodAdded | Self::PodReady | Self::PodTerminating | Self::PodDeleted => {
                EntityType::Pod
            }
            _ => EntityType::Pvc,
        }
    }

    /// 해당 엔티티의 마지막 이벤트인지 여부
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::PvcDeletingEnded | Self::PodDeleted)
    }

    /// 이벤트 이름에 쓰이는 짧은 태그 (예: `pvc-added`)
    fn slug(&self) -> String {
        self.as_str().to_ascii_lowercase().replace('_', "-")
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 알 수 없는 이벤트 타입 문자열
#[derive(Debug, thiserror::Error)]
#[error("unknown event type: {0}")]
pub struct UnknownEventType(pub String);

impl FromStr for EventType {
    type Err = UnknownEventType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| UnknownEventType(s.to_owned()))
    }
}

/// 엔티티 생명주기 이벤트
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    /// 스토어가 부여한 ID (저장 전에는 None)
    pub id: Option<i64>,
    /// 디버깅용 고유 이름 (`event-pvc-bound-1a2b3c4d`)
    pub name: String,
    /// 소속 테스트 케이스
    pub tc_id: TestCaseId,
    /// 참조 엔티티
    pub entity_id: EntityId,
    /// 전이 종류
    pub event_type: EventType,
    /// 관찰 시각
    pub timestamp: DateTime<Utc>,
}

impl Event {
    /// 무작위 접미어가 붙은 이름으로 새 이벤트를 생성합니다.
    pub fn new(
        event_type: EventType,
        tc_id: TestCaseId,
        entity_id: EntityId,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            id: None,
            name: format!("event-{}-{}", event_type.slug(), random_suffix()),
            tc_id,
            entity_id,
            event_type,
            timestamp,
        }
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} entity={} type={} at={}",
            self.name,
            self.entity_id,
            self.event_type,
            self.timestamp.to_rfc3339(),
        )
    }
}

/// 이벤트 이름용 8자리 무작위 접미어
pub fn random_suffix() -> String {
    let id = uuid::Uuid::new_v4().simple().to_string();
    id[..8].to_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_type_parse_round_trip() {
        for t in EventType::ALL {
            assert_eq!(t.as_str().parse::<EventType>().unwrap(), t);
        }
    }

    #[test]
    fn unknown_event_type_is_rejected() {
        let err = "PVC_EXPLODED".parse::<EventType>().unwrap_err();
        assert!(err.to_string().contains("PVC_EXPLODED"));
    }

    #[test]
    fn event_names_are_unique_and_tagged() {
        let now = Utc::now();
        let a = Event::new(EventType::PvcBound, 1, 1, now);
        let b = Event::new(EventType::PvcBound, 1, 1, now);
        assert!(a.name.starts_with("event-pvc-bound-"));
        assert_ne!(a.name, b.name);
        assert!(a.id.is_none());
    }

    #[test]
    fn attachment_events_belong_to_claims() {
        assert_eq!(EventType::PvcAttachEnded.entity_type(), EntityType::Pvc);
        assert_eq!(EventType::PodReady.entity_type(), EntityType::Pod);
    }

    #[test]
    fn terminal_event_types() {
        assert!(EventType::PvcDeletingEnded.is_terminal());
        assert!(EventType::PodDeleted.is_terminal());
        assert!(!EventType::PvcDeletingStarted.is_terminal());
        assert!(!EventType::PvcUnattachEnded.is_terminal());
    }
}
