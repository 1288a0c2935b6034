//! 도메인 타입 — 관찰 대상 엔티티와 테스트 케이스
//!
//! 모든 observer와 스토어가 공유하는 어휘를 정의합니다.
//! 이벤트 타입은 [`event`](crate::event) 모듈에 있습니다.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 스토어가 부여하는 엔티티 ID
pub type EntityId = i64;

/// 스토어가 부여하는 테스트 케이스 ID
pub type TestCaseId = i64;

/// 엔티티 종류
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntityType {
    /// PersistentVolumeClaim
    Pvc,
    /// Pod
    Pod,
    /// 알 수 없는 종류
    Unknown,
}

impl EntityType {
    /// 스토어에 저장되는 문자열 표현
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pvc => "PVC",
            Self::Pod => "POD",
            Self::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityType {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "PVC" => Self::Pvc,
            "POD" => Self::Pod,
            _ => Self::Unknown,
        })
    }
}

/// 관찰 대상 클러스터 리소스 하나를 나타내는 영속 레코드
///
/// (entity_type, name, tc_id)와 k8s_uid는 각각 유일합니다.
/// 생성 후에는 변경되지 않으며, 이벤트가 참조하는 앵커 역할을 합니다.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entity {
    /// 스토어가 부여한 ID (저장 전에는 0)
    pub id: EntityId,
    /// 리소스 이름 (종류+테스트 케이스 내에서만 유일)
    pub name: String,
    /// 오케스트레이터가 부여한 UID
    pub k8s_uid: String,
    /// 엔티티 종류
    pub entity_type: EntityType,
    /// 소속 테스트 케이스
    pub tc_id: TestCaseId,
}

impl Entity {
    /// 아직 저장되지 않은 엔티티를 생성합니다.
    pub fn new(
        name: impl Into<String>,
        k8s_uid: impl Into<String>,
        entity_type: EntityType,
        tc_id: TestCaseId,
    ) -> Self {
        Self {
            id: 0,
            name: name.into(),
            k8s_uid: k8s_uid.into(),
            entity_type,
            tc_id,
        }
    }

    /// 스토어에 저장되어 ID가 부여되었는지 확인합니다.
    pub fn is_persisted(&self) -> bool {
        self.id != 0
    }
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{} (id={}, uid={})",
            self.entity_type, self.name, self.id, self.k8s_uid
        )
    }
}

/// 테스트 케이스 — 하나의 인증 실행에서 생성된 엔티티/이벤트의 그룹 단위
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestCase {
    /// 스토어가 부여한 ID
    pub id: TestCaseId,
    /// 테스트 케이스 이름 (예: "VolumeIoSuite")
    pub name: String,
    /// 소속 테스트 런 이름
    pub run_name: String,
    /// 시작 시각
    pub started_at: DateTime<Utc>,
    /// 종료 시각
    pub ended_at: Option<DateTime<Utc>>,
    /// 성공 여부 (종료 전에는 None)
    pub success: Option<bool>,
}

impl TestCase {
    /// 지금 시작하는 테스트 케이스를 생성합니다.
    pub fn new(name: impl Into<String>, run_name: impl Into<String>) -> Self {
        Self {
            id: 0,
            name: name.into(),
            run_name: run_name.into(),
            started_at: Utc::now(),
            ended_at: None,
            success: None,
        }
    }
}

/// 특정 시점의 엔티티 상태별 개수 샘플
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityCount {
    /// 소속 테스트 케이스
    pub tc_id: TestCaseId,
    /// 샘플 시각
    pub timestamp: DateTime<Utc>,
    /// 생성 중인 Pod 수
    pub pods_creating: u32,
    /// Ready 상태 Pod 수
    pub pods_ready: u32,
    /// 종료 중인 Pod 수
    pub pods_terminating: u32,
    /// 바인딩 대기 중인 PVC 수
    pub pvc_creating: u32,
    /// 바인딩된 PVC 수
    pub pvc_bound: u32,
    /// 삭제 중인 PVC 수
    pub pvc_terminating: u32,
}

impl EntityCount {
    /// 모든 카운트가 0인 샘플을 생성합니다.
    pub fn empty(tc_id: TestCaseId, timestamp: DateTime<Utc>) -> Self {
        Self {
            tc_id,
            timestamp,
            pods_creating: 0,
            pods_ready: 0,
            pods_terminating: 0,
            pvc_creating: 0,
            pvc_bound: 0,
            pvc_terminating: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entity_type_string_round_trip() {
        for t in [EntityType::Pvc, EntityType::Pod, EntityType::Unknown] {
            assert_eq!(t.as_str().parse::<EntityType>().unwrap(), t);
        }
        assert_eq!("garbage".parse::<EntityType>().unwrap(), EntityType::Unknown);
    }

    #[test]
    fn new_entity_is_not_persisted() {
        let entity = Entity::new("pvc-1", "uid-1", EntityType::Pvc, 7);
        assert!(!entity.is_persisted());
        assert_eq!(entity.tc_id, 7);
    }

    #[test]
    fn entity_display() {
        let mut entity = Entity::new("pod-a", "uid-a", EntityType::Pod, 1);
        entity.id = 3;
        assert_eq!(entity.to_string(), "POD/pod-a (id=3, uid=uid-a)");
    }

    #[test]
    fn new_test_case_is_open() {
        let tc = TestCase::new("ProvisioningSuite", "run-1");
        assert!(tc.ended_at.is_none());
        assert!(tc.success.is_none());
    }
}
