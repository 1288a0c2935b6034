//! hand-off 레지스트리 — observer 간 엔티티 공유
//!
//! PVC observer가 바인딩된 claim 엔티티를 PersistentVolume 이름으로 게시하면
//! VolumeAttachment observer가 같은 키로 조회해 어태치 이벤트를 claim에 기록합니다.
//!
//! 러너가 테스트 케이스마다 하나를 소유하며 observer에 주입합니다.
//! 게시 전 조회는 `None`을 반환하며, 이 창은 정상적인 상황입니다.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use certwatch_core::types::Entity;

/// 상관 키(PersistentVolume 이름) → claim 엔티티 맵
///
/// `Clone`은 같은 맵을 공유하는 핸들을 만듭니다.
/// 락은 짧은 임계 구역에서만 잡으며 `.await`를 넘겨 보유하지 않습니다.
#[derive(Clone, Default, Debug)]
pub struct HandoffRegistry {
    inner: Arc<RwLock<HashMap<String, Entity>>>,
}

impl HandoffRegistry {
    /// 빈 레지스트리를 생성합니다.
    pub fn new() -> Self {
        Self::default()
    }

    /// 엔티티를 게시합니다. 같은 키가 있으면 덮어씁니다.
    pub fn publish(&self, key: impl Into<String>, entity: Entity) {
        let mut map = self.inner.write().unwrap_or_else(|e| e.into_inner());
        map.insert(key.into(), entity);
    }

    /// 키로 엔티티를 조회합니다.
    pub fn lookup(&self, key: &str) -> Option<Entity> {
        let map = self.inner.read().unwrap_or_else(|e| e.into_inner());
        map.get(key).cloned()
    }

    /// 게시된 엔티티 수
    pub fn len(&self) -> usize {
        self.inner.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// 비어 있는지 확인합니다.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 모든 게시를 지웁니다. 테스트 케이스 사이에 러너가 호출합니다.
    pub fn clear(&self) {
        self.inner
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use certwatch_core::types::EntityType;

    fn claim(name: &str, id: i64) -> Entity {
        let mut e = Entity::new(name, format!("uid-{name}"), EntityType::Pvc, 1);
        e.id = id;
        e
    }

    #[test]
    fn lookup_before_publish_is_none() {
        let registry = HandoffRegistry::new();
        assert!(registry.lookup("pv-1").is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn publish_overwrites() {
        let registry = HandoffRegistry::new();
        registry.publish("pv-1", claim("pvc-a", 1));
        registry.publish("pv-1", claim("pvc-b", 2));
        assert_eq!(registry.lookup("pv-1").unwrap().id, 2);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn clones_share_state() {
        let registry = HandoffRegistry::new();
        let other = registry.clone();
        other.publish("pv-1", claim("pvc-a", 1));
        assert_eq!(registry.lookup("pv-1").unwrap().name, "pvc-a");

        registry.clear();
        assert!(other.is_empty());
    }

    #[test]
    fn concurrent_publish_and_lookup() {
        let registry = HandoffRegistry::new();
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let r = registry.clone();
                std::thread::spawn(move || {
                    r.publish(format!("pv-{i}"), claim(&format!("pvc-{i}"), i));
                    r.lookup(&format!("pv-{i}")).is_some()
                })
            })
            .collect();
        for h in handles {
            assert!(h.join().unwrap());
        }
        assert_eq!(registry.len(), 8);
    }
}
