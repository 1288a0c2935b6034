//! 메트릭 상수 및 설명 등록
//!
//! 모든 Prometheus 메트릭의 이름과 설명을 중앙에서 정의합니다.
//! 각 크레이트는 이 상수를 사용하여 `metrics::counter!()`, `metrics::gauge!()`,
//! `metrics::histogram!()` 매크로를 호출합니다.
//!
//! # 네이밍 컨벤션
//!
//! - 접두어: `certwatch_`
//! - 모듈명: `observer_`, `store_`, `runner_`
//! - 접미어: `_total` (counter), `_seconds` (histogram/latency), 없음 (gauge)
//!
//! # 사용 예시
//!
//! ```ignore
//! use metrics::counter;
//!
//! counter!(certwatch_core::metrics::OBSERVER_EVENTS_RECORDED_TOTAL,
//!     certwatch_core::metrics::LABEL_OBSERVER => "PodObserver").increment(1);
//! ```

// ─── 레이블 키 상수 ────────────────────────────────────────────────

/// observer 이름 레이블 키 (PodObserver, ...)
pub const LABEL_OBSERVER: &str = "observer";

/// 이벤트 타입 레이블 키 (PVC_BOUND, ...)
pub const LABEL_EVENT_TYPE: &str = "event_type";

/// 무시 사유 레이블 키 (empty_payload, wrong_kind, unknown_change, terminated)
pub const LABEL_REASON: &str = "reason";

// ─── Observer 메트릭 ───────────────────────────────────────────────

/// Observer: 기록된 이벤트 수 (counter, labels: observer, event_type)
pub const OBSERVER_EVENTS_RECORDED_TOTAL: &str = "certwatch_observer_events_recorded_total";

/// Observer: 무시된 알림 수 (counter, labels: observer, reason)
pub const OBSERVER_NOTIFICATIONS_IGNORED_TOTAL: &str =
    "certwatch_observer_notifications_ignored_total";

/// Observer: 종료 시 flush 실패 수 (counter, label: observer)
pub const OBSERVER_FLUSH_FAILURES_TOTAL: &str = "certwatch_observer_flush_failures_total";

/// Observer: hand-off 레지스트리 조회 실패 수 (counter)
pub const OBSERVER_HANDOFF_MISSES_TOTAL: &str = "certwatch_observer_handoff_misses_total";

/// Observer: 세션 종료 시점까지 해소되지 않은 어태치먼트 수 (counter)
pub const OBSERVER_HANDOFF_UNRESOLVED_TOTAL: &str = "certwatch_observer_handoff_unresolved_total";

/// Observer: watch 만료로 끝난 세션 수 (counter, label: observer)
pub const OBSERVER_SESSIONS_EXPIRED_TOTAL: &str = "certwatch_observer_sessions_expired_total";

/// Observer: 종료 flush 소요 시간 (histogram, 초)
pub const OBSERVER_FLUSH_DURATION_SECONDS: &str = "certwatch_observer_flush_duration_seconds";

// ─── Store 메트릭 ──────────────────────────────────────────────────

/// Store: 이미 존재해 무시된 엔티티 저장 수 (counter)
pub const STORE_ENTITY_DUPLICATES_TOTAL: &str = "certwatch_store_entity_duplicates_total";

// ─── Runner 메트릭 ─────────────────────────────────────────────────

/// Runner: 실행 중인 observer 세션 수 (gauge)
pub const RUNNER_ACTIVE_SESSIONS: &str = "certwatch_runner_active_sessions";

/// Runner: 빌드 정보 (gauge, 항상 1, label: version)
pub const DAEMON_BUILD_INFO: &str = "certwatch_daemon_build_info";

// ─── 히스토그램 버킷 정의 ────────────────────────────────────────────

/// flush 소요 시간 히스토그램 버킷 (초)
///
/// 1ms ~ 10s 범위 (SQLite 트랜잭션 포함)
pub const FLUSH_DURATION_BUCKETS: [f64; 8] = [0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 10.0];

// ─── 설명 등록 함수 ─────────────────────────────────────────────────

/// 모든 메트릭의 설명(description)을 등록합니다.
///
/// 전역 레코더 설치 후 한 번만 호출해야 합니다.
/// 일반적으로 `certwatch-daemon`의 시작 시점에서 호출합니다.
pub fn describe_all() {
    use metrics::{describe_counter, describe_gauge, describe_histogram};

    describe_counter!(
        OBSERVER_EVENTS_RECORDED_TOTAL,
        "Total number of lifecycle events recorded by observers"
    );
    describe_counter!(
        OBSERVER_NOTIFICATIONS_IGNORED_TOTAL,
        "Total number of watch notifications ignored (empty, wrong kind, unknown change)"
    );
    describe_counter!(
        OBSERVER_FLUSH_FAILURES_TOTAL,
        "Total number of failed shutdown flushes"
    );
    describe_counter!(
        OBSERVER_HANDOFF_MISSES_TOTAL,
        "Total number of hand-off registry lookups that found no claim"
    );
    describe_counter!(
        OBSERVER_HANDOFF_UNRESOLVED_TOTAL,
        "Total number of attachments still unresolved at session end"
    );
    describe_counter!(
        OBSERVER_SESSIONS_EXPIRED_TOTAL,
        "Total number of observer sessions ended by watch expiry"
    );
    describe_histogram!(
        OBSERVER_FLUSH_DURATION_SECONDS,
        "Time to persist buffered events at shutdown in seconds"
    );
    describe_counter!(
        STORE_ENTITY_DUPLICATES_TOTAL,
        "Total number of entity inserts resolved to an existing row"
    );
    describe_gauge!(
        RUNNER_ACTIVE_SESSIONS,
        "Number of observer sessions currently running"
    );
    describe_gauge!(
        DAEMON_BUILD_INFO,
        "Build information (always 1, with version label)"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL_METRIC_NAMES: &[&str] = &[
        OBSERVER_EVENTS_RECORDED_TOTAL,
        OBSERVER_NOTIFICATIONS_IGNORED_TOTAL,
        OBSERVER_FLUSH_FAILURES_TOTAL,
        OBSERVER_HANDOFF_MISSES_TOTAL,
        OBSERVER_HANDOFF_UNRESOLVED_TOTAL,
        OBSERVER_SESSIONS_EXPIRED_TOTAL,
        OBSERVER_FLUSH_DURATION_SECONDS,
        STORE_ENTITY_DUPLICATES_TOTAL,
        RUNNER_ACTIVE_SESSIONS,
        DAEMON_BUILD_INFO,
    ];

    #[test]
    fn all_metrics_start_with_certwatch_prefix() {
        for name in ALL_METRIC_NAMES {
            assert!(
                name.starts_with("certwatch_"),
                "Metric '{}' does not start with 'certwatch_' prefix",
                name
            );
        }
    }

    #[test]
    fn counters_end_with_total() {
        for name in ALL_METRIC_NAMES {
            if name.contains("_total") {
                assert!(name.ends_with("_total"), "{name}");
            }
        }
    }

    #[test]
    fn describe_all_does_not_panic() {
        // 레코더 미설치 상태에서도 no-op
        describe_all();
    }

    #[test]
    fn label_keys_are_lowercase() {
        for label in [LABEL_OBSERVER, LABEL_EVENT_TYPE, LABEL_REASON] {
            assert_eq!(label.to_lowercase(), label);
        }
    }

    #[test]
    fn flush_duration_buckets_are_sorted() {
        let buckets = FLUSH_DURATION_BUCKETS;
        for i in 1..buckets.len() {
            assert!(buckets[i] > buckets[i - 1]);
        }
    }
}
