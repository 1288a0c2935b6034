//! 소요 시간 요약 통계

use chrono::TimeDelta;
use serde::Serialize;

/// 소요 시간 표본의 요약 (초 단위)
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct DurationStats {
    /// 표본 수
    pub count: usize,
    /// 최솟값
    pub min_secs: f64,
    /// 최댓값
    pub max_secs: f64,
    /// 평균
    pub avg_secs: f64,
    /// 중앙값 (짝수 개면 가운데 두 값의 평균)
    pub median_secs: f64,
}

impl DurationStats {
    /// 표본을 요약합니다. 음수 구간은 제외하며, 표본이 없으면 0으로 채운 값을 반환합니다.
    pub fn from_samples(samples: &[TimeDelta]) -> Self {
        let mut secs: Vec<f64> = samples
            .iter()
            .filter(|d| **d >= TimeDelta::zero())
            .map(|d| d.num_microseconds().unwrap_or(i64::MAX) as f64 / 1_000_000.0)
            .collect();
        if secs.is_empty() {
            return Self::default();
        }
        secs.sort_by(f64::total_cmp);

        let count = secs.len();
        let sum: f64 = secs.iter().sum();
        let mid = count / 2;
        let median_secs = if count % 2 == 0 {
            (secs[mid - 1] + secs[mid]) / 2.0
        } else {
            secs[mid]
        };

        Self {
            count,
            min_secs: secs[0],
            max_secs: secs[count - 1],
            avg_secs: sum / count as f64,
            median_secs,
        }
    }
}
