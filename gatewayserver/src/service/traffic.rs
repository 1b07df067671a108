//! 세션별 트래픽 카운터
//!
//! 마지막 점검 이후 누적된 바이트/요청 수를 원자 변수로 집계하고,
//! 점검 주기가 지나면 평균 전송률을 계산합니다.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use crate::config::TrafficLimits;

/// 점검 주기 동안의 평균 전송률
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrafficSample {
    pub bytes_per_sec: f64,
    pub requests_per_sec: f64,
}

/// 트래픽 판정 결과
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TrafficVerdict {
    /// 점검 주기 미도래 또는 정상
    Normal,
    /// 감사 로그 대상
    Audit(TrafficSample),
    /// 강제 종료 대상
    Abuse(TrafficSample),
}

impl TrafficSample {
    pub fn judge(&self, limits: &TrafficLimits) -> TrafficVerdict {
        if self.bytes_per_sec > limits.hard_bytes_per_sec
            || self.requests_per_sec > limits.hard_requests_per_sec
        {
            TrafficVerdict::Abuse(*self)
        } else if self.bytes_per_sec > limits.soft_bytes_per_sec
            || self.requests_per_sec > limits.soft_requests_per_sec
        {
            TrafficVerdict::Audit(*self)
        } else {
            TrafficVerdict::Normal
        }
    }
}

/// 락 없는 트래픽 카운터
#[derive(Debug)]
pub struct TrafficCounter {
    origin: Instant,
    bytes: AtomicU64,
    requests: AtomicU64,
    /// origin 기준 마지막 점검 시각 (ms)
    last_check_ms: AtomicU64,
}

impl TrafficCounter {
    pub fn new(origin: Instant) -> Self {
        Self {
            origin,
            bytes: AtomicU64::new(0),
            requests: AtomicU64::new(0),
            last_check_ms: AtomicU64::new(0),
        }
    }

    /// 요청 하나를 기록하고, 점검 주기가 지났으면 평균을 계산해 반환합니다.
    pub fn record(&self, byte_len: usize, now: Instant, limits: &TrafficLimits) -> Option<TrafficSample> {
        self.bytes.fetch_add(byte_len as u64, Ordering::Relaxed);
        self.requests.fetch_add(1, Ordering::Relaxed);

        let now_ms = now.saturating_duration_since(self.origin).as_millis() as u64;
        let last = self.last_check_ms.load(Ordering::Acquire);
        let elapsed_ms = now_ms.saturating_sub(last);
        if elapsed_ms < limits.check_interval.as_millis() as u64 {
            return None;
        }

        // 같은 주기를 두 번 계산하지 않도록 점검 시각을 선점
        if self
            .last_check_ms
            .compare_exchange(last, now_ms, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return None;
        }

        let bytes = self.bytes.swap(0, Ordering::Relaxed);
        let requests = self.requests.swap(0, Ordering::Relaxed);
        let secs = elapsed_ms as f64 / 1000.0;
        Some(TrafficSample {
            bytes_per_sec: bytes as f64 / secs,
            requests_per_sec: requests as f64 / secs,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn limits() -> TrafficLimits {
        TrafficLimits {
            check_interval: Duration::from_secs(10),
            soft_bytes_per_sec: 100.0,
            soft_requests_per_sec: 5.0,
            hard_bytes_per_sec: 1000.0,
            hard_requests_per_sec: 50.0,
        }
    }

    #[test]
    fn test_no_sample_before_interval() {
        let origin = Instant::now();
        let counter = TrafficCounter::new(origin);
        assert!(counter
            .record(10, origin + Duration::from_secs(1), &limits())
            .is_none());
    }

    #[test]
    fn test_sample_averages_over_interval() {
        let origin = Instant::now();
        let counter = TrafficCounter::new(origin);
        for _ in 0..9 {
            counter.record(100, origin + Duration::from_secs(1), &limits());
        }
        let sample = counter
            .record(100, origin + Duration::from_secs(10), &limits())
            .unwrap();
        assert_eq!(sample.bytes_per_sec, 100.0);
        assert_eq!(sample.requests_per_sec, 1.0);

        // 다음 주기는 0부터 다시 집계
        assert!(counter
            .record(1, origin + Duration::from_secs(11), &limits())
            .is_none());
    }

    #[test]
    fn test_verdict_thresholds() {
        let l = limits();
        let normal = TrafficSample { bytes_per_sec: 50.0, requests_per_sec: 1.0 };
        let audit = TrafficSample { bytes_per_sec: 500.0, requests_per_sec: 1.0 };
        let abuse = TrafficSample { bytes_per_sec: 10.0, requests_per_sec: 60.0 };
        assert_eq!(normal.judge(&l), TrafficVerdict::Normal);
        assert_eq!(audit.judge(&l), TrafficVerdict::Audit(audit));
        assert_eq!(abuse.judge(&l), TrafficVerdict::Abuse(abuse));
    }
}
