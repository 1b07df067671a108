//! 메모리 기반 랭킹 저장소
//!
//! 단일 노드 실행과 테스트용 구현입니다. Redis와 같은 의미를 따르며,
//! 같은 점수끼리는 Redis처럼 멤버 문자열 순으로 순위를 매깁니다.

use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;

use super::redis::ranked_store::{queue_score, AdmitOutcome, AdmitRequest, RankedStore};
use crate::tool::error::AppResult;

#[derive(Debug, Clone, Copy)]
struct Score(f64);

impl PartialEq for Score {
    fn eq(&self, other: &Self) -> bool {
        self.0.total_cmp(&other.0) == Ordering::Equal
    }
}

impl Eq for Score {}

impl PartialOrd for Score {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Score {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.total_cmp(&other.0)
    }
}

#[derive(Default)]
struct SortedSet {
    members: HashMap<String, Score>,
    ordered: BTreeSet<(Score, String)>,
}

impl SortedSet {
    /// NX 추가. 새로 추가되면 true
    fn insert(&mut self, member: &str, score: f64) -> bool {
        if self.members.contains_key(member) {
            return false;
        }
        self.members.insert(member.to_string(), Score(score));
        self.ordered.insert((Score(score), member.to_string()));
        true
    }

    fn rank(&self, member: &str) -> Option<u64> {
        let score = self.members.get(member)?;
        let key = (*score, member.to_string());
        Some(self.ordered.range(..key).count() as u64)
    }

    fn tail_score(&self) -> Option<f64> {
        self.ordered.iter().next_back().map(|(score, _)| score.0)
    }

    fn remove(&mut self, member: &str) -> bool {
        match self.members.remove(member) {
            Some(score) => {
                self.ordered.remove(&(score, member.to_string()));
                true
            }
            None => false,
        }
    }
}

struct Expiring<T> {
    value: T,
    expires_at: Option<Instant>,
}

impl<T> Expiring<T> {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.map(|at| now >= at).unwrap_or(false)
    }
}

#[derive(Default)]
struct Inner {
    counters: HashMap<String, Expiring<i64>>,
    strings: HashMap<String, Expiring<String>>,
    sets: HashMap<String, SortedSet>,
}

fn incr_counter(
    counters: &mut HashMap<String, Expiring<i64>>,
    key: &str,
    delta: i64,
    ttl_secs: u64,
    now: Instant,
) -> i64 {
    let entry = counters.entry(key.to_string()).or_insert(Expiring {
        value: 0,
        expires_at: None,
    });
    if entry.is_expired(now) {
        entry.value = 0;
    }
    entry.value += delta;
    entry.expires_at = Some(now + Duration::from_secs(ttl_secs));
    entry.value
}

fn read_counter(counters: &HashMap<String, Expiring<i64>>, key: &str, now: Instant) -> i64 {
    counters
        .get(key)
        .filter(|c| !c.is_expired(now))
        .map(|c| c.value)
        .unwrap_or(0)
}

/// 메모리 랭킹 저장소
#[derive(Default)]
pub struct MemoryRankedStore {
    inner: Mutex<Inner>,
}

impl MemoryRankedStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RankedStore for MemoryRankedStore {
    async fn incr_by(&self, key: &str, delta: i64, ttl_secs: u64) -> AppResult<i64> {
        let now = Instant::now();
        let mut inner = self.inner.lock();
        Ok(incr_counter(&mut inner.counters, key, delta, ttl_secs, now))
    }

    async fn counter(&self, key: &str) -> AppResult<i64> {
        let now = Instant::now();
        let inner = self.inner.lock();
        Ok(read_counter(&inner.counters, key, now))
    }

    async fn zadd(&self, key: &str, member: &str, score: f64) -> AppResult<bool> {
        let mut inner = self.inner.lock();
        Ok(inner
            .sets
            .entry(key.to_string())
            .or_default()
            .insert(member, score))
    }

    async fn zrank(&self, key: &str, member: &str) -> AppResult<Option<u64>> {
        let inner = self.inner.lock();
        Ok(inner.sets.get(key).and_then(|set| set.rank(member)))
    }

    async fn zrem(&self, key: &str, member: &str) -> AppResult<bool> {
        let mut inner = self.inner.lock();
        Ok(inner
            .sets
            .get_mut(key)
            .map(|set| set.remove(member))
            .unwrap_or(false))
    }

    async fn zrem_range_by_score(&self, key: &str, min: f64, max: f64) -> AppResult<u64> {
        let mut inner = self.inner.lock();
        let Some(set) = inner.sets.get_mut(key) else {
            return Ok(0);
        };

        let victims: Vec<String> = set
            .ordered
            .iter()
            .filter(|(score, _)| score.0 >= min && score.0 <= max)
            .map(|(_, member)| member.clone())
            .collect();

        for member in &victims {
            set.remove(member);
        }
        Ok(victims.len() as u64)
    }

    async fn zcard(&self, key: &str) -> AppResult<u64> {
        let inner = self.inner.lock();
        Ok(inner
            .sets
            .get(key)
            .map(|set| set.members.len() as u64)
            .unwrap_or(0))
    }

    async fn get(&self, key: &str) -> AppResult<Option<String>> {
        let now = Instant::now();
        let inner = self.inner.lock();
        Ok(inner
            .strings
            .get(key)
            .filter(|s| !s.is_expired(now))
            .map(|s| s.value.clone()))
    }

    async fn set(&self, key: &str, value: &str, ttl_secs: Option<u64>) -> AppResult<()> {
        let expires_at = ttl_secs.map(|ttl| Instant::now() + Duration::from_secs(ttl));
        self.inner.lock().strings.insert(
            key.to_string(),
            Expiring {
                value: value.to_string(),
                expires_at,
            },
        );
        Ok(())
    }

    async fn del(&self, key: &str) -> AppResult<bool> {
        let mut inner = self.inner.lock();
        let removed = inner.strings.remove(key).is_some()
            | inner.counters.remove(key).is_some()
            | inner.sets.remove(key).is_some();
        Ok(removed)
    }

    async fn admit(&self, request: AdmitRequest<'_>) -> AppResult<AdmitOutcome> {
        let now = Instant::now();
        let mut guard = self.inner.lock();
        let Inner { counters, sets, .. } = &mut *guard;
        let set = sets.entry(request.queue_key.to_string()).or_default();

        if let Some(at_ms) = request.enqueue_at_ms {
            let mut score = queue_score(at_ms);
            if let Some(tail) = set.tail_score().filter(|tail| *tail >= score) {
                score = tail + 1.0;
            }
            set.insert(request.member, score);
        }

        let Some(rank) = set.rank(request.member) else {
            return Ok(AdmitOutcome::NotQueued);
        };
        if request.enqueue_at_ms.is_some() && rank >= request.max_queue_size {
            set.remove(request.member);
            return Ok(AdmitOutcome::QueueFull { rank });
        }

        let used = read_counter(counters, request.window_key, now).max(0) as u64;
        if rank < request.max_window_size.saturating_sub(used) {
            set.remove(request.member);
            incr_counter(counters, request.window_key, 1, request.window_ttl_secs, now);
            return Ok(AdmitOutcome::Admitted);
        }
        Ok(AdmitOutcome::Waiting { rank })
    }
}
