//! 채팅 허용 제어
//!
//! 범위(`world`, `zone:<id>`)마다 공유 저장소의 대기열(sorted set)과
//! 시간 조각 카운터로 방송 채팅을 지금 허용할지, 나중에 다시 시도할지, 거부할지 결정합니다.
//!
//! ```text
//! chat_queue:{scope}                 대기열, 점수 = 등록 시각(ms) × 1000 + 같은 ms 안 도착 순서
//! chat_window:{scope}:{slice}        조각별 허용 수, TTL = 2조각
//! ```
//!
//! 순위는 0부터 시작합니다. 남은 허용량이 `remaining`이면 순위 `0..remaining`이 허용됩니다.
//! 순위 조회부터 카운터 증가와 대기열 제거까지는 저장소의 `admit` 한 번으로 처리되어
//! 동시에 들어온 요청끼리 순위와 카운터를 어긋나게 읽지 않습니다.
//! 저장소 왕복이 실패하면 허용하지 않습니다.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use shared::service::redis::core::redis_get_key::KeyType;
use shared::service::redis::ranked_store::queue_score;
use shared::service::{AdmitOutcome, AdmitRequest, RankedStore};
use shared::tool::current_time::CurrentTime;
use shared::tool::error::AppResult;

use crate::config::{ChatLimits, ChatSettings};

/// 채팅 범위
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChatScope {
    World,
    Zone(u32),
}

impl fmt::Display for ChatScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChatScope::World => write!(f, "world"),
            ChatScope::Zone(zone_id) => write!(f, "zone:{}", zone_id),
        }
    }
}

/// 클라이언트가 지정하는 채팅 채널
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatChannel {
    Zone,
    World,
}

/// 거부 사유
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    QueueFull,
    StoreUnavailable,
}

/// 허용 판정
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdmissionDecision {
    Admitted,
    /// 대기열에 남아 있음, 나중에 `retry_admit`
    Retry { rank: u64 },
    Rejected(RejectReason),
    /// 대기열에서 이미 빠짐 (만료 정리 등)
    Expired,
}

/// 범위 하나의 허용 제어기
pub struct ChatAdmission {
    scope: ChatScope,
    limits: ChatLimits,
    queue_timeout: Duration,
    queue_key: String,
    store: Arc<dyn RankedStore>,
}

impl ChatAdmission {
    pub fn new(
        scope: ChatScope,
        limits: ChatLimits,
        queue_timeout: Duration,
        store: Arc<dyn RankedStore>,
    ) -> Self {
        Self {
            scope,
            limits,
            queue_timeout,
            queue_key: KeyType::ChatQueue.get_key(&scope),
            store,
        }
    }

    pub fn scope(&self) -> ChatScope {
        self.scope
    }

    pub fn limits(&self) -> ChatLimits {
        self.limits
    }

    /// 대기열에 등록하고 허용 여부를 판정합니다.
    pub async fn try_admit(&self, requester: u64) -> AdmissionDecision {
        self.try_admit_at(requester, CurrentTime::now_millis()).await
    }

    pub async fn try_admit_at(&self, requester: u64, now_ms: i64) -> AdmissionDecision {
        match self.enqueue_and_decide(requester, now_ms).await {
            Ok(decision) => decision,
            Err(e) => {
                warn!("[{}] 허용 판정 실패, 거부 처리: 사용자 {} - {}", self.scope, requester, e);
                AdmissionDecision::Rejected(RejectReason::StoreUnavailable)
            }
        }
    }

    /// 다시 등록하지 않고 현재 순위로 재판정합니다.
    pub async fn retry_admit(&self, requester: u64) -> AdmissionDecision {
        self.retry_admit_at(requester, CurrentTime::now_millis()).await
    }

    pub async fn retry_admit_at(&self, requester: u64, now_ms: i64) -> AdmissionDecision {
        match self.rank_and_decide(requester, now_ms).await {
            Ok(decision) => decision,
            Err(e) => {
                warn!("[{}] 재판정 실패, 거부 처리: 사용자 {} - {}", self.scope, requester, e);
                AdmissionDecision::Rejected(RejectReason::StoreUnavailable)
            }
        }
    }

    /// 명시적으로 대기열에서 뺍니다. (플레이어 이탈 등)
    pub async fn dequeue(&self, requester: u64) -> AppResult<bool> {
        self.store
            .zrem(&self.queue_key, &requester.to_string())
            .await
    }

    /// 만료된 대기열 항목 정리
    pub async fn sweep(&self) -> AppResult<u64> {
        self.sweep_at(CurrentTime::now_millis()).await
    }

    pub async fn sweep_at(&self, now_ms: i64) -> AppResult<u64> {
        // 같은 ms에 뒤따라 붙은 점수까지 포함
        let cutoff = queue_score(now_ms - self.queue_timeout.as_millis() as i64 + 1) - 1.0;
        let removed = self
            .store
            .zrem_range_by_score(&self.queue_key, f64::MIN, cutoff)
            .await?;
        if removed > 0 {
            info!("[{}] 만료된 채팅 대기 {}개 정리", self.scope, removed);
        }
        Ok(removed)
    }

    pub async fn queue_len(&self) -> AppResult<u64> {
        self.store.zcard(&self.queue_key).await
    }

    async fn enqueue_and_decide(&self, requester: u64, now_ms: i64) -> AppResult<AdmissionDecision> {
        let decision = self.admit(requester, Some(now_ms), now_ms).await?;
        if let AdmissionDecision::Rejected(RejectReason::QueueFull) = decision {
            debug!("[{}] 대기열 초과 거부: 사용자 {}", self.scope, requester);
        }
        Ok(decision)
    }

    async fn rank_and_decide(&self, requester: u64, now_ms: i64) -> AppResult<AdmissionDecision> {
        self.admit(requester, None, now_ms).await
    }

    async fn admit(
        &self,
        requester: u64,
        enqueue_at_ms: Option<i64>,
        now_ms: i64,
    ) -> AppResult<AdmissionDecision> {
        let slice = CurrentTime::slice_index(now_ms, self.limits.slice_secs);
        let window_key = KeyType::ChatWindow.get_slice_key(&self.scope, slice);
        let member = requester.to_string();

        let outcome = self
            .store
            .admit(AdmitRequest {
                queue_key: &self.queue_key,
                window_key: &window_key,
                member: &member,
                enqueue_at_ms,
                max_queue_size: self.limits.max_queue_size,
                max_window_size: self.limits.max_window_size,
                window_ttl_secs: self.limits.window_ttl_secs(),
            })
            .await?;

        Ok(match outcome {
            AdmitOutcome::Admitted => AdmissionDecision::Admitted,
            AdmitOutcome::Waiting { rank } => AdmissionDecision::Retry { rank },
            AdmitOutcome::QueueFull { .. } => AdmissionDecision::Rejected(RejectReason::QueueFull),
            // 등록 직후 정리 작업에 밀려났거나 이미 빠진 경우
            AdmitOutcome::NotQueued => AdmissionDecision::Expired,
        })
    }
}

/// 월드 노드가 쓰는 두 범위의 허용 제어기
pub struct ChatAdmissions {
    world: ChatAdmission,
    zone: ChatAdmission,
}

impl ChatAdmissions {
    pub fn new(zone_id: u32, settings: &ChatSettings, store: Arc<dyn RankedStore>) -> Self {
        Self {
            world: ChatAdmission::new(
                ChatScope::World,
                settings.world,
                settings.queue_timeout,
                store.clone(),
            ),
            zone: ChatAdmission::new(
                ChatScope::Zone(zone_id),
                settings.zone,
                settings.queue_timeout,
                store,
            ),
        }
    }

    pub fn get(&self, channel: ChatChannel) -> &ChatAdmission {
        match channel {
            ChatChannel::World => &self.world,
            ChatChannel::Zone => &self.zone,
        }
    }

    /// 두 범위 모두 만료 정리. 한쪽 실패는 로그만 남깁니다.
    pub async fn sweep_at(&self, now_ms: i64) -> u64 {
        let mut removed = 0;
        for admission in [&self.world, &self.zone] {
            match admission.sweep_at(now_ms).await {
                Ok(n) => removed += n,
                Err(e) => warn!("[{}] 대기열 정리 실패: {}", admission.scope(), e),
            }
        }
        removed
    }

    /// 플레이어가 떠나면 두 대기열에서 모두 뺍니다.
    pub async fn forget(&self, requester: u64) {
        for admission in [&self.world, &self.zone] {
            if let Err(e) = admission.dequeue(requester).await {
                debug!("[{}] 대기열 제거 실패: 사용자 {} - {}", admission.scope(), requester, e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use shared::service::MemoryRankedStore;
    use shared::tool::error::AppError;

    const T0: i64 = 1_700_000_000_000;

    fn admission(limits: ChatLimits) -> ChatAdmission {
        ChatAdmission::new(
            ChatScope::World,
            limits,
            Duration::from_secs(120),
            Arc::new(MemoryRankedStore::new()),
        )
    }

    /// 모든 호출이 실패하는 저장소
    struct DownStore;

    #[async_trait]
    impl RankedStore for DownStore {
        async fn incr_by(&self, _: &str, _: i64, _: u64) -> AppResult<i64> {
            Err(AppError::Timeout("INCRBY".into()))
        }
        async fn counter(&self, _: &str) -> AppResult<i64> {
            Err(AppError::Timeout("GET".into()))
        }
        async fn zadd(&self, _: &str, _: &str, _: f64) -> AppResult<bool> {
            Err(AppError::Timeout("ZADD".into()))
        }
        async fn zrank(&self, _: &str, _: &str) -> AppResult<Option<u64>> {
            Err(AppError::Timeout("ZRANK".into()))
        }
        async fn zrem(&self, _: &str, _: &str) -> AppResult<bool> {
            Err(AppError::Timeout("ZREM".into()))
        }
        async fn zrem_range_by_score(&self, _: &str, _: f64, _: f64) -> AppResult<u64> {
            Err(AppError::Timeout("ZREMRANGEBYSCORE".into()))
        }
        async fn zcard(&self, _: &str) -> AppResult<u64> {
            Err(AppError::Timeout("ZCARD".into()))
        }
        async fn get(&self, _: &str) -> AppResult<Option<String>> {
            Err(AppError::Timeout("GET".into()))
        }
        async fn set(&self, _: &str, _: &str, _: Option<u64>) -> AppResult<()> {
            Err(AppError::Timeout("SET".into()))
        }
        async fn del(&self, _: &str) -> AppResult<bool> {
            Err(AppError::Timeout("DEL".into()))
        }
        async fn admit(&self, _: AdmitRequest<'_>) -> AppResult<AdmitOutcome> {
            Err(AppError::Timeout("EVALSHA".into()))
        }
    }

    #[test]
    fn test_scope_keys() {
        assert_eq!(ChatScope::World.to_string(), "world");
        assert_eq!(ChatScope::Zone(3).to_string(), "zone:3");
        assert_eq!(KeyType::ChatQueue.get_key(&ChatScope::Zone(3)), "chat_queue:zone:3");
    }

    #[tokio::test]
    async fn test_admit_within_window() {
        let chat = admission(ChatLimits::new(10, 2, 5));

        assert_eq!(chat.try_admit_at(1, T0).await, AdmissionDecision::Admitted);
        assert_eq!(chat.try_admit_at(2, T0).await, AdmissionDecision::Admitted);
        assert_eq!(
            chat.try_admit_at(3, T0).await,
            AdmissionDecision::Retry { rank: 0 }
        );
        assert_eq!(chat.queue_len().await.unwrap(), 1, "허용된 요청은 대기열에서 빠져야 함");
    }

    #[tokio::test]
    async fn test_queue_full_rejects_next() {
        let chat = admission(ChatLimits::new(3, 1, 5));
        // 첫 요청으로 이번 조각을 소진
        assert_eq!(chat.try_admit_at(100, T0).await, AdmissionDecision::Admitted);

        for requester in 1..=3 {
            assert!(matches!(
                chat.try_admit_at(requester, T0).await,
                AdmissionDecision::Retry { .. }
            ));
        }
        assert_eq!(chat.queue_len().await.unwrap(), 3);

        assert_eq!(
            chat.try_admit_at(4, T0).await,
            AdmissionDecision::Rejected(RejectReason::QueueFull)
        );
        assert_eq!(chat.queue_len().await.unwrap(), 3, "거부된 요청은 대기열에 남지 않음");
    }

    #[tokio::test]
    async fn test_earlier_requester_admitted_first() {
        let chat = admission(ChatLimits::new(10, 1, 5));
        assert_eq!(chat.try_admit_at(100, T0).await, AdmissionDecision::Admitted);

        // A가 B보다 먼저 대기
        assert_eq!(chat.try_admit_at(1, T0 + 1).await, AdmissionDecision::Retry { rank: 0 });
        assert_eq!(chat.try_admit_at(2, T0 + 2).await, AdmissionDecision::Retry { rank: 1 });

        let next_slice = T0 + 5_000;
        assert_eq!(
            chat.retry_admit_at(2, next_slice).await,
            AdmissionDecision::Retry { rank: 1 },
            "뒤에 선 요청은 앞 요청보다 먼저 허용되지 않음"
        );
        assert_eq!(chat.retry_admit_at(1, next_slice).await, AdmissionDecision::Admitted);
        assert_eq!(
            chat.retry_admit_at(2, next_slice).await,
            AdmissionDecision::Retry { rank: 0 }
        );
    }

    #[tokio::test]
    async fn test_retry_after_sweep_is_expired() {
        let chat = admission(ChatLimits::new(10, 1, 5));
        assert_eq!(chat.try_admit_at(100, T0).await, AdmissionDecision::Admitted);
        assert_eq!(chat.try_admit_at(1, T0).await, AdmissionDecision::Retry { rank: 0 });

        assert_eq!(chat.sweep_at(T0 + 60_000).await.unwrap(), 0);
        assert_eq!(chat.sweep_at(T0 + 121_000).await.unwrap(), 1);

        assert_eq!(
            chat.retry_admit_at(1, T0 + 121_000).await,
            AdmissionDecision::Expired
        );
    }

    #[tokio::test]
    async fn test_retry_keeps_original_position() {
        let chat = admission(ChatLimits::new(10, 1, 5));
        assert_eq!(chat.try_admit_at(100, T0).await, AdmissionDecision::Admitted);
        assert_eq!(chat.try_admit_at(1, T0).await, AdmissionDecision::Retry { rank: 0 });
        assert_eq!(chat.try_admit_at(2, T0 + 10).await, AdmissionDecision::Retry { rank: 1 });

        // 같은 요청자가 다시 등록해도 순서가 바뀌지 않음
        assert_eq!(chat.try_admit_at(1, T0 + 20).await, AdmissionDecision::Retry { rank: 0 });
        assert_eq!(chat.queue_len().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_store_failure_fails_closed() {
        let chat = ChatAdmission::new(
            ChatScope::Zone(1),
            ChatLimits::zone_default(),
            Duration::from_secs(120),
            Arc::new(DownStore),
        );
        assert_eq!(
            chat.try_admit_at(1, T0).await,
            AdmissionDecision::Rejected(RejectReason::StoreUnavailable)
        );
        assert_eq!(
            chat.retry_admit_at(1, T0).await,
            AdmissionDecision::Rejected(RejectReason::StoreUnavailable)
        );
        assert!(chat.sweep_at(T0).await.is_err());
    }

    #[tokio::test]
    async fn test_forget_removes_from_both_scopes() {
        let store: Arc<dyn RankedStore> = Arc::new(MemoryRankedStore::new());
        let mut settings = ChatSettings::default();
        settings.world = ChatLimits::new(10, 1, 5);
        settings.zone = ChatLimits::new(10, 1, 5);
        let chats = ChatAdmissions::new(1, &settings, store);

        for channel in [ChatChannel::World, ChatChannel::Zone] {
            let chat = chats.get(channel);
            assert_eq!(chat.try_admit_at(100, T0).await, AdmissionDecision::Admitted);
            assert_eq!(chat.try_admit_at(7, T0).await, AdmissionDecision::Retry { rank: 0 });
        }

        chats.forget(7).await;
        for channel in [ChatChannel::World, ChatChannel::Zone] {
            assert_eq!(
                chats.get(channel).retry_admit_at(7, T0).await,
                AdmissionDecision::Expired
            );
        }
    }
}
