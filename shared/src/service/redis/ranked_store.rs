//! 공유 랭킹 저장소
//!
//! 채팅 대기열(sorted set), 시간 조각 카운터(INCRBY + TTL),
//! 단순 키/값(GET/SET/DEL)을 하나의 트레이트로 묶습니다.
//! 모든 왕복은 `timeout` 안에 끝나야 하며, 초과하면 `AppError::Timeout`을 반환합니다.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use redis::{AsyncCommands, RedisResult};
use tracing::debug;

use crate::config::redis_config::RedisConfig;
use crate::service::redis::core::retry_operation::RETRY_OPT;
use crate::tool::error::{AppError, AppResult};

/// 기본 저장소 왕복 제한 시간
pub const DEFAULT_STORE_TIMEOUT: Duration = Duration::from_millis(500);

/// 대기열 점수 배율. 점수 = 등록 시각(ms) × 배율, 같은 ms 안에서는 도착 순으로 +1
pub const QUEUE_SCORE_SCALE: i64 = 1000;

/// 등록 시각(ms)의 대기열 점수
pub fn queue_score(at_ms: i64) -> f64 {
    (at_ms * QUEUE_SCORE_SCALE) as f64
}

/// 대기열 허용 판정 요청
///
/// 순위 조회, 조각 카운터 확인, 증가, 대기열 제거를 한 번에 처리합니다.
#[derive(Debug, Clone, Copy)]
pub struct AdmitRequest<'a> {
    pub queue_key: &'a str,
    pub window_key: &'a str,
    pub member: &'a str,
    /// 등록 시각(ms). `None`이면 등록하지 않고 현재 순위로만 판정
    pub enqueue_at_ms: Option<i64>,
    pub max_queue_size: u64,
    pub max_window_size: u64,
    pub window_ttl_secs: u64,
}

/// 대기열 허용 판정 결과
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdmitOutcome {
    /// 카운터를 올리고 대기열에서 뺌
    Admitted,
    /// 대기열에 남음
    Waiting { rank: u64 },
    /// 대기열 초과로 등록 취소
    QueueFull { rank: u64 },
    /// 대기열에 없음
    NotQueued,
}

/// `AdmitRequest`를 원자적으로 처리하는 스크립트
///
/// 새 멤버의 점수는 꼬리 점수보다 항상 커서 같은 ms에 들어와도 도착 순서가 유지됩니다.
const ADMIT_SCRIPT: &str = r#"
local queue, window = KEYS[1], KEYS[2]
local member = ARGV[1]
local enqueue_at = tonumber(ARGV[2])
local max_queue = tonumber(ARGV[3])
local max_window = tonumber(ARGV[4])
local ttl = tonumber(ARGV[5])
local scale = tonumber(ARGV[6])

if enqueue_at >= 0 and not redis.call('ZSCORE', queue, member) then
  local score = enqueue_at * scale
  local tail = redis.call('ZRANGE', queue, -1, -1, 'WITHSCORES')
  if tail[2] and tonumber(tail[2]) >= score then
    score = tonumber(tail[2]) + 1
  end
  redis.call('ZADD', queue, string.format('%.0f', score), member)
end

local rank = redis.call('ZRANK', queue, member)
if not rank then
  return {3, 0}
end
if enqueue_at >= 0 and rank >= max_queue then
  redis.call('ZREM', queue, member)
  return {2, rank}
end

local used = tonumber(redis.call('GET', window) or '0')
if rank < max_window - used then
  redis.call('INCRBY', window, 1)
  redis.call('EXPIRE', window, ttl)
  redis.call('ZREM', queue, member)
  return {0, rank}
end
return {1, rank}
"#;

/// 공유 랭킹 저장소 인터페이스
#[async_trait]
pub trait RankedStore: Send + Sync {
    /// 카운터를 `delta`만큼 증가시키고 TTL을 갱신합니다. 증가 후 값을 반환합니다.
    async fn incr_by(&self, key: &str, delta: i64, ttl_secs: u64) -> AppResult<i64>;

    /// 카운터 현재 값 (없으면 0)
    async fn counter(&self, key: &str) -> AppResult<i64>;

    /// 멤버 추가. 이미 있는 멤버는 기존 점수를 유지합니다(NX). 새로 추가되면 true.
    async fn zadd(&self, key: &str, member: &str, score: f64) -> AppResult<bool>;

    /// 0부터 시작하는 순위, 멤버가 없으면 None
    async fn zrank(&self, key: &str, member: &str) -> AppResult<Option<u64>>;

    async fn zrem(&self, key: &str, member: &str) -> AppResult<bool>;

    /// 점수 범위 [min, max] 멤버 삭제, 삭제된 수 반환
    async fn zrem_range_by_score(&self, key: &str, min: f64, max: f64) -> AppResult<u64>;

    async fn zcard(&self, key: &str) -> AppResult<u64>;

    async fn get(&self, key: &str) -> AppResult<Option<String>>;

    async fn set(&self, key: &str, value: &str, ttl_secs: Option<u64>) -> AppResult<()>;

    async fn del(&self, key: &str) -> AppResult<bool>;

    /// 대기열 등록(선택)과 허용 판정을 원자적으로 처리합니다.
    async fn admit(&self, request: AdmitRequest<'_>) -> AppResult<AdmitOutcome>;
}

/// Redis 기반 구현
#[derive(Clone)]
pub struct RedisRankedStore {
    config: RedisConfig,
    timeout: Duration,
    admit_script: redis::Script,
}

impl RedisRankedStore {
    pub fn new(config: RedisConfig, timeout: Duration) -> Self {
        Self {
            config,
            timeout,
            admit_script: redis::Script::new(ADMIT_SCRIPT),
        }
    }

    pub fn with_default_timeout(config: RedisConfig) -> Self {
        Self::new(config, DEFAULT_STORE_TIMEOUT)
    }

    async fn bounded<T, Fut>(&self, op: &str, fut: Fut) -> AppResult<T>
    where
        Fut: Future<Output = RedisResult<T>>,
    {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(result) => result.map_err(AppError::from),
            Err(_) => {
                debug!("Redis {} 타임아웃 ({:?})", op, self.timeout);
                Err(AppError::Timeout(format!("{} ({:?} 초과)", op, self.timeout)))
            }
        }
    }
}

#[async_trait]
impl RankedStore for RedisRankedStore {
    async fn incr_by(&self, key: &str, delta: i64, ttl_secs: u64) -> AppResult<i64> {
        let mut conn = self.config.get_connection();
        let mut p = redis::pipe();
        p.atomic()
            .cmd("INCRBY")
            .arg(key)
            .arg(delta)
            .cmd("EXPIRE")
            .arg(key)
            .arg(ttl_secs)
            .ignore();

        let (value,): (i64,) = self
            .bounded("PIPELINE(INCRBY+EXPIRE)", async move {
                p.query_async(&mut conn).await
            })
            .await?;
        Ok(value)
    }

    async fn counter(&self, key: &str) -> AppResult<i64> {
        let mut conn = self.config.get_connection();
        let value: Option<i64> = self
            .bounded("GET(counter)", async move { conn.get(key).await })
            .await?;
        Ok(value.unwrap_or(0))
    }

    async fn zadd(&self, key: &str, member: &str, score: f64) -> AppResult<bool> {
        let mut conn = self.config.get_connection();
        let added: u64 = self
            .bounded("ZADD NX", async move {
                redis::cmd("ZADD")
                    .arg(key)
                    .arg("NX")
                    .arg(score)
                    .arg(member)
                    .query_async(&mut conn)
                    .await
            })
            .await?;
        Ok(added > 0)
    }

    async fn zrank(&self, key: &str, member: &str) -> AppResult<Option<u64>> {
        let mut conn = self.config.get_connection();
        self.bounded("ZRANK", async move { conn.zrank(key, member).await })
            .await
    }

    async fn zrem(&self, key: &str, member: &str) -> AppResult<bool> {
        let mut conn = self.config.get_connection();
        let removed: u64 = self
            .bounded("ZREM", async move { conn.zrem(key, member).await })
            .await?;
        Ok(removed > 0)
    }

    async fn zrem_range_by_score(&self, key: &str, min: f64, max: f64) -> AppResult<u64> {
        let mut conn = self.config.get_connection();
        self.bounded("ZREMRANGEBYSCORE", async move {
            redis::cmd("ZREMRANGEBYSCORE")
                .arg(key)
                .arg(min)
                .arg(max)
                .query_async(&mut conn)
                .await
        })
        .await
    }

    async fn zcard(&self, key: &str) -> AppResult<u64> {
        let mut conn = self.config.get_connection();
        self.bounded("ZCARD", async move { conn.zcard(key).await })
            .await
    }

    /// 읽기는 재시도 정책을 적용합니다.
    async fn get(&self, key: &str) -> AppResult<Option<String>> {
        RETRY_OPT
            .execute(|| async move {
                let mut conn = self.config.get_connection();
                self.bounded("GET", async move { conn.get(key).await }).await
            })
            .await
    }

    async fn set(&self, key: &str, value: &str, ttl_secs: Option<u64>) -> AppResult<()> {
        let mut conn = self.config.get_connection();
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(value);
        if let Some(ttl) = ttl_secs {
            cmd.arg("EX").arg(ttl);
        }
        self.bounded("SET", async move { cmd.query_async(&mut conn).await })
            .await
    }

    async fn del(&self, key: &str) -> AppResult<bool> {
        let mut conn = self.config.get_connection();
        let removed: u64 = self
            .bounded("DEL", async move { conn.del(key).await })
            .await?;
        Ok(removed > 0)
    }

    async fn admit(&self, request: AdmitRequest<'_>) -> AppResult<AdmitOutcome> {
        let mut conn = self.config.get_connection();
        let mut invocation = self.admit_script.prepare_invoke();
        invocation
            .key(request.queue_key)
            .key(request.window_key)
            .arg(request.member)
            .arg(request.enqueue_at_ms.unwrap_or(-1))
            .arg(request.max_queue_size)
            .arg(request.max_window_size)
            .arg(request.window_ttl_secs)
            .arg(QUEUE_SCORE_SCALE);

        let (code, rank): (i64, u64) = self
            .bounded("EVALSHA(admit)", async move {
                invocation.invoke_async(&mut conn).await
            })
            .await?;

        match code {
            0 => Ok(AdmitOutcome::Admitted),
            1 => Ok(AdmitOutcome::Waiting { rank }),
            2 => Ok(AdmitOutcome::QueueFull { rank }),
            3 => Ok(AdmitOutcome::NotQueued),
            other => Err(AppError::InvalidFormat(format!(
                "알 수 없는 허용 판정 코드: {}",
                other
            ))),
        }
    }
}
