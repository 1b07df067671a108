use std::time::Duration;
use tokio::time::sleep;
use rand::Rng;
use std::future::Future;

use crate::tool::error::{AppError, AppResult};

pub struct RetryOperation {
    pub retries: u8,
    pub delay_ms: u64,
    pub backoff: f64,
    pub jitter_ms: u64,
}

pub const RETRY_OPT: RetryOperation = RetryOperation {
    retries: 3,
    delay_ms: 100,
    backoff: 2.0,
    jitter_ms: 50,
};

impl RetryOperation {
    /// 실패 시 지수 백오프 + 지터로 재시도합니다.
    pub async fn execute<T, F, Fut>(&self, mut operation: F) -> AppResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = AppResult<T>>,
    {
        let mut attempts = self.retries;
        let mut delay = self.delay_ms as f64;

        while attempts > 0 {
            match operation().await {
                Ok(val) => return Ok(val),
                Err(e) => {
                    attempts -= 1;
                    if attempts == 0 {
                        return Err(e);
                    }
                    // 지터 추가
                    let jitter = if self.jitter_ms > 0 {
                        rand::thread_rng().gen_range(0..self.jitter_ms)
                    } else {
                        0
                    };
                    delay *= self.backoff;
                    sleep(Duration::from_millis(delay.round() as u64 + jitter)).await;
                }
            }
        }
        Err(AppError::InternalError("모든 재시도 실패".to_string()))
    }
}
