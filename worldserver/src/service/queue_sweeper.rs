//! 채팅 대기열 정리 서비스
//!
//! 주기적으로 두 범위의 대기열에서 만료된 항목을 제거합니다.

use anyhow::Result;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::time::{interval, Duration};
use tracing::{debug, info, warn};

use shared::tool::current_time::CurrentTime;

use crate::service::chat_admission::ChatAdmissions;

/// 대기열 정리 통계
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct SweepStats {
    pub sweeps: u64,
    pub expired_removed: u64,
    /// 마지막으로 항목을 지운 시간 (Unix timestamp)
    pub last_removed_timestamp: Option<i64>,
}

/// 대기열 정리 서비스
pub struct QueueSweeper {
    chats: Arc<ChatAdmissions>,
    sweep_interval: Duration,
    is_running: Arc<Mutex<bool>>,
    sweep_handle: Arc<Mutex<Option<tokio::task::JoinHandle<()>>>>,
    stats: Arc<Mutex<SweepStats>>,
}

impl QueueSweeper {
    pub fn new(chats: Arc<ChatAdmissions>, sweep_interval: Duration) -> Self {
        Self {
            chats,
            sweep_interval,
            is_running: Arc::new(Mutex::new(false)),
            sweep_handle: Arc::new(Mutex::new(None)),
            stats: Arc::new(Mutex::new(SweepStats::default())),
        }
    }

    pub async fn start(&self) -> Result<()> {
        let mut is_running = self.is_running.lock().await;
        if *is_running {
            warn!("대기열 정리 서비스가 이미 실행 중입니다");
            return Ok(());
        }
        *is_running = true;
        drop(is_running);

        info!("🔄 채팅 대기열 정리 시작 ({:?} 간격)", self.sweep_interval);

        let chats = self.chats.clone();
        let is_running_ref = self.is_running.clone();
        let stats_ref = self.stats.clone();
        let sweep_interval = self.sweep_interval;

        let handle = tokio::spawn(async move {
            let mut ticker = interval(sweep_interval);
            // 첫 tick은 즉시 끝나므로 건너뜀
            ticker.tick().await;

            while *is_running_ref.lock().await {
                ticker.tick().await;
                let removed = chats.sweep_at(CurrentTime::now_millis()).await;
                Self::update_stats(&stats_ref, removed).await;
                if removed > 0 {
                    info!("만료된 채팅 대기 {}건 제거", removed);
                }
            }
        });

        *self.sweep_handle.lock().await = Some(handle);
        Ok(())
    }

    pub async fn stop(&self) -> Result<()> {
        let mut is_running = self.is_running.lock().await;
        if !*is_running {
            return Ok(());
        }
        *is_running = false;
        drop(is_running);

        if let Some(handle) = self.sweep_handle.lock().await.take() {
            handle.abort();
            debug!("대기열 정리 작업 핸들 종료됨");
        }
        info!("✅ 채팅 대기열 정리 중지 완료");
        Ok(())
    }

    pub async fn is_running(&self) -> bool {
        *self.is_running.lock().await
    }

    /// 즉시 정리
    pub async fn sweep_now(&self) -> u64 {
        let removed = self.chats.sweep_at(CurrentTime::now_millis()).await;
        Self::update_stats(&self.stats, removed).await;
        removed
    }

    pub async fn get_stats(&self) -> SweepStats {
        self.stats.lock().await.clone()
    }

    async fn update_stats(stats: &Mutex<SweepStats>, removed: u64) {
        let mut stats = stats.lock().await;
        stats.sweeps += 1;
        if removed > 0 {
            stats.expired_removed += removed;
            stats.last_removed_timestamp = Some(chrono::Utc::now().timestamp());
        }
    }
}
