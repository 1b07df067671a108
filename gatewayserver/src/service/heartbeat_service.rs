//! 하트비트 서비스
//!
//! 주기적으로 세션을 점검해 재연결 유예 시간이 지난 끊긴 세션과
//! 하트비트가 끊긴 세션을 최종 정리합니다.

use anyhow::Result;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::time::{interval, Duration, Instant};
use tracing::{debug, info, warn};

use crate::service::gateway_service::{GatewayService, SweepReport};

/// 하트비트 서비스
pub struct HeartbeatService {
    gateway: Arc<GatewayService>,
    is_running: Arc<Mutex<bool>>,
    cleanup_handle: Arc<Mutex<Option<tokio::task::JoinHandle<()>>>>,
    sweep_interval: Duration,
    heartbeat_stats: Arc<Mutex<HeartbeatStats>>,
}

/// 하트비트 통계
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct HeartbeatStats {
    pub sweeps: u64,
    pub grace_expired: u64,
    pub timeout_cleanups: u64,
    /// 마지막 정리 시간 (Unix timestamp)
    pub last_cleanup_timestamp: Option<i64>,
    pub active_connections: u32,
}

impl HeartbeatService {
    /// 새로운 하트비트 서비스 생성
    pub fn new(gateway: Arc<GatewayService>, sweep_interval: Duration) -> Self {
        Self {
            gateway,
            is_running: Arc::new(Mutex::new(false)),
            cleanup_handle: Arc::new(Mutex::new(None)),
            sweep_interval,
            heartbeat_stats: Arc::new(Mutex::new(HeartbeatStats::default())),
        }
    }

    /// 게이트웨이 설정의 정리 주기로 생성
    pub fn with_default_config(gateway: Arc<GatewayService>) -> Self {
        let sweep_interval = gateway.config().session.sweep_interval;
        Self::new(gateway, sweep_interval)
    }

    /// 하트비트 시스템 시작
    pub async fn start(&self) -> Result<()> {
        let mut is_running = self.is_running.lock().await;

        if *is_running {
            warn!("하트비트 시스템이 이미 실행 중입니다");
            return Ok(());
        }

        *is_running = true;
        drop(is_running);

        let session = &self.gateway.config().session;
        info!(
            "🔄 하트비트 시스템 시작 ({:?} 간격, 유예 {:?}, 타임아웃 {:?})",
            self.sweep_interval, session.disconnect_grace, session.no_response_timeout
        );

        let gateway = self.gateway.clone();
        let is_running_ref = self.is_running.clone();
        let stats_ref = self.heartbeat_stats.clone();
        let sweep_interval = self.sweep_interval;

        let handle = tokio::spawn(async move {
            let mut cleanup_interval = interval(sweep_interval);

            while *is_running_ref.lock().await {
                cleanup_interval.tick().await;

                let started = Instant::now();
                let report = gateway.sweep().await;
                let current_connections = gateway.registry().connection_count();

                Self::update_stats(&stats_ref, &report, current_connections).await;

                if report.total() > 0 {
                    info!(
                        "세션 정리: 유예 만료 {}개, 무응답 {}개, 종료 {}개 (활성: {}개, {:?})",
                        report.grace_expired,
                        report.timed_out,
                        report.reaped,
                        current_connections,
                        started.elapsed()
                    );
                }
            }

            info!("하트비트 정리 작업 종료");
        });

        *self.cleanup_handle.lock().await = Some(handle);

        Ok(())
    }

    /// 하트비트 시스템 중지
    pub async fn stop(&self) -> Result<()> {
        let mut is_running = self.is_running.lock().await;

        if !*is_running {
            warn!("하트비트 시스템이 이미 중지되어 있습니다");
            return Ok(());
        }

        *is_running = false;
        drop(is_running);

        info!("🛑 하트비트 시스템 중지 중...");

        let mut handle_option = self.cleanup_handle.lock().await;
        if let Some(handle) = handle_option.take() {
            handle.abort();
            debug!("하트비트 정리 작업 핸들 종료됨");
        }

        info!("✅ 하트비트 시스템 중지 완료");
        Ok(())
    }

    /// 하트비트 시스템 실행 상태 확인
    pub async fn is_running(&self) -> bool {
        *self.is_running.lock().await
    }

    /// 수동으로 세션 정리
    pub async fn cleanup_now(&self) -> SweepReport {
        let report = self.gateway.sweep().await;
        let current = self.gateway.registry().connection_count();
        Self::update_stats(&self.heartbeat_stats, &report, current).await;
        report
    }

    /// 하트비트 통계 조회
    pub async fn get_heartbeat_stats(&self) -> HeartbeatStats {
        self.heartbeat_stats.lock().await.clone()
    }

    async fn update_stats(stats: &Mutex<HeartbeatStats>, report: &SweepReport, active: usize) {
        let mut stats = stats.lock().await;
        stats.sweeps += 1;
        stats.active_connections = active as u32;
        if report.total() > 0 {
            stats.grace_expired += report.grace_expired as u64;
            stats.timeout_cleanups += (report.timed_out + report.reaped) as u64;
            stats.last_cleanup_timestamp = Some(chrono::Utc::now().timestamp());
        }
    }
}
