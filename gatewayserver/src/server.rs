//! 게이트웨이 서버
//!
//! 클라이언트 리스너, 월드 링크 리스너, 하트비트 서비스를 묶어 실행합니다.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::{error, info};

use shared::service::RankedStore;

use crate::config::GatewayConfig;
use crate::handler::{ConnectionHandler, WorldLinkHandler};
use crate::service::{GatewayService, HeartbeatService};

/// 게이트웨이 서버
pub struct GatewayServer {
    gateway: Arc<GatewayService>,
    heartbeat_service: Arc<HeartbeatService>,
    tasks: Vec<JoinHandle<()>>,
    client_addr: Option<SocketAddr>,
    world_addr: Option<SocketAddr>,
}

impl GatewayServer {
    pub fn new(config: GatewayConfig, store: Arc<dyn RankedStore>) -> Self {
        let gateway = Arc::new(GatewayService::new(config, store));
        let heartbeat_service = Arc::new(HeartbeatService::with_default_config(gateway.clone()));
        Self {
            gateway,
            heartbeat_service,
            tasks: Vec::new(),
            client_addr: None,
            world_addr: None,
        }
    }

    pub fn gateway(&self) -> &Arc<GatewayService> {
        &self.gateway
    }

    /// 실제로 바인드된 클라이언트 리스너 주소
    pub fn client_addr(&self) -> Option<SocketAddr> {
        self.client_addr
    }

    /// 실제로 바인드된 월드 링크 리스너 주소
    pub fn world_addr(&self) -> Option<SocketAddr> {
        self.world_addr
    }

    /// 서버 시작
    pub async fn start(&mut self) -> Result<()> {
        let config = self.gateway.config().clone();

        let client_listener = TcpListener::bind(config.client_bind_address())
            .await
            .context("클라이언트 리스너 바인드 실패")?;
        let world_listener = TcpListener::bind(config.world_bind_address())
            .await
            .context("월드 링크 리스너 바인드 실패")?;
        self.client_addr = Some(client_listener.local_addr()?);
        self.world_addr = Some(world_listener.local_addr()?);

        self.heartbeat_service.start().await?;

        let connection_handler = ConnectionHandler::new(self.gateway.clone());
        self.tasks.push(tokio::spawn(async move {
            if let Err(e) = connection_handler.serve(client_listener).await {
                error!("클라이언트 리스너 오류: {}", e);
            }
        }));

        let world_handler = WorldLinkHandler::new(self.gateway.clone());
        self.tasks.push(tokio::spawn(async move {
            if let Err(e) = world_handler.serve(world_listener).await {
                error!("월드 링크 리스너 오류: {}", e);
            }
        }));

        info!(
            "✅ 게이트웨이 {} 실행 중 (클라이언트 {:?}, 월드 {:?})",
            config.gateway_id, self.client_addr, self.world_addr
        );
        Ok(())
    }

    /// 서버 중지
    pub async fn stop(&mut self) -> Result<()> {
        info!("🛑 게이트웨이 중지 중...");
        for task in self.tasks.drain(..) {
            task.abort();
        }
        self.heartbeat_service.stop().await?;
        info!("✅ 게이트웨이가 성공적으로 중지되었습니다");
        Ok(())
    }
}
