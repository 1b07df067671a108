//! 월드 서버
//!
//! 게이트웨이 접속기들과 채팅 대기열 정리 서비스를 묶어 실행합니다.

use std::sync::atomic::AtomicU64;
use std::sync::Arc;

use anyhow::Result;
use tokio::task::JoinHandle;
use tracing::info;

use shared::service::RankedStore;

use crate::config::WorldConfig;
use crate::handler::{GatewayConnector, MessageTable, WorldRouter};
use crate::service::{
    ChatAdmissions, DefaultGameLogic, GameLogic, QueueSweeper, WorldHandle, WorldSession,
};

/// 월드 서버
pub struct WorldServer {
    config: WorldConfig,
    router: Arc<WorldRouter>,
    sweeper: Arc<QueueSweeper>,
    tasks: Vec<JoinHandle<()>>,
}

impl WorldServer {
    /// 기본 게임 로직으로 생성
    pub fn new(config: WorldConfig, store: Arc<dyn RankedStore>) -> Self {
        Self::with_game_logic(config, store, |handle| {
            Arc::new(DefaultGameLogic::new(handle)) as Arc<dyn GameLogic>
        })
    }

    /// 게임 로직을 지정해 생성합니다. 게임 로직은 월드 핸들을 받아 만들어집니다.
    pub fn with_game_logic<F>(config: WorldConfig, store: Arc<dyn RankedStore>, build_logic: F) -> Self
    where
        F: FnOnce(WorldHandle) -> Arc<dyn GameLogic>,
    {
        let table = MessageTable::new(config.game_msg_ids.iter().copied());
        let session = Arc::new(WorldSession::new(&config, table.owned_msg_ids()));
        let chats = Arc::new(ChatAdmissions::new(config.zone_id, &config.chat, store));
        let logic = build_logic(WorldHandle::new(session.clone()));
        let router = Arc::new(WorldRouter::new(session, table, chats.clone(), logic));
        let sweeper = Arc::new(QueueSweeper::new(chats, config.chat.sweep_interval));

        Self {
            config,
            router,
            sweeper,
            tasks: Vec::new(),
        }
    }

    pub fn config(&self) -> &WorldConfig {
        &self.config
    }

    pub fn handle(&self) -> WorldHandle {
        WorldHandle::new(self.router.session().clone())
    }

    pub fn session(&self) -> &Arc<WorldSession> {
        self.router.session()
    }

    pub fn router(&self) -> &Arc<WorldRouter> {
        &self.router
    }

    /// 서버 시작
    pub async fn start(&mut self) -> Result<()> {
        self.sweeper.start().await?;

        let next_conn_id = Arc::new(AtomicU64::new(1));
        for address in &self.config.gateway_addresses {
            let connector = GatewayConnector::new(
                address.clone(),
                self.router.clone(),
                self.config.reconnect_delay,
                self.config.load_report_interval,
                next_conn_id.clone(),
            );
            self.tasks.push(tokio::spawn(connector.run()));
        }

        info!(
            "✅ 월드 엔드포인트 {} 실행 중 (존 {}, 게이트웨이 {}개)",
            self.config.endpoint_id,
            self.config.zone_id,
            self.config.gateway_addresses.len()
        );
        Ok(())
    }

    /// 서버 중지
    pub async fn stop(&mut self) -> Result<()> {
        info!("🛑 월드 서버 중지 중...");
        for task in self.tasks.drain(..) {
            task.abort();
        }
        self.sweeper.stop().await?;
        info!("✅ 월드 서버가 성공적으로 중지되었습니다");
        Ok(())
    }
}
