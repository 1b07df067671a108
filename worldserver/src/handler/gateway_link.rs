//! 게이트웨이 링크
//!
//! 설정된 게이트웨이마다 하나씩 접속을 유지합니다. 접속하면 엔드포인트를 등록하고
//! `RegisterAck`로 게이트웨이 ID를 받은 뒤, 주기적으로 부하를 보고하면서
//! 들어오는 링크 메시지를 라우터로 넘깁니다. 끊기면 잠시 후 다시 접속합니다.
//!
//! 사용자 메시지는 사용자별 작업자가 순서대로 처리하므로, 한 사용자의 채팅 판정이
//! 저장소를 기다려도 같은 링크의 다른 사용자는 막히지 않습니다.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use tokio::io::BufWriter;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio::time::{interval, sleep, timeout, Duration};
use tracing::{debug, info, warn};

use shared::protocol::{Frame, LinkMessage};
use shared::service::user_dispatcher::DEFAULT_USER_QUEUE_SIZE;
use shared::service::{UserDispatcher, UserTask};

use crate::handler::world_router::WorldRouter;
use crate::service::world_session::{GatewayLink, WorldSession};
use crate::tool::error::{ErrorHandler, WorldError};

/// 게이트웨이 링크 송신 큐 크기
const LINK_QUEUE_SIZE: usize = 4096;

/// 등록 응답 대기 시간
const REGISTER_TIMEOUT: Duration = Duration::from_secs(5);

/// 게이트웨이 하나에서 온 링크 메시지를 라우터로 넘김
pub struct GatewayInbound {
    router: Arc<WorldRouter>,
    gateway_id: String,
}

impl GatewayInbound {
    pub fn new(router: Arc<WorldRouter>, gateway_id: String) -> Self {
        Self { router, gateway_id }
    }
}

#[async_trait]
impl UserTask for GatewayInbound {
    type Message = LinkMessage;

    async fn run(&self, message: LinkMessage) {
        self.router.dispatch(&self.gateway_id, message).await;
    }
}

/// 게이트웨이 접속기
#[derive(Clone)]
pub struct GatewayConnector {
    address: String,
    router: Arc<WorldRouter>,
    reconnect_delay: Duration,
    load_report_interval: Duration,
    next_conn_id: Arc<AtomicU64>,
}

impl GatewayConnector {
    pub fn new(
        address: String,
        router: Arc<WorldRouter>,
        reconnect_delay: Duration,
        load_report_interval: Duration,
        next_conn_id: Arc<AtomicU64>,
    ) -> Self {
        Self {
            address,
            router,
            reconnect_delay,
            load_report_interval,
            next_conn_id,
        }
    }

    fn session(&self) -> &Arc<WorldSession> {
        self.router.session()
    }

    /// 재접속 루프. 태스크가 중단될 때까지 돕니다.
    pub async fn run(self) {
        loop {
            match self.connect_once().await {
                Ok(()) => info!("게이트웨이 {} 링크 종료, 재접속 대기", self.address),
                Err(e) => warn!("게이트웨이 {} 접속 실패: {:#}", self.address, e),
            }
            sleep(self.reconnect_delay).await;
        }
    }

    /// 한 번 접속해서 링크가 끊길 때까지 처리합니다.
    pub async fn connect_once(&self) -> Result<()> {
        let stream = TcpStream::connect(&self.address)
            .await
            .with_context(|| format!("{} 연결 실패", self.address))?;
        let _ = stream.set_nodelay(true);
        let (mut reader, writer) = stream.into_split();
        let mut writer = BufWriter::new(writer);

        let gateway_id = self.register(&mut reader, &mut writer).await?;
        let conn_id = self.next_conn_id.fetch_add(1, Ordering::Relaxed);
        info!(
            "✅ 게이트웨이 {} 등록 완료: {} (링크 {})",
            self.address, gateway_id, conn_id
        );

        let (tx, rx) = mpsc::channel(LINK_QUEUE_SIZE);
        let link = GatewayLink::new(gateway_id.clone(), conn_id, tx);
        self.session().attach_gateway(link.clone());

        // drop 시 송신/보고 작업도 중단
        let mut link_tasks = JoinSet::new();
        link_tasks.spawn(Self::write_loop(writer, rx, conn_id));
        link_tasks.spawn(Self::report_loop(
            self.session().clone(),
            link,
            self.load_report_interval,
        ));

        let inbound = UserDispatcher::new(
            Arc::new(GatewayInbound::new(self.router.clone(), gateway_id.clone())),
            DEFAULT_USER_QUEUE_SIZE,
        );
        self.read_loop(&mut reader, &gateway_id, &inbound).await;

        // 이미 받은 메시지는 회신까지 마친 뒤 링크를 내림
        inbound.shutdown().await;
        link_tasks.abort_all();

        let orphaned = self.session().detach_gateway(&gateway_id, conn_id);
        self.router
            .drop_players(orphaned, "gateway link lost")
            .await;
        Ok(())
    }

    async fn register(
        &self,
        reader: &mut OwnedReadHalf,
        writer: &mut BufWriter<OwnedWriteHalf>,
    ) -> Result<String> {
        let registration = LinkMessage::RegisterEndpoint(self.session().registration());
        registration.to_frame()?.write_to(writer).await?;

        let frame = timeout(REGISTER_TIMEOUT, Frame::read_from(reader))
            .await
            .context("등록 응답 시간 초과")??;
        match LinkMessage::from_frame(&frame)? {
            LinkMessage::RegisterAck { gateway_id } => Ok(gateway_id),
            other => bail!("등록 응답 대신 {} 수신", other.kind()),
        }
    }

    async fn read_loop(
        &self,
        reader: &mut OwnedReadHalf,
        gateway_id: &str,
        inbound: &UserDispatcher<GatewayInbound>,
    ) {
        loop {
            let frame = match Frame::read_from(reader).await {
                Ok(frame) => frame,
                Err(e) => {
                    debug!("게이트웨이 {} 수신 종료: {}", gateway_id, e);
                    return;
                }
            };
            match LinkMessage::from_frame(&frame) {
                Ok(message) => inbound.dispatch(message.user_id(), message).await,
                Err(e) => ErrorHandler::log(&WorldError::from(e), "GatewayConnector", "decode"),
            }
        }
    }

    async fn report_loop(session: Arc<WorldSession>, link: GatewayLink, every: Duration) {
        let mut ticker = interval(every);
        loop {
            ticker.tick().await;
            let report = LinkMessage::LoadReport {
                players: session.player_count(),
            };
            if let Err(e) = link.send(&report) {
                debug!("부하 보고 실패: {}", e);
            }
        }
    }

    async fn write_loop(mut writer: BufWriter<OwnedWriteHalf>, mut rx: mpsc::Receiver<Frame>, conn_id: u64) {
        while let Some(frame) = rx.recv().await {
            if let Err(e) = frame.write_to(&mut writer).await {
                debug!("게이트웨이 링크 {} 송신 실패: {}", conn_id, e);
                break;
            }
        }
    }
}
