//! 월드 링크 핸들러
//!
//! 월드 노드의 접속을 받아 엔드포인트를 등록하고, 월드에서 올라오는
//! push / 입장 결과 / 부하 보고 / 강제 종료 요청을 게이트웨이 서비스로 넘깁니다.
//! 링크가 끊기면 엔드포인트를 제거합니다.
//!
//! 사용자에 딸린 메시지는 사용자별 작업자([`UserDispatcher`])가 처리하므로,
//! 한 사용자의 push가 느린 클라이언트 큐에 막혀도 같은 링크의 다른 사용자는 계속 진행됩니다.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tokio::io::BufWriter;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use shared::protocol::{Frame, LinkMessage};
use shared::service::user_dispatcher::DEFAULT_USER_QUEUE_SIZE;
use shared::service::{UserDispatcher, UserTask};

use crate::service::{EndpointId, GatewayService, WorldLink};
use crate::tool::error::{ErrorHandler, GatewayError};

/// 월드 링크 송신 큐 크기
const LINK_QUEUE_SIZE: usize = 4096;

/// 월드에서 올라온 링크 메시지 처리
pub struct WorldInbound {
    gateway: Arc<GatewayService>,
}

impl WorldInbound {
    pub fn new(gateway: Arc<GatewayService>) -> Self {
        Self { gateway }
    }
}

#[async_trait]
impl UserTask for WorldInbound {
    type Message = (EndpointId, LinkMessage);

    async fn run(&self, (from, message): (EndpointId, LinkMessage)) {
        match message {
            LinkMessage::Push(envelope) => self.gateway.deliver_push(from, envelope).await,
            LinkMessage::JoinResult(outcome) => self.gateway.complete_join(from, outcome),
            LinkMessage::LoadReport { players } => {
                self.gateway.worlds().update_players(from, players);
            }
            LinkMessage::KickUser { user_id, reason } => {
                if !self.gateway.kick_user(user_id, &reason).await {
                    debug!("강제 종료 대상 사용자 {} 없음", user_id);
                }
            }
            other => warn!(
                "월드에서 예상하지 못한 링크 메시지: {} (엔드포인트 {})",
                other.kind(),
                from
            ),
        }
    }
}

/// 월드 링크 핸들러
#[derive(Clone)]
pub struct WorldLinkHandler {
    gateway: Arc<GatewayService>,
    next_conn_id: Arc<AtomicU64>,
}

impl WorldLinkHandler {
    pub fn new(gateway: Arc<GatewayService>) -> Self {
        Self {
            gateway,
            next_conn_id: Arc::new(AtomicU64::new(1)),
        }
    }

    /// 월드 노드 리스너 수락 루프
    pub async fn serve(&self, listener: TcpListener) -> Result<()> {
        info!("🌐 월드 링크 리스너 시작: {}", listener.local_addr()?);
        loop {
            let (stream, addr) = listener.accept().await?;
            let _ = stream.set_nodelay(true);
            let handler = self.clone();
            tokio::spawn(async move {
                handler.handle_link(stream, addr.to_string()).await;
            });
        }
    }

    /// 월드 링크 하나를 끝까지 처리합니다.
    pub async fn handle_link(&self, stream: TcpStream, addr: String) {
        let conn_id = self.next_conn_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(LINK_QUEUE_SIZE);
        let (link, close_rx) = WorldLink::new(conn_id, tx);
        info!("월드 링크 연결: {} (링크 {})", addr, conn_id);

        let (reader, writer) = stream.into_split();
        let writer_task = tokio::spawn(Self::write_loop(BufWriter::new(writer), rx, conn_id));

        let inbound = UserDispatcher::new(
            Arc::new(WorldInbound::new(self.gateway.clone())),
            DEFAULT_USER_QUEUE_SIZE,
        );
        let endpoint_id = self.read_loop(reader, link, close_rx, &inbound).await;

        inbound.shutdown().await;
        writer_task.abort();
        if let Some(endpoint_id) = endpoint_id {
            let affected = self.gateway.remove_endpoint(endpoint_id, Some(conn_id));
            info!(
                "월드 링크 종료: 엔드포인트 {} (링크 {}, 영향 세션 {}개)",
                endpoint_id, conn_id, affected
            );
        } else {
            debug!("등록 전 월드 링크 종료: {} (링크 {})", addr, conn_id);
        }
    }

    async fn read_loop(
        &self,
        mut reader: OwnedReadHalf,
        link: WorldLink,
        mut close_rx: watch::Receiver<bool>,
        inbound: &UserDispatcher<WorldInbound>,
    ) -> Option<EndpointId> {
        let mut endpoint_id: Option<EndpointId> = None;
        loop {
            let frame = tokio::select! {
                read = Frame::read_from(&mut reader) => match read {
                    Ok(frame) => frame,
                    Err(e) => {
                        debug!("월드 링크 {} 수신 종료: {}", link.conn_id(), e);
                        return endpoint_id;
                    }
                },
                _ = close_rx.changed() => {
                    warn!("월드 링크 {} 교체되어 종료", link.conn_id());
                    return endpoint_id;
                }
            };

            let message = match LinkMessage::from_frame(&frame) {
                Ok(message) => message,
                Err(e) => {
                    ErrorHandler::log(&GatewayError::from(e), "WorldLinkHandler", "decode");
                    continue;
                }
            };

            if let LinkMessage::RegisterEndpoint(registration) = message {
                let id = registration.endpoint_id;
                if let Some(previous) = endpoint_id.filter(|prev| *prev != id) {
                    warn!("링크 {} 엔드포인트 ID 변경: {} → {}", link.conn_id(), previous, id);
                    self.gateway.remove_endpoint(previous, Some(link.conn_id()));
                }
                match self.gateway.register_endpoint(registration, link.clone()) {
                    Ok(()) => endpoint_id = Some(id),
                    Err(e) => ErrorHandler::log(&e, "WorldLinkHandler", "register_endpoint"),
                }
                continue;
            }

            let Some(from) = endpoint_id else {
                warn!(
                    "등록 전 링크 메시지 무시: {} (링크 {})",
                    message.kind(),
                    link.conn_id()
                );
                continue;
            };
            inbound.dispatch(message.user_id(), (from, message)).await;
        }
    }

    async fn write_loop(mut writer: BufWriter<OwnedWriteHalf>, mut rx: mpsc::Receiver<Frame>, conn_id: u64) {
        while let Some(frame) = rx.recv().await {
            if let Err(e) = frame.write_to(&mut writer).await {
                debug!("월드 링크 {} 송신 실패: {}", conn_id, e);
                break;
            }
        }
    }
}
