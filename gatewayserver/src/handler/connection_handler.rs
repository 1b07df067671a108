//! 연결 핸들러
//!
//! 클라이언트 TCP 연결 하나마다 수신 루프와 송신 태스크를 띄웁니다.
//! 연결 태스크 안에서 생긴 실패나 패닉은 이 연결의 끊김으로만 처리합니다.

use std::sync::Arc;

use anyhow::Result;
use tokio::io::BufWriter;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{timeout, Duration};
use tracing::{debug, error, info, warn};

use shared::protocol::Frame;
use shared::tool::error::AppError;

use crate::handler::message_handler::MessageHandler;
use crate::service::{GatewayService, Session, UnsentOutbound};
use crate::tool::error::{ErrorHandler, GatewayError};

/// 연결 종료 방식
#[derive(Debug, Clone, PartialEq, Eq)]
enum Exit {
    /// 전송 계층이 끊김 (재연결 유예)
    Transport,
    /// 서버가 세션을 닫음 (최종 정리)
    Closed(String),
}

/// 끊긴 소켓의 송신 태스크 정지 대기 시간
const WRITER_STOP_TIMEOUT: Duration = Duration::from_millis(500);

/// 송신 태스크 종료 결과
struct WriterExit {
    outbound_rx: mpsc::Receiver<Frame>,
    /// 쓰다가 실패한 프레임
    failed: Option<Frame>,
}

/// 연결 핸들러
#[derive(Clone)]
pub struct ConnectionHandler {
    gateway: Arc<GatewayService>,
    messages: Arc<MessageHandler>,
}

impl ConnectionHandler {
    pub fn new(gateway: Arc<GatewayService>) -> Self {
        let messages = Arc::new(MessageHandler::new(gateway.clone()));
        Self { gateway, messages }
    }

    /// 클라이언트 리스너 수락 루프
    pub async fn serve(&self, listener: TcpListener) -> Result<()> {
        info!("🚀 클라이언트 리스너 시작: {}", listener.local_addr()?);
        loop {
            let (stream, addr) = listener.accept().await?;
            let _ = stream.set_nodelay(true);
            let handler = self.clone();
            tokio::spawn(async move {
                handler.handle_connection(stream, addr.to_string()).await;
            });
        }
    }

    /// 연결 하나를 끝까지 처리합니다.
    pub async fn handle_connection(&self, stream: TcpStream, addr: String) {
        let (session, outbound_rx, close_rx) = match self.gateway.open_session(addr.clone()) {
            Ok(opened) => opened,
            Err(e) => {
                warn!("연결 거부 {}: {}", addr, e);
                return;
            }
        };
        info!("새 연결: 세션 {} ({})", session.id(), addr);

        let (reader, writer) = stream.into_split();
        let (stop_tx, stop_rx) = oneshot::channel();
        let mut writer_task = tokio::spawn(Self::write_loop(
            BufWriter::new(writer),
            outbound_rx,
            close_rx.clone(),
            stop_rx,
            session.id(),
        ));

        let loop_session = session.clone();
        let messages = self.messages.clone();
        let read_task = tokio::spawn(async move {
            Self::read_loop(reader, loop_session, messages, close_rx).await
        });

        let exit = match read_task.await {
            Ok(exit) => exit,
            Err(join_error) => {
                error!(
                    "연결 태스크 비정상 종료: 세션 {:?} - {}",
                    session.snapshot(),
                    join_error
                );
                Exit::Transport
            }
        };

        match exit {
            Exit::Transport if !session.is_closed() => {
                // 송신 큐에 남은 프레임은 재연결 때 재전송
                let _ = stop_tx.send(());
                let unsent = match timeout(WRITER_STOP_TIMEOUT, &mut writer_task).await {
                    Ok(Ok(exit)) => UnsentOutbound::new(exit.failed, exit.outbound_rx),
                    Ok(Err(e)) => {
                        debug!("송신 태스크 종료 대기 실패: {}", e);
                        UnsentOutbound::default()
                    }
                    Err(_) => {
                        warn!("세션 {} 송신 태스크 정지 시간 초과, 남은 프레임 폐기", session.id());
                        writer_task.abort();
                        UnsentOutbound::default()
                    }
                };
                self.gateway.disconnect_with_unsent(&session, unsent).await;
            }
            Exit::Transport => {
                writer_task.abort();
                self.gateway.finalize(&session, "closed").await;
            }
            Exit::Closed(reason) => {
                self.gateway.finalize(&session, &reason).await;
                if let Err(e) = writer_task.await {
                    debug!("송신 태스크 종료 대기 실패: {}", e);
                }
            }
        }
        debug!("연결 처리 종료: 세션 {} ({})", session.id(), addr);
    }

    async fn read_loop(
        mut reader: tokio::net::tcp::OwnedReadHalf,
        session: Arc<Session>,
        messages: Arc<MessageHandler>,
        mut close_rx: watch::Receiver<Option<String>>,
    ) -> Exit {
        loop {
            tokio::select! {
                read = Frame::read_from(&mut reader) => match read {
                    Ok(frame) => {
                        if let Err(e) = messages.handle(&session, frame).await {
                            ErrorHandler::log(&e, "ConnectionHandler", "handle");
                            return Exit::Closed(e.to_string());
                        }
                    }
                    Err(AppError::ConnectionClosed) => return Exit::Transport,
                    Err(e) => {
                        let e = GatewayError::from(e);
                        ErrorHandler::log(&e, "ConnectionHandler", "read_frame");
                        return match e {
                            GatewayError::Shared(AppError::FrameTooLarge { .. })
                            | GatewayError::Shared(AppError::InvalidFormat(_)) => {
                                Exit::Closed("protocol error".into())
                            }
                            _ => Exit::Transport,
                        };
                    }
                },
                changed = close_rx.changed() => {
                    let reason = match changed {
                        Ok(()) => close_rx.borrow().clone().unwrap_or_else(|| "closed".into()),
                        Err(_) => "closed".into(),
                    };
                    return Exit::Closed(reason);
                }
            }
        }
    }

    /// 송신 큐를 소켓에 씁니다.
    ///
    /// 종료 신호를 받으면 남은 프레임을 비우고 끝내고, 정지 요청을 받거나 쓰기에
    /// 실패하면 남은 프레임을 그대로 둔 채 송신 큐를 돌려줍니다.
    async fn write_loop(
        mut writer: BufWriter<OwnedWriteHalf>,
        mut outbound_rx: mpsc::Receiver<Frame>,
        mut close_rx: watch::Receiver<Option<String>>,
        mut stop_rx: oneshot::Receiver<()>,
        session_id: u64,
    ) -> WriterExit {
        loop {
            tokio::select! {
                biased;
                _ = &mut stop_rx => {
                    return WriterExit { outbound_rx, failed: None };
                }
                frame = outbound_rx.recv() => {
                    let Some(frame) = frame else { break };
                    if let Err(e) = frame.write_to(&mut writer).await {
                        debug!("세션 {} 송신 실패: {}", session_id, e);
                        return WriterExit { outbound_rx, failed: Some(frame) };
                    }
                }
                _ = close_rx.changed() => {
                    while let Ok(frame) = outbound_rx.try_recv() {
                        if frame.write_to(&mut writer).await.is_err() {
                            return WriterExit { outbound_rx, failed: Some(frame) };
                        }
                    }
                    break;
                }
            }
        }
        let _ = tokio::io::AsyncWriteExt::shutdown(&mut writer).await;
        WriterExit {
            outbound_rx,
            failed: None,
        }
    }
}
