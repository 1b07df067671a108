//! 메시지 핸들러
//!
//! 클라이언트 프레임을 먼저 게이트웨이 로컬 요청으로 해석하고,
//! 로컬 메시지가 아니면 바인딩된 월드로 그대로 전달합니다.

use std::sync::Arc;

use tracing::debug;

use shared::protocol::Frame;

use crate::protocol::{ClientRequest, Reply};
use crate::service::{GatewayService, Session};
use crate::tool::error::{ErrorHandler, GatewayError, GatewayResult};

/// 메시지 핸들러
pub struct MessageHandler {
    gateway: Arc<GatewayService>,
}

impl MessageHandler {
    pub fn new(gateway: Arc<GatewayService>) -> Self {
        Self { gateway }
    }

    /// 수신 프레임 하나를 처리합니다.
    ///
    /// 연결을 유지할 수 있는 실패는 에러 알림으로 응답하고 `Ok`를 반환합니다.
    /// 연결을 끊어야 하는 실패만 `Err`로 돌려줍니다.
    pub async fn handle(&self, session: &Arc<Session>, frame: Frame) -> GatewayResult<()> {
        self.gateway
            .registry()
            .record_traffic(session, frame.wire_len())?;

        let msg_id = frame.msg_id;
        let result = match ClientRequest::from_frame(frame) {
            Ok(request) => self.dispatch(session, request).await,
            Err(e) => Err(e),
        };

        match result {
            Ok(()) => Ok(()),
            Err(e) if e.is_fatal() => Err(e),
            Err(e) => {
                ErrorHandler::log(&e, "MessageHandler", &format!("msg_{}", msg_id));
                session.send(Reply::error(msg_id, &e)?)
            }
        }
    }

    async fn dispatch(&self, session: &Arc<Session>, request: ClientRequest) -> GatewayResult<()> {
        if session.user_id().is_none()
            && !matches!(
                request,
                ClientRequest::Heartbeat | ClientRequest::Login(_) | ClientRequest::Reconnect(_)
            )
        {
            return Err(GatewayError::NotVerified);
        }

        match request {
            ClientRequest::Heartbeat => self.gateway.heartbeat(session),
            ClientRequest::Login(credentials) => {
                let response = self.gateway.login(session, credentials).await?;
                session.send(Reply::login(&response)?)
            }
            ClientRequest::Reconnect(credentials) => {
                let response = self.gateway.reconnect(session, credentials).await?;
                session.send(Reply::reconnect(&response)?)
            }
            ClientRequest::WorldList => {
                let worlds = self.gateway.world_list(session)?;
                session.send(Reply::world_list(worlds)?)
            }
            ClientRequest::JoinWorld(request) => {
                let endpoint_id = self.gateway.join_world(session, request.target).await?;
                debug!("세션 {} 입장 대기: 엔드포인트 {}", session.id(), endpoint_id);
                Ok(())
            }
            ClientRequest::Logout => {
                self.gateway.logout(session).await?;
                Ok(())
            }
            ClientRequest::Game(frame) => self.gateway.forward(session, frame),
        }
    }
}
