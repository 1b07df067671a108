//! 월드 라우터
//!
//! 게이트웨이 링크로 들어온 메시지를 처리합니다.
//!
//! - 입장 요청: 정원과 게임 로직 확인 후 `JoinResult` 회신
//! - 전달 메시지: 세대 확인 → 메시지 테이블 조회 → 채팅 허용 제어 또는 게임 로직
//! - 이탈 / 재바인딩: 월드 세션 갱신
//!
//! 허용되지 않은 채팅은 `CHAT_STATUS`로 알리고, 재시도 대상이면 본문을 보관했다가
//! `CHAT_RETRY`로 허용되는 순간 방송합니다.

use std::sync::Arc;

use dashmap::DashMap;
use tracing::{debug, info, warn};

use shared::protocol::{Envelope, JoinOutcome, JoinTicket, LinkMessage};

use crate::handler::message_table::{MessageTable, RouteOutcome, WorldMessageKind};
use crate::protocol::{parse, ChatRequest, ChatRetryRequest, ChatStatus};
use crate::service::chat_admission::{AdmissionDecision, ChatAdmissions, ChatChannel};
use crate::service::game_logic::GameLogic;
use crate::service::world_session::WorldSession;
use crate::tool::error::{ErrorHandler, WorldError, WorldResult};

/// 월드 라우터
pub struct WorldRouter {
    session: Arc<WorldSession>,
    table: MessageTable,
    chats: Arc<ChatAdmissions>,
    logic: Arc<dyn GameLogic>,
    /// 재시도 대기 중인 채팅 본문
    pending: DashMap<(ChatChannel, u64), String>,
}

impl WorldRouter {
    pub fn new(
        session: Arc<WorldSession>,
        table: MessageTable,
        chats: Arc<ChatAdmissions>,
        logic: Arc<dyn GameLogic>,
    ) -> Self {
        Self {
            session,
            table,
            chats,
            logic,
            pending: DashMap::new(),
        }
    }

    pub fn session(&self) -> &Arc<WorldSession> {
        &self.session
    }

    pub fn chats(&self) -> &Arc<ChatAdmissions> {
        &self.chats
    }

    /// 보관 중인 재시도 채팅 수
    pub fn pending_chat_count(&self) -> usize {
        self.pending.len()
    }

    /// 게이트웨이 링크 메시지 처리
    pub async fn dispatch(&self, gateway_id: &str, message: LinkMessage) {
        match message {
            LinkMessage::JoinRequest(ticket) => {
                let outcome = self.handle_join(gateway_id, &ticket);
                if let Err(e) = self.reply(gateway_id, &LinkMessage::JoinResult(outcome)) {
                    ErrorHandler::log(&e, "WorldRouter", "join_result");
                }
            }
            LinkMessage::Forward(envelope) => {
                self.route_forward(envelope).await;
            }
            LinkMessage::PlayerLeave {
                user_id,
                generation,
                reason,
            } => {
                if self.session.leave(user_id, generation).is_some() {
                    self.release_player(user_id, &reason).await;
                }
            }
            LinkMessage::Rebind {
                user_id,
                generation,
            } => {
                self.session.rebind(gateway_id, user_id, generation);
            }
            other => warn!(
                "게이트웨이 {}에서 예상하지 못한 링크 메시지: {}",
                gateway_id,
                other.kind()
            ),
        }
    }

    fn handle_join(&self, gateway_id: &str, ticket: &JoinTicket) -> JoinOutcome {
        if !self.logic.player_exists(ticket.user_id) {
            warn!("게임 데이터 없는 사용자 입장 거절: {}", ticket.user_id);
            return JoinOutcome {
                user_id: ticket.user_id,
                session_id: ticket.session_id,
                generation: ticket.generation,
                accepted: false,
                players: self.session.player_count(),
            };
        }

        let outcome = self.session.accept_join(gateway_id, ticket);
        if outcome.accepted {
            info!(
                "플레이어 입장: 사용자 {} 세대 {} (게이트웨이 {}, {}/{})",
                ticket.user_id,
                ticket.generation,
                gateway_id,
                outcome.players,
                self.session.capacity()
            );
        } else {
            info!("플레이어 입장 거절: 사용자 {}", ticket.user_id);
        }
        outcome
    }

    /// 전달 메시지 처리
    pub async fn route_forward(&self, envelope: Envelope) -> RouteOutcome {
        if let Err(e) = self.session.check_forward(&envelope) {
            ErrorHandler::log(&e, "WorldRouter", "check_forward");
            return RouteOutcome::Dropped;
        }

        let Some(kind) = self.table.lookup(envelope.msg_id) else {
            ErrorHandler::log(
                &WorldError::Unrouted(envelope.msg_id),
                "WorldRouter",
                "route_forward",
            );
            return RouteOutcome::Unrouted(envelope.msg_id);
        };

        let result = match kind {
            WorldMessageKind::ZoneChat | WorldMessageKind::WorldChat => {
                self.handle_chat(&envelope, kind).await
            }
            WorldMessageKind::ChatRetry => self.handle_chat_retry(&envelope).await,
            WorldMessageKind::Game => self
                .logic
                .deliver_to_player(envelope.user_id, envelope.msg_id, envelope.payload.clone())
                .await
                .map(|()| RouteOutcome::Delivered),
        };

        result.unwrap_or_else(|e| {
            ErrorHandler::log(&e, "WorldRouter", "route_forward");
            RouteOutcome::Dropped
        })
    }

    async fn handle_chat(&self, envelope: &Envelope, kind: WorldMessageKind) -> WorldResult<RouteOutcome> {
        let channel = kind
            .chat_channel()
            .ok_or(WorldError::Unrouted(envelope.msg_id))?;
        let request: ChatRequest = parse(envelope.msg_id, &envelope.payload)?;
        let user_id = envelope.user_id;

        let decision = self.chats.get(channel).try_admit(user_id).await;
        match decision {
            AdmissionDecision::Admitted => {
                self.pending.remove(&(channel, user_id));
                self.broadcast(channel, user_id, &request.text).await?;
            }
            AdmissionDecision::Retry { .. } => {
                self.pending.insert((channel, user_id), request.text);
                self.notify_status(user_id, channel, decision)?;
            }
            _ => {
                self.pending.remove(&(channel, user_id));
                self.notify_status(user_id, channel, decision)?;
            }
        }
        Ok(RouteOutcome::Chat(channel, decision))
    }

    async fn handle_chat_retry(&self, envelope: &Envelope) -> WorldResult<RouteOutcome> {
        let request: ChatRetryRequest = parse(envelope.msg_id, &envelope.payload)?;
        let channel = request.channel;
        let user_id = envelope.user_id;

        let decision = self.chats.get(channel).retry_admit(user_id).await;
        match decision {
            AdmissionDecision::Admitted => match self.pending.remove(&(channel, user_id)) {
                Some((_, text)) => {
                    self.broadcast(channel, user_id, &text).await?;
                }
                None => debug!("보관된 채팅 없이 허용됨: 사용자 {}", user_id),
            },
            AdmissionDecision::Retry { .. } => self.notify_status(user_id, channel, decision)?,
            _ => {
                self.pending.remove(&(channel, user_id));
                self.notify_status(user_id, channel, decision)?;
            }
        }
        Ok(RouteOutcome::Chat(channel, decision))
    }

    async fn broadcast(&self, channel: ChatChannel, from: u64, text: &str) -> WorldResult<usize> {
        let scope = self.chats.get(channel).scope();
        self.logic.broadcast_chat(scope, from, text).await
    }

    fn notify_status(&self, user_id: u64, channel: ChatChannel, decision: AdmissionDecision) -> WorldResult<()> {
        let Some(status) = ChatStatus::from_decision(channel, decision) else {
            return Ok(());
        };
        let frame = status.to_frame()?;
        self.session.push(user_id, frame.msg_id, frame.payload)
    }

    fn reply(&self, gateway_id: &str, message: &LinkMessage) -> WorldResult<()> {
        self.session
            .gateway(gateway_id)
            .ok_or_else(|| WorldError::GatewayUnavailable(gateway_id.to_string()))?
            .send(message)
    }

    /// 게이트웨이 링크가 끊겨 사라진 플레이어들 정리
    pub async fn drop_players(&self, user_ids: Vec<u64>, reason: &str) {
        for user_id in user_ids {
            self.release_player(user_id, reason).await;
        }
    }

    async fn release_player(&self, user_id: u64, reason: &str) {
        self.chats.forget(user_id).await;
        self.pending.remove(&(ChatChannel::World, user_id));
        self.pending.remove(&(ChatChannel::Zone, user_id));
        self.logic.player_offline(user_id, reason).await;
    }
}
