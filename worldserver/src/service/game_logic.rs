//! 게임 로직 경계
//!
//! 월드 라우터가 채팅 이외의 게임 메시지와 플레이어 생명주기 이벤트를 넘기는 지점입니다.
//! 실제 게임 규칙은 이 트레이트를 구현해 끼워 넣습니다.

use async_trait::async_trait;
use bytes::Bytes;
use tracing::{debug, info};

use shared::protocol::ids::game;
use shared::protocol::Frame;

use crate::protocol::ChatBroadcast;
use crate::service::chat_admission::{ChatChannel, ChatScope};
use crate::service::world_session::WorldHandle;
use crate::tool::error::WorldResult;

/// 게임 로직 트레이트
#[async_trait]
pub trait GameLogic: Send + Sync {
    /// 플레이어가 보낸 게임 메시지
    async fn deliver_to_player(&self, user_id: u64, msg_id: u16, payload: Bytes) -> WorldResult<()>;

    /// 입장 요청 시 플레이어 데이터가 준비되어 있는지
    fn player_exists(&self, user_id: u64) -> bool;

    /// 허용된 채팅 방송. 전달된 플레이어 수를 반환합니다.
    async fn broadcast_chat(&self, scope: ChatScope, from: u64, text: &str) -> WorldResult<usize>;

    /// 플레이어가 월드를 떠남
    async fn player_offline(&self, user_id: u64, reason: &str);
}

/// 기본 게임 로직
///
/// 게임 메시지는 로그만 남기고, 채팅은 입장한 모든 플레이어에게 방송합니다.
pub struct DefaultGameLogic {
    handle: WorldHandle,
}

impl DefaultGameLogic {
    pub fn new(handle: WorldHandle) -> Self {
        Self { handle }
    }
}

#[async_trait]
impl GameLogic for DefaultGameLogic {
    async fn deliver_to_player(&self, user_id: u64, msg_id: u16, payload: Bytes) -> WorldResult<()> {
        debug!(
            "게임 메시지 수신: 사용자 {} ID {} ({} bytes)",
            user_id,
            msg_id,
            payload.len()
        );
        Ok(())
    }

    fn player_exists(&self, _user_id: u64) -> bool {
        true
    }

    async fn broadcast_chat(&self, scope: ChatScope, from: u64, text: &str) -> WorldResult<usize> {
        let channel = match scope {
            ChatScope::World => ChatChannel::World,
            ChatScope::Zone(_) => ChatChannel::Zone,
        };
        let frame = Frame::json(
            game::CHAT_BROADCAST,
            &ChatBroadcast {
                channel,
                from,
                text: text.to_string(),
            },
        )?;
        let delivered = self.handle.broadcast(game::CHAT_BROADCAST, frame.payload);
        debug!("[{}] 채팅 방송: 사용자 {} → {}명", scope, from, delivered);
        Ok(delivered)
    }

    async fn player_offline(&self, user_id: u64, reason: &str) {
        info!(
            "플레이어 {} 퇴장 ({}), 남은 인원 {}명",
            user_id,
            reason,
            self.handle.player_count()
        );
    }
}
