//! 월드 메시지 종류 테이블
//!
//! 전달받은 메시지 ID를 닫힌 종류 집합으로 해석합니다.
//! 테이블에 없는 ID는 `Unrouted`로 보고하며 조용히 버리지 않습니다.

use std::collections::HashSet;

use shared::protocol::ids::{self, game};

use crate::service::chat_admission::{AdmissionDecision, ChatChannel};

/// 월드가 처리하는 메시지 종류
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorldMessageKind {
    ZoneChat,
    WorldChat,
    ChatRetry,
    /// 게임 로직으로 넘기는 메시지
    Game,
}

impl WorldMessageKind {
    /// 채팅 요청이면 해당 채널
    pub fn chat_channel(&self) -> Option<ChatChannel> {
        match self {
            WorldMessageKind::ZoneChat => Some(ChatChannel::Zone),
            WorldMessageKind::WorldChat => Some(ChatChannel::World),
            _ => None,
        }
    }
}

/// 고정 메시지 테이블
static FIXED_KINDS: &[(u16, WorldMessageKind)] = &[
    (game::ZONE_CHAT, WorldMessageKind::ZoneChat),
    (game::WORLD_CHAT, WorldMessageKind::WorldChat),
    (game::CHAT_RETRY, WorldMessageKind::ChatRetry),
];

/// 전달 메시지 처리 결과
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteOutcome {
    /// 게임 로직에 전달됨
    Delivered,
    /// 채팅 허용 판정 결과
    Chat(ChatChannel, AdmissionDecision),
    /// 플레이어 없음, 오래된 세대 등으로 버려짐
    Dropped,
    /// 알 수 없는 메시지 ID
    Unrouted(u16),
}

/// 노드별 메시지 테이블
#[derive(Debug, Clone)]
pub struct MessageTable {
    /// 비어 있으면 고정 테이블 외의 게임 메시지를 모두 처리
    game_ids: HashSet<u16>,
}

impl MessageTable {
    pub fn new(game_ids: impl IntoIterator<Item = u16>) -> Self {
        Self {
            game_ids: game_ids.into_iter().collect(),
        }
    }

    pub fn lookup(&self, msg_id: u16) -> Option<WorldMessageKind> {
        if let Some((_, kind)) = FIXED_KINDS.iter().find(|(id, _)| *id == msg_id) {
            return Some(*kind);
        }
        let owned = if self.game_ids.is_empty() {
            ids::is_game_message(msg_id) && !Self::is_server_only(msg_id)
        } else {
            self.game_ids.contains(&msg_id)
        };
        owned.then_some(WorldMessageKind::Game)
    }

    /// 게이트웨이에 등록할 담당 메시지 ID 목록 (비어 있으면 전부 담당)
    pub fn owned_msg_ids(&self) -> Vec<u16> {
        if self.game_ids.is_empty() {
            return Vec::new();
        }
        let mut owned: Vec<u16> = FIXED_KINDS
            .iter()
            .map(|(id, _)| *id)
            .chain(self.game_ids.iter().copied())
            .collect();
        owned.sort_unstable();
        owned.dedup();
        owned
    }

    /// 서버 → 클라이언트 전용 ID
    fn is_server_only(msg_id: u16) -> bool {
        matches!(msg_id, game::CHAT_STATUS | game::CHAT_BROADCAST)
    }
}
