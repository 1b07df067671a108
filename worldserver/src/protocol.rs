//! 월드가 직접 해석하는 게임 메시지 본문
//!
//! 채팅 관련 메시지만 월드 서버가 내용을 봅니다. 나머지 게임 메시지는
//! 게임 로직에 그대로 넘깁니다.

use serde::{Deserialize, Serialize};

use shared::protocol::ids::game;
use shared::protocol::Frame;

use crate::service::chat_admission::{AdmissionDecision, ChatChannel, RejectReason};
use crate::tool::error::{WorldError, WorldResult};

/// 채팅 요청 (ZONE_CHAT / WORLD_CHAT)
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ChatRequest {
    pub text: String,
}

/// 대기 중인 채팅 재시도 요청 (CHAT_RETRY)
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ChatRetryRequest {
    pub channel: ChatChannel,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ChatStatusKind {
    Retry,
    Rejected,
    Expired,
}

/// 허용되지 않은 채팅의 상태 알림 (CHAT_STATUS)
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ChatStatus {
    pub channel: ChatChannel,
    pub status: ChatStatusKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rank: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<RejectReason>,
}

impl ChatStatus {
    /// 허용되지 않은 판정을 알림으로 바꿉니다. 허용이면 None.
    pub fn from_decision(channel: ChatChannel, decision: AdmissionDecision) -> Option<Self> {
        let (status, rank, reason) = match decision {
            AdmissionDecision::Admitted => return None,
            AdmissionDecision::Retry { rank } => (ChatStatusKind::Retry, Some(rank), None),
            AdmissionDecision::Rejected(reason) => (ChatStatusKind::Rejected, None, Some(reason)),
            AdmissionDecision::Expired => (ChatStatusKind::Expired, None, None),
        };
        Some(Self {
            channel,
            status,
            rank,
            reason,
        })
    }

    pub fn to_frame(&self) -> WorldResult<Frame> {
        Ok(Frame::json(game::CHAT_STATUS, self)?)
    }
}

/// 허용된 채팅 방송 (CHAT_BROADCAST)
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ChatBroadcast {
    pub channel: ChatChannel,
    pub from: u64,
    pub text: String,
}

pub fn parse<T: serde::de::DeserializeOwned>(frame_msg_id: u16, payload: &[u8]) -> WorldResult<T> {
    serde_json::from_slice(payload)
        .map_err(|e| WorldError::BadRequest(format!("메시지 {} 본문 해석 실패: {}", frame_msg_id, e)))
}
