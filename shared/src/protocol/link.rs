//! 게이트웨이 ⇄ 월드 내부 링크 메시지
//!
//! 사용자 단위 메시지(`Forward` / `Push`)는 고정 길이 바이너리 헤더를 쓰고,
//! 나머지 제어 메시지는 JSON 본문을 사용합니다.
//!
//! ```text
//! Forward / Push: [8바이트 user_id][8바이트 generation][2바이트 msg_id][페이로드]
//! ```

use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

use super::frame::Frame;
use super::ids::link;
use crate::tool::error::{AppError, AppResult};

const ENVELOPE_HEADER_SIZE: usize = 8 + 8 + 2;

/// 사용자 단위로 전달되는 게임 메시지 봉투
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub user_id: u64,
    /// 바인딩 세대 번호, 오래된 세션의 메시지를 걸러내는 데 사용
    pub generation: u64,
    pub msg_id: u16,
    pub payload: Bytes,
}

impl Envelope {
    pub fn new(user_id: u64, generation: u64, msg_id: u16, payload: impl Into<Bytes>) -> Self {
        Self {
            user_id,
            generation,
            msg_id,
            payload: payload.into(),
        }
    }

    /// 내부 게임 프레임으로 변환 (클라이언트에 그대로 쓸 수 있는 형태)
    pub fn to_client_frame(&self) -> Frame {
        Frame::new(self.msg_id, self.payload.clone())
    }

    fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(ENVELOPE_HEADER_SIZE + self.payload.len());
        buf.put_u64(self.user_id);
        buf.put_u64(self.generation);
        buf.put_u16(self.msg_id);
        buf.put_slice(&self.payload);
        buf.freeze()
    }

    fn decode(mut data: Bytes) -> AppResult<Self> {
        if data.len() < ENVELOPE_HEADER_SIZE {
            return Err(AppError::InvalidFormat(format!(
                "봉투 헤더가 너무 짧습니다: {}바이트",
                data.len()
            )));
        }
        let user_id = data.get_u64();
        let generation = data.get_u64();
        let msg_id = data.get_u16();
        Ok(Self {
            user_id,
            generation,
            msg_id,
            payload: data,
        })
    }
}

/// 월드 노드 등록 정보
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointRegistration {
    pub endpoint_id: u32,
    pub address: String,
    pub zone_id: u32,
    pub process_index: u32,
    pub capacity: u32,
    pub players: u32,
    pub owned_msg_ids: Vec<u16>,
}

/// 월드 입장 요청
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinTicket {
    pub user_id: u64,
    pub session_id: u64,
    pub generation: u64,
}

/// 월드 입장 결과
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinOutcome {
    pub user_id: u64,
    pub session_id: u64,
    pub generation: u64,
    pub accepted: bool,
    pub players: u32,
}

/// 내부 링크 메시지
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkMessage {
    RegisterEndpoint(EndpointRegistration),
    RegisterAck { gateway_id: String },
    Forward(Envelope),
    Push(Envelope),
    JoinRequest(JoinTicket),
    JoinResult(JoinOutcome),
    PlayerLeave { user_id: u64, generation: u64, reason: String },
    Rebind { user_id: u64, generation: u64 },
    LoadReport { players: u32 },
    KickUser { user_id: u64, reason: String },
}

#[derive(Serialize, Deserialize)]
struct RegisterAckBody {
    gateway_id: String,
}

#[derive(Serialize, Deserialize)]
struct PlayerLeaveBody {
    user_id: u64,
    generation: u64,
    reason: String,
}

#[derive(Serialize, Deserialize)]
struct RebindBody {
    user_id: u64,
    generation: u64,
}

#[derive(Serialize, Deserialize)]
struct LoadReportBody {
    players: u32,
}

#[derive(Serialize, Deserialize)]
struct KickUserBody {
    user_id: u64,
    reason: String,
}

impl LinkMessage {
    /// 메시지 종류 이름 (로깅용)
    pub fn kind(&self) -> &'static str {
        match self {
            LinkMessage::RegisterEndpoint(_) => "register_endpoint",
            LinkMessage::RegisterAck { .. } => "register_ack",
            LinkMessage::Forward(_) => "forward",
            LinkMessage::Push(_) => "push",
            LinkMessage::JoinRequest(_) => "join_request",
            LinkMessage::JoinResult(_) => "join_result",
            LinkMessage::PlayerLeave { .. } => "player_leave",
            LinkMessage::Rebind { .. } => "rebind",
            LinkMessage::LoadReport { .. } => "load_report",
            LinkMessage::KickUser { .. } => "kick_user",
        }
    }

    /// 특정 사용자에 대한 메시지면 그 사용자 ID
    pub fn user_id(&self) -> Option<u64> {
        match self {
            LinkMessage::Forward(envelope) | LinkMessage::Push(envelope) => Some(envelope.user_id),
            LinkMessage::JoinRequest(ticket) => Some(ticket.user_id),
            LinkMessage::JoinResult(outcome) => Some(outcome.user_id),
            LinkMessage::PlayerLeave { user_id, .. }
            | LinkMessage::Rebind { user_id, .. }
            | LinkMessage::KickUser { user_id, .. } => Some(*user_id),
            LinkMessage::RegisterEndpoint(_)
            | LinkMessage::RegisterAck { .. }
            | LinkMessage::LoadReport { .. } => None,
        }
    }

    pub fn to_frame(&self) -> AppResult<Frame> {
        let frame = match self {
            LinkMessage::RegisterEndpoint(reg) => Frame::json(link::REGISTER_ENDPOINT, reg)?,
            LinkMessage::RegisterAck { gateway_id } => Frame::json(
                link::REGISTER_ACK,
                &RegisterAckBody {
                    gateway_id: gateway_id.clone(),
                },
            )?,
            LinkMessage::Forward(env) => Frame::new(link::FORWARD, env.encode()),
            LinkMessage::Push(env) => Frame::new(link::PUSH, env.encode()),
            LinkMessage::JoinRequest(ticket) => Frame::json(link::JOIN_REQUEST, ticket)?,
            LinkMessage::JoinResult(outcome) => Frame::json(link::JOIN_RESULT, outcome)?,
            LinkMessage::PlayerLeave {
                user_id,
                generation,
                reason,
            } => Frame::json(
                link::PLAYER_LEAVE,
                &PlayerLeaveBody {
                    user_id: *user_id,
                    generation: *generation,
                    reason: reason.clone(),
                },
            )?,
            LinkMessage::Rebind {
                user_id,
                generation,
            } => Frame::json(
                link::REBIND,
                &RebindBody {
                    user_id: *user_id,
                    generation: *generation,
                },
            )?,
            LinkMessage::LoadReport { players } => {
                Frame::json(link::LOAD_REPORT, &LoadReportBody { players: *players })?
            }
            LinkMessage::KickUser { user_id, reason } => Frame::json(
                link::KICK_USER,
                &KickUserBody {
                    user_id: *user_id,
                    reason: reason.clone(),
                },
            )?,
        };
        Ok(frame)
    }

    pub fn from_frame(frame: &Frame) -> AppResult<Self> {
        let message = match frame.msg_id {
            link::REGISTER_ENDPOINT => LinkMessage::RegisterEndpoint(frame.parse_json()?),
            link::REGISTER_ACK => {
                let body: RegisterAckBody = frame.parse_json()?;
                LinkMessage::RegisterAck {
                    gateway_id: body.gateway_id,
                }
            }
            link::FORWARD => LinkMessage::Forward(Envelope::decode(frame.payload.clone())?),
            link::PUSH => LinkMessage::Push(Envelope::decode(frame.payload.clone())?),
            link::JOIN_REQUEST => LinkMessage::JoinRequest(frame.parse_json()?),
            link::JOIN_RESULT => LinkMessage::JoinResult(frame.parse_json()?),
            link::PLAYER_LEAVE => {
                let body: PlayerLeaveBody = frame.parse_json()?;
                LinkMessage::PlayerLeave {
                    user_id: body.user_id,
                    generation: body.generation,
                    reason: body.reason,
                }
            }
            link::REBIND => {
                let body: RebindBody = frame.parse_json()?;
                LinkMessage::Rebind {
                    user_id: body.user_id,
                    generation: body.generation,
                }
            }
            link::LOAD_REPORT => {
                let body: LoadReportBody = frame.parse_json()?;
                LinkMessage::LoadReport {
                    players: body.players,
                }
            }
            link::KICK_USER => {
                let body: KickUserBody = frame.parse_json()?;
                LinkMessage::KickUser {
                    user_id: body.user_id,
                    reason: body.reason,
                }
            }
            other => return Err(AppError::UnknownMessage(other)),
        };
        Ok(message)
    }
}
