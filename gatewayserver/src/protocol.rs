//! 클라이언트 ↔ 게이트웨이 프로토콜
//!
//! 프레임 구조는 `shared::protocol::Frame`을 그대로 사용하고,
//! 게이트웨이가 직접 처리하는 메시지의 본문은 JSON입니다.
//!
//! ```text
//! [4바이트 길이][2바이트 메시지 ID][JSON 또는 불투명 페이로드]
//! ```
//!
//! 1000번 이상 ID는 게임 메시지로, 내용을 해석하지 않고 월드로 전달합니다.

use serde::{Deserialize, Serialize};

use shared::protocol::ids::{self, client};
use shared::protocol::Frame;

use crate::tool::error::{GatewayError, GatewayResult};

/// 로그인 / 재연결 요청 본문
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub user_id: u64,
    pub token: String,
    pub zone_id: u32,
}

/// 로그인 응답
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct LoginResponse {
    pub user_id: u64,
    pub session_id: u64,
    /// 이전 세션에서 넘겨받은 월드 바인딩
    pub bound_endpoint: Option<u32>,
}

/// 재연결 응답
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ReconnectResponse {
    pub user_id: u64,
    pub session_id: u64,
    pub bound_endpoint: Option<u32>,
    /// 재전송된 보관 메시지 수
    pub replayed: usize,
}

/// 월드 목록 항목
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct WorldSummary {
    pub endpoint_id: u32,
    pub address: String,
    pub zone_id: u32,
    pub process_index: u32,
    pub capacity: u32,
    pub players: u32,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct WorldListResponse {
    pub worlds: Vec<WorldSummary>,
}

/// 월드 입장 대상
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum JoinTarget {
    Endpoint(u32),
    /// 부하 등급으로 자동 선택
    Quick,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct JoinWorldRequest {
    pub target: JoinTarget,
}

/// 월드 입장 결과 (월드 측 완료 신호 이후 전송)
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct JoinWorldResponse {
    pub endpoint_id: u32,
    pub accepted: bool,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct HeartbeatAck {
    pub timestamp: i64,
}

/// 강제 종료 알림
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct KickNotice {
    pub reason: String,
}

/// 요청 실패 알림
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ErrorNotice {
    /// 실패한 요청의 메시지 ID
    pub request_id: u16,
    pub code: u16,
    pub message: String,
}

/// 월드 노드 이탈 알림
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct WorldUnavailableNotice {
    pub endpoint_id: u32,
}

/// 클라이언트 요청 (닫힌 집합)
#[derive(Debug, Clone, PartialEq)]
pub enum ClientRequest {
    Heartbeat,
    Login(Credentials),
    Reconnect(Credentials),
    WorldList,
    JoinWorld(JoinWorldRequest),
    Logout,
    /// 월드로 전달할 게임 메시지
    Game(Frame),
}

impl ClientRequest {
    /// 프레임을 요청으로 해석합니다.
    ///
    /// 게이트웨이 로컬 범위의 알 수 없는 ID는 `Unrouted`로 거부합니다.
    pub fn from_frame(frame: Frame) -> GatewayResult<Self> {
        if ids::is_game_message(frame.msg_id) {
            return Ok(ClientRequest::Game(frame));
        }

        let request = match frame.msg_id {
            client::HEARTBEAT => ClientRequest::Heartbeat,
            client::LOGIN_REQ => ClientRequest::Login(parse(&frame)?),
            client::RECONNECT_REQ => ClientRequest::Reconnect(parse(&frame)?),
            client::WORLD_LIST_REQ => ClientRequest::WorldList,
            client::JOIN_WORLD_REQ => ClientRequest::JoinWorld(parse(&frame)?),
            client::LOGOUT_REQ => ClientRequest::Logout,
            other => return Err(GatewayError::Unrouted(other)),
        };
        Ok(request)
    }

    /// 요청의 메시지 ID
    pub fn msg_id(&self) -> u16 {
        match self {
            ClientRequest::Heartbeat => client::HEARTBEAT,
            ClientRequest::Login(_) => client::LOGIN_REQ,
            ClientRequest::Reconnect(_) => client::RECONNECT_REQ,
            ClientRequest::WorldList => client::WORLD_LIST_REQ,
            ClientRequest::JoinWorld(_) => client::JOIN_WORLD_REQ,
            ClientRequest::Logout => client::LOGOUT_REQ,
            ClientRequest::Game(frame) => frame.msg_id,
        }
    }
}

fn parse<T: serde::de::DeserializeOwned>(frame: &Frame) -> GatewayResult<T> {
    frame
        .parse_json()
        .map_err(|e| GatewayError::Protocol(format!("메시지 {} 본문 해석 실패: {}", frame.msg_id, e)))
}

/// 서버 → 클라이언트 프레임 생성 헬퍼
pub struct Reply;

impl Reply {
    pub fn heartbeat_ack() -> GatewayResult<Frame> {
        json(
            client::HEARTBEAT_ACK,
            &HeartbeatAck {
                timestamp: chrono::Utc::now().timestamp(),
            },
        )
    }

    pub fn login(body: &LoginResponse) -> GatewayResult<Frame> {
        json(client::LOGIN_RESP, body)
    }

    pub fn reconnect(body: &ReconnectResponse) -> GatewayResult<Frame> {
        json(client::RECONNECT_RESP, body)
    }

    pub fn world_list(worlds: Vec<WorldSummary>) -> GatewayResult<Frame> {
        json(client::WORLD_LIST_RESP, &WorldListResponse { worlds })
    }

    pub fn join_world(endpoint_id: u32, accepted: bool) -> GatewayResult<Frame> {
        json(
            client::JOIN_WORLD_RESP,
            &JoinWorldResponse {
                endpoint_id,
                accepted,
            },
        )
    }

    pub fn kick(reason: &str) -> GatewayResult<Frame> {
        json(
            client::KICK_NOTICE,
            &KickNotice {
                reason: reason.to_string(),
            },
        )
    }

    pub fn error(request_id: u16, error: &GatewayError) -> GatewayResult<Frame> {
        json(
            client::ERROR_NOTICE,
            &ErrorNotice {
                request_id,
                code: error.code(),
                message: error.to_string(),
            },
        )
    }

    pub fn world_unavailable(endpoint_id: u32) -> GatewayResult<Frame> {
        json(
            client::WORLD_UNAVAILABLE,
            &WorldUnavailableNotice { endpoint_id },
        )
    }
}

fn json<T: Serialize>(msg_id: u16, body: &T) -> GatewayResult<Frame> {
    Frame::json(msg_id, body).map_err(GatewayError::from)
}
