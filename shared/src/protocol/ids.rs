//! 메시지 ID 테이블
//!
//! - `0..1000`: 게이트웨이가 직접 처리하는 클라이언트 메시지
//! - `100..200`: 게이트웨이⇄월드 내부 링크 전용 (클라이언트 연결에는 나타나지 않음)
//! - `1000..`: 게임 메시지, 게이트웨이는 내용을 보지 않고 월드로 전달

/// 클라이언트 ↔ 게이트웨이 메시지 ID
pub mod client {
    pub const HEARTBEAT: u16 = 1;
    pub const HEARTBEAT_ACK: u16 = 2;
    pub const LOGIN_REQ: u16 = 10;
    pub const LOGIN_RESP: u16 = 11;
    pub const RECONNECT_REQ: u16 = 12;
    pub const RECONNECT_RESP: u16 = 13;
    pub const WORLD_LIST_REQ: u16 = 14;
    pub const WORLD_LIST_RESP: u16 = 15;
    pub const JOIN_WORLD_REQ: u16 = 16;
    pub const JOIN_WORLD_RESP: u16 = 17;
    pub const LOGOUT_REQ: u16 = 18;
    pub const KICK_NOTICE: u16 = 19;
    pub const ERROR_NOTICE: u16 = 20;
    pub const WORLD_UNAVAILABLE: u16 = 21;
}

/// 게이트웨이 ⇄ 월드 내부 링크 메시지 ID
pub mod link {
    pub const REGISTER_ENDPOINT: u16 = 100;
    pub const REGISTER_ACK: u16 = 101;
    pub const FORWARD: u16 = 102;
    pub const PUSH: u16 = 103;
    pub const JOIN_REQUEST: u16 = 104;
    pub const JOIN_RESULT: u16 = 105;
    pub const PLAYER_LEAVE: u16 = 106;
    pub const REBIND: u16 = 107;
    pub const LOAD_REPORT: u16 = 108;
    pub const KICK_USER: u16 = 109;
}

/// 게임 메시지 ID (월드 처리)
pub mod game {
    pub const ZONE_CHAT: u16 = 1001;
    pub const WORLD_CHAT: u16 = 1002;
    pub const CHAT_STATUS: u16 = 1003;
    pub const CHAT_RETRY: u16 = 1004;
    pub const CHAT_BROADCAST: u16 = 1005;
}

/// 게임 메시지 시작 ID
pub const GAME_MSG_BASE: u16 = 1000;

/// 게이트웨이가 직접 처리하지 않는(월드로 전달할) 메시지인지 확인
pub fn is_game_message(msg_id: u16) -> bool {
    msg_id >= GAME_MSG_BASE
}
