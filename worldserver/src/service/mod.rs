//! 월드 서비스 레이어
//!
//! ```text
//! Service Layer
//! ├── WorldSession (입장 플레이어와 게이트웨이 링크)
//! ├── ChatAdmissions (범위별 채팅 허용 제어)
//! ├── GameLogic (게임 규칙 경계)
//! └── QueueSweeper (대기열 만료 정리)
//! ```

/// 채팅 허용 제어
pub mod chat_admission;

/// 게임 로직 트레이트
pub mod game_logic;

/// 대기열 만료 정리
pub mod queue_sweeper;

/// 월드 세션
pub mod world_session;

pub use chat_admission::{
    AdmissionDecision, ChatAdmission, ChatAdmissions, ChatChannel, ChatScope, RejectReason,
};
pub use game_logic::{DefaultGameLogic, GameLogic};
pub use queue_sweeper::{QueueSweeper, SweepStats};
pub use world_session::{GatewayLink, PlayerEntry, WorldHandle, WorldSession};
