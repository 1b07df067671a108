//! 월드 서버 라이브러리
//!
//! 게이트웨이에 엔드포인트로 등록하고, 게이트웨이가 전달한 게임 메시지를 처리합니다.
//!
//! # 주요 기능
//!
//! - **월드 세션**: 입장 플레이어와 바인딩 세대 추적, 오래된 세션의 메시지 차단
//! - **메시지 테이블**: 채팅 / 게임 메시지 분류, 알 수 없는 ID 보고
//! - **채팅 허용 제어**: 공유 저장소의 대기열과 시간 조각 카운터
//! - **게이트웨이 링크**: 등록, 부하 보고, 재접속
//!
//! # 아키텍처
//!
//! ```text
//! World Server
//! ├── Handler Layer
//! │   ├── GatewayConnector (게이트웨이 링크)
//! │   ├── WorldRouter (링크 메시지 처리)
//! │   └── MessageTable (메시지 종류)
//! ├── Service Layer
//! │   ├── WorldSession / WorldHandle
//! │   ├── ChatAdmissions
//! │   ├── GameLogic
//! │   └── QueueSweeper
//! ├── Tool Layer
//! │   └── Error
//! └── Protocol (채팅 메시지 본문)
//! ```

/// 환경 설정 관리
pub mod config;

/// 채팅 메시지 본문
pub mod protocol;

/// 월드 세션과 채팅 허용 제어
pub mod service;

/// 게이트웨이 링크와 라우팅
pub mod handler;

/// 서버 실행 단위
pub mod server;

/// 공통 유틸리티 도구들
pub mod tool;

#[cfg(test)]
mod tests;

pub use config::{validate_config, ChatLimits, ChatSettings, WorldConfig};
pub use handler::{MessageTable, RouteOutcome, WorldRouter};
pub use server::WorldServer;
pub use service::{AdmissionDecision, ChatChannel, GameLogic, WorldHandle, WorldSession};
pub use tool::error::{WorldError, WorldResult};
