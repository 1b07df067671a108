//! 게이트웨이 서버 라이브러리
//!
//! 클라이언트 TCP 연결을 받아 인증하고, 세션 상태를 추적하며,
//! 게임 메시지를 월드 노드로 전달하고 월드의 push를 클라이언트로 돌려줍니다.
//!
//! # 주요 기능
//!
//! - **세션 상태 머신**: 인증, 월드 바인딩, 끊김/재연결과 보관 메시지 재전송
//! - **사용자 바인딩**: 한 사용자 ID는 언제나 최대 한 세션만 소유
//! - **월드 엔드포인트 관리**: 등록/제거, 부하 등급 기반 선택
//! - **트래픽 감시**: 평균 전송률 기반 감사 로그와 강제 종료
//!
//! # 아키텍처
//!
//! ```text
//! Gateway Server
//! ├── Handler Layer
//! │   ├── ConnectionHandler (클라이언트 연결)
//! │   ├── MessageHandler (로컬 처리 / 월드 전달)
//! │   └── WorldLinkHandler (월드 노드 링크)
//! ├── Service Layer
//! │   ├── GatewayService (세션 전이)
//! │   ├── ConnectionRegistry (연결/사용자 매핑)
//! │   ├── WorldRegistry (월드 엔드포인트)
//! │   ├── AuthService (토큰 검증)
//! │   └── HeartbeatService (세션 정리)
//! ├── Tool Layer
//! │   └── Error (에러 처리)
//! └── Protocol (클라이언트 메시지)
//! ```

/// 환경 설정 관리
pub mod config;

/// 클라이언트 ↔ 게이트웨이 메시지
pub mod protocol;

/// 세션 상태 머신과 레지스트리
pub mod service;

/// 연결/메시지/월드 링크 핸들러
pub mod handler;

/// 서버 실행 단위
pub mod server;

/// 공통 유틸리티 도구들
pub mod tool;

/// 통합 테스트 모듈
#[cfg(test)]
mod tests;

pub use config::{validate_config, GatewayConfig};
pub use protocol::{ClientRequest, Credentials, Reply};
pub use server::GatewayServer;
pub use service::{ConnectionRegistry, GatewayService, HeartbeatService, Session, WorldRegistry};
pub use tool::error::{GatewayError, GatewayResult};
