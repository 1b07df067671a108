//! 게이트웨이 서비스 레이어
//!
//! 세션 상태 머신과 레지스트리들을 정의합니다.
//!
//! # 서비스 구조
//!
//! ```text
//! Service Layer
//! ├── GatewayService (세션 상태 전이)
//! │   ├── 로그인 / 재연결 / 로그아웃
//! │   ├── 월드 입장 / 입장 완료
//! │   ├── 게임 메시지 전달 / push 전달
//! │   └── 세션 정리
//! ├── ConnectionRegistry (연결/사용자 매핑)
//! │   ├── 사용자 바인딩과 세션 교체
//! │   └── 트래픽 남용 감시
//! ├── WorldRegistry (월드 엔드포인트)
//! │   ├── 등록 / 제거
//! │   └── 부하 등급 선택
//! ├── Session (연결별 상태)
//! ├── AuthService (토큰 검증)
//! └── HeartbeatService (주기적 세션 정리)
//! ```

/// 토큰 검증
pub mod auth_service;

/// 연결 / 사용자 레지스트리
pub mod connection_registry;

/// 세션 상태 전이
pub mod gateway_service;

/// 주기적 세션 정리
pub mod heartbeat_service;

/// 연결별 세션 상태
pub mod session;

/// 트래픽 카운터
pub mod traffic;

/// 월드 엔드포인트 레지스트리
pub mod world_registry;

pub use auth_service::{AuthService, Claims};
pub use connection_registry::{BindMode, BindOutcome, ConnectionRegistry, RegistryStats, UserLockGuard};
pub use gateway_service::{GatewayService, SweepReport};
pub use heartbeat_service::{HeartbeatService, HeartbeatStats};
pub use session::{
    Delivery, EndpointId, LinkState, Session, SessionId, SessionPhase, SessionSnapshot, UnsentOutbound,
};
pub use traffic::{TrafficSample, TrafficVerdict};
pub use world_registry::{LoadTier, WorldEndpoint, WorldLink, WorldRegistry};
