//! 월드 핸들러 레이어
//!
//! 게이트웨이 링크 접속과 링크 메시지 라우팅을 처리합니다.

pub mod gateway_link;
pub mod message_table;
pub mod world_router;

pub use gateway_link::{GatewayConnector, GatewayInbound};
pub use message_table::{MessageTable, RouteOutcome, WorldMessageKind};
pub use world_router::WorldRouter;
