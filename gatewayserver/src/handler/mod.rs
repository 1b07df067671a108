//! 게이트웨이 핸들러 레이어
//!
//! 클라이언트 연결, 클라이언트 메시지, 월드 링크를 처리합니다.

pub mod connection_handler;
pub mod message_handler;
pub mod world_link_handler;

pub use connection_handler::ConnectionHandler;
pub use message_handler::MessageHandler;
pub use world_link_handler::{WorldInbound, WorldLinkHandler};
