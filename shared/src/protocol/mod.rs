//! 전송 프로토콜
//!
//! 클라이언트 연결과 게이트웨이⇄월드 링크가 같은 프레임 구조를 공유합니다.

pub mod frame;
pub mod ids;
pub mod link;

pub use frame::{Frame, MAX_FRAME_SIZE};
pub use link::{EndpointRegistration, Envelope, JoinOutcome, JoinTicket, LinkMessage};
