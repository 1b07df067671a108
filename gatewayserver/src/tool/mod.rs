//! 게이트웨이 공통 유틸리티 모듈
//!
//! 에러 처리 등 공통 기능을 제공합니다.

pub mod error;

pub use error::{AuthFailure, ErrorHandler, ErrorSeverity, GatewayError, GatewayResult};
