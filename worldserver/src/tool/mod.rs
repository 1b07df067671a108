//! 월드 서버 공통 유틸리티 모듈

pub mod error;

pub use error::{ErrorHandler, WorldError, WorldResult};
