//! 월드 서버 에러 처리
//!
//! 월드 세션, 메시지 라우팅, 채팅 허용 제어에서 발생하는 에러를 정의합니다.

use thiserror::Error;
use tracing::{error, info, warn};

use shared::tool::error::{AppError, ErrorSeverity};

/// 월드 서버 에러 타입
#[derive(Error, Debug, Clone, PartialEq)]
pub enum WorldError {
    #[error("플레이어 없음 [사용자 {0}]")]
    PlayerNotFound(u64),

    #[error("오래된 세대 메시지 [사용자 {user_id}]: {generation} < {current}")]
    StaleGeneration {
        user_id: u64,
        generation: u64,
        current: u64,
    },

    #[error("라우팅 불가 메시지 [ID {0}]")]
    Unrouted(u16),

    #[error("게이트웨이 링크 없음 [{0}]")]
    GatewayUnavailable(String),

    #[error("잘못된 요청 본문: {0}")]
    BadRequest(String),

    #[error(transparent)]
    Shared(#[from] AppError),
}

impl WorldError {
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            WorldError::PlayerNotFound(_) => ErrorSeverity::Low,
            WorldError::StaleGeneration { .. }
            | WorldError::Unrouted(_)
            | WorldError::GatewayUnavailable(_)
            | WorldError::BadRequest(_) => ErrorSeverity::Medium,
            WorldError::Shared(e) => e.severity(),
        }
    }
}

/// 에러 핸들러
pub struct ErrorHandler;

impl ErrorHandler {
    pub fn log(error: &WorldError, component: &str, operation: &str) {
        let log_message = format!("[{}] [{}] {}", component, operation, error);
        match error.severity() {
            ErrorSeverity::Low => info!("{}", log_message),
            ErrorSeverity::Medium => warn!("{}", log_message),
            ErrorSeverity::High => error!("{}", log_message),
            ErrorSeverity::Critical => error!("🚨 CRITICAL: {}", log_message),
        }
    }
}

/// 결과 타입 별칭
pub type WorldResult<T> = Result<T, WorldError>;
