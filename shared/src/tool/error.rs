//! 통합 에러 처리 시스템
//!
//! 공유 저장소, 프로토콜, 설정 계층에서 발생하는 에러를 정의합니다.
//! 서버별 비즈니스 에러는 각 서버 크레이트에서 따로 정의합니다.

use thiserror::Error;
use tracing::{error, info, warn};

/// 공통 애플리케이션 에러 정의
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AppError {
    // 저장소 관련 에러
    #[error("Redis 연결 실패: {0}")]
    RedisConnection(String),

    #[error("Redis 에러: {0}")]
    RedisError(String),

    #[error("타임아웃: {0}")]
    Timeout(String),

    // 프로토콜 관련 에러
    #[error("프레임 크기 초과: {size}바이트 (최대 {max}바이트)")]
    FrameTooLarge { size: usize, max: usize },

    #[error("잘못된 형식: {0}")]
    InvalidFormat(String),

    #[error("알 수 없는 메시지 ID: {0}")]
    UnknownMessage(u16),

    #[error("연결 종료됨")]
    ConnectionClosed,

    // 설정 관련 에러
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("내부 서버 에러: {0}")]
    InternalError(String),
}

impl AppError {
    /// 에러의 심각도를 반환합니다.
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            AppError::RedisConnection(_) | AppError::Configuration(_) => ErrorSeverity::Critical,
            AppError::RedisError(_) | AppError::InternalError(_) => ErrorSeverity::High,
            AppError::Timeout(_)
            | AppError::FrameTooLarge { .. }
            | AppError::InvalidFormat(_)
            | AppError::UnknownMessage(_) => ErrorSeverity::Medium,
            AppError::ConnectionClosed => ErrorSeverity::Low,
        }
    }

    /// 저장소 왕복 타임아웃 여부
    pub fn is_timeout(&self) -> bool {
        matches!(self, AppError::Timeout(_))
    }

    /// 에러를 로깅합니다.
    ///
    /// 심각도에 따라 적절한 로깅 레벨을 사용합니다.
    pub fn log(&self, context: &str) {
        let error_msg = self.to_string();

        match self.severity() {
            ErrorSeverity::Critical => error!("[CRITICAL] {} - {}", context, error_msg),
            ErrorSeverity::High => error!("[HIGH] {} - {}", context, error_msg),
            ErrorSeverity::Medium => warn!("[MEDIUM] {} - {}", context, error_msg),
            ErrorSeverity::Low => info!("[LOW] {} - {}", context, error_msg),
        }
    }
}

/// 에러 심각도 레벨
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorSeverity {
    Critical, // 시스템 장애
    High,     // 기능 실패
    Medium,   // 입력/프로토콜 오류
    Low,      // 일반적인 경고
}

impl From<redis::RedisError> for AppError {
    fn from(err: redis::RedisError) -> Self {
        if err.is_connection_dropped() || err.is_connection_refusal() || err.is_io_error() {
            AppError::RedisConnection(err.to_string())
        } else if err.is_timeout() {
            AppError::Timeout(err.to_string())
        } else {
            AppError::RedisError(err.to_string())
        }
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::InvalidFormat(err.to_string())
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::UnexpectedEof
            | std::io::ErrorKind::ConnectionReset
            | std::io::ErrorKind::ConnectionAborted
            | std::io::ErrorKind::BrokenPipe => AppError::ConnectionClosed,
            _ => AppError::InternalError(err.to_string()),
        }
    }
}

/// 결과 타입 별칭
pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_severity() {
        assert_eq!(
            AppError::RedisConnection("down".into()).severity(),
            ErrorSeverity::Critical
        );
        assert_eq!(AppError::Timeout("zadd".into()).severity(), ErrorSeverity::Medium);
        assert_eq!(AppError::ConnectionClosed.severity(), ErrorSeverity::Low);
    }

    #[test]
    fn test_io_error_conversion() {
        let eof = std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "eof");
        assert_eq!(AppError::from(eof), AppError::ConnectionClosed);

        let other = std::io::Error::new(std::io::ErrorKind::Other, "boom");
        assert!(matches!(AppError::from(other), AppError::InternalError(_)));
    }

    #[test]
    fn test_timeout_detection() {
        assert!(AppError::Timeout("incr".into()).is_timeout());
        assert!(!AppError::RedisError("wrongtype".into()).is_timeout());
    }
}
