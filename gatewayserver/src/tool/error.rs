//! 게이트웨이 에러 처리 시스템
//!
//! 세션 상태 머신, 월드 바인딩, 트래픽 감시에서 발생하는 에러를 분류합니다.
//! 클라이언트에게 돌려줄 에러 코드와 로그 심각도를 함께 제공합니다.

use thiserror::Error;
use tracing::{error, info, warn};

use shared::tool::error::AppError;

/// 인증 실패 사유
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthFailure {
    #[error("InvalidToken")]
    InvalidToken,
    #[error("ZoneIdError")]
    ZoneIdError,
}

/// 게이트웨이 에러 타입
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GatewayError {
    #[error("인증 실패: {0}")]
    Auth(AuthFailure),

    #[error("중복 세션 [사용자 {0}]")]
    DuplicateSession(u64),

    #[error("월드 사용 불가 [{0}]")]
    WorldUnavailable(String),

    #[error("월드 정원 초과 [엔드포인트 {0}]")]
    WorldFull(u32),

    #[error("월드 입장 진행 중 [엔드포인트 {0}]")]
    JoinInProgress(u32),

    #[error("활성 세션 없음 [사용자 {0}]")]
    NoActiveSession(u64),

    #[error("이미 재연결 중 [사용자 {0}]")]
    AlreadyReconnecting(u64),

    #[error("트래픽 남용 감지 [세션 {session_id}]: {bytes_per_sec:.0}B/s, {requests_per_sec:.1}req/s")]
    AbuseDetected {
        session_id: u64,
        bytes_per_sec: f64,
        requests_per_sec: f64,
    },

    #[error("인증되지 않은 세션")]
    NotVerified,

    #[error("이미 인증된 세션")]
    AlreadyVerified,

    #[error("월드에 바인딩되지 않음")]
    NotBound,

    #[error("세션 버퍼 초과 [세션 {0}]")]
    BufferOverflow(u64),

    #[error("세션 종료됨 [세션 {0}]")]
    SessionClosed(u64),

    #[error("라우팅 불가 메시지 [ID {0}]")]
    Unrouted(u16),

    #[error("프로토콜 에러: {0}")]
    Protocol(String),

    #[error(transparent)]
    Shared(#[from] AppError),
}

/// 에러 심각도 레벨
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorSeverity {
    /// 정보성 - 정상 동작 중 발생하는 예상 가능한 상황
    Info,
    /// 경고 - 주의가 필요하지만 서비스는 계속 가능
    Warning,
    /// 에러 - 기능에 영향을 주지만 복구 가능
    Error,
    /// 치명적 - 서비스 중단이 필요한 심각한 문제
    Critical,
}

impl GatewayError {
    /// 클라이언트 에러 응답 코드
    pub fn code(&self) -> u16 {
        match self {
            GatewayError::Auth(AuthFailure::InvalidToken) => 401,
            GatewayError::Auth(AuthFailure::ZoneIdError) => 402,
            GatewayError::DuplicateSession(_) => 409,
            GatewayError::WorldUnavailable(_) => 503,
            GatewayError::WorldFull(_) => 507,
            GatewayError::JoinInProgress(_) => 429,
            GatewayError::NoActiveSession(_) => 404,
            GatewayError::AlreadyReconnecting(_) => 423,
            GatewayError::AbuseDetected { .. } => 420,
            GatewayError::NotVerified => 403,
            GatewayError::AlreadyVerified => 412,
            GatewayError::NotBound => 424,
            GatewayError::BufferOverflow(_) => 413,
            GatewayError::SessionClosed(_) => 410,
            GatewayError::Unrouted(_) => 400,
            GatewayError::Protocol(_) => 400,
            GatewayError::Shared(e) if e.is_timeout() => 504,
            GatewayError::Shared(_) => 500,
        }
    }

    /// 로그 심각도
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            GatewayError::Auth(_)
            | GatewayError::WorldFull(_)
            | GatewayError::JoinInProgress(_)
            | GatewayError::NoActiveSession(_)
            | GatewayError::AlreadyReconnecting(_)
            | GatewayError::NotVerified
            | GatewayError::AlreadyVerified
            | GatewayError::NotBound
            | GatewayError::SessionClosed(_) => ErrorSeverity::Info,
            GatewayError::DuplicateSession(_)
            | GatewayError::WorldUnavailable(_)
            | GatewayError::BufferOverflow(_)
            | GatewayError::Unrouted(_)
            | GatewayError::Protocol(_) => ErrorSeverity::Warning,
            GatewayError::AbuseDetected { .. } => ErrorSeverity::Error,
            GatewayError::Shared(e) => match e.severity() {
                shared::tool::error::ErrorSeverity::Critical => ErrorSeverity::Critical,
                shared::tool::error::ErrorSeverity::High => ErrorSeverity::Error,
                shared::tool::error::ErrorSeverity::Medium => ErrorSeverity::Warning,
                shared::tool::error::ErrorSeverity::Low => ErrorSeverity::Info,
            },
        }
    }

    /// 이 에러 이후 연결을 유지할 수 있는지 여부
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            GatewayError::AbuseDetected { .. }
                | GatewayError::BufferOverflow(_)
                | GatewayError::SessionClosed(_)
        )
    }
}

/// 에러 핸들러
///
/// 모든 에러를 중앙에서 로깅하는 핵심 구조체입니다.
pub struct ErrorHandler;

impl ErrorHandler {
    /// 에러를 처리하고 로깅합니다.
    ///
    /// # Examples
    ///
    /// ```rust,ignore
    /// ErrorHandler::handle_error(
    ///     &GatewayError::WorldFull(3),
    ///     ErrorSeverity::Info,
    ///     "GatewaySession",
    ///     "join_world",
    /// );
    /// ```
    pub fn handle_error(
        error: &GatewayError,
        severity: ErrorSeverity,
        component: &str,
        operation: &str,
    ) {
        let log_message = format!("[{}] [{}] {}", component, operation, error);

        match severity {
            ErrorSeverity::Info => info!("{}", log_message),
            ErrorSeverity::Warning => warn!("{}", log_message),
            ErrorSeverity::Error => error!("{}", log_message),
            ErrorSeverity::Critical => {
                error!("🚨 CRITICAL: {}", log_message);
            }
        }
    }

    /// 에러 자체의 심각도로 로깅합니다.
    pub fn log(error: &GatewayError, component: &str, operation: &str) {
        Self::handle_error(error, error.severity(), component, operation);
    }
}

/// 결과 타입 별칭
pub type GatewayResult<T> = Result<T, GatewayError>;
