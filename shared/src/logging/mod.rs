//! 통합 로깅 초기화
//!
//! 게이트웨이와 월드 서버가 같은 형식으로 로그를 남기도록
//! `tracing-subscriber` 설정을 한 곳에 모아둡니다.
//!
//! # 사용 예시
//! ```rust,ignore
//! use shared::logging::init_logging;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     init_logging("gatewayserver")?;
//!     tracing::info!("게이트웨이 시작");
//!     Ok(())
//! }
//! ```

use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::tool::error::{AppError, AppResult};

/// 기본 로그 필터 (RUST_LOG 미설정 시)
pub const DEFAULT_LOG_FILTER: &str = "info";

/// 로깅 시스템 초기화 함수
///
/// `RUST_LOG` 환경변수가 있으면 그 필터를, 없으면 `info`를 사용합니다.
/// 이미 전역 subscriber가 설치된 경우(테스트 등) 에러를 반환합니다.
pub fn init_logging(service_name: &str) -> AppResult<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .try_init()
        .map_err(|e| AppError::Configuration(format!("로깅 초기화 실패: {}", e)))?;

    info!(service = service_name, "로깅 시스템 초기화 완료");
    Ok(())
}

/// 테스트용 로깅 초기화 (중복 호출 허용)
pub fn init_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new("debug"))
        .with_test_writer()
        .try_init();
}
