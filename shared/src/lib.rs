//! 게이트웨이 / 월드 서버 공통 라이브러리
//!
//! 두 서버 프로세스가 함께 사용하는 기반 코드를 모아둔 크레이트입니다.
//!
//! # 모듈 구조
//!
//! - **config**: Redis 연결 설정
//! - **logging**: tracing 기반 로깅 초기화
//! - **protocol**: 길이 prefix 프레임 코덱과 게이트웨이⇄월드 내부 메시지
//! - **service**: 공유 랭킹 저장소 (Redis / 메모리 구현), 사용자별 순차 처리기
//! - **tool**: 공통 에러 타입과 시간 유틸리티

pub mod config;
pub mod logging;
pub mod protocol;
pub mod service;
pub mod tool;

pub use protocol::{Frame, LinkMessage};
pub use service::{MemoryRankedStore, RankedStore, RedisRankedStore};
pub use tool::error::{AppError, AppResult};
