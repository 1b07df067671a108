//! 공통 설정 모듈

pub mod redis_config;

pub use redis_config::RedisConfig;
