use dotenv::dotenv;
use std::env;
use redis::{aio::ConnectionManager, Client};
use tracing::{info, warn};

use crate::tool::error::{AppError, AppResult};

pub type RedisConnection = ConnectionManager;

#[derive(Clone)]
pub struct RedisConfig {
    pub conn: RedisConnection,
    pub host: String,
    pub port: u16,
}

impl RedisConfig {
    /// 환경변수(redis_host / redis_port)에서 주소를 읽어 연결합니다.
    pub async fn new() -> AppResult<Self> {
        // .env 파일 로드 (현재 디렉토리와 상위 디렉토리에서 찾기)
        let env_paths = vec![".env", "../.env", "../../.env"];
        let mut env_loaded = false;

        for path in env_paths {
            if std::path::Path::new(path).exists() {
                dotenv::from_filename(path).ok();
                env_loaded = true;
                break;
            }
        }

        if !env_loaded {
            dotenv().ok(); // 기본 .env 파일 시도
        }

        let host = env::var("redis_host").unwrap_or_else(|_| {
            warn!("redis_host 환경변수가 없어서 127.0.0.1을 사용합니다.");
            "127.0.0.1".to_string()
        });

        let port_str = env::var("redis_port").unwrap_or_else(|_| "6379".to_string());
        let port = port_str
            .parse::<u16>()
            .map_err(|_| AppError::Configuration(format!("redis_port는 숫자여야 함: {}", port_str)))?;

        Self::connect(&host, port).await
    }

    /// 지정한 호스트/포트로 연결 관리자를 생성합니다.
    pub async fn connect(host: &str, port: u16) -> AppResult<Self> {
        let client = Client::open(format!("redis://{}:{}", host, port))?;
        let manager = ConnectionManager::new(client).await?;
        info!("Redis 연결 성공: {}:{}", host, port);
        Ok(Self { conn: manager, host: host.to_string(), port })
    }

    pub fn get_connection(&self) -> RedisConnection {
        self.conn.clone()
    }

    pub fn address(&self) -> String {
        format!("redis://{}:{}", self.host, self.port)
    }
}
