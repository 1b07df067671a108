//! 게이트웨이 환경 설정 모듈
//!
//! .env 파일과 환경변수에서 설정을 로드하고 관리합니다.

use anyhow::Result;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tracing::{info, warn};

/// 세션 수명 관련 설정
#[derive(Debug, Clone)]
pub struct SessionSettings {
    /// 연결 끊김 후 재연결을 기다리는 시간
    pub disconnect_grace: Duration,
    /// 하트비트가 없을 때 세션을 강제 종료하는 시간
    pub no_response_timeout: Duration,
    /// 세션 정리 주기
    pub sweep_interval: Duration,
    /// 끊긴 세션이 보관하는 최대 메시지 수
    pub disconnect_buffer_size: usize,
    /// 연결별 송신 큐 크기
    pub outbound_queue_size: usize,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            disconnect_grace: Duration::from_secs(60),
            no_response_timeout: Duration::from_secs(300),
            sweep_interval: Duration::from_secs(1),
            disconnect_buffer_size: 128,
            outbound_queue_size: 256,
        }
    }
}

/// 트래픽 남용 감시 임계값
#[derive(Debug, Clone)]
pub struct TrafficLimits {
    /// 평균 전송률을 계산하는 주기
    pub check_interval: Duration,
    /// 감사 로그만 남기는 기준
    pub soft_bytes_per_sec: f64,
    pub soft_requests_per_sec: f64,
    /// 세션을 강제 종료하는 기준
    pub hard_bytes_per_sec: f64,
    pub hard_requests_per_sec: f64,
}

impl Default for TrafficLimits {
    fn default() -> Self {
        Self {
            check_interval: Duration::from_secs(10),
            soft_bytes_per_sec: 32.0 * 1024.0,
            soft_requests_per_sec: 50.0,
            hard_bytes_per_sec: 256.0 * 1024.0,
            hard_requests_per_sec: 300.0,
        }
    }
}

/// 게이트웨이 설정 구조체
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// 게이트웨이 식별자 (공유 저장소에 기록)
    pub gateway_id: String,
    /// 이 게이트웨이가 담당하는 존 ID
    pub zone_id: u32,
    /// 클라이언트 리스너
    pub client_host: String,
    pub client_port: u16,
    /// 월드 노드 리스너
    pub world_host: String,
    pub world_port: u16,
    /// 로그인 토큰 서명 키
    pub jwt_secret: String,
    /// Redis 서버 (비어 있으면 메모리 저장소 사용)
    pub redis_host: String,
    pub redis_port: u16,
    pub store_timeout: Duration,
    pub max_connections: usize,
    pub session: SessionSettings,
    pub traffic: TrafficLimits,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            gateway_id: "gateway-1".to_string(),
            zone_id: 1,
            client_host: "127.0.0.1".to_string(),
            client_port: 4000,
            world_host: "127.0.0.1".to_string(),
            world_port: 4100,
            jwt_secret: "your-secret-key-min-256-bits".to_string(),
            redis_host: "127.0.0.1".to_string(),
            redis_port: 6379,
            store_timeout: Duration::from_millis(500),
            max_connections: 10_000,
            session: SessionSettings::default(),
            traffic: TrafficLimits::default(),
        }
    }
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    match std::env::var(key) {
        Ok(raw) => raw.parse().unwrap_or_else(|_| {
            warn!("환경변수 {} 값이 잘못되어 기본값을 사용합니다: {}", key, raw);
            default
        }),
        Err(_) => default,
    }
}

impl GatewayConfig {
    /// 환경변수에서 설정을 로드합니다.
    ///
    /// 로드 순서:
    /// 1. 상위/현재 디렉토리의 .env 파일
    /// 2. 시스템 환경변수
    /// 3. 기본값
    pub fn from_env() -> Result<Self> {
        Self::load_env_file();

        let d = Self::default();
        let session = SessionSettings {
            disconnect_grace: Duration::from_secs(env_or(
                "disconnect_grace_secs",
                d.session.disconnect_grace.as_secs(),
            )),
            no_response_timeout: Duration::from_secs(env_or(
                "no_response_timeout_secs",
                d.session.no_response_timeout.as_secs(),
            )),
            sweep_interval: Duration::from_millis(env_or(
                "session_sweep_interval_ms",
                d.session.sweep_interval.as_millis() as u64,
            )),
            disconnect_buffer_size: env_or(
                "disconnect_buffer_size",
                d.session.disconnect_buffer_size,
            ),
            outbound_queue_size: env_or("outbound_queue_size", d.session.outbound_queue_size),
        };
        let traffic = TrafficLimits {
            check_interval: Duration::from_secs(env_or(
                "traffic_check_interval_secs",
                d.traffic.check_interval.as_secs(),
            )),
            soft_bytes_per_sec: env_or("traffic_soft_bytes_per_sec", d.traffic.soft_bytes_per_sec),
            soft_requests_per_sec: env_or(
                "traffic_soft_requests_per_sec",
                d.traffic.soft_requests_per_sec,
            ),
            hard_bytes_per_sec: env_or("traffic_hard_bytes_per_sec", d.traffic.hard_bytes_per_sec),
            hard_requests_per_sec: env_or(
                "traffic_hard_requests_per_sec",
                d.traffic.hard_requests_per_sec,
            ),
        };

        let config = Self {
            gateway_id: env_or("gateway_id", d.gateway_id),
            zone_id: env_or("zone_id", d.zone_id),
            client_host: env_or("tcp_host", d.client_host),
            client_port: env_or("tcp_port", d.client_port),
            world_host: env_or("world_link_host", d.world_host),
            world_port: env_or("world_link_port", d.world_port),
            jwt_secret: env_or("JWT_SECRET", d.jwt_secret),
            redis_host: env_or("redis_host", d.redis_host),
            redis_port: env_or("redis_port", d.redis_port),
            store_timeout: Duration::from_millis(env_or(
                "store_timeout_ms",
                d.store_timeout.as_millis() as u64,
            )),
            max_connections: env_or("max_connections", d.max_connections),
            session,
            traffic,
        };

        info!("게이트웨이 설정 로드 완료: {:?}", config);
        Ok(config)
    }

    /// 클라이언트 리스너 주소
    pub fn client_bind_address(&self) -> String {
        format!("{}:{}", self.client_host, self.client_port)
    }

    /// 월드 노드 리스너 주소
    pub fn world_bind_address(&self) -> String {
        format!("{}:{}", self.world_host, self.world_port)
    }

    /// Redis 연결 주소
    pub fn redis_address(&self) -> String {
        format!("redis://{}:{}", self.redis_host, self.redis_port)
    }

    /// 메모리 저장소 사용 여부 (redis_host가 비어 있으면 true)
    pub fn use_memory_store(&self) -> bool {
        self.redis_host.is_empty()
    }

    /// .env 파일을 로드합니다.
    fn load_env_file() {
        let env_paths = vec!["../.env", ".env", "../../.env"];

        let mut loaded = false;
        for path in env_paths {
            if Path::new(path).exists() && dotenv::from_filename(path).is_ok() {
                info!(".env 파일 로드 성공: {}", path);
                loaded = true;
                break;
            }
        }

        if !loaded {
            warn!(".env 파일을 찾을 수 없습니다. 기본값과 시스템 환경변수를 사용합니다.");
        }
    }
}

/// 설정 검증 유틸리티
pub fn validate_config(config: &GatewayConfig) -> Result<()> {
    if config.client_port == 0 {
        anyhow::bail!("유효하지 않은 클라이언트 포트 번호: {}", config.client_port);
    }

    if config.world_port == 0 {
        anyhow::bail!("유효하지 않은 월드 링크 포트 번호: {}", config.world_port);
    }

    if config.client_host.is_empty() || config.world_host.is_empty() {
        anyhow::bail!("리스너 호스트 주소가 비어있습니다");
    }

    if config.jwt_secret.len() < 16 {
        anyhow::bail!("JWT_SECRET은 16자 이상이어야 합니다");
    }

    if config.session.disconnect_buffer_size == 0 || config.session.outbound_queue_size == 0 {
        anyhow::bail!("세션 버퍼 크기는 0보다 커야 합니다");
    }

    if config.session.no_response_timeout <= config.session.disconnect_grace {
        anyhow::bail!("무응답 타임아웃은 재연결 유예 시간보다 길어야 합니다");
    }

    if config.traffic.hard_bytes_per_sec < config.traffic.soft_bytes_per_sec
        || config.traffic.hard_requests_per_sec < config.traffic.soft_requests_per_sec
    {
        anyhow::bail!("트래픽 강제 종료 기준은 감사 기준보다 커야 합니다");
    }

    Ok(())
}
