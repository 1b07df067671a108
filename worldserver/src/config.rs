//! 월드 서버 환경 설정 모듈
//!
//! .env 파일과 환경변수에서 설정을 로드하고 관리합니다.

use anyhow::Result;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tracing::{info, warn};

/// 채팅 범위별 허용 한도
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChatLimits {
    /// 대기열 최대 길이
    pub max_queue_size: u64,
    /// 시간 조각당 최대 허용 수
    pub max_window_size: u64,
    /// 시간 조각 길이 (초)
    pub slice_secs: u64,
}

impl ChatLimits {
    pub const fn new(max_queue_size: u64, max_window_size: u64, slice_secs: u64) -> Self {
        Self {
            max_queue_size,
            max_window_size,
            slice_secs,
        }
    }

    /// 월드 전체 채팅 기본값
    pub const fn world_default() -> Self {
        Self::new(2200, 1000, 5)
    }

    /// 존 채팅 기본값
    pub const fn zone_default() -> Self {
        Self::new(1100, 500, 5)
    }

    /// 시간 조각 카운터 TTL (2조각)
    pub fn window_ttl_secs(&self) -> u64 {
        self.slice_secs.max(1) * 2
    }
}

/// 채팅 허용 제어 설정
#[derive(Debug, Clone)]
pub struct ChatSettings {
    pub world: ChatLimits,
    pub zone: ChatLimits,
    /// 대기열 항목 만료 시간
    pub queue_timeout: Duration,
    /// 만료 항목 정리 주기
    pub sweep_interval: Duration,
}

impl Default for ChatSettings {
    fn default() -> Self {
        Self {
            world: ChatLimits::world_default(),
            zone: ChatLimits::zone_default(),
            queue_timeout: Duration::from_secs(120),
            sweep_interval: Duration::from_secs(120),
        }
    }
}

/// 월드 서버 설정 구조체
#[derive(Debug, Clone)]
pub struct WorldConfig {
    /// 접속할 게이트웨이 월드 링크 주소 목록
    pub gateway_addresses: Vec<String>,
    /// 엔드포인트 ID (게이트웨이 전체에서 고유)
    pub endpoint_id: u32,
    /// 게이트웨이에 알릴 이 노드의 주소
    pub advertise_address: String,
    pub zone_id: u32,
    pub process_index: u32,
    /// 최대 동시 플레이어 수
    pub capacity: u32,
    /// 이 노드가 처리하는 게임 메시지 ID (비어 있으면 1000번 이상 전부)
    pub game_msg_ids: Vec<u16>,
    /// 부하 보고 주기
    pub load_report_interval: Duration,
    /// 게이트웨이 재접속 대기 시간
    pub reconnect_delay: Duration,
    pub chat: ChatSettings,
    /// Redis 서버 (비어 있으면 메모리 저장소 사용)
    pub redis_host: String,
    pub redis_port: u16,
    pub store_timeout: Duration,
}

impl Default for WorldConfig {
    fn default() -> Self {
        Self {
            gateway_addresses: vec!["127.0.0.1:4100".to_string()],
            endpoint_id: 1,
            advertise_address: "127.0.0.1:4200".to_string(),
            zone_id: 1,
            process_index: 1,
            capacity: 1000,
            game_msg_ids: Vec::new(),
            load_report_interval: Duration::from_secs(5),
            reconnect_delay: Duration::from_secs(3),
            chat: ChatSettings::default(),
            redis_host: "127.0.0.1".to_string(),
            redis_port: 6379,
            store_timeout: Duration::from_millis(500),
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

fn env_limits(prefix: &str, default: ChatLimits) -> ChatLimits {
    ChatLimits {
        max_queue_size: env_or(&format!("{}_chat_max_queue", prefix), default.max_queue_size),
        max_window_size: env_or(&format!("{}_chat_max_window", prefix), default.max_window_size),
        slice_secs: env_or(&format!("{}_chat_slice_secs", prefix), default.slice_secs),
    }
}

impl WorldConfig {
    /// 환경변수에서 설정을 로드합니다.
    ///
    /// `gateway_addresses`는 쉼표로 구분합니다.
    pub fn from_env() -> Result<Self> {
        Self::load_env_file();

        let d = Self::default();
        let gateway_addresses = match std::env::var("gateway_addresses") {
            Ok(raw) => raw
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect(),
            Err(_) => d.gateway_addresses,
        };

        let game_msg_ids = match std::env::var("game_msg_ids") {
            Ok(raw) => raw
                .split(',')
                .filter_map(|id| id.trim().parse::<u16>().ok())
                .collect(),
            Err(_) => d.game_msg_ids,
        };

        let chat = ChatSettings {
            world: env_limits("world", d.chat.world),
            zone: env_limits("zone", d.chat.zone),
            queue_timeout: Duration::from_secs(env_or(
                "chat_queue_timeout_secs",
                d.chat.queue_timeout.as_secs(),
            )),
            sweep_interval: Duration::from_secs(env_or(
                "chat_sweep_interval_secs",
                d.chat.sweep_interval.as_secs(),
            )),
        };

        let config = Self {
            gateway_addresses,
            endpoint_id: env_or("endpoint_id", d.endpoint_id),
            advertise_address: env_or("advertise_address", d.advertise_address),
            zone_id: env_or("zone_id", d.zone_id),
            process_index: env_or("process_index", d.process_index),
            capacity: env_or("world_capacity", d.capacity),
            game_msg_ids,
            load_report_interval: Duration::from_secs(env_or(
                "load_report_interval_secs",
                d.load_report_interval.as_secs(),
            )),
            reconnect_delay: Duration::from_millis(env_or(
                "gateway_reconnect_delay_ms",
                d.reconnect_delay.as_millis() as u64,
            )),
            chat,
            redis_host: env_or("redis_host", d.redis_host),
            redis_port: env_or("redis_port", d.redis_port),
            store_timeout: Duration::from_millis(env_or(
                "store_timeout_ms",
                d.store_timeout.as_millis() as u64,
            )),
        };

        info!("월드 설정 로드 완료: {:?}", config);
        Ok(config)
    }

    /// 메모리 저장소 사용 여부 (redis_host가 비어 있으면 true)
    pub fn use_memory_store(&self) -> bool {
        self.redis_host.is_empty()
    }

    fn load_env_file() {
        for path in ["../.env", ".env", "../../.env"] {
            if Path::new(path).exists() && dotenv::from_filename(path).is_ok() {
                info!(".env 파일 로드 성공: {}", path);
                return;
            }
        }
        warn!(".env 파일을 찾을 수 없습니다. 기본값과 시스템 환경변수를 사용합니다.");
    }
}

/// 설정 검증 유틸리티
pub fn validate_config(config: &WorldConfig) -> Result<()> {
    if config.gateway_addresses.is_empty() {
        anyhow::bail!("접속할 게이트웨이 주소가 없습니다");
    }

    if let Some(id) = config
        .game_msg_ids
        .iter()
        .find(|id| !shared::protocol::ids::is_game_message(**id))
    {
        anyhow::bail!("게임 메시지 ID는 1000 이상이어야 합니다: {}", id);
    }

    if config.capacity == 0 {
        anyhow::bail!("월드 정원은 0보다 커야 합니다");
    }

    for (scope, limits) in [("world", config.chat.world), ("zone", config.chat.zone)] {
        if limits.max_window_size == 0 || limits.slice_secs == 0 {
            anyhow::bail!("{} 채팅 허용 한도가 0입니다", scope);
        }
        if limits.max_queue_size < limits.max_window_size {
            anyhow::bail!("{} 채팅 대기열은 허용 한도보다 커야 합니다", scope);
        }
    }

    if config.chat.zone.max_window_size > config.chat.world.max_window_size {
        warn!("존 채팅 허용 한도가 월드 채팅보다 큽니다");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = WorldConfig::default();
        assert!(validate_config(&config).is_ok());
        assert_eq!(config.chat.world, ChatLimits::new(2200, 1000, 5));
        assert_eq!(config.chat.zone, ChatLimits::new(1100, 500, 5));
        assert_eq!(config.chat.world.window_ttl_secs(), 10);
    }

    #[test]
    fn test_queue_smaller_than_window_rejected() {
        let mut config = WorldConfig::default();
        config.chat.zone.max_queue_size = 10;
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_no_gateway_rejected() {
        let config = WorldConfig {
            gateway_addresses: vec![],
            ..WorldConfig::default()
        };
        assert!(validate_config(&config).is_err());
    }
}
