//! 게이트웨이 서버 진입점
//!
//! 환경변수:
//! - gateway_id / zone_id: 게이트웨이 식별자와 담당 존
//! - tcp_host / tcp_port: 클라이언트 리스너 (기본값: 127.0.0.1:4000)
//! - world_link_host / world_link_port: 월드 노드 리스너 (기본값: 127.0.0.1:4100)
//! - redis_host / redis_port: 공유 저장소 (redis_host가 비어 있으면 메모리 저장소)
//! - JWT_SECRET: 로그인 토큰 서명 키

use std::sync::Arc;

use anyhow::Result;
use tracing::{info, warn};

use gatewayserver::{validate_config, GatewayConfig, GatewayServer};
use shared::config::redis_config::RedisConfig;
use shared::logging::init_logging;
use shared::service::{MemoryRankedStore, RankedStore, RedisRankedStore};

#[tokio::main]
async fn main() -> Result<()> {
    init_logging("gatewayserver")?;

    let config = GatewayConfig::from_env()?;
    validate_config(&config)?;

    info!("=== 게이트웨이 설정 ===");
    info!("게이트웨이: {} (존 {})", config.gateway_id, config.zone_id);
    info!("클라이언트 리스너: {}", config.client_bind_address());
    info!("월드 링크 리스너: {}", config.world_bind_address());
    info!("====================");

    let store: Arc<dyn RankedStore> = if config.use_memory_store() {
        warn!("redis_host가 비어 있어 메모리 저장소를 사용합니다");
        Arc::new(MemoryRankedStore::new())
    } else {
        let redis = RedisConfig::connect(&config.redis_host, config.redis_port).await?;
        info!("Redis 서버: {}", redis.address());
        Arc::new(RedisRankedStore::new(redis, config.store_timeout))
    };

    let mut server = GatewayServer::new(config, store);
    server.start().await?;

    tokio::signal::ctrl_c().await?;
    info!("종료 시그널 수신, 서버를 중지합니다...");

    server.stop().await?;
    Ok(())
}
