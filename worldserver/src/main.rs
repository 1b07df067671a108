//! 월드 서버 진입점
//!
//! 환경변수:
//! - gateway_addresses: 접속할 게이트웨이 월드 링크 주소, 쉼표 구분 (기본값: 127.0.0.1:4100)
//! - endpoint_id / zone_id / process_index: 엔드포인트 식별자
//! - world_capacity: 최대 동시 플레이어 수
//! - game_msg_ids: 담당 게임 메시지 ID, 쉼표 구분 (비어 있으면 전부)
//! - redis_host / redis_port: 공유 저장소 (redis_host가 비어 있으면 메모리 저장소)

use std::sync::Arc;

use anyhow::Result;
use tracing::{info, warn};

use shared::config::redis_config::RedisConfig;
use shared::logging::init_logging;
use shared::service::{MemoryRankedStore, RankedStore, RedisRankedStore};
use worldserver::{validate_config, WorldConfig, WorldServer};

#[tokio::main]
async fn main() -> Result<()> {
    init_logging("worldserver")?;

    let config = WorldConfig::from_env()?;
    validate_config(&config)?;

    info!("=== 월드 설정 ===");
    info!(
        "엔드포인트: {} (존 {}, 프로세스 {})",
        config.endpoint_id, config.zone_id, config.process_index
    );
    info!("게이트웨이: {:?}", config.gateway_addresses);
    info!("정원: {}", config.capacity);
    info!("================");

    let store: Arc<dyn RankedStore> = if config.use_memory_store() {
        warn!("redis_host가 비어 있어 메모리 저장소를 사용합니다. 채팅 허용량은 이 노드에서만 공유됩니다");
        Arc::new(MemoryRankedStore::new())
    } else {
        let redis = RedisConfig::connect(&config.redis_host, config.redis_port).await?;
        info!("Redis 서버: {}", redis.address());
        Arc::new(RedisRankedStore::new(redis, config.store_timeout))
    };

    let mut server = WorldServer::new(config, store);
    server.start().await?;

    tokio::signal::ctrl_c().await?;
    info!("종료 시그널 수신, 서버를 중지합니다...");

    server.stop().await?;
    Ok(())
}
