//! 게이트웨이 테스트 모듈
//!
//! 각 기능별로 분리된 테스트 파일들을 관리합니다.

pub mod test_connection;
pub mod test_handler;
pub mod test_world;

// 테스트 유틸리티
use std::sync::Arc;

use tokio::sync::{mpsc, watch};

use shared::protocol::{EndpointRegistration, Frame, LinkMessage};
use shared::service::MemoryRankedStore;

use crate::config::GatewayConfig;
use crate::protocol::Credentials;
use crate::service::{GatewayService, Session, WorldLink};

pub const TEST_SECRET: &str = "gateway-test-secret-key";
pub const TEST_ZONE: u32 = 1;

/// 테스트용 게이트웨이
pub struct TestGateway {
    pub gateway: Arc<GatewayService>,
    pub store: Arc<MemoryRankedStore>,
}

/// 테스트용 클라이언트 (송신 큐와 종료 신호를 직접 관찰)
pub struct TestClient {
    pub session: Arc<Session>,
    pub rx: mpsc::Receiver<Frame>,
    pub close_rx: watch::Receiver<Option<String>>,
}

impl TestClient {
    /// 지금까지 받은 프레임의 메시지 ID 목록
    pub fn received_ids(&mut self) -> Vec<u16> {
        let mut ids = Vec::new();
        while let Ok(frame) = self.rx.try_recv() {
            ids.push(frame.msg_id);
        }
        ids
    }
}

pub fn test_config() -> GatewayConfig {
    let mut config = GatewayConfig::default();
    config.jwt_secret = TEST_SECRET.to_string();
    config.zone_id = TEST_ZONE;
    config.client_port = 0;
    config.world_port = 0;
    config.session.disconnect_buffer_size = 8;
    config
}

pub fn create_test_gateway_with(config: GatewayConfig) -> TestGateway {
    let store = Arc::new(MemoryRankedStore::new());
    let gateway = Arc::new(GatewayService::new(config, store.clone()));
    TestGateway { gateway, store }
}

pub fn create_test_gateway() -> TestGateway {
    create_test_gateway_with(test_config())
}

pub fn open_client(gateway: &GatewayService) -> TestClient {
    let (session, rx, close_rx) = gateway
        .open_session("127.0.0.1:50000".into())
        .expect("세션 생성 실패");
    TestClient {
        session,
        rx,
        close_rx,
    }
}

pub fn credentials(gateway: &GatewayService, user_id: u64) -> Credentials {
    Credentials {
        user_id,
        token: gateway
            .auth()
            .generate_token(user_id, TEST_ZONE, 3600)
            .expect("토큰 생성 실패"),
        zone_id: TEST_ZONE,
    }
}

/// 월드 엔드포인트를 등록하고 링크 수신 측을 돌려줍니다.
pub fn attach_world(
    gateway: &GatewayService,
    endpoint_id: u32,
    capacity: u32,
    players: u32,
) -> mpsc::Receiver<Frame> {
    attach_world_with(gateway, endpoint_id, endpoint_id, capacity, players, vec![])
}

pub fn attach_world_with(
    gateway: &GatewayService,
    endpoint_id: u32,
    process_index: u32,
    capacity: u32,
    players: u32,
    owned_msg_ids: Vec<u16>,
) -> mpsc::Receiver<Frame> {
    let (tx, mut rx) = mpsc::channel(256);
    let (link, _close_rx) = WorldLink::new(endpoint_id as u64 + 1000, tx);
    gateway
        .register_endpoint(
            EndpointRegistration {
                endpoint_id,
                address: format!("127.0.0.1:{}", 7000 + endpoint_id),
                zone_id: TEST_ZONE,
                process_index,
                capacity,
                players,
                owned_msg_ids,
            },
            link,
        )
        .expect("엔드포인트 등록 실패");

    // 등록 응답은 테스트에서 관심 없음
    let ack = rx.try_recv().expect("등록 응답 없음");
    assert!(matches!(
        LinkMessage::from_frame(&ack),
        Ok(LinkMessage::RegisterAck { .. })
    ));
    rx
}

/// 링크로 나간 메시지를 모두 꺼냅니다.
pub fn drain_link(rx: &mut mpsc::Receiver<Frame>) -> Vec<LinkMessage> {
    let mut messages = Vec::new();
    while let Ok(frame) = rx.try_recv() {
        messages.push(LinkMessage::from_frame(&frame).expect("링크 메시지 해석 실패"));
    }
    messages
}

/// 로그인 후 지정 엔드포인트에 입장 완료까지 진행합니다.
pub async fn login_and_bind(
    gateway: &GatewayService,
    client: &mut TestClient,
    link_rx: &mut mpsc::Receiver<Frame>,
    user_id: u64,
    endpoint_id: u32,
) {
    gateway
        .login(&client.session, credentials(gateway, user_id))
        .await
        .expect("로그인 실패");
    gateway
        .join_world(
            &client.session,
            crate::protocol::JoinTarget::Endpoint(endpoint_id),
        )
        .await
        .expect("입장 요청 실패");

    let ticket = drain_link(link_rx)
        .into_iter()
        .find_map(|m| match m {
            LinkMessage::JoinRequest(ticket) => Some(ticket),
            _ => None,
        })
        .expect("입장 요청이 월드로 전달되지 않음");

    gateway.complete_join(
        endpoint_id,
        shared::protocol::JoinOutcome {
            user_id: ticket.user_id,
            session_id: ticket.session_id,
            generation: ticket.generation,
            accepted: true,
            players: 1,
        },
    );
    client.received_ids();
}
