//! TCP 종단 간 테스트
//!
//! 실제 리스너를 띄우고 클라이언트와 가짜 월드 노드를 붙여
//! 로그인 → 입장 → 게임 메시지 왕복 → 끊김까지 확인합니다.

use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::time::timeout;

use shared::protocol::ids::client;
use shared::protocol::{EndpointRegistration, Envelope, Frame, JoinOutcome, LinkMessage};
use shared::service::MemoryRankedStore;

use super::*;
use crate::protocol::{ErrorNotice, JoinTarget, JoinWorldRequest, JoinWorldResponse};
use crate::server::GatewayServer;
use crate::service::SessionPhase;

const WAIT: Duration = Duration::from_secs(3);

async fn read_frame(stream: &mut TcpStream) -> Frame {
    timeout(WAIT, Frame::read_from(stream))
        .await
        .expect("프레임 수신 시간 초과")
        .expect("프레임 수신 실패")
}

async fn read_link(stream: &mut TcpStream) -> LinkMessage {
    LinkMessage::from_frame(&read_frame(stream).await).expect("링크 메시지 해석 실패")
}

async fn write_frame(stream: &mut TcpStream, frame: Frame) {
    frame.write_to(stream).await.expect("프레임 송신 실패");
}

async fn start_server() -> GatewayServer {
    let mut server = GatewayServer::new(test_config(), Arc::new(MemoryRankedStore::new()));
    server.start().await.expect("서버 시작 실패");
    server
}

/// 가짜 월드 노드 연결 및 등록
async fn connect_world(server: &GatewayServer, endpoint_id: u32) -> TcpStream {
    let mut world = TcpStream::connect(server.world_addr().unwrap()).await.unwrap();
    let registration = LinkMessage::RegisterEndpoint(EndpointRegistration {
        endpoint_id,
        address: "127.0.0.1:7001".into(),
        zone_id: TEST_ZONE,
        process_index: 1,
        capacity: 100,
        players: 0,
        owned_msg_ids: vec![],
    });
    write_frame(&mut world, registration.to_frame().unwrap()).await;
    assert!(matches!(
        read_link(&mut world).await,
        LinkMessage::RegisterAck { .. }
    ));
    world
}

/// 미인증 상태의 요청 → ERROR_NOTICE 403, 연결 유지
#[tokio::test]
async fn test_unverified_request_over_tcp() {
    let mut server = start_server().await;
    let mut stream = TcpStream::connect(server.client_addr().unwrap()).await.unwrap();

    write_frame(&mut stream, Frame::empty(client::WORLD_LIST_REQ)).await;
    let reply = read_frame(&mut stream).await;
    assert_eq!(reply.msg_id, client::ERROR_NOTICE);
    let notice: ErrorNotice = reply.parse_json().unwrap();
    assert_eq!(notice.code, 403);

    write_frame(&mut stream, Frame::empty(client::HEARTBEAT)).await;
    assert_eq!(read_frame(&mut stream).await.msg_id, client::HEARTBEAT_ACK);

    server.stop().await.unwrap();
    println!("✅ TCP 미인증 요청 테스트 통과");
}

/// 로그인 → 입장 → 게임 메시지 왕복 → 연결 끊김 후 유예 상태
#[tokio::test]
async fn test_full_round_trip() {
    let mut server = start_server().await;
    let gateway = server.gateway().clone();
    let mut world = connect_world(&server, 1).await;

    let mut stream = TcpStream::connect(server.client_addr().unwrap()).await.unwrap();

    // 로그인
    let login = Frame::json(client::LOGIN_REQ, &credentials(&gateway, 42)).unwrap();
    write_frame(&mut stream, login).await;
    assert_eq!(read_frame(&mut stream).await.msg_id, client::LOGIN_RESP);

    // 입장 요청 → 월드가 입장 요청을 받음
    let join = Frame::json(
        client::JOIN_WORLD_REQ,
        &JoinWorldRequest {
            target: JoinTarget::Quick,
        },
    )
    .unwrap();
    write_frame(&mut stream, join).await;
    let ticket = match read_link(&mut world).await {
        LinkMessage::JoinRequest(ticket) => ticket,
        other => panic!("입장 요청 대신 {:?} 수신", other),
    };
    assert_eq!(ticket.user_id, 42);

    // 월드 승인 → 클라이언트 입장 응답
    let outcome = LinkMessage::JoinResult(JoinOutcome {
        user_id: 42,
        session_id: ticket.session_id,
        generation: ticket.generation,
        accepted: true,
        players: 1,
    });
    write_frame(&mut world, outcome.to_frame().unwrap()).await;
    let reply = read_frame(&mut stream).await;
    assert_eq!(reply.msg_id, client::JOIN_WORLD_RESP);
    let body: JoinWorldResponse = reply.parse_json().unwrap();
    assert!(body.accepted);
    assert_eq!(body.endpoint_id, 1);

    // 게임 메시지 → 월드로 전달
    write_frame(&mut stream, Frame::new(1500, &b"ping"[..])).await;
    match read_link(&mut world).await {
        LinkMessage::Forward(envelope) => {
            assert_eq!(envelope.user_id, 42);
            assert_eq!(envelope.generation, ticket.generation);
            assert_eq!(envelope.msg_id, 1500);
            assert_eq!(&envelope.payload[..], b"ping");
        }
        other => panic!("전달 메시지 대신 {:?} 수신", other),
    }

    // 월드 push → 클라이언트
    let push = LinkMessage::Push(Envelope::new(42, ticket.generation, 1501, &b"pong"[..]));
    write_frame(&mut world, push.to_frame().unwrap()).await;
    let pushed = read_frame(&mut stream).await;
    assert_eq!(pushed.msg_id, 1501);
    assert_eq!(&pushed.payload[..], b"pong");

    // 연결 끊김 → 유예 상태로 바인딩 유지
    drop(stream);
    let mut phase = None;
    for _ in 0..50 {
        let session = gateway.registry().lookup(42).expect("유예 중 바인딩 유지");
        if session.phase() == SessionPhase::Disconnected {
            phase = Some(SessionPhase::Disconnected);
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(phase, Some(SessionPhase::Disconnected));

    server.stop().await.unwrap();
    println!("✅ TCP 왕복 테스트 통과");
}

/// 월드 링크가 끊기면 엔드포인트가 제거되고 클라이언트가 알림을 받음
#[tokio::test]
async fn test_world_link_loss_notifies_client() {
    let mut server = start_server().await;
    let gateway = server.gateway().clone();
    let mut world = connect_world(&server, 1).await;
    let mut stream = TcpStream::connect(server.client_addr().unwrap()).await.unwrap();

    write_frame(
        &mut stream,
        Frame::json(client::LOGIN_REQ, &credentials(&gateway, 7)).unwrap(),
    )
    .await;
    read_frame(&mut stream).await;
    write_frame(
        &mut stream,
        Frame::json(
            client::JOIN_WORLD_REQ,
            &JoinWorldRequest {
                target: JoinTarget::Endpoint(1),
            },
        )
        .unwrap(),
    )
    .await;
    let LinkMessage::JoinRequest(ticket) = read_link(&mut world).await else {
        panic!("입장 요청 없음");
    };
    write_frame(
        &mut world,
        LinkMessage::JoinResult(JoinOutcome {
            user_id: 7,
            session_id: ticket.session_id,
            generation: ticket.generation,
            accepted: true,
            players: 1,
        })
        .to_frame()
        .unwrap(),
    )
    .await;
    read_frame(&mut stream).await;

    drop(world);
    let notice = read_frame(&mut stream).await;
    assert_eq!(notice.msg_id, client::WORLD_UNAVAILABLE);
    assert!(gateway.worlds().get(1).is_none());

    server.stop().await.unwrap();
}
