//! 메시지 핸들러 테스트
//!
//! 프레임 단위 요청 처리와 에러 응답 규칙을 검증합니다.

use std::sync::Arc;
use std::time::Duration;

use shared::protocol::ids::client;
use shared::protocol::Frame;

use super::*;
use crate::handler::MessageHandler;
use crate::protocol::{ErrorNotice, LoginResponse};
use crate::service::SessionPhase;
use crate::tool::error::GatewayError;

fn next_frame(client: &mut TestClient) -> Frame {
    client.rx.try_recv().expect("응답 프레임 없음")
}

/// 미인증 세션의 게임 메시지 → 403 에러 알림, 연결 유지
#[tokio::test]
async fn test_unverified_request_rejected() {
    let t = create_test_gateway();
    let handler = MessageHandler::new(t.gateway.clone());
    let mut client = open_client(&t.gateway);

    handler
        .handle(&client.session, Frame::new(1500, &b"move"[..]))
        .await
        .unwrap();

    let reply = next_frame(&mut client);
    assert_eq!(reply.msg_id, client::ERROR_NOTICE);
    let notice: ErrorNotice = reply.parse_json().unwrap();
    assert_eq!(notice.request_id, 1500);
    assert_eq!(notice.code, 403);
    assert!(!client.session.is_closed());

    println!("✅ 미인증 요청 거부 테스트 통과");
}

/// 하트비트는 인증 없이 응답
#[tokio::test]
async fn test_heartbeat_ack() {
    let t = create_test_gateway();
    let handler = MessageHandler::new(t.gateway.clone());
    let mut client = open_client(&t.gateway);

    handler
        .handle(&client.session, Frame::empty(client::HEARTBEAT))
        .await
        .unwrap();
    assert_eq!(next_frame(&mut client).msg_id, client::HEARTBEAT_ACK);
}

/// 로그인 프레임 → LOGIN_RESP
#[tokio::test]
async fn test_login_frame() {
    let t = create_test_gateway();
    let handler = MessageHandler::new(t.gateway.clone());
    let mut client = open_client(&t.gateway);

    let request = Frame::json(client::LOGIN_REQ, &credentials(&t.gateway, 42)).unwrap();
    handler.handle(&client.session, request).await.unwrap();

    let reply = next_frame(&mut client);
    assert_eq!(reply.msg_id, client::LOGIN_RESP);
    let body: LoginResponse = reply.parse_json().unwrap();
    assert_eq!(body.user_id, 42);
    assert_eq!(body.session_id, client.session.id());
    assert_eq!(client.session.phase(), SessionPhase::Verified);
}

/// 잘못된 토큰 → 401 에러 알림
#[tokio::test]
async fn test_login_frame_bad_token() {
    let t = create_test_gateway();
    let handler = MessageHandler::new(t.gateway.clone());
    let mut client = open_client(&t.gateway);

    let mut creds = credentials(&t.gateway, 42);
    creds.token.push('x');
    let request = Frame::json(client::LOGIN_REQ, &creds).unwrap();
    handler.handle(&client.session, request).await.unwrap();

    let notice: ErrorNotice = next_frame(&mut client).parse_json().unwrap();
    assert_eq!(notice.request_id, client::LOGIN_REQ);
    assert_eq!(notice.code, 401);
}

/// 게이트웨이 범위의 알 수 없는 메시지 → 400
#[tokio::test]
async fn test_unknown_local_message() {
    let t = create_test_gateway();
    let handler = MessageHandler::new(t.gateway.clone());
    let mut client = open_client(&t.gateway);

    handler
        .handle(&client.session, Frame::empty(999))
        .await
        .unwrap();
    let notice: ErrorNotice = next_frame(&mut client).parse_json().unwrap();
    assert_eq!(notice.code, 400);
}

/// 트래픽 강제 종료 기준 초과 → 치명적 에러, 세션 종료
#[tokio::test]
async fn test_abuse_is_fatal() {
    let mut config = test_config();
    config.traffic.check_interval = Duration::from_millis(1);
    config.traffic.hard_requests_per_sec = 0.0;
    let t = create_test_gateway_with(config);
    let handler = MessageHandler::new(t.gateway.clone());
    let client = open_client(&t.gateway);

    tokio::time::sleep(Duration::from_millis(5)).await;
    let result = handler
        .handle(&client.session, Frame::empty(client::HEARTBEAT))
        .await;

    assert!(matches!(result, Err(GatewayError::AbuseDetected { .. })));
    assert!(result.unwrap_err().is_fatal());
    assert!(client.session.is_closed());
    assert_eq!(client.close_rx.borrow().as_deref(), Some("abuse detected"));
}

/// 로그인 후 로그아웃 프레임
#[tokio::test]
async fn test_logout_frame() {
    let t = create_test_gateway();
    let handler = MessageHandler::new(t.gateway.clone());
    let client = open_client(&t.gateway);
    let session: Arc<_> = client.session.clone();

    let request = Frame::json(client::LOGIN_REQ, &credentials(&t.gateway, 42)).unwrap();
    handler.handle(&session, request).await.unwrap();
    handler
        .handle(&session, Frame::empty(client::LOGOUT_REQ))
        .await
        .unwrap();

    assert!(session.is_closed());
    assert!(t.gateway.registry().lookup(42).is_none());
}
