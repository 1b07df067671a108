//! 월드 바인딩과 라우팅 테스트

use shared::protocol::ids::client;
use shared::protocol::{Envelope, Frame, JoinOutcome, LinkMessage};

use shared::service::user_dispatcher::DEFAULT_USER_QUEUE_SIZE;
use shared::service::UserDispatcher;

use super::*;
use crate::handler::WorldInbound;
use crate::protocol::{JoinTarget, WorldListResponse};
use crate::service::SessionPhase;
use crate::tool::error::GatewayError;

/// 정원이 찬 엔드포인트 입장 → WorldFull, joining 미설정
#[tokio::test]
async fn test_join_full_world() {
    let t = create_test_gateway();
    let mut link_rx = attach_world(&t.gateway, 1, 100, 100);
    let client = open_client(&t.gateway);
    t.gateway
        .login(&client.session, credentials(&t.gateway, 42))
        .await
        .unwrap();

    let result = t
        .gateway
        .join_world(&client.session, JoinTarget::Endpoint(1))
        .await;

    assert_eq!(result, Err(GatewayError::WorldFull(1)));
    assert_eq!(client.session.snapshot().joining, None);
    assert!(drain_link(&mut link_rx).is_empty(), "월드로 입장 요청이 나가면 안 됨");

    println!("✅ 정원 초과 입장 테스트 통과");
}

/// 등록되지 않은 엔드포인트 → WorldUnavailable
#[tokio::test]
async fn test_join_unknown_world() {
    let t = create_test_gateway();
    let client = open_client(&t.gateway);
    t.gateway
        .login(&client.session, credentials(&t.gateway, 42))
        .await
        .unwrap();

    let result = t
        .gateway
        .join_world(&client.session, JoinTarget::Endpoint(9))
        .await;
    assert!(matches!(result, Err(GatewayError::WorldUnavailable(_))));

    let quick = t.gateway.join_world(&client.session, JoinTarget::Quick).await;
    assert!(
        matches!(quick, Err(GatewayError::WorldUnavailable(_))),
        "등록된 엔드포인트가 없으면 빠른 입장도 실패해야 함"
    );
}

/// 입장 진행 중 두 번째 입장 요청 → JoinInProgress
#[tokio::test]
async fn test_join_while_joining() {
    let t = create_test_gateway();
    let _link1 = attach_world(&t.gateway, 1, 100, 0);
    let _link2 = attach_world(&t.gateway, 2, 100, 0);
    let client = open_client(&t.gateway);
    t.gateway
        .login(&client.session, credentials(&t.gateway, 42))
        .await
        .unwrap();

    t.gateway
        .join_world(&client.session, JoinTarget::Endpoint(1))
        .await
        .unwrap();
    assert_eq!(client.session.phase(), SessionPhase::Joining);

    let second = t
        .gateway
        .join_world(&client.session, JoinTarget::Endpoint(2))
        .await;
    assert_eq!(second, Err(GatewayError::JoinInProgress(1)));
    assert_eq!(client.session.snapshot().joining, Some(1));
}

/// 미인증 세션은 입장할 수 없음
#[tokio::test]
async fn test_join_requires_login() {
    let t = create_test_gateway();
    let _link = attach_world(&t.gateway, 1, 100, 0);
    let client = open_client(&t.gateway);

    let result = t
        .gateway
        .join_world(&client.session, JoinTarget::Endpoint(1))
        .await;
    assert_eq!(result, Err(GatewayError::NotVerified));
}

/// 빠른 입장은 busy 등급을 먼저 고름
#[tokio::test]
async fn test_quick_join_prefers_busy() {
    let t = create_test_gateway();
    let _idle = attach_world(&t.gateway, 1, 100, 10);
    let mut busy = attach_world(&t.gateway, 2, 100, 50);
    let _hot = attach_world(&t.gateway, 3, 100, 90);
    let _full = attach_world(&t.gateway, 4, 100, 100);

    for user_id in 1..=20 {
        let client = open_client(&t.gateway);
        t.gateway
            .login(&client.session, credentials(&t.gateway, user_id))
            .await
            .unwrap();
        let picked = t
            .gateway
            .join_world(&client.session, JoinTarget::Quick)
            .await
            .unwrap();
        assert_eq!(picked, 2, "busy 등급 엔드포인트가 선택되어야 함");
    }
    assert_eq!(drain_link(&mut busy).len(), 20);

    println!("✅ 빠른 입장 등급 선택 테스트 통과");
}

/// 입장 완료 응답이 보관된 push보다 먼저 전달됨
#[tokio::test]
async fn test_complete_join_flushes_after_reply() {
    let t = create_test_gateway();
    let mut link_rx = attach_world(&t.gateway, 1, 100, 0);
    let mut client = open_client(&t.gateway);
    t.gateway
        .login(&client.session, credentials(&t.gateway, 42))
        .await
        .unwrap();
    t.gateway
        .join_world(&client.session, JoinTarget::Endpoint(1))
        .await
        .unwrap();

    // 입장 완료 전에 월드가 먼저 보낸 push
    t.gateway.deliver_push(1, Envelope::new(42, 1, 1001, vec![])).await;
    t.gateway.deliver_push(1, Envelope::new(42, 1, 1002, vec![])).await;
    assert_eq!(client.session.snapshot().buffered, 2);

    let ticket = drain_link(&mut link_rx)
        .into_iter()
        .find_map(|m| match m {
            LinkMessage::JoinRequest(ticket) => Some(ticket),
            _ => None,
        })
        .unwrap();
    assert_eq!(ticket.generation, 1);

    t.gateway.complete_join(
        1,
        JoinOutcome {
            user_id: 42,
            session_id: ticket.session_id,
            generation: ticket.generation,
            accepted: true,
            players: 1,
        },
    );

    assert_eq!(
        client.received_ids(),
        vec![client::JOIN_WORLD_RESP, 1001, 1002],
        "입장 응답 뒤에 보관 메시지가 와야 함"
    );
    assert_eq!(client.session.phase(), SessionPhase::Bound);
    assert_eq!(t.gateway.worlds().get(1).unwrap().players(), 1);

    println!("✅ 입장 완료 순서 테스트 통과");
}

/// 거절된 입장은 바인딩 없이 Verified로 돌아감
#[tokio::test]
async fn test_rejected_join() {
    let t = create_test_gateway();
    let mut link_rx = attach_world(&t.gateway, 1, 100, 0);
    let mut client = open_client(&t.gateway);
    t.gateway
        .login(&client.session, credentials(&t.gateway, 42))
        .await
        .unwrap();
    t.gateway
        .join_world(&client.session, JoinTarget::Endpoint(1))
        .await
        .unwrap();
    drain_link(&mut link_rx);

    t.gateway.complete_join(
        1,
        JoinOutcome {
            user_id: 42,
            session_id: client.session.id(),
            generation: 1,
            accepted: false,
            players: 100,
        },
    );

    assert_eq!(client.received_ids(), vec![client::JOIN_WORLD_RESP]);
    assert_eq!(client.session.phase(), SessionPhase::Verified);
}

/// 게임 메시지는 현재 세대 번호와 함께 바인딩된 월드로 전달
#[tokio::test]
async fn test_forward_carries_generation() {
    let t = create_test_gateway();
    let mut link_rx = attach_world(&t.gateway, 1, 100, 0);
    let mut client = open_client(&t.gateway);
    login_and_bind(&t.gateway, &mut client, &mut link_rx, 42, 1).await;

    t.gateway
        .forward(&client.session, Frame::new(1500, &b"move"[..]))
        .unwrap();

    let forwarded = drain_link(&mut link_rx);
    assert_eq!(
        forwarded,
        vec![LinkMessage::Forward(Envelope::new(42, 1, 1500, &b"move"[..]))]
    );
}

/// 바인딩 전 게임 메시지 → NotBound
#[tokio::test]
async fn test_forward_without_binding() {
    let t = create_test_gateway();
    let _link = attach_world(&t.gateway, 1, 100, 0);
    let client = open_client(&t.gateway);
    t.gateway
        .login(&client.session, credentials(&t.gateway, 42))
        .await
        .unwrap();

    let result = t.gateway.forward(&client.session, Frame::new(1500, vec![]));
    assert_eq!(result, Err(GatewayError::NotBound));

    // 입장 중에도 아직 바인딩이 아님
    t.gateway
        .join_world(&client.session, JoinTarget::Endpoint(1))
        .await
        .unwrap();
    let result = t.gateway.forward(&client.session, Frame::new(1500, vec![]));
    assert_eq!(result, Err(GatewayError::NotBound));
}

/// 엔드포인트가 담당하지 않는 게임 메시지 → Unrouted
#[tokio::test]
async fn test_forward_unowned_message() {
    let t = create_test_gateway();
    let mut link_rx = attach_world_with(&t.gateway, 1, 1, 100, 0, vec![1001, 1002, 1004]);
    let mut client = open_client(&t.gateway);
    login_and_bind(&t.gateway, &mut client, &mut link_rx, 42, 1).await;

    let result = t.gateway.forward(&client.session, Frame::new(1500, vec![]));
    assert_eq!(result, Err(GatewayError::Unrouted(1500)));
    assert!(drain_link(&mut link_rx).is_empty());

    t.gateway
        .forward(&client.session, Frame::new(1001, vec![]))
        .unwrap();
    assert_eq!(drain_link(&mut link_rx).len(), 1);
}

/// 엔드포인트 이탈 → 바인딩 해제, WorldUnavailable 알림, 세션은 Verified 유지
#[tokio::test]
async fn test_remove_endpoint_unbinds_sessions() {
    let t = create_test_gateway();
    let mut link_rx = attach_world(&t.gateway, 1, 100, 0);
    let mut client = open_client(&t.gateway);
    login_and_bind(&t.gateway, &mut client, &mut link_rx, 42, 1).await;

    let affected = t.gateway.remove_endpoint(1, None);

    assert_eq!(affected, 1);
    assert!(t.gateway.worlds().get(1).is_none());
    assert_eq!(client.session.phase(), SessionPhase::Verified);
    assert_eq!(client.received_ids(), vec![client::WORLD_UNAVAILABLE]);
    assert!(t.gateway.registry().lookup(42).is_some(), "사용자 바인딩은 유지");

    // 다시 입장 가능
    let _link2 = attach_world(&t.gateway, 2, 100, 0);
    assert_eq!(
        t.gateway
            .join_world(&client.session, JoinTarget::Quick)
            .await
            .unwrap(),
        2
    );

    println!("✅ 엔드포인트 이탈 테스트 통과");
}

/// 오래된 링크의 제거 요청은 새 링크로 등록된 엔드포인트를 건드리지 않음
#[tokio::test]
async fn test_remove_endpoint_ignores_stale_link() {
    let t = create_test_gateway();
    let _link = attach_world(&t.gateway, 1, 100, 0);

    assert_eq!(t.gateway.remove_endpoint(1, Some(42)), 0);
    assert!(t.gateway.worlds().get(1).is_some());
}

/// 월드 목록은 프로세스 순서로 정렬
#[tokio::test]
async fn test_world_list_sorted() {
    let t = create_test_gateway();
    let _a = attach_world_with(&t.gateway, 10, 3, 100, 0, vec![]);
    let _b = attach_world_with(&t.gateway, 11, 1, 100, 0, vec![]);
    let _c = attach_world_with(&t.gateway, 12, 2, 100, 0, vec![]);
    let client = open_client(&t.gateway);

    assert_eq!(
        t.gateway.world_list(&client.session),
        Err(GatewayError::NotVerified)
    );

    t.gateway
        .login(&client.session, credentials(&t.gateway, 42))
        .await
        .unwrap();
    let worlds = t.gateway.world_list(&client.session).unwrap();
    let order: Vec<u32> = worlds.iter().map(|w| w.process_index).collect();
    assert_eq!(order, vec![1, 2, 3]);

    let frame = crate::protocol::Reply::world_list(worlds).unwrap();
    let body: WorldListResponse = frame.parse_json().unwrap();
    assert_eq!(body.worlds.len(), 3);
}

/// 한 사용자의 강제 종료가 잠금에 막혀도 같은 링크의 다른 사용자 push는 바로 전달
#[tokio::test]
async fn test_blocked_kick_does_not_delay_other_push() {
    let t = create_test_gateway();
    let mut link_rx = attach_world(&t.gateway, 1, 100, 0);
    let mut first = open_client(&t.gateway);
    let mut second = open_client(&t.gateway);
    login_and_bind(&t.gateway, &mut first, &mut link_rx, 1, 1).await;
    login_and_bind(&t.gateway, &mut second, &mut link_rx, 2, 1).await;

    let inbound = UserDispatcher::new(
        Arc::new(WorldInbound::new(t.gateway.clone())),
        DEFAULT_USER_QUEUE_SIZE,
    );

    // 사용자 1의 다른 작업이 잠금을 쥐고 있는 상황
    let held = t.gateway.registry().lock_user(1).await;
    let kick = LinkMessage::KickUser {
        user_id: 1,
        reason: "kicked".into(),
    };
    inbound.dispatch(kick.user_id(), (1, kick)).await;
    let push = LinkMessage::Push(Envelope::new(2, 1, 1501, Vec::<u8>::new()));
    inbound.dispatch(push.user_id(), (1, push)).await;

    let frame = tokio::time::timeout(std::time::Duration::from_secs(1), second.rx.recv())
        .await
        .expect("사용자 2 push가 사용자 1 처리에 막힘")
        .expect("사용자 2 송신 큐 닫힘");
    assert_eq!(frame.msg_id, 1501);
    assert!(!first.session.is_closed(), "잠금이 풀리기 전에는 종료되면 안 됨");

    drop(held);
    inbound.shutdown().await;
    assert!(first.session.is_closed());
    assert_eq!(first.close_rx.borrow().as_deref(), Some("kicked"));

    println!("✅ 사용자별 링크 처리 분리 테스트 통과");
}
