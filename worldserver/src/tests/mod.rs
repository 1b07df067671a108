//! 월드 서버 테스트 모듈


// 테스트 유틸리티
use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use shared::protocol::{Envelope, Frame, JoinOutcome, JoinTicket, LinkMessage};
use shared::service::{MemoryRankedStore, RankedStore};

use crate::config::WorldConfig;
use crate::handler::WorldRouter;
use crate::server::WorldServer;
use crate::service::chat_admission::ChatScope;
use crate::service::game_logic::{DefaultGameLogic, GameLogic};
use crate::service::world_session::{GatewayLink, WorldHandle, WorldSession};
use crate::tool::error::WorldResult;

pub const TEST_GATEWAY: &str = "gateway-test";

/// 호출을 기록하는 게임 로직. 채팅 방송은 기본 구현에 맡깁니다.
pub struct RecordingLogic {
    chat: DefaultGameLogic,
    pub refused: Mutex<HashSet<u64>>,
    pub delivered: Mutex<Vec<(u64, u16, Bytes)>>,
    pub offline: Mutex<Vec<(u64, String)>>,
}

impl RecordingLogic {
    pub fn new(handle: WorldHandle) -> Self {
        Self {
            chat: DefaultGameLogic::new(handle),
            refused: Mutex::new(HashSet::new()),
            delivered: Mutex::new(Vec::new()),
            offline: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl GameLogic for RecordingLogic {
    async fn deliver_to_player(&self, user_id: u64, msg_id: u16, payload: Bytes) -> WorldResult<()> {
        self.delivered.lock().push((user_id, msg_id, payload));
        Ok(())
    }

    fn player_exists(&self, user_id: u64) -> bool {
        !self.refused.lock().contains(&user_id)
    }

    async fn broadcast_chat(&self, scope: ChatScope, from: u64, text: &str) -> WorldResult<usize> {
        self.chat.broadcast_chat(scope, from, text).await
    }

    async fn player_offline(&self, user_id: u64, reason: &str) {
        self.offline.lock().push((user_id, reason.to_string()));
    }
}

/// 테스트용 월드 (서버를 띄우지 않고 라우터를 직접 호출)
pub struct TestWorld {
    pub router: Arc<WorldRouter>,
    pub logic: Arc<RecordingLogic>,
    pub store: Arc<MemoryRankedStore>,
    pub link_rx: mpsc::Receiver<Frame>,
}

impl TestWorld {
    pub fn session(&self) -> &Arc<WorldSession> {
        self.router.session()
    }

    /// 링크로 나간 메시지를 모두 꺼냅니다.
    pub fn drain(&mut self) -> Vec<LinkMessage> {
        let mut messages = Vec::new();
        while let Ok(frame) = self.link_rx.try_recv() {
            messages.push(LinkMessage::from_frame(&frame).expect("링크 메시지 해석 실패"));
        }
        messages
    }

    /// 입장 요청을 보내고 회신을 돌려줍니다.
    pub async fn join(&mut self, user_id: u64, generation: u64) -> JoinOutcome {
        self.router
            .dispatch(
                TEST_GATEWAY,
                LinkMessage::JoinRequest(JoinTicket {
                    user_id,
                    session_id: user_id + 100,
                    generation,
                }),
            )
            .await;
        self.drain()
            .into_iter()
            .find_map(|m| match m {
                LinkMessage::JoinResult(outcome) => Some(outcome),
                _ => None,
            })
            .expect("입장 결과 회신 없음")
    }
}

pub fn test_config() -> WorldConfig {
    WorldConfig {
        redis_host: String::new(),
        ..WorldConfig::default()
    }
}

pub fn create_test_world_with(config: WorldConfig) -> TestWorld {
    let store = Arc::new(MemoryRankedStore::new());
    create_test_world_on(config, store.clone(), store)
}

/// `backend`를 저장소로 쓰는 월드. `store`는 테스트에서 직접 들여다볼 메모리 저장소
pub fn create_test_world_on(
    config: WorldConfig,
    backend: Arc<dyn RankedStore>,
    store: Arc<MemoryRankedStore>,
) -> TestWorld {
    let mut recorder = None;
    let server = WorldServer::with_game_logic(config, backend, |handle| {
        let logic = Arc::new(RecordingLogic::new(handle));
        recorder = Some(logic.clone());
        logic as Arc<dyn GameLogic>
    });

    let (tx, link_rx) = mpsc::channel(4096);
    server
        .session()
        .attach_gateway(GatewayLink::new(TEST_GATEWAY.to_string(), 1, tx));

    TestWorld {
        router: server.router().clone(),
        logic: recorder.expect("게임 로직 생성 안 됨"),
        store,
        link_rx,
    }
}

pub fn create_test_world() -> TestWorld {
    create_test_world_with(test_config())
}

pub fn forward(user_id: u64, generation: u64, msg_id: u16, payload: &str) -> Envelope {
    Envelope::new(user_id, generation, msg_id, Bytes::from(payload.to_string()))
}
