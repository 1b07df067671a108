//! 월드 엔드포인트 레지스트리
//!
//! 게이트웨이에 접속한 월드 노드(엔드포인트)의 용량, 부하, 담당 메시지 ID를 추적하고
//! 부하 등급으로 입장할 엔드포인트를 고릅니다.
//!
//! | 등급 | 점유율 | 선택 우선순위 |
//! |------|--------|---------------|
//! | busy | 40~80% | 1 |
//! | idle | 0~40%  | 2 |
//! | hot  | 80~100% | 3 |

use std::collections::HashSet;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use rand::seq::SliceRandom;
use tokio::sync::{mpsc, watch};
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, info, warn};

use shared::protocol::{EndpointRegistration, Frame, LinkMessage};

use crate::protocol::WorldSummary;
use crate::service::session::EndpointId;
use crate::tool::error::{GatewayError, GatewayResult};

/// 월드 노드 연결의 송신 측
#[derive(Debug, Clone)]
pub struct WorldLink {
    conn_id: u64,
    tx: mpsc::Sender<Frame>,
    close_tx: Arc<watch::Sender<bool>>,
}

impl WorldLink {
    pub fn new(conn_id: u64, tx: mpsc::Sender<Frame>) -> (Self, watch::Receiver<bool>) {
        let (close_tx, close_rx) = watch::channel(false);
        (
            Self {
                conn_id,
                tx,
                close_tx: Arc::new(close_tx),
            },
            close_rx,
        )
    }

    pub fn conn_id(&self) -> u64 {
        self.conn_id
    }

    /// 링크 메시지 전송 (bounded, 가득 차면 실패)
    pub fn send(&self, message: &LinkMessage) -> GatewayResult<()> {
        let frame = message.to_frame()?;
        match self.tx.try_send(frame) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                warn!("월드 링크 {} 송신 큐 가득 참 ({})", self.conn_id, message.kind());
                Err(GatewayError::WorldUnavailable(format!(
                    "링크 {} 송신 큐 초과",
                    self.conn_id
                )))
            }
            Err(TrySendError::Closed(_)) => Err(GatewayError::WorldUnavailable(format!(
                "링크 {} 종료됨",
                self.conn_id
            ))),
        }
    }

    pub fn close(&self) {
        self.close_tx.send_replace(true);
    }
}

/// 부하 등급
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadTier {
    Idle,
    Busy,
    Hot,
}

impl LoadTier {
    pub fn classify(players: u32, capacity: u32) -> Self {
        if capacity == 0 {
            return LoadTier::Hot;
        }
        let ratio = players as f64 / capacity as f64;
        if ratio >= 0.8 {
            LoadTier::Hot
        } else if ratio >= 0.4 {
            LoadTier::Busy
        } else {
            LoadTier::Idle
        }
    }
}

/// 등록된 월드 엔드포인트
#[derive(Debug)]
pub struct WorldEndpoint {
    pub endpoint_id: EndpointId,
    pub address: String,
    pub zone_id: u32,
    pub process_index: u32,
    pub capacity: u32,
    players: AtomicU32,
    owned_msg_ids: HashSet<u16>,
    link: WorldLink,
}

impl WorldEndpoint {
    pub fn new(registration: EndpointRegistration, link: WorldLink) -> Self {
        Self {
            endpoint_id: registration.endpoint_id,
            address: registration.address,
            zone_id: registration.zone_id,
            process_index: registration.process_index,
            capacity: registration.capacity,
            players: AtomicU32::new(registration.players),
            owned_msg_ids: registration.owned_msg_ids.into_iter().collect(),
            link,
        }
    }

    pub fn players(&self) -> u32 {
        self.players.load(Ordering::Relaxed)
    }

    pub fn set_players(&self, players: u32) {
        self.players.store(players, Ordering::Relaxed);
    }

    pub fn is_full(&self) -> bool {
        self.players() >= self.capacity
    }

    pub fn tier(&self) -> LoadTier {
        LoadTier::classify(self.players(), self.capacity)
    }

    /// 담당 메시지 ID 여부 (목록이 비어 있으면 모든 게임 메시지 처리)
    pub fn owns(&self, msg_id: u16) -> bool {
        self.owned_msg_ids.is_empty() || self.owned_msg_ids.contains(&msg_id)
    }

    pub fn link(&self) -> &WorldLink {
        &self.link
    }

    pub fn send(&self, message: &LinkMessage) -> GatewayResult<()> {
        self.link.send(message)
    }

    pub fn summary(&self) -> WorldSummary {
        WorldSummary {
            endpoint_id: self.endpoint_id,
            address: self.address.clone(),
            zone_id: self.zone_id,
            process_index: self.process_index,
            capacity: self.capacity,
            players: self.players(),
        }
    }
}

/// 월드 엔드포인트 레지스트리
#[derive(Default)]
pub struct WorldRegistry {
    endpoints: DashMap<EndpointId, Arc<WorldEndpoint>>,
}

impl WorldRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 엔드포인트 등록
    ///
    /// 다른 연결이 같은 ID로 살아 있으면 이전 연결을 닫고 교체합니다(이상 상황 로그).
    /// 교체된 이전 엔드포인트를 반환합니다.
    pub fn register(
        &self,
        registration: EndpointRegistration,
        link: WorldLink,
    ) -> Option<Arc<WorldEndpoint>> {
        let endpoint = Arc::new(WorldEndpoint::new(registration, link));
        let id = endpoint.endpoint_id;

        info!(
            "월드 엔드포인트 등록: {} ({}) 존 {} 프로세스 {} 용량 {}",
            id, endpoint.address, endpoint.zone_id, endpoint.process_index, endpoint.capacity
        );

        let previous = self.endpoints.insert(id, endpoint.clone());
        match previous {
            Some(old) if old.link.conn_id() != endpoint.link.conn_id() => {
                warn!(
                    "⚠️ 엔드포인트 ID 충돌: {} - 기존 연결 {} 종료 후 {}로 교체",
                    id,
                    old.link.conn_id(),
                    endpoint.link.conn_id()
                );
                old.link.close();
                Some(old)
            }
            Some(_) => {
                debug!("엔드포인트 {} 같은 연결에서 재등록", id);
                None
            }
            None => None,
        }
    }

    /// 엔드포인트 제거
    ///
    /// `conn_id`가 주어지면 해당 연결이 등록한 경우에만 제거합니다.
    /// 교체된 옛 연결이 닫히면서 새 등록을 지우지 않도록 하기 위함입니다.
    pub fn remove(&self, endpoint_id: EndpointId, conn_id: Option<u64>) -> Option<Arc<WorldEndpoint>> {
        let removed = match conn_id {
            Some(conn) => self
                .endpoints
                .remove_if(&endpoint_id, |_, ep| ep.link.conn_id() == conn),
            None => self.endpoints.remove(&endpoint_id),
        };
        match removed {
            Some((_, endpoint)) => {
                info!("월드 엔드포인트 제거: {}", endpoint_id);
                Some(endpoint)
            }
            None => None,
        }
    }

    pub fn get(&self, endpoint_id: EndpointId) -> Option<Arc<WorldEndpoint>> {
        self.endpoints.get(&endpoint_id).map(|e| e.clone())
    }

    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }

    /// 존 내 엔드포인트 목록 (프로세스 인덱스 순)
    pub fn list_zone(&self, zone_id: u32) -> Vec<WorldSummary> {
        let mut worlds: Vec<WorldSummary> = self
            .endpoints
            .iter()
            .filter(|e| e.zone_id == zone_id)
            .map(|e| e.summary())
            .collect();
        worlds.sort_by_key(|w| (w.process_index, w.endpoint_id));
        worlds
    }

    /// 부하 등급 기반 엔드포인트 선택
    ///
    /// busy → idle → hot 순으로 등급을 고르고, 등급 안에서는 균등 무작위로 선택합니다.
    /// 정원이 찬 엔드포인트는 후보에서 제외합니다.
    pub fn select_optimal(&self, zone_id: u32) -> Option<Arc<WorldEndpoint>> {
        let candidates: Vec<Arc<WorldEndpoint>> = self
            .endpoints
            .iter()
            .filter(|e| e.zone_id == zone_id && !e.is_full())
            .map(|e| e.clone())
            .collect();

        let mut rng = rand::thread_rng();
        for tier in [LoadTier::Busy, LoadTier::Idle, LoadTier::Hot] {
            let in_tier: Vec<&Arc<WorldEndpoint>> =
                candidates.iter().filter(|e| e.tier() == tier).collect();
            if let Some(picked) = in_tier.choose(&mut rng) {
                debug!(
                    "엔드포인트 선택: {} ({:?}, {}/{})",
                    picked.endpoint_id,
                    tier,
                    picked.players(),
                    picked.capacity
                );
                return Some((*picked).clone());
            }
        }
        None
    }

    /// 월드 측 부하 보고 반영
    pub fn update_players(&self, endpoint_id: EndpointId, players: u32) {
        if let Some(endpoint) = self.endpoints.get(&endpoint_id) {
            endpoint.set_players(players);
        }
    }
}
