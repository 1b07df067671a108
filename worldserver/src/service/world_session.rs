//! 월드 세션
//!
//! 게이트웨이 세션의 월드 측 거울입니다. 입장한 플레이어와 그 플레이어를 소유한
//! 게이트웨이 링크, 바인딩 세대를 추적합니다.
//!
//! 플레이어 맵은 하나의 락으로 보호하며, 링크 송신은 블로킹하지 않는 `try_send`입니다.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use shared::protocol::{EndpointRegistration, Envelope, Frame, JoinOutcome, JoinTicket, LinkMessage};

use crate::config::WorldConfig;
use crate::tool::error::{WorldError, WorldResult};

/// 입장한 플레이어 정보
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayerEntry {
    pub gateway_id: String,
    pub session_id: u64,
    pub generation: u64,
}

/// 게이트웨이 하나와의 링크 송신 측
#[derive(Debug, Clone)]
pub struct GatewayLink {
    gateway_id: String,
    conn_id: u64,
    tx: mpsc::Sender<Frame>,
}

impl GatewayLink {
    pub fn new(gateway_id: String, conn_id: u64, tx: mpsc::Sender<Frame>) -> Self {
        Self {
            gateway_id,
            conn_id,
            tx,
        }
    }

    pub fn gateway_id(&self) -> &str {
        &self.gateway_id
    }

    pub fn conn_id(&self) -> u64 {
        self.conn_id
    }

    /// 링크 송신 큐에 넣습니다. 가득 차거나 닫혔으면 실패합니다.
    pub fn send(&self, message: &LinkMessage) -> WorldResult<()> {
        let frame = message.to_frame()?;
        self.tx.try_send(frame).map_err(|e| {
            WorldError::GatewayUnavailable(format!("{} ({})", self.gateway_id, e))
        })
    }
}

/// 월드 세션
pub struct WorldSession {
    endpoint_id: u32,
    zone_id: u32,
    process_index: u32,
    address: String,
    capacity: u32,
    owned_msg_ids: Vec<u16>,
    players: Mutex<HashMap<u64, PlayerEntry>>,
    player_count: AtomicU64,
    gateways: DashMap<String, GatewayLink>,
}

impl WorldSession {
    pub fn new(config: &WorldConfig, owned_msg_ids: Vec<u16>) -> Self {
        Self {
            endpoint_id: config.endpoint_id,
            zone_id: config.zone_id,
            process_index: config.process_index,
            address: config.advertise_address.clone(),
            capacity: config.capacity,
            owned_msg_ids,
            players: Mutex::new(HashMap::new()),
            player_count: AtomicU64::new(0),
            gateways: DashMap::new(),
        }
    }

    pub fn endpoint_id(&self) -> u32 {
        self.endpoint_id
    }

    pub fn zone_id(&self) -> u32 {
        self.zone_id
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    pub fn player_count(&self) -> u32 {
        self.player_count.load(Ordering::Relaxed) as u32
    }

    /// 게이트웨이에 보낼 등록 정보
    pub fn registration(&self) -> EndpointRegistration {
        EndpointRegistration {
            endpoint_id: self.endpoint_id,
            address: self.address.clone(),
            zone_id: self.zone_id,
            process_index: self.process_index,
            capacity: self.capacity,
            players: self.player_count(),
            owned_msg_ids: self.owned_msg_ids.clone(),
        }
    }

    // ---- 게이트웨이 링크 ----

    /// 게이트웨이 링크 등록. 같은 게이트웨이의 이전 링크가 있으면 교체합니다.
    pub fn attach_gateway(&self, link: GatewayLink) -> Option<GatewayLink> {
        let gateway_id = link.gateway_id.clone();
        let replaced = self.gateways.insert(gateway_id.clone(), link);
        if let Some(old) = &replaced {
            warn!(
                "게이트웨이 {} 링크 교체: {} → 새 링크",
                gateway_id, old.conn_id
            );
        } else {
            info!("게이트웨이 {} 링크 등록", gateway_id);
        }
        replaced
    }

    /// 게이트웨이 링크 해제
    ///
    /// 해제한 링크가 현재 링크일 때만 그 게이트웨이 소속 플레이어를 제거하고 돌려줍니다.
    pub fn detach_gateway(&self, gateway_id: &str, conn_id: u64) -> Vec<u64> {
        if self
            .gateways
            .remove_if(gateway_id, |_, link| link.conn_id == conn_id)
            .is_none()
        {
            return Vec::new();
        }

        let mut players = self.players.lock();
        let orphaned: Vec<u64> = players
            .iter()
            .filter(|(_, entry)| entry.gateway_id == gateway_id)
            .map(|(user_id, _)| *user_id)
            .collect();
        for user_id in &orphaned {
            players.remove(user_id);
        }
        self.player_count.store(players.len() as u64, Ordering::Relaxed);

        if !orphaned.is_empty() {
            warn!(
                "게이트웨이 {} 링크 해제로 플레이어 {}명 제거",
                gateway_id,
                orphaned.len()
            );
        }
        orphaned
    }

    pub fn gateway_count(&self) -> usize {
        self.gateways.len()
    }

    pub fn gateway(&self, gateway_id: &str) -> Option<GatewayLink> {
        self.gateways.get(gateway_id).map(|link| link.clone())
    }

    // ---- 플레이어 ----

    pub fn player(&self, user_id: u64) -> Option<PlayerEntry> {
        self.players.lock().get(&user_id).cloned()
    }

    pub fn user_ids(&self) -> Vec<u64> {
        self.players.lock().keys().copied().collect()
    }

    /// 입장 요청 처리
    ///
    /// 이미 입장한 플레이어의 새 세대 요청은 재바인딩으로 수락합니다.
    /// 오래된 세대의 요청과 정원 초과는 거절합니다.
    pub fn accept_join(&self, gateway_id: &str, ticket: &JoinTicket) -> JoinOutcome {
        let mut players = self.players.lock();

        let accepted = match players.get(&ticket.user_id) {
            Some(existing) if ticket.generation < existing.generation => {
                warn!(
                    "오래된 입장 요청 거절: 사용자 {} 세대 {} < {}",
                    ticket.user_id, ticket.generation, existing.generation
                );
                false
            }
            Some(_) => true,
            None => players.len() < self.capacity as usize,
        };

        if accepted {
            players.insert(
                ticket.user_id,
                PlayerEntry {
                    gateway_id: gateway_id.to_string(),
                    session_id: ticket.session_id,
                    generation: ticket.generation,
                },
            );
        }
        let count = players.len() as u32;
        self.player_count.store(count as u64, Ordering::Relaxed);

        JoinOutcome {
            user_id: ticket.user_id,
            session_id: ticket.session_id,
            generation: ticket.generation,
            accepted,
            players: count,
        }
    }

    /// 게이트웨이 세션 교체에 따른 재바인딩
    pub fn rebind(&self, gateway_id: &str, user_id: u64, generation: u64) -> bool {
        let mut players = self.players.lock();
        match players.get_mut(&user_id) {
            Some(entry) if generation >= entry.generation => {
                entry.generation = generation;
                entry.gateway_id = gateway_id.to_string();
                debug!("사용자 {} 재바인딩: 세대 {}", user_id, generation);
                true
            }
            Some(entry) => {
                warn!(
                    "오래된 재바인딩 무시: 사용자 {} 세대 {} < {}",
                    user_id, generation, entry.generation
                );
                false
            }
            None => false,
        }
    }

    /// 플레이어 이탈. 현재 세대 이상일 때만 제거합니다.
    pub fn leave(&self, user_id: u64, generation: u64) -> Option<PlayerEntry> {
        let mut players = self.players.lock();
        let current = players.get(&user_id)?.generation;
        if generation < current {
            warn!(
                "오래된 이탈 요청 무시: 사용자 {} 세대 {} < {}",
                user_id, generation, current
            );
            return None;
        }
        let removed = players.remove(&user_id);
        self.player_count.store(players.len() as u64, Ordering::Relaxed);
        removed
    }

    /// 전달 메시지의 세대를 확인합니다.
    ///
    /// 현재 세대보다 낮으면 교체된 세션의 메시지이므로 거부합니다.
    pub fn check_forward(&self, envelope: &Envelope) -> WorldResult<PlayerEntry> {
        let mut players = self.players.lock();
        let entry = players
            .get_mut(&envelope.user_id)
            .ok_or(WorldError::PlayerNotFound(envelope.user_id))?;
        if envelope.generation < entry.generation {
            return Err(WorldError::StaleGeneration {
                user_id: envelope.user_id,
                generation: envelope.generation,
                current: entry.generation,
            });
        }
        // 재바인딩 알림보다 새 세대 메시지가 먼저 도착한 경우
        entry.generation = envelope.generation;
        Ok(entry.clone())
    }

    /// 플레이어에게 push
    pub fn push(&self, user_id: u64, msg_id: u16, payload: Bytes) -> WorldResult<()> {
        let entry = self
            .player(user_id)
            .ok_or(WorldError::PlayerNotFound(user_id))?;
        let link = self
            .gateway(&entry.gateway_id)
            .ok_or_else(|| WorldError::GatewayUnavailable(entry.gateway_id.clone()))?;
        link.send(&LinkMessage::Push(Envelope::new(
            user_id,
            entry.generation,
            msg_id,
            payload,
        )))
    }

    /// 게이트웨이에 플레이어 강제 종료 요청
    pub fn kick(&self, user_id: u64, reason: &str) -> WorldResult<()> {
        let entry = self
            .player(user_id)
            .ok_or(WorldError::PlayerNotFound(user_id))?;
        let link = self
            .gateway(&entry.gateway_id)
            .ok_or_else(|| WorldError::GatewayUnavailable(entry.gateway_id.clone()))?;
        link.send(&LinkMessage::KickUser {
            user_id,
            reason: reason.to_string(),
        })
    }
}

/// 게임 로직에 노출하는 월드 핸들
#[derive(Clone)]
pub struct WorldHandle {
    session: Arc<WorldSession>,
}

impl WorldHandle {
    pub fn new(session: Arc<WorldSession>) -> Self {
        Self { session }
    }

    /// 플레이어에게 메시지를 보냅니다. (`PushToUser`)
    pub fn push_to_user(&self, user_id: u64, msg_id: u16, payload: impl Into<Bytes>) -> WorldResult<()> {
        self.session.push(user_id, msg_id, payload.into())
    }

    /// 플레이어를 오프라인 처리하도록 게이트웨이에 요청합니다. (`NotifyOffline`)
    pub fn notify_offline(&self, user_id: u64, reason: &str) -> WorldResult<()> {
        info!("사용자 {} 오프라인 요청: {}", user_id, reason);
        self.session.kick(user_id, reason)
    }

    /// 입장한 모든 플레이어에게 보냅니다. 전달에 성공한 수를 반환합니다.
    pub fn broadcast(&self, msg_id: u16, payload: Bytes) -> usize {
        self.session
            .user_ids()
            .into_iter()
            .filter(|user_id| match self.session.push(*user_id, msg_id, payload.clone()) {
                Ok(()) => true,
                Err(e) => {
                    debug!("방송 전달 실패: 사용자 {} - {}", user_id, e);
                    false
                }
            })
            .count()
    }

    pub fn player_exists(&self, user_id: u64) -> bool {
        self.session.player(user_id).is_some()
    }

    pub fn player_count(&self) -> u32 {
        self.session.player_count()
    }
}
