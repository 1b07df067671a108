//! 게이트웨이 세션 서비스
//!
//! 세션 상태 머신의 전이(로그인, 재연결, 월드 입장, 끊김, 로그아웃, 만료)를
//! 연결 레지스트리와 월드 레지스트리 위에서 수행합니다.
//!
//! 같은 사용자 ID에 대한 전이는 `ConnectionRegistry::lock_user`로 직렬화하고,
//! 공유 저장소 왕복 중에는 어떤 락도 잡지 않습니다.

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use shared::protocol::{Envelope, Frame, JoinOutcome, JoinTicket, LinkMessage};
use shared::service::redis::core::redis_get_key::KeyType;
use shared::service::RankedStore;

use crate::config::GatewayConfig;
use crate::protocol::{
    Credentials, JoinTarget, LoginResponse, ReconnectResponse, Reply, WorldSummary,
};
use crate::service::auth_service::AuthService;
use crate::service::connection_registry::{BindMode, ConnectionRegistry, Displaced};
use crate::service::session::{EndpointId, LinkState, Session, UnsentOutbound};
use crate::service::world_registry::{WorldLink, WorldRegistry};
use crate::tool::error::{ErrorHandler, GatewayError, GatewayResult};

/// 세션 정리 결과
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// 재연결 유예 시간 초과
    pub grace_expired: usize,
    /// 하트비트 무응답
    pub timed_out: usize,
    /// 이미 닫혀 있던 연결 정리
    pub reaped: usize,
}

impl SweepReport {
    pub fn total(&self) -> usize {
        self.grace_expired + self.timed_out + self.reaped
    }
}

/// 게이트웨이 세션 서비스
pub struct GatewayService {
    config: GatewayConfig,
    registry: Arc<ConnectionRegistry>,
    worlds: Arc<WorldRegistry>,
    auth: AuthService,
    store: Arc<dyn RankedStore>,
}

impl GatewayService {
    pub fn new(config: GatewayConfig, store: Arc<dyn RankedStore>) -> Self {
        let auth = AuthService::new(&config.jwt_secret, config.zone_id);
        Self {
            registry: Arc::new(ConnectionRegistry::new(config.traffic.clone())),
            worlds: Arc::new(WorldRegistry::new()),
            auth,
            store,
            config,
        }
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    pub fn worlds(&self) -> &Arc<WorldRegistry> {
        &self.worlds
    }

    pub fn auth(&self) -> &AuthService {
        &self.auth
    }

    /// 새 연결에 대한 세션 생성
    pub fn open_session(
        &self,
        addr: String,
    ) -> GatewayResult<(Arc<Session>, mpsc::Receiver<Frame>, watch::Receiver<Option<String>>)> {
        if self.registry.connection_count() >= self.config.max_connections {
            return Err(GatewayError::WorldUnavailable(format!(
                "최대 연결 수 초과 ({})",
                self.config.max_connections
            )));
        }
        let (tx, rx) = mpsc::channel(self.config.session.outbound_queue_size);
        let (session, close_rx) = Session::new(
            self.registry.next_session_id(),
            addr,
            tx,
            self.config.session.disconnect_buffer_size,
        );
        self.registry.add(session.clone());
        debug!("세션 {} 생성 ({})", session.id(), session.addr());
        Ok((session, rx, close_rx))
    }

    pub fn heartbeat(&self, session: &Session) -> GatewayResult<()> {
        session.touch_heartbeat(Instant::now());
        session.send(Reply::heartbeat_ack()?)
    }

    /// 로그인
    ///
    /// 같은 사용자 ID를 가진 다른 세션이 있으면 밀어내고 월드 바인딩을 넘겨받습니다.
    pub async fn login(
        &self,
        session: &Arc<Session>,
        credentials: Credentials,
    ) -> GatewayResult<LoginResponse> {
        if session.user_id().is_some() {
            return Err(GatewayError::AlreadyVerified);
        }
        self.auth.verify(&credentials)?;
        let user_id = credentials.user_id;

        let outcome = {
            let _guard = self.registry.lock_user(user_id).await;
            if let Some(existing) = self.registry.lookup(user_id) {
                if existing.with_state(|s| s.link == LinkState::Reconnecting) {
                    return Err(GatewayError::DuplicateSession(user_id));
                }
            }
            let outcome = self.registry.bind_user(user_id, session, BindMode::Login)?;
            if let Some(displaced) = &outcome.displaced {
                self.rebind_world(user_id, outcome.generation, displaced);
            }
            outcome
        };

        info!(
            "로그인 완료: 사용자 {} 세션 {} (세대 {})",
            user_id,
            session.id(),
            outcome.generation
        );

        self.record_user_gateway(user_id).await;

        Ok(LoginResponse {
            user_id,
            session_id: session.id(),
            bound_endpoint: session.snapshot().bound,
        })
    }

    /// 재연결
    ///
    /// 살아 있는 이전 세션의 보관 메시지를 순서대로 넘겨받아 전송하고 이전 세션을 밀어냅니다.
    pub async fn reconnect(
        &self,
        session: &Arc<Session>,
        credentials: Credentials,
    ) -> GatewayResult<ReconnectResponse> {
        if session.user_id().is_some() {
            return Err(GatewayError::AlreadyVerified);
        }
        self.auth.verify(&credentials)?;
        let user_id = credentials.user_id;

        let (old, previous_link) = {
            let _guard = self.registry.lock_user(user_id).await;
            let old = self
                .registry
                .lookup(user_id)
                .ok_or(GatewayError::NoActiveSession(user_id))?;
            let previous = old.with_state(|s| -> GatewayResult<LinkState> {
                if s.closed {
                    return Err(GatewayError::NoActiveSession(user_id));
                }
                if s.link == LinkState::Reconnecting {
                    return Err(GatewayError::AlreadyReconnecting(user_id));
                }
                let previous = s.link;
                s.link = LinkState::Reconnecting;
                Ok(previous)
            })?;
            (old, previous)
        };

        self.record_user_gateway(user_id).await;

        let _guard = self.registry.lock_user(user_id).await;
        let still_owner = self
            .registry
            .lookup(user_id)
            .map(|current| Arc::ptr_eq(&current, &old))
            .unwrap_or(false);
        if !still_owner {
            return Err(GatewayError::NoActiveSession(user_id));
        }

        let outcome = match self.registry.bind_user(user_id, session, BindMode::Reconnect) {
            Ok(outcome) => outcome,
            Err(e) => {
                old.with_state(|s| {
                    if s.link == LinkState::Reconnecting {
                        s.link = previous_link;
                    }
                });
                return Err(e);
            }
        };
        if let Some(displaced) = &outcome.displaced {
            self.rebind_world(user_id, outcome.generation, displaced);
        }

        info!(
            "재연결 완료: 사용자 {} 세션 {} → {} (재전송 {}개)",
            user_id,
            old.id(),
            session.id(),
            outcome.replayed
        );

        Ok(ReconnectResponse {
            user_id,
            session_id: session.id(),
            bound_endpoint: session.snapshot().bound,
            replayed: outcome.replayed,
        })
    }

    /// 존 내 월드 목록 (읽기 전용)
    pub fn world_list(&self, session: &Session) -> GatewayResult<Vec<WorldSummary>> {
        if session.user_id().is_none() {
            return Err(GatewayError::NotVerified);
        }
        Ok(self.worlds.list_zone(self.config.zone_id))
    }

    /// 월드 입장 요청
    ///
    /// 성공하면 `joining`을 설정하고 월드에 입장 요청을 보냅니다.
    /// 응답은 월드 측 완료 신호(`complete_join`) 이후 전송됩니다.
    pub async fn join_world(&self, session: &Arc<Session>, target: JoinTarget) -> GatewayResult<EndpointId> {
        let user_id = session.user_id().ok_or(GatewayError::NotVerified)?;
        let _guard = self.registry.lock_user(user_id).await;

        let endpoint = match target {
            JoinTarget::Endpoint(id) => self
                .worlds
                .get(id)
                .filter(|ep| ep.zone_id == self.config.zone_id)
                .ok_or_else(|| GatewayError::WorldUnavailable(format!("엔드포인트 {}", id)))?,
            JoinTarget::Quick => self
                .worlds
                .select_optimal(self.config.zone_id)
                .ok_or_else(|| GatewayError::WorldUnavailable("입장 가능한 엔드포인트 없음".into()))?,
        };
        if endpoint.is_full() {
            return Err(GatewayError::WorldFull(endpoint.endpoint_id));
        }

        let endpoint_id = endpoint.endpoint_id;
        let (previous, generation) = session.with_state(|s| -> GatewayResult<_> {
            if s.closed {
                return Err(GatewayError::SessionClosed(session.id()));
            }
            let previous = s.begin_join(endpoint_id)?;
            Ok((previous, s.generation))
        })?;

        if let Some(prev) = previous.filter(|prev| *prev != endpoint_id) {
            self.send_to_endpoint(
                prev,
                &LinkMessage::PlayerLeave {
                    user_id,
                    generation,
                    reason: "world change".into(),
                },
            );
        }

        let ticket = LinkMessage::JoinRequest(JoinTicket {
            user_id,
            session_id: session.id(),
            generation,
        });
        if let Err(e) = endpoint.send(&ticket) {
            session.with_state(|s| {
                if s.joining == Some(endpoint_id) {
                    s.joining = None;
                }
            });
            return Err(e);
        }

        info!("월드 입장 시작: 사용자 {} → 엔드포인트 {}", user_id, endpoint_id);
        Ok(endpoint_id)
    }

    /// 월드 측 입장 결과 처리
    pub fn complete_join(&self, from: EndpointId, outcome: JoinOutcome) {
        self.worlds.update_players(from, outcome.players);

        let Some(session) = self.registry.lookup(outcome.user_id) else {
            warn!(
                "입장 결과 수신했으나 사용자 {} 세션 없음 (엔드포인트 {})",
                outcome.user_id, from
            );
            if outcome.accepted {
                self.send_to_endpoint(
                    from,
                    &LinkMessage::PlayerLeave {
                        user_id: outcome.user_id,
                        generation: outcome.generation,
                        reason: "session gone".into(),
                    },
                );
            }
            return;
        };

        let reply = match Reply::join_world(from, outcome.accepted) {
            Ok(reply) => reply,
            Err(e) => {
                ErrorHandler::log(&e, "GatewayService", "complete_join");
                return;
            }
        };

        match session.complete_join(from, outcome.accepted, reply) {
            Ok(Some(flushed)) => info!(
                "월드 입장 {}: 사용자 {} 엔드포인트 {} (보관 메시지 {}개 전송)",
                if outcome.accepted { "완료" } else { "거절" },
                outcome.user_id,
                from,
                flushed
            ),
            Ok(None) => warn!(
                "늦게 도착한 입장 결과 무시: 사용자 {} 엔드포인트 {}",
                outcome.user_id, from
            ),
            Err(e) => ErrorHandler::log(&e, "GatewayService", "complete_join"),
        }
    }

    /// 게임 메시지를 바인딩된 월드로 전달합니다.
    pub fn forward(&self, session: &Session, frame: Frame) -> GatewayResult<()> {
        let user_id = session.user_id().ok_or(GatewayError::NotVerified)?;
        let bound = session.snapshot().bound.ok_or(GatewayError::NotBound)?;
        let endpoint = self
            .worlds
            .get(bound)
            .ok_or_else(|| GatewayError::WorldUnavailable(format!("엔드포인트 {}", bound)))?;

        if !endpoint.owns(frame.msg_id) {
            warn!(
                "라우팅 불가: 엔드포인트 {}가 메시지 {}를 담당하지 않음 (사용자 {})",
                bound, frame.msg_id, user_id
            );
            return Err(GatewayError::Unrouted(frame.msg_id));
        }

        // 바인딩 확인과 전송을 한 임계 구역에서 처리해 입장 전이와 섞이지 않게 함
        session.with_state(|s| {
            if s.bound != Some(bound) || s.user_id != Some(user_id) {
                return Err(GatewayError::NotBound);
            }
            let envelope = Envelope::new(user_id, s.generation, frame.msg_id, frame.payload);
            endpoint.send(&LinkMessage::Forward(envelope))
        })
    }

    /// 월드에서 온 push 처리
    ///
    /// 조회한 세션이 교체 중에 닫혔으면 한 번 다시 조회합니다.
    pub async fn deliver_push(&self, from: EndpointId, envelope: Envelope) {
        let user_id = envelope.user_id;
        let frame = envelope.to_client_frame();

        for attempt in 0..2 {
            let Some(session) = self.registry.lookup(user_id) else {
                debug!("push 대상 사용자 {} 없음 (엔드포인트 {})", user_id, from);
                return;
            };
            match session.deliver_push(from, frame.clone()) {
                Ok(_) => return,
                Err(GatewayError::SessionClosed(_)) if attempt == 0 => continue,
                Err(GatewayError::BufferOverflow(_)) => {
                    warn!("사용자 {} 보관 버퍼 초과, 세션 종료", user_id);
                    self.finalize(&session, "buffer overflow").await;
                    return;
                }
                Err(e) => {
                    ErrorHandler::log(&e, "GatewayService", "deliver_push");
                    return;
                }
            }
        }
    }

    /// 월드 요청에 의한 강제 종료 (`NotifyOffline`)
    pub async fn kick_user(&self, user_id: u64, reason: &str) -> bool {
        let Some(session) = self.registry.lookup(user_id) else {
            return false;
        };
        if let Ok(notice) = Reply::kick(reason) {
            session.push_notice(notice);
        }
        self.finalize(&session, reason).await;
        true
    }

    /// 전송 계층 종료
    ///
    /// 미인증 세션은 즉시 제거하고, 인증된 세션은 `Disconnected`로 바꿔 유예 시간 동안
    /// 사용자 바인딩을 유지합니다.
    pub async fn disconnect(&self, session: &Arc<Session>) {
        self.disconnect_with_unsent(session, UnsentOutbound::default())
            .await
    }

    /// 끊김 처리 후 송신 큐에 남아 있던 프레임을 보관 버퍼로 옮깁니다.
    ///
    /// 상태를 먼저 `Disconnected`로 바꾸므로 이후 push는 송신 큐에 들어가지 않습니다.
    pub async fn disconnect_with_unsent(&self, session: &Arc<Session>, unsent: UnsentOutbound) {
        let Some(user_id) = session.user_id() else {
            self.registry.discard(session.id());
            session.close("disconnected");
            debug!("미인증 세션 {} 제거", session.id());
            return;
        };

        let _guard = self.registry.lock_user(user_id).await;
        let now = Instant::now();
        let changed = session.with_state(|s| {
            if s.closed || s.user_id.is_none() || s.link == LinkState::Disconnected {
                return false;
            }
            s.link = LinkState::Disconnected;
            s.disconnected_at = Some(now);
            true
        });
        if changed {
            info!(
                "세션 {} 연결 끊김: 사용자 {} (재연결 대기 {:?})",
                session.id(),
                user_id,
                self.config.session.disconnect_grace
            );
        }

        let frames = unsent.into_frames();
        if frames.is_empty() {
            return;
        }
        match session.requeue_unsent(frames) {
            Ok(count) => debug!("세션 {} 미전송 프레임 {}개 보관", session.id(), count),
            Err(e) => ErrorHandler::log(&e, "GatewayService", "requeue_unsent"),
        }
    }

    /// 명시적 로그아웃
    pub async fn logout(&self, session: &Arc<Session>) -> GatewayResult<()> {
        let user_id = session.user_id().ok_or(GatewayError::NotVerified)?;
        {
            let _guard = self.registry.lock_user(user_id).await;
            self.release(session, "logout");
        }
        self.clear_user_gateway(user_id).await;
        info!("로그아웃: 사용자 {} 세션 {}", user_id, session.id());
        Ok(())
    }

    /// 세션을 최종 정리합니다. 월드 바인딩 해제, 레지스트리 정리, 연결 종료.
    pub async fn finalize(&self, session: &Arc<Session>, reason: &str) {
        let user_id = session.user_id();
        let released = match user_id {
            Some(uid) => {
                let _guard = self.registry.lock_user(uid).await;
                self.release(session, reason)
            }
            None => self.release(session, reason),
        };
        if let Some(uid) = released {
            self.clear_user_gateway(uid).await;
        }
    }

    /// 동기 정리 단계. 바인딩을 해제한 사용자 ID를 반환합니다.
    fn release(&self, session: &Arc<Session>, reason: &str) -> Option<u64> {
        let (user_id, bound, joining, generation) = session.with_state(|s| {
            let taken = (s.user_id.take(), s.bound.take(), s.joining.take(), s.generation);
            s.closed = true;
            s.take_buffer();
            taken
        });

        self.registry.discard(session.id());
        session.signal_close(reason);

        let user_id = user_id?;
        if !self.registry.unbind_user(user_id, session) {
            return None;
        }
        for endpoint_id in [bound, joining].into_iter().flatten() {
            self.send_to_endpoint(
                endpoint_id,
                &LinkMessage::PlayerLeave {
                    user_id,
                    generation,
                    reason: reason.to_string(),
                },
            );
        }
        info!("세션 {} 정리: 사용자 {} ({})", session.id(), user_id, reason);
        Some(user_id)
    }

    /// 주기적 세션 정리
    pub async fn sweep(&self) -> SweepReport {
        self.sweep_at(Instant::now()).await
    }

    pub async fn sweep_at(&self, now: Instant) -> SweepReport {
        let grace = self.config.session.disconnect_grace;
        let timeout = self.config.session.no_response_timeout;

        let mut report = SweepReport::default();
        let mut expired = Vec::new();
        for session in self.registry.sessions() {
            let verdict = session.with_state(|s| {
                if s.closed {
                    return Some("closed");
                }
                if now.saturating_duration_since(s.last_heartbeat) > timeout {
                    return Some("no response");
                }
                match (s.link, s.disconnected_at) {
                    (LinkState::Disconnected, Some(at)) if now.saturating_duration_since(at) > grace => {
                        Some("disconnect grace expired")
                    }
                    _ => None,
                }
            });
            let Some(reason) = verdict else {
                continue;
            };
            match reason {
                "closed" => report.reaped += 1,
                "no response" => report.timed_out += 1,
                _ => report.grace_expired += 1,
            }
            expired.push((session, reason));
        }

        for (session, reason) in expired {
            self.finalize(&session, reason).await;
        }
        report
    }

    /// 월드 엔드포인트 등록
    pub fn register_endpoint(
        &self,
        registration: shared::protocol::EndpointRegistration,
        link: WorldLink,
    ) -> GatewayResult<()> {
        let ack = LinkMessage::RegisterAck {
            gateway_id: self.config.gateway_id.clone(),
        };
        link.send(&ack)?;
        if let Some(replaced) = self.worlds.register(registration, link) {
            self.unbind_endpoint_sessions(replaced.endpoint_id);
        }
        Ok(())
    }

    /// 월드 엔드포인트 제거
    ///
    /// 해당 엔드포인트에 바인딩(또는 입장 중)된 세션을 모두 풀고 `WorldUnavailable`을 알립니다.
    /// 세션은 `Verified`로 남아 다른 월드에 다시 입장할 수 있습니다.
    pub fn remove_endpoint(&self, endpoint_id: EndpointId, conn_id: Option<u64>) -> usize {
        if self.worlds.remove(endpoint_id, conn_id).is_none() {
            return 0;
        }
        self.unbind_endpoint_sessions(endpoint_id)
    }

    fn unbind_endpoint_sessions(&self, endpoint_id: EndpointId) -> usize {
        let mut affected = 0;
        for session in self.registry.sessions() {
            if !session.release_endpoint(endpoint_id) {
                continue;
            }
            affected += 1;
            if let Ok(notice) = Reply::world_unavailable(endpoint_id) {
                let _ = session.send(notice);
            }
        }
        if affected > 0 {
            warn!(
                "엔드포인트 {} 이탈로 세션 {}개 바인딩 해제",
                endpoint_id, affected
            );
        }
        affected
    }

    fn rebind_world(&self, user_id: u64, generation: u64, displaced: &Displaced) {
        if displaced.dropped > 0 {
            info!(
                "사용자 {} 이전 세션 보관 메시지 {}개 폐기",
                user_id, displaced.dropped
            );
        }
        for endpoint_id in [displaced.bound, displaced.joining].into_iter().flatten() {
            self.send_to_endpoint(endpoint_id, &LinkMessage::Rebind { user_id, generation });
        }
    }

    fn send_to_endpoint(&self, endpoint_id: EndpointId, message: &LinkMessage) {
        match self.worlds.get(endpoint_id) {
            Some(endpoint) => {
                if let Err(e) = endpoint.send(message) {
                    ErrorHandler::log(&e, "GatewayService", message.kind());
                }
            }
            None => debug!(
                "엔드포인트 {} 없음, {} 생략",
                endpoint_id,
                message.kind()
            ),
        }
    }

    async fn record_user_gateway(&self, user_id: u64) {
        let key = KeyType::UserGateway.get_key(&user_id);
        let ttl = self.config.session.no_response_timeout.as_secs();
        if let Err(e) = self.store.set(&key, &self.config.gateway_id, Some(ttl)).await {
            warn!("사용자 {} 게이트웨이 기록 실패: {}", user_id, e);
        }
    }

    async fn clear_user_gateway(&self, user_id: u64) {
        let key = KeyType::UserGateway.get_key(&user_id);
        if let Err(e) = self.store.del(&key).await {
            warn!("사용자 {} 게이트웨이 기록 삭제 실패: {}", user_id, e);
        }
    }
}
