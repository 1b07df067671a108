//! 연결 레지스트리
//!
//! 연결 ID → 세션, 사용자 ID → 세션 매핑을 관리합니다.
//! 사용자 바인딩 변경은 레지스트리 락 하나 아래에서 확인과 저장을 함께 처리하므로,
//! 어떤 순간에도 한 사용자 ID를 소유한 세션은 최대 하나입니다.
//!
//! 락 순서: `users` → 세션 상태 락. 세션 상태 락을 잡은 채 `users`를 잡지 않습니다.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::OwnedMutexGuard;
use tracing::{debug, info, warn};

use shared::protocol::Frame;

use crate::config::TrafficLimits;
use crate::protocol::Reply;
use crate::service::session::{EndpointId, LinkState, Session, SessionId};
use crate::service::traffic::TrafficVerdict;
use crate::tool::error::{GatewayError, GatewayResult};

/// 바인딩 방식
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindMode {
    /// 새 로그인: 이전 세션의 보관 메시지는 버림
    Login,
    /// 재연결: 이전 세션의 보관 메시지를 순서대로 넘겨받아 전송
    Reconnect,
}

/// 밀려난 이전 세션 정보
#[derive(Debug)]
pub struct Displaced {
    pub session: Arc<Session>,
    pub bound: Option<EndpointId>,
    pub joining: Option<EndpointId>,
    pub dropped: usize,
}

/// 바인딩 결과
#[derive(Debug)]
pub struct BindOutcome {
    pub generation: u64,
    pub displaced: Option<Displaced>,
    /// 새 세션에서 재전송된 보관 메시지 수
    pub replayed: usize,
}

struct UserBinding {
    session: Arc<Session>,
}

/// 사용자 락 가드
pub struct UserLockGuard<'a> {
    user_id: u64,
    locks: &'a DashMap<u64, Arc<tokio::sync::Mutex<()>>>,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for UserLockGuard<'_> {
    fn drop(&mut self) {
        self.guard.take();
        // 항목 하나만 남았으면 대기자 없음
        self.locks
            .remove_if(&self.user_id, |_, lock| Arc::strong_count(lock) == 1);
    }
}

/// 연결 레지스트리 통계
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegistryStats {
    pub connections: usize,
    pub users: usize,
    pub displacements: u64,
    pub abuse_closures: u64,
}

/// 연결 레지스트리
pub struct ConnectionRegistry {
    connections: DashMap<SessionId, Arc<Session>>,
    users: Mutex<HashMap<u64, UserBinding>>,
    generations: Mutex<HashMap<u64, u64>>,
    user_locks: DashMap<u64, Arc<tokio::sync::Mutex<()>>>,
    next_session_id: AtomicU64,
    traffic_limits: TrafficLimits,
    displacements: AtomicU64,
    abuse_closures: AtomicU64,
}

impl ConnectionRegistry {
    pub fn new(traffic_limits: TrafficLimits) -> Self {
        Self {
            connections: DashMap::new(),
            users: Mutex::new(HashMap::new()),
            generations: Mutex::new(HashMap::new()),
            user_locks: DashMap::new(),
            next_session_id: AtomicU64::new(1),
            traffic_limits,
            displacements: AtomicU64::new(0),
            abuse_closures: AtomicU64::new(0),
        }
    }

    pub fn next_session_id(&self) -> SessionId {
        self.next_session_id.fetch_add(1, Ordering::Relaxed)
    }

    /// 연결 추가. 중복이면 경고만 남기고 false
    pub fn add(&self, session: Arc<Session>) -> bool {
        let id = session.id();
        match self.connections.entry(id) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                warn!("연결 {} 중복 추가 무시", id);
                false
            }
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(session);
                debug!("연결 {} 추가 (현재 {}개)", id, self.connections.len());
                true
            }
        }
    }

    /// 연결 제거. 없으면 경고만 남기고 None
    pub fn remove(&self, session_id: SessionId) -> Option<Arc<Session>> {
        let removed = self.connections.remove(&session_id).map(|(_, s)| s);
        if removed.is_none() {
            warn!("연결 {} 제거 요청 - 등록되지 않은 연결", session_id);
        }
        removed
    }

    /// 이미 정리 중인 연결 제거 (없어도 경고하지 않음)
    pub(crate) fn discard(&self, session_id: SessionId) -> Option<Arc<Session>> {
        self.connections.remove(&session_id).map(|(_, s)| s)
    }

    pub fn get(&self, session_id: SessionId) -> Option<Arc<Session>> {
        self.connections.get(&session_id).map(|s| s.clone())
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    pub fn sessions(&self) -> Vec<Arc<Session>> {
        self.connections.iter().map(|e| e.value().clone()).collect()
    }

    /// 사용자 ID로 세션 조회
    pub fn lookup(&self, user_id: u64) -> Option<Arc<Session>> {
        self.users.lock().get(&user_id).map(|b| b.session.clone())
    }

    /// 사용자별 상태 전이 직렬화 락
    ///
    /// 가드가 풀릴 때 기다리는 쪽이 없으면 락 항목도 함께 지웁니다.
    pub async fn lock_user(&self, user_id: u64) -> UserLockGuard<'_> {
        let lock = self
            .user_locks
            .entry(user_id)
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone();
        UserLockGuard {
            user_id,
            locks: &self.user_locks,
            guard: Some(lock.lock_owned().await),
        }
    }

    /// 보관 중인 사용자 락 수
    pub fn user_lock_count(&self) -> usize {
        self.user_locks.len()
    }

    /// 사용자 ID를 세션에 바인딩합니다.
    ///
    /// 다른 살아 있는 세션이 이미 소유 중이면 그 세션을 먼저 밀어냅니다.
    /// 이전 세션의 월드 바인딩을 넘겨받고, 사용자 ID를 비우고, 종료 알림을 보내고,
    /// 레지스트리에서 제거한 뒤에야 새 바인딩을 기록합니다.
    pub fn bind_user(
        &self,
        user_id: u64,
        session: &Arc<Session>,
        mode: BindMode,
    ) -> GatewayResult<BindOutcome> {
        if session.is_closed() {
            return Err(GatewayError::SessionClosed(session.id()));
        }

        let mut users = self.users.lock();

        let generation = {
            let mut generations = self.generations.lock();
            let entry = generations.entry(user_id).or_insert(0);
            *entry += 1;
            *entry
        };

        let mut handoff: Option<(Option<EndpointId>, Option<EndpointId>, VecDeque<Frame>)> = None;
        let mut displaced = None;

        if let Some(existing) = users.get(&user_id) {
            let old = existing.session.clone();
            if !Arc::ptr_eq(&old, session) {
                let (bound, joining, buffer) = old.with_state(|state| {
                    state.user_id = None;
                    state.closed = true;
                    (state.bound.take(), state.joining.take(), state.take_buffer())
                });

                let reason = match mode {
                    BindMode::Login => "kicked: remote login",
                    BindMode::Reconnect => "replaced by reconnect",
                };
                if let Ok(notice) = Reply::kick(reason) {
                    old.push_notice(notice);
                }
                old.signal_close(reason);

                users.remove(&user_id);
                self.connections.remove(&old.id());
                self.displacements.fetch_add(1, Ordering::Relaxed);

                info!(
                    "사용자 {} 세션 교체: {} → {} ({:?})",
                    user_id,
                    old.id(),
                    session.id(),
                    mode
                );

                let dropped = if mode == BindMode::Login { buffer.len() } else { 0 };
                displaced = Some(Displaced {
                    session: old,
                    bound,
                    joining,
                    dropped,
                });
                handoff = Some((bound, joining, buffer));
            }
        }

        let (claimed, replayed) = session.with_state(|state| {
            if state.closed {
                return (false, Err(GatewayError::SessionClosed(session.id())));
            }
            state.user_id = Some(user_id);
            state.generation = generation;

            let mut replayed = Ok(0);
            if let Some((bound, joining, buffer)) = handoff {
                if state.bound.is_none() && state.joining.is_none() {
                    state.bound = bound;
                    state.joining = joining;
                }
                if mode == BindMode::Reconnect {
                    let count = buffer.len();
                    replayed = session
                        .append_buffer_locked(state, buffer)
                        .and_then(|_| session.flush_locked(state))
                        .map(|_| count);
                }
            }
            (true, replayed)
        });

        // 사용자 ID를 기록했으면 재전송이 실패해도 바인딩을 남겨 정리 경로가 찾을 수 있게 함
        if claimed {
            users.insert(
                user_id,
                UserBinding {
                    session: session.clone(),
                },
            );
        }
        let replayed = replayed?;

        Ok(BindOutcome {
            generation,
            displaced,
            replayed,
        })
    }

    /// 이 세션이 소유한 경우에만 바인딩을 해제합니다. 멱등입니다.
    pub fn unbind_user(&self, user_id: u64, session: &Arc<Session>) -> bool {
        let mut users = self.users.lock();
        match users.get(&user_id) {
            Some(binding) if Arc::ptr_eq(&binding.session, session) => {
                users.remove(&user_id);
                debug!("사용자 {} 바인딩 해제 (세션 {})", user_id, session.id());
                true
            }
            _ => false,
        }
    }

    pub fn user_count(&self) -> usize {
        self.users.lock().len()
    }

    /// 현재 사용자 세대 번호
    pub fn generation_of(&self, user_id: u64) -> u64 {
        self.generations.lock().get(&user_id).copied().unwrap_or(0)
    }

    /// 요청 트래픽 기록
    ///
    /// 점검 주기마다 평균 전송률을 계산해 강제 종료 기준을 넘으면 세션을 닫고
    /// `AbuseDetected`를 반환합니다. 감사 기준만 넘으면 경고 로그만 남깁니다.
    pub fn record_traffic(&self, session: &Session, byte_len: usize) -> GatewayResult<TrafficVerdict> {
        self.record_traffic_at(session, byte_len, Instant::now())
    }

    pub fn record_traffic_at(
        &self,
        session: &Session,
        byte_len: usize,
        now: Instant,
    ) -> GatewayResult<TrafficVerdict> {
        let Some(sample) = session.traffic.record(byte_len, now, &self.traffic_limits) else {
            return Ok(TrafficVerdict::Normal);
        };

        let verdict = sample.judge(&self.traffic_limits);
        match verdict {
            TrafficVerdict::Abuse(sample) => {
                self.abuse_closures.fetch_add(1, Ordering::Relaxed);
                session.close("abuse detected");
                Err(GatewayError::AbuseDetected {
                    session_id: session.id(),
                    bytes_per_sec: sample.bytes_per_sec,
                    requests_per_sec: sample.requests_per_sec,
                })
            }
            TrafficVerdict::Audit(sample) => {
                warn!(
                    "트래픽 감사: 세션 {} 사용자 {:?} {:.0}B/s {:.1}req/s",
                    session.id(),
                    session.user_id(),
                    sample.bytes_per_sec,
                    sample.requests_per_sec
                );
                Ok(verdict)
            }
            TrafficVerdict::Normal => Ok(verdict),
        }
    }

    /// 연결 상태가 끊김인 세션 수
    pub fn disconnected_count(&self) -> usize {
        self.connections
            .iter()
            .filter(|e| e.value().with_state(|s| s.link == LinkState::Disconnected))
            .count()
    }

    pub fn stats(&self) -> RegistryStats {
        RegistryStats {
            connections: self.connections.len(),
            users: self.user_count(),
            displacements: self.displacements.load(Ordering::Relaxed),
            abuse_closures: self.abuse_closures.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::session::SessionPhase;
    use std::time::Duration;
    use tokio::sync::mpsc;

    fn registry() -> ConnectionRegistry {
        ConnectionRegistry::new(TrafficLimits::default())
    }

    fn session(registry: &ConnectionRegistry) -> (Arc<Session>, mpsc::Receiver<Frame>) {
        let (tx, rx) = mpsc::channel(32);
        let (session, _close) = Session::new(registry.next_session_id(), "test".into(), tx, 8);
        registry.add(session.clone());
        (session, rx)
    }

    #[test]
    fn test_duplicate_add_and_missing_remove() {
        let reg = registry();
        let (s, _rx) = session(&reg);
        assert!(!reg.add(s.clone()));
        assert!(reg.remove(s.id()).is_some());
        assert!(reg.remove(s.id()).is_none());
    }

    #[test]
    fn test_bind_and_lookup() {
        let reg = registry();
        let (s, _rx) = session(&reg);
        let outcome = reg.bind_user(42, &s, BindMode::Login).unwrap();
        assert_eq!(outcome.generation, 1);
        assert!(outcome.displaced.is_none());
        assert!(Arc::ptr_eq(&reg.lookup(42).unwrap(), &s));
        assert_eq!(s.phase(), SessionPhase::Verified);
    }

    #[test]
    fn test_unbind_is_idempotent_and_owner_checked() {
        let reg = registry();
        let (s1, _rx1) = session(&reg);
        let (s2, _rx2) = session(&reg);
        reg.bind_user(42, &s1, BindMode::Login).unwrap();

        assert!(!reg.unbind_user(42, &s2));
        assert!(reg.lookup(42).is_some());

        assert!(reg.unbind_user(42, &s1));
        assert!(!reg.unbind_user(42, &s1));
        assert!(reg.lookup(42).is_none());
    }

    /// 가드가 풀리면 락 항목도 사라지고, 대기자가 있으면 마지막 가드까지 유지
    #[tokio::test]
    async fn test_user_lock_entry_released_with_last_guard() {
        let reg = Arc::new(registry());

        {
            let _guard = reg.lock_user(42).await;
            assert_eq!(reg.user_lock_count(), 1);
        }
        assert_eq!(reg.user_lock_count(), 0, "대기자 없는 락은 정리되어야 함");

        let first = reg.lock_user(7).await;
        let waiter = {
            let reg = reg.clone();
            tokio::spawn(async move {
                let _guard = reg.lock_user(7).await;
            })
        };
        tokio::task::yield_now().await;
        drop(first);
        assert_eq!(reg.user_lock_count(), 1, "대기 중인 락은 남아 있어야 함");

        waiter.await.unwrap();
        assert_eq!(reg.user_lock_count(), 0);
    }

    #[test]
    fn test_login_displacement_hands_over_binding() {
        let reg = registry();
        let (s1, mut rx1) = session(&reg);
        let (s2, _rx2) = session(&reg);
        reg.bind_user(42, &s1, BindMode::Login).unwrap();
        s1.with_state(|st| st.bound = Some(7));

        let outcome = reg.bind_user(42, &s2, BindMode::Login).unwrap();
        assert_eq!(outcome.generation, 2);
        let displaced = outcome.displaced.unwrap();
        assert_eq!(displaced.bound, Some(7));
        assert!(Arc::ptr_eq(&displaced.session, &s1));

        assert_eq!(s1.user_id(), None);
        assert!(s1.is_closed());
        assert!(reg.get(s1.id()).is_none());
        assert_eq!(s2.snapshot().bound, Some(7));
        assert!(Arc::ptr_eq(&reg.lookup(42).unwrap(), &s2));

        let kick = rx1.try_recv().unwrap();
        assert_eq!(kick.msg_id, shared::protocol::ids::client::KICK_NOTICE);
    }

    #[test]
    fn test_reconnect_replays_buffer_in_order() {
        let reg = registry();
        let (s1, _rx1) = session(&reg);
        let (s2, mut rx2) = session(&reg);
        reg.bind_user(42, &s1, BindMode::Login).unwrap();
        s1.with_state(|st| {
            st.bound = Some(7);
            st.link = LinkState::Disconnected;
        });
        for id in 1001..1004 {
            s1.deliver_push(7, Frame::empty(id)).unwrap();
        }

        let outcome = reg.bind_user(42, &s2, BindMode::Reconnect).unwrap();
        assert_eq!(outcome.replayed, 3);
        for id in 1001..1004 {
            assert_eq!(rx2.try_recv().unwrap().msg_id, id);
        }
        assert!(rx2.try_recv().is_err());
        assert_eq!(s2.snapshot().buffered, 0);
    }

    #[test]
    fn test_abuse_closes_session() {
        let limits = TrafficLimits {
            check_interval: Duration::from_secs(1),
            soft_bytes_per_sec: 10.0,
            soft_requests_per_sec: 1.0,
            hard_bytes_per_sec: 100.0,
            hard_requests_per_sec: 5.0,
        };
        let reg = ConnectionRegistry::new(limits);
        let (s, _rx) = session(&reg);
        let origin = s.created_at();

        for _ in 0..20 {
            reg.record_traffic_at(&s, 10, origin).unwrap();
        }
        let result = reg.record_traffic_at(&s, 10, origin + Duration::from_secs(1));
        assert!(matches!(result, Err(GatewayError::AbuseDetected { .. })));
        assert!(s.is_closed());
        assert_eq!(reg.stats().abuse_closures, 1);
    }

    #[test]
    fn test_soft_threshold_only_audits() {
        let limits = TrafficLimits {
            check_interval: Duration::from_secs(1),
            soft_bytes_per_sec: 10.0,
            soft_requests_per_sec: 100.0,
            hard_bytes_per_sec: 1000.0,
            hard_requests_per_sec: 1000.0,
        };
        let reg = ConnectionRegistry::new(limits);
        let (s, _rx) = session(&reg);
        let origin = s.created_at();

        reg.record_traffic_at(&s, 50, origin).unwrap();
        let verdict = reg
            .record_traffic_at(&s, 50, origin + Duration::from_secs(1))
            .unwrap();
        assert!(matches!(verdict, TrafficVerdict::Audit(_)));
        assert!(!s.is_closed());
    }
}
