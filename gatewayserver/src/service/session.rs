//! 게이트웨이 세션
//!
//! 연결 하나당 하나씩 생성되는 세션 상태입니다. 인증, 월드 바인딩,
//! 연결 끊김 동안의 메시지 보관을 한 개의 락으로 보호되는 상태 값에 모았습니다.
//!
//! # 상태 전이
//!
//! ```text
//! Unverified → Verified → (Joining ⇄ Bound) → Disconnected → {Reconnected | Expired}
//!                                                   └──────→ Closed
//! ```
//!
//! 송신은 연결별 bounded 채널을 거칩니다. 연결 중 채널이 가득 차거나
//! 끊긴 세션의 보관 버퍼가 한도를 넘으면 세션을 강제 종료합니다.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, warn};

use shared::protocol::Frame;

use crate::service::traffic::TrafficCounter;
use crate::tool::error::{GatewayError, GatewayResult};

pub type SessionId = u64;
pub type EndpointId = u32;

/// 전송 계층 연결 상태
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Connected,
    Disconnected,
    Reconnecting,
}

/// 관찰용 세션 단계
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Unverified,
    Verified,
    Joining,
    Bound,
    Disconnected,
    Reconnecting,
    Closed,
}

/// push 전달 결과
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// 송신 큐에 바로 기록
    Written,
    /// 보관 버퍼에 추가
    Buffered,
}

/// 한 락 아래에서 함께 바뀌는 세션 필드들
#[derive(Debug)]
pub struct SessionState {
    pub user_id: Option<u64>,
    /// 바인딩 세대 번호 (사용자 ID 바인딩마다 증가)
    pub generation: u64,
    pub bound: Option<EndpointId>,
    pub joining: Option<EndpointId>,
    pub link: LinkState,
    pub disconnected_at: Option<Instant>,
    pub last_heartbeat: Instant,
    pub closed: bool,
    buffer: VecDeque<Frame>,
}

impl SessionState {
    fn new(now: Instant) -> Self {
        Self {
            user_id: None,
            generation: 0,
            bound: None,
            joining: None,
            link: LinkState::Connected,
            disconnected_at: None,
            last_heartbeat: now,
            closed: false,
            buffer: VecDeque::new(),
        }
    }

    pub fn phase(&self) -> SessionPhase {
        if self.closed {
            return SessionPhase::Closed;
        }
        match self.link {
            LinkState::Disconnected => return SessionPhase::Disconnected,
            LinkState::Reconnecting => return SessionPhase::Reconnecting,
            LinkState::Connected => {}
        }
        match (self.user_id, self.joining, self.bound) {
            (None, _, _) => SessionPhase::Unverified,
            (Some(_), Some(_), _) => SessionPhase::Joining,
            (Some(_), None, Some(_)) => SessionPhase::Bound,
            (Some(_), None, None) => SessionPhase::Verified,
        }
    }

    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// 입장 시작: bound를 비우고 joining을 설정합니다.
    pub(crate) fn begin_join(&mut self, endpoint_id: EndpointId) -> GatewayResult<Option<EndpointId>> {
        if let Some(pending) = self.joining {
            return Err(GatewayError::JoinInProgress(pending));
        }
        let previous = self.bound.take();
        self.joining = Some(endpoint_id);
        Ok(previous)
    }

    /// 보관 버퍼를 통째로 꺼냅니다.
    pub(crate) fn take_buffer(&mut self) -> VecDeque<Frame> {
        std::mem::take(&mut self.buffer)
    }
}

/// 끊긴 연결에서 회수한 미전송 프레임
///
/// 소켓에 쓰다 실패한 프레임과, 송신 큐에 남아 있던 프레임을 순서대로 담습니다.
#[derive(Debug, Default)]
pub struct UnsentOutbound {
    failed: Option<Frame>,
    queue: Option<mpsc::Receiver<Frame>>,
}

impl UnsentOutbound {
    pub fn new(failed: Option<Frame>, queue: mpsc::Receiver<Frame>) -> Self {
        Self {
            failed,
            queue: Some(queue),
        }
    }

    /// 큐를 닫고 남은 프레임을 꺼냅니다.
    pub(crate) fn into_frames(self) -> Vec<Frame> {
        let mut frames: Vec<Frame> = self.failed.into_iter().collect();
        if let Some(mut queue) = self.queue {
            queue.close();
            while let Ok(frame) = queue.try_recv() {
                frames.push(frame);
            }
        }
        frames
    }
}

/// 세션 상태 스냅샷 (테스트/조회용)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub session_id: SessionId,
    pub phase: SessionPhase,
    pub user_id: Option<u64>,
    pub generation: u64,
    pub bound: Option<EndpointId>,
    pub joining: Option<EndpointId>,
    pub buffered: usize,
}

/// 게이트웨이 세션
pub struct Session {
    id: SessionId,
    addr: String,
    created_at: Instant,
    buffer_limit: usize,
    outbound: mpsc::Sender<Frame>,
    close_tx: watch::Sender<Option<String>>,
    state: Mutex<SessionState>,
    pub traffic: TrafficCounter,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("addr", &self.addr)
            .field("state", &*self.state.lock())
            .finish()
    }
}

impl Session {
    /// 새 세션을 만들고 종료 신호 수신자를 함께 반환합니다.
    pub fn new(
        id: SessionId,
        addr: String,
        outbound: mpsc::Sender<Frame>,
        buffer_limit: usize,
    ) -> (Arc<Self>, watch::Receiver<Option<String>>) {
        let now = Instant::now();
        let (close_tx, close_rx) = watch::channel(None);
        let session = Arc::new(Self {
            id,
            addr,
            created_at: now,
            buffer_limit,
            outbound,
            close_tx,
            state: Mutex::new(SessionState::new(now)),
            traffic: TrafficCounter::new(now),
        });
        (session, close_rx)
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    pub fn user_id(&self) -> Option<u64> {
        self.state.lock().user_id
    }

    pub fn phase(&self) -> SessionPhase {
        self.state.lock().phase()
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let state = self.state.lock();
        SessionSnapshot {
            session_id: self.id,
            phase: state.phase(),
            user_id: state.user_id,
            generation: state.generation,
            bound: state.bound,
            joining: state.joining,
            buffered: state.buffered(),
        }
    }

    /// 상태 락을 잡은 채로 클로저를 실행합니다.
    ///
    /// 클로저 안에서 다른 세션의 락이나 레지스트리 락을 잡으면 안 됩니다.
    pub(crate) fn with_state<R>(&self, f: impl FnOnce(&mut SessionState) -> R) -> R {
        let mut state = self.state.lock();
        f(&mut state)
    }

    pub fn touch_heartbeat(&self, now: Instant) {
        self.state.lock().last_heartbeat = now;
    }

    /// 게이트웨이 응답 전송 (보관 버퍼를 거치지 않음)
    pub fn send(&self, frame: Frame) -> GatewayResult<()> {
        let mut state = self.state.lock();
        if state.closed || state.link != LinkState::Connected {
            return Err(GatewayError::SessionClosed(self.id));
        }
        self.write_locked(&mut state, frame)
    }

    /// 월드에서 온 push 전달
    ///
    /// 연결 중이고 `bound`가 보낸 엔드포인트와 같으면 바로 쓰고,
    /// 아니면 보관 버퍼에 추가합니다. 버퍼 한도 초과 시 세션을 닫습니다.
    pub fn deliver_push(&self, from: EndpointId, frame: Frame) -> GatewayResult<Delivery> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(GatewayError::SessionClosed(self.id));
        }

        if state.link == LinkState::Connected && state.bound == Some(from) {
            self.write_locked(&mut state, frame)?;
            return Ok(Delivery::Written);
        }

        if state.buffer.len() >= self.buffer_limit {
            warn!(
                "세션 {} 보관 버퍼 초과 ({}개), 강제 종료",
                self.id, self.buffer_limit
            );
            state.closed = true;
            state.buffer.clear();
            drop(state);
            self.signal_close("buffer overflow");
            return Err(GatewayError::BufferOverflow(self.id));
        }

        state.buffer.push_back(frame);
        debug!("세션 {} 메시지 보관 ({}개)", self.id, state.buffer.len());
        Ok(Delivery::Buffered)
    }

    /// 끊기기 전에 전송되지 못한 프레임을 보관 버퍼 앞쪽에 되돌립니다.
    ///
    /// 끊김 처리 뒤에 보관된 메시지보다 앞에 놓입니다. 한도를 넘으면 세션을 닫습니다.
    pub fn requeue_unsent(&self, frames: Vec<Frame>) -> GatewayResult<usize> {
        let mut state = self.state.lock();
        if state.closed || state.link != LinkState::Disconnected {
            return Err(GatewayError::SessionClosed(self.id));
        }

        if state.buffer.len() + frames.len() > self.buffer_limit {
            warn!(
                "세션 {} 미전송 프레임 보관 중 버퍼 초과 ({}개), 강제 종료",
                self.id, self.buffer_limit
            );
            state.closed = true;
            state.buffer.clear();
            drop(state);
            self.signal_close("buffer overflow");
            return Err(GatewayError::BufferOverflow(self.id));
        }

        let count = frames.len();
        for frame in frames.into_iter().rev() {
            state.buffer.push_front(frame);
        }
        Ok(count)
    }

    /// 보관된 메시지를 순서대로 송신 큐로 보냅니다. 보낸 개수를 반환합니다.
    pub fn flush_buffer(&self) -> GatewayResult<usize> {
        let mut state = self.state.lock();
        self.flush_locked(&mut state)
    }

    /// 이미 잡은 상태 락 아래에서 보관 메시지를 전송합니다.
    pub(crate) fn flush_locked(&self, state: &mut SessionState) -> GatewayResult<usize> {
        if state.closed || state.link != LinkState::Connected {
            return Ok(0);
        }
        let mut sent = 0;
        while let Some(frame) = state.buffer.pop_front() {
            self.write_locked(state, frame)?;
            sent += 1;
        }
        Ok(sent)
    }

    /// 월드 입장 완료 처리
    ///
    /// `joining`이 이 엔드포인트가 아니면 늦게 도착한 결과로 보고 `None`을 반환합니다.
    /// 수락되면 `bound`를 설정하고, 응답을 보낸 뒤 보관 메시지를 순서대로 전송합니다.
    pub fn complete_join(
        &self,
        endpoint_id: EndpointId,
        accepted: bool,
        reply: Frame,
    ) -> GatewayResult<Option<usize>> {
        let mut state = self.state.lock();
        if state.closed || state.joining != Some(endpoint_id) {
            return Ok(None);
        }
        state.joining = None;
        if accepted {
            state.bound = Some(endpoint_id);
        }
        if state.link != LinkState::Connected {
            return Ok(Some(0));
        }
        self.write_locked(&mut state, reply)?;
        if accepted {
            self.flush_locked(&mut state).map(Some)
        } else {
            Ok(Some(0))
        }
    }

    /// 이 엔드포인트에 대한 바인딩/입장 상태를 해제합니다. 해제했으면 true
    pub fn release_endpoint(&self, endpoint_id: EndpointId) -> bool {
        let mut state = self.state.lock();
        let mut released = false;
        if state.bound == Some(endpoint_id) {
            state.bound = None;
            released = true;
        }
        if state.joining == Some(endpoint_id) {
            state.joining = None;
            released = true;
        }
        released
    }

    /// 이미 잡은 상태 락 아래에서 보관 메시지를 이어 붙입니다.
    pub(crate) fn append_buffer_locked(
        &self,
        state: &mut SessionState,
        frames: VecDeque<Frame>,
    ) -> GatewayResult<()> {
        if state.buffer.len() + frames.len() > self.buffer_limit {
            return Err(GatewayError::BufferOverflow(self.id));
        }
        state.buffer.extend(frames);
        Ok(())
    }

    /// 세션 종료 (멱등)
    pub fn close(&self, reason: &str) {
        {
            let mut state = self.state.lock();
            if state.closed {
                return;
            }
            state.closed = true;
        }
        self.signal_close(reason);
    }

    /// 종료 알림을 보낸 뒤 세션을 닫습니다.
    pub fn kick(&self, notice: Frame, reason: &str) {
        {
            let state = self.state.lock();
            if !state.closed && state.link == LinkState::Connected {
                let _ = self.outbound.try_send(notice);
            }
        }
        self.close(reason);
    }

    /// 상태와 무관하게 연결 중이면 알림 프레임을 송신 큐에 넣습니다.
    pub(crate) fn push_notice(&self, notice: Frame) {
        let connected = self.state.lock().link == LinkState::Connected;
        if connected {
            let _ = self.outbound.try_send(notice);
        }
    }

    pub(crate) fn signal_close(&self, reason: &str) {
        debug!("세션 {} 종료 신호: {}", self.id, reason);
        self.close_tx.send_replace(Some(reason.to_string()));
    }

    fn write_locked(&self, state: &mut SessionState, frame: Frame) -> GatewayResult<()> {
        match self.outbound.try_send(frame) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                warn!("세션 {} 송신 큐 가득 참, 강제 종료", self.id);
                state.closed = true;
                state.buffer.clear();
                self.signal_close("outbound overflow");
                Err(GatewayError::BufferOverflow(self.id))
            }
            Err(TrySendError::Closed(_)) => Err(GatewayError::SessionClosed(self.id)),
        }
    }
}
