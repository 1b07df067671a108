//! 사용자별 순차 처리기
//!
//! 링크 하나로 들어오는 여러 사용자의 메시지를 사용자마다 별도 작업으로 처리합니다.
//! 같은 사용자의 메시지는 도착 순서대로 하나씩 처리되고, 한 사용자가 저장소 왕복을
//! 기다리는 동안에도 다른 사용자의 메시지는 계속 진행됩니다.
//!
//! 작업자는 처음 메시지가 올 때 생기고, 한동안 메시지가 없으면 큐가 빈 것을
//! 확인한 뒤 스스로 사라집니다.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::time::timeout;
use tracing::{debug, warn};

/// 작업자 유휴 종료 시간
pub const WORKER_IDLE_TIMEOUT: Duration = Duration::from_secs(10);

/// 사용자별 작업 큐 기본 크기
pub const DEFAULT_USER_QUEUE_SIZE: usize = 256;

/// 사용자 단위 메시지 처리
#[async_trait]
pub trait UserTask: Send + Sync + 'static {
    type Message: Send + 'static;

    async fn run(&self, message: Self::Message);
}

/// 사용자별 순차 처리기
pub struct UserDispatcher<H: UserTask> {
    handler: Arc<H>,
    workers: Arc<DashMap<u64, mpsc::Sender<H::Message>>>,
    queue_size: usize,
    idle_timeout: Duration,
    // 작업자마다 복제본을 들고 있다가 끝나면 놓음
    done_tx: mpsc::Sender<()>,
    done_rx: mpsc::Receiver<()>,
}

impl<H: UserTask> UserDispatcher<H> {
    pub fn new(handler: Arc<H>, queue_size: usize) -> Self {
        Self::with_idle_timeout(handler, queue_size, WORKER_IDLE_TIMEOUT)
    }

    pub fn with_idle_timeout(handler: Arc<H>, queue_size: usize, idle_timeout: Duration) -> Self {
        let (done_tx, done_rx) = mpsc::channel(1);
        Self {
            handler,
            workers: Arc::new(DashMap::new()),
            queue_size: queue_size.max(1),
            idle_timeout,
            done_tx,
            done_rx,
        }
    }

    pub fn handler(&self) -> &Arc<H> {
        &self.handler
    }

    /// 살아 있는 작업자 수
    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// 사용자 메시지는 사용자별 작업자로 넘기고, 나머지는 호출한 작업에서 바로 처리합니다.
    pub async fn dispatch(&self, user_id: Option<u64>, message: H::Message) {
        match user_id {
            Some(user_id) => self.submit(user_id, message),
            None => self.handler.run(message).await,
        }
    }

    /// 사용자 작업 큐에 넣습니다. 큐가 가득 차면 버리고 경고를 남깁니다.
    pub fn submit(&self, user_id: u64, message: H::Message) {
        let mut sender = self
            .workers
            .entry(user_id)
            .or_insert_with(|| self.spawn_worker(user_id));

        match sender.try_send(message) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                warn!("사용자 {} 작업 큐 가득 참 ({}개), 메시지 버림", user_id, self.queue_size);
            }
            Err(TrySendError::Closed(message)) => {
                // 작업자가 비정상 종료된 경우
                debug!("사용자 {} 작업자 재시작", user_id);
                *sender = self.spawn_worker(user_id);
                if sender.try_send(message).is_err() {
                    warn!("사용자 {} 작업자 재시작 후 전달 실패", user_id);
                }
            }
        }
    }

    /// 새 메시지를 받지 않고, 이미 받은 메시지를 모두 처리할 때까지 기다립니다.
    pub async fn shutdown(self) {
        let Self {
            workers,
            done_tx,
            mut done_rx,
            ..
        } = self;
        workers.clear();
        drop(done_tx);
        let _ = done_rx.recv().await;
    }

    fn spawn_worker(&self, user_id: u64) -> mpsc::Sender<H::Message> {
        let (tx, mut rx) = mpsc::channel(self.queue_size);
        let handler = self.handler.clone();
        let workers = self.workers.clone();
        let idle_timeout = self.idle_timeout;
        let done = self.done_tx.clone();

        tokio::spawn(async move {
            let _done = done;
            loop {
                match timeout(idle_timeout, rx.recv()).await {
                    Ok(Some(message)) => handler.run(message).await,
                    Ok(None) => break,
                    Err(_) => {
                        // 제출 쪽과 같은 샤드 락 아래에서 큐가 비었는지 확인
                        let mut pending = None;
                        let removed = workers
                            .remove_if(&user_id, |_, _| match rx.try_recv() {
                                Ok(message) => {
                                    pending = Some(message);
                                    false
                                }
                                Err(_) => true,
                            })
                            .is_some();
                        match pending {
                            Some(message) => handler.run(message).await,
                            None if removed => break,
                            None => {}
                        }
                    }
                }
            }
            debug!("사용자 {} 작업자 종료", user_id);
        });
        tx
    }
}
