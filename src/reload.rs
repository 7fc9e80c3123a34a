//! 라우트 핫 리로드
//!
//! 감시자(또는 시그널 등 외부 트리거)가 [`ReloadEvent`]를 큐에 넣으면
//! 전용 코디네이터 하나가 디바운스 후 [`RouteStore`]를 교체한다.
//! 스냅샷 수명은 코디네이터만 관리한다.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::routes::{RouteStore, RouteTable};

/// 리로드 큐 크기
const RELOAD_QUEUE_SIZE: usize = 64;

/// 리로드 이벤트
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReloadEvent {
    /// 설정 파일 변경 감지 (디바운스 대상)
    Changed,

    /// 수동 리로드 요청 (즉시)
    Trigger,
}

/// 코디네이터 큐에 이벤트를 넣는 핸들
#[derive(Debug, Clone)]
pub struct ReloadHandle {
    tx: mpsc::Sender<ReloadEvent>,
}

impl ReloadHandle {
    /// 변경 알림, 코디네이터가 종료됐으면 false
    pub async fn notify_changed(&self) -> bool {
        self.tx.send(ReloadEvent::Changed).await.is_ok()
    }

    /// 즉시 리로드 요청, 코디네이터가 종료됐으면 false
    pub async fn trigger(&self) -> bool {
        self.tx.send(ReloadEvent::Trigger).await.is_ok()
    }
}

/// 리로드 후 호출되는 관찰자
pub type ReloadObserver = Arc<dyn Fn(&RouteTable) + Send + Sync>;

/// 라우트 스냅샷 수명 관리자
pub struct ReloadCoordinator {
    store: Arc<RouteStore>,
    path: PathBuf,
    debounce: Duration,
    rx: mpsc::Receiver<ReloadEvent>,
    observer: Option<ReloadObserver>,
}

impl ReloadCoordinator {
    pub fn new(store: Arc<RouteStore>, path: impl Into<PathBuf>, debounce: Duration) -> (Self, ReloadHandle) {
        let (tx, rx) = mpsc::channel(RELOAD_QUEUE_SIZE);
        let coordinator = Self {
            store,
            path: path.into(),
            debounce,
            rx,
            observer: None,
        };
        (coordinator, ReloadHandle { tx })
    }

    pub fn with_observer(mut self, observer: ReloadObserver) -> Self {
        self.observer = Some(observer);
        self
    }

    /// 모든 핸들이 드롭될 때까지 이벤트 처리
    ///
    /// `Changed`는 조용한 구간(`debounce`)이 지나야 한 번 리로드하고,
    /// `Trigger`는 대기 중인 디바운스를 흡수하며 즉시 리로드한다.
    pub async fn run(mut self) {
        let mut deadline: Option<Instant> = None;

        loop {
            let wake_at = deadline.unwrap_or_else(|| Instant::now() + Duration::from_secs(3600));

            tokio::select! {
                event = self.rx.recv() => match event {
                    Some(ReloadEvent::Changed) => {
                        debug!("Routes file change observed, debouncing {:?}", self.debounce);
                        deadline = Some(Instant::now() + self.debounce);
                    }
                    Some(ReloadEvent::Trigger) => {
                        deadline = None;
                        self.reload().await;
                    }
                    None => break,
                },
                _ = tokio::time::sleep_until(wake_at), if deadline.is_some() => {
                    deadline = None;
                    // 편집기의 rename 저장 도중이면 파일이 잠시 없을 수 있음
                    if tokio::fs::metadata(&self.path).await.is_ok() {
                        self.reload().await;
                    } else {
                        debug!("Routes file {:?} missing after change, skipping reload", self.path);
                    }
                }
            }
        }

        debug!("Reload coordinator stopped");
    }

    async fn reload(&self) {
        match self.store.reload_from(&self.path).await {
            Ok(_) => {
                if let Some(observer) = &self.observer {
                    observer(&self.store.snapshot());
                }
            }
            Err(e) => warn!(
                "Routes reload failed, keeping generation {}: {}",
                self.store.snapshot().generation(),
                e
            ),
        }
    }
}

/// 파일 상태 지문 (존재 여부, 크기, 수정 시각, 내용 CRC32)
///
/// 수정 시각 해상도가 거친 파일시스템에서 같은 길이로 다시 쓴 경우도 CRC로 잡는다.
type Fingerprint = Option<(u64, Option<SystemTime>, u32)>;

async fn fingerprint(path: &Path) -> Fingerprint {
    let metadata = tokio::fs::metadata(path).await.ok()?;
    let contents = tokio::fs::read(path).await.ok()?;
    Some((metadata.len(), metadata.modified().ok(), crc32fast::hash(&contents)))
}

/// 폴링 기반 라우트 파일 감시자
///
/// 생성/수정/삭제/rename 교체를 모두 지문 변화로 감지해 `Changed`를 보낸다.
#[derive(Debug, Clone)]
pub struct RouteWatcher {
    path: PathBuf,
    interval: Duration,
}

impl RouteWatcher {
    pub fn new(path: impl Into<PathBuf>, interval: Duration) -> Self {
        Self {
            path: path.into(),
            interval,
        }
    }

    /// 감시 태스크 시작 - 코디네이터가 종료되면 함께 끝난다
    pub fn spawn(self, handle: ReloadHandle) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!("Watching routes file {:?} every {:?}", self.path, self.interval);
            let mut last = fingerprint(&self.path).await;
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                ticker.tick().await;
                let current = fingerprint(&self.path).await;
                if current != last {
                    last = current;
                    if !handle.notify_changed().await {
                        break;
                    }
                }
            }
        })
    }
}
