//! 릴레이 프록시
//!
//! - 요청 이름을 현재 라우트 스냅샷으로 백엔드에 매핑
//! - 백엔드 프레임을 그대로 중계하면서 누적 오프셋 추적
//! - 백엔드 장애 시 클라이언트 연결은 유지한 채 재접속하여 누적 오프셋부터 재개
//! - 재접속마다 스냅샷을 새로 읽으므로 리로드는 이후 재접속에만 영향

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use dashmap::DashMap;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, warn};

use crate::backoff::Backoff;
use crate::config::ProxyConfig;
use crate::frame::{Frame, FrameReader, FrameWriter};
use crate::reload::{ReloadCoordinator, ReloadHandle, ReloadObserver, RouteWatcher};
use crate::routes::{RouteStore, RouteTable};
use crate::server::ERR_BAD_REQUEST;
use crate::{Error, Result};

pub const ERR_ROUTE_NOT_FOUND: &str = "route not found";
pub const ERR_BAD_UPSTREAM: &str = "bad upstream";
pub const ERR_BACKEND_UNREACHABLE: &str = "backend unreachable";

/// 진행 중인 릴레이 정보
#[derive(Debug, Clone)]
pub struct RelayInfo {
    pub peer: SocketAddr,
    pub name: String,

    /// 마지막으로 접속한 백엔드
    pub backend: String,

    /// 클라이언트에 전달 완료된 누적 오프셋
    pub offset: u64,

    /// 재접속 횟수
    pub redials: u32,

    pub started_at: Instant,
}

/// 연결 핸들러가 공유하는 상태
struct ProxyShared {
    config: ProxyConfig,
    routes: Arc<RouteStore>,
    relays: DashMap<u64, RelayInfo>,
    next_relay_id: AtomicU64,
}

/// 릴레이 종료 시 레지스트리에서 제거
struct RelayGuard<'a> {
    relays: &'a DashMap<u64, RelayInfo>,
    id: u64,
}

impl Drop for RelayGuard<'_> {
    fn drop(&mut self) {
        self.relays.remove(&self.id);
    }
}

/// 한 번의 백엔드 세션이 어느 쪽 때문에 끝났는지
enum RelayFailure {
    /// 백엔드 쪽 실패 - 전송 에러면 재접속, 프로토콜 에러면 치명적
    Backend(Error),

    /// 클라이언트 쪽 쓰기 실패 - 전달할 곳이 없으므로 세션 종료
    Client(Error),
}

/// 릴레이 프록시
pub struct Proxy {
    listener: TcpListener,
    shared: Arc<ProxyShared>,
}

impl Proxy {
    pub async fn bind(config: ProxyConfig, routes: Arc<RouteStore>) -> Result<Self> {
        let listener = TcpListener::bind(config.bind_addr).await?;
        info!(
            "Proxy listening on {} (routes={:?}, generation {})",
            listener.local_addr()?,
            config.routes_path,
            routes.snapshot().generation()
        );

        Ok(Self {
            listener,
            shared: Arc::new(ProxyShared {
                config,
                routes,
                relays: DashMap::new(),
                next_relay_id: AtomicU64::new(1),
            }),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub fn routes(&self) -> Arc<RouteStore> {
        self.shared.routes.clone()
    }

    /// 진행 중인 릴레이 목록
    pub fn active_relays(&self) -> Vec<RelayInfo> {
        self.shared.relays.iter().map(|entry| entry.value().clone()).collect()
    }

    /// 리로드 후 진행 중인 릴레이 수를 기록하는 관찰자
    pub fn reload_observer(&self) -> ReloadObserver {
        let shared = self.shared.clone();
        Arc::new(move |table: &RouteTable| {
            info!(
                "Route generation {} active ({} routes); {} in-flight relays switch on next redial",
                table.generation(),
                table.len(),
                shared.relays.len()
            );
        })
    }

    /// 리로드 코디네이터와 파일 감시자 시작
    ///
    /// 반환된 핸들로 수동 리로드(SIGHUP 등)를 요청할 수 있다.
    pub fn spawn_reloader(&self) -> ReloadHandle {
        let config = &self.shared.config;
        let (coordinator, handle) =
            ReloadCoordinator::new(self.shared.routes.clone(), &config.routes_path, config.reload_debounce);
        tokio::spawn(coordinator.with_observer(self.reload_observer()).run());
        RouteWatcher::new(&config.routes_path, config.watch_interval).spawn(handle.clone());
        handle
    }

    /// accept 루프 - 연결마다 독립 태스크
    pub async fn run(self) -> Result<()> {
        loop {
            let (stream, peer) = match self.listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    warn!("Accept error: {}", e);
                    continue;
                }
            };

            let shared = self.shared.clone();
            tokio::spawn(async move {
                if let Err(e) = handle_client(stream, peer, &shared).await {
                    debug!("Client {} closed: {}", peer, e);
                }
            });
        }
    }
}

async fn handle_client(stream: TcpStream, peer: SocketAddr, shared: &ProxyShared) -> Result<()> {
    let (read_half, write_half) = stream.into_split();
    let mut reader = FrameReader::new(read_half).with_idle_timeout(shared.config.idle_timeout);
    let mut client = FrameWriter::new(write_half);

    let (name, offset) = match reader.read_request().await {
        Ok(request) => request,
        Err(e) if e.is_protocol() => {
            debug!("Bad request from {}: {}", peer, e);
            return client.send(&Frame::Err(ERR_BAD_REQUEST.into())).await;
        }
        Err(e) => {
            warn!("Failed reading request from {}: {}", peer, e);
            return Err(e);
        }
    };

    let backend = match shared.routes.resolve(&name) {
        Some(backend) => backend,
        None => {
            info!("{} GET {} -> no route", peer, name);
            return client.send(&Frame::Err(ERR_ROUTE_NOT_FOUND.into())).await;
        }
    };

    if shared.config.announce_backend {
        client.send(&Frame::Srv(backend.clone())).await?;
    }

    let id = shared.next_relay_id.fetch_add(1, Ordering::Relaxed);
    shared.relays.insert(
        id,
        RelayInfo {
            peer,
            name: name.clone(),
            backend: backend.clone(),
            offset,
            redials: 0,
            started_at: Instant::now(),
        },
    );
    let _guard = RelayGuard {
        relays: &shared.relays,
        id,
    };

    relay(id, &name, offset, backend, &mut reader, &mut client, shared).await
}

/// 종료 프레임이 나올 때까지 백엔드 재접속 반복
///
/// 첫 접속은 `SRV`로 알린 백엔드, 재접속은 그 시점 세대에서 다시 해석한다.
/// 클라이언트가 연결을 닫으면 접속/중계/대기 중 어디서든 즉시 끝난다.
async fn relay<R, W>(
    id: u64,
    name: &str,
    start_offset: u64,
    announced: String,
    client_rx: &mut FrameReader<R>,
    client: &mut FrameWriter<W>,
    shared: &ProxyShared,
) -> Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let config = &shared.config;
    let mut offset = start_offset;
    let mut backoff =
        Backoff::new(config.redial_backoff, config.redial_backoff_max).with_max_attempts(config.max_redials);
    let mut first = Some(announced);

    loop {
        let backend = match first.take().or_else(|| shared.routes.resolve(name)) {
            Some(backend) => backend,
            None => {
                warn!("Route for {} disappeared at offset {}", name, offset);
                return client.send(&Frame::Err(ERR_ROUTE_NOT_FOUND.into())).await;
            }
        };
        if let Some(mut info) = shared.relays.get_mut(&id) {
            info.backend = backend.clone();
        }

        info!("Relaying {} via {} from offset {}", name, backend, offset);

        let outcome = tokio::select! {
            outcome = relay_once(id, &backend, name, &mut offset, client, shared, &mut backoff) => outcome,
            gone = client_rx.closed() => Err(RelayFailure::Client(gone)),
        };

        let failure = match outcome {
            Ok(terminal) => {
                info!(
                    "Relay {} finished with {} at offset {} ({} bytes relayed)",
                    name,
                    terminal.kind(),
                    offset,
                    offset - start_offset
                );
                return Ok(());
            }
            Err(RelayFailure::Client(e)) => {
                info!("Client for {} went away at offset {}: {}", name, offset, e);
                return Err(e);
            }
            Err(RelayFailure::Backend(e)) => e,
        };

        if failure.is_protocol() {
            warn!("Backend {} broke protocol for {}: {}", backend, name, failure);
            return client.send(&Frame::Err(ERR_BAD_UPSTREAM.into())).await;
        }

        match backoff.next_delay() {
            Some(delay) => {
                warn!(
                    "Backend {} failed for {}: {}; redial #{} in {:?}, resuming at offset {}",
                    backend,
                    name,
                    failure,
                    backoff.attempts(),
                    delay,
                    offset
                );
                if let Some(mut info) = shared.relays.get_mut(&id) {
                    info.redials += 1;
                }
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    gone = client_rx.closed() => {
                        info!("Client for {} went away while redialing at offset {}", name, offset);
                        return Err(gone);
                    }
                }
            }
            None => {
                warn!(
                    "Giving up on {} after {} redials at offset {}: {}",
                    name,
                    backoff.attempts(),
                    offset,
                    failure
                );
                return client.send(&Frame::Err(ERR_BACKEND_UNREACHABLE.into())).await;
            }
        }
    }
}

/// 백엔드 세션 하나: 접속, 누적 오프셋으로 요청, 종료 프레임까지 중계
///
/// 페이로드는 완전히 받은 뒤에만 헤더와 함께 전달하므로
/// 백엔드가 중간에 끊겨도 클라이언트 쪽에 짝 없는 헤더가 남지 않는다.
async fn relay_once<W: AsyncWrite + Unpin>(
    id: u64,
    backend: &str,
    name: &str,
    offset: &mut u64,
    client: &mut FrameWriter<W>,
    shared: &ProxyShared,
    backoff: &mut Backoff,
) -> std::result::Result<Frame, RelayFailure> {
    let config = &shared.config;
    let stream = match tokio::time::timeout(config.connect_timeout, TcpStream::connect(backend)).await {
        Ok(Ok(stream)) => stream,
        Ok(Err(source)) => {
            return Err(RelayFailure::Backend(Error::Dial {
                addr: backend.to_string(),
                source,
            }))
        }
        Err(_) => return Err(RelayFailure::Backend(Error::Timeout(config.connect_timeout))),
    };

    let (read_half, write_half) = stream.into_split();
    let mut upstream = FrameReader::new(read_half)
        .with_idle_timeout(config.idle_timeout)
        .with_max_frame_len(config.max_frame_len);
    let mut request = FrameWriter::new(write_half);

    request
        .send(&Frame::Get {
            name: name.to_string(),
            offset: *offset,
        })
        .await
        .map_err(RelayFailure::Backend)?;

    loop {
        let frame = upstream.read_frame().await.map_err(RelayFailure::Backend)?;
        match frame {
            Frame::Data(len) => {
                let payload = upstream.read_payload(len).await.map_err(RelayFailure::Backend)?;
                client.send_data(&payload).await.map_err(RelayFailure::Client)?;
                *offset += len;

                // 진행이 있었으므로 연속 실패 카운트 초기화
                backoff.reset();
                if let Some(mut info) = shared.relays.get_mut(&id) {
                    info.offset = *offset;
                }
            }
            Frame::Srv(ref upstream_backend) => {
                debug!("Upstream {} announced {}", backend, upstream_backend);
            }
            Frame::Eof | Frame::Err(_) => {
                client.send(&frame).await.map_err(RelayFailure::Client)?;
                return Ok(frame);
            }
            Frame::Get { .. } => {
                return Err(RelayFailure::Backend(Error::UnexpectedFrame {
                    expected: "DATA, SRV, EOF or ERR",
                    got: frame.to_string(),
                }))
            }
        }
    }
}
