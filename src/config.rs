//! 엔드포인트별 설정

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use crate::{Error, Result, DEFAULT_CHUNK_SIZE, DEFAULT_MAX_FRAME_LEN, PARTIAL_SUFFIX};

/// 기본 유휴 읽기 타임아웃
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(10);

/// 기본 연결 타임아웃
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// 라우트 파일 변경 디바운스 기본값
pub const DEFAULT_RELOAD_DEBOUNCE: Duration = Duration::from_millis(200);

/// 리스닝 주소 파싱
///
/// `:5000`처럼 호스트가 빠지면 모든 인터페이스(`0.0.0.0`)로 본다.
pub fn parse_listen_addr(s: &str) -> Result<SocketAddr> {
    let s = s.trim();
    let full = if s.starts_with(':') {
        format!("0.0.0.0{}", s)
    } else {
        s.to_string()
    };
    full.parse()
        .map_err(|_| Error::Config(format!("invalid listen address {:?}", s)))
}

/// 원본 파일 서버 설정
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// 리스닝 주소
    pub bind_addr: SocketAddr,

    /// 파일 기준 디렉터리 (이 밖으로는 절대 나가지 않음)
    pub base_dir: PathBuf,

    /// 한 번에 읽는 청크 크기 (바이트)
    pub chunk_size: usize,

    /// 연결별 목표 전송 속도 (bytes/sec)
    /// 0이면 제한 없음
    pub throttle_bps: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 5000)),
            base_dir: PathBuf::from("/srv/files"),
            chunk_size: DEFAULT_CHUNK_SIZE,
            throttle_bps: 0,
        }
    }
}

impl ServerConfig {
    /// 새 설정 생성
    pub fn new(bind_addr: SocketAddr, base_dir: impl Into<PathBuf>) -> Self {
        Self {
            bind_addr,
            base_dir: base_dir.into(),
            ..Self::default()
        }
    }

    /// KB/s 단위로 제한 설정
    pub fn with_throttle_kbps(mut self, kbps: u64) -> Self {
        self.throttle_bps = kbps.saturating_mul(1024);
        self
    }

    /// 실제로 한 번에 읽을 크기
    ///
    /// 제한이 걸려 있으면 청크 하나가 1초 예산을 넘지 않도록 자른다.
    pub fn effective_chunk_size(&self) -> usize {
        let chunk = self.chunk_size.max(1);
        if self.throttle_bps == 0 {
            return chunk;
        }
        chunk.min(self.throttle_bps.min(usize::MAX as u64) as usize)
    }
}

/// 릴레이 프록시 설정
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    /// 리스닝 주소
    pub bind_addr: SocketAddr,

    /// 라우트 JSON 파일
    pub routes_path: PathBuf,

    /// 백엔드 연결 타임아웃
    pub connect_timeout: Duration,

    /// 백엔드 유휴 읽기 타임아웃
    pub idle_timeout: Duration,

    /// 재접속 backoff 시작값
    pub redial_backoff: Duration,

    /// 재접속 backoff 상한
    pub redial_backoff_max: Duration,

    /// 최대 재접속 횟수 (None = 무제한)
    pub max_redials: Option<u32>,

    /// 릴레이 전 `SRV <backend>` 알림 여부
    pub announce_backend: bool,

    /// 백엔드에서 허용하는 최대 DATA 길이
    pub max_frame_len: u64,

    /// 라우트 파일 변경 디바운스
    pub reload_debounce: Duration,

    /// 라우트 파일 감시 주기
    pub watch_interval: Duration,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8000)),
            routes_path: PathBuf::from("./routes.json"),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            redial_backoff: Duration::from_millis(400),
            redial_backoff_max: Duration::from_secs(5),
            max_redials: None,
            announce_backend: true,
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
            reload_debounce: DEFAULT_RELOAD_DEBOUNCE,
            watch_interval: Duration::from_millis(100),
        }
    }
}

impl ProxyConfig {
    /// 새 설정 생성
    pub fn new(bind_addr: SocketAddr, routes_path: impl Into<PathBuf>) -> Self {
        Self {
            bind_addr,
            routes_path: routes_path.into(),
            ..Self::default()
        }
    }
}

/// 이어받기 클라이언트 설정
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// 서버 또는 프록시 주소 (`host:port`)
    pub server_addr: String,

    /// 요청할 논리 파일 이름
    pub name: String,

    /// 최종 출력 경로 (부분 파일은 `<output>.part`)
    pub output: PathBuf,

    /// 연결 타임아웃
    pub connect_timeout: Duration,

    /// 유휴 읽기 타임아웃
    pub idle_timeout: Duration,

    /// 재시도 backoff 시작값
    pub retry_backoff: Duration,

    /// 재시도 backoff 상한
    pub retry_backoff_max: Duration,

    /// 최대 시도 횟수 (None = 무제한)
    pub max_attempts: Option<u32>,

    /// 허용하는 최대 DATA 길이
    pub max_frame_len: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_addr: "127.0.0.1:8000".to_string(),
            name: "example.txt".to_string(),
            output: PathBuf::from("example.txt"),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            retry_backoff: Duration::from_secs(1),
            retry_backoff_max: Duration::from_secs(30),
            max_attempts: None,
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
        }
    }
}

impl ClientConfig {
    /// 새 설정 생성
    pub fn new(server_addr: impl Into<String>, name: impl Into<String>, output: impl Into<PathBuf>) -> Self {
        Self {
            server_addr: server_addr.into(),
            name: name.into(),
            output: output.into(),
            ..Self::default()
        }
    }

    /// 부분 파일 경로
    pub fn partial_path(&self) -> PathBuf {
        let mut path = self.output.clone().into_os_string();
        path.push(PARTIAL_SUFFIX);
        PathBuf::from(path)
    }

    /// 불안정한 네트워크용 설정 (짧은 backoff, 긴 유휴 허용)
    pub fn unstable_network(server_addr: impl Into<String>, name: impl Into<String>, output: impl Into<PathBuf>) -> Self {
        Self {
            idle_timeout: Duration::from_secs(30),
            retry_backoff: Duration::from_millis(500),
            retry_backoff_max: Duration::from_secs(10),
            ..Self::new(server_addr, name, output)
        }
    }
}
