//! # RSP (Resumable Stream Protocol)
//!
//! TCP 기반 이어받기 파일 전송 프로토콜
//!
//! ## 핵심 특징
//! - **텍스트 헤더 + 원시 페이로드**: `GET` / `SRV` / `DATA` / `EOF` / `ERR`
//! - **이어받기**: 클라이언트 `.part` 파일 길이가 곧 재개 오프셋
//! - **원본 서버 대역폭 제한**: 연결별 1초 윈도우 평균 속도 제한
//! - **릴레이 프록시**: 백엔드 장애 시 누적 오프셋으로 재접속, 클라이언트는 끊김을 모름
//! - **라우트 핫 리로드**: 불변 스냅샷 교체, 디바운스된 설정 파일 감시

pub mod backoff;
pub mod client;
pub mod config;
pub mod error;
pub mod frame;
pub mod proxy;
pub mod reload;
pub mod routes;
pub mod server;
pub mod stats;
pub mod throttle;

pub use backoff::Backoff;
pub use client::{Downloader, Outcome};
pub use config::{ClientConfig, ProxyConfig, ServerConfig};
pub use error::{Error, Result};
pub use frame::{Frame, FrameReader, FrameWriter};
pub use proxy::Proxy;
pub use reload::{ReloadCoordinator, ReloadEvent, ReloadHandle, RouteWatcher};
pub use routes::{RouteStore, RouteTable, DEFAULT_ROUTE};
pub use server::FileServer;
pub use stats::TransferStats;
pub use throttle::Throttle;

/// 헤더 한 줄 최대 길이 (바이트, CRLF 제외)
pub const MAX_HEADER_LEN: usize = 4096;

/// 기본 청크 크기 (바이트)
pub const DEFAULT_CHUNK_SIZE: usize = 256 * 1024; // 256KB

/// 수신측이 허용하는 기본 최대 DATA 길이
pub const DEFAULT_MAX_FRAME_LEN: u64 = 16 * 1024 * 1024; // 16MB

/// 부분 파일 확장자
pub const PARTIAL_SUFFIX: &str = ".part";
