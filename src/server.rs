//! 원본 파일 서버
//!
//! - 연결당 `GET <name> <offset>` 한 줄만 읽는다
//! - 기준 디렉터리 밖으로 나가는 이름은 "not found"와 구분할 수 없게 거부
//! - 고정 크기 청크를 `DATA` 프레임으로 흘려보내며 매 청크 flush
//! - 연결별 대역폭 제한 (다른 연결이나 accept 루프는 막지 않음)

use std::io::SeekFrom;
use std::net::SocketAddr;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, warn};

use crate::config::{ServerConfig, DEFAULT_IDLE_TIMEOUT};
use crate::frame::{Frame, FrameReader, FrameWriter};
use crate::throttle::Throttle;
use crate::Result;

/// 응답 사유 문자열
pub const ERR_BAD_REQUEST: &str = "bad request";
pub const ERR_NOT_FOUND: &str = "not found";
pub const ERR_BAD_OFFSET: &str = "bad offset";

/// 연결 핸들러가 공유하는 불변 상태
#[derive(Debug)]
struct ServeContext {
    /// 정규화된 기준 디렉터리
    base_dir: PathBuf,
    chunk_size: usize,
    throttle_bps: u64,
}

/// 원본 파일 서버
pub struct FileServer {
    listener: TcpListener,
    context: Arc<ServeContext>,
}

impl FileServer {
    /// 기준 디렉터리를 준비하고 리스닝 소켓 바인딩
    pub async fn bind(config: ServerConfig) -> Result<Self> {
        tokio::fs::create_dir_all(&config.base_dir).await?;
        let base_dir = tokio::fs::canonicalize(&config.base_dir).await?;
        let listener = TcpListener::bind(config.bind_addr).await?;

        info!(
            "File server listening on {} (base={:?}, chunk={} bytes, throttle={} B/s)",
            listener.local_addr()?,
            base_dir,
            config.effective_chunk_size(),
            config.throttle_bps
        );

        Ok(Self {
            listener,
            context: Arc::new(ServeContext {
                base_dir,
                chunk_size: config.effective_chunk_size(),
                throttle_bps: config.throttle_bps,
            }),
        })
    }

    /// 실제 바인딩된 주소 (포트 0 바인딩 시 확인용)
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
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

            let context = self.context.clone();
            tokio::spawn(async move {
                if let Err(e) = serve_connection(stream, peer, &context).await {
                    debug!("Connection {} aborted: {}", peer, e);
                }
            });
        }
    }
}

/// 연결 하나 처리
///
/// 스트리밍 도중 IO 에러는 프레임 없이 연결을 닫는다 (피어는 재시도 가능한 전송 실패로 인식).
async fn serve_connection(stream: TcpStream, peer: SocketAddr, context: &ServeContext) -> Result<()> {
    let (read_half, write_half) = stream.into_split();
    let mut reader = FrameReader::new(read_half).with_idle_timeout(DEFAULT_IDLE_TIMEOUT);
    let mut writer = FrameWriter::new(write_half);

    let (name, offset) = match reader.read_request().await {
        Ok(request) => request,
        Err(e) if e.is_protocol() => {
            debug!("Bad request from {}: {}", peer, e);
            return writer.send(&Frame::Err(ERR_BAD_REQUEST.into())).await;
        }
        Err(e) => return Err(e),
    };

    let (mut file, size) = match open_confined(&context.base_dir, &name).await {
        Some(opened) => opened,
        None => {
            info!("{} GET {} -> not found", peer, name);
            return writer.send(&Frame::Err(ERR_NOT_FOUND.into())).await;
        }
    };

    if offset > size {
        info!("{} GET {} {} -> offset beyond size {}", peer, name, offset, size);
        return writer.send(&Frame::Err(ERR_BAD_OFFSET.into())).await;
    }
    if offset == size {
        info!("{} GET {} {} -> already complete", peer, name, offset);
        return writer.send(&Frame::Eof).await;
    }

    file.seek(SeekFrom::Start(offset)).await?;
    info!("{} GET {} from offset {} ({} bytes remaining)", peer, name, offset, size - offset);

    let start = Instant::now();
    let mut throttle = Throttle::new(context.throttle_bps);
    let mut buf = vec![0u8; context.chunk_size];
    let mut sent = 0u64;

    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            writer.send(&Frame::Eof).await?;
            break;
        }

        writer.send_data(&buf[..n]).await?;
        sent += n as u64;
        throttle.consume(n).await;
    }

    info!(
        "{} GET {} done: {} bytes in {:.2}s",
        peer,
        name,
        sent,
        start.elapsed().as_secs_f64()
    );

    Ok(())
}

/// 기준 디렉터리 안의 일반 파일로 이름 해석
///
/// 상위/루트 경로 성분, NUL, 심볼릭 링크로 밖을 가리키는 경우,
/// 디렉터리, 존재하지 않는 파일은 모두 똑같이 None.
pub async fn resolve_confined(base_dir: &Path, name: &str) -> Option<PathBuf> {
    if name.contains('\0') {
        return None;
    }
    let relative = Path::new(name.trim_start_matches('/'));
    let mut components = relative.components().peekable();
    components.peek()?;
    if !components.all(|c| matches!(c, Component::Normal(_) | Component::CurDir)) {
        return None;
    }

    let canonical = tokio::fs::canonicalize(base_dir.join(relative)).await.ok()?;
    if !canonical.starts_with(base_dir) {
        return None;
    }

    let metadata = tokio::fs::metadata(&canonical).await.ok()?;
    if !metadata.is_file() {
        return None;
    }

    Some(canonical)
}

/// 해석 후 열기 - 열기 실패도 "not found"
async fn open_confined(base_dir: &Path, name: &str) -> Option<(File, u64)> {
    let path = resolve_confined(base_dir, name).await?;
    let file = File::open(&path).await.ok()?;
    let size = file.metadata().await.ok()?.len();
    Some((file, size))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::io::AsyncWriteExt;

    async fn start_server(base: &Path, throttle_bps: u64) -> SocketAddr {
        let mut config = ServerConfig::new("127.0.0.1:0".parse().unwrap(), base);
        config.throttle_bps = throttle_bps;
        config.chunk_size = 4;
        let server = FileServer::bind(config).await.unwrap();
        let addr = server.local_addr().unwrap();
        tokio::spawn(server.run());
        addr
    }

    /// 요청 한 줄을 보내고 (DATA 페이로드 합, DATA 수, 종료 프레임) 반환
    async fn fetch(addr: SocketAddr, request: &[u8]) -> (Vec<u8>, usize, Frame) {
        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream.write_all(request).await.unwrap();
        let mut reader = FrameReader::new(stream);
        let mut body = Vec::new();
        let mut frames = 0;
        loop {
            match reader.read_frame().await.unwrap() {
                Frame::Data(n) => {
                    body.extend_from_slice(&reader.read_payload(n).await.unwrap());
                    frames += 1;
                }
                frame => return (body, frames, frame),
            }
        }
    }

    #[tokio::test]
    async fn test_full_and_resumed_download() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), b"0123456789").unwrap();
        let addr = start_server(dir.path(), 0).await;

        let (body, frames, end) = fetch(addr, b"GET a.txt 0\r\n").await;
        assert_eq!(body, b"0123456789");
        assert_eq!(frames, 3); // 4 + 4 + 2
        assert_eq!(end, Frame::Eof);

        let (body, _, end) = fetch(addr, b"GET a.txt 6\r\n").await;
        assert_eq!(body, b"6789");
        assert_eq!(end, Frame::Eof);
    }

    #[tokio::test]
    async fn test_offset_equal_size_is_immediate_eof() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), b"0123456789").unwrap();
        let addr = start_server(dir.path(), 0).await;

        let (body, frames, end) = fetch(addr, b"GET a.txt 10\r\n").await;
        assert!(body.is_empty());
        assert_eq!(frames, 0);
        assert_eq!(end, Frame::Eof);
    }

    #[tokio::test]
    async fn test_offset_beyond_size_is_bad_offset() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), b"0123456789").unwrap();
        let addr = start_server(dir.path(), 0).await;

        let (_, frames, end) = fetch(addr, b"GET a.txt 11\r\n").await;
        assert_eq!(frames, 0);
        assert_eq!(end, Frame::Err(ERR_BAD_OFFSET.into()));
    }

    #[tokio::test]
    async fn test_bad_requests() {
        let dir = tempfile::tempdir().unwrap();
        let addr = start_server(dir.path(), 0).await;

        for request in [&b"GET a.txt\r\n"[..], b"GET a.txt 1 2\r\n", b"GET a.txt -5\r\n", b"HELLO\r\n", b"EOF\r\n"] {
            let (_, _, end) = fetch(addr, request).await;
            assert_eq!(end, Frame::Err(ERR_BAD_REQUEST.into()), "{:?}", String::from_utf8_lossy(request));
        }
    }

    #[tokio::test]
    async fn test_traversal_is_indistinguishable_from_missing() {
        let root = tempfile::tempdir().unwrap();
        let base = root.path().join("files");
        std::fs::create_dir_all(base.join("sub")).unwrap();
        std::fs::write(root.path().join("secret.txt"), b"secret").unwrap();
        let addr = start_server(&base, 0).await;

        let (_, _, missing) = fetch(addr, b"GET nope.txt 0\r\n").await;
        let (_, _, escaped) = fetch(addr, b"GET ../secret.txt 0\r\n").await;
        let (_, _, nested) = fetch(addr, b"GET sub/../../secret.txt 0\r\n").await;
        let (_, _, directory) = fetch(addr, b"GET sub 0\r\n").await;

        assert_eq!(missing, Frame::Err(ERR_NOT_FOUND.into()));
        assert_eq!(escaped, missing);
        assert_eq!(nested, missing);
        assert_eq!(directory, missing);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_symlink_escape_is_not_found() {
        let root = tempfile::tempdir().unwrap();
        let base = root.path().join("files");
        std::fs::create_dir_all(&base).unwrap();
        std::fs::write(root.path().join("secret.txt"), b"secret").unwrap();
        std::os::unix::fs::symlink(root.path().join("secret.txt"), base.join("link.txt")).unwrap();

        let canonical = tokio::fs::canonicalize(&base).await.unwrap();
        assert!(resolve_confined(&canonical, "link.txt").await.is_none());
    }

    #[tokio::test]
    async fn test_resolve_confined() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("videos")).unwrap();
        std::fs::write(dir.path().join("videos/clip.bin"), b"x").unwrap();
        let base = tokio::fs::canonicalize(dir.path()).await.unwrap();

        assert!(resolve_confined(&base, "videos/clip.bin").await.is_some());
        assert!(resolve_confined(&base, "/videos/clip.bin").await.is_some());
        assert!(resolve_confined(&base, "./videos/clip.bin").await.is_some());
        assert!(resolve_confined(&base, "").await.is_none());
        assert!(resolve_confined(&base, "videos").await.is_none());
        assert!(resolve_confined(&base, "videos/../videos/clip.bin").await.is_none());
        assert!(resolve_confined(&base, "clip\0.bin").await.is_none());
    }

    #[tokio::test]
    async fn test_throttled_transfer_takes_expected_time() {
        // M = 3000, R = 1000 -> 2s 이상
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("big.bin"), vec![7u8; 3000]).unwrap();

        let mut config = ServerConfig::new("127.0.0.1:0".parse().unwrap(), dir.path());
        config.throttle_bps = 1000;
        config.chunk_size = 500;
        let server = FileServer::bind(config).await.unwrap();
        let addr = server.local_addr().unwrap();
        tokio::spawn(server.run());

        let start = Instant::now();
        let (body, _, end) = fetch(addr, b"GET big.bin 0\r\n").await;
        let elapsed = start.elapsed();

        assert_eq!(body.len(), 3000);
        assert_eq!(end, Frame::Eof);
        assert!(elapsed >= Duration::from_secs(2), "{:?}", elapsed);
        assert!(elapsed < Duration::from_secs(4), "{:?}", elapsed);
    }
}
