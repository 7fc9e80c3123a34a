//! 이어받기 클라이언트
//!
//! - `<output>.part` 길이가 곧 재개 오프셋 (재시작 후 유일한 기준)
//! - 전송 실패 시 backoff 후 재시도, 부분 파일은 절대 자르지 않음
//! - `EOF`를 받았고 누적 바이트가 0보다 클 때만 최종 이름으로 rename
//! - `ERR`는 즉시 종료 (재시도하지 않음)

use std::io::ErrorKind;

use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

use crate::backoff::Backoff;
use crate::config::ClientConfig;
use crate::frame::{is_token, Frame, FrameReader, FrameWriter};
use crate::stats::TransferStats;
use crate::{Error, Result};

/// 다운로드 결과
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// 부분 파일이 최종 이름으로 rename됨
    Completed { bytes: u64 },

    /// 원본이 빈 파일 - rename 없이 빈 부분 파일만 정리
    Empty,
}

/// 이어받기 다운로더
pub struct Downloader {
    config: ClientConfig,
}

impl Downloader {
    pub fn new(config: ClientConfig) -> Result<Self> {
        if !is_token(&config.name) {
            return Err(Error::InvalidRequest(format!("invalid name {:?}", config.name)));
        }
        Ok(Self { config })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// 현재 재개 오프셋 (부분 파일 길이, 없으면 0)
    pub async fn resume_offset(&self) -> Result<u64> {
        match tokio::fs::metadata(self.config.partial_path()).await {
            Ok(metadata) => Ok(metadata.len()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(0),
            Err(e) => Err(e.into()),
        }
    }

    /// 완료(또는 재시도 한도 초과, 종료 에러)까지 다운로드
    pub async fn run(&self) -> Result<Outcome> {
        if let Some(parent) = self.config.output.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut stats = TransferStats::new(self.resume_offset().await?);
        let retries = self.config.max_attempts.map(|n| n.saturating_sub(1));
        let mut backoff =
            Backoff::new(self.config.retry_backoff, self.config.retry_backoff_max).with_max_attempts(retries);

        info!(
            "Downloading {} from {} into {:?} (resume offset {})",
            self.config.name, self.config.server_addr, self.config.output, stats.resumed_from
        );

        loop {
            let offset = self.resume_offset().await?;
            stats.record_session();

            let error = match self.session(offset, &mut stats).await {
                Ok(()) => return self.complete(&stats).await,
                Err(e) => e,
            };

            if !error.is_retryable() {
                warn!(
                    "Download of {} failed: {}; partial kept at offset {}",
                    self.config.name,
                    error,
                    self.resume_offset().await.unwrap_or(offset)
                );
                return Err(error);
            }

            let resume_at = self.resume_offset().await?;
            match backoff.next_delay() {
                Some(delay) => {
                    stats.record_retry();
                    warn!(
                        "Session #{} for {} failed: {}; retry #{} in {:?} from offset {}",
                        stats.sessions,
                        self.config.name,
                        error,
                        backoff.attempts(),
                        delay,
                        resume_at
                    );
                    tokio::time::sleep(delay).await;
                }
                None => {
                    warn!(
                        "Giving up on {} after {} sessions; partial kept at offset {}",
                        self.config.name, stats.sessions, resume_at
                    );
                    return Err(error);
                }
            }
        }
    }

    /// 세션 하나: 연결, 요청, `EOF`/`ERR`/끊김까지 프레임 처리
    async fn session(&self, offset: u64, stats: &mut TransferStats) -> Result<()> {
        let config = &self.config;
        let stream = match tokio::time::timeout(config.connect_timeout, TcpStream::connect(&config.server_addr)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(source)) => {
                return Err(Error::Dial {
                    addr: config.server_addr.clone(),
                    source,
                })
            }
            Err(_) => return Err(Error::Timeout(config.connect_timeout)),
        };

        let (read_half, write_half) = stream.into_split();
        let mut writer = FrameWriter::new(write_half);
        writer
            .send(&Frame::Get {
                name: config.name.clone(),
                offset,
            })
            .await?;

        let mut reader = FrameReader::new(read_half)
            .with_idle_timeout(config.idle_timeout)
            .with_max_frame_len(config.max_frame_len);
        let mut partial = open_partial(config).await?;
        let mut received = offset;

        loop {
            match reader.read_frame().await? {
                Frame::Data(len) => {
                    // 페이로드 전체를 받은 뒤에만 부분 파일에 추가
                    let payload = reader.read_payload(len).await?;
                    partial.write_all(&payload).await?;
                    partial.flush().await?;
                    received += len;
                    stats.record_data(len);
                    debug!("+{} bytes (offset={})", len, received);
                }
                Frame::Srv(backend) => {
                    debug!("Served via backend {}", backend);
                }
                Frame::Eof => {
                    partial.sync_all().await?;
                    info!("EOF received for {} at offset {}", config.name, received);
                    return Ok(());
                }
                Frame::Err(reason) => return Err(Error::Remote(reason)),
                frame @ Frame::Get { .. } => {
                    return Err(Error::UnexpectedFrame {
                        expected: "DATA, SRV, EOF or ERR",
                        got: frame.to_string(),
                    })
                }
            }
        }
    }

    /// `EOF` 이후 마무리
    async fn complete(&self, stats: &TransferStats) -> Result<Outcome> {
        let partial = self.config.partial_path();
        let total = self.resume_offset().await?;

        if total == 0 {
            match tokio::fs::remove_file(&partial).await {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
            warn!("{} is empty at the source; nothing to rename", self.config.name);
            return Ok(Outcome::Empty);
        }

        tokio::fs::rename(&partial, &self.config.output).await?;
        info!("Download complete: {:?} ({} bytes)", self.config.output, total);
        info!("{}", stats.summary());

        Ok(Outcome::Completed { bytes: total })
    }
}

/// 부분 파일을 추가 모드로 열기 (없으면 생성)
async fn open_partial(config: &ClientConfig) -> Result<File> {
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(config.partial_path())
        .await?;
    Ok(file)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::net::TcpListener;

    use crate::config::ServerConfig;
    use crate::server::FileServer;

    fn client_config(addr: &str, name: &str, output: &Path) -> ClientConfig {
        let mut config = ClientConfig::new(addr, name, output);
        config.retry_backoff = Duration::from_millis(10);
        config.retry_backoff_max = Duration::from_millis(50);
        config.idle_timeout = Duration::from_secs(2);
        config
    }

    async fn start_server(base: &Path) -> String {
        let mut config = ServerConfig::new("127.0.0.1:0".parse().unwrap(), base);
        config.chunk_size = 3;
        let server = FileServer::bind(config).await.unwrap();
        let addr = server.local_addr().unwrap().to_string();
        tokio::spawn(server.run());
        addr
    }

    /// 연결마다 스크립트 응답을 보내는 가짜 서버 (요청 줄 기록)
    async fn scripted_server(responses: Vec<Vec<u8>>) -> (String, Arc<parking_lot::Mutex<Vec<String>>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let requests = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let log = requests.clone();
        tokio::spawn(async move {
            for response in responses {
                let (stream, _) = listener.accept().await.unwrap();
                let (read_half, mut write_half) = stream.into_split();
                let request = FrameReader::new(read_half).read_frame().await.unwrap();
                log.lock().push(request.to_string());
                write_half.write_all(&response).await.unwrap();
                write_half.shutdown().await.ok();
            }
        });
        (addr, requests)
    }

    fn source_bytes() -> Vec<u8> {
        (0..1000u32).map(|i| (i * 7 % 251) as u8).collect()
    }

    #[tokio::test]
    async fn test_full_download_renames() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("srv")).unwrap();
        std::fs::write(dir.path().join("srv/data.bin"), source_bytes()).unwrap();
        let addr = start_server(&dir.path().join("srv")).await;

        let output = dir.path().join("out/data.bin");
        let downloader = Downloader::new(client_config(&addr, "data.bin", &output)).unwrap();
        let outcome = downloader.run().await.unwrap();

        assert_eq!(outcome, Outcome::Completed { bytes: 1000 });
        assert_eq!(std::fs::read(&output).unwrap(), source_bytes());
        assert!(!downloader.config().partial_path().exists());
    }

    #[tokio::test]
    async fn test_split_download_matches_uninterrupted() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("srv")).unwrap();
        std::fs::write(dir.path().join("srv/data.bin"), source_bytes()).unwrap();
        let addr = start_server(&dir.path().join("srv")).await;

        for midpoint in [1usize, 377, 999] {
            let output = dir.path().join(format!("split-{}.bin", midpoint));
            let config = client_config(&addr, "data.bin", &output);
            std::fs::write(config.partial_path(), &source_bytes()[..midpoint]).unwrap();

            let outcome = Downloader::new(config).unwrap().run().await.unwrap();
            assert_eq!(outcome, Outcome::Completed { bytes: 1000 });
            assert_eq!(std::fs::read(&output).unwrap(), source_bytes(), "midpoint {}", midpoint);
        }
    }

    #[tokio::test]
    async fn test_already_complete_partial_is_renamed() {
        // a.txt 10 바이트, 부분 파일도 10 바이트 -> 즉시 EOF, rename
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("srv")).unwrap();
        std::fs::write(dir.path().join("srv/a.txt"), b"0123456789").unwrap();
        let addr = start_server(&dir.path().join("srv")).await;

        let output = dir.path().join("a.txt");
        let config = client_config(&addr, "a.txt", &output);
        std::fs::write(config.partial_path(), b"0123456789").unwrap();

        let outcome = Downloader::new(config.clone()).unwrap().run().await.unwrap();
        assert_eq!(outcome, Outcome::Completed { bytes: 10 });
        assert_eq!(std::fs::read(&output).unwrap(), b"0123456789");
        assert!(!config.partial_path().exists());
    }

    #[tokio::test]
    async fn test_resume_after_transport_failure() {
        let (addr, requests) = scripted_server(vec![
            b"SRV origin:1\r\nDATA 4\r\n0123DATA 4\r\n45".to_vec(),
            b"DATA 6\r\n456789EOF\r\n".to_vec(),
        ])
        .await;
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("f.bin");

        let outcome = Downloader::new(client_config(&addr, "f.bin", &output))
            .unwrap()
            .run()
            .await
            .unwrap();

        assert_eq!(outcome, Outcome::Completed { bytes: 10 });
        assert_eq!(std::fs::read(&output).unwrap(), b"0123456789");
        assert_eq!(
            *requests.lock(),
            vec!["GET f.bin 0".to_string(), "GET f.bin 4".to_string()]
        );
    }

    #[tokio::test]
    async fn test_err_is_terminal_and_preserves_partial() {
        let (addr, requests) = scripted_server(vec![
            b"DATA 2\r\nabERR not found\r\n".to_vec(),
            b"EOF\r\n".to_vec(),
        ])
        .await;
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("f.bin");
        let config = client_config(&addr, "f.bin", &output);

        let err = Downloader::new(config.clone()).unwrap().run().await.unwrap_err();
        assert!(matches!(err, Error::Remote(ref reason) if reason == "not found"));
        assert!(!output.exists());
        assert_eq!(std::fs::read(config.partial_path()).unwrap(), b"ab");
        assert_eq!(requests.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_no_rename_without_eof() {
        let (addr, _) = scripted_server(vec![b"DATA 3\r\nabc".to_vec(), b"DATA 2\r\nde".to_vec()]).await;
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("f.bin");
        let mut config = client_config(&addr, "f.bin", &output);
        config.max_attempts = Some(2);

        let err = Downloader::new(config.clone()).unwrap().run().await.unwrap_err();
        assert!(err.is_retryable());
        assert!(!output.exists());
        assert_eq!(std::fs::read(config.partial_path()).unwrap(), b"abcde");
    }

    #[tokio::test]
    async fn test_empty_source() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("srv")).unwrap();
        std::fs::write(dir.path().join("srv/empty.bin"), b"").unwrap();
        let addr = start_server(&dir.path().join("srv")).await;

        let output = dir.path().join("empty.bin");
        let config = client_config(&addr, "empty.bin", &output);
        let outcome = Downloader::new(config.clone()).unwrap().run().await.unwrap();

        assert_eq!(outcome, Outcome::Empty);
        assert!(!output.exists());
        assert!(!config.partial_path().exists());
    }

    #[tokio::test]
    async fn test_idle_peer_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        tokio::spawn(async move {
            let (_silent, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(30)).await;
        });

        let dir = tempfile::tempdir().unwrap();
        let mut config = client_config(&addr, "f.bin", &dir.path().join("f.bin"));
        config.idle_timeout = Duration::from_millis(100);
        config.max_attempts = Some(1);

        let err = Downloader::new(config).unwrap().run().await.unwrap_err();
        assert!(matches!(err, Error::Timeout(_)));
    }

    #[test]
    fn test_invalid_name_rejected() {
        assert!(Downloader::new(ClientConfig::new("127.0.0.1:1", "two words", "out")).is_err());
        assert!(Downloader::new(ClientConfig::new("127.0.0.1:1", "", "out")).is_err());
    }
}
