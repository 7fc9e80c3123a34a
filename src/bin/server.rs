//! RSP 원본 파일 서버
//!
//! 기준 디렉터리 안의 파일을 요청 오프셋부터 `DATA` 프레임으로 전송
//! - 연결별 대역폭 제한 (선택)
//! - 기준 디렉터리 밖 경로는 "not found"와 구분되지 않음
//!
//! 사용법:
//!   cargo run --release --bin rsp-fileserver -- [OPTIONS]
//!
//! 예시:
//!   cargo run --release --bin rsp-fileserver -- --addr :5000 --base /srv/files --throttle-kbps 512

use std::path::PathBuf;

use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use rsp::config::parse_listen_addr;
use rsp::{FileServer, ServerConfig};

fn parse_args() -> Result<ServerConfig, Box<dyn std::error::Error>> {
    let args: Vec<String> = std::env::args().collect();
    let mut config = ServerConfig::default();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--addr" | "-a" => {
                if i + 1 < args.len() {
                    config.bind_addr = parse_listen_addr(&args[i + 1])?;
                    i += 1;
                }
            }
            "--base" | "-b" => {
                if i + 1 < args.len() {
                    config.base_dir = PathBuf::from(&args[i + 1]);
                    i += 1;
                }
            }
            "--throttle-kbps" | "-t" => {
                if i + 1 < args.len() {
                    config = config.with_throttle_kbps(args[i + 1].parse()?);
                    i += 1;
                }
            }
            "--chunk-size" => {
                if i + 1 < args.len() {
                    config.chunk_size = args[i + 1].parse()?;
                    i += 1;
                }
            }
            "--help" | "-h" => {
                println!(
                    r#"RSP File Server - Resumable Stream Protocol 원본 서버

사용법:
  cargo run --release --bin rsp-fileserver -- [OPTIONS]

옵션:
  -a, --addr <ADDR>          리스닝 주소 (기본: :5000)
  -b, --base <DIR>           파일 기준 디렉터리 (기본: /srv/files)
  -t, --throttle-kbps <N>    연결별 전송 속도 제한 KB/s, 0 = 무제한 (기본: 0)
  --chunk-size <BYTES>       청크 크기 (기본: 262144)
  -h, --help                 이 도움말 출력
"#
                );
                std::process::exit(0);
            }
            other => return Err(format!("unknown argument: {}", other).into()),
        }
        i += 1;
    }

    Ok(config)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 로깅 설정 (RUST_LOG로 조정 가능)
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config = parse_args()?;
    let server = FileServer::bind(config).await?;
    info!("File server ready on {}", server.local_addr()?);

    tokio::select! {
        result = server.run() => result?,
        _ = tokio::signal::ctrl_c() => info!("Shutting down"),
    }

    Ok(())
}
