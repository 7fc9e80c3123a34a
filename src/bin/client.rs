//! RSP 이어받기 클라이언트
//!
//! `<out>.part`에 이어 쓰고, `EOF`를 받으면 최종 이름으로 바꾼다.
//! 중간에 끊겨도 다시 실행하면 부분 파일 길이부터 이어받는다.
//!
//! 사용법:
//!   cargo run --release --bin rsp-client -- [OPTIONS]
//!
//! 예시:
//!   cargo run --release --bin rsp-client -- --server 127.0.0.1:8000 --name example.txt --out example.txt

use std::path::PathBuf;

use tracing::{error, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use rsp::{ClientConfig, Downloader, Outcome};

fn parse_args() -> Result<ClientConfig, Box<dyn std::error::Error>> {
    let args: Vec<String> = std::env::args().collect();
    let mut config = ClientConfig::default();
    let mut out: Option<PathBuf> = None;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--server" | "-s" => {
                if i + 1 < args.len() {
                    config.server_addr = args[i + 1].clone();
                    i += 1;
                }
            }
            "--name" | "-n" => {
                if i + 1 < args.len() {
                    config.name = args[i + 1].clone();
                    i += 1;
                }
            }
            "--out" | "-o" => {
                if i + 1 < args.len() {
                    out = Some(PathBuf::from(&args[i + 1]));
                    i += 1;
                }
            }
            "--max-attempts" => {
                if i + 1 < args.len() {
                    config.max_attempts = Some(args[i + 1].parse()?);
                    i += 1;
                }
            }
            "--unstable" => {
                config = ClientConfig {
                    max_attempts: config.max_attempts,
                    ..ClientConfig::unstable_network(config.server_addr.clone(), config.name.clone(), &config.output)
                };
            }
            "--help" | "-h" => {
                println!(
                    r#"RSP Client - Resumable Stream Protocol 클라이언트

사용법:
  cargo run --release --bin rsp-client -- [OPTIONS]

옵션:
  -s, --server <ADDR>      서버 또는 프록시 주소 (기본: 127.0.0.1:8000)
  -n, --name <NAME>        요청할 파일 이름
  -o, --out <PATH>         저장 경로 (기본: 이름과 동일), 부분 파일은 <PATH>.part
  --max-attempts <N>       최대 세션 시도 횟수 (기본: 무제한)
  --unstable               불안정 네트워크 프리셋
  -h, --help               이 도움말 출력
"#
                );
                std::process::exit(0);
            }
            other => return Err(format!("unknown argument: {}", other).into()),
        }
        i += 1;
    }

    if config.name.is_empty() {
        return Err("--name is required".into());
    }
    config.output = out.unwrap_or_else(|| PathBuf::from(&config.name));

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
    let downloader = Downloader::new(config)?;

    match downloader.run().await {
        Ok(Outcome::Completed { bytes }) => {
            info!("Saved {:?} ({} bytes)", downloader.config().output, bytes);
        }
        Ok(Outcome::Empty) => {
            info!("{} is empty, no file written", downloader.config().name);
        }
        Err(e) => {
            error!("Download failed: {}", e);
            std::process::exit(1);
        }
    }

    Ok(())
}
