//! RSP 릴레이 프록시
//!
//! 이름별 라우트로 백엔드를 골라 프레임을 중계
//! - 백엔드 장애 시 누적 오프셋으로 재접속 (클라이언트는 끊김을 모름)
//! - 라우트 파일 감시 + SIGHUP 수동 리로드
//!
//! 사용법:
//!   cargo run --release --bin rsp-proxy -- [OPTIONS]
//!
//! 예시:
//!   cargo run --release --bin rsp-proxy -- --addr :8000 --routes ./routes.json
//!   kill -HUP <pid>   # 즉시 리로드

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use rsp::config::parse_listen_addr;
use rsp::routes::ensure_routes_file;
use rsp::{Proxy, ProxyConfig, RouteStore};

fn parse_args() -> Result<ProxyConfig, Box<dyn std::error::Error>> {
    let args: Vec<String> = std::env::args().collect();
    let mut config = ProxyConfig::default();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--addr" | "-a" => {
                if i + 1 < args.len() {
                    config.bind_addr = parse_listen_addr(&args[i + 1])?;
                    i += 1;
                }
            }
            "--routes" | "-r" => {
                if i + 1 < args.len() {
                    config.routes_path = PathBuf::from(&args[i + 1]);
                    i += 1;
                }
            }
            "--max-redials" => {
                if i + 1 < args.len() {
                    config.max_redials = Some(args[i + 1].parse()?);
                    i += 1;
                }
            }
            "--debounce-ms" => {
                if i + 1 < args.len() {
                    config.reload_debounce = Duration::from_millis(args[i + 1].parse()?);
                    i += 1;
                }
            }
            "--no-announce" => {
                config.announce_backend = false;
            }
            "--help" | "-h" => {
                println!(
                    r#"RSP Proxy - Resumable Stream Protocol 릴레이 프록시

사용법:
  cargo run --release --bin rsp-proxy -- [OPTIONS]

옵션:
  -a, --addr <ADDR>        리스닝 주소 (기본: :8000)
  -r, --routes <PATH>      라우트 JSON 파일 (기본: ./routes.json, 없으면 {{}}로 생성)
  --max-redials <N>        연속 재접속 실패 한도 (기본: 무제한)
  --debounce-ms <MS>       라우트 파일 변경 디바운스 (기본: 200)
  --no-announce            SRV 프레임 생략
  -h, --help               이 도움말 출력

라우트 파일 예시:
  {{ "movie.mkv": "10.0.0.2:5000", "": "10.0.0.3:5000" }}
  빈 이름 키는 기본 라우트
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

/// SIGHUP마다 즉시 리로드 요청
#[cfg(unix)]
fn spawn_sighup_listener(handle: rsp::ReloadHandle) -> std::io::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut hangup = signal(SignalKind::hangup())?;
    tokio::spawn(async move {
        while hangup.recv().await.is_some() {
            info!("SIGHUP received, reloading routes");
            if !handle.trigger().await {
                break;
            }
        }
    });
    Ok(())
}

#[cfg(not(unix))]
fn spawn_sighup_listener(_handle: rsp::ReloadHandle) -> std::io::Result<()> {
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 로깅 설정 (RUST_LOG로 조정 가능)
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config = parse_args()?;
    ensure_routes_file(&config.routes_path).await?;

    let routes = Arc::new(RouteStore::default());
    if let Err(e) = routes.reload_from(&config.routes_path).await {
        warn!("Initial routes load failed, starting with no routes: {}", e);
    }

    let proxy = Proxy::bind(config, routes).await?;
    let handle = proxy.spawn_reloader();
    spawn_sighup_listener(handle)?;
    info!("Proxy ready on {}", proxy.local_addr()?);

    tokio::select! {
        result = proxy.run() => result?,
        _ = tokio::signal::ctrl_c() => info!("Shutting down"),
    }

    Ok(())
}
