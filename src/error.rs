//! 에러 타입 정의
//!
//! 프로토콜 / 전송 / 애플리케이션 / 설정 에러로 구분된다.
//! 재시도 여부는 [`Error::is_retryable`]로만 판단한다.

use std::time::Duration;

use thiserror::Error;

/// RSP 에러 타입
#[derive(Error, Debug)]
pub enum Error {
    // ── 프로토콜 에러: 현재 연결에 대해 치명적, 프레이밍 계층에서 재시도하지 않음 ──
    #[error("잘못된 헤더: {0:?}")]
    MalformedHeader(String),

    #[error("예상하지 못한 프레임: expected {expected}, got {got}")]
    UnexpectedFrame { expected: &'static str, got: String },

    #[error("헤더 길이 초과: 최대 {max} 바이트")]
    HeaderTooLong { max: usize },

    #[error("프레임 크기 초과: {len} > {max}")]
    FrameTooLarge { len: u64, max: u64 },

    #[error("유효하지 않은 요청: {0}")]
    InvalidRequest(String),

    // ── 전송 에러: 소유한 재시도 루프가 backoff 후 재시도 ──
    #[error("IO 에러: {0}")]
    Io(#[from] std::io::Error),

    #[error("타임아웃: {0:?} 동안 응답 없음")]
    Timeout(Duration),

    #[error("연결 종료")]
    ConnectionClosed,

    #[error("연결 실패: {addr}: {source}")]
    Dial {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    // ── 애플리케이션 에러 ──
    #[error("원격 에러: {0}")]
    Remote(String),

    #[error("라우트 없음: {0}")]
    RouteNotFound(String),

    // ── 설정 에러 ──
    #[error("설정 에러: {0}")]
    Config(String),

    #[error("JSON 에러: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// 전송 계층 실패인지 (재시도 대상)
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Io(_) | Error::Timeout(_) | Error::ConnectionClosed | Error::Dial { .. }
        )
    }

    /// 프로토콜 위반인지 (바이트 계산을 더 이상 신뢰할 수 없음)
    pub fn is_protocol(&self) -> bool {
        matches!(
            self,
            Error::MalformedHeader(_)
                | Error::UnexpectedFrame { .. }
                | Error::HeaderTooLong { .. }
                | Error::FrameTooLarge { .. }
                | Error::InvalidRequest(_)
        )
    }
}

/// Result 타입 별칭
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_errors_are_retryable() {
        let io = Error::Io(std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe"));
        assert!(io.is_retryable());
        assert!(Error::ConnectionClosed.is_retryable());
        assert!(Error::Timeout(Duration::from_secs(10)).is_retryable());
        assert!(Error::Dial {
            addr: "127.0.0.1:1".into(),
            source: std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused"),
        }
        .is_retryable());
    }

    #[test]
    fn test_terminal_errors() {
        assert!(!Error::Remote("not found".into()).is_retryable());
        assert!(!Error::MalformedHeader("HELLO".into()).is_retryable());
        assert!(Error::MalformedHeader("HELLO".into()).is_protocol());
        assert!(Error::FrameTooLarge { len: 10, max: 1 }.is_protocol());
        assert!(!Error::RouteNotFound("a".into()).is_protocol());
    }
}
