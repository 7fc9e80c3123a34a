//! 프로토콜 프레임 정의 및 코덱
//!
//! 모든 헤더는 CRLF로 끝나는 ASCII 한 줄:
//! - `GET <name> <offset>` : 요청 (연결당 정확히 한 번)
//! - `SRV <backend>`       : 정보성 알림 (오프셋 계산에 영향 없음)
//! - `DATA <n>`            : 바로 뒤에 구분자 없이 정확히 n 바이트 페이로드
//! - `EOF`                 : 성공 종료
//! - `ERR <reason>`        : 실패 종료
//!
//! 입력은 LF 단독 종료도 허용하지만 출력은 항상 CRLF.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use bytes::BytesMut;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader, BufWriter};

use crate::{Error, Result, DEFAULT_MAX_FRAME_LEN, MAX_HEADER_LEN};

/// 헤더 종료자
pub const CRLF: &str = "\r\n";

/// 프로토콜 프레임 (헤더 단위)
///
/// `Data`는 헤더만 표현한다. 페이로드는 [`FrameReader::read_payload`]로 따로 읽는다.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// 다운로드 요청
    Get { name: String, offset: u64 },

    /// 백엔드 알림
    Srv(String),

    /// 페이로드 길이 선언
    Data(u64),

    /// 성공 종료
    Eof,

    /// 실패 종료
    Err(String),
}

impl Frame {
    /// 헤더 한 줄 파싱 (끝의 CR/LF는 무시)
    pub fn parse(line: &str) -> Result<Frame> {
        let line = line.trim_end_matches(&['\r', '\n'][..]);
        let (verb, rest) = match line.split_once(' ') {
            Some((verb, rest)) => (verb, Some(rest)),
            None => (line, None),
        };

        match (verb, rest) {
            ("EOF", None) => Ok(Frame::Eof),
            ("ERR", reason) => Ok(Frame::Err(reason.unwrap_or("").to_string())),
            ("DATA", Some(len)) => parse_decimal(len)
                .map(Frame::Data)
                .ok_or_else(|| Error::MalformedHeader(line.to_string())),
            ("SRV", Some(backend)) if is_token(backend) => Ok(Frame::Srv(backend.to_string())),
            (verb, _) if verb.eq_ignore_ascii_case("GET") => parse_get(line),
            _ => Err(Error::MalformedHeader(line.to_string())),
        }
    }

    /// 종료 프레임 여부 (뒤에 더 이상 프레임이 오지 않음)
    pub fn is_terminal(&self) -> bool {
        matches!(self, Frame::Eof | Frame::Err(_))
    }

    /// 프레임 종류 이름 (로그/에러용)
    pub fn kind(&self) -> &'static str {
        match self {
            Frame::Get { .. } => "GET",
            Frame::Srv(_) => "SRV",
            Frame::Data(_) => "DATA",
            Frame::Eof => "EOF",
            Frame::Err(_) => "ERR",
        }
    }

    /// CRLF 포함 헤더 바이트
    pub fn to_bytes(&self) -> Vec<u8> {
        format!("{}{}", self, CRLF).into_bytes()
    }

    /// 버퍼에 CRLF 포함 헤더 추가
    pub fn encode_into(&self, buf: &mut BytesMut) {
        buf.extend_from_slice(self.to_string().as_bytes());
        buf.extend_from_slice(CRLF.as_bytes());
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Frame::Get { name, offset } => write!(f, "GET {} {}", name, offset),
            Frame::Srv(backend) => write!(f, "SRV {}", backend),
            Frame::Data(len) => write!(f, "DATA {}", len),
            Frame::Eof => f.write_str("EOF"),
            Frame::Err(reason) if reason.is_empty() => f.write_str("ERR"),
            Frame::Err(reason) => write!(f, "ERR {}", reason),
        }
    }
}

/// `GET <name> <offset>` - 인자는 정확히 두 개
fn parse_get(line: &str) -> Result<Frame> {
    let parts: Vec<&str> = line.split_whitespace().collect();
    if parts.len() != 3 {
        return Err(Error::InvalidRequest(format!(
            "expected 2 arguments, got {}",
            parts.len().saturating_sub(1)
        )));
    }

    let offset = parse_decimal(parts[2])
        .ok_or_else(|| Error::InvalidRequest(format!("bad offset {:?}", parts[2])))?;

    Ok(Frame::Get {
        name: parts[1].to_string(),
        offset,
    })
}

/// 부호 없는 10진수만 허용 (`+`, `-`, 공백 거부)
fn parse_decimal(s: &str) -> Option<u64> {
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    s.parse().ok()
}

/// 비어 있지 않고 공백 없는 토큰
pub fn is_token(s: &str) -> bool {
    !s.is_empty() && !s.chars().any(|c| c.is_whitespace() || c.is_control())
}

/// 유휴 타임아웃 적용
async fn with_deadline<T, F>(deadline: Option<Duration>, fut: F) -> Result<T>
where
    F: Future<Output = std::io::Result<T>>,
{
    match deadline {
        Some(limit) => tokio::time::timeout(limit, fut)
            .await
            .map_err(|_| Error::Timeout(limit))?
            .map_err(Error::from),
        None => fut.await.map_err(Error::from),
    }
}

/// 프레임 수신기
pub struct FrameReader<R> {
    inner: BufReader<R>,

    /// 읽기 호출마다 적용되는 유휴 타임아웃
    idle_timeout: Option<Duration>,

    /// 허용하는 최대 DATA 길이
    max_frame_len: u64,

    line: Vec<u8>,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner: BufReader::new(inner),
            idle_timeout: None,
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
            line: Vec::with_capacity(128),
        }
    }

    /// 유휴 타임아웃 설정
    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = Some(timeout);
        self
    }

    /// 최대 DATA 길이 설정
    pub fn with_max_frame_len(mut self, max: u64) -> Self {
        self.max_frame_len = max;
        self
    }

    /// 헤더 한 줄을 읽어 프레임으로 파싱
    ///
    /// 첫 바이트 전에 또는 줄 중간에 연결이 닫히면 `ConnectionClosed`.
    pub async fn read_frame(&mut self) -> Result<Frame> {
        self.line.clear();
        // 본문 + CRLF
        let limit = MAX_HEADER_LEN as u64 + 2;
        let read = with_deadline(
            self.idle_timeout,
            (&mut self.inner).take(limit).read_until(b'\n', &mut self.line),
        )
        .await?;

        if read == 0 {
            return Err(Error::ConnectionClosed);
        }
        if self.line.last() != Some(&b'\n') {
            if self.line.len() > MAX_HEADER_LEN {
                return Err(Error::HeaderTooLong { max: MAX_HEADER_LEN });
            }
            return Err(Error::ConnectionClosed);
        }
        let body_len = self.line.len() - if self.line.ends_with(b"\r\n") { 2 } else { 1 };
        if body_len > MAX_HEADER_LEN {
            return Err(Error::HeaderTooLong { max: MAX_HEADER_LEN });
        }

        let text = std::str::from_utf8(&self.line)
            .map_err(|_| Error::MalformedHeader(String::from_utf8_lossy(&self.line).into_owned()))?;
        let frame = Frame::parse(text)?;

        if let Frame::Data(len) = frame {
            if len > self.max_frame_len {
                return Err(Error::FrameTooLarge {
                    len,
                    max: self.max_frame_len,
                });
            }
        }

        Ok(frame)
    }

    /// 정확히 `len` 바이트 페이로드 수신
    ///
    /// TCP 분할과 무관하게 짧은 읽기는 채워질 때까지 반복한다.
    pub async fn read_payload(&mut self, len: u64) -> Result<BytesMut> {
        if len > self.max_frame_len {
            return Err(Error::FrameTooLarge {
                len,
                max: self.max_frame_len,
            });
        }

        let mut buf = BytesMut::zeroed(len as usize);
        let mut filled = 0;
        while filled < buf.len() {
            let n = with_deadline(self.idle_timeout, self.inner.read(&mut buf[filled..])).await?;
            if n == 0 {
                return Err(Error::ConnectionClosed);
            }
            filled += n;
        }

        Ok(buf)
    }

    /// 피어가 연결을 닫을 때까지 들어오는 바이트를 버림
    ///
    /// 요청 이후 더 받을 것이 없는 쪽에서 상대 종료를 감지할 때 쓴다.
    /// 유휴 타임아웃은 적용하지 않으며 취소해도 안전하다.
    pub async fn closed(&mut self) -> Error {
        let mut scratch = [0u8; 512];
        loop {
            match self.inner.read(&mut scratch).await {
                Ok(0) => return Error::ConnectionClosed,
                Ok(_) => continue,
                Err(e) => return Error::Io(e),
            }
        }
    }

    /// 요청 한 줄 읽기 - `GET` 이외의 프레임은 `InvalidRequest`
    pub async fn read_request(&mut self) -> Result<(String, u64)> {
        match self.read_frame().await? {
            Frame::Get { name, offset } => Ok((name, offset)),
            Frame::Srv(_) | Frame::Data(_) | Frame::Eof | Frame::Err(_) => {
                Err(Error::InvalidRequest("expected GET".into()))
            }
        }
    }
}

/// 프레임 송신기
pub struct FrameWriter<W: AsyncWrite> {
    inner: BufWriter<W>,
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    pub fn new(inner: W) -> Self {
        Self {
            inner: BufWriter::new(inner),
        }
    }

    /// 헤더 기록 (flush 없음)
    pub async fn write_frame(&mut self, frame: &Frame) -> Result<()> {
        self.inner.write_all(&frame.to_bytes()).await?;
        Ok(())
    }

    /// 헤더 기록 후 flush
    pub async fn send(&mut self, frame: &Frame) -> Result<()> {
        self.write_frame(frame).await?;
        self.flush().await
    }

    /// `DATA <n>` + 페이로드 + flush
    pub async fn send_data(&mut self, payload: &[u8]) -> Result<()> {
        self.write_frame(&Frame::Data(payload.len() as u64)).await?;
        self.inner.write_all(payload).await?;
        self.flush().await
    }

    pub async fn flush(&mut self) -> Result<()> {
        self.inner.flush().await?;
        Ok(())
    }

    /// flush 후 쓰기 방향 종료
    pub async fn shutdown(&mut self) -> Result<()> {
        self.inner.shutdown().await?;
        Ok(())
    }
}
