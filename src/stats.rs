//! 전송 통계

use std::time::{Duration, Instant};

/// 하나의 논리 다운로드(또는 릴레이) 통계
#[derive(Debug, Clone)]
pub struct TransferStats {
    /// 시작 시간
    pub start_time: Instant,

    /// 시작 시점의 재개 오프셋
    pub resumed_from: u64,

    /// 이번 실행에서 받은(또는 중계한) 바이트
    pub bytes_transferred: u64,

    /// DATA 프레임 수
    pub data_frames: u64,

    /// 세션(연결) 수
    pub sessions: u64,

    /// 전송 실패 후 재시도 수
    pub retries: u64,
}

impl TransferStats {
    pub fn new(resumed_from: u64) -> Self {
        Self {
            start_time: Instant::now(),
            resumed_from,
            bytes_transferred: 0,
            data_frames: 0,
            sessions: 0,
            retries: 0,
        }
    }

    /// DATA 프레임 기록
    pub fn record_data(&mut self, len: u64) {
        self.data_frames += 1;
        self.bytes_transferred += len;
    }

    /// 새 세션 시작 기록
    pub fn record_session(&mut self) {
        self.sessions += 1;
    }

    /// 재시도 기록
    pub fn record_retry(&mut self) {
        self.retries += 1;
    }

    /// 현재 오프셋 (재개 지점 + 이번 실행 바이트)
    pub fn offset(&self) -> u64 {
        self.resumed_from + self.bytes_transferred
    }

    /// 경과 시간
    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// 처리율 (bytes/sec)
    pub fn throughput(&self) -> f64 {
        let elapsed = self.elapsed().as_secs_f64();
        if elapsed == 0.0 {
            return 0.0;
        }
        self.bytes_transferred as f64 / elapsed
    }

    /// 통계 요약 문자열
    pub fn summary(&self) -> String {
        format!(
            "Elapsed: {:.2}s | Offset: {} (resumed from {}) | Bytes: {} | Frames: {} | Sessions: {} | Retries: {} | Throughput: {:.2} MB/s",
            self.elapsed().as_secs_f64(),
            self.offset(),
            self.resumed_from,
            self.bytes_transferred,
            self.data_frames,
            self.sessions,
            self.retries,
            self.throughput() / 1_000_000.0,
        )
    }
}

impl Default for TransferStats {
    fn default() -> Self {
        Self::new(0)
    }
}
