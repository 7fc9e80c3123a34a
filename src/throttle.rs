//! 연결별 대역폭 제한
//!
//! 1초 윈도우 안에서 보낸 바이트를 세다가 예산에 도달하면
//! 윈도우의 남은 시간만큼 잠든 뒤 카운터를 리셋한다.
//! 엄격한 토큰 버킷이 아니라 최대 1초 버스트를 허용하는 평균 속도 제한.

use std::time::Duration;

use tokio::time::Instant;

/// 윈도우 길이
pub const THROTTLE_WINDOW: Duration = Duration::from_secs(1);

/// 평균 속도 제한기
#[derive(Debug)]
pub struct Throttle {
    /// 목표 속도 (bytes/sec), 0이면 제한 없음
    rate: u64,

    /// 현재 윈도우 시작 시각
    window_start: Instant,

    /// 현재 윈도우에서 보낸 바이트
    sent: u64,
}

impl Throttle {
    pub fn new(rate: u64) -> Self {
        Self {
            rate,
            window_start: Instant::now(),
            sent: 0,
        }
    }

    /// 제한 없음
    pub fn unlimited() -> Self {
        Self::new(0)
    }

    pub fn is_limited(&self) -> bool {
        self.rate > 0
    }

    pub fn rate(&self) -> u64 {
        self.rate
    }

    /// `n` 바이트 전송 기록, 예산을 넘으면 윈도우 끝까지 대기
    ///
    /// 대기는 호출한 태스크만 멈춘다.
    pub async fn consume(&mut self, n: usize) {
        if self.rate == 0 {
            return;
        }

        let elapsed = self.window_start.elapsed();
        if elapsed >= THROTTLE_WINDOW {
            self.reset();
        }

        self.sent += n as u64;
        if self.sent >= self.rate {
            let remaining = THROTTLE_WINDOW.saturating_sub(self.window_start.elapsed());
            if !remaining.is_zero() {
                tokio::time::sleep(remaining).await;
            }
            self.reset();
        }
    }

    fn reset(&mut self) {
        self.window_start = Instant::now();
        self.sent = 0;
    }
}
