//! 재시도 backoff
//!
//! 지수 증가 + 상한 + 지터, 선택적 최대 시도 횟수.

use std::time::Duration;

use rand::Rng;

/// 지터 비율 (±)
const JITTER_RATIO: f64 = 0.1;

/// 지수 backoff 상태 기계
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    current: Duration,

    /// 지금까지의 재시도 횟수
    attempts: u32,

    /// 최대 재시도 횟수 (None = 무제한)
    max_attempts: Option<u32>,

    jitter: bool,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max: max.max(initial),
            current: initial,
            attempts: 0,
            max_attempts: None,
            jitter: true,
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: Option<u32>) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// 지터 끄기 (테스트 등에서 결정적인 지연이 필요할 때)
    pub fn without_jitter(mut self) -> Self {
        self.jitter = false;
        self
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// 다음 대기 시간, 한도를 넘었으면 None
    pub fn next_delay(&mut self) -> Option<Duration> {
        if let Some(limit) = self.max_attempts {
            if self.attempts >= limit {
                return None;
            }
        }
        self.attempts += 1;

        let base = self.current;
        self.current = (self.current * 2).min(self.max);

        if !self.jitter || base.is_zero() {
            return Some(base);
        }
        let factor = rand::thread_rng().gen_range(1.0 - JITTER_RATIO..=1.0 + JITTER_RATIO);
        Some(base.mul_f64(factor).min(self.max))
    }

    /// 다음 대기 시간만큼 잠들기, 한도를 넘었으면 false
    pub async fn wait(&mut self) -> bool {
        match self.next_delay() {
            Some(delay) => {
                tokio::time::sleep(delay).await;
                true
            }
            None => false,
        }
    }

    /// 진행이 있었을 때 지연만 초기화 (시도 횟수는 유지)
    pub fn reset_delay(&mut self) {
        self.current = self.initial;
    }

    /// 완전 초기화
    pub fn reset(&mut self) {
        self.current = self.initial;
        self.attempts = 0;
    }
}
