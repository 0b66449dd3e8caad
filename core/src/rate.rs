use std::collections::VecDeque;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::{sleep, Instant};
use tracing::debug;

/// Sliding-window admission control: at most `limit` requests per `period`.
/// Callers over budget wait for the oldest request to leave the window.
#[derive(Debug)]
pub struct RequestWindow {
    limit: Option<u32>,
    period: Duration,
    stamps: Mutex<VecDeque<Instant>>,
}

impl RequestWindow {
    pub fn new(limit: Option<u32>, period: Duration) -> Self {
        Self {
            limit,
            period,
            stamps: Mutex::new(VecDeque::new()),
        }
    }

    pub fn per_minute(limit: Option<u32>) -> Self {
        Self::new(limit, Duration::from_secs(60))
    }

    pub fn unlimited() -> Self {
        Self::new(None, Duration::from_secs(60))
    }

    pub async fn acquire(&self) {
        let Some(limit) = self.limit else {
            return;
        };

        loop {
            let wait = {
                let mut stamps = self.stamps.lock().await;
                let now = Instant::now();
                while stamps
                    .front()
                    .is_some_and(|oldest| now.duration_since(*oldest) >= self.period)
                {
                    stamps.pop_front();
                }
                if stamps.len() < limit as usize {
                    stamps.push_back(now);
                    return;
                }
                match stamps.front() {
                    Some(oldest) => self.period.saturating_sub(now.duration_since(*oldest)),
                    None => Duration::ZERO,
                }
            };
            debug!(wait_ms = wait.as_millis() as u64, limit, "request window full, waiting");
            sleep(wait).await;
        }
    }
}
