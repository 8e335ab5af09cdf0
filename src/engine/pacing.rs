//! Minimum spacing between successive publishes.

use rand::Rng;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

pub struct PublishPacer {
    min_gap: Duration,
    jitter: Duration,
    last: Mutex<Option<Instant>>,
}

impl PublishPacer {
    pub fn new(min_gap: Duration, jitter: Duration) -> Self {
        Self {
            min_gap,
            jitter,
            last: Mutex::new(None),
        }
    }

    /// Wait until a publish may start, then claim the slot. Returns the
    /// instant the caller entered publishing.
    pub async fn wait_turn(&self) -> Instant {
        let mut last = self.last.lock().await;
        if let Some(prev) = *last {
            let extra = self.jitter_sample();
            let ready_at = prev + self.min_gap + extra;
            if ready_at > Instant::now() {
                tracing::debug!(wait_ms = (ready_at - Instant::now()).as_millis() as u64, "pacing publish");
                tokio::time::sleep_until(ready_at).await;
            }
        }
        let now = Instant::now();
        *last = Some(now);
        now
    }

    fn jitter_sample(&self) -> Duration {
        let max_ms = self.jitter.as_millis() as u64;
        if max_ms == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rand::thread_rng().gen_range(0..=max_ms))
    }
}
