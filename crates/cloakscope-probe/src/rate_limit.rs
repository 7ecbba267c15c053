use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// Per-host pacing for outbound probes.
///
/// Each key gets a reserved slot at least `min_delay` after the previous one,
/// so the spacing holds whether callers run sequentially or concurrently.
#[derive(Debug)]
pub struct RateLimiter {
    next_slot: Mutex<HashMap<String, Instant>>,
    min_delay: Duration,
}

impl RateLimiter {
    #[must_use]
    pub fn new(min_delay_ms: u64) -> Self {
        Self {
            next_slot: Mutex::new(HashMap::new()),
            min_delay: Duration::from_millis(min_delay_ms),
        }
    }

    #[must_use]
    pub fn min_delay(&self) -> Duration {
        self.min_delay
    }

    /// Wait until a request to `key` is allowed, then claim the slot.
    pub async fn until_ready(&self, key: &str) {
        let ready_at = {
            let mut slots = self.next_slot.lock().await;
            let now = Instant::now();
            let ready_at = match slots.get(key) {
                Some(slot) if *slot > now => *slot,
                _ => now,
            };
            slots.insert(key.to_string(), ready_at + self.min_delay);
            ready_at
        };

        if ready_at > Instant::now() {
            tracing::trace!("Pacing request to {} for {:?}", key, ready_at - Instant::now());
            tokio::time::sleep_until(ready_at).await;
        }
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(750)
    }
}
