//! `ConnectionPolicy` — the Connection Manager's fixed-at-construction
//! timeouts and backoff function.

use std::time::Duration;

/// For attempt `n`: `n >= 8` uses a flat `8 + uniform(0,5)` seconds;
/// below that, `min(8.0, 0.2 + n^1.5 * 0.4)` seconds.
pub fn default_backoff(attempt: u32) -> Duration {
    if attempt >= 8 {
        let jitter: f64 = rand::random::<f64>() * 5.0;
        return Duration::from_secs_f64(8.0 + jitter);
    }
    let n = attempt as f64;
    let secs = (0.2 + n.powf(1.5) * 0.4).min(8.0);
    Duration::from_secs_f64(secs)
}

#[derive(Clone, Copy)]
pub struct ConnectionPolicy {
    pub connect_timeout: Duration,
    pub auth_timeout: Duration,
    pub ping_interval: Duration,
    pub ping_interval_high_latency: Duration,
    pub high_latency_threshold: Duration,
    pub ping_timeout: Duration,
    pub background_grace: Duration,
    pub backoff: fn(u32) -> Duration,
}

impl std::fmt::Debug for ConnectionPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionPolicy")
            .field("connect_timeout", &self.connect_timeout)
            .field("auth_timeout", &self.auth_timeout)
            .field("ping_interval", &self.ping_interval)
            .field("ping_interval_high_latency", &self.ping_interval_high_latency)
            .field("high_latency_threshold", &self.high_latency_threshold)
            .field("ping_timeout", &self.ping_timeout)
            .field("background_grace", &self.background_grace)
            .finish()
    }
}

impl Default for ConnectionPolicy {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(15),
            auth_timeout: Duration::from_secs(15),
            ping_interval: Duration::from_secs(10),
            ping_interval_high_latency: Duration::from_secs(25),
            high_latency_threshold: Duration::from_millis(2000),
            ping_timeout: Duration::from_secs(10),
            background_grace: Duration::from_secs(30),
            backoff: default_backoff,
        }
    }
}

impl ConnectionPolicy {
    /// Which ping interval applies given a recent average RTT.
    pub fn ping_interval_for(&self, avg_recent_latency: Duration) -> Duration {
        if avg_recent_latency > self.high_latency_threshold {
            self.ping_interval_high_latency
        } else {
            self.ping_interval
        }
    }
}
