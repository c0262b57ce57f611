//! Production implementation of PlaybackClock using Tokio.

use crate::PlaybackClock;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Production clock backed by Tokio timers and OS entropy.
///
/// This is the clock a widget host uses: auto-play waits on real time and
/// unseeded choices come from the thread RNG.
pub struct TokioClock {
    /// Start time for monotonic duration calculations
    start: Instant,
}

impl TokioClock {
    /// Creates a new TokioClock.
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Creates an Arc-wrapped clock for sharing across tasks.
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }
}

impl Default for TokioClock {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PlaybackClock for TokioClock {
    fn now(&self) -> Duration {
        self.start.elapsed()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }

    fn spawn<F>(&self, _name: &str, future: F)
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        tokio::spawn(future);
    }

    fn derive_seed(&self, _seed_extension: u64) -> u64 {
        // Production is not seeded
        rand::random()
    }

    fn seed(&self) -> u64 {
        0
    }
}
