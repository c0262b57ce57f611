//! Core clock trait used to drive auto-play.

use async_trait::async_trait;
use std::future::Future;
use std::time::Duration;

/// Multiplier used to mix a master seed with a per-purpose extension.
pub(crate) const SEED_MIX: u64 = 0x517c_c1b7_2722_0a95;

/// The central interface between playback and time.
///
/// This trait abstracts the "real world" so that the playback controller can
/// run under a real timer (tokio) or a virtual clock (scenario harness).
///
/// # Implementations
///
/// - **Production**: `TokioClock` - wraps `tokio::time`, OS entropy
/// - **Simulation**: `SimClock` (in `rtlab_sim`) - virtual time, `ChaCha8Rng(seed)`
///
/// # Determinism
///
/// Methods that would normally introduce non-determinism (time, randomness)
/// are controlled by the implementation.
#[async_trait]
pub trait PlaybackClock: Send + Sync + 'static {
    /// Returns the current monotonic time since the clock was created.
    ///
    /// In simulation, this is the virtual clock time.
    fn now(&self) -> Duration;

    /// Suspends the caller for the given duration.
    ///
    /// In production: wraps `tokio::time::sleep`
    /// In simulation: advances virtual time and yields
    async fn sleep(&self, duration: Duration);

    /// Spawns a background task (the auto-play timer loop).
    fn spawn<F>(&self, name: &str, future: F)
    where
        F: Future<Output = ()> + Send + 'static;

    /// Derives a seed for one consumer (victim order, select tie-breaks).
    ///
    /// Simulation combines the master seed with `seed_extension` so that
    /// every consumer gets a unique but reproducible seed.
    fn derive_seed(&self, seed_extension: u64) -> u64;

    /// Returns the clock's master seed (0 when not seeded).
    fn seed(&self) -> u64;
}

/// Mixes a master seed with an extension the same way every seeded clock does.
pub fn mix_seed(seed: u64, seed_extension: u64) -> u64 {
    seed.wrapping_mul(SEED_MIX) ^ seed_extension
}
