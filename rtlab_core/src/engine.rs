//! The shared engine contract.
//!
//! Every simulator (scheduler, collector, sync primitives) is a pure step
//! function over an immutable state. The playback controller and timeline are
//! written once against this trait.

use crate::error::{SimError, SimResult};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::Serialize;
use std::fmt::Debug;

/// Golden-ratio multiplier used to spread step counters across seeds.
const STEP_MIX: u64 = 0x9e37_79b9_7f4a_7c15;

/// A deterministic simulator of one runtime subsystem.
///
/// `step` receives the prior state by reference and returns a new,
/// independent state plus the event describing the transition. It must not
/// keep hidden state between calls: replay from any recorded state with the
/// same action must yield the same result.
pub trait Engine: Send + Sync + 'static {
    /// Scenario parameters accepted by [`Engine::initial`].
    type Config: Clone + Debug + Send + Sync;
    /// Complete simulated state (one snapshot).
    type State: Clone + Debug + PartialEq + Serialize + Send + Sync;
    /// User or script intent applied on a step.
    type Action: Clone + Debug + PartialEq + Serialize + Send + Sync;
    /// Description of what a step changed.
    type Event: Clone + Debug + PartialEq + Serialize + Send + Sync;

    /// Short engine name used in logs and invariant reports.
    fn name(&self) -> &'static str;

    /// Validates the configuration and builds the state at index 0.
    fn initial(&self, config: &Self::Config) -> SimResult<Self::State>;

    /// Applies one transition. `None` means "advance on your own".
    fn step(
        &self,
        state: &Self::State,
        action: Option<&Self::Action>,
    ) -> SimResult<(Self::State, Self::Event)>;

    /// Derived "scenario complete" predicate used to auto-pause playback.
    fn is_complete(&self, state: &Self::State) -> bool;
}

/// Builds the RNG for one step of a seeded choice.
///
/// Mixing the step counter into the seed keeps every step reproducible on
/// its own, so a replay from the middle of a timeline draws the same values.
pub fn seeded_rng(seed: u64, step: u64) -> ChaCha8Rng {
    ChaCha8Rng::seed_from_u64(seed ^ step.wrapping_mul(STEP_MIX))
}

/// Reports a broken engine invariant.
///
/// With debug assertions this panics with the offending state attached;
/// otherwise the violation is returned as [`SimError::Invariant`].
pub(crate) fn invariant_violation<S: Serialize>(
    engine: &'static str,
    state: &S,
    message: impl Into<String>,
) -> SimError {
    let message = message.into();
    let snapshot = serde_json::to_string(state)
        .unwrap_or_else(|e| format!("<unserializable snapshot: {e}>"));

    if cfg!(debug_assertions) {
        panic!("{engine} invariant violated: {message}\nsnapshot: {snapshot}");
    }

    SimError::Invariant {
        engine,
        message,
        snapshot,
    }
}
