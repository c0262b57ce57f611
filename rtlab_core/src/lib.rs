//! rtlab Core - deterministic runtime simulators for teaching
//!
//! Three step engines model the parts of a language runtime that are hard to
//! see from the outside:
//! 1. **Scheduler**: per-worker run queues, a global queue and work stealing
//! 2. **Collector**: tricolor mark and sweep with a write barrier and pacing
//! 3. **Sync**: channels, mutexes, wait groups, select and deadlock detection
//!
//! Every engine is a pure function from (state, action) to (state, event).
//! The [`Timeline`] records each result and the [`PlaybackController`]
//! moves through it, so any moment of a run can be revisited exactly.

pub mod collector;
pub mod engine;
pub mod error;
pub mod playback;
pub mod scheduler;
pub mod sync;
pub mod timeline;

// Re-export key types for convenience
pub use collector::{CollectorAction, CollectorConfig, CollectorEngine, CollectorEvent, CollectorState};
pub use engine::{seeded_rng, Engine};
pub use error::{Misuse, SimError, SimResult};
pub use playback::{PlaybackController, PlaybackState, Player, ScriptStep};
pub use scheduler::{SchedulerAction, SchedulerConfig, SchedulerEngine, SchedulerEvent, SchedulerState};
pub use sync::{detect_deadlock, Deadlock, SyncAction, SyncConfig, SyncEngine, SyncEvent, SyncState};
pub use timeline::{EngineSnapshot, EngineTimeline, Snapshot, Timeline};
