//! rtlab Environment Abstraction Layer
//!
//! This crate keeps the simulation engines independent of wall-clock time so
//! that the same playback code runs in **Production** (tokio timers driving a
//! widget) and **Simulation** (a virtual clock in the scenario harness).
//!
//! # Core Concept
//!
//! Everything that would make auto-play non-reproducible is routed through
//! [`PlaybackClock`]:
//! - Time (`now()`, `sleep()`)
//! - Background work (`spawn()`)
//! - Randomness (`derive_seed()`)
//!
//! By deriving all entropy from a single 64-bit seed, any teaching scenario
//! becomes reproducible from its seed number.
//!
//! # Example
//!
//! ```ignore
//! use rtlab_env::PlaybackClock;
//!
//! async fn autoplay<C: PlaybackClock>(clock: &C) {
//!     loop {
//!         clock.sleep(Duration::from_millis(250)).await;
//!         tick();
//!     }
//! }
//! ```

mod context;
mod tokio_impl;
mod types;

pub use context::{mix_seed, PlaybackClock};
pub use tokio_impl::TokioClock;
pub use types::{ChannelId, MutexId, ObjectId, TaskId, WaitGroupId, WorkerId};
