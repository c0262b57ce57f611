//! rtlab Deterministic Scenario Harness
//!
//! This crate runs the rtlab simulators through canned teaching scenarios
//! and checks that every recorded step is explainable.
//!
//! # Core Principle: Same Seed, Same Timeline
//!
//! All sources of non-determinism are pinned down:
//! - **Time**: [`SimClock`] advances only when playback sleeps
//! - **Randomness**: Victim orders and select tie-breaks derive from one seed
//! - **Scheduling**: Engines are pure functions of (state, action)
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      ScenarioRunner                         │
//! │  ┌──────────────────────────────────────────────────────┐   │
//! │  │ PlaybackController (Timeline + script cursor)        │   │
//! │  └──────────────────────────────────────────────────────┘   │
//! │       │                        │                            │
//! │  ┌────▼──────┐          ┌──────▼─────┐                      │
//! │  │  Engine   │  step    │  Snapshot  │     ...              │
//! │  │ sched/gc/ │─────────►│  N + 1     │                      │
//! │  │   sync    │          └──────┬─────┘                      │
//! │  └───────────┘                 │                            │
//! │                          ┌─────▼──────────────────────┐     │
//! │                          │          Oracle            │     │
//! │                          │ (step checks + metrics)    │     │
//! │                          └────────────────────────────┘     │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use rtlab_sim::{ScenarioRunner, ScenarioId};
//!
//! let result = ScenarioRunner::new(42).run(ScenarioId::MutexDeadlock);
//! assert!(result.passed);
//! assert!(result.deadlock.is_some());
//! ```

mod context;
mod exporter;
mod oracle;
mod runner;
pub mod scenarios;

pub use context::SimClock;
pub use exporter::{frames, TimelineExport};
pub use oracle::Oracle;
pub use runner::{ScenarioMetrics, ScenarioResult, ScenarioRunner};
pub use scenarios::{ScenarioId, Subsystem};
