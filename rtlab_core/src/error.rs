//! Error types for the rtlab engines.
//!
//! Three kinds of failure exist:
//! - **Misuse**: the requested action is invalid in the current state
//! - **Config**: scenario parameters rejected before any snapshot exists
//! - **Invariant**: the simulator itself is wrong

use rtlab_env::{ChannelId, MutexId, ObjectId, TaskId, WaitGroupId, WorkerId};
use thiserror::Error;

/// Invalid actions for the current simulated state.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Misuse {
    /// A step or action was requested before `reset(config)`.
    #[error("engine is not initialized")]
    NotInitialized,

    /// `back()` at index 0.
    #[error("already at the start of the timeline")]
    AtTimelineStart,

    /// `jump_to` past the recorded history.
    #[error("timeline index {index} out of range (length {len})")]
    IndexOutOfRange { index: usize, len: usize },

    #[error("unknown task {0}")]
    UnknownTask(TaskId),

    #[error("unknown worker {0}")]
    UnknownWorker(WorkerId),

    #[error("unknown object {0}")]
    UnknownObject(ObjectId),

    #[error("unknown channel {0}")]
    UnknownChannel(ChannelId),

    #[error("unknown mutex {0}")]
    UnknownMutex(MutexId),

    #[error("unknown wait group {0}")]
    UnknownWaitGroup(WaitGroupId),

    /// The task is not in the state the action requires.
    #[error("task {task} is {actual}, expected {expected}")]
    TaskState {
        task: TaskId,
        expected: &'static str,
        actual: &'static str,
    },

    /// The worker is not in the state the action requires.
    #[error("worker {worker} is {actual}, expected {expected}")]
    WorkerState {
        worker: WorkerId,
        expected: &'static str,
        actual: &'static str,
    },

    #[error("send on closed channel {channel} by {task}")]
    SendOnClosed { channel: ChannelId, task: TaskId },

    #[error("close of closed channel {0}")]
    CloseOfClosed(ChannelId),

    #[error("unlock of {mutex} by {task}, which does not hold it")]
    UnlockNotHeld { mutex: MutexId, task: TaskId },

    #[error("negative counter on wait group {0}")]
    NegativeWaitGroup(WaitGroupId),

    #[error("counter overflow on wait group {0}")]
    WaitGroupOverflow(WaitGroupId),

    #[error("select with no cases and no default")]
    EmptySelect,

    /// The mutator cannot reach an object the collector has condemned.
    #[error("object {0} is unreachable and awaiting sweep")]
    UnreachableObject(ObjectId),

    #[error("a collection cycle is already in progress")]
    GcInProgress,

    #[error("allocation size must be positive")]
    ZeroSizedAllocation,

    #[error("allocating {size_bytes} bytes overflows the heap total")]
    HeapOverflow { size_bytes: u64 },
}

/// Errors surfaced by engines, the timeline and the playback controller.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SimError {
    /// Invalid action; fatal to the action, never to the timeline.
    #[error("misuse: {0}")]
    Misuse(#[from] Misuse),

    /// Invalid scenario parameters, rejected by `initial()`.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Engine bug. Carries the offending state as JSON.
    #[error("{engine} invariant violated: {message}")]
    Invariant {
        engine: &'static str,
        message: String,
        snapshot: String,
    },
}

impl SimError {
    /// Creates a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Returns true for errors the learner caused.
    pub fn is_misuse(&self) -> bool {
        matches!(self, Self::Misuse(_))
    }
}

/// Result alias used across the engines.
pub type SimResult<T> = Result<T, SimError>;
