//! The "SYNC" Engine - channels, mutexes, wait groups and select
//!
//! One world of tasks sharing a fixed set of primitives. Tasks act only
//! through scripted actions; the engine never runs a task on its own, so a
//! tick without an action is idle. Every blocking operation records what the
//! task is parked on, which is what the deadlock detector reads.

pub mod channel;
pub mod deadlock;
pub mod mutex;
pub mod select;
pub mod wait_group;

pub use channel::{Channel, ChannelEvent, RecvWaiter, SendWaiter};
pub use deadlock::{detect_deadlock, wait_for_graph, Deadlock};
pub use mutex::{Mutex, MutexEvent};
pub use select::{SelectCase, SelectEvent};
pub use wait_group::{WaitGroup, WaitGroupEvent};

use crate::engine::{invariant_violation, Engine};
use crate::error::{Misuse, SimError, SimResult};
use rtlab_env::{ChannelId, MutexId, TaskId, WaitGroupId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

// =============================================================================
// TASKS
// =============================================================================

/// What a blocked task is parked on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "kebab-case")]
pub enum BlockedOn {
    Send { channel: ChannelId },
    Recv { channel: ChannelId },
    Lock { mutex: MutexId },
    Wait { wait_group: WaitGroupId },
    /// Parked on every channel named by the select's cases.
    Select { channels: Vec<ChannelId> },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "kebab-case")]
pub enum FailureReason {
    /// The channel was closed while the task was parked sending on it.
    SendOnClosed { channel: ChannelId },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SyncTaskState {
    Ready,
    Blocked(BlockedOn),
    Done,
    Failed(FailureReason),
}

impl SyncTaskState {
    pub fn name(&self) -> &'static str {
        match self {
            SyncTaskState::Ready => "ready",
            SyncTaskState::Blocked(_) => "blocked",
            SyncTaskState::Done => "done",
            SyncTaskState::Failed(_) => "failed",
        }
    }

    /// Done or failed.
    pub fn is_finished(&self) -> bool {
        matches!(self, SyncTaskState::Done | SyncTaskState::Failed(_))
    }
}

/// Value observed by the most recent receive of a task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Delivery {
    pub channel: ChannelId,
    pub value: i64,
    /// false when the zero value came from a closed channel
    pub ok: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncTask {
    pub id: TaskId,
    pub state: SyncTaskState,
    pub last_delivery: Option<Delivery>,
    /// Case index chosen by the last select, if it completed
    pub selected_case: Option<usize>,
}

impl SyncTask {
    fn new(id: TaskId) -> Self {
        Self {
            id,
            state: SyncTaskState::Ready,
            last_delivery: None,
            selected_case: None,
        }
    }
}

// =============================================================================
// CONFIGURATION
// =============================================================================

/// Tie-break among several ready select cases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SelectPolicy {
    /// Uniform over the ready cases, ChaCha8 seeded by `seed ^ step`.
    UniformRandom(u64),
    /// Lowest ready case index.
    FirstReady,
}

impl fmt::Display for SelectPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SelectPolicy::UniformRandom(seed) => write!(f, "uniform-random:{seed}"),
            SelectPolicy::FirstReady => write!(f, "first-ready"),
        }
    }
}

impl FromStr for SelectPolicy {
    type Err = SimError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim().to_lowercase();
        if s == "first-ready" {
            return Ok(SelectPolicy::FirstReady);
        }
        match s.strip_prefix("uniform-random:").map(str::parse::<u64>) {
            Some(Ok(seed)) => Ok(SelectPolicy::UniformRandom(seed)),
            _ => Err(SimError::config(format!("unknown select policy: {s}"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Tasks alive at index 0
    pub task_count: usize,
    /// One channel per entry; 0 = unbuffered
    pub channel_capacities: Vec<usize>,
    pub mutex_count: usize,
    pub wait_group_count: usize,
    pub select_policy: SelectPolicy,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            task_count: 2,
            channel_capacities: Vec::new(),
            mutex_count: 0,
            wait_group_count: 0,
            select_policy: SelectPolicy::UniformRandom(0),
        }
    }
}

impl SyncConfig {
    fn validate(&self) -> SimResult<()> {
        if self.task_count == 0 {
            return Err(SimError::config("task_count must be at least 1"));
        }
        let too_large = |n: usize| u32::try_from(n).is_err();
        if too_large(self.task_count)
            || too_large(self.channel_capacities.len())
            || too_large(self.mutex_count)
            || too_large(self.wait_group_count)
        {
            return Err(SimError::config("too many sync entities"));
        }
        Ok(())
    }
}

// =============================================================================
// ACTIONS & EVENTS
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum SyncAction {
    Spawn,
    Send {
        task: TaskId,
        channel: ChannelId,
        value: i64,
    },
    Recv { task: TaskId, channel: ChannelId },
    Close { task: TaskId, channel: ChannelId },
    Lock { task: TaskId, mutex: MutexId },
    Unlock { task: TaskId, mutex: MutexId },
    /// Not tied to a task; models the coordinator adjusting the counter.
    WgAdd { wait_group: WaitGroupId, delta: i64 },
    WgDone { task: TaskId, wait_group: WaitGroupId },
    WgWait { task: TaskId, wait_group: WaitGroupId },
    Select {
        task: TaskId,
        cases: Vec<SelectCase>,
        default: bool,
    },
    Exit { task: TaskId },
}

impl SyncAction {
    /// Task performing the action, if any.
    pub fn actor(&self) -> Option<TaskId> {
        match self {
            SyncAction::Spawn | SyncAction::WgAdd { .. } => None,
            SyncAction::Send { task, .. }
            | SyncAction::Recv { task, .. }
            | SyncAction::Close { task, .. }
            | SyncAction::Lock { task, .. }
            | SyncAction::Unlock { task, .. }
            | SyncAction::WgDone { task, .. }
            | SyncAction::WgWait { task, .. }
            | SyncAction::Select { task, .. }
            | SyncAction::Exit { task } => Some(*task),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "primitive", rename_all = "kebab-case")]
pub enum SyncEvent {
    Idle,
    Spawn { task: TaskId },
    Exit { task: TaskId },
    Channel(ChannelEvent),
    Mutex(MutexEvent),
    WaitGroup(WaitGroupEvent),
    Select(SelectEvent),
}

impl SyncEvent {
    /// True when the acting task ended up parked.
    pub fn is_blocking(&self) -> bool {
        matches!(
            self,
            SyncEvent::Channel(ChannelEvent::SendBlocked { .. } | ChannelEvent::RecvBlocked { .. })
                | SyncEvent::Mutex(MutexEvent::LockBlocked { .. })
                | SyncEvent::WaitGroup(WaitGroupEvent::WaitBlocked { .. })
                | SyncEvent::Select(SelectEvent::Blocked { .. })
        )
    }
}

// =============================================================================
// STATE
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncState {
    pub config: SyncConfig,
    pub tasks: BTreeMap<TaskId, SyncTask>,
    pub channels: BTreeMap<ChannelId, Channel>,
    pub mutexes: BTreeMap<MutexId, Mutex>,
    pub wait_groups: BTreeMap<WaitGroupId, WaitGroup>,
    /// Transitions applied so far; seeds select tie-breaks
    pub step: u64,
    next_task: u32,
}

impl SyncState {
    fn new(config: &SyncConfig) -> Self {
        // validate() bounds every count by u32::MAX
        let tasks = (0..config.task_count as u32)
            .map(|i| (TaskId(i), SyncTask::new(TaskId(i))))
            .collect();
        let channels = config
            .channel_capacities
            .iter()
            .enumerate()
            .map(|(i, &cap)| {
                let id = ChannelId(i as u32);
                (id, Channel::new(id, cap))
            })
            .collect();
        let mutexes = (0..config.mutex_count as u32)
            .map(|i| (MutexId(i), Mutex::new(MutexId(i))))
            .collect();
        let wait_groups = (0..config.wait_group_count as u32)
            .map(|i| (WaitGroupId(i), WaitGroup::new(WaitGroupId(i))))
            .collect();

        Self {
            config: config.clone(),
            tasks,
            channels,
            mutexes,
            wait_groups,
            step: 0,
            next_task: config.task_count as u32,
        }
    }

    pub fn count_blocked(&self) -> usize {
        self.tasks
            .values()
            .filter(|t| matches!(t.state, SyncTaskState::Blocked(_)))
            .count()
    }

    fn require_ready(&self, id: TaskId) -> SimResult<()> {
        let task = self
            .tasks
            .get(&id)
            .ok_or(SimError::Misuse(Misuse::UnknownTask(id)))?;
        if task.state != SyncTaskState::Ready {
            return Err(Misuse::TaskState {
                task: id,
                expected: SyncTaskState::Ready.name(),
                actual: task.state.name(),
            }
            .into());
        }
        Ok(())
    }

    pub(super) fn block(&mut self, task: TaskId, on: BlockedOn) {
        if let Some(t) = self.tasks.get_mut(&task) {
            t.state = SyncTaskState::Blocked(on);
        }
    }

    /// Makes a parked task ready again. A select case index also pulls the
    /// task out of every other channel it was registered on.
    pub(super) fn wake(&mut self, task: TaskId, case: Option<usize>, delivery: Option<Delivery>) {
        if case.is_some() {
            self.unregister(task);
        }
        if let Some(t) = self.tasks.get_mut(&task) {
            t.state = SyncTaskState::Ready;
            t.selected_case = case;
            if delivery.is_some() {
                t.last_delivery = delivery;
            }
        }
    }

    fn apply(&mut self, action: &SyncAction) -> SimResult<SyncEvent> {
        if let Some(task) = action.actor() {
            self.require_ready(task)?;
            if let Some(t) = self.tasks.get_mut(&task) {
                t.last_delivery = None;
                t.selected_case = None;
            }
        }

        let event = match action {
            SyncAction::Spawn => {
                let id = TaskId(self.next_task);
                self.next_task += 1;
                self.tasks.insert(id, SyncTask::new(id));
                SyncEvent::Spawn { task: id }
            }
            SyncAction::Send {
                task,
                channel,
                value,
            } => SyncEvent::Channel(self.send(*task, *channel, *value)?),
            SyncAction::Recv { task, channel } => SyncEvent::Channel(self.recv(*task, *channel)?),
            SyncAction::Close { channel, .. } => SyncEvent::Channel(self.close(*channel)?),
            SyncAction::Lock { task, mutex } => SyncEvent::Mutex(self.lock(*task, *mutex)?),
            SyncAction::Unlock { task, mutex } => SyncEvent::Mutex(self.unlock(*task, *mutex)?),
            SyncAction::WgAdd { wait_group, delta } => {
                SyncEvent::WaitGroup(self.wg_add(*wait_group, *delta)?)
            }
            SyncAction::WgDone { wait_group, .. } => {
                SyncEvent::WaitGroup(self.wg_add(*wait_group, -1)?)
            }
            SyncAction::WgWait { task, wait_group } => {
                SyncEvent::WaitGroup(self.wg_wait(*task, *wait_group)?)
            }
            SyncAction::Select {
                task,
                cases,
                default,
            } => SyncEvent::Select(self.select(*task, cases, *default)?),
            SyncAction::Exit { task } => {
                if let Some(t) = self.tasks.get_mut(task) {
                    t.state = SyncTaskState::Done;
                }
                SyncEvent::Exit { task: *task }
            }
        };
        Ok(event)
    }

    /// Checks the structural invariants of the world.
    pub fn check_invariants(&self) -> Result<(), String> {
        for ch in self.channels.values() {
            if ch.buffer.len() > ch.capacity {
                return Err(format!(
                    "channel {} holds {} values over capacity {}",
                    ch.id,
                    ch.buffer.len(),
                    ch.capacity
                ));
            }
            // A single select may sit on both sides of one channel.
            let crossed = ch
                .senders
                .iter()
                .any(|s| ch.receivers.iter().any(|r| r.task != s.task));
            if crossed {
                return Err(format!("channel {} has both senders and receivers parked", ch.id));
            }
            if !ch.receivers.is_empty() && !ch.buffer.is_empty() {
                return Err(format!("channel {} has receivers parked on a non-empty buffer", ch.id));
            }
            let parked = ch.senders.iter().map(|w| w.task).chain(ch.receivers.iter().map(|w| w.task));
            for task in parked {
                match self.tasks.get(&task).map(|t| &t.state) {
                    Some(SyncTaskState::Blocked(
                        BlockedOn::Send { channel } | BlockedOn::Recv { channel },
                    )) if *channel == ch.id => {}
                    Some(SyncTaskState::Blocked(BlockedOn::Select { channels }))
                        if channels.contains(&ch.id) => {}
                    _ => return Err(format!("task {task} is queued on {} but not parked there", ch.id)),
                }
            }
        }

        for m in self.mutexes.values() {
            if !m.waiters.is_empty() && m.holder.is_none() {
                return Err(format!("mutex {} has waiters but no holder", m.id));
            }
            for task in &m.waiters {
                match self.tasks.get(task).map(|t| &t.state) {
                    Some(SyncTaskState::Blocked(BlockedOn::Lock { mutex })) if *mutex == m.id => {}
                    _ => return Err(format!("task {task} waits on {} but is not parked there", m.id)),
                }
            }
        }

        for wg in self.wait_groups.values() {
            if wg.counter < 0 {
                return Err(format!("wait group {} counter is {}", wg.id, wg.counter));
            }
            if wg.counter == 0 && !wg.waiters.is_empty() {
                return Err(format!("wait group {} is zero with waiters parked", wg.id));
            }
        }

        for task in self.tasks.values() {
            let registered = match &task.state {
                SyncTaskState::Blocked(BlockedOn::Send { channel }) => self
                    .channels
                    .get(channel)
                    .is_some_and(|c| c.senders.iter().any(|w| w.task == task.id)),
                SyncTaskState::Blocked(BlockedOn::Recv { channel }) => self
                    .channels
                    .get(channel)
                    .is_some_and(|c| c.receivers.iter().any(|w| w.task == task.id)),
                SyncTaskState::Blocked(BlockedOn::Lock { mutex }) => self
                    .mutexes
                    .get(mutex)
                    .is_some_and(|m| m.waiters.contains(&task.id)),
                SyncTaskState::Blocked(BlockedOn::Wait { wait_group }) => self
                    .wait_groups
                    .get(wait_group)
                    .is_some_and(|w| w.waiters.contains(&task.id)),
                SyncTaskState::Blocked(BlockedOn::Select { channels }) => channels.iter().all(|c| {
                    self.channels.get(c).is_some_and(|ch| {
                        ch.senders.iter().any(|w| w.task == task.id)
                            || ch.receivers.iter().any(|w| w.task == task.id)
                    })
                }),
                _ => true,
            };
            if !registered {
                return Err(format!("task {} is blocked but not queued anywhere", task.id));
            }
        }
        Ok(())
    }
}

// =============================================================================
// ENGINE
// =============================================================================

/// Channel / mutex / wait group / select simulator.
#[derive(Debug, Clone, Copy, Default)]
pub struct SyncEngine;

impl Engine for SyncEngine {
    type Config = SyncConfig;
    type State = SyncState;
    type Action = SyncAction;
    type Event = SyncEvent;

    fn name(&self) -> &'static str {
        "sync"
    }

    fn initial(&self, config: &SyncConfig) -> SimResult<SyncState> {
        config.validate()?;
        Ok(SyncState::new(config))
    }

    fn step(&self, state: &SyncState, action: Option<&SyncAction>) -> SimResult<(SyncState, SyncEvent)> {
        let mut next = state.clone();
        let event = match action {
            Some(action) => next.apply(action)?,
            None => SyncEvent::Idle,
        };
        next.step += 1;

        if let Err(message) = next.check_invariants() {
            return Err(invariant_violation(self.name(), &next, message));
        }
        Ok((next, event))
    }

    fn is_complete(&self, state: &SyncState) -> bool {
        state.tasks.values().all(|t| t.state.is_finished()) || detect_deadlock(state).is_some()
    }
}
