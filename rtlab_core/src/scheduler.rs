//! The "SCHEDULER" Engine - work-stealing run queues
//!
//! Models a pool of workers, each with a local run queue, plus one global
//! queue. On every tick the next available worker (round-robin) looks for
//! work in this order:
//! 1. the head of its own local queue
//! 2. a batch stolen from a victim's local queue
//! 3. the head of the global queue
//!
//! Victim order is the only place where a choice is made; it is either a
//! fixed rotation or a ChaCha8 shuffle seeded from the configuration and the
//! tick counter, so every run is reproducible.

use crate::engine::{invariant_violation, seeded_rng, Engine};
use crate::error::{Misuse, SimError, SimResult};
use rand::seq::SliceRandom;
use rtlab_env::{TaskId, WorkerId};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::fmt;
use std::str::FromStr;

// =============================================================================
// ENTITIES
// =============================================================================

/// Lifecycle of a simulated worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WorkerState {
    Idle,
    Running,
    /// Just took a batch from a victim; runs it on its next turn.
    Stealing,
    /// Parked in a simulated system call together with its task.
    Blocked,
}

impl WorkerState {
    pub fn name(self) -> &'static str {
        match self {
            WorkerState::Idle => "idle",
            WorkerState::Running => "running",
            WorkerState::Stealing => "stealing",
            WorkerState::Blocked => "blocked",
        }
    }

    /// Whether the round-robin pick may choose this worker.
    fn is_available(self) -> bool {
        matches!(self, WorkerState::Idle | WorkerState::Stealing)
    }
}

/// Lifecycle of a simulated task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TaskState {
    Runnable,
    Running,
    Waiting,
    Done,
}

impl TaskState {
    pub fn name(self) -> &'static str {
        match self {
            TaskState::Runnable => "runnable",
            TaskState::Running => "running",
            TaskState::Waiting => "waiting",
            TaskState::Done => "done",
        }
    }
}

/// Names a run queue: the global one or a worker's local one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "worker", rename_all = "kebab-case")]
pub enum QueueId {
    Global,
    Local(WorkerId),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Worker {
    pub id: WorkerId,
    pub state: WorkerState,
    pub current_task: Option<TaskId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub state: TaskState,
    /// Queue currently holding the task (`None` unless runnable).
    pub owner_queue: Option<QueueId>,
}

/// An ordered run queue. `owner == None` is the global queue.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Queue {
    pub owner: Option<WorkerId>,
    pub tasks: VecDeque<TaskId>,
}

impl Queue {
    fn local(owner: WorkerId) -> Self {
        Self {
            owner: Some(owner),
            tasks: VecDeque::new(),
        }
    }

    pub fn id(&self) -> QueueId {
        match self.owner {
            Some(worker) => QueueId::Local(worker),
            None => QueueId::Global,
        }
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

// =============================================================================
// CONFIGURATION
// =============================================================================

/// How many tasks a thief takes from its victim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StealPolicy {
    /// Half of the victim's queue, rounded down, at least one.
    Half,
    /// Up to a fixed number of tasks.
    Fixed(usize),
}

impl StealPolicy {
    /// Batch size for a victim queue of `len` tasks (`len > 0`).
    pub fn batch(self, len: usize) -> usize {
        match self {
            StealPolicy::Half => (len / 2).max(1),
            StealPolicy::Fixed(n) => n.min(len),
        }
    }
}

impl fmt::Display for StealPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StealPolicy::Half => write!(f, "half"),
            StealPolicy::Fixed(n) => write!(f, "fixed:{n}"),
        }
    }
}

impl FromStr for StealPolicy {
    type Err = SimError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim().to_lowercase();
        if s == "half" {
            return Ok(StealPolicy::Half);
        }
        match s.strip_prefix("fixed:").map(str::parse::<usize>) {
            Some(Ok(n)) => Ok(StealPolicy::Fixed(n)),
            _ => Err(SimError::config(format!("unknown steal policy: {s}"))),
        }
    }
}

/// Order in which a thief probes the other workers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum VictimOrder {
    /// `thief + 1, thief + 2, ...` wrapping around the pool.
    RoundRobin,
    /// A ChaCha8 shuffle of the other workers, reseeded every tick.
    SeededRandom(u64),
}

impl fmt::Display for VictimOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VictimOrder::RoundRobin => write!(f, "round-robin"),
            VictimOrder::SeededRandom(seed) => write!(f, "seeded-random:{seed}"),
        }
    }
}

impl FromStr for VictimOrder {
    type Err = SimError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim().to_lowercase();
        if s == "round-robin" || s == "roundrobin" {
            return Ok(VictimOrder::RoundRobin);
        }
        match s.strip_prefix("seeded-random:").map(str::parse::<u64>) {
            Some(Ok(seed)) => Ok(VictimOrder::SeededRandom(seed)),
            _ => Err(SimError::config(format!("unknown victim order: {s}"))),
        }
    }
}

/// Scheduler scenario parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Size of the worker pool (fixed for the whole run)
    pub worker_count: usize,

    /// Steal batch size policy
    pub steal_policy: StealPolicy,

    /// Victim probing order
    pub victim_order: VictimOrder,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            worker_count: 4,
            steal_policy: StealPolicy::Half,
            victim_order: VictimOrder::RoundRobin,
        }
    }
}

impl SchedulerConfig {
    fn validate(&self) -> SimResult<()> {
        if self.worker_count == 0 {
            return Err(SimError::config("worker_count must be at least 1"));
        }
        if u32::try_from(self.worker_count).is_err() {
            return Err(SimError::config("worker_count is too large"));
        }
        if self.steal_policy == StealPolicy::Fixed(0) {
            return Err(SimError::config("fixed steal batch must be at least 1"));
        }
        Ok(())
    }
}

// =============================================================================
// ACTIONS / EVENTS
// =============================================================================

/// Scenario or user intent injected into the scheduler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum SchedulerAction {
    /// New task at the tail of `target`'s local queue, or the global queue.
    Spawn { target: Option<WorkerId> },
    /// The running task finishes.
    Complete { task: TaskId },
    /// The running task yields back to its worker's local queue.
    Yield { task: TaskId },
    /// The running task parks (e.g. on a channel); its worker goes idle.
    Block { task: TaskId },
    /// A waiting task becomes runnable on the global queue.
    Wake { task: TaskId },
    /// The running task enters a system call, taking its worker with it.
    EnterSyscall { task: TaskId },
    /// A worker returns from its system call.
    ExitSyscall { worker: WorkerId },
}

/// What a scheduler step did.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum SchedulerEvent {
    Spawn { task: TaskId, queue: QueueId },
    DequeueLocal { worker: WorkerId, task: TaskId },
    DequeueGlobal { worker: WorkerId, task: TaskId },
    Steal {
        thief: WorkerId,
        victim: WorkerId,
        count: usize,
        tasks: Vec<TaskId>,
    },
    IdleSpin { worker: WorkerId },
    NoIdleWorker,
    Complete { worker: WorkerId, task: TaskId },
    Preempt { worker: WorkerId, task: TaskId },
    Block { worker: WorkerId, task: TaskId },
    Wake { task: TaskId },
    EnterSyscall { worker: WorkerId, task: TaskId },
    ExitSyscall { worker: WorkerId, task: TaskId },
}

// =============================================================================
// STATE
// =============================================================================

/// One scheduler snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchedulerState {
    pub config: SchedulerConfig,
    pub workers: Vec<Worker>,
    /// Local queue of worker `i` at index `i`
    pub local_queues: Vec<Queue>,
    pub global_queue: Queue,
    pub tasks: BTreeMap<TaskId, Task>,
    /// Round-robin position of the next worker to consider
    pub cursor: usize,
    /// Number of state-changing steps taken so far
    pub tick: u64,
    next_task: u32,
}

impl SchedulerState {
    fn new(config: &SchedulerConfig) -> Self {
        let workers = (0..config.worker_count as u32)
            .map(|i| Worker {
                id: WorkerId(i),
                state: WorkerState::Idle,
                current_task: None,
            })
            .collect();
        let local_queues = (0..config.worker_count as u32)
            .map(|i| Queue::local(WorkerId(i)))
            .collect();

        Self {
            config: config.clone(),
            workers,
            local_queues,
            global_queue: Queue::default(),
            tasks: BTreeMap::new(),
            cursor: 0,
            tick: 0,
            next_task: 0,
        }
    }

    /// Returns a queue by id.
    pub fn queue(&self, id: QueueId) -> Option<&Queue> {
        match id {
            QueueId::Global => Some(&self.global_queue),
            QueueId::Local(worker) => self.local_queues.get(worker.index()),
        }
    }

    fn queue_mut(&mut self, id: QueueId) -> &mut Queue {
        match id {
            QueueId::Global => &mut self.global_queue,
            QueueId::Local(worker) => &mut self.local_queues[worker.index()],
        }
    }

    /// All queues, locals first.
    pub fn queues(&self) -> impl Iterator<Item = &Queue> {
        self.local_queues.iter().chain(std::iter::once(&self.global_queue))
    }

    /// Number of tasks in a given state.
    pub fn count(&self, state: TaskState) -> usize {
        self.tasks.values().filter(|t| t.state == state).count()
    }

    /// Total tasks ever spawned.
    pub fn spawned(&self) -> usize {
        self.tasks.len()
    }

    fn task(&self, id: TaskId) -> SimResult<&Task> {
        self.tasks.get(&id).ok_or(SimError::Misuse(Misuse::UnknownTask(id)))
    }

    fn expect_task_state(&self, id: TaskId, expected: TaskState) -> SimResult<()> {
        let task = self.task(id)?;
        if task.state != expected {
            return Err(Misuse::TaskState {
                task: id,
                expected: expected.name(),
                actual: task.state.name(),
            }
            .into());
        }
        Ok(())
    }

    /// Index of the worker executing `task`, which must be running on a
    /// running (not syscall-blocked) worker.
    fn running_worker(&self, task: TaskId) -> SimResult<usize> {
        self.expect_task_state(task, TaskState::Running)?;
        let index = self
            .workers
            .iter()
            .position(|w| w.current_task == Some(task))
            .ok_or(SimError::Misuse(Misuse::UnknownTask(task)))?;
        let worker = &self.workers[index];
        if worker.state != WorkerState::Running {
            return Err(Misuse::WorkerState {
                worker: worker.id,
                expected: WorkerState::Running.name(),
                actual: worker.state.name(),
            }
            .into());
        }
        Ok(index)
    }

    fn enqueue(&mut self, task: TaskId, queue: QueueId) {
        self.queue_mut(queue).tasks.push_back(task);
        if let Some(t) = self.tasks.get_mut(&task) {
            t.state = TaskState::Runnable;
            t.owner_queue = Some(queue);
        }
    }

    fn run(&mut self, worker: usize, task: TaskId) {
        let w = &mut self.workers[worker];
        w.state = WorkerState::Running;
        w.current_task = Some(task);
        if let Some(t) = self.tasks.get_mut(&task) {
            t.state = TaskState::Running;
            t.owner_queue = None;
        }
    }

    fn release(&mut self, worker: usize) {
        let w = &mut self.workers[worker];
        w.state = WorkerState::Idle;
        w.current_task = None;
    }

    fn set_task_state(&mut self, task: TaskId, state: TaskState) {
        if let Some(t) = self.tasks.get_mut(&task) {
            t.state = state;
            t.owner_queue = None;
        }
    }

    /// Victims in probing order for `thief` at the current tick.
    pub fn victim_order(&self, thief: usize) -> Vec<usize> {
        let n = self.workers.len();
        let mut others: Vec<usize> = (1..n).map(|offset| (thief + offset) % n).collect();
        if let VictimOrder::SeededRandom(seed) = self.config.victim_order {
            let mut rng = seeded_rng(seed, self.tick);
            others.shuffle(&mut rng);
        }
        others
    }

    // -------------------------------------------------------------------------
    // Tick
    // -------------------------------------------------------------------------

    fn advance(&mut self) -> SchedulerEvent {
        let n = self.workers.len();
        let Some(index) = (0..n)
            .map(|offset| (self.cursor + offset) % n)
            .find(|&i| self.workers[i].state.is_available())
        else {
            return SchedulerEvent::NoIdleWorker;
        };
        let worker = self.workers[index].id;

        if let Some(task) = self.local_queues[index].tasks.pop_front() {
            self.run(index, task);
            self.finish_turn(index);
            return SchedulerEvent::DequeueLocal { worker, task };
        }

        if let Some((victim, tasks)) = self.steal_into(index) {
            self.workers[index].state = WorkerState::Stealing;
            self.finish_turn(index);
            return SchedulerEvent::Steal {
                thief: worker,
                victim,
                count: tasks.len(),
                tasks,
            };
        }

        if let Some(task) = self.global_queue.tasks.pop_front() {
            self.run(index, task);
            self.finish_turn(index);
            return SchedulerEvent::DequeueGlobal { worker, task };
        }

        // Nothing anywhere: only a stale "stealing" label is cleared.
        self.workers[index].state = WorkerState::Idle;
        SchedulerEvent::IdleSpin { worker }
    }

    fn finish_turn(&mut self, index: usize) {
        self.cursor = (index + 1) % self.workers.len();
        self.tick += 1;
    }

    /// Moves a batch from the first non-empty victim into `thief`'s queue.
    fn steal_into(&mut self, thief: usize) -> Option<(WorkerId, Vec<TaskId>)> {
        let victim = self
            .victim_order(thief)
            .into_iter()
            .find(|&v| !self.local_queues[v].is_empty())?;

        let count = self.config.steal_policy.batch(self.local_queues[victim].len());
        let stolen: Vec<TaskId> = self.local_queues[victim].tasks.drain(..count).collect();
        let thief_queue = QueueId::Local(self.workers[thief].id);
        for &task in &stolen {
            self.enqueue(task, thief_queue);
        }
        Some((self.workers[victim].id, stolen))
    }

    // -------------------------------------------------------------------------
    // Actions
    // -------------------------------------------------------------------------

    fn apply(&mut self, action: &SchedulerAction) -> SimResult<SchedulerEvent> {
        let event = match *action {
            SchedulerAction::Spawn { target } => {
                let queue = match target {
                    Some(worker) if worker.index() < self.workers.len() => QueueId::Local(worker),
                    Some(worker) => return Err(Misuse::UnknownWorker(worker).into()),
                    None => QueueId::Global,
                };
                let task = TaskId(self.next_task);
                self.next_task += 1;
                self.tasks.insert(
                    task,
                    Task {
                        id: task,
                        state: TaskState::Runnable,
                        owner_queue: None,
                    },
                );
                self.enqueue(task, queue);
                SchedulerEvent::Spawn { task, queue }
            }
            SchedulerAction::Complete { task } => {
                let index = self.running_worker(task)?;
                self.set_task_state(task, TaskState::Done);
                self.release(index);
                SchedulerEvent::Complete {
                    worker: self.workers[index].id,
                    task,
                }
            }
            SchedulerAction::Yield { task } => {
                let index = self.running_worker(task)?;
                let worker = self.workers[index].id;
                self.release(index);
                self.enqueue(task, QueueId::Local(worker));
                SchedulerEvent::Preempt { worker, task }
            }
            SchedulerAction::Block { task } => {
                let index = self.running_worker(task)?;
                self.set_task_state(task, TaskState::Waiting);
                self.release(index);
                SchedulerEvent::Block {
                    worker: self.workers[index].id,
                    task,
                }
            }
            SchedulerAction::Wake { task } => {
                self.expect_task_state(task, TaskState::Waiting)?;
                self.enqueue(task, QueueId::Global);
                SchedulerEvent::Wake { task }
            }
            SchedulerAction::EnterSyscall { task } => {
                let index = self.running_worker(task)?;
                self.workers[index].state = WorkerState::Blocked;
                SchedulerEvent::EnterSyscall {
                    worker: self.workers[index].id,
                    task,
                }
            }
            SchedulerAction::ExitSyscall { worker } => {
                let w = self
                    .workers
                    .get_mut(worker.index())
                    .ok_or(SimError::Misuse(Misuse::UnknownWorker(worker)))?;
                let task = match (w.state, w.current_task) {
                    (WorkerState::Blocked, Some(task)) => task,
                    _ => {
                        return Err(Misuse::WorkerState {
                            worker,
                            expected: WorkerState::Blocked.name(),
                            actual: w.state.name(),
                        }
                        .into())
                    }
                };
                w.state = WorkerState::Running;
                SchedulerEvent::ExitSyscall { worker, task }
            }
        };
        self.tick += 1;
        Ok(event)
    }

    // -------------------------------------------------------------------------
    // Invariants
    // -------------------------------------------------------------------------

    /// Checks queue uniqueness, queue/state consistency and conservation.
    pub fn check_invariants(&self) -> Result<(), String> {
        let mut queued = BTreeSet::new();
        for queue in self.queues() {
            for &id in &queue.tasks {
                if !queued.insert(id) {
                    return Err(format!("task {id} appears in more than one queue slot"));
                }
                let task = self
                    .tasks
                    .get(&id)
                    .ok_or_else(|| format!("queue holds unknown task {id}"))?;
                if task.state != TaskState::Runnable || task.owner_queue != Some(queue.id()) {
                    return Err(format!(
                        "task {id} is queued but {} with owner {:?}",
                        task.state.name(),
                        task.owner_queue
                    ));
                }
            }
        }

        let mut running = BTreeSet::new();
        for worker in &self.workers {
            match (worker.state, worker.current_task) {
                (WorkerState::Running | WorkerState::Blocked, Some(id)) => {
                    if !running.insert(id) {
                        return Err(format!("task {id} runs on two workers"));
                    }
                }
                (WorkerState::Idle | WorkerState::Stealing, None) => {}
                (state, current) => {
                    return Err(format!(
                        "worker {} is {} with current task {:?}",
                        worker.id,
                        state.name(),
                        current
                    ))
                }
            }
        }

        for task in self.tasks.values() {
            let consistent = match task.state {
                TaskState::Runnable => queued.contains(&task.id),
                TaskState::Running => running.contains(&task.id),
                TaskState::Waiting | TaskState::Done => {
                    !queued.contains(&task.id) && !running.contains(&task.id)
                }
            };
            if !consistent {
                return Err(format!(
                    "task {} is {} but not placed accordingly",
                    task.id,
                    task.state.name()
                ));
            }
        }

        Ok(())
    }
}

// =============================================================================
// ENGINE
// =============================================================================

/// Work-stealing scheduler engine.
#[derive(Debug, Clone, Copy, Default)]
pub struct SchedulerEngine;

impl Engine for SchedulerEngine {
    type Config = SchedulerConfig;
    type State = SchedulerState;
    type Action = SchedulerAction;
    type Event = SchedulerEvent;

    fn name(&self) -> &'static str {
        "scheduler"
    }

    fn initial(&self, config: &SchedulerConfig) -> SimResult<SchedulerState> {
        config.validate()?;
        Ok(SchedulerState::new(config))
    }

    fn step(
        &self,
        state: &SchedulerState,
        action: Option<&SchedulerAction>,
    ) -> SimResult<(SchedulerState, SchedulerEvent)> {
        let mut next = state.clone();
        let event = match action {
            Some(action) => next.apply(action)?,
            None => next.advance(),
        };

        if let Err(message) = next.check_invariants() {
            return Err(invariant_violation(self.name(), &next, message));
        }
        Ok((next, event))
    }

    fn is_complete(&self, state: &SchedulerState) -> bool {
        state.tasks.values().all(|t| t.state == TaskState::Done)
            && state.queues().all(Queue::is_empty)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine_with(workers: usize) -> (SchedulerEngine, SchedulerState) {
        let engine = SchedulerEngine;
        let config = SchedulerConfig {
            worker_count: workers,
            ..Default::default()
        };
        let state = engine.initial(&config).unwrap();
        (engine, state)
    }

    fn apply(engine: &SchedulerEngine, state: SchedulerState, action: SchedulerAction) -> SchedulerState {
        engine.step(&state, Some(&action)).unwrap().0
    }

    fn spawn_on(engine: &SchedulerEngine, mut state: SchedulerState, worker: u32, n: usize) -> SchedulerState {
        for _ in 0..n {
            state = apply(engine, state, SchedulerAction::Spawn { target: Some(WorkerId(worker)) });
        }
        state
    }

    #[test]
    fn test_config_rejects_zero_workers() {
        let config = SchedulerConfig {
            worker_count: 0,
            ..Default::default()
        };
        assert!(matches!(SchedulerEngine.initial(&config), Err(SimError::Config(_))));
    }

    #[test]
    fn test_config_rejects_empty_fixed_batch() {
        let config = SchedulerConfig {
            steal_policy: StealPolicy::Fixed(0),
            ..Default::default()
        };
        assert!(SchedulerEngine.initial(&config).is_err());
    }

    #[test]
    fn test_policy_parsing() {
        assert_eq!("half".parse::<StealPolicy>().unwrap(), StealPolicy::Half);
        assert_eq!("fixed:3".parse::<StealPolicy>().unwrap(), StealPolicy::Fixed(3));
        assert!("fixed:x".parse::<StealPolicy>().is_err());
        assert_eq!("round-robin".parse::<VictimOrder>().unwrap(), VictimOrder::RoundRobin);
        assert_eq!(
            "seeded-random:42".parse::<VictimOrder>().unwrap(),
            VictimOrder::SeededRandom(42)
        );
        assert_eq!(VictimOrder::SeededRandom(7).to_string(), "seeded-random:7");
    }

    #[test]
    fn test_half_batch_rounds_down_with_minimum_one() {
        assert_eq!(StealPolicy::Half.batch(1), 1);
        assert_eq!(StealPolicy::Half.batch(5), 2);
        assert_eq!(StealPolicy::Half.batch(8), 4);
        assert_eq!(StealPolicy::Fixed(3).batch(2), 2);
    }

    #[test]
    fn test_dequeue_local_runs_head() {
        let (engine, state) = engine_with(2);
        let state = spawn_on(&engine, state, 0, 2);

        let (next, event) = engine.step(&state, None).unwrap();
        assert_eq!(
            event,
            SchedulerEvent::DequeueLocal {
                worker: WorkerId(0),
                task: TaskId(0)
            }
        );
        assert_eq!(next.workers[0].state, WorkerState::Running);
        assert_eq!(next.tasks[&TaskId(0)].state, TaskState::Running);
        assert_eq!(next.local_queues[0].tasks, VecDeque::from([TaskId(1)]));
        assert_eq!(next.cursor, 1);
    }

    #[test]
    fn test_idle_worker_steals_half_from_victim() {
        let (engine, state) = engine_with(2);
        let state = spawn_on(&engine, state, 0, 5);
        // W0 takes T0 and keeps four queued.
        let (state, _) = engine.step(&state, None).unwrap();
        assert_eq!(state.local_queues[0].len(), 4);

        let (next, event) = engine.step(&state, None).unwrap();
        assert_eq!(
            event,
            SchedulerEvent::Steal {
                thief: WorkerId(1),
                victim: WorkerId(0),
                count: 2,
                tasks: vec![TaskId(1), TaskId(2)],
            }
        );
        assert_eq!(next.local_queues[0].len(), 2);
        assert_eq!(next.local_queues[1].len(), 2);
        assert_eq!(next.workers[1].state, WorkerState::Stealing);
        assert_eq!(
            next.tasks[&TaskId(1)].owner_queue,
            Some(QueueId::Local(WorkerId(1)))
        );

        // The thief runs its stolen work on its next turn (W0 is busy).
        let (next, event) = engine.step(&next, None).unwrap();
        assert_eq!(
            event,
            SchedulerEvent::DequeueLocal {
                worker: WorkerId(1),
                task: TaskId(1)
            }
        );
        assert_eq!(next.workers[1].state, WorkerState::Running);
    }

    #[test]
    fn test_fixed_policy_limits_batch() {
        let engine = SchedulerEngine;
        let config = SchedulerConfig {
            worker_count: 2,
            steal_policy: StealPolicy::Fixed(1),
            ..Default::default()
        };
        let state = engine.initial(&config).unwrap();
        let state = spawn_on(&engine, state, 1, 4);
        let (_, event) = engine.step(&state, None).unwrap();
        assert!(matches!(event, SchedulerEvent::Steal { count: 1, .. }));
    }

    #[test]
    fn test_seeded_victim_order_is_reproducible() {
        let engine = SchedulerEngine;
        let config = SchedulerConfig {
            worker_count: 6,
            victim_order: VictimOrder::SeededRandom(99),
            ..Default::default()
        };
        let state = engine.initial(&config).unwrap();
        let order = state.victim_order(0);
        assert_eq!(order, state.clone().victim_order(0));

        let mut sorted = order.clone();
        sorted.sort_unstable();
        assert_eq!(sorted, vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_global_queue_used_when_no_victim_has_work() {
        let (engine, state) = engine_with(2);
        let state = apply(&engine, state, SchedulerAction::Spawn { target: None });
        let (next, event) = engine.step(&state, None).unwrap();
        assert_eq!(
            event,
            SchedulerEvent::DequeueGlobal {
                worker: WorkerId(0),
                task: TaskId(0)
            }
        );
        assert!(next.global_queue.is_empty());
    }

    #[test]
    fn test_idle_spin_leaves_state_unchanged() {
        let (engine, state) = engine_with(3);
        let (next, event) = engine.step(&state, None).unwrap();
        assert_eq!(event, SchedulerEvent::IdleSpin { worker: WorkerId(0) });
        assert_eq!(next, state);
    }

    #[test]
    fn test_no_idle_worker_when_all_busy() {
        let (engine, state) = engine_with(1);
        let state = spawn_on(&engine, state, 0, 1);
        let (state, _) = engine.step(&state, None).unwrap();
        let (_, event) = engine.step(&state, None).unwrap();
        assert_eq!(event, SchedulerEvent::NoIdleWorker);
    }

    #[test]
    fn test_yield_requeues_at_tail_of_local_queue() {
        let (engine, state) = engine_with(1);
        let state = spawn_on(&engine, state, 0, 2);
        let (state, _) = engine.step(&state, None).unwrap();

        let (next, event) = engine
            .step(&state, Some(&SchedulerAction::Yield { task: TaskId(0) }))
            .unwrap();
        assert_eq!(
            event,
            SchedulerEvent::Preempt {
                worker: WorkerId(0),
                task: TaskId(0)
            }
        );
        assert_eq!(next.local_queues[0].tasks, VecDeque::from([TaskId(1), TaskId(0)]));
        assert_eq!(next.workers[0].state, WorkerState::Idle);
    }

    #[test]
    fn test_complete_and_scenario_completion() {
        let (engine, state) = engine_with(1);
        let state = spawn_on(&engine, state, 0, 1);
        assert!(!engine.is_complete(&state));
        let (state, _) = engine.step(&state, None).unwrap();
        let state = apply(&engine, state, SchedulerAction::Complete { task: TaskId(0) });
        assert_eq!(state.tasks[&TaskId(0)].state, TaskState::Done);
        assert!(engine.is_complete(&state));
    }

    #[test]
    fn test_block_and_wake_route_through_global_queue() {
        let (engine, state) = engine_with(1);
        let state = spawn_on(&engine, state, 0, 1);
        let (state, _) = engine.step(&state, None).unwrap();
        let state = apply(&engine, state, SchedulerAction::Block { task: TaskId(0) });
        assert_eq!(state.tasks[&TaskId(0)].state, TaskState::Waiting);
        assert_eq!(state.workers[0].state, WorkerState::Idle);

        let state = apply(&engine, state, SchedulerAction::Wake { task: TaskId(0) });
        assert_eq!(state.global_queue.tasks, VecDeque::from([TaskId(0)]));
    }

    #[test]
    fn test_syscall_blocks_worker_until_exit() {
        let (engine, state) = engine_with(2);
        let state = spawn_on(&engine, state, 0, 1);
        let (state, _) = engine.step(&state, None).unwrap();
        let state = apply(&engine, state, SchedulerAction::EnterSyscall { task: TaskId(0) });
        assert_eq!(state.workers[0].state, WorkerState::Blocked);

        let err = engine
            .step(&state, Some(&SchedulerAction::Complete { task: TaskId(0) }))
            .unwrap_err();
        assert!(err.is_misuse());

        let state = apply(&engine, state, SchedulerAction::ExitSyscall { worker: WorkerId(0) });
        assert_eq!(state.workers[0].state, WorkerState::Running);
    }

    #[test]
    fn test_misuse_on_non_running_task() {
        let (engine, state) = engine_with(1);
        let state = spawn_on(&engine, state, 0, 1);
        let err = engine
            .step(&state, Some(&SchedulerAction::Complete { task: TaskId(0) }))
            .unwrap_err();
        assert_eq!(
            err,
            SimError::Misuse(Misuse::TaskState {
                task: TaskId(0),
                expected: "running",
                actual: "runnable"
            })
        );
        assert!(engine
            .step(&state, Some(&SchedulerAction::Spawn { target: Some(WorkerId(9)) }))
            .is_err());
    }
}
