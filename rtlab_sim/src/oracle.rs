//! Step oracle for scenario runs.
//!
//! The Oracle watches every transition of a run from the outside:
//! - Properties that must hold between two consecutive snapshots
//! - Counters summarising what happened (steals, cycles, blocked ops)
//!
//! Engines already check their own structural invariants; the oracle checks
//! the relations between a snapshot and the one before it.

use crate::runner::ScenarioMetrics;
use rtlab_core::collector::{Color, CollectorEvent, CollectorState, GcPhase};
use rtlab_core::scheduler::{SchedulerEvent, SchedulerState, TaskState};
use rtlab_core::sync::{ChannelEvent, SelectEvent, SyncEvent, SyncState};
use rtlab_core::{
    detect_deadlock, CollectorEngine, Deadlock, EngineSnapshot, SchedulerEngine, SyncEngine,
};
use rtlab_env::ObjectId;
use std::collections::BTreeSet;

/// Checks step properties and accumulates metrics.
#[derive(Debug, Default)]
pub struct Oracle {
    metrics: ScenarioMetrics,
    deadlock: Option<Deadlock>,
}

impl Oracle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn metrics(&self) -> &ScenarioMetrics {
        &self.metrics
    }

    /// First deadlock observed during the run.
    pub fn deadlock(&self) -> Option<&Deadlock> {
        self.deadlock.as_ref()
    }

    pub fn into_parts(self) -> (ScenarioMetrics, Option<Deadlock>) {
        (self.metrics, self.deadlock)
    }

    // -------------------------------------------------------------------------
    // Scheduler
    // -------------------------------------------------------------------------

    pub fn observe_scheduler(
        &mut self,
        prev: &SchedulerState,
        next: &EngineSnapshot<SchedulerEngine>,
    ) -> Result<(), String> {
        self.metrics.steps += 1;
        check_conservation(&next.state)?;

        match &next.event {
            Some(SchedulerEvent::Steal {
                thief,
                victim,
                count,
                tasks,
            }) => {
                let before_thief = prev.local_queues[thief.index()].len();
                let before_victim = &prev.local_queues[victim.index()];
                let after_thief = next.state.local_queues[thief.index()].len();
                let after_victim = next.state.local_queues[victim.index()].len();

                if before_thief != 0 {
                    return Err(format!("{thief} stole with {before_thief} tasks of its own"));
                }
                if *count == 0 || *count != tasks.len() {
                    return Err(format!("steal reported {count} tasks but moved {}", tasks.len()));
                }
                if *count != prev.config.steal_policy.batch(before_victim.len()) {
                    return Err(format!(
                        "steal of {count} from a queue of {} ignores the {} policy",
                        before_victim.len(),
                        prev.config.steal_policy
                    ));
                }
                if after_victim + count != before_victim.len() || after_thief != *count {
                    return Err(format!(
                        "steal does not balance: victim {} -> {after_victim}, thief 0 -> {after_thief}",
                        before_victim.len()
                    ));
                }
                if let Some(task) = tasks.iter().find(|t| !before_victim.tasks.contains(t)) {
                    return Err(format!("{task} was stolen from {victim} but never queued there"));
                }
                self.metrics.steals += 1;
                self.metrics.tasks_stolen += *count as u64;
            }
            Some(SchedulerEvent::Preempt { .. }) => self.metrics.preemptions += 1,
            Some(SchedulerEvent::EnterSyscall { .. }) => self.metrics.syscalls += 1,
            Some(SchedulerEvent::Complete { .. }) => self.metrics.tasks_completed += 1,
            Some(SchedulerEvent::Spawn { .. }) if next.state.spawned() != prev.spawned() + 1 => {
                return Err("spawn did not add exactly one task".to_string());
            }
            _ => {}
        }
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Collector
    // -------------------------------------------------------------------------

    pub fn observe_collector(
        &mut self,
        prev: &CollectorState,
        next: &EngineSnapshot<CollectorEngine>,
    ) -> Result<(), String> {
        self.metrics.steps += 1;
        let state = &next.state;

        if state.phase != GcPhase::Idle {
            if let Some((from, to)) = state.tricolor_violation() {
                return Err(format!("tricolor invariant broken: {from} (black) -> {to} (white)"));
            }
        }

        let live = reachable(state);
        if let Some(object) = state
            .objects
            .values()
            .find(|o| o.reachable_from_root != live.contains(&o.id))
        {
            return Err(format!(
                "{} reports reachable_from_root = {} but the root walk disagrees",
                object.id, object.reachable_from_root
            ));
        }

        match &next.event {
            Some(CollectorEvent::SweepObject { object, .. }) => {
                if reachable(prev).contains(object) {
                    return Err(format!("swept {object}, which was still reachable"));
                }
            }
            Some(CollectorEvent::GcCycleComplete(summary)) => {
                if !state.grey.is_empty() || state.count(Color::White) != state.objects.len() {
                    return Err("cycle finished with non-white survivors".to_string());
                }
                self.metrics.gc_cycles += 1;
                self.metrics.objects_freed += summary.objects_freed as u64;
                self.metrics.bytes_reclaimed =
                    self.metrics.bytes_reclaimed.saturating_add(summary.bytes_reclaimed);
            }
            Some(CollectorEvent::RefAdded {
                shaded: Some(_), ..
            }) => self.metrics.barrier_shades += 1,
            Some(CollectorEvent::Allocate {
                triggered_gc: true,
                ..
            }) => self.metrics.pacing_triggers += 1,
            _ => {}
        }
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Sync
    // -------------------------------------------------------------------------

    pub fn observe_sync(
        &mut self,
        prev: &SyncState,
        next: &EngineSnapshot<SyncEngine>,
    ) -> Result<(), String> {
        self.metrics.steps += 1;

        if let Some(event) = &next.event {
            if event.is_blocking() {
                self.metrics.blocked_ops += 1;
            }
            let received = match event {
                SyncEvent::Channel(outcome) => Some(outcome),
                SyncEvent::Select(SelectEvent::Chosen { outcome, .. }) => Some(outcome),
                _ => None,
            };
            if let Some(ChannelEvent::Received { channel, value, .. }) = received {
                let ch = prev
                    .channels
                    .get(channel)
                    .ok_or_else(|| format!("receive on unknown channel {channel}"))?;
                let sent = ch.buffer.front() == Some(value)
                    || (ch.buffer.is_empty() && ch.senders.front().map(|s| s.value) == Some(*value));
                if !sent {
                    return Err(format!("{channel} delivered {value}, which was not next in line"));
                }
            }
        }

        if self.deadlock.is_none() {
            if let Some(deadlock) = detect_deadlock(&next.state) {
                self.metrics.deadlocks += 1;
                self.deadlock = Some(deadlock);
            }
        }
        Ok(())
    }
}

/// Every spawned task is in exactly one place.
fn check_conservation(state: &SchedulerState) -> Result<(), String> {
    let by_state: usize = [
        TaskState::Runnable,
        TaskState::Running,
        TaskState::Waiting,
        TaskState::Done,
    ]
    .into_iter()
    .map(|s| state.count(s))
    .sum();
    if by_state != state.spawned() {
        return Err(format!("{} tasks spawned but {by_state} accounted for", state.spawned()));
    }

    let queued: usize = state.queues().map(|q| q.len()).sum();
    if queued != state.count(TaskState::Runnable) {
        return Err(format!(
            "{queued} queued tasks but {} runnable",
            state.count(TaskState::Runnable)
        ));
    }

    let on_workers = state.workers.iter().filter(|w| w.current_task.is_some()).count();
    if on_workers != state.count(TaskState::Running) {
        return Err(format!(
            "{on_workers} workers busy but {} tasks running",
            state.count(TaskState::Running)
        ));
    }
    Ok(())
}

/// Objects reachable from the roots.
fn reachable(state: &CollectorState) -> BTreeSet<ObjectId> {
    let mut seen: BTreeSet<ObjectId> = BTreeSet::new();
    let mut stack: Vec<ObjectId> = state.roots().map(|o| o.id).collect();
    while let Some(id) = stack.pop() {
        if !seen.insert(id) {
            continue;
        }
        if let Some(object) = state.objects.get(&id) {
            stack.extend(object.refs.iter().copied());
        }
    }
    seen
}


#[cfg(test)]
mod property_tests {
    use super::*;
    use proptest::prelude::*;
    use rtlab_core::collector::CollectorAction;
    use rtlab_core::scheduler::{SchedulerAction, SchedulerConfig, StealPolicy};
    use rtlab_core::{CollectorConfig, Engine, SimError, Snapshot};
    use rtlab_env::{TaskId, WorkerId};

    const WORKERS: u32 = 3;

    fn scheduler_action(kind: u8, arg: u32) -> Option<SchedulerAction> {
        let task = TaskId(arg);
        match kind {
            0 => None,
            1 => Some(SchedulerAction::Spawn {
                target: (arg % 4 != 3).then_some(WorkerId(arg % WORKERS)),
            }),
            2 => Some(SchedulerAction::Complete { task }),
            3 => Some(SchedulerAction::Yield { task }),
            4 => Some(SchedulerAction::Block { task }),
            5 => Some(SchedulerAction::Wake { task }),
            6 => Some(SchedulerAction::EnterSyscall { task }),
            _ => Some(SchedulerAction::ExitSyscall {
                worker: WorkerId(arg % WORKERS),
            }),
        }
    }

    fn collector_action(kind: u8, a: u32, b: u32) -> Option<CollectorAction> {
        match kind {
            0 => None,
            1 => Some(CollectorAction::Allocate {
                size_bytes: 8 + u64::from(a) * 16,
                root: a % 3 == 0,
                referenced_by: (b % 2 == 0).then_some(ObjectId(b)),
            }),
            2 => Some(CollectorAction::AddRef {
                from: ObjectId(a),
                to: ObjectId(b),
            }),
            3 => Some(CollectorAction::RemoveRef {
                from: ObjectId(a),
                to: ObjectId(b),
            }),
            4 => Some(CollectorAction::AddRoot { object: ObjectId(a) }),
            5 => Some(CollectorAction::RemoveRoot { object: ObjectId(a) }),
            _ => Some(CollectorAction::TriggerGc),
        }
    }

    /// Steps `engine` through `actions`, skipping rejected ones, and hands
    /// every accepted transition to `observe`.
    fn drive<E: Engine>(
        engine: &E,
        mut state: E::State,
        actions: Vec<Option<E::Action>>,
        mut observe: impl FnMut(&E::State, &Snapshot<E::State, E::Action, E::Event>) -> Result<(), String>,
    ) -> Result<(), TestCaseError> {
        for (index, action) in actions.into_iter().enumerate() {
            match engine.step(&state, action.as_ref()) {
                Ok((next, event)) => {
                    let snapshot = Snapshot {
                        index: index + 1,
                        state: next,
                        event: Some(event),
                        action,
                        script_cursor: 0,
                    };
                    observe(&state, &snapshot).map_err(TestCaseError::fail)?;
                    state = snapshot.state;
                }
                Err(SimError::Misuse(_)) => {}
                Err(other) => return Err(TestCaseError::fail(other.to_string())),
            }
        }
        Ok(())
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        /// Any mix of spawns, ticks and task transitions keeps every task
        /// accounted for exactly once.
        #[test]
        fn scheduler_conserves_tasks(
            ops in prop::collection::vec((0u8..8, 0u32..12), 0..120),
            halve in any::<bool>(),
        ) {
            let engine = SchedulerEngine;
            let state = engine
                .initial(&SchedulerConfig {
                    worker_count: WORKERS as usize,
                    steal_policy: if halve { StealPolicy::Half } else { StealPolicy::Fixed(2) },
                    ..Default::default()
                })
                .map_err(|e| TestCaseError::fail(e.to_string()))?;
            let actions = ops.into_iter().map(|(k, a)| scheduler_action(k, a)).collect();

            let mut oracle = Oracle::new();
            drive(&engine, state, actions, |prev, next| oracle.observe_scheduler(prev, next))?;
        }

        /// Mutator activity interleaved with collection never frees a live
        /// object or leaves a black → white edge behind.
        #[test]
        fn collector_never_frees_live_objects(
            ops in prop::collection::vec((0u8..7, 0u32..12, 0u32..12), 0..160),
        ) {
            let engine = CollectorEngine;
            let state = engine
                .initial(&CollectorConfig::default())
                .map_err(|e| TestCaseError::fail(e.to_string()))?;
            let actions = ops.into_iter().map(|(k, a, b)| collector_action(k, a, b)).collect();

            let mut oracle = Oracle::new();
            drive(&engine, state, actions, |prev, next| oracle.observe_collector(prev, next))?;
        }
    }
}
