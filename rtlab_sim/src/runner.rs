//! Scenario runner - executes the canned teaching scenarios.
//!
//! Each scenario builds a [`PlaybackController`] for one engine, loads a
//! script, and then keeps stepping (with an optional policy choosing
//! actions once the script runs out) until the controller reports the run
//! finished. The [`Oracle`] checks every transition along the way.

use crate::context::SimClock;
use crate::exporter::{self, TimelineExport};
use crate::oracle::Oracle;
use crate::scenarios::ScenarioId;

use rtlab_core::collector::{CollectorAction, CollectorConfig, CollectorState, GcPhase};
use rtlab_core::scheduler::{
    SchedulerAction, SchedulerConfig, SchedulerState, StealPolicy, VictimOrder, WorkerState,
};
use rtlab_core::sync::{
    ChannelEvent, MutexEvent, SelectCase, SelectEvent, SelectPolicy, SyncAction, SyncConfig,
    SyncEvent, SyncTaskState,
};
use rtlab_core::{
    CollectorEngine, Deadlock, Engine, EngineSnapshot, Misuse, PlaybackController,
    SchedulerEngine, ScriptStep, SimError, SyncEngine,
};
use rtlab_env::{ChannelId, MutexId, ObjectId, PlaybackClock, TaskId, WaitGroupId, WorkerId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::{debug, info, warn};

/// Results from running a scenario.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioResult {
    /// Scenario that was run
    pub scenario: ScenarioId,

    /// Seed used
    pub seed: u64,

    /// Whether scenario passed all assertions
    pub passed: bool,

    /// Engine steps executed
    pub total_steps: usize,

    /// Failure message if any
    pub failure_reason: Option<String>,

    /// Metrics collected during run
    pub metrics: ScenarioMetrics,

    /// Deadlock reported by the detector, if any
    pub deadlock: Option<Deadlock>,
}

/// Metrics collected during scenario execution.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScenarioMetrics {
    /// Transitions checked by the oracle
    pub steps: u64,

    // Scheduler
    pub steals: u64,
    pub tasks_stolen: u64,
    pub preemptions: u64,
    pub syscalls: u64,
    pub tasks_completed: u64,

    // Collector
    pub gc_cycles: u64,
    pub objects_freed: u64,
    pub bytes_reclaimed: u64,
    pub barrier_shades: u64,
    pub pacing_triggers: u64,

    // Sync
    pub blocked_ops: u64,
    pub deadlocks: u64,

    /// Invalid actions rejected without touching the timeline
    pub misuse_rejected: u64,
}

/// What one scenario function produced.
struct Outcome {
    total_steps: usize,
    failure: Option<String>,
    metrics: ScenarioMetrics,
    deadlock: Option<Deadlock>,
    frames: Vec<serde_json::Value>,
}

/// Runs teaching scenarios.
pub struct ScenarioRunner {
    /// Master seed
    seed: u64,

    /// Step budget per scenario
    max_steps: usize,

    clock: SimClock,
}

impl ScenarioRunner {
    /// Creates a new scenario runner.
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            max_steps: 10_000,
            clock: SimClock::new(seed),
        }
    }

    /// Sets the per-scenario step budget.
    pub fn with_max_steps(mut self, max_steps: usize) -> Self {
        self.max_steps = max_steps;
        self
    }

    /// Runs a scenario and returns the result.
    pub fn run(&self, scenario: ScenarioId) -> ScenarioResult {
        self.run_with_export(scenario).0
    }

    /// Runs a scenario and also returns its full timeline.
    pub fn run_with_export(&self, scenario: ScenarioId) -> (ScenarioResult, TimelineExport) {
        info!("Starting scenario: {} (seed={})", scenario.name(), self.seed);

        let outcome = match scenario {
            ScenarioId::WorkStealing => self.run_work_stealing(),
            ScenarioId::StealStorm => self.run_steal_storm(),
            ScenarioId::Preemption => self.run_preemption(),
            ScenarioId::SyscallHandoff => self.run_syscall_handoff(),
            ScenarioId::GcCycle => self.run_gc_cycle(),
            ScenarioId::GcPacing => self.run_gc_pacing(),
            ScenarioId::WriteBarrier => self.run_write_barrier(),
            ScenarioId::BufferedChannel => self.run_buffered_channel(),
            ScenarioId::UnbufferedHandoff => self.run_unbuffered_handoff(),
            ScenarioId::ClosedChannel => self.run_closed_channel(),
            ScenarioId::MutexFairness => self.run_mutex_fairness(),
            ScenarioId::MutexDeadlock => self.run_mutex_deadlock(),
            ScenarioId::WaitGroup => self.run_wait_group(),
            ScenarioId::SelectFanIn => self.run_select_fan_in(),
            ScenarioId::Pipeline => self.run_pipeline(),
        };

        if let Some(deadlock) = &outcome.deadlock {
            warn!(
                "{}: deadlock detected, stuck={:?} cycle={:?}",
                scenario.name(),
                deadlock.stuck,
                deadlock.cycle
            );
        }

        let result = ScenarioResult {
            scenario,
            seed: self.seed,
            passed: outcome.failure.is_none(),
            total_steps: outcome.total_steps,
            failure_reason: outcome.failure,
            metrics: outcome.metrics,
            deadlock: outcome.deadlock,
        };
        let export = TimelineExport::new(&result, outcome.frames);
        (result, export)
    }

    // -------------------------------------------------------------------------
    // Driver
    // -------------------------------------------------------------------------

    /// Steps `controller` until the run is finished.
    ///
    /// While scripted steps remain they are taken in order; after that
    /// `policy` may inject an action, and `None` lets the engine tick.
    fn drive<E: Engine>(
        &self,
        controller: &mut PlaybackController<E>,
        mut policy: impl FnMut(&E::State) -> Option<E::Action>,
        mut observe: impl FnMut(&E::State, &EngineSnapshot<E>) -> Result<(), String>,
    ) -> Result<usize, String> {
        let engine = controller.engine().name();
        let mut steps = 0;
        while !controller.is_finished() {
            if steps >= self.max_steps {
                return Err(format!("not finished after {} steps", self.max_steps));
            }
            let prev = controller.current().map_err(|e| e.to_string())?.state.clone();
            let scripted = controller
                .timeline()
                .tip()
                .is_some_and(|tip| tip.script_cursor < controller.script().len());

            let stepped = if scripted {
                controller.step()
            } else {
                match policy(&prev) {
                    Some(action) => controller.apply(action),
                    None => controller.step(),
                }
            };
            let snapshot = stepped.map_err(|e| format!("step {}: {e}", steps + 1))?;
            debug!("  [{}] index={} event={:?}", engine, snapshot.index, snapshot.event);
            observe(&prev, snapshot)?;
            steps += 1;
        }
        Ok(steps)
    }

    /// Resets a controller for `engine`, plays the script and policy under
    /// the oracle, then applies `verdict` if the run got that far.
    fn run_engine<E: Engine>(
        &self,
        engine: E,
        config: E::Config,
        script: Vec<ScriptStep<E>>,
        policy: impl FnMut(&E::State) -> Option<E::Action>,
        observe: impl Fn(&mut Oracle, &E::State, &EngineSnapshot<E>) -> Result<(), String>,
        verdict: impl FnOnce(&mut PlaybackController<E>, &mut ScenarioMetrics) -> Result<(), String>,
    ) -> Outcome {
        let mut controller = PlaybackController::new(engine);
        let mut oracle = Oracle::new();
        let driven = controller
            .reset(config)
            .map_err(|e| e.to_string())
            .and_then(|()| {
                controller.load_script(script);
                self.drive(&mut controller, policy, |prev, next| observe(&mut oracle, prev, next))
            });

        let (mut metrics, deadlock) = oracle.into_parts();
        let mut failure = match driven {
            Ok(_) => verdict(&mut controller, &mut metrics).err(),
            Err(e) => Some(e),
        };
        let frames = match exporter::frames(controller.timeline()) {
            Ok(frames) => frames,
            Err(e) => {
                failure.get_or_insert_with(|| format!("timeline export failed: {e}"));
                Vec::new()
            }
        };

        Outcome {
            total_steps: controller.timeline().len().saturating_sub(1),
            failure,
            metrics,
            deadlock,
            frames,
        }
    }

    fn scheduler_run(
        &self,
        config: SchedulerConfig,
        script: Vec<ScriptStep<SchedulerEngine>>,
        policy: impl FnMut(&SchedulerState) -> Option<SchedulerAction>,
        verdict: impl FnOnce(&mut PlaybackController<SchedulerEngine>, &mut ScenarioMetrics) -> Result<(), String>,
    ) -> Outcome {
        self.run_engine(SchedulerEngine, config, script, policy, Oracle::observe_scheduler, verdict)
    }

    fn collector_run(
        &self,
        config: CollectorConfig,
        script: Vec<ScriptStep<CollectorEngine>>,
        policy: impl FnMut(&CollectorState) -> Option<CollectorAction>,
        verdict: impl FnOnce(&mut PlaybackController<CollectorEngine>, &mut ScenarioMetrics) -> Result<(), String>,
    ) -> Outcome {
        self.run_engine(CollectorEngine, config, script, policy, Oracle::observe_collector, verdict)
    }

    /// Sync runs are fully scripted.
    fn sync_run(
        &self,
        config: SyncConfig,
        script: Vec<ScriptStep<SyncEngine>>,
        verdict: impl FnOnce(&mut PlaybackController<SyncEngine>, &mut ScenarioMetrics) -> Result<(), String>,
    ) -> Outcome {
        self.run_engine(SyncEngine, config, script, |_| None, Oracle::observe_sync, verdict)
    }

    // -------------------------------------------------------------------------
    // Scheduler scenarios
    // -------------------------------------------------------------------------

    /// RT-001: 8 tasks land on W0; W1..W3 steal from it.
    fn run_work_stealing(&self) -> Outcome {
        info!("RT-001: WorkStealing");
        let config = SchedulerConfig {
            worker_count: 4,
            steal_policy: StealPolicy::Half,
            victim_order: VictimOrder::RoundRobin,
        };
        let script = (0..8).map(|_| Some(spawn_on(0))).collect();
        self.scheduler_run(config, script, drain, |_, m| {
            expect(m.steals > 0, "no worker ever stole")?;
            expect_eq("tasks completed", m.tasks_completed, 8)
        })
    }

    /// RT-002: 32 tasks on W0, 7 thieves with seeded victim order.
    fn run_steal_storm(&self) -> Outcome {
        info!("RT-002: StealStorm");
        let config = SchedulerConfig {
            worker_count: 8,
            steal_policy: StealPolicy::Half,
            victim_order: VictimOrder::SeededRandom(self.clock.derive_seed(2)),
        };
        let script = (0..32).map(|_| Some(spawn_on(0))).collect();
        self.scheduler_run(config, script, drain, |_, m| {
            expect(m.steals >= 3, "fewer than three steals in a storm")?;
            expect_eq("tasks completed", m.tasks_completed, 32)
        })
    }

    /// RT-003: every task yields once before it completes.
    fn run_preemption(&self) -> Outcome {
        info!("RT-003: Preemption");
        let config = SchedulerConfig {
            worker_count: 2,
            ..Default::default()
        };
        let script = (0..4).map(|_| Some(SchedulerAction::Spawn { target: None })).collect();
        let mut yielded = BTreeSet::new();
        let policy = move |state: &SchedulerState| {
            let action = drain(state)?;
            match action {
                SchedulerAction::Complete { task } if yielded.insert(task) => {
                    Some(SchedulerAction::Yield { task })
                }
                other => Some(other),
            }
        };
        self.scheduler_run(config, script, policy, |_, m| {
            expect_eq("preemptions", m.preemptions, 4)?;
            expect_eq("tasks completed", m.tasks_completed, 4)
        })
    }

    /// RT-004: W0 enters a syscall; W1 steals the task left behind.
    fn run_syscall_handoff(&self) -> Outcome {
        info!("RT-004: SyscallHandoff");
        let config = SchedulerConfig {
            worker_count: 2,
            ..Default::default()
        };
        let script = vec![
            Some(spawn_on(0)),
            Some(spawn_on(0)),
            None,
            Some(SchedulerAction::EnterSyscall { task: TaskId(0) }),
            None,
            None,
            Some(SchedulerAction::Complete { task: TaskId(1) }),
            Some(SchedulerAction::ExitSyscall { worker: WorkerId(0) }),
            Some(SchedulerAction::Complete { task: TaskId(0) }),
        ];
        self.scheduler_run(config, script, drain, |_, m| {
            expect_eq("syscalls", m.syscalls, 1)?;
            expect_eq("steals", m.steals, 1)?;
            expect_eq("tasks completed", m.tasks_completed, 2)
        })
    }

    // -------------------------------------------------------------------------
    // Collector scenarios
    // -------------------------------------------------------------------------

    /// RT-005: manual cycle over the initial heap.
    fn run_gc_cycle(&self) -> Outcome {
        info!("RT-005: GcCycle");
        let script = vec![Some(CollectorAction::TriggerGc)];
        self.collector_run(CollectorConfig::default(), script, |_| None, |c, m| {
            expect_eq("cycles", m.gc_cycles, 1)?;
            // 2->3 and 6->7 are unreachable.
            expect_eq("objects freed", m.objects_freed, 4)?;
            let survivors = c.current().map_err(|e| e.to_string())?.state.objects.len();
            expect_eq("survivors", survivors as u64, 4)
        })
    }

    /// RT-006: keep allocating until pacing starts a cycle.
    fn run_gc_pacing(&self) -> Outcome {
        info!("RT-006: GcPacing");
        let config = CollectorConfig {
            heap_goal_bytes: 1024,
            ..Default::default()
        };
        let policy = |state: &CollectorState| {
            (state.phase == GcPhase::Idle && state.completed_cycles == 0).then_some(
                CollectorAction::Allocate {
                    size_bytes: 64,
                    root: false,
                    referenced_by: Some(ObjectId(0)),
                },
            )
        };
        self.collector_run(config, Vec::new(), policy, |_, m| {
            expect_eq("pacing triggers", m.pacing_triggers, 1)?;
            expect_eq("cycles", m.gc_cycles, 1)?;
            expect_eq("objects freed", m.objects_freed, 4)
        })
    }

    /// RT-007: O0 is blackened, then gains a reference to white O2.
    fn run_write_barrier(&self) -> Outcome {
        info!("RT-007: WriteBarrier");
        let script = vec![
            Some(CollectorAction::TriggerGc),
            None,
            Some(CollectorAction::AddRef {
                from: ObjectId(0),
                to: ObjectId(2),
            }),
        ];
        self.collector_run(CollectorConfig::default(), script, |_| None, |c, m| {
            expect_eq("barrier shades", m.barrier_shades, 1)?;
            // Only 6->7 is garbage now.
            expect_eq("objects freed", m.objects_freed, 2)?;
            let state = &c.current().map_err(|e| e.to_string())?.state;
            expect(
                state.objects.contains_key(&ObjectId(3)),
                "O3 was freed although O2 kept it alive",
            )
        })
    }

    // -------------------------------------------------------------------------
    // Sync scenarios
    // -------------------------------------------------------------------------

    /// RT-008: capacity-3 channel.
    fn run_buffered_channel(&self) -> Outcome {
        info!("RT-008: BufferedChannel");
        let config = sync_config(2, vec![3]);
        let mut script: Vec<ScriptStep<SyncEngine>> = (0..4).map(|v| send(0, 0, v)).collect();
        script.extend((0..4).map(|_| recv(1, 0)));
        script.extend([exit(0), exit(1)]);
        self.sync_run(config, script, |c, m| {
            expect_eq("blocked ops", m.blocked_ops, 1)?;
            expect_eq("received values", received_by(c, TaskId(1)), vec![0, 1, 2, 3])
        })
    }

    /// RT-009: rendezvous in both directions.
    fn run_unbuffered_handoff(&self) -> Outcome {
        info!("RT-009: UnbufferedHandoff");
        let script = vec![
            recv(1, 0),
            send(0, 0, 5),
            send(0, 0, 6),
            recv(1, 0),
            exit(0),
            exit(1),
        ];
        self.sync_run(sync_config(2, vec![0]), script, |c, m| {
            expect_eq("blocked ops", m.blocked_ops, 2)?;
            expect_eq("received values", received_by(c, TaskId(1)), vec![5, 6])
        })
    }

    /// RT-010: close with a parked receiver on C0 and a parked sender on C1.
    fn run_closed_channel(&self) -> Outcome {
        info!("RT-010: ClosedChannel");
        let script = vec![
            recv(1, 0),
            send(2, 1, 9),
            close(0, 0),
            close(0, 1),
            recv(0, 0),
            exit(0),
            exit(1),
        ];
        self.sync_run(sync_config(3, vec![0, 0]), script, |c, m| {
            let state = &c.current().map_err(|e| e.to_string())?.state;
            expect(
                matches!(state.tasks[&TaskId(2)].state, SyncTaskState::Failed(_)),
                "parked sender did not fail on close",
            )?;

            // Sending after the close is rejected and leaves history alone.
            let tip = c.position();
            let len = c.timeline().len();
            c.jump_to(4).map_err(|e| e.to_string())?;
            let err = c
                .apply(SyncAction::Send {
                    task: TaskId(0),
                    channel: ChannelId(0),
                    value: 1,
                })
                .err();
            expect_eq(
                "send-after-close error",
                err,
                Some(SimError::Misuse(Misuse::SendOnClosed {
                    channel: ChannelId(0),
                    task: TaskId(0),
                })),
            )?;
            expect_eq("timeline length", c.timeline().len(), len)?;
            c.jump_to(tip).map_err(|e| e.to_string())?;
            m.misuse_rejected += 1;
            Ok(())
        })
    }

    /// RT-011: T1 and T2 queue behind T0 and acquire in order.
    fn run_mutex_fairness(&self) -> Outcome {
        info!("RT-011: MutexFairness");
        let config = SyncConfig {
            mutex_count: 1,
            ..sync_config(3, Vec::new())
        };
        let script = vec![
            lock(0, 0),
            lock(1, 0),
            lock(2, 0),
            unlock(0, 0),
            unlock(1, 0),
            unlock(2, 0),
            exit(0),
            exit(1),
            exit(2),
        ];
        self.sync_run(config, script, |c, m| {
            expect_eq("blocked ops", m.blocked_ops, 2)?;
            let order: Vec<TaskId> = c
                .timeline()
                .iter()
                .filter_map(|s| match &s.event {
                    Some(SyncEvent::Mutex(MutexEvent::HandedOff { to, .. })) => Some(*to),
                    _ => None,
                })
                .collect();
            expect_eq("hand-off order", order, vec![TaskId(1), TaskId(2)])
        })
    }

    /// RT-012: the classic lock-order inversion.
    fn run_mutex_deadlock(&self) -> Outcome {
        info!("RT-012: MutexDeadlock");
        let config = SyncConfig {
            mutex_count: 2,
            ..sync_config(2, Vec::new())
        };
        let script = vec![lock(0, 0), lock(1, 1), lock(0, 1), lock(1, 0)];
        self.sync_run(config, script, |c, m| {
            expect_eq("deadlocks", m.deadlocks, 1)?;
            let state = &c.current().map_err(|e| e.to_string())?.state;
            let cycle = rtlab_core::detect_deadlock(state).map(|d| d.cycle);
            expect_eq("cycle", cycle, Some(vec![TaskId(0), TaskId(1)]))
        })
    }

    /// RT-013: T0 waits for T1..T3.
    fn run_wait_group(&self) -> Outcome {
        info!("RT-013: WaitGroup");
        let config = SyncConfig {
            wait_group_count: 1,
            ..sync_config(4, Vec::new())
        };
        let wg = WaitGroupId(0);
        let mut script = vec![
            Some(SyncAction::WgAdd {
                wait_group: wg,
                delta: 3,
            }),
            Some(SyncAction::WgWait {
                task: TaskId(0),
                wait_group: wg,
            }),
        ];
        script.extend((1..4).map(|t| {
            Some(SyncAction::WgDone {
                task: TaskId(t),
                wait_group: wg,
            })
        }));
        script.extend((0..4).map(exit));
        self.sync_run(config, script, |c, m| {
            expect_eq("blocked ops", m.blocked_ops, 1)?;
            let state = &c.current().map_err(|e| e.to_string())?.state;
            expect_eq("counter", state.wait_groups[&wg].counter, 0)
        })
    }

    /// RT-014: T0 selects over C0 and C1, fed by T1 and T2.
    fn run_select_fan_in(&self) -> Outcome {
        info!("RT-014: SelectFanIn");
        let config = SyncConfig {
            select_policy: SelectPolicy::UniformRandom(self.clock.derive_seed(14)),
            ..sync_config(3, vec![1, 1])
        };
        let fan_in = || {
            Some(SyncAction::Select {
                task: TaskId(0),
                cases: vec![
                    SelectCase::Recv {
                        channel: ChannelId(0),
                    },
                    SelectCase::Recv {
                        channel: ChannelId(1),
                    },
                ],
                default: false,
            })
        };
        let script = vec![
            send(1, 0, 10),
            send(2, 1, 20),
            fan_in(),
            fan_in(),
            fan_in(),
            send(1, 0, 30),
            exit(0),
            exit(1),
            exit(2),
        ];
        self.sync_run(config, script, |c, m| {
            expect_eq("blocked ops", m.blocked_ops, 1)?;
            let mut values = received_by(c, TaskId(0));
            values.sort_unstable();
            expect_eq("values selected", values, vec![10, 20, 30])
        })
    }

    /// RT-015: producer -> doubler -> sink over unbuffered channels.
    fn run_pipeline(&self) -> Outcome {
        info!("RT-015: Pipeline");
        let script = vec![
            recv(1, 0),
            send(0, 0, 1),
            recv(2, 1),
            send(1, 1, 2),
            recv(1, 0),
            send(0, 0, 2),
            send(1, 1, 4),
            recv(2, 1),
            close(0, 0),
            recv(1, 0),
            close(1, 1),
            recv(2, 1),
            exit(0),
            exit(1),
            exit(2),
        ];
        self.sync_run(sync_config(3, vec![0, 0]), script, |c, _| {
            expect_eq("sink values", received_by(c, TaskId(2)), vec![2, 4])
        })
    }
}

// -----------------------------------------------------------------------------
// Policies & script helpers
// -----------------------------------------------------------------------------

/// Ticks while queued work can be picked up, otherwise completes the
/// running task on the lowest worker.
fn drain(state: &SchedulerState) -> Option<SchedulerAction> {
    let queued = state.queues().any(|q| !q.is_empty());
    let available = state
        .workers
        .iter()
        .any(|w| matches!(w.state, WorkerState::Idle | WorkerState::Stealing));
    if queued && available {
        return None;
    }
    state.workers.iter().find_map(|w| match (w.state, w.current_task) {
        (WorkerState::Running, Some(task)) => Some(SchedulerAction::Complete { task }),
        _ => None,
    })
}

fn spawn_on(worker: u32) -> SchedulerAction {
    SchedulerAction::Spawn {
        target: Some(WorkerId(worker)),
    }
}

fn sync_config(task_count: usize, channel_capacities: Vec<usize>) -> SyncConfig {
    SyncConfig {
        task_count,
        channel_capacities,
        select_policy: SelectPolicy::FirstReady,
        ..Default::default()
    }
}

fn send(task: u32, channel: u32, value: i64) -> ScriptStep<SyncEngine> {
    Some(SyncAction::Send {
        task: TaskId(task),
        channel: ChannelId(channel),
        value,
    })
}

fn recv(task: u32, channel: u32) -> ScriptStep<SyncEngine> {
    Some(SyncAction::Recv {
        task: TaskId(task),
        channel: ChannelId(channel),
    })
}

fn close(task: u32, channel: u32) -> ScriptStep<SyncEngine> {
    Some(SyncAction::Close {
        task: TaskId(task),
        channel: ChannelId(channel),
    })
}

fn lock(task: u32, mutex: u32) -> ScriptStep<SyncEngine> {
    Some(SyncAction::Lock {
        task: TaskId(task),
        mutex: MutexId(mutex),
    })
}

fn unlock(task: u32, mutex: u32) -> ScriptStep<SyncEngine> {
    Some(SyncAction::Unlock {
        task: TaskId(task),
        mutex: MutexId(mutex),
    })
}

fn exit(task: u32) -> ScriptStep<SyncEngine> {
    Some(SyncAction::Exit { task: TaskId(task) })
}

/// Values delivered to `task` with `ok = true`, in timeline order.
fn received_by(controller: &PlaybackController<SyncEngine>, task: TaskId) -> Vec<i64> {
    let delivered = |event: &ChannelEvent| match *event {
        ChannelEvent::Handoff { to, value, .. } if to == task => Some(value),
        ChannelEvent::Received { task: t, value, .. } if t == task => Some(value),
        _ => None,
    };
    controller
        .timeline()
        .iter()
        .filter_map(|s| match &s.event {
            Some(SyncEvent::Channel(event)) => delivered(event),
            Some(SyncEvent::Select(SelectEvent::Chosen { outcome, .. })) => delivered(outcome),
            _ => None,
        })
        .collect()
}

fn expect(condition: bool, message: &str) -> Result<(), String> {
    if condition {
        Ok(())
    } else {
        Err(message.to_string())
    }
}

fn expect_eq<T: PartialEq + std::fmt::Debug>(what: &str, actual: T, expected: T) -> Result<(), String> {
    if actual == expected {
        Ok(())
    } else {
        Err(format!("{what}: expected {expected:?}, got {actual:?}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rtlab_core::{PlaybackState, Player};
    use std::time::Duration;

    #[test]
    fn test_every_scenario_passes() {
        let runner = ScenarioRunner::new(42);
        for scenario in ScenarioId::all() {
            let result = runner.run(scenario);
            assert!(
                result.passed,
                "{} failed: {:?}",
                scenario,
                result.failure_reason
            );
            assert!(result.metrics.steps > 0);
        }
    }

    #[test]
    fn test_same_seed_same_timeline() {
        let a = ScenarioRunner::new(7).run_with_export(ScenarioId::StealStorm).1;
        let b = ScenarioRunner::new(7).run_with_export(ScenarioId::StealStorm).1;
        assert_eq!(a.frames, b.frames);
    }

    #[test]
    fn test_step_budget_is_enforced() {
        let result = ScenarioRunner::new(1)
            .with_max_steps(3)
            .run(ScenarioId::WorkStealing);
        assert!(!result.passed);
        assert!(result
            .failure_reason
            .unwrap_or_default()
            .contains("not finished after 3 steps"));
    }

    #[test]
    fn test_deadlock_is_reported_in_result() {
        let result = ScenarioRunner::new(3).run(ScenarioId::MutexDeadlock);
        let deadlock = result.deadlock.expect("deadlock expected");
        assert_eq!(deadlock.cycle, vec![TaskId(0), TaskId(1)]);
    }

    #[test]
    fn test_seeded_storm_metrics_are_stable() {
        let a = ScenarioRunner::new(99).run(ScenarioId::StealStorm);
        let b = ScenarioRunner::new(99).run(ScenarioId::StealStorm);
        assert_eq!(a.metrics, b.metrics);
        assert_eq!(a.total_steps, b.total_steps);
    }

    #[tokio::test]
    async fn test_autoplay_on_virtual_clock() {
        let clock = SimClock::shared(5);
        let mut controller = PlaybackController::new(CollectorEngine);
        controller.reset(CollectorConfig::default()).unwrap();
        controller.load_script(vec![Some(CollectorAction::TriggerGc)]);
        let player = Player::new(controller, clock.clone());

        player.play(Duration::from_secs(1)).unwrap();
        for _ in 0..1_000 {
            if player.lock().state() == PlaybackState::Paused {
                break;
            }
            tokio::task::yield_now().await;
        }

        let guard = player.lock();
        assert_eq!(guard.state(), PlaybackState::Paused);
        assert!(guard.is_finished());
        // One virtual second per tick, no wall-clock waiting.
        assert_eq!(clock.now(), Duration::from_secs(guard.position() as u64));
    }
}
