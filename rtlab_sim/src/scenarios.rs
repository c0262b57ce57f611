//! Canned teaching scenarios.

use serde::{Deserialize, Serialize};

/// Runtime subsystem a scenario exercises.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Subsystem {
    Scheduler,
    Collector,
    Sync,
}

/// Scenario identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScenarioId {
    /// RT-001: one busy worker, three idle ones steal half its queue
    WorkStealing,

    /// RT-002: many thieves with seeded victim order
    StealStorm,

    /// RT-003: running tasks yield back to their local queue
    Preemption,

    /// RT-004: a task takes its worker into a system call
    SyscallHandoff,

    /// RT-005: one manual mark & sweep cycle
    GcCycle,

    /// RT-006: allocation crosses the trigger point
    GcPacing,

    /// RT-007: mutator stores into a black object mid-mark
    WriteBarrier,

    /// RT-008: fill and drain a buffered channel
    BufferedChannel,

    /// RT-009: rendezvous on an unbuffered channel
    UnbufferedHandoff,

    /// RT-010: close with receivers and senders parked
    ClosedChannel,

    /// RT-011: three tasks contend for one mutex
    MutexFairness,

    /// RT-012: two tasks lock two mutexes in opposite order
    MutexDeadlock,

    /// RT-013: a coordinator waits for its workers
    WaitGroup,

    /// RT-014: one consumer selects over two producers
    SelectFanIn,

    /// RT-015: three stages connected by channels
    Pipeline,
}

impl ScenarioId {
    /// Returns a list of all scenarios.
    pub fn all() -> Vec<ScenarioId> {
        vec![
            ScenarioId::WorkStealing,
            ScenarioId::StealStorm,
            ScenarioId::Preemption,
            ScenarioId::SyscallHandoff,
            ScenarioId::GcCycle,
            ScenarioId::GcPacing,
            ScenarioId::WriteBarrier,
            ScenarioId::BufferedChannel,
            ScenarioId::UnbufferedHandoff,
            ScenarioId::ClosedChannel,
            ScenarioId::MutexFairness,
            ScenarioId::MutexDeadlock,
            ScenarioId::WaitGroup,
            ScenarioId::SelectFanIn,
            ScenarioId::Pipeline,
        ]
    }

    /// Scenarios for one subsystem.
    pub fn for_subsystem(subsystem: Subsystem) -> Vec<ScenarioId> {
        Self::all()
            .into_iter()
            .filter(|s| s.subsystem() == subsystem)
            .collect()
    }

    pub fn subsystem(&self) -> Subsystem {
        match self {
            ScenarioId::WorkStealing
            | ScenarioId::StealStorm
            | ScenarioId::Preemption
            | ScenarioId::SyscallHandoff => Subsystem::Scheduler,
            ScenarioId::GcCycle | ScenarioId::GcPacing | ScenarioId::WriteBarrier => {
                Subsystem::Collector
            }
            _ => Subsystem::Sync,
        }
    }

    /// Returns the scenario name.
    pub fn name(&self) -> &'static str {
        match self {
            ScenarioId::WorkStealing => "work_stealing",
            ScenarioId::StealStorm => "steal_storm",
            ScenarioId::Preemption => "preemption",
            ScenarioId::SyscallHandoff => "syscall_handoff",
            ScenarioId::GcCycle => "gc_cycle",
            ScenarioId::GcPacing => "gc_pacing",
            ScenarioId::WriteBarrier => "write_barrier",
            ScenarioId::BufferedChannel => "buffered_channel",
            ScenarioId::UnbufferedHandoff => "unbuffered_handoff",
            ScenarioId::ClosedChannel => "closed_channel",
            ScenarioId::MutexFairness => "mutex_fairness",
            ScenarioId::MutexDeadlock => "mutex_deadlock",
            ScenarioId::WaitGroup => "wait_group",
            ScenarioId::SelectFanIn => "select_fan_in",
            ScenarioId::Pipeline => "pipeline",
        }
    }

    /// Returns a description of the scenario.
    pub fn description(&self) -> &'static str {
        match self {
            ScenarioId::WorkStealing => "8 tasks spawned on W0, idle workers steal half of a victim's queue",
            ScenarioId::StealStorm => "32 tasks on one worker, 8 thieves probing in seeded random order",
            ScenarioId::Preemption => "tasks yield after running and rejoin the tail of their queue",
            ScenarioId::SyscallHandoff => "a worker blocks in a system call while others keep running",
            ScenarioId::GcCycle => "manual cycle frees the unreachable pairs of the initial heap",
            ScenarioId::GcPacing => "allocation past the trigger point starts a cycle on its own",
            ScenarioId::WriteBarrier => "a black object gains a white child and the barrier shades it",
            ScenarioId::BufferedChannel => "capacity-3 channel filled without blocking, 4th send parks",
            ScenarioId::UnbufferedHandoff => "receiver parks first, sender hands off directly",
            ScenarioId::ClosedChannel => "close wakes receivers with zero values and fails senders",
            ScenarioId::MutexFairness => "waiters acquire the mutex in the order they asked",
            ScenarioId::MutexDeadlock => "opposite lock order, detector reports the cycle",
            ScenarioId::WaitGroup => "coordinator blocks until every worker calls done",
            ScenarioId::SelectFanIn => "consumer selects over two producers with a seeded tie-break",
            ScenarioId::Pipeline => "producer, doubler and sink connected by unbuffered channels",
        }
    }
}

impl std::fmt::Display for ScenarioId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl std::str::FromStr for ScenarioId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_lowercase().replace('-', "_");
        ScenarioId::all()
            .into_iter()
            .enumerate()
            .find(|(i, id)| id.name() == wanted || format!("rt_{:03}", i + 1) == wanted)
            .map(|(_, id)| id)
            .ok_or_else(|| format!("Unknown scenario: {s}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_by_name_and_code() {
        assert_eq!("work_stealing".parse::<ScenarioId>(), Ok(ScenarioId::WorkStealing));
        assert_eq!("Mutex-Deadlock".parse::<ScenarioId>(), Ok(ScenarioId::MutexDeadlock));
        assert_eq!("RT-015".parse::<ScenarioId>(), Ok(ScenarioId::Pipeline));
        assert!("split_brain".parse::<ScenarioId>().is_err());
    }

    #[test]
    fn test_names_round_trip() {
        for id in ScenarioId::all() {
            assert_eq!(id.to_string().parse::<ScenarioId>(), Ok(id));
        }
    }

    #[test]
    fn test_subsystem_groups_cover_all() {
        let total: usize = [Subsystem::Scheduler, Subsystem::Collector, Subsystem::Sync]
            .into_iter()
            .map(|s| ScenarioId::for_subsystem(s).len())
            .sum();
        assert_eq!(total, ScenarioId::all().len());
        assert_eq!(ScenarioId::for_subsystem(Subsystem::Collector).len(), 3);
    }
}
