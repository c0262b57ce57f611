//! Deadlock detection over the wait-for graph.
//!
//! Read-only analysis of a [`SyncState`]. A mutex waiter depends on the
//! holder; a task parked on a channel, a wait group or a select could be
//! released by any other live task. Ready tasks make progress, and so does
//! any blocked task with an edge into a task that makes progress. Whatever
//! is left is stuck.

use super::{BlockedOn, SyncState, SyncTaskState};
use rtlab_env::TaskId;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deadlock {
    /// Blocked tasks that can never be released
    pub stuck: BTreeSet<TaskId>,
    /// A wait-for cycle among the stuck tasks, starting at the lowest id.
    /// Empty when the stuck tasks wait on finished tasks rather than on
    /// each other.
    pub cycle: Vec<TaskId>,
}

/// Edges from each blocked task to the tasks that could release it.
pub fn wait_for_graph(state: &SyncState) -> BTreeMap<TaskId, BTreeSet<TaskId>> {
    let live: BTreeSet<TaskId> = state
        .tasks
        .values()
        .filter(|t| !t.state.is_finished())
        .map(|t| t.id)
        .collect();

    let mut graph = BTreeMap::new();
    for task in state.tasks.values() {
        let SyncTaskState::Blocked(on) = &task.state else {
            continue;
        };
        let targets: BTreeSet<TaskId> = match on {
            BlockedOn::Lock { mutex } => state
                .mutexes
                .get(mutex)
                .and_then(|m| m.holder)
                .into_iter()
                .collect(),
            BlockedOn::Send { .. }
            | BlockedOn::Recv { .. }
            | BlockedOn::Wait { .. }
            | BlockedOn::Select { .. } => {
                live.iter().copied().filter(|&other| other != task.id).collect()
            }
        };
        graph.insert(task.id, targets);
    }
    graph
}

pub fn detect_deadlock(state: &SyncState) -> Option<Deadlock> {
    let graph = wait_for_graph(state);

    let mut progressing: BTreeSet<TaskId> = state
        .tasks
        .values()
        .filter(|t| t.state == SyncTaskState::Ready)
        .map(|t| t.id)
        .collect();

    // Fixed point: a blocked task progresses once something it waits on does.
    loop {
        let released: Vec<TaskId> = graph
            .iter()
            .filter(|(task, _)| !progressing.contains(task))
            .filter(|(_, targets)| targets.iter().any(|t| progressing.contains(t)))
            .map(|(&task, _)| task)
            .collect();
        if released.is_empty() {
            break;
        }
        progressing.extend(released);
    }

    let stuck: BTreeSet<TaskId> = graph
        .keys()
        .copied()
        .filter(|task| !progressing.contains(task))
        .collect();
    let start = *stuck.first()?;

    let mut path = vec![start];
    let mut cycle = Vec::new();
    let mut current = start;
    while let Some(&next) = graph
        .get(&current)
        .and_then(|targets| targets.iter().find(|t| stuck.contains(t)))
    {
        if let Some(pos) = path.iter().position(|&t| t == next) {
            cycle = path.split_off(pos);
            break;
        }
        path.push(next);
        current = next;
    }

    Some(Deadlock { stuck, cycle })
}

#[cfg(test)]
mod tests {
    use super::super::tests::{act, world, world_with};
    use super::super::{SyncAction, SyncConfig, SyncEngine};
    use super::*;
    use crate::engine::Engine;
    use rtlab_env::{ChannelId, MutexId, WaitGroupId};

    fn lock(task: u32, mutex: u32) -> SyncAction {
        SyncAction::Lock {
            task: TaskId(task),
            mutex: MutexId(mutex),
        }
    }

    #[test]
    fn test_two_mutex_deadlock_reports_cycle() {
        let mut state = world_with(SyncConfig {
            task_count: 2,
            mutex_count: 2,
            ..Default::default()
        });
        state = act(&state, lock(0, 0)).0;
        state = act(&state, lock(1, 1)).0;
        assert!(detect_deadlock(&state).is_none());
        state = act(&state, lock(0, 1)).0;
        assert!(detect_deadlock(&state).is_none());
        state = act(&state, lock(1, 0)).0;

        let deadlock = detect_deadlock(&state).unwrap();
        assert_eq!(deadlock.stuck, BTreeSet::from([TaskId(0), TaskId(1)]));
        assert_eq!(deadlock.cycle, vec![TaskId(0), TaskId(1)]);
        assert!(SyncEngine.is_complete(&state));
    }

    #[test]
    fn test_waiter_on_ready_holder_is_not_stuck() {
        let mut state = world_with(SyncConfig {
            task_count: 3,
            mutex_count: 1,
            ..Default::default()
        });
        state = act(&state, lock(0, 0)).0;
        state = act(&state, lock(1, 0)).0;
        state = act(&state, lock(2, 0)).0;

        let graph = wait_for_graph(&state);
        assert_eq!(graph[&TaskId(1)], BTreeSet::from([TaskId(0)]));
        assert!(detect_deadlock(&state).is_none());
    }

    #[test]
    fn test_all_receivers_blocked_is_deadlock() {
        let mut state = world(2, vec![0]);
        for task in 0..2 {
            state = act(
                &state,
                SyncAction::Recv {
                    task: TaskId(task),
                    channel: ChannelId(0),
                },
            )
            .0;
        }
        let deadlock = detect_deadlock(&state).unwrap();
        assert_eq!(deadlock.stuck.len(), 2);
        assert_eq!(deadlock.cycle, vec![TaskId(0), TaskId(1)]);
    }

    #[test]
    fn test_blocked_while_sender_alive_is_not_deadlock() {
        let state = world(2, vec![0]);
        let state = act(
            &state,
            SyncAction::Recv {
                task: TaskId(1),
                channel: ChannelId(0),
            },
        )
        .0;
        assert!(detect_deadlock(&state).is_none());
        assert!(!SyncEngine.is_complete(&state));
    }

    #[test]
    fn test_lone_waiter_has_empty_cycle() {
        let mut state = world_with(SyncConfig {
            task_count: 2,
            wait_group_count: 1,
            ..Default::default()
        });
        state = act(
            &state,
            SyncAction::WgAdd {
                wait_group: WaitGroupId(0),
                delta: 1,
            },
        )
        .0;
        state = act(&state, SyncAction::Exit { task: TaskId(1) }).0;
        state = act(
            &state,
            SyncAction::WgWait {
                task: TaskId(0),
                wait_group: WaitGroupId(0),
            },
        )
        .0;

        let deadlock = detect_deadlock(&state).unwrap();
        assert_eq!(deadlock.stuck, BTreeSet::from([TaskId(0)]));
        assert!(deadlock.cycle.is_empty());
    }
}
