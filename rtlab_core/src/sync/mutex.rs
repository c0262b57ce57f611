//! Mutex semantics with FIFO hand-off.

use super::{BlockedOn, SyncState};
use crate::error::{Misuse, SimError, SimResult};
use rtlab_env::{MutexId, TaskId};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mutex {
    pub id: MutexId,
    pub holder: Option<TaskId>,
    /// Waiting tasks in request order
    pub waiters: VecDeque<TaskId>,
}

impl Mutex {
    pub fn new(id: MutexId) -> Self {
        Self {
            id,
            holder: None,
            waiters: VecDeque::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum MutexEvent {
    Acquired { mutex: MutexId, task: TaskId },
    LockBlocked {
        mutex: MutexId,
        task: TaskId,
        holder: TaskId,
        /// 1-based place in the wait queue
        position: usize,
    },
    Released { mutex: MutexId, task: TaskId },
    /// Ownership passed directly to the FIFO head.
    HandedOff {
        mutex: MutexId,
        from: TaskId,
        to: TaskId,
    },
}

impl SyncState {
    fn mutex_mut(&mut self, id: MutexId) -> SimResult<&mut Mutex> {
        self.mutexes
            .get_mut(&id)
            .ok_or(SimError::Misuse(Misuse::UnknownMutex(id)))
    }

    pub(super) fn lock(&mut self, task: TaskId, mutex: MutexId) -> SimResult<MutexEvent> {
        let m = self.mutex_mut(mutex)?;
        match m.holder {
            None => {
                m.holder = Some(task);
                Ok(MutexEvent::Acquired { mutex, task })
            }
            // Re-locking a held mutex (even by its holder) waits like anyone else.
            Some(holder) => {
                m.waiters.push_back(task);
                let position = m.waiters.len();
                self.block(task, BlockedOn::Lock { mutex });
                Ok(MutexEvent::LockBlocked {
                    mutex,
                    task,
                    holder,
                    position,
                })
            }
        }
    }

    pub(super) fn unlock(&mut self, task: TaskId, mutex: MutexId) -> SimResult<MutexEvent> {
        let m = self.mutex_mut(mutex)?;
        if m.holder != Some(task) {
            return Err(Misuse::UnlockNotHeld { mutex, task }.into());
        }

        match m.waiters.pop_front() {
            Some(next) => {
                m.holder = Some(next);
                self.wake(next, None, None);
                Ok(MutexEvent::HandedOff {
                    mutex,
                    from: task,
                    to: next,
                })
            }
            None => {
                m.holder = None;
                Ok(MutexEvent::Released { mutex, task })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::tests::{act, try_act, world_with};
    use super::super::{SyncAction, SyncConfig, SyncEvent, SyncTaskState};
    use super::*;

    fn lock(task: u32, mutex: u32) -> SyncAction {
        SyncAction::Lock {
            task: TaskId(task),
            mutex: MutexId(mutex),
        }
    }

    fn unlock(task: u32, mutex: u32) -> SyncAction {
        SyncAction::Unlock {
            task: TaskId(task),
            mutex: MutexId(mutex),
        }
    }

    fn three_tasks_one_mutex() -> SyncState {
        world_with(SyncConfig {
            task_count: 3,
            mutex_count: 1,
            ..Default::default()
        })
    }

    #[test]
    fn test_lock_unlocked_succeeds_immediately() {
        let state = three_tasks_one_mutex();
        let (next, event) = act(&state, lock(0, 0));
        assert_eq!(
            event,
            SyncEvent::Mutex(MutexEvent::Acquired {
                mutex: MutexId(0),
                task: TaskId(0)
            })
        );
        assert_eq!(next.mutexes[&MutexId(0)].holder, Some(TaskId(0)));
    }

    #[test]
    fn test_fifo_fairness_on_release() {
        let mut state = three_tasks_one_mutex();
        state = act(&state, lock(0, 0)).0;
        state = act(&state, lock(1, 0)).0; // A
        state = act(&state, lock(2, 0)).0; // B
        assert_eq!(
            state.tasks[&TaskId(1)].state,
            SyncTaskState::Blocked(BlockedOn::Lock { mutex: MutexId(0) })
        );

        let (state, event) = act(&state, unlock(0, 0));
        assert_eq!(
            event,
            SyncEvent::Mutex(MutexEvent::HandedOff {
                mutex: MutexId(0),
                from: TaskId(0),
                to: TaskId(1)
            })
        );
        assert_eq!(state.tasks[&TaskId(1)].state, SyncTaskState::Ready);
        assert!(matches!(state.tasks[&TaskId(2)].state, SyncTaskState::Blocked(_)));

        let (state, _) = act(&state, unlock(1, 0));
        assert_eq!(state.mutexes[&MutexId(0)].holder, Some(TaskId(2)));
    }

    #[test]
    fn test_unlock_by_non_holder_is_misuse() {
        let state = three_tasks_one_mutex();
        assert_eq!(
            try_act(&state, unlock(0, 0)).unwrap_err(),
            SimError::Misuse(Misuse::UnlockNotHeld {
                mutex: MutexId(0),
                task: TaskId(0)
            })
        );

        let state = act(&state, lock(0, 0)).0;
        assert!(try_act(&state, unlock(1, 0)).is_err());
    }

    #[test]
    fn test_blocked_task_cannot_act() {
        let mut state = three_tasks_one_mutex();
        state = act(&state, lock(0, 0)).0;
        state = act(&state, lock(1, 0)).0;
        let err = try_act(&state, unlock(1, 0)).unwrap_err();
        assert!(matches!(err, SimError::Misuse(Misuse::TaskState { .. })));
    }
}
