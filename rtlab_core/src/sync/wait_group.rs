//! Wait group semantics.

use super::{BlockedOn, SyncState};
use crate::error::{Misuse, SimError, SimResult};
use rtlab_env::{TaskId, WaitGroupId};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WaitGroup {
    pub id: WaitGroupId,
    pub counter: i64,
    pub waiters: VecDeque<TaskId>,
}

impl WaitGroup {
    pub fn new(id: WaitGroupId) -> Self {
        Self {
            id,
            counter: 0,
            waiters: VecDeque::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum WaitGroupEvent {
    Added {
        wait_group: WaitGroupId,
        delta: i64,
        counter: i64,
        /// Waiters released because the counter reached zero
        woke: Vec<TaskId>,
    },
    WaitReturned { wait_group: WaitGroupId, task: TaskId },
    WaitBlocked {
        wait_group: WaitGroupId,
        task: TaskId,
        counter: i64,
    },
}

impl SyncState {
    fn wait_group_mut(&mut self, id: WaitGroupId) -> SimResult<&mut WaitGroup> {
        self.wait_groups
            .get_mut(&id)
            .ok_or(SimError::Misuse(Misuse::UnknownWaitGroup(id)))
    }

    /// Adjusts the counter; a negative or overflowing result is rejected
    /// untouched.
    pub(super) fn wg_add(&mut self, wait_group: WaitGroupId, delta: i64) -> SimResult<WaitGroupEvent> {
        let wg = self.wait_group_mut(wait_group)?;
        let counter = wg
            .counter
            .checked_add(delta)
            .ok_or(SimError::Misuse(Misuse::WaitGroupOverflow(wait_group)))?;
        if counter < 0 {
            return Err(Misuse::NegativeWaitGroup(wait_group).into());
        }
        wg.counter = counter;

        let woke: Vec<TaskId> = if counter == 0 {
            wg.waiters.drain(..).collect()
        } else {
            Vec::new()
        };
        for &task in &woke {
            self.wake(task, None, None);
        }

        Ok(WaitGroupEvent::Added {
            wait_group,
            delta,
            counter,
            woke,
        })
    }

    pub(super) fn wg_wait(&mut self, task: TaskId, wait_group: WaitGroupId) -> SimResult<WaitGroupEvent> {
        let wg = self.wait_group_mut(wait_group)?;
        if wg.counter == 0 {
            return Ok(WaitGroupEvent::WaitReturned { wait_group, task });
        }
        wg.waiters.push_back(task);
        let counter = wg.counter;
        self.block(task, BlockedOn::Wait { wait_group });
        Ok(WaitGroupEvent::WaitBlocked {
            wait_group,
            task,
            counter,
        })
    }
}
