//! Channel semantics: buffered/unbuffered send and receive, close.
//!
//! Blocked senders and receivers are served strictly in arrival order. A
//! select that parks registers on several channels at once; whichever
//! channel completes one of its cases first removes it from the others.

use super::{BlockedOn, Delivery, FailureReason, SyncState, SyncTaskState};
use crate::error::{Misuse, SimError, SimResult};
use rtlab_env::{ChannelId, TaskId};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// A sender parked with the value it wants to deliver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SendWaiter {
    pub task: TaskId,
    pub value: i64,
    /// Select case index when parked by a select
    pub case: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecvWaiter {
    pub task: TaskId,
    pub case: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Channel {
    pub id: ChannelId,
    /// 0 = unbuffered
    pub capacity: usize,
    pub buffer: VecDeque<i64>,
    pub senders: VecDeque<SendWaiter>,
    pub receivers: VecDeque<RecvWaiter>,
    pub closed: bool,
}

impl Channel {
    pub fn new(id: ChannelId, capacity: usize) -> Self {
        Self {
            id,
            capacity,
            buffer: VecDeque::new(),
            senders: VecDeque::new(),
            receivers: VecDeque::new(),
            closed: false,
        }
    }

    /// A send would complete (or fail on a closed channel) without parking.
    pub fn can_send(&self) -> bool {
        self.closed || !self.receivers.is_empty() || self.buffer.len() < self.capacity
    }

    /// A receive would complete without parking.
    pub fn can_recv(&self) -> bool {
        self.closed || !self.buffer.is_empty() || !self.senders.is_empty()
    }

    fn forget(&mut self, task: TaskId) {
        self.senders.retain(|w| w.task != task);
        self.receivers.retain(|w| w.task != task);
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ChannelEvent {
    /// Sender delivered straight to a parked receiver.
    Handoff {
        channel: ChannelId,
        from: TaskId,
        to: TaskId,
        value: i64,
    },
    Buffered {
        channel: ChannelId,
        task: TaskId,
        value: i64,
        len: usize,
    },
    SendBlocked {
        channel: ChannelId,
        task: TaskId,
        value: i64,
    },
    Received {
        channel: ChannelId,
        task: TaskId,
        value: i64,
        /// Parked sender released by this receive
        woke_sender: Option<TaskId>,
    },
    /// Closed and drained: zero value, `ok = false`.
    ReceivedZero { channel: ChannelId, task: TaskId },
    RecvBlocked { channel: ChannelId, task: TaskId },
    Closed {
        channel: ChannelId,
        woke_receivers: Vec<TaskId>,
        failed_senders: Vec<TaskId>,
    },
}

impl SyncState {
    pub(super) fn channel_mut(&mut self, id: ChannelId) -> SimResult<&mut Channel> {
        self.channels
            .get_mut(&id)
            .ok_or(SimError::Misuse(Misuse::UnknownChannel(id)))
    }

    /// Removes every channel registration of `task` (select siblings).
    pub(super) fn unregister(&mut self, task: TaskId) {
        for channel in self.channels.values_mut() {
            channel.forget(task);
        }
    }

    /// Completes a send if possible. `None` means the sender must park.
    pub(super) fn try_send(
        &mut self,
        task: TaskId,
        channel: ChannelId,
        value: i64,
    ) -> SimResult<Option<ChannelEvent>> {
        let ch = self.channel_mut(channel)?;
        if ch.closed {
            return Err(Misuse::SendOnClosed { channel, task }.into());
        }

        if let Some(receiver) = ch.receivers.pop_front() {
            self.wake(
                receiver.task,
                receiver.case,
                Some(Delivery {
                    channel,
                    value,
                    ok: true,
                }),
            );
            return Ok(Some(ChannelEvent::Handoff {
                channel,
                from: task,
                to: receiver.task,
                value,
            }));
        }

        if ch.buffer.len() < ch.capacity {
            ch.buffer.push_back(value);
            return Ok(Some(ChannelEvent::Buffered {
                channel,
                task,
                value,
                len: ch.buffer.len(),
            }));
        }

        Ok(None)
    }

    /// Completes a receive if possible. `None` means the receiver must park.
    pub(super) fn try_recv(
        &mut self,
        task: TaskId,
        channel: ChannelId,
    ) -> SimResult<Option<ChannelEvent>> {
        let ch = self.channel_mut(channel)?;

        let (event, delivery) = if let Some(value) = ch.buffer.pop_front() {
            // A parked sender moves into the slot just freed.
            let woke = ch.senders.pop_front();
            if let Some(sender) = &woke {
                ch.buffer.push_back(sender.value);
            }
            let woke_sender = woke.as_ref().map(|s| s.task);
            if let Some(sender) = woke {
                self.wake(sender.task, sender.case, None);
            }
            (
                ChannelEvent::Received {
                    channel,
                    task,
                    value,
                    woke_sender,
                },
                Delivery {
                    channel,
                    value,
                    ok: true,
                },
            )
        } else if let Some(sender) = ch.senders.pop_front() {
            self.wake(sender.task, sender.case, None);
            (
                ChannelEvent::Received {
                    channel,
                    task,
                    value: sender.value,
                    woke_sender: Some(sender.task),
                },
                Delivery {
                    channel,
                    value: sender.value,
                    ok: true,
                },
            )
        } else if ch.closed {
            (
                ChannelEvent::ReceivedZero { channel, task },
                Delivery {
                    channel,
                    value: 0,
                    ok: false,
                },
            )
        } else {
            return Ok(None);
        };

        if let Some(t) = self.tasks.get_mut(&task) {
            t.last_delivery = Some(delivery);
        }
        Ok(Some(event))
    }

    pub(super) fn park_sender(
        &mut self,
        task: TaskId,
        channel: ChannelId,
        value: i64,
        case: Option<usize>,
    ) -> SimResult<()> {
        self.channel_mut(channel)?
            .senders
            .push_back(SendWaiter { task, value, case });
        Ok(())
    }

    pub(super) fn park_receiver(
        &mut self,
        task: TaskId,
        channel: ChannelId,
        case: Option<usize>,
    ) -> SimResult<()> {
        self.channel_mut(channel)?
            .receivers
            .push_back(RecvWaiter { task, case });
        Ok(())
    }

    pub(super) fn send(&mut self, task: TaskId, channel: ChannelId, value: i64) -> SimResult<ChannelEvent> {
        if let Some(event) = self.try_send(task, channel, value)? {
            return Ok(event);
        }
        self.park_sender(task, channel, value, None)?;
        self.block(task, BlockedOn::Send { channel });
        Ok(ChannelEvent::SendBlocked { channel, task, value })
    }

    pub(super) fn recv(&mut self, task: TaskId, channel: ChannelId) -> SimResult<ChannelEvent> {
        if let Some(event) = self.try_recv(task, channel)? {
            return Ok(event);
        }
        self.park_receiver(task, channel, None)?;
        self.block(task, BlockedOn::Recv { channel });
        Ok(ChannelEvent::RecvBlocked { channel, task })
    }

    /// Closes a channel: parked receivers get zero values, parked senders fail.
    pub(super) fn close(&mut self, channel: ChannelId) -> SimResult<ChannelEvent> {
        let ch = self.channel_mut(channel)?;
        if ch.closed {
            return Err(Misuse::CloseOfClosed(channel).into());
        }
        ch.closed = true;
        let receivers: Vec<RecvWaiter> = ch.receivers.drain(..).collect();
        let senders: Vec<SendWaiter> = ch.senders.drain(..).collect();

        let woke_receivers = receivers.iter().map(|r| r.task).collect();
        for receiver in receivers {
            self.wake(
                receiver.task,
                receiver.case,
                Some(Delivery {
                    channel,
                    value: 0,
                    ok: false,
                }),
            );
        }

        let failed_senders = senders.iter().map(|s| s.task).collect();
        for sender in senders {
            self.unregister(sender.task);
            if let Some(t) = self.tasks.get_mut(&sender.task) {
                t.state = SyncTaskState::Failed(FailureReason::SendOnClosed { channel });
            }
        }

        Ok(ChannelEvent::Closed {
            channel,
            woke_receivers,
            failed_senders,
        })
    }
}
