//! Select over several channel operations.

use super::{BlockedOn, ChannelEvent, SelectPolicy, SyncState};
use crate::engine::{invariant_violation, seeded_rng};
use crate::error::{Misuse, SimError, SimResult};
use rand::seq::SliceRandom;
use rtlab_env::{ChannelId, TaskId};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "kebab-case")]
pub enum SelectCase {
    Send { channel: ChannelId, value: i64 },
    Recv { channel: ChannelId },
}

impl SelectCase {
    pub fn channel(&self) -> ChannelId {
        match self {
            SelectCase::Send { channel, .. } | SelectCase::Recv { channel } => *channel,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum SelectEvent {
    Chosen {
        task: TaskId,
        case: usize,
        /// Every case that was ready when the choice was made
        ready: Vec<usize>,
        outcome: ChannelEvent,
    },
    Default { task: TaskId },
    Blocked { task: TaskId, channels: Vec<ChannelId> },
}

impl SyncState {
    fn ready_cases(&self, cases: &[SelectCase]) -> SimResult<Vec<usize>> {
        let mut ready = Vec::new();
        for (index, case) in cases.iter().enumerate() {
            let ch = self
                .channels
                .get(&case.channel())
                .ok_or(SimError::Misuse(Misuse::UnknownChannel(case.channel())))?;
            let is_ready = match case {
                SelectCase::Send { .. } => ch.can_send(),
                SelectCase::Recv { .. } => ch.can_recv(),
            };
            if is_ready {
                ready.push(index);
            }
        }
        Ok(ready)
    }

    pub(super) fn select(
        &mut self,
        task: TaskId,
        cases: &[SelectCase],
        default: bool,
    ) -> SimResult<SelectEvent> {
        if cases.is_empty() && !default {
            return Err(Misuse::EmptySelect.into());
        }

        let ready = self.ready_cases(cases)?;
        if let Some(&first) = ready.first() {
            let case = match self.config.select_policy {
                SelectPolicy::FirstReady => first,
                SelectPolicy::UniformRandom(seed) => {
                    let mut rng = seeded_rng(seed, self.step);
                    ready.choose(&mut rng).copied().unwrap_or(first)
                }
            };

            let outcome = match &cases[case] {
                SelectCase::Send { channel, value } => self.try_send(task, *channel, *value)?,
                SelectCase::Recv { channel } => self.try_recv(task, *channel)?,
            };
            let outcome = match outcome {
                Some(outcome) => outcome,
                None => {
                    return Err(invariant_violation(
                        "sync",
                        &*self,
                        format!("ready select case {case} of {task} did not complete"),
                    ))
                }
            };
            if let Some(t) = self.tasks.get_mut(&task) {
                t.selected_case = Some(case);
            }
            return Ok(SelectEvent::Chosen {
                task,
                case,
                ready,
                outcome,
            });
        }

        if default {
            return Ok(SelectEvent::Default { task });
        }

        let mut channels = Vec::new();
        for (index, case) in cases.iter().enumerate() {
            match case {
                SelectCase::Send { channel, value } => {
                    self.park_sender(task, *channel, *value, Some(index))?
                }
                SelectCase::Recv { channel } => self.park_receiver(task, *channel, Some(index))?,
            }
            if !channels.contains(&case.channel()) {
                channels.push(case.channel());
            }
        }
        self.block(
            task,
            BlockedOn::Select {
                channels: channels.clone(),
            },
        );
        Ok(SelectEvent::Blocked { task, channels })
    }
}

#[cfg(test)]
mod tests {
    use super::super::tests::{act, try_act, world, world_with};
    use super::super::{SyncAction, SyncConfig, SyncEvent, SyncTaskState};
    use super::*;

    fn select(task: u32, cases: Vec<SelectCase>, default: bool) -> SyncAction {
        SyncAction::Select {
            task: TaskId(task),
            cases,
            default,
        }
    }

    fn recv_case(channel: u32) -> SelectCase {
        SelectCase::Recv {
            channel: ChannelId(channel),
        }
    }

    fn send(task: u32, channel: u32, value: i64) -> SyncAction {
        SyncAction::Send {
            task: TaskId(task),
            channel: ChannelId(channel),
            value,
        }
    }

    fn two_ready_channels(policy: SelectPolicy) -> SyncState {
        let mut state = world_with(SyncConfig {
            task_count: 2,
            channel_capacities: vec![1, 1],
            select_policy: policy,
            ..Default::default()
        });
        state = act(&state, send(0, 0, 100)).0;
        act(&state, send(0, 1, 200)).0
    }

    #[test]
    fn test_empty_select_without_default_is_misuse() {
        let state = world(1, vec![]);
        let err = try_act(&state, select(0, vec![], false)).unwrap_err();
        assert_eq!(err, SimError::Misuse(Misuse::EmptySelect));

        let (_, event) = act(&state, select(0, vec![], true));
        assert_eq!(event, SyncEvent::Select(SelectEvent::Default { task: TaskId(0) }));
    }

    #[test]
    fn test_first_ready_takes_declaration_order() {
        let state = two_ready_channels(SelectPolicy::FirstReady);
        let (next, event) = act(&state, select(1, vec![recv_case(1), recv_case(0)], false));
        match event {
            SyncEvent::Select(SelectEvent::Chosen { case, ready, .. }) => {
                assert_eq!(case, 0);
                assert_eq!(ready, vec![0, 1]);
            }
            other => panic!("unexpected event {other:?}"),
        }
        let delivery = next.tasks[&TaskId(1)].last_delivery.clone().unwrap();
        assert_eq!(delivery.value, 200);
        assert_eq!(next.tasks[&TaskId(1)].selected_case, Some(0));
    }

    #[test]
    fn test_uniform_choice_is_reproducible_per_seed() {
        let cases = vec![recv_case(0), recv_case(1)];
        let pick = |seed: u64| {
            let state = two_ready_channels(SelectPolicy::UniformRandom(seed));
            act(&state, select(1, cases.clone(), false)).1
        };
        assert_eq!(pick(3), pick(3));

        // Both cases get chosen across a range of seeds.
        let chosen: std::collections::BTreeSet<usize> = (0..32)
            .filter_map(|seed| match pick(seed) {
                SyncEvent::Select(SelectEvent::Chosen { case, .. }) => Some(case),
                _ => None,
            })
            .collect();
        assert_eq!(chosen.len(), 2);
    }

    #[test]
    fn test_default_taken_when_nothing_ready() {
        let state = world(1, vec![0]);
        let (next, event) = act(&state, select(0, vec![recv_case(0)], true));
        assert_eq!(event, SyncEvent::Select(SelectEvent::Default { task: TaskId(0) }));
        assert_eq!(next.tasks[&TaskId(0)].state, SyncTaskState::Ready);
    }

    #[test]
    fn test_parked_select_is_removed_from_other_channels() {
        let state = world(2, vec![0, 0]);
        let (state, event) = act(&state, select(1, vec![recv_case(0), recv_case(1)], false));
        assert_eq!(
            event,
            SyncEvent::Select(SelectEvent::Blocked {
                task: TaskId(1),
                channels: vec![ChannelId(0), ChannelId(1)]
            })
        );
        assert_eq!(state.channels[&ChannelId(1)].receivers.len(), 1);

        let (state, event) = act(&state, send(0, 1, 7));
        assert!(matches!(
            event,
            SyncEvent::Channel(ChannelEvent::Handoff { to: TaskId(1), .. })
        ));
        let task = &state.tasks[&TaskId(1)];
        assert_eq!(task.state, SyncTaskState::Ready);
        assert_eq!(task.selected_case, Some(1));
        assert!(state.channels[&ChannelId(0)].receivers.is_empty());
    }
}
