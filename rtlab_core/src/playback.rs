//! Playback control over a recorded timeline.
//!
//! [`PlaybackController`] is a synchronous state machine: every transition
//! runs to completion. [`Player`] shares one controller behind a lock and
//! drives auto-play from a [`PlaybackClock`] timer task.
//!
//! Auto-play is cancelled by epoch: `play` hands out a fresh epoch, `pause`
//! and `stop` bump it, and `tick` ignores any epoch that is not current. A
//! timer that already fired when the user paused therefore does nothing.

use crate::engine::Engine;
use crate::error::{Misuse, SimError, SimResult};
use crate::timeline::{EngineSnapshot, EngineTimeline, Snapshot, Timeline};
use rtlab_env::PlaybackClock;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Default auto-play interval.
pub const DEFAULT_INTERVAL: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PlaybackState {
    Stopped,
    Playing,
    Paused,
}

/// One scripted step: an action, or `None` to let the engine advance.
pub type ScriptStep<E> = Option<<E as Engine>::Action>;

pub struct PlaybackController<E: Engine> {
    engine: E,
    config: Option<E::Config>,
    timeline: EngineTimeline<E>,
    position: usize,
    script: Vec<ScriptStep<E>>,
    state: PlaybackState,
    epoch: u64,
    interval: Duration,
}

impl<E: Engine> PlaybackController<E> {
    /// Uninitialized controller; call [`reset`](Self::reset) first.
    pub fn new(engine: E) -> Self {
        Self {
            engine,
            config: None,
            timeline: Timeline::new(),
            position: 0,
            script: Vec::new(),
            state: PlaybackState::Stopped,
            epoch: 0,
            interval: DEFAULT_INTERVAL,
        }
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn config(&self) -> Option<&E::Config> {
        self.config.as_ref()
    }

    pub fn timeline(&self) -> &EngineTimeline<E> {
        &self.timeline
    }

    pub fn position(&self) -> usize {
        self.position
    }

    pub fn state(&self) -> PlaybackState {
        self.state
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    fn ensure_initialized(&self) -> SimResult<()> {
        if self.config.is_none() || self.timeline.is_empty() {
            return Err(Misuse::NotInitialized.into());
        }
        Ok(())
    }

    /// Snapshot at the current position.
    pub fn current(&self) -> SimResult<&EngineSnapshot<E>> {
        self.ensure_initialized()?;
        self.timeline
            .at(self.position)
            .ok_or(SimError::Misuse(Misuse::NotInitialized))
    }

    fn at_tip(&self) -> bool {
        self.timeline.tip_index() == Some(self.position)
    }

    fn script_exhausted(&self) -> bool {
        self.timeline
            .tip()
            .map_or(true, |tip| tip.script_cursor >= self.script.len())
    }

    /// Engine completion at the current position.
    pub fn is_complete(&self) -> bool {
        self.current()
            .map(|snapshot| self.engine.is_complete(&snapshot.state))
            .unwrap_or(false)
    }

    /// Nothing left to replay, script or complete.
    pub fn is_finished(&self) -> bool {
        self.at_tip() && self.script_exhausted() && self.is_complete()
    }

    /// Validates `config`, discards history and records snapshot 0.
    pub fn reset(&mut self, config: E::Config) -> SimResult<()> {
        let state = self.engine.initial(&config)?;
        self.timeline.clear();
        self.timeline.append(Snapshot {
            index: 0,
            state,
            event: None,
            action: None,
            script_cursor: 0,
        })?;
        self.config = Some(config);
        self.position = 0;
        self.state = PlaybackState::Stopped;
        self.epoch += 1;
        info!(engine = self.engine.name(), "playback reset");
        Ok(())
    }

    /// Replaces the scenario script. Recorded history past index 0 was
    /// produced by the old script and is discarded.
    pub fn load_script(&mut self, script: Vec<ScriptStep<E>>) {
        self.script = script;
        if !self.timeline.is_empty() {
            self.timeline.truncate_after(0);
            self.position = 0;
        }
    }

    pub fn script(&self) -> &[ScriptStep<E>] {
        &self.script
    }

    /// Moves forward one index: replay when behind the tip, otherwise the
    /// next scripted step (or a plain tick) goes through the engine.
    pub fn step(&mut self) -> SimResult<&EngineSnapshot<E>> {
        self.ensure_initialized()?;
        if !self.at_tip() {
            self.position += 1;
            return self.current();
        }

        let cursor = self.timeline.tip().map_or(0, |tip| tip.script_cursor);
        match self.script.get(cursor).cloned() {
            Some(step) => self.advance(step, cursor + 1),
            None => self.advance(None, cursor),
        }
    }

    /// Injects a user action. Behind the tip, a successful step discards the
    /// recorded future; a failed one leaves the timeline untouched.
    pub fn apply(&mut self, action: E::Action) -> SimResult<&EngineSnapshot<E>> {
        self.ensure_initialized()?;
        let cursor = self.current()?.script_cursor;
        self.advance(Some(action), cursor)
    }

    fn advance(
        &mut self,
        action: Option<E::Action>,
        script_cursor: usize,
    ) -> SimResult<&EngineSnapshot<E>> {
        let prior = self.current()?;
        let (state, event) = self.engine.step(&prior.state, action.as_ref())?;
        if !self.at_tip() {
            debug!(
                engine = self.engine.name(),
                position = self.position,
                discarded = self.timeline.len() - self.position - 1,
                "branching timeline"
            );
            self.timeline.truncate_after(self.position);
        }
        let index = self.timeline.len();
        debug!(engine = self.engine.name(), index, ?event, "step");

        self.timeline.append(Snapshot {
            index,
            state,
            event: Some(event),
            action,
            script_cursor,
        })?;
        self.position = index;
        self.current()
    }

    pub fn back(&mut self) -> SimResult<&EngineSnapshot<E>> {
        self.ensure_initialized()?;
        if self.position == 0 {
            return Err(Misuse::AtTimelineStart.into());
        }
        self.position -= 1;
        self.current()
    }

    pub fn jump_to(&mut self, index: usize) -> SimResult<&EngineSnapshot<E>> {
        self.ensure_initialized()?;
        if index >= self.timeline.len() {
            return Err(Misuse::IndexOutOfRange {
                index,
                len: self.timeline.len(),
            }
            .into());
        }
        self.position = index;
        self.current()
    }

    /// Starts auto-play and returns the epoch the timer must present.
    pub fn play(&mut self, interval: Duration) -> SimResult<u64> {
        self.ensure_initialized()?;
        self.state = PlaybackState::Playing;
        self.interval = interval;
        self.epoch += 1;
        Ok(self.epoch)
    }

    pub fn pause(&mut self) {
        if self.state == PlaybackState::Playing {
            self.state = PlaybackState::Paused;
        }
        self.epoch += 1;
    }

    /// Halts auto-play and rewinds to index 0.
    pub fn stop(&mut self) -> SimResult<()> {
        self.ensure_initialized()?;
        self.state = PlaybackState::Stopped;
        self.epoch += 1;
        self.position = 0;
        Ok(())
    }

    /// One auto-play step. Returns whether auto-play should continue.
    ///
    /// Stale epochs and non-playing states are ignored. Completion and
    /// errors pause playback; errors are also returned.
    pub fn tick(&mut self, epoch: u64) -> SimResult<bool> {
        if self.state != PlaybackState::Playing || epoch != self.epoch {
            return Ok(false);
        }
        if self.is_finished() {
            self.pause();
            return Ok(false);
        }

        if let Err(err) = self.step() {
            warn!(engine = self.engine.name(), error = %err, "auto-play stopped");
            self.pause();
            return Err(err);
        }

        if self.is_finished() {
            info!(
                engine = self.engine.name(),
                index = self.position,
                "scenario complete, pausing"
            );
            self.pause();
            return Ok(false);
        }
        Ok(true)
    }
}

// =============================================================================
// ASYNC AUTO-PLAY
// =============================================================================

/// Drives a shared controller from a clock's timer task.
pub struct Player<E: Engine, C: PlaybackClock> {
    controller: Arc<Mutex<PlaybackController<E>>>,
    clock: Arc<C>,
}

impl<E: Engine, C: PlaybackClock> Clone for Player<E, C> {
    fn clone(&self) -> Self {
        Self {
            controller: Arc::clone(&self.controller),
            clock: Arc::clone(&self.clock),
        }
    }
}

impl<E: Engine, C: PlaybackClock> Player<E, C> {
    pub fn new(controller: PlaybackController<E>, clock: Arc<C>) -> Self {
        Self {
            controller: Arc::new(Mutex::new(controller)),
            clock,
        }
    }

    /// Locks the controller for one or more transitions.
    pub fn lock(&self) -> MutexGuard<'_, PlaybackController<E>> {
        self.controller.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Starts auto-play: a timer task ticks the controller every `interval`
    /// until the epoch goes stale, the scenario completes or a step fails.
    pub fn play(&self, interval: Duration) -> SimResult<u64> {
        let epoch = self.lock().play(interval)?;
        let controller = Arc::clone(&self.controller);
        let clock = Arc::clone(&self.clock);

        self.clock.spawn("playback", async move {
            loop {
                clock.sleep(interval).await;
                let keep_going = {
                    let mut guard = controller.lock().unwrap_or_else(PoisonError::into_inner);
                    matches!(guard.tick(epoch), Ok(true))
                };
                if !keep_going {
                    break;
                }
            }
        });
        Ok(epoch)
    }

    pub fn pause(&self) {
        self.lock().pause();
    }

    pub fn stop(&self) -> SimResult<()> {
        self.lock().stop()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::{SchedulerAction, SchedulerConfig, SchedulerEngine, SchedulerEvent};
    use rtlab_env::{TaskId, TokioClock, WorkerId};

    fn controller() -> PlaybackController<SchedulerEngine> {
        let mut c = PlaybackController::new(SchedulerEngine);
        c.reset(SchedulerConfig {
            worker_count: 2,
            ..Default::default()
        })
        .unwrap();
        c
    }

    fn spawn_on(worker: u32) -> SchedulerAction {
        SchedulerAction::Spawn {
            target: Some(WorkerId(worker)),
        }
    }

    /// Spawn, run and complete a single task.
    fn short_script() -> Vec<ScriptStep<SchedulerEngine>> {
        vec![
            Some(spawn_on(0)),
            None,
            Some(SchedulerAction::Complete { task: TaskId(0) }),
        ]
    }

    #[test]
    fn test_uninitialized_operations_are_misuse() {
        let mut c = PlaybackController::new(SchedulerEngine);
        let not_init = SimError::Misuse(Misuse::NotInitialized);
        assert_eq!(c.step().unwrap_err(), not_init);
        assert_eq!(c.back().unwrap_err(), not_init);
        assert_eq!(c.play(DEFAULT_INTERVAL).unwrap_err(), not_init);
        assert_eq!(c.apply(spawn_on(0)).unwrap_err(), not_init);
    }

    #[test]
    fn test_reset_rejects_bad_config_without_touching_timeline() {
        let mut c = controller();
        c.step().unwrap();
        let err = c
            .reset(SchedulerConfig {
                worker_count: 0,
                ..Default::default()
            })
            .unwrap_err();
        assert!(matches!(err, SimError::Config(_)));
        assert_eq!(c.timeline().len(), 2);
    }

    #[test]
    fn test_back_at_start_is_misuse() {
        let mut c = controller();
        assert_eq!(c.back().unwrap_err(), SimError::Misuse(Misuse::AtTimelineStart));
    }

    #[test]
    fn test_step_back_step_replays_without_engine() {
        let mut c = controller();
        c.load_script(short_script());
        let first = c.step().unwrap().clone();
        c.step().unwrap();
        c.back().unwrap();
        c.back().unwrap();
        assert_eq!(c.position(), 0);

        let replayed = c.step().unwrap().clone();
        assert_eq!(replayed, first);
        assert_eq!(c.timeline().len(), 3);
    }

    #[test]
    fn test_jump_to_is_idempotent() {
        let mut c = controller();
        c.load_script(short_script());
        for _ in 0..3 {
            c.step().unwrap();
        }
        let a = c.jump_to(1).unwrap().clone();
        let b = c.jump_to(1).unwrap().clone();
        assert_eq!(a, b);
        assert_eq!(
            c.jump_to(4).unwrap_err(),
            SimError::Misuse(Misuse::IndexOutOfRange { index: 4, len: 4 })
        );
    }

    #[test]
    fn test_apply_behind_tip_discards_future() {
        let mut c = controller();
        c.load_script(short_script());
        for _ in 0..3 {
            c.step().unwrap();
        }
        c.jump_to(1).unwrap();
        let snapshot = c.apply(spawn_on(1)).unwrap();
        assert_eq!(snapshot.index, 2);
        assert_eq!(snapshot.script_cursor, 1);
        assert_eq!(c.timeline().len(), 3);

        // The script resumes where the branch point left it.
        let next = c.step().unwrap();
        assert_eq!(next.action, None);
        assert_eq!(next.script_cursor, 2);
    }

    #[test]
    fn test_misuse_behind_tip_keeps_future() {
        let mut c = controller();
        c.load_script(short_script());
        for _ in 0..3 {
            c.step().unwrap();
        }
        c.jump_to(1).unwrap();
        let err = c.apply(SchedulerAction::Complete { task: TaskId(0) }).unwrap_err();
        assert!(err.is_misuse());
        assert_eq!(c.timeline().len(), 4);
        assert_eq!(c.position(), 1);
    }

    #[test]
    fn test_step_at_tip_consumes_script_then_ticks() {
        let mut c = controller();
        c.load_script(vec![Some(spawn_on(1))]);
        let s = c.step().unwrap();
        assert_eq!(s.action, Some(spawn_on(1)));
        let s = c.step().unwrap();
        assert_eq!(s.action, None);
        assert!(matches!(s.event, Some(SchedulerEvent::Steal { .. })));
    }

    #[test]
    fn test_stop_rewinds_and_invalidates_epoch() {
        let mut c = controller();
        c.load_script(short_script());
        let epoch = c.play(Duration::from_millis(1)).unwrap();
        assert!(c.tick(epoch).unwrap());
        c.stop().unwrap();
        assert_eq!(c.position(), 0);
        assert_eq!(c.state(), PlaybackState::Stopped);
        assert!(!c.tick(epoch).unwrap());
    }

    #[test]
    fn test_stale_epoch_after_pause_is_ignored() {
        let mut c = controller();
        c.load_script(short_script());
        let epoch = c.play(Duration::from_millis(1)).unwrap();
        c.pause();
        assert!(!c.tick(epoch).unwrap());
        assert_eq!(c.position(), 0);

        let epoch = c.play(Duration::from_millis(1)).unwrap();
        assert!(c.tick(epoch).unwrap());
        assert_eq!(c.position(), 1);
    }

    #[test]
    fn test_tick_pauses_on_completion() {
        let mut c = controller();
        c.load_script(short_script());
        let epoch = c.play(Duration::from_millis(1)).unwrap();
        assert!(c.tick(epoch).unwrap());
        assert!(c.tick(epoch).unwrap());
        assert!(!c.tick(epoch).unwrap());
        assert_eq!(c.state(), PlaybackState::Paused);
        assert!(c.is_complete());
    }

    #[test]
    fn test_tick_pauses_on_error() {
        let mut c = controller();
        c.load_script(vec![Some(SchedulerAction::Complete { task: TaskId(3) })]);
        let epoch = c.play(Duration::from_millis(1)).unwrap();
        assert!(c.tick(epoch).unwrap_err().is_misuse());
        assert_eq!(c.state(), PlaybackState::Paused);
        assert_eq!(c.timeline().len(), 1);
    }

    #[tokio::test]
    async fn test_player_runs_script_to_completion() {
        let mut c = PlaybackController::new(SchedulerEngine);
        c.reset(SchedulerConfig::default()).unwrap();
        c.load_script(short_script());
        let player = Player::new(c, TokioClock::shared());

        player.play(Duration::from_millis(1)).unwrap();
        for _ in 0..200 {
            if player.lock().state() == PlaybackState::Paused {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        let guard = player.lock();
        assert_eq!(guard.state(), PlaybackState::Paused);
        assert_eq!(guard.position(), 3);
        assert!(guard.is_finished());
    }

    #[tokio::test]
    async fn test_player_pause_cancels_timer() {
        let mut c = PlaybackController::new(SchedulerEngine);
        c.reset(SchedulerConfig::default()).unwrap();
        let player = Player::new(c, TokioClock::shared());

        player.play(Duration::from_millis(50)).unwrap();
        player.pause();
        tokio::time::sleep(Duration::from_millis(120)).await;
        assert_eq!(player.lock().position(), 0);
    }
}
