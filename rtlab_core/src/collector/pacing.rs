//! Allocation pacing: when should the next cycle start?
//!
//! The heap goal grows with live data by `growth_ratio` (the analogue of
//! GOGC / 100) and never drops below the configured minimum. A cycle is
//! triggered once the heap has used `trigger_ratio` of the runway between the
//! live heap and the goal, leaving the rest for allocation during marking.
//!
//! These are pure functions so the pacing visualization can be driven without
//! running a mark/sweep cycle.

use serde::{Deserialize, Serialize};

/// Default fraction of the runway consumed before triggering.
pub const DEFAULT_TRIGGER_RATIO: f64 = 0.7;

/// Heap goal for the next cycle: `max(min_goal, live * (1 + growth_ratio))`.
pub fn heap_goal(live_bytes: u64, min_goal: u64, growth_ratio: f64) -> u64 {
    let grown = live_bytes as f64 * (1.0 + growth_ratio.max(0.0));
    // `as` saturates on overflow
    (grown.round() as u64).max(min_goal)
}

/// Byte threshold at which the next cycle starts, using the default ratio.
pub fn next_trigger_point(live_bytes: u64, heap_goal: u64, growth_ratio: f64) -> u64 {
    Pacer::default().next_trigger_point(live_bytes, heap_goal, growth_ratio)
}

/// Pacing parameters with an explicit trigger ratio.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Pacer {
    /// Fraction (0, 1] of the live-to-goal runway used before triggering
    pub trigger_ratio: f64,
}

impl Default for Pacer {
    fn default() -> Self {
        Self {
            trigger_ratio: DEFAULT_TRIGGER_RATIO,
        }
    }
}

/// Goal and trigger computed for one live-heap size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PacingPlan {
    pub live_bytes: u64,
    pub heap_goal: u64,
    pub trigger_point: u64,
}

impl Pacer {
    pub fn new(trigger_ratio: f64) -> Self {
        Self { trigger_ratio }
    }

    /// Byte threshold at which the next cycle starts.
    pub fn next_trigger_point(&self, live_bytes: u64, heap_goal: u64, growth_ratio: f64) -> u64 {
        self.plan(live_bytes, heap_goal, growth_ratio).trigger_point
    }

    /// Full plan: goal for the next cycle and its trigger point.
    pub fn plan(&self, live_bytes: u64, min_goal: u64, growth_ratio: f64) -> PacingPlan {
        let goal = heap_goal(live_bytes, min_goal, growth_ratio);
        let runway = goal.saturating_sub(live_bytes) as f64;
        let used = (runway * self.trigger_ratio.clamp(0.0, 1.0)).round() as u64;
        PacingPlan {
            live_bytes,
            heap_goal: goal,
            trigger_point: live_bytes.saturating_add(used).min(goal),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_goal_grows_with_live_heap() {
        assert_eq!(heap_goal(1000, 0, 1.0), 2000);
        assert_eq!(heap_goal(1000, 4096, 1.0), 4096);
        assert_eq!(heap_goal(1000, 0, 0.5), 1500);
    }

    #[test]
    fn test_negative_growth_is_treated_as_zero() {
        assert_eq!(heap_goal(1000, 0, -3.0), 1000);
    }

    #[test]
    fn test_trigger_sits_inside_runway() {
        // goal 2000, runway 1000, 70% of it used
        assert_eq!(next_trigger_point(1000, 0, 1.0), 1700);

        let eager = Pacer::new(0.25);
        assert_eq!(eager.next_trigger_point(1000, 0, 1.0), 1250);

        let late = Pacer::new(1.0);
        assert_eq!(late.next_trigger_point(1000, 0, 1.0), 2000);
    }

    #[test]
    fn test_min_goal_dominates_small_heaps() {
        let plan = Pacer::new(0.5).plan(0, 4096, 1.0);
        assert_eq!(plan.heap_goal, 4096);
        assert_eq!(plan.trigger_point, 2048);
    }

    #[test]
    fn test_trigger_never_exceeds_goal() {
        let plan = Pacer::new(5.0).plan(100, 0, 1.0);
        assert!(plan.trigger_point <= plan.heap_goal);
        assert!(plan.trigger_point >= plan.live_bytes);
    }
}
