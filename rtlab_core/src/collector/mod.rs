//! The "COLLECTOR" Engine - incremental tricolor mark & sweep
//!
//! Phases cycle `idle → marking → sweeping → idle`:
//! - **Marking**: one grey object is blackened per step and its white
//!   children are shaded grey. A write barrier shades the target of any
//!   reference stored into a black object, so no black → white edge survives.
//! - **Sweeping**: one unreachable (white) object is reclaimed per step; the
//!   last step recolors survivors white and re-plans pacing.
//!
//! Cycles start on an explicit trigger or when allocation crosses the pacing
//! trigger point (see [`pacing`]).

pub mod pacing;

use crate::engine::{invariant_violation, Engine};
use crate::error::{Misuse, SimError, SimResult};
use pacing::Pacer;
use rtlab_env::ObjectId;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, VecDeque};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Color {
    White,
    Grey,
    Black,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum GcPhase {
    Idle,
    Marking,
    Sweeping,
}

/// Why a cycle started.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum GcTrigger {
    Manual,
    Pacing,
}

/// A logical heap record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeapObject {
    pub id: ObjectId,
    pub color: Color,
    pub refs: BTreeSet<ObjectId>,
    pub size_bytes: u64,
    /// Directly referenced by the simulated roots (stacks, globals)
    pub root: bool,
    /// Transitively reachable from some root, as of the end of the last step
    pub reachable_from_root: bool,
}

/// Collector scenario parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectorConfig {
    /// Minimum heap goal in bytes
    pub heap_goal_bytes: u64,

    /// Goal growth over live data per cycle (GOGC / 100)
    pub growth_ratio: f64,

    /// Fraction of the live-to-goal runway allocated before triggering
    pub trigger_ratio: f64,

    /// Objects present at index 0
    pub initial_object_count: usize,

    /// Size of each initial object
    pub object_size_bytes: u64,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            heap_goal_bytes: 4096,
            growth_ratio: 1.0,
            trigger_ratio: pacing::DEFAULT_TRIGGER_RATIO,
            initial_object_count: 8,
            object_size_bytes: 64,
        }
    }
}

impl CollectorConfig {
    fn validate(&self) -> SimResult<()> {
        if self.heap_goal_bytes == 0 {
            return Err(SimError::config("heap_goal_bytes must be positive"));
        }
        if !self.growth_ratio.is_finite() || self.growth_ratio < 0.0 {
            return Err(SimError::config("growth_ratio must be a finite, non-negative number"));
        }
        if !(self.trigger_ratio > 0.0 && self.trigger_ratio <= 1.0) {
            return Err(SimError::config("trigger_ratio must be in (0, 1]"));
        }
        if self.object_size_bytes == 0 {
            return Err(SimError::config("object_size_bytes must be positive"));
        }
        if u32::try_from(self.initial_object_count).is_err() {
            return Err(SimError::config("initial_object_count is too large"));
        }
        let total = u64::try_from(self.initial_object_count)
            .ok()
            .and_then(|n| n.checked_mul(self.object_size_bytes));
        if total.is_none() {
            return Err(SimError::config("initial heap size overflows u64"));
        }
        Ok(())
    }

    fn pacer(&self) -> Pacer {
        Pacer::new(self.trigger_ratio)
    }
}

/// Mutator and control actions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum CollectorAction {
    Allocate {
        size_bytes: u64,
        root: bool,
        referenced_by: Option<ObjectId>,
    },
    AddRef { from: ObjectId, to: ObjectId },
    RemoveRef { from: ObjectId, to: ObjectId },
    AddRoot { object: ObjectId },
    RemoveRoot { object: ObjectId },
    TriggerGc,
}

/// Totals reported when a cycle finishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CycleSummary {
    pub objects_freed: usize,
    pub bytes_reclaimed: u64,
    pub duration_steps: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum CollectorEvent {
    Idle,
    Allocate {
        object: ObjectId,
        size_bytes: u64,
        heap_bytes: u64,
        triggered_gc: bool,
    },
    RefAdded {
        from: ObjectId,
        to: ObjectId,
        /// Object shaded by the write barrier
        shaded: Option<ObjectId>,
    },
    RefRemoved { from: ObjectId, to: ObjectId, existed: bool },
    RootAdded { object: ObjectId, shaded: bool },
    RootRemoved { object: ObjectId },
    GcStart { reason: GcTrigger, roots: usize },
    MarkObject { object: ObjectId, shaded: Vec<ObjectId> },
    MarkTermination { marked: usize },
    SweepObject { object: ObjectId, bytes: u64 },
    GcCycleComplete(CycleSummary),
}

/// Book-keeping for the cycle in progress.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CycleProgress {
    pub reason: GcTrigger,
    pub started_at: u64,
    pub objects_freed: usize,
    pub bytes_reclaimed: u64,
}

/// One collector snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectorState {
    pub config: CollectorConfig,
    pub objects: BTreeMap<ObjectId, HeapObject>,
    pub phase: GcPhase,
    /// Grey worklist in shading order
    pub grey: VecDeque<ObjectId>,
    pub heap_goal: u64,
    pub trigger_point: u64,
    pub cycle: Option<CycleProgress>,
    pub completed_cycles: u32,
    pub last_cycle: Option<CycleSummary>,
    pub step: u64,
    next_object: u32,
}

impl CollectorState {
    fn new(config: &CollectorConfig) -> Self {
        let n = config.initial_object_count as u32;
        let mut objects = BTreeMap::new();
        for i in 0..n {
            let mut refs = BTreeSet::new();
            // Roots own a child; the `2 mod 4` pairs are unreachable garbage.
            if (i % 4 == 0 || i % 4 == 2) && i + 1 < n {
                refs.insert(ObjectId(i + 1));
            }
            objects.insert(
                ObjectId(i),
                HeapObject {
                    id: ObjectId(i),
                    color: Color::White,
                    refs,
                    size_bytes: config.object_size_bytes,
                    root: i % 4 == 0,
                    reachable_from_root: false,
                },
            );
        }

        let mut state = Self {
            config: config.clone(),
            objects,
            phase: GcPhase::Idle,
            grey: VecDeque::new(),
            heap_goal: config.heap_goal_bytes,
            trigger_point: 0,
            cycle: None,
            completed_cycles: 0,
            last_cycle: None,
            step: 0,
            next_object: n,
        };
        state.refresh_reachability();
        state.replan();
        state
    }

    /// Total bytes of every object still on the heap.
    pub fn heap_bytes(&self) -> u64 {
        self.objects
            .values()
            .fold(0u64, |total, o| total.saturating_add(o.size_bytes))
    }

    /// Number of objects of a given color.
    pub fn count(&self, color: Color) -> usize {
        self.objects.values().filter(|o| o.color == color).count()
    }

    pub fn roots(&self) -> impl Iterator<Item = &HeapObject> {
        self.objects.values().filter(|o| o.root)
    }

    /// Objects reachable from the roots by following references.
    pub fn live_set(&self) -> BTreeSet<ObjectId> {
        let mut live = BTreeSet::new();
        let mut stack: Vec<ObjectId> = self.roots().map(|o| o.id).collect();
        while let Some(id) = stack.pop() {
            if !live.insert(id) {
                continue;
            }
            if let Some(object) = self.objects.get(&id) {
                stack.extend(object.refs.iter().filter(|r| !live.contains(r)));
            }
        }
        live
    }

    fn refresh_reachability(&mut self) {
        let live = self.live_set();
        for object in self.objects.values_mut() {
            object.reachable_from_root = live.contains(&object.id);
        }
    }

    fn replan(&mut self) {
        let plan = self.config.pacer().plan(
            self.heap_bytes(),
            self.config.heap_goal_bytes,
            self.config.growth_ratio,
        );
        self.heap_goal = plan.heap_goal;
        self.trigger_point = plan.trigger_point;
    }

    fn object(&self, id: ObjectId) -> SimResult<&HeapObject> {
        self.objects.get(&id).ok_or(SimError::Misuse(Misuse::UnknownObject(id)))
    }

    /// Rejects objects the mutator can no longer reach during a sweep.
    fn reachable(&self, id: ObjectId) -> SimResult<&HeapObject> {
        let object = self.object(id)?;
        if self.phase == GcPhase::Sweeping && object.color == Color::White {
            return Err(Misuse::UnreachableObject(id).into());
        }
        Ok(object)
    }

    /// Shades a white object grey. Returns true if it changed color.
    fn shade(&mut self, id: ObjectId) -> bool {
        match self.objects.get_mut(&id) {
            Some(object) if object.color == Color::White => {
                object.color = Color::Grey;
                self.grey.push_back(id);
                true
            }
            _ => false,
        }
    }

    fn start_cycle(&mut self, reason: GcTrigger) -> usize {
        self.phase = GcPhase::Marking;
        self.cycle = Some(CycleProgress {
            reason,
            started_at: self.step,
            objects_freed: 0,
            bytes_reclaimed: 0,
        });
        let roots: Vec<ObjectId> = self.roots().map(|o| o.id).collect();
        for &root in &roots {
            self.shade(root);
        }
        roots.len()
    }

    // -------------------------------------------------------------------------
    // Tick
    // -------------------------------------------------------------------------

    fn advance(&mut self) -> CollectorEvent {
        match self.phase {
            GcPhase::Idle => CollectorEvent::Idle,
            GcPhase::Marking => self.mark_one(),
            GcPhase::Sweeping => self.sweep_one(),
        }
    }

    fn mark_one(&mut self) -> CollectorEvent {
        let Some(id) = self.grey.pop_front() else {
            self.phase = GcPhase::Sweeping;
            return CollectorEvent::MarkTermination {
                marked: self.count(Color::Black),
            };
        };

        let children: Vec<ObjectId> = match self.objects.get_mut(&id) {
            Some(object) => {
                object.color = Color::Black;
                object.refs.iter().copied().collect()
            }
            None => Vec::new(),
        };
        let shaded = children.into_iter().filter(|&child| self.shade(child)).collect();
        CollectorEvent::MarkObject { object: id, shaded }
    }

    fn sweep_one(&mut self) -> CollectorEvent {
        let victim = self
            .objects
            .values()
            .find(|o| o.color == Color::White)
            .map(|o| o.id);

        if let Some(id) = victim {
            let bytes = self.objects.remove(&id).map_or(0, |o| o.size_bytes);
            for object in self.objects.values_mut() {
                object.refs.remove(&id);
            }
            if let Some(cycle) = self.cycle.as_mut() {
                cycle.objects_freed += 1;
                cycle.bytes_reclaimed = cycle.bytes_reclaimed.saturating_add(bytes);
            }
            return CollectorEvent::SweepObject { object: id, bytes };
        }

        for object in self.objects.values_mut() {
            object.color = Color::White;
        }
        self.phase = GcPhase::Idle;
        self.replan();

        let summary = match self.cycle.take() {
            Some(cycle) => CycleSummary {
                objects_freed: cycle.objects_freed,
                bytes_reclaimed: cycle.bytes_reclaimed,
                duration_steps: self.step - cycle.started_at + 1,
            },
            None => CycleSummary {
                objects_freed: 0,
                bytes_reclaimed: 0,
                duration_steps: 0,
            },
        };
        self.completed_cycles += 1;
        self.last_cycle = Some(summary);
        CollectorEvent::GcCycleComplete(summary)
    }

    // -------------------------------------------------------------------------
    // Actions
    // -------------------------------------------------------------------------

    fn apply(&mut self, action: &CollectorAction) -> SimResult<CollectorEvent> {
        match *action {
            CollectorAction::Allocate {
                size_bytes,
                root,
                referenced_by,
            } => {
                if size_bytes == 0 {
                    return Err(Misuse::ZeroSizedAllocation.into());
                }
                let heap_bytes = self
                    .heap_bytes()
                    .checked_add(size_bytes)
                    .ok_or(SimError::Misuse(Misuse::HeapOverflow { size_bytes }))?;
                if let Some(parent) = referenced_by {
                    self.reachable(parent)?;
                }

                let id = ObjectId(self.next_object);
                self.next_object += 1;
                // Objects allocated mid-cycle are born black.
                let color = match self.phase {
                    GcPhase::Idle => Color::White,
                    GcPhase::Marking | GcPhase::Sweeping => Color::Black,
                };
                self.objects.insert(
                    id,
                    HeapObject {
                        id,
                        color,
                        refs: BTreeSet::new(),
                        size_bytes,
                        root,
                        reachable_from_root: false,
                    },
                );
                if let Some(parent) = referenced_by {
                    self.store_ref(parent, id);
                }

                let triggered_gc = self.phase == GcPhase::Idle && heap_bytes >= self.trigger_point;
                if triggered_gc {
                    self.start_cycle(GcTrigger::Pacing);
                }
                Ok(CollectorEvent::Allocate {
                    object: id,
                    size_bytes,
                    heap_bytes,
                    triggered_gc,
                })
            }
            CollectorAction::AddRef { from, to } => {
                self.reachable(from)?;
                self.reachable(to)?;
                let shaded = self.store_ref(from, to);
                Ok(CollectorEvent::RefAdded { from, to, shaded })
            }
            CollectorAction::RemoveRef { from, to } => {
                self.object(from)?;
                let existed = self
                    .objects
                    .get_mut(&from)
                    .is_some_and(|object| object.refs.remove(&to));
                Ok(CollectorEvent::RefRemoved { from, to, existed })
            }
            CollectorAction::AddRoot { object } => {
                self.reachable(object)?;
                if let Some(o) = self.objects.get_mut(&object) {
                    o.root = true;
                }
                let shaded = self.phase == GcPhase::Marking && self.shade(object);
                Ok(CollectorEvent::RootAdded { object, shaded })
            }
            CollectorAction::RemoveRoot { object } => {
                self.object(object)?;
                if let Some(o) = self.objects.get_mut(&object) {
                    o.root = false;
                }
                Ok(CollectorEvent::RootRemoved { object })
            }
            CollectorAction::TriggerGc => {
                if self.phase != GcPhase::Idle {
                    return Err(Misuse::GcInProgress.into());
                }
                let roots = self.start_cycle(GcTrigger::Manual);
                Ok(CollectorEvent::GcStart {
                    reason: GcTrigger::Manual,
                    roots,
                })
            }
        }
    }

    /// Stores `from → to`, running the insertion write barrier.
    fn store_ref(&mut self, from: ObjectId, to: ObjectId) -> Option<ObjectId> {
        let from_color = match self.objects.get_mut(&from) {
            Some(object) => {
                object.refs.insert(to);
                object.color
            }
            None => return None,
        };
        if self.phase == GcPhase::Marking && from_color == Color::Black && self.shade(to) {
            Some(to)
        } else {
            None
        }
    }

    // -------------------------------------------------------------------------
    // Invariants
    // -------------------------------------------------------------------------

    /// Returns the first black → white edge, if any.
    pub fn tricolor_violation(&self) -> Option<(ObjectId, ObjectId)> {
        self.objects
            .values()
            .filter(|o| o.color == Color::Black)
            .flat_map(|o| o.refs.iter().map(move |&to| (o.id, to)))
            .find(|(_, to)| self.objects.get(to).is_some_and(|t| t.color == Color::White))
    }

    pub fn check_invariants(&self) -> Result<(), String> {
        if self.phase != GcPhase::Idle {
            if let Some((from, to)) = self.tricolor_violation() {
                return Err(format!("black object {from} references white object {to}"));
            }
        }

        let greys: BTreeSet<ObjectId> = self
            .objects
            .values()
            .filter(|o| o.color == Color::Grey)
            .map(|o| o.id)
            .collect();
        let worklist: BTreeSet<ObjectId> = self.grey.iter().copied().collect();
        if greys != worklist || worklist.len() != self.grey.len() {
            return Err(format!("grey objects {greys:?} disagree with worklist {:?}", self.grey));
        }

        match self.phase {
            GcPhase::Idle if self.count(Color::White) != self.objects.len() => {
                Err("non-white object outside a cycle".to_string())
            }
            GcPhase::Sweeping if !greys.is_empty() => Err("grey object while sweeping".to_string()),
            GcPhase::Sweeping => match self
                .objects
                .values()
                .find(|o| o.color == Color::White && o.reachable_from_root)
            {
                Some(object) => Err(format!("live object {} is condemned", object.id)),
                None => Ok(()),
            },
            _ => {
                for object in self.objects.values() {
                    if let Some(missing) = object.refs.iter().find(|r| !self.objects.contains_key(r)) {
                        return Err(format!("{} references freed object {missing}", object.id));
                    }
                }
                Ok(())
            }
        }
    }
}

/// Tricolor mark & sweep engine with pacing.
#[derive(Debug, Clone, Copy, Default)]
pub struct CollectorEngine;

impl Engine for CollectorEngine {
    type Config = CollectorConfig;
    type State = CollectorState;
    type Action = CollectorAction;
    type Event = CollectorEvent;

    fn name(&self) -> &'static str {
        "collector"
    }

    fn initial(&self, config: &CollectorConfig) -> SimResult<CollectorState> {
        config.validate()?;
        Ok(CollectorState::new(config))
    }

    fn step(
        &self,
        state: &CollectorState,
        action: Option<&CollectorAction>,
    ) -> SimResult<(CollectorState, CollectorEvent)> {
        let mut next = state.clone();
        let event = match action {
            Some(action) => next.apply(action)?,
            None => next.advance(),
        };
        next.step += 1;
        next.refresh_reachability();

        if let Err(message) = next.check_invariants() {
            return Err(invariant_violation(self.name(), &next, message));
        }
        Ok((next, event))
    }

    fn is_complete(&self, state: &CollectorState) -> bool {
        state.phase == GcPhase::Idle && state.completed_cycles > 0
    }
}
