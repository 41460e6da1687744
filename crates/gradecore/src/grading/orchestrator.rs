use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::domain::{AdjustmentScope, ClassId, ConstituentId, ItemId, ModuleId, StudentId};
use super::policy::BindingScope;
use super::store::StoreError;
use super::structure::{StructuralError, ValidatedStructure};

/// A write observed by the engine. Events decouple "what changed" from "what
/// must be recomputed": the dispatcher below maps each event onto the affected
/// units without consulting a live store.
#[derive(Debug, Clone, PartialEq)]
pub enum GradeEvent {
    ScoreWritten {
        student_id: StudentId,
        item_id: ItemId,
    },
    AdjustmentWritten {
        student_id: StudentId,
        scope: AdjustmentScope,
        scope_id: String,
    },
    BindingChanged {
        scope: BindingScope,
        scope_id: String,
    },
}

/// Scope half of a recomputation unit: one module, or the class-level final
/// aggregate. Recomputation never targets a whole class of students at once.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "scope", rename_all = "snake_case")]
pub enum UnitScope {
    Module { module_id: ModuleId },
    Final { class_id: ClassId },
}

/// Smallest granularity at which recomputation is scheduled and serialized.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UnitKey {
    pub student_id: StudentId,
    pub scope: UnitScope,
}

impl UnitKey {
    pub fn module(student_id: StudentId, module_id: ModuleId) -> Self {
        Self {
            student_id,
            scope: UnitScope::Module { module_id },
        }
    }

    pub fn final_grade(student_id: StudentId, class_id: ClassId) -> Self {
        Self {
            student_id,
            scope: UnitScope::Final { class_id },
        }
    }
}

/// Failure attached to a unit that could not reach `Fresh`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ComputeFailure {
    pub code: &'static str,
    pub message: String,
}

/// Recomputation failure. Store unavailability is retryable; everything else
/// parks the unit stale immediately.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ComputeError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Structural(#[from] StructuralError),
    #[error("unknown module {0:?}")]
    UnknownModule(ModuleId),
    #[error("unknown constituent {0:?}")]
    UnknownConstituent(ConstituentId),
}

impl ComputeError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, ComputeError::Store(err) if err.is_retryable())
    }

    pub fn failure(&self) -> ComputeFailure {
        let code = match self {
            ComputeError::Store(_) => "store",
            ComputeError::Structural(_) => "structural",
            ComputeError::UnknownModule(_) => "unknown_module",
            ComputeError::UnknownConstituent(_) => "unknown_constituent",
        };
        ComputeFailure {
            code,
            message: self.to_string(),
        }
    }
}

/// Lifecycle of one recomputation unit. A unit the engine has never settled
/// reads as `Stale` with no error.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum UnitState {
    Stale { error: Option<ComputeFailure> },
    Recomputing,
    Fresh { computed_at: DateTime<Utc> },
}

impl UnitState {
    pub const fn label(&self) -> &'static str {
        match self {
            UnitState::Stale { .. } => "stale",
            UnitState::Recomputing => "recomputing",
            UnitState::Fresh { .. } => "fresh",
        }
    }

    pub const fn is_fresh(&self) -> bool {
        matches!(self, UnitState::Fresh { .. })
    }
}

/// Bounded-backoff retry schedule for retryable compute failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay * 2u32.saturating_pow(attempt.saturating_sub(1))
    }

    /// Schedule with no sleeping, for tests exercising retry counts.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            base_delay: Duration::ZERO,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(25),
        }
    }
}

#[derive(Debug, Default)]
struct UnitEntry {
    state: Option<UnitState>,
    dirty: bool,
    queued: bool,
}

/// Tracks per-unit state and drives Stale -> Recomputing -> Fresh transitions.
///
/// Writes arriving while a unit is mid-recompute re-mark it dirty instead of
/// being dropped, so the queue converges on the latest input state once writes
/// stop. Compute runs outside the bookkeeping lock; only transitions take it,
/// so units never block each other.
#[derive(Debug, Default)]
pub struct RecomputeOrchestrator {
    inner: Mutex<OrchestratorInner>,
    retry: RetryPolicy,
}

#[derive(Debug, Default)]
struct OrchestratorInner {
    units: HashMap<UnitKey, UnitEntry>,
    queue: VecDeque<UnitKey>,
}

impl RecomputeOrchestrator {
    pub fn new(retry: RetryPolicy) -> Self {
        Self {
            inner: Mutex::new(OrchestratorInner::default()),
            retry,
        }
    }

    /// Current state of a unit. Units the engine has never settled are stale.
    pub fn state(&self, unit: &UnitKey) -> UnitState {
        let inner = self.inner.lock().expect("orchestrator mutex poisoned");
        inner
            .units
            .get(unit)
            .and_then(|entry| entry.state.clone())
            .unwrap_or(UnitState::Stale { error: None })
    }

    /// Mark a unit stale and enqueue it. Idempotent: a unit already queued is
    /// not queued twice, and a unit mid-recompute is flagged dirty so its
    /// in-flight result gets discarded and recomputed.
    pub fn mark_stale(&self, unit: UnitKey) {
        let mut inner = self.inner.lock().expect("orchestrator mutex poisoned");
        let entry = inner.units.entry(unit.clone()).or_default();

        if matches!(entry.state, Some(UnitState::Recomputing)) {
            entry.dirty = true;
            return;
        }

        entry.state = Some(UnitState::Stale { error: None });
        if !entry.queued {
            entry.queued = true;
            inner.queue.push_back(unit);
        }
    }

    pub fn mark_all_stale(&self, units: impl IntoIterator<Item = UnitKey>) {
        for unit in units {
            self.mark_stale(unit);
        }
    }

    pub fn pending(&self) -> usize {
        let inner = self.inner.lock().expect("orchestrator mutex poisoned");
        inner.queue.len()
    }

    /// Drain the queue, invoking `compute` once per settled unit run. Returns
    /// the final state reached for every unit touched. Re-running drain on an
    /// empty queue is a no-op, and recomputing an unchanged unit writes the
    /// identical result, so at-least-once delivery is safe.
    pub fn drain<F>(&self, mut compute: F) -> Vec<(UnitKey, UnitState)>
    where
        F: FnMut(&UnitKey) -> Result<(), ComputeError>,
    {
        let mut settled = Vec::new();

        while let Some(unit) = self.next_unit() {
            let outcome = self.run_with_retry(&unit, &mut compute);
            let state = self.finish(&unit, outcome);
            settled.push((unit, state));
        }

        settled
    }

    fn next_unit(&self) -> Option<UnitKey> {
        let mut inner = self.inner.lock().expect("orchestrator mutex poisoned");
        while let Some(unit) = inner.queue.pop_front() {
            let entry = inner.units.entry(unit.clone()).or_default();
            // Another drain already owns this unit; per-unit serialization.
            if matches!(entry.state, Some(UnitState::Recomputing)) {
                entry.queued = false;
                continue;
            }
            entry.state = Some(UnitState::Recomputing);
            entry.dirty = false;
            entry.queued = false;
            return Some(unit);
        }
        None
    }

    fn run_with_retry<F>(&self, unit: &UnitKey, compute: &mut F) -> Result<(), ComputeError>
    where
        F: FnMut(&UnitKey) -> Result<(), ComputeError>,
    {
        let mut attempt = 1;
        loop {
            match compute(unit) {
                Ok(()) => return Ok(()),
                Err(err) if err.is_retryable() && attempt < self.retry.max_attempts => {
                    tracing::warn!(
                        attempt,
                        error = %err,
                        "recomputation failed, retrying with backoff"
                    );
                    std::thread::sleep(self.retry.delay_for(attempt));
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }

    fn finish(&self, unit: &UnitKey, outcome: Result<(), ComputeError>) -> UnitState {
        let mut inner = self.inner.lock().expect("orchestrator mutex poisoned");
        let entry = inner.units.entry(unit.clone()).or_default();

        let state = match outcome {
            Ok(()) if entry.dirty => {
                // Superseded mid-flight: discard this result and go again.
                UnitState::Stale { error: None }
            }
            Ok(()) => UnitState::Fresh {
                computed_at: Utc::now(),
            },
            Err(err) => UnitState::Stale {
                error: Some(err.failure()),
            },
        };

        // A write that landed mid-flight must not be lost, even on failure.
        if entry.dirty {
            entry.dirty = false;
            entry.queued = true;
        }

        entry.state = Some(state.clone());
        if entry.queued {
            let unit = unit.clone();
            inner.queue.push_back(unit);
        }
        state
    }
}

/// Map an event onto the units whose input set it touched. Module-level
/// events cascade to the final aggregate; binding changes fan out across the
/// supplied enrollment.
pub fn affected_units(
    structure: &ValidatedStructure,
    students: &[StudentId],
    event: &GradeEvent,
) -> Vec<UnitKey> {
    let class_id = structure.class_id().clone();
    let mut units = Vec::new();

    match event {
        GradeEvent::ScoreWritten {
            student_id,
            item_id,
        } => {
            if let Some(module_id) = structure.module_of_item(item_id) {
                units.push(UnitKey::module(student_id.clone(), module_id.clone()));
            }
            units.push(UnitKey::final_grade(student_id.clone(), class_id));
        }
        GradeEvent::AdjustmentWritten {
            student_id,
            scope,
            scope_id,
        } => {
            match scope {
                AdjustmentScope::Constituent => {
                    let constituent_id = ConstituentId(scope_id.clone());
                    if let Some(module_id) = structure.module_of_constituent(&constituent_id) {
                        units.push(UnitKey::module(student_id.clone(), module_id.clone()));
                    }
                }
                AdjustmentScope::Module => {
                    units.push(UnitKey::module(
                        student_id.clone(),
                        ModuleId(scope_id.clone()),
                    ));
                }
                AdjustmentScope::Final => {}
            }
            units.push(UnitKey::final_grade(student_id.clone(), class_id));
        }
        GradeEvent::BindingChanged { scope, scope_id } => {
            let module_id = match scope {
                BindingScope::Item => structure.module_of_item(&ItemId(scope_id.clone())).cloned(),
                BindingScope::Constituent => structure
                    .module_of_constituent(&ConstituentId(scope_id.clone()))
                    .cloned(),
                BindingScope::Module => Some(ModuleId(scope_id.clone())),
            };
            for student_id in students {
                if let Some(module_id) = &module_id {
                    units.push(UnitKey::module(student_id.clone(), module_id.clone()));
                }
                units.push(UnitKey::final_grade(student_id.clone(), class_id.clone()));
            }
        }
    }

    units
}
