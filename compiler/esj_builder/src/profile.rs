//! Profile-guided type hints.

use rustc_hash::FxHashMap;

pub use esj_circuit::TypeHint;

/// Read-only source of per-instruction type feedback.
pub trait TypeRecorder {
    fn hint_at(&self, bc_index: u32) -> Option<TypeHint>;
}

/// No feedback at all.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoProfile;

impl TypeRecorder for NoProfile {
    fn hint_at(&self, _bc_index: u32) -> Option<TypeHint> {
        None
    }
}

/// Feedback collected ahead of time, keyed by bytecode index.
#[derive(Clone, Debug, Default)]
pub struct RecordedProfile {
    hints: FxHashMap<u32, TypeHint>,
}

impl RecordedProfile {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, bc_index: u32, hint: TypeHint) {
        self.hints.insert(bc_index, hint);
    }
}

impl TypeRecorder for RecordedProfile {
    fn hint_at(&self, bc_index: u32) -> Option<TypeHint> {
        self.hints.get(&bc_index).copied()
    }
}
