//! Per-compilation options.

use crate::error::BuildError;

/// Compilation tier.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum Tier {
    #[default]
    Jit,
    Aot,
}

/// How the compiled code is entered.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum EntryKind {
    /// Ordinary top-level call.
    #[default]
    Normal,
    /// Body inlined into a caller; returns become `InlineReturn` nodes.
    Inline,
    /// On-stack replacement into the loop whose header contains
    /// `resume_pc`.
    Osr { resume_pc: u32 },
}

/// Options for one [`build_circuit`](crate::build_circuit) call.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct CompileOptions {
    pub tier: Tier,
    pub entry: EntryKind,
    /// Attach profile hints to operation nodes.
    pub type_lowering: bool,
    /// Give every loop a single forward entry edge by inserting preheaders.
    pub normalize_loop_entries: bool,
}

impl Default for CompileOptions {
    fn default() -> Self {
        CompileOptions {
            tier: Tier::Jit,
            entry: EntryKind::Normal,
            type_lowering: true,
            normalize_loop_entries: true,
        }
    }
}

impl CompileOptions {
    #[must_use]
    pub fn with_tier(mut self, tier: Tier) -> Self {
        self.tier = tier;
        self
    }

    #[must_use]
    pub fn with_entry(mut self, entry: EntryKind) -> Self {
        self.entry = entry;
        self
    }

    #[must_use]
    pub fn with_type_lowering(mut self, enabled: bool) -> Self {
        self.type_lowering = enabled;
        self
    }

    #[must_use]
    pub fn with_normalize_loop_entries(mut self, enabled: bool) -> Self {
        self.normalize_loop_entries = enabled;
        self
    }

    #[inline]
    pub fn is_inline(&self) -> bool {
        self.entry == EntryKind::Inline
    }

    pub fn osr_resume_pc(&self) -> Option<u32> {
        match self.entry {
            EntryKind::Osr { resume_pc } => Some(resume_pc),
            _ => None,
        }
    }

    pub fn validate(&self) -> Result<(), BuildError> {
        if self.osr_resume_pc().is_some() && self.tier != Tier::Jit {
            return Err(BuildError::InvalidOptions(
                "on-stack replacement requires the JIT tier",
            ));
        }
        Ok(())
    }
}
