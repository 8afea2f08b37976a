//! Build failures.
//!
//! Every error aborts the compilation of the current method only. Callers
//! are expected to keep running the method in the interpreter.

use esj_bytecode::DecodeError;
use esj_circuit::GraphError;
use thiserror::Error;

#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum BuildError {
    // Malformed input
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error("jump at bytecode {bc_index} targets pc {target_pc}, which is not an instruction boundary")]
    MisalignedTarget { bc_index: u32, target_pc: i64 },
    #[error("exception table boundary pc {pc} is not an instruction boundary")]
    MisalignedTryBoundary { pc: u32 },
    #[error("try range {start_pc}..{end_pc} is inverted")]
    InvalidTryRange { start_pc: u32, end_pc: u32 },
    #[error("try ranges {first:?} and {second:?} overlap without nesting")]
    OverlappingTryRanges { first: (u32, u32), second: (u32, u32) },
    #[error("bytecode {bc_index} names v{vreg} but the method has {num_vregs} registers")]
    RegisterOutOfRange {
        bc_index: u32,
        vreg: u16,
        num_vregs: u16,
    },
    #[error("method declares {num_args} arguments but only {num_vregs} registers")]
    TooManyArguments { num_args: u16, num_vregs: u16 },
    #[error("OSR resume pc {pc} is not an instruction boundary")]
    MisalignedOsr { pc: u32 },
    #[error("OSR resume pc {pc} is not inside a loop header")]
    OsrNotLoopHeader { pc: u32 },
    #[error("bytecode {bc_index} falls off the end of the method")]
    FallsOffEnd { bc_index: u32 },

    // Configuration
    #[error("invalid options: {0}")]
    InvalidOptions(&'static str),

    // Internal invariants
    #[error("internal error: {0}")]
    Internal(String),
    #[error("internal error: {0}")]
    Graph(#[from] GraphError),
}

impl BuildError {
    /// The bytecode itself is unusable, as opposed to bad options or a
    /// builder defect.
    pub fn is_malformed_input(&self) -> bool {
        matches!(
            self,
            BuildError::Decode(_)
                | BuildError::MisalignedTarget { .. }
                | BuildError::MisalignedTryBoundary { .. }
                | BuildError::InvalidTryRange { .. }
                | BuildError::OverlappingTryRanges { .. }
                | BuildError::RegisterOutOfRange { .. }
                | BuildError::TooManyArguments { .. }
                | BuildError::MisalignedOsr { .. }
                | BuildError::OsrNotLoopHeader { .. }
                | BuildError::FallsOffEnd { .. }
        )
    }

    pub fn is_internal(&self) -> bool {
        matches!(self, BuildError::Internal(_) | BuildError::Graph(_))
    }
}
