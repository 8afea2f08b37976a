//! Errors raised while decoding or assembling bytecode.

use thiserror::Error;

/// Raw code bytes could not be decoded into instructions.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("method has no bytecode")]
    Empty,
    #[error("unknown opcode {byte:#04x} at pc {pc}")]
    UnknownOpcode { pc: u32, byte: u8 },
    #[error("instruction at pc {pc} needs {needed} bytes but only {available} remain")]
    Truncated { pc: u32, needed: u32, available: u32 },
}

/// The assembler could not produce a method.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum AsmError {
    #[error("label {label} was used but never bound")]
    UnboundLabel { label: u32 },
    #[error("label {label} was bound twice")]
    Rebound { label: u32 },
    #[error("jump at pc {pc} cannot reach offset {offset}")]
    JumpOutOfRange { pc: u32, offset: i64 },
}
