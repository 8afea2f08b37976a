//! Bytecode subset for the esj graph builder.
//!
//! This crate owns everything about the input side of a compilation:
//!
//! - [`Opcode`] and [`Format`]: the instruction set and its encodings
//! - [`decode`]: raw bytes to [`Instruction`]s
//! - [`BytecodeInfo`]: per-instruction classification (kind, flags, inputs)
//! - [`Method`] / [`ExceptionEntry`]: what the builder is handed
//! - [`Assembler`]: label-based construction of methods
//!
//! Jump immediates and exception-table entries are byte offsets (`pc`).
//! The builder translates them to instruction indices.

mod asm;
mod error;
mod info;
mod instruction;
mod method;
mod opcode;

pub use asm::{AssembledMethod, Assembler, Label};
pub use error::{AsmError, DecodeError};
pub use info::{BytecodeFlags, BytecodeInfo, BytecodeKind, Input};
pub use instruction::{decode, Instruction, Operand};
pub use method::{ExceptionEntry, Method};
pub use opcode::{Format, Opcode};
