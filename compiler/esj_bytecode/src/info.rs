//! Per-instruction metadata consumed by the graph builder.
//!
//! [`BytecodeInfo`] classifies one decoded instruction: which family it
//! belongs to, which machine slots (accumulator, lexical environment) it
//! reads and writes, and which registers, immediates and constant-pool ids
//! flow into it as value inputs. Inline-cache slot immediates carry no
//! semantic value and are dropped here.

use bitflags::bitflags;
use smallvec::SmallVec;

use crate::instruction::{Instruction, Operand};
use crate::opcode::Opcode;

/// Instruction family.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BytecodeKind {
    /// No effect at all (`nop`).
    Discarded,
    /// Loads a constant into the accumulator.
    SetConstant,
    /// Register/accumulator move.
    Mov,
    /// Operation that may throw, allocate or deoptimize.
    General,
    /// Named property access.
    Accessor,
    Call,
    ConditionalJump,
    Jump,
    Return,
    Throw,
    Suspend,
    Resume,
}

bitflags! {
    /// Side-effect and slot-usage properties of an instruction.
    #[derive(Copy, Clone, Eq, PartialEq, Hash, Debug, Default)]
    pub struct BytecodeFlags: u16 {
        // === Slot usage ===

        /// Reads the accumulator.
        const READ_ACC = 1 << 0;
        /// Writes the accumulator.
        const WRITE_ACC = 1 << 1;
        /// Reads the lexical environment.
        const READ_ENV = 1 << 2;
        /// Replaces the lexical environment.
        const WRITE_ENV = 1 << 3;

        // === Effects ===

        /// Never raises an exception.
        const NO_THROW = 1 << 8;
        /// Observable-effect free.
        const NO_SIDE_EFFECT = 1 << 9;
        /// Never triggers a collection.
        const NO_GC = 1 << 10;
        /// May bail out to the interpreter on a failed speculation.
        const SUPPORT_DEOPT = 1 << 11;
    }
}

/// A value input of an instruction, in template order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Input {
    VReg(u16),
    Imm(i64),
    ConstId(u16),
}

/// Classified view of one instruction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BytecodeInfo {
    pub pc: u32,
    pub size: u32,
    pub opcode: Opcode,
    pub kind: BytecodeKind,
    pub flags: BytecodeFlags,
    pub inputs: SmallVec<[Input; 4]>,
    /// Register written by the instruction, if any.
    pub vreg_out: Option<u16>,
    /// Relative jump offset in bytes, for jumps.
    pub jump_offset: Option<i64>,
}

impl BytecodeInfo {
    /// Classify a decoded instruction.
    pub fn new(inst: &Instruction) -> Self {
        use BytecodeFlags as F;

        let ops = &inst.operands;
        let reg = |at: usize| match ops.get(at) {
            Some(Operand::Reg(r)) => Some(*r),
            _ => None,
        };
        let imm = |at: usize| match ops.get(at) {
            Some(Operand::Imm(i)) => Some(*i),
            _ => None,
        };
        let id = |at: usize| match ops.get(at) {
            Some(Operand::Id(i)) => Some(*i),
            _ => None,
        };

        let mut inputs: SmallVec<[Input; 4]> = SmallVec::new();
        let mut vreg_out = None;
        let push_reg = |inputs: &mut SmallVec<[Input; 4]>, at: usize| {
            if let Some(r) = reg(at) {
                inputs.push(Input::VReg(r));
            }
        };

        let (kind, flags) = match inst.opcode {
            Opcode::Nop => (BytecodeKind::Discarded, F::empty()),
            Opcode::LdUndefined | Opcode::LdNull | Opcode::LdTrue | Opcode::LdFalse => {
                (BytecodeKind::SetConstant, F::WRITE_ACC)
            }
            Opcode::Ldai | Opcode::Fldai => {
                if let Some(value) = imm(0) {
                    inputs.push(Input::Imm(value));
                }
                (BytecodeKind::SetConstant, F::WRITE_ACC)
            }
            Opcode::Lda => {
                push_reg(&mut inputs, 0);
                (BytecodeKind::Mov, F::WRITE_ACC)
            }
            Opcode::Sta => {
                vreg_out = reg(0);
                (BytecodeKind::Mov, F::READ_ACC)
            }
            Opcode::Mov => {
                vreg_out = reg(0);
                push_reg(&mut inputs, 1);
                (BytecodeKind::Mov, F::empty())
            }
            Opcode::Add2 | Opcode::Sub2 | Opcode::Mul2 | Opcode::Less => {
                push_reg(&mut inputs, 1);
                (
                    BytecodeKind::General,
                    F::READ_ACC | F::WRITE_ACC | F::SUPPORT_DEOPT,
                )
            }
            Opcode::StrictEq => {
                push_reg(&mut inputs, 1);
                (
                    BytecodeKind::General,
                    F::READ_ACC
                        | F::WRITE_ACC
                        | F::SUPPORT_DEOPT
                        | F::NO_THROW
                        | F::NO_SIDE_EFFECT
                        | F::NO_GC,
                )
            }
            Opcode::Inc => (
                BytecodeKind::General,
                F::READ_ACC | F::WRITE_ACC | F::SUPPORT_DEOPT,
            ),
            Opcode::TryLdGlobalByName => {
                if let Some(name) = id(1) {
                    inputs.push(Input::ConstId(name));
                }
                (BytecodeKind::General, F::WRITE_ACC)
            }
            Opcode::LdObjByValue => {
                push_reg(&mut inputs, 1);
                (
                    BytecodeKind::General,
                    F::READ_ACC | F::WRITE_ACC | F::SUPPORT_DEOPT,
                )
            }
            Opcode::LdObjByName => {
                if let Some(name) = id(1) {
                    inputs.push(Input::ConstId(name));
                }
                (
                    BytecodeKind::Accessor,
                    F::READ_ACC | F::WRITE_ACC | F::SUPPORT_DEOPT,
                )
            }
            Opcode::StObjByName => {
                if let Some(name) = id(1) {
                    inputs.push(Input::ConstId(name));
                }
                push_reg(&mut inputs, 2);
                (BytecodeKind::Accessor, F::READ_ACC | F::SUPPORT_DEOPT)
            }
            Opcode::CallArg0 => (
                BytecodeKind::Call,
                F::READ_ACC | F::WRITE_ACC | F::SUPPORT_DEOPT,
            ),
            Opcode::CallArg1 => {
                push_reg(&mut inputs, 1);
                (
                    BytecodeKind::Call,
                    F::READ_ACC | F::WRITE_ACC | F::SUPPORT_DEOPT,
                )
            }
            Opcode::CallArgs2 | Opcode::CallThis1 => {
                push_reg(&mut inputs, 1);
                push_reg(&mut inputs, 2);
                (
                    BytecodeKind::Call,
                    F::READ_ACC | F::WRITE_ACC | F::SUPPORT_DEOPT,
                )
            }
            Opcode::NewObjRange => {
                if let (Some(count), Some(first)) = (imm(1), reg(2)) {
                    for offset in 0..count {
                        // Out-of-range registers are reported by the builder.
                        let r = i64::from(first) + offset;
                        inputs.push(Input::VReg(u16::try_from(r).unwrap_or(u16::MAX)));
                    }
                }
                (BytecodeKind::Call, F::WRITE_ACC | F::SUPPORT_DEOPT)
            }
            Opcode::NewLexEnv => {
                if let Some(slots) = imm(0) {
                    inputs.push(Input::Imm(slots));
                }
                (
                    BytecodeKind::General,
                    F::READ_ENV | F::WRITE_ENV | F::WRITE_ACC,
                )
            }
            Opcode::PopLexEnv => (
                BytecodeKind::General,
                F::READ_ENV | F::WRITE_ENV | F::NO_THROW | F::NO_GC,
            ),
            Opcode::LdLexVar => {
                inputs.extend([imm(0), imm(1)].into_iter().flatten().map(Input::Imm));
                (
                    BytecodeKind::General,
                    F::READ_ENV | F::WRITE_ACC | F::NO_THROW | F::NO_SIDE_EFFECT | F::NO_GC,
                )
            }
            Opcode::StLexVar => {
                inputs.extend([imm(0), imm(1)].into_iter().flatten().map(Input::Imm));
                (
                    BytecodeKind::General,
                    F::READ_ENV | F::READ_ACC | F::NO_THROW | F::NO_GC,
                )
            }
            Opcode::CreateEmptyObject => (
                BytecodeKind::General,
                F::WRITE_ACC | F::NO_THROW | F::NO_SIDE_EFFECT,
            ),
            Opcode::Jmp | Opcode::Jmp16 => (BytecodeKind::Jump, F::empty()),
            Opcode::Jeqz | Opcode::Jeqz16 | Opcode::Jnez | Opcode::Jnez16 => {
                (BytecodeKind::ConditionalJump, F::READ_ACC)
            }
            Opcode::Return => (BytecodeKind::Return, F::READ_ACC),
            Opcode::ReturnUndefined => (BytecodeKind::Return, F::empty()),
            Opcode::Throw => (BytecodeKind::Throw, F::READ_ACC),
            Opcode::SuspendGenerator => {
                push_reg(&mut inputs, 0);
                (BytecodeKind::Suspend, F::READ_ACC | F::WRITE_ACC)
            }
            Opcode::ResumeGenerator => (
                BytecodeKind::Resume,
                F::READ_ACC | F::WRITE_ACC | F::NO_THROW,
            ),
        };

        BytecodeInfo {
            pc: inst.pc,
            size: inst.size(),
            opcode: inst.opcode,
            kind,
            flags,
            inputs,
            vreg_out,
            jump_offset: inst.jump_offset(),
        }
    }

    /// Byte offset of the following instruction.
    #[inline]
    pub fn next_pc(&self) -> u32 {
        self.pc + self.size
    }

    /// Emits a bytecode operation node (as opposed to only updating the
    /// value frame or the control chain).
    pub fn is_general(&self) -> bool {
        matches!(
            self.kind,
            BytecodeKind::General
                | BytecodeKind::Accessor
                | BytecodeKind::Call
                | BytecodeKind::Throw
                | BytecodeKind::Suspend
                | BytecodeKind::Resume
        )
    }

    pub fn can_throw(&self) -> bool {
        self.is_general() && !self.flags.contains(BytecodeFlags::NO_THROW)
    }

    /// Requires a frame snapshot for deoptimization or exception unwinding.
    pub fn needs_frame_state(&self) -> bool {
        self.can_throw()
            || self.flags.contains(BytecodeFlags::SUPPORT_DEOPT)
            || self.kind == BytecodeKind::Call
    }

    pub fn is_jump(&self) -> bool {
        matches!(
            self.kind,
            BytecodeKind::Jump | BytecodeKind::ConditionalJump
        )
    }

    /// Ends the block with no fall-through successor.
    pub fn is_terminator(&self) -> bool {
        matches!(
            self.kind,
            BytecodeKind::Jump | BytecodeKind::Return | BytecodeKind::Throw
        )
    }

    #[inline]
    pub fn reads_acc(&self) -> bool {
        self.flags.contains(BytecodeFlags::READ_ACC)
    }

    #[inline]
    pub fn writes_acc(&self) -> bool {
        self.flags.contains(BytecodeFlags::WRITE_ACC)
    }

    #[inline]
    pub fn reads_env(&self) -> bool {
        self.flags.contains(BytecodeFlags::READ_ENV)
    }

    #[inline]
    pub fn writes_env(&self) -> bool {
        self.flags.contains(BytecodeFlags::WRITE_ENV)
    }

    /// Registers read, in input order.
    pub fn vreg_inputs(&self) -> impl Iterator<Item = u16> + '_ {
        self.inputs.iter().filter_map(|input| match input {
            Input::VReg(r) => Some(*r),
            _ => None,
        })
    }

    /// Every register the instruction names, read or written.
    pub fn vregs(&self) -> impl Iterator<Item = u16> + '_ {
        self.vreg_inputs().chain(self.vreg_out)
    }
}

#[cfg(test)]
#[expect(
    clippy::unwrap_used,
    reason = "tests use unwrap for concise assertions"
)]
