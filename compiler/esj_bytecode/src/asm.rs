//! A small label-based assembler.
//!
//! Used to build methods for tests and tooling without hand-counting byte
//! offsets. Jumps are always emitted in their 16-bit form and patched in
//! [`Assembler::finish`].

use crate::error::AsmError;
use crate::method::{ExceptionEntry, Method};
use crate::opcode::{Format, Opcode};

/// A jump target or try-range boundary.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Label(u32);

#[derive(Debug)]
struct Fixup {
    /// Pc of the jump instruction.
    pc: u32,
    label: Label,
}

#[derive(Debug)]
struct TryRange {
    start: Label,
    end: Label,
    handlers: Vec<Label>,
}

/// Code bytes and exception table produced by [`Assembler::finish`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AssembledMethod {
    pub code: Vec<u8>,
    pub exceptions: Vec<ExceptionEntry>,
}

impl AssembledMethod {
    pub fn into_method(self, num_vregs: u16, num_args: u16) -> Method {
        Method {
            code: self.code,
            exceptions: self.exceptions,
            num_vregs,
            num_args,
        }
    }
}

#[derive(Debug, Default)]
pub struct Assembler {
    code: Vec<u8>,
    count: u32,
    labels: Vec<Option<u32>>,
    fixups: Vec<Fixup>,
    tries: Vec<TryRange>,
}

impl Assembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current byte offset.
    #[expect(
        clippy::cast_possible_truncation,
        reason = "assembled methods are small"
    )]
    pub fn pc(&self) -> u32 {
        self.code.len() as u32
    }

    /// Bytecode index the next instruction will get.
    pub fn next_index(&self) -> u32 {
        self.count
    }

    #[expect(
        clippy::cast_possible_truncation,
        reason = "label count is bounded by method size"
    )]
    pub fn label(&mut self) -> Label {
        self.labels.push(None);
        Label(self.labels.len() as u32 - 1)
    }

    /// Bind `label` to the current pc.
    pub fn bind(&mut self, label: Label) -> Result<&mut Self, AsmError> {
        let pc = self.pc();
        let Some(slot) = self.labels.get_mut(label.0 as usize) else {
            return Err(AsmError::UnboundLabel { label: label.0 });
        };
        if slot.is_some() {
            return Err(AsmError::Rebound { label: label.0 });
        }
        *slot = Some(pc);
        Ok(self)
    }

    /// Create a label bound to the current pc.
    pub fn here(&mut self) -> Label {
        let label = self.label();
        self.labels[label.0 as usize] = Some(self.pc());
        label
    }

    /// Cover `start..end` with the given handlers, innermost first.
    pub fn try_range(&mut self, start: Label, end: Label, handlers: &[Label]) -> &mut Self {
        self.tries.push(TryRange {
            start,
            end,
            handlers: handlers.to_vec(),
        });
        self
    }

    /// Emit a non-jump instruction. `operands` follow the encoding order of
    /// the opcode's format; missing trailing operands encode as zero.
    #[expect(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        reason = "operands are truncated to their encoded width"
    )]
    pub fn op(&mut self, opcode: Opcode, operands: &[i64]) -> &mut Self {
        let at = |i: usize| operands.get(i).copied().unwrap_or(0);
        self.code.push(opcode as u8);
        match opcode.format() {
            Format::None => {}
            Format::Imm8 | Format::V8 => self.code.push(at(0) as u8),
            Format::Imm16 => self.code.extend_from_slice(&(at(0) as i16).to_le_bytes()),
            Format::Imm32 => self.code.extend_from_slice(&(at(0) as i32).to_le_bytes()),
            Format::Imm64 => self.code.extend_from_slice(&at(0).to_le_bytes()),
            Format::V8V8 | Format::Imm8V8 | Format::Imm8Imm8 => {
                self.code.push(at(0) as u8);
                self.code.push(at(1) as u8);
            }
            Format::Imm8V8V8 | Format::Imm8Imm8V8 => {
                self.code.push(at(0) as u8);
                self.code.push(at(1) as u8);
                self.code.push(at(2) as u8);
            }
            Format::Imm8Id16 => {
                self.code.push(at(0) as u8);
                self.code.extend_from_slice(&(at(1) as u16).to_le_bytes());
            }
            Format::Imm8Id16V8 => {
                self.code.push(at(0) as u8);
                self.code.extend_from_slice(&(at(1) as u16).to_le_bytes());
                self.code.push(at(2) as u8);
            }
        }
        self.count += 1;
        self
    }

    fn jump(&mut self, opcode: Opcode, label: Label) -> &mut Self {
        self.fixups.push(Fixup {
            pc: self.pc(),
            label,
        });
        self.op(opcode, &[0])
    }

    pub fn jmp(&mut self, label: Label) -> &mut Self {
        self.jump(Opcode::Jmp16, label)
    }

    pub fn jeqz(&mut self, label: Label) -> &mut Self {
        self.jump(Opcode::Jeqz16, label)
    }

    pub fn jnez(&mut self, label: Label) -> &mut Self {
        self.jump(Opcode::Jnez16, label)
    }

    // ── Shorthands ──────────────────────────────────────────────

    pub fn nop(&mut self) -> &mut Self {
        self.op(Opcode::Nop, &[])
    }

    pub fn ldai(&mut self, value: i32) -> &mut Self {
        self.op(Opcode::Ldai, &[i64::from(value)])
    }

    pub fn ldundefined(&mut self) -> &mut Self {
        self.op(Opcode::LdUndefined, &[])
    }

    pub fn lda(&mut self, reg: u8) -> &mut Self {
        self.op(Opcode::Lda, &[i64::from(reg)])
    }

    pub fn sta(&mut self, reg: u8) -> &mut Self {
        self.op(Opcode::Sta, &[i64::from(reg)])
    }

    pub fn mov(&mut self, dst: u8, src: u8) -> &mut Self {
        self.op(Opcode::Mov, &[i64::from(dst), i64::from(src)])
    }

    pub fn add2(&mut self, reg: u8) -> &mut Self {
        self.op(Opcode::Add2, &[0, i64::from(reg)])
    }

    pub fn less(&mut self, reg: u8) -> &mut Self {
        self.op(Opcode::Less, &[0, i64::from(reg)])
    }

    pub fn inc(&mut self) -> &mut Self {
        self.op(Opcode::Inc, &[0])
    }

    pub fn call_arg1(&mut self, reg: u8) -> &mut Self {
        self.op(Opcode::CallArg1, &[0, i64::from(reg)])
    }

    pub fn ret(&mut self) -> &mut Self {
        self.op(Opcode::Return, &[])
    }

    pub fn ret_undefined(&mut self) -> &mut Self {
        self.op(Opcode::ReturnUndefined, &[])
    }

    pub fn throw(&mut self) -> &mut Self {
        self.op(Opcode::Throw, &[])
    }

    /// Patch jumps and resolve try ranges.
    pub fn finish(mut self) -> Result<AssembledMethod, AsmError> {
        let resolve = |labels: &[Option<u32>], label: Label| {
            labels
                .get(label.0 as usize)
                .copied()
                .flatten()
                .ok_or(AsmError::UnboundLabel { label: label.0 })
        };

        for fixup in &self.fixups {
            let target = resolve(&self.labels, fixup.label)?;
            let offset = i64::from(target) - i64::from(fixup.pc);
            let rel = i16::try_from(offset).map_err(|_| AsmError::JumpOutOfRange {
                pc: fixup.pc,
                offset,
            })?;
            let at = fixup.pc as usize + 1;
            self.code[at..at + 2].copy_from_slice(&rel.to_le_bytes());
        }

        let mut exceptions = Vec::with_capacity(self.tries.len());
        for range in &self.tries {
            let handlers = range
                .handlers
                .iter()
                .map(|&h| resolve(&self.labels, h))
                .collect::<Result<Vec<_>, _>>()?;
            exceptions.push(ExceptionEntry {
                start_pc: resolve(&self.labels, range.start)?,
                end_pc: resolve(&self.labels, range.end)?,
                handlers,
            });
        }

        Ok(AssembledMethod {
            code: self.code,
            exceptions,
        })
    }
}

#[cfg(test)]
#[expect(
    clippy::unwrap_used,
    reason = "tests use unwrap for concise assertions"
)]
