//! Instruction decoding.

use std::fmt;

use smallvec::SmallVec;

use crate::error::DecodeError;
use crate::opcode::{Format, Opcode};

/// A decoded operand, in encoding order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Operand {
    /// Signed immediate (sign-extended from its encoded width; 64-bit
    /// immediates carry raw bits).
    Imm(i64),
    /// Virtual register.
    Reg(u16),
    /// Constant-pool id.
    Id(u16),
}

/// One decoded instruction.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Instruction {
    /// Byte offset of the opcode within the method.
    pub pc: u32,
    pub opcode: Opcode,
    pub operands: SmallVec<[Operand; 3]>,
}

impl Instruction {
    /// Encoded size in bytes.
    #[inline]
    pub fn size(&self) -> u32 {
        self.opcode.size()
    }

    /// Byte offset of the following instruction.
    #[inline]
    pub fn next_pc(&self) -> u32 {
        self.pc + self.size()
    }

    /// Relative jump offset, for jump instructions.
    pub fn jump_offset(&self) -> Option<i64> {
        if !self.opcode.is_jump() {
            return None;
        }
        match self.operands.first() {
            Some(Operand::Imm(offset)) => Some(*offset),
            _ => None,
        }
    }

    /// Absolute jump target pc, for jump instructions.
    pub fn jump_target(&self) -> Option<i64> {
        self.jump_offset().map(|offset| i64::from(self.pc) + offset)
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:>5}: {}", self.pc, self.opcode)?;
        for (i, operand) in self.operands.iter().enumerate() {
            let sep = if i == 0 { " " } else { ", " };
            match operand {
                Operand::Imm(imm) => write!(f, "{sep}{imm}")?,
                Operand::Reg(reg) => write!(f, "{sep}v{reg}")?,
                Operand::Id(id) => write!(f, "{sep}@{id}")?,
            }
        }
        Ok(())
    }
}

/// Decode a whole method body.
///
/// Decoding is purely structural: jump targets and register ranges are
/// validated later by the CFG builder, which knows the instruction
/// boundaries and the register count.
pub fn decode(code: &[u8]) -> Result<Vec<Instruction>, DecodeError> {
    if code.is_empty() {
        return Err(DecodeError::Empty);
    }
    let mut instructions = Vec::new();
    let mut cursor = Cursor { code, pos: 0 };
    while cursor.pos < code.len() {
        instructions.push(cursor.next_instruction()?);
    }
    tracing::trace!(count = instructions.len(), bytes = code.len(), "decoded method");
    Ok(instructions)
}

struct Cursor<'a> {
    code: &'a [u8],
    pos: usize,
}

impl Cursor<'_> {
    #[expect(
        clippy::cast_possible_truncation,
        reason = "method bodies are bounded well below u32::MAX bytes"
    )]
    fn next_instruction(&mut self) -> Result<Instruction, DecodeError> {
        let pc = self.pos as u32;
        let byte = self.code[self.pos];
        let opcode = Opcode::from_byte(byte).ok_or(DecodeError::UnknownOpcode { pc, byte })?;
        let size = opcode.size() as usize;
        let available = self.code.len() - self.pos;
        if available < size {
            return Err(DecodeError::Truncated {
                pc,
                needed: opcode.size(),
                available: available as u32,
            });
        }
        let bytes = &self.code[self.pos + 1..self.pos + size];
        self.pos += size;
        Ok(Instruction {
            pc,
            opcode,
            operands: decode_operands(opcode.format(), bytes),
        })
    }
}

fn decode_operands(format: Format, bytes: &[u8]) -> SmallVec<[Operand; 3]> {
    let imm8 = |at: usize| Operand::Imm(i64::from(bytes[at] as i8));
    let uimm8 = |at: usize| Operand::Imm(i64::from(bytes[at]));
    let reg = |at: usize| Operand::Reg(u16::from(bytes[at]));
    let id16 = |at: usize| Operand::Id(u16::from_le_bytes([bytes[at], bytes[at + 1]]));

    let mut operands = SmallVec::new();
    match format {
        Format::None => {}
        Format::Imm8 => operands.push(imm8(0)),
        Format::Imm16 => operands.push(Operand::Imm(i64::from(i16::from_le_bytes([
            bytes[0], bytes[1],
        ])))),
        Format::Imm32 => operands.push(Operand::Imm(i64::from(i32::from_le_bytes([
            bytes[0], bytes[1], bytes[2], bytes[3],
        ])))),
        Format::Imm64 => {
            let mut raw = [0u8; 8];
            raw.copy_from_slice(&bytes[..8]);
            operands.push(Operand::Imm(i64::from_le_bytes(raw)));
        }
        Format::V8 => operands.push(reg(0)),
        Format::V8V8 => {
            operands.push(reg(0));
            operands.push(reg(1));
        }
        Format::Imm8V8 => {
            operands.push(uimm8(0));
            operands.push(reg(1));
        }
        Format::Imm8V8V8 => {
            operands.push(uimm8(0));
            operands.push(reg(1));
            operands.push(reg(2));
        }
        Format::Imm8Id16 => {
            operands.push(uimm8(0));
            operands.push(id16(1));
        }
        Format::Imm8Id16V8 => {
            operands.push(uimm8(0));
            operands.push(id16(1));
            operands.push(reg(3));
        }
        Format::Imm8Imm8V8 => {
            operands.push(uimm8(0));
            operands.push(uimm8(1));
            operands.push(reg(2));
        }
        Format::Imm8Imm8 => {
            operands.push(uimm8(0));
            operands.push(uimm8(1));
        }
    }
    operands
}

#[cfg(test)]
#[expect(
    clippy::unwrap_used,
    reason = "tests use unwrap for concise assertions"
)]
