//! Opcode to node-template table.
//!
//! Templates are resolved once per general instruction when the method is
//! scanned, and from then on they are the only source for what the
//! instruction throws and writes: throw sites in the block graph, slot
//! definitions in liveness and node outputs in the emitter all read them.
//! Value inputs are still wired from the [`BytecodeInfo`]; the template
//! says how many there must be, checked in debug builds.

use esj_bytecode::{BytecodeFlags, BytecodeInfo};

/// Shape of the node emitted for one general instruction.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct NodeTemplate {
    /// Value inputs: operands, then the accumulator, then the environment.
    pub value_inputs: usize,
    pub writes_acc: bool,
    /// Nonzero when the result also lands in the instruction's output
    /// register.
    pub vreg_outputs: usize,
    /// `WRITE_ENV`, `NO_THROW` and `SUPPORT_DEOPT` are honored; the
    /// accumulator and register writes come from the fields above.
    pub flags: BytecodeFlags,
}

impl NodeTemplate {
    #[inline]
    pub fn writes_env(&self) -> bool {
        self.flags.contains(BytecodeFlags::WRITE_ENV)
    }

    #[inline]
    pub fn can_throw(&self) -> bool {
        !self.flags.contains(BytecodeFlags::NO_THROW)
    }

    /// Whether the node carries a frame state.
    #[inline]
    pub fn needs_frame_state(&self) -> bool {
        self.can_throw() || self.flags.contains(BytecodeFlags::SUPPORT_DEOPT)
    }
}

pub trait TemplateTable {
    fn template(&self, info: &BytecodeInfo) -> NodeTemplate;
}

/// Templates derived directly from instruction metadata.
#[derive(Clone, Copy, Debug, Default)]
pub struct BytecodeTemplates;

impl TemplateTable for BytecodeTemplates {
    fn template(&self, info: &BytecodeInfo) -> NodeTemplate {
        NodeTemplate {
            value_inputs: info.inputs.len()
                + usize::from(info.reads_acc())
                + usize::from(info.reads_env()),
            writes_acc: info.writes_acc(),
            vreg_outputs: usize::from(info.vreg_out.is_some()),
            flags: info.flags,
        }
    }
}
