//! Node handles, operations and node payloads.

use std::fmt;

use esj_bytecode::Opcode;
use smallvec::SmallVec;

// ── Handles ─────────────────────────────────────────────────────────

/// Handle to a node in a [`Graph`](crate::Graph).
///
/// Handles are arena indices allocated sequentially from 0.
/// [`NodeId::NONE`] marks an input that has not been wired yet.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(transparent)]
pub struct NodeId(u32);

impl NodeId {
    /// The "no node" sentinel.
    pub const NONE: NodeId = NodeId(u32::MAX);

    #[inline]
    pub fn new(raw: u32) -> Self {
        Self(raw)
    }

    #[inline]
    pub fn raw(self) -> u32 {
        self.0
    }

    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }

    #[inline]
    pub fn is_none(self) -> bool {
        self == Self::NONE
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_none() {
            f.write_str("_")
        } else {
            write!(f, "%{}", self.0)
        }
    }
}

// ── Operations ──────────────────────────────────────────────────────

/// Interned constant payload.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ConstValue {
    Undefined,
    Null,
    Bool(bool),
    Int(i32),
    /// IEEE-754 bits.
    Double(u64),
    /// Raw immediate operand.
    Imm(i64),
    /// Constant-pool id.
    PoolId(u16),
}

impl fmt::Display for ConstValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConstValue::Undefined => f.write_str("undefined"),
            ConstValue::Null => f.write_str("null"),
            ConstValue::Bool(b) => write!(f, "{b}"),
            ConstValue::Int(i) => write!(f, "{i}"),
            ConstValue::Double(bits) => write!(f, "{}", f64::from_bits(*bits)),
            ConstValue::Imm(i) => write!(f, "#{i}"),
            ConstValue::PoolId(id) => write!(f, "@{id}"),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Op {
    // Entries
    StateEntry,
    DependEntry,
    Arg { index: u16 },
    LexicalEnv,
    Constant(ConstValue),
    OptimizedOut,

    // Control joins and selectors
    Merge,
    LoopBegin,
    LoopBack,
    DependSelector,
    ValueSelector,
    LoopExit,
    LoopExitDepend,
    LoopExitValue,

    // Branching
    IfBranch { jump_if: bool },
    IfTrue,
    IfFalse,
    IfSuccess,
    IfException,
    GetException,

    // Operations
    JsBytecode { opcode: Opcode, bc_index: u32 },
    FrameState { bc_index: u32 },
    Return,
    InlineReturn,

    // On-stack replacement
    OsrEntry,
    OsrValue { slot: u32 },
}

impl Op {
    /// Joins several control inputs; selectors hang off it.
    #[inline]
    pub fn is_control_join(self) -> bool {
        matches!(self, Op::Merge | Op::LoopBegin)
    }

    #[inline]
    pub fn is_selector(self) -> bool {
        matches!(self, Op::ValueSelector | Op::DependSelector)
    }

    #[inline]
    pub fn is_constant(self) -> bool {
        matches!(self, Op::Constant(_))
    }
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Op::Arg { index } => write!(f, "Arg({index})"),
            Op::Constant(value) => write!(f, "Constant({value})"),
            Op::IfBranch { jump_if } => write!(f, "IfBranch({jump_if})"),
            Op::JsBytecode { opcode, bc_index } => write!(f, "JsBytecode({opcode}@{bc_index})"),
            Op::FrameState { bc_index } => write!(f, "FrameState(@{bc_index})"),
            Op::OsrValue { slot } => write!(f, "OsrValue({slot})"),
            other => write!(f, "{other:?}"),
        }
    }
}

// ── Nodes ───────────────────────────────────────────────────────────

/// Profile-derived hint attached to an operation node.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub struct TypeHint {
    pub elements_kind: Option<u8>,
    pub shape_id: Option<u32>,
}

/// One IR node. Inputs are owned by the consumer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Node {
    pub op: Op,
    pub state_inputs: SmallVec<[NodeId; 2]>,
    pub depend_inputs: SmallVec<[NodeId; 2]>,
    pub value_inputs: SmallVec<[NodeId; 4]>,
    /// Snapshot used to deoptimize or unwind at this node.
    pub frame_state: Option<NodeId>,
    pub hint: Option<TypeHint>,
}

impl Node {
    pub fn new(op: Op) -> Self {
        Node {
            op,
            state_inputs: SmallVec::new(),
            depend_inputs: SmallVec::new(),
            value_inputs: SmallVec::new(),
            frame_state: None,
            hint: None,
        }
    }

    #[must_use]
    pub fn with_state(mut self, inputs: &[NodeId]) -> Self {
        self.state_inputs.extend_from_slice(inputs);
        self
    }

    #[must_use]
    pub fn with_depend(mut self, inputs: &[NodeId]) -> Self {
        self.depend_inputs.extend_from_slice(inputs);
        self
    }

    #[must_use]
    pub fn with_values(mut self, inputs: &[NodeId]) -> Self {
        self.value_inputs.extend_from_slice(inputs);
        self
    }

    /// All inputs, state first, then depend, then value, then frame state.
    pub fn inputs(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.state_inputs
            .iter()
            .chain(&self.depend_inputs)
            .chain(&self.value_inputs)
            .copied()
            .chain(self.frame_state)
    }
}
