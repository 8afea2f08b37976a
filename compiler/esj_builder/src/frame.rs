//! Value frames and join points.
//!
//! A [`ValueFrame`] maps every frame slot to the node currently holding its
//! value, together with the control (`state`) and effect (`depend`) chain
//! heads. Frames flow along block edges; where several edges meet, a
//! [`MergeFrame`] collects them into a `Merge` node, a `DependSelector`,
//! and `ValueSelector`s for the slots live at the join.
//!
//! Selectors are created lazily: a slot whose incoming values are all the
//! same node never gets one.

use esj_circuit::{Graph, NodeId, Op};
use rustc_hash::FxHashMap;
use smallvec::SmallVec;

use crate::block::BlockId;
use crate::error::BuildError;
use crate::liveness::LiveSet;

// ── Node recording ──────────────────────────────────────────────────

/// The graph under construction plus the bookkeeping that maps nodes back
/// to blocks and bytecodes.
pub(crate) struct NodeSink {
    pub(crate) graph: Graph,
    pub(crate) block_of: FxHashMap<NodeId, BlockId>,
    pub(crate) nodes_at: Vec<SmallVec<[NodeId; 2]>>,
    /// Bytecode being translated, if any.
    pub(crate) current_bc: Option<u32>,
}

impl NodeSink {
    pub(crate) fn new(num_bytecodes: usize) -> Self {
        NodeSink {
            graph: Graph::new(),
            block_of: FxHashMap::default(),
            nodes_at: vec![SmallVec::new(); num_bytecodes],
            current_bc: None,
        }
    }

    /// Add a node produced while translating `block`.
    pub(crate) fn add(
        &mut self,
        block: BlockId,
        op: Op,
        state: &[NodeId],
        depend: &[NodeId],
        value: &[NodeId],
    ) -> NodeId {
        let id = self.graph.add_node(op, state, depend, value);
        self.block_of.insert(id, block);
        if let Some(bc) = self.current_bc {
            self.nodes_at[bc as usize].push(id);
        }
        id
    }
}

// ── Frames ──────────────────────────────────────────────────────────

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ValueFrame {
    /// One node per slot; [`NodeId::NONE`] where the slot holds no value.
    pub slots: Vec<NodeId>,
    pub state: NodeId,
    pub depend: NodeId,
}

impl ValueFrame {
    pub fn new(num_slots: usize, state: NodeId, depend: NodeId) -> Self {
        ValueFrame {
            slots: vec![NodeId::NONE; num_slots],
            state,
            depend,
        }
    }

    #[inline]
    pub fn get(&self, slot: usize) -> NodeId {
        self.slots[slot]
    }

    #[inline]
    pub fn set(&mut self, slot: usize, value: NodeId) {
        self.slots[slot] = value;
    }

    /// Value of `slot`, which the code at `bc_index` reads.
    pub fn read(&self, slot: usize, bc_index: u32) -> Result<NodeId, BuildError> {
        let value = self.slots[slot];
        if value.is_none() {
            return Err(BuildError::Internal(format!(
                "bytecode {bc_index} reads slot {slot}, which has no value"
            )));
        }
        Ok(value)
    }

    #[must_use]
    pub fn with_control(mut self, state: NodeId, depend: NodeId) -> Self {
        self.state = state;
        self.depend = depend;
        self
    }
}

// ── Joins ───────────────────────────────────────────────────────────

/// A `Merge` whose inputs are still arriving.
pub(crate) struct MergeFrame {
    block: BlockId,
    join: NodeId,
    depend_selector: NodeId,
    arity: usize,
    filled: usize,
    /// Slots that get merged; the rest are left without a value.
    live: LiveSet,
    values: Vec<NodeId>,
    selectors: Vec<Option<NodeId>>,
}

impl MergeFrame {
    /// Create the `Merge` and `DependSelector` for `arity` incoming edges of
    /// `block`, with every input unwired.
    pub(crate) fn new(sink: &mut NodeSink, block: BlockId, arity: usize, live: LiveSet) -> Self {
        let unwired = vec![NodeId::NONE; arity];
        let join = sink.add(block, Op::Merge, &unwired, &[], &[]);
        let depend_selector = sink.add(block, Op::DependSelector, &[join], &unwired, &[]);
        let num_slots = live.capacity();
        MergeFrame {
            block,
            join,
            depend_selector,
            arity,
            filled: 0,
            live,
            values: vec![NodeId::NONE; num_slots],
            selectors: vec![None; num_slots],
        }
    }

    /// Wire the next incoming edge.
    pub(crate) fn add_input(
        &mut self,
        sink: &mut NodeSink,
        frame: &ValueFrame,
    ) -> Result<(), BuildError> {
        let k = self.filled;
        if k >= self.arity {
            return Err(BuildError::Internal(format!(
                "{} received more than {} incoming edges",
                self.block, self.arity
            )));
        }
        self.filled += 1;
        sink.graph.set_state_input(self.join, k, frame.state);
        sink.graph
            .set_depend_input(self.depend_selector, k, frame.depend);
        let live: SmallVec<[usize; 16]> = self.live.iter().collect();
        for slot in live {
            self.merge_value(sink, slot, k, frame.slots[slot]);
        }
        Ok(())
    }

    /// Record `value` as input `k` of `slot`.
    fn merge_value(&mut self, sink: &mut NodeSink, slot: usize, k: usize, value: NodeId) {
        if let Some(selector) = self.selectors[slot] {
            sink.graph.set_value_input(selector, k, value);
            return;
        }
        if k == 0 {
            self.values[slot] = value;
            return;
        }
        if self.values[slot] == value {
            return;
        }
        let mut inputs = vec![self.values[slot]; k];
        inputs.push(value);
        inputs.resize(self.arity, NodeId::NONE);
        let selector = sink.add(self.block, Op::ValueSelector, &[self.join], &[], &inputs);
        self.selectors[slot] = Some(selector);
        self.values[slot] = selector;
    }

    #[inline]
    pub(crate) fn is_complete(&self) -> bool {
        self.filled == self.arity
    }

    #[inline]
    pub(crate) fn join(&self) -> NodeId {
        self.join
    }

    #[inline]
    pub(crate) fn depend_selector(&self) -> NodeId {
        self.depend_selector
    }

    /// Merged value of `slot` so far.
    #[inline]
    pub(crate) fn value(&self, slot: usize) -> NodeId {
        self.values[slot]
    }

    /// The frame leaving the join.
    pub(crate) fn finish(self) -> ValueFrame {
        ValueFrame {
            slots: self.values,
            state: self.join,
            depend: self.depend_selector,
        }
    }
}

/// Frames that have reached a block before it is visited.
pub(crate) enum Pending {
    Empty,
    Single(ValueFrame),
    Merge(MergeFrame),
}

impl Pending {
    pub(crate) fn take(&mut self) -> Pending {
        std::mem::replace(self, Pending::Empty)
    }
}

/// Join state of a visited loop header, waiting for its back edges.
pub(crate) struct LoopHeaderFrame {
    pub(crate) loop_begin: NodeId,
    pub(crate) depend_selector: NodeId,
    /// Header selector per slot that is live at the header and assigned in
    /// the loop.
    pub(crate) selectors: Vec<Option<NodeId>>,
    /// Joins the back edges when there is more than one.
    pub(crate) back_merge: Option<MergeFrame>,
}

impl LoopHeaderFrame {
    /// Wire one back edge. `frame.state` is the edge's `LoopBack` node.
    pub(crate) fn add_back_edge(
        &mut self,
        sink: &mut NodeSink,
        frame: &ValueFrame,
    ) -> Result<(), BuildError> {
        match &mut self.back_merge {
            None => {
                sink.graph.set_state_input(self.loop_begin, 1, frame.state);
                sink.graph
                    .set_depend_input(self.depend_selector, 1, frame.depend);
                for (slot, selector) in self.selectors.iter().enumerate() {
                    if let Some(selector) = *selector {
                        sink.graph.set_value_input(selector, 1, frame.slots[slot]);
                    }
                }
            }
            Some(merge) => {
                merge.add_input(sink, frame)?;
                if merge.is_complete() {
                    sink.graph
                        .set_depend_input(self.depend_selector, 1, merge.depend_selector());
                    for (slot, selector) in self.selectors.iter().enumerate() {
                        if let Some(selector) = *selector {
                            sink.graph.set_value_input(selector, 1, merge.value(slot));
                        }
                    }
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
#[expect(
    clippy::unwrap_used,
    reason = "tests use unwrap for concise assertions"
)]
