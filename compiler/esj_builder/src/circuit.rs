//! The finished build: the graph plus every analysis it was built from.

use esj_circuit::{Graph, NodeId};
use rustc_hash::FxHashMap;
use smallvec::SmallVec;

use crate::block::{BasicBlock, BlockGraph, BlockId};
use crate::cfg::BytecodeTable;
use crate::frame::NodeSink;
use crate::liveness::Liveness;
use crate::loops::{LoopAnalysis, LoopInfo};

/// Output of [`build_circuit`](crate::build_circuit).
///
/// Owns all of its parts, so it can be moved to another thread for the
/// downstream passes.
pub struct Circuit {
    graph: Graph,
    blocks: BlockGraph,
    loops: LoopAnalysis,
    liveness: Liveness,
    bytecodes: BytecodeTable,
    block_of: FxHashMap<NodeId, BlockId>,
    nodes_at: Vec<SmallVec<[NodeId; 2]>>,
}

impl Circuit {
    pub(crate) fn new(
        sink: NodeSink,
        blocks: BlockGraph,
        loops: LoopAnalysis,
        liveness: Liveness,
        bytecodes: BytecodeTable,
    ) -> Self {
        Circuit {
            graph: sink.graph,
            blocks,
            loops,
            liveness,
            bytecodes,
            block_of: sink.block_of,
            nodes_at: sink.nodes_at,
        }
    }

    #[inline]
    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    pub fn into_graph(self) -> Graph {
        self.graph
    }

    #[inline]
    pub fn blocks(&self) -> &BlockGraph {
        &self.blocks
    }

    #[inline]
    pub fn block(&self, id: BlockId) -> &BasicBlock {
        self.blocks.block(id)
    }

    pub fn loops(&self) -> &LoopAnalysis {
        &self.loops
    }

    pub fn liveness(&self) -> &Liveness {
        &self.liveness
    }

    pub fn bytecodes(&self) -> &BytecodeTable {
        &self.bytecodes
    }

    /// Block whose translation produced `node`. Shared nodes (entries,
    /// constants, `OptimizedOut`) belong to no block.
    pub fn block_of(&self, node: NodeId) -> Option<BlockId> {
        self.block_of.get(&node).copied()
    }

    /// Nodes emitted for the bytecode at `bc_index`, in creation order.
    pub fn nodes_at(&self, bc_index: u32) -> &[NodeId] {
        self.nodes_at
            .get(bc_index as usize)
            .map_or(&[], |nodes| nodes.as_slice())
    }

    pub fn block_containing(&self, bc_index: u32) -> Option<BlockId> {
        self.blocks.block_containing(bc_index)
    }

    /// Innermost loop containing `block`.
    pub fn loop_of(&self, block: BlockId) -> Option<&LoopInfo> {
        self.loops
            .loop_of(&self.blocks, block)
            .map(|id| self.loops.loop_info(id))
    }

    /// Is any loop of the method irreducible? Loop-based optimizations
    /// must not run when this is set.
    pub fn irreducible(&self) -> bool {
        self.loops.irreducible()
    }
}
