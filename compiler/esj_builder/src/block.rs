//! Basic blocks and the block graph.
//!
//! Blocks live in one arena and refer to each other by [`BlockId`]. Block 0
//! is the synthetic entry; blocks `1..=n` are the real blocks in bytecode
//! order; synthetic preheaders are appended after them. Blocks are never
//! removed: unreachable ones are marked dead and lose all their edges.

use std::fmt;
use std::ops::Range;

use smallvec::SmallVec;

use crate::loops::LoopId;
use crate::region::RegionIndex;

/// Index of a block in its [`BlockGraph`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(transparent)]
pub struct BlockId(u32);

impl BlockId {
    /// The synthetic entry block.
    pub const ENTRY: BlockId = BlockId(0);

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
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "B{}", self.0)
    }
}

pub type BlockList = SmallVec<[BlockId; 2]>;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BasicBlock {
    pub id: BlockId,
    /// Bytecode indices covered. Empty for synthetic blocks.
    pub bytecodes: Range<u32>,
    pub preds: BlockList,
    /// Ordered successors. For a conditional jump, `succs[0]` is the
    /// fall-through and `succs[1]` the jump target.
    pub succs: BlockList,
    /// Blocks whose exceptions this catch block handles.
    pub trys: BlockList,
    /// Catch handler of this block (at most one).
    pub catches: BlockList,
    /// Sources of back edges into this block.
    pub loop_backs: BlockList,
    pub num_loop_back: u32,
    /// Incoming control inputs: predecessor edges, plus one per throwing
    /// instruction in `trys`, plus one for an OSR entry.
    pub num_state_preds: u32,
    /// Throwing instructions in this block.
    pub throw_sites: u32,
    /// Non-zero for loop headers.
    pub loop_number: u32,
    /// Innermost loop whose body contains this block.
    pub loop_index: Option<LoopId>,
    pub is_dead: bool,
    pub is_catch: bool,
    pub osr_entry: bool,
}

impl BasicBlock {
    pub fn new(id: BlockId, bytecodes: Range<u32>) -> Self {
        BasicBlock {
            id,
            bytecodes,
            preds: SmallVec::new(),
            succs: SmallVec::new(),
            trys: SmallVec::new(),
            catches: SmallVec::new(),
            loop_backs: SmallVec::new(),
            num_loop_back: 0,
            num_state_preds: 0,
            throw_sites: 0,
            loop_number: 0,
            loop_index: None,
            is_dead: false,
            is_catch: false,
            osr_entry: false,
        }
    }

    #[inline]
    pub fn is_synthetic(&self) -> bool {
        self.bytecodes.is_empty()
    }

    #[inline]
    pub fn is_loop_header(&self) -> bool {
        self.loop_number > 0
    }

    /// The block's catch handler.
    #[inline]
    pub fn catch(&self) -> Option<BlockId> {
        self.catches.first().copied()
    }

    /// Forward (non-back-edge) control entries.
    pub fn forward_preds(&self) -> impl Iterator<Item = BlockId> + '_ {
        self.preds
            .iter()
            .copied()
            .filter(|p| !self.loop_backs.contains(p))
    }

    /// `(fall-through, jump target)` of a block ending in a two-way branch.
    pub fn branch_targets(&self) -> Option<(BlockId, BlockId)> {
        match self.succs.as_slice() {
            [fallthrough, taken] => Some((*fallthrough, *taken)),
            _ => None,
        }
    }

    pub fn last_bytecode(&self) -> Option<u32> {
        (!self.bytecodes.is_empty()).then(|| self.bytecodes.end - 1)
    }
}

/// All blocks of one method.
#[derive(Clone, Debug)]
pub struct BlockGraph {
    blocks: Vec<BasicBlock>,
    region: RegionIndex,
}

impl BlockGraph {
    pub(crate) fn new(blocks: Vec<BasicBlock>, region: RegionIndex) -> Self {
        BlockGraph { blocks, region }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    #[inline]
    pub fn block(&self, id: BlockId) -> &BasicBlock {
        &self.blocks[id.index()]
    }

    #[inline]
    pub(crate) fn block_mut(&mut self, id: BlockId) -> &mut BasicBlock {
        &mut self.blocks[id.index()]
    }

    pub fn iter(&self) -> impl Iterator<Item = &BasicBlock> {
        self.blocks.iter()
    }

    pub(crate) fn iter_mut(&mut self) -> impl Iterator<Item = &mut BasicBlock> {
        self.blocks.iter_mut()
    }

    #[expect(
        clippy::cast_possible_truncation,
        reason = "block count is bounded by instruction count"
    )]
    pub fn ids(&self) -> impl Iterator<Item = BlockId> {
        (0..self.blocks.len() as u32).map(BlockId::new)
    }

    /// Live blocks.
    pub fn live(&self) -> impl Iterator<Item = &BasicBlock> {
        self.blocks.iter().filter(|b| !b.is_dead)
    }

    pub fn region(&self) -> &RegionIndex {
        &self.region
    }

    /// Real block containing bytecode index `bc_index`.
    pub fn block_containing(&self, bc_index: u32) -> Option<BlockId> {
        let id = BlockId::new(self.region.block_index(bc_index));
        let block = self.blocks.get(id.index())?;
        block.bytecodes.contains(&bc_index).then_some(id)
    }

    #[expect(
        clippy::cast_possible_truncation,
        reason = "block count is bounded by instruction count"
    )]
    pub(crate) fn push(&mut self, bytecodes: Range<u32>) -> BlockId {
        let id = BlockId::new(self.blocks.len() as u32);
        self.blocks.push(BasicBlock::new(id, bytecodes));
        id
    }

    // ── Edges ───────────────────────────────────────────────────────

    pub(crate) fn add_edge(&mut self, from: BlockId, to: BlockId) {
        self.blocks[from.index()].succs.push(to);
        self.blocks[to.index()].preds.push(from);
    }

    pub(crate) fn add_catch_edge(&mut self, from: BlockId, catch: BlockId) {
        self.blocks[from.index()].catches.push(catch);
        self.blocks[catch.index()].trys.push(from);
    }

    /// Redirect the `from -> old` edge to `from -> new`, keeping the
    /// position of the successor. The caller fixes up predecessor lists.
    pub(crate) fn replace_successor(&mut self, from: BlockId, old: BlockId, new: BlockId) {
        for succ in &mut self.blocks[from.index()].succs {
            if *succ == old {
                *succ = new;
            }
        }
    }

    /// Cut every edge of `id`, on both ends, and mark it dead.
    pub(crate) fn kill(&mut self, id: BlockId) {
        let block = &mut self.blocks[id.index()];
        block.is_dead = true;
        let succs = std::mem::take(&mut block.succs);
        let preds = std::mem::take(&mut block.preds);
        let catches = std::mem::take(&mut block.catches);
        let trys = std::mem::take(&mut block.trys);
        block.loop_backs.clear();

        for s in succs {
            self.blocks[s.index()].preds.retain(|p| *p != id);
        }
        for p in preds {
            self.blocks[p.index()].succs.retain(|s| *s != id);
        }
        for c in catches {
            self.blocks[c.index()].trys.retain(|t| *t != id);
        }
        for t in trys {
            self.blocks[t.index()].catches.retain(|c| *c != id);
        }
    }

    /// Control entries of `source` into `target`: one for a successor
    /// edge and one per throw site for a catch edge.
    pub fn entries_from(&self, source: BlockId, target: BlockId) -> usize {
        let block = self.block(target);
        let edge = usize::from(block.preds.contains(&source));
        let throws = if block.trys.contains(&source) {
            self.block(source).throw_sites as usize
        } else {
            0
        };
        edge + throws
    }

    /// Forward control entries of loop header `id`, the OSR entry
    /// included.
    pub fn forward_entries(&self, id: BlockId) -> usize {
        let block = self.block(id);
        let mut sources: BlockList = block.preds.iter().chain(&block.trys).copied().collect();
        sources.sort_unstable();
        sources.dedup();
        sources
            .iter()
            .filter(|source| !block.loop_backs.contains(source))
            .map(|source| self.entries_from(*source, id))
            .sum::<usize>()
            + usize::from(block.osr_entry)
    }

    /// Back-edge control entries of loop header `id`.
    pub fn back_entries(&self, id: BlockId) -> usize {
        let block = self.block(id);
        block
            .loop_backs
            .iter()
            .map(|source| self.entries_from(*source, id))
            .sum()
    }

    /// Recount control inputs after the edge set changed.
    pub(crate) fn recount_state_preds(&mut self) {
        let counts: Vec<u32> = self
            .blocks
            .iter()
            .map(|b| {
                #[expect(
                    clippy::cast_possible_truncation,
                    reason = "predecessor count is bounded by block count"
                )]
                let preds = b.preds.len() as u32;
                let throws: u32 = b.trys.iter().map(|t| self.block(*t).throw_sites).sum();
                preds + throws + u32::from(b.osr_entry)
            })
            .collect();
        for (block, count) in self.blocks.iter_mut().zip(counts) {
            block.num_state_preds = count;
        }
    }

    /// Check that successor/predecessor and catch/try lists mirror each
    /// other.
    pub fn verify_edges(&self) -> Result<(), String> {
        for block in &self.blocks {
            for s in &block.succs {
                if !self.block(*s).preds.contains(&block.id) {
                    return Err(format!("{} -> {s} missing from preds of {s}", block.id));
                }
            }
            for p in &block.preds {
                if !self.block(*p).succs.contains(&block.id) {
                    return Err(format!("{p} -> {} missing from succs of {p}", block.id));
                }
            }
            for c in &block.catches {
                if !self.block(*c).trys.contains(&block.id) {
                    return Err(format!("catch {c} of {} does not list it", block.id));
                }
            }
            for t in &block.trys {
                if !self.block(*t).catches.contains(&block.id) {
                    return Err(format!("try {t} of {} does not list it", block.id));
                }
            }
            if block.is_dead
                && !(block.succs.is_empty()
                    && block.preds.is_empty()
                    && block.catches.is_empty()
                    && block.trys.is_empty())
            {
                return Err(format!("dead block {} still has edges", block.id));
            }
        }
        Ok(())
    }
}

impl fmt::Display for BlockGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn ids(f: &mut fmt::Formatter<'_>, tag: &str, list: &[BlockId]) -> fmt::Result {
            if list.is_empty() {
                return Ok(());
            }
            write!(f, " {tag}:")?;
            for id in list {
                write!(f, " {id}")?;
            }
            Ok(())
        }

        for block in &self.blocks {
            write!(f, "{}", block.id)?;
            if block.is_dead {
                writeln!(f, " dead")?;
                continue;
            }
            if block.is_synthetic() {
                f.write_str(" [synthetic]")?;
            } else {
                write!(f, " [{}..{})", block.bytecodes.start, block.bytecodes.end)?;
            }
            ids(f, "preds", &block.preds)?;
            ids(f, "succs", &block.succs)?;
            ids(f, "catches", &block.catches)?;
            ids(f, "trys", &block.trys)?;
            if block.is_loop_header() {
                write!(
                    f,
                    " loop#{} backs={}",
                    block.loop_number, block.num_loop_back
                )?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}
