//! Loop analysis.
//!
//! Runs in two phases around liveness:
//!
//! 1. [`LoopAnalysis::analyze`]: a DFS over successor and catch edges finds
//!    back edges, numbers loop headers and produces reverse postorder.
//!    A catch handler that heads a loop hands its exception entries to a
//!    synthetic catch entry in front of it, so the header keeps a plain
//!    `LoopBegin`. Headers with several forward entries optionally get a
//!    synthetic preheader. The DFS is repeated after either change. The
//!    dominator tree is then built and every back edge whose target does
//!    not dominate its source marks the loop irreducible.
//! 2. [`LoopAnalysis::build_tree`]: once per-block definitions are known,
//!    loop bodies are collected by propagating backward from back-edge
//!    sources to the header, and the loops are arranged into a tree.

use std::fmt;

use bitvec::vec::BitVec;
use smallvec::SmallVec;

use crate::block::{BlockGraph, BlockId};
use crate::dominator::DominatorTree;
use crate::liveness::{LiveSet, Liveness};

/// Index of a loop in [`LoopAnalysis::loops`]. Equal to the header's loop
/// number minus one.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(transparent)]
pub struct LoopId(u32);

impl LoopId {
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

    /// Loop of a header with the given (non-zero) loop number.
    #[inline]
    pub fn from_loop_number(loop_number: u32) -> Option<Self> {
        loop_number.checked_sub(1).map(Self)
    }
}

impl fmt::Display for LoopId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "L{}", self.0)
    }
}

/// Visitation state of the back-edge DFS.
///
/// A finished block may still sit inside a loop whose header is on the
/// path. That case needs no state of its own: an edge into it is a forward
/// or cross edge either way, and irreducibility is decided later from the
/// dominator tree rather than from these marks.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum BackEdgeMark {
    Unvisited,
    /// On the current DFS path. An edge into such a block is a back edge.
    OnPath,
    Finished,
}

/// Visitation state of the body propagation in the loop-tree pass.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum LoopTreeMark {
    Outside,
    /// Forward-reachable from the header, not yet in the body.
    Reachable,
    Member,
}

#[derive(Clone, Debug)]
pub struct LoopInfo {
    pub id: LoopId,
    pub header: BlockId,
    /// Member blocks, indexed by block id. Always contains the header.
    pub body: BitVec,
    /// Frame slots written anywhere in the body.
    pub assignment: LiveSet,
    /// Blocks outside the body reached directly from a member.
    pub exits: Vec<BlockId>,
    pub parent: Option<LoopId>,
    pub children: Vec<LoopId>,
    /// 1 for outermost loops.
    pub depth: u32,
    pub num_back_edges: u32,
    pub irreducible: bool,
}

impl LoopInfo {
    #[inline]
    pub fn contains(&self, block: BlockId) -> bool {
        self.body.get(block.index()).is_some_and(|bit| *bit)
    }

    #[expect(
        clippy::cast_possible_truncation,
        reason = "block count is bounded by instruction count"
    )]
    pub fn blocks(&self) -> impl Iterator<Item = BlockId> + '_ {
        self.body.iter_ones().map(|i| BlockId::new(i as u32))
    }

    pub fn len(&self) -> usize {
        self.body.count_ones()
    }

    pub fn is_empty(&self) -> bool {
        self.body.not_any()
    }

    /// Is frame slot `slot` written somewhere in the loop?
    #[inline]
    pub fn assigns(&self, slot: usize) -> bool {
        self.assignment.contains(slot)
    }
}

pub struct LoopAnalysis {
    rpo: Vec<BlockId>,
    dominators: DominatorTree,
    loops: Vec<LoopInfo>,
    irreducible: bool,
    preheaders: Vec<BlockId>,
    catch_entries: Vec<BlockId>,
}

impl LoopAnalysis {
    /// Find back edges, optionally normalize loop entries, and build the
    /// dominator tree. The loop tree is left empty until [`build_tree`].
    ///
    /// [`build_tree`]: LoopAnalysis::build_tree
    pub fn analyze(graph: &mut BlockGraph, normalize_entries: bool) -> Self {
        let mut rpo = find_back_edges(graph);
        let mut catch_entries = Vec::new();
        loop {
            let split = split_catch_headers(graph);
            if split.is_empty() {
                break;
            }
            catch_entries.extend(split);
            graph.recount_state_preds();
            rpo = find_back_edges(graph);
        }

        let mut preheaders = Vec::new();
        if normalize_entries {
            preheaders = insert_preheaders(graph);
            if !preheaders.is_empty() {
                graph.recount_state_preds();
                rpo = find_back_edges(graph);
                debug_assert_eq!(graph.verify_edges(), Ok(()));
            }
        }

        let dominators = DominatorTree::build(graph, &rpo);
        let mut irreducible = false;
        for block in graph.live() {
            if block
                .loop_backs
                .iter()
                .any(|source| !dominators.dominates(block.id, *source))
            {
                irreducible = true;
            }
        }

        tracing::debug!(
            blocks = rpo.len(),
            headers = graph.live().filter(|b| b.is_loop_header()).count(),
            preheaders = preheaders.len(),
            catch_entries = catch_entries.len(),
            irreducible,
            "loop analysis"
        );
        LoopAnalysis {
            rpo,
            dominators,
            loops: Vec::new(),
            irreducible,
            preheaders,
            catch_entries,
        }
    }

    /// Collect loop bodies, assignments and exits, and link the loop tree.
    /// Sets `loop_index` of every member block to its innermost loop.
    pub fn build_tree(&mut self, graph: &mut BlockGraph, liveness: &Liveness) {
        let n = graph.len();
        let mut headers: Vec<BlockId> = Vec::new();
        for &id in &self.rpo {
            let block = graph.block(id);
            if let Some(loop_id) = LoopId::from_loop_number(block.loop_number) {
                if headers.len() <= loop_id.index() {
                    headers.resize(loop_id.index() + 1, BlockId::ENTRY);
                }
                headers[loop_id.index()] = id;
            }
        }

        let mut loops = Vec::with_capacity(headers.len());
        for (index, &header) in headers.iter().enumerate() {
            #[expect(
                clippy::cast_possible_truncation,
                reason = "loop count is bounded by block count"
            )]
            let id = LoopId::new(index as u32);
            let mut info = collect_body(graph, id, header, n, liveness.layout().len());

            for member in info.blocks().collect::<Vec<_>>() {
                info.assignment.union_with(liveness.defs(member));
                let block = graph.block(member);
                for &next in block.succs.iter().chain(&block.catches) {
                    if !info.contains(next) && !info.exits.contains(&next) {
                        info.exits.push(next);
                    }
                }
            }
            info.irreducible = graph
                .block(header)
                .loop_backs
                .iter()
                .any(|source| !self.dominators.dominates(header, *source));
            loops.push(info);
        }

        link_tree(&mut loops);

        // Innermost loops claim their blocks first.
        let mut by_size: Vec<usize> = (0..loops.len()).collect();
        by_size.sort_by_key(|&i| loops[i].len());
        for block in graph.iter_mut() {
            block.loop_index = None;
        }
        for i in by_size {
            for member in loops[i].blocks().collect::<Vec<_>>() {
                let block = graph.block_mut(member);
                if block.loop_index.is_none() {
                    block.loop_index = Some(loops[i].id);
                }
            }
        }

        for info in &loops {
            tracing::trace!(
                loop_id = %info.id,
                header = %info.header,
                blocks = info.len(),
                depth = info.depth,
                exits = info.exits.len(),
                irreducible = info.irreducible,
                "loop"
            );
        }
        tracing::debug!(loops = loops.len(), "built loop tree");
        self.loops = loops;
    }

    /// Blocks in reverse postorder, entry first.
    pub fn rpo(&self) -> &[BlockId] {
        &self.rpo
    }

    pub fn dominators(&self) -> &DominatorTree {
        &self.dominators
    }

    pub fn loops(&self) -> &[LoopInfo] {
        &self.loops
    }

    #[inline]
    pub fn loop_info(&self, id: LoopId) -> &LoopInfo {
        &self.loops[id.index()]
    }

    /// Does any loop have a header that fails to dominate one of its
    /// back-edge sources?
    pub fn irreducible(&self) -> bool {
        self.irreducible
    }

    /// Synthetic blocks inserted in front of multi-entry headers.
    pub fn preheaders(&self) -> &[BlockId] {
        &self.preheaders
    }

    /// Synthetic blocks that took over the exception entries of catch
    /// handlers heading a loop.
    pub fn catch_entries(&self) -> &[BlockId] {
        &self.catch_entries
    }

    /// Loop headed by `block`, if any.
    pub fn loop_headed_by(&self, graph: &BlockGraph, block: BlockId) -> Option<LoopId> {
        LoopId::from_loop_number(graph.block(block).loop_number)
    }

    /// Innermost loop containing `block`.
    pub fn loop_of(&self, graph: &BlockGraph, block: BlockId) -> Option<LoopId> {
        graph.block(block).loop_index
    }

    /// Loops left by the edge `from -> to`, innermost first.
    pub fn loops_exited(
        &self,
        graph: &BlockGraph,
        from: BlockId,
        to: BlockId,
    ) -> SmallVec<[LoopId; 2]> {
        let mut exited = SmallVec::new();
        let mut current = graph.block(from).loop_index;
        while let Some(id) = current {
            let info = self.loop_info(id);
            if info.contains(to) {
                break;
            }
            exited.push(id);
            current = info.parent;
        }
        exited
    }
}

/// Iterative DFS from the entry over successors, then catches. Records
/// back edges on their targets and returns reverse postorder of the
/// reachable blocks.
fn find_back_edges(graph: &mut BlockGraph) -> Vec<BlockId> {
    for block in graph.iter_mut() {
        block.loop_backs.clear();
        block.num_loop_back = 0;
        block.loop_number = 0;
        block.loop_index = None;
    }

    let mut marks = vec![BackEdgeMark::Unvisited; graph.len()];
    let mut postorder = Vec::with_capacity(graph.len());
    let mut next_loop = 1;
    // (block, index of the next outgoing edge)
    let mut stack: Vec<(BlockId, usize)> = vec![(BlockId::ENTRY, 0)];
    marks[BlockId::ENTRY.index()] = BackEdgeMark::OnPath;

    while let Some(top) = stack.last_mut() {
        let (id, cursor) = *top;
        top.1 += 1;
        let block = graph.block(id);
        let next = block.succs.iter().chain(&block.catches).nth(cursor).copied();
        let Some(to) = next else {
            marks[id.index()] = BackEdgeMark::Finished;
            postorder.push(id);
            stack.pop();
            continue;
        };
        match marks[to.index()] {
            BackEdgeMark::Unvisited => {
                marks[to.index()] = BackEdgeMark::OnPath;
                stack.push((to, 0));
            }
            BackEdgeMark::OnPath => {
                let header = graph.block_mut(to);
                if !header.loop_backs.contains(&id) {
                    header.loop_backs.push(id);
                    header.num_loop_back += 1;
                }
                if header.loop_number == 0 {
                    header.loop_number = next_loop;
                    next_loop += 1;
                }
            }
            BackEdgeMark::Finished => {}
        }
    }

    postorder.reverse();
    postorder
}

/// Move the exception entries of every catch handler that heads a loop and
/// also has ordinary predecessors onto a synthetic catch entry whose only
/// successor is the handler. The handler stops being a catch block.
///
/// A catch header without ordinary predecessors is left alone: all of its
/// entries, forward and back, are throw sites, and the emitter joins them
/// like any other header entries.
fn split_catch_headers(graph: &mut BlockGraph) -> Vec<BlockId> {
    let headers: Vec<BlockId> = graph
        .live()
        .filter(|b| b.is_catch && b.is_loop_header() && !b.preds.is_empty())
        .map(|b| b.id)
        .collect();

    let mut entries = Vec::with_capacity(headers.len());
    for header in headers {
        let block = graph.block_mut(header);
        let trys = std::mem::take(&mut block.trys);
        block.is_catch = false;
        let start = block.bytecodes.start;

        let entry = graph.push(start..start);
        for &source in &trys {
            for catch in &mut graph.block_mut(source).catches {
                if *catch == header {
                    *catch = entry;
                }
            }
        }
        let block = graph.block_mut(entry);
        block.is_catch = true;
        block.trys = trys;
        graph.add_edge(entry, header);

        tracing::trace!(%header, catch_entry = %entry, "split catch header");
        entries.push(entry);
    }
    entries
}

/// Give every non-catch header with more than one forward predecessor a
/// synthetic preheader that takes over all forward edges.
fn insert_preheaders(graph: &mut BlockGraph) -> Vec<BlockId> {
    let headers: Vec<BlockId> = graph
        .live()
        .filter(|b| b.is_loop_header() && !b.is_catch && b.forward_preds().count() > 1)
        .map(|b| b.id)
        .collect();

    let mut preheaders = Vec::with_capacity(headers.len());
    for header in headers {
        let block = graph.block(header);
        let forward: Vec<BlockId> = block.forward_preds().collect();
        let backs = block.loop_backs.clone();
        let start = block.bytecodes.start;

        let pre = graph.push(start..start);
        for &pred in &forward {
            graph.replace_successor(pred, header, pre);
            graph.block_mut(pre).preds.push(pred);
        }
        graph.block_mut(pre).succs.push(header);
        let block = graph.block_mut(header);
        block.preds.clear();
        block.preds.push(pre);
        block.preds.extend(backs);

        tracing::trace!(%header, preheader = %pre, entries = forward.len(), "inserted preheader");
        preheaders.push(pre);
    }
    preheaders
}

/// Body of the loop headed by `header`: blocks forward-reachable from the
/// header that reach one of its back-edge sources without passing through
/// the header.
fn collect_body(
    graph: &BlockGraph,
    id: LoopId,
    header: BlockId,
    n: usize,
    slots: usize,
) -> LoopInfo {
    let mut marks = vec![LoopTreeMark::Outside; n];
    let mut stack = vec![header];
    marks[header.index()] = LoopTreeMark::Reachable;
    while let Some(b) = stack.pop() {
        let block = graph.block(b);
        for &next in block.succs.iter().chain(&block.catches) {
            if marks[next.index()] == LoopTreeMark::Outside {
                marks[next.index()] = LoopTreeMark::Reachable;
                stack.push(next);
            }
        }
    }

    let head = graph.block(header);
    marks[header.index()] = LoopTreeMark::Member;
    let mut worklist: Vec<BlockId> = Vec::new();
    for &source in &head.loop_backs {
        if marks[source.index()] == LoopTreeMark::Reachable {
            marks[source.index()] = LoopTreeMark::Member;
            worklist.push(source);
        }
    }
    while let Some(b) = worklist.pop() {
        let block = graph.block(b);
        for &pred in block.preds.iter().chain(&block.trys) {
            if marks[pred.index()] == LoopTreeMark::Reachable {
                marks[pred.index()] = LoopTreeMark::Member;
                worklist.push(pred);
            }
        }
    }

    let mut body = BitVec::repeat(false, n);
    for (i, mark) in marks.iter().enumerate() {
        if *mark == LoopTreeMark::Member {
            body.set(i, true);
        }
    }

    LoopInfo {
        id,
        header,
        body,
        assignment: LiveSet::new(slots),
        exits: Vec::new(),
        parent: None,
        children: Vec::new(),
        depth: 1,
        num_back_edges: head.num_loop_back,
        irreducible: false,
    }
}

/// Parent of each loop: the smallest strictly larger loop containing its
/// header.
fn link_tree(loops: &mut [LoopInfo]) {
    let sizes: Vec<usize> = loops.iter().map(LoopInfo::len).collect();
    for i in 0..loops.len() {
        let header = loops[i].header;
        let parent = (0..loops.len())
            .filter(|&j| j != i && sizes[j] > sizes[i] && loops[j].contains(header))
            .min_by_key(|&j| sizes[j]);
        loops[i].parent = parent.map(|j| loops[j].id);
    }

    let mut outer_first: Vec<usize> = (0..loops.len()).collect();
    outer_first.sort_by_key(|&i| std::cmp::Reverse(sizes[i]));
    for i in outer_first {
        if let Some(parent) = loops[i].parent {
            let depth = loops[parent.index()].depth + 1;
            let child = loops[i].id;
            loops[i].depth = depth;
            loops[parent.index()].children.push(child);
        }
    }
}

#[cfg(test)]
#[expect(
    clippy::unwrap_used,
    reason = "tests use unwrap for concise assertions"
)]
