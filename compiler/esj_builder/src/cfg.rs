//! CFG construction.
//!
//! One forward scan classifies every instruction and feeds jump targets and
//! exception-table boundaries into the [`RegionIndex`]. Blocks are then
//! materialized per region item, edges are wired (fall-through first, then
//! explicit jump edges), catch handlers are attached to the blocks their
//! try ranges cover, and unreachable blocks are swept.
//!
//! Malformed input is reported as a [`BuildError`] and aborts the build.

use esj_bytecode::{decode, BytecodeInfo, ExceptionEntry, Method};
use rustc_hash::FxHashMap;
use smallvec::SmallVec;

use crate::block::{BlockGraph, BlockId};
use crate::error::BuildError;
use crate::region::{RegionIndex, RegionKind};
use crate::template::{BytecodeTemplates, NodeTemplate, TemplateTable};

/// Classified instructions of a method, addressable by bytecode index.
///
/// General instructions carry the node template resolved at scan time, so
/// block building, liveness and emission agree on what each one throws and
/// writes.
#[derive(Clone, Debug)]
pub struct BytecodeTable {
    infos: Vec<BytecodeInfo>,
    templates: Vec<Option<NodeTemplate>>,
    index_of_pc: FxHashMap<u32, u32>,
    code_len: u32,
}

impl BytecodeTable {
    /// Decode and classify `method`, checking register operands.
    pub fn scan(method: &Method) -> Result<Self, BuildError> {
        Self::scan_with(method, &BytecodeTemplates)
    }

    /// Like [`scan`](Self::scan), with general instructions shaped by
    /// `templates`.
    #[expect(
        clippy::cast_possible_truncation,
        reason = "instruction count and code size fit in u32"
    )]
    pub fn scan_with(method: &Method, templates: &dyn TemplateTable) -> Result<Self, BuildError> {
        if method.num_args > method.num_vregs {
            return Err(BuildError::TooManyArguments {
                num_args: method.num_args,
                num_vregs: method.num_vregs,
            });
        }

        let instructions = decode(&method.code)?;
        let mut infos = Vec::with_capacity(instructions.len());
        let mut resolved = Vec::with_capacity(instructions.len());
        let mut index_of_pc = FxHashMap::default();
        for (index, inst) in instructions.iter().enumerate() {
            let info = BytecodeInfo::new(inst);
            if let Some(vreg) = info.vregs().find(|r| *r >= method.num_vregs) {
                return Err(BuildError::RegisterOutOfRange {
                    bc_index: index as u32,
                    vreg,
                    num_vregs: method.num_vregs,
                });
            }
            index_of_pc.insert(inst.pc, index as u32);
            resolved.push(info.is_general().then(|| templates.template(&info)));
            infos.push(info);
        }

        let code_len = method.code.len() as u32;
        index_of_pc.insert(code_len, infos.len() as u32);
        Ok(BytecodeTable {
            infos,
            templates: resolved,
            index_of_pc,
            code_len,
        })
    }

    #[inline]
    #[expect(
        clippy::cast_possible_truncation,
        reason = "instruction count fits in u32"
    )]
    pub fn len(&self) -> u32 {
        self.infos.len() as u32
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.infos.is_empty()
    }

    #[inline]
    pub fn get(&self, bc_index: u32) -> &BytecodeInfo {
        &self.infos[bc_index as usize]
    }

    pub fn infos(&self) -> &[BytecodeInfo] {
        &self.infos
    }

    /// Node template of a general instruction; `None` for everything the
    /// emitter handles structurally.
    #[inline]
    pub fn template(&self, bc_index: u32) -> Option<&NodeTemplate> {
        self.templates[bc_index as usize].as_ref()
    }

    /// Whether the instruction at `bc_index` may transfer to a catch
    /// handler.
    #[inline]
    pub fn can_throw(&self, bc_index: u32) -> bool {
        self.template(bc_index).is_some_and(NodeTemplate::can_throw)
    }

    /// Bytecode index of the instruction starting at `pc`. The end of the
    /// code maps to `len()`.
    pub fn index_of_pc(&self, pc: i64) -> Option<u32> {
        let pc = u32::try_from(pc).ok()?;
        self.index_of_pc.get(&pc).copied()
    }

    pub fn code_len(&self) -> u32 {
        self.code_len
    }

    /// Absolute target index of the jump at `bc_index`.
    pub fn jump_target(&self, bc_index: u32) -> Result<Option<u32>, BuildError> {
        let info = self.get(bc_index);
        let Some(offset) = info.jump_offset else {
            return Ok(None);
        };
        let target_pc = i64::from(info.pc) + offset;
        match self.index_of_pc(target_pc) {
            Some(target) if target < self.len() => Ok(Some(target)),
            _ => Err(BuildError::MisalignedTarget {
                bc_index,
                target_pc,
            }),
        }
    }
}

/// A validated, non-empty try range in bytecode indices.
#[derive(Clone, Debug, PartialEq, Eq)]
struct TryRegion {
    start: u32,
    end: u32,
    handlers: SmallVec<[u32; 2]>,
    pcs: (u32, u32),
}

impl TryRegion {
    fn covers(&self, bc_index: u32) -> bool {
        self.start <= bc_index && bc_index < self.end
    }

    fn len(&self) -> u32 {
        self.end - self.start
    }
}

/// Build the block graph of a scanned method.
pub fn build_blocks(
    table: &BytecodeTable,
    exceptions: &[ExceptionEntry],
) -> Result<BlockGraph, BuildError> {
    let n = table.len();
    let mut region = RegionIndex::new();

    // Control transfers.
    for bc in 0..n {
        let info = table.get(bc);
        let has_next = bc + 1 < n;
        if info.is_jump() {
            let Some(target) = table.jump_target(bc)? else {
                continue;
            };
            if info.is_terminator() {
                if has_next {
                    region.insert_head(bc + 1);
                }
                region.insert_jump(target, bc, true);
            } else {
                if !has_next {
                    return Err(BuildError::FallsOffEnd { bc_index: bc });
                }
                region.insert_split(bc + 1);
                region.insert_jump(target, bc, false);
            }
        } else if info.is_terminator() && has_next {
            region.insert_head(bc + 1);
        }
    }
    if n > 0 && !table.get(n - 1).is_terminator() {
        return Err(BuildError::FallsOffEnd { bc_index: n - 1 });
    }

    // Exception boundaries.
    let tries = validate_tries(table, exceptions)?;
    for range in &tries {
        region.insert_split(range.start);
        if range.end < n {
            region.insert_split(range.end);
        }
        // Code may fall into a handler; a preceding terminator has
        // already made the handler a head.
        for &handler in &range.handlers {
            region.insert_split(handler);
        }
    }

    // One block per region item, after the synthetic entry.
    let items = region.items().to_vec();
    let splits = region.splits().to_vec();
    let mut graph = BlockGraph::new(Vec::with_capacity(items.len() + 1), region);
    graph.push(0..0);
    for (k, item) in items.iter().enumerate() {
        let end = items.get(k + 1).map_or(n, |next| next.start);
        graph.push(item.start..end);
    }

    let ids: Vec<BlockId> = graph.ids().collect();
    graph.add_edge(BlockId::ENTRY, ids[1]);
    for (k, item) in items.iter().enumerate().skip(1) {
        if item.kind == RegionKind::Split {
            graph.add_edge(ids[k], ids[k + 1]);
        }
    }
    for split in &splits {
        let from = BlockId::new(graph.region().block_index(split.pred));
        let to = BlockId::new(graph.region().block_index(split.start));
        graph.add_edge(from, to);
    }

    // Throw sites, then catch handlers.
    for block in graph.iter_mut() {
        #[expect(
            clippy::cast_possible_truncation,
            reason = "instruction count fits in u32"
        )]
        let throws = block
            .bytecodes
            .clone()
            .filter(|bc| table.can_throw(*bc))
            .count() as u32;
        block.throw_sites = throws;
    }
    attach_catches(&mut graph, &tries);

    let removed = remove_unreachable(&mut graph);
    graph.recount_state_preds();
    debug_assert_eq!(graph.verify_edges(), Ok(()));

    tracing::debug!(
        instructions = n,
        blocks = graph.len(),
        removed,
        tries = tries.len(),
        "built block graph"
    );
    tracing::trace!("block graph:\n{graph}");
    Ok(graph)
}

fn validate_tries(
    table: &BytecodeTable,
    exceptions: &[ExceptionEntry],
) -> Result<Vec<TryRegion>, BuildError> {
    let n = table.len();
    let mut tries = Vec::with_capacity(exceptions.len());
    for entry in exceptions {
        if entry.start_pc > entry.end_pc {
            return Err(BuildError::InvalidTryRange {
                start_pc: entry.start_pc,
                end_pc: entry.end_pc,
            });
        }
        if entry.start_pc == entry.end_pc || entry.handlers.is_empty() {
            continue;
        }
        let boundary = |pc: u32| {
            table
                .index_of_pc(i64::from(pc))
                .ok_or(BuildError::MisalignedTryBoundary { pc })
        };
        let start = boundary(entry.start_pc)?;
        let end = boundary(entry.end_pc)?;
        let mut handlers = SmallVec::new();
        for &pc in &entry.handlers {
            let handler = boundary(pc)?;
            if handler >= n {
                return Err(BuildError::MisalignedTryBoundary { pc });
            }
            if !handlers.contains(&handler) {
                handlers.push(handler);
            }
        }
        tries.push(TryRegion {
            start,
            end,
            handlers,
            pcs: (entry.start_pc, entry.end_pc),
        });
    }

    for (i, a) in tries.iter().enumerate() {
        for b in &tries[i + 1..] {
            let disjoint = a.end <= b.start || b.end <= a.start;
            let nested =
                (a.start <= b.start && b.end <= a.end) || (b.start <= a.start && a.end <= b.end);
            if !disjoint && !nested {
                return Err(BuildError::OverlappingTryRanges {
                    first: a.pcs,
                    second: b.pcs,
                });
            }
        }
    }
    Ok(tries)
}

/// Wire each throwing block to the handlers of the try ranges covering it,
/// innermost range first and lowest handler start first within a range,
/// then keep only the first.
fn attach_catches(graph: &mut BlockGraph, tries: &[TryRegion]) {
    for range in tries {
        for &handler in &range.handlers {
            let id = BlockId::new(graph.region().block_index(handler));
            graph.block_mut(id).is_catch = true;
        }
    }

    let real_blocks: Vec<BlockId> = graph.ids().skip(1).collect();
    for id in real_blocks {
        let block = graph.block(id);
        if block.throw_sites == 0 {
            continue;
        }
        let start = block.bytecodes.start;
        let mut covering: Vec<&TryRegion> = tries.iter().filter(|t| t.covers(start)).collect();
        covering.sort_by_key(|t| (t.len(), t.handlers.iter().min().copied()));

        let mut handlers: SmallVec<[BlockId; 2]> = SmallVec::new();
        for range in covering {
            let mut starts = range.handlers.clone();
            starts.sort_unstable();
            for &handler in &starts {
                let catch = BlockId::new(graph.region().block_index(handler));
                if !handlers.contains(&catch) {
                    handlers.push(catch);
                }
            }
        }
        for &catch in &handlers {
            graph.add_catch_edge(id, catch);
        }

        let extras: SmallVec<[BlockId; 2]> =
            graph.block(id).catches.iter().skip(1).copied().collect();
        if !extras.is_empty() {
            graph.block_mut(id).catches.truncate(1);
            for catch in extras {
                graph.block_mut(catch).trys.retain(|t| *t != id);
            }
        }
    }
}

/// Kill every block not reachable from the entry over successor and catch
/// edges. Returns the number of blocks killed.
pub(crate) fn remove_unreachable(graph: &mut BlockGraph) -> usize {
    let mut reachable = vec![false; graph.len()];
    let mut stack = vec![BlockId::ENTRY];
    reachable[0] = true;
    while let Some(id) = stack.pop() {
        let block = graph.block(id);
        for &next in block.succs.iter().chain(&block.catches) {
            if !reachable[next.index()] {
                reachable[next.index()] = true;
                stack.push(next);
            }
        }
    }

    let mut removed = 0;
    let ids: Vec<BlockId> = graph.ids().collect();
    for id in ids {
        if !reachable[id.index()] && !graph.block(id).is_dead {
            graph.kill(id);
            removed += 1;
        }
    }
    removed
}

#[cfg(test)]
#[expect(
    clippy::unwrap_used,
    reason = "tests use unwrap for concise assertions"
)]
