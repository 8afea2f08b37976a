//! Dominator tree over the block graph.
//!
//! Cooper-Harvey-Kennedy iterative algorithm over reverse postorder. A
//! catch block is entered from the blocks it guards, so `trys` count as
//! predecessors here. Dominance queries are answered in O(1) from DFS
//! entry/exit timestamps over the finished tree.
//!
//! Reference: Cooper, Harvey, Kennedy, "A Simple, Fast Dominance Algorithm" (2001)

use crate::block::{BlockGraph, BlockId};

pub struct DominatorTree {
    /// Immediate dominator, indexed by block. The entry maps to itself;
    /// dead blocks map to `None`.
    idom: Vec<Option<BlockId>>,
    /// Preorder entry time in the dominator tree.
    tin: Vec<u32>,
    /// Exit time in the dominator tree.
    tout: Vec<u32>,
}

impl DominatorTree {
    /// Build the tree. `rpo` must list every live block, entry first.
    pub fn build(graph: &BlockGraph, rpo: &[BlockId]) -> Self {
        let n = graph.len();
        let mut rpo_pos = vec![usize::MAX; n];
        for (pos, id) in rpo.iter().enumerate() {
            rpo_pos[id.index()] = pos;
        }

        let mut idom: Vec<Option<BlockId>> = vec![None; n];
        if let Some(&entry) = rpo.first() {
            idom[entry.index()] = Some(entry);
        }

        let mut changed = true;
        let mut iterations = 0u32;
        while changed {
            changed = false;
            iterations += 1;
            for &id in rpo.iter().skip(1) {
                let block = graph.block(id);
                let mut new_idom: Option<BlockId> = None;
                for &pred in block.preds.iter().chain(&block.trys) {
                    if idom[pred.index()].is_none() {
                        continue;
                    }
                    new_idom = Some(match new_idom {
                        None => pred,
                        Some(current) => intersect(pred, current, &idom, &rpo_pos),
                    });
                }
                if new_idom.is_some() && idom[id.index()] != new_idom {
                    idom[id.index()] = new_idom;
                    changed = true;
                }
            }
        }
        tracing::debug!(blocks = rpo.len(), iterations, "dominators converged");

        let (tin, tout) = timestamps(&idom, rpo);
        DominatorTree { idom, tin, tout }
    }

    /// Immediate dominator of `id`; `None` for the entry and dead blocks.
    pub fn idom(&self, id: BlockId) -> Option<BlockId> {
        self.idom[id.index()].filter(|d| *d != id)
    }

    /// Does `a` dominate `b`? A block dominates itself.
    pub fn dominates(&self, a: BlockId, b: BlockId) -> bool {
        if self.idom[a.index()].is_none() || self.idom[b.index()].is_none() {
            return false;
        }
        self.tin[a.index()] <= self.tin[b.index()] && self.tout[b.index()] <= self.tout[a.index()]
    }
}

/// CHK intersect: walk two fingers upward until they meet.
fn intersect(
    mut a: BlockId,
    mut b: BlockId,
    idom: &[Option<BlockId>],
    rpo_pos: &[usize],
) -> BlockId {
    while a != b {
        while rpo_pos[a.index()] > rpo_pos[b.index()] {
            let Some(next) = idom[a.index()] else {
                debug_assert!(false, "intersect: broken idom chain at {a}");
                return a;
            };
            a = next;
        }
        while rpo_pos[b.index()] > rpo_pos[a.index()] {
            let Some(next) = idom[b.index()] else {
                debug_assert!(false, "intersect: broken idom chain at {b}");
                return b;
            };
            b = next;
        }
    }
    a
}

/// Entry/exit times of an iterative DFS over the dominator tree.
fn timestamps(idom: &[Option<BlockId>], rpo: &[BlockId]) -> (Vec<u32>, Vec<u32>) {
    let n = idom.len();
    let mut children: Vec<Vec<BlockId>> = vec![Vec::new(); n];
    for &id in rpo.iter().skip(1) {
        if let Some(parent) = idom[id.index()] {
            if parent != id {
                children[parent.index()].push(id);
            }
        }
    }

    let mut tin = vec![0u32; n];
    let mut tout = vec![0u32; n];
    let mut clock = 0u32;
    let Some(&root) = rpo.first() else {
        return (tin, tout);
    };
    // (block, next child to visit)
    let mut stack: Vec<(BlockId, usize)> = vec![(root, 0)];
    tin[root.index()] = clock;
    while let Some(top) = stack.last_mut() {
        let (id, next) = *top;
        if let Some(&child) = children[id.index()].get(next) {
            top.1 += 1;
            clock += 1;
            tin[child.index()] = clock;
            stack.push((child, 0));
        } else {
            clock += 1;
            tout[id.index()] = clock;
            stack.pop();
        }
    }
    (tin, tout)
}

#[cfg(test)]
#[expect(
    clippy::unwrap_used,
    reason = "tests use unwrap for concise assertions"
)]
