//! Backward liveness over frame slots.
//!
//! A frame has one slot per virtual register, then the accumulator, then
//! the lexical environment. Liveness is computed per block by the usual
//! fixed point over postorder:
//!
//! - `live_out(B) = ∪ live_in(S)` over successors `S`.
//! - Walking `B` backward, each instruction kills the slots it writes and
//!   then sets the slots it reads.
//!
//! Two rules go beyond the textbook transfer:
//!
//! - At a throwing instruction in a block with a catch handler, the
//!   handler's live-in joins the live set: the handler observes the frame
//!   as it was before the instruction. A handler's live-in never contains
//!   the accumulator (it starts by loading the exception into it), so the
//!   accumulator stays live at a throw site only if the code after it
//!   needs it.
//! - Resuming a generator can observe any register, so everything live
//!   after a `resumegenerator` counts as defined by its block. This feeds
//!   loop assignment sets.
//!
//! Per-instruction live sets are derived lazily, one block at a time, from
//! the converged block sets.

use bitvec::vec::BitVec;
use esj_bytecode::{BytecodeInfo, BytecodeKind};
use rustc_hash::FxHashMap;

use crate::block::{BlockGraph, BlockId};
use crate::cfg::BytecodeTable;
use crate::template::NodeTemplate;

// ── Slots ───────────────────────────────────────────────────────────

/// Slot numbering of a frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SlotLayout {
    num_vregs: usize,
}

impl SlotLayout {
    pub fn new(num_vregs: u16) -> Self {
        SlotLayout {
            num_vregs: usize::from(num_vregs),
        }
    }

    #[inline]
    pub fn vreg(&self, reg: u16) -> usize {
        usize::from(reg)
    }

    #[inline]
    pub fn acc(&self) -> usize {
        self.num_vregs
    }

    #[inline]
    pub fn env(&self) -> usize {
        self.num_vregs + 1
    }

    /// Total slot count.
    #[inline]
    pub fn len(&self) -> usize {
        self.num_vregs + 2
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        false
    }

    pub fn num_vregs(&self) -> usize {
        self.num_vregs
    }

    /// Slots read by `info`.
    pub fn uses(&self, info: &BytecodeInfo) -> impl Iterator<Item = usize> {
        let acc = info.reads_acc().then_some(self.acc());
        let env = info.reads_env().then_some(self.env());
        info.vreg_inputs()
            .map(usize::from)
            .collect::<Vec<_>>()
            .into_iter()
            .chain(acc)
            .chain(env)
    }

    /// Slots written by `info`. A general instruction writes what its
    /// `template` says rather than what its flags say.
    pub fn defs(
        &self,
        info: &BytecodeInfo,
        template: Option<&NodeTemplate>,
    ) -> impl Iterator<Item = usize> {
        let (acc, vreg, env) = match template {
            Some(t) => (
                t.writes_acc,
                info.vreg_out.filter(|_| t.vreg_outputs > 0),
                t.writes_env(),
            ),
            None => (info.writes_acc(), info.vreg_out, info.writes_env()),
        };
        let acc = acc.then_some(self.acc());
        let env = env.then_some(self.env());
        vreg.map(usize::from).into_iter().chain(acc).chain(env)
    }
}

/// A set of frame slots.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LiveSet {
    bits: BitVec,
}

impl LiveSet {
    pub fn new(len: usize) -> Self {
        LiveSet {
            bits: BitVec::repeat(false, len),
        }
    }

    #[inline]
    pub fn contains(&self, slot: usize) -> bool {
        self.bits.get(slot).is_some_and(|bit| *bit)
    }

    #[inline]
    pub fn insert(&mut self, slot: usize) {
        self.bits.set(slot, true);
    }

    #[inline]
    pub fn remove(&mut self, slot: usize) {
        self.bits.set(slot, false);
    }

    /// Add every slot of `other`. Returns whether anything was added.
    pub fn union_with(&mut self, other: &LiveSet) -> bool {
        let mut changed = false;
        for slot in other.bits.iter_ones() {
            if !self.bits[slot] {
                self.bits.set(slot, true);
                changed = true;
            }
        }
        changed
    }

    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        self.bits.iter_ones()
    }

    pub fn count(&self) -> usize {
        self.bits.count_ones()
    }

    pub fn is_empty(&self) -> bool {
        self.bits.not_any()
    }

    /// Capacity in slots.
    pub fn capacity(&self) -> usize {
        self.bits.len()
    }
}

// ── Analysis ────────────────────────────────────────────────────────

pub struct Liveness {
    layout: SlotLayout,
    postorder: Vec<BlockId>,
    live_in: Vec<LiveSet>,
    live_out: Vec<LiveSet>,
    defs: Vec<LiveSet>,
    iterations: u32,
    /// Live-before set of every instruction, per visited block.
    per_instruction: FxHashMap<BlockId, Vec<LiveSet>>,
}

impl Liveness {
    /// Run the fixed point. `rpo` lists the live blocks.
    pub fn compute(
        graph: &BlockGraph,
        table: &BytecodeTable,
        layout: SlotLayout,
        rpo: &[BlockId],
    ) -> Self {
        let n = graph.len();
        let empty = LiveSet::new(layout.len());
        let mut liveness = Liveness {
            layout,
            postorder: rpo.iter().rev().copied().collect(),
            live_in: vec![empty.clone(); n],
            live_out: vec![empty.clone(); n],
            defs: vec![empty; n],
            iterations: 0,
            per_instruction: FxHashMap::default(),
        };
        while liveness.sweep(graph, table) {}
        tracing::debug!(
            blocks = liveness.postorder.len(),
            slots = layout.len(),
            iterations = liveness.iterations,
            "liveness converged"
        );
        liveness
    }

    /// One pass over all blocks. Returns whether any set changed.
    pub fn sweep(&mut self, graph: &BlockGraph, table: &BytecodeTable) -> bool {
        self.iterations += 1;
        self.per_instruction.clear();
        let mut changed = false;
        for i in 0..self.postorder.len() {
            let id = self.postorder[i];
            let block = graph.block(id);

            let mut out = LiveSet::new(self.layout.len());
            for succ in &block.succs {
                out.union_with(&self.live_in[succ.index()]);
            }
            let (live_in, defs) = self.transfer(graph, table, id, &out, None);

            if live_in != self.live_in[id.index()] {
                self.live_in[id.index()] = live_in;
                changed = true;
            }
            if out != self.live_out[id.index()] {
                self.live_out[id.index()] = out;
                changed = true;
            }
            if defs != self.defs[id.index()] {
                self.defs[id.index()] = defs;
                changed = true;
            }
        }
        changed
    }

    /// Walk `id` backward from `out`. Returns `(live_in, defs)`; when
    /// `record` is given, pushes the live-before set of each instruction
    /// (last instruction first).
    fn transfer(
        &self,
        graph: &BlockGraph,
        table: &BytecodeTable,
        id: BlockId,
        out: &LiveSet,
        mut record: Option<&mut Vec<LiveSet>>,
    ) -> (LiveSet, LiveSet) {
        let block = graph.block(id);
        let layout = self.layout;
        let catch_in = block.catch().map(|c| &self.live_in[c.index()]);
        let mut live = out.clone();
        let mut defs = LiveSet::new(layout.len());

        for bc in block.bytecodes.clone().rev() {
            let info = table.get(bc);
            if info.kind == BytecodeKind::Resume {
                defs.union_with(&live);
            }
            for slot in layout.defs(info, table.template(bc)) {
                live.remove(slot);
                defs.insert(slot);
            }
            for slot in layout.uses(info) {
                live.insert(slot);
            }
            if table.can_throw(bc) {
                if let Some(catch_in) = catch_in {
                    live.union_with(catch_in);
                }
            }
            if let Some(record) = record.as_deref_mut() {
                record.push(live.clone());
            }
        }

        if block.is_catch {
            live.remove(layout.acc());
            defs.insert(layout.acc());
        }
        (live, defs)
    }

    /// Live-before sets of the instructions of `id`, in bytecode order.
    pub fn instruction_live_in(
        &mut self,
        graph: &BlockGraph,
        table: &BytecodeTable,
        id: BlockId,
    ) -> &[LiveSet] {
        if !self.per_instruction.contains_key(&id) {
            let out = self.live_out[id.index()].clone();
            let mut sets = Vec::with_capacity(graph.block(id).bytecodes.len());
            self.transfer(graph, table, id, &out, Some(&mut sets));
            sets.reverse();
            self.per_instruction.insert(id, sets);
        }
        self.per_instruction
            .get(&id)
            .map_or(&[], |sets| sets.as_slice())
    }

    #[inline]
    pub fn layout(&self) -> SlotLayout {
        self.layout
    }

    #[inline]
    pub fn live_in(&self, id: BlockId) -> &LiveSet {
        &self.live_in[id.index()]
    }

    #[inline]
    pub fn live_out(&self, id: BlockId) -> &LiveSet {
        &self.live_out[id.index()]
    }

    /// Slots written somewhere in `id`.
    #[inline]
    pub fn defs(&self, id: BlockId) -> &LiveSet {
        &self.defs[id.index()]
    }

    pub fn iterations(&self) -> u32 {
        self.iterations
    }
}
