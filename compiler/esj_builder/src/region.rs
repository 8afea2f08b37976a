//! Block boundary discovery.
//!
//! The CFG builder feeds every jump, fall-through break and exception
//! boundary it sees during its forward scan into a [`RegionIndex`]. The
//! index keeps the sorted set of block starts and the edges that a plain
//! fall-through walk would miss.
//!
//! All positions are bytecode indices. Index 0 always starts the first real
//! block, so the block of item `k` has id `k + 1` (id 0 is the synthetic
//! entry block).

/// How a block start was discovered.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RegionKind {
    /// The previous instruction falls through into this block.
    Split,
    /// No fall-through from the previous instruction (after a jump, a
    /// return or a throw).
    Head,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RegionItem {
    pub start: u32,
    pub kind: RegionKind,
}

/// An edge that must be wired explicitly: `pred` is the bytecode index of
/// the jump, `start` the bytecode index of its target.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SplitItem {
    pub start: u32,
    pub pred: u32,
}

#[derive(Clone, Debug)]
pub struct RegionIndex {
    items: Vec<RegionItem>,
    splits: Vec<SplitItem>,
}

impl Default for RegionIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl RegionIndex {
    pub fn new() -> Self {
        RegionIndex {
            items: vec![RegionItem {
                start: 0,
                kind: RegionKind::Head,
            }],
            splits: Vec::new(),
        }
    }

    /// Record a block start that is not reached by fall-through.
    pub fn insert_head(&mut self, start: u32) {
        match self.items.binary_search_by_key(&start, |item| item.start) {
            Ok(pos) => self.items[pos].kind = RegionKind::Head,
            Err(pos) => self.items.insert(
                pos,
                RegionItem {
                    start,
                    kind: RegionKind::Head,
                },
            ),
        }
    }

    /// Record a block start. An existing head marker is kept.
    pub fn insert_split(&mut self, start: u32) {
        if let Err(pos) = self.items.binary_search_by_key(&start, |item| item.start) {
            self.items.insert(
                pos,
                RegionItem {
                    start,
                    kind: RegionKind::Split,
                },
            );
        }
    }

    /// Record a jump from `pred` to `target`.
    ///
    /// `explicit` is true for unconditional jumps. A conditional jump to
    /// the very next instruction needs no edge of its own: the fall-through
    /// edge already covers it.
    pub fn insert_jump(&mut self, target: u32, pred: u32, explicit: bool) {
        self.insert_split(target);
        if explicit || target != pred + 1 {
            self.splits.push(SplitItem {
                start: target,
                pred,
            });
        }
    }

    /// Block starts in ascending order.
    pub fn items(&self) -> &[RegionItem] {
        &self.items
    }

    /// Explicit edges, in discovery order.
    pub fn splits(&self) -> &[SplitItem] {
        &self.splits
    }

    /// Number of real (non-synthetic) blocks.
    pub fn num_blocks(&self) -> usize {
        self.items.len()
    }

    /// Id of the block containing `bc_index` (1-based).
    #[expect(
        clippy::cast_possible_truncation,
        reason = "block count is bounded by instruction count"
    )]
    pub fn block_index(&self, bc_index: u32) -> u32 {
        self.items.partition_point(|item| item.start <= bc_index) as u32
    }

    /// Whether `bc_index` starts a block.
    pub fn is_start(&self, bc_index: u32) -> bool {
        self.items
            .binary_search_by_key(&bc_index, |item| item.start)
            .is_ok()
    }
}
