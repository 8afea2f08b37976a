//! Bytecode to sea-of-nodes graph builder.
//!
//! [`build_circuit`] turns one [`Method`] into a [`Circuit`]:
//!
//! 1. **Scan** ([`BytecodeTable::scan`]): decode and classify every
//!    instruction.
//! 2. **Blocks** ([`build_blocks`]): region index, block graph, catch
//!    wiring, unreachable sweep.
//! 3. **Loops** ([`LoopAnalysis::analyze`]): back edges, reverse
//!    postorder, optional preheaders, dominators, irreducibility.
//! 4. **OSR**: mark the loop header the compiled code is entered at.
//! 5. **Liveness** ([`Liveness::compute`]): per-block and per-instruction
//!    live slots.
//! 6. **Loop tree** ([`LoopAnalysis::build_tree`]): bodies, assignments,
//!    exits, nesting.
//! 7. **Emit**: one forward walk producing nodes, selectors, loop
//!    transitions and frame states, then graph verification.
//!
//! Every failure aborts the build of this method only.
//!
//! # Tracing
//!
//! Phase summaries are logged at `debug`, block and graph dumps at `trace`.
//! Enable with `RUST_LOG=esj_builder=debug` after calling [`init_tracing`].

mod block;
mod cfg;
mod circuit;
mod dominator;
mod emit;
mod error;
mod frame;
mod liveness;
mod loops;
mod options;
mod profile;
mod region;
mod template;

#[cfg(test)]
mod test_helpers;

use std::sync::Once;

pub use block::{BasicBlock, BlockGraph, BlockId, BlockList};
pub use cfg::{build_blocks, BytecodeTable};
pub use circuit::Circuit;
pub use dominator::DominatorTree;
pub use error::BuildError;
pub use frame::ValueFrame;
pub use liveness::{LiveSet, Liveness, SlotLayout};
pub use loops::{LoopAnalysis, LoopId, LoopInfo};
pub use options::{CompileOptions, EntryKind, Tier};
pub use profile::{NoProfile, RecordedProfile, TypeHint, TypeRecorder};
pub use region::{RegionIndex, RegionItem, RegionKind, SplitItem};
pub use template::{BytecodeTemplates, NodeTemplate, TemplateTable};

use esj_bytecode::Method;

use crate::emit::Emitter;

static TRACING_INIT: Once = Once::new();

/// Initialize tracing for debug output.
///
/// Safe to call multiple times. Does nothing unless `RUST_LOG` is set.
pub fn init_tracing() {
    TRACING_INIT.call_once(|| {
        use tracing_subscriber::{fmt, prelude::*, EnvFilter};

        if std::env::var("RUST_LOG").is_ok() {
            let filter = EnvFilter::from_default_env();
            tracing_subscriber::registry()
                .with(fmt::layer().with_target(true).with_level(true))
                .with(filter)
                .init();
        }
    });
}

/// Build the graph of `method` with the default template table and no
/// profile.
pub fn build_circuit(method: &Method, options: CompileOptions) -> Result<Circuit, BuildError> {
    CircuitBuilder::new(method).options(options).build()
}

/// Configurable entry point of the builder.
pub struct CircuitBuilder<'a> {
    method: &'a Method,
    options: CompileOptions,
    templates: &'a dyn TemplateTable,
    profile: &'a dyn TypeRecorder,
}

impl<'a> CircuitBuilder<'a> {
    pub fn new(method: &'a Method) -> Self {
        CircuitBuilder {
            method,
            options: CompileOptions::default(),
            templates: &BytecodeTemplates,
            profile: &NoProfile,
        }
    }

    #[must_use]
    pub fn options(mut self, options: CompileOptions) -> Self {
        self.options = options;
        self
    }

    #[must_use]
    pub fn templates(mut self, templates: &'a dyn TemplateTable) -> Self {
        self.templates = templates;
        self
    }

    #[must_use]
    pub fn profile(mut self, profile: &'a dyn TypeRecorder) -> Self {
        self.profile = profile;
        self
    }

    #[tracing::instrument(level = "debug", skip_all, fields(bytes = self.method.code.len()))]
    pub fn build(self) -> Result<Circuit, BuildError> {
        self.options.validate()?;
        let table = BytecodeTable::scan_with(self.method, self.templates)?;
        let mut blocks = build_blocks(&table, &self.method.exceptions)?;
        let mut loops = LoopAnalysis::analyze(&mut blocks, self.options.normalize_loop_entries);

        if let Some(resume_pc) = self.options.osr_resume_pc() {
            mark_osr_entry(&mut blocks, &table, resume_pc)?;
        }

        let layout = SlotLayout::new(self.method.num_vregs);
        let mut liveness = Liveness::compute(&blocks, &table, layout, loops.rpo());
        loops.build_tree(&mut blocks, &liveness);

        let sink = Emitter::new(
            self.method,
            &blocks,
            &table,
            &loops,
            &mut liveness,
            self.profile,
            self.options,
        )
        .emit()?;

        Ok(Circuit::new(sink, blocks, loops, liveness, table))
    }
}

/// Mark the loop header containing `resume_pc` as the OSR entry.
fn mark_osr_entry(
    blocks: &mut BlockGraph,
    table: &BytecodeTable,
    resume_pc: u32,
) -> Result<(), BuildError> {
    let bc = table
        .index_of_pc(i64::from(resume_pc))
        .filter(|bc| *bc < table.len())
        .ok_or(BuildError::MisalignedOsr { pc: resume_pc })?;
    let header = blocks
        .block_containing(bc)
        .filter(|id| {
            let block = blocks.block(*id);
            !block.is_dead && block.is_loop_header()
        })
        .ok_or(BuildError::OsrNotLoopHeader { pc: resume_pc })?;

    blocks.block_mut(header).osr_entry = true;
    blocks.recount_state_preds();
    tracing::debug!(%header, bc, "OSR entry");
    Ok(())
}
