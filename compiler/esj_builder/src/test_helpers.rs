//! Shared test utilities for the builder passes.
//!
//! Methods are written with the [`Assembler`] so tests never hand-count
//! byte offsets. Only compiled in test builds.

use esj_bytecode::{Assembler, Method};

use crate::block::{BlockGraph, BlockId};
use crate::cfg::{build_blocks, BytecodeTable};

/// Shorthand for `BlockId::new(n)`.
pub(crate) fn b(n: u32) -> BlockId {
    BlockId::new(n)
}

/// Assemble a method with `num_vregs` registers and no arguments.
pub(crate) fn method(num_vregs: u16, body: impl FnOnce(&mut Assembler)) -> Method {
    method_with_args(num_vregs, 0, body)
}

pub(crate) fn method_with_args(
    num_vregs: u16,
    num_args: u16,
    body: impl FnOnce(&mut Assembler),
) -> Method {
    let mut asm = Assembler::new();
    body(&mut asm);
    match asm.finish() {
        Ok(assembled) => assembled.into_method(num_vregs, num_args),
        Err(err) => panic!("test method failed to assemble: {err}"),
    }
}

/// Scan `method` and build its block graph.
pub(crate) fn blocks_of(method: &Method) -> (BytecodeTable, BlockGraph) {
    let table = match BytecodeTable::scan(method) {
        Ok(table) => table,
        Err(err) => panic!("scan failed: {err}"),
    };
    match build_blocks(&table, &method.exceptions) {
        Ok(graph) => (table, graph),
        Err(err) => panic!("block graph failed: {err}"),
    }
}

/// Successor ids of `id`, as raw numbers.
pub(crate) fn succs(graph: &BlockGraph, id: u32) -> Vec<u32> {
    graph.block(b(id)).succs.iter().map(|s| s.raw()).collect()
}

/// Predecessor ids of `id`, as raw numbers.
pub(crate) fn preds(graph: &BlockGraph, id: u32) -> Vec<u32> {
    graph.block(b(id)).preds.iter().map(|p| p.raw()).collect()
}
