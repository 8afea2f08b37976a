//! Shared helpers for the end-to-end tests.
//!
//! Methods are written with the [`Assembler`]; circuits are inspected by
//! searching the graph for nodes of a given shape.

use esj_builder::{build_circuit, BlockId, BuildError, Circuit, CompileOptions};
use esj_bytecode::{Assembler, Method};
use esj_circuit::{ConstValue, Graph, NodeId, Op};

/// Assemble a method with `num_vregs` registers and no arguments.
pub fn method(num_vregs: u16, body: impl FnOnce(&mut Assembler)) -> Method {
    method_with_args(num_vregs, 0, body)
}

pub fn method_with_args(
    num_vregs: u16,
    num_args: u16,
    body: impl FnOnce(&mut Assembler),
) -> Method {
    let mut asm = Assembler::new();
    body(&mut asm);
    asm.finish()
        .expect("test method assembles")
        .into_method(num_vregs, num_args)
}

/// Build with default options, panicking on failure.
pub fn build(method: &Method) -> Circuit {
    build_with(method, CompileOptions::default())
}

/// Build, with logging on when `RUST_LOG` is set.
pub fn build_with(method: &Method, options: CompileOptions) -> Circuit {
    esj_builder::init_tracing();
    match build_circuit(method, options) {
        Ok(circuit) => circuit,
        Err(err) => panic!("build failed: {err}"),
    }
}

/// Build expecting failure.
pub fn build_err(method: &Method, options: CompileOptions) -> BuildError {
    match build_circuit(method, options) {
        Ok(_) => panic!("build unexpectedly succeeded"),
        Err(err) => err,
    }
}

pub fn b(n: u32) -> BlockId {
    BlockId::new(n)
}

/// Nodes whose operation satisfies `pred`, in creation order.
pub fn nodes(graph: &Graph, pred: impl Fn(Op) -> bool) -> Vec<NodeId> {
    graph
        .iter()
        .filter(|(_, node)| pred(node.op))
        .map(|(id, _)| id)
        .collect()
}

pub fn count(graph: &Graph, op: Op) -> usize {
    graph.count(|o| o == op)
}

/// The single node whose operation satisfies `pred`.
pub fn only(graph: &Graph, pred: impl Fn(Op) -> bool) -> NodeId {
    let found = nodes(graph, pred);
    assert_eq!(found.len(), 1, "expected exactly one matching node");
    found[0]
}

pub fn constant(graph: &Graph, value: ConstValue) -> NodeId {
    only(graph, |op| op == Op::Constant(value))
}

/// The operation node emitted for the bytecode at `bc_index`.
pub fn bytecode_node(circuit: &Circuit, bc_index: u32) -> NodeId {
    only(circuit.graph(), |op| {
        matches!(op, Op::JsBytecode { bc_index: at, .. } if at == bc_index)
    })
}

/// Value inputs of the frame state attached to `node`.
pub fn frame_state_values(graph: &Graph, node: NodeId) -> Vec<NodeId> {
    let frame_state = graph.node(node).frame_state.expect("node has a frame state");
    graph.node(frame_state).value_inputs.to_vec()
}

pub fn state_inputs(graph: &Graph, node: NodeId) -> Vec<NodeId> {
    graph.node(node).state_inputs.to_vec()
}

pub fn value_inputs(graph: &Graph, node: NodeId) -> Vec<NodeId> {
    graph.node(node).value_inputs.to_vec()
}

/// The value returned by the method's only `Return`.
pub fn returned_value(graph: &Graph) -> NodeId {
    let ret = only(graph, |op| op == Op::Return);
    graph.node(ret).value_inputs[0]
}
