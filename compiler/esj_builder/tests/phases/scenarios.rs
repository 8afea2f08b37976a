//! Reference method shapes and the graphs they must produce.

use esj_builder::{RegionItem, RegionKind, SplitItem};
use esj_bytecode::Opcode;
use esj_circuit::{ConstValue, Op};
use pretty_assertions::assert_eq;

use crate::common::{
    b, build, bytecode_node, constant, count, frame_state_values, method, only, returned_value,
    state_inputs, value_inputs,
};

/// ldai 5; sta v0; ldai 7; add2 v0; return
#[test]
fn straight_line() {
    let m = method(1, |a| {
        a.ldai(5).sta(0).ldai(7).add2(0).ret();
    });
    let circuit = build(&m);
    let graph = circuit.graph();

    assert_eq!(circuit.blocks().live().count(), 2);
    assert_eq!(circuit.block_containing(0), Some(b(1)));
    assert_eq!(circuit.block_containing(4), Some(b(1)));
    assert_eq!(count(graph, Op::Merge), 0);
    assert_eq!(count(graph, Op::ValueSelector), 0);
    assert_eq!(count(graph, Op::LoopBegin), 0);

    let add = bytecode_node(&circuit, 3);
    assert_eq!(
        graph.op(add),
        Op::JsBytecode {
            opcode: Opcode::Add2,
            bc_index: 3
        }
    );
    let five = constant(graph, ConstValue::Int(5));
    let seven = constant(graph, ConstValue::Int(7));
    assert_eq!(value_inputs(graph, add), vec![five, seven]);
    assert_eq!(returned_value(graph), add);

    // v0 and the accumulator are live before the add; the environment is not.
    let optimized_out = only(graph, |op| op == Op::OptimizedOut);
    assert_eq!(
        frame_state_values(graph, add),
        vec![five, seven, optimized_out]
    );
    assert!(circuit.liveness().live_in(b(1)).is_empty());
}

/// ldai 1; ldai 2; jeqz L (pc 10); ldai 10..=14; nop; nop; L (pc 40): return
#[test]
fn conditional_jump() {
    let m = method(0, |a| {
        let target = a.label();
        a.ldai(1).ldai(2).jeqz(target);
        for value in 10..=14 {
            a.ldai(value);
        }
        a.nop().nop();
        a.bind(target).unwrap().ret();
    });
    let circuit = build(&m);
    let graph = circuit.graph();
    let table = circuit.bytecodes();

    assert_eq!(table.get(2).pc, 10);
    assert_eq!(table.index_of_pc(40), Some(10));

    let region = circuit.blocks().region();
    assert_eq!(
        region.items(),
        &[
            RegionItem {
                start: 0,
                kind: RegionKind::Head
            },
            RegionItem {
                start: 3,
                kind: RegionKind::Split
            },
            RegionItem {
                start: 10,
                kind: RegionKind::Split
            },
        ]
    );
    assert_eq!(region.splits(), &[SplitItem { start: 10, pred: 2 }]);

    let branch = circuit.block(b(1));
    assert_eq!(branch.succs.as_slice(), &[b(2), b(3)]);
    assert_eq!(branch.branch_targets(), Some((b(2), b(3))));
    assert_eq!(circuit.block(b(3)).preds.as_slice(), &[b(2), b(1)]);

    let if_branch = only(graph, |op| matches!(op, Op::IfBranch { .. }));
    assert_eq!(graph.op(if_branch), Op::IfBranch { jump_if: false });
    let two = constant(graph, ConstValue::Int(2));
    assert_eq!(value_inputs(graph, if_branch), vec![two]);

    let if_true = only(graph, |op| op == Op::IfTrue);
    let if_false = only(graph, |op| op == Op::IfFalse);
    let merge = only(graph, |op| op == Op::Merge);
    assert_eq!(state_inputs(graph, merge), vec![if_true, if_false]);

    let selector = only(graph, |op| op == Op::ValueSelector);
    let fourteen = constant(graph, ConstValue::Int(14));
    assert_eq!(value_inputs(graph, selector), vec![two, fourteen]);
    assert_eq!(returned_value(graph), selector);
}

/// B1: ldai 0; sta v0
/// B2: lda v0; inc; sta v0; less v1; jnez B2
/// B3: lda v0; return
#[test]
fn single_entry_loop() {
    let m = method(2, |a| {
        a.ldai(0).sta(0);
        let head = a.here();
        a.lda(0).inc().sta(0).less(1).jnez(head);
        a.lda(0).ret();
    });
    let circuit = build(&m);
    let graph = circuit.graph();

    let header = circuit.block(b(2));
    assert!(header.loop_number > 0);
    assert_eq!(header.num_loop_back, 1);
    assert!(circuit.loops().preheaders().is_empty());

    assert_eq!(count(graph, Op::LoopBegin), 1);
    assert_eq!(count(graph, Op::Merge), 0);
    let loop_begin = only(graph, |op| op == Op::LoopBegin);
    let loop_back = only(graph, |op| op == Op::LoopBack);
    let if_true = only(graph, |op| op == Op::IfTrue);
    let if_false = only(graph, |op| op == Op::IfFalse);
    assert_eq!(
        state_inputs(graph, loop_begin),
        vec![graph.state_entry(), loop_back]
    );
    assert_eq!(state_inputs(graph, loop_back), vec![if_true]);

    let depend = only(graph, |op| op == Op::DependSelector);
    let less = bytecode_node(&circuit, 5);
    assert_eq!(
        graph.node(depend).depend_inputs.as_slice(),
        &[graph.depend_entry(), less]
    );

    // Only v0 is both live at the header and written in the loop.
    let selector = only(graph, |op| op == Op::ValueSelector);
    let zero = constant(graph, ConstValue::Int(0));
    let inc = bytecode_node(&circuit, 3);
    assert_eq!(value_inputs(graph, selector), vec![zero, inc]);
    assert_eq!(value_inputs(graph, less)[0], constant(graph, ConstValue::Undefined));

    let exit = only(graph, |op| op == Op::LoopExit);
    assert_eq!(state_inputs(graph, exit), vec![if_false]);
    let exit_value = only(graph, |op| op == Op::LoopExitValue);
    assert_eq!(value_inputs(graph, exit_value), vec![inc]);
    assert_eq!(returned_value(graph), exit_value);

    let info = circuit.loop_of(b(2)).unwrap();
    assert_eq!(info.header, b(2));
    assert!(circuit.loop_of(b(3)).is_none());
}

/// B1: ldai 0; sta v0
/// B2: ldai 0; sta v1                                    (outer header)
/// B3: lda v1; inc; sta v1; lda v0; inc; sta v0;
///     lda v1; less v2; jnez B3                          (inner header)
/// B4: lda v0; less v2; jnez B2
/// B5: lda v0; return
#[test]
fn value_leaving_nested_loops_is_wrapped_per_level() {
    let m = method(3, |a| {
        a.ldai(0).sta(0);
        let outer = a.here();
        a.ldai(0).sta(1);
        let inner = a.here();
        a.lda(1).inc().sta(1).lda(0).inc().sta(0);
        a.lda(1).less(2).jnez(inner);
        a.lda(0).less(2).jnez(outer);
        a.lda(0).ret();
    });
    let circuit = build(&m);
    let graph = circuit.graph();

    let outer = circuit.loop_of(b(2)).unwrap();
    let inner = circuit.loop_of(b(3)).unwrap();
    assert_eq!(inner.parent, Some(outer.id));
    assert_eq!((outer.depth, inner.depth), (1, 2));

    assert_eq!(count(graph, Op::LoopBegin), 2);
    assert_eq!(count(graph, Op::LoopExit), 2);
    assert_eq!(count(graph, Op::LoopExitValue), 2);

    let wrapped_outer = returned_value(graph);
    assert_eq!(graph.op(wrapped_outer), Op::LoopExitValue);
    let wrapped_inner = value_inputs(graph, wrapped_outer)[0];
    assert_eq!(graph.op(wrapped_inner), Op::LoopExitValue);
    let inc = bytecode_node(&circuit, 8);
    assert_eq!(value_inputs(graph, wrapped_inner), vec![inc]);

    assert_eq!(circuit.block_of(wrapped_inner), Some(b(3)));
    assert_eq!(circuit.block_of(wrapped_outer), Some(b(4)));
}

/// try { tryldglobalbyname; sta v0; callarg0 } return; catch: lda v0; return
///
/// Both instructions throw into the same handler. The accumulator is dead
/// at the first (it is about to be overwritten) and live at the second.
#[test]
fn throw_sites_snapshot_their_own_liveness() {
    let m = method(1, |a| {
        let start = a.here();
        a.op(Opcode::TryLdGlobalByName, &[0, 1]).sta(0);
        a.op(Opcode::CallArg0, &[0]);
        let end = a.here();
        a.ret();
        let handler = a.here();
        a.lda(0).ret();
        a.try_range(start, end, &[handler]);
    });
    let circuit = build(&m);
    let graph = circuit.graph();

    let catch = circuit.block(b(3));
    assert!(catch.is_catch);
    assert_eq!(catch.trys.as_slice(), &[b(1)]);
    assert_eq!(catch.num_state_preds, 2);
    assert_eq!(circuit.liveness().live_in(b(3)).iter().collect::<Vec<_>>(), vec![0]);

    let load = bytecode_node(&circuit, 0);
    let call = bytecode_node(&circuit, 2);
    let undefined = constant(graph, ConstValue::Undefined);
    let optimized_out = only(graph, |op| op == Op::OptimizedOut);
    assert_eq!(
        frame_state_values(graph, load),
        vec![undefined, optimized_out, optimized_out]
    );
    assert_eq!(
        frame_state_values(graph, call),
        vec![load, load, optimized_out]
    );

    assert_eq!(count(graph, Op::IfSuccess), 2);
    let exceptions = crate::common::nodes(graph, |op| op == Op::IfException);
    assert_eq!(exceptions.len(), 2);
    assert_eq!(state_inputs(graph, exceptions[0]), vec![load]);
    assert_eq!(state_inputs(graph, exceptions[1]), vec![call]);

    let merge = only(graph, |op| op == Op::Merge);
    assert_eq!(state_inputs(graph, merge), exceptions);
    let get = only(graph, |op| op == Op::GetException);
    assert_eq!(state_inputs(graph, get), vec![merge]);

    // The handler sees v0 as it was at each throw site.
    let selector = only(graph, |op| op == Op::ValueSelector);
    assert_eq!(value_inputs(graph, selector), vec![undefined, load]);
    let returns = crate::common::nodes(graph, |op| op == Op::Return);
    assert_eq!(returns.len(), 2);
    let handler_return = returns
        .iter()
        .copied()
        .find(|node| circuit.block_of(*node) == Some(b(3)))
        .unwrap();
    assert_eq!(value_inputs(graph, handler_return), vec![selector]);
}

/// throw inside a try range: the handler gets an exception edge but no
/// success projection.
#[test]
fn throw_has_no_success_projection() {
    let m = method(0, |a| {
        let start = a.here();
        a.ldai(3).throw();
        let end = a.here();
        let handler = a.here();
        a.ret();
        a.try_range(start, end, &[handler]);
    });
    let circuit = build(&m);
    let graph = circuit.graph();

    assert_eq!(count(graph, Op::IfSuccess), 0);
    let throw = bytecode_node(&circuit, 1);
    let exception = only(graph, |op| op == Op::IfException);
    assert_eq!(state_inputs(graph, exception), vec![throw]);
    let get = only(graph, |op| op == Op::GetException);
    assert_eq!(state_inputs(graph, get), vec![exception]);
    assert_eq!(returned_value(graph), get);
}

/// B1: ldai 1; jeqz H   B2: ldai 2   B3 (H): inc; jnez H   B4: return
#[test]
fn multi_entry_loop_gets_a_preheader() {
    let m = method(0, |a| {
        let head = a.label();
        a.ldai(1).jeqz(head).ldai(2);
        a.bind(head).unwrap().inc().jnez(head);
        a.ret();
    });
    let circuit = build(&m);
    let graph = circuit.graph();

    assert_eq!(circuit.loops().preheaders(), &[b(5)]);
    assert_eq!(count(graph, Op::LoopBegin), 1);
    let merge = only(graph, |op| op == Op::Merge);
    assert_eq!(circuit.block_of(merge), Some(b(5)));
    let loop_begin = only(graph, |op| op == Op::LoopBegin);
    assert_eq!(state_inputs(graph, loop_begin)[0], merge);
}

#[test]
fn multi_entry_loop_without_preheader_merges_at_the_header() {
    let m = method(0, |a| {
        let head = a.label();
        a.ldai(1).jeqz(head).ldai(2);
        a.bind(head).unwrap().inc().jnez(head);
        a.ret();
    });
    let options = esj_builder::CompileOptions::default().with_normalize_loop_entries(false);
    let circuit = crate::common::build_with(&m, options);
    let graph = circuit.graph();

    assert!(circuit.loops().preheaders().is_empty());
    let merge = only(graph, |op| op == Op::Merge);
    assert_eq!(circuit.block_of(merge), Some(b(3)));
    let loop_begin = only(graph, |op| op == Op::LoopBegin);
    assert_eq!(state_inputs(graph, loop_begin)[0], merge);
}

/// B1: ldai 0; sta v0
/// B2 (H): lda v0; inc; sta v0; less v1; jeqz B4
/// B3: jnez H
/// B4: jnez H
/// B5: return
///
/// Two back edges are joined before they reach the loop begin.
#[test]
fn back_edges_are_merged() {
    let m = method(2, |a| {
        let head = a.label();
        let second = a.label();
        a.ldai(0).sta(0);
        a.bind(head).unwrap().lda(0).inc().sta(0).less(1).jeqz(second);
        a.jnez(head);
        a.bind(second).unwrap().jnez(head);
        a.ret();
    });
    let circuit = build(&m);
    let graph = circuit.graph();

    assert_eq!(circuit.block(b(2)).num_loop_back, 2);
    assert_eq!(count(graph, Op::LoopBack), 2);
    let loop_begin = only(graph, |op| op == Op::LoopBegin);
    let back_merge = state_inputs(graph, loop_begin)[1];
    assert_eq!(graph.op(back_merge), Op::Merge);
    for input in state_inputs(graph, back_merge) {
        assert_eq!(graph.op(input), Op::LoopBack);
    }
    assert!(graph.verify().is_ok());
}

/// B1: ldai 1; jeqz L2   B2 (L1): inc   B3 (L2): inc; jnez L1   B4: return
#[test]
fn irreducible_loop_still_builds() {
    let m = method(0, |a| {
        let l2 = a.label();
        a.ldai(1).jeqz(l2);
        let l1 = a.here();
        a.inc();
        a.bind(l2).unwrap().inc().jnez(l1);
        a.ret();
    });
    let circuit = build(&m);
    assert!(circuit.irreducible());
    assert!(circuit.loop_of(b(2)).unwrap().irreducible);
    assert!(circuit.graph().verify().is_ok());
}

#[test]
fn nodes_are_attributed_to_bytecodes_and_blocks() {
    let m = method(0, |a| {
        let target = a.label();
        a.ldai(1).jeqz(target).ldai(2);
        a.bind(target).unwrap().ret();
    });
    let circuit = build(&m);
    let graph = circuit.graph();

    let at_branch: Vec<Op> = circuit.nodes_at(1).iter().map(|id| graph.op(*id)).collect();
    assert_eq!(
        at_branch,
        vec![Op::IfBranch { jump_if: false }, Op::IfTrue, Op::IfFalse]
    );
    // Constants are shared and belong to no instruction.
    assert!(circuit.nodes_at(0).is_empty());
    assert!(circuit.nodes_at(99).is_empty());

    let if_branch = circuit.nodes_at(1)[0];
    assert_eq!(circuit.block_of(if_branch), Some(b(1)));
    assert_eq!(circuit.block_of(graph.state_entry()), None);
}

/// callarg0 (pc 0, inner and outer range); callarg0 (pc 2, outer only);
/// return; inner handler; outer handler
#[test]
fn innermost_handler_wins() {
    let m = method(0, |a| {
        let start = a.here();
        a.op(Opcode::CallArg0, &[0]);
        let inner_end = a.here();
        a.op(Opcode::CallArg0, &[0]);
        let outer_end = a.here();
        a.ret();
        let inner = a.here();
        a.ret_undefined();
        let outer = a.here();
        a.ret_undefined();
        a.try_range(start, inner_end, &[inner]);
        a.try_range(start, outer_end, &[outer]);
    });
    let circuit = build(&m);

    assert_eq!(circuit.block(b(1)).catches.as_slice(), &[b(4)]);
    assert_eq!(circuit.block(b(2)).catches.as_slice(), &[b(5)]);
    assert_eq!(circuit.block(b(4)).trys.as_slice(), &[b(1)]);
    assert_eq!(circuit.block(b(5)).trys.as_slice(), &[b(2)]);
    assert_eq!(count(circuit.graph(), Op::IfException), 2);
}

/// try { callarg0 } return; handler: inc; jnez handler; return
///
/// The handler jumps back to itself, so it heads a loop. Throw edges enter
/// through a synthetic catch block (B5) in front of the header.
#[test]
fn catch_handler_may_head_a_loop() {
    let m = method(0, |a| {
        let start = a.here();
        a.op(Opcode::CallArg0, &[0]);
        let end = a.here();
        a.ret_undefined();
        let handler = a.here();
        a.inc().jnez(handler);
        a.ret_undefined();
        a.try_range(start, end, &[handler]);
    });
    let circuit = build(&m);
    let graph = circuit.graph();

    let header = circuit.block(b(3));
    assert!(header.is_loop_header());
    assert!(!header.is_catch);
    assert!(header.trys.is_empty());
    assert_eq!(circuit.loops().catch_entries(), &[b(5)]);

    let entry = circuit.block(b(5));
    assert!(entry.is_catch);
    assert!(entry.is_synthetic());
    assert_eq!(entry.trys.as_slice(), &[b(1)]);
    assert_eq!(entry.succs.as_slice(), &[b(3)]);
    assert_eq!(circuit.block(b(1)).catches.as_slice(), &[b(5)]);

    let get = only(graph, |op| op == Op::GetException);
    assert_eq!(circuit.block_of(get), Some(b(5)));
    let loop_begin = only(graph, |op| op == Op::LoopBegin);
    assert_eq!(circuit.block_of(loop_begin), Some(b(3)));
    assert_eq!(count(graph, Op::LoopBack), 1);

    // The accumulator entering the loop is the exception.
    let inc = bytecode_node(&circuit, 2);
    let acc = value_inputs(graph, inc)[0];
    assert_eq!(graph.op(acc), Op::ValueSelector);
    assert_eq!(value_inputs(graph, acc)[0], get);
}
