//! Entry kinds, arguments, profile hints and custom templates.

use esj_builder::{
    BuildError, BytecodeTemplates, CircuitBuilder, CompileOptions, EntryKind, NodeTemplate,
    RecordedProfile, TemplateTable, Tier, TypeHint,
};
use esj_bytecode::{BytecodeInfo, Method, Opcode};
use esj_circuit::{ConstValue, Op};
use pretty_assertions::assert_eq;

use crate::common::{
    b, build, build_err, build_with, bytecode_node, constant, count, method, method_with_args,
    nodes, only, returned_value, state_inputs, value_inputs,
};

/// B1: ldai 0; sta v0                      (pc 0, 5)
/// B2: lda v0; inc; sta v0; less v1; jnez  (pc 7, 9, 11, 13, 16)
/// B3: lda v0; return
fn counting_loop() -> Method {
    method(2, |a| {
        a.ldai(0).sta(0);
        let head = a.here();
        a.lda(0).inc().sta(0).less(1).jnez(head);
        a.lda(0).ret();
    })
}

fn osr_at(resume_pc: u32) -> CompileOptions {
    CompileOptions::default().with_entry(EntryKind::Osr { resume_pc })
}

#[test]
fn osr_enters_at_the_loop_header() {
    let m = counting_loop();
    let circuit = build_with(&m, osr_at(7));
    let graph = circuit.graph();

    assert!(circuit.block(b(2)).osr_entry);
    let osr = only(graph, |op| op == Op::OsrEntry);
    assert_eq!(state_inputs(graph, osr), vec![graph.state_entry()]);
    assert_eq!(circuit.block_of(osr), Some(b(2)));

    // One reload per slot live at the header: v0 and v1.
    let reloads: Vec<Op> = nodes(graph, |op| matches!(op, Op::OsrValue { .. }))
        .into_iter()
        .map(|id| graph.op(id))
        .collect();
    assert_eq!(
        reloads,
        vec![Op::OsrValue { slot: 0 }, Op::OsrValue { slot: 1 }]
    );

    // The OSR entry joins the normal entry in front of the loop begin.
    let merge = only(graph, |op| op == Op::Merge);
    assert_eq!(state_inputs(graph, merge), vec![osr, graph.state_entry()]);
    let loop_begin = only(graph, |op| op == Op::LoopBegin);
    assert_eq!(state_inputs(graph, loop_begin)[0], merge);
}

#[test]
fn osr_pc_may_point_inside_the_header() {
    let m = counting_loop();
    let circuit = build_with(&m, osr_at(11));
    assert!(circuit.block(b(2)).osr_entry);
    assert_eq!(count(circuit.graph(), Op::OsrEntry), 1);
}

#[test]
fn osr_pc_must_be_an_instruction_boundary() {
    let m = counting_loop();
    let err = build_err(&m, osr_at(8));
    assert_eq!(err, BuildError::MisalignedOsr { pc: 8 });

    let end = u32::try_from(m.code.len()).unwrap();
    let err = build_err(&m, osr_at(end));
    assert_eq!(err, BuildError::MisalignedOsr { pc: end });
    assert!(err.is_malformed_input());
}

#[test]
fn osr_pc_must_be_in_a_loop_header() {
    let m = counting_loop();
    let err = build_err(&m, osr_at(0));
    assert_eq!(err, BuildError::OsrNotLoopHeader { pc: 0 });
}

#[test]
fn osr_requires_the_jit_tier() {
    let m = counting_loop();
    let options = osr_at(7).with_tier(Tier::Aot);
    let err = build_err(&m, options);
    assert!(matches!(err, BuildError::InvalidOptions(_)));
    assert!(!err.is_malformed_input());
}

#[test]
fn aot_builds_like_jit() {
    let m = counting_loop();
    let jit = build(&m);
    let aot = build_with(&m, CompileOptions::default().with_tier(Tier::Aot));
    assert_eq!(jit.graph().len(), aot.graph().len());
}

#[test]
fn inlined_body_returns_to_its_caller() {
    let m = method(1, |a| {
        a.ldai(5).sta(0).ldai(7).add2(0).ret();
    });
    let circuit = build_with(&m, CompileOptions::default().with_entry(EntryKind::Inline));
    let graph = circuit.graph();

    assert_eq!(count(graph, Op::Return), 0);
    let ret = only(graph, |op| op == Op::InlineReturn);
    assert_eq!(value_inputs(graph, ret), vec![bytecode_node(&circuit, 3)]);
}

#[test]
fn return_undefined_returns_the_undefined_constant() {
    let m = method(0, |a| {
        a.ret_undefined();
    });
    let circuit = build(&m);
    let graph = circuit.graph();
    assert_eq!(returned_value(graph), constant(graph, ConstValue::Undefined));
}

/// Arguments occupy the last registers.
#[test]
fn arguments_are_entry_values() {
    let m = method_with_args(3, 2, |a| {
        a.lda(2).add2(1).ret();
    });
    let circuit = build(&m);
    let graph = circuit.graph();

    let first = only(graph, |op| op == Op::Arg { index: 0 });
    let second = only(graph, |op| op == Op::Arg { index: 1 });
    let add = bytecode_node(&circuit, 1);
    assert_eq!(value_inputs(graph, add), vec![first, second]);
    assert_eq!(circuit.block_of(first), Some(b(0)));
}

#[test]
fn environment_flows_from_the_entry() {
    let m = method(0, |a| {
        a.op(Opcode::NewLexEnv, &[1])
            .op(Opcode::StLexVar, &[0, 0])
            .op(Opcode::PopLexEnv, &[])
            .op(Opcode::LdLexVar, &[0, 0])
            .ret();
    });
    let circuit = build(&m);
    let graph = circuit.graph();

    let entry_env = only(graph, |op| op == Op::LexicalEnv);
    let new_env = bytecode_node(&circuit, 0);
    let store = bytecode_node(&circuit, 1);
    let pop = bytecode_node(&circuit, 2);
    let load = bytecode_node(&circuit, 3);
    assert_eq!(*value_inputs(graph, new_env).last().unwrap(), entry_env);
    assert_eq!(*value_inputs(graph, store).last().unwrap(), new_env);
    assert_eq!(value_inputs(graph, pop), vec![new_env]);
    assert_eq!(*value_inputs(graph, load).last().unwrap(), pop);
    assert_eq!(returned_value(graph), load);
}

fn hinted_add() -> (Method, RecordedProfile, TypeHint) {
    let m = method(1, |a| {
        a.ldai(1).sta(0).ldai(2).add2(0).ret();
    });
    let hint = TypeHint {
        elements_kind: Some(4),
        shape_id: Some(17),
    };
    let mut profile = RecordedProfile::new();
    profile.record(3, hint);
    (m, profile, hint)
}

#[test]
fn profile_hints_are_attached() {
    let (m, profile, hint) = hinted_add();
    let circuit = CircuitBuilder::new(&m).profile(&profile).build().unwrap();
    let add = bytecode_node(&circuit, 3);
    assert_eq!(circuit.graph().node(add).hint, Some(hint));
}

#[test]
fn profile_hints_need_type_lowering() {
    let (m, profile, _) = hinted_add();
    let circuit = CircuitBuilder::new(&m)
        .profile(&profile)
        .options(CompileOptions::default().with_type_lowering(false))
        .build()
        .unwrap();
    let add = bytecode_node(&circuit, 3);
    assert_eq!(circuit.graph().node(add).hint, None);
}

/// Treats `add2` as leaving the accumulator untouched.
struct AddKeepsAcc;

impl TemplateTable for AddKeepsAcc {
    fn template(&self, info: &BytecodeInfo) -> NodeTemplate {
        let mut template = BytecodeTemplates.template(info);
        if info.opcode == Opcode::Add2 {
            template.writes_acc = false;
        }
        template
    }
}

#[test]
fn templates_decide_outputs() {
    let m = method(1, |a| {
        a.ldai(5).sta(0).ldai(7).add2(0).ret();
    });
    let circuit = CircuitBuilder::new(&m).templates(&AddKeepsAcc).build().unwrap();
    let graph = circuit.graph();
    assert_eq!(returned_value(graph), constant(graph, ConstValue::Int(7)));
}

/// Treats `tryldglobalbyname` as leaving the accumulator untouched.
struct GlobalLoadKeepsAcc;

impl TemplateTable for GlobalLoadKeepsAcc {
    fn template(&self, info: &BytecodeInfo) -> NodeTemplate {
        let mut template = BytecodeTemplates.template(info);
        if info.opcode == Opcode::TryLdGlobalByName {
            template.writes_acc = false;
        }
        template
    }
}

/// B1: ldai 1; jeqz B3   B2: ldai 2   B3: tryldglobalbyname; return
///
/// The accumulator reaching the return is the one merged at B3, so
/// liveness must keep it live across the load.
#[test]
fn templates_decide_liveness() {
    let m = method(1, |a| {
        let join = a.label();
        a.ldai(1).jeqz(join).ldai(2);
        a.bind(join).unwrap();
        a.op(Opcode::TryLdGlobalByName, &[0, 1]).ret();
    });
    let circuit = CircuitBuilder::new(&m)
        .templates(&GlobalLoadKeepsAcc)
        .build()
        .unwrap();
    let graph = circuit.graph();

    let acc = circuit.liveness().layout().acc();
    assert!(circuit.liveness().live_in(b(3)).contains(acc));
    let selector = only(graph, |op| op == Op::ValueSelector);
    assert_eq!(returned_value(graph), selector);
    let mut merged = value_inputs(graph, selector);
    merged.sort_unstable();
    let mut expected = vec![
        constant(graph, ConstValue::Int(1)),
        constant(graph, ConstValue::Int(2)),
    ];
    expected.sort_unstable();
    assert_eq!(merged, expected);
}
