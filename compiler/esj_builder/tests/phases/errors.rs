//! Inputs the builder must reject, and how.

use esj_builder::{BuildError, CompileOptions};
use esj_bytecode::{DecodeError, ExceptionEntry, Method, Opcode};
use pretty_assertions::assert_eq;

use crate::common::{build_err, method, method_with_args};

fn reject(m: &Method) -> BuildError {
    build_err(m, CompileOptions::default())
}

#[test]
fn empty_method() {
    let err = reject(&Method::new(Vec::new(), 0));
    assert_eq!(err, BuildError::Decode(DecodeError::Empty));
    assert!(err.is_malformed_input());
}

#[test]
fn unknown_opcode() {
    let err = reject(&Method::new(vec![0xff], 0));
    assert_eq!(
        err,
        BuildError::Decode(DecodeError::UnknownOpcode { pc: 0, byte: 0xff })
    );
}

#[test]
fn truncated_instruction() {
    let err = reject(&Method::new(vec![Opcode::Ldai as u8, 1], 0));
    assert!(matches!(
        err,
        BuildError::Decode(DecodeError::Truncated { pc: 0, .. })
    ));
}

#[test]
fn register_out_of_range() {
    let m = method(1, |a| {
        a.lda(3).ret();
    });
    assert_eq!(
        reject(&m),
        BuildError::RegisterOutOfRange {
            bc_index: 0,
            vreg: 3,
            num_vregs: 1
        }
    );
}

#[test]
fn more_arguments_than_registers() {
    let m = method_with_args(1, 2, |a| {
        a.ret_undefined();
    });
    assert_eq!(
        reject(&m),
        BuildError::TooManyArguments {
            num_args: 2,
            num_vregs: 1
        }
    );
}

#[test]
fn code_falls_off_the_end() {
    let m = method(0, |a| {
        a.ldai(1);
    });
    assert_eq!(reject(&m), BuildError::FallsOffEnd { bc_index: 0 });

    // A conditional jump as the last instruction can fall through too.
    let m = method(0, |a| {
        let head = a.here();
        a.jnez(head);
    });
    assert_eq!(reject(&m), BuildError::FallsOffEnd { bc_index: 0 });
}

#[test]
fn jump_into_the_middle_of_an_instruction() {
    let code = vec![Opcode::Jmp as u8, 1, Opcode::ReturnUndefined as u8];
    assert_eq!(
        reject(&Method::new(code, 0)),
        BuildError::MisalignedTarget {
            bc_index: 0,
            target_pc: 1
        }
    );
}

#[test]
fn jump_past_the_last_instruction() {
    let code = vec![Opcode::ReturnUndefined as u8, Opcode::Jmp as u8, 1];
    assert_eq!(
        reject(&Method::new(code, 0)),
        BuildError::MisalignedTarget {
            bc_index: 1,
            target_pc: 2
        }
    );
}

/// ldai 1 (pc 0); return (pc 5)
fn two_instructions() -> Method {
    method(0, |a| {
        a.ldai(1).ret();
    })
}

#[test]
fn inverted_try_range() {
    let m = two_instructions().with_exceptions(vec![ExceptionEntry::new(5, 0, vec![5])]);
    assert_eq!(
        reject(&m),
        BuildError::InvalidTryRange {
            start_pc: 5,
            end_pc: 0
        }
    );
}

#[test]
fn try_boundary_inside_an_instruction() {
    let m = two_instructions().with_exceptions(vec![ExceptionEntry::new(1, 5, vec![5])]);
    assert_eq!(reject(&m), BuildError::MisalignedTryBoundary { pc: 1 });

    let m = two_instructions().with_exceptions(vec![ExceptionEntry::new(0, 5, vec![6])]);
    assert_eq!(reject(&m), BuildError::MisalignedTryBoundary { pc: 6 });
}

#[test]
fn empty_try_ranges_are_ignored() {
    let m = two_instructions().with_exceptions(vec![
        ExceptionEntry::new(0, 0, vec![5]),
        ExceptionEntry::new(0, 5, Vec::new()),
    ]);
    assert!(esj_builder::build_circuit(&m, CompileOptions::default()).is_ok());
}

/// callarg0 x3 (pc 0, 2, 4); returnundefined x2 (pc 6, 7)
#[test]
fn crossing_try_ranges() {
    let m = method(0, |a| {
        let first = a.here();
        a.op(Opcode::CallArg0, &[0]);
        let second = a.here();
        a.op(Opcode::CallArg0, &[0]);
        let first_end = a.here();
        a.op(Opcode::CallArg0, &[0]);
        let second_end = a.here();
        a.ret_undefined();
        let handler = a.here();
        a.ret_undefined();
        a.try_range(first, first_end, &[handler]);
        a.try_range(second, second_end, &[handler]);
    });
    assert_eq!(
        reject(&m),
        BuildError::OverlappingTryRanges {
            first: (0, 4),
            second: (2, 6)
        }
    );
}

#[test]
fn errors_render_readably() {
    let err = BuildError::MisalignedOsr { pc: 12 };
    assert_eq!(
        err.to_string(),
        "OSR resume pc 12 is not an instruction boundary"
    );
    let err = BuildError::FallsOffEnd { bc_index: 4 };
    assert_eq!(err.to_string(), "bytecode 4 falls off the end of the method");
}
