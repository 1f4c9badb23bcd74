use proptest::prelude::*;

use concolic_runtime::blast::BitBlast;
use concolic_runtime::execution::SymbolicExecution;
use concolic_runtime::expr::SymExpr;
use concolic_runtime::interpreter::SymbolicInterpreter;
use concolic_runtime::solver::smtlib::SmtLib;
use concolic_runtime::solver::SolverContext;
use concolic_runtime::types::{BinaryOp, CompareOp, PointerOp, Type, UnaryOp, Value};

const TYPES: [Type; 8] = [
    Type::UChar,
    Type::Char,
    Type::UShort,
    Type::Short,
    Type::UInt,
    Type::Int,
    Type::ULong,
    Type::Long,
];

const BINOPS: [BinaryOp; 13] = [
    BinaryOp::Add,
    BinaryOp::Subtract,
    BinaryOp::Multiply,
    BinaryOp::Div,
    BinaryOp::SDiv,
    BinaryOp::Mod,
    BinaryOp::SMod,
    BinaryOp::ShiftL,
    BinaryOp::ShiftR,
    BinaryOp::SShiftR,
    BinaryOp::BitAnd,
    BinaryOp::BitOr,
    BinaryOp::BitXor,
];

const COMPARES: [CompareOp; 10] = [
    CompareOp::Eq,
    CompareOp::Neq,
    CompareOp::Gt,
    CompareOp::Le,
    CompareOp::Lt,
    CompareOp::Ge,
    CompareOp::SGt,
    CompareOp::SLe,
    CompareOp::SLt,
    CompareOp::SGe,
];

/// One statement of a straight-line program over `Int` locals.
#[derive(Debug, Clone)]
enum Step {
    Input(usize),
    Binary(BinaryOp, usize, usize, usize),
    Negate(usize, usize),
    Branch(CompareOp, usize, usize),
    Pointer(usize, usize),
}

fn step() -> impl Strategy<Value = Step> {
    prop_oneof![
        (0usize..4).prop_map(Step::Input),
        (0usize..13, 0usize..4, 0usize..4, 0usize..4)
            .prop_map(|(op, a, b, d)| Step::Binary(BINOPS[op], a, b, d)),
        (0usize..4, 0usize..4).prop_map(|(a, d)| Step::Negate(a, d)),
        (0usize..10, 0usize..4, 0usize..4).prop_map(|(op, a, b)| Step::Branch(COMPARES[op], a, b)),
        (0usize..4, 0usize..4).prop_map(|(a, d)| Step::Pointer(a, d)),
    ]
}

fn slot(i: usize) -> u64 {
    0x8000 + 4 * i as u64
}

/// Drives the interpreter with `steps`, keeping the concrete values of the
/// locals alongside as the instrumented program would.
fn run(inputs: Vec<Value>, steps: &[Step]) -> SymbolicExecution {
    let mut si = SymbolicInterpreter::new(inputs.clone());
    let mut locals = [0 as Value; 4];
    let mut consumed = 0;

    for (id, step) in steps.iter().enumerate() {
        let id = id as i32;
        match *step {
            Step::Input(d) => {
                if consumed == inputs.len() {
                    continue;
                }
                locals[d] = si.new_input(Type::Int, slot(d));
                consumed += 1;
            }
            Step::Binary(op, a, b, d) => {
                let value = op.apply(Type::Int, locals[a], locals[b]);
                si.load(id, slot(a), Type::Int, locals[a]);
                si.load(id, slot(b), Type::Int, locals[b]);
                si.apply_binary_op(id, op, Type::Int, value);
                si.store(id, slot(d));
                locals[d] = value;
            }
            Step::Negate(a, d) => {
                let value = UnaryOp::Negate.apply(Type::Int, 32, locals[a]);
                si.load(id, slot(a), Type::Int, locals[a]);
                si.apply_unary_op(id, UnaryOp::Negate, Type::Int, value);
                si.store(id, slot(d));
                locals[d] = value;
            }
            Step::Branch(op, a, b) => {
                let taken = op.apply(32, locals[a], locals[b]);
                si.load(id, slot(a), Type::Int, locals[a]);
                si.load(id, slot(b), Type::Int, locals[b]);
                si.apply_compare_op(id, op, Type::Int, taken as Value);
                si.branch(id, id, taken);
            }
            Step::Pointer(a, d) => {
                // (int)(base + a) where base is concrete
                let value = PointerOp::AddPI.apply(4, 0x4000, locals[a]);
                si.load(id, 0x100, Type::ULong, 0x4000);
                si.load(id, slot(a), Type::Int, locals[a]);
                si.apply_bin_ptr_op(id, PointerOp::AddPI, 4, value);
                let value = Type::Int.normalize(value);
                si.apply_unary_op(id, UnaryOp::SignedCast, Type::Int, value);
                si.store(id, slot(d));
                locals[d] = value;
            }
        }
    }

    si.into_execution()
}

#[test]
fn test_empty_round_trip() {
    let ex = SymbolicExecution::new(vec![]);
    let bytes = ex.serialize().unwrap();
    let decoded = SymbolicExecution::deserialize(&bytes).unwrap();
    assert_eq!(decoded, ex);
    assert_eq!(decoded.serialize().unwrap(), bytes);
}

#[test]
fn test_file_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("szd_execution");

    let ex = run(
        vec![4, -9],
        &[
            Step::Input(0),
            Step::Input(1),
            Step::Binary(BinaryOp::Multiply, 0, 1, 2),
            Step::Branch(CompareOp::SLt, 2, 3),
        ],
    );
    assert_eq!(ex.path().constraints().len(), 1);

    ex.write_to(&path).unwrap();
    assert_eq!(SymbolicExecution::read_from(&path).unwrap(), ex);
}

#[test]
fn test_missing_record() {
    let dir = tempfile::tempdir().unwrap();
    assert!(SymbolicExecution::read_from(dir.path().join("missing")).is_err());
}

proptest! {
    #[test]
    fn test_record_round_trip(
        inputs in prop::collection::vec(any::<i32>().prop_map(Value::from), 0..4),
        steps in prop::collection::vec(step(), 0..32),
    ) {
        let ex = run(inputs, &steps);

        let bytes = ex.serialize().unwrap();
        let decoded = SymbolicExecution::deserialize(&bytes).unwrap();
        prop_assert_eq!(&decoded, &ex);
        prop_assert_eq!(decoded.serialize().unwrap(), bytes);
    }

    #[test]
    fn test_constraints_hold(
        inputs in prop::collection::vec(any::<i32>().prop_map(Value::from), 1..4),
        steps in prop::collection::vec(step(), 0..32),
    ) {
        let ex = run(inputs, &steps);

        for constraint in ex.path().constraints() {
            prop_assert!(constraint.expr.is_consistent(), "{}", constraint.expr);
            prop_assert!(constraint.holds());
            prop_assert_eq!(
                constraint.expr.evaluate(ex.inputs()),
                constraint.expr.value()
            );
        }
        for (_, expr) in ex.memory().iter() {
            prop_assert!(expr.is_consistent(), "{}", expr);
        }
    }

    #[test]
    fn test_evaluation_matches_types(value in any::<i64>(), ty in 0usize..8, op in 0usize..13) {
        let ty = TYPES[ty];
        let op = BINOPS[op];
        let x = SymExpr::var(0, ty, value);
        let c = SymExpr::val(ty, 3);
        let e = SymExpr::binop(op, x, c, ty, op.apply(ty, ty.normalize(value), 3));

        prop_assert!(e.is_consistent());
        prop_assert_eq!(e.evaluate(&[value]), e.value());
    }
}

#[test]
fn test_path_condition_script() {
    let ex = run(
        vec![12],
        &[
            Step::Input(0),
            Step::Branch(CompareOp::SGt, 0, 1),
            Step::Negate(0, 2),
            Step::Branch(CompareOp::Eq, 2, 1),
        ],
    );

    let mut ctxt = SolverContext::new(SmtLib::new());
    let path = ex.path().bit_blast(&mut ctxt);
    assert_eq!(
        path,
        "(and (bvslt (_ bv0 32) x0) (not (= (bvneg x0) (_ bv0 32))))"
    );
    assert_eq!(ctxt.declared_vars(), 1);
}
