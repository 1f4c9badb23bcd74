use std::collections::BTreeSet;
use std::fmt;
use std::ops::Deref;

use fnv::FnvHashSet as HashSet;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::types::{mask, BinaryOp, CompareOp, PointerOp, Type, UnaryOp, Value, VarId};

/// An owned symbolic expression tree.
///
/// Every node carries the value it had on the current concrete run, so a
/// tree can always be evaluated without consulting the solver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
#[repr(transparent)]
pub struct SymExpr(Box<Expr>);

impl fmt::Display for SymExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        (**self).fmt(f)
    }
}

impl Deref for SymExpr {
    type Target = Expr;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl From<Expr> for SymExpr {
    fn from(e: Expr) -> Self {
        SymExpr(Box::new(e))
    }
}

pub type Parts = SmallVec<[(u32, SymExpr); 4]>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Expr {
    /// A symbolic input.
    Var { var: VarId, ty: Type, value: Value },
    /// A constant; only ever appears below a symbolic node.
    Val { ty: Type, value: Value },
    UnOp {
        op: UnaryOp,
        expr: SymExpr,
        ty: Type,
        value: Value,
    },
    BinOp {
        op: BinaryOp,
        lhs: SymExpr,
        rhs: SymExpr,
        ty: Type,
        value: Value,
    },
    /// A comparison; `ty` is the type of the 0/1 result.
    Compare {
        op: CompareOp,
        lhs: SymExpr,
        rhs: SymExpr,
        ty: Type,
        value: Value,
    },
    PtrOp {
        op: PointerOp,
        lhs: SymExpr,
        rhs: SymExpr,
        size: usize,
        value: Value,
    },
    /// `bytes` bytes of `expr` starting at byte `offset` (little-endian).
    Extract {
        expr: SymExpr,
        offset: u32,
        bytes: u32,
        value: Value,
    },
    /// A `size`-byte region assembled from symbolic parts at byte offsets.
    /// Bytes not covered by a part take their bytes from `value`; for a
    /// struct region `value` is the size.
    Compose {
        ty: Type,
        size: u32,
        parts: Parts,
        value: Value,
    },
}

impl SymExpr {
    pub fn var(var: VarId, ty: Type, value: Value) -> Self {
        Expr::Var {
            var,
            ty,
            value: ty.normalize(value),
        }
        .into()
    }

    pub fn val(ty: Type, value: Value) -> Self {
        Expr::Val {
            ty,
            value: ty.normalize(value),
        }
        .into()
    }

    pub fn unop(op: UnaryOp, expr: SymExpr, ty: Type, value: Value) -> Self {
        Expr::UnOp {
            op,
            expr,
            ty,
            value: ty.normalize(value),
        }
        .into()
    }

    pub fn binop(op: BinaryOp, lhs: SymExpr, rhs: SymExpr, ty: Type, value: Value) -> Self {
        Expr::BinOp {
            op,
            lhs,
            rhs,
            ty,
            value: ty.normalize(value),
        }
        .into()
    }

    pub fn compare(op: CompareOp, lhs: SymExpr, rhs: SymExpr, ty: Type, value: Value) -> Self {
        Expr::Compare {
            op,
            lhs,
            rhs,
            ty,
            value: ty.normalize(value),
        }
        .into()
    }

    pub fn ptrop(op: PointerOp, lhs: SymExpr, rhs: SymExpr, size: usize, value: Value) -> Self {
        Expr::PtrOp {
            op,
            lhs,
            rhs,
            size,
            value: op.result_type().normalize(value),
        }
        .into()
    }

    /// Extracts a byte range of `expr`; the sample value is derived from the
    /// sample value of `expr`.
    pub fn extract(expr: SymExpr, offset: u32, bytes: u32) -> Self {
        assert!(
            offset + bytes <= expr.bytes(),
            "extract of bytes {}..{} from a {}-byte expression",
            offset,
            offset + bytes,
            expr.bytes()
        );

        if offset == 0 && bytes == expr.bytes() {
            return expr;
        }

        match *expr.0 {
            Expr::Extract {
                expr: inner,
                offset: inner_offset,
                ..
            } => SymExpr::extract(inner, inner_offset + offset, bytes),
            inner => {
                let value = extract_bytes(inner.value(), offset, bytes);
                Expr::Extract {
                    expr: inner.into(),
                    offset,
                    bytes,
                    value,
                }
                .into()
            }
        }
    }

    pub fn compose(ty: Type, size: u32, mut parts: Parts, value: Value) -> Self {
        parts.sort_by_key(|(offset, _)| *offset);
        debug_assert!(parts
            .windows(2)
            .all(|w| w[0].0 + w[0].1.bytes() <= w[1].0));
        debug_assert!(parts
            .last()
            .map(|(offset, e)| offset + e.bytes() <= size)
            .unwrap_or(true));

        Expr::Compose {
            ty,
            size,
            parts,
            value: ty.normalize(value),
        }
        .into()
    }

    /// Converts a value used as a branch condition into a comparison.
    pub fn into_predicate(self) -> Self {
        if self.is_compare() {
            return self;
        }
        let taken = (self.value() != 0) as Value;
        let zero = SymExpr::val(self.ty(), 0);
        SymExpr::compare(CompareOp::Neq, self, zero, Type::Int, taken)
    }

    pub fn into_inner(self) -> Expr {
        *self.0
    }
}

pub(crate) fn extract_bytes(value: Value, offset: u32, bytes: u32) -> Value {
    let shift = offset * 8;
    let shifted = if shift >= 64 {
        0
    } else {
        (value as u64) >> shift
    };
    (shifted & mask(bytes * 8)) as Value
}

impl Expr {
    pub fn value(&self) -> Value {
        match self {
            Expr::Var { value, .. }
            | Expr::Val { value, .. }
            | Expr::UnOp { value, .. }
            | Expr::BinOp { value, .. }
            | Expr::Compare { value, .. }
            | Expr::PtrOp { value, .. }
            | Expr::Extract { value, .. }
            | Expr::Compose { value, .. } => *value,
        }
    }

    pub fn ty(&self) -> Type {
        match self {
            Expr::Var { ty, .. }
            | Expr::Val { ty, .. }
            | Expr::UnOp { ty, .. }
            | Expr::BinOp { ty, .. }
            | Expr::Compare { ty, .. }
            | Expr::Compose { ty, .. } => *ty,
            Expr::PtrOp { op, .. } => op.result_type(),
            Expr::Extract { bytes, .. } => {
                Type::of_size(*bytes as usize, false).unwrap_or(Type::Struct)
            }
        }
    }

    pub fn bytes(&self) -> u32 {
        match self {
            Expr::Extract { bytes, .. } => *bytes,
            Expr::Compose { size, .. } => *size,
            expr => expr.ty().size() as u32,
        }
    }

    pub fn bits(&self) -> u32 {
        self.bytes() * 8
    }

    pub fn is_signed(&self) -> bool {
        self.ty().is_signed()
    }

    pub fn is_compare(&self) -> bool {
        matches!(self, Expr::Compare { .. })
    }

    pub fn is_struct(&self) -> bool {
        self.ty().is_struct()
    }

    /// True if no symbolic input occurs in the tree.
    pub fn is_concrete(&self) -> bool {
        struct HasVar(bool);

        impl<'expr> VisitRef<'expr> for HasVar {
            fn visit_var_ref(&mut self, _var: VarId, _ty: Type, _value: Value) {
                self.0 = true;
            }

            fn visit_val_ref(&mut self, _ty: Type, _value: Value) {}
        }

        let mut visitor = HasVar(false);
        visitor.visit_ref(self);
        !visitor.0
    }

    pub fn append_vars(&self, vars: &mut BTreeSet<VarId>) {
        struct Collect<'a>(&'a mut BTreeSet<VarId>);

        impl<'a, 'expr> VisitRef<'expr> for Collect<'a> {
            fn visit_var_ref(&mut self, var: VarId, _ty: Type, _value: Value) {
                self.0.insert(var);
            }

            fn visit_val_ref(&mut self, _ty: Type, _value: Value) {}
        }

        Collect(vars).visit_ref(self);
    }

    pub fn vars(&self) -> BTreeSet<VarId> {
        let mut vars = BTreeSet::new();
        self.append_vars(&mut vars);
        vars
    }

    pub fn depends_on(&self, vars: &HashSet<VarId>) -> bool {
        match self {
            Expr::Var { var, .. } => vars.contains(var),
            Expr::Val { .. } => false,
            Expr::UnOp { expr, .. } | Expr::Extract { expr, .. } => expr.depends_on(vars),
            Expr::BinOp { lhs, rhs, .. }
            | Expr::Compare { lhs, rhs, .. }
            | Expr::PtrOp { lhs, rhs, .. } => lhs.depends_on(vars) || rhs.depends_on(vars),
            Expr::Compose { parts, .. } => parts.iter().any(|(_, e)| e.depends_on(vars)),
        }
    }

    /// Number of nodes in the tree.
    pub fn size(&self) -> usize {
        1 + match self {
            Expr::Var { .. } | Expr::Val { .. } => 0,
            Expr::UnOp { expr, .. } | Expr::Extract { expr, .. } => expr.size(),
            Expr::BinOp { lhs, rhs, .. }
            | Expr::Compare { lhs, rhs, .. }
            | Expr::PtrOp { lhs, rhs, .. } => lhs.size() + rhs.size(),
            Expr::Compose { parts, .. } => parts.iter().map(|(_, e)| e.size()).sum(),
        }
    }

    /// Computes this node's value from the values of its children as given
    /// by `child`.
    fn eval_with<F>(&self, mut child: F) -> Value
    where
        F: FnMut(&Expr) -> Value,
    {
        match self {
            Expr::Var { value, .. } | Expr::Val { value, .. } => *value,
            Expr::UnOp { op, expr, ty, .. } => op.apply(*ty, expr.bits(), child(expr)),
            Expr::BinOp {
                op, lhs, rhs, ty, ..
            } => op.apply(*ty, child(lhs), child(rhs)),
            Expr::Compare {
                op, lhs, rhs, ty, ..
            } => {
                let bits = lhs.bits().max(rhs.bits());
                ty.normalize(op.apply(bits, child(lhs), child(rhs)) as Value)
            }
            Expr::PtrOp {
                op, lhs, rhs, size, ..
            } => op.apply(*size, child(lhs), child(rhs)),
            Expr::Extract {
                expr,
                offset,
                bytes,
                ..
            } => extract_bytes(child(expr), *offset, *bytes),
            Expr::Compose {
                ty, parts, value, ..
            } => {
                if ty.is_struct() {
                    return *value;
                }
                let mut bits = *value as u64;
                for (offset, part) in parts.iter() {
                    let shift = offset * 8;
                    let part_mask = mask(part.bits()) << shift;
                    let part_bits = ((child(part) as u64) << shift) & part_mask;
                    bits = (bits & !part_mask) | part_bits;
                }
                ty.normalize(bits as Value)
            }
        }
    }

    /// Evaluates the tree under an assignment of the symbolic inputs; inputs
    /// missing from `inputs` take their recorded value.
    pub fn evaluate(&self, inputs: &[Value]) -> Value {
        match self {
            Expr::Var { var, ty, value } => inputs
                .get(*var as usize)
                .map(|v| ty.normalize(*v))
                .unwrap_or(*value),
            expr => expr.eval_with(|child| child.evaluate(inputs)),
        }
    }

    /// True if every node's recorded value agrees with its children.
    pub fn is_consistent(&self) -> bool {
        let local = self.eval_with(|child| child.value()) == self.value();
        local
            && match self {
                Expr::Var { .. } | Expr::Val { .. } => true,
                Expr::UnOp { expr, .. } | Expr::Extract { expr, .. } => expr.is_consistent(),
                Expr::BinOp { lhs, rhs, .. }
                | Expr::Compare { lhs, rhs, .. }
                | Expr::PtrOp { lhs, rhs, .. } => lhs.is_consistent() && rhs.is_consistent(),
                Expr::Compose { parts, .. } => parts.iter().all(|(_, e)| e.is_consistent()),
            }
    }

    fn fmt_l1(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Var { var, .. } => write!(f, "x{}", var),
            Expr::Val { value, .. } => write!(f, "{}", value),

            Expr::PtrOp {
                op, lhs, rhs, size, ..
            } => write!(f, "{}({}, {}, size={})", op.name(), lhs, rhs, size),
            Expr::Extract {
                expr,
                offset,
                bytes,
                ..
            } => write!(f, "extract({}, offset={}, bytes={})", expr, offset, bytes),
            Expr::Compose {
                ty, size, parts, ..
            } => {
                if ty.is_struct() {
                    write!(f, "compose(size={}", size)?;
                } else {
                    write!(f, "compose({}", ty)?;
                }
                for (offset, part) in parts.iter() {
                    write!(f, ", {}: {}", offset, part)?;
                }
                write!(f, ")")
            }

            expr => write!(f, "({})", expr),
        }
    }

    fn fmt_l2(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::UnOp {
                op: UnaryOp::Negate,
                expr,
                ..
            } => {
                write!(f, "-")?;
                expr.fmt_l2(f)
            }
            Expr::UnOp {
                op: UnaryOp::BitwiseNot,
                expr,
                ..
            } => {
                write!(f, "~")?;
                expr.fmt_l2(f)
            }
            Expr::UnOp {
                op: UnaryOp::LogicalNot,
                expr,
                ..
            } => {
                write!(f, "!")?;
                expr.fmt_l2(f)
            }
            Expr::UnOp {
                op: UnaryOp::SignedCast | UnaryOp::UnsignedCast,
                expr,
                ty,
                ..
            } => {
                expr.fmt_l1(f)?;
                write!(f, " as {}", ty)
            }
            expr => expr.fmt_l1(f),
        }
    }

    fn fmt_binop(&self, f: &mut fmt::Formatter<'_>, level: u8) -> fmt::Result {
        let (symbol, lhs, rhs) = match self {
            Expr::BinOp { op, lhs, rhs, .. } if binop_level(*op) == level => {
                (op.symbol(), lhs, rhs)
            }
            Expr::Compare { op, lhs, rhs, .. } if compare_level(*op) == level => {
                (op.symbol(), lhs, rhs)
            }
            expr => return expr.fmt_level(f, level - 1),
        };
        lhs.fmt_level(f, level)?;
        write!(f, " {} ", symbol)?;
        rhs.fmt_level(f, level - 1)
    }

    fn fmt_level(&self, f: &mut fmt::Formatter<'_>, level: u8) -> fmt::Result {
        match level {
            0 | 1 => self.fmt_l1(f),
            2 => self.fmt_l2(f),
            level => self.fmt_binop(f, level),
        }
    }
}

fn binop_level(op: BinaryOp) -> u8 {
    match op {
        BinaryOp::Multiply | BinaryOp::Div | BinaryOp::SDiv | BinaryOp::Mod | BinaryOp::SMod => 3,
        BinaryOp::Add | BinaryOp::Subtract => 4,
        BinaryOp::ShiftL | BinaryOp::ShiftR | BinaryOp::SShiftR => 5,
        BinaryOp::BitAnd => 8,
        BinaryOp::BitXor => 9,
        BinaryOp::BitOr => 10,
    }
}

fn compare_level(op: CompareOp) -> u8 {
    match op {
        CompareOp::Eq | CompareOp::Neq => 7,
        _ => 6,
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.fmt_level(f, 10)
    }
}

pub trait VisitRef<'expr> {
    fn visit_var_ref(&mut self, var: VarId, ty: Type, value: Value);
    fn visit_val_ref(&mut self, ty: Type, value: Value);

    #[allow(unused_variables)]
    fn visit_unop_ref(&mut self, op: UnaryOp, expr: &'expr SymExpr, ty: Type) {
        self.visit_expr_ref(expr);
    }

    #[allow(unused_variables)]
    fn visit_binop_ref(&mut self, op: BinaryOp, lexpr: &'expr SymExpr, rexpr: &'expr SymExpr) {
        self.visit_expr_ref(lexpr);
        self.visit_expr_ref(rexpr);
    }

    #[allow(unused_variables)]
    fn visit_compare_ref(&mut self, op: CompareOp, lexpr: &'expr SymExpr, rexpr: &'expr SymExpr) {
        self.visit_expr_ref(lexpr);
        self.visit_expr_ref(rexpr);
    }

    #[allow(unused_variables)]
    fn visit_ptrop_ref(
        &mut self,
        op: PointerOp,
        lexpr: &'expr SymExpr,
        rexpr: &'expr SymExpr,
        size: usize,
    ) {
        self.visit_expr_ref(lexpr);
        self.visit_expr_ref(rexpr);
    }

    #[allow(unused_variables)]
    fn visit_extract_ref(&mut self, expr: &'expr SymExpr, offset: u32, bytes: u32) {
        self.visit_expr_ref(expr);
    }

    fn visit_compose_ref(&mut self, parts: &'expr [(u32, SymExpr)]) {
        for (_, part) in parts {
            self.visit_expr_ref(part);
        }
    }

    fn visit_expr_ref(&mut self, expr: &'expr SymExpr) {
        self.visit_ref(expr)
    }

    /// Dispatches on the node kind of `expr` without going through
    /// `visit_expr_ref`.
    fn visit_ref(&mut self, expr: &'expr Expr) {
        match expr {
            Expr::Var { var, ty, value } => self.visit_var_ref(*var, *ty, *value),
            Expr::Val { ty, value } => self.visit_val_ref(*ty, *value),
            Expr::UnOp { op, expr, ty, .. } => self.visit_unop_ref(*op, expr, *ty),
            Expr::BinOp { op, lhs, rhs, .. } => self.visit_binop_ref(*op, lhs, rhs),
            Expr::Compare { op, lhs, rhs, .. } => self.visit_compare_ref(*op, lhs, rhs),
            Expr::PtrOp {
                op, lhs, rhs, size, ..
            } => self.visit_ptrop_ref(*op, lhs, rhs, *size),
            Expr::Extract {
                expr,
                offset,
                bytes,
                ..
            } => self.visit_extract_ref(expr, *offset, *bytes),
            Expr::Compose { parts, .. } => self.visit_compose_ref(parts),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn x(var: VarId, value: Value) -> SymExpr {
        SymExpr::var(var, Type::Int, value)
    }

    fn add(lhs: SymExpr, rhs: SymExpr) -> SymExpr {
        let value = BinaryOp::Add.apply(Type::Int, lhs.value(), rhs.value());
        SymExpr::binop(BinaryOp::Add, lhs, rhs, Type::Int, value)
    }

    #[test]
    fn test_display() {
        let e = SymExpr::compare(
            CompareOp::SGt,
            x(0, 5),
            SymExpr::val(Type::Int, 10),
            Type::Int,
            0,
        );
        assert_eq!(e.to_string(), "x0 s> 10");

        let sum = add(x(0, 3), x(1, 4));
        let e = SymExpr::compare(CompareOp::Neq, sum, SymExpr::val(Type::Int, 0), Type::Int, 1);
        assert_eq!(e.to_string(), "x0 + x1 != 0");

        let prod = SymExpr::binop(
            BinaryOp::Multiply,
            add(x(0, 1), x(1, 2)),
            SymExpr::val(Type::Int, 3),
            Type::Int,
            9,
        );
        assert_eq!(prod.to_string(), "(x0 + x1) * 3");

        let cast = SymExpr::unop(UnaryOp::UnsignedCast, x(2, -1), Type::UChar, 0xff);
        assert_eq!(cast.to_string(), "x2 as u8");
    }

    #[test]
    fn test_vars_and_dependencies() {
        let e = add(add(x(3, 1), x(1, 1)), x(3, 1));
        assert_eq!(e.vars().into_iter().collect::<Vec<_>>(), vec![1, 3]);
        assert_eq!(e.size(), 5);

        let mut deps = HashSet::default();
        assert!(!e.depends_on(&deps));
        deps.insert(2);
        assert!(!e.depends_on(&deps));
        deps.insert(1);
        assert!(e.depends_on(&deps));

        assert!(!e.is_concrete());
        assert!(SymExpr::val(Type::Int, 7).is_concrete());
    }

    #[test]
    fn test_evaluate() {
        let e = add(x(0, 3), x(1, 4));
        assert_eq!(e.value(), 7);
        assert!(e.is_consistent());
        assert_eq!(e.evaluate(&[10, 20]), 30);
        assert_eq!(e.evaluate(&[10]), 14);
        assert_eq!(e.evaluate(&[i32::MAX as Value, 1]), i32::MIN as Value);

        let p = e.clone().into_predicate();
        assert_eq!(p.to_string(), "x0 + x1 != 0");
        assert_eq!(p.value(), 1);
        assert_eq!(p.evaluate(&[-4, 4]), 0);
        assert!(p.is_consistent());
    }

    #[test]
    fn test_inconsistent_sample() {
        let e = SymExpr::binop(BinaryOp::Add, x(0, 3), x(1, 4), Type::Int, 8);
        assert!(!e.is_consistent());
    }

    #[test]
    fn test_extract() {
        let e = SymExpr::var(0, Type::UInt, 0x11223344);
        let hi = SymExpr::extract(e.clone(), 2, 2);
        assert_eq!(hi.value(), 0x1122);
        assert_eq!(hi.ty(), Type::UShort);

        let b = SymExpr::extract(hi, 1, 1);
        assert_eq!(b.value(), 0x11);
        match &*b {
            Expr::Extract { offset, bytes, .. } => assert_eq!((*offset, *bytes), (3, 1)),
            e => panic!("expected extract, got {}", e),
        }

        assert_eq!(SymExpr::extract(e.clone(), 0, 4), e);
        assert_eq!(b.evaluate(&[0x7f000000]), 0x7f);
    }

    #[test]
    fn test_compose() {
        let lo = SymExpr::var(0, Type::UChar, 0xaa);
        let hi = SymExpr::var(1, Type::UChar, 0xbb);
        let mut parts = Parts::new();
        parts.push((3, hi));
        parts.push((0, lo));

        let e = SymExpr::compose(Type::UInt, 4, parts, 0xbb0000aa);
        assert!(e.is_consistent());
        assert_eq!(e.evaluate(&[0x01, 0x02]), 0x02000001);
        assert_eq!(e.to_string(), "compose(u32, 0: x0, 3: x1)");
        match &*e {
            Expr::Compose { parts, .. } => assert_eq!(parts[0].0, 0),
            e => panic!("expected compose, got {}", e),
        }
    }
}
