use crate::backend::{BvOp, BvRel, TermBuilder};
use crate::execution::{Constraint, SymbolicPath};
use crate::expr::{Expr, SymExpr};
use crate::memory::SymbolicMemory;
use crate::solver::SolverContext;
use crate::types::{mask, Addr, BinaryOp, CompareOp, PointerOp, Type, UnaryOp};

/// Translation into solver terms.
///
/// Expressions become bit-vectors of their own width; constraints, paths and
/// memory become boolean terms.
pub trait BitBlast {
    fn bit_blast<B: TermBuilder>(&self, ctxt: &mut SolverContext<B>) -> B::Term;
}

struct ToTerm<'c, B: TermBuilder> {
    ctxt: &'c mut SolverContext<B>,
}

impl<'c, B: TermBuilder> ToTerm<'c, B> {
    fn new(ctxt: &'c mut SolverContext<B>) -> Self {
        Self { ctxt }
    }

    fn builder(&mut self) -> &mut B {
        &mut self.ctxt.builder
    }

    fn constant(&mut self, value: u64, bits: u32) -> B::Term {
        self.builder().constant(value & mask(bits), bits)
    }

    fn resize(&mut self, term: B::Term, from: u32, to: u32, signed: bool) -> B::Term {
        if from == to {
            term
        } else if from < to && signed {
            self.builder().sign_extend(&term, to - from)
        } else if from < to {
            self.builder().zero_extend(&term, to - from)
        } else {
            self.builder().extract(&term, to - 1, 0)
        }
    }

    /// `expr` as a bit-vector of `bits` bits, extended according to its own
    /// signedness.
    fn resized(&mut self, expr: &Expr, bits: u32) -> B::Term {
        let term = self.term(expr);
        self.resize(term, expr.bits(), bits, expr.is_signed())
    }

    fn flag(&mut self, cond: B::Term, bits: u32) -> B::Term {
        let one = self.constant(1, bits);
        let zero = self.constant(0, bits);
        self.builder().ite(&cond, &one, &zero)
    }

    fn term(&mut self, expr: &Expr) -> B::Term {
        match expr {
            Expr::Var { var, ty, .. } => self.ctxt.var(*var, ty.bits()),
            Expr::Val { ty, value } => self.constant(*value as u64, ty.bits()),
            Expr::UnOp { op, expr, ty, .. } => self.unop(*op, expr, *ty),
            Expr::BinOp {
                op, lhs, rhs, ty, ..
            } => self.binop(*op, lhs, rhs, *ty),
            Expr::Compare { ty, .. } => {
                let cond = self.predicate(expr);
                self.flag(cond, ty.bits())
            }
            Expr::PtrOp {
                op, lhs, rhs, size, ..
            } => self.ptrop(*op, lhs, rhs, *size),
            Expr::Extract {
                expr,
                offset,
                bytes,
                ..
            } => {
                let term = self.term(expr);
                self.builder()
                    .extract(&term, (offset + bytes) * 8 - 1, offset * 8)
            }
            Expr::Compose {
                ty,
                size,
                parts,
                value,
            } => {
                if ty.is_struct() {
                    panic!("unsupported operation: bit-blasting a {}-byte struct", size)
                }

                let mut pieces = Vec::with_capacity(parts.len() * 2 + 1);
                let mut cursor = 0;
                for (offset, part) in parts.iter() {
                    if *offset > cursor {
                        pieces.push(self.filler(*value, cursor, *offset));
                    }
                    pieces.push(self.term(part));
                    cursor = offset + part.bytes();
                }
                if cursor < *size {
                    pieces.push(self.filler(*value, cursor, *size));
                }

                let mut pieces = pieces.into_iter();
                let mut term = match pieces.next() {
                    Some(term) => term,
                    None => return self.constant(*value as u64, size * 8),
                };
                for piece in pieces {
                    term = self.builder().concat(&piece, &term);
                }
                term
            }
        }
    }

    /// Concrete bytes `from..to` of `value`.
    fn filler(&mut self, value: i64, from: u32, to: u32) -> B::Term {
        let bits = (to - from) * 8;
        let shift = from * 8;
        let bytes = if shift >= 64 {
            0
        } else {
            (value as u64) >> shift
        };
        self.constant(bytes, bits)
    }

    fn unop(&mut self, op: UnaryOp, expr: &Expr, ty: Type) -> B::Term {
        let bits = ty.bits();
        match op {
            UnaryOp::Negate => {
                let term = self.resized(expr, bits);
                self.builder().neg(&term)
            }
            UnaryOp::BitwiseNot => {
                let term = self.resized(expr, bits);
                self.builder().not(&term)
            }
            UnaryOp::LogicalNot => {
                let cond = self.predicate(expr);
                let cond = self.builder().bool_not(&cond);
                self.flag(cond, bits)
            }
            UnaryOp::UnsignedCast | UnaryOp::SignedCast => {
                let term = self.term(expr);
                self.resize(term, expr.bits(), bits, op == UnaryOp::SignedCast)
            }
        }
    }

    fn binop(&mut self, op: BinaryOp, lhs: &Expr, rhs: &Expr, ty: Type) -> B::Term {
        let bits = ty.bits();
        let lterm = self.resized(lhs, bits);
        let rterm = self.resized(rhs, bits);

        let op = match op {
            BinaryOp::Add => BvOp::Add,
            BinaryOp::Subtract => BvOp::Sub,
            BinaryOp::Multiply => BvOp::Mul,
            BinaryOp::Div => BvOp::UDiv,
            BinaryOp::SDiv => BvOp::SDiv,
            BinaryOp::Mod => BvOp::URem,
            BinaryOp::SMod => BvOp::SRem,
            BinaryOp::ShiftL => BvOp::Shl,
            BinaryOp::ShiftR => BvOp::LShr,
            BinaryOp::SShiftR => BvOp::AShr,
            BinaryOp::BitAnd => BvOp::And,
            BinaryOp::BitOr => BvOp::Or,
            BinaryOp::BitXor => BvOp::Xor,
        };
        self.builder().binop(op, &lterm, &rterm)
    }

    fn ptrop(&mut self, op: PointerOp, lhs: &Expr, rhs: &Expr, size: usize) -> B::Term {
        let bits = Type::POINTER.bits();
        let lterm = self.resized(lhs, bits);
        let rterm = self.resized(rhs, bits);
        let scale = self.constant(size.max(1) as u64, bits);

        match op {
            PointerOp::AddPI => {
                let offset = self.builder().binop(BvOp::Mul, &rterm, &scale);
                self.builder().binop(BvOp::Add, &lterm, &offset)
            }
            PointerOp::SubtractPI => {
                let offset = self.builder().binop(BvOp::Mul, &rterm, &scale);
                self.builder().binop(BvOp::Sub, &lterm, &offset)
            }
            PointerOp::SubtractPP => {
                let diff = self.builder().binop(BvOp::Sub, &lterm, &rterm);
                self.builder().binop(BvOp::SDiv, &diff, &scale)
            }
        }
    }

    /// `expr` as a boolean: comparisons directly, anything else as `!= 0`.
    fn predicate(&mut self, expr: &Expr) -> B::Term {
        match expr {
            Expr::Compare { op, lhs, rhs, .. } => {
                let bits = lhs.bits().max(rhs.bits());
                let l = self.resized(lhs, bits);
                let r = self.resized(rhs, bits);

                let builder = self.builder();
                match op {
                    CompareOp::Eq => builder.rel(BvRel::Eq, &l, &r),
                    CompareOp::Neq => {
                        let eq = builder.rel(BvRel::Eq, &l, &r);
                        builder.bool_not(&eq)
                    }
                    CompareOp::Gt => builder.rel(BvRel::Ult, &r, &l),
                    CompareOp::Le => builder.rel(BvRel::Ule, &l, &r),
                    CompareOp::Lt => builder.rel(BvRel::Ult, &l, &r),
                    CompareOp::Ge => builder.rel(BvRel::Ule, &r, &l),
                    CompareOp::SGt => builder.rel(BvRel::Slt, &r, &l),
                    CompareOp::SLe => builder.rel(BvRel::Sle, &l, &r),
                    CompareOp::SLt => builder.rel(BvRel::Slt, &l, &r),
                    CompareOp::SGe => builder.rel(BvRel::Sle, &r, &l),
                }
            }
            Expr::UnOp {
                op: UnaryOp::LogicalNot,
                expr,
                ..
            } => {
                let cond = self.predicate(expr);
                self.builder().bool_not(&cond)
            }
            expr => {
                let bits = expr.bits();
                let term = self.term(expr);
                let zero = self.constant(0, bits);
                let eq = self.builder().rel(BvRel::Eq, &term, &zero);
                self.builder().bool_not(&eq)
            }
        }
    }
}

impl BitBlast for SymExpr {
    fn bit_blast<B: TermBuilder>(&self, ctxt: &mut SolverContext<B>) -> B::Term {
        ToTerm::new(ctxt).term(self)
    }
}

impl BitBlast for Constraint {
    fn bit_blast<B: TermBuilder>(&self, ctxt: &mut SolverContext<B>) -> B::Term {
        let mut to_term = ToTerm::new(ctxt);
        let cond = to_term.predicate(&self.expr);
        if self.taken {
            cond
        } else {
            to_term.builder().bool_not(&cond)
        }
    }
}

impl BitBlast for SymbolicPath {
    fn bit_blast<B: TermBuilder>(&self, ctxt: &mut SolverContext<B>) -> B::Term {
        let terms = self
            .constraints()
            .iter()
            .map(|constraint| constraint.bit_blast(ctxt))
            .collect::<Vec<_>>();
        ctxt.builder.bool_and(&terms)
    }
}

impl BitBlast for SymbolicMemory {
    /// Equates each bound cell with its expression.
    fn bit_blast<B: TermBuilder>(&self, ctxt: &mut SolverContext<B>) -> B::Term {
        let terms = self
            .iter()
            .map(|(address, expr)| bind_cell(ctxt, address, expr))
            .collect::<Vec<_>>();
        ctxt.builder.bool_and(&terms)
    }
}

fn bind_cell<B: TermBuilder>(ctxt: &mut SolverContext<B>, address: Addr, expr: &SymExpr) -> B::Term {
    let cell = ctxt.cell(address, expr.bits());
    let term = expr.bit_blast(ctxt);
    ctxt.builder.rel(BvRel::Eq, &cell, &term)
}

impl SymbolicMemory {
    /// The binding for the cell starting at `address`, if any.
    pub fn bit_blast_at<B: TermBuilder>(
        &self,
        ctxt: &mut SolverContext<B>,
        address: Addr,
    ) -> Option<B::Term> {
        self.get(address).map(|expr| bind_cell(ctxt, address, expr))
    }
}
