use std::fmt::Write;

use crate::backend::{BvOp, BvRel, TermBuilder};

/// Builds SMT-LIB 2 (QF_BV) terms as text.
#[derive(Debug, Clone, Default)]
pub struct SmtLib {
    declarations: Vec<String>,
}

impl SmtLib {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn declarations(&self) -> &[String] {
        &self.declarations
    }

    /// A complete script asserting each of `assertions`.
    pub fn script<'a, I>(&self, assertions: I) -> String
    where
        I: IntoIterator<Item = &'a String>,
    {
        let mut script = String::from("(set-logic QF_BV)\n");
        for declaration in self.declarations.iter() {
            script.push_str(declaration);
            script.push('\n');
        }
        for assertion in assertions {
            let _ = writeln!(script, "(assert {})", assertion);
        }
        script.push_str("(check-sat)\n");
        script
    }
}

impl TermBuilder for SmtLib {
    type Term = String;

    fn declare(&mut self, name: &str, bits: u32) -> String {
        self.declarations
            .push(format!("(declare-const {} (_ BitVec {}))", name, bits));
        name.to_owned()
    }

    fn constant(&mut self, value: u64, bits: u32) -> String {
        let value = if bits >= 64 {
            value
        } else {
            value & ((1u64 << bits) - 1)
        };
        format!("(_ bv{} {})", value, bits)
    }

    fn neg(&mut self, term: &String) -> String {
        format!("(bvneg {})", term)
    }

    fn not(&mut self, term: &String) -> String {
        format!("(bvnot {})", term)
    }

    fn binop(&mut self, op: BvOp, lhs: &String, rhs: &String) -> String {
        let op = match op {
            BvOp::Add => "bvadd",
            BvOp::Sub => "bvsub",
            BvOp::Mul => "bvmul",
            BvOp::UDiv => "bvudiv",
            BvOp::SDiv => "bvsdiv",
            BvOp::URem => "bvurem",
            BvOp::SRem => "bvsrem",
            BvOp::Shl => "bvshl",
            BvOp::LShr => "bvlshr",
            BvOp::AShr => "bvashr",
            BvOp::And => "bvand",
            BvOp::Or => "bvor",
            BvOp::Xor => "bvxor",
        };
        format!("({} {} {})", op, lhs, rhs)
    }

    fn rel(&mut self, op: BvRel, lhs: &String, rhs: &String) -> String {
        let op = match op {
            BvRel::Eq => "=",
            BvRel::Ult => "bvult",
            BvRel::Ule => "bvule",
            BvRel::Slt => "bvslt",
            BvRel::Sle => "bvsle",
        };
        format!("({} {} {})", op, lhs, rhs)
    }

    fn bool_not(&mut self, term: &String) -> String {
        format!("(not {})", term)
    }

    fn bool_and(&mut self, terms: &[String]) -> String {
        match terms {
            [] => "true".to_owned(),
            [term] => term.clone(),
            terms => format!("(and {})", terms.join(" ")),
        }
    }

    fn ite(&mut self, cond: &String, then: &String, otherwise: &String) -> String {
        format!("(ite {} {} {})", cond, then, otherwise)
    }

    fn zero_extend(&mut self, term: &String, bits: u32) -> String {
        format!("((_ zero_extend {}) {})", bits, term)
    }

    fn sign_extend(&mut self, term: &String, bits: u32) -> String {
        format!("((_ sign_extend {}) {})", bits, term)
    }

    fn extract(&mut self, term: &String, high: u32, low: u32) -> String {
        format!("((_ extract {} {}) {})", high, low, term)
    }

    fn concat(&mut self, high: &String, low: &String) -> String {
        format!("(concat {} {})", high, low)
    }
}
