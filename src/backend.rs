/// Bit-vector operators a term builder must provide.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BvOp {
    Add,
    Sub,
    Mul,
    UDiv,
    SDiv,
    URem,
    SRem,
    Shl,
    LShr,
    AShr,
    And,
    Or,
    Xor,
}

/// Bit-vector relations; the remaining comparisons are derived from these
/// by swapping operands or negating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BvRel {
    Eq,
    Ult,
    Ule,
    Slt,
    Sle,
}

/// Construction of solver terms.
///
/// Bit-vector terms and boolean terms share `Term`; the bit-blaster never
/// mixes them. Widths are in bits.
pub trait TermBuilder {
    type Term: Clone;

    fn declare(&mut self, name: &str, bits: u32) -> Self::Term;
    fn constant(&mut self, value: u64, bits: u32) -> Self::Term;

    fn neg(&mut self, term: &Self::Term) -> Self::Term;
    fn not(&mut self, term: &Self::Term) -> Self::Term;
    fn binop(&mut self, op: BvOp, lhs: &Self::Term, rhs: &Self::Term) -> Self::Term;

    fn rel(&mut self, op: BvRel, lhs: &Self::Term, rhs: &Self::Term) -> Self::Term;
    fn bool_not(&mut self, term: &Self::Term) -> Self::Term;
    fn bool_and(&mut self, terms: &[Self::Term]) -> Self::Term;
    fn ite(&mut self, cond: &Self::Term, then: &Self::Term, otherwise: &Self::Term) -> Self::Term;

    /// Widens `term` by `bits` additional bits.
    fn zero_extend(&mut self, term: &Self::Term, bits: u32) -> Self::Term;
    fn sign_extend(&mut self, term: &Self::Term, bits: u32) -> Self::Term;
    /// Bits `high` down to `low` inclusive.
    fn extract(&mut self, term: &Self::Term, high: u32, low: u32) -> Self::Term;
    fn concat(&mut self, high: &Self::Term, low: &Self::Term) -> Self::Term;
}
