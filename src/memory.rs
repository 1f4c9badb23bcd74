use std::collections::BTreeMap;
use std::fmt;

use either::Either;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::execution::{self, Error};
use crate::expr::{extract_bytes, Expr, Parts, SymExpr};
use crate::types::{Addr, Concrete, Type, UnaryOp, Value};

/// Symbolic shadow of the program's memory.
///
/// Maps start addresses to the expressions stored there; bindings never
/// overlap. Bytes without a binding hold their concrete value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SymbolicMemory {
    cells: BTreeMap<Addr, SymExpr>,
}

impl SymbolicMemory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    pub fn get(&self, address: Addr) -> Option<&SymExpr> {
        self.cells.get(&address)
    }

    pub fn iter(&self) -> impl Iterator<Item = (Addr, &SymExpr)> + '_ {
        self.cells.iter().map(|(address, expr)| (*address, expr))
    }

    /// Bindings intersecting `[address, address + length)`, highest first.
    fn overlapping(
        &self,
        address: Addr,
        length: usize,
    ) -> impl Iterator<Item = (Addr, &SymExpr)> + '_ {
        let end = address.saturating_add(length as u64);
        self.cells
            .range(..end)
            .rev()
            .take_while(move |(start, expr)| **start + expr.bytes() as u64 > address)
            .map(|(start, expr)| (*start, expr))
    }

    pub fn is_symbolic(&self, address: Addr, length: usize) -> bool {
        length > 0 && self.overlapping(address, length).next().is_some()
    }

    /// Reads a value of type `ty` at `address`; `value` is its concrete
    /// value (the size for a struct).
    pub fn read(&self, address: Addr, ty: Type, value: Value) -> Either<Concrete, SymExpr> {
        let concrete = Concrete::new(ty, value);
        let length = concrete.bytes();
        if length == 0 {
            return Either::Left(concrete);
        }

        let mut overlapping = self
            .overlapping(address, length)
            .collect::<SmallVec<[_; 4]>>();

        if overlapping.is_empty() {
            return Either::Left(concrete);
        }

        overlapping.reverse();

        let end = address + length as u64;
        let mut parts = overlapping
            .into_iter()
            .map(|(start, expr)| {
                let lo = start.max(address);
                let hi = (start + expr.bytes() as u64).min(end);
                let part = SymExpr::extract(expr.clone(), (lo - start) as u32, (hi - lo) as u32);
                ((lo - address) as u32, part)
            })
            .collect::<Parts>();

        // a struct's value is its size, so only scalar reads can be checked
        if !ty.is_struct() {
            parts.retain(|(offset, part)| {
                let bytes = part.bytes();
                let recorded = extract_bytes(part.value(), 0, bytes);
                let observed = extract_bytes(concrete.value, *offset, bytes);
                if recorded != observed {
                    log::debug!(
                        "stale binding at {:#x}: recorded {:#x}, observed {:#x}",
                        address + *offset as u64,
                        recorded,
                        observed
                    );
                }
                recorded == observed
            });

            if parts.is_empty() {
                return Either::Left(concrete);
            }

            if parts.len() == 1 && parts[0].0 == 0 && parts[0].1.bytes() as usize == length {
                if let Some((_, expr)) = parts.pop() {
                    return Either::Right(retype(expr, ty));
                }
            }
        }

        Either::Right(SymExpr::compose(ty, length as u32, parts, concrete.value))
    }

    /// Binds `expr` at `address`, replacing whatever the covered bytes held.
    pub fn write(&mut self, address: Addr, ty: Type, expr: SymExpr) {
        if ty.is_struct() {
            self.concretize(address, expr.bytes() as usize);
            match expr.into_inner() {
                Expr::Compose { parts, .. } => {
                    for (offset, part) in parts {
                        self.cells.insert(address + offset as u64, part);
                    }
                }
                expr => {
                    self.cells.insert(address, expr.into());
                }
            }
        } else {
            assert_eq!(
                expr.bytes() as usize,
                ty.size(),
                "cannot store {}-byte expression {} as {}",
                expr.bytes(),
                expr,
                ty
            );
            self.concretize(address, ty.size());
            self.cells.insert(address, expr);
        }
    }

    /// Stores an evaluation result: symbolic values are bound, concrete ones
    /// clear the destination bytes.
    pub fn store(&mut self, address: Addr, value: Either<Concrete, SymExpr>) {
        match value {
            Either::Left(concrete) => self.concretize(address, concrete.bytes()),
            Either::Right(expr) if expr.is_concrete() => {
                self.concretize(address, expr.bytes() as usize)
            }
            Either::Right(expr) => {
                let ty = expr.ty();
                self.write(address, ty, expr)
            }
        }
    }

    /// Makes `[address, address + length)` concrete. Bindings straddling the
    /// range keep the bytes outside it.
    pub fn concretize(&mut self, address: Addr, length: usize) {
        if length == 0 {
            return;
        }

        let end = address + length as u64;
        let overlapping = self
            .overlapping(address, length)
            .map(|(start, _)| start)
            .collect::<SmallVec<[Addr; 4]>>();

        for start in overlapping {
            let Some(expr) = self.cells.remove(&start) else {
                continue;
            };
            let stop = start + expr.bytes() as u64;

            if start < address && stop > end {
                let upper = SymExpr::extract(expr.clone(), (end - start) as u32, (stop - end) as u32);
                self.cells.insert(end, upper);
                let lower = SymExpr::extract(expr, 0, (address - start) as u32);
                self.cells.insert(start, lower);
            } else if start < address {
                let lower = SymExpr::extract(expr, 0, (address - start) as u32);
                self.cells.insert(start, lower);
            } else if stop > end {
                let upper = SymExpr::extract(expr, (end - start) as u32, (stop - end) as u32);
                self.cells.insert(end, upper);
            }
        }
    }

    pub fn serialize(&self) -> Result<Vec<u8>, Error> {
        execution::encode(self)
    }

    pub fn deserialize(bytes: &[u8]) -> Result<Self, Error> {
        execution::decode(bytes)
    }
}

/// Reinterprets an expression read back at a different type of the same
/// width.
fn retype(expr: SymExpr, ty: Type) -> SymExpr {
    if expr.ty() == ty {
        return expr;
    }
    let op = if ty.is_signed() {
        UnaryOp::SignedCast
    } else {
        UnaryOp::UnsignedCast
    };
    let value = op.apply(ty, expr.bits(), expr.value());
    SymExpr::unop(op, expr, ty, value)
}

impl fmt::Display for SymbolicMemory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (address, expr) in self.cells.iter() {
            writeln!(f, "{:#x}: {}", address, expr)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn input(var: u32, ty: Type, value: Value) -> SymExpr {
        SymExpr::var(var, ty, value)
    }

    fn bindings(memory: &SymbolicMemory) -> Vec<(Addr, u32)> {
        memory.iter().map(|(a, e)| (a, e.bytes())).collect()
    }

    #[test]
    fn test_read_unbound() {
        let memory = SymbolicMemory::new();
        assert_eq!(
            memory.read(0x1000, Type::Int, 5),
            Either::Left(Concrete::new(Type::Int, 5))
        );
    }

    #[test]
    fn test_write_read_exact() {
        let mut memory = SymbolicMemory::new();
        memory.write(0x1000, Type::Int, input(0, Type::Int, 7));

        let e = memory.read(0x1000, Type::Int, 7).right().unwrap();
        assert_eq!(e, input(0, Type::Int, 7));
        assert!(memory.is_symbolic(0x1003, 1));
        assert!(!memory.is_symbolic(0x1004, 4));
        assert!(!memory.is_symbolic(0xffc, 4));
    }

    #[test]
    fn test_read_retyped() {
        let mut memory = SymbolicMemory::new();
        memory.write(0x1000, Type::Int, input(0, Type::Int, -1));

        let e = memory.read(0x1000, Type::UInt, u32::MAX as Value).right().unwrap();
        assert_eq!(e.ty(), Type::UInt);
        assert_eq!(e.value(), u32::MAX as Value);
        assert!(e.is_consistent());
    }

    #[test]
    fn test_stale_binding() {
        let mut memory = SymbolicMemory::new();
        memory.write(0x1000, Type::Int, input(0, Type::Int, 7));
        assert!(memory.read(0x1000, Type::Int, 8).is_left());
    }

    #[test]
    fn test_stale_part() {
        let mut memory = SymbolicMemory::new();
        memory.write(0x1000, Type::UChar, input(0, Type::UChar, 5));
        memory.write(0x1001, Type::UChar, input(1, Type::UChar, 6));

        // low byte rewritten behind our back
        let e = memory.read(0x1000, Type::UShort, 0x0609).right().unwrap();
        assert_eq!(e.to_string(), "compose(u16, 1: x1)");
        assert_eq!(e.value(), 0x0609);
        assert!(e.is_consistent());

        assert!(memory.read(0x1000, Type::UShort, 9).is_left());
        assert!(memory.read(0x1000, Type::UShort, 0x0605).is_right());
    }

    #[test]
    fn test_read_partial() {
        let mut memory = SymbolicMemory::new();
        memory.write(0x1002, Type::UShort, input(0, Type::UShort, 0xbeef));

        let e = memory.read(0x1000, Type::UInt, 0xbeef_0000).right().unwrap();
        assert_eq!(e.bytes(), 4);
        assert!(e.is_consistent());
        assert_eq!(e.evaluate(&[0x1234]), 0x1234_0000);

        let b = memory.read(0x1003, Type::UChar, 0xbe).right().unwrap();
        assert_eq!(b.to_string(), "extract(x0, offset=1, bytes=1)");
        assert_eq!(b.value(), 0xbe);
    }

    #[test]
    fn test_concretize_splits() {
        let mut memory = SymbolicMemory::new();
        memory.write(0x1000, Type::ULong, input(0, Type::ULong, 0x0807060504030201));

        memory.concretize(0x1002, 3);
        assert_eq!(bindings(&memory), vec![(0x1000, 2), (0x1005, 3)]);
        assert_eq!(memory.get(0x1000).unwrap().value(), 0x0201);
        assert_eq!(memory.get(0x1005).unwrap().value(), 0x080706);

        memory.concretize(0x0fff, 2);
        assert_eq!(bindings(&memory), vec![(0x1001, 1), (0x1005, 3)]);
        assert_eq!(memory.get(0x1001).unwrap().value(), 0x02);

        memory.concretize(0x1000, 0x100);
        assert!(memory.is_empty());
    }

    #[test]
    fn test_overwrite() {
        let mut memory = SymbolicMemory::new();
        memory.write(0x1000, Type::UInt, input(0, Type::UInt, 1));
        memory.write(0x1002, Type::UInt, input(1, Type::UInt, 2));

        assert_eq!(bindings(&memory), vec![(0x1000, 2), (0x1002, 4)]);
        memory.store(0x1000, Either::Left(Concrete::new(Type::ULong, 0)));
        assert!(memory.is_empty());
    }

    #[test]
    fn test_struct_copy() {
        let mut memory = SymbolicMemory::new();
        memory.write(0x1000, Type::Int, input(0, Type::Int, 1));
        memory.write(0x1008, Type::Char, input(1, Type::Char, 2));

        let record = memory.read(0x1000, Type::Struct, 16).right().unwrap();
        assert_eq!(record.bytes(), 16);

        memory.write(0x2000, Type::Struct, record);
        assert_eq!(
            bindings(&memory),
            vec![(0x1000, 4), (0x1008, 1), (0x2000, 4), (0x2008, 1)]
        );
        assert_eq!(memory.get(0x2008), memory.get(0x1008));
    }

    #[test]
    fn test_serialize() {
        let mut memory = SymbolicMemory::new();
        memory.write(0x1000, Type::Int, input(0, Type::Int, 1));
        memory.write(0x1008, Type::Char, input(1, Type::Char, 2));

        let bytes = memory.serialize().unwrap();
        assert_eq!(SymbolicMemory::deserialize(&bytes).unwrap(), memory);
        assert_eq!(memory.to_string(), "0x1000: x0\n0x1008: x1\n");
    }
}
