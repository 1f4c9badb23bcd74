use either::Either;

use crate::expr::SymExpr;
use crate::memory::SymbolicMemory;
use crate::types::{Addr, Concrete, Type, Value};

/// Decides what an access through a symbolic pointer produces.
///
/// `address` is the pointer's concrete value on the current run.
pub trait SymbolicPointerStrategy: Clone {
    fn read_symbolic_memory(
        &mut self,
        memory: &SymbolicMemory,
        pointer: SymExpr,
        address: Addr,
        ty: Type,
        value: Value,
    ) -> Either<Concrete, SymExpr>;

    fn write_symbolic_memory(
        &mut self,
        memory: &mut SymbolicMemory,
        pointer: SymExpr,
        address: Addr,
        value: Either<Concrete, SymExpr>,
    );
}

/// Loads through a symbolic pointer yield the concrete value; stores go to
/// the concrete address.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultPointerStrategy;

impl SymbolicPointerStrategy for DefaultPointerStrategy {
    fn read_symbolic_memory(
        &mut self,
        _memory: &SymbolicMemory,
        _pointer: SymExpr,
        _address: Addr,
        ty: Type,
        value: Value,
    ) -> Either<Concrete, SymExpr> {
        Either::Left(Concrete::new(ty, value))
    }

    fn write_symbolic_memory(
        &mut self,
        memory: &mut SymbolicMemory,
        _pointer: SymExpr,
        address: Addr,
        value: Either<Concrete, SymExpr>,
    ) {
        memory.store(address, value)
    }
}

/// Treats a symbolic pointer as its concrete address for loads too, so the
/// pointee's symbolic contents survive.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConcreteAddressStrategy;

impl SymbolicPointerStrategy for ConcreteAddressStrategy {
    fn read_symbolic_memory(
        &mut self,
        memory: &SymbolicMemory,
        _pointer: SymExpr,
        address: Addr,
        ty: Type,
        value: Value,
    ) -> Either<Concrete, SymExpr> {
        memory.read(address, ty, value)
    }

    fn write_symbolic_memory(
        &mut self,
        memory: &mut SymbolicMemory,
        _pointer: SymExpr,
        address: Addr,
        value: Either<Concrete, SymExpr>,
    ) {
        memory.store(address, value)
    }
}
