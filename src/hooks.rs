use either::Either;

use dyn_clone::{clone_trait_object, DynClone};

use crate::execution::Constraint;
use crate::expr::SymExpr;
use crate::types::{Addr, BranchId, Concrete, FunctionId, Id, Type, Value, VarId};

/// Observer of interpreter events. Every method defaults to doing nothing.
#[allow(unused)]
pub trait HookConcolic {
    fn hook_new_input(&mut self, var: VarId, ty: Type, address: Addr, value: Value) {}

    fn hook_memory_read(&mut self, id: Id, address: Addr, value: &Either<Concrete, SymExpr>) {}

    fn hook_memory_write(&mut self, id: Id, address: Addr, value: &Either<Concrete, SymExpr>) {}

    /// `constraint` is set for branches on symbolic conditions.
    fn hook_branch(
        &mut self,
        id: Id,
        branch: BranchId,
        taken: bool,
        constraint: Option<&Constraint>,
    ) {
    }

    fn hook_call(&mut self, id: Id, function: FunctionId) {}

    fn hook_return(&mut self, id: Id, function: FunctionId) {}

    /// A symbolic pointer was dereferenced or written through.
    fn hook_precision_loss(&mut self, id: Id, pointer: &SymExpr, address: Addr) {}
}

pub trait ClonableHookConcolic: DynClone + HookConcolic {}
clone_trait_object!(ClonableHookConcolic);

impl<T> ClonableHookConcolic for T where T: DynClone + HookConcolic {}
