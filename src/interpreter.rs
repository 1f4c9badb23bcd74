use std::collections::BTreeMap;

use either::Either;
use log::{debug, trace, warn};
use smallvec::SmallVec;

use crate::execution::SymbolicExecution;
use crate::expr::SymExpr;
use crate::hooks::ClonableHookConcolic;
use crate::memory::SymbolicMemory;
use crate::pointer::{DefaultPointerStrategy, SymbolicPointerStrategy};
use crate::types::{
    Addr, BinaryOp, BranchId, CompareOp, Concrete, FunctionId, Id, Operator, PointerOp, Type,
    UnaryOp, Value, VarId, CALL_ID, RETURN_ID,
};

/// An evaluation stack slot: a concrete value, or an expression when the
/// value depends on symbolic input.
pub type Operand = Either<Concrete, SymExpr>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Scope {
    pub function: FunctionId,
    /// Instruction that entered the function.
    pub id: Id,
}

/// Mirrors the instrumented program's execution symbolically.
///
/// Each method corresponds to one instrumentation event and must be invoked
/// in program order. Protocol violations by the caller panic.
#[derive(Clone)]
pub struct SymbolicInterpreter<P: SymbolicPointerStrategy = DefaultPointerStrategy> {
    hooks: Vec<Box<dyn ClonableHookConcolic>>,
    stack: SmallVec<[Operand; 8]>,
    scopes: Vec<Scope>,
    globals: BTreeMap<Addr, usize>,
    ex: SymbolicExecution,
    num_inputs: usize,
    pre_symbolic: bool,
    return_value: bool,
    precision_losses: usize,
    pointer_strategy: P,
}

impl SymbolicInterpreter<DefaultPointerStrategy> {
    pub fn new(inputs: Vec<Value>) -> Self {
        Self::new_with(inputs, DefaultPointerStrategy)
    }
}

impl<P: SymbolicPointerStrategy> SymbolicInterpreter<P> {
    pub fn new_with(inputs: Vec<Value>, pointer_strategy: P) -> Self {
        Self {
            hooks: Vec::new(),
            stack: SmallVec::new(),
            scopes: Vec::new(),
            globals: BTreeMap::new(),
            ex: SymbolicExecution::new(inputs),
            num_inputs: 0,
            pre_symbolic: true,
            return_value: false,
            precision_losses: 0,
            pointer_strategy,
        }
    }

    pub fn add_hook<H>(&mut self, hook: H)
    where
        H: ClonableHookConcolic + 'static,
    {
        self.hooks.push(Box::new(hook));
    }

    pub fn stack(&self) -> &[Operand] {
        &self.stack
    }

    pub fn memory(&self) -> &SymbolicMemory {
        self.ex.memory()
    }

    pub fn execution(&self) -> &SymbolicExecution {
        &self.ex
    }

    pub fn into_execution(self) -> SymbolicExecution {
        self.ex
    }

    pub fn globals(&self) -> &BTreeMap<Addr, usize> {
        &self.globals
    }

    pub fn call_depth(&self) -> usize {
        self.scopes.len()
    }

    pub fn num_inputs(&self) -> usize {
        self.num_inputs
    }

    /// True until the first symbolic input is requested.
    pub fn is_pre_symbolic(&self) -> bool {
        self.pre_symbolic
    }

    /// Number of accesses made through symbolic pointers.
    pub fn precision_losses(&self) -> usize {
        self.precision_losses
    }

    fn pop(&mut self, id: Id) -> Operand {
        match self.stack.pop() {
            Some(operand) => operand,
            None => panic!("instruction {}: evaluation stack underflow", id),
        }
    }

    fn precision_loss(&mut self, id: Id, pointer: &SymExpr, address: Addr) {
        self.precision_losses += 1;
        debug!(
            "instruction {}: access through symbolic pointer {} (concrete address {:#x})",
            id, pointer, address
        );
        for hook in self.hooks.iter_mut() {
            hook.hook_precision_loss(id, pointer, address);
        }
    }

    /// Registers a global region; any stale bindings inside it are dropped.
    pub fn alloc(&mut self, id: Id, address: Addr, size: usize) {
        trace!("instruction {}: alloc {:#x}+{}", id, address, size);
        self.ex.memory_mut().concretize(address, size);
        self.globals.insert(address, size);
    }

    pub fn load(&mut self, id: Id, address: Addr, ty: Type, value: Value) {
        if self.pre_symbolic {
            return;
        }
        trace!("instruction {}: load {} at {:#x}", id, ty, address);

        if self.return_value {
            // the caller ignored the callee's result
            trace!("instruction {}: discarding unhandled return value", id);
            self.stack.clear();
            self.return_value = false;
        }

        let operand = self.ex.memory().read(address, ty, value);
        for hook in self.hooks.iter_mut() {
            hook.hook_memory_read(id, address, &operand);
        }
        self.stack.push(operand);
    }

    /// Loads through the pointer on top of the stack; `address` is its
    /// concrete value.
    pub fn deref(&mut self, id: Id, address: Addr, ty: Type, value: Value) {
        if self.pre_symbolic {
            return;
        }
        trace!("instruction {}: deref {} at {:#x}", id, ty, address);

        let operand = match self.pop(id) {
            Either::Left(_) => self.ex.memory().read(address, ty, value),
            Either::Right(pointer) => {
                self.precision_loss(id, &pointer, address);
                self.pointer_strategy.read_symbolic_memory(
                    self.ex.memory(),
                    pointer,
                    address,
                    ty,
                    value,
                )
            }
        };

        for hook in self.hooks.iter_mut() {
            hook.hook_memory_read(id, address, &operand);
        }
        self.stack.push(operand);
    }

    pub fn store(&mut self, id: Id, address: Addr) {
        if self.pre_symbolic {
            return;
        }
        trace!("instruction {}: store at {:#x}", id, address);

        let value = self.pop(id);

        for hook in self.hooks.iter_mut() {
            hook.hook_memory_write(id, address, &value);
        }
        self.ex.memory_mut().store(address, value);
    }

    /// Stores through a computed destination: the stack holds the
    /// destination pointer below the value.
    pub fn write(&mut self, id: Id, address: Addr) {
        if self.pre_symbolic {
            return;
        }
        trace!("instruction {}: write at {:#x}", id, address);

        let value = self.pop(id);
        let destination = self.pop(id);

        for hook in self.hooks.iter_mut() {
            hook.hook_memory_write(id, address, &value);
        }

        match destination {
            Either::Left(_) => self.ex.memory_mut().store(address, value),
            Either::Right(pointer) => {
                self.precision_loss(id, &pointer, address);
                self.pointer_strategy.write_symbolic_memory(
                    self.ex.memory_mut(),
                    pointer,
                    address,
                    value,
                )
            }
        }
    }

    pub fn clear_stack(&mut self, id: Id) {
        if self.pre_symbolic {
            return;
        }
        trace!("instruction {}: clear {} stack values", id, self.stack.len());
        self.stack.clear();
        self.return_value = false;
    }

    /// Dispatches an operator decoded from an instrumentation tag. Pointer
    /// operators take the element size from `ty`.
    pub fn apply(&mut self, id: Id, op: Operator, ty: Type, value: Value) {
        match op {
            Operator::Unary(op) => self.apply_unary_op(id, op, ty, value),
            Operator::Binary(op) => self.apply_binary_op(id, op, ty, value),
            Operator::Compare(op) => self.apply_compare_op(id, op, ty, value),
            Operator::Pointer(op) => self.apply_bin_ptr_op(id, op, ty.size(), value),
            Operator::Concrete => self.apply_concrete(id, ty, value),
        }
    }

    /// Entry point taking raw instrumentation tags; unknown tags panic.
    pub fn apply_tag(&mut self, id: Id, op: u32, ty: i32, value: Value) {
        let op = Operator::from_tag(op)
            .unwrap_or_else(|| panic!("instruction {}: unknown operator tag {}", id, op));
        if let Operator::Pointer(op) = op {
            panic!(
                "instruction {}: pointer operator {} takes an element size, not a type tag",
                id,
                op.name()
            );
        }
        let ty =
            Type::from_tag(ty).unwrap_or_else(|| panic!("instruction {}: unknown type tag {}", id, ty));
        self.apply(id, op, ty, value)
    }

    /// Pointer arithmetic from raw tags; `size` is the pointee's size in
    /// bytes as the program computed it.
    pub fn apply_ptr_tag(&mut self, id: Id, op: u32, size: usize, value: Value) {
        match Operator::from_tag(op) {
            Some(Operator::Pointer(op)) => self.apply_bin_ptr_op(id, op, size, value),
            _ => panic!("instruction {}: {} is not a pointer operator tag", id, op),
        }
    }

    pub fn apply_unary_op(&mut self, id: Id, op: UnaryOp, ty: Type, value: Value) {
        if self.pre_symbolic {
            return;
        }

        let result = match self.pop(id) {
            Either::Left(_) => Either::Left(Concrete::new(ty, value)),
            Either::Right(expr) => Either::Right(SymExpr::unop(op, expr, ty, value)),
        };
        self.stack.push(result);
    }

    pub fn apply_binary_op(&mut self, id: Id, op: BinaryOp, ty: Type, value: Value) {
        if self.pre_symbolic {
            return;
        }

        let rhs = self.pop(id);
        let lhs = self.pop(id);

        let result = match (lhs, rhs) {
            (Either::Left(_), Either::Left(_)) => Either::Left(Concrete::new(ty, value)),
            (Either::Left(lc), Either::Right(rexpr)) => {
                let lexpr = constant(lc, ty);
                Either::Right(SymExpr::binop(op, lexpr, rexpr, ty, value))
            }
            (Either::Right(lexpr), Either::Left(rc)) => {
                let rexpr = constant(rc, ty);
                Either::Right(SymExpr::binop(op, lexpr, rexpr, ty, value))
            }
            (Either::Right(lexpr), Either::Right(rexpr)) => {
                Either::Right(SymExpr::binop(op, lexpr, rexpr, ty, value))
            }
        };
        self.stack.push(result);
    }

    /// `ty` is the type of the comparison's 0/1 result.
    pub fn apply_compare_op(&mut self, id: Id, op: CompareOp, ty: Type, value: Value) {
        if self.pre_symbolic {
            return;
        }

        let rhs = self.pop(id);
        let lhs = self.pop(id);

        let result = match (lhs, rhs) {
            (Either::Left(_), Either::Left(_)) => Either::Left(Concrete::new(ty, value)),
            (Either::Left(lc), Either::Right(rexpr)) => {
                let lexpr = constant(lc, rexpr.ty());
                Either::Right(SymExpr::compare(op, lexpr, rexpr, ty, value))
            }
            (Either::Right(lexpr), Either::Left(rc)) => {
                let rexpr = constant(rc, lexpr.ty());
                Either::Right(SymExpr::compare(op, lexpr, rexpr, ty, value))
            }
            (Either::Right(lexpr), Either::Right(rexpr)) => {
                Either::Right(SymExpr::compare(op, lexpr, rexpr, ty, value))
            }
        };
        self.stack.push(result);
    }

    /// Pointer arithmetic; `size` is the pointee's element size.
    pub fn apply_bin_ptr_op(&mut self, id: Id, op: PointerOp, size: usize, value: Value) {
        if self.pre_symbolic {
            return;
        }

        let rhs = self.pop(id);
        let lhs = self.pop(id);

        let result = match (lhs, rhs) {
            (Either::Left(_), Either::Left(_)) => {
                Either::Left(Concrete::new(op.result_type(), value))
            }
            (Either::Left(lc), Either::Right(rexpr)) => {
                let lexpr = constant(lc, Type::POINTER);
                Either::Right(SymExpr::ptrop(op, lexpr, rexpr, size, value))
            }
            (Either::Right(lexpr), Either::Left(rc)) => {
                let rexpr = constant(rc, op.rhs_type());
                Either::Right(SymExpr::ptrop(op, lexpr, rexpr, size, value))
            }
            (Either::Right(lexpr), Either::Right(rexpr)) => {
                Either::Right(SymExpr::ptrop(op, lexpr, rexpr, size, value))
            }
        };
        self.stack.push(result);
    }

    /// An operation without a symbolic model: the result is concrete.
    pub fn apply_concrete(&mut self, id: Id, ty: Type, value: Value) {
        if self.pre_symbolic {
            return;
        }

        let rhs = self.pop(id);
        let lhs = self.pop(id);
        if lhs.is_right() || rhs.is_right() {
            trace!("instruction {}: symbolic operand concretized", id);
        }
        self.stack.push(Either::Left(Concrete::new(ty, value)));
    }

    pub fn branch(&mut self, id: Id, branch: BranchId, taken: bool) {
        if self.pre_symbolic {
            trace!("instruction {}: branch {} (pre-symbolic)", id, branch);
            self.ex.path_mut().push(branch);
            for hook in self.hooks.iter_mut() {
                hook.hook_branch(id, branch, taken, None);
            }
            return;
        }

        assert_eq!(
            self.stack.len(),
            1,
            "instruction {}: branch {} expects exactly one pending value",
            id,
            branch
        );

        match self.pop(id) {
            Either::Left(_) => {
                trace!("instruction {}: branch {} (concrete)", id, branch);
                self.ex.path_mut().push(branch);
                for hook in self.hooks.iter_mut() {
                    hook.hook_branch(id, branch, taken, None);
                }
            }
            Either::Right(expr) => {
                let predicate = expr.into_predicate();
                if (predicate.value() != 0) != taken {
                    warn!(
                        "instruction {}: branch {} taken={} but {} evaluates to {}",
                        id,
                        branch,
                        taken,
                        predicate,
                        predicate.value()
                    );
                }
                debug!("branch {}: {} (taken={})", branch, predicate, taken);

                self.ex.path_mut().push_constraint(branch, predicate, taken);
                let constraint = self.ex.path().constraints().last();
                for hook in self.hooks.iter_mut() {
                    hook.hook_branch(id, branch, taken, constraint);
                }
            }
        }
    }

    pub fn call(&mut self, id: Id, function: FunctionId) {
        trace!("instruction {}: call {}", id, function);

        self.ex.path_mut().push(CALL_ID);
        self.scopes.push(Scope { function, id });
        self.stack.clear();
        self.return_value = false;

        for hook in self.hooks.iter_mut() {
            hook.hook_call(id, function);
        }
    }

    /// Leaves the current function; a single pending stack value becomes
    /// the return value.
    pub fn ret(&mut self, id: Id) {
        let scope = match self.scopes.pop() {
            Some(scope) => scope,
            None => panic!("instruction {}: return without a matching call", id),
        };
        trace!("instruction {}: return from {}", id, scope.function);

        self.ex.path_mut().push(RETURN_ID);

        if !self.pre_symbolic {
            assert!(
                self.stack.len() <= 1,
                "instruction {}: {} values pending at return",
                id,
                self.stack.len()
            );
            self.return_value = self.stack.len() == 1;
        }

        for hook in self.hooks.iter_mut() {
            hook.hook_return(id, scope.function);
        }
    }

    /// Makes the result of a call available to the caller; if the callee was
    /// not instrumented the concrete `value` stands in for it.
    pub fn handle_return(&mut self, id: Id, ty: Type, value: Value) {
        if self.pre_symbolic {
            return;
        }

        if self.return_value {
            assert_eq!(
                self.stack.len(),
                1,
                "instruction {}: return value lost before it was handled",
                id
            );
            self.return_value = false;
        } else {
            trace!("instruction {}: concrete return value {}", id, value);
            self.stack.clear();
            self.stack.push(Either::Left(Concrete::new(ty, value)));
        }
    }

    /// Introduces the next symbolic input, bound to the variable at
    /// `address`, and returns its concrete value.
    pub fn new_input(&mut self, ty: Type, address: Addr) -> Value {
        assert!(!ty.is_struct(), "symbolic inputs must be scalars");

        self.pre_symbolic = false;

        let index = self.num_inputs;
        let value = match self.ex.inputs().get(index) {
            Some(value) => ty.normalize(*value),
            None => panic!(
                "symbolic input {} requested but only {} input values were supplied",
                index,
                self.ex.inputs().len()
            ),
        };
        let var = index as VarId;
        self.num_inputs += 1;

        self.ex.declare_var(var, ty);
        self.ex
            .memory_mut()
            .write(address, ty, SymExpr::var(var, ty, value));

        debug!("input x{}: {} = {} at {:#x}", var, ty, value, address);
        for hook in self.hooks.iter_mut() {
            hook.hook_new_input(var, ty, address, value);
        }

        value
    }
}

/// Lifts a concrete operand into a constant node of type `ty`.
fn constant(concrete: Concrete, ty: Type) -> SymExpr {
    if ty.is_struct() {
        SymExpr::val(concrete.ty, concrete.value)
    } else {
        SymExpr::val(ty, concrete.value)
    }
}
