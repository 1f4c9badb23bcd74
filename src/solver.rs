use fxhash::FxHashMap as HashMap;

use crate::backend::TermBuilder;
use crate::types::{Addr, VarId};

pub mod smtlib;

/// Term builder plus the constants declared so far, so that every symbolic
/// input and memory cell maps to exactly one solver constant.
#[derive(Clone)]
pub struct SolverContext<B: TermBuilder> {
    pub(crate) builder: B,
    pub(crate) vars: HashMap<VarId, B::Term>,
    pub(crate) cells: HashMap<Addr, B::Term>,
}

impl<B: TermBuilder + Default> Default for SolverContext<B> {
    fn default() -> Self {
        Self::new(B::default())
    }
}

impl<B: TermBuilder> SolverContext<B> {
    pub fn new(builder: B) -> Self {
        Self {
            builder,
            vars: HashMap::default(),
            cells: HashMap::default(),
        }
    }

    pub fn var(&mut self, var: VarId, bits: u32) -> B::Term {
        if let Some(term) = self.vars.get(&var).cloned() {
            term
        } else {
            let term = self.builder.declare(&format!("x{}", var), bits);
            self.vars.insert(var, term.clone());
            term
        }
    }

    /// The constant standing for the contents of the memory cell at
    /// `address`.
    pub fn cell(&mut self, address: Addr, bits: u32) -> B::Term {
        if let Some(term) = self.cells.get(&address).cloned() {
            term
        } else {
            let term = self.builder.declare(&format!("m{:x}", address), bits);
            self.cells.insert(address, term.clone());
            term
        }
    }

    pub fn builder(&self) -> &B {
        &self.builder
    }

    pub fn builder_mut(&mut self) -> &mut B {
        &mut self.builder
    }

    pub fn into_builder(self) -> B {
        self.builder
    }

    pub fn declared_vars(&self) -> usize {
        self.vars.len()
    }
}
