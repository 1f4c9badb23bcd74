use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use bincode::{DefaultOptions, Options};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::expr::SymExpr;
use crate::memory::SymbolicMemory;
use crate::types::{BranchId, Type, Value, VarId};

#[derive(Debug, Error)]
pub enum Error {
    #[error("malformed execution record: {0}")]
    Codec(#[from] bincode::Error),
    #[error("cannot access `{path}`: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

fn serialization_options() -> DefaultOptions {
    DefaultOptions::new()
}

pub(crate) fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, Error> {
    Ok(serialization_options().serialize(value)?)
}

pub(crate) fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, Error> {
    Ok(serialization_options().deserialize(bytes)?)
}

/// A symbolic branch condition and the direction the run took.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Constraint {
    /// Index of the branch in the path's branch sequence.
    pub branch: usize,
    pub expr: SymExpr,
    pub taken: bool,
}

impl Constraint {
    /// True if the recorded direction agrees with the expression's value.
    pub fn holds(&self) -> bool {
        (self.expr.value() != 0) == self.taken
    }
}

impl fmt::Display for Constraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.taken {
            write!(f, "{}", self.expr)
        } else {
            write!(f, "!({})", self.expr)
        }
    }
}

/// The branches of one run in order, and the constraints of the symbolic
/// ones.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SymbolicPath {
    branches: Vec<BranchId>,
    constraints: Vec<Constraint>,
}

impl SymbolicPath {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, branch: BranchId) {
        self.branches.push(branch);
    }

    pub fn push_constraint(&mut self, branch: BranchId, expr: SymExpr, taken: bool) {
        self.constraints.push(Constraint {
            branch: self.branches.len(),
            expr,
            taken,
        });
        self.branches.push(branch);
    }

    pub fn branches(&self) -> &[BranchId] {
        &self.branches
    }

    pub fn constraints(&self) -> &[Constraint] {
        &self.constraints
    }
}

/// Everything recorded about one run of the instrumented program.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SymbolicExecution {
    inputs: Vec<Value>,
    vars: BTreeMap<VarId, Type>,
    path: SymbolicPath,
    memory: SymbolicMemory,
}

impl SymbolicExecution {
    pub fn new(inputs: Vec<Value>) -> Self {
        Self {
            inputs,
            ..Default::default()
        }
    }

    pub fn inputs(&self) -> &[Value] {
        &self.inputs
    }

    pub fn vars(&self) -> &BTreeMap<VarId, Type> {
        &self.vars
    }

    pub fn path(&self) -> &SymbolicPath {
        &self.path
    }

    pub fn memory(&self) -> &SymbolicMemory {
        &self.memory
    }

    pub(crate) fn declare_var(&mut self, var: VarId, ty: Type) {
        self.vars.insert(var, ty);
    }

    pub(crate) fn path_mut(&mut self) -> &mut SymbolicPath {
        &mut self.path
    }

    pub(crate) fn memory_mut(&mut self) -> &mut SymbolicMemory {
        &mut self.memory
    }

    /// The input values consumed by the run; unconsumed trailing inputs
    /// are dropped.
    pub fn consumed_inputs(&self) -> &[Value] {
        &self.inputs[..self.vars.len().min(self.inputs.len())]
    }

    pub fn serialize(&self) -> Result<Vec<u8>, Error> {
        encode(self)
    }

    pub fn deserialize(bytes: &[u8]) -> Result<Self, Error> {
        decode(bytes)
    }

    pub fn write_to(&self, path: impl AsRef<Path>) -> Result<(), Error> {
        let path = path.as_ref();
        let bytes = self.serialize()?;
        fs::write(path, bytes).map_err(|source| Error::Io {
            path: path.to_owned(),
            source,
        })
    }

    pub fn read_from(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = path.as_ref();
        let bytes = fs::read(path).map_err(|source| Error::Io {
            path: path.to_owned(),
            source,
        })?;
        Self::deserialize(&bytes)
    }
}
