pub mod backend;
pub mod blast;
pub mod execution;
pub mod expr;
pub mod hooks;
pub mod interpreter;
pub mod memory;
pub mod pointer;
pub mod runtime;
pub mod solver;
pub mod types;
