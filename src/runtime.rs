use std::env;
use std::fs;
use std::io::{self, Write};
use std::num::ParseIntError;
use std::path::{Path, PathBuf};

use log::{info, warn};
use thiserror::Error;

use crate::execution::{self, SymbolicExecution};
use crate::interpreter::SymbolicInterpreter;
use crate::pointer::{DefaultPointerStrategy, SymbolicPointerStrategy};
use crate::types::Value;

pub const DEFAULT_INPUT: &str = "input";
pub const DEFAULT_OUTPUT: &str = "szd_execution";

#[derive(Debug, Error)]
pub enum Error {
    #[error("cannot read inputs from `{path}`: {source}")]
    Input {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("malformed input value `{token}` at position {position}")]
    Parse {
        token: String,
        position: usize,
        #[source]
        source: ParseIntError,
    },
    #[error(transparent)]
    Execution(#[from] execution::Error),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Whitespace separated input values, one per symbolic input.
    pub input: PathBuf,
    /// Where the execution record is written at teardown.
    pub output: PathBuf,
    /// Print the path condition when the run finishes.
    pub print_constraints: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            input: PathBuf::from(DEFAULT_INPUT),
            output: PathBuf::from(DEFAULT_OUTPUT),
            print_constraints: true,
        }
    }
}

impl Config {
    /// Defaults overridden by `CONCOLIC_INPUT`, `CONCOLIC_OUTPUT` and
    /// `CONCOLIC_QUIET`.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(input) = env::var_os("CONCOLIC_INPUT") {
            config.input = input.into();
        }
        if let Some(output) = env::var_os("CONCOLIC_OUTPUT") {
            config.output = output.into();
        }
        if env::var_os("CONCOLIC_QUIET").is_some() {
            config.print_constraints = false;
        }
        config
    }
}

pub fn parse_inputs(text: &str) -> Result<Vec<Value>, Error> {
    text.split_whitespace()
        .enumerate()
        .map(|(position, token)| {
            token
                .parse::<Value>()
                .or_else(|e| token.parse::<u64>().map(|v| v as Value).map_err(|_| e))
                .map_err(|source| Error::Parse {
                    token: token.to_owned(),
                    position,
                    source,
                })
        })
        .collect()
}

/// Reads the input vector; a missing file is an empty vector.
pub fn read_inputs(path: impl AsRef<Path>) -> Result<Vec<Value>, Error> {
    let path = path.as_ref();
    match fs::read_to_string(path) {
        Ok(text) => parse_inputs(&text),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            warn!("no input file at `{}`; starting without inputs", path.display());
            Ok(Vec::new())
        }
        Err(source) => Err(Error::Input {
            path: path.to_owned(),
            source,
        }),
    }
}

/// Owns the interpreter for one run of an instrumented program.
pub struct Runtime<P: SymbolicPointerStrategy = DefaultPointerStrategy> {
    config: Config,
    interpreter: SymbolicInterpreter<P>,
}

impl Runtime<DefaultPointerStrategy> {
    pub fn start(config: Config) -> Result<Self, Error> {
        Self::start_with(config, DefaultPointerStrategy)
    }
}

impl<P: SymbolicPointerStrategy> Runtime<P> {
    pub fn start_with(config: Config, pointer_strategy: P) -> Result<Self, Error> {
        let inputs = read_inputs(&config.input)?;
        info!(
            "starting run with {} input values from `{}`",
            inputs.len(),
            config.input.display()
        );

        Ok(Self {
            interpreter: SymbolicInterpreter::new_with(inputs, pointer_strategy),
            config,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn interpreter(&self) -> &SymbolicInterpreter<P> {
        &self.interpreter
    }

    pub fn interpreter_mut(&mut self) -> &mut SymbolicInterpreter<P> {
        &mut self.interpreter
    }

    /// Reports the path condition and writes the execution record.
    pub fn finish(self) -> Result<SymbolicExecution, Error> {
        let ex = self.interpreter.into_execution();

        if self.config.print_constraints {
            report(&ex, &mut io::stderr().lock(), &mut io::stdout().lock());
        }

        ex.write_to(&self.config.output)?;
        info!(
            "wrote {} constraints to `{}`",
            ex.path().constraints().len(),
            self.config.output.display()
        );

        Ok(ex)
    }
}

/// Constraint count to `summary`, one constraint per line to `out`.
pub fn report<S: Write, O: Write>(ex: &SymbolicExecution, summary: &mut S, out: &mut O) {
    let constraints = ex.path().constraints();
    let _ = writeln!(summary, "{}", constraints.len());
    for constraint in constraints {
        let _ = writeln!(out, "{}", constraint);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_inputs() {
        assert_eq!(parse_inputs("1 -2\n3\t\n").unwrap(), vec![1, -2, 3]);
        assert_eq!(parse_inputs("").unwrap(), Vec::<Value>::new());
        assert_eq!(
            parse_inputs("18446744073709551615").unwrap(),
            vec![-1]
        );

        match parse_inputs("4 five") {
            Err(Error::Parse {
                token, position, ..
            }) => {
                assert_eq!(token, "five");
                assert_eq!(position, 1);
            }
            r => panic!("unexpected result {:?}", r),
        }
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.input, PathBuf::from("input"));
        assert_eq!(config.output, PathBuf::from("szd_execution"));
        assert!(config.print_constraints);
    }
}
