use std::env;
use std::error::Error;
use std::process;

use getopts::Options;
use itertools::Itertools;
use log::{error, info};

use concolic_runtime::blast::BitBlast;
use concolic_runtime::execution::{Constraint, SymbolicExecution};
use concolic_runtime::runtime::DEFAULT_OUTPUT;
use concolic_runtime::solver::smtlib::SmtLib;
use concolic_runtime::solver::SolverContext;
use concolic_runtime::types::BranchId;

fn print_usage(program: &str, opts: &Options) {
    let brief = format!("Usage: {} [options] [EXECUTION]", program);
    print!("{}", opts.usage(&brief));
}

/// The branch a constraint refers to; `?` if the record is inconsistent.
fn branch_label(branches: &[BranchId], constraint: &Constraint) -> String {
    match branches.get(constraint.branch) {
        Some(branch) => branch.to_string(),
        None => "?".to_owned(),
    }
}

fn dump(ex: &SymbolicExecution, show_memory: bool) {
    println!("inputs: [{}]", ex.inputs().iter().join(", "));
    println!(
        "vars: [{}]",
        ex.vars()
            .iter()
            .map(|(var, ty)| format!("x{}: {}", var, ty))
            .join(", ")
    );
    println!("branches: {}", ex.path().branches().len());
    println!("constraints: {}", ex.path().constraints().len());
    for (i, constraint) in ex.path().constraints().iter().enumerate() {
        println!(
            "  #{} (branch {}): {}",
            i,
            branch_label(ex.path().branches(), constraint),
            constraint
        );
    }
    if show_memory {
        println!("memory: {} bindings", ex.memory().len());
        print!("{}", ex.memory());
    }
}

fn smt_script(ex: &SymbolicExecution) -> String {
    let mut ctxt = SolverContext::new(SmtLib::new());
    let assertions = ex
        .path()
        .constraints()
        .iter()
        .map(|constraint| constraint.bit_blast(&mut ctxt))
        .collect::<Vec<_>>();
    ctxt.builder().script(&assertions)
}

fn run() -> Result<(), Box<dyn Error>> {
    let args: Vec<String> = env::args().collect();
    let program = args[0].clone();

    let mut opts = Options::new();
    opts.optflag("s", "smt", "print the path condition as an SMT-LIB script");
    opts.optflag("m", "memory", "print the final symbolic memory");
    opts.optflag("h", "help", "print this help menu");

    let matches = opts.parse(&args[1..])?;
    if matches.opt_present("h") {
        print_usage(&program, &opts);
        return Ok(());
    }

    let path = matches
        .free
        .first()
        .cloned()
        .unwrap_or_else(|| DEFAULT_OUTPUT.to_owned());

    info!("reading execution record from `{}`", path);
    let ex = SymbolicExecution::read_from(&path)?;

    if matches.opt_present("s") {
        print!("{}", smt_script(&ex));
    } else {
        dump(&ex, matches.opt_present("m"));
    }
    Ok(())
}

fn main() {
    env_logger::init();

    if let Err(e) = run() {
        error!("{}", e);
        eprintln!("error: {}", e);
        process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use concolic_runtime::expr::SymExpr;
    use concolic_runtime::types::Type;

    #[test]
    fn test_branch_label() {
        let constraint = Constraint {
            branch: 1,
            expr: SymExpr::var(0, Type::Int, 1),
            taken: true,
        };
        assert_eq!(branch_label(&[4, 9], &constraint), "9");
        assert_eq!(branch_label(&[4], &constraint), "?");
    }
}
