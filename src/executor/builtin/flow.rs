//! Builtins that transfer control or run other code.

use std::fs;
use std::mem;
use std::path::PathBuf;

use tracing::debug;

use crate::environment::Environment;
use crate::executor::builtin::manager::BuiltinCommand;
use crate::executor::builtin::{fail, status};
use crate::executor::process;
use crate::executor::{os_message, report, ExecError, ExecOutcome, ExecStatus, Executor};
use crate::parser::{parse_source, ParseError};
use crate::signals;

pub enum LoopControl {
    Break,
    Continue,
}

impl BuiltinCommand for LoopControl {
    fn name(&self) -> &'static str {
        match self {
            LoopControl::Break => "break",
            LoopControl::Continue => "continue",
        }
    }
    fn special(&self) -> bool {
        true
    }
    fn run(&self, args: &[String], env: &mut Environment, _exec: &mut dyn Executor) -> ExecStatus {
        let n = match args.first() {
            None => 1,
            Some(arg) => match arg.parse::<usize>() {
                Ok(n) if n >= 1 => n,
                _ => return fail(self.name(), format_args!("{arg}: loop count out of range"), 1),
            },
        };
        if env.loop_depth == 0 {
            return Err(ExecError::LoopControl(self.name()));
        }
        let n = n.min(env.loop_depth);
        Ok(match self {
            LoopControl::Break => ExecOutcome::Break(n),
            LoopControl::Continue => ExecOutcome::Continue(n),
        })
    }
}

pub struct ReturnCommand;

impl BuiltinCommand for ReturnCommand {
    fn name(&self) -> &'static str {
        "return"
    }
    fn special(&self) -> bool {
        true
    }
    fn run(&self, args: &[String], env: &mut Environment, _exec: &mut dyn Executor) -> ExecStatus {
        if env.function_depth == 0 && env.source_depth == 0 {
            return Err(ExecError::ReturnOutsideFunction);
        }
        let code = match args.first() {
            None => env.last_status,
            Some(arg) => match arg.trim().parse::<i64>() {
                Ok(n) => (n & 0xff) as i32,
                Err(_) => {
                    report(format_args!("return: {arg}: numeric argument required"));
                    2
                }
            },
        };
        Ok(ExecOutcome::Return(code))
    }
}

/// Parses and runs `source` in the current shell.
fn run_here(source: &str, env: &mut Environment, exec: &mut dyn Executor) -> ExecStatus {
    match parse_source(source) {
        Ok(ast) => exec.exec(&ast, env),
        Err(ParseError::EmptyInput) => status(0),
        Err(e) => {
            report(&e);
            status(2)
        }
    }
}

pub struct EvalCommand;

impl BuiltinCommand for EvalCommand {
    fn name(&self) -> &'static str {
        "eval"
    }
    fn special(&self) -> bool {
        true
    }
    fn run(&self, args: &[String], env: &mut Environment, exec: &mut dyn Executor) -> ExecStatus {
        run_here(&args.join(" "), env, exec)
    }
}

pub struct SourceCommand {
    pub name: &'static str,
}

impl SourceCommand {
    /// A name without `/` is looked up on `PATH`, then in the current directory.
    fn locate(file: &str, env: &Environment) -> PathBuf {
        if !file.contains('/') {
            let found = env
                .get("PATH")
                .unwrap_or("")
                .split(':')
                .filter(|d| !d.is_empty())
                .map(|d| PathBuf::from(d).join(file))
                .find(|p| p.is_file());
            if let Some(path) = found {
                return path;
            }
        }
        PathBuf::from(file)
    }
}

impl BuiltinCommand for SourceCommand {
    fn name(&self) -> &'static str {
        self.name
    }
    fn special(&self) -> bool {
        true
    }
    fn run(&self, args: &[String], env: &mut Environment, exec: &mut dyn Executor) -> ExecStatus {
        let Some(file) = args.first() else {
            return fail(self.name, "filename argument required", 2);
        };
        let path = Self::locate(file, env);
        let source = match fs::read_to_string(&path) {
            Ok(source) => source,
            Err(e) => return fail(self.name, format_args!("{file}: {}", os_message(&e)), 1),
        };
        debug!(file = %path.display(), "sourcing");
        let saved = (args.len() > 1).then(|| mem::replace(&mut env.positional, args[1..].to_vec()));
        env.source_depth += 1;
        let result = run_here(&source, env, exec);
        env.source_depth -= 1;
        if let Some(positional) = saved {
            env.positional = positional;
        }
        Ok(match result? {
            ExecOutcome::Return(code) => ExecOutcome::Code(code),
            other => other,
        })
    }
}

pub struct ExecCommand;

impl BuiltinCommand for ExecCommand {
    fn name(&self) -> &'static str {
        "exec"
    }
    fn special(&self) -> bool {
        true
    }
    fn run(&self, args: &[String], env: &mut Environment, exec: &mut dyn Executor) -> ExecStatus {
        if args.is_empty() {
            return status(0);
        }
        signals::reset_for_child();
        let code = process::exec_or_script(exec, args, &[], env);
        Ok(ExecOutcome::Exit(code))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::tests::MockExecutor;
    use pretty_assertions::assert_eq;

    fn run(cmd: &dyn BuiltinCommand, args: &[&str], env: &mut Environment) -> ExecStatus {
        let args: Vec<String> = args.iter().map(|s| s.to_string()).collect();
        cmd.run(&args, env, &mut MockExecutor::new())
    }

    #[test]
    fn test_break_outside_loop_is_an_error() {
        let mut env = Environment::empty();
        assert!(matches!(run(&LoopControl::Break, &[], &mut env), Err(ExecError::LoopControl("break"))));
    }

    #[test]
    fn test_break_count_is_clamped() {
        let mut env = Environment::empty();
        env.loop_depth = 2;
        assert_eq!(run(&LoopControl::Break, &["5"], &mut env).unwrap(), ExecOutcome::Break(2));
        assert_eq!(run(&LoopControl::Continue, &[], &mut env).unwrap(), ExecOutcome::Continue(1));
        assert_eq!(run(&LoopControl::Break, &["0"], &mut env).unwrap(), ExecOutcome::Code(1));
    }

    #[test]
    fn test_return_requires_function() {
        let mut env = Environment::empty();
        assert!(matches!(run(&ReturnCommand, &["1"], &mut env), Err(ExecError::ReturnOutsideFunction)));
        env.function_depth = 1;
        assert_eq!(run(&ReturnCommand, &["300"], &mut env).unwrap(), ExecOutcome::Return(44));
    }

    #[test]
    fn test_eval_runs_through_executor() {
        let mut env = Environment::empty();
        let mut exec = MockExecutor::new();
        let args = vec!["echo".to_string(), "hi".to_string()];
        EvalCommand.run(&args, &mut env, &mut exec).unwrap();
        assert_eq!(exec.log, vec!["echo hi"]);
    }

    #[test]
    fn test_source_missing_file() {
        let mut env = Environment::empty();
        assert_eq!(run(&SourceCommand { name: "." }, &["/nonexistent/zzz.sh"], &mut env).unwrap(), ExecOutcome::Code(1));
        assert_eq!(run(&SourceCommand { name: "." }, &[], &mut env).unwrap(), ExecOutcome::Code(2));
    }
}
