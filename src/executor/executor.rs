use std::io;

use nix::errno::Errno;
use thiserror::Error;

use crate::ast::AstNode;
use crate::environment::Environment;
use crate::expander::ExpandError;
use crate::parser::ParseError;

/// How a node finished. Everything other than `Code` unwinds to an
/// enclosing loop, function or the interpreter itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecOutcome {
    Code(i32),
    Exit(i32),
    Break(usize),
    Continue(usize),
    Return(i32),
}

impl ExecOutcome {
    pub fn code(&self) -> i32 {
        match *self {
            ExecOutcome::Code(c) | ExecOutcome::Exit(c) | ExecOutcome::Return(c) => c,
            ExecOutcome::Break(_) | ExecOutcome::Continue(_) => 0,
        }
    }

    pub fn is_code(&self) -> bool {
        matches!(self, ExecOutcome::Code(_))
    }
}

pub type ExecStatus = Result<ExecOutcome, ExecError>;

#[derive(Debug, Error)]
pub enum ExecError {
    #[error("{0}: command not found")]
    CommandNotFound(String),
    #[error("{0}: Permission denied")]
    PermissionDenied(String),
    #[error("{0}: No such file or directory")]
    NoSuchFile(String),
    #[error("{0}")]
    Io(#[from] io::Error),
    #[error("{0}")]
    Os(#[from] Errno),
    #[error("{0}")]
    Redirect(String),
    #[error(transparent)]
    Expand(#[from] ExpandError),
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error("{0}: only meaningful in a `for', `while', or `until' loop")]
    LoopControl(&'static str),
    #[error("return: can only `return' from a function or sourced script")]
    ReturnOutsideFunction,
    #[error("{0}")]
    Custom(String),
}

impl ExecError {
    /// Conventional exit status for this failure.
    pub fn status(&self) -> i32 {
        match self {
            ExecError::CommandNotFound(_) | ExecError::NoSuchFile(_) => 127,
            ExecError::PermissionDenied(_) => 126,
            ExecError::Parse(_) => 2,
            _ => 1,
        }
    }
}

/// Output of a command substitution.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Captured {
    pub stdout: String,
    pub status: i32,
}

pub trait Executor {
    fn exec(&mut self, node: &AstNode, env: &mut Environment) -> ExecStatus;

    /// Runs `source` in an isolated copy of `env` and collects its stdout.
    fn capture(&mut self, source: &str, env: &mut Environment) -> Result<Captured, ExecError>;
}
