use std::io;

use thiserror::Error;

use crate::config::ConfigError;
use crate::executor::ExecError;
use crate::lexer::LexError;
use crate::parser::ParseError;

/// Failures surfaced by the [`Shell`](crate::Shell) facade.
#[derive(Debug, Error)]
pub enum ShellError {
    #[error(transparent)]
    Lex(#[from] LexError),
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error(transparent)]
    Exec(#[from] ExecError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("{0}")]
    Io(#[from] io::Error),
}

impl ShellError {
    /// The input ended inside a construct; more lines may complete it.
    pub fn is_incomplete(&self) -> bool {
        match self {
            ShellError::Lex(e) => e.is_incomplete(),
            ShellError::Parse(e) => e.is_incomplete(),
            _ => false,
        }
    }

    pub fn status(&self) -> i32 {
        match self {
            ShellError::Lex(_) | ShellError::Parse(_) => 2,
            ShellError::Exec(e) => e.status(),
            ShellError::Config(_) | ShellError::Io(_) => 1,
        }
    }
}
