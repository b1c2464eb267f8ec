pub mod arrays;
pub mod ast;
pub mod config;
pub mod environment;
pub mod error;
pub mod executor;
pub mod expander;
pub mod jobs;
pub mod lexer;
pub mod logging;
pub mod parser;
pub mod prompt;
pub mod repl;
pub mod shell;
pub mod signals;

pub use error::ShellError;
pub use shell::{ExecutionRecord, Shell};
