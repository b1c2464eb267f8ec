pub mod default;

use thiserror::Error;

use crate::ast::AstNode;
use crate::lexer::{tokenize, LexError};

pub use default::DefaultParser;

pub trait Parser {
    fn parse(&mut self) -> Result<AstNode, ParseError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("syntax error: unexpected end of file")]
    UnexpectedEof,
    #[error("syntax error near unexpected token `{found}' on line {line}")]
    UnexpectedToken { found: String, line: usize },
    #[error("syntax error: `{construct}' opened on line {line} is never closed")]
    Unclosed { construct: String, line: usize },
    #[error("input is empty")]
    EmptyInput,
    #[error("syntax error: {0}")]
    Lex(#[from] LexError),
}

impl ParseError {
    /// True when the input ended inside a construct that more lines could finish.
    pub fn is_incomplete(&self) -> bool {
        match self {
            ParseError::UnexpectedEof | ParseError::Unclosed { .. } => true,
            ParseError::Lex(e) => e.is_incomplete(),
            _ => false,
        }
    }
}

/// Tokenizes and parses a complete program.
pub fn parse_source(source: &str) -> Result<AstNode, ParseError> {
    let tokens = tokenize(source)?;
    DefaultParser::new(&tokens).parse()
}
