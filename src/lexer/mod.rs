pub mod lexer;
pub(crate) mod scan;
pub mod token;

pub use lexer::{is_name, tokenize, LexError, Lexer};
pub use token::{Op, Token, TokenKind};
