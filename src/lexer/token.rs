use std::fmt;

/// Shell operators recognised by the lexer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Pipe,      // |
    OrIf,      // ||
    Amp,       // &
    AndIf,     // &&
    Semi,      // ;
    DSemi,     // ;;
    LParen,    // (
    RParen,    // )
    Less,      // <
    Great,     // >
    DGreat,    // >>
    Clobber,   // >|
    LessGreat, // <>
    DLess,     // <<
    DLessDash, // <<-
    LessAnd,   // <&
    GreatAnd,  // >&
    AndGreat,  // &>
}

impl Op {
    pub fn as_str(&self) -> &'static str {
        match self {
            Op::Pipe => "|",
            Op::OrIf => "||",
            Op::Amp => "&",
            Op::AndIf => "&&",
            Op::Semi => ";",
            Op::DSemi => ";;",
            Op::LParen => "(",
            Op::RParen => ")",
            Op::Less => "<",
            Op::Great => ">",
            Op::DGreat => ">>",
            Op::Clobber => ">|",
            Op::LessGreat => "<>",
            Op::DLess => "<<",
            Op::DLessDash => "<<-",
            Op::LessAnd => "<&",
            Op::GreatAnd => ">&",
            Op::AndGreat => "&>",
        }
    }

    pub fn is_redirect(&self) -> bool {
        matches!(
            self,
            Op::Less
                | Op::Great
                | Op::DGreat
                | Op::Clobber
                | Op::LessGreat
                | Op::DLess
                | Op::DLessDash
                | Op::LessAnd
                | Op::GreatAnd
                | Op::AndGreat
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenKind {
    Word,
    /// A reserved word (`if`, `then`, `{`, ...). Only meaningful in command position.
    Reserved,
    Operator(Op),
    /// Digits immediately preceding a redirection operator, as in `2>`.
    IoNumber,
    /// The body of a here-document. Takes the place of the delimiter word.
    HereDocBody,
    Newline,
    Eof,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    /// Raw source text. Quotes and escapes are preserved for words.
    pub text: String,
    /// Whether the word contained any quoting characters.
    pub quoted: bool,
    pub line: usize,
}

impl Token {
    pub fn new(kind: TokenKind, text: impl Into<String>, line: usize) -> Self {
        Token {
            kind,
            text: text.into(),
            quoted: false,
            line,
        }
    }

    pub fn is_op(&self, op: Op) -> bool {
        self.kind == TokenKind::Operator(op)
    }

    pub fn is_reserved(&self, word: &str) -> bool {
        self.kind == TokenKind::Reserved && self.text == word
    }

    /// Words and reserved words both count as words outside command position.
    pub fn is_wordlike(&self) -> bool {
        matches!(self.kind, TokenKind::Word | TokenKind::Reserved)
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            TokenKind::Newline => write!(f, "newline"),
            TokenKind::Eof => write!(f, "end of file"),
            TokenKind::Operator(op) => write!(f, "{}", op.as_str()),
            _ => write!(f, "{}", self.text),
        }
    }
}

pub const RESERVED_WORDS: &[&str] = &[
    "if", "then", "else", "elif", "fi", "do", "done", "case", "esac", "while", "until", "for",
    "in", "function", "{", "}", "!",
];

pub fn is_reserved_word(text: &str) -> bool {
    RESERVED_WORDS.contains(&text)
}
