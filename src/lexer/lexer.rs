use thiserror::Error;
use tracing::trace;

use super::scan;
use super::token::{is_reserved_word, Op, Token, TokenKind};

#[derive(Debug, PartialEq, Eq, Clone, Error)]
pub enum LexError {
    #[error("unterminated quote '{quote}' starting on line {line}")]
    UnterminatedQuote { quote: char, line: usize },
    #[error("unterminated `{construct}' starting on line {line}")]
    UnterminatedExpansion { construct: &'static str, line: usize },
    #[error("here-document delimited by `{delimiter}' is not terminated")]
    UnterminatedHereDoc { delimiter: String },
    #[error("unexpected end of input after backslash")]
    TrailingBackslash,
    #[error("missing here-document delimiter on line {0}")]
    MissingHereDocDelimiter(usize),
}

impl LexError {
    /// True when more input could complete the construct.
    pub fn is_incomplete(&self) -> bool {
        !matches!(self, LexError::MissingHereDocDelimiter(_))
    }
}

#[derive(Debug)]
struct PendingHereDoc {
    token_index: usize,
    delimiter: String,
    strip_tabs: bool,
    quoted: bool,
}

pub struct Lexer {
    chars: Vec<char>,
    pos: usize,
    line: usize,
    tokens: Vec<Token>,
    pending: Vec<PendingHereDoc>,
    // Set after `<<`/`<<-`; the next word is a here-document delimiter.
    heredoc_op: Option<bool>,
}

impl Lexer {
    pub fn new(input: &str) -> Self {
        Lexer {
            chars: input.chars().collect(),
            pos: 0,
            line: 1,
            tokens: Vec::new(),
            pending: Vec::new(),
            heredoc_op: None,
        }
    }

    pub fn tokenize(mut self) -> Result<Vec<Token>, LexError> {
        loop {
            self.skip_blanks()?;
            let Some(c) = self.peek() else { break };
            match c {
                '#' => self.skip_comment(),
                '\n' => {
                    if self.heredoc_op.is_some() {
                        return Err(LexError::MissingHereDocDelimiter(self.line));
                    }
                    self.pos += 1;
                    self.push(Token::new(TokenKind::Newline, "\n", self.line));
                    self.line += 1;
                    self.read_heredoc_bodies()?;
                }
                _ => {
                    if let Some((op, len)) = self.operator_at() {
                        self.lex_operator(op, len)?;
                    } else {
                        self.lex_word()?;
                    }
                }
            }
        }

        if self.heredoc_op.is_some() {
            return Err(LexError::MissingHereDocDelimiter(self.line));
        }
        if let Some(pending) = self.pending.first() {
            return Err(LexError::UnterminatedHereDoc {
                delimiter: pending.delimiter.clone(),
            });
        }
        let line = self.line;
        self.push(Token::new(TokenKind::Eof, "", line));
        trace!(count = self.tokens.len(), "tokenized input");
        Ok(self.tokens)
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn push(&mut self, token: Token) {
        self.tokens.push(token);
    }

    fn skip_blanks(&mut self) -> Result<(), LexError> {
        while let Some(c) = self.peek() {
            match c {
                ' ' | '\t' => self.pos += 1,
                '\\' if self.peek_at(1) == Some('\n') => self.skip_continuation()?,
                _ => break,
            }
        }
        Ok(())
    }

    fn skip_continuation(&mut self) -> Result<(), LexError> {
        self.pos += 2;
        self.line += 1;
        if self.pos >= self.chars.len() {
            return Err(LexError::TrailingBackslash);
        }
        Ok(())
    }

    fn skip_comment(&mut self) {
        while let Some(c) = self.peek() {
            if c == '\n' {
                break;
            }
            self.pos += 1;
        }
    }

    fn operator_at(&self) -> Option<(Op, usize)> {
        let n1 = self.peek_at(1);
        let op = match self.peek()? {
            '|' if n1 == Some('|') => (Op::OrIf, 2),
            '|' => (Op::Pipe, 1),
            '&' => match n1 {
                Some('&') => (Op::AndIf, 2),
                Some('>') => (Op::AndGreat, 2),
                _ => (Op::Amp, 1),
            },
            ';' if n1 == Some(';') => (Op::DSemi, 2),
            ';' => (Op::Semi, 1),
            '(' => (Op::LParen, 1),
            ')' => (Op::RParen, 1),
            '<' => match n1 {
                Some('<') if self.peek_at(2) == Some('-') => (Op::DLessDash, 3),
                Some('<') => (Op::DLess, 2),
                Some('&') => (Op::LessAnd, 2),
                Some('>') => (Op::LessGreat, 2),
                _ => (Op::Less, 1),
            },
            '>' => match n1 {
                Some('>') => (Op::DGreat, 2),
                Some('|') => (Op::Clobber, 2),
                Some('&') => (Op::GreatAnd, 2),
                _ => (Op::Great, 1),
            },
            _ => return None,
        };
        Some(op)
    }

    fn lex_operator(&mut self, op: Op, len: usize) -> Result<(), LexError> {
        if self.heredoc_op.is_some() {
            return Err(LexError::MissingHereDocDelimiter(self.line));
        }
        self.pos += len;
        match op {
            Op::DLess => self.heredoc_op = Some(false),
            Op::DLessDash => self.heredoc_op = Some(true),
            _ => {}
        }
        self.push(Token::new(TokenKind::Operator(op), op.as_str(), self.line));
        Ok(())
    }

    /// Copies `chars[pos..end]` into `text`, keeping the line count current.
    fn take_until(&mut self, end: usize, text: &mut String) {
        for &c in &self.chars[self.pos..end] {
            if c == '\n' {
                self.line += 1;
            }
            text.push(c);
        }
        self.pos = end;
    }

    fn lex_word(&mut self) -> Result<(), LexError> {
        let start_line = self.line;
        let mut text = String::new();
        let mut quoted = false;

        while let Some(c) = self.peek() {
            match c {
                ' ' | '\t' | '\n' | '|' | '&' | ';' | '<' | '>' | ')' => break,
                '(' => {
                    if !is_assignment_prefix(&text) {
                        break;
                    }
                    let end = scan::skip_group(&self.chars, self.pos, '(', ')').ok_or(
                        LexError::UnterminatedExpansion {
                            construct: "(",
                            line: self.line,
                        },
                    )?;
                    self.take_until(end, &mut text);
                }
                '\'' => {
                    quoted = true;
                    let end = scan::skip_single_quoted(&self.chars, self.pos).ok_or(
                        LexError::UnterminatedQuote {
                            quote: '\'',
                            line: self.line,
                        },
                    )?;
                    self.take_until(end, &mut text);
                }
                '"' => {
                    quoted = true;
                    let end = scan::skip_double_quoted(&self.chars, self.pos).ok_or(
                        LexError::UnterminatedQuote {
                            quote: '"',
                            line: self.line,
                        },
                    )?;
                    self.take_until(end, &mut text);
                }
                '\\' => match self.peek_at(1) {
                    Some('\n') => self.skip_continuation()?,
                    Some(next) => {
                        quoted = true;
                        text.push('\\');
                        text.push(next);
                        self.pos += 2;
                    }
                    None => return Err(LexError::TrailingBackslash),
                },
                '`' => {
                    let end = scan::skip_backtick(&self.chars, self.pos).ok_or(
                        LexError::UnterminatedExpansion {
                            construct: "`",
                            line: self.line,
                        },
                    )?;
                    self.take_until(end, &mut text);
                }
                '$' => quoted |= self.lex_dollar(&mut text)?,
                _ => {
                    text.push(c);
                    self.pos += 1;
                }
            }
        }

        if let Some(strip_tabs) = self.heredoc_op.take() {
            self.pending.push(PendingHereDoc {
                token_index: self.tokens.len(),
                delimiter: unquote_delimiter(&text),
                strip_tabs,
                quoted,
            });
        }

        let kind = if !quoted
            && !text.is_empty()
            && text.chars().all(|c| c.is_ascii_digit())
            && matches!(self.peek(), Some('<') | Some('>'))
        {
            TokenKind::IoNumber
        } else if !quoted && is_reserved_word(&text) {
            TokenKind::Reserved
        } else {
            TokenKind::Word
        };
        self.push(Token {
            kind,
            text,
            quoted,
            line: start_line,
        });
        Ok(())
    }

    /// Lexes a `$` construct. Returns true for `$'...'`, which counts as quoting.
    fn lex_dollar(&mut self, text: &mut String) -> Result<bool, LexError> {
        let line = self.line;
        let (end, quoted) = match self.peek_at(1) {
            Some('(') => {
                let construct = if self.peek_at(2) == Some('(') { "$((" } else { "$(" };
                let end = scan::skip_group(&self.chars, self.pos + 1, '(', ')')
                    .ok_or(LexError::UnterminatedExpansion { construct, line })?;
                (end, false)
            }
            Some('{') => {
                let end = scan::skip_group(&self.chars, self.pos + 1, '{', '}')
                    .ok_or(LexError::UnterminatedExpansion { construct: "${", line })?;
                (end, false)
            }
            Some('\'') => {
                let end = scan::skip_ansi_quoted(&self.chars, self.pos + 1)
                    .ok_or(LexError::UnterminatedQuote { quote: '\'', line })?;
                (end, true)
            }
            _ => (self.pos + 1, false),
        };
        self.take_until(end, text);
        Ok(quoted)
    }

    fn read_heredoc_bodies(&mut self) -> Result<(), LexError> {
        let pending = std::mem::take(&mut self.pending);
        for doc in pending {
            let mut body = String::new();
            loop {
                if self.pos >= self.chars.len() {
                    return Err(LexError::UnterminatedHereDoc {
                        delimiter: doc.delimiter,
                    });
                }
                let start = self.pos;
                while self.pos < self.chars.len() && self.chars[self.pos] != '\n' {
                    self.pos += 1;
                }
                let mut line: String = self.chars[start..self.pos].iter().collect();
                let had_newline = self.pos < self.chars.len();
                if had_newline {
                    self.pos += 1;
                }
                self.line += 1;
                if doc.strip_tabs {
                    line = line.trim_start_matches('\t').to_string();
                }
                if line == doc.delimiter {
                    break;
                }
                if !had_newline {
                    return Err(LexError::UnterminatedHereDoc {
                        delimiter: doc.delimiter,
                    });
                }
                body.push_str(&line);
                body.push('\n');
            }
            let line = self.tokens[doc.token_index].line;
            self.tokens[doc.token_index] = Token {
                kind: TokenKind::HereDocBody,
                text: body,
                quoted: doc.quoted,
                line,
            };
        }
        Ok(())
    }
}

/// `NAME=`, `NAME+=` or `NAME[sub]=`, the text before an array literal.
pub(crate) fn is_assignment_prefix(text: &str) -> bool {
    let Some(body) = text.strip_suffix('=') else {
        return false;
    };
    let body = body.strip_suffix('+').unwrap_or(body);
    let name = match body.find('[') {
        Some(i) if body.ends_with(']') => &body[..i],
        Some(_) => return false,
        None => body,
    };
    is_name(name)
}

pub fn is_name(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c == '_' || c.is_ascii_alphabetic() => {}
        _ => return false,
    }
    chars.all(|c| c == '_' || c.is_ascii_alphanumeric())
}

fn unquote_delimiter(text: &str) -> String {
    let mut out = String::new();
    let mut chars = text.chars();
    while let Some(c) = chars.next() {
        match c {
            '\'' | '"' => {}
            '\\' => {
                if let Some(next) = chars.next() {
                    out.push(next);
                }
            }
            _ => out.push(c),
        }
    }
    out
}

pub fn tokenize(source: &str) -> Result<Vec<Token>, LexError> {
    Lexer::new(source).tokenize()
}
