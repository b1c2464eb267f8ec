use std::rc::Rc;

use crate::ast::{
    AssignValue, Assignment, AstNode, CaseArm, CommandNode, ListOp, Redirect, RedirectKind, Word,
};
use crate::lexer::{is_name, tokenize, Op, Token, TokenKind};
use crate::parser::{ParseError, Parser};

pub struct DefaultParser<'a> {
    tokens: &'a [Token],
    pos: usize,
    eof: Token,
}

impl<'a> DefaultParser<'a> {
    pub fn new(tokens: &'a [Token]) -> Self {
        let line = tokens.last().map_or(1, |t| t.line);
        Self {
            tokens,
            pos: 0,
            eof: Token::new(TokenKind::Eof, "", line),
        }
    }

    fn peek(&self) -> &Token {
        self.tokens.get(self.pos).unwrap_or(&self.eof)
    }

    fn peek_nth(&self, n: usize) -> &Token {
        self.tokens.get(self.pos + n).unwrap_or(&self.eof)
    }

    fn advance(&mut self) -> Token {
        let tok = self.peek().clone();
        if self.pos < self.tokens.len() {
            self.pos += 1;
        }
        tok
    }

    fn skip_newlines(&mut self) {
        while self.peek().kind == TokenKind::Newline {
            self.pos += 1;
        }
    }

    fn unexpected(&self) -> ParseError {
        unexpected_token(self.peek())
    }

    fn expect_reserved(&mut self, word: &str, construct: &str, line: usize) -> Result<(), ParseError> {
        let tok = self.peek();
        if tok.is_reserved(word) {
            self.pos += 1;
            Ok(())
        } else if tok.kind == TokenKind::Eof {
            Err(unclosed(construct, line))
        } else {
            Err(self.unexpected())
        }
    }

    fn expect_op(&mut self, op: Op, construct: &str, line: usize) -> Result<(), ParseError> {
        let tok = self.peek();
        if tok.is_op(op) {
            self.pos += 1;
            Ok(())
        } else if tok.kind == TokenKind::Eof {
            Err(unclosed(construct, line))
        } else {
            Err(self.unexpected())
        }
    }

    fn at_list_end(&self, stops: &[&str]) -> bool {
        let tok = self.peek();
        match &tok.kind {
            TokenKind::Eof | TokenKind::Operator(Op::RParen) | TokenKind::Operator(Op::DSemi) => true,
            TokenKind::Reserved => stops.contains(&tok.text.as_str()),
            _ => false,
        }
    }
}

// Top-down recursive descent parser
impl<'a> Parser for DefaultParser<'a> {
    fn parse(&mut self) -> Result<AstNode, ParseError> {
        self.skip_newlines();
        if self.peek().kind == TokenKind::Eof {
            return Err(ParseError::EmptyInput);
        }
        let node = self.parse_list(&[])?;
        if self.peek().kind != TokenKind::Eof {
            return Err(self.unexpected());
        }
        node.ok_or_else(|| self.unexpected())
    }
}

impl<'a> DefaultParser<'a> {
    /// Commands separated by `;`, `&` or newlines, up to one of `stops`.
    fn parse_list(&mut self, stops: &[&str]) -> Result<Option<AstNode>, ParseError> {
        self.skip_newlines();
        let mut items: Vec<(AstNode, ListOp)> = Vec::new();
        while !self.at_list_end(stops) {
            let node = self.parse_and_or()?;
            let sep = match &self.peek().kind {
                TokenKind::Operator(Op::Semi) | TokenKind::Newline => Some(ListOp::Seq),
                TokenKind::Operator(Op::Amp) => Some(ListOp::Background),
                _ => None,
            };
            match sep {
                Some(op) => {
                    self.pos += 1;
                    items.push((node, op));
                    self.skip_newlines();
                }
                None => {
                    items.push((node, ListOp::Seq));
                    break;
                }
            }
        }

        let mut rev = items.into_iter().rev();
        let Some((last, last_op)) = rev.next() else {
            return Ok(None);
        };
        let mut acc = match last_op {
            ListOp::Background => AstNode::List {
                left: Box::new(last),
                op: ListOp::Background,
                right: None,
            },
            _ => last,
        };
        for (node, op) in rev {
            acc = AstNode::List {
                left: Box::new(node),
                op,
                right: Some(Box::new(acc)),
            };
        }
        Ok(Some(acc))
    }

    fn parse_compound_list(&mut self, stops: &[&str], construct: &str, line: usize) -> Result<AstNode, ParseError> {
        match self.parse_list(stops)? {
            Some(node) => Ok(node),
            None if self.peek().kind == TokenKind::Eof => Err(unclosed(construct, line)),
            None => Err(self.unexpected()),
        }
    }

    fn parse_and_or(&mut self) -> Result<AstNode, ParseError> {
        let mut node = self.parse_pipeline()?;
        loop {
            let op = match self.peek().kind {
                TokenKind::Operator(Op::AndIf) => ListOp::And,
                TokenKind::Operator(Op::OrIf) => ListOp::Or,
                _ => break,
            };
            self.pos += 1;
            self.skip_newlines();
            let rhs = self.parse_pipeline()?;
            node = AstNode::List {
                left: Box::new(node),
                op,
                right: Some(Box::new(rhs)),
            };
        }
        Ok(node)
    }

    fn parse_pipeline(&mut self) -> Result<AstNode, ParseError> {
        let negate = self.peek().is_reserved("!");
        if negate {
            self.pos += 1;
        }
        let mut commands = vec![self.parse_command()?];
        while self.peek().is_op(Op::Pipe) {
            self.pos += 1;
            self.skip_newlines();
            commands.push(self.parse_command()?);
        }
        if commands.len() == 1 && !negate {
            if let Some(single) = commands.pop() {
                return Ok(single);
            }
        }
        Ok(AstNode::Pipeline { commands, negate })
    }

    fn parse_command(&mut self) -> Result<AstNode, ParseError> {
        let tok = self.peek().clone();
        let node = match &tok.kind {
            TokenKind::Reserved => match tok.text.as_str() {
                "{" => self.parse_group(tok.line)?,
                "if" => {
                    self.pos += 1;
                    self.parse_if_rest(tok.line)?
                }
                "for" => self.parse_for(tok.line)?,
                "while" => self.parse_while(false, tok.line)?,
                "until" => self.parse_while(true, tok.line)?,
                "case" => self.parse_case(tok.line)?,
                "function" => return self.parse_function_keyword(),
                _ => return Err(self.unexpected()),
            },
            TokenKind::Operator(Op::LParen) => self.parse_subshell(tok.line)?,
            TokenKind::Word if self.is_function_def() => return self.parse_function_def(),
            _ => return self.parse_simple(),
        };
        self.parse_trailing_redirects(node)
    }

    fn parse_trailing_redirects(&mut self, node: AstNode) -> Result<AstNode, ParseError> {
        let mut redirects = Vec::new();
        loop {
            let tok = self.peek().clone();
            match &tok.kind {
                TokenKind::IoNumber => {
                    self.pos += 1;
                    let fd = parse_fd(&tok)?;
                    redirects.push(self.parse_redirect(Some(fd))?);
                }
                TokenKind::Operator(op) if op.is_redirect() => redirects.push(self.parse_redirect(None)?),
                _ => break,
            }
        }
        if redirects.is_empty() {
            Ok(node)
        } else {
            Ok(AstNode::Redirect {
                node: Box::new(node),
                redirects,
            })
        }
    }

    fn parse_group(&mut self, line: usize) -> Result<AstNode, ParseError> {
        self.pos += 1;
        let body = self.parse_compound_list(&["}"], "{", line)?;
        self.expect_reserved("}", "{", line)?;
        Ok(AstNode::Group(Box::new(body)))
    }

    fn parse_subshell(&mut self, line: usize) -> Result<AstNode, ParseError> {
        self.pos += 1;
        let body = self.parse_compound_list(&[], "(", line)?;
        self.expect_op(Op::RParen, "(", line)?;
        Ok(AstNode::Subshell(Box::new(body)))
    }

    /// Parses after `if` or `elif`. A nested `elif` chain shares the final `fi`.
    fn parse_if_rest(&mut self, line: usize) -> Result<AstNode, ParseError> {
        let cond = self.parse_compound_list(&["then"], "if", line)?;
        self.expect_reserved("then", "if", line)?;
        let then_branch = self.parse_compound_list(&["elif", "else", "fi"], "if", line)?;
        let else_branch = if self.peek().is_reserved("elif") {
            self.pos += 1;
            Some(Box::new(self.parse_if_rest(line)?))
        } else if self.peek().is_reserved("else") {
            self.pos += 1;
            let body = self.parse_compound_list(&["fi"], "if", line)?;
            self.expect_reserved("fi", "if", line)?;
            Some(Box::new(body))
        } else {
            self.expect_reserved("fi", "if", line)?;
            None
        };
        Ok(AstNode::If {
            cond: Box::new(cond),
            then_branch: Box::new(then_branch),
            else_branch,
        })
    }

    fn parse_for(&mut self, line: usize) -> Result<AstNode, ParseError> {
        self.pos += 1;
        let var_tok = self.peek().clone();
        if !var_tok.is_wordlike() || var_tok.quoted || !is_name(&var_tok.text) {
            return Err(self.unexpected());
        }
        self.pos += 1;

        let words = if self.peek().is_op(Op::Semi) {
            self.pos += 1;
            None
        } else {
            self.skip_newlines();
            if self.peek().is_reserved("in") {
                self.pos += 1;
                let mut words = Vec::new();
                while self.peek().is_wordlike() {
                    words.push(Word::new(self.advance().text));
                }
                match self.peek().kind {
                    TokenKind::Operator(Op::Semi) | TokenKind::Newline => self.pos += 1,
                    TokenKind::Eof => return Err(unclosed("for", line)),
                    _ => return Err(self.unexpected()),
                }
                Some(words)
            } else {
                None
            }
        };

        self.skip_newlines();
        self.expect_reserved("do", "for", line)?;
        let body = self.parse_compound_list(&["done"], "for", line)?;
        self.expect_reserved("done", "for", line)?;
        Ok(AstNode::For {
            var: var_tok.text,
            words,
            body: Box::new(body),
        })
    }

    fn parse_while(&mut self, negate: bool, line: usize) -> Result<AstNode, ParseError> {
        let construct = if negate { "until" } else { "while" };
        self.pos += 1;
        let cond = self.parse_compound_list(&["do"], construct, line)?;
        self.expect_reserved("do", construct, line)?;
        let body = self.parse_compound_list(&["done"], construct, line)?;
        self.expect_reserved("done", construct, line)?;
        Ok(AstNode::While {
            cond: Box::new(cond),
            body: Box::new(body),
            negate,
        })
    }

    fn parse_case(&mut self, line: usize) -> Result<AstNode, ParseError> {
        self.pos += 1;
        let word_tok = self.peek().clone();
        if !word_tok.is_wordlike() {
            return Err(self.unexpected());
        }
        self.pos += 1;
        self.skip_newlines();
        self.expect_reserved("in", "case", line)?;

        let mut arms = Vec::new();
        loop {
            self.skip_newlines();
            if self.peek().is_reserved("esac") {
                self.pos += 1;
                break;
            }
            if self.peek().kind == TokenKind::Eof {
                return Err(unclosed("case", line));
            }
            if self.peek().is_op(Op::LParen) {
                self.pos += 1;
            }
            let mut patterns = Vec::new();
            loop {
                let tok = self.peek();
                if tok.kind == TokenKind::Eof {
                    return Err(unclosed("case", line));
                }
                if !tok.is_wordlike() {
                    return Err(self.unexpected());
                }
                patterns.push(Word::new(self.advance().text));
                if self.peek().is_op(Op::Pipe) {
                    self.pos += 1;
                } else {
                    break;
                }
            }
            self.expect_op(Op::RParen, "case", line)?;
            let body = self.parse_list(&["esac"])?;
            arms.push(CaseArm { patterns, body });

            let tok = self.peek();
            if tok.is_op(Op::DSemi) {
                self.pos += 1;
            } else if tok.is_reserved("esac") {
                continue;
            } else if tok.kind == TokenKind::Eof {
                return Err(unclosed("case", line));
            } else {
                return Err(self.unexpected());
            }
        }
        Ok(AstNode::Case {
            word: Word::new(word_tok.text),
            arms,
        })
    }

    fn is_function_def(&self) -> bool {
        let name = self.peek();
        !name.quoted
            && is_name(&name.text)
            && self.peek_nth(1).is_op(Op::LParen)
            && self.peek_nth(2).is_op(Op::RParen)
    }

    fn parse_function_def(&mut self) -> Result<AstNode, ParseError> {
        let name = self.advance().text;
        self.pos += 2;
        self.parse_function_body(name)
    }

    fn parse_function_keyword(&mut self) -> Result<AstNode, ParseError> {
        self.pos += 1;
        let tok = self.peek().clone();
        if !tok.is_wordlike() || tok.quoted || !is_name(&tok.text) {
            return Err(self.unexpected());
        }
        self.pos += 1;
        if self.peek().is_op(Op::LParen) && self.peek_nth(1).is_op(Op::RParen) {
            self.pos += 2;
        }
        self.parse_function_body(tok.text)
    }

    fn parse_function_body(&mut self, name: String) -> Result<AstNode, ParseError> {
        self.skip_newlines();
        let tok = self.peek();
        let compound_start = tok.is_op(Op::LParen)
            || (tok.kind == TokenKind::Reserved
                && matches!(tok.text.as_str(), "{" | "if" | "for" | "while" | "until" | "case"));
        if !compound_start {
            return Err(self.unexpected());
        }
        let body = self.parse_command()?;
        Ok(AstNode::FunctionDef {
            name,
            body: Rc::new(body),
        })
    }

    fn parse_simple(&mut self) -> Result<AstNode, ParseError> {
        let mut cmd = CommandNode::default();
        loop {
            let tok = self.peek().clone();
            match &tok.kind {
                TokenKind::IoNumber => {
                    self.pos += 1;
                    let fd = parse_fd(&tok)?;
                    cmd.redirects.push(self.parse_redirect(Some(fd))?);
                }
                TokenKind::Operator(op) if op.is_redirect() => {
                    cmd.redirects.push(self.parse_redirect(None)?);
                }
                TokenKind::Word | TokenKind::Reserved => {
                    self.pos += 1;
                    if cmd.name.is_none() && tok.kind == TokenKind::Word {
                        if let Some(assignment) = parse_assignment(&tok)? {
                            cmd.assignments.push(assignment);
                            continue;
                        }
                    }
                    match &cmd.name {
                        None => cmd.name = Some(Word::new(tok.text)),
                        Some(name) => {
                            if tok.kind == TokenKind::Word && DECLARATION_BUILTINS.contains(&name.as_str()) {
                                if let Some(assignment) = parse_assignment(&tok)? {
                                    cmd.declarations.push((cmd.args.len(), assignment));
                                }
                            }
                            cmd.args.push(Word::new(tok.text));
                        }
                    }
                }
                _ => break,
            }
        }
        if cmd.name.is_none() && cmd.assignments.is_empty() && cmd.redirects.is_empty() {
            return Err(self.unexpected());
        }
        Ok(AstNode::Command(cmd))
    }

    fn parse_redirect(&mut self, fd: Option<i32>) -> Result<Redirect, ParseError> {
        let op_tok = self.advance();
        let kind = match op_tok.kind {
            TokenKind::Operator(Op::Less) => RedirectKind::In,
            TokenKind::Operator(Op::Great) => RedirectKind::Out,
            TokenKind::Operator(Op::DGreat) => RedirectKind::Append,
            TokenKind::Operator(Op::Clobber) => RedirectKind::Clobber,
            TokenKind::Operator(Op::LessGreat) => RedirectKind::ReadWrite,
            TokenKind::Operator(Op::LessAnd) => RedirectKind::DupIn,
            TokenKind::Operator(Op::GreatAnd) => RedirectKind::DupOut,
            TokenKind::Operator(Op::AndGreat) => RedirectKind::OutAndErr,
            TokenKind::Operator(Op::DLess) | TokenKind::Operator(Op::DLessDash) => {
                let body = self.peek().clone();
                if body.kind != TokenKind::HereDocBody {
                    return Err(self.unexpected());
                }
                self.pos += 1;
                return Ok(Redirect {
                    fd,
                    kind: RedirectKind::HereDoc { expand: !body.quoted },
                    target: Word::new(body.text),
                });
            }
            _ => return Err(unexpected_token(&op_tok)),
        };
        let target = self.peek().clone();
        if !target.is_wordlike() {
            return Err(self.unexpected());
        }
        self.pos += 1;
        Ok(Redirect {
            fd,
            kind,
            target: Word::new(target.text),
        })
    }
}

/// Builtins whose `NAME=value` arguments parse as assignments.
const DECLARATION_BUILTINS: [&str; 4] = ["export", "local", "typeset", "declare"];

fn unexpected_token(tok: &Token) -> ParseError {
    match tok.kind {
        TokenKind::Eof => ParseError::UnexpectedEof,
        _ => ParseError::UnexpectedToken {
            found: tok.to_string(),
            line: tok.line,
        },
    }
}

fn unclosed(construct: &str, line: usize) -> ParseError {
    ParseError::Unclosed {
        construct: construct.to_string(),
        line,
    }
}

fn parse_fd(tok: &Token) -> Result<i32, ParseError> {
    tok.text.parse::<i32>().map_err(|_| unexpected_token(tok))
}

/// Recognises `NAME=value`, `NAME+=value`, `NAME[sub]=value` and `NAME=(items)`.
fn parse_assignment(tok: &Token) -> Result<Option<Assignment>, ParseError> {
    let text = tok.text.as_str();
    let name_end = text
        .char_indices()
        .find(|(_, c)| !(c.is_ascii_alphanumeric() || *c == '_'))
        .map_or(text.len(), |(i, _)| i);
    let name = &text[..name_end];
    if !is_name(name) {
        return Ok(None);
    }
    let mut rest = &text[name_end..];
    let mut index = None;
    if rest.starts_with('[') {
        let Some(close) = rest.find(']') else {
            return Ok(None);
        };
        index = Some(rest[1..close].to_string());
        rest = &rest[close + 1..];
    }
    let (append, value) = if let Some(v) = rest.strip_prefix("+=") {
        (true, v)
    } else if let Some(v) = rest.strip_prefix('=') {
        (false, v)
    } else {
        return Ok(None);
    };

    let value = if index.is_none() && value.len() >= 2 && value.starts_with('(') && value.ends_with(')') {
        AssignValue::Array(parse_array_items(&value[1..value.len() - 1], tok.line)?)
    } else {
        AssignValue::Scalar(Word::new(value))
    };
    Ok(Some(Assignment {
        name: name.to_string(),
        index,
        value,
        append,
    }))
}

fn parse_array_items(inner: &str, line: usize) -> Result<Vec<Word>, ParseError> {
    let mut items = Vec::new();
    for tok in tokenize(inner)? {
        match tok.kind {
            TokenKind::Word | TokenKind::Reserved => items.push(Word::new(tok.text)),
            TokenKind::Newline | TokenKind::Eof => {}
            _ => {
                return Err(ParseError::UnexpectedToken {
                    found: tok.to_string(),
                    line,
                })
            }
        }
    }
    Ok(items)
}
