//! Word expansion: brace, tilde, parameter, command and arithmetic
//! substitution, then field splitting, pathname expansion and quote removal.

pub mod arith;
pub mod brace;
pub mod param;
pub mod pattern;
pub mod split;
pub mod word;

use nix::unistd::{getuid, User};
use thiserror::Error;
use tracing::{debug, trace};

use crate::arrays::{ArrayError, ArrayKind};
use crate::ast::Word;
use crate::environment::Environment;
use crate::executor::Executor;

use self::param::{ParamExpr, ParamOp};
use self::split::{Chunk, Field, Piece};
use self::word::{parse_word, Mode, WordPart};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExpandError {
    #[error("{0}: unbound variable")]
    UnboundVariable(String),
    #[error("{name}: {message}")]
    ParameterNull { name: String, message: String },
    #[error("{0}: bad substitution")]
    BadSubstitution(String),
    #[error("{0}")]
    Arithmetic(String),
    #[error("command substitution: {0}")]
    CommandSubstitution(String),
    #[error("syntax error: {0}")]
    Syntax(String),
    #[error(transparent)]
    Array(#[from] ArrayError),
    #[error("{0}: ambiguous redirect")]
    AmbiguousRedirect(String),
}

/// The value a parameter reference resolves to before any operator applies.
#[derive(Debug, Clone, PartialEq)]
enum Value {
    Unset,
    Str(String),
    List(Vec<String>),
}

impl Value {
    fn is_unset(&self) -> bool {
        match self {
            Value::Unset => true,
            Value::Str(_) => false,
            Value::List(items) => items.is_empty(),
        }
    }

    fn is_null(&self) -> bool {
        match self {
            Value::Unset => true,
            Value::Str(s) => s.is_empty(),
            Value::List(items) => items.iter().all(String::is_empty),
        }
    }

    /// Whether `${x-w}` (or `${x:-w}` when `colon`) keeps the value.
    fn is_present(&self, colon: bool) -> bool {
        if colon { !self.is_null() } else { !self.is_unset() }
    }

    fn map(self, f: impl Fn(&str) -> String) -> Value {
        match self {
            Value::Unset => Value::Unset,
            Value::Str(s) => Value::Str(f(&s)),
            Value::List(items) => Value::List(items.iter().map(|s| f(s)).collect()),
        }
    }
}

pub struct Expander<'a> {
    env: &'a mut Environment,
    exec: &'a mut dyn Executor,
}

impl<'a> Expander<'a> {
    pub fn new(env: &'a mut Environment, exec: &'a mut dyn Executor) -> Self {
        Expander { env, exec }
    }

    /// Full expansion of command words into fields.
    pub fn expand_words(&mut self, words: &[Word]) -> Result<Vec<String>, ExpandError> {
        let mut out = Vec::new();
        for word in words {
            for candidate in brace::expand_braces(word.as_str()) {
                for field in self.expand_fields(&candidate)? {
                    if self.env.options.noglob {
                        out.push(field.text());
                    } else {
                        out.extend(pattern::expand_pathname(&field));
                    }
                }
            }
        }
        trace!(?out, "expanded words");
        Ok(out)
    }

    fn expand_fields(&mut self, text: &str) -> Result<Vec<Field>, ExpandError> {
        let parts = parse_word(text, Mode::Unquoted)?;
        let parts = self.tilde_word(parts);
        let mut chunks = Vec::new();
        self.expand_parts(&parts, false, &mut chunks)?;
        let ifs = self.env.ifs().to_string();
        Ok(split::split_fields(chunks, &ifs))
    }

    /// Expands a word to one string without splitting or globbing.
    pub fn expand_word_string(&mut self, text: &str) -> Result<String, ExpandError> {
        let parts = parse_word(text, Mode::Unquoted)?;
        let parts = self.tilde_word(parts);
        let mut chunks = Vec::new();
        self.expand_parts(&parts, false, &mut chunks)?;
        Ok(split::join_fields(chunks).text())
    }

    /// Like [`Self::expand_word_string`], with tildes also expanded after each `:`.
    pub fn expand_assignment_value(&mut self, text: &str) -> Result<String, ExpandError> {
        let parts = parse_word(text, Mode::Unquoted)?;
        let parts = self.tilde_assignment(parts);
        let mut chunks = Vec::new();
        self.expand_parts(&parts, false, &mut chunks)?;
        Ok(split::join_fields(chunks).text())
    }

    /// Expands a `case` or `${x#...}` pattern. Quoted characters are escaped.
    pub fn expand_pattern(&mut self, text: &str) -> Result<String, ExpandError> {
        let parts = parse_word(text, Mode::Unquoted)?;
        let parts = self.tilde_word(parts);
        let mut chunks = Vec::new();
        self.expand_parts(&parts, false, &mut chunks)?;
        Ok(pattern::field_pattern(&split::join_fields(chunks)))
    }

    /// Expands an unquoted here-document body.
    pub fn expand_heredoc(&mut self, body: &str) -> Result<String, ExpandError> {
        let parts = parse_word(body, Mode::HereDoc)?;
        let mut chunks = Vec::new();
        self.expand_parts(&parts, true, &mut chunks)?;
        Ok(split::join_fields(chunks).text())
    }

    /// Expands a redirection target, which must produce exactly one field.
    pub fn expand_redirect_target(&mut self, text: &str) -> Result<String, ExpandError> {
        let mut fields = Vec::new();
        for field in self.expand_fields(text)? {
            if self.env.options.noglob {
                fields.push(field.text());
            } else {
                fields.extend(pattern::expand_pathname(&field));
            }
        }
        match fields.len() {
            1 => Ok(fields.remove(0)),
            _ => Err(ExpandError::AmbiguousRedirect(text.to_string())),
        }
    }

    fn expand_parts(&mut self, parts: &[WordPart], quoted: bool, out: &mut Vec<Chunk>) -> Result<(), ExpandError> {
        for part in parts {
            match part {
                WordPart::Literal(s) if quoted => out.push(Chunk::Piece(Piece::quoted(s.as_str()))),
                WordPart::Literal(s) => out.push(Chunk::Piece(Piece::literal(s.as_str()))),
                WordPart::Quoted(s) => out.push(Chunk::Piece(Piece::quoted(s.as_str()))),
                WordPart::DoubleQuoted(inner) => {
                    if inner.is_empty() {
                        out.push(Chunk::Piece(Piece::quoted("")));
                    }
                    self.expand_parts(inner, true, out)?;
                }
                WordPart::Param(p) => self.expand_param(p, quoted, out)?,
                WordPart::CommandSubst(src) => {
                    let text = self.command_substitution(src)?;
                    out.push(Chunk::Piece(value_piece(text, quoted)));
                }
                WordPart::Arith(expr) => {
                    let expr = self.expand_word_string(expr)?;
                    let value = arith::evaluate(&expr, self.env)?;
                    out.push(Chunk::Piece(value_piece(value.to_string(), quoted)));
                }
            }
        }
        Ok(())
    }

    fn command_substitution(&mut self, src: &str) -> Result<String, ExpandError> {
        debug!(src, "command substitution");
        let captured = self
            .exec
            .capture(src, self.env)
            .map_err(|e| ExpandError::CommandSubstitution(e.to_string()))?;
        self.env.last_status = captured.status;
        let mut text = captured.stdout;
        let trimmed = text.trim_end_matches('\n').len();
        text.truncate(trimmed);
        Ok(text)
    }

    fn tilde_home(&self, user: &str) -> Option<String> {
        match user {
            "" => self.env.home().map(str::to_string).or_else(|| {
                User::from_uid(getuid())
                    .ok()
                    .flatten()
                    .map(|u| u.dir.to_string_lossy().into_owned())
            }),
            "+" => self.env.get("PWD").map(str::to_string),
            "-" => self.env.get("OLDPWD").map(str::to_string),
            name if name.chars().all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.')) => {
                User::from_name(name)
                    .ok()
                    .flatten()
                    .map(|u| u.dir.to_string_lossy().into_owned())
            }
            _ => None,
        }
    }

    /// Expands a leading `~` or `~user` ended by `/` or by the end of the word.
    fn tilde_word(&self, mut parts: Vec<WordPart>) -> Vec<WordPart> {
        let only_part = parts.len() == 1;
        let Some(WordPart::Literal(first)) = parts.first() else {
            return parts;
        };
        if !first.starts_with('~') {
            return parts;
        }
        let end = first.find('/').unwrap_or(first.len());
        if end == first.len() && !only_part {
            return parts;
        }
        let Some(home) = self.tilde_home(&first[1..end]) else {
            return parts;
        };
        let rest = first[end..].to_string();
        let mut replaced = vec![WordPart::Quoted(home)];
        if !rest.is_empty() {
            replaced.push(WordPart::Literal(rest));
        }
        parts.splice(0..1, replaced);
        parts
    }

    /// Tilde expansion for assignment values: at the start and after every `:`.
    fn tilde_assignment(&self, parts: Vec<WordPart>) -> Vec<WordPart> {
        let count = parts.len();
        let mut out = Vec::with_capacity(count);
        let mut after_colon = true;
        for (k, part) in parts.into_iter().enumerate() {
            let text = match part {
                WordPart::Literal(text) => text,
                other => {
                    after_colon = false;
                    out.push(other);
                    continue;
                }
            };
            let segments: Vec<&str> = text.split(':').collect();
            let last = segments.len() - 1;
            for (j, seg) in segments.iter().enumerate() {
                if j > 0 {
                    out.push(WordPart::Literal(":".to_string()));
                }
                let eligible = (j == 0 && after_colon) || j > 0;
                let end = seg.find('/').unwrap_or(seg.len());
                let terminated = end < seg.len() || j < last || k == count - 1;
                let home = match seg.strip_prefix('~') {
                    Some(_) if eligible && terminated => self.tilde_home(&seg[1..end]),
                    _ => None,
                };
                match home {
                    Some(home) => {
                        out.push(WordPart::Quoted(home));
                        if end < seg.len() {
                            out.push(WordPart::Literal(seg[end..].to_string()));
                        }
                    }
                    None if !seg.is_empty() => out.push(WordPart::Literal(seg.to_string())),
                    None => {}
                }
            }
            after_colon = text.ends_with(':');
        }
        out
    }

    fn lookup(&mut self, p: &ParamExpr) -> Result<Value, ExpandError> {
        if p.name == "@" || p.name == "*" {
            return Ok(Value::List(self.env.positional.clone()));
        }
        let Some(sub) = p.subscript.as_deref() else {
            if let Some(v) = self.env.get(&p.name) {
                return Ok(Value::Str(v.to_string()));
            }
            if let Some(v) = self.env.special(&p.name) {
                return Ok(Value::Str(v));
            }
            return Ok(match self.env.arrays.get_index(&p.name, 0) {
                Some(v) => Value::Str(v.to_string()),
                None => Value::Unset,
            });
        };
        if sub == "@" || sub == "*" {
            if self.env.arrays.contains(&p.name) {
                return Ok(Value::List(self.env.arrays.values(&p.name)));
            }
            return Ok(Value::List(self.env.get(&p.name).map(str::to_string).into_iter().collect()));
        }
        Ok(match self.element(&p.name, sub)? {
            Some(v) => Value::Str(v),
            None => Value::Unset,
        })
    }

    fn element(&mut self, name: &str, sub: &str) -> Result<Option<String>, ExpandError> {
        if self.env.arrays.kind(name) == Some(ArrayKind::Associative) {
            let key = self.expand_word_string(sub)?;
            return Ok(self.env.arrays.get(name, &key).map(str::to_string));
        }
        let expr = self.expand_word_string(sub)?;
        let index = arith::evaluate(&expr, self.env)?;
        if !self.env.arrays.contains(name) {
            // a scalar behaves as a one-element array
            return Ok(match index {
                0 | -1 => self.env.get(name).map(str::to_string),
                _ => None,
            });
        }
        let index = self.env.arrays.resolve_index(name, index)?;
        Ok(self.env.arrays.get_index(name, index).map(str::to_string))
    }

    fn check_unbound(&self, p: &ParamExpr, value: &Value) -> Result<(), ExpandError> {
        let exempt = p.name == "@" || p.name == "*" || p.is_list();
        if self.env.options.nounset && !exempt && matches!(value, Value::Unset) {
            return Err(ExpandError::UnboundVariable(p.display_name()));
        }
        Ok(())
    }

    fn emit(&self, value: Value, p: &ParamExpr, quoted: bool, out: &mut Vec<Chunk>) {
        match value {
            Value::Unset => {}
            Value::Str(s) => out.push(Chunk::Piece(value_piece(s, quoted))),
            Value::List(items) if quoted && p.is_star() => {
                let sep: String = self.env.ifs().chars().take(1).collect();
                out.push(Chunk::Piece(Piece::quoted(items.join(&sep))));
            }
            Value::List(items) => {
                for (i, item) in items.into_iter().enumerate() {
                    if i > 0 {
                        out.push(Chunk::Break);
                    }
                    out.push(Chunk::Piece(value_piece(item, quoted)));
                }
            }
        }
    }

    /// Expands an operator word such as the `w` in `${x:-w}`.
    fn expand_op_word(&mut self, text: &str, quoted: bool, out: &mut Vec<Chunk>) -> Result<(), ExpandError> {
        let parts = parse_word(text, Mode::Unquoted)?;
        let parts = self.tilde_word(parts);
        self.expand_parts(&parts, quoted, out)
    }

    fn expand_param(&mut self, p: &ParamExpr, quoted: bool, out: &mut Vec<Chunk>) -> Result<(), ExpandError> {
        let before = out.len();
        let value = self.lookup(p)?;
        match &p.op {
            ParamOp::Plain => {
                self.check_unbound(p, &value)?;
                self.emit(value, p, quoted, out);
            }
            ParamOp::Length => {
                self.check_unbound(p, &value)?;
                let len = match &value {
                    Value::List(items) => items.len(),
                    _ if p.subscript.is_none()
                        && self.env.arrays.contains(&p.name)
                        && !self.env.is_set(&p.name) =>
                    {
                        self.env.arrays.length(&p.name)
                    }
                    Value::Str(s) => s.chars().count(),
                    Value::Unset => 0,
                };
                out.push(Chunk::Piece(value_piece(len.to_string(), quoted)));
            }
            ParamOp::Default { colon, word } => {
                let last_chars = match &value {
                    Value::Str(s) if *colon && !s.is_empty() => take_last_chars(s, word),
                    _ => None,
                };
                if let Some(tail) = last_chars {
                    out.push(Chunk::Piece(value_piece(tail, quoted)));
                } else if value.is_present(*colon) {
                    self.emit(value, p, quoted, out);
                } else {
                    self.expand_op_word(word, quoted, out)?;
                }
            }
            ParamOp::Assign { colon, word } => {
                if value.is_present(*colon) {
                    self.emit(value, p, quoted, out);
                } else {
                    let assigned = self.expand_assignment_value(word)?;
                    self.assign_param(p, &assigned)?;
                    out.push(Chunk::Piece(value_piece(assigned, quoted)));
                }
            }
            ParamOp::Alternative { colon, word } => {
                if value.is_present(*colon) {
                    self.expand_op_word(word, quoted, out)?;
                }
            }
            ParamOp::Error { colon, word } => {
                if value.is_present(*colon) {
                    self.emit(value, p, quoted, out);
                } else {
                    let message = if word.is_empty() {
                        "parameter null or not set".to_string()
                    } else {
                        self.expand_word_string(word)?
                    };
                    return Err(ExpandError::ParameterNull {
                        name: p.display_name(),
                        message,
                    });
                }
            }
            ParamOp::RemovePrefix { longest, pattern } | ParamOp::RemoveSuffix { longest, pattern } => {
                self.check_unbound(p, &value)?;
                let pat = self.expand_pattern(pattern)?;
                let prefix = matches!(p.op, ParamOp::RemovePrefix { .. });
                let result = value.map(|s| {
                    if prefix {
                        pattern::remove_prefix(s, &pat, *longest)
                    } else {
                        pattern::remove_suffix(s, &pat, *longest)
                    }
                });
                self.emit(result, p, quoted, out);
            }
            ParamOp::Substring { offset, length } => {
                self.check_unbound(p, &value)?;
                let result = self.substring(p, value, offset, length.as_deref())?;
                self.emit(result, p, quoted, out);
            }
            ParamOp::Upper { all } => {
                self.check_unbound(p, &value)?;
                self.emit(value.map(|s| convert_case(s, *all, true)), p, quoted, out);
            }
            ParamOp::Lower { all } => {
                self.check_unbound(p, &value)?;
                self.emit(value.map(|s| convert_case(s, *all, false)), p, quoted, out);
            }
            ParamOp::Keys | ParamOp::Values => {
                let items = if self.env.arrays.contains(&p.name) {
                    if p.op == ParamOp::Keys {
                        self.env.arrays.keys(&p.name)
                    } else {
                        self.env.arrays.values(&p.name)
                    }
                } else {
                    match self.env.get(&p.name) {
                        Some(v) if p.op == ParamOp::Values => vec![v.to_string()],
                        Some(_) => vec!["0".to_string()],
                        None => Vec::new(),
                    }
                };
                let listed = ParamExpr {
                    name: p.name.clone(),
                    subscript: Some(p.subscript.clone().unwrap_or_else(|| "@".to_string())),
                    op: ParamOp::Plain,
                };
                self.emit(Value::List(items), &listed, quoted, out);
            }
        }
        // "${x+alt}" with x unset, "${x}" with x empty: still one empty field
        if quoted && out.len() == before && !p.is_list() && !matches!(p.op, ParamOp::Keys | ParamOp::Values) {
            out.push(Chunk::Piece(Piece::quoted("")));
        }
        Ok(())
    }

    fn assign_param(&mut self, p: &ParamExpr, value: &str) -> Result<(), ExpandError> {
        if !crate::lexer::is_name(&p.name) {
            return Err(ExpandError::BadSubstitution(format!("${}: cannot assign in this way", p.name)));
        }
        match p.subscript.as_deref() {
            None => self.env.set(&p.name, value),
            Some("@") | Some("*") => {
                return Err(ExpandError::BadSubstitution(format!("{}: cannot assign list", p.display_name())));
            }
            Some(sub) => {
                if self.env.arrays.kind(&p.name) == Some(ArrayKind::Associative) {
                    let key = self.expand_word_string(sub)?;
                    self.env.arrays.set_associative(&p.name, &key, value)?;
                } else {
                    let expr = self.expand_word_string(sub)?;
                    let index = arith::evaluate(&expr, self.env)?;
                    let index = self.env.arrays.resolve_index(&p.name, index)?;
                    self.env.arrays.set_indexed(&p.name, index, value);
                }
            }
        }
        Ok(())
    }

    /// Evaluates a substring bound. Anything that is not an integer, or an
    /// expression over set variables, makes the whole expansion empty.
    fn substring_bound(&mut self, text: &str) -> Result<Option<i64>, ExpandError> {
        let text = self.expand_word_string(text)?;
        let trimmed = text.trim();
        if let Ok(n) = trimmed.parse::<i64>() {
            return Ok(Some(n));
        }
        let all_set = identifiers(trimmed).iter().all(|name| self.env.is_set(name));
        if trimmed.is_empty() || !all_set {
            return Ok(None);
        }
        Ok(arith::evaluate(trimmed, self.env).ok())
    }

    fn substring(
        &mut self,
        p: &ParamExpr,
        value: Value,
        offset: &str,
        length: Option<&str>,
    ) -> Result<Value, ExpandError> {
        let Some(offset) = self.substring_bound(offset)? else {
            return Ok(Value::Str(String::new()));
        };
        let length = match length {
            Some(text) => match self.substring_bound(text)? {
                Some(n) => Some(n),
                None => return Ok(Value::Str(String::new())),
            },
            None => None,
        };
        Ok(match value {
            Value::Unset => Value::Unset,
            Value::Str(s) => {
                let chars: Vec<char> = s.chars().collect();
                match slice_range(chars.len(), offset, length) {
                    Some((start, end)) => Value::Str(chars[start..end].iter().collect()),
                    None => Value::Str(String::new()),
                }
            }
            Value::List(_) if p.subscript.is_some() && self.env.arrays.contains(&p.name) => {
                self.array_slice(&p.name, offset, length)
            }
            Value::List(items) => {
                let items = if p.name == "@" || p.name == "*" {
                    std::iter::once(self.env.shell_name.clone()).chain(items).collect()
                } else {
                    items
                };
                match slice_range(items.len(), offset, length) {
                    Some((start, end)) => Value::List(items[start..end].to_vec()),
                    None => Value::List(Vec::new()),
                }
            }
        })
    }

    /// `${arr[@]:offset:length}`: the offset is an index, the length counts
    /// elements.
    fn array_slice(&self, name: &str, offset: i64, length: Option<i64>) -> Value {
        let Ok(start) = self.env.arrays.resolve_index(name, offset) else {
            return Value::List(Vec::new());
        };
        let mut items = self.env.arrays.slice(name, start, None);
        match length {
            Some(n) if n < 0 => items.truncate(items.len().saturating_sub(n.unsigned_abs() as usize)),
            Some(n) => items.truncate(n as usize),
            None => {}
        }
        Value::List(items)
    }
}

fn value_piece(text: String, quoted: bool) -> Piece {
    if quoted { Piece::quoted(text) } else { Piece::expanded(text) }
}

/// `${x:-N}` with a digits-only word on a set value: the last `N` characters.
fn take_last_chars(value: &str, word: &str) -> Option<String> {
    if word.is_empty() || !word.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let n: usize = word.parse().ok()?;
    let len = value.chars().count();
    if n == 0 || n >= len {
        return Some(value.to_string());
    }
    Some(value.chars().skip(len - n).collect())
}

/// Resolves `offset`/`length` against a sequence of `len` elements.
fn slice_range(len: usize, offset: i64, length: Option<i64>) -> Option<(usize, usize)> {
    let len = len as i64;
    let start = if offset < 0 { len + offset } else { offset };
    if start < 0 || start > len {
        return None;
    }
    let end = match length {
        None => len,
        Some(l) if l < 0 => len + l,
        Some(l) => start.saturating_add(l).min(len),
    };
    if end < start {
        return None;
    }
    Some((start as usize, end as usize))
}

fn convert_case(s: &str, all: bool, upper: bool) -> String {
    let change = |c: char| -> String {
        if upper { c.to_uppercase().collect() } else { c.to_lowercase().collect() }
    };
    if all {
        return s.chars().map(change).collect();
    }
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => change(first) + chars.as_str(),
        None => String::new(),
    }
}

fn identifiers(expr: &str) -> Vec<&str> {
    let mut names = Vec::new();
    let bytes = expr.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'_' || bytes[i].is_ascii_alphabetic() {
            let start = i;
            while i < bytes.len() && (bytes[i] == b'_' || bytes[i].is_ascii_alphanumeric()) {
                i += 1;
            }
            names.push(&expr[start..i]);
        } else if bytes[i].is_ascii_digit() {
            // skip numeric literals such as 0x1f
            while i < bytes.len() && (bytes[i].is_ascii_alphanumeric() || bytes[i] == b'#') {
                i += 1;
            }
        } else {
            i += 1;
        }
    }
    names
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::tests::MockExecutor;
    use pretty_assertions::assert_eq;

    fn env() -> Environment {
        let mut env = Environment::empty();
        env.set("FOO", "hello world");
        env.set("EMPTY", "");
        env.set("HOME", "/home/tester");
        env
    }

    fn words(env: &mut Environment, input: &str) -> Vec<String> {
        let mut exec = MockExecutor::new();
        let mut ex = Expander::new(env, &mut exec);
        ex.expand_words(&[Word::new(input)]).unwrap()
    }

    fn one(env: &mut Environment, input: &str) -> String {
        let mut exec = MockExecutor::new();
        Expander::new(env, &mut exec).expand_word_string(input).unwrap()
    }

    fn err(env: &mut Environment, input: &str) -> ExpandError {
        let mut exec = MockExecutor::new();
        Expander::new(env, &mut exec).expand_word_string(input).unwrap_err()
    }

    #[test]
    fn test_single_quotes_are_verbatim() {
        let mut env = env();
        assert_eq!(words(&mut env, "'$FOO *  ${x:-y}'"), vec!["$FOO *  ${x:-y}"]);
    }

    #[test]
    fn test_default_and_assign_laws() {
        let mut env = env();
        assert_eq!(one(&mut env, "${X:-d}"), "d");
        assert!(!env.is_set("X"));
        assert_eq!(one(&mut env, "${X:=d}"), "d");
        assert_eq!(env.get("X"), Some("d"));
        assert_eq!(one(&mut env, "${EMPTY:-d}"), "d");
        assert_eq!(one(&mut env, "${EMPTY-d}"), "");
        assert_eq!(one(&mut env, "${FOO+alt}"), "alt");
        assert_eq!(one(&mut env, "${NOPE+alt}"), "");
        assert_eq!(one(&mut env, "${EMPTY:+alt}"), "");
    }

    #[test]
    fn test_substring_law() {
        let mut env = env();
        assert_eq!(one(&mut env, "${FOO:0:5}"), "hello");
        assert_eq!(one(&mut env, "${FOO:6}"), "world");
        assert_eq!(one(&mut env, "${FOO:-5}"), "world");
        assert_eq!(one(&mut env, "${FOO: -5}"), "world");
        assert_eq!(one(&mut env, "${FOO: -50}"), "");
        assert_eq!(one(&mut env, "${FOO:100}"), "");
        assert_eq!(one(&mut env, "${FOO:abc}"), "");
        assert_eq!(one(&mut env, "${FOO:1:-6}"), "ello");
        env.set("n", "2");
        assert_eq!(one(&mut env, "${FOO:n:n+1}"), "llo");
    }

    #[test]
    fn test_length_and_case() {
        let mut env = env();
        assert_eq!(one(&mut env, "${#FOO}"), "11");
        assert_eq!(one(&mut env, "${#UNSET}"), "0");
        assert_eq!(one(&mut env, "${FOO^}"), "Hello world");
        assert_eq!(one(&mut env, "${FOO^^}"), "HELLO WORLD");
        env.set("UP", "HELLO");
        assert_eq!(one(&mut env, "${UP,}"), "hELLO");
        assert_eq!(one(&mut env, "${UP,,}"), "hello");
        let upper = one(&mut env, "${FOO^^}");
        env.set("ONCE", &upper);
        assert_eq!(one(&mut env, "${ONCE^^}"), "HELLO WORLD");
    }

    #[test]
    fn test_prefix_suffix_removal() {
        let mut env = env();
        env.set("P", "/usr/local/bin");
        assert_eq!(one(&mut env, "${P##*/}"), "bin");
        assert_eq!(one(&mut env, "${P#/usr}"), "/local/bin");
        assert_eq!(one(&mut env, "${P%/*}"), "/usr/local");
        assert_eq!(one(&mut env, "${P%%l*}"), "/usr/");
        assert_eq!(one(&mut env, r#"${P#"/usr/*"}"#), "/usr/local/bin");
    }

    #[test]
    fn test_error_operator() {
        let mut env = env();
        assert_eq!(
            err(&mut env, "${NOPE:?must be set}"),
            ExpandError::ParameterNull {
                name: "NOPE".into(),
                message: "must be set".into()
            }
        );
        assert_eq!(one(&mut env, "${FOO?x}"), "hello world");
    }

    #[test]
    fn test_nounset() {
        let mut env = env();
        assert_eq!(one(&mut env, "$NOPE"), "");
        env.options.nounset = true;
        assert_eq!(err(&mut env, "$NOPE"), ExpandError::UnboundVariable("NOPE".into()));
        assert_eq!(one(&mut env, "${NOPE:-ok}"), "ok");
        assert_eq!(one(&mut env, "$@"), "");
    }

    #[test]
    fn test_field_splitting_only_unquoted() {
        let mut env = env();
        assert_eq!(words(&mut env, "$FOO"), vec!["hello", "world"]);
        assert_eq!(words(&mut env, "\"$FOO\""), vec!["hello world"]);
        assert_eq!(words(&mut env, "$EMPTY"), Vec::<String>::new());
        assert_eq!(words(&mut env, "\"$EMPTY\""), vec![""]);
        assert_eq!(words(&mut env, "\"${NOPE+x}\""), vec![""]);
        env.set("IFS", ":");
        env.set("PATHS", "a:b::c");
        assert_eq!(words(&mut env, "$PATHS"), vec!["a", "b", "", "c"]);
    }

    #[test]
    fn test_positional_lists() {
        let mut env = env();
        env.positional = vec!["a b".into(), "".into(), "c".into()];
        assert_eq!(words(&mut env, "\"$@\""), vec!["a b", "", "c"]);
        assert_eq!(words(&mut env, "$@"), vec!["a", "b", "c"]);
        assert_eq!(words(&mut env, "\"$*\""), vec!["a b  c"]);
        assert_eq!(words(&mut env, "\"x$@y\""), vec!["xa b", "", "cy"]);
        assert_eq!(one(&mut env, "$#"), "3");
        assert_eq!(words(&mut env, "\"${@:2}\""), vec!["", "c"]);
        env.positional.clear();
        assert_eq!(words(&mut env, "\"$@\""), Vec::<String>::new());
    }

    #[test]
    fn test_arrays() {
        let mut env = env();
        env.arrays.set_indexed("arr", 5, "five");
        env.arrays.set_indexed("arr", 1, "one");
        env.arrays.set_indexed("arr", 10, "ten");
        assert_eq!(words(&mut env, "${!arr[@]}"), vec!["1", "5", "10"]);
        assert_eq!(words(&mut env, "\"${arr[@]}\""), vec!["one", "five", "ten"]);
        assert_eq!(one(&mut env, "${#arr[@]}"), "3");
        assert_eq!(one(&mut env, "${#arr}"), "3");
        assert_eq!(one(&mut env, "${arr[5]}"), "five");
        assert_eq!(one(&mut env, "${arr[2+3]}"), "five");
        assert_eq!(words(&mut env, "${arr[@]:1:1}"), vec!["one"]);
        assert_eq!(words(&mut env, "${arr[@]:2}"), vec!["five", "ten"]);
        assert_eq!(words(&mut env, "${arr[@]: -1}"), vec!["ten"]);
        assert_eq!(words(&mut env, "${arr[@]:0:-1}"), vec!["one", "five"]);

        env.arrays.declare_associative("m");
        env.arrays.set_associative("m", "first key", "1").unwrap();
        env.arrays.set_associative("m", "b", "2").unwrap();
        assert_eq!(one(&mut env, "${m[\"first key\"]}"), "1");
        assert_eq!(words(&mut env, "\"${(k)m}\""), vec!["first key", "b"]);
        assert_eq!(words(&mut env, "${(v)m}"), vec!["1", "2"]);
        assert_eq!(one(&mut env, "${m[missing]:-none}"), "none");
        assert_eq!(words(&mut env, "${m[@]:0:2}"), Vec::<String>::new());
    }

    #[test]
    fn test_command_and_arithmetic_substitution() {
        let mut env = env();
        env.set("VAR", "5");
        let mut exec = MockExecutor::new().with_output("date", "today\n\n");
        let mut ex = Expander::new(&mut env, &mut exec);
        assert_eq!(ex.expand_word_string("$(date)!").unwrap(), "today!");
        assert_eq!(ex.expand_word_string("`date`").unwrap(), "today");
        assert_eq!(ex.expand_word_string("$((VAR*3))").unwrap(), "15");
        assert_eq!(ex.expand_word_string("$(($VAR + 1))").unwrap(), "6");
        assert!(matches!(
            ex.expand_word_string("$((1/0))"),
            Err(ExpandError::Arithmetic(_))
        ));
        assert_eq!(exec.captured, vec!["date", "date"]);
    }

    #[test]
    fn test_tilde() {
        let mut env = env();
        env.set("OLDPWD", "/prev");
        assert_eq!(words(&mut env, "~"), vec!["/home/tester"]);
        assert_eq!(words(&mut env, "~/src"), vec!["/home/tester/src"]);
        assert_eq!(words(&mut env, "~-"), vec!["/prev"]);
        assert_eq!(words(&mut env, "'~'"), vec!["~"]);
        assert_eq!(words(&mut env, "a~"), vec!["a~"]);
        let mut exec = MockExecutor::new();
        let value = Expander::new(&mut env, &mut exec)
            .expand_assignment_value("~/a:~/b")
            .unwrap();
        assert_eq!(value, "/home/tester/a:/home/tester/b");
    }

    #[test]
    fn test_brace_then_glob_no_match() {
        let mut env = env();
        assert_eq!(words(&mut env, "x{a,b}"), vec!["xa", "xb"]);
        assert_eq!(words(&mut env, "*.nonexistent-ext-zzz"), vec!["*.nonexistent-ext-zzz"]);
        assert_eq!(words(&mut env, "\"{a,b}\""), vec!["{a,b}"]);
    }

    #[test]
    fn test_heredoc_and_redirect_targets() {
        let mut env = env();
        let mut exec = MockExecutor::new();
        let mut ex = Expander::new(&mut env, &mut exec);
        assert_eq!(ex.expand_heredoc("say \"$FOO\" $((1+1))\n").unwrap(), "say \"hello world\" 2\n");
        assert_eq!(ex.expand_redirect_target("out.txt").unwrap(), "out.txt");
        assert!(matches!(
            ex.expand_redirect_target("$FOO"),
            Err(ExpandError::AmbiguousRedirect(_))
        ));
    }
}
