//! `$(( ))` integer arithmetic with C precedence.
//!
//! The input has already been through parameter and command substitution;
//! what remains are numbers, variable names and operators. All arithmetic is
//! 64-bit and wraps on overflow.

use tracing::trace;

use crate::arrays::ArrayKind;
use crate::environment::Environment;
use crate::expander::ExpandError;

const OPERATORS: &[&str] = &[
    "<<=", ">>=", "**", "<<", ">>", "<=", ">=", "==", "!=", "&&", "||", "++", "--", "+=", "-=", "*=", "/=", "%=",
    "&=", "^=", "|=", "+", "-", "*", "/", "%", "<", ">", "&", "^", "|", "!", "~", "=", "?", ":", ",", "(", ")",
    "[", "]",
];

const ASSIGN_OPS: &[&str] = &["=", "+=", "-=", "*=", "/=", "%=", "<<=", ">>=", "&=", "^=", "|="];

const BINARY_LEVELS: &[&[&str]] = &[
    &["|"],
    &["^"],
    &["&"],
    &["==", "!="],
    &["<", ">", "<=", ">="],
    &["<<", ">>"],
    &["+", "-"],
    &["*", "/", "%"],
];

// Variables whose values are themselves expressions are followed this deep.
const MAX_INDIRECTION: usize = 16;

#[derive(Debug, Clone, PartialEq)]
enum Tok {
    Num(i64),
    Ident(String),
    Op(&'static str),
}

#[derive(Debug, Clone)]
struct Spanned {
    tok: Tok,
    start: usize,
    end: usize,
}

#[derive(Debug, Clone)]
enum Subscript {
    Index(i64),
    Key(String),
}

#[derive(Debug, Clone)]
struct Lvalue {
    name: String,
    subscript: Option<Subscript>,
}

pub fn evaluate(expr: &str, env: &mut Environment) -> Result<i64, ExpandError> {
    evaluate_nested(expr, env, 0)
}

fn evaluate_nested(expr: &str, env: &mut Environment, depth: usize) -> Result<i64, ExpandError> {
    trace!(expr, "arithmetic");
    let tokens = tokenize(expr)?;
    if tokens.is_empty() {
        return Ok(0);
    }
    let mut parser = ArithParser {
        src: expr,
        tokens,
        pos: 0,
        eval: true,
        depth,
        env,
    };
    let value = parser.comma()?;
    if let Some(extra) = parser.tokens.get(parser.pos) {
        return Err(parser.error(&format!("syntax error in expression (error token is \"{}\")", &expr[extra.start..])));
    }
    Ok(value)
}

fn tokenize(src: &str) -> Result<Vec<Spanned>, ExpandError> {
    let bytes = src.as_bytes();
    let mut tokens = Vec::new();
    let mut i = 0;
    while i < bytes.len() {
        let c = bytes[i] as char;
        if c.is_ascii_whitespace() {
            i += 1;
            continue;
        }
        let start = i;
        if c.is_ascii_digit() {
            while i < bytes.len() && (bytes[i].is_ascii_alphanumeric() || matches!(bytes[i], b'#' | b'_' | b'@')) {
                i += 1;
            }
            let value = parse_number(&src[start..i])
                .ok_or_else(|| ExpandError::Arithmetic(format!("{}: value too great for base", &src[start..i])))?;
            tokens.push(Spanned { tok: Tok::Num(value), start, end: i });
        } else if c == '_' || c.is_ascii_alphabetic() {
            while i < bytes.len() && (bytes[i] == b'_' || bytes[i].is_ascii_alphanumeric()) {
                i += 1;
            }
            tokens.push(Spanned {
                tok: Tok::Ident(src[start..i].to_string()),
                start,
                end: i,
            });
        } else {
            let rest = &src[i..];
            let op = OPERATORS
                .iter()
                .find(|op| rest.starts_with(**op))
                .ok_or_else(|| ExpandError::Arithmetic(format!("{src}: syntax error: invalid arithmetic operator (error token is \"{rest}\")")))?;
            i += op.len();
            tokens.push(Spanned { tok: Tok::Op(op), start, end: i });
        }
    }
    Ok(tokens)
}

/// Parses `123`, `0x1f`, `017` and `base#digits` (bases 2 to 36).
fn parse_number(text: &str) -> Option<i64> {
    let (radix, digits) = if let Some((base, digits)) = text.split_once('#') {
        let base: u32 = base.parse().ok()?;
        if !(2..=36).contains(&base) {
            return None;
        }
        (base, digits)
    } else if let Some(hex) = text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        (16, hex)
    } else if text.len() > 1 && text.starts_with('0') {
        (8, &text[1..])
    } else {
        (10, text)
    };
    if digits.is_empty() {
        return None;
    }
    let mut value: i64 = 0;
    for c in digits.chars() {
        let d = c.to_digit(radix)?;
        value = value.wrapping_mul(radix as i64).wrapping_add(d as i64);
    }
    Some(value)
}

struct ArithParser<'a, 'e> {
    src: &'a str,
    tokens: Vec<Spanned>,
    pos: usize,
    // False while parsing the branch a short-circuit skips.
    eval: bool,
    depth: usize,
    env: &'e mut Environment,
}

impl ArithParser<'_, '_> {
    fn error(&self, msg: &str) -> ExpandError {
        ExpandError::Arithmetic(format!("{}: {}", self.src.trim(), msg))
    }

    fn peek(&self) -> Option<&Tok> {
        self.tokens.get(self.pos).map(|t| &t.tok)
    }

    fn peek_op(&self) -> Option<&'static str> {
        match self.peek() {
            Some(Tok::Op(op)) => Some(op),
            _ => None,
        }
    }

    fn eat(&mut self, op: &str) -> bool {
        if self.peek_op() == Some(op) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, op: &str) -> Result<(), ExpandError> {
        if self.eat(op) {
            Ok(())
        } else {
            Err(self.error(&format!("syntax error: `{op}' expected")))
        }
    }

    /// Parses `sub` with evaluation forced off, then restores the flag.
    fn skipping<T>(&mut self, sub: impl FnOnce(&mut Self) -> Result<T, ExpandError>) -> Result<T, ExpandError> {
        let saved = self.eval;
        self.eval = false;
        let result = sub(self);
        self.eval = saved;
        result
    }

    fn comma(&mut self) -> Result<i64, ExpandError> {
        let mut value = self.assign()?;
        while self.eat(",") {
            value = self.assign()?;
        }
        Ok(value)
    }

    fn assign(&mut self) -> Result<i64, ExpandError> {
        if matches!(self.peek(), Some(Tok::Ident(_))) {
            let start = self.pos;
            let is_assignment = self.skipping(|p| p.lvalue()).is_ok()
                && self.peek_op().is_some_and(|op| ASSIGN_OPS.contains(&op));
            self.pos = start;
            if is_assignment {
                let target = self.lvalue()?;
                let op = self.peek_op().unwrap_or("=");
                self.pos += 1;
                let rhs = self.assign()?;
                let value = if op == "=" {
                    rhs
                } else {
                    let current = self.read(&target)?;
                    self.apply(&op[..op.len() - 1], current, rhs)?
                };
                self.write(&target, value)?;
                return Ok(value);
            }
        }
        self.ternary()
    }

    fn ternary(&mut self) -> Result<i64, ExpandError> {
        let cond = self.logical_or()?;
        if !self.eat("?") {
            return Ok(cond);
        }
        let taken = if cond != 0 { self.assign()? } else { self.skipping(|p| p.assign())? };
        self.expect(":")?;
        let other = if cond != 0 { self.skipping(|p| p.assign())? } else { self.assign()? };
        Ok(if cond != 0 { taken } else { other })
    }

    fn logical_or(&mut self) -> Result<i64, ExpandError> {
        let mut value = self.logical_and()?;
        while self.eat("||") {
            let rhs = if value != 0 {
                self.skipping(|p| p.logical_and())?
            } else {
                self.logical_and()?
            };
            value = (value != 0 || rhs != 0) as i64;
        }
        Ok(value)
    }

    fn logical_and(&mut self) -> Result<i64, ExpandError> {
        let mut value = self.binary(0)?;
        while self.eat("&&") {
            let rhs = if value == 0 {
                self.skipping(|p| p.binary(0))?
            } else {
                self.binary(0)?
            };
            value = (value != 0 && rhs != 0) as i64;
        }
        Ok(value)
    }

    fn binary(&mut self, level: usize) -> Result<i64, ExpandError> {
        let Some(ops) = BINARY_LEVELS.get(level) else {
            return self.power();
        };
        let mut value = self.binary(level + 1)?;
        while let Some(op) = self.peek_op().filter(|op| ops.contains(op)) {
            self.pos += 1;
            let rhs = self.binary(level + 1)?;
            value = self.apply(op, value, rhs)?;
        }
        Ok(value)
    }

    fn power(&mut self) -> Result<i64, ExpandError> {
        let base = self.unary()?;
        if self.eat("**") {
            let exp = self.power()?;
            return self.apply("**", base, exp);
        }
        Ok(base)
    }

    fn unary(&mut self) -> Result<i64, ExpandError> {
        match self.peek_op() {
            Some("+") => {
                self.pos += 1;
                self.unary()
            }
            Some("-") => {
                self.pos += 1;
                Ok(self.unary()?.wrapping_neg())
            }
            Some("!") => {
                self.pos += 1;
                Ok((self.unary()? == 0) as i64)
            }
            Some("~") => {
                self.pos += 1;
                Ok(!self.unary()?)
            }
            Some(op @ ("++" | "--")) => {
                self.pos += 1;
                let target = self.lvalue()?;
                let delta = if op == "++" { 1 } else { -1 };
                let value = self.read(&target)?.wrapping_add(delta);
                self.write(&target, value)?;
                Ok(value)
            }
            _ => self.postfix(),
        }
    }

    fn postfix(&mut self) -> Result<i64, ExpandError> {
        if !matches!(self.peek(), Some(Tok::Ident(_))) {
            return self.primary();
        }
        let target = self.lvalue()?;
        let value = self.read(&target)?;
        match self.peek_op() {
            Some(op @ ("++" | "--")) => {
                self.pos += 1;
                let delta = if op == "++" { 1 } else { -1 };
                self.write(&target, value.wrapping_add(delta))?;
                Ok(value)
            }
            _ => Ok(value),
        }
    }

    fn primary(&mut self) -> Result<i64, ExpandError> {
        match self.tokens.get(self.pos).map(|t| t.tok.clone()) {
            Some(Tok::Num(n)) => {
                self.pos += 1;
                Ok(n)
            }
            Some(Tok::Op("(")) => {
                self.pos += 1;
                let value = self.comma()?;
                self.expect(")")?;
                Ok(value)
            }
            Some(Tok::Ident(_)) => self.postfix(),
            Some(Tok::Op(op)) => Err(self.error(&format!("syntax error: operand expected (error token is \"{op}\")"))),
            None => Err(self.error("syntax error: operand expected")),
        }
    }

    fn lvalue(&mut self) -> Result<Lvalue, ExpandError> {
        let Some(Tok::Ident(name)) = self.peek().cloned() else {
            return Err(self.error("syntax error: variable name expected"));
        };
        self.pos += 1;
        if !self.eat("[") {
            return Ok(Lvalue { name, subscript: None });
        }
        let subscript = if self.env.arrays.kind(&name) == Some(ArrayKind::Associative) {
            let start = self.pos;
            let mut depth = 0usize;
            while let Some(tok) = self.peek() {
                match tok {
                    Tok::Op("[") => depth += 1,
                    Tok::Op("]") if depth == 0 => break,
                    Tok::Op("]") => depth -= 1,
                    _ => {}
                }
                self.pos += 1;
            }
            let key = match (self.tokens.get(start), self.pos.checked_sub(1).and_then(|i| self.tokens.get(i))) {
                (Some(first), Some(last)) if self.pos > start => self.src[first.start..last.end].to_string(),
                _ => String::new(),
            };
            Subscript::Key(key)
        } else {
            Subscript::Index(self.comma()?)
        };
        self.expect("]")?;
        Ok(Lvalue {
            name,
            subscript: Some(subscript),
        })
    }

    fn read(&mut self, target: &Lvalue) -> Result<i64, ExpandError> {
        if !self.eval {
            return Ok(0);
        }
        let raw = match &target.subscript {
            None => match self.env.get(&target.name) {
                Some(v) => Some(v.to_string()),
                None => self.env.arrays.get_index(&target.name, 0).map(str::to_string),
            },
            Some(Subscript::Key(key)) => self.env.arrays.get(&target.name, key).map(str::to_string),
            Some(Subscript::Index(i)) => {
                let index = self.env.arrays.resolve_index(&target.name, *i)?;
                self.env.arrays.get_index(&target.name, index).map(str::to_string)
            }
        };
        let raw = raw.unwrap_or_default();
        let text = raw.trim();
        if text.is_empty() {
            return Ok(0);
        }
        if let Some(n) = parse_number(text) {
            return Ok(n);
        }
        if self.depth < MAX_INDIRECTION && (crate::lexer::is_name(text) || text.starts_with('-')) {
            return evaluate_nested(text, self.env, self.depth + 1);
        }
        Err(self.error(&format!("{text}: syntax error: operand expected")))
    }

    fn write(&mut self, target: &Lvalue, value: i64) -> Result<(), ExpandError> {
        if !self.eval {
            return Ok(());
        }
        let text = value.to_string();
        match &target.subscript {
            None => self.env.set(&target.name, &text),
            Some(Subscript::Key(key)) => self.env.arrays.set_associative(&target.name, key, text)?,
            Some(Subscript::Index(i)) => {
                let index = self.env.arrays.resolve_index(&target.name, *i)?;
                self.env.arrays.set_indexed(&target.name, index, text);
            }
        }
        Ok(())
    }

    fn apply(&self, op: &str, a: i64, b: i64) -> Result<i64, ExpandError> {
        Ok(match op {
            "+" => a.wrapping_add(b),
            "-" => a.wrapping_sub(b),
            "*" => a.wrapping_mul(b),
            "/" | "%" if b == 0 => {
                if !self.eval {
                    return Ok(0);
                }
                return Err(self.error("division by 0"));
            }
            "/" => a.wrapping_div(b),
            "%" => a.wrapping_rem(b),
            "**" => {
                if b < 0 {
                    if !self.eval {
                        return Ok(0);
                    }
                    return Err(self.error("exponent less than 0"));
                }
                a.wrapping_pow(u32::try_from(b).unwrap_or(u32::MAX))
            }
            "<<" => a.wrapping_shl(b as u32),
            ">>" => a.wrapping_shr(b as u32),
            "&" => a & b,
            "|" => a | b,
            "^" => a ^ b,
            "==" => (a == b) as i64,
            "!=" => (a != b) as i64,
            "<" => (a < b) as i64,
            ">" => (a > b) as i64,
            "<=" => (a <= b) as i64,
            ">=" => (a >= b) as i64,
            _ => return Err(self.error(&format!("unknown operator `{op}'"))),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn eval(expr: &str) -> i64 {
        evaluate(expr, &mut Environment::empty()).unwrap()
    }

    #[test]
    fn test_precedence() {
        assert_eq!(eval("1 + 2 * 3"), 7);
        assert_eq!(eval("(1 + 2) * 3"), 9);
        assert_eq!(eval("2 ** 3 ** 2"), 512);
        assert_eq!(eval("-2 ** 2"), 4);
        assert_eq!(eval("1 << 4 | 1"), 17);
        assert_eq!(eval("5 > 3 && 2 > 1"), 1);
        assert_eq!(eval("0 || 0"), 0);
        assert_eq!(eval("1 ? 10 : 20"), 10);
        assert_eq!(eval("0 ? 10 : 1 ? 30 : 40"), 30);
        assert_eq!(eval("1, 2, 3"), 3);
        assert_eq!(eval("!0 + ~0"), 0);
    }

    #[test]
    fn test_division_truncates_toward_zero() {
        assert_eq!(eval("7 / 2"), 3);
        assert_eq!(eval("-7 / 2"), -3);
        assert_eq!(eval("-7 % 3"), -1);
    }

    #[test]
    fn test_literals() {
        assert_eq!(eval("0x1f"), 31);
        assert_eq!(eval("010"), 8);
        assert_eq!(eval("2#101"), 5);
        assert_eq!(eval("36#z"), 35);
        assert_eq!(eval(""), 0);
        assert_eq!(eval("   "), 0);
    }

    #[test]
    fn test_variables_and_assignment() {
        let mut env = Environment::empty();
        env.set("VAR", "5");
        assert_eq!(evaluate("VAR * 3", &mut env).unwrap(), 15);
        assert_eq!(evaluate("unset_name + 1", &mut env).unwrap(), 1);
        assert_eq!(evaluate("x = 4, x += 2", &mut env).unwrap(), 6);
        assert_eq!(env.get("x"), Some("6"));
        assert_eq!(evaluate("x++", &mut env).unwrap(), 6);
        assert_eq!(evaluate("++x", &mut env).unwrap(), 8);
        assert_eq!(evaluate("x <<= 1", &mut env).unwrap(), 16);
        env.set("ref", "VAR");
        assert_eq!(evaluate("ref + 1", &mut env).unwrap(), 6);
    }

    #[test]
    fn test_short_circuit_skips_side_effects() {
        let mut env = Environment::empty();
        assert_eq!(evaluate("0 && (y = 1)", &mut env).unwrap(), 0);
        assert_eq!(evaluate("1 || (y = 1)", &mut env).unwrap(), 1);
        assert_eq!(evaluate("1 ? 2 : (y = 3)", &mut env).unwrap(), 2);
        assert_eq!(env.get("y"), None);
        assert_eq!(evaluate("0 && 1 / 0", &mut env).unwrap(), 0);
    }

    #[test]
    fn test_array_elements() {
        let mut env = Environment::empty();
        env.arrays.assign_list("a", vec!["10".into(), "20".into()]);
        assert_eq!(evaluate("a[1] + a[0]", &mut env).unwrap(), 30);
        assert_eq!(evaluate("a[2] = a[1] * 2", &mut env).unwrap(), 40);
        assert_eq!(env.arrays.get("a", "2"), Some("40"));
        env.arrays.declare_associative("m");
        env.arrays.set_associative("m", "k", "7").unwrap();
        assert_eq!(evaluate("m[k] + 1", &mut env).unwrap(), 8);
    }

    #[test]
    fn test_errors() {
        let mut env = Environment::empty();
        assert!(matches!(evaluate("1 / 0", &mut env), Err(ExpandError::Arithmetic(_))));
        assert!(matches!(evaluate("5 % 0", &mut env), Err(ExpandError::Arithmetic(_))));
        assert!(matches!(evaluate("2 ** -1", &mut env), Err(ExpandError::Arithmetic(_))));
        assert!(matches!(evaluate("1 +", &mut env), Err(ExpandError::Arithmetic(_))));
        assert!(matches!(evaluate("1 2", &mut env), Err(ExpandError::Arithmetic(_))));
        assert!(matches!(evaluate("08", &mut env), Err(ExpandError::Arithmetic(_))));
        env.set("s", "hello world");
        assert!(matches!(evaluate("s + 1", &mut env), Err(ExpandError::Arithmetic(_))));
    }
}
