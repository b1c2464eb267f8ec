//! Splits raw word text into quoted and expandable parts.

use crate::expander::param::{parse_param, ParamExpr};
use crate::expander::ExpandError;
use crate::lexer::scan;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WordPart {
    /// Unquoted text.
    Literal(String),
    /// Text protected from every expansion: `'...'`, `$'...'` and `\c`.
    Quoted(String),
    DoubleQuoted(Vec<WordPart>),
    Param(ParamExpr),
    CommandSubst(String),
    Arith(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Unquoted,
    DoubleQuoted,
    /// Here-document bodies: like double quotes, but `"` is an ordinary character.
    HereDoc,
}

fn unterminated(what: &str) -> ExpandError {
    ExpandError::Syntax(format!("unterminated {what}"))
}

fn collect(chars: &[char]) -> String {
    chars.iter().collect()
}

pub fn parse_word(text: &str, mode: Mode) -> Result<Vec<WordPart>, ExpandError> {
    let chars: Vec<char> = text.chars().collect();
    let mut parts = Vec::new();
    let mut lit = String::new();
    let mut i = 0;

    macro_rules! flush {
        () => {
            if !lit.is_empty() {
                parts.push(WordPart::Literal(std::mem::take(&mut lit)));
            }
        };
    }

    while i < chars.len() {
        let c = chars[i];
        match c {
            '\'' if mode == Mode::Unquoted => {
                let end = scan::skip_single_quoted(&chars, i).ok_or_else(|| unterminated("quote"))?;
                flush!();
                parts.push(WordPart::Quoted(collect(&chars[i + 1..end - 1])));
                i = end;
            }
            '"' if mode == Mode::Unquoted => {
                let end = scan::skip_double_quoted(&chars, i).ok_or_else(|| unterminated("quote"))?;
                flush!();
                let inner = collect(&chars[i + 1..end - 1]);
                parts.push(WordPart::DoubleQuoted(parse_word(&inner, Mode::DoubleQuoted)?));
                i = end;
            }
            '\\' => {
                match (mode, chars.get(i + 1).copied()) {
                    (_, None) => lit.push('\\'),
                    (_, Some('\n')) => {}
                    (Mode::Unquoted, Some(next)) => {
                        flush!();
                        parts.push(WordPart::Quoted(next.to_string()));
                    }
                    (Mode::DoubleQuoted, Some(next)) if matches!(next, '$' | '`' | '"' | '\\') => lit.push(next),
                    (Mode::HereDoc, Some(next)) if matches!(next, '$' | '`' | '\\') => lit.push(next),
                    (_, Some(next)) => {
                        lit.push('\\');
                        lit.push(next);
                    }
                }
                i += 2;
            }
            '$' => {
                let (part, end) = parse_dollar(&chars, i, mode)?;
                match part {
                    Some(part) => {
                        flush!();
                        parts.push(part);
                    }
                    None => lit.push('$'),
                }
                i = end;
            }
            '`' => {
                let end = scan::skip_backtick(&chars, i).ok_or_else(|| unterminated("backquote"))?;
                flush!();
                parts.push(WordPart::CommandSubst(unescape_backticks(&chars[i + 1..end - 1], mode)));
                i = end;
            }
            _ => {
                lit.push(c);
                i += 1;
            }
        }
    }
    flush!();
    Ok(parts)
}

fn is_special_param(c: char) -> bool {
    matches!(c, '@' | '*' | '#' | '?' | '$' | '!' | '-' | '0'..='9')
}

/// Parses the construct starting at the `$` in `chars[i]`.
/// Returns `None` for a `$` that introduces nothing.
fn parse_dollar(chars: &[char], i: usize, mode: Mode) -> Result<(Option<WordPart>, usize), ExpandError> {
    match chars.get(i + 1).copied() {
        Some('\'') if mode == Mode::Unquoted => {
            let end = scan::skip_ansi_quoted(chars, i + 1).ok_or_else(|| unterminated("quote"))?;
            let decoded = decode_escapes(&collect(&chars[i + 2..end - 1]), EscapeStyle::Ansi).0;
            Ok((Some(WordPart::Quoted(decoded)), end))
        }
        Some('(') => {
            let end = scan::skip_group(chars, i + 1, '(', ')').ok_or_else(|| unterminated("$("))?;
            let inner = &chars[i + 2..end - 1];
            let is_arith = inner.len() >= 2
                && inner[0] == '('
                && inner[inner.len() - 1] == ')'
                && scan::skip_group(inner, 0, '(', ')') == Some(inner.len());
            let part = if is_arith {
                WordPart::Arith(collect(&inner[1..inner.len() - 1]))
            } else {
                WordPart::CommandSubst(collect(inner))
            };
            Ok((Some(part), end))
        }
        Some('{') => {
            let end = scan::skip_group(chars, i + 1, '{', '}').ok_or_else(|| unterminated("${"))?;
            let inner = collect(&chars[i + 2..end - 1]);
            Ok((Some(WordPart::Param(parse_param(&inner)?)), end))
        }
        Some(c) if is_special_param(c) => Ok((Some(WordPart::Param(ParamExpr::plain(c.to_string()))), i + 2)),
        Some(c) if c == '_' || c.is_ascii_alphabetic() => {
            let mut j = i + 1;
            while j < chars.len() && (chars[j] == '_' || chars[j].is_ascii_alphanumeric()) {
                j += 1;
            }
            Ok((Some(WordPart::Param(ParamExpr::plain(collect(&chars[i + 1..j])))), j))
        }
        _ => Ok((None, i + 1)),
    }
}

fn unescape_backticks(chars: &[char], mode: Mode) -> String {
    let mut out = String::new();
    let mut i = 0;
    while i < chars.len() {
        if chars[i] == '\\' {
            if let Some(&next) = chars.get(i + 1) {
                if matches!(next, '$' | '`' | '\\') || (next == '"' && mode == Mode::DoubleQuoted) {
                    out.push(next);
                    i += 2;
                    continue;
                }
            }
        }
        out.push(chars[i]);
        i += 1;
    }
    out
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EscapeStyle {
    /// `$'...'` strings.
    Ansi,
    /// `echo -e`, `printf` formats and `%b`: octal is `\0NNN`, `\c` stops output.
    Echo,
}

/// Decodes backslash escapes. The flag reports a `\c` that ends output.
pub fn decode_escapes(s: &str, style: EscapeStyle) -> (String, bool) {
    let chars: Vec<char> = s.chars().collect();
    let mut out = String::new();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        if c != '\\' || i + 1 >= chars.len() {
            out.push(c);
            i += 1;
            continue;
        }
        let e = chars[i + 1];
        i += 2;
        match e {
            'n' => out.push('\n'),
            't' => out.push('\t'),
            'r' => out.push('\r'),
            'a' => out.push('\x07'),
            'b' => out.push('\x08'),
            'e' | 'E' => out.push('\x1b'),
            'f' => out.push('\x0c'),
            'v' => out.push('\x0b'),
            '\\' => out.push('\\'),
            '\'' if style == EscapeStyle::Ansi => out.push('\''),
            '"' if style == EscapeStyle::Ansi => out.push('"'),
            'c' if style == EscapeStyle::Echo => return (out, true),
            'x' => {
                let (value, used) = read_digits(&chars[i..], 16, 2);
                if used == 0 {
                    out.push_str("\\x");
                } else {
                    push_code(&mut out, value);
                    i += used;
                }
            }
            'u' | 'U' => {
                let max = if e == 'u' { 4 } else { 8 };
                let (value, used) = read_digits(&chars[i..], 16, max);
                if used == 0 {
                    out.push('\\');
                    out.push(e);
                } else {
                    push_code(&mut out, value);
                    i += used;
                }
            }
            '0' if style == EscapeStyle::Echo => {
                let (value, used) = read_digits(&chars[i..], 8, 3);
                push_code(&mut out, value);
                i += used;
            }
            '0'..='7' => {
                let (value, used) = read_digits(&chars[i - 1..], 8, 3);
                push_code(&mut out, value);
                i += used - 1;
            }
            other => {
                out.push('\\');
                out.push(other);
            }
        }
    }
    (out, false)
}

fn read_digits(chars: &[char], radix: u32, max: usize) -> (u32, usize) {
    let mut value = 0u32;
    let mut used = 0;
    for &c in chars.iter().take(max) {
        match c.to_digit(radix) {
            Some(d) => {
                value = value * radix + d;
                used += 1;
            }
            None => break,
        }
    }
    (value, used)
}

fn push_code(out: &mut String, value: u32) {
    if let Some(c) = char::from_u32(value) {
        out.push(c);
    }
}
