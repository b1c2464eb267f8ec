//! `${...}` parameter expressions.

use crate::expander::ExpandError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParamOp {
    Plain,
    /// `${#x}`
    Length,
    /// `${x-w}` / `${x:-w}`
    Default { colon: bool, word: String },
    /// `${x=w}` / `${x:=w}`
    Assign { colon: bool, word: String },
    /// `${x+w}` / `${x:+w}`
    Alternative { colon: bool, word: String },
    /// `${x?w}` / `${x:?w}`
    Error { colon: bool, word: String },
    /// `${x#p}` / `${x##p}`
    RemovePrefix { longest: bool, pattern: String },
    /// `${x%p}` / `${x%%p}`
    RemoveSuffix { longest: bool, pattern: String },
    /// `${x:offset}` / `${x:offset:length}`
    Substring { offset: String, length: Option<String> },
    Upper { all: bool },
    Lower { all: bool },
    /// `${!arr[@]}` / `${(k)arr}`
    Keys,
    /// `${(v)arr}`
    Values,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParamExpr {
    pub name: String,
    pub subscript: Option<String>,
    pub op: ParamOp,
}

impl ParamExpr {
    pub fn plain(name: String) -> Self {
        ParamExpr {
            name,
            subscript: None,
            op: ParamOp::Plain,
        }
    }

    /// True for `$@`, `$*`, `${arr[@]}` and `${arr[*]}`.
    pub fn is_list(&self) -> bool {
        matches!(self.name.as_str(), "@" | "*") || matches!(self.subscript.as_deref(), Some("@") | Some("*"))
    }

    /// True when the list form joins into one word (`*` rather than `@`).
    pub fn is_star(&self) -> bool {
        self.name == "*" || self.subscript.as_deref() == Some("*")
    }

    pub fn display_name(&self) -> String {
        match &self.subscript {
            Some(sub) => format!("{}[{}]", self.name, sub),
            None => self.name.clone(),
        }
    }
}

/// Parses a name with optional subscript at the start of `s`.
/// Returns the name, the subscript and the number of bytes consumed.
fn parse_name(s: &str) -> Option<(String, Option<String>, usize)> {
    let first = s.chars().next()?;
    let name_len = if matches!(first, '@' | '*' | '#' | '?' | '$' | '!' | '-') {
        1
    } else if first.is_ascii_digit() {
        s.chars().take_while(|c| c.is_ascii_digit()).count()
    } else if first == '_' || first.is_ascii_alphabetic() {
        s.chars().take_while(|c| *c == '_' || c.is_ascii_alphanumeric()).count()
    } else {
        return None;
    };
    let name = s[..name_len].to_string();
    let rest = &s[name_len..];
    if rest.starts_with('[') && (first == '_' || first.is_ascii_alphabetic()) {
        let close = rest.find(']')?;
        let subscript = rest[1..close].to_string();
        return Some((name, Some(subscript), name_len + close + 1));
    }
    Some((name, None, name_len))
}

pub fn parse_param(inner: &str) -> Result<ParamExpr, ExpandError> {
    let bad = || ExpandError::BadSubstitution(format!("${{{inner}}}"));

    for (flag, op) in [("(k)", ParamOp::Keys), ("(v)", ParamOp::Values)] {
        if let Some(rest) = inner.strip_prefix(flag) {
            return match parse_name(rest) {
                Some((name, subscript, used)) if used == rest.len() => Ok(ParamExpr { name, subscript, op }),
                _ => Err(bad()),
            };
        }
    }

    if let Some(rest) = inner.strip_prefix('#') {
        if !rest.is_empty() {
            if let Some((name, subscript, used)) = parse_name(rest) {
                if used == rest.len() {
                    return Ok(ParamExpr {
                        name,
                        subscript,
                        op: ParamOp::Length,
                    });
                }
            }
        }
    }

    if let Some(rest) = inner.strip_prefix('!') {
        if !rest.is_empty() {
            return match parse_name(rest) {
                Some((name, Some(subscript), used))
                    if used == rest.len() && (subscript == "@" || subscript == "*") =>
                {
                    Ok(ParamExpr {
                        name,
                        subscript: Some(subscript),
                        op: ParamOp::Keys,
                    })
                }
                _ => Err(bad()),
            };
        }
    }

    let (name, subscript, used) = parse_name(inner).ok_or_else(bad)?;
    let op = parse_op(&inner[used..]).ok_or_else(bad)?;
    Ok(ParamExpr { name, subscript, op })
}

fn parse_op(rest: &str) -> Option<ParamOp> {
    if rest.is_empty() {
        return Some(ParamOp::Plain);
    }
    let word = |n: usize| rest[n..].to_string();
    let op = if let Some(body) = rest.strip_prefix(':') {
        match body.chars().next() {
            Some('-') => ParamOp::Default { colon: true, word: word(2) },
            Some('=') => ParamOp::Assign { colon: true, word: word(2) },
            Some('+') => ParamOp::Alternative { colon: true, word: word(2) },
            Some('?') => ParamOp::Error { colon: true, word: word(2) },
            _ => match body.split_once(':') {
                Some((offset, length)) => ParamOp::Substring {
                    offset: offset.to_string(),
                    length: Some(length.to_string()),
                },
                None => ParamOp::Substring {
                    offset: body.to_string(),
                    length: None,
                },
            },
        }
    } else if rest.starts_with("##") {
        ParamOp::RemovePrefix { longest: true, pattern: word(2) }
    } else if rest.starts_with("%%") {
        ParamOp::RemoveSuffix { longest: true, pattern: word(2) }
    } else if rest.starts_with("^^") {
        ParamOp::Upper { all: true }
    } else if rest.starts_with(",,") {
        ParamOp::Lower { all: true }
    } else {
        match rest.chars().next()? {
            '-' => ParamOp::Default { colon: false, word: word(1) },
            '=' => ParamOp::Assign { colon: false, word: word(1) },
            '+' => ParamOp::Alternative { colon: false, word: word(1) },
            '?' => ParamOp::Error { colon: false, word: word(1) },
            '#' => ParamOp::RemovePrefix { longest: false, pattern: word(1) },
            '%' => ParamOp::RemoveSuffix { longest: false, pattern: word(1) },
            '^' if rest.len() == 1 => ParamOp::Upper { all: false },
            ',' if rest.len() == 1 => ParamOp::Lower { all: false },
            _ => return None,
        }
    };
    if matches!(op, ParamOp::Upper { .. } | ParamOp::Lower { .. }) && rest.len() > 2 {
        return None;
    }
    Some(op)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn op(inner: &str) -> ParamOp {
        parse_param(inner).unwrap().op
    }

    #[test]
    fn test_plain_and_special_names() {
        assert_eq!(parse_param("HOME").unwrap(), ParamExpr::plain("HOME".into()));
        assert_eq!(parse_param("#").unwrap(), ParamExpr::plain("#".into()));
        assert_eq!(parse_param("10").unwrap().name, "10");
        assert_eq!(parse_param("arr[3]").unwrap().subscript.as_deref(), Some("3"));
    }

    #[test]
    fn test_length_forms() {
        assert_eq!(op("#x"), ParamOp::Length);
        let p = parse_param("#arr[@]").unwrap();
        assert_eq!((p.name.as_str(), p.op), ("arr", ParamOp::Length));
        assert_eq!(parse_param("#@").unwrap().name, "@");
    }

    #[test]
    fn test_operators() {
        assert_eq!(op("x:-d"), ParamOp::Default { colon: true, word: "d".into() });
        assert_eq!(op("x-"), ParamOp::Default { colon: false, word: String::new() });
        assert_eq!(op("x:=v"), ParamOp::Assign { colon: true, word: "v".into() });
        assert_eq!(op("x+alt"), ParamOp::Alternative { colon: false, word: "alt".into() });
        assert_eq!(op("x:?oops"), ParamOp::Error { colon: true, word: "oops".into() });
        assert_eq!(op("x##*/"), ParamOp::RemovePrefix { longest: true, pattern: "*/".into() });
        assert_eq!(op("x%.*"), ParamOp::RemoveSuffix { longest: false, pattern: ".*".into() });
        assert_eq!(op("x^^"), ParamOp::Upper { all: true });
        assert_eq!(op("x,"), ParamOp::Lower { all: false });
    }

    #[test]
    fn test_substring_forms() {
        assert_eq!(op("x:1:2"), ParamOp::Substring { offset: "1".into(), length: Some("2".into()) });
        assert_eq!(op("x: -3"), ParamOp::Substring { offset: " -3".into(), length: None });
    }

    #[test]
    fn test_key_and_value_listing() {
        let p = parse_param("!m[@]").unwrap();
        assert_eq!((p.name.as_str(), p.op), ("m", ParamOp::Keys));
        assert_eq!(op("(k)m"), ParamOp::Keys);
        assert_eq!(op("(v)m"), ParamOp::Values);
    }

    #[test]
    fn test_bad_substitution() {
        assert!(matches!(parse_param("x&y"), Err(ExpandError::BadSubstitution(_))));
        assert!(matches!(parse_param(""), Err(ExpandError::BadSubstitution(_))));
        assert!(matches!(parse_param("!x"), Err(ExpandError::BadSubstitution(_))));
    }
}
