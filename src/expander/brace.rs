//! Brace expansion: `pre{a,b}post` and `{1..10..2}`.
//!
//! Operates on raw word text before any other expansion. Quoted regions and
//! `${...}`/`$(...)` constructs are never looked into.

use crate::lexer::scan;

const MAX_SEQUENCE: usize = 65536;

pub fn expand_braces(word: &str) -> Vec<String> {
    let chars: Vec<char> = word.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        match chars[i] {
            '\\' => i += 2,
            '\'' => match scan::skip_single_quoted(&chars, i) {
                Some(end) => i = end,
                None => break,
            },
            '"' => match scan::skip_double_quoted(&chars, i) {
                Some(end) => i = end,
                None => break,
            },
            '`' => match scan::skip_backtick(&chars, i) {
                Some(end) => i = end,
                None => break,
            },
            '$' if matches!(chars.get(i + 1), Some('{') | Some('(')) => {
                let (open, close) = if chars[i + 1] == '{' { ('{', '}') } else { ('(', ')') };
                match scan::skip_group(&chars, i + 1, open, close) {
                    Some(end) => i = end,
                    None => break,
                }
            }
            '{' => {
                if let Some(expanded) = expand_at(&chars, i) {
                    return expanded;
                }
                i += 1;
            }
            _ => i += 1,
        }
    }
    vec![word.to_string()]
}

/// Expands the brace group opening at `chars[open]`, if it forms one.
fn expand_at(chars: &[char], open: usize) -> Option<Vec<String>> {
    let (close, commas) = find_close(chars, open)?;
    let prefix: String = chars[..open].iter().collect();
    let suffix: String = chars[close + 1..].iter().collect();

    let alternatives: Vec<String> = if commas.is_empty() {
        let body: String = chars[open + 1..close].iter().collect();
        sequence(&body)?
    } else {
        let mut bounds = vec![open];
        bounds.extend(&commas);
        bounds.push(close);
        bounds.windows(2).map(|w| chars[w[0] + 1..w[1]].iter().collect()).collect()
    };

    let mut out = Vec::new();
    for alt in alternatives {
        out.extend(expand_braces(&format!("{prefix}{alt}{suffix}")));
    }
    Some(out)
}

/// Finds the `}` matching `chars[open]` and the positions of top-level commas.
fn find_close(chars: &[char], open: usize) -> Option<(usize, Vec<usize>)> {
    let mut commas = Vec::new();
    let mut depth = 0usize;
    let mut k = open + 1;
    while k < chars.len() {
        match chars[k] {
            '\\' => k += 2,
            '\'' => k = scan::skip_single_quoted(chars, k)?,
            '"' => k = scan::skip_double_quoted(chars, k)?,
            '`' => k = scan::skip_backtick(chars, k)?,
            '$' if chars.get(k + 1) == Some(&'{') => k = scan::skip_group(chars, k + 1, '{', '}')?,
            '$' if chars.get(k + 1) == Some(&'(') => k = scan::skip_group(chars, k + 1, '(', ')')?,
            '{' => {
                depth += 1;
                k += 1;
            }
            '}' if depth == 0 => return Some((k, commas)),
            '}' => {
                depth -= 1;
                k += 1;
            }
            ',' if depth == 0 => {
                commas.push(k);
                k += 1;
            }
            _ => k += 1,
        }
    }
    None
}

fn sequence(body: &str) -> Option<Vec<String>> {
    let parts: Vec<&str> = body.split("..").collect();
    let (start, end, step) = match parts.as_slice() {
        [start, end] => (*start, *end, None),
        [start, end, step] => (*start, *end, Some(step.parse::<i64>().ok()?)),
        _ => return None,
    };
    let step = step.map_or(1, |s: i64| s.unsigned_abs().max(1)) as usize;

    if let (Ok(a), Ok(b)) = (start.parse::<i64>(), end.parse::<i64>()) {
        let width = if is_padded(start) || is_padded(end) {
            start.len().max(end.len())
        } else {
            0
        };
        let count = (a.abs_diff(b) as usize) / step + 1;
        if count > MAX_SEQUENCE {
            return None;
        }
        let values = (0..count).map(|n| {
            let offset = (n * step) as i64;
            if a <= b { a + offset } else { a - offset }
        });
        return Some(values.map(|v| format!("{v:0width$}")).collect());
    }

    let mut a = start.chars();
    let mut b = end.chars();
    match (a.next(), a.next(), b.next(), b.next()) {
        (Some(a), None, Some(b), None) if a.is_ascii_alphabetic() && b.is_ascii_alphabetic() => {
            let (lo, hi) = (a as u32, b as u32);
            let count = (lo.abs_diff(hi) as usize) / step + 1;
            let chars = (0..count).filter_map(|n| {
                let offset = (n * step) as u32;
                char::from_u32(if lo <= hi { lo + offset } else { lo - offset })
            });
            Some(chars.map(String::from).collect())
        }
        _ => None,
    }
}

fn is_padded(n: &str) -> bool {
    let digits = n.strip_prefix('-').unwrap_or(n);
    digits.len() > 1 && digits.starts_with('0')
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn expand(s: &str) -> Vec<String> {
        expand_braces(s)
    }

    #[test]
    fn test_alternatives() {
        assert_eq!(expand("a{b,c,d}e"), vec!["abe", "ace", "ade"]);
        assert_eq!(expand("x{a,}y"), vec!["xay", "xy"]);
        assert_eq!(expand("{a,b}{1,2}"), vec!["a1", "a2", "b1", "b2"]);
    }

    #[test]
    fn test_nested() {
        assert_eq!(expand("{a,b{1,2}}"), vec!["a", "b1", "b2"]);
        assert_eq!(expand("{a}{b,c}"), vec!["{a}b", "{a}c"]);
    }

    #[test]
    fn test_sequences() {
        assert_eq!(expand("{1..5}"), vec!["1", "2", "3", "4", "5"]);
        assert_eq!(expand("{5..1..2}"), vec!["5", "3", "1"]);
        assert_eq!(expand("{1..10..3}"), vec!["1", "4", "7", "10"]);
        assert_eq!(expand("{01..03}"), vec!["01", "02", "03"]);
        assert_eq!(expand("{a..e}"), vec!["a", "b", "c", "d", "e"]);
        assert_eq!(expand("{c..a}"), vec!["c", "b", "a"]);
        assert_eq!(expand("{-2..1}"), vec!["-2", "-1", "0", "1"]);
    }

    #[test]
    fn test_literal_forms() {
        assert_eq!(expand("{}"), vec!["{}"]);
        assert_eq!(expand("{abc}"), vec!["{abc}"]);
        assert_eq!(expand("{1..a}"), vec!["{1..a}"]);
        assert_eq!(expand("'{a,b}'"), vec!["'{a,b}'"]);
        assert_eq!(expand(r"\{a,b}"), vec![r"\{a,b}"]);
        assert_eq!(expand("${x}"), vec!["${x}"]);
        assert_eq!(expand("{a,b"), vec!["{a,b"]);
    }

    #[test]
    fn test_quoted_alternatives_keep_quotes() {
        assert_eq!(expand(r#"{"a b",c}"#), vec![r#""a b""#, "c"]);
    }
}
