//! Quote-aware scanning over raw shell text.
//!
//! Each function receives the index of an opening character and returns the
//! index just past its closing counterpart, or `None` when input runs out first.

pub(crate) fn skip_single_quoted(chars: &[char], pos: usize) -> Option<usize> {
    let mut i = pos + 1;
    while i < chars.len() {
        if chars[i] == '\'' {
            return Some(i + 1);
        }
        i += 1;
    }
    None
}

/// `$'...'` strings, where a backslash escapes the next character.
pub(crate) fn skip_ansi_quoted(chars: &[char], pos: usize) -> Option<usize> {
    let mut i = pos + 1;
    while i < chars.len() {
        match chars[i] {
            '\\' => i += 2,
            '\'' => return Some(i + 1),
            _ => i += 1,
        }
    }
    None
}

pub(crate) fn skip_double_quoted(chars: &[char], pos: usize) -> Option<usize> {
    let mut i = pos + 1;
    while i < chars.len() {
        match chars[i] {
            '\\' => i += 2,
            '"' => return Some(i + 1),
            '`' => i = skip_backtick(chars, i)?,
            '$' => i = skip_dollar(chars, i)?,
            _ => i += 1,
        }
    }
    None
}

pub(crate) fn skip_backtick(chars: &[char], pos: usize) -> Option<usize> {
    let mut i = pos + 1;
    while i < chars.len() {
        match chars[i] {
            '\\' => i += 2,
            '`' => return Some(i + 1),
            _ => i += 1,
        }
    }
    None
}

/// `chars[pos]` is `$`. A `$` that starts no group spans one character.
pub(crate) fn skip_dollar(chars: &[char], pos: usize) -> Option<usize> {
    match chars.get(pos + 1) {
        Some('(') => skip_group(chars, pos + 1, '(', ')'),
        Some('{') => skip_group(chars, pos + 1, '{', '}'),
        _ => Some(pos + 1),
    }
}

/// Balanced `open`/`close` group starting at `pos`, skipping quoted text.
pub(crate) fn skip_group(chars: &[char], pos: usize, open: char, close: char) -> Option<usize> {
    let mut depth = 0usize;
    let mut i = pos;
    while i < chars.len() {
        let c = chars[i];
        match c {
            '\\' => {
                i += 2;
                continue;
            }
            '\'' => {
                i = skip_single_quoted(chars, i)?;
                continue;
            }
            '"' => {
                i = skip_double_quoted(chars, i)?;
                continue;
            }
            '`' => {
                i = skip_backtick(chars, i)?;
                continue;
            }
            _ => {}
        }
        if c == open {
            depth += 1;
        } else if c == close {
            depth = depth.saturating_sub(1);
            if depth == 0 {
                return Some(i + 1);
            }
        }
        i += 1;
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chars(s: &str) -> Vec<char> {
        s.chars().collect()
    }

    #[test]
    fn group_skips_nested_parens_and_quotes() {
        let c = chars("(echo \")\" $(date) 'x)') tail");
        assert_eq!(skip_group(&c, 0, '(', ')'), Some(23));
    }

    #[test]
    fn unterminated_group_is_none() {
        assert_eq!(skip_group(&chars("(echo (a)"), 0, '(', ')'), None);
        assert_eq!(skip_double_quoted(&chars("\"abc"), 0), None);
    }

    #[test]
    fn double_quote_with_escaped_quote() {
        let c = chars(r#""a\"b" rest"#);
        assert_eq!(skip_double_quoted(&c, 0), Some(6));
    }
}
