//! Pathname expansion and shell pattern matching, both backed by `glob`.

use glob::{MatchOptions, Pattern};
use tracing::trace;

use crate::expander::split::Field;

const PATHNAME_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: true,
};

const STRING_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: false,
    require_literal_leading_dot: false,
};

fn is_meta(c: char) -> bool {
    matches!(c, '*' | '?' | '[')
}

/// True when an unquoted part of the field contains a wildcard.
pub fn has_wildcards(field: &Field) -> bool {
    field.parts.iter().any(|(text, quoted)| !quoted && text.chars().any(is_meta))
}

/// Shell negation `[^...]` is spelled `[!...]` in glob patterns.
fn translate(unquoted: &str) -> String {
    unquoted.replace("[^", "[!")
}

/// Builds a glob pattern in which quoted characters only match themselves.
pub fn field_pattern(field: &Field) -> String {
    field
        .parts
        .iter()
        .map(|(text, quoted)| if *quoted { Pattern::escape(text) } else { translate(text) })
        .collect()
}

/// Expands a field against the filesystem. No match yields the field's text.
pub fn expand_pathname(field: &Field) -> Vec<String> {
    let literal = field.text();
    if !has_wildcards(field) {
        return vec![literal];
    }
    let pattern = field_pattern(field);
    let paths = match glob::glob_with(&pattern, PATHNAME_OPTIONS) {
        Ok(paths) => paths,
        Err(err) => {
            trace!(%pattern, %err, "invalid glob pattern");
            return vec![literal];
        }
    };
    let mut matches: Vec<String> = paths
        .filter_map(Result::ok)
        .map(|p| p.to_string_lossy().into_owned())
        .collect();
    if matches.is_empty() {
        return vec![literal];
    }
    matches.sort();
    matches
}

/// Matches `text` against a shell pattern as used by `case` and `${x#pat}`.
pub fn matches(pattern: &str, text: &str) -> bool {
    match Pattern::new(pattern) {
        Ok(p) => p.matches_with(text, STRING_OPTIONS),
        Err(_) => pattern == text,
    }
}

fn boundaries(s: &str) -> Vec<usize> {
    s.char_indices().map(|(i, _)| i).chain(std::iter::once(s.len())).collect()
}

pub fn remove_prefix(value: &str, pattern: &str, longest: bool) -> String {
    let mut cuts = boundaries(value);
    if longest {
        cuts.reverse();
    }
    for cut in cuts {
        if matches(pattern, &value[..cut]) {
            return value[cut..].to_string();
        }
    }
    value.to_string()
}

pub fn remove_suffix(value: &str, pattern: &str, longest: bool) -> String {
    let mut cuts = boundaries(value);
    if !longest {
        cuts.reverse();
    }
    for cut in cuts {
        if matches(pattern, &value[cut..]) {
            return value[..cut].to_string();
        }
    }
    value.to_string()
}
