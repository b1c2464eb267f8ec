//! IFS field splitting.

/// A run of expanded text and how it may be treated afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Piece {
    pub text: String,
    /// Protected from globbing. A quoted empty piece still creates a field.
    pub quoted: bool,
    /// Produced by an unquoted expansion, so subject to splitting.
    pub splittable: bool,
}

impl Piece {
    pub fn literal(text: impl Into<String>) -> Self {
        Piece {
            text: text.into(),
            quoted: false,
            splittable: false,
        }
    }

    pub fn quoted(text: impl Into<String>) -> Self {
        Piece {
            text: text.into(),
            quoted: true,
            splittable: false,
        }
    }

    pub fn expanded(text: impl Into<String>) -> Self {
        Piece {
            text: text.into(),
            quoted: false,
            splittable: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Chunk {
    Piece(Piece),
    /// Boundary between elements of `"$@"` and `"${arr[@]}"`.
    Break,
}

/// One field after splitting, remembering which characters were quoted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Field {
    pub parts: Vec<(String, bool)>,
}

impl Field {
    fn push(&mut self, text: &str, quoted: bool) {
        match self.parts.last_mut() {
            Some((last, q)) if *q == quoted => last.push_str(text),
            _ => self.parts.push((text.to_string(), quoted)),
        }
    }

    fn push_char(&mut self, c: char, quoted: bool) {
        let mut buf = [0u8; 4];
        self.push(c.encode_utf8(&mut buf), quoted);
    }

    pub fn text(&self) -> String {
        self.parts.iter().map(|(t, _)| t.as_str()).collect()
    }

    pub fn unquoted(text: impl Into<String>) -> Self {
        Field {
            parts: vec![(text.into(), false)],
        }
    }
}

struct Splitter<'a> {
    ifs: &'a str,
    fields: Vec<Field>,
    current: Field,
    started: bool,
    // The last field was ended by IFS whitespace, which absorbs one
    // following non-whitespace delimiter.
    ended_by_space: bool,
}

impl Splitter<'_> {
    fn finish_field(&mut self) {
        self.fields.push(std::mem::take(&mut self.current));
        self.started = false;
    }

    fn append(&mut self, text: &str, quoted: bool) {
        self.current.push(text, quoted);
        self.started = true;
        self.ended_by_space = false;
    }

    fn feed_splittable(&mut self, text: &str) {
        for c in text.chars() {
            if !self.ifs.contains(c) {
                self.current.push_char(c, false);
                self.started = true;
                self.ended_by_space = false;
            } else if is_ifs_space(c) {
                if self.started {
                    self.finish_field();
                    self.ended_by_space = true;
                }
            } else {
                if self.started || !self.ended_by_space {
                    self.finish_field();
                }
                self.ended_by_space = false;
            }
        }
    }
}

fn is_ifs_space(c: char) -> bool {
    matches!(c, ' ' | '\t' | '\n')
}

/// Splits expanded chunks into fields using `ifs`.
pub fn split_fields(chunks: Vec<Chunk>, ifs: &str) -> Vec<Field> {
    let mut s = Splitter {
        ifs,
        fields: Vec::new(),
        current: Field::default(),
        started: false,
        ended_by_space: false,
    };
    for chunk in chunks {
        match chunk {
            Chunk::Break => {
                if s.started {
                    s.finish_field();
                }
                s.ended_by_space = false;
            }
            Chunk::Piece(piece) if piece.quoted => s.append(&piece.text, true),
            Chunk::Piece(piece) if piece.splittable && !ifs.is_empty() => s.feed_splittable(&piece.text),
            Chunk::Piece(piece) => {
                if !piece.text.is_empty() {
                    s.append(&piece.text, false);
                }
            }
        }
    }
    if s.started {
        s.finish_field();
    }
    s.fields
}

/// Joins chunks into one field without splitting, for assignment values,
/// redirection targets and other single-word contexts.
pub fn join_fields(chunks: Vec<Chunk>) -> Field {
    let mut field = Field::default();
    for chunk in chunks {
        match chunk {
            Chunk::Piece(piece) => field.push(&piece.text, piece.quoted),
            Chunk::Break => field.push(" ", true),
        }
    }
    field
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::environment::DEFAULT_IFS;
    use pretty_assertions::assert_eq;

    fn texts(fields: Vec<Field>) -> Vec<String> {
        fields.iter().map(Field::text).collect()
    }

    fn splittable(s: &str) -> Chunk {
        Chunk::Piece(Piece::expanded(s))
    }

    #[test]
    fn test_whitespace_collapses() {
        let got = split_fields(vec![splittable("  a   b\tc\n")], DEFAULT_IFS);
        assert_eq!(texts(got), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_non_whitespace_delimiters_keep_empty_fields() {
        assert_eq!(texts(split_fields(vec![splittable("a::b")], ":")), vec!["a", "", "b"]);
        assert_eq!(texts(split_fields(vec![splittable(":a")], ":")), vec!["", "a"]);
        // a trailing delimiter does not start another field
        assert_eq!(texts(split_fields(vec![splittable("a:")], ":")), vec!["a"]);
    }

    #[test]
    fn test_mixed_delimiters() {
        assert_eq!(texts(split_fields(vec![splittable("a : b")], " :")), vec!["a", "b"]);
        assert_eq!(texts(split_fields(vec![splittable("a: :b")], " :")), vec!["a", "", "b"]);
    }

    #[test]
    fn test_empty_ifs_disables_splitting() {
        assert_eq!(texts(split_fields(vec![splittable("a b")], "")), vec!["a b"]);
    }

    #[test]
    fn test_quoted_pieces_are_not_split() {
        let chunks = vec![
            Chunk::Piece(Piece::literal("x")),
            splittable("1 2"),
            Chunk::Piece(Piece::quoted(" 3 4")),
        ];
        assert_eq!(texts(split_fields(chunks, DEFAULT_IFS)), vec!["x1", "2 3 4"]);
    }

    #[test]
    fn test_empty_expansions_vanish_but_empty_quotes_remain() {
        assert_eq!(split_fields(vec![splittable("")], DEFAULT_IFS), Vec::<Field>::new());
        let got = split_fields(vec![Chunk::Piece(Piece::quoted(""))], DEFAULT_IFS);
        assert_eq!(texts(got), vec![""]);
    }

    #[test]
    fn test_breaks_separate_list_elements() {
        let chunks = vec![
            Chunk::Piece(Piece::quoted("a b")),
            Chunk::Break,
            Chunk::Piece(Piece::quoted("")),
            Chunk::Break,
            Chunk::Piece(Piece::quoted("c")),
        ];
        assert_eq!(texts(split_fields(chunks, DEFAULT_IFS)), vec!["a b", "", "c"]);
    }

    #[test]
    fn test_field_remembers_quoting() {
        let chunks = vec![Chunk::Piece(Piece::literal("*")), Chunk::Piece(Piece::quoted("?"))];
        let fields = split_fields(chunks, DEFAULT_IFS);
        assert_eq!(fields[0].parts, vec![("*".to_string(), false), ("?".to_string(), true)]);
    }
}
