//! Named indexed and associative arrays.
//!
//! Associative arrays keep keys in insertion order. Indexed arrays are sparse
//! and always enumerate in ascending index order.

use std::collections::{BTreeMap, HashMap};

use indexmap::IndexMap;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ArrayKind {
    Indexed,
    Associative,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ArrayError {
    #[error("{0}: not an associative array")]
    NotAssociative(String),
    #[error("{name}: bad array subscript `{key}'")]
    BadSubscript { name: String, key: String },
}

#[derive(Debug, Clone, PartialEq)]
enum Storage {
    Indexed(BTreeMap<usize, String>),
    Associative(IndexMap<String, String>),
}

impl Storage {
    fn kind(&self) -> ArrayKind {
        match self {
            Storage::Indexed(_) => ArrayKind::Indexed,
            Storage::Associative(_) => ArrayKind::Associative,
        }
    }

    fn empty(kind: ArrayKind) -> Self {
        match kind {
            ArrayKind::Indexed => Storage::Indexed(BTreeMap::new()),
            ArrayKind::Associative => Storage::Associative(IndexMap::new()),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ArrayTable {
    arrays: HashMap<String, Storage>,
}

impl ArrayTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares `name`. An existing array of the other kind is discarded.
    pub fn declare(&mut self, name: &str, kind: ArrayKind) {
        match self.arrays.get(name) {
            Some(existing) if existing.kind() == kind => {}
            _ => {
                self.arrays.insert(name.to_string(), Storage::empty(kind));
            }
        }
    }

    pub fn declare_associative(&mut self, name: &str) {
        self.declare(name, ArrayKind::Associative);
    }

    pub fn declare_indexed(&mut self, name: &str) {
        self.declare(name, ArrayKind::Indexed);
    }

    pub fn kind(&self, name: &str) -> Option<ArrayKind> {
        self.arrays.get(name).map(Storage::kind)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.arrays.contains_key(name)
    }

    /// Sets `key` in `name`, creating an associative array if none exists.
    /// Numeric keys also address an existing indexed array.
    pub fn set_associative(&mut self, name: &str, key: &str, value: impl Into<String>) -> Result<(), ArrayError> {
        let storage = self
            .arrays
            .entry(name.to_string())
            .or_insert_with(|| Storage::Associative(IndexMap::new()));
        match storage {
            Storage::Associative(map) => {
                map.insert(key.to_string(), value.into());
                Ok(())
            }
            Storage::Indexed(map) => {
                let index = key
                    .trim()
                    .parse::<usize>()
                    .map_err(|_| ArrayError::NotAssociative(name.to_string()))?;
                map.insert(index, value.into());
                Ok(())
            }
        }
    }

    /// Sets element `index`, creating an indexed array if none exists.
    pub fn set_indexed(&mut self, name: &str, index: usize, value: impl Into<String>) {
        let storage = self
            .arrays
            .entry(name.to_string())
            .or_insert_with(|| Storage::Indexed(BTreeMap::new()));
        match storage {
            Storage::Indexed(map) => {
                map.insert(index, value.into());
            }
            Storage::Associative(map) => {
                map.insert(index.to_string(), value.into());
            }
        }
    }

    /// Appends after the highest index (or as the next key `len` for associative arrays).
    pub fn push(&mut self, name: &str, value: impl Into<String>) {
        let next = match self.arrays.get(name) {
            Some(Storage::Indexed(map)) => map.keys().next_back().map_or(0, |i| i + 1),
            Some(Storage::Associative(map)) => map.len(),
            None => 0,
        };
        self.set_indexed(name, next, value);
    }

    /// Replaces the whole contents with `values` at indices `0..`.
    pub fn assign_list(&mut self, name: &str, values: Vec<String>) {
        let map: BTreeMap<usize, String> = values.into_iter().enumerate().collect();
        self.arrays.insert(name.to_string(), Storage::Indexed(map));
    }

    pub fn get(&self, name: &str, key: &str) -> Option<&str> {
        match self.arrays.get(name)? {
            Storage::Associative(map) => map.get(key).map(String::as_str),
            Storage::Indexed(map) => {
                let index = key.trim().parse::<usize>().ok()?;
                map.get(&index).map(String::as_str)
            }
        }
    }

    pub fn get_index(&self, name: &str, index: usize) -> Option<&str> {
        match self.arrays.get(name)? {
            Storage::Indexed(map) => map.get(&index).map(String::as_str),
            Storage::Associative(map) => map.get(&index.to_string()).map(String::as_str),
        }
    }

    /// Resolves a possibly negative index against an indexed array, counting from the end.
    pub fn resolve_index(&self, name: &str, index: i64) -> Result<usize, ArrayError> {
        if index >= 0 {
            return Ok(index as usize);
        }
        let top = match self.arrays.get(name) {
            Some(Storage::Indexed(map)) => map.keys().next_back().map_or(0, |i| i + 1),
            _ => 0,
        };
        let resolved = top as i64 + index;
        if resolved < 0 {
            return Err(ArrayError::BadSubscript {
                name: name.to_string(),
                key: index.to_string(),
            });
        }
        Ok(resolved as usize)
    }

    pub fn keys(&self, name: &str) -> Vec<String> {
        match self.arrays.get(name) {
            Some(Storage::Associative(map)) => map.keys().cloned().collect(),
            Some(Storage::Indexed(map)) => map.keys().map(|k| k.to_string()).collect(),
            None => Vec::new(),
        }
    }

    pub fn values(&self, name: &str) -> Vec<String> {
        match self.arrays.get(name) {
            Some(Storage::Associative(map)) => map.values().cloned().collect(),
            Some(Storage::Indexed(map)) => map.values().cloned().collect(),
            None => Vec::new(),
        }
    }

    pub fn length(&self, name: &str) -> usize {
        match self.arrays.get(name) {
            Some(Storage::Associative(map)) => map.len(),
            Some(Storage::Indexed(map)) => map.len(),
            None => 0,
        }
    }

    /// Removes the whole array. Returns whether it existed.
    pub fn remove(&mut self, name: &str) -> bool {
        self.arrays.remove(name).is_some()
    }

    pub fn remove_element(&mut self, name: &str, key: &str) -> bool {
        match self.arrays.get_mut(name) {
            Some(Storage::Associative(map)) => map.shift_remove(key).is_some(),
            Some(Storage::Indexed(map)) => match key.trim().parse::<usize>() {
                Ok(index) => map.remove(&index).is_some(),
                Err(_) => false,
            },
            None => false,
        }
    }

    /// Values of an indexed array whose indices fall in `[start, end)`,
    /// ascending. No `end` runs to the last element. Associative and missing
    /// arrays slice to nothing.
    pub fn slice(&self, name: &str, start: usize, end: Option<usize>) -> Vec<String> {
        let Some(Storage::Indexed(map)) = self.arrays.get(name) else {
            return Vec::new();
        };
        match end {
            Some(end) if start < end => map.range(start..end).map(|(_, v)| v.clone()).collect(),
            Some(_) => Vec::new(),
            None => map.range(start..).map(|(_, v)| v.clone()).collect(),
        }
    }

    /// `(name, kind)` pairs sorted by name.
    pub fn names(&self) -> Vec<(String, ArrayKind)> {
        let mut names: Vec<_> = self.arrays.iter().map(|(k, v)| (k.clone(), v.kind())).collect();
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_associative_preserves_insertion_order() {
        let mut t = ArrayTable::new();
        t.declare_associative("m");
        t.set_associative("m", "zeta", "1").unwrap();
        t.set_associative("m", "alpha", "2").unwrap();
        t.set_associative("m", "mid", "3").unwrap();
        assert_eq!(t.keys("m"), vec!["zeta", "alpha", "mid"]);
        assert_eq!(t.values("m"), vec!["1", "2", "3"]);
        // overwriting keeps position
        t.set_associative("m", "zeta", "9").unwrap();
        assert_eq!(t.keys("m"), vec!["zeta", "alpha", "mid"]);
        assert_eq!(t.get("m", "zeta"), Some("9"));
    }

    #[test]
    fn test_indexed_is_sparse_and_ascending() {
        let mut t = ArrayTable::new();
        t.set_indexed("a", 5, "five");
        t.set_indexed("a", 1, "one");
        t.set_indexed("a", 3, "three");
        assert_eq!(t.kind("a"), Some(ArrayKind::Indexed));
        assert_eq!(t.keys("a"), vec!["1", "3", "5"]);
        assert_eq!(t.length("a"), 3);
        assert_eq!(t.get("a", "3"), Some("three"));
        assert_eq!(t.get("a", "2"), None);
    }

    #[test]
    fn test_slice_half_open() {
        let mut t = ArrayTable::new();
        t.assign_list("a", vec!["a".into(), "b".into(), "c".into(), "d".into()]);
        assert_eq!(t.slice("a", 1, Some(3)), vec!["b", "c"]);
        assert_eq!(t.slice("a", 3, Some(1)), Vec::<String>::new());
        assert_eq!(t.slice("missing", 0, Some(4)), Vec::<String>::new());
    }

    #[test]
    fn test_slice_without_end_runs_to_last_index() {
        let mut t = ArrayTable::new();
        t.set_indexed("s", 2, "two");
        t.set_indexed("s", 7, "seven");
        t.set_indexed("s", 9, "nine");
        assert_eq!(t.slice("s", 3, None), vec!["seven", "nine"]);
        assert_eq!(t.slice("s", 0, Some(8)), vec!["two", "seven"]);
        assert_eq!(t.slice("s", 10, None), Vec::<String>::new());
    }

    #[test]
    fn test_slice_of_associative_is_empty() {
        let mut t = ArrayTable::new();
        t.declare_associative("m");
        t.set_associative("m", "k", "v").unwrap();
        assert_eq!(t.slice("m", 0, Some(5)), Vec::<String>::new());
        assert_eq!(t.slice("m", 0, None), Vec::<String>::new());
    }

    #[test]
    fn test_redeclare_other_kind_discards_contents() {
        let mut t = ArrayTable::new();
        t.set_indexed("x", 0, "v");
        t.declare_indexed("x");
        assert_eq!(t.length("x"), 1);
        t.declare_associative("x");
        assert_eq!(t.kind("x"), Some(ArrayKind::Associative));
        assert_eq!(t.length("x"), 0);
    }

    #[test]
    fn test_remove() {
        let mut t = ArrayTable::new();
        assert!(!t.remove("nope"));
        t.set_associative("m", "k", "v").unwrap();
        assert!(t.remove_element("m", "k"));
        assert_eq!(t.length("m"), 0);
        assert!(t.remove("m"));
        assert!(!t.contains("m"));
    }

    #[test]
    fn test_push_and_negative_index() {
        let mut t = ArrayTable::new();
        t.push("a", "x");
        t.push("a", "y");
        assert_eq!(t.values("a"), vec!["x", "y"]);
        assert_eq!(t.resolve_index("a", -1).unwrap(), 1);
        assert!(t.resolve_index("a", -5).is_err());
    }

    #[test]
    fn test_associative_key_on_indexed_array() {
        let mut t = ArrayTable::new();
        t.declare_indexed("a");
        assert!(t.set_associative("a", "2", "two").is_ok());
        assert_eq!(
            t.set_associative("a", "name", "v"),
            Err(ArrayError::NotAssociative("a".into()))
        );
    }
}
