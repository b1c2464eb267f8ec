//! Variable assignments: `NAME=v`, `NAME+=v`, `NAME[k]=v` and `NAME=(...)`.

use crate::arrays::ArrayKind;
use crate::ast::{AssignValue, Assignment};
use crate::environment::Environment;
use crate::executor::{ExecError, Executor};
use crate::expander::{arith, ExpandError, Expander};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssignedValue {
    Scalar(String),
    /// Array literal items with their optional `[key]`.
    List(Vec<(Option<String>, String)>),
}

/// An assignment whose words have been expanded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolved {
    pub name: String,
    pub index: Option<String>,
    pub value: AssignedValue,
    pub append: bool,
}

impl Resolved {
    pub fn scalar(name: &str, value: &str) -> Self {
        Resolved {
            name: name.to_string(),
            index: None,
            value: AssignedValue::Scalar(value.to_string()),
            append: false,
        }
    }

    /// `(name, value)` when this is a plain scalar assignment.
    pub fn as_env_pair(&self) -> Option<(String, String)> {
        match (&self.index, &self.value) {
            (None, AssignedValue::Scalar(v)) => Some((self.name.clone(), v.clone())),
            _ => None,
        }
    }

    pub fn display(&self) -> String {
        let mut out = self.name.clone();
        if let Some(index) = &self.index {
            out.push_str(&format!("[{index}]"));
        }
        out.push_str(if self.append { "+=" } else { "=" });
        match &self.value {
            AssignedValue::Scalar(v) => out.push_str(v),
            AssignedValue::List(items) => {
                let items: Vec<String> = items
                    .iter()
                    .map(|(k, v)| match k {
                        Some(k) => format!("[{k}]={v}"),
                        None => v.clone(),
                    })
                    .collect();
                out.push_str(&format!("({})", items.join(" ")));
            }
        }
        out
    }
}

/// Splits `[key]=value` into its parts.
pub fn split_keyed(raw: &str) -> Option<(&str, &str)> {
    let rest = raw.strip_prefix('[')?;
    let close = rest.find(']')?;
    let value = rest[close + 1..].strip_prefix('=')?;
    Some((&rest[..close], value))
}

pub fn resolve(a: &Assignment, env: &mut Environment, exec: &mut dyn Executor) -> Result<Resolved, ExpandError> {
    let mut expander = Expander::new(env, exec);
    let index = match &a.index {
        Some(sub) => Some(expander.expand_word_string(sub)?),
        None => None,
    };
    let value = match &a.value {
        AssignValue::Scalar(w) => AssignedValue::Scalar(expander.expand_assignment_value(w.as_str())?),
        AssignValue::Array(items) => {
            let mut list = Vec::new();
            for item in items {
                match split_keyed(item.as_str()) {
                    Some((key, value)) => {
                        let key = expander.expand_word_string(key)?;
                        list.push((Some(key), expander.expand_assignment_value(value)?));
                    }
                    None => {
                        let fields = expander.expand_words(std::slice::from_ref(item))?;
                        list.extend(fields.into_iter().map(|v| (None, v)));
                    }
                }
            }
            AssignedValue::List(list)
        }
    };
    Ok(Resolved {
        name: a.name.clone(),
        index,
        value,
        append: a.append,
    })
}

/// Parses an already expanded `NAME=value` word, as `export`, `local` and
/// `typeset` see when the assignment was quoted or came from an expansion.
/// The value is always a scalar.
pub fn parse_argument(arg: &str) -> Option<Resolved> {
    let eq = arg.find('=')?;
    let (lhs, value) = (&arg[..eq], &arg[eq + 1..]);
    let (lhs, append) = match lhs.strip_suffix('+') {
        Some(l) => (l, true),
        None => (lhs, false),
    };
    let (name, index) = match lhs.find('[') {
        Some(open) if lhs.ends_with(']') => (&lhs[..open], Some(lhs[open + 1..lhs.len() - 1].to_string())),
        _ => (lhs, None),
    };
    if !crate::lexer::is_name(name) {
        return None;
    }
    Some(Resolved {
        name: name.to_string(),
        index,
        value: AssignedValue::Scalar(value.to_string()),
        append,
    })
}

/// An operand of a declaration builtin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeclArg {
    Word(String),
    Assign(Resolved),
}

impl DeclArg {
    pub fn from_text(arg: &str) -> Self {
        match parse_argument(arg) {
            Some(r) => DeclArg::Assign(r),
            None => DeclArg::Word(arg.to_string()),
        }
    }

    pub fn into_text(self) -> String {
        match self {
            DeclArg::Word(w) => w,
            DeclArg::Assign(r) => r.display(),
        }
    }

    pub fn as_word(&self) -> Option<&str> {
        match self {
            DeclArg::Word(w) => Some(w),
            DeclArg::Assign(_) => None,
        }
    }
}

/// Kind for an array created by assigning through `key`.
fn kind_for_key(key: &str) -> ArrayKind {
    if key.trim().parse::<i64>().is_ok() {
        ArrayKind::Indexed
    } else {
        ArrayKind::Associative
    }
}

/// Turns a scalar into element zero of a new array of `kind`.
fn promote(env: &mut Environment, name: &str, kind: ArrayKind) {
    let old = env.get(name).map(str::to_string);
    env.unset(name);
    env.arrays.declare(name, kind);
    if let Some(old) = old {
        env.arrays.set_indexed(name, 0, old);
    }
}

fn set_element(env: &mut Environment, name: &str, key: &str, value: &str, append: bool) -> Result<(), ExecError> {
    let kind = match env.arrays.kind(name) {
        Some(kind) => kind,
        None => {
            let kind = kind_for_key(key);
            promote(env, name, kind);
            kind
        }
    };
    match kind {
        ArrayKind::Associative => {
            let value = match append {
                true => format!("{}{value}", env.arrays.get(name, key).unwrap_or("")),
                false => value.to_string(),
            };
            env.arrays.set_associative(name, key, value).map_err(ExpandError::from)?;
        }
        ArrayKind::Indexed => {
            let raw = arith::evaluate(key, env)?;
            let index = env.arrays.resolve_index(name, raw).map_err(ExpandError::from)?;
            let value = match append {
                true => format!("{}{value}", env.arrays.get_index(name, index).unwrap_or("")),
                false => value.to_string(),
            };
            env.arrays.set_indexed(name, index, value);
        }
    }
    Ok(())
}

fn assign_list(
    env: &mut Environment,
    name: &str,
    items: &[(Option<String>, String)],
    append: bool,
) -> Result<(), ExecError> {
    let existing = env.arrays.kind(name);
    if !append || existing.is_none() {
        let all_named = !items.is_empty()
            && items.iter().all(|(k, _)| k.as_deref().is_some_and(|k| kind_for_key(k) == ArrayKind::Associative));
        let kind = existing.unwrap_or(if all_named { ArrayKind::Associative } else { ArrayKind::Indexed });
        if append {
            promote(env, name, kind);
        } else {
            env.unset(name);
            env.arrays.declare(name, kind);
        }
    }
    for (key, value) in items {
        match key {
            Some(key) => set_element(env, name, key, value, false)?,
            None => env.arrays.push(name, value.clone()),
        }
    }
    Ok(())
}

/// Performs one assignment in the current scope.
pub fn apply(env: &mut Environment, r: &Resolved) -> Result<(), ExecError> {
    match (&r.index, &r.value) {
        (None, AssignedValue::Scalar(v)) => {
            if env.arrays.contains(&r.name) && !env.is_set(&r.name) {
                return set_element(env, &r.name, "0", v, r.append);
            }
            let value = match r.append {
                true => format!("{}{v}", env.get(&r.name).unwrap_or("")),
                false => v.clone(),
            };
            env.set(&r.name, &value);
        }
        (Some(key), AssignedValue::Scalar(v)) => set_element(env, &r.name, key, v, r.append)?,
        (_, AssignedValue::List(items)) => assign_list(env, &r.name, items, r.append)?,
    }
    Ok(())
}

/// Variables shadowed for the duration of one builtin.
#[derive(Debug, Default)]
pub struct TempVars {
    saved: Vec<(String, Option<String>, bool)>,
}

impl TempVars {
    pub fn apply(env: &mut Environment, assignments: &[Resolved]) -> Result<Self, ExecError> {
        let mut temp = TempVars::default();
        for r in assignments {
            let Some((name, value)) = r.as_env_pair() else {
                apply(env, r)?;
                continue;
            };
            if !temp.saved.iter().any(|(n, _, _)| *n == name) {
                let previous = env.get(&name).map(str::to_string);
                let exported = env.is_exported(&name);
                temp.saved.push((name.clone(), previous, exported));
            }
            env.set(&name, &value);
            env.export(&name);
        }
        Ok(temp)
    }

    pub fn restore(self, env: &mut Environment) {
        for (name, previous, exported) in self.saved.into_iter().rev() {
            match previous {
                Some(value) => {
                    env.set(&name, &value);
                    if !exported {
                        env.unexport(&name);
                    }
                }
                None => env.unset(&name),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::Word;
    use crate::executor::tests::MockExecutor;
    use pretty_assertions::assert_eq;

    fn run(env: &mut Environment, a: Assignment) {
        let mut exec = MockExecutor::new();
        let resolved = resolve(&a, env, &mut exec).unwrap();
        apply(env, &resolved).unwrap();
    }

    fn scalar(name: &str, index: Option<&str>, value: &str, append: bool) -> Assignment {
        Assignment {
            name: name.into(),
            index: index.map(str::to_string),
            value: AssignValue::Scalar(Word::new(value)),
            append,
        }
    }

    fn list(name: &str, items: &[&str], append: bool) -> Assignment {
        Assignment {
            name: name.into(),
            index: None,
            value: AssignValue::Array(items.iter().map(|i| Word::new(*i)).collect()),
            append,
        }
    }

    #[test]
    fn test_scalar_and_append() {
        let mut env = Environment::empty();
        run(&mut env, scalar("A", None, "one", false));
        run(&mut env, scalar("A", None, "-two", true));
        assert_eq!(env.get("A"), Some("one-two"));
    }

    #[test]
    fn test_indexed_literal_with_keys() {
        let mut env = Environment::empty();
        run(&mut env, list("arr", &["a", "[5]=b", "c"], false));
        assert_eq!(env.arrays.keys("arr"), vec!["0", "5", "6"]);
        run(&mut env, list("arr", &["d"], true));
        assert_eq!(env.arrays.values("arr"), vec!["a", "b", "c", "d"]);
    }

    #[test]
    fn test_associative_created_from_named_keys() {
        let mut env = Environment::empty();
        run(&mut env, scalar("m", Some("red"), "1", false));
        run(&mut env, scalar("m", Some("blue"), "2", false));
        assert_eq!(env.arrays.kind("m"), Some(ArrayKind::Associative));
        assert_eq!(env.arrays.keys("m"), vec!["red", "blue"]);
    }

    #[test]
    fn test_scalar_promoted_to_array() {
        let mut env = Environment::empty();
        env.set("v", "zero");
        run(&mut env, scalar("v", Some("2"), "two", false));
        assert!(!env.is_set("v"));
        assert_eq!(env.arrays.values("v"), vec!["zero", "two"]);
    }

    #[test]
    fn test_parse_argument_forms() {
        assert_eq!(parse_argument("X=1"), Some(Resolved::scalar("X", "1")));
        assert_eq!(parse_argument("m=(a b)"), Some(Resolved::scalar("m", "(a b)")));
        assert_eq!(parse_argument("m[k]=v").and_then(|r| r.index), Some("k".to_string()));
        assert_eq!(parse_argument("1x=2"), None);
        assert_eq!(parse_argument("noequals"), None);
        assert_eq!(parse_argument("P+=x").map(|r| r.append), Some(true));
    }

    #[test]
    fn test_resolve_keeps_quoted_list_items_whole() {
        let mut env = Environment::empty();
        let mut exec = MockExecutor::new();
        let r = resolve(&list("b", &["\"p q\"", "[k]='a b'"], false), &mut env, &mut exec).unwrap();
        assert_eq!(
            r.value,
            AssignedValue::List(vec![(None, "p q".into()), (Some("k".into()), "a b".into())])
        );
    }

    #[test]
    fn test_decl_arg_text_forms() {
        assert_eq!(DeclArg::from_text("-a"), DeclArg::Word("-a".into()));
        assert_eq!(DeclArg::from_text("v=1"), DeclArg::Assign(Resolved::scalar("v", "1")));
        assert_eq!(DeclArg::Word("n".into()).into_text(), "n");
    }

    #[test]
    fn test_temporary_assignments_restore() {
        let mut env = Environment::empty();
        env.set("KEEP", "old");
        let temp = TempVars::apply(
            &mut env,
            &[Resolved::scalar("KEEP", "new"), Resolved::scalar("FRESH", "x")],
        )
        .unwrap();
        assert_eq!(env.get("KEEP"), Some("new"));
        assert!(env.is_exported("FRESH"));
        temp.restore(&mut env);
        assert_eq!(env.get("KEEP"), Some("old"));
        assert!(!env.is_exported("KEEP"));
        assert!(!env.is_set("FRESH"));
    }
}
