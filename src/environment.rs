use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use crate::arrays::ArrayTable;
use crate::ast::AstNode;
use crate::jobs::JobTable;

#[derive(Debug, Clone, PartialEq)]
struct Variable {
    value: String,
    exported: bool,
}

pub const DEFAULT_IFS: &str = " \t\n";

/// Options toggled with `set -o` and friends.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShellOptions {
    pub nounset: bool,
    pub pipefail: bool,
    pub xtrace: bool,
    pub noglob: bool,
    pub interactive: bool,
    pub job_control: bool,
}

impl ShellOptions {
    /// Long names accepted by `set -o`.
    pub const NAMES: &'static [&'static str] = &["nounset", "pipefail", "xtrace", "noglob", "monitor"];

    pub fn set_by_name(&mut self, name: &str, on: bool) -> bool {
        match name {
            "nounset" => self.nounset = on,
            "pipefail" => self.pipefail = on,
            "xtrace" => self.xtrace = on,
            "noglob" => self.noglob = on,
            "monitor" => self.job_control = on,
            _ => return false,
        }
        true
    }

    pub fn get_by_name(&self, name: &str) -> Option<bool> {
        Some(match name {
            "nounset" => self.nounset,
            "pipefail" => self.pipefail,
            "xtrace" => self.xtrace,
            "noglob" => self.noglob,
            "monitor" => self.job_control,
            _ => return None,
        })
    }

    pub fn set_by_flag(&mut self, flag: char, on: bool) -> bool {
        match flag {
            'u' => self.nounset = on,
            'x' => self.xtrace = on,
            'f' => self.noglob = on,
            'm' => self.job_control = on,
            _ => return false,
        }
        true
    }

    /// The value of `$-`.
    pub fn flags(&self) -> String {
        let mut flags = String::new();
        if self.noglob {
            flags.push('f');
        }
        if self.interactive {
            flags.push('i');
        }
        if self.job_control {
            flags.push('m');
        }
        if self.nounset {
            flags.push('u');
        }
        if self.xtrace {
            flags.push('x');
        }
        flags
    }
}

/// All mutable interpreter state: variables, positional parameters,
/// functions, arrays, options and the job table.
#[derive(Debug, Clone)]
pub struct Environment {
    vars: HashMap<String, Variable>,
    // Saved bindings per function call, restored when the call returns.
    local_scopes: Vec<HashMap<String, Option<Variable>>>,
    pub positional: Vec<String>,
    pub shell_name: String,
    pub last_status: i32,
    pub last_background_pid: Option<i32>,
    pub shell_pid: i32,
    pub options: ShellOptions,
    pub functions: HashMap<String, Rc<AstNode>>,
    pub arrays: ArrayTable,
    pub jobs: JobTable,
    pub loop_depth: usize,
    pub function_depth: usize,
    pub source_depth: usize,
    pub in_subshell: bool,
}

impl Default for Environment {
    fn default() -> Self {
        Environment {
            vars: HashMap::new(),
            local_scopes: Vec::new(),
            positional: Vec::new(),
            shell_name: "tinysh".to_string(),
            last_status: 0,
            last_background_pid: None,
            shell_pid: std::process::id() as i32,
            options: ShellOptions::default(),
            functions: HashMap::new(),
            arrays: ArrayTable::new(),
            jobs: JobTable::new(),
            loop_depth: 0,
            function_depth: 0,
            source_depth: 0,
            in_subshell: false,
        }
    }
}

impl Environment {
    pub fn new() -> Self {
        let mut env = Environment::default();

        // Import all OS environment variables when starting the process (default value)
        for (k, v) in std::env::vars() {
            env.vars.insert(
                k,
                Variable {
                    value: v,
                    exported: true,
                },
            );
        }
        if let Ok(cwd) = std::env::current_dir() {
            let cwd = cwd.to_string_lossy().into_owned();
            if env.get("PWD").is_none_or(|p| !same_dir(p, &cwd)) {
                env.set("PWD", &cwd);
            }
        }
        env
    }

    /// An environment without any inherited variables.
    pub fn empty() -> Self {
        Environment::default()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(|v| v.value.as_str())
    }

    pub fn is_set(&self, key: &str) -> bool {
        self.vars.contains_key(key)
    }

    pub fn is_exported(&self, key: &str) -> bool {
        self.vars.get(key).is_some_and(|v| v.exported)
    }

    pub fn set(&mut self, key: &str, value: &str) {
        self.vars
            .entry(key.to_string())
            .and_modify(|var| var.value = value.to_string())
            .or_insert(Variable {
                value: value.to_string(),
                exported: false,
            });
    }

    pub fn unset(&mut self, key: &str) {
        self.vars.remove(key);
        self.arrays.remove(key);
    }

    pub fn export(&mut self, key: &str) {
        match self.vars.get_mut(key) {
            Some(var) => var.exported = true,
            None => {
                self.vars.insert(
                    key.to_string(),
                    Variable {
                        value: String::new(),
                        exported: true,
                    },
                );
            }
        }
    }

    pub fn unexport(&mut self, key: &str) {
        if let Some(var) = self.vars.get_mut(key) {
            var.exported = false;
        }
    }

    pub fn all(&self) -> Vec<(String, String)> {
        let mut all: Vec<(String, String)> = self
            .vars
            .iter()
            .map(|(k, v)| (k.clone(), v.value.clone()))
            .collect();
        all.sort();
        all
    }

    pub fn exported_vars(&self) -> Vec<(String, String)> {
        let mut vars: Vec<(String, String)> = self
            .vars
            .iter()
            .filter(|(_, v)| v.exported)
            .map(|(k, v)| (k.clone(), v.value.clone()))
            .collect();
        vars.sort();
        vars
    }

    /// Enters a function call frame.
    pub fn push_scope(&mut self) {
        self.local_scopes.push(HashMap::new());
    }

    /// Leaves a call frame, restoring every binding it shadowed.
    pub fn pop_scope(&mut self) {
        let Some(saved) = self.local_scopes.pop() else {
            return;
        };
        for (name, previous) in saved {
            match previous {
                Some(var) => {
                    self.vars.insert(name, var);
                }
                None => {
                    self.vars.remove(&name);
                }
            }
        }
    }

    pub fn in_function_scope(&self) -> bool {
        !self.local_scopes.is_empty()
    }

    /// Makes `name` local to the innermost call frame. `None` leaves it unset.
    pub fn declare_local(&mut self, name: &str, value: Option<&str>) -> bool {
        let previous = self.vars.get(name).cloned();
        let Some(frame) = self.local_scopes.last_mut() else {
            return false;
        };
        frame.entry(name.to_string()).or_insert(previous);
        match value {
            Some(v) => {
                self.vars.insert(
                    name.to_string(),
                    Variable {
                        value: v.to_string(),
                        exported: false,
                    },
                );
            }
            None => {
                self.vars.remove(name);
            }
        }
        true
    }

    pub fn ifs(&self) -> &str {
        self.get("IFS").unwrap_or(DEFAULT_IFS)
    }

    pub fn home(&self) -> Option<&str> {
        self.get("HOME")
    }

    pub fn cwd(&self) -> PathBuf {
        self.get("PWD")
            .map(PathBuf::from)
            .filter(|p| p.is_absolute())
            .or_else(|| std::env::current_dir().ok())
            .unwrap_or_else(|| PathBuf::from("/"))
    }

    /// Changes the process working directory and updates `PWD`/`OLDPWD`.
    pub fn change_dir(&mut self, target: &Path) -> std::io::Result<PathBuf> {
        std::env::set_current_dir(target)?;
        let logical = if target.is_absolute() {
            target.to_path_buf()
        } else {
            self.cwd().join(target)
        };
        let logical = normalize(&logical);
        let old = self.cwd().to_string_lossy().into_owned();
        self.set("OLDPWD", &old);
        self.set("PWD", &logical.to_string_lossy());
        Ok(logical)
    }

    /// Value of a special or positional parameter (`$?`, `$1`, `$#`, ...).
    pub fn special(&self, name: &str) -> Option<String> {
        match name {
            "?" => Some(self.last_status.to_string()),
            "$" => Some(self.shell_pid.to_string()),
            "!" => self.last_background_pid.map(|p| p.to_string()),
            "#" => Some(self.positional.len().to_string()),
            "-" => Some(self.options.flags()),
            "0" => Some(self.shell_name.clone()),
            "*" | "@" => Some(self.positional.join(" ")),
            _ => {
                let n: usize = name.parse().ok()?;
                self.positional.get(n.checked_sub(1)?).cloned()
            }
        }
    }

    /// Turns this environment into one for a forked subshell.
    pub fn become_subshell(&mut self) {
        self.jobs = JobTable::new();
        self.options.interactive = false;
        self.options.job_control = false;
        self.in_subshell = true;
    }

    /// State for a script run in place of a non-executable file: only exported
    /// variables survive.
    pub fn reset_for_script(&mut self, name: &str, args: Vec<String>) {
        self.vars.retain(|_, v| v.exported);
        self.local_scopes.clear();
        self.functions.clear();
        self.arrays = ArrayTable::new();
        self.shell_name = name.to_string();
        self.positional = args;
        self.loop_depth = 0;
        self.function_depth = 0;
        self.source_depth = 0;
    }
}

fn same_dir(a: &str, b: &str) -> bool {
    match (std::fs::canonicalize(a), std::fs::canonicalize(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

/// Removes `.` and `..` components lexically.
fn normalize(path: &Path) -> PathBuf {
    use std::path::Component;
    let mut out = PathBuf::new();
    for comp in path.components() {
        match comp {
            Component::ParentDir => {
                out.pop();
            }
            Component::CurDir => {}
            other => out.push(other.as_os_str()),
        }
    }
    if out.as_os_str().is_empty() {
        out.push("/");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_new_includes_os_env() {
        let env = Environment::new();
        // At least one OS env var should exist
        assert!(!env.vars.is_empty());
    }

    #[test]
    fn test_set_get_unset() {
        let mut env = Environment::empty();
        env.set("FOO", "bar");
        assert_eq!(env.get("FOO"), Some("bar"));
        env.unset("FOO");
        assert_eq!(env.get("FOO"), None);
    }

    #[test]
    fn test_export_without_value_creates_empty_exported() {
        let mut env = Environment::empty();
        env.set("FOO", "bar");
        env.set("BAZ", "qux");
        env.export("FOO");
        env.export("NEW");
        assert_eq!(
            env.exported_vars(),
            vec![("FOO".to_string(), "bar".to_string()), ("NEW".to_string(), String::new())]
        );
        env.unexport("FOO");
        assert!(!env.is_exported("FOO"));
    }

    #[test]
    fn test_local_scopes_restore_previous_binding() {
        let mut env = Environment::empty();
        env.set("x", "global");
        env.push_scope();
        assert!(env.declare_local("x", Some("inner")));
        assert!(env.declare_local("y", Some("only-local")));
        env.set("x", "changed");
        assert_eq!(env.get("x"), Some("changed"));
        env.pop_scope();
        assert_eq!(env.get("x"), Some("global"));
        assert_eq!(env.get("y"), None);
    }

    #[test]
    fn test_local_outside_function_fails() {
        let mut env = Environment::empty();
        assert!(!env.declare_local("x", Some("v")));
        assert_eq!(env.get("x"), None);
    }

    #[test]
    fn test_special_parameters() {
        let mut env = Environment::empty();
        env.positional = vec!["a".into(), "b c".into()];
        env.last_status = 3;
        env.options.nounset = true;
        assert_eq!(env.special("#").as_deref(), Some("2"));
        assert_eq!(env.special("?").as_deref(), Some("3"));
        assert_eq!(env.special("1").as_deref(), Some("a"));
        assert_eq!(env.special("2").as_deref(), Some("b c"));
        assert_eq!(env.special("3"), None);
        assert_eq!(env.special("!"), None);
        assert_eq!(env.special("-").as_deref(), Some("u"));
        assert_eq!(env.special("*").as_deref(), Some("a b c"));
    }

    #[test]
    fn test_ifs_default() {
        let mut env = Environment::empty();
        assert_eq!(env.ifs(), " \t\n");
        env.set("IFS", ":");
        assert_eq!(env.ifs(), ":");
    }

    #[test]
    fn test_options_by_name() {
        let mut opts = ShellOptions::default();
        assert!(opts.set_by_name("pipefail", true));
        assert!(!opts.set_by_name("bogus", true));
        assert_eq!(opts.get_by_name("pipefail"), Some(true));
        assert!(opts.set_by_flag('x', true));
        assert_eq!(opts.flags(), "x");
    }

    #[test]
    fn test_normalize() {
        assert_eq!(normalize(Path::new("/a/b/../c/./d")), PathBuf::from("/a/c/d"));
        assert_eq!(normalize(Path::new("/..")), PathBuf::from("/"));
    }
}
