//! Builtins that read or change variables and options.

use crate::arrays::ArrayKind;
use crate::environment::{Environment, ShellOptions};
use crate::executor::assign::{self, AssignedValue, DeclArg, Resolved};
use crate::executor::builtin::manager::BuiltinCommand;
use crate::executor::builtin::{fail, printed, shell_quote, status, write_out};
use crate::executor::{report, ExecStatus, Executor};
use crate::lexer::is_name;

fn invalid_identifier(builtin: &str, arg: &str) {
    report(format_args!("{builtin}: `{arg}': not a valid identifier"));
}

fn double_quote(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');
    for c in value.chars() {
        if matches!(c, '"' | '\\' | '$' | '`') {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('"');
    out
}

/// `declare -p` style description of one name, if it exists.
fn describe(env: &Environment, name: &str) -> Option<String> {
    if let Some(kind) = env.arrays.kind(name) {
        let flag = match kind {
            ArrayKind::Indexed => "-a",
            ArrayKind::Associative => "-A",
        };
        let items: Vec<String> = env
            .arrays
            .keys(name)
            .into_iter()
            .zip(env.arrays.values(name))
            .map(|(k, v)| format!("[{k}]={}", double_quote(&v)))
            .collect();
        return Some(format!("declare {flag} {name}=({})", items.join(" ")));
    }
    let value = env.get(name)?;
    let flag = if env.is_exported(name) { "-x" } else { "--" };
    Some(format!("declare {flag} {name}={}", double_quote(value)))
}

pub struct ExportCommand;

impl BuiltinCommand for ExportCommand {
    fn name(&self) -> &'static str {
        "export"
    }
    fn special(&self) -> bool {
        true
    }
    fn run(&self, args: &[String], env: &mut Environment, exec: &mut dyn Executor) -> ExecStatus {
        self.run_declaration(args.iter().map(|a| DeclArg::from_text(a)).collect(), env, exec)
    }
    fn run_declaration(&self, args: Vec<DeclArg>, env: &mut Environment, _exec: &mut dyn Executor) -> ExecStatus {
        let mut unexport = false;
        let mut rest = args.as_slice();
        while let Some(flag) = rest.first().and_then(DeclArg::as_word) {
            match flag {
                "-n" => unexport = true,
                "-p" => {}
                "--" => {
                    rest = &rest[1..];
                    break;
                }
                f if f.starts_with('-') => return fail("export", format_args!("{f}: invalid option"), 2),
                _ => break,
            }
            rest = &rest[1..];
        }
        if rest.is_empty() {
            let text: String = env
                .exported_vars()
                .into_iter()
                .map(|(k, v)| format!("export {k}={}\n", double_quote(&v)))
                .collect();
            return printed(write_out(&text));
        }
        let mut code = 0;
        for arg in rest {
            let Some((r, has_value)) = operand(arg) else {
                invalid_identifier("export", &arg.clone().into_text());
                code = 1;
                continue;
            };
            if has_value {
                if let Err(e) = assign::apply(env, &r) {
                    report(format_args!("export: {e}"));
                    code = 1;
                    continue;
                }
            }
            if unexport {
                env.unexport(&r.name);
            } else {
                env.export(&r.name);
            }
        }
        status(code)
    }
}

pub struct UnsetCommand;

impl BuiltinCommand for UnsetCommand {
    fn name(&self) -> &'static str {
        "unset"
    }
    fn special(&self) -> bool {
        true
    }
    fn run(&self, args: &[String], env: &mut Environment, _exec: &mut dyn Executor) -> ExecStatus {
        let (mut vars_only, mut funcs_only) = (false, false);
        let mut rest = args;
        while let Some(flag) = rest.first() {
            match flag.as_str() {
                "-v" => vars_only = true,
                "-f" => funcs_only = true,
                "--" => {
                    rest = &rest[1..];
                    break;
                }
                f if f.starts_with('-') => return fail("unset", format_args!("{f}: invalid option"), 2),
                _ => break,
            }
            rest = &rest[1..];
        }
        let mut code = 0;
        for arg in rest {
            if let Some((name, key)) = arg.strip_suffix(']').and_then(|a| a.split_once('[')) {
                if is_name(name) {
                    env.arrays.remove_element(name, key);
                    continue;
                }
            }
            if !is_name(arg) {
                invalid_identifier("unset", arg);
                code = 1;
                continue;
            }
            let is_var = env.is_set(arg) || env.arrays.contains(arg);
            if funcs_only || (!vars_only && !is_var) {
                env.functions.remove(arg.as_str());
            } else {
                env.unset(arg);
            }
        }
        status(code)
    }
}

pub struct LocalCommand;

impl BuiltinCommand for LocalCommand {
    fn name(&self) -> &'static str {
        "local"
    }
    fn special(&self) -> bool {
        true
    }
    fn run(&self, args: &[String], env: &mut Environment, exec: &mut dyn Executor) -> ExecStatus {
        self.run_declaration(args.iter().map(|a| DeclArg::from_text(a)).collect(), env, exec)
    }
    fn run_declaration(&self, args: Vec<DeclArg>, env: &mut Environment, _exec: &mut dyn Executor) -> ExecStatus {
        if !env.in_function_scope() {
            return fail("local", "can only be used in a function", 1);
        }
        declare_names(self.name(), &args, env, true)
    }
}

/// Reads one operand as an assignment and whether it carried a value. A
/// quoted or expanded `NAME=value` word still assigns. `None` for an invalid
/// name.
fn operand(arg: &DeclArg) -> Option<(Resolved, bool)> {
    match arg {
        DeclArg::Assign(r) => Some((r.clone(), true)),
        DeclArg::Word(w) => match assign::parse_argument(w) {
            Some(r) => Some((r, true)),
            None if is_name(w) => Some((Resolved::scalar(w, ""), false)),
            None => None,
        },
    }
}

/// Shared by `local`, `typeset` and `declare`.
fn declare_names(builtin: &str, args: &[DeclArg], env: &mut Environment, local: bool) -> ExecStatus {
    let mut kind = None;
    let mut export = false;
    let mut print = false;
    let mut rest = args;
    while let Some(flag) = rest.first().and_then(DeclArg::as_word) {
        let Some(letters) = flag.strip_prefix('-').filter(|l| !l.is_empty()) else {
            break;
        };
        rest = &rest[1..];
        if letters == "-" {
            break;
        }
        for c in letters.chars() {
            match c {
                'a' | 'A' => {
                    let k = if c == 'a' { ArrayKind::Indexed } else { ArrayKind::Associative };
                    if kind.is_some_and(|prev| prev != k) {
                        return fail(builtin, "cannot use -a and -A together", 2);
                    }
                    kind = Some(k);
                }
                'x' => export = true,
                'p' => print = true,
                'g' => {}
                other => return fail(builtin, format_args!("-{other}: invalid option"), 2),
            }
        }
    }
    if kind.is_some() && !print && rest.is_empty() {
        return fail(builtin, "missing variable name", 2);
    }

    if print || rest.is_empty() {
        let names: Vec<String> = if rest.is_empty() {
            let mut names: Vec<String> = env.all().into_iter().map(|(k, _)| k).collect();
            names.extend(env.arrays.names().into_iter().map(|(n, _)| n));
            names.sort();
            names.dedup();
            names
        } else {
            rest.iter().cloned().map(DeclArg::into_text).collect()
        };
        let mut text = String::new();
        let mut code = 0;
        for name in &names {
            match describe(env, name) {
                Some(line) => {
                    text.push_str(&line);
                    text.push('\n');
                }
                None => {
                    report(format_args!("{builtin}: {name}: not found"));
                    code = 1;
                }
            }
        }
        return match write_out(&text) {
            Ok(()) => status(code),
            Err(_) => status(1),
        };
    }

    let mut code = 0;
    for arg in rest {
        let Some((resolved, has_value)) = operand(arg) else {
            invalid_identifier(builtin, &arg.clone().into_text());
            code = 1;
            continue;
        };
        let name = resolved.name.clone();
        let scalar = match (&resolved.value, &resolved.index) {
            (AssignedValue::Scalar(v), None) if has_value && kind.is_none() && !resolved.append => Some(v.clone()),
            _ => None,
        };
        if local {
            env.declare_local(&name, scalar.as_deref());
        }
        if let Some(k) = kind {
            if env.arrays.kind(&name) != Some(k) {
                env.unset(&name);
                match k {
                    ArrayKind::Indexed => env.arrays.declare_indexed(&name),
                    ArrayKind::Associative => env.arrays.declare_associative(&name),
                }
            }
        }
        let assigned_locally = local && scalar.is_some();
        if has_value && !assigned_locally {
            if let Err(e) = assign::apply(env, &resolved) {
                report(format_args!("{builtin}: {e}"));
                code = 1;
                continue;
            }
        }
        if export {
            env.export(&name);
        }
    }
    status(code)
}

pub struct TypesetCommand {
    pub name: &'static str,
}

impl BuiltinCommand for TypesetCommand {
    fn name(&self) -> &'static str {
        self.name
    }
    fn special(&self) -> bool {
        true
    }
    fn run(&self, args: &[String], env: &mut Environment, exec: &mut dyn Executor) -> ExecStatus {
        self.run_declaration(args.iter().map(|a| DeclArg::from_text(a)).collect(), env, exec)
    }
    fn run_declaration(&self, args: Vec<DeclArg>, env: &mut Environment, _exec: &mut dyn Executor) -> ExecStatus {
        let global = args
            .iter()
            .map_while(DeclArg::as_word)
            .take_while(|a| a.starts_with('-'))
            .any(|a| a.contains('g'));
        let local = env.in_function_scope() && !global;
        declare_names(self.name, &args, env, local)
    }
}

pub struct SetCommand;

impl SetCommand {
    fn list_options(options: &ShellOptions, reusable: bool) -> String {
        ShellOptions::NAMES
            .iter()
            .map(|name| {
                let on = options.get_by_name(name).unwrap_or(false);
                if reusable {
                    format!("set {}o {name}\n", if on { '-' } else { '+' })
                } else {
                    format!("{name:<15} {}\n", if on { "on" } else { "off" })
                }
            })
            .collect()
    }
}

impl BuiltinCommand for SetCommand {
    fn name(&self) -> &'static str {
        "set"
    }
    fn special(&self) -> bool {
        true
    }
    fn run(&self, args: &[String], env: &mut Environment, _exec: &mut dyn Executor) -> ExecStatus {
        if args.is_empty() {
            let text: String = env
                .all()
                .into_iter()
                .map(|(k, v)| format!("{k}={}\n", shell_quote(&v)))
                .collect();
            return printed(write_out(&text));
        }
        let mut i = 0;
        while i < args.len() {
            let arg = args[i].as_str();
            if arg == "--" {
                env.positional = args[i + 1..].to_vec();
                return status(0);
            }
            if arg == "-" {
                env.options.xtrace = false;
                env.positional = args[i + 1..].to_vec();
                return status(0);
            }
            let on = match arg.chars().next() {
                Some('-') => true,
                Some('+') => false,
                _ => {
                    env.positional = args[i..].to_vec();
                    return status(0);
                }
            };
            let letters = &arg[1..];
            if letters == "o" {
                match args.get(i + 1) {
                    Some(name) => {
                        if !env.options.set_by_name(name, on) {
                            return fail("set", format_args!("{name}: invalid option name"), 2);
                        }
                        i += 2;
                        continue;
                    }
                    None => return printed(write_out(&Self::list_options(&env.options, !on))),
                }
            }
            for c in letters.chars() {
                if !env.options.set_by_flag(c, on) {
                    return fail("set", format_args!("{}{c}: invalid option", if on { '-' } else { '+' }), 2);
                }
            }
            i += 1;
        }
        status(0)
    }
}

pub struct ShiftCommand;

impl BuiltinCommand for ShiftCommand {
    fn name(&self) -> &'static str {
        "shift"
    }
    fn special(&self) -> bool {
        true
    }
    fn run(&self, args: &[String], env: &mut Environment, _exec: &mut dyn Executor) -> ExecStatus {
        let n = match args.first() {
            None => 1,
            Some(arg) => match arg.parse::<usize>() {
                Ok(n) => n,
                Err(_) => return fail("shift", format_args!("{arg}: numeric argument required"), 1),
            },
        };
        if n > env.positional.len() {
            return status(1);
        }
        env.positional.drain(..n);
        status(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::tests::MockExecutor;
    use crate::executor::ExecOutcome;
    use pretty_assertions::assert_eq;

    fn run(cmd: &dyn BuiltinCommand, args: &[&str], env: &mut Environment) -> ExecOutcome {
        let args: Vec<String> = args.iter().map(|s| s.to_string()).collect();
        cmd.run(&args, env, &mut MockExecutor::new()).unwrap()
    }

    #[test]
    fn test_export_assigns_and_marks() {
        let mut env = Environment::empty();
        env.set("B", "2");
        assert_eq!(run(&ExportCommand, &["A=1", "B"], &mut env), ExecOutcome::Code(0));
        assert_eq!(env.get("A"), Some("1"));
        assert!(env.is_exported("A"));
        assert!(env.is_exported("B"));
        assert_eq!(run(&ExportCommand, &["-n", "B"], &mut env), ExecOutcome::Code(0));
        assert!(!env.is_exported("B"));
        assert_eq!(run(&ExportCommand, &["9bad=1"], &mut env), ExecOutcome::Code(1));
    }

    #[test]
    fn test_unset_variables_elements_and_functions() {
        let mut env = Environment::empty();
        env.set("X", "1");
        env.arrays.assign_list("arr", vec!["a".into(), "b".into()]);
        run(&UnsetCommand, &["X", "arr[0]"], &mut env);
        assert!(!env.is_set("X"));
        assert_eq!(env.arrays.values("arr"), vec!["b"]);
        env.functions
            .insert("f".into(), std::rc::Rc::new(crate::parser::parse_source("true").unwrap()));
        run(&UnsetCommand, &["-f", "f"], &mut env);
        assert!(env.functions.is_empty());
    }

    #[test]
    fn test_set_options_and_positionals() {
        let mut env = Environment::empty();
        assert_eq!(run(&SetCommand, &["-ux", "-o", "pipefail"], &mut env), ExecOutcome::Code(0));
        assert!(env.options.nounset && env.options.xtrace && env.options.pipefail);
        run(&SetCommand, &["+x", "--", "a", "b"], &mut env);
        assert!(!env.options.xtrace);
        assert_eq!(env.positional, vec!["a", "b"]);
        assert_eq!(run(&SetCommand, &["-q"], &mut env), ExecOutcome::Code(2));
        assert_eq!(run(&SetCommand, &["-o", "bogus"], &mut env), ExecOutcome::Code(2));
    }

    #[test]
    fn test_shift() {
        let mut env = Environment::empty();
        env.positional = vec!["1".into(), "2".into(), "3".into()];
        assert_eq!(run(&ShiftCommand, &["2"], &mut env), ExecOutcome::Code(0));
        assert_eq!(env.positional, vec!["3"]);
        assert_eq!(run(&ShiftCommand, &["5"], &mut env), ExecOutcome::Code(1));
        assert_eq!(env.positional, vec!["3"]);
    }

    fn keyed(name: &str, items: &[(&str, &str)]) -> DeclArg {
        DeclArg::Assign(Resolved {
            name: name.into(),
            index: None,
            value: AssignedValue::List(items.iter().map(|(k, v)| (Some(k.to_string()), v.to_string())).collect()),
            append: false,
        })
    }

    #[test]
    fn test_typeset_declares_arrays() {
        let mut env = Environment::empty();
        let typeset = TypesetCommand { name: "typeset" };
        let args = vec![DeclArg::Word("-A".into()), keyed("m", &[("k", "v w"), ("j", "x")])];
        let outcome = typeset.run_declaration(args, &mut env, &mut MockExecutor::new()).unwrap();
        assert_eq!(outcome, ExecOutcome::Code(0));
        assert_eq!(env.arrays.kind("m"), Some(ArrayKind::Associative));
        assert_eq!(env.arrays.keys("m"), vec!["k", "j"]);
        assert_eq!(describe(&env, "m").as_deref(), Some(r#"declare -A m=([k]="v w" [j]="x")"#));
        assert_eq!(run(&typeset, &["-a", "-A", "z"], &mut env), ExecOutcome::Code(2));
        assert_eq!(run(&typeset, &["-q", "z"], &mut env), ExecOutcome::Code(2));
    }

    #[test]
    fn test_array_flag_without_name_is_an_error() {
        let mut env = Environment::empty();
        env.set("keep", "1");
        for name in ["typeset", "declare"] {
            let cmd = TypesetCommand { name };
            assert_eq!(run(&cmd, &["-A"], &mut env), ExecOutcome::Code(2));
            assert_eq!(run(&cmd, &["-a", "--"], &mut env), ExecOutcome::Code(2));
        }
        assert!(env.arrays.names().is_empty());
        assert_eq!(env.get("keep"), Some("1"));
    }

    #[test]
    fn test_quoted_assignment_text_stays_scalar() {
        let mut env = Environment::empty();
        let typeset = TypesetCommand { name: "typeset" };
        assert_eq!(run(&typeset, &["v=(a b)"], &mut env), ExecOutcome::Code(0));
        assert_eq!(env.get("v"), Some("(a b)"));
    }

    #[test]
    fn test_local_scopes_to_function() {
        let mut env = Environment::empty();
        assert_eq!(run(&LocalCommand, &["x=1"], &mut env), ExecOutcome::Code(1));
        env.set("x", "outer");
        env.push_scope();
        assert_eq!(run(&LocalCommand, &["x=inner", "y"], &mut env), ExecOutcome::Code(0));
        assert_eq!(env.get("x"), Some("inner"));
        env.pop_scope();
        assert_eq!(env.get("x"), Some("outer"));
        assert!(!env.is_set("y"));
    }
}
