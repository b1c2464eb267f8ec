//! `test` and `[`.

use std::fs;
use std::os::unix::fs::{FileTypeExt, MetadataExt};
use std::path::Path;

use nix::unistd::{access, AccessFlags};

use crate::environment::Environment;
use crate::executor::builtin::manager::BuiltinCommand;
use crate::executor::builtin::{fail, status};
use crate::executor::{ExecStatus, Executor};

const UNARY: &[&str] = &[
    "-e", "-f", "-d", "-r", "-w", "-x", "-s", "-L", "-h", "-p", "-S", "-b", "-c", "-t", "-z", "-n",
];

const BINARY: &[&str] = &[
    "=", "==", "!=", "<", ">", "-eq", "-ne", "-lt", "-le", "-gt", "-ge", "-nt", "-ot", "-ef",
];

fn is_binary(op: &str) -> bool {
    BINARY.contains(&op)
}

fn unary(op: &str, operand: &str) -> Result<bool, String> {
    let path = Path::new(operand);
    let meta = || fs::metadata(path).ok();
    Ok(match op {
        "-z" => operand.is_empty(),
        "-n" => !operand.is_empty(),
        "-e" => meta().is_some(),
        "-f" => meta().is_some_and(|m| m.is_file()),
        "-d" => meta().is_some_and(|m| m.is_dir()),
        "-s" => meta().is_some_and(|m| m.len() > 0),
        "-p" => meta().is_some_and(|m| m.file_type().is_fifo()),
        "-S" => meta().is_some_and(|m| m.file_type().is_socket()),
        "-b" => meta().is_some_and(|m| m.file_type().is_block_device()),
        "-c" => meta().is_some_and(|m| m.file_type().is_char_device()),
        "-L" | "-h" => fs::symlink_metadata(path).is_ok_and(|m| m.file_type().is_symlink()),
        "-r" => access(path, AccessFlags::R_OK).is_ok(),
        "-w" => access(path, AccessFlags::W_OK).is_ok(),
        "-x" => access(path, AccessFlags::X_OK).is_ok(),
        "-t" => {
            let fd: i32 = operand.trim().parse().map_err(|_| format!("{operand}: integer expression expected"))?;
            // SAFETY: isatty only inspects the descriptor.
            unsafe { libc::isatty(fd) == 1 }
        }
        _ => return Err(format!("{op}: unary operator expected")),
    })
}

fn integer(s: &str) -> Result<i64, String> {
    s.trim().parse().map_err(|_| format!("{s}: integer expression expected"))
}

fn binary(left: &str, op: &str, right: &str) -> Result<bool, String> {
    let modified = |p: &str| fs::metadata(p).and_then(|m| m.modified()).ok();
    Ok(match op {
        "=" | "==" => left == right,
        "!=" => left != right,
        "<" => left < right,
        ">" => left > right,
        "-eq" => integer(left)? == integer(right)?,
        "-ne" => integer(left)? != integer(right)?,
        "-lt" => integer(left)? < integer(right)?,
        "-le" => integer(left)? <= integer(right)?,
        "-gt" => integer(left)? > integer(right)?,
        "-ge" => integer(left)? >= integer(right)?,
        "-nt" => match (modified(left), modified(right)) {
            (Some(a), Some(b)) => a > b,
            (Some(_), None) => true,
            _ => false,
        },
        "-ot" => match (modified(left), modified(right)) {
            (Some(a), Some(b)) => a < b,
            (None, Some(_)) => true,
            _ => false,
        },
        "-ef" => match (fs::metadata(left), fs::metadata(right)) {
            (Ok(a), Ok(b)) => a.dev() == b.dev() && a.ino() == b.ino(),
            _ => false,
        },
        _ => return Err(format!("{op}: binary operator expected")),
    })
}

/// Recursive descent over the argument list:
/// `or := and (-o and)*`, `and := not (-a not)*`, `not := ! not | primary`.
struct TestParser<'a> {
    args: &'a [String],
    pos: usize,
}

impl<'a> TestParser<'a> {
    fn peek(&self, offset: usize) -> Option<&'a str> {
        self.args.get(self.pos + offset).map(String::as_str)
    }

    fn next(&mut self) -> Option<&'a str> {
        let arg = self.peek(0);
        self.pos += 1;
        arg
    }

    fn remaining(&self) -> usize {
        self.args.len().saturating_sub(self.pos)
    }

    fn parse(mut self) -> Result<bool, String> {
        let result = match self.args.len() {
            0 => false,
            // Small argument counts are decided by position, so that
            // operators can themselves be tested as strings.
            1 => !self.args[0].is_empty(),
            2 if self.args[0] == "!" => self.args[1].is_empty(),
            2 if UNARY.contains(&self.args[0].as_str()) => unary(&self.args[0], &self.args[1])?,
            3 if is_binary(&self.args[1]) => binary(&self.args[0], &self.args[1], &self.args[2])?,
            _ => {
                let value = self.or()?;
                if let Some(extra) = self.peek(0) {
                    return Err(format!("{extra}: too many arguments"));
                }
                value
            }
        };
        Ok(result)
    }

    fn or(&mut self) -> Result<bool, String> {
        let mut value = self.and()?;
        while self.peek(0) == Some("-o") {
            self.pos += 1;
            let rhs = self.and()?;
            value = value || rhs;
        }
        Ok(value)
    }

    fn and(&mut self) -> Result<bool, String> {
        let mut value = self.not()?;
        while self.peek(0) == Some("-a") {
            self.pos += 1;
            let rhs = self.not()?;
            value = value && rhs;
        }
        Ok(value)
    }

    fn not(&mut self) -> Result<bool, String> {
        if self.peek(0) == Some("!") && self.remaining() > 1 && !self.peek(1).is_some_and(is_binary) {
            self.pos += 1;
            return Ok(!self.not()?);
        }
        self.primary()
    }

    fn primary(&mut self) -> Result<bool, String> {
        let Some(first) = self.next() else {
            return Err("argument expected".to_string());
        };
        if let (Some(op), Some(right)) = (self.peek(0), self.peek(1)) {
            if is_binary(op) {
                self.pos += 2;
                return binary(first, op, right);
            }
        }
        if first == "(" {
            let value = self.or()?;
            if self.next() != Some(")") {
                return Err("`)' expected".to_string());
            }
            return Ok(value);
        }
        if UNARY.contains(&first) {
            if let Some(operand) = self.next() {
                return unary(first, operand);
            }
        }
        Ok(!first.is_empty())
    }
}

pub fn evaluate(args: &[String]) -> Result<bool, String> {
    TestParser { args, pos: 0 }.parse()
}

pub struct TestCommand {
    pub name: &'static str,
}

impl BuiltinCommand for TestCommand {
    fn name(&self) -> &'static str {
        self.name
    }
    fn run(&self, args: &[String], _env: &mut Environment, _exec: &mut dyn Executor) -> ExecStatus {
        let args = if self.name == "[" {
            match args.split_last() {
                Some((last, rest)) if last == "]" => rest,
                _ => return fail(self.name, "missing `]'", 2),
            }
        } else {
            args
        };
        match evaluate(args) {
            Ok(true) => status(0),
            Ok(false) => status(1),
            Err(msg) => fail(self.name, msg, 2),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::tests::MockExecutor;
    use crate::executor::ExecOutcome;
    use pretty_assertions::assert_eq;

    fn eval(args: &[&str]) -> Result<bool, String> {
        let args: Vec<String> = args.iter().map(|s| s.to_string()).collect();
        evaluate(&args)
    }

    #[test]
    fn test_strings_and_integers() {
        assert_eq!(eval(&[]), Ok(false));
        assert_eq!(eval(&["x"]), Ok(true));
        assert_eq!(eval(&[""]), Ok(false));
        assert_eq!(eval(&["-n"]), Ok(true));
        assert_eq!(eval(&["-z", ""]), Ok(true));
        assert_eq!(eval(&["a", "=", "a"]), Ok(true));
        assert_eq!(eval(&["a", "!=", "a"]), Ok(false));
        assert_eq!(eval(&["10", "-gt", "9"]), Ok(true));
        assert_eq!(eval(&["abc", "<", "abd"]), Ok(true));
        assert!(eval(&["x", "-eq", "1"]).is_err());
    }

    #[test]
    fn test_connectives_and_grouping() {
        assert_eq!(eval(&["!", "a", "=", "b"]), Ok(true));
        assert_eq!(eval(&["a", "=", "a", "-a", "b", "=", "c"]), Ok(false));
        assert_eq!(eval(&["a", "=", "b", "-o", "c", "=", "c"]), Ok(true));
        assert_eq!(eval(&["(", "1", "-eq", "1", ")", "-a", "-n", "x"]), Ok(true));
        assert_eq!(eval(&["!", ""]), Ok(true));
        assert!(eval(&["(", "x"]).is_err());
    }

    #[test]
    fn test_file_operators() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("f");
        fs::write(&file, "data").unwrap();
        let f = file.to_string_lossy().into_owned();
        let d = dir.path().to_string_lossy().into_owned();
        assert_eq!(eval(&["-f", &f]), Ok(true));
        assert_eq!(eval(&["-d", &f]), Ok(false));
        assert_eq!(eval(&["-d", &d]), Ok(true));
        assert_eq!(eval(&["-s", &f]), Ok(true));
        assert_eq!(eval(&["-e", &format!("{d}/missing")]), Ok(false));
        assert_eq!(eval(&[&f, "-ef", &f]), Ok(true));
    }

    #[test]
    fn test_bracket_requires_closing() {
        let bracket = TestCommand { name: "[" };
        let mut env = Environment::empty();
        let args: Vec<String> = vec!["a".into(), "=".into(), "a".into()];
        assert_eq!(bracket.run(&args, &mut env, &mut MockExecutor::new()).unwrap(), ExecOutcome::Code(2));
        let mut closed = args.clone();
        closed.push("]".into());
        assert_eq!(bracket.run(&closed, &mut env, &mut MockExecutor::new()).unwrap(), ExecOutcome::Code(0));
    }
}
