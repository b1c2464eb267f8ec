//! Embedding entry point: one environment plus one executor.

use std::fs::{self, File};
use std::io::Read;
use std::os::fd::OwnedFd;
use std::path::Path;
use std::thread;

use chrono::{DateTime, Utc};
use nix::unistd::pipe;
use tracing::{debug, info_span};

use crate::config::{Config, JobControl};
use crate::environment::Environment;
use crate::error::ShellError;
use crate::executor::process::{child_exit, flush_std, fork_process, Forked, Group};
use crate::executor::{move_fd, report, wait_child, DefaultExecutor, ExecOutcome, Executor};
use crate::parser::{parse_source, ParseError};

/// Result of running a command string in a child shell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionRecord {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl ExecutionRecord {
    pub fn duration(&self) -> chrono::Duration {
        self.finished_at - self.started_at
    }
}

pub struct Shell {
    env: Environment,
    exec: DefaultExecutor,
    exit_code: Option<i32>,
}

impl Default for Shell {
    fn default() -> Self {
        Self::new()
    }
}

impl Shell {
    /// A shell seeded from the process environment.
    pub fn new() -> Self {
        Self::with_environment(Environment::new())
    }

    pub fn with_environment(env: Environment) -> Self {
        Shell {
            env,
            exec: DefaultExecutor::new(),
            exit_code: None,
        }
    }

    pub fn env(&self) -> &Environment {
        &self.env
    }

    pub fn env_mut(&mut self) -> &mut Environment {
        &mut self.env
    }

    pub fn last_status(&self) -> i32 {
        self.env.last_status
    }

    /// Set once `exit` has run at the top level.
    pub fn exit_requested(&self) -> Option<i32> {
        self.exit_code
    }

    /// Applies startup-file settings. Prompt variables already present in
    /// the environment are left alone.
    pub fn apply_config(&mut self, config: &Config) {
        let env = &mut self.env;
        env.options.pipefail |= config.pipefail;
        env.options.nounset |= config.nounset;
        env.options.xtrace |= config.xtrace;
        match config.job_control {
            JobControl::On => env.options.job_control = true,
            JobControl::Off => env.options.job_control = false,
            JobControl::Auto => env.options.job_control = env.options.interactive,
        }
        if !env.is_set("PS1") {
            env.set("PS1", &config.prompt);
        }
        if !env.is_set("PS2") {
            env.set("PS2", &config.continuation_prompt);
        }
        for (name, value) in &config.env_vars {
            env.set(name, value);
            env.export(name);
        }
    }

    /// Parses and runs `source` in this shell. Syntax errors are returned;
    /// execution failures are reported on stderr and become the status.
    pub fn run_source(&mut self, source: &str) -> Result<i32, ShellError> {
        let ast = match parse_source(source) {
            Ok(ast) => ast,
            Err(ParseError::EmptyInput) => return Ok(self.env.last_status),
            Err(e) => {
                if !e.is_incomplete() {
                    self.env.last_status = 2;
                }
                return Err(e.into());
            }
        };
        let code = match self.exec.exec(&ast, &mut self.env) {
            Ok(ExecOutcome::Exit(code)) => {
                debug!(code, "exit requested");
                self.exit_code = Some(code);
                code
            }
            Ok(outcome) => outcome.code(),
            Err(e) => {
                report(&e);
                e.status()
            }
        };
        self.env.last_status = code;
        Ok(code)
    }

    /// Runs a script file with `$0` set to its path.
    pub fn run_file(&mut self, path: &Path, args: Vec<String>) -> Result<i32, ShellError> {
        let source = fs::read_to_string(path)?;
        self.env.shell_name = path.display().to_string();
        self.env.positional = args;
        let _span = info_span!("script", path = %path.display()).entered();
        self.run_source(&source)
    }

    /// Runs `source` in a forked copy of this shell with stdin from
    /// `/dev/null`, capturing both output streams. This shell's state is
    /// not changed.
    pub fn run_capture(&mut self, source: &str) -> Result<ExecutionRecord, ShellError> {
        let started_at = Utc::now();
        let (out_read, out_write) = pipe().map_err(crate::executor::ExecError::from)?;
        let (err_read, err_write) = pipe().map_err(crate::executor::ExecError::from)?;
        let null: OwnedFd = File::open("/dev/null")?.into();
        match fork_process(&self.env, Group::Inherit, false)? {
            Forked::Child => {
                drop(out_read);
                drop(err_read);
                move_fd(null, libc::STDIN_FILENO);
                move_fd(out_write, libc::STDOUT_FILENO);
                move_fd(err_write, libc::STDERR_FILENO);
                self.env.become_subshell();
                let code = match self.run_source(source) {
                    Ok(code) => code,
                    Err(e) => {
                        report(&e);
                        e.status()
                    }
                };
                flush_std();
                child_exit(code)
            }
            Forked::Parent(pid) => {
                drop(null);
                drop(out_write);
                drop(err_write);
                // Drain stderr concurrently so neither pipe can fill up.
                let stderr_reader = thread::spawn(move || {
                    let mut bytes = Vec::new();
                    File::from(err_read).read_to_end(&mut bytes).map(|_| bytes)
                });
                let mut stdout = Vec::new();
                let stdout_result = File::from(out_read).read_to_end(&mut stdout);
                let stderr_result = stderr_reader.join().unwrap_or_else(|_| Ok(Vec::new()));
                let exit_code = wait_child(pid);
                let finished_at = Utc::now();
                stdout_result?;
                let stderr = stderr_result?;
                debug!(pid = pid.as_raw(), exit_code, "captured run finished");
                Ok(ExecutionRecord {
                    exit_code,
                    stdout: String::from_utf8_lossy(&stdout).into_owned(),
                    stderr: String::from_utf8_lossy(&stderr).into_owned(),
                    started_at,
                    finished_at,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn shell() -> Shell {
        let mut env = Environment::empty();
        env.set("PATH", "/usr/local/bin:/usr/bin:/bin");
        env.export("PATH");
        env.set("IFS", " \t\n");
        Shell::with_environment(env)
    }

    fn capture(src: &str) -> ExecutionRecord {
        shell().run_capture(src).unwrap()
    }

    fn stdout(src: &str) -> String {
        capture(src).stdout
    }

    #[test]
    fn test_echo_and_status() {
        let record = capture("echo hello; exit 3");
        assert_eq!(record.stdout, "hello\n");
        assert_eq!(record.exit_code, 3);
        assert!(record.finished_at >= record.started_at);
    }

    #[test]
    fn test_stderr_is_captured_separately() {
        let record = capture("echo out; echo err >&2; nosuchcommand-zzz");
        assert_eq!(record.stdout, "out\n");
        assert!(record.stderr.starts_with("err\n"), "{}", record.stderr);
        assert!(record.stderr.contains("nosuchcommand-zzz: command not found"));
        assert_eq!(record.exit_code, 127);
    }

    #[test]
    fn test_pipelines_and_lists() {
        assert_eq!(stdout("printf 'b\\na\\n' | sort"), "a\nb\n");
        assert_eq!(stdout("false && echo no || echo yes"), "yes\n");
        assert_eq!(stdout("true | false; echo $?"), "1\n");
        assert_eq!(stdout("set -o pipefail; false | true; echo $?"), "1\n");
        assert_eq!(stdout("! true; echo $?"), "1\n");
    }

    #[test]
    fn test_control_flow() {
        let src = "for i in 1 2 3; do\n  if [ $i = 2 ]; then continue; fi\n  echo $i\ndone";
        assert_eq!(stdout(src), "1\n3\n");
        assert_eq!(stdout("i=0; while [ $i -lt 3 ]; do i=$((i+1)); done; echo $i"), "3\n");
        assert_eq!(stdout("case foo.rs in *.c) echo c;; *.rs) echo rust;; esac"), "rust\n");
        assert_eq!(stdout("for i in a b; do for j in 1 2; do break 2; done; done; echo $i$j"), "a1\n");
    }

    #[test]
    fn test_functions_and_locals() {
        let src = "x=outer\nf() { local x=inner; echo $x $1; return 4; }\nf arg; echo $? $x";
        assert_eq!(stdout(src), "inner arg\n4 outer\n");
    }

    #[test]
    fn test_expansions() {
        assert_eq!(stdout("echo {a,b}{1..2}"), "a1 a2 b1 b2\n");
        assert_eq!(stdout("unset X; echo ${X:-d} ${X-e}; X=; echo \"[${X:-d}]\" \"[${X-e}]\""), "d e\n[d] []\n");
        assert_eq!(stdout("echo ${Y:=set}; echo $Y"), "set\nset\n");
        assert_eq!(stdout("v=archive.tar.gz; echo ${v%.gz} ${v%%.*} ${v#*.} ${#v}"), "archive.tar archive tar.gz 14\n");
        assert_eq!(stdout("echo $(echo nested $(echo deep))"), "nested deep\n");
        assert_eq!(stdout("echo $((2 + 3 * 4)) $((7 / 2)) $((1 << 4))"), "14 3 16\n");
        assert_eq!(stdout("echo 'a  $b' \"two  spaces\""), "a  $b two  spaces\n");
    }

    #[test]
    fn test_field_splitting_and_glob() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["b.txt", "a.txt", "c.log"] {
            std::fs::write(dir.path().join(name), "").unwrap();
        }
        let src = format!("cd '{}' && echo *.txt; v='1 2  3'; set -- $v; echo $#", dir.path().display());
        assert_eq!(stdout(&src), "a.txt b.txt\n3\n");
        assert_eq!(stdout("set -f; echo /*zzz-no-match*"), "/*zzz-no-match*\n");
    }

    #[test]
    fn test_arrays() {
        let src = "typeset -A m; m[k]=v; m[j]=w; echo ${m[k]} ${#m[@]}\na=(x y z); a[5]=q; echo ${a[1]} ${#a[@]} ${a[@]}";
        assert_eq!(stdout(src), "v 2\ny 4 x y z q\n");
    }

    #[test]
    fn test_declaration_keeps_quoted_compound_items() {
        assert_eq!(stdout("typeset -a b=(\"p q\" r); echo ${#b[@]}; echo \"${b[0]}\""), "2\np q\n");
        assert_eq!(stdout("typeset -A m=([k]=\"a b\" [j]=c); echo \"${m[k]}\" ${#m[@]}"), "a b 2\n");
        assert_eq!(stdout("f() { local -a l=('x y' z); echo ${#l[@]}; }; f"), "2\n");
        assert_eq!(stdout("v='1 2'; declare w=$v; echo \"$w\""), "1 2\n");
    }

    #[test]
    fn test_declaration_arguments_are_not_globbed() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("x=0"), "").unwrap();
        let src = format!(
            "cd '{}' && typeset x=*; echo \"$x\"; export y=*; echo \"$y\"",
            dir.path().display()
        );
        assert_eq!(stdout(&src), "*\n*\n");
    }

    #[test]
    fn test_typeset_array_flag_requires_a_name() {
        let record = capture("typeset -A; echo st=$?; declare -a; echo st=$?");
        assert_eq!(record.stdout, "st=2\nst=2\n");
        assert!(record.stderr.contains("typeset: missing variable name"), "{}", record.stderr);
    }

    #[test]
    fn test_array_slices() {
        let src = "a=(p q r s); a[9]=z; echo ${a[@]:2}; echo ${a[@]:1:2}; echo ${a[@]: -1}\ntypeset -A m=([k]=v); set -- ${m[@]:0}; echo $#";
        assert_eq!(stdout(src), "r s z\nq r\nz\n0\n");
    }

    #[test]
    fn test_redirections_and_heredoc() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("out.txt");
        let src = format!(
            "echo one > '{f}'; echo two >> '{f}'; cat < '{f}'; name=world\ncat <<EOF\nhello $name\nEOF\ncat <<'EOF'\n$name\nEOF",
            f = file.display()
        );
        assert_eq!(stdout(&src), "one\ntwo\nhello world\n$name\n");
    }

    #[test]
    fn test_subshell_isolation() {
        assert_eq!(stdout("x=1; (x=2; cd /; echo $x); echo $x"), "2\n1\n");
        assert_eq!(stdout("x=1; { x=2; }; echo $x"), "2\n");
    }

    #[test]
    fn test_prefix_assignment_scope() {
        assert_eq!(stdout("X=temp sh -c 'echo $X'; echo \"[$X]\""), "temp\n[]\n");
    }

    #[test]
    fn test_background_and_wait() {
        let record = capture("sleep 0.1 & echo started; wait $!; echo waited $?");
        assert_eq!(record.stdout, "started\nwaited 0\n");
        let record = capture("sh -c 'exit 6' & wait %1; echo $?");
        assert_eq!(record.stdout, "6\n");
    }

    #[test]
    fn test_signal_exit_status() {
        assert_eq!(stdout("sh -c 'kill -TERM $$'; echo $?"), "143\n");
    }

    #[test]
    fn test_syntax_error_status() {
        let record = capture("if true; then echo x");
        assert_eq!(record.exit_code, 2);
        assert!(record.stderr.contains("syntax error"), "{}", record.stderr);
        assert_eq!(record.stdout, "");
    }

    #[test]
    fn test_run_source_keeps_state() {
        let mut sh = shell();
        assert_eq!(sh.run_source("V=kept").unwrap(), 0);
        assert_eq!(sh.env().get("V"), Some("kept"));
        assert!(sh.run_source("if true; then").unwrap_err().is_incomplete());
        assert_eq!(sh.run_source("exit 9").unwrap(), 9);
        assert_eq!(sh.exit_requested(), Some(9));
    }

    #[test]
    fn test_run_capture_does_not_touch_parent() {
        let mut sh = shell();
        sh.run_capture("LEAK=1").unwrap();
        assert_eq!(sh.env().get("LEAK"), None);
    }

    #[test]
    fn test_apply_config() {
        let mut sh = shell();
        let mut config = Config::default();
        config.pipefail = true;
        config.env_vars.insert("EDITOR".into(), "vi".into());
        sh.apply_config(&config);
        assert!(sh.env().options.pipefail);
        assert!(sh.env().is_exported("EDITOR"));
        assert_eq!(sh.env().get("PS2"), Some("> "));
        assert!(!sh.env().options.job_control);
    }
}
