//! Forking, program execution and foreground waits.

use std::ffi::CString;
use std::fs;
use std::io::{self, Write};
use std::path::PathBuf;

use nix::errno::Errno;
use nix::unistd::{execve, fork, getpid, setpgid, ForkResult, Pid};
use tracing::{debug, trace};

use crate::environment::Environment;
use crate::executor::{report, ExecError, Executor, PathResolver};
use crate::jobs::{JobId, JobState};
use crate::parser::{parse_source, ParseError};
use crate::signals;

/// Process group a new child is placed in when job control is on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Group {
    /// Leader of a new group.
    Own,
    Join(Pid),
    /// Stays in the shell's group.
    Inherit,
}

pub enum Forked {
    Child,
    Parent(Pid),
}

pub fn flush_std() {
    let _ = io::stdout().flush();
    let _ = io::stderr().flush();
}

/// Forks, placing the child in `group`. A foreground child also takes the
/// terminal when the shell is interactive.
pub fn fork_process(env: &Environment, group: Group, foreground: bool) -> Result<Forked, ExecError> {
    flush_std();
    // SAFETY: the child only runs shell code of this single-threaded
    // interpreter or calls execve.
    match unsafe { fork() }? {
        ForkResult::Child => {
            signals::reset_for_child();
            if env.options.job_control {
                let pid = getpid();
                let pgid = match group {
                    Group::Own => Some(pid),
                    Group::Join(leader) => Some(leader),
                    Group::Inherit => None,
                };
                if let Some(pgid) = pgid {
                    let _ = setpgid(pid, pgid);
                    if foreground && env.options.interactive {
                        signals::give_terminal(pgid);
                    }
                }
            }
            Ok(Forked::Child)
        }
        ForkResult::Parent { child } => {
            if env.options.job_control {
                // Set on both sides so neither ordering can race.
                match group {
                    Group::Own => {
                        let _ = setpgid(child, child);
                    }
                    Group::Join(leader) => {
                        let _ = setpgid(child, leader);
                    }
                    Group::Inherit => {}
                }
            }
            trace!(pid = child.as_raw(), "forked");
            Ok(Forked::Parent(child))
        }
    }
}

/// Terminates a forked child without running destructors or atexit handlers.
pub fn child_exit(code: i32) -> ! {
    flush_std();
    // SAFETY: _exit never returns and touches no Rust state.
    unsafe { libc::_exit(code & 0xff) }
}

/// Why `exec_program` returned.
#[derive(Debug)]
pub enum ExecFailure {
    /// The file exists but is not a binary; run it as a shell script.
    Script(PathBuf),
    Error(ExecError),
}

fn cstring(s: &str) -> Result<CString, ExecError> {
    CString::new(s).map_err(|_| ExecError::Custom(format!("{s}: argument contains a NUL byte")))
}

/// Environment block for a child: exported variables overridden by the
/// command's prefix assignments.
pub fn build_envp(env: &Environment, assignments: &[(String, String)]) -> Vec<(String, String)> {
    let mut vars = env.exported_vars();
    for (name, value) in assignments {
        match vars.iter_mut().find(|(k, _)| k == name) {
            Some(slot) => slot.1 = value.clone(),
            None => vars.push((name.clone(), value.clone())),
        }
    }
    vars
}

/// Replaces the current process image. Only returns on failure.
pub fn exec_program(argv: &[String], env: &Environment, assignments: &[(String, String)]) -> ExecFailure {
    let Some(name) = argv.first() else {
        return ExecFailure::Error(ExecError::Custom("exec: missing command".into()));
    };
    let Some(path) = PathResolver.resolve(name, env.get("PATH")) else {
        return ExecFailure::Error(ExecError::CommandNotFound(name.clone()));
    };
    let result = (|| -> Result<Errno, ExecError> {
        let prog = cstring(&path.to_string_lossy())?;
        let args = argv.iter().map(|a| cstring(a)).collect::<Result<Vec<_>, _>>()?;
        let envp = build_envp(env, assignments)
            .into_iter()
            .map(|(k, v)| cstring(&format!("{k}={v}")))
            .collect::<Result<Vec<_>, _>>()?;
        debug!(program = %path.display(), "execve");
        flush_std();
        match execve(&prog, &args, &envp) {
            Err(errno) => Ok(errno),
            Ok(never) => match never {},
        }
    })();
    let errno = match result {
        Ok(errno) => errno,
        Err(err) => return ExecFailure::Error(err),
    };
    match errno {
        Errno::ENOEXEC => ExecFailure::Script(path),
        Errno::ENOENT if name.contains('/') => ExecFailure::Error(ExecError::NoSuchFile(name.clone())),
        Errno::ENOENT => ExecFailure::Error(ExecError::CommandNotFound(name.clone())),
        Errno::EACCES | Errno::EISDIR | Errno::EPERM => {
            ExecFailure::Error(ExecError::PermissionDenied(name.clone()))
        }
        other => ExecFailure::Error(ExecError::Custom(format!("{name}: {}", other.desc()))),
    }
}

/// Parses and runs a whole script, returning its exit status.
pub fn run_script(exec: &mut dyn Executor, source: &str, env: &mut Environment) -> i32 {
    match parse_source(source) {
        Ok(ast) => match exec.exec(&ast, env) {
            Ok(outcome) => outcome.code(),
            Err(e) => {
                report(&e);
                e.status()
            }
        },
        Err(ParseError::EmptyInput) => 0,
        Err(e) => {
            report(&e);
            2
        }
    }
}

/// Replaces the process with `argv`, or runs the file as a script when the
/// kernel refuses it as a binary. Returns the status to exit with on failure.
pub fn exec_or_script(
    exec: &mut dyn Executor,
    argv: &[String],
    exports: &[(String, String)],
    env: &mut Environment,
) -> i32 {
    match exec_program(argv, env, exports) {
        ExecFailure::Error(e) => {
            report(&e);
            e.status()
        }
        ExecFailure::Script(path) => {
            let source = match fs::read_to_string(&path) {
                Ok(source) => source,
                Err(e) => {
                    report(format_args!("{}: {e}", path.display()));
                    return 126;
                }
            };
            debug!(script = %path.display(), "running as shell script");
            for (name, value) in exports {
                env.set(name, value);
                env.export(name);
            }
            env.reset_for_script(&argv[0], argv[1..].to_vec());
            run_script(exec, &source, env)
        }
    }
}

/// Waits for a foreground job, moving the terminal to it and back.
/// A stopped job stays in the table; a finished one is removed.
pub fn wait_foreground(env: &mut Environment, id: JobId, pgid: Pid) -> i32 {
    let tty = env.options.job_control && env.options.interactive;
    if tty {
        signals::give_terminal(pgid);
    }
    let result = env.jobs.wait_for(id, env.options.job_control);
    if tty {
        signals::reclaim_terminal();
    }
    match result {
        Some(r) if r.state == JobState::Stopped => r.code,
        Some(r) => {
            env.jobs.remove(id);
            r.code
        }
        None => 0,
    }
}
