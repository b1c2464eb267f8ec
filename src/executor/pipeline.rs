//! Everything that runs in a forked copy of the shell: pipelines, subshells,
//! background lists and command substitutions.

use std::fs::File;
use std::io::{self, Read, Write};
use std::os::fd::{AsRawFd, IntoRawFd, OwnedFd, RawFd};

use nix::errno::Errno;
use nix::sys::wait::{waitpid, WaitStatus};
use nix::unistd::{pipe, Pid};
use tracing::{debug, trace};

use crate::ast::AstNode;
use crate::environment::Environment;
use crate::executor::process::{child_exit, fork_process, wait_foreground, Forked, Group};
use crate::executor::{report, Captured, DefaultExecutor, ExecError, ExecOutcome, ExecStatus, Executor};
use crate::parser::{parse_source, ParseError};

/// Moves `fd` onto `target` in a child, closing the original.
pub(crate) fn move_fd(fd: OwnedFd, target: RawFd) {
    if fd.as_raw_fd() == target {
        let _ = fd.into_raw_fd();
        return;
    }
    // SAFETY: both descriptors are valid in the child.
    unsafe { libc::dup2(fd.as_raw_fd(), target) };
}

impl DefaultExecutor {
    /// Runs `node` to completion in a forked child. Never returns.
    fn run_in_child(&mut self, node: &AstNode, env: &mut Environment) -> ! {
        env.become_subshell();
        self.exec_in_place = matches!(node, AstNode::Command(_));
        let code = match self.exec(node, env) {
            Ok(outcome) => outcome.code(),
            Err(e) => {
                report(&e);
                e.status()
            }
        };
        child_exit(code)
    }

    /// One process per stage, all in one process group, joined by pipes.
    pub(super) fn exec_pipeline(&mut self, commands: &[AstNode], env: &mut Environment) -> ExecStatus {
        let text = commands.iter().map(|c| c.to_string()).collect::<Vec<_>>().join(" | ");
        let mut pids: Vec<Pid> = Vec::with_capacity(commands.len());
        let mut pgid: Option<Pid> = None;
        let mut upstream: Option<OwnedFd> = None;

        for (i, stage) in commands.iter().enumerate() {
            let last = i + 1 == commands.len();
            let downstream = if last { None } else { Some(pipe()?) };
            let group = pgid.map_or(Group::Own, Group::Join);
            match fork_process(env, group, true)? {
                Forked::Child => {
                    if let Some(read) = upstream.take() {
                        move_fd(read, libc::STDIN_FILENO);
                    }
                    if let Some((read, write)) = downstream {
                        drop(read);
                        move_fd(write, libc::STDOUT_FILENO);
                    }
                    self.run_in_child(stage, env)
                }
                Forked::Parent(pid) => {
                    pgid.get_or_insert(pid);
                    pids.push(pid);
                    // The parent keeps only the read end for the next stage.
                    upstream = downstream.map(|(read, _write)| read);
                }
            }
        }
        drop(upstream);

        let Some(pgid) = pgid else {
            return Ok(ExecOutcome::Code(0));
        };
        let id = env.jobs.add(pgid, &pids, text, true, env.options.pipefail);
        debug!(job = id, stages = pids.len(), "pipeline started");
        Ok(ExecOutcome::Code(wait_foreground(env, id, pgid)))
    }

    pub(super) fn exec_subshell(&mut self, body: &AstNode, env: &mut Environment) -> ExecStatus {
        match fork_process(env, Group::Own, true)? {
            Forked::Child => self.run_in_child(body, env),
            Forked::Parent(pid) => {
                let id = env.jobs.add(pid, &[pid], format!("({body})"), true, false);
                Ok(ExecOutcome::Code(wait_foreground(env, id, pid)))
            }
        }
    }

    /// Starts `node` as a background job. The list continues immediately.
    pub(super) fn exec_background(&mut self, node: &AstNode, env: &mut Environment) -> ExecStatus {
        match fork_process(env, Group::Own, false)? {
            Forked::Child => {
                if !env.options.job_control {
                    // Without job control a background job must not read the terminal.
                    if let Ok(null) = File::open("/dev/null") {
                        move_fd(null.into(), libc::STDIN_FILENO);
                    }
                }
                self.run_in_child(node, env)
            }
            Forked::Parent(pid) => {
                let id = env.jobs.add(pid, &[pid], node.to_string(), false, env.options.pipefail);
                env.last_background_pid = Some(pid.as_raw());
                if env.options.interactive {
                    let _ = writeln!(io::stderr(), "[{id}] {pid}");
                }
                Ok(ExecOutcome::Code(0))
            }
        }
    }

    /// Runs `source` in a child with stdout on a pipe and collects the output.
    pub(super) fn capture_output(&mut self, source: &str, env: &mut Environment) -> Result<Captured, ExecError> {
        let ast = match parse_source(source) {
            Ok(ast) => ast,
            Err(ParseError::EmptyInput) => return Ok(Captured::default()),
            Err(e) => return Err(e.into()),
        };
        let (read, write) = pipe()?;
        match fork_process(env, Group::Inherit, false)? {
            Forked::Child => {
                drop(read);
                move_fd(write, libc::STDOUT_FILENO);
                self.run_in_child(&ast, env)
            }
            Forked::Parent(pid) => {
                drop(write);
                let mut bytes = Vec::new();
                let read_result = File::from(read).read_to_end(&mut bytes);
                let status = wait_child(pid);
                read_result?;
                trace!(pid = pid.as_raw(), status, bytes = bytes.len(), "command substitution finished");
                Ok(Captured {
                    stdout: String::from_utf8_lossy(&bytes).into_owned(),
                    status,
                })
            }
        }
    }
}

/// Blocks until `pid` terminates and returns its shell-style status.
pub(crate) fn wait_child(pid: Pid) -> i32 {
    loop {
        match waitpid(pid, None) {
            Ok(WaitStatus::Exited(_, code)) => return code,
            Ok(WaitStatus::Signaled(_, sig, _)) => return 128 + sig as i32,
            Ok(_) => continue,
            Err(Errno::EINTR) => continue,
            Err(e) => {
                debug!(pid = pid.as_raw(), error = %e, "waitpid failed");
                return 1;
            }
        }
    }
}
