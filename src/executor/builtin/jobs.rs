//! Job control builtins: `jobs`, `fg`, `bg`, `wait` and `kill`.

use nix::sys::signal::{kill, killpg, Signal};
use nix::unistd::Pid;
use tracing::debug;

use crate::environment::Environment;
use crate::executor::builtin::manager::BuiltinCommand;
use crate::executor::builtin::{fail, printed, status, write_out};
use crate::executor::{process, report, ExecStatus, Executor};
use crate::jobs::{JobId, JobState};
use crate::signals;

/// Resolves an optional job argument. A bare number is taken as a job id.
fn job_spec(env: &Environment, arg: Option<&str>) -> Result<JobId, String> {
    env.jobs.poll();
    match arg {
        None => env.jobs.current().ok_or_else(|| "current: no such job".to_string()),
        Some(spec) => {
            let full = if spec.starts_with('%') { spec.to_string() } else { format!("%{spec}") };
            env.jobs.resolve(&full).ok_or_else(|| format!("{spec}: no such job"))
        }
    }
}

fn require_job_control(builtin: &str, env: &Environment) -> Result<(), ExecStatus> {
    if env.options.job_control {
        Ok(())
    } else {
        Err(fail(builtin, "no job control", 1))
    }
}

pub struct JobsCommand;

impl BuiltinCommand for JobsCommand {
    fn name(&self) -> &'static str {
        "jobs"
    }
    fn run(&self, args: &[String], env: &mut Environment, _exec: &mut dyn Executor) -> ExecStatus {
        let mut long = false;
        let mut pids_only = false;
        let mut specs = Vec::new();
        for arg in args {
            match arg.as_str() {
                "-l" => long = true,
                "-p" => pids_only = true,
                "-lp" | "-pl" => {
                    long = true;
                    pids_only = true;
                }
                a if a.starts_with('-') && a.len() > 1 => return fail("jobs", format_args!("{a}: invalid option"), 2),
                spec => specs.push(spec),
            }
        }
        env.jobs.poll();
        let mut selected = Vec::new();
        if specs.is_empty() {
            selected = env.jobs.list();
        } else {
            for spec in specs {
                match job_spec(env, Some(spec)).ok().and_then(|id| env.jobs.get(id)) {
                    Some(job) => selected.push(job),
                    None => return fail("jobs", format_args!("{spec}: no such job"), 1),
                }
            }
        }
        let mut text = String::new();
        for job in &selected {
            if pids_only {
                text.push_str(&format!("{}\n", job.pgid));
                continue;
            }
            let line = env.jobs.format_job(job);
            if long {
                let (head, rest) = line.split_once("  ").unwrap_or((line.as_str(), ""));
                text.push_str(&format!("{head} {:<6}{rest}\n", job.pgid));
            } else {
                text.push_str(&line);
                text.push('\n');
            }
        }
        env.jobs.prune_finished();
        printed(write_out(&text))
    }
}

pub struct FgCommand;

impl BuiltinCommand for FgCommand {
    fn name(&self) -> &'static str {
        "fg"
    }
    fn run(&self, args: &[String], env: &mut Environment, _exec: &mut dyn Executor) -> ExecStatus {
        if let Err(done) = require_job_control("fg", env) {
            return done;
        }
        let id = match job_spec(env, args.first().map(String::as_str)) {
            Ok(id) => id,
            Err(msg) => return fail("fg", msg, 1),
        };
        let Some(job) = env.jobs.get(id) else {
            return fail("fg", "job has terminated", 1);
        };
        if job.state.is_finished() {
            env.jobs.remove(id);
            return fail("fg", "job has terminated", 1);
        }
        let _ = write_out(&format!("{}\n", job.command));
        env.jobs.set_foreground(id, true);
        if env.options.interactive {
            signals::give_terminal(job.pgid);
        }
        if let Err(e) = env.jobs.continue_job(id) {
            return fail("fg", format_args!("%{id}: {}", e.desc()), 1);
        }
        debug!(job = id, "resumed in foreground");
        status(process::wait_foreground(env, id, job.pgid))
    }
}

pub struct BgCommand;

impl BuiltinCommand for BgCommand {
    fn name(&self) -> &'static str {
        "bg"
    }
    fn run(&self, args: &[String], env: &mut Environment, _exec: &mut dyn Executor) -> ExecStatus {
        if let Err(done) = require_job_control("bg", env) {
            return done;
        }
        let specs: Vec<Option<&str>> = if args.is_empty() {
            vec![None]
        } else {
            args.iter().map(|a| Some(a.as_str())).collect()
        };
        let mut code = 0;
        for spec in specs {
            let id = match job_spec(env, spec) {
                Ok(id) => id,
                Err(msg) => {
                    report(format_args!("bg: {msg}"));
                    code = 1;
                    continue;
                }
            };
            let Some(job) = env.jobs.get(id) else { continue };
            if job.state == JobState::Running {
                report(format_args!("bg: job {id} already in background"));
                continue;
            }
            env.jobs.set_foreground(id, false);
            match env.jobs.continue_job(id) {
                Ok(()) => {
                    let _ = write_out(&format!("[{id}] {} &\n", job.command));
                }
                Err(e) => {
                    report(format_args!("bg: %{id}: {}", e.desc()));
                    code = 1;
                }
            }
        }
        status(code)
    }
}

pub struct WaitCommand;

impl WaitCommand {
    fn wait_job(env: &mut Environment, id: JobId, pid: Option<Pid>) -> i32 {
        let result = env.jobs.wait_for(id, false);
        let job = env.jobs.get(id);
        env.jobs.remove(id);
        let process_status = pid.and_then(|pid| {
            job.as_ref()?
                .processes
                .iter()
                .find(|p| p.pid == pid)
                .and_then(|p| p.status)
        });
        process_status.or(result.map(|r| r.code)).unwrap_or(0)
    }
}

impl BuiltinCommand for WaitCommand {
    fn name(&self) -> &'static str {
        "wait"
    }
    fn run(&self, args: &[String], env: &mut Environment, _exec: &mut dyn Executor) -> ExecStatus {
        env.jobs.poll();
        if args.is_empty() {
            for job in env.jobs.list() {
                Self::wait_job(env, job.id, None);
            }
            return status(0);
        }
        let mut code = 0;
        for arg in args {
            if arg.starts_with('%') {
                code = match env.jobs.resolve(arg) {
                    Some(id) => Self::wait_job(env, id, None),
                    None => {
                        report(format_args!("wait: {arg}: no such job"));
                        127
                    }
                };
                continue;
            }
            let Ok(raw) = arg.parse::<i32>() else {
                return fail("wait", format_args!("`{arg}': not a pid or valid job spec"), 2);
            };
            let pid = Pid::from_raw(raw);
            code = match env.jobs.find_by_pid(pid) {
                Some(id) => Self::wait_job(env, id, Some(pid)),
                None => {
                    report(format_args!("wait: pid {raw} is not a child of this shell"));
                    127
                }
            };
        }
        status(code)
    }
}

/// Parses a signal given by number or by name, with or without `SIG`.
/// Signal 0 parses to `None`, which checks the process exists without signalling it.
pub fn parse_signal(spec: &str) -> Option<Option<Signal>> {
    if let Ok(n) = spec.parse::<i32>() {
        return if n == 0 { Some(None) } else { Signal::try_from(n).ok().map(Some) };
    }
    let upper = spec.to_ascii_uppercase();
    let full = if upper.starts_with("SIG") { upper } else { format!("SIG{upper}") };
    full.parse::<Signal>().ok().map(Some)
}

pub struct KillCommand;

impl KillCommand {
    fn list() -> ExecStatus {
        let names: Vec<String> = Signal::iterator()
            .map(|s| format!("{}) {}", s as i32, s.as_str().trim_start_matches("SIG")))
            .collect();
        let mut text = String::new();
        for row in names.chunks(8) {
            text.push_str(&row.join("\t"));
            text.push('\n');
        }
        printed(write_out(&text))
    }

    fn signal_target(env: &Environment, target: &str, signal: Option<Signal>) -> Result<(), String> {
        if target.starts_with('%') {
            let job = env
                .jobs
                .resolve(target)
                .and_then(|id| env.jobs.get(id))
                .ok_or_else(|| format!("{target}: no such job"))?;
            killpg(job.pgid, signal).map_err(|e| format!("{target}: {}", e.desc()))?;
            // A stopped job only sees the signal once it runs again.
            if job.state == JobState::Stopped && matches!(signal, Some(Signal::SIGTERM | Signal::SIGHUP)) {
                let _ = killpg(job.pgid, Signal::SIGCONT);
            }
            return Ok(());
        }
        let raw: i32 = target
            .parse()
            .map_err(|_| format!("{target}: arguments must be process or job IDs"))?;
        kill(Pid::from_raw(raw), signal).map_err(|e| format!("({raw}) - {}", e.desc()))
    }
}

impl BuiltinCommand for KillCommand {
    fn name(&self) -> &'static str {
        "kill"
    }
    fn run(&self, args: &[String], env: &mut Environment, _exec: &mut dyn Executor) -> ExecStatus {
        const USAGE: &str = "usage: kill [-s sigspec | -sigspec] pid | jobspec ... or kill -l";
        let mut signal = Some(Signal::SIGTERM);
        let mut rest = args;
        match args.first().map(String::as_str) {
            None => return fail("kill", USAGE, 2),
            Some("-l") | Some("-L") => return Self::list(),
            Some("-s") | Some("-n") => {
                let Some(spec) = args.get(1) else {
                    return fail("kill", USAGE, 2);
                };
                match parse_signal(spec) {
                    Some(sig) => signal = sig,
                    None => return fail("kill", format_args!("{spec}: invalid signal specification"), 1),
                }
                rest = &args[2..];
            }
            Some("--") => rest = &args[1..],
            Some(flag) if flag.starts_with('-') && flag.len() > 1 => {
                match parse_signal(&flag[1..]) {
                    Some(sig) => signal = sig,
                    None => return fail("kill", format_args!("{}: invalid signal specification", &flag[1..]), 1),
                }
                rest = &args[1..];
            }
            Some(_) => {}
        }
        if rest.is_empty() {
            return fail("kill", USAGE, 2);
        }
        env.jobs.poll();
        let mut code = 0;
        for target in rest {
            if let Err(msg) = Self::signal_target(env, target, signal) {
                report(format_args!("kill: {msg}"));
                code = 1;
            }
        }
        status(code)
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
    fn test_parse_signal_forms() {
        assert_eq!(parse_signal("9"), Some(Some(Signal::SIGKILL)));
        assert_eq!(parse_signal("KILL"), Some(Some(Signal::SIGKILL)));
        assert_eq!(parse_signal("sigterm"), Some(Some(Signal::SIGTERM)));
        assert_eq!(parse_signal("0"), Some(None));
        assert_eq!(parse_signal("NOPE"), None);
    }

    #[test]
    fn test_job_spec_accepts_bare_numbers() {
        let env = Environment::empty();
        let id = env.jobs.add(Pid::from_raw(7001), &[Pid::from_raw(7001)], "sleep 5", false, false);
        assert_eq!(job_spec(&env, Some("1")), Ok(id));
        assert_eq!(job_spec(&env, Some("%1")), Ok(id));
        assert_eq!(job_spec(&env, None), Ok(id));
        assert!(job_spec(&env, Some("%4")).is_err());
    }

    #[test]
    fn test_fg_and_bg_need_job_control() {
        let mut env = Environment::empty();
        assert_eq!(run(&FgCommand, &[], &mut env), ExecOutcome::Code(1));
        assert_eq!(run(&BgCommand, &["%1"], &mut env), ExecOutcome::Code(1));
    }

    #[test]
    fn test_wait_unknown_targets() {
        let mut env = Environment::empty();
        assert_eq!(run(&WaitCommand, &[], &mut env), ExecOutcome::Code(0));
        assert_eq!(run(&WaitCommand, &["%3"], &mut env), ExecOutcome::Code(127));
        assert_eq!(run(&WaitCommand, &["999999"], &mut env), ExecOutcome::Code(127));
        assert_eq!(run(&WaitCommand, &["abc"], &mut env), ExecOutcome::Code(2));
    }

    #[test]
    fn test_wait_returns_child_status() {
        use nix::unistd::{fork, ForkResult};
        let mut env = Environment::empty();
        match unsafe { fork() }.unwrap() {
            ForkResult::Child => unsafe { libc::_exit(5) },
            ForkResult::Parent { child } => {
                env.jobs.add(child, &[child], "child", false, false);
                let pid = child.as_raw().to_string();
                assert_eq!(run(&WaitCommand, &[&pid], &mut env), ExecOutcome::Code(5));
                assert!(env.jobs.is_empty());
            }
        }
    }

    #[test]
    fn test_kill_usage_errors() {
        let mut env = Environment::empty();
        assert_eq!(run(&KillCommand, &[], &mut env), ExecOutcome::Code(2));
        assert_eq!(run(&KillCommand, &["-BOGUS", "1"], &mut env), ExecOutcome::Code(1));
        assert_eq!(run(&KillCommand, &["%2"], &mut env), ExecOutcome::Code(1));
    }
}
