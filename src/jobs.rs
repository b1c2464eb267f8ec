//! Job table: background and stopped process groups.
//!
//! Child state changes are collected with non-blocking `waitpid` at a few
//! well-defined points (before a prompt, inside `jobs`/`wait`, after a
//! foreground wait). The SIGCHLD handler only raises a flag.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use nix::errno::Errno;
use nix::sys::signal::{killpg, Signal};
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::Pid;
use tracing::{debug, trace, warn};

pub type JobId = usize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Created,
    Running,
    Stopped,
    Done,
    Killed,
}

impl JobState {
    pub fn can_transition(self, to: JobState) -> bool {
        use JobState::*;
        self == to
            || matches!(
                (self, to),
                (Created, Running)
                    | (Created, Done)
                    | (Created, Killed)
                    | (Running, Stopped)
                    | (Running, Done)
                    | (Running, Killed)
                    | (Stopped, Running)
                    | (Stopped, Done)
                    | (Stopped, Killed)
            )
    }

    pub fn is_finished(self) -> bool {
        matches!(self, JobState::Done | JobState::Killed)
    }

    pub fn label(self) -> &'static str {
        match self {
            JobState::Created => "Created",
            JobState::Running => "Running",
            JobState::Stopped => "Stopped",
            JobState::Done => "Done",
            JobState::Killed => "Killed",
        }
    }
}

#[derive(Debug, Clone)]
pub struct JobProcess {
    pub pid: Pid,
    /// Exit code once finished; `128 + signal` when killed by a signal.
    pub status: Option<i32>,
    pub signaled: bool,
    pub stopped: bool,
}

#[derive(Debug, Clone)]
pub struct Job {
    pub id: JobId,
    pub pgid: Pid,
    pub processes: Vec<JobProcess>,
    pub command: String,
    pub state: JobState,
    pub foreground: bool,
    pub pipefail: bool,
    notified: bool,
}

impl Job {
    /// Index of the process whose status is the job's status.
    fn deciding_process(&self) -> Option<usize> {
        if self.pipefail {
            if let Some(i) = self.processes.iter().position(|p| p.status.is_some_and(|s| s != 0)) {
                return Some(i);
            }
        }
        self.processes.len().checked_sub(1)
    }

    pub fn exit_code(&self) -> Option<i32> {
        if !self.state.is_finished() {
            return None;
        }
        let i = self.deciding_process()?;
        self.processes[i].status
    }

    fn transition(&mut self, to: JobState) {
        if self.state.can_transition(to) {
            if self.state != to {
                trace!(job = self.id, from = self.state.label(), to = to.label(), "job state change");
                self.notified = false;
            }
            self.state = to;
        } else {
            warn!(job = self.id, from = self.state.label(), to = to.label(), "invalid job state transition");
        }
    }

    fn refresh(&mut self) {
        let next = if self.processes.iter().all(|p| p.status.is_some()) {
            match self.deciding_process() {
                Some(i) if self.processes[i].signaled => JobState::Killed,
                _ => JobState::Done,
            }
        } else if self.processes.iter().any(|p| p.stopped) {
            JobState::Stopped
        } else {
            JobState::Running
        };
        self.transition(next);
    }

    fn live_pids(&self) -> Vec<Pid> {
        self.processes.iter().filter(|p| p.status.is_none()).map(|p| p.pid).collect()
    }
}

/// Result of waiting on a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitResult {
    pub state: JobState,
    pub code: i32,
}

#[derive(Debug, Default)]
struct JobList {
    jobs: Vec<Job>,
    // Most recent last; the last entry is the current job (`%+`).
    recency: Vec<JobId>,
}

impl JobList {
    fn get_mut(&mut self, id: JobId) -> Option<&mut Job> {
        self.jobs.iter_mut().find(|j| j.id == id)
    }

    fn touch(&mut self, id: JobId) {
        self.recency.retain(|&j| j != id);
        self.recency.push(id);
    }

    fn marker(&self, id: JobId) -> char {
        let n = self.recency.len();
        if n >= 1 && self.recency[n - 1] == id {
            '+'
        } else if n >= 2 && self.recency[n - 2] == id {
            '-'
        } else {
            ' '
        }
    }

    fn remove(&mut self, id: JobId) {
        self.jobs.retain(|j| j.id != id);
        self.recency.retain(|&j| j != id);
    }
}

#[derive(Debug, Clone, Default)]
pub struct JobTable {
    inner: Arc<Mutex<JobList>>,
    sigchld: Arc<AtomicBool>,
    watched: Arc<AtomicBool>,
}

impl JobTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, JobList> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Flag for a SIGCHLD handler to raise. Once handed out, polling only
    /// sweeps children after the flag has been raised.
    pub fn sigchld_flag(&self) -> Arc<AtomicBool> {
        self.watched.store(true, Ordering::SeqCst);
        self.sigchld.store(true, Ordering::SeqCst);
        Arc::clone(&self.sigchld)
    }

    pub fn add(&self, pgid: Pid, pids: &[Pid], command: impl Into<String>, foreground: bool, pipefail: bool) -> JobId {
        let mut list = self.lock();
        let id = list.jobs.iter().map(|j| j.id).max().unwrap_or(0) + 1;
        let mut job = Job {
            id,
            pgid,
            processes: pids
                .iter()
                .map(|&pid| JobProcess {
                    pid,
                    status: None,
                    signaled: false,
                    stopped: false,
                })
                .collect(),
            command: command.into(),
            state: JobState::Created,
            foreground,
            pipefail,
            notified: false,
        };
        job.transition(JobState::Running);
        debug!(job = id, pgid = pgid.as_raw(), foreground, command = %job.command, "job started");
        list.jobs.push(job);
        if !foreground {
            list.touch(id);
        }
        id
    }

    /// Applies a wait status to the owning job. Returns that job's id.
    pub fn record(&self, status: WaitStatus) -> Option<JobId> {
        let pid = status.pid()?;
        let mut list = self.lock();
        let job = list.jobs.iter_mut().find(|j| j.processes.iter().any(|p| p.pid == pid))?;
        let id = job.id;
        if let Some(proc_) = job.processes.iter_mut().find(|p| p.pid == pid) {
            match status {
                WaitStatus::Exited(_, code) => proc_.status = Some(code),
                WaitStatus::Signaled(_, sig, _) => {
                    proc_.status = Some(128 + sig as i32);
                    proc_.signaled = true;
                }
                WaitStatus::Stopped(_, _) => proc_.stopped = true,
                WaitStatus::Continued(_) => proc_.stopped = false,
                _ => {}
            }
        }
        job.refresh();
        let stopped = job.state == JobState::Stopped;
        if stopped {
            job.foreground = false;
            list.touch(id);
        }
        Some(id)
    }

    fn record_lost(&self, pid: Pid) {
        self.record(WaitStatus::Exited(pid, 0));
    }

    /// Reaps every child that changed state, without blocking.
    pub fn poll(&self) {
        if self.watched.load(Ordering::SeqCst) && !self.sigchld.swap(false, Ordering::SeqCst) {
            return;
        }
        let pids: Vec<Pid> = self.lock().jobs.iter().flat_map(Job::live_pids).collect();
        let flags = WaitPidFlag::WNOHANG | WaitPidFlag::WUNTRACED | WaitPidFlag::WCONTINUED;
        for pid in pids {
            loop {
                match waitpid(pid, Some(flags)) {
                    Ok(WaitStatus::StillAlive) => break,
                    Ok(status) => {
                        self.record(status);
                        if !matches!(status, WaitStatus::Stopped(..) | WaitStatus::Continued(_)) {
                            break;
                        }
                    }
                    Err(Errno::EINTR) => continue,
                    Err(Errno::ECHILD) => {
                        self.record_lost(pid);
                        break;
                    }
                    Err(e) => {
                        debug!(pid = pid.as_raw(), error = %e, "waitpid failed");
                        break;
                    }
                }
            }
        }
    }

    /// Blocks until the job finishes or, with `until_stopped`, stops.
    pub fn wait_for(&self, id: JobId, until_stopped: bool) -> Option<WaitResult> {
        let flags = if until_stopped { Some(WaitPidFlag::WUNTRACED) } else { None };
        loop {
            let (state, pids) = {
                let list = self.lock();
                let job = list.jobs.iter().find(|j| j.id == id)?;
                (job.state, job.live_pids())
            };
            if state.is_finished() || (until_stopped && state == JobState::Stopped) || pids.is_empty() {
                break;
            }
            for pid in pids {
                match waitpid(pid, flags) {
                    Ok(status) => {
                        self.record(status);
                        if matches!(status, WaitStatus::Stopped(..)) {
                            break;
                        }
                    }
                    Err(Errno::EINTR) => break,
                    Err(Errno::ECHILD) => self.record_lost(pid),
                    Err(e) => {
                        debug!(pid = pid.as_raw(), error = %e, "waitpid failed");
                        self.record_lost(pid);
                    }
                }
            }
        }
        let list = self.lock();
        let job = list.jobs.iter().find(|j| j.id == id)?;
        let code = match job.state {
            JobState::Stopped => 128 + Signal::SIGTSTP as i32,
            _ => job.exit_code().unwrap_or(0),
        };
        Some(WaitResult { state: job.state, code })
    }

    pub fn get(&self, id: JobId) -> Option<Job> {
        self.lock().jobs.iter().find(|j| j.id == id).cloned()
    }

    pub fn list(&self) -> Vec<Job> {
        let mut jobs = self.lock().jobs.clone();
        jobs.sort_by_key(|j| j.id);
        jobs
    }

    pub fn is_empty(&self) -> bool {
        self.lock().jobs.is_empty()
    }

    pub fn remove(&self, id: JobId) {
        self.lock().remove(id);
    }

    pub fn find_by_pid(&self, pid: Pid) -> Option<JobId> {
        self.lock()
            .jobs
            .iter()
            .find(|j| j.processes.iter().any(|p| p.pid == pid))
            .map(|j| j.id)
    }

    /// Resolves `%n`, `%%`, `%+`, `%-`, `%prefix` and `%?substring`.
    pub fn resolve(&self, spec: &str) -> Option<JobId> {
        let rest = spec.strip_prefix('%')?;
        let list = self.lock();
        match rest {
            "" | "%" | "+" => list.recency.last().copied().or_else(|| list.jobs.last().map(|j| j.id)),
            "-" => {
                let n = list.recency.len();
                if n >= 2 { Some(list.recency[n - 2]) } else { None }
            }
            _ => {
                if let Ok(n) = rest.parse::<JobId>() {
                    return list.jobs.iter().find(|j| j.id == n).map(|j| j.id);
                }
                if let Some(needle) = rest.strip_prefix('?') {
                    return list.jobs.iter().find(|j| j.command.contains(needle)).map(|j| j.id);
                }
                list.jobs.iter().find(|j| j.command.starts_with(rest)).map(|j| j.id)
            }
        }
    }

    pub fn current(&self) -> Option<JobId> {
        self.resolve("%+")
    }

    pub fn set_foreground(&self, id: JobId, foreground: bool) {
        let mut list = self.lock();
        if let Some(job) = list.get_mut(id) {
            job.foreground = foreground;
        }
        if !foreground {
            list.touch(id);
        }
    }

    /// Sends SIGCONT to the job's process group and marks it running.
    pub fn continue_job(&self, id: JobId) -> nix::Result<()> {
        let pgid = self.get(id).map(|j| j.pgid).ok_or(Errno::ESRCH)?;
        killpg(pgid, Signal::SIGCONT)?;
        let mut list = self.lock();
        if let Some(job) = list.get_mut(id) {
            for p in job.processes.iter_mut() {
                p.stopped = false;
            }
            job.refresh();
        }
        Ok(())
    }

    pub fn format_job(&self, job: &Job) -> String {
        let marker = self.lock().marker(job.id);
        let state = match (job.state, job.exit_code()) {
            (JobState::Done, Some(code)) if code != 0 => format!("Exit {code}"),
            (state, _) => state.label().to_string(),
        };
        format!("[{}]{}  {:<24}{}", job.id, marker, state, job.command)
    }

    /// Status lines for jobs that stopped or finished since last reported.
    /// Finished jobs are dropped from the table once reported.
    pub fn take_notifications(&self) -> Vec<String> {
        let snapshot: Vec<Job> = self
            .lock()
            .jobs
            .iter()
            .filter(|j| !j.foreground && !j.notified && (j.state.is_finished() || j.state == JobState::Stopped))
            .cloned()
            .collect();
        let mut lines = Vec::new();
        for job in snapshot {
            lines.push(self.format_job(&job));
            let mut list = self.lock();
            if job.state.is_finished() {
                list.remove(job.id);
            } else if let Some(j) = list.get_mut(job.id) {
                j.notified = true;
            }
        }
        lines
    }

    /// Drops finished jobs without reporting them.
    pub fn prune_finished(&self) {
        let mut list = self.lock();
        let done: Vec<JobId> = list.jobs.iter().filter(|j| j.state.is_finished()).map(|j| j.id).collect();
        for id in done {
            list.remove(id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn pid(n: i32) -> Pid {
        Pid::from_raw(n)
    }

    #[test]
    fn test_transitions() {
        assert!(JobState::Created.can_transition(JobState::Running));
        assert!(JobState::Running.can_transition(JobState::Stopped));
        assert!(JobState::Stopped.can_transition(JobState::Running));
        assert!(!JobState::Done.can_transition(JobState::Running));
        assert!(!JobState::Killed.can_transition(JobState::Stopped));
    }

    #[test]
    fn test_record_exit_finishes_job() {
        let table = JobTable::new();
        let id = table.add(pid(4001), &[pid(4001)], "sleep 1", false, false);
        assert_eq!(table.get(id).unwrap().state, JobState::Running);
        assert_eq!(table.record(WaitStatus::Exited(pid(4001), 3)), Some(id));
        let job = table.get(id).unwrap();
        assert_eq!(job.state, JobState::Done);
        assert_eq!(job.exit_code(), Some(3));
    }

    #[test]
    fn test_signal_marks_killed() {
        let table = JobTable::new();
        let id = table.add(pid(4002), &[pid(4002)], "yes", false, false);
        table.record(WaitStatus::Signaled(pid(4002), Signal::SIGKILL, false));
        let job = table.get(id).unwrap();
        assert_eq!(job.state, JobState::Killed);
        assert_eq!(job.exit_code(), Some(128 + 9));
    }

    #[test]
    fn test_pipeline_status_and_pipefail() {
        let table = JobTable::new();
        let plain = table.add(pid(10), &[pid(10), pid(11)], "false | true", false, false);
        let strict = table.add(pid(20), &[pid(20), pid(21)], "false | true", false, true);
        for (a, b) in [(10, 11), (20, 21)] {
            table.record(WaitStatus::Exited(pid(a), 1));
            table.record(WaitStatus::Exited(pid(b), 0));
        }
        assert_eq!(table.get(plain).unwrap().exit_code(), Some(0));
        assert_eq!(table.get(strict).unwrap().exit_code(), Some(1));
    }

    #[test]
    fn test_stop_and_continue_state() {
        let table = JobTable::new();
        let id = table.add(pid(30), &[pid(30)], "vim", true, false);
        table.record(WaitStatus::Stopped(pid(30), Signal::SIGTSTP));
        let job = table.get(id).unwrap();
        assert_eq!(job.state, JobState::Stopped);
        assert!(!job.foreground);
        table.record(WaitStatus::Continued(pid(30)));
        assert_eq!(table.get(id).unwrap().state, JobState::Running);
    }

    #[test]
    fn test_job_spec_resolution() {
        let table = JobTable::new();
        let a = table.add(pid(40), &[pid(40)], "sleep 100", false, false);
        let b = table.add(pid(41), &[pid(41)], "make all", false, false);
        assert_eq!(table.resolve("%1"), Some(a));
        assert_eq!(table.resolve("%%"), Some(b));
        assert_eq!(table.resolve("%+"), Some(b));
        assert_eq!(table.resolve("%-"), Some(a));
        assert_eq!(table.resolve("%sle"), Some(a));
        assert_eq!(table.resolve("%?all"), Some(b));
        assert_eq!(table.resolve("%9"), None);
        assert_eq!(table.resolve("40"), None);
        assert_eq!(table.find_by_pid(pid(41)), Some(b));
    }

    #[test]
    fn test_notifications_report_once_and_remove_done() {
        let table = JobTable::new();
        let id = table.add(pid(50), &[pid(50)], "sleep 1", false, false);
        assert!(table.take_notifications().is_empty());
        table.record(WaitStatus::Exited(pid(50), 0));
        let lines = table.take_notifications();
        assert_eq!(lines.len(), 1);
        assert!(lines[0].starts_with("[1]+  Done"), "{}", lines[0]);
        assert!(lines[0].ends_with("sleep 1"));
        assert!(table.get(id).is_none());
        assert!(table.take_notifications().is_empty());
    }

    #[test]
    fn test_ids_restart_when_table_empties() {
        let table = JobTable::new();
        let a = table.add(pid(60), &[pid(60)], "a", false, false);
        table.remove(a);
        let b = table.add(pid(61), &[pid(61)], "b", false, false);
        assert_eq!(b, 1);
    }

    #[test]
    fn test_wait_for_real_child() {
        use nix::unistd::{fork, ForkResult};
        let table = JobTable::new();
        match unsafe { fork() }.unwrap() {
            ForkResult::Child => unsafe { libc::_exit(7) },
            ForkResult::Parent { child } => {
                let id = table.add(child, &[child], "child", true, false);
                let result = table.wait_for(id, true).unwrap();
                assert_eq!(result, WaitResult { state: JobState::Done, code: 7 });
            }
        }
    }
}
