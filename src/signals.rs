//! Signal dispositions for the shell and its children.
//!
//! The shell never acts inside a signal handler: SIGCHLD and SIGINT only
//! raise atomic flags, which the job table and the prompt loop observe.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use nix::sys::signal::{kill, signal, SigHandler, Signal};
use nix::unistd::{getpgrp, getpid, setpgid, Pid};
use signal_hook::consts::{SIGCHLD, SIGINT};
use signal_hook::flag;
use tracing::{debug, warn};

use crate::environment::Environment;

/// Signals ignored by an interactive shell so that only its foreground job
/// receives them.
const INTERACTIVE_IGNORED: &[Signal] = &[Signal::SIGQUIT, Signal::SIGTSTP, Signal::SIGTTIN, Signal::SIGTTOU];

/// Dispositions a child gets back before running user code.
const CHILD_DEFAULTS: &[Signal] = &[
    Signal::SIGINT,
    Signal::SIGQUIT,
    Signal::SIGTSTP,
    Signal::SIGTTIN,
    Signal::SIGTTOU,
    Signal::SIGCHLD,
    Signal::SIGPIPE,
];

#[derive(Debug, Clone)]
pub struct SignalFlags {
    interrupted: Arc<AtomicBool>,
}

impl SignalFlags {
    /// Whether SIGINT arrived since the last call.
    pub fn take_interrupt(&self) -> bool {
        self.interrupted.swap(false, Ordering::SeqCst)
    }
}

/// Installs the shell's own handlers.
pub fn install(env: &Environment) -> io::Result<SignalFlags> {
    flag::register(SIGCHLD, env.jobs.sigchld_flag())?;
    let interrupted = Arc::new(AtomicBool::new(false));
    if env.options.interactive {
        flag::register(SIGINT, Arc::clone(&interrupted))?;
        for &sig in INTERACTIVE_IGNORED {
            // SAFETY: SIG_IGN installs no handler code.
            if let Err(e) = unsafe { signal(sig, SigHandler::SigIgn) } {
                warn!(signal = %sig, error = %e, "could not ignore signal");
            }
        }
    }
    Ok(SignalFlags { interrupted })
}

/// Restores default dispositions in a freshly forked child.
pub fn reset_for_child() {
    for &sig in CHILD_DEFAULTS {
        // SAFETY: SIG_DFL installs no handler code.
        let _ = unsafe { signal(sig, SigHandler::SigDfl) };
    }
}

/// Hands the controlling terminal to process group `pgid`.
pub fn give_terminal(pgid: Pid) {
    // SAFETY: tcsetpgrp only reads its integer arguments.
    let rc = unsafe { libc::tcsetpgrp(libc::STDIN_FILENO, pgid.as_raw()) };
    if rc != 0 {
        debug!(pgid = pgid.as_raw(), error = %io::Error::last_os_error(), "tcsetpgrp failed");
    }
}

/// Takes the terminal back for the shell's own process group.
pub fn reclaim_terminal() {
    give_terminal(getpgrp());
}

pub fn stdin_is_tty() -> bool {
    // SAFETY: isatty only inspects the descriptor.
    unsafe { libc::isatty(libc::STDIN_FILENO) == 1 }
}

/// Puts the shell in its own process group in the terminal foreground.
/// Returns false when stdin is not a terminal.
pub fn init_job_control() -> bool {
    if !stdin_is_tty() {
        return false;
    }
    // Wait until we are in the foreground before taking over.
    loop {
        // SAFETY: tcgetpgrp only reads the descriptor.
        let fg = unsafe { libc::tcgetpgrp(libc::STDIN_FILENO) };
        if fg < 0 || fg == getpgrp().as_raw() {
            break;
        }
        let _ = kill(Pid::from_raw(-getpgrp().as_raw()), Signal::SIGTTIN);
    }
    let pid = getpid();
    if let Err(e) = setpgid(pid, pid) {
        debug!(error = %e, "setpgid for the shell failed");
    }
    give_terminal(pid);
    true
}
