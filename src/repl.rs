//! The read-eval loop for interactive use and for scripts read from stdin.

use std::io::{self, Write};

use tracing::{debug, warn};

use crate::executor::report;
use crate::prompt::ShellPrompt;
use crate::shell::Shell;
use crate::signals::SignalFlags;

pub struct Repl {
    shell: Shell,
    prompt: ShellPrompt,
    signals: Option<SignalFlags>,
}

impl Repl {
    pub fn new(shell: Shell, signals: Option<SignalFlags>) -> Self {
        Repl {
            shell,
            prompt: ShellPrompt::new(),
            signals,
        }
    }

    pub fn shell(&self) -> &Shell {
        &self.shell
    }

    fn interrupted(&self) -> bool {
        self.signals.as_ref().is_some_and(SignalFlags::take_interrupt)
    }

    fn print_notifications(&self) {
        let jobs = &self.shell.env().jobs;
        jobs.poll();
        let lines = jobs.take_notifications();
        if lines.is_empty() {
            return;
        }
        let mut err = io::stderr();
        for line in lines {
            let _ = writeln!(err, "{line}");
        }
    }

    /// Runs until end of input or `exit`, returning the shell's exit status.
    pub fn run(&mut self) -> i32 {
        let interactive = self.shell.env().options.interactive;
        let mut pending = String::new();
        loop {
            if interactive {
                if pending.is_empty() {
                    self.print_notifications();
                }
                let text = self.prompt.text(self.shell.env(), !pending.is_empty());
                self.prompt.show(&text);
            }
            let line = match self.prompt.read_line() {
                Ok(Some(line)) => line,
                Ok(None) => {
                    if interactive {
                        self.prompt.show("\n");
                    }
                    if !pending.is_empty() {
                        report("syntax error: unexpected end of file");
                        return 2;
                    }
                    break;
                }
                Err(e) => {
                    warn!(error = %e, "reading input failed");
                    break;
                }
            };
            // Ctrl-C at the prompt abandons a half-entered command.
            if self.interrupted() && !pending.is_empty() {
                debug!("discarding continued input");
                pending.clear();
            }
            pending.push_str(&line);
            pending.push('\n');
            match self.shell.run_source(&pending) {
                Err(e) if e.is_incomplete() => continue,
                Err(e) => report(&e),
                Ok(_) => {}
            }
            pending.clear();
            self.interrupted();
            if let Some(code) = self.shell.exit_requested() {
                return code;
            }
        }
        self.shell.last_status()
    }
}
