//! Applies redirections to the shell's own descriptors and undoes them.

use std::fs::{File, OpenOptions};
use std::io::{self, Seek, SeekFrom, Write};
use std::os::fd::{IntoRawFd, RawFd};

use tracing::trace;

use crate::ast::{Redirect, RedirectKind};
use crate::environment::Environment;
use crate::executor::{os_message, ExecError, Executor};
use crate::expander::Expander;

/// Saved copies live at or above this descriptor.
const SAVE_FLOOR: RawFd = 10;

/// Original descriptors displaced by applied redirections. Dropping it puts
/// them back.
#[derive(Debug, Default)]
pub struct SavedFds {
    saved: Vec<(RawFd, Option<RawFd>)>,
}

impl SavedFds {
    fn save(&mut self, fd: RawFd) {
        if self.saved.iter().any(|(f, _)| *f == fd) {
            return;
        }
        // SAFETY: fcntl on an arbitrary descriptor only fails with EBADF.
        let copy = unsafe { libc::fcntl(fd, libc::F_DUPFD_CLOEXEC, SAVE_FLOOR) };
        self.saved.push((fd, (copy >= 0).then_some(copy)));
    }

    /// Makes the redirections permanent, as `exec` without a command does.
    pub fn keep(mut self) {
        for (_, copy) in self.saved.drain(..) {
            if let Some(copy) = copy {
                // SAFETY: `copy` is owned by this struct.
                unsafe { libc::close(copy) };
            }
        }
    }

    fn restore(&mut self) {
        if self.saved.is_empty() {
            return;
        }
        let _ = io::stdout().flush();
        for (fd, copy) in self.saved.drain(..).rev() {
            // SAFETY: both descriptors are checked by the kernel; `copy` is ours.
            unsafe {
                match copy {
                    Some(copy) => {
                        libc::dup2(copy, fd);
                        libc::close(copy);
                    }
                    None => {
                        libc::close(fd);
                    }
                }
            }
        }
    }
}

impl Drop for SavedFds {
    fn drop(&mut self) {
        self.restore();
    }
}

fn open_error(target: &str, err: io::Error) -> ExecError {
    ExecError::Redirect(format!("{target}: {}", os_message(&err)))
}

fn fd_is_open(fd: RawFd) -> bool {
    // SAFETY: F_GETFD has no side effects.
    unsafe { libc::fcntl(fd, libc::F_GETFD) != -1 }
}

/// Moves `src` onto `dst`, closing `src`.
fn install(src: RawFd, dst: RawFd) -> Result<(), ExecError> {
    // SAFETY: `src` was just opened and is owned here.
    unsafe {
        if src == dst {
            libc::fcntl(dst, libc::F_SETFD, 0);
            return Ok(());
        }
        if libc::dup2(src, dst) < 0 {
            let err = io::Error::last_os_error();
            libc::close(src);
            return Err(ExecError::Redirect(format!("{dst}: {}", os_message(&err))));
        }
        libc::close(src);
    }
    Ok(())
}

pub struct RedirectHandler;

impl RedirectHandler {
    /// Applies `redirects` left to right. On error everything applied so far
    /// is rolled back.
    pub fn apply(
        redirects: &[Redirect],
        env: &mut Environment,
        exec: &mut dyn Executor,
    ) -> Result<SavedFds, ExecError> {
        let mut saved = SavedFds::default();
        if redirects.is_empty() {
            return Ok(saved);
        }
        let _ = io::stdout().flush();
        for r in redirects {
            Self::apply_one(r, env, exec, &mut saved)?;
        }
        Ok(saved)
    }

    fn apply_one(
        r: &Redirect,
        env: &mut Environment,
        exec: &mut dyn Executor,
        saved: &mut SavedFds,
    ) -> Result<(), ExecError> {
        let fd = r.fd();
        if let RedirectKind::HereDoc { expand } = r.kind {
            let body = if expand {
                Expander::new(env, exec).expand_heredoc(r.target.as_str())?
            } else {
                r.target.0.clone()
            };
            let mut file = tempfile::tempfile()?;
            file.write_all(body.as_bytes())?;
            file.seek(SeekFrom::Start(0))?;
            saved.save(fd);
            return install(file.into_raw_fd(), fd);
        }

        let target = Expander::new(env, exec).expand_redirect_target(r.target.as_str())?;
        trace!(fd, kind = ?r.kind, %target, "redirect");
        match r.kind {
            RedirectKind::In => Self::open_onto(&target, fd, OpenOptions::new().read(true), saved),
            RedirectKind::Out | RedirectKind::Clobber => Self::open_onto(
                &target,
                fd,
                OpenOptions::new().write(true).create(true).truncate(true),
                saved,
            ),
            RedirectKind::Append => {
                Self::open_onto(&target, fd, OpenOptions::new().append(true).create(true), saved)
            }
            RedirectKind::ReadWrite => Self::open_onto(
                &target,
                fd,
                OpenOptions::new().read(true).write(true).create(true).truncate(false),
                saved,
            ),
            RedirectKind::OutAndErr => {
                let file = OpenOptions::new()
                    .write(true)
                    .create(true)
                    .truncate(true)
                    .open(&target)
                    .map_err(|e| open_error(&target, e))?;
                saved.save(1);
                saved.save(2);
                let raw = file.into_raw_fd();
                // SAFETY: `raw` is a freshly opened descriptor.
                if unsafe { libc::dup2(raw, 2) } < 0 {
                    unsafe { libc::close(raw) };
                    return Err(ExecError::Io(io::Error::last_os_error()));
                }
                install(raw, 1)
            }
            RedirectKind::DupIn | RedirectKind::DupOut => {
                if target == "-" {
                    saved.save(fd);
                    // SAFETY: closing a descriptor we saved a copy of.
                    unsafe { libc::close(fd) };
                    return Ok(());
                }
                match target.parse::<RawFd>() {
                    Ok(src) => {
                        if !fd_is_open(src) {
                            return Err(ExecError::Redirect(format!("{src}: Bad file descriptor")));
                        }
                        if src == fd {
                            return Ok(());
                        }
                        saved.save(fd);
                        // SAFETY: both descriptors are valid.
                        if unsafe { libc::dup2(src, fd) } < 0 {
                            return Err(ExecError::Io(io::Error::last_os_error()));
                        }
                        Ok(())
                    }
                    // `>&file` without a descriptor number means `&>file`.
                    Err(_) if r.kind == RedirectKind::DupOut && r.fd.is_none() => {
                        let both = Redirect {
                            fd: None,
                            kind: RedirectKind::OutAndErr,
                            target: crate::ast::Word::new(quote(&target)),
                        };
                        Self::apply_one(&both, env, exec, saved)
                    }
                    Err(_) => Err(ExecError::Redirect(format!("{target}: ambiguous redirect"))),
                }
            }
            RedirectKind::HereDoc { .. } => Ok(()),
        }
    }

    fn open_onto(target: &str, fd: RawFd, options: &OpenOptions, saved: &mut SavedFds) -> Result<(), ExecError> {
        let file: File = options.open(target).map_err(|e| open_error(target, e))?;
        saved.save(fd);
        install(file.into_raw_fd(), fd)
    }
}

/// Single-quotes an already expanded word so it survives re-expansion.
fn quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', r"'\''"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::Word;
    use crate::executor::tests::MockExecutor;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_missing_input_file_reports_path() {
        let mut env = Environment::empty();
        let mut exec = MockExecutor::new();
        let redirects = vec![Redirect {
            fd: None,
            kind: RedirectKind::In,
            target: Word::new("/nonexistent/input-zzz"),
        }];
        let err = RedirectHandler::apply(&redirects, &mut env, &mut exec).unwrap_err();
        assert_eq!(err.to_string(), "/nonexistent/input-zzz: No such file or directory");
    }

    #[test]
    fn test_bad_descriptor_is_rejected() {
        let mut env = Environment::empty();
        let mut exec = MockExecutor::new();
        let redirects = vec![Redirect {
            fd: Some(7),
            kind: RedirectKind::DupOut,
            target: Word::new("63"),
        }];
        let err = RedirectHandler::apply(&redirects, &mut env, &mut exec).unwrap_err();
        assert_eq!(err.to_string(), "63: Bad file descriptor");
    }

    #[test]
    fn test_high_descriptor_is_restored_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.txt");
        let mut env = Environment::empty();
        let mut exec = MockExecutor::new();
        let redirects = vec![Redirect {
            fd: Some(60),
            kind: RedirectKind::Out,
            target: Word::new(path.to_string_lossy().into_owned()),
        }];
        assert!(!fd_is_open(60));
        let saved = RedirectHandler::apply(&redirects, &mut env, &mut exec).unwrap();
        assert!(fd_is_open(60));
        drop(saved);
        assert!(!fd_is_open(60));
        assert!(path.exists());
    }

    #[test]
    fn test_quote_round_trips_apostrophes() {
        assert_eq!(quote("it's"), r"'it'\''s'");
    }
}
