mod assign;
pub mod builtin;
mod default_executor;
mod executor;
mod path_resolver;
mod pipeline;
pub mod process;
mod redirect;

#[cfg(test)]
pub(crate) mod tests;

use std::fmt::Display;
use std::io::{self, Write};

use nix::errno::Errno;

pub use assign::{AssignedValue, DeclArg, Resolved};
pub use default_executor::DefaultExecutor;
pub use executor::{Captured, ExecError, ExecOutcome, ExecStatus, Executor};
pub use path_resolver::PathResolver;
pub(crate) use pipeline::{move_fd, wait_child};
pub use redirect::{RedirectHandler, SavedFds};

/// Prints a diagnostic on stderr. Write failures are ignored.
pub fn report(message: impl Display) {
    let _ = writeln!(io::stderr(), "tinysh: {message}");
}

/// The bare OS description of an I/O error, without the "(os error N)" suffix.
pub fn os_message(err: &io::Error) -> String {
    match err.raw_os_error() {
        Some(code) => Errno::from_raw(code).desc().to_string(),
        None => err.to_string(),
    }
}
