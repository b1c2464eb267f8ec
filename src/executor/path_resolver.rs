use std::path::{Path, PathBuf};

use nix::unistd::{access, AccessFlags};

pub struct PathResolver;

impl PathResolver {
    /// Finds `command` on `path`. A name containing `/` is used as given.
    ///
    /// An executable match wins over an earlier non-executable file, which is
    /// still returned when nothing better exists so the caller can report
    /// "Permission denied".
    pub fn resolve(&self, command: &str, path: Option<&str>) -> Option<PathBuf> {
        if command.is_empty() {
            return None;
        }
        if command.contains('/') {
            return Some(PathBuf::from(command));
        }
        let mut fallback = None;
        for dir in path.unwrap_or("").split(':') {
            let dir = if dir.is_empty() { Path::new(".") } else { Path::new(dir) };
            let candidate = dir.join(command);
            if !candidate.is_file() {
                continue;
            }
            if access(&candidate, AccessFlags::X_OK).is_ok() {
                return Some(candidate);
            }
            fallback.get_or_insert(candidate);
        }
        fallback
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::fs;
    use std::os::unix::fs::PermissionsExt;

    #[test]
    fn test_resolve_prefers_executable() {
        let a = tempfile::tempdir().unwrap();
        let b = tempfile::tempdir().unwrap();
        let plain = a.path().join("tool");
        let exe = b.path().join("tool");
        fs::write(&plain, "").unwrap();
        fs::write(&exe, "").unwrap();
        fs::set_permissions(&exe, fs::Permissions::from_mode(0o755)).unwrap();
        let path = format!("{}:{}", a.path().display(), b.path().display());
        assert_eq!(PathResolver.resolve("tool", Some(&path)), Some(exe));
    }

    #[test]
    fn test_resolve_missing_and_slash() {
        assert_eq!(PathResolver.resolve("definitely-not-a-command-zzz", Some("/nonexistent")), None);
        assert_eq!(PathResolver.resolve("./x", None), Some(PathBuf::from("./x")));
        assert_eq!(PathResolver.resolve("", Some("/bin")), None);
    }
}
