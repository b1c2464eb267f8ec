//! The `key=value` startup file (`~/.tinyshrc` by default).

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum JobControl {
    /// On exactly when the shell is interactive.
    #[default]
    Auto,
    On,
    Off,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub prompt: String,
    pub continuation_prompt: String,
    pub pipefail: bool,
    pub nounset: bool,
    pub xtrace: bool,
    pub job_control: JobControl,
    pub log_level: Option<String>,
    /// Exported into the shell's environment, in file order.
    pub env_vars: IndexMap<String, String>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            prompt: "\\u@\\h:\\w\\$ ".to_string(),
            continuation_prompt: "> ".to_string(),
            pipefail: false,
            nounset: false,
            xtrace: false,
            job_control: JobControl::Auto,
            log_level: None,
            env_vars: IndexMap::new(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("config line {line}: {message}")]
    Parse { line: usize, message: String },
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// Loads the file given on the command line, else `$TINYSH_CONFIG`, else
    /// `$HOME/.tinyshrc`. Only the default location may be missing.
    pub fn load(explicit: Option<&Path>, norc: bool) -> Result<Config, ConfigError> {
        if let Some(path) = explicit {
            return Self::load_from_file(path);
        }
        if norc {
            return Ok(Config::default());
        }
        if let Some(path) = std::env::var_os("TINYSH_CONFIG") {
            return Self::load_from_file(Path::new(&path));
        }
        let Some(home) = std::env::var_os("HOME") else {
            return Ok(Config::default());
        };
        let path = Path::new(&home).join(".tinyshrc");
        if !path.is_file() {
            debug!(path = %path.display(), "no startup file");
            return Ok(Config::default());
        }
        Self::load_from_file(&path)
    }

    pub fn load_from_file(path: &Path) -> Result<Config, ConfigError> {
        let src = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        debug!(path = %path.display(), "loading config");
        Self::load_from_str(&src)
    }

    pub fn load_from_str(src: &str) -> Result<Config, ConfigError> {
        let mut config = Config::default();
        for (lineno, raw) in src.lines().enumerate() {
            let line = lineno + 1;
            let trimmed = raw.trim_start();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }
            let Some((key, value)) = trimmed.split_once('=') else {
                return Err(ConfigError::Parse {
                    line,
                    message: format!("no '=' found: {trimmed}"),
                });
            };
            let key = key.trim();
            // Values are kept verbatim so prompts may end in a space.
            let flag = |value: &str| {
                parse_bool(value.trim()).ok_or_else(|| ConfigError::Parse {
                    line,
                    message: format!("{key}: expected a boolean, got `{}'", value.trim()),
                })
            };
            match key {
                "prompt" => config.prompt = value.to_string(),
                "continuation_prompt" => config.continuation_prompt = value.to_string(),
                "pipefail" => config.pipefail = flag(value)?,
                "nounset" => config.nounset = flag(value)?,
                "xtrace" => config.xtrace = flag(value)?,
                "job_control" => {
                    config.job_control = match value.trim() {
                        "auto" => JobControl::Auto,
                        "on" => JobControl::On,
                        "off" => JobControl::Off,
                        other => {
                            return Err(ConfigError::Parse {
                                line,
                                message: format!("job_control: expected auto, on or off, got `{other}'"),
                            })
                        }
                    }
                }
                "log_level" => config.log_level = Some(value.trim().to_string()),
                k if k.starts_with("env.") => {
                    let name = &k["env.".len()..];
                    if !crate::lexer::is_name(name) {
                        return Err(ConfigError::Parse {
                            line,
                            message: format!("`{name}' is not a valid variable name"),
                        });
                    }
                    config.env_vars.insert(name.to_string(), value.to_string());
                }
                _ => {
                    return Err(ConfigError::Parse {
                        line,
                        message: format!("unknown key: {key}"),
                    })
                }
            }
        }
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_load_from_str() {
        let src = "# startup\nprompt=tinysh$ \npipefail=yes\njob_control=off\nenv.EDITOR=vi\nenv.PAGER=less -R\nlog_level=debug\n";
        let config = ConfigLoader::load_from_str(src).unwrap();
        assert_eq!(config.prompt, "tinysh$ ");
        assert!(config.pipefail);
        assert!(!config.nounset);
        assert_eq!(config.job_control, JobControl::Off);
        assert_eq!(config.log_level.as_deref(), Some("debug"));
        let vars: Vec<(&str, &str)> = config.env_vars.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect();
        assert_eq!(vars, vec![("EDITOR", "vi"), ("PAGER", "less -R")]);
    }

    #[test]
    fn test_defaults_for_empty_source() {
        assert_eq!(ConfigLoader::load_from_str("\n   \n# nothing\n").unwrap(), Config::default());
    }

    #[test]
    fn test_errors_name_the_line() {
        let err = ConfigLoader::load_from_str("prompt=$ \nbogus=1\n").unwrap_err();
        assert!(matches!(err, ConfigError::Parse { line: 2, .. }), "{err}");
        let err = ConfigLoader::load_from_str("xtrace=maybe").unwrap_err();
        assert_eq!(err.to_string(), "config line 1: xtrace: expected a boolean, got `maybe'");
        assert!(ConfigLoader::load_from_str("just text").is_err());
        assert!(ConfigLoader::load_from_str("env.1X=a").is_err());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rc");
        fs::write(&path, "nounset=on\n").unwrap();
        assert!(ConfigLoader::load(Some(&path), false).unwrap().nounset);
        let missing = dir.path().join("missing");
        assert!(matches!(ConfigLoader::load(Some(&missing), false), Err(ConfigError::Io { .. })));
        assert_eq!(ConfigLoader::load(None, true).unwrap(), Config::default());
    }
}
