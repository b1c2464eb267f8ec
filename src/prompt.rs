use std::io::{self, Write};

use chrono::Local;
use nix::unistd::{gethostname, getuid, User};

use crate::environment::Environment;
use crate::executor::builtin::io::read_byte;

pub const DEFAULT_PS1: &str = "$ ";
pub const DEFAULT_PS2: &str = "> ";

pub struct ShellPrompt;

impl Default for ShellPrompt {
    fn default() -> Self {
        Self::new()
    }
}

impl ShellPrompt {
    pub fn new() -> Self {
        ShellPrompt
    }

    /// `PS1`, or `PS2` while a command is being continued.
    pub fn text(&self, env: &Environment, continuation: bool) -> String {
        let (var, fallback) = if continuation { ("PS2", DEFAULT_PS2) } else { ("PS1", DEFAULT_PS1) };
        render(env.get(var).unwrap_or(fallback), env)
    }

    /// Prompts go to stderr, like other shells.
    pub fn show(&self, text: &str) {
        let mut err = io::stderr();
        let _ = err.write_all(text.as_bytes());
        let _ = err.flush();
    }

    /// Reads one line from stdin without buffering past its newline, so
    /// the commands it runs can read the rest of the input.
    pub fn read_line(&self) -> io::Result<Option<String>> {
        let mut bytes = Vec::new();
        loop {
            match read_byte()? {
                Some(b'\n') => break,
                Some(b) => bytes.push(b),
                None if bytes.is_empty() => return Ok(None),
                None => break,
            }
        }
        Ok(Some(String::from_utf8_lossy(&bytes).into_owned()))
    }
}

fn user_name(env: &Environment) -> String {
    if let Some(user) = env.get("USER") {
        return user.to_string();
    }
    match User::from_uid(getuid()) {
        Ok(Some(user)) => user.name,
        _ => getuid().to_string(),
    }
}

fn host_name() -> String {
    gethostname()
        .map(|h| h.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Expands the backslash escapes of a prompt string:
/// `\u \h \H \w \W \s \t \$ \n \\`.
pub fn render(template: &str, env: &Environment) -> String {
    let mut out = String::new();
    let mut chars = template.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('u') => out.push_str(&user_name(env)),
            Some('h') => {
                let host = host_name();
                out.push_str(host.split('.').next().unwrap_or(""));
            }
            Some('H') => out.push_str(&host_name()),
            Some('w') => out.push_str(&tilde_cwd(env)),
            Some('W') => {
                let cwd = tilde_cwd(env);
                let base = match cwd.rsplit_once('/') {
                    Some((_, "")) | None => cwd.as_str(),
                    Some((_, base)) => base,
                };
                out.push_str(base);
            }
            Some('s') => out.push_str(env.shell_name.rsplit('/').next().unwrap_or("tinysh")),
            Some('t') => out.push_str(&Local::now().format("%H:%M:%S").to_string()),
            Some('$') => out.push(if getuid().is_root() { '#' } else { '$' }),
            Some('n') => out.push('\n'),
            Some('\\') => out.push('\\'),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out
}

fn tilde_cwd(env: &Environment) -> String {
    let cwd = env.cwd().display().to_string();
    match env.home() {
        Some(home) if !home.is_empty() && home != "/" => match cwd.strip_prefix(home) {
            Some("") => "~".to_string(),
            Some(rest) if rest.starts_with('/') => format!("~{rest}"),
            _ => cwd,
        },
        _ => cwd,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_render_escapes() {
        let mut env = Environment::empty();
        env.set("USER", "amy");
        env.set("HOME", "/home/amy");
        env.set("PWD", "/home/amy/src/tinysh");
        assert_eq!(render("\\u:\\w> ", &env), "amy:~/src/tinysh> ");
        assert_eq!(render("[\\W]\\n\\\\", &env), "[tinysh]\n\\");
        assert_eq!(render("\\q", &env), "\\q");
    }

    #[test]
    fn test_prompt_text_falls_back() {
        let mut env = Environment::empty();
        let prompt = ShellPrompt::new();
        assert_eq!(prompt.text(&env, true), DEFAULT_PS2);
        env.set("PS1", "tiny% ");
        assert_eq!(prompt.text(&env, false), "tiny% ");
    }
}
