use std::path::{Path, PathBuf};

use crate::environment::Environment;
use crate::executor::builtin::manager::BuiltinCommand;
use crate::executor::builtin::{fail, printed, status, write_out};
use crate::executor::{os_message, ExecOutcome, ExecStatus, Executor};

pub struct HelpCommand {
    pub names: Vec<&'static str>,
}

impl BuiltinCommand for HelpCommand {
    fn name(&self) -> &'static str {
        "help"
    }
    fn run(&self, _args: &[String], _env: &mut Environment, _exec: &mut dyn Executor) -> ExecStatus {
        let mut text = String::from("tinysh builtin commands:\n");
        for chunk in self.names.chunks(6) {
            text.push_str("  ");
            text.push_str(&chunk.join("  "));
            text.push('\n');
        }
        printed(write_out(&text))
    }
}

pub struct CdCommand;

impl BuiltinCommand for CdCommand {
    fn name(&self) -> &'static str {
        "cd"
    }
    fn run(&self, args: &[String], env: &mut Environment, _exec: &mut dyn Executor) -> ExecStatus {
        let args: Vec<&String> = args.iter().filter(|a| *a != "-L" && *a != "--").collect();
        if args.len() > 1 {
            return fail("cd", "too many arguments", 1);
        }
        let mut announce = false;
        let target = match args.first().map(|s| s.as_str()) {
            None => match env.home() {
                Some(home) => home.to_string(),
                None => return fail("cd", "HOME not set", 1),
            },
            Some("-") => match env.get("OLDPWD") {
                Some(old) => {
                    announce = true;
                    old.to_string()
                }
                None => return fail("cd", "OLDPWD not set", 1),
            },
            Some(dir) => dir.to_string(),
        };
        if target.is_empty() {
            return status(0);
        }
        match env.change_dir(Path::new(&target)) {
            Ok(dir) if announce => printed(write_out(&format!("{}\n", dir.display()))),
            Ok(_) => status(0),
            Err(e) => fail("cd", format_args!("{target}: {}", os_message(&e)), 1),
        }
    }
}

pub struct PwdCommand;

impl BuiltinCommand for PwdCommand {
    fn name(&self) -> &'static str {
        "pwd"
    }
    fn run(&self, args: &[String], env: &mut Environment, _exec: &mut dyn Executor) -> ExecStatus {
        let physical = args.iter().any(|a| a == "-P");
        let dir: PathBuf = if physical {
            match std::env::current_dir() {
                Ok(dir) => dir,
                Err(e) => return fail("pwd", os_message(&e), 1),
            }
        } else {
            env.cwd()
        };
        printed(write_out(&format!("{}\n", dir.display())))
    }
}

pub struct TrueCommand;

impl BuiltinCommand for TrueCommand {
    fn name(&self) -> &'static str {
        "true"
    }
    fn run(&self, _args: &[String], _env: &mut Environment, _exec: &mut dyn Executor) -> ExecStatus {
        status(0)
    }
}

pub struct FalseCommand;

impl BuiltinCommand for FalseCommand {
    fn name(&self) -> &'static str {
        "false"
    }
    fn run(&self, _args: &[String], _env: &mut Environment, _exec: &mut dyn Executor) -> ExecStatus {
        status(1)
    }
}

pub struct ColonCommand;

impl BuiltinCommand for ColonCommand {
    fn name(&self) -> &'static str {
        ":"
    }
    fn special(&self) -> bool {
        true
    }
    fn run(&self, _args: &[String], _env: &mut Environment, _exec: &mut dyn Executor) -> ExecStatus {
        status(0)
    }
}

pub struct ExitCommand;

impl BuiltinCommand for ExitCommand {
    fn name(&self) -> &'static str {
        "exit"
    }
    fn special(&self) -> bool {
        true
    }
    fn run(&self, args: &[String], env: &mut Environment, _exec: &mut dyn Executor) -> ExecStatus {
        match args {
            [] => Ok(ExecOutcome::Exit(env.last_status)),
            [code] => match code.trim().parse::<i64>() {
                Ok(n) => Ok(ExecOutcome::Exit((n & 0xff) as i32)),
                Err(_) => {
                    fail("exit", format_args!("{code}: numeric argument required"), 2)?;
                    Ok(ExecOutcome::Exit(2))
                }
            },
            _ => fail("exit", "too many arguments", 1),
        }
    }
}
