use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::Parser;

use tinysh::config::ConfigLoader;
use tinysh::environment::Environment;
use tinysh::executor::{os_message, process, report};
use tinysh::repl::Repl;
use tinysh::{logging, signals, Shell, ShellError};

/// A small POSIX-style shell.
#[derive(Parser, Debug)]
#[command(name = "tinysh", version, about, long_about = None)]
struct Args {
    /// Run COMMAND; the first operand then becomes $0
    #[arg(short = 'c', value_name = "COMMAND")]
    command: Option<String>,

    /// Force interactive mode
    #[arg(short = 'i')]
    interactive: bool,

    /// Enable a named option (pipefail, nounset, xtrace, noglob, monitor)
    #[arg(short = 'o', value_name = "OPTION")]
    options: Vec<String>,

    /// Treat unset variables as an error
    #[arg(short = 'u')]
    nounset: bool,

    /// Print commands before running them
    #[arg(short = 'x')]
    xtrace: bool,

    /// Startup file to read instead of ~/.tinyshrc
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Skip the startup file
    #[arg(long)]
    norc: bool,

    /// Log filter for the shell's own diagnostics
    #[arg(long, value_name = "LEVEL")]
    log_level: Option<String>,

    /// Script file to run
    script: Option<String>,

    /// Positional parameters
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    args: Vec<String>,
}

fn main() -> Result<()> {
    let args = Args::parse();
    let config = ConfigLoader::load(args.config.as_deref(), args.norc).context("failed to load configuration")?;
    logging::init(args.log_level.as_deref().or(config.log_level.as_deref()));

    let mut env = Environment::new();
    let reads_stdin = args.command.is_none() && args.script.is_none();
    env.options.interactive = args.interactive || (reads_stdin && signals::stdin_is_tty());

    let mut shell = Shell::with_environment(env);
    shell.apply_config(&config);
    let env = shell.env_mut();
    env.options.nounset |= args.nounset;
    env.options.xtrace |= args.xtrace;
    for name in &args.options {
        if !env.options.set_by_name(name, true) {
            bail!("{name}: invalid option name");
        }
    }
    if env.options.job_control && !signals::init_job_control() {
        env.options.job_control = false;
    }
    let flags = signals::install(shell.env()).context("failed to install signal handlers")?;

    let code = if let Some(command) = args.command {
        let env = shell.env_mut();
        if let Some(name) = args.script {
            env.shell_name = name;
        }
        env.positional = args.args;
        shell.run_source(&command).unwrap_or_else(|e| {
            report(&e);
            e.status()
        })
    } else if let Some(script) = args.script {
        match shell.run_file(Path::new(&script), args.args) {
            Ok(code) => code,
            Err(ShellError::Io(e)) => {
                report(format_args!("{script}: {}", os_message(&e)));
                127
            }
            Err(e) => {
                report(&e);
                e.status()
            }
        }
    } else {
        Repl::new(shell, Some(flags)).run()
    };
    process::flush_std();
    std::process::exit(code)
}
