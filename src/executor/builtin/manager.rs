use std::collections::HashMap;

use crate::environment::Environment;
use crate::executor::assign::DeclArg;
use crate::executor::builtin::commands::{
    CdCommand, ColonCommand, ExitCommand, FalseCommand, HelpCommand, PwdCommand, TrueCommand,
};
use crate::executor::builtin::flow::{EvalCommand, ExecCommand, LoopControl, ReturnCommand, SourceCommand};
use crate::executor::builtin::io::{EchoCommand, PrintfCommand, ReadCommand};
use crate::executor::builtin::jobs::{BgCommand, FgCommand, JobsCommand, KillCommand, WaitCommand};
use crate::executor::builtin::test::TestCommand;
use crate::executor::builtin::vars::{ExportCommand, LocalCommand, SetCommand, ShiftCommand, TypesetCommand, UnsetCommand};
use crate::executor::{ExecStatus, Executor};

pub trait BuiltinCommand {
    fn name(&self) -> &'static str;

    /// Special builtins keep their prefix assignments after they return.
    fn special(&self) -> bool {
        false
    }

    /// `args` excludes the command name.
    fn run(&self, args: &[String], env: &mut Environment, exec: &mut dyn Executor) -> ExecStatus;

    /// Runs with the operands written as assignments already resolved.
    /// Builtins that do not declare variables see them as text.
    fn run_declaration(&self, args: Vec<DeclArg>, env: &mut Environment, exec: &mut dyn Executor) -> ExecStatus {
        let words: Vec<String> = args.into_iter().map(DeclArg::into_text).collect();
        self.run(&words, env, exec)
    }
}

pub struct BuiltinManager {
    commands: HashMap<&'static str, Box<dyn BuiltinCommand>>,
}

impl Default for BuiltinManager {
    fn default() -> Self {
        Self::new()
    }
}

impl BuiltinManager {
    pub fn new() -> Self {
        let mut mgr = BuiltinManager {
            commands: HashMap::new(),
        };
        mgr.register(Box::new(CdCommand));
        mgr.register(Box::new(PwdCommand));
        mgr.register(Box::new(TrueCommand));
        mgr.register(Box::new(FalseCommand));
        mgr.register(Box::new(ColonCommand));
        mgr.register(Box::new(ExitCommand));
        mgr.register(Box::new(ExportCommand));
        mgr.register(Box::new(UnsetCommand));
        mgr.register(Box::new(LocalCommand));
        mgr.register(Box::new(SetCommand));
        mgr.register(Box::new(ShiftCommand));
        mgr.register(Box::new(TypesetCommand { name: "typeset" }));
        mgr.register(Box::new(TypesetCommand { name: "declare" }));
        mgr.register(Box::new(LoopControl::Break));
        mgr.register(Box::new(LoopControl::Continue));
        mgr.register(Box::new(ReturnCommand));
        mgr.register(Box::new(EvalCommand));
        mgr.register(Box::new(SourceCommand { name: "." }));
        mgr.register(Box::new(SourceCommand { name: "source" }));
        mgr.register(Box::new(ExecCommand));
        mgr.register(Box::new(TestCommand { name: "test" }));
        mgr.register(Box::new(TestCommand { name: "[" }));
        mgr.register(Box::new(EchoCommand));
        mgr.register(Box::new(PrintfCommand));
        mgr.register(Box::new(ReadCommand));
        mgr.register(Box::new(JobsCommand));
        mgr.register(Box::new(FgCommand));
        mgr.register(Box::new(BgCommand));
        mgr.register(Box::new(WaitCommand));
        mgr.register(Box::new(KillCommand));
        let mut names = mgr.names();
        names.push("help");
        names.sort_unstable();
        mgr.register(Box::new(HelpCommand { names }));
        mgr
    }

    pub fn register(&mut self, cmd: Box<dyn BuiltinCommand>) {
        self.commands.insert(cmd.name(), cmd);
    }

    pub fn is_builtin(&self, name: &str) -> bool {
        self.commands.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<&dyn BuiltinCommand> {
        self.commands.get(name).map(|c| c.as_ref())
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<&'static str> {
        let mut names: Vec<&'static str> = self.commands.keys().copied().collect();
        names.sort_unstable();
        names
    }
}
