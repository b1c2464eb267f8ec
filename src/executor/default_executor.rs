use std::io::{self, Write};
use std::mem;
use std::rc::Rc;

use tracing::{debug, trace};

use crate::ast::{AstNode, CaseArm, CommandNode, ListOp, Redirect, Word};
use crate::environment::Environment;
use crate::executor::assign::{self, DeclArg, Resolved, TempVars};
use crate::executor::builtin::{BuiltinCommand, BuiltinManager};
use crate::executor::process::{self, child_exit, fork_process, wait_foreground, Forked, Group};
use crate::executor::redirect::{RedirectHandler, SavedFds};
use crate::executor::{report, Captured, ExecError, ExecOutcome, ExecStatus, Executor};
use crate::expander::{pattern, ExpandError, Expander};

/// Calls nested deeper than this fail instead of exhausting the stack.
const MAX_FUNCTION_DEPTH: usize = 1000;

/// What a loop does after one iteration.
enum Step {
    Next(i32),
    Leave(ExecOutcome),
}

fn loop_step(outcome: ExecOutcome) -> Step {
    match outcome {
        ExecOutcome::Code(c) => Step::Next(c),
        ExecOutcome::Break(n) if n > 1 => Step::Leave(ExecOutcome::Break(n - 1)),
        ExecOutcome::Break(_) => Step::Leave(ExecOutcome::Code(0)),
        ExecOutcome::Continue(n) if n > 1 => Step::Leave(ExecOutcome::Continue(n - 1)),
        ExecOutcome::Continue(_) => Step::Next(0),
        other => Step::Leave(other),
    }
}

/// Walks the tree, running builtins in-process and everything else in
/// forked children.
pub struct DefaultExecutor {
    builtins: Rc<BuiltinManager>,
    /// Set in a forked child whose next simple command may replace the process.
    pub(super) exec_in_place: bool,
    /// Status of the last command substitution run while expanding a command.
    pub(super) last_subst_status: Option<i32>,
}

impl Default for DefaultExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl Executor for DefaultExecutor {
    fn exec(&mut self, node: &AstNode, env: &mut Environment) -> ExecStatus {
        let outcome = self.exec_node(node, env)?;
        env.last_status = outcome.code();
        Ok(outcome)
    }

    fn capture(&mut self, source: &str, env: &mut Environment) -> Result<Captured, ExecError> {
        let captured = self.capture_output(source, env)?;
        self.last_subst_status = Some(captured.status);
        Ok(captured)
    }
}

impl DefaultExecutor {
    pub fn new() -> Self {
        DefaultExecutor {
            builtins: Rc::new(BuiltinManager::new()),
            exec_in_place: false,
            last_subst_status: None,
        }
    }

    pub fn builtins(&self) -> &BuiltinManager {
        &self.builtins
    }

    fn exec_node(&mut self, node: &AstNode, env: &mut Environment) -> ExecStatus {
        match node {
            AstNode::Command(cmd) => self.exec_simple(cmd, env),
            AstNode::Pipeline { commands, negate } => {
                let outcome = match commands.as_slice() {
                    [single] => self.exec(single, env)?,
                    _ => self.exec_pipeline(commands, env)?,
                };
                if *negate && outcome.is_code() {
                    Ok(ExecOutcome::Code(i32::from(outcome.code() == 0)))
                } else {
                    Ok(outcome)
                }
            }
            AstNode::List { left, op, right } => self.exec_list(left, *op, right.as_deref(), env),
            AstNode::If {
                cond,
                then_branch,
                else_branch,
            } => {
                let status = self.exec(cond, env)?;
                if !status.is_code() {
                    return Ok(status);
                }
                if status.code() == 0 {
                    self.exec(then_branch, env)
                } else if let Some(else_branch) = else_branch {
                    self.exec(else_branch, env)
                } else {
                    Ok(ExecOutcome::Code(0))
                }
            }
            AstNode::For { var, words, body } => self.exec_for(var, words.as_deref(), body, env),
            AstNode::While { cond, body, negate } => self.exec_while(cond, body, *negate, env),
            AstNode::Case { word, arms } => self.exec_case(word, arms, env),
            AstNode::Group(body) => self.exec(body, env),
            AstNode::Subshell(body) => self.exec_subshell(body, env),
            AstNode::FunctionDef { name, body } => {
                debug!(function = %name, "defined");
                env.functions.insert(name.clone(), Rc::clone(body));
                Ok(ExecOutcome::Code(0))
            }
            AstNode::Redirect { node, redirects } => {
                self.with_redirects(redirects, env, |this, env| this.exec(node, env))
            }
        }
    }

    fn exec_list(&mut self, left: &AstNode, op: ListOp, right: Option<&AstNode>, env: &mut Environment) -> ExecStatus {
        let status = match op {
            ListOp::Background => self.exec_background(left, env)?,
            _ => self.exec(left, env)?,
        };
        if !status.is_code() {
            return Ok(status);
        }
        let run_right = match op {
            ListOp::And => status.code() == 0,
            ListOp::Or => status.code() != 0,
            ListOp::Seq | ListOp::Background => true,
        };
        match right {
            Some(right) if run_right => self.exec(right, env),
            _ => Ok(status),
        }
    }

    fn exec_for(&mut self, var: &str, words: Option<&[Word]>, body: &AstNode, env: &mut Environment) -> ExecStatus {
        let items = match words {
            Some(words) => match Expander::new(env, self).expand_words(words) {
                Ok(items) => items,
                Err(e) => {
                    report(&e);
                    return Ok(ExecOutcome::Code(1));
                }
            },
            None => env.positional.clone(),
        };
        env.loop_depth += 1;
        let result = self.run_for(var, items, body, env);
        env.loop_depth -= 1;
        result
    }

    fn run_for(&mut self, var: &str, items: Vec<String>, body: &AstNode, env: &mut Environment) -> ExecStatus {
        let mut status = 0;
        for item in items {
            env.set(var, &item);
            match loop_step(self.exec(body, env)?) {
                Step::Next(code) => status = code,
                Step::Leave(outcome) => return Ok(outcome),
            }
        }
        Ok(ExecOutcome::Code(status))
    }

    fn exec_while(&mut self, cond: &AstNode, body: &AstNode, negate: bool, env: &mut Environment) -> ExecStatus {
        env.loop_depth += 1;
        let result = self.run_while(cond, body, negate, env);
        env.loop_depth -= 1;
        result
    }

    fn run_while(&mut self, cond: &AstNode, body: &AstNode, negate: bool, env: &mut Environment) -> ExecStatus {
        let mut status = 0;
        loop {
            let test = match loop_step(self.exec(cond, env)?) {
                Step::Next(code) => code,
                Step::Leave(outcome) => return Ok(outcome),
            };
            if (test == 0) == negate {
                break;
            }
            match loop_step(self.exec(body, env)?) {
                Step::Next(code) => status = code,
                Step::Leave(outcome) => return Ok(outcome),
            }
        }
        Ok(ExecOutcome::Code(status))
    }

    fn exec_case(&mut self, word: &Word, arms: &[CaseArm], env: &mut Environment) -> ExecStatus {
        let subject = match Expander::new(env, self).expand_word_string(word.as_str()) {
            Ok(s) => s,
            Err(e) => {
                report(&e);
                return Ok(ExecOutcome::Code(1));
            }
        };
        for arm in arms {
            for pat in &arm.patterns {
                let glob = match Expander::new(env, self).expand_pattern(pat.as_str()) {
                    Ok(g) => g,
                    Err(e) => {
                        report(&e);
                        return Ok(ExecOutcome::Code(1));
                    }
                };
                if pattern::matches(&glob, &subject) {
                    trace!(%subject, pattern = %glob, "case arm matched");
                    return match &arm.body {
                        Some(body) => self.exec(body, env),
                        None => Ok(ExecOutcome::Code(0)),
                    };
                }
            }
        }
        Ok(ExecOutcome::Code(0))
    }

    /// Runs `f` with `redirects` applied to the shell's own descriptors.
    fn with_redirects<F>(&mut self, redirects: &[Redirect], env: &mut Environment, f: F) -> ExecStatus
    where
        F: FnOnce(&mut Self, &mut Environment) -> ExecStatus,
    {
        let saved = match RedirectHandler::apply(redirects, env, self) {
            Ok(saved) => saved,
            Err(e) => {
                report(&e);
                return Ok(ExecOutcome::Code(1));
            }
        };
        let result = f(self, env);
        let _ = io::stdout().flush();
        drop(saved);
        result
    }

    fn exec_simple(&mut self, cmd: &CommandNode, env: &mut Environment) -> ExecStatus {
        let in_place = mem::take(&mut self.exec_in_place);
        self.last_subst_status = None;

        if cmd.name.is_none() {
            return self.exec_assignments_only(cmd, env);
        }
        let (argv, declared) = match self.expand_argv(cmd, env) {
            Ok(expanded) => expanded,
            Err(e) => {
                report(&e);
                return Ok(ExecOutcome::Code(1));
            }
        };
        let mut assignments = Vec::with_capacity(cmd.assignments.len());
        for a in &cmd.assignments {
            match assign::resolve(a, env, self) {
                Ok(r) => assignments.push(r),
                Err(e) => {
                    report(&e);
                    return Ok(ExecOutcome::Code(1));
                }
            }
        }
        // Every word expanded to nothing: only the assignments and redirects remain.
        if argv.is_empty() {
            return self.finish_assignments(&assignments, &cmd.redirects, env);
        }
        if env.options.xtrace {
            trace_command(&assignments, &argv);
        }

        let name = argv[0].as_str();
        let builtins = Rc::clone(&self.builtins);
        let builtin = builtins.get(name);
        if let Some(b) = builtin.filter(|b| b.special()) {
            if let Err(e) = assignments.iter().try_for_each(|r| assign::apply(env, r)) {
                report(&e);
                return Ok(ExecOutcome::Code(1));
            }
            if name == "exec" && argv.len() == 1 {
                return match RedirectHandler::apply(&cmd.redirects, env, self) {
                    Ok(saved) => {
                        saved.keep();
                        Ok(ExecOutcome::Code(0))
                    }
                    Err(e) => {
                        report(&e);
                        Ok(ExecOutcome::Code(1))
                    }
                };
            }
            return self.run_builtin(b, &argv, declared, &cmd.redirects, env);
        }
        if let Some(body) = env.functions.get(name).cloned() {
            let args = argv[1..].to_vec();
            return self.with_redirects(&cmd.redirects, env, |this, env| {
                this.call_function(name, body, args, &assignments, env)
            });
        }
        if let Some(b) = builtin {
            let temp = match TempVars::apply(env, &assignments) {
                Ok(temp) => temp,
                Err(e) => {
                    report(&e);
                    return Ok(ExecOutcome::Code(1));
                }
            };
            let result = self.run_builtin(b, &argv, declared, &cmd.redirects, env);
            temp.restore(env);
            return result;
        }
        let exports: Vec<(String, String)> = assignments.iter().filter_map(Resolved::as_env_pair).collect();
        self.exec_external(&argv, &exports, &cmd.redirects, env, in_place)
    }

    /// Expands the command name and arguments. Arguments the parser kept as
    /// assignments are resolved instead of split and globbed; they come back
    /// as declaration operands alongside their text for tracing.
    fn expand_argv(
        &mut self,
        cmd: &CommandNode,
        env: &mut Environment,
    ) -> Result<(Vec<String>, Option<Vec<DeclArg>>), ExpandError> {
        if cmd.declarations.is_empty() {
            return Ok((Expander::new(env, self).expand_words(&cmd.words())?, None));
        }
        let mut argv = Expander::new(env, self).expand_words(cmd.name.as_slice())?;
        let mut operands: Vec<DeclArg> = argv.iter().skip(1).cloned().map(DeclArg::Word).collect();
        argv.truncate(1);
        for (i, word) in cmd.args.iter().enumerate() {
            match cmd.declaration(i) {
                Some(a) => operands.push(DeclArg::Assign(assign::resolve(a, env, self)?)),
                None => {
                    let fields = Expander::new(env, self).expand_words(std::slice::from_ref(word))?;
                    operands.extend(fields.into_iter().map(DeclArg::Word));
                }
            }
        }
        argv.extend(operands.iter().cloned().map(DeclArg::into_text));
        Ok((argv, Some(operands)))
    }

    fn exec_assignments_only(&mut self, cmd: &CommandNode, env: &mut Environment) -> ExecStatus {
        let mut applied = Vec::with_capacity(cmd.assignments.len());
        for a in &cmd.assignments {
            let resolved = assign::resolve(a, env, self).map_err(ExecError::from).and_then(|r| {
                assign::apply(env, &r)?;
                Ok(r)
            });
            match resolved {
                Ok(r) => applied.push(r),
                Err(e) => {
                    report(&e);
                    return Ok(ExecOutcome::Code(1));
                }
            }
        }
        if env.options.xtrace && !applied.is_empty() {
            trace_command(&applied, &[]);
        }
        let status = self.last_subst_status.unwrap_or(0);
        if !cmd.redirects.is_empty() {
            if let Err(e) = RedirectHandler::apply(&cmd.redirects, env, self) {
                report(&e);
                return Ok(ExecOutcome::Code(1));
            }
        }
        Ok(ExecOutcome::Code(status))
    }

    fn finish_assignments(&mut self, assignments: &[Resolved], redirects: &[Redirect], env: &mut Environment) -> ExecStatus {
        if let Err(e) = assignments.iter().try_for_each(|r| assign::apply(env, r)) {
            report(&e);
            return Ok(ExecOutcome::Code(1));
        }
        let status = self.last_subst_status.unwrap_or(0);
        if let Err(e) = RedirectHandler::apply(redirects, env, self) {
            report(&e);
            return Ok(ExecOutcome::Code(1));
        }
        Ok(ExecOutcome::Code(status))
    }

    fn run_builtin(
        &mut self,
        builtin: &dyn BuiltinCommand,
        argv: &[String],
        declared: Option<Vec<DeclArg>>,
        redirects: &[Redirect],
        env: &mut Environment,
    ) -> ExecStatus {
        trace!(builtin = builtin.name(), "running builtin");
        self.with_redirects(redirects, env, |this, env| {
            let result = match declared {
                Some(operands) => builtin.run_declaration(operands, env, this),
                None => builtin.run(&argv[1..], env, this),
            };
            let _ = io::stdout().flush();
            match result {
                Ok(outcome) => Ok(outcome),
                Err(e) => {
                    report(&e);
                    Ok(ExecOutcome::Code(e.status()))
                }
            }
        })
    }

    fn call_function(
        &mut self,
        name: &str,
        body: Rc<AstNode>,
        args: Vec<String>,
        assignments: &[Resolved],
        env: &mut Environment,
    ) -> ExecStatus {
        if env.function_depth >= MAX_FUNCTION_DEPTH {
            report(format_args!("{name}: maximum function nesting level exceeded ({MAX_FUNCTION_DEPTH})"));
            return Ok(ExecOutcome::Code(1));
        }
        env.push_scope();
        for (var, value) in assignments.iter().filter_map(Resolved::as_env_pair) {
            env.declare_local(&var, Some(&value));
            env.export(&var);
        }
        let positional = mem::replace(&mut env.positional, args);
        let loop_depth = mem::replace(&mut env.loop_depth, 0);
        env.function_depth += 1;
        trace!(function = %name, depth = env.function_depth, "call");

        let result = self.exec(&body, env);

        env.function_depth -= 1;
        env.loop_depth = loop_depth;
        env.positional = positional;
        env.pop_scope();
        Ok(match result? {
            ExecOutcome::Return(code) => ExecOutcome::Code(code),
            ExecOutcome::Break(_) | ExecOutcome::Continue(_) => ExecOutcome::Code(0),
            other => other,
        })
    }

    fn exec_external(
        &mut self,
        argv: &[String],
        exports: &[(String, String)],
        redirects: &[Redirect],
        env: &mut Environment,
        in_place: bool,
    ) -> ExecStatus {
        if in_place {
            self.exec_child(argv, exports, redirects, env);
        }
        match fork_process(env, Group::Own, true)? {
            Forked::Child => {
                env.become_subshell();
                self.exec_child(argv, exports, redirects, env)
            }
            Forked::Parent(pid) => {
                let id = env.jobs.add(pid, &[pid], argv.join(" "), true, false);
                Ok(ExecOutcome::Code(wait_foreground(env, id, pid)))
            }
        }
    }

    /// Applies redirections permanently and replaces the current process.
    fn exec_child(&mut self, argv: &[String], exports: &[(String, String)], redirects: &[Redirect], env: &mut Environment) -> ! {
        match RedirectHandler::apply(redirects, env, self) {
            Ok(saved) => SavedFds::keep(saved),
            Err(e) => {
                report(&e);
                child_exit(1);
            }
        }
        let code = process::exec_or_script(self, argv, exports, env);
        child_exit(code)
    }
}

fn trace_command(assignments: &[Resolved], argv: &[String]) {
    let mut words: Vec<String> = assignments.iter().map(Resolved::display).collect();
    words.extend(argv.iter().cloned());
    let _ = writeln!(io::stderr(), "+ {}", words.join(" "));
}
