use std::collections::HashMap;

use crate::ast::AstNode;
use crate::environment::Environment;
use crate::executor::{Captured, ExecError, ExecOutcome, ExecStatus, Executor};

/// Records what it is asked to run instead of running it. Command
/// substitutions answer from `outputs`, keyed by the trimmed source.
#[derive(Debug, Default)]
pub struct MockExecutor {
    pub outputs: HashMap<String, String>,
    pub captured: Vec<String>,
    pub log: Vec<String>,
}

impl MockExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_output(mut self, source: &str, stdout: &str) -> Self {
        self.outputs.insert(source.to_string(), stdout.to_string());
        self
    }
}

impl Executor for MockExecutor {
    fn exec(&mut self, node: &AstNode, _env: &mut Environment) -> ExecStatus {
        self.log.push(node.to_string());
        Ok(ExecOutcome::Code(0))
    }

    fn capture(&mut self, source: &str, _env: &mut Environment) -> Result<Captured, ExecError> {
        let key = source.trim().to_string();
        self.captured.push(key.clone());
        Ok(Captured {
            stdout: self.outputs.get(&key).cloned().unwrap_or_default(),
            status: 0,
        })
    }
}
