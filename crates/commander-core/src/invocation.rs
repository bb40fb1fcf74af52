//! How to launch the external CLI.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Where an invocation came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum InvocationKind {
    /// A direct executable path from the platform candidate list
    Executable,
    /// `<interpreter> -m <module>`
    InterpreterModule,
    /// Resolved through the system PATH lookup command
    SearchPath,
    /// Supplied by the caller or configuration, used as-is
    Configured,
}

/// A program plus the arguments that precede any subcommand.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct Invocation {
    /// Program to execute
    pub program: String,
    /// Leading arguments (e.g. `["-m", "keepercommander"]`)
    pub args: Vec<String>,
    /// Provenance
    pub kind: InvocationKind,
}

impl Invocation {
    /// Direct executable with no leading arguments.
    pub fn executable(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            kind: InvocationKind::Executable,
        }
    }

    /// `<interpreter> -m <module>`.
    pub fn module(interpreter: impl Into<String>, module: impl Into<String>) -> Self {
        Self {
            program: interpreter.into(),
            args: vec!["-m".to_string(), module.into()],
            kind: InvocationKind::InterpreterModule,
        }
    }

    /// Caller-supplied program and arguments.
    pub fn configured(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            kind: InvocationKind::Configured,
        }
    }

    /// Same invocation with a different provenance.
    pub fn with_kind(mut self, kind: InvocationKind) -> Self {
        self.kind = kind;
        self
    }

    /// Arguments with `extra` appended.
    pub fn args_with(&self, extra: &[String]) -> Vec<String> {
        self.args.iter().chain(extra.iter()).cloned().collect()
    }

    /// Human readable command line.
    pub fn display(&self) -> String {
        if self.args.is_empty() {
            self.program.clone()
        } else {
            format!("{} {}", self.program, self.args.join(" "))
        }
    }
}

impl std::fmt::Display for Invocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display())
    }
}
