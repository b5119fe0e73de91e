//! Command specification with argument validation.
//!
//! A [`CommandSpec`] describes one invocation of an external program. It is
//! built fluently and validated before anything is spawned:
//!
//! - **No shell**: arguments are passed to the program verbatim, never through `sh -c`
//! - **Argument checks**: NUL, CR and LF are rejected in every argument and env value
//! - **Program path checks**: no `..` components and no shell metacharacters
//!
//! Validation failures are collected while building and reported by the runner
//! when the spec is executed, so builder chains stay infallible.
//!
//! # Example
//!
//! ```
//! use claw_exec::CommandSpec;
//! use std::time::Duration;
//!
//! let spec = CommandSpec::new("kubectl")
//!     .args(["get", "pods", "-n", "kube-system", "-o", "json"])
//!     .timeout(Duration::from_secs(30));
//!
//! assert!(!spec.has_errors());
//! assert_eq!(spec.description(), "kubectl get pods -n kube-system -o json");
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{ExecError, Result};

/// Characters that are never allowed in arguments or env values.
const FORBIDDEN_CHARS: &[char] = &['\0', '\n', '\r'];

/// Characters rejected in the program path on top of [`FORBIDDEN_CHARS`].
const PROGRAM_METACHARS: &[char] = &[';', '&', '|', '$', '`'];

/// Validate a single command argument.
///
/// # Errors
///
/// Returns an error if the argument contains a forbidden character.
pub fn validate_argument(arg: &str, field: &str) -> Result<()> {
    if let Some(c) = arg.chars().find(|c| FORBIDDEN_CHARS.contains(c)) {
        return Err(ExecError::invalid_argument(
            field,
            format!("contains forbidden character {c:?}"),
        ));
    }
    Ok(())
}

/// Validate a program name or path.
///
/// # Errors
///
/// Returns an error if the path is empty, traverses upwards, or contains
/// shell metacharacters.
pub fn validate_program(program: &str) -> Result<()> {
    if program.is_empty() {
        return Err(ExecError::invalid_argument("program", "cannot be empty"));
    }

    if Path::new(program)
        .components()
        .any(|c| matches!(c, std::path::Component::ParentDir))
    {
        return Err(ExecError::invalid_argument(
            "program",
            format!("path traversal in '{program}'"),
        ));
    }

    if let Some(c) = program
        .chars()
        .find(|c| FORBIDDEN_CHARS.contains(c) || PROGRAM_METACHARS.contains(c))
    {
        return Err(ExecError::invalid_argument(
            "program",
            format!("contains forbidden character {c:?}"),
        ));
    }

    Ok(())
}

/// A fully described external command.
#[derive(Debug, Clone)]
pub struct CommandSpec {
    program: String,
    args: Vec<String>,
    env: Vec<(String, String)>,
    inherit_env: bool,
    current_dir: Option<PathBuf>,
    timeout: Option<Duration>,
    errors: Vec<(String, String)>,
}

impl CommandSpec {
    /// Create a spec for `program` with no arguments.
    ///
    /// The parent environment is inherited unless [`CommandSpec::clear_env`]
    /// is called.
    #[must_use]
    pub fn new(program: impl Into<String>) -> Self {
        let program = program.into();
        let mut errors = Vec::new();
        if let Err(ExecError::InvalidArgument { field, reason }) = validate_program(&program) {
            errors.push((field, reason));
        }

        Self {
            program,
            args: Vec::new(),
            env: Vec::new(),
            inherit_env: true,
            current_dir: None,
            timeout: None,
            errors,
        }
    }

    /// Append one argument.
    #[must_use]
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        let arg = arg.into();
        self.check(&arg, "argument");
        self.args.push(arg);
        self
    }

    /// Append several arguments.
    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for arg in args {
            self = self.arg(arg);
        }
        self
    }

    /// Set an extra environment variable.
    #[must_use]
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let key = key.into();
        let value = value.into();
        if key.is_empty() || key.contains('=') {
            self.errors
                .push(("env_key".to_string(), format!("invalid variable name '{key}'")));
            return self;
        }
        self.check(&key, "env_key");
        self.check(&value, "env_value");
        self.env.push((key, value));
        self
    }

    /// Do not inherit the parent environment.
    #[must_use]
    pub fn clear_env(mut self) -> Self {
        self.inherit_env = false;
        self
    }

    /// Run the command from `dir`.
    #[must_use]
    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.current_dir = Some(dir.into());
        self
    }

    /// Bound how long a run-to-completion invocation may take.
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    fn check(&mut self, value: &str, field: &str) {
        if let Err(ExecError::InvalidArgument { field, reason }) = validate_argument(value, field) {
            self.errors.push((field, reason));
        }
    }

    /// Program name or path.
    #[must_use]
    pub fn program(&self) -> &str {
        &self.program
    }

    /// Arguments, in order.
    #[must_use]
    pub fn get_args(&self) -> &[String] {
        &self.args
    }

    /// Extra environment variables.
    #[must_use]
    pub fn get_env(&self) -> &[(String, String)] {
        &self.env
    }

    /// Whether the parent environment is passed through.
    #[must_use]
    pub fn inherits_env(&self) -> bool {
        self.inherit_env
    }

    /// Working directory override.
    #[must_use]
    pub fn get_current_dir(&self) -> Option<&Path> {
        self.current_dir.as_deref()
    }

    /// Run-to-completion deadline.
    #[must_use]
    pub fn get_timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Whether any validation error was recorded while building.
    #[must_use]
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    /// Fail with the first recorded validation error.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if the builder recorded any error.
    pub fn validate(&self) -> Result<()> {
        match self.errors.first() {
            Some((field, reason)) => Err(ExecError::invalid_argument(field.as_str(), reason.as_str())),
            None => Ok(()),
        }
    }

    /// Human-readable command line for logs and error messages.
    #[must_use]
    pub fn description(&self) -> String {
        if self.args.is_empty() {
            return self.program.clone();
        }
        format!("{} {}", self.program, self.args.join(" "))
    }

    /// Whether the argument list starts with `prefix`.
    #[must_use]
    pub fn args_start_with(&self, prefix: &[&str]) -> bool {
        self.args.len() >= prefix.len() && self.args.iter().zip(prefix).all(|(a, p)| a == p)
    }

    /// Value following `flag` in the argument list, if present.
    #[must_use]
    pub fn flag_value(&self, flag: &str) -> Option<&str> {
        self.args
            .iter()
            .position(|a| a == flag)
            .and_then(|i| self.args.get(i + 1))
            .map(String::as_str)
    }

    pub(crate) fn to_tokio(&self) -> tokio::process::Command {
        let mut cmd = tokio::process::Command::new(&self.program);
        cmd.args(&self.args);
        if !self.inherit_env {
            cmd.env_clear();
        }
        for (key, value) in &self.env {
            cmd.env(key, value);
        }
        if let Some(dir) = &self.current_dir {
            cmd.current_dir(dir);
        }
        cmd
    }
}
