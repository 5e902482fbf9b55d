//! External command boundary.
//!
//! Every external tool this crate drives (curl, tar, make, the cross
//! compiler) is invoked through the [`CommandRunner`] trait so the retry,
//! fallback and arbitration logic can be tested without real network or
//! compiler access. [`HostRunner`] is the production implementation.

use anyhow::{Context, Result};
use std::fmt;
use std::path::PathBuf;
use std::process::Command;

/// A fully described external invocation.
#[derive(Debug, Clone)]
pub struct CmdSpec {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
}

impl CmdSpec {
    pub fn new(program: impl Into<String>) -> Self {
        CmdSpec {
            program: program.into(),
            args: Vec::new(),
            cwd: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn cwd(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }
}

impl fmt::Display for CmdSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for a in &self.args {
            write!(f, " {}", a)?;
        }
        Ok(())
    }
}

/// Captured result of an external invocation.
#[derive(Debug, Clone)]
pub struct CmdOutput {
    /// Exit code; `None` when the process was killed by a signal.
    pub code: Option<i32>,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl CmdOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    pub fn stdout_text(&self) -> String {
        String::from_utf8_lossy(&self.stdout).trim().to_string()
    }

    pub fn stderr_text(&self) -> String {
        String::from_utf8_lossy(&self.stderr).trim().to_string()
    }
}

/// Mockable boundary for every external tool invocation.
pub trait CommandRunner {
    fn run(&self, cmd: &CmdSpec) -> Result<CmdOutput>;
}

/// Runs commands on the host with captured output.
pub struct HostRunner;

impl CommandRunner for HostRunner {
    fn run(&self, cmd: &CmdSpec) -> Result<CmdOutput> {
        let mut command = Command::new(&cmd.program);
        command.args(&cmd.args);
        if let Some(dir) = &cmd.cwd {
            command.current_dir(dir);
        }
        let output = command
            .output()
            .with_context(|| format!("executing '{}'", cmd))?;
        Ok(CmdOutput {
            code: output.status.code(),
            stdout: output.stdout,
            stderr: output.stderr,
        })
    }
}

#[cfg(test)]
pub(crate) mod fake {
    //! Scripted runner for deterministic tests.

    use super::*;
    use std::cell::RefCell;
    use std::collections::VecDeque;

    pub fn ok() -> CmdOutput {
        ok_with_stdout("")
    }

    pub fn ok_with_stdout(stdout: &str) -> CmdOutput {
        CmdOutput {
            code: Some(0),
            stdout: stdout.as_bytes().to_vec(),
            stderr: Vec::new(),
        }
    }

    pub fn fail(code: i32, stderr: &str) -> CmdOutput {
        CmdOutput {
            code: Some(code),
            stdout: Vec::new(),
            stderr: stderr.as_bytes().to_vec(),
        }
    }

    type Effect = Box<dyn Fn()>;

    struct Rule {
        program: String,
        /// Substrings that must each appear in some argument.
        contains: Vec<String>,
        /// Responses consumed in order; the last one repeats.
        responses: VecDeque<CmdOutput>,
        effect: Option<Effect>,
    }

    /// Matches invocations against scripted rules, records every call, and
    /// errors on anything unscripted so tests state their expectations.
    #[derive(Default)]
    pub struct ScriptedRunner {
        rules: RefCell<Vec<Rule>>,
        calls: RefCell<Vec<String>>,
    }

    impl ScriptedRunner {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn on(&self, program: &str, contains: &[&str], responses: Vec<CmdOutput>) {
            self.rules.borrow_mut().push(Rule {
                program: program.to_string(),
                contains: contains.iter().map(|s| s.to_string()).collect(),
                responses: responses.into(),
                effect: None,
            });
        }

        /// Like `on`, but also runs `effect` each time the rule fires
        /// (e.g. to materialize a downloaded or extracted file).
        pub fn on_with_effect(
            &self,
            program: &str,
            contains: &[&str],
            responses: Vec<CmdOutput>,
            effect: impl Fn() + 'static,
        ) {
            self.rules.borrow_mut().push(Rule {
                program: program.to_string(),
                contains: contains.iter().map(|s| s.to_string()).collect(),
                responses: responses.into(),
                effect: Some(Box::new(effect)),
            });
        }

        pub fn calls(&self) -> Vec<String> {
            self.calls.borrow().clone()
        }

        pub fn count_calls_to(&self, program: &str) -> usize {
            self.calls
                .borrow()
                .iter()
                .filter(|c| c.split_whitespace().next() == Some(program))
                .count()
        }
    }

    impl CommandRunner for ScriptedRunner {
        fn run(&self, cmd: &CmdSpec) -> Result<CmdOutput> {
            self.calls.borrow_mut().push(cmd.to_string());
            let mut rules = self.rules.borrow_mut();
            for rule in rules.iter_mut() {
                if rule.program != cmd.program {
                    continue;
                }
                if !rule
                    .contains
                    .iter()
                    .all(|needle| cmd.args.iter().any(|a| a.contains(needle.as_str())))
                {
                    continue;
                }
                let response = if rule.responses.len() > 1 {
                    rule.responses.pop_front().unwrap()
                } else {
                    rule.responses
                        .front()
                        .cloned()
                        .unwrap_or_else(super::fake::ok)
                };
                if let Some(effect) = &rule.effect {
                    effect();
                }
                return Ok(response);
            }
            anyhow::bail!("unscripted command in test: {}", cmd);
        }
    }
}
