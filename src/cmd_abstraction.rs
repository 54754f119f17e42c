//! Command execution abstraction for testability.
//!
//! Every change to the shaping state goes through `tc` or `iptables`. This
//! module puts that behind a trait so the shaper can be driven by a mock in
//! unit tests without touching real, privileged binaries.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

#[cfg(test)]
use mockall::automock;

/// Default upper bound for a single external command.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Output from command execution
#[derive(Debug, Clone, Default)]
pub struct CommandOutput {
    /// Standard output from the command
    pub stdout: String,
    /// Standard error from the command
    pub stderr: String,
    /// Whether the command succeeded (exit code 0)
    pub success: bool,
    /// The exit code, if available
    pub code: Option<i32>,
}

impl CommandOutput {
    /// Successful output with the given stdout.
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into(),
            stderr: String::new(),
            success: true,
            code: Some(0),
        }
    }
}

/// Trait for command execution, allowing dependency injection for testing.
///
/// Implementations only report what happened; deciding whether a non-zero
/// exit is fatal is left to the caller.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait CommandExecutor: Send + Sync {
    /// Execute a command with the given arguments.
    ///
    /// # Arguments
    /// * `cmd` - The command to execute (e.g., "tc")
    /// * `args` - The arguments to pass to the command
    async fn execute(&self, cmd: &str, args: &[String]) -> Result<CommandOutput>;
}

/// Real implementation of CommandExecutor that runs actual system commands.
///
/// Commands are prefixed with `sudo` when the process is not running as
/// root, and killed if they run longer than the configured timeout.
#[derive(Debug, Clone)]
pub struct RealCommandExecutor {
    timeout: Duration,
    elevate: bool,
}

impl RealCommandExecutor {
    /// Create a new RealCommandExecutor with the default timeout
    pub fn new() -> Self {
        Self::with_timeout(DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout,
            elevate: !is_root(),
        }
    }

    /// Never prefix commands with `sudo`, whoever we run as.
    pub fn without_elevation(mut self) -> Self {
        self.elevate = false;
        self
    }

    /// Program and argument list actually spawned for `cmd args...`.
    fn command_line(&self, cmd: &str, args: &[String]) -> (String, Vec<String>) {
        if self.elevate {
            let mut full = Vec::with_capacity(args.len() + 1);
            full.push(cmd.to_string());
            full.extend(args.iter().cloned());
            ("sudo".to_string(), full)
        } else {
            (cmd.to_string(), args.to_vec())
        }
    }
}

impl Default for RealCommandExecutor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CommandExecutor for RealCommandExecutor {
    async fn execute(&self, cmd: &str, args: &[String]) -> Result<CommandOutput> {
        let (program, args) = self.command_line(cmd, args);

        let child = Command::new(&program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("Failed to execute {}", program))?;

        // Dropping the child on timeout kills it
        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(output) => output.with_context(|| format!("Failed to wait for {}", program))?,
            Err(_) => anyhow::bail!(
                "{} {} timed out after {}s",
                program,
                args.join(" "),
                self.timeout.as_secs_f32()
            ),
        };

        Ok(CommandOutput {
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            success: output.status.success(),
            code: output.status.code(),
        })
    }
}

/// Effective UID of this process
pub fn effective_uid() -> u32 {
    // SAFETY: geteuid() has no preconditions, never fails and does not
    // modify any state.
    unsafe { libc::geteuid() }
}

/// Check if running as root (effective UID == 0)
pub fn is_root() -> bool {
    effective_uid() == 0
}

/// Helper function to convert a slice of &str to Vec<String>.
///
/// This is needed because mockall has issues with lifetimes in `&[&str]`,
/// so we use `&[String]` in the trait signature instead.
pub fn args_to_strings(args: &[&str]) -> Vec<String> {
    args.iter().map(|s| s.to_string()).collect()
}
