//! Command execution seam.
//!
//! Everything that runs a command inside a container goes through the
//! [`CommandRunner`] trait, so pipeline logic can be tested against a
//! scripted runner without a Docker daemon. The production implementation
//! lives in the provisioning crate next to the Docker client.

use std::future::Future;
use std::time::Duration;

use crate::error::ProvisionError;

/// Captured output of one in-container command.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i64,
}

impl CommandOutput {
    /// Whether the command exited zero.
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Trimmed stdout, the common case for single-value CLI output.
    pub fn stdout_trimmed(&self) -> &str {
        self.stdout.trim()
    }
}

/// Executes commands inside a named container.
pub trait CommandRunner: Send + Sync {
    /// Runs `args` inside `container`, capturing stdout/stderr.
    ///
    /// A non-zero exit is returned as a normal [`CommandOutput`]; only
    /// transport failures and timeouts surface as errors.
    fn run(
        &self,
        container: &str,
        args: &[String],
        timeout: Duration,
    ) -> impl Future<Output = Result<CommandOutput, ProvisionError>> + Send;
}

/// Convenience for building an arg vector from string literals.
pub fn args(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|s| (*s).to_owned()).collect()
}
