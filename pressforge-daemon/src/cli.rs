//! CLI argument definitions for pressforge-daemon.

use std::path::PathBuf;

use clap::Parser;

/// Pressforge site provisioning and monitoring daemon.
///
/// Provisions isolated site instances on demand and keeps a periodic
/// health sweep running over every active site.
#[derive(Parser, Debug)]
#[command(name = "pressforge-daemon")]
#[command(version, about, long_about = None)]
pub struct DaemonCli {
    /// Path to pressforge.toml configuration file.
    #[arg(short, long, default_value = "/etc/pressforge/pressforge.toml")]
    pub config: PathBuf,

    /// Override log level (trace, debug, info, warn, error).
    ///
    /// Takes precedence over the config file and environment variables.
    #[arg(long)]
    pub log_level: Option<String>,

    /// Override log format (json, pretty).
    #[arg(long)]
    pub log_format: Option<String>,

    /// Validate the configuration file and exit without starting.
    #[arg(long)]
    pub validate: bool,

    /// Override PID file path (takes precedence over config file).
    #[arg(long)]
    pub pid_file: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let cli = DaemonCli::parse_from(["pressforge-daemon"]);
        assert_eq!(cli.config, PathBuf::from("/etc/pressforge/pressforge.toml"));
        assert!(cli.log_level.is_none());
        assert!(!cli.validate);
    }

    #[test]
    fn overrides() {
        let cli = DaemonCli::parse_from([
            "pressforge-daemon",
            "--config",
            "/tmp/p.toml",
            "--log-level",
            "debug",
            "--log-format",
            "pretty",
            "--validate",
        ]);
        assert_eq!(cli.config, PathBuf::from("/tmp/p.toml"));
        assert_eq!(cli.log_level.as_deref(), Some("debug"));
        assert_eq!(cli.log_format.as_deref(), Some("pretty"));
        assert!(cli.validate);
    }
}
