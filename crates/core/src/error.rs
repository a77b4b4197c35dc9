//! Error types -- the platform-wide error taxonomy.
//!
//! Provisioning-path errors are fatal and bubble to the caller with a
//! distinguishable cause; monitoring-path errors are absorbed into
//! persisted health state and never interrupt a sweep. Per-item content
//! errors ([`ContentError::PageCreation`], [`ContentError::MenuAssignment`])
//! are recorded in results rather than raised.

/// Top-level Pressforge error type.
#[derive(Debug, thiserror::Error)]
pub enum PressforgeError {
    /// Configuration error
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    /// Provisioning pipeline error
    #[error("provision error: {0}")]
    Provision(#[from] ProvisionError),

    /// Content application error
    #[error("content error: {0}")]
    Content(#[from] ContentError),

    /// Health monitoring error
    #[error("health error: {0}")]
    Health(#[from] HealthError),

    /// Storage error
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// CLI output parse error
    #[error("parse error: {0}")]
    Parse(#[from] ParseError),

    /// I/O error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Configuration file missing
    #[error("config file not found: {path}")]
    FileNotFound { path: String },

    /// Configuration parse failure
    #[error("failed to parse config: {reason}")]
    ParseFailed { reason: String },

    /// Invalid configuration value
    #[error("invalid config value for '{field}': {reason}")]
    InvalidValue { field: String, reason: String },
}

/// Provisioning errors.
///
/// Everything in here aborts the provisioning request that produced it,
/// with one exception: [`ProvisionError::ToolchainInstall`] is only
/// surfaced after the single automatic container-replacement retry has
/// also failed.
#[derive(Debug, thiserror::Error)]
pub enum ProvisionError {
    /// Docker API call failure
    #[error("docker api error: {0}")]
    DockerApi(String),

    /// Docker daemon connection failure
    #[error("docker connection error: {0}")]
    DockerConnection(String),

    /// Virtual network creation/inspection failure
    #[error("network error: {0}")]
    Network(String),

    /// Database instance creation failure
    #[error("database error: {0}")]
    Database(String),

    /// Application container lifecycle failure
    #[error("container error for '{name}': {reason}")]
    Container { name: String, reason: String },

    /// Container (or other resource) not found
    #[error("not found: {0}")]
    NotFound(String),

    /// Readiness probe exhausted its attempt budget
    #[error("'{resource}' not ready after {attempts} attempts")]
    ReadinessTimeout { resource: String, attempts: u32 },

    /// CLI toolchain install failed after the replacement retry
    #[error("toolchain install failed for '{container}': {reason}")]
    ToolchainInstall { container: String, reason: String },

    /// Theme could not be resolved from catalog nor public repository
    #[error("theme '{slug}' resolution failed: {reason}")]
    ThemeResolution { slug: String, reason: String },

    /// Command execution inside an instance failed
    #[error("command failed in '{container}' (exit {exit_code}): {stderr}")]
    CommandFailed {
        container: String,
        exit_code: i64,
        stderr: String,
    },

    /// Command execution timed out
    #[error("command timed out in '{container}' after {timeout_secs}s")]
    CommandTimeout { container: String, timeout_secs: u64 },
}

/// Content application errors.
#[derive(Debug, thiserror::Error)]
pub enum ContentError {
    /// Structure rejected before any mutation
    #[error("invalid structure: {0}")]
    StructureValidation(String),

    /// Page creation failed (per-item, non-fatal)
    #[error("page '{page}' creation failed: {reason}")]
    PageCreation { page: String, reason: String },

    /// Menu could not be assigned to any discovered location (non-fatal)
    #[error("menu assignment failed: {0}")]
    MenuAssignment(String),
}

/// Health monitoring errors.
///
/// Never fatal to the sweep; a probe failure downgrades the local status
/// to down instead of propagating.
#[derive(Debug, thiserror::Error)]
pub enum HealthError {
    /// Probe transport failure or timeout
    #[error("health probe failed: {0}")]
    Probe(String),

    /// Probe returned a payload that does not match the contract
    #[error("health payload invalid: {0}")]
    InvalidPayload(String),
}

/// Storage errors.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// Referenced site does not exist
    #[error("site not found: {0}")]
    NotFound(String),

    /// Uniqueness invariant violated (slug or active port)
    #[error("conflict: {0}")]
    Conflict(String),
}

/// Typed-parser errors at the command-output boundary.
///
/// Business logic never regexes raw CLI text; these are the only places
/// that do, and a no-match is always a hard error.
#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    /// Port-mapping text did not contain `80/tcp -> 0.0.0.0:<port>`
    #[error("no host port mapping in: {0:?}")]
    PortMapping(String),

    /// Created-entity ID missing from command output
    #[error("no entity id in command output: {0:?}")]
    EntityId(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn readiness_timeout_display() {
        let err = ProvisionError::ReadinessTimeout {
            resource: "db-acme-cafe".to_owned(),
            attempts: 30,
        };
        let msg = err.to_string();
        assert!(msg.contains("db-acme-cafe"));
        assert!(msg.contains("30"));
    }

    #[test]
    fn toolchain_install_display() {
        let err = ProvisionError::ToolchainInstall {
            container: "wp-acme-cafe".to_owned(),
            reason: "download failed".to_owned(),
        };
        assert!(err.to_string().contains("wp-acme-cafe"));
    }

    #[test]
    fn page_creation_display() {
        let err = ContentError::PageCreation {
            page: "about".to_owned(),
            reason: "no id in output".to_owned(),
        };
        let msg = err.to_string();
        assert!(msg.contains("about"));
        assert!(msg.contains("no id in output"));
    }

    #[test]
    fn parse_error_display_quotes_input() {
        let err = ParseError::PortMapping("garbage".to_owned());
        assert!(err.to_string().contains("\"garbage\""));
    }

    #[test]
    fn provision_error_converts_to_top_level() {
        let err = ProvisionError::Network("create failed".to_owned());
        let top: PressforgeError = err.into();
        assert!(matches!(top, PressforgeError::Provision(_)));
    }

    #[test]
    fn content_error_converts_to_top_level() {
        let err = ContentError::StructureValidation("no pages".to_owned());
        let top: PressforgeError = err.into();
        assert!(matches!(top, PressforgeError::Content(_)));
    }

    #[test]
    fn storage_conflict_display() {
        let err = StorageError::Conflict("port 8081 already bound".to_owned());
        assert!(err.to_string().contains("8081"));
    }
}
