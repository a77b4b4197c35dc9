#![doc = include_str!("../README.md")]

pub mod command;
pub mod config;
pub mod error;
pub mod event;
pub mod metrics;
pub mod retry;
pub mod service;
pub mod store;
pub mod types;

// --- Primary re-exports ---
// Core types each module reaches for, available from the crate root.

// Errors
pub use error::{
    ConfigError, ContentError, HealthError, ParseError, PressforgeError, ProvisionError,
    StorageError,
};

// Configuration
pub use config::PressforgeConfig;

// Events
pub use event::{Event, EventMetadata, HealthAlertEvent, ProvisionEvent, ProvisionStep};

// Service lifecycle trait
pub use service::{Service, ServiceHealth};

// Command execution seam
pub use command::{CommandOutput, CommandRunner};

// Domain types
pub use types::{
    Block, BlockKind, HealthRecord, HealthStatus, MenuItem, PageSpec, ResourceMetrics,
    SiteInstance, SiteStatus, SoftwareVersions, StructureSpec,
};

// Storage
pub use store::{InMemoryPortRegistry, InMemorySiteStore, PortRegistry, SiteStore};
