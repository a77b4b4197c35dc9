#![doc = include_str!("../README.md")]

pub mod bootstrap;
pub mod container;
pub mod coordinator;
pub mod database;
pub mod docker;
pub mod network;
pub mod port;
pub mod theme;

pub use bootstrap::BootstrapAutomator;
pub use container::{ReuseInfo, SiteContainerManager, SiteSpec};
pub use coordinator::{PreviewReuseCoordinator, ProvisionOutcome, SiteRequest};
pub use database::{DatabaseProvisioner, DbCredentials};
pub use docker::{
    BollardDockerClient, ContainerSpec, ContainerSummary, DockerClient, DockerCommandRunner,
    parse_host_port,
};
pub use network::NetworkManager;
pub use port::PortAllocator;
pub use theme::{InMemoryThemeCatalog, ThemeCatalog, ThemeDescriptor, ThemeInstaller};
