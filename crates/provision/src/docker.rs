//! Docker API abstraction.
//!
//! All Docker calls go through the [`DockerClient`] trait so the
//! pipeline can run against [`BollardDockerClient`] in production and a
//! scripted mock in tests.
//!
//! ```text
//! SiteContainerManager / NetworkManager / DatabaseProvisioner
//!                        |
//!                        v
//!                  DockerClient (trait)
//!                   /           \
//!        BollardDockerClient   MockDockerClient (tests)
//!                 |
//!           Docker daemon
//! ```
//!
//! Container names are validated before any API call; names come from
//! user-supplied slugs and must never reach the daemon unchecked.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use regex::Regex;
use std::sync::OnceLock;
use tracing::debug;

use pressforge_core::command::{CommandOutput, CommandRunner};
use pressforge_core::error::{ParseError, ProvisionError};

/// Validates a container or network name.
///
/// Docker accepts `[a-zA-Z0-9][a-zA-Z0-9_.-]*`; anything else is
/// rejected before it reaches the daemon.
pub(crate) fn validate_name(name: &str) -> Result<(), ProvisionError> {
    let mut chars = name.chars();
    let valid_first = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphanumeric());
    let valid_rest = name
        .chars()
        .skip(1)
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'));
    if !valid_first || !valid_rest || name.len() > 128 {
        return Err(ProvisionError::DockerApi(format!(
            "invalid resource name: {name:?}"
        )));
    }
    Ok(())
}

/// Snapshot of one container, as much as the pipeline needs.
#[derive(Debug, Clone)]
pub struct ContainerSummary {
    pub id: String,
    pub name: String,
    pub image: String,
    pub running: bool,
    /// Port mappings rendered one per line as
    /// `"<container_port>/tcp -> <host_ip>:<host_port>"`.
    pub port_text: String,
}

/// Everything needed to create one container.
#[derive(Debug, Clone)]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    pub network: String,
    /// `KEY=value` environment entries
    pub env: Vec<String>,
    /// Host port published to `container_port`, when the container is
    /// exposed at all
    pub host_port: Option<u16>,
    pub container_port: u16,
}

/// Trait abstracting the Docker operations the pipeline performs.
pub trait DockerClient: Send + Sync + 'static {
    /// Checks daemon connectivity.
    fn ping(&self) -> impl Future<Output = Result<(), ProvisionError>> + Send;

    /// Whether a network with this name exists.
    fn network_exists(&self, name: &str) -> impl Future<Output = Result<bool, ProvisionError>> + Send;

    /// Creates a bridge network.
    fn create_network(&self, name: &str) -> impl Future<Output = Result<(), ProvisionError>> + Send;

    /// Inspects a container by name.
    ///
    /// A missing container is [`ProvisionError::NotFound`]; the caller
    /// decides whether that means create or abort.
    fn inspect_container(
        &self,
        name: &str,
    ) -> impl Future<Output = Result<ContainerSummary, ProvisionError>> + Send;

    /// Creates a container from `spec` without starting it.
    fn create_container(
        &self,
        spec: &ContainerSpec,
    ) -> impl Future<Output = Result<(), ProvisionError>> + Send;

    /// Starts a created or stopped container.
    fn start_container(&self, name: &str)
    -> impl Future<Output = Result<(), ProvisionError>> + Send;

    /// Stops a container with a 10-second grace period.
    fn stop_container(&self, name: &str)
    -> impl Future<Output = Result<(), ProvisionError>> + Send;

    /// Force-removes a container.
    fn remove_container(
        &self,
        name: &str,
    ) -> impl Future<Output = Result<(), ProvisionError>> + Send;

    /// Runs a command inside a running container, capturing output.
    fn exec(
        &self,
        container: &str,
        cmd: &[String],
    ) -> impl Future<Output = Result<CommandOutput, ProvisionError>> + Send;
}

/// Production Docker client backed by `bollard`.
pub struct BollardDockerClient {
    docker: Arc<bollard::Docker>,
}

impl BollardDockerClient {
    /// Connects using the platform's default local socket.
    pub fn connect_local() -> Result<Self, ProvisionError> {
        let docker = bollard::Docker::connect_with_local_defaults().map_err(|e| {
            ProvisionError::DockerConnection(format!("failed to connect to docker: {e}"))
        })?;
        Ok(Self {
            docker: Arc::new(docker),
        })
    }

    /// Connects to a specific socket path.
    pub fn connect_with_socket(socket_path: &str) -> Result<Self, ProvisionError> {
        let docker =
            bollard::Docker::connect_with_socket(socket_path, 120, bollard::API_DEFAULT_VERSION)
                .map_err(|e| {
                    ProvisionError::DockerConnection(format!(
                        "failed to connect to docker at {socket_path}: {e}"
                    ))
                })?;
        Ok(Self {
            docker: Arc::new(docker),
        })
    }
}

impl DockerClient for BollardDockerClient {
    async fn ping(&self) -> Result<(), ProvisionError> {
        self.docker
            .ping()
            .await
            .map_err(|e| ProvisionError::DockerConnection(format!("ping failed: {e}")))?;
        Ok(())
    }

    async fn network_exists(&self, name: &str) -> Result<bool, ProvisionError> {
        validate_name(name)?;
        use bollard::network::InspectNetworkOptions;

        match self
            .docker
            .inspect_network(name, None::<InspectNetworkOptions<String>>)
            .await
        {
            Ok(_) => Ok(true),
            Err(e) if e.to_string().contains("404") => Ok(false),
            Err(e) => Err(ProvisionError::Network(format!(
                "inspect network '{name}' failed: {e}"
            ))),
        }
    }

    async fn create_network(&self, name: &str) -> Result<(), ProvisionError> {
        validate_name(name)?;
        use bollard::network::CreateNetworkOptions;

        self.docker
            .create_network(CreateNetworkOptions {
                name: name.to_owned(),
                driver: "bridge".to_owned(),
                ..Default::default()
            })
            .await
            .map_err(|e| ProvisionError::Network(format!("create network '{name}' failed: {e}")))?;
        Ok(())
    }

    async fn inspect_container(&self, name: &str) -> Result<ContainerSummary, ProvisionError> {
        validate_name(name)?;

        let details = self.docker.inspect_container(name, None).await.map_err(|e| {
            if e.to_string().contains("404") {
                ProvisionError::NotFound(name.to_owned())
            } else {
                ProvisionError::DockerApi(format!("inspect container '{name}' failed: {e}"))
            }
        })?;

        let running = details
            .state
            .as_ref()
            .and_then(|s| s.running)
            .unwrap_or(false);
        let port_text = details
            .host_config
            .as_ref()
            .and_then(|hc| hc.port_bindings.as_ref())
            .map(format_port_bindings)
            .unwrap_or_default();

        Ok(ContainerSummary {
            id: details.id.unwrap_or_default(),
            name: details
                .name
                .map(|n| n.trim_start_matches('/').to_owned())
                .unwrap_or_default(),
            image: details.config.and_then(|c| c.image).unwrap_or_default(),
            running,
            port_text,
        })
    }

    async fn create_container(&self, spec: &ContainerSpec) -> Result<(), ProvisionError> {
        validate_name(&spec.name)?;
        use bollard::container::{Config, CreateContainerOptions};
        use bollard::models::{HostConfig, PortBinding};

        let port_key = format!("{}/tcp", spec.container_port);
        let port_bindings = spec.host_port.map(|host_port| {
            let mut map: HashMap<String, Option<Vec<PortBinding>>> = HashMap::new();
            map.insert(
                port_key.clone(),
                Some(vec![PortBinding {
                    host_ip: Some("0.0.0.0".to_owned()),
                    host_port: Some(host_port.to_string()),
                }]),
            );
            map
        });

        let exposed_ports = spec.host_port.map(|_| {
            let mut map = HashMap::new();
            map.insert(port_key.clone(), HashMap::new());
            map
        });

        let config = Config {
            image: Some(spec.image.clone()),
            env: Some(spec.env.clone()),
            exposed_ports,
            host_config: Some(HostConfig {
                network_mode: Some(spec.network.clone()),
                port_bindings,
                ..Default::default()
            }),
            ..Default::default()
        };

        self.docker
            .create_container(
                Some(CreateContainerOptions {
                    name: spec.name.clone(),
                    platform: None,
                }),
                config,
            )
            .await
            .map_err(|e| ProvisionError::Container {
                name: spec.name.clone(),
                reason: format!("create failed: {e}"),
            })?;
        Ok(())
    }

    async fn start_container(&self, name: &str) -> Result<(), ProvisionError> {
        validate_name(name)?;
        use bollard::container::StartContainerOptions;

        self.docker
            .start_container(name, None::<StartContainerOptions<String>>)
            .await
            .map_err(|e| ProvisionError::Container {
                name: name.to_owned(),
                reason: format!("start failed: {e}"),
            })
    }

    async fn stop_container(&self, name: &str) -> Result<(), ProvisionError> {
        validate_name(name)?;
        use bollard::container::StopContainerOptions;

        self.docker
            .stop_container(name, Some(StopContainerOptions { t: 10 }))
            .await
            .map_err(|e| ProvisionError::Container {
                name: name.to_owned(),
                reason: format!("stop failed: {e}"),
            })
    }

    async fn remove_container(&self, name: &str) -> Result<(), ProvisionError> {
        validate_name(name)?;
        use bollard::container::RemoveContainerOptions;

        self.docker
            .remove_container(
                name,
                Some(RemoveContainerOptions {
                    force: true,
                    ..Default::default()
                }),
            )
            .await
            .map_err(|e| ProvisionError::Container {
                name: name.to_owned(),
                reason: format!("remove failed: {e}"),
            })
    }

    async fn exec(&self, container: &str, cmd: &[String]) -> Result<CommandOutput, ProvisionError> {
        validate_name(container)?;
        use bollard::container::LogOutput;
        use bollard::exec::{CreateExecOptions, StartExecResults};

        let exec = self
            .docker
            .create_exec(
                container,
                CreateExecOptions {
                    attach_stdout: Some(true),
                    attach_stderr: Some(true),
                    cmd: Some(cmd.to_vec()),
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| ProvisionError::DockerApi(format!("create exec failed: {e}")))?;

        let mut stdout = String::new();
        let mut stderr = String::new();
        match self
            .docker
            .start_exec(&exec.id, None)
            .await
            .map_err(|e| ProvisionError::DockerApi(format!("start exec failed: {e}")))?
        {
            StartExecResults::Attached { mut output, .. } => {
                while let Some(chunk) = output.next().await {
                    match chunk {
                        Ok(LogOutput::StdOut { message }) => {
                            stdout.push_str(&String::from_utf8_lossy(&message));
                        }
                        Ok(LogOutput::StdErr { message }) => {
                            stderr.push_str(&String::from_utf8_lossy(&message));
                        }
                        Ok(_) => {}
                        Err(e) => {
                            return Err(ProvisionError::DockerApi(format!(
                                "exec stream failed: {e}"
                            )));
                        }
                    }
                }
            }
            StartExecResults::Detached => {}
        }

        let inspect = self
            .docker
            .inspect_exec(&exec.id)
            .await
            .map_err(|e| ProvisionError::DockerApi(format!("inspect exec failed: {e}")))?;
        let exit_code = inspect.exit_code.unwrap_or(-1);

        debug!(container, exit_code, "exec completed");
        Ok(CommandOutput {
            stdout,
            stderr,
            exit_code,
        })
    }
}

/// Renders bollard port bindings into the introspection text format the
/// pipeline parses: one `"<port>/tcp -> <ip>:<host_port>"` line each.
fn format_port_bindings(
    bindings: &HashMap<String, Option<Vec<bollard::models::PortBinding>>>,
) -> String {
    let mut lines: Vec<String> = Vec::new();
    for (container_port, binding) in bindings {
        let Some(binding) = binding else { continue };
        for entry in binding {
            let ip = entry.host_ip.as_deref().unwrap_or("0.0.0.0");
            let port = entry.host_port.as_deref().unwrap_or("");
            lines.push(format!("{container_port} -> {ip}:{port}"));
        }
    }
    lines.sort();
    lines.join("\n")
}

/// Parses the published host port for container port 80 from the
/// port-mapping text (`"80/tcp -> 0.0.0.0:<port>"`).
///
/// No match is a hard error; a default port is never assumed.
pub fn parse_host_port(port_text: &str) -> Result<u16, ParseError> {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    let re = PATTERN.get_or_init(|| {
        Regex::new(r"\b80/tcp\s*->\s*[\d.]+:(\d+)").unwrap_or_else(|_| unreachable!())
    });
    re.captures(port_text)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse::<u16>().ok())
        .ok_or_else(|| ParseError::PortMapping(port_text.to_owned()))
}

/// [`CommandRunner`] backed by Docker exec, with a per-command timeout.
pub struct DockerCommandRunner<D> {
    client: Arc<D>,
}

impl<D: DockerClient> DockerCommandRunner<D> {
    pub fn new(client: Arc<D>) -> Self {
        Self { client }
    }
}

impl<D: DockerClient> CommandRunner for DockerCommandRunner<D> {
    async fn run(
        &self,
        container: &str,
        args: &[String],
        timeout: Duration,
    ) -> Result<CommandOutput, ProvisionError> {
        match tokio::time::timeout(timeout, self.client.exec(container, args)).await {
            Ok(result) => result,
            Err(_) => Err(ProvisionError::CommandTimeout {
                container: container.to_owned(),
                timeout_secs: timeout.as_secs(),
            }),
        }
    }
}

/// Scripted Docker client for tests.
///
/// Holds mutable container/network state behind mutexes so idempotency
/// paths (inspect-create-start) behave like the real daemon, and matches
/// exec commands against substring rules, first match wins.
#[cfg(test)]
pub(crate) struct MockDockerClient {
    pub containers: std::sync::Mutex<HashMap<String, MockContainer>>,
    pub networks: std::sync::Mutex<std::collections::HashSet<String>>,
    exec_rules: Vec<(String, CommandOutput)>,
    pub exec_log: std::sync::Mutex<Vec<String>>,
    fail_create: bool,
}

#[cfg(test)]
#[derive(Debug, Clone)]
pub(crate) struct MockContainer {
    pub image: String,
    pub running: bool,
    pub host_port: Option<u16>,
}

#[cfg(test)]
impl MockDockerClient {
    pub fn new() -> Self {
        Self {
            containers: std::sync::Mutex::new(HashMap::new()),
            networks: std::sync::Mutex::new(std::collections::HashSet::new()),
            exec_rules: Vec::new(),
            exec_log: std::sync::Mutex::new(Vec::new()),
            fail_create: false,
        }
    }

    pub fn with_container(self, name: &str, running: bool, host_port: Option<u16>) -> Self {
        self.containers.lock().unwrap().insert(
            name.to_owned(),
            MockContainer {
                image: "wordpress:latest".to_owned(),
                running,
                host_port,
            },
        );
        self
    }

    pub fn with_network(self, name: &str) -> Self {
        self.networks.lock().unwrap().insert(name.to_owned());
        self
    }

    /// Adds an exec rule: commands whose joined args contain `needle`
    /// answer with the given output.
    pub fn with_exec_rule(mut self, needle: &str, stdout: &str, exit_code: i64) -> Self {
        self.exec_rules.push((
            needle.to_owned(),
            CommandOutput {
                stdout: stdout.to_owned(),
                stderr: if exit_code == 0 {
                    String::new()
                } else {
                    "mock failure".to_owned()
                },
                exit_code,
            },
        ));
        self
    }

    pub fn with_failing_create(mut self) -> Self {
        self.fail_create = true;
        self
    }

    pub fn exec_calls(&self) -> Vec<String> {
        self.exec_log.lock().unwrap().clone()
    }
}

#[cfg(test)]
impl DockerClient for MockDockerClient {
    async fn ping(&self) -> Result<(), ProvisionError> {
        Ok(())
    }

    async fn network_exists(&self, name: &str) -> Result<bool, ProvisionError> {
        Ok(self.networks.lock().unwrap().contains(name))
    }

    async fn create_network(&self, name: &str) -> Result<(), ProvisionError> {
        self.networks.lock().unwrap().insert(name.to_owned());
        Ok(())
    }

    async fn inspect_container(&self, name: &str) -> Result<ContainerSummary, ProvisionError> {
        let containers = self.containers.lock().unwrap();
        let entry = containers
            .get(name)
            .ok_or_else(|| ProvisionError::NotFound(name.to_owned()))?;
        let port_text = entry
            .host_port
            .map(|p| format!("80/tcp -> 0.0.0.0:{p}"))
            .unwrap_or_default();
        Ok(ContainerSummary {
            id: format!("id-{name}"),
            name: name.to_owned(),
            image: entry.image.clone(),
            running: entry.running,
            port_text,
        })
    }

    async fn create_container(&self, spec: &ContainerSpec) -> Result<(), ProvisionError> {
        if self.fail_create {
            return Err(ProvisionError::Container {
                name: spec.name.clone(),
                reason: "mock create failure".to_owned(),
            });
        }
        self.containers.lock().unwrap().insert(
            spec.name.clone(),
            MockContainer {
                image: spec.image.clone(),
                running: false,
                host_port: spec.host_port,
            },
        );
        Ok(())
    }

    async fn start_container(&self, name: &str) -> Result<(), ProvisionError> {
        let mut containers = self.containers.lock().unwrap();
        let entry = containers
            .get_mut(name)
            .ok_or_else(|| ProvisionError::NotFound(name.to_owned()))?;
        entry.running = true;
        Ok(())
    }

    async fn stop_container(&self, name: &str) -> Result<(), ProvisionError> {
        let mut containers = self.containers.lock().unwrap();
        let entry = containers
            .get_mut(name)
            .ok_or_else(|| ProvisionError::NotFound(name.to_owned()))?;
        entry.running = false;
        Ok(())
    }

    async fn remove_container(&self, name: &str) -> Result<(), ProvisionError> {
        self.containers.lock().unwrap().remove(name);
        Ok(())
    }

    async fn exec(&self, container: &str, cmd: &[String]) -> Result<CommandOutput, ProvisionError> {
        {
            let containers = self.containers.lock().unwrap();
            if !containers.contains_key(container) {
                return Err(ProvisionError::NotFound(container.to_owned()));
            }
        }
        let joined = cmd.join(" ");
        self.exec_log.lock().unwrap().push(joined.clone());
        for (needle, output) in &self.exec_rules {
            if joined.contains(needle.as_str()) {
                return Ok(output.clone());
            }
        }
        Ok(CommandOutput {
            stdout: String::new(),
            stderr: String::new(),
            exit_code: 0,
        })
    }
}
