use async_trait::async_trait;
use derive_more::{Display, From};
use std::path::PathBuf;

/// Opaque handle of a container owned by a runtime.
#[derive(Debug, Clone, Display, PartialEq, Eq, Hash, PartialOrd, Ord, From)]
pub struct ContainerId(pub String);

/// Opaque handle of a network owned by a runtime.
#[derive(Debug, Clone, Display, PartialEq, Eq, Hash, From)]
pub struct NetworkId(pub String);

#[derive(Debug, Display)]
pub enum RuntimeError {
  #[display("unknown container {_0}")]
  UnknownContainer(ContainerId),

  #[display("container {_0} is not running")]
  NotRunning(ContainerId),

  #[display("port {port} of container {id} is not mapped")]
  PortNotMapped { id: ContainerId, port: u16 },

  #[display("docker: {_0}")]
  Docker(String),

  #[display("docker api: {_0}")]
  Api(bollard::errors::Error),

  #[display("io: {_0}")]
  Io(std::io::Error),
}

impl std::error::Error for RuntimeError {
  fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
    match self {
      RuntimeError::Io(e) => Some(e),
      RuntimeError::Api(e) => Some(e),
      _ => None,
    }
  }
}

impl From<std::io::Error> for RuntimeError {
  fn from(e: std::io::Error) -> Self {
    RuntimeError::Io(e)
  }
}

impl From<bollard::errors::Error> for RuntimeError {
  fn from(e: bollard::errors::Error) -> Self {
    RuntimeError::Api(e)
  }
}

impl From<testcontainers::TestcontainersError> for RuntimeError {
  fn from(e: testcontainers::TestcontainersError) -> Self {
    RuntimeError::Docker(e.to_string())
  }
}

/// Definition of a container as handed to [`ContainerRuntime::create_container`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerSpec {
  pub image: String,
  pub tag: String,
  pub entrypoint: Option<String>,
  pub cmd: Vec<String>,
  pub exposed_ports: Vec<u16>,
  pub network: String,
  /// name the other containers of the network reach this one by
  pub network_alias: String,
  /// host directory and the path it's mounted at inside the container
  pub bind_mount: Option<(PathBuf, String)>,
  pub ready_message: Option<String>,
  /// start the container as part of creating it
  pub started: bool,
}

/// Narrow capability interface of the container runtime.
///
/// Implementations must be usable from many node tasks at once. A container handle stays valid across
/// stop/start cycles until `remove_container` is called for it.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
  async fn create_network(
    &self,
    name: &str,
  ) -> Result<NetworkId, RuntimeError>;

  async fn remove_network(
    &self,
    network: &NetworkId,
  ) -> Result<(), RuntimeError>;

  async fn create_container(
    &self,
    spec: ContainerSpec,
  ) -> Result<ContainerId, RuntimeError>;

  async fn start_container(
    &self,
    id: &ContainerId,
  ) -> Result<(), RuntimeError>;

  async fn stop_container(
    &self,
    id: &ContainerId,
  ) -> Result<(), RuntimeError>;

  /// terminates the container for good, the handle is unusable afterwards
  async fn remove_container(
    &self,
    id: &ContainerId,
  ) -> Result<(), RuntimeError>;

  async fn host(
    &self,
    id: &ContainerId,
  ) -> Result<String, RuntimeError>;

  async fn mapped_port(
    &self,
    id: &ContainerId,
    internal_port: u16,
  ) -> Result<u16, RuntimeError>;

  /// readiness gate used before a node declares itself started
  async fn wait_for_port(
    &self,
    _id: &ContainerId,
    _internal_port: u16,
  ) -> Result<(), RuntimeError> {
    Ok(())
  }
}
