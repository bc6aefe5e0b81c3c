use crate::runtime::{ContainerId, ContainerRuntime, ContainerSpec, NetworkId, RuntimeError};
use async_trait::async_trait;
use bollard::Docker;
use bollard::network::CreateNetworkOptions;
use common::retrier::{exp_intervals, retry};
use log::{debug, info};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use testcontainers::{
  ContainerAsync, ContainerRequest, GenericImage, ImageExt,
  core::{IntoContainerPort, Mount, WaitFor},
  runners::AsyncRunner,
};
use tokio::net::TcpStream;

/// What the runtime knows about one container.
/// Docker isn't asked whether a container runs, the state is tracked from the calls made through this runtime.
enum Slot<C> {
  /// created from the runtime's point of view, docker hasn't seen it yet
  Defined(ContainerSpec),
  Live { container: C, running: bool },
  Removed,
}

impl<C> Slot<C> {
  fn live(container: C) -> Slot<C> {
    Slot::Live { container, running: true }
  }

  fn running(
    &self,
    id: &ContainerId,
  ) -> Result<&C, RuntimeError> {
    match self {
      Slot::Live { container, running: true } => Ok(container),
      Slot::Live { .. } | Slot::Defined(_) => Err(RuntimeError::NotRunning(id.clone())),
      Slot::Removed => Err(RuntimeError::UnknownContainer(id.clone())),
    }
  }

  /// whether `start_container` has anything to do
  fn needs_start(
    &self,
    id: &ContainerId,
  ) -> Result<bool, RuntimeError> {
    match self {
      Slot::Defined(_) => Ok(true),
      Slot::Live { running, .. } => Ok(!running),
      Slot::Removed => Err(RuntimeError::UnknownContainer(id.clone())),
    }
  }

  /// whether `stop_container` has anything to do
  fn needs_stop(
    &self,
    id: &ContainerId,
  ) -> Result<bool, RuntimeError> {
    match self {
      Slot::Defined(_) => Ok(false),
      Slot::Live { running, .. } => Ok(*running),
      Slot::Removed => Err(RuntimeError::UnknownContainer(id.clone())),
    }
  }

  fn set_running(
    &mut self,
    now_running: bool,
  ) {
    if let Slot::Live { running, .. } = self {
      *running = now_running;
    }
  }
}

type SharedSlot = Arc<tokio::sync::Mutex<Slot<ContainerAsync<GenericImage>>>>;

/// [`ContainerRuntime`] on top of a local docker daemon.
///
/// Containers are run through testcontainers, so whatever is still alive when the runtime is dropped gets
/// removed as well. Networks are managed through the docker API directly: testcontainers only creates networks
/// implicitly and ties their removal to the last container using them.
pub struct DockerRuntime {
  docker: Docker,
  containers: Mutex<HashMap<ContainerId, SharedSlot>>,
  readiness_intervals: Vec<Duration>,
}

impl DockerRuntime {
  /// Connects to the local daemon the same way the docker CLI would (`DOCKER_HOST` or the default socket).
  pub fn new() -> Result<DockerRuntime, RuntimeError> {
    Ok(DockerRuntime {
      docker: Docker::connect_with_local_defaults()?,
      containers: Mutex::new(HashMap::new()),
      readiness_intervals: exp_intervals(12, Duration::from_millis(50), Duration::from_secs(2)),
    })
  }

  /// pauses between attempts of the readiness probe in `wait_for_port`
  pub fn set_readiness_intervals(
    mut self,
    intervals: Vec<Duration>,
  ) -> DockerRuntime {
    self.readiness_intervals = intervals;
    self
  }

  fn slot(
    &self,
    id: &ContainerId,
  ) -> Result<SharedSlot, RuntimeError> {
    self
      .containers
      .lock()
      .unwrap_or_else(|poisoned| poisoned.into_inner())
      .get(id)
      .cloned()
      .ok_or_else(|| RuntimeError::UnknownContainer(id.clone()))
  }

  /// Host and mapped port of a running container.
  async fn address(
    &self,
    id: &ContainerId,
    internal_port: u16,
  ) -> Result<(String, u16), RuntimeError> {
    let slot = self.slot(id)?;
    let slot = slot.lock().await;
    let container = slot.running(id)?;

    let host = container.get_host().await?.to_string();
    let port = container
      .get_host_port_ipv4(internal_port)
      .await
      .map_err(|_| RuntimeError::PortNotMapped { id: id.clone(), port: internal_port })?;
    Ok((host, port))
  }
}

fn build_request(spec: &ContainerSpec) -> ContainerRequest<GenericImage> {
  let mut image = GenericImage::new(spec.image.as_str(), spec.tag.as_str());
  for port in &spec.exposed_ports {
    image = image.with_exposed_port((*port).tcp());
  }
  if let Some(message) = &spec.ready_message {
    image = image.with_wait_for(WaitFor::message_on_stderr(message.clone()));
  }
  if let Some(entrypoint) = &spec.entrypoint {
    image = image.with_entrypoint(entrypoint.as_str());
  }

  let mut request = image
    .with_network(spec.network.as_str())
    .with_container_name(spec.network_alias.as_str())
    .with_cmd(spec.cmd.clone());
  if let Some((host_dir, container_dir)) = &spec.bind_mount {
    request = request.with_mount(Mount::bind_mount(host_dir.to_string_lossy(), container_dir.as_str()));
  }
  request
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
  async fn create_network(
    &self,
    name: &str,
  ) -> Result<NetworkId, RuntimeError> {
    let options = CreateNetworkOptions { name, driver: "bridge", ..Default::default() };
    self.docker.create_network(options).await?;

    // docker accepts the name wherever it accepts the id, and the name is what containers join by
    debug!("docker network {name} created");
    Ok(NetworkId(name.to_string()))
  }

  async fn remove_network(
    &self,
    network: &NetworkId,
  ) -> Result<(), RuntimeError> {
    self.docker.remove_network(network.0.as_str()).await?;
    Ok(())
  }

  async fn create_container(
    &self,
    spec: ContainerSpec,
  ) -> Result<ContainerId, RuntimeError> {
    // the alias doubles as the docker container name, which is unique per daemon anyway
    let id = ContainerId(spec.network_alias.clone());
    if self.containers.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).contains_key(&id) {
      return Err(RuntimeError::Docker(format!("container {id} already exists")));
    }

    let slot = if spec.started {
      info!("running container {id} from {}:{}", spec.image, spec.tag);
      Slot::live(build_request(&spec).start().await?)
    } else {
      Slot::Defined(spec)
    };

    self
      .containers
      .lock()
      .unwrap_or_else(|poisoned| poisoned.into_inner())
      .insert(id.clone(), Arc::new(tokio::sync::Mutex::new(slot)));
    Ok(id)
  }

  async fn start_container(
    &self,
    id: &ContainerId,
  ) -> Result<(), RuntimeError> {
    let slot = self.slot(id)?;
    let mut slot = slot.lock().await;
    if !slot.needs_start(id)? {
      return Ok(());
    }

    let request = match &*slot {
      Slot::Defined(spec) => Some(build_request(spec)),
      _ => None,
    };

    match request {
      Some(request) => {
        debug!("running container {id} for the first time");
        *slot = Slot::live(request.start().await?);
      }
      None => {
        if let Slot::Live { container, .. } = &*slot {
          container.start().await?;
        }
        slot.set_running(true);
      }
    }
    Ok(())
  }

  async fn stop_container(
    &self,
    id: &ContainerId,
  ) -> Result<(), RuntimeError> {
    let slot = self.slot(id)?;
    let mut slot = slot.lock().await;
    if !slot.needs_stop(id)? {
      return Ok(());
    }

    if let Slot::Live { container, .. } = &*slot {
      container.stop().await?;
    }
    slot.set_running(false);
    Ok(())
  }

  async fn remove_container(
    &self,
    id: &ContainerId,
  ) -> Result<(), RuntimeError> {
    let slot = self.slot(id)?;
    let previous = {
      let mut slot = slot.lock().await;
      std::mem::replace(&mut *slot, Slot::Removed)
    };
    self.containers.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).remove(id);

    match previous {
      Slot::Live { container, .. } => container.rm().await?,
      Slot::Defined(_) => {}
      Slot::Removed => return Err(RuntimeError::UnknownContainer(id.clone())),
    }
    Ok(())
  }

  async fn host(
    &self,
    id: &ContainerId,
  ) -> Result<String, RuntimeError> {
    let slot = self.slot(id)?;
    let slot = slot.lock().await;
    Ok(slot.running(id)?.get_host().await?.to_string())
  }

  async fn mapped_port(
    &self,
    id: &ContainerId,
    internal_port: u16,
  ) -> Result<u16, RuntimeError> {
    Ok(self.address(id, internal_port).await?.1)
  }

  /// Polls the mapped port until a TCP connection goes through.
  async fn wait_for_port(
    &self,
    id: &ContainerId,
    internal_port: u16,
  ) -> Result<(), RuntimeError> {
    retry(self.readiness_intervals.clone(), || async {
      let (host, port) = self.address(id, internal_port).await?;
      TcpStream::connect((host.as_str(), port)).await?;
      Ok::<(), RuntimeError>(())
    })
    .await?;

    debug!("container {id} listens on {internal_port}");
    Ok(())
  }
}
