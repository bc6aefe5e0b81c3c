use crate::config::ClusterConfig;
use crate::error::ClusterError;
use crate::listener::{NodeEvent, NodeListener};
use crate::runtime::{ContainerId, ContainerRuntime, ContainerSpec, NetworkId, RuntimeError};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

pub fn test_config() -> ClusterConfig {
  ClusterConfig::default().set_round_timeout(Some(Duration::from_secs(5)))
}

/// Every runtime call the fake saw, containers identified by their network alias.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
  CreateNetwork(String),
  RemoveNetwork(String),
  Create(String),
  Start(String),
  Stop(String),
  Remove(String),
}

struct FakeContainer {
  spec: ContainerSpec,
  running: bool,
  starts: usize,
  ports: HashMap<u16, u16>,
}

#[derive(Default)]
struct State {
  next_id: usize,
  next_port: u16,
  containers: BTreeMap<ContainerId, FakeContainer>,
  networks: HashSet<NetworkId>,
  calls: Vec<Call>,

  fail_create: HashSet<String>,
  fail_start: HashSet<String>,
  fail_stop: HashSet<String>,
  panic_start: HashSet<String>,
  panic_stop: HashSet<String>,
  hang_start: HashSet<String>,
  start_delays: HashMap<String, Duration>,
  fail_network_removal: bool,
}

/// In-memory container runtime with scriptable failures.
/// Behaves like docker where it matters: ports are mapped only while running and change on every start.
#[derive(Default)]
pub struct FakeRuntime {
  state: Mutex<State>,
}

impl FakeRuntime {
  fn lock(&self) -> MutexGuard<'_, State> {
    self.state.lock().unwrap()
  }

  pub fn fail_create(
    &self,
    alias: &str,
  ) {
    self.lock().fail_create.insert(alias.to_string());
  }

  pub fn fail_start(
    &self,
    alias: &str,
  ) {
    self.lock().fail_start.insert(alias.to_string());
  }

  pub fn fail_stop(
    &self,
    alias: &str,
  ) {
    self.lock().fail_stop.insert(alias.to_string());
  }

  pub fn panic_on_start(
    &self,
    alias: &str,
  ) {
    self.lock().panic_start.insert(alias.to_string());
  }

  pub fn panic_on_stop(
    &self,
    alias: &str,
  ) {
    self.lock().panic_stop.insert(alias.to_string());
  }

  pub fn hang_on_start(
    &self,
    alias: &str,
  ) {
    self.lock().hang_start.insert(alias.to_string());
  }

  pub fn delay_start(
    &self,
    alias: &str,
    delay: Duration,
  ) {
    self.lock().start_delays.insert(alias.to_string(), delay);
  }

  pub fn fail_network_removal(&self) {
    self.lock().fail_network_removal = true;
  }

  /// forgets every scripted failure
  pub fn heal(&self) {
    let mut state = self.lock();
    state.fail_create.clear();
    state.fail_start.clear();
    state.fail_stop.clear();
    state.panic_start.clear();
    state.panic_stop.clear();
    state.hang_start.clear();
    state.fail_network_removal = false;
  }

  pub fn calls(&self) -> Vec<Call> {
    self.lock().calls.clone()
  }

  pub fn is_running(
    &self,
    id: &ContainerId,
  ) -> bool {
    self.lock().containers.get(id).map(|c| c.running).unwrap_or(false)
  }

  pub fn spec(
    &self,
    id: &ContainerId,
  ) -> ContainerSpec {
    self.lock().containers.get(id).map(|c| c.spec.clone()).expect("container exists")
  }

  pub fn starts_of(
    &self,
    id: &ContainerId,
  ) -> usize {
    self.lock().containers.get(id).map(|c| c.starts).unwrap_or(0)
  }

  pub fn created_containers(&self) -> usize {
    self.lock().next_id
  }

  pub fn live_containers(&self) -> usize {
    self.lock().containers.len()
  }

  pub fn live_networks(&self) -> usize {
    self.lock().networks.len()
  }

  fn alias_of(
    state: &State,
    id: &ContainerId,
  ) -> Result<String, RuntimeError> {
    state
      .containers
      .get(id)
      .map(|c| c.spec.network_alias.clone())
      .ok_or_else(|| RuntimeError::UnknownContainer(id.clone()))
  }

  fn run(
    state: &mut State,
    id: &ContainerId,
  ) {
    let mut ports = HashMap::new();
    let exposed = state.containers[id].spec.exposed_ports.clone();
    for port in exposed {
      state.next_port += 1;
      ports.insert(port, 32000 + state.next_port);
    }

    let container = state.containers.get_mut(id).expect("container exists");
    container.running = true;
    container.starts += 1;
    container.ports = ports;
  }
}

#[async_trait]
impl ContainerRuntime for FakeRuntime {
  async fn create_network(
    &self,
    name: &str,
  ) -> Result<NetworkId, RuntimeError> {
    let mut state = self.lock();
    state.calls.push(Call::CreateNetwork(name.to_string()));
    let id = NetworkId(name.to_string());
    if !state.networks.insert(id.clone()) {
      return Err(RuntimeError::Docker(format!("network {name} already exists")));
    }
    Ok(id)
  }

  async fn remove_network(
    &self,
    network: &NetworkId,
  ) -> Result<(), RuntimeError> {
    let mut state = self.lock();
    state.calls.push(Call::RemoveNetwork(network.0.clone()));
    if state.fail_network_removal {
      return Err(RuntimeError::Docker("network has active endpoints".to_string()));
    }
    state.networks.remove(network);
    Ok(())
  }

  async fn create_container(
    &self,
    spec: ContainerSpec,
  ) -> Result<ContainerId, RuntimeError> {
    let mut state = self.lock();
    state.calls.push(Call::Create(spec.network_alias.clone()));
    if state.fail_create.contains(&spec.network_alias) {
      return Err(RuntimeError::Docker(format!("no such image {}:{}", spec.image, spec.tag)));
    }

    let id = ContainerId(format!("container-{}", state.next_id));
    state.next_id += 1;
    let started = spec.started;
    state.containers.insert(id.clone(), FakeContainer { spec, running: false, starts: 0, ports: HashMap::new() });
    if started {
      FakeRuntime::run(&mut state, &id);
    }
    Ok(id)
  }

  async fn start_container(
    &self,
    id: &ContainerId,
  ) -> Result<(), RuntimeError> {
    let (alias, panics, hangs, delay) = {
      let mut state = self.lock();
      let alias = FakeRuntime::alias_of(&state, id)?;
      state.calls.push(Call::Start(alias.clone()));
      let panics = state.panic_start.contains(&alias);
      let hangs = state.hang_start.contains(&alias);
      let delay = state.start_delays.get(&alias).copied();
      (alias, panics, hangs, delay)
    };

    if panics {
      panic!("runtime blew up starting {alias}");
    }
    if hangs {
      futures::future::pending::<()>().await;
    }
    if let Some(delay) = delay {
      tokio::time::sleep(delay).await;
    }

    let mut state = self.lock();
    if state.fail_start.contains(&alias) {
      return Err(RuntimeError::Docker(format!("{alias} exited with code 1")));
    }
    FakeRuntime::run(&mut state, id);
    Ok(())
  }

  async fn stop_container(
    &self,
    id: &ContainerId,
  ) -> Result<(), RuntimeError> {
    let (alias, panics) = {
      let mut state = self.lock();
      let alias = FakeRuntime::alias_of(&state, id)?;
      state.calls.push(Call::Stop(alias.clone()));
      let panics = state.panic_stop.contains(&alias);
      (alias, panics)
    };

    // outside of the lock, so the state mutex isn't poisoned
    if panics {
      panic!("runtime blew up stopping {alias}");
    }

    let mut state = self.lock();
    if state.fail_stop.contains(&alias) {
      return Err(RuntimeError::Docker(format!("{alias} refused to stop")));
    }

    let container = state.containers.get_mut(id).expect("container exists");
    container.running = false;
    container.ports.clear();
    Ok(())
  }

  async fn remove_container(
    &self,
    id: &ContainerId,
  ) -> Result<(), RuntimeError> {
    let mut state = self.lock();
    let alias = FakeRuntime::alias_of(&state, id)?;
    state.calls.push(Call::Remove(alias));
    state.containers.remove(id);
    Ok(())
  }

  async fn host(
    &self,
    id: &ContainerId,
  ) -> Result<String, RuntimeError> {
    let state = self.lock();
    match state.containers.get(id) {
      Some(c) if c.running => Ok("127.0.0.1".to_string()),
      Some(_) => Err(RuntimeError::NotRunning(id.clone())),
      None => Err(RuntimeError::UnknownContainer(id.clone())),
    }
  }

  async fn mapped_port(
    &self,
    id: &ContainerId,
    internal_port: u16,
  ) -> Result<u16, RuntimeError> {
    let state = self.lock();
    let container = state.containers.get(id).ok_or_else(|| RuntimeError::UnknownContainer(id.clone()))?;
    if !container.running {
      return Err(RuntimeError::NotRunning(id.clone()));
    }
    container
      .ports
      .get(&internal_port)
      .copied()
      .ok_or_else(|| RuntimeError::PortNotMapped { id: id.clone(), port: internal_port })
  }
}

/// Keeps every report it gets, in order.
#[derive(Default)]
pub struct RecordingListener {
  events: Mutex<Vec<NodeEvent>>,
}

impl RecordingListener {
  pub fn events(&self) -> Vec<NodeEvent> {
    self.events.lock().unwrap().clone()
  }
}

impl NodeListener for RecordingListener {
  fn started(
    &self,
    node: &str,
  ) {
    self.events.lock().unwrap().push(NodeEvent::Started(node.to_string()));
  }

  fn failed_to_start(
    &self,
    node: &str,
    cause: &ClusterError,
  ) {
    self.events.lock().unwrap().push(NodeEvent::FailedToStart { node: node.to_string(), cause: cause.to_string() });
  }

  fn stopped(
    &self,
    node: &str,
  ) {
    self.events.lock().unwrap().push(NodeEvent::Stopped(node.to_string()));
  }
}
