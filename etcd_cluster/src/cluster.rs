use crate::config::ClusterConfig;
use crate::docker::DockerRuntime;
use crate::endpoint::Endpoint;
use crate::error::{ClusterError, Result};
use crate::listener::LifecycleBarrier;
use crate::network::Network;
use crate::node::Node;
use crate::runtime::ContainerRuntime;
use derive_more::Display;
use log::{debug, error, info, warn};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinSet;

/// Cluster operations that fan out to all nodes at once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum Action {
  #[display("start")]
  Start,
  #[display("restart")]
  Restart,
}

/// N etcd nodes bootstrapped together inside one network.
///
/// `start` and `restart` run every node concurrently and succeed only if every node did, a failure doesn't
/// roll back the nodes that came up. `close` goes through the nodes one by one and stops at the first error,
/// the network is removed only after all nodes are gone.
pub struct Cluster {
  name: String,
  config: ClusterConfig,
  nodes: Vec<Arc<Node>>,
  network: Mutex<Option<Network>>,
  barrier: Arc<LifecycleBarrier>,
  /// one round at a time, otherwise a second `arm` would steal the barrier from the first
  rounds: Mutex<()>,
}

impl Cluster {
  /// Docker backed cluster with default etcd settings.
  pub async fn docker(
    name: &str,
    node_count: usize,
  ) -> Result<Cluster> {
    let runtime = DockerRuntime::new().map_err(ClusterError::Runtime)?;
    Cluster::new(Arc::new(runtime), name, node_count, ClusterConfig::default()).await
  }

  /// Creates the network and defines `node_count` containers `etcd0..etcdN-1` in it.
  /// Nothing is left behind on error: whatever was created already gets removed again.
  pub async fn new(
    runtime: Arc<dyn ContainerRuntime>,
    name: &str,
    node_count: usize,
    config: ClusterConfig,
  ) -> Result<Cluster> {
    if node_count == 0 {
      return Err(ClusterError::InvalidNodeCount(node_count));
    }

    let network = Network::create(runtime.clone(), name).await?;
    let barrier = Arc::new(LifecycleBarrier::new());
    let peers: Vec<String> = (0..node_count).map(ClusterConfig::node_name).collect();

    let mut nodes = Vec::with_capacity(node_count);
    for node_name in &peers {
      match Node::create(runtime.clone(), &network, barrier.clone(), &config, node_name, &peers).await {
        Ok(node) => nodes.push(Arc::new(node)),
        Err(e) => {
          error!("etcd cluster {name}: creating {node_name} failed: {e}");
          discard(&nodes, &network).await;
          return Err(e);
        }
      }
    }

    info!("etcd cluster {name} created with {node_count} nodes");
    Ok(Cluster { name: name.to_string(), config, nodes, network: Mutex::new(Some(network)), barrier, rounds: Mutex::new(()) })
  }

  pub fn name(&self) -> &str {
    &self.name
  }

  pub fn config(&self) -> &ClusterConfig {
    &self.config
  }

  pub fn size(&self) -> usize {
    self.nodes.len()
  }

  pub fn nodes(&self) -> &[Arc<Node>] {
    &self.nodes
  }

  pub fn node(
    &self,
    index: usize,
  ) -> Option<&Arc<Node>> {
    self.nodes.get(index)
  }

  pub async fn start(&self) -> Result<()> {
    self.fan_out(Action::Start).await
  }

  pub async fn restart(&self) -> Result<()> {
    self.fan_out(Action::Restart).await
  }

  async fn fan_out(
    &self,
    action: Action,
  ) -> Result<()> {
    let _round_guard = self.rounds.lock().await;

    let round = self.barrier.arm(self.nodes.iter().map(|n| n.name().to_string()));

    let mut tasks = JoinSet::new();
    for node in &self.nodes {
      let node = Arc::clone(node);
      tasks.spawn(async move {
        info!("{action}ing etcd container {}", node.name());
        let result = match action {
          Action::Start => node.start().await,
          Action::Restart => node.restart().await,
        };
        if let Err(e) = result {
          warn!("error when {action}ing etcd container {}: {e}", node.name());
        }
      });
    }

    let outcome = match self.config.round_timeout {
      Some(timeout) => round.wait_timeout(timeout).await,
      None => Ok(round.wait().await),
    };

    let outcome = match outcome {
      Ok(outcome) => {
        join_all(&mut tasks).await;
        outcome
      }
      Err(pending) => {
        // no task of this round may outlive it, so a late report can't land in the next one
        tasks.abort_all();
        join_all(&mut tasks).await;
        error!("etcd cluster {} didn't {action} in time, pending: {pending:?}", self.name);
        return Err(ClusterError::Timeout { action, pending });
      }
    };

    if self.barrier.is_failed() || !outcome.failed.is_empty() {
      return Err(ClusterError::Failed { action, nodes: outcome.failed_nodes() });
    }

    info!("etcd cluster {} {action}ed", self.name);
    Ok(())
  }

  /// Closes the nodes in order and removes the network once all of them are gone.
  /// Stops at the first error, calling it again continues with the nodes that are still there.
  pub async fn close(&self) -> Result<()> {
    let _round_guard = self.rounds.lock().await;

    for node in &self.nodes {
      if node.container_id().is_none() {
        debug!("etcd container {} is already closed", node.name());
        continue;
      }

      info!("stopping etcd container {}", node.name());
      if let Err(e) = node.close().await {
        error!("error when closing etcd container {}: {e}", node.name());
        return Err(e);
      }
    }

    let mut network = self.network.lock().await;
    if let Some(n) = network.as_ref() {
      n.remove().await?;
    }
    network.take();

    info!("etcd cluster {} closed", self.name);
    Ok(())
  }

  /// Client endpoints in node order. The first node that can't be resolved fails the whole call.
  pub async fn client_endpoints(&self) -> Result<Vec<Endpoint>> {
    let mut endpoints = Vec::with_capacity(self.nodes.len());
    for node in &self.nodes {
      endpoints.push(node.client_endpoint().await?);
    }
    Ok(endpoints)
  }

  /// Peer endpoints in node order. The first node that can't be resolved fails the whole call.
  pub async fn peer_endpoints(&self) -> Result<Vec<Endpoint>> {
    let mut endpoints = Vec::with_capacity(self.nodes.len());
    for node in &self.nodes {
      endpoints.push(node.peer_endpoint().await?);
    }
    Ok(endpoints)
  }
}

async fn join_all(tasks: &mut JoinSet<()>) {
  while let Some(joined) = tasks.join_next().await {
    if let Err(e) = joined {
      if !e.is_cancelled() {
        error!("etcd node task failed: {e}");
      }
    }
  }
}

/// best effort cleanup of a half-built cluster
async fn discard(
  nodes: &[Arc<Node>],
  network: &Network,
) {
  for node in nodes {
    if let Err(e) = node.close().await {
      warn!("cleanup of {} failed: {e}", node.name());
    }
  }
  if let Err(e) = network.remove().await {
    warn!("cleanup of network {} failed: {e}", network.name());
  }
}
