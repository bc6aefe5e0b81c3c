use crate::config::ClusterConfig;
use crate::endpoint::{self, Endpoint};
use crate::error::{ClusterError, Result};
use crate::listener::NodeListener;
use crate::network::Network;
use crate::runtime::{ContainerId, ContainerRuntime, ContainerSpec};
use futures::FutureExt;
use log::{debug, info};
use opentelemetry::{
  KeyValue, global,
  metrics::{Counter, Histogram},
};
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};
use tempfile::TempDir;
use tokio::time::Instant;

fn counter_operations() -> &'static Counter<u64> {
  static COUNTER: OnceLock<Counter<u64>> = OnceLock::new();
  COUNTER.get_or_init(|| global::meter("etcd_cluster").u64_counter("node_operations").build())
}

fn histogram_start_latency() -> &'static Histogram<u64> {
  static HISTOGRAM: OnceLock<Histogram<u64>> = OnceLock::new();

  // in milliseconds
  HISTOGRAM.get_or_init(|| {
    global::meter("etcd_cluster")
      .u64_histogram("node_start_ms")
      .with_boundaries(vec![50.0, 100.0, 250.0, 500.0, 1000.0, 2500.0, 5000.0, 10000.0, 30000.0, 60000.0])
      .build()
  })
}

fn record_operation(
  action: &'static str,
  success: bool,
) {
  counter_operations().add(1, &[KeyValue::new("action", action), KeyValue::new("success", success)]);
}

/// Host name a node is reachable by inside the cluster network.
/// Container names are global to the docker daemon, so they're prefixed with the cluster name.
pub fn peer_host(
  cluster_name: &str,
  node: &str,
) -> String {
  format!("{cluster_name}-{node}")
}

/// Arguments of the etcd process of `node`.
/// With `peers` non-empty the node joins a statically bootstrapped cluster made of all of them, itself included.
pub fn etcd_command(
  config: &ClusterConfig,
  cluster_name: &str,
  node: &str,
  peers: &[String],
) -> Vec<String> {
  let client_url = format!("http://0.0.0.0:{}", config.client_port);
  let mut cmd = vec![
    "--name".to_string(),
    node.to_string(),
    "--advertise-client-urls".to_string(),
    client_url.clone(),
    "--listen-client-urls".to_string(),
    client_url,
    "--data-dir".to_string(),
    config.data_dir.clone(),
  ];

  if !peers.is_empty() {
    let initial_cluster = peers
      .iter()
      .map(|p| format!("{p}=http://{}:{}", peer_host(cluster_name, p), config.peer_port))
      .collect::<Vec<_>>()
      .join(",");

    cmd.extend([
      "--initial-advertise-peer-urls".to_string(),
      format!("http://{}:{}", peer_host(cluster_name, node), config.peer_port),
      "--listen-peer-urls".to_string(),
      format!("http://0.0.0.0:{}", config.peer_port),
      "--initial-cluster-token".to_string(),
      cluster_name.to_string(),
      "--initial-cluster".to_string(),
      initial_cluster,
      "--initial-cluster-state".to_string(),
      "new".to_string(),
    ]);
  }

  cmd
}

/// One etcd process in one container.
///
/// Owns its container handle and a private working directory. The handle is set once at creation and only
/// cleared by `close`, restarts reuse the same container.
pub struct Node {
  name: String,
  config: ClusterConfig,
  runtime: Arc<dyn ContainerRuntime>,
  listener: Arc<dyn NodeListener>,
  container: Mutex<Option<ContainerId>>,
  data_dir: Mutex<Option<TempDir>>,
  data_dir_path: PathBuf,
}

impl Node {
  /// Allocates the working directory and defines the container inside `network`.
  /// The container is only started here when `config.start_on_create` is set.
  pub async fn create(
    runtime: Arc<dyn ContainerRuntime>,
    network: &Network,
    listener: Arc<dyn NodeListener>,
    config: &ClusterConfig,
    name: &str,
    peers: &[String],
  ) -> Result<Node> {
    let data_dir = tempfile::Builder::new()
      .prefix(&format!("etcd_cluster_data_{name}_"))
      .tempdir()
      .map_err(|source| ClusterError::DataDir { node: name.to_string(), source })?;
    let data_dir_path = data_dir.path().to_path_buf();

    let spec = ContainerSpec {
      image: config.image.clone(),
      tag: config.tag.clone(),
      entrypoint: Some("etcd".to_string()),
      cmd: etcd_command(config, network.name(), name, peers),
      exposed_ports: vec![config.client_port, config.peer_port],
      network: network.name().to_string(),
      network_alias: peer_host(network.name(), name),
      bind_mount: config.mount_data_dir.then(|| (data_dir_path.clone(), config.data_dir.clone())),
      ready_message: config.ready_message.clone(),
      started: config.start_on_create,
    };

    // an error here drops `data_dir`, which deletes it again
    let id = runtime.create_container(spec).await.map_err(|e| ClusterError::container(name, e))?;
    debug!("etcd container {name} created as {id}");

    Ok(Node {
      name: name.to_string(),
      config: config.clone(),
      runtime,
      listener,
      container: Mutex::new(Some(id)),
      data_dir: Mutex::new(Some(data_dir)),
      data_dir_path,
    })
  }

  pub fn name(&self) -> &str {
    &self.name
  }

  /// host directory owned by this node until `close`
  pub fn data_dir(&self) -> &Path {
    &self.data_dir_path
  }

  /// `None` once the container was removed
  pub fn container_id(&self) -> Option<ContainerId> {
    self.lock_container().clone()
  }

  /// Starts the container and reports the outcome to the listener, exactly once whatever happens.
  pub async fn start(&self) -> Result<()> {
    let started_at = Instant::now();

    let result = self.guarded(self.launch()).await;

    match &result {
      Ok(()) => {
        histogram_start_latency().record(started_at.elapsed().as_millis() as u64, &[]);
        self.listener.started(&self.name);
      }
      Err(e) => self.listener.failed_to_start(&self.name, e),
    }
    record_operation("start", result.is_ok());

    result
  }

  async fn launch(&self) -> Result<()> {
    let id = self.container()?;

    self.runtime.start_container(&id).await.map_err(|e| ClusterError::container(&self.name, e))?;
    if self.config.wait_for_ready {
      self
        .runtime
        .wait_for_port(&id, self.config.client_port)
        .await
        .map_err(|e| ClusterError::container(&self.name, e))?;
    }

    Ok(())
  }

  /// Stop failures are returned, not reported: only starts are synchronized through the listener.
  pub async fn stop(&self) -> Result<()> {
    let id = self.container()?;

    let result = self.runtime.stop_container(&id).await.map_err(|e| ClusterError::container(&self.name, e));
    record_operation("stop", result.is_ok());
    result?;

    self.listener.stopped(&self.name);
    Ok(())
  }

  /// Stops and starts the same container.
  /// A failed or panicking stop still counts as this node's report for the round.
  pub async fn restart(&self) -> Result<()> {
    if let Err(e) = self.guarded(self.stop()).await {
      self.listener.failed_to_start(&self.name, &e);
      record_operation("restart", false);
      return Err(e);
    }

    let result = self.start().await;
    record_operation("restart", result.is_ok());
    result
  }

  /// Stops the node, removes its container and deletes its working directory.
  pub async fn close(&self) -> Result<()> {
    self.stop().await?;

    let id = self.container()?;
    self.runtime.remove_container(&id).await.map_err(|e| ClusterError::container(&self.name, e))?;
    self.lock_container().take();

    let data_dir = self.data_dir.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).take();
    if let Some(dir) = data_dir {
      dir.close().map_err(|source| ClusterError::DataDir { node: self.name.clone(), source })?;
    }

    record_operation("close", true);
    info!("etcd container {} closed", self.name);
    Ok(())
  }

  pub async fn client_endpoint(&self) -> Result<Endpoint> {
    self.endpoint(self.config.client_port).await
  }

  pub async fn peer_endpoint(&self) -> Result<Endpoint> {
    self.endpoint(self.config.peer_port).await
  }

  async fn endpoint(
    &self,
    internal_port: u16,
  ) -> Result<Endpoint> {
    let id = self.container()?;
    endpoint::resolve(self.runtime.as_ref(), &self.name, &id, internal_port).await
  }

  /// a panic inside `f` becomes `Panicked`
  async fn guarded(
    &self,
    f: impl Future<Output = Result<()>>,
  ) -> Result<()> {
    AssertUnwindSafe(f).catch_unwind().await.unwrap_or_else(|_| Err(ClusterError::Panicked(self.name.clone())))
  }

  fn container(&self) -> Result<ContainerId> {
    self.lock_container().clone().ok_or_else(|| ClusterError::NoContainer(self.name.clone()))
  }

  fn lock_container(&self) -> MutexGuard<'_, Option<ContainerId>> {
    self.container.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
  }
}
