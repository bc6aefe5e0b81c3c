use crate::error::{ClusterError, Result};
use crate::runtime::{ContainerId, ContainerRuntime};
use derive_more::Display;
use serde::{Deserialize, Serialize};

/// Externally reachable address of a container port.
#[derive(Debug, Clone, Display, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[display("{host}:{port}")]
pub struct Endpoint {
  pub host: String,
  pub port: u16,
}

impl Endpoint {
  /// `http://host:port`, the form etcd clients and `--initial-cluster` expect
  pub fn url(&self) -> String {
    format!("http://{}:{}", self.host, self.port)
  }
}

/// Asks the runtime where `internal_port` of a container is reachable from the outside.
/// Only works while the container is running, a stopped container has nothing mapped.
pub(crate) async fn resolve(
  runtime: &dyn ContainerRuntime,
  node: &str,
  id: &ContainerId,
  internal_port: u16,
) -> Result<Endpoint> {
  let host = runtime.host(id).await.map_err(|e| ClusterError::container(node, e))?;
  let port = runtime.mapped_port(id, internal_port).await.map_err(|e| ClusterError::container(node, e))?;

  Ok(Endpoint { host, port })
}
