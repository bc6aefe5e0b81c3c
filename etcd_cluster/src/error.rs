use crate::cluster::Action;
use crate::runtime::RuntimeError;
use derive_more::Display;

pub type Result<T> = std::result::Result<T, ClusterError>;

#[derive(Debug, Display)]
pub enum ClusterError {
  #[display("cluster needs at least one node, got {_0}")]
  InvalidNodeCount(usize),

  #[display("container runtime: {_0}")]
  Runtime(RuntimeError),

  #[display("network {name}: {source}")]
  Network { name: String, source: RuntimeError },

  #[display("etcd container {node}: {source}")]
  Container { node: String, source: RuntimeError },

  /// the node's container was never created or has already been removed
  #[display("etcd container {_0} doesn't exist")]
  NoContainer(String),

  #[display("data directory of {node}: {source}")]
  DataDir { node: String, source: std::io::Error },

  #[display("etcd container {_0} panicked")]
  Panicked(String),

  #[display("etcd cluster failed to {action}: {}", nodes.join(", "))]
  Failed { action: Action, nodes: Vec<String> },

  #[display("etcd cluster didn't {action} in time, still waiting for: {}", pending.join(", "))]
  Timeout { action: Action, pending: Vec<String> },
}

impl std::error::Error for ClusterError {
  fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
    match self {
      ClusterError::Network { source, .. } | ClusterError::Container { source, .. } => Some(source),
      ClusterError::Runtime(source) => Some(source),
      ClusterError::DataDir { source, .. } => Some(source),
      _ => None,
    }
  }
}

impl ClusterError {
  pub(crate) fn container(
    node: &str,
    source: RuntimeError,
  ) -> ClusterError {
    ClusterError::Container { node: node.to_string(), source }
  }
}
