//! Disposable multi-node etcd clusters for integration tests.
//!
//! A [`Cluster`] owns one isolated network and N etcd nodes wired together through static peer discovery.
//! `start`/`restart` fan out to every node concurrently and only return once every node has reported back,
//! `close` tears the nodes down one by one and removes the network last.

pub mod cluster;
pub mod config;
pub mod docker;
pub mod endpoint;
pub mod error;
pub mod listener;
pub mod network;
pub mod node;
pub mod runtime;

pub use cluster::{Action, Cluster};
pub use config::ClusterConfig;
pub use docker::DockerRuntime;
pub use endpoint::Endpoint;
pub use error::{ClusterError, Result};
pub use listener::{LifecycleBarrier, LoggingListener, NodeEvent, NodeListener, Round, RoundOutcome};
pub use network::Network;
pub use node::Node;
pub use runtime::{ContainerId, ContainerRuntime, ContainerSpec, NetworkId, RuntimeError};

#[cfg(test)]
mod test_helpers;
