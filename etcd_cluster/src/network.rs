use crate::error::{ClusterError, Result};
use crate::runtime::{ContainerRuntime, NetworkId};
use log::info;
use std::sync::Arc;

/// Isolated network the nodes of one cluster reach each other through.
pub struct Network {
  name: String,
  id: NetworkId,
  runtime: Arc<dyn ContainerRuntime>,
}

impl Network {
  pub async fn create(
    runtime: Arc<dyn ContainerRuntime>,
    name: &str,
  ) -> Result<Network> {
    let id = runtime
      .create_network(name)
      .await
      .map_err(|source| ClusterError::Network { name: name.to_string(), source })?;

    info!("etcd network {name} created");
    Ok(Network { name: name.to_string(), id, runtime })
  }

  pub fn name(&self) -> &str {
    &self.name
  }

  pub fn id(&self) -> &NetworkId {
    &self.id
  }

  pub async fn remove(&self) -> Result<()> {
    self
      .runtime
      .remove_network(&self.id)
      .await
      .map_err(|source| ClusterError::Network { name: self.name.clone(), source })?;

    info!("etcd network {} removed", self.name);
    Ok(())
  }
}
