use std::time::Duration;

pub const ETCD_IMAGE: &str = "quay.io/coreos/etcd";
pub const ETCD_TAG: &str = "v3.5.0";
pub const ETCD_CLIENT_PORT: u16 = 2379;
pub const ETCD_PEER_PORT: u16 = 2380;
pub const ETCD_DATA_DIR: &str = "/data.etcd";
pub const ETCD_READY_MESSAGE: &str = "ready to serve client requests";

/// Everything a cluster needs to know about the etcd containers it launches.
/// Defaults describe a stock etcd v3.5 image, setters allow overriding for fake runtimes or other images.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClusterConfig {
  pub image: String,
  pub tag: String,

  pub client_port: u16,
  pub peer_port: u16,

  /// data directory inside the container
  pub data_dir: String,

  /// stderr line that marks the first start of a container as finished
  /// `None` means the runtime doesn't wait for any log line
  pub ready_message: Option<String>,

  /// after every start the node waits until its client port accepts connections
  pub wait_for_ready: bool,

  /// bind the node's private host directory into the container at `data_dir`
  pub mount_data_dir: bool,

  /// start containers right away when they are created instead of on the first `Cluster::start`
  pub start_on_create: bool,

  /// upper bound for a whole start/restart round
  /// `None` waits forever, a hung container then hangs the caller as well
  pub round_timeout: Option<Duration>,
}

impl ClusterConfig {
  pub fn default() -> ClusterConfig {
    ClusterConfig {
      image: ETCD_IMAGE.to_string(),
      tag: ETCD_TAG.to_string(),
      client_port: ETCD_CLIENT_PORT,
      peer_port: ETCD_PEER_PORT,
      data_dir: ETCD_DATA_DIR.to_string(),
      ready_message: Some(ETCD_READY_MESSAGE.to_string()),
      wait_for_ready: true,
      mount_data_dir: false,
      start_on_create: false,
      round_timeout: Some(Duration::from_secs(120)),
    }
  }

  pub fn set_image(
    mut self,
    image: impl Into<String>,
    tag: impl Into<String>,
  ) -> ClusterConfig {
    self.image = image.into();
    self.tag = tag.into();
    self
  }

  pub fn set_ports(
    mut self,
    client_port: u16,
    peer_port: u16,
  ) -> ClusterConfig {
    self.client_port = client_port;
    self.peer_port = peer_port;
    self
  }

  pub fn set_data_dir(
    mut self,
    data_dir: impl Into<String>,
  ) -> ClusterConfig {
    self.data_dir = data_dir.into();
    self
  }

  pub fn set_ready_message(
    mut self,
    message: Option<String>,
  ) -> ClusterConfig {
    self.ready_message = message;
    self
  }

  pub fn set_wait_for_ready(
    mut self,
    wait: bool,
  ) -> ClusterConfig {
    self.wait_for_ready = wait;
    self
  }

  pub fn set_mount_data_dir(
    mut self,
    mount: bool,
  ) -> ClusterConfig {
    self.mount_data_dir = mount;
    self
  }

  pub fn set_start_on_create(
    mut self,
    start: bool,
  ) -> ClusterConfig {
    self.start_on_create = start;
    self
  }

  pub fn set_round_timeout(
    mut self,
    timeout: Option<Duration>,
  ) -> ClusterConfig {
    self.round_timeout = timeout;
    self
  }

  /// `etcd0`, `etcd1`, ...
  pub fn node_name(index: usize) -> String {
    format!("etcd{index}")
  }
}
