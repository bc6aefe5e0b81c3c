use etcd_client::Client;
use etcd_cluster::{Cluster, ClusterError};
use std::collections::HashSet;

async fn put(
  url: String,
  key: &str,
  value: &str,
) {
  let mut client = Client::connect([url], None).await.expect("client connects");
  client.put(key, value, None).await.expect("put works");
}

async fn get(
  url: String,
  key: &str,
) -> Option<String> {
  let mut client = Client::connect([url], None).await.expect("client connects");
  let resp = client.get(key, None).await.expect("get works");
  resp.kvs().first().map(|kv| kv.value_str().expect("utf8 value").to_string())
}

#[tokio::test(flavor = "multi_thread")]
#[ignore = "needs a docker daemon"]
async fn three_nodes_replicate_writes() {
  _ = env_logger::try_init();

  let cluster = Cluster::docker("e2e-replicate", 3).await.unwrap();
  cluster.start().await.unwrap();

  let endpoints = cluster.client_endpoints().await.unwrap();
  assert_eq!(3, endpoints.len());
  assert_eq!(3, endpoints.iter().collect::<HashSet<_>>().len());

  put(endpoints[0].url(), "key", "xyz").await;
  assert_eq!(Some("xyz".to_string()), get(endpoints[1].url(), "key").await);
  assert_eq!(Some("xyz".to_string()), get(endpoints[2].url(), "key").await);

  cluster.close().await.unwrap();

  let node = cluster.node(0).unwrap();
  assert!(matches!(node.stop().await, Err(ClusterError::NoContainer(_))));
  assert!(cluster.client_endpoints().await.is_err());
}

#[tokio::test(flavor = "multi_thread")]
#[ignore = "needs a docker daemon"]
async fn restart_keeps_data() {
  _ = env_logger::try_init();

  let cluster = Cluster::docker("e2e-restart", 3).await.unwrap();
  cluster.start().await.unwrap();

  let endpoints = cluster.client_endpoints().await.unwrap();
  put(endpoints[2].url(), "survivor", "yes").await;
  log::info!("restarting {}", cluster.name());

  cluster.restart().await.unwrap();

  let endpoints = cluster.client_endpoints().await.unwrap();
  assert_eq!(Some("yes".to_string()), get(endpoints[0].url(), "survivor").await);

  cluster.close().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
#[ignore = "needs a docker daemon"]
async fn single_node_cluster() {
  _ = env_logger::try_init();

  let cluster = Cluster::docker("e2e-single", 1).await.unwrap();
  cluster.start().await.unwrap();

  let url = cluster.client_endpoints().await.unwrap()[0].url();
  assert_eq!(None, get(url.clone(), "missing").await);
  put(url.clone(), "key", "xyz").await;
  assert_eq!(Some("xyz".to_string()), get(url, "key").await);

  assert_eq!(1, cluster.peer_endpoints().await.unwrap().len());
  cluster.close().await.unwrap();
}
