use clap::Parser;
use etcd_client::Client;
use etcd_cluster::config::{ETCD_IMAGE, ETCD_TAG};
use etcd_cluster::{Cluster, ClusterConfig, DockerRuntime, Endpoint};
use log::{error, info};
use std::error::Error;
use std::sync::Arc;
use std::time::Duration;

const SMOKE_KEY: &str = "key";
const SMOKE_VALUE: &str = "xyz";

/// Runs a disposable etcd cluster in docker until Ctrl-C.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
  /// cluster name, also the name of the docker network
  #[arg(long, env = "ETCD_CLUSTER_NAME", default_value = "cluster")]
  name: String,

  #[arg(long, env = "ETCD_CLUSTER_NODES", default_value_t = 3)]
  nodes: usize,

  #[arg(long, env = "ETCD_CLUSTER_IMAGE", default_value = ETCD_IMAGE)]
  image: String,

  #[arg(long, env = "ETCD_CLUSTER_TAG", default_value = ETCD_TAG)]
  tag: String,

  /// give up on a start that takes longer than this, 0 waits forever
  #[arg(long, default_value_t = 120)]
  timeout_secs: u64,

  /// print client endpoints as JSON instead of one URL per line
  #[arg(long)]
  json: bool,

  /// write a key through the first node and read it back through the last one
  #[arg(long)]
  smoke: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
  env_logger::init();

  let args = Args::parse();

  let timeout = (args.timeout_secs > 0).then(|| Duration::from_secs(args.timeout_secs));
  let config = ClusterConfig::default().set_image(args.image.clone(), args.tag.clone()).set_round_timeout(timeout);

  let cluster = Cluster::new(Arc::new(DockerRuntime::new()?), &args.name, args.nodes, config).await?;

  let result = serve(&cluster, &args).await;
  if let Err(e) = &result {
    error!("etcd cluster {}: {e}", cluster.name());
  }

  info!("shutting down etcd cluster {}", cluster.name());
  let closed = cluster.close().await;
  settle(cluster.name(), result, closed)
}

/// A failed `serve` is what gets returned, a close failing on top of it is only logged.
fn settle(
  cluster: &str,
  served: Result<(), Box<dyn Error>>,
  closed: etcd_cluster::Result<()>,
) -> Result<(), Box<dyn Error>> {
  match (served, closed) {
    (Err(e), Err(close_err)) => {
      error!("closing etcd cluster {cluster} failed as well: {close_err}");
      Err(e)
    }
    (Err(e), Ok(())) => Err(e),
    (Ok(()), closed) => Ok(closed?),
  }
}

async fn serve(
  cluster: &Cluster,
  args: &Args,
) -> Result<(), Box<dyn Error>> {
  cluster.start().await?;

  let endpoints = cluster.client_endpoints().await?;
  if args.json {
    println!("{}", serde_json::to_string_pretty(&endpoints)?);
  } else {
    for e in &endpoints {
      println!("{}", e.url());
    }
  }

  if args.smoke {
    smoke_check(&endpoints).await?;
  }

  tokio::signal::ctrl_c().await?;
  Ok(())
}

async fn smoke_check(endpoints: &[Endpoint]) -> Result<(), Box<dyn Error>> {
  let (Some(first), Some(last)) = (endpoints.first(), endpoints.last()) else {
    return Err("cluster has no endpoints".into());
  };

  let mut writer = Client::connect([first.url()], None).await?;
  writer.put(SMOKE_KEY, SMOKE_VALUE, None).await?;

  let mut reader = Client::connect([last.url()], None).await?;
  let resp = reader.get(SMOKE_KEY, None).await?;
  let value = resp.kvs().first().map(|kv| kv.value_str()).transpose()?;
  check_read_back(value)?;

  println!("smoke check passed: {SMOKE_KEY} -> {SMOKE_VALUE} (written via {first}, read via {last})");
  Ok(())
}

fn check_read_back(value: Option<&str>) -> Result<(), Box<dyn Error>> {
  match value {
    Some(SMOKE_VALUE) => Ok(()),
    Some(other) => Err(format!("{SMOKE_KEY} reads back {other:?} instead of {SMOKE_VALUE:?}").into()),
    None => Err(format!("{SMOKE_KEY} not found").into()),
  }
}
