use crate::error::ClusterError;
use log::{debug, error, info, warn};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

/// Receives lifecycle reports of nodes.
pub trait NodeListener: Send + Sync {
  fn started(
    &self,
    node: &str,
  );

  fn failed_to_start(
    &self,
    node: &str,
    cause: &ClusterError,
  );

  fn stopped(
    &self,
    node: &str,
  );
}

/// Only writes reports to the log.
pub struct LoggingListener;

impl NodeListener for LoggingListener {
  fn started(
    &self,
    node: &str,
  ) {
    info!("etcd container {node} started");
  }

  fn failed_to_start(
    &self,
    node: &str,
    cause: &ClusterError,
  ) {
    error!("etcd container {node} start failed: {cause}");
  }

  fn stopped(
    &self,
    node: &str,
  ) {
    info!("etcd container {node} stopped");
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeEvent {
  Started(String),
  FailedToStart { node: String, cause: String },
  Stopped(String),
}

/// What a finished round collected.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RoundOutcome {
  /// in the order reports arrived
  pub started: Vec<String>,
  /// node name and the cause it reported
  pub failed: Vec<(String, String)>,
}

impl RoundOutcome {
  pub fn failed_nodes(&self) -> Vec<String> {
    self.failed.iter().map(|(node, _)| node.clone()).collect()
  }
}

/// Fan-in point of cluster operations.
///
/// Every `start`/`restart` round arms the barrier with the names of all dispatched nodes.
/// `started` and `failed_to_start` reports are sent over a channel that belongs to that round only, and
/// [`Round::wait`] returns once each armed node has reported exactly once. `stopped` never counts.
///
/// The failure flag is sticky: a single `failed_to_start` keeps it set until the next `arm`.
pub struct LifecycleBarrier {
  round: Mutex<Option<UnboundedSender<NodeEvent>>>,
  failed: AtomicBool,
  observer: Arc<dyn NodeListener>,
}

impl LifecycleBarrier {
  pub fn new() -> LifecycleBarrier {
    LifecycleBarrier::with_observer(Arc::new(LoggingListener))
  }

  /// every report is forwarded to `observer` as well, armed round or not
  pub fn with_observer(observer: Arc<dyn NodeListener>) -> LifecycleBarrier {
    LifecycleBarrier { round: Mutex::new(None), failed: AtomicBool::new(false), observer }
  }

  /// Starts a new round expecting one report from each of `nodes`.
  /// Clears the failure flag and detaches whatever round was armed before.
  pub fn arm<I>(
    &self,
    nodes: I,
  ) -> Round
  where
    I: IntoIterator<Item = String>,
  {
    let (sender, receiver) = mpsc::unbounded_channel();
    let pending: BTreeSet<String> = nodes.into_iter().collect();

    let mut round = self.lock_round();
    self.failed.store(false, Ordering::SeqCst);
    *round = Some(sender);

    debug!("barrier armed for {} nodes", pending.len());
    Round { receiver, pending, outcome: RoundOutcome::default() }
  }

  pub fn is_failed(&self) -> bool {
    self.failed.load(Ordering::SeqCst)
  }

  fn lock_round(&self) -> MutexGuard<'_, Option<UnboundedSender<NodeEvent>>> {
    self.round.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
  }

  fn send(
    &self,
    event: NodeEvent,
  ) {
    let round = self.lock_round();
    match round.as_ref() {
      Some(sender) => {
        if let Err(unsent) = sender.send(event) {
          debug!("report outside of a round: {:?}", unsent.0);
        }
      }
      None => debug!("report before any round was armed: {event:?}"),
    }
  }
}

impl NodeListener for LifecycleBarrier {
  fn started(
    &self,
    node: &str,
  ) {
    self.observer.started(node);
    self.send(NodeEvent::Started(node.to_string()));
  }

  fn failed_to_start(
    &self,
    node: &str,
    cause: &ClusterError,
  ) {
    self.observer.failed_to_start(node, cause);
    self.failed.store(true, Ordering::SeqCst);
    self.send(NodeEvent::FailedToStart { node: node.to_string(), cause: cause.to_string() });
  }

  fn stopped(
    &self,
    node: &str,
  ) {
    self.observer.stopped(node);
    self.send(NodeEvent::Stopped(node.to_string()));
  }
}

/// One armed round of a [`LifecycleBarrier`].
pub struct Round {
  receiver: UnboundedReceiver<NodeEvent>,
  pending: BTreeSet<String>,
  outcome: RoundOutcome,
}

impl Round {
  /// nodes that haven't reported yet
  pub fn outstanding(&self) -> usize {
    self.pending.len()
  }

  /// Blocks until every armed node reported.
  pub async fn wait(mut self) -> RoundOutcome {
    self.collect().await;
    self.outcome
  }

  /// Same as `wait` but gives up after `timeout`.
  /// On timeout returns the nodes that never reported.
  pub async fn wait_timeout(
    mut self,
    timeout: Duration,
  ) -> Result<RoundOutcome, Vec<String>> {
    match tokio::time::timeout(timeout, self.collect()).await {
      Ok(()) => Ok(self.outcome),
      Err(_) => Err(self.pending.into_iter().collect()),
    }
  }

  async fn collect(&mut self) {
    while !self.pending.is_empty() {
      let Some(event) = self.receiver.recv().await else {
        // the barrier was re-armed or dropped underneath this round
        for node in std::mem::take(&mut self.pending) {
          warn!("round abandoned before {node} reported");
          self.outcome.failed.push((node, "round abandoned".to_string()));
        }
        return;
      };
      self.account(event);
    }
  }

  fn account(
    &mut self,
    event: NodeEvent,
  ) {
    match event {
      NodeEvent::Started(node) => {
        if self.pending.remove(&node) {
          self.outcome.started.push(node);
        } else {
          warn!("unexpected start report from {node}");
        }
      }
      NodeEvent::FailedToStart { node, cause } => {
        if self.pending.remove(&node) {
          self.outcome.failed.push((node, cause));
        } else {
          warn!("unexpected failure report from {node}: {cause}");
        }
      }
      NodeEvent::Stopped(_) => {}
    }
  }
}
