use log::debug;
use std::future::Future;
use std::time::Duration;
use tokio;

/// Runs `f` until it succeeds, sleeping for the next interval after every failure.
/// One attempt is made per interval plus a final one, so `intervals.len() + 1` attempts in total.
/// Returns the last error once the intervals are exhausted.
pub async fn retry<T, E, F, Fut>(
  intervals: Vec<Duration>,
  mut f: F,
) -> Result<T, E>
where
  F: FnMut() -> Fut,
  Fut: Future<Output = Result<T, E>>,
  E: std::fmt::Display,
{
  for (attempt, interval) in intervals.into_iter().enumerate() {
    match f().await {
      Ok(v) => return Ok(v),
      Err(e) => {
        debug!("attempt {attempt} failed: {e}, next one in {interval:?}");
        tokio::time::sleep(interval).await;
      }
    }
  }

  f().await
}

pub fn const_intervals(
  count: usize,
  interval: Duration,
) -> Vec<Duration> {
  vec![interval; count]
}

/// doubles the interval on every step but never goes above `max_interval`
pub fn exp_intervals(
  count: usize,
  start_interval: Duration,
  max_interval: Duration,
) -> Vec<Duration> {
  (0..count).map(|i| start_interval.saturating_mul(2_u32.saturating_pow(i as u32)).min(max_interval)).collect()
}
