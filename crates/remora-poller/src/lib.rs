//! Remora Poller
//!
//! Claims work from the authority on a fixed interval and hands each claimed
//! task, in claim order, to a [`TaskDispatcher`]. A tick waits for dispatch
//! to finish, so polls never overlap and a slow dispatcher delays the next
//! claim instead of piling work up.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use remora_client::AgentApi;
use remora_task::Task;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Receives tasks surfaced by the poller.
#[async_trait]
pub trait TaskDispatcher: Send + Sync {
  /// Take ownership of a claimed task. Failures are the dispatcher's to
  /// record; the poller moves on to the next task.
  async fn dispatch(&self, task: Task);
}

/// Poll cadence.
#[derive(Debug, Clone)]
pub struct PollerConfig {
  pub interval: Duration,
  pub batch_size: usize,
}

impl Default for PollerConfig {
  fn default() -> Self {
    Self {
      interval: Duration::from_secs(5),
      batch_size: 10,
    }
  }
}

/// One claim-and-dispatch cycle, shared between `poll_once` and the loop.
#[derive(Clone)]
struct PollCycle {
  client: Arc<dyn AgentApi>,
  dispatcher: Arc<dyn TaskDispatcher>,
  batch_size: usize,
}

impl PollCycle {
  async fn run(&self) -> usize {
    let tasks = match self.client.claim_tasks(self.batch_size).await {
      Ok(tasks) => tasks,
      Err(e) if e.is_rejection() => {
        warn!(error = %e, "claim rejected by server");
        return 0;
      }
      Err(e) => {
        error!(error = %e, "claim tasks failed");
        return 0;
      }
    };

    if tasks.is_empty() {
      debug!("no tasks claimed");
      return 0;
    }

    let count = tasks.len();
    info!(count, "claimed tasks");
    for task in tasks {
      debug!(task_id = %task.id, attempt_id = %task.attempt_id, "dispatching task");
      self.dispatcher.dispatch(task).await;
    }
    count
  }
}

struct Running {
  cancel: CancellationToken,
  handle: JoinHandle<()>,
}

/// Periodic claimer.
pub struct Poller {
  cycle: PollCycle,
  interval: Duration,
  running: Mutex<Option<Running>>,
}

impl Poller {
  pub fn new(
    client: Arc<dyn AgentApi>,
    dispatcher: Arc<dyn TaskDispatcher>,
    config: PollerConfig,
  ) -> Self {
    Self {
      cycle: PollCycle {
        client,
        dispatcher,
        batch_size: config.batch_size,
      },
      interval: config.interval,
      running: Mutex::new(None),
    }
  }

  /// Claim one batch and dispatch it. Returns the number of tasks
  /// dispatched; claim errors are logged and count as zero.
  pub async fn poll_once(&self) -> usize {
    self.cycle.run().await
  }

  /// Start polling in the background. The first claim happens one interval
  /// from now. Calling `start` on a running poller does nothing.
  pub fn start(&self) {
    let mut running = self.running.lock().unwrap_or_else(PoisonError::into_inner);
    if running.is_some() {
      return;
    }

    let cancel = CancellationToken::new();
    let handle = tokio::spawn(poll_loop(self.cycle.clone(), self.interval, cancel.clone()));
    *running = Some(Running { cancel, handle });
  }

  /// Stop polling, waiting for an in-flight tick to finish. Calling `stop`
  /// on a stopped poller does nothing.
  pub async fn stop(&self) {
    let running = self
      .running
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .take();
    let Some(running) = running else {
      return;
    };

    running.cancel.cancel();
    if let Err(e) = running.handle.await {
      error!(error = %e, "poll loop panicked");
    }
  }
}

async fn poll_loop(cycle: PollCycle, interval: Duration, cancel: CancellationToken) {
  info!(interval_secs = interval.as_secs_f64(), batch_size = cycle.batch_size, "starting poller");

  let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
  ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

  loop {
    tokio::select! {
      _ = cancel.cancelled() => {
        info!("poller stopped");
        break;
      }
      _ = ticker.tick() => {
        cycle.run().await;
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use remora_client::{ClientError, Operation};
  use std::collections::VecDeque;
  use std::sync::atomic::{AtomicUsize, Ordering};

  #[derive(Default)]
  struct FakeApi {
    batches: Mutex<VecDeque<Result<Vec<Task>, ClientError>>>,
    claims: AtomicUsize,
    limits: Mutex<Vec<usize>>,
  }

  impl FakeApi {
    fn with_batches(batches: Vec<Result<Vec<Task>, ClientError>>) -> Self {
      Self {
        batches: Mutex::new(batches.into()),
        ..Default::default()
      }
    }
  }

  #[async_trait]
  impl AgentApi for FakeApi {
    async fn claim_tasks(&self, limit: usize) -> Result<Vec<Task>, ClientError> {
      self.claims.fetch_add(1, Ordering::SeqCst);
      self.limits.lock().unwrap().push(limit);
      self
        .batches
        .lock()
        .unwrap()
        .pop_front()
        .unwrap_or_else(|| Ok(Vec::new()))
    }

    async fn report_start(&self, _: &str, _: &str) -> Result<(), ClientError> {
      Ok(())
    }

    async fn renew_lease(&self, _: &str, _: &str) -> Result<(), ClientError> {
      Ok(())
    }

    async fn report_complete(&self, _: &Task) -> Result<(), ClientError> {
      Ok(())
    }
  }

  #[derive(Default)]
  struct RecordingDispatcher {
    ids: Mutex<Vec<String>>,
    delay: Duration,
  }

  #[async_trait]
  impl TaskDispatcher for RecordingDispatcher {
    async fn dispatch(&self, task: Task) {
      if !self.delay.is_zero() {
        tokio::time::sleep(self.delay).await;
      }
      self.ids.lock().unwrap().push(task.id);
    }
  }

  fn claimed(id: &str) -> Task {
    let mut task = Task::new(id, "echo hi");
    task.attempt_id = format!("att-{id}");
    task
  }

  fn rejection() -> ClientError {
    ClientError::Rejected {
      operation: Operation::Claim,
      code: 30099,
      message: "internal".to_string(),
    }
  }

  #[tokio::test]
  async fn test_poll_once_dispatches_in_claim_order() {
    let api = Arc::new(FakeApi::with_batches(vec![Ok(vec![
      claimed("a"),
      claimed("b"),
      claimed("c"),
    ])]));
    let dispatcher = Arc::new(RecordingDispatcher::default());
    let poller = Poller::new(
      api.clone(),
      dispatcher.clone(),
      PollerConfig {
        interval: Duration::from_secs(5),
        batch_size: 3,
      },
    );

    assert_eq!(poller.poll_once().await, 3);
    assert_eq!(*dispatcher.ids.lock().unwrap(), vec!["a", "b", "c"]);
    assert_eq!(*api.limits.lock().unwrap(), vec![3]);
  }

  #[tokio::test]
  async fn test_claim_error_is_skipped() {
    let api = Arc::new(FakeApi::with_batches(vec![
      Err(rejection()),
      Ok(vec![claimed("a")]),
    ]));
    let dispatcher = Arc::new(RecordingDispatcher::default());
    let poller = Poller::new(api, dispatcher.clone(), PollerConfig::default());

    assert_eq!(poller.poll_once().await, 0);
    assert!(dispatcher.ids.lock().unwrap().is_empty());
    assert_eq!(poller.poll_once().await, 1);
  }

  #[tokio::test(start_paused = true)]
  async fn test_loop_polls_every_interval() {
    let api = Arc::new(FakeApi::default());
    let poller = Poller::new(
      api.clone(),
      Arc::new(RecordingDispatcher::default()),
      PollerConfig {
        interval: Duration::from_secs(5),
        batch_size: 10,
      },
    );

    poller.start();
    tokio::time::sleep(Duration::from_millis(4_900)).await;
    assert_eq!(api.claims.load(Ordering::SeqCst), 0);

    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(api.claims.load(Ordering::SeqCst), 2);

    poller.stop().await;
    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(api.claims.load(Ordering::SeqCst), 2);
  }

  #[tokio::test(start_paused = true)]
  async fn test_start_and_stop_are_idempotent() {
    let api = Arc::new(FakeApi::default());
    let poller = Poller::new(
      api.clone(),
      Arc::new(RecordingDispatcher::default()),
      PollerConfig {
        interval: Duration::from_secs(1),
        batch_size: 1,
      },
    );

    poller.stop().await;
    poller.start();
    poller.start();
    tokio::time::sleep(Duration::from_millis(1_500)).await;
    // A second loop would have doubled the claims.
    assert_eq!(api.claims.load(Ordering::SeqCst), 1);

    poller.stop().await;
    poller.stop().await;
  }

  #[tokio::test(start_paused = true)]
  async fn test_stop_waits_for_in_flight_dispatch() {
    let api = Arc::new(FakeApi::with_batches(vec![Ok(vec![claimed("slow")])]));
    let dispatcher = Arc::new(RecordingDispatcher {
      delay: Duration::from_secs(3),
      ..Default::default()
    });
    let poller = Poller::new(
      api,
      dispatcher.clone(),
      PollerConfig {
        interval: Duration::from_secs(1),
        batch_size: 1,
      },
    );

    poller.start();
    // First tick at 1s, dispatch running until 4s.
    tokio::time::sleep(Duration::from_millis(1_500)).await;
    assert!(dispatcher.ids.lock().unwrap().is_empty());

    poller.stop().await;
    assert_eq!(*dispatcher.ids.lock().unwrap(), vec!["slow"]);
  }
}
