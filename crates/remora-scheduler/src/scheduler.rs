use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use remora_client::{AgentApi, ClientError, RemoteCode};
use remora_executor::{ExecutionError, Executor};
use remora_poller::TaskDispatcher;
use remora_store::Store;
use remora_task::{Task, TaskStatus};
use serde::Serialize;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use crate::SchedulerError;
use crate::queue::TaskQueue;

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
  /// Lease renewal period for claimed tasks; `None` disables renewal.
  pub renew_interval: Option<Duration>,
  /// Fallback wake-up period of the dispatch loop.
  pub tick: Duration,
}

impl Default for SchedulerConfig {
  fn default() -> Self {
    Self {
      renew_interval: Some(Duration::from_secs(200)),
      tick: Duration::from_millis(100),
    }
  }
}

/// Snapshot of the scheduler's load.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct QueueStatus {
  pub pending: usize,
  pub running: usize,
  pub capacity: usize,
}

#[derive(Default)]
struct State {
  queue: TaskQueue,
  /// Tasks popped from the queue and not yet finished, with the token that
  /// cancels them.
  active: HashMap<String, CancellationToken>,
}

impl State {
  fn is_scheduled(&self, task_id: &str) -> bool {
    self.queue.contains(task_id) || self.active.contains_key(task_id)
  }
}

struct Inner {
  state: Mutex<State>,
  wake: Notify,
  executor: Arc<Executor>,
  store: Arc<dyn Store>,
  client: Option<Arc<dyn AgentApi>>,
  renew_interval: Option<Duration>,
  tracker: TaskTracker,
}

struct Running {
  cancel: CancellationToken,
  handle: JoinHandle<()>,
}

/// Queues submitted tasks and feeds them to the executor within its worker
/// limit, reporting claimed tasks to the authority as they progress.
pub struct Scheduler {
  inner: Arc<Inner>,
  tick: Duration,
  running: Mutex<Option<Running>>,
}

impl Scheduler {
  /// `client` is the authority for claimed tasks. Without one, nothing is
  /// reported and claimed results stay unsynced.
  pub fn new(
    executor: Arc<Executor>,
    store: Arc<dyn Store>,
    client: Option<Arc<dyn AgentApi>>,
    config: SchedulerConfig,
  ) -> Self {
    Self {
      inner: Arc::new(Inner {
        state: Mutex::new(State::default()),
        wake: Notify::new(),
        executor,
        store,
        client,
        renew_interval: config.renew_interval,
        tracker: TaskTracker::new(),
      }),
      tick: config.tick,
      running: Mutex::new(None),
    }
  }

  /// Persist `task` as pending and queue it.
  pub async fn submit(&self, mut task: Task) -> Result<(), SchedulerError> {
    if self.inner.state().is_scheduled(&task.id) {
      return Err(SchedulerError::AlreadyScheduled { id: task.id });
    }

    task.status = TaskStatus::Pending;
    task.created_at.get_or_insert_with(Utc::now);
    self.inner.store.save(&task).await?;

    let task_id = task.id.clone();
    {
      let mut state = self.inner.state();
      if state.active.contains_key(&task_id) || !state.queue.push(task) {
        return Err(SchedulerError::AlreadyScheduled { id: task_id });
      }
    }
    debug!(task_id = %task_id, "task queued");
    self.inner.wake.notify_one();
    Ok(())
  }

  /// Re-queue pending tasks left in the store, then start the dispatch
  /// loop. Returns how many tasks were recovered. Calling `start` on a
  /// running scheduler does nothing.
  pub async fn start(&self) -> Result<usize, SchedulerError> {
    if self.lock_running().is_some() {
      return Ok(0);
    }

    let pending = self.inner.store.list_by_status(TaskStatus::Pending).await?;
    let mut recovered = 0;
    {
      let mut state = self.inner.state();
      for task in pending {
        if !state.active.contains_key(&task.id) && state.queue.push(task) {
          recovered += 1;
        }
      }
    }
    if recovered > 0 {
      info!(count = recovered, "recovered pending tasks");
    }

    let mut running = self.lock_running();
    if running.is_none() {
      self.inner.tracker.reopen();
      let cancel = CancellationToken::new();
      let handle = tokio::spawn(dispatch_loop(
        Arc::clone(&self.inner),
        self.tick,
        cancel.clone(),
      ));
      *running = Some(Running { cancel, handle });
    }
    Ok(recovered)
  }

  /// Stop dispatching and wait for in-flight tasks to finish. Queued tasks
  /// stay pending in the store.
  pub async fn stop(&self) {
    let running = self.lock_running().take();
    let Some(running) = running else {
      return;
    };

    running.cancel.cancel();
    if let Err(e) = running.handle.await {
      error!(error = %e, "dispatch loop panicked");
    }

    let in_flight = self.inner.tracker.len();
    if in_flight > 0 {
      info!(count = in_flight, "waiting for running tasks");
    }
    self.inner.tracker.close();
    self.inner.tracker.wait().await;
    info!("scheduler stopped");
  }

  /// Cancel a queued or running task. A queued task is recorded as
  /// cancelled without running. Returns false when the id is unknown.
  pub async fn cancel(&self, task_id: &str) -> Result<bool, SchedulerError> {
    let queued = self.inner.state().queue.remove(task_id);
    if let Some(mut task) = queued {
      task.status = TaskStatus::Cancelled;
      task.exit_code = -1;
      task.error = ExecutionError::Cancelled.to_string();
      task.ended_at = Some(Utc::now());
      self.inner.store.save(&task).await?;
      info!(task_id, "queued task cancelled");
      return Ok(true);
    }

    // The executor watches the same token, whether or not the process has
    // spawned yet.
    let token = self.inner.state().active.get(task_id).cloned();
    match token {
      Some(token) => {
        info!(task_id, "cancelling task");
        token.cancel();
        Ok(true)
      }
      None => Ok(false),
    }
  }

  pub fn status(&self) -> QueueStatus {
    let state = self.inner.state();
    QueueStatus {
      pending: state.queue.len(),
      running: state.active.len(),
      capacity: self.inner.executor.config().max_workers,
    }
  }

  fn lock_running(&self) -> MutexGuard<'_, Option<Running>> {
    self.running.lock().unwrap_or_else(PoisonError::into_inner)
  }
}

#[async_trait]
impl TaskDispatcher for Scheduler {
  async fn dispatch(&self, task: Task) {
    let task_id = task.id.clone();
    match self.submit(task).await {
      Ok(()) => {}
      Err(e @ SchedulerError::AlreadyScheduled { .. }) => {
        debug!(task_id = %task_id, reason = %e, "duplicate claim ignored");
      }
      Err(e) => error!(task_id = %task_id, error = %e, "submit failed"),
    }
  }
}

async fn dispatch_loop(inner: Arc<Inner>, tick: Duration, cancel: CancellationToken) {
  info!(
    max_workers = inner.executor.config().max_workers,
    "starting scheduler"
  );

  let mut ticker = tokio::time::interval(tick);
  ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

  loop {
    tokio::select! {
      _ = cancel.cancelled() => break,
      _ = inner.wake.notified() => {}
      _ = ticker.tick() => {}
    }
    Inner::dispatch_ready(&inner);
  }
}

impl Inner {
  fn state(&self) -> MutexGuard<'_, State> {
    self.state.lock().unwrap_or_else(PoisonError::into_inner)
  }

  /// Pop queued tasks onto the tracker while workers are free.
  fn dispatch_ready(this: &Arc<Self>) {
    let capacity = this.executor.config().max_workers;
    loop {
      let (task, cancel) = {
        let mut state = this.state();
        if state.active.len() >= capacity || !this.executor.can_accept() {
          return;
        }
        let Some(task) = state.queue.pop() else {
          return;
        };
        let cancel = CancellationToken::new();
        state.active.insert(task.id.clone(), cancel.clone());
        (task, cancel)
      };

      let inner = Arc::clone(this);
      this.tracker.spawn(async move {
        let task_id = task.id.clone();
        inner.run_task(task, cancel).await;
        inner.finish(&task_id);
      });
    }
  }

  fn finish(&self, task_id: &str) {
    self.state().active.remove(task_id);
    self.wake.notify_one();
  }

  /// The authority to report `task` to, if it was claimed from one.
  fn authority(&self, task: &Task) -> Option<&Arc<dyn AgentApi>> {
    self.client.as_ref().filter(|_| task.is_claimed())
  }

  async fn run_task(&self, mut task: Task, cancel: CancellationToken) {
    // A command the gate refuses never starts, so the authority only hears
    // the failed result.
    if let Err(e) = self.executor.validate(&task) {
      warn!(task_id = %task.id, command = %task.command, reason = %e, "command rejected");
      task.status = TaskStatus::Failed;
      task.exit_code = -1;
      task.error = ExecutionError::Rejected(e).to_string();
      task.ended_at = Some(Utc::now());
      self.persist(&task).await;
      self.report(&task).await;
      return;
    }

    if cancel.is_cancelled() {
      self.finish_cancelled(&mut task).await;
      return;
    }

    if let Some(client) = self.authority(&task) {
      match client.report_start(&task.id, &task.attempt_id).await {
        Ok(()) => debug!(task_id = %task.id, "start reported"),
        Err(e) if lease_lost(&e) => {
          warn!(task_id = %task.id, attempt_id = %task.attempt_id, error = %e, "attempt no longer held, not running");
          task.status = TaskStatus::Failed;
          task.exit_code = -1;
          task.error = format!("start rejected: {e}");
          task.ended_at = Some(Utc::now());
          // The authority has moved on; there is nothing to report.
          task.synced = true;
          self.persist(&task).await;
          return;
        }
        Err(e) => warn!(task_id = %task.id, error = %e, "report start failed, running anyway"),
      }
    }

    if cancel.is_cancelled() {
      self.finish_cancelled(&mut task).await;
      return;
    }

    // Recorded before spawning so a restart does not run it a second time.
    task.status = TaskStatus::Running;
    task.started_at = Some(Utc::now());
    self.persist(&task).await;

    let renewal = self.spawn_renewal(&task, &cancel);
    self.executor.execute_with_cancel(&mut task, cancel).await;
    if let Some(renewal) = renewal {
      renewal.cancel.cancel();
      if let Err(e) = renewal.handle.await {
        error!(task_id = %task.id, error = %e, "lease renewal panicked");
      }
    }

    self.persist(&task).await;
    self.report(&task).await;
  }

  async fn finish_cancelled(&self, task: &mut Task) {
    info!(task_id = %task.id, "task cancelled before start");
    task.status = TaskStatus::Cancelled;
    task.exit_code = -1;
    task.error = ExecutionError::Cancelled.to_string();
    task.ended_at = Some(Utc::now());
    self.persist(task).await;
    self.report(task).await;
  }

  async fn persist(&self, task: &Task) {
    if let Err(e) = self.store.save(task).await {
      error!(task_id = %task.id, error = %e, "failed to persist task result");
    }
  }

  /// Deliver the result. Anything not acknowledged here stays unsynced for
  /// the syncer.
  async fn report(&self, task: &Task) {
    if task.is_claimed() {
      let Some(client) = self.authority(task) else {
        return;
      };
      if let Err(e) = client.report_complete(task).await {
        warn!(task_id = %task.id, error = %e, "report complete failed, leaving for syncer");
        return;
      }
      info!(task_id = %task.id, status = %task.status, "result reported");
    }

    if let Err(e) = self.store.mark_synced(&task.id).await {
      error!(task_id = %task.id, error = %e, "mark synced failed");
    }
  }

  fn spawn_renewal(&self, task: &Task, task_cancel: &CancellationToken) -> Option<Running> {
    let client = Arc::clone(self.authority(task)?);
    let every = self.renew_interval?;
    let cancel = CancellationToken::new();
    let handle = tokio::spawn(renew_loop(
      client,
      task_cancel.clone(),
      task.id.clone(),
      task.attempt_id.clone(),
      every,
      cancel.clone(),
    ));
    Some(Running { cancel, handle })
  }
}

async fn renew_loop(
  client: Arc<dyn AgentApi>,
  task_cancel: CancellationToken,
  task_id: String,
  attempt_id: String,
  every: Duration,
  cancel: CancellationToken,
) {
  let mut ticker = tokio::time::interval_at(Instant::now() + every, every);
  ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

  loop {
    tokio::select! {
      _ = cancel.cancelled() => break,
      _ = ticker.tick() => match client.renew_lease(&task_id, &attempt_id).await {
        Ok(()) => debug!(task_id = %task_id, "lease renewed"),
        Err(e) if lease_lost(&e) => {
          warn!(task_id = %task_id, error = %e, "lease lost, cancelling task");
          task_cancel.cancel();
          break;
        }
        Err(e) => warn!(task_id = %task_id, error = %e, "lease renewal failed"),
      },
    }
  }
}

fn lease_lost(error: &ClientError) -> bool {
  error.remote_code().is_some_and(RemoteCode::is_lease_lost)
}
