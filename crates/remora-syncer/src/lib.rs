//! Remora Syncer
//!
//! Reconciles results that could not be reported when their task finished.
//! Each pass walks the store's unsynced tasks and re-sends `complete` for
//! every one that carries an attempt; a task without an attempt was never
//! claimed and is marked synced without touching the network. One failure
//! never stops the pass, and no error is fatal.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use remora_client::AgentApi;
use remora_store::Store;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Outcome of one reconciliation pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncReport {
  /// Results the authority acknowledged.
  pub reported: usize,
  /// Unclaimed tasks marked synced without a request.
  pub skipped: usize,
  /// Results still unsynced after this pass.
  pub failed: usize,
}

#[derive(Clone)]
struct SyncPass {
  store: Arc<dyn Store>,
  client: Arc<dyn AgentApi>,
}

impl SyncPass {
  async fn run(&self) -> SyncReport {
    let mut report = SyncReport::default();

    let tasks = match self.store.list_unsynced().await {
      Ok(tasks) => tasks,
      Err(e) => {
        error!(error = %e, "list unsynced tasks failed");
        return report;
      }
    };
    if tasks.is_empty() {
      return report;
    }
    info!(count = tasks.len(), "found unsynced tasks");

    for task in tasks {
      if !task.is_claimed() {
        debug!(task_id = %task.id, "task was never claimed, marking synced");
        match self.store.mark_synced(&task.id).await {
          Ok(()) => report.skipped += 1,
          Err(e) => {
            error!(task_id = %task.id, error = %e, "mark synced failed");
            report.failed += 1;
          }
        }
        continue;
      }

      match self.client.report_complete(&task).await {
        Ok(()) => {}
        Err(e) if e.is_rejection() => {
          warn!(task_id = %task.id, attempt_id = %task.attempt_id, error = %e, "server rejected result");
          report.failed += 1;
          continue;
        }
        Err(e) => {
          error!(task_id = %task.id, error = %e, "result delivery failed");
          report.failed += 1;
          continue;
        }
      }

      match self.store.mark_synced(&task.id).await {
        Ok(()) => {
          info!(task_id = %task.id, status = %task.status, "result synced");
          report.reported += 1;
        }
        Err(e) => {
          error!(task_id = %task.id, error = %e, "mark synced failed");
          report.failed += 1;
        }
      }
    }

    report
  }
}

struct Running {
  cancel: CancellationToken,
  handle: JoinHandle<()>,
}

/// Background reconciler.
pub struct Syncer {
  pass: SyncPass,
  interval: Duration,
  running: Mutex<Option<Running>>,
}

impl Syncer {
  pub fn new(store: Arc<dyn Store>, client: Arc<dyn AgentApi>, interval: Duration) -> Self {
    Self {
      pass: SyncPass { store, client },
      interval,
      running: Mutex::new(None),
    }
  }

  /// Run one reconciliation pass.
  pub async fn sync_once(&self) -> SyncReport {
    self.pass.run().await
  }

  /// Start reconciling in the background: once immediately, then every
  /// interval. Calling `start` on a running syncer does nothing.
  pub fn start(&self) {
    let mut running = self.running.lock().unwrap_or_else(PoisonError::into_inner);
    if running.is_some() {
      return;
    }

    let cancel = CancellationToken::new();
    let handle = tokio::spawn(sync_loop(self.pass.clone(), self.interval, cancel.clone()));
    *running = Some(Running { cancel, handle });
  }

  /// Stop the background loop, waiting for an in-flight pass.
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
      error!(error = %e, "sync loop panicked");
    }
  }
}

async fn sync_loop(pass: SyncPass, interval: Duration, cancel: CancellationToken) {
  info!(interval_secs = interval.as_secs_f64(), "starting syncer");

  // The first tick completes immediately.
  let mut ticker = tokio::time::interval(interval);
  ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

  loop {
    tokio::select! {
      _ = cancel.cancelled() => {
        info!("syncer stopped");
        break;
      }
      _ = ticker.tick() => {
        let report = pass.run().await;
        if report != SyncReport::default() {
          info!(
            reported = report.reported,
            skipped = report.skipped,
            failed = report.failed,
            "sync pass finished"
          );
        }
      }
    }
  }
}
