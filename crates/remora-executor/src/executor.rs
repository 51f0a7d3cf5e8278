//! Execution engine.

use std::collections::HashMap;
use std::io::Write;
use std::os::unix::process::ExitStatusExt;
use std::process::{ExitStatus, Stdio};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::Utc;
use remora_gate::{Gate, GateError};
use remora_task::{Task, TaskStatus};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::config::ExecutorConfig;
use crate::error::ExecutionError;
use crate::output::OutputBuffer;
use crate::signal::{Signal, signal_group};

/// How long to keep reading pipes after the child exits. A backgrounded
/// grandchild can hold them open indefinitely.
const OUTPUT_DRAIN_GRACE: Duration = Duration::from_secs(1);

const READ_CHUNK: usize = 8 * 1024;

struct RunningTask {
  /// Set once the child has spawned.
  pgid: Option<i32>,
  cancel: CancellationToken,
}

/// How the wait on a spawned child ended.
struct Finished {
  status: Result<ExitStatus, std::io::Error>,
  timed_out: bool,
  cancelled: bool,
}

type SharedOutput = Arc<Mutex<OutputBuffer>>;

/// Runs tasks as child processes and tracks the ones in flight.
pub struct Executor {
  config: ExecutorConfig,
  gate: Gate,
  running: Mutex<HashMap<String, RunningTask>>,
}

impl Executor {
  pub fn new(config: ExecutorConfig) -> Self {
    Self {
      config,
      gate: Gate::default(),
      running: Mutex::new(HashMap::new()),
    }
  }

  /// Validate every command against `gate` before spawning it.
  pub fn with_gate(mut self, gate: Gate) -> Self {
    self.gate = gate;
    self
  }

  pub fn config(&self) -> &ExecutorConfig {
    &self.config
  }

  pub fn running_count(&self) -> usize {
    self.registry().len()
  }

  pub fn is_running(&self, task_id: &str) -> bool {
    self.registry().contains_key(task_id)
  }

  /// Whether fewer than `max_workers` executions are in flight. Advisory:
  /// `execute` itself never refuses work.
  pub fn can_accept(&self) -> bool {
    self.running_count() < self.config.max_workers
  }

  /// Check `task` against the gate without running it.
  pub fn validate(&self, task: &Task) -> Result<(), GateError> {
    if !self.gate.enabled() {
      return Ok(());
    }
    self.gate.validate(&task.command, &task.args)
  }

  /// Run `task` to a terminal state, recording the outcome in its result
  /// fields.
  pub async fn execute(&self, task: &mut Task) {
    self.execute_with_cancel(task, CancellationToken::new()).await;
  }

  /// Like [`execute`](Self::execute), stopping the task once `cancel` fires.
  /// A token already cancelled before the process spawns means it never
  /// spawns.
  #[instrument(name = "task_execute", skip(self, task, cancel), fields(task_id = %task.id))]
  pub async fn execute_with_cancel(&self, task: &mut Task, cancel: CancellationToken) {
    let timeout = if task.timeout > 0 {
      Duration::from_secs(task.timeout as u64)
    } else {
      self.config.default_timeout
    };

    if let Err(e) = self.validate(task) {
      warn!(command = %task.command, reason = %e, "command rejected");
      task.ended_at = Some(Utc::now());
      fail(task, -1, ExecutionError::Rejected(e));
      return;
    }

    self.registry().insert(
      task.id.clone(),
      RunningTask {
        pgid: None,
        cancel: cancel.clone(),
      },
    );
    if cancel.is_cancelled() {
      self.registry().remove(&task.id);
      info!("task cancelled before start");
      task.status = TaskStatus::Cancelled;
      task.exit_code = -1;
      task.error = ExecutionError::Cancelled.to_string();
      task.ended_at = Some(Utc::now());
      return;
    }

    task.status = TaskStatus::Running;
    task.started_at = Some(Utc::now());
    info!(command = %task.command, timeout_secs = timeout.as_secs(), "task started");

    let mut child = match build_command(task).spawn() {
      Ok(child) => child,
      Err(e) => {
        self.registry().remove(&task.id);
        task.ended_at = Some(Utc::now());
        warn!(error = %e, "failed to start process");
        fail(task, -1, ExecutionError::Spawn(e));
        return;
      }
    };

    let pgid = child.id().map(|pid| pid as i32);
    if let Some(entry) = self.registry().get_mut(&task.id) {
      entry.pgid = pgid;
    }

    let stdout = Arc::new(Mutex::new(OutputBuffer::new(self.config.output_limit)));
    let stderr = Arc::new(Mutex::new(OutputBuffer::new(self.config.output_limit)));
    let stdout_reader = child
      .stdout
      .take()
      .map(|pipe| tokio::spawn(drain(pipe, stdout.clone())));
    let stderr_reader = child
      .stderr
      .take()
      .map(|pipe| tokio::spawn(drain(pipe, stderr.clone())));

    let deadline = tokio::time::sleep(timeout);
    tokio::pin!(deadline);
    let force_kill = tokio::time::sleep(self.config.kill_grace);
    tokio::pin!(force_kill);
    let mut force_kill_armed = false;
    let mut timed_out = false;
    let mut cancelled = false;

    let status = loop {
      tokio::select! {
        status = child.wait() => break status,
        _ = &mut deadline, if !timed_out => {
          timed_out = true;
          warn!(timeout_secs = timeout.as_secs(), "task timed out, killing process group");
          send(pgid, Signal::Kill);
          if pgid.is_none() {
            let _ = child.start_kill();
          }
        }
        _ = cancel.cancelled(), if !cancelled => {
          cancelled = true;
          // The token may have fired without `cancel` having signalled.
          send(pgid, Signal::Term);
          force_kill.as_mut().reset(Instant::now() + self.config.kill_grace);
          force_kill_armed = true;
        }
        _ = &mut force_kill, if force_kill_armed => {
          force_kill_armed = false;
          warn!("process group ignored SIGTERM, killing");
          send(pgid, Signal::Kill);
        }
      }
    };

    self.registry().remove(&task.id);
    task.ended_at = Some(Utc::now());

    collect(stdout_reader).await;
    collect(stderr_reader).await;
    task.stdout = take_text(&stdout);
    task.stderr = take_text(&stderr);

    classify(
      task,
      Finished {
        status,
        timed_out,
        cancelled,
      },
      timeout,
    );

    info!(
      status = %task.status,
      exit_code = task.exit_code,
      "task finished"
    );
  }

  /// Request cancellation of a running task.
  ///
  /// Sends SIGTERM to the task's process group and returns at once; the
  /// execution escalates to SIGKILL if the group outlives the grace window.
  /// Returns false when no task with this id is running.
  pub fn cancel(&self, task_id: &str) -> bool {
    let running = self.registry();
    let Some(entry) = running.get(task_id) else {
      return false;
    };

    info!(task_id, "cancelling task");
    send(entry.pgid, Signal::Term);
    entry.cancel.cancel();
    true
  }

  fn registry(&self) -> MutexGuard<'_, HashMap<String, RunningTask>> {
    self.running.lock().unwrap_or_else(PoisonError::into_inner)
  }
}

fn build_command(task: &Task) -> Command {
  let mut command = if task.args.is_empty() {
    let mut command = Command::new("bash");
    command.arg("-c").arg(&task.command);
    command
  } else {
    let mut command = Command::new(&task.command);
    command.args(&task.args);
    command
  };

  if !task.workdir.is_empty() {
    command.current_dir(&task.workdir);
  }

  command
    .envs(&task.env)
    .stdin(Stdio::null())
    .stdout(Stdio::piped())
    .stderr(Stdio::piped())
    .process_group(0)
    .kill_on_drop(true);
  command
}

fn send(pgid: Option<i32>, sig: Signal) {
  let Some(pgid) = pgid else {
    return;
  };
  if let Err(e) = signal_group(pgid, sig) {
    // ESRCH: the group already exited.
    debug!(pgid, signal = ?sig, error = %e, "failed to signal process group");
  }
}

async fn drain<R>(mut pipe: R, output: SharedOutput)
where
  R: AsyncRead + Unpin,
{
  let mut chunk = vec![0u8; READ_CHUNK];
  loop {
    match pipe.read(&mut chunk).await {
      Ok(0) | Err(_) => break,
      Ok(n) => {
        let mut output = output.lock().unwrap_or_else(PoisonError::into_inner);
        // Never fails: the buffer discards what it cannot hold.
        let _ = output.write_all(&chunk[..n]);
      }
    }
  }
}

async fn collect(reader: Option<JoinHandle<()>>) {
  let Some(mut reader) = reader else {
    return;
  };
  if tokio::time::timeout(OUTPUT_DRAIN_GRACE, &mut reader)
    .await
    .is_err()
  {
    debug!("output pipe still open after exit, abandoning reader");
    reader.abort();
  }
}

fn take_text(output: &SharedOutput) -> String {
  output
    .lock()
    .unwrap_or_else(PoisonError::into_inner)
    .to_string_lossy()
}

fn fail(task: &mut Task, exit_code: i32, error: ExecutionError) {
  task.status = TaskStatus::Failed;
  task.exit_code = exit_code;
  task.error = error.to_string();
}

/// Exit code of a finished child; signal deaths map to `128 + signal`.
fn exit_code(status: &ExitStatus) -> i32 {
  match (status.code(), status.signal()) {
    (Some(code), _) => code,
    (None, Some(signal)) => 128 + signal,
    (None, None) => -1,
  }
}

fn classify(task: &mut Task, finished: Finished, timeout: Duration) {
  let status = match finished.status {
    Ok(status) => status,
    Err(e) => {
      fail(task, -1, ExecutionError::Wait(e));
      return;
    }
  };

  if finished.cancelled {
    task.status = TaskStatus::Cancelled;
    task.exit_code = exit_code(&status);
    task.error = ExecutionError::Cancelled.to_string();
    return;
  }

  if finished.timed_out {
    fail(
      task,
      exit_code(&status),
      ExecutionError::Timeout {
        seconds: timeout.as_secs(),
      },
    );
    return;
  }

  if status.success() {
    task.status = TaskStatus::Completed;
    task.exit_code = 0;
    task.error.clear();
    return;
  }

  let code = exit_code(&status);
  let error = match status.signal() {
    Some(signal) => ExecutionError::Signaled { signal },
    None => ExecutionError::Exited { code },
  };
  fail(task, code, error);
}
