use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use remora_client::{AgentApi, ClientError, Operation};
use remora_store::{SqliteStore, Store};
use remora_syncer::{SyncReport, Syncer};
use remora_task::{Task, TaskStatus};

/// Authority that acknowledges everything except the ids in `reject`, and
/// can be switched offline.
#[derive(Default)]
struct FakeAuthority {
  completed: Mutex<Vec<String>>,
  reject: HashSet<String>,
  offline: AtomicBool,
}

#[async_trait]
impl AgentApi for FakeAuthority {
  async fn claim_tasks(&self, _: usize) -> Result<Vec<Task>, ClientError> {
    Ok(Vec::new())
  }

  async fn report_start(&self, _: &str, _: &str) -> Result<(), ClientError> {
    Ok(())
  }

  async fn renew_lease(&self, _: &str, _: &str) -> Result<(), ClientError> {
    Ok(())
  }

  async fn report_complete(&self, task: &Task) -> Result<(), ClientError> {
    if self.offline.load(Ordering::SeqCst) {
      // reqwest errors cannot be built by hand; an internal error stands in.
      return Err(ClientError::Rejected {
        operation: Operation::Complete,
        code: 30099,
        message: "unavailable".to_string(),
      });
    }
    if self.reject.contains(&task.id) {
      return Err(ClientError::Rejected {
        operation: Operation::Complete,
        code: 30001,
        message: "attempt mismatch".to_string(),
      });
    }
    self.completed.lock().unwrap().push(task.id.clone());
    Ok(())
  }
}

async fn open_store() -> (tempfile::TempDir, Arc<SqliteStore>) {
  let dir = tempfile::tempdir().unwrap();
  let store = SqliteStore::open(dir.path().join("tasks.db")).await.unwrap();
  (dir, Arc::new(store))
}

fn finished(id: &str, attempt_id: &str) -> Task {
  let mut task = Task::new(id, "echo hi");
  task.status = TaskStatus::Completed;
  task.attempt_id = attempt_id.to_string();
  task.stdout = "hi\n".to_string();
  task.ended_at = Some(chrono::Utc::now());
  task
}

#[tokio::test]
async fn test_reports_unsynced_and_marks_them() {
  let (_dir, store) = open_store().await;
  store.save(&finished("a", "att-a")).await.unwrap();
  store.save(&finished("b", "att-b")).await.unwrap();

  let authority = Arc::new(FakeAuthority::default());
  let syncer = Syncer::new(store.clone(), authority.clone(), Duration::from_secs(30));

  let report = syncer.sync_once().await;
  assert_eq!(
    report,
    SyncReport {
      reported: 2,
      skipped: 0,
      failed: 0
    }
  );
  assert!(store.get("a").await.unwrap().synced);
  assert!(store.get("b").await.unwrap().synced);

  // Synced results are never sent again.
  assert_eq!(syncer.sync_once().await, SyncReport::default());
  assert_eq!(authority.completed.lock().unwrap().len(), 2);
}

#[tokio::test]
async fn test_unclaimed_task_is_marked_without_request() {
  let (_dir, store) = open_store().await;
  store.save(&finished("local", "")).await.unwrap();

  let authority = Arc::new(FakeAuthority::default());
  let syncer = Syncer::new(store.clone(), authority.clone(), Duration::from_secs(30));

  let report = syncer.sync_once().await;
  assert_eq!(report.skipped, 1);
  assert_eq!(report.failed, 0);
  assert!(authority.completed.lock().unwrap().is_empty());
  assert!(store.get("local").await.unwrap().synced);
}

#[tokio::test]
async fn test_failure_does_not_abort_pass() {
  let (_dir, store) = open_store().await;
  store.save(&finished("bad", "att-bad")).await.unwrap();
  store.save(&finished("good", "att-good")).await.unwrap();

  let authority = Arc::new(FakeAuthority {
    reject: HashSet::from(["bad".to_string()]),
    ..Default::default()
  });
  let syncer = Syncer::new(store.clone(), authority.clone(), Duration::from_secs(30));

  let report = syncer.sync_once().await;
  assert_eq!(report.reported, 1);
  assert_eq!(report.failed, 1);
  assert!(!store.get("bad").await.unwrap().synced);
  assert!(store.get("good").await.unwrap().synced);
}

#[tokio::test]
async fn test_results_survive_outage() {
  let (_dir, store) = open_store().await;
  store.save(&finished("a", "att-a")).await.unwrap();

  let authority = Arc::new(FakeAuthority::default());
  authority.offline.store(true, Ordering::SeqCst);
  let syncer = Syncer::new(store.clone(), authority.clone(), Duration::from_secs(30));

  assert_eq!(syncer.sync_once().await.failed, 1);
  assert!(!store.get("a").await.unwrap().synced);

  authority.offline.store(false, Ordering::SeqCst);
  assert_eq!(syncer.sync_once().await.reported, 1);
  assert!(store.get("a").await.unwrap().synced);
}

#[tokio::test]
async fn test_start_syncs_immediately() {
  let (_dir, store) = open_store().await;
  store.save(&finished("a", "att-a")).await.unwrap();

  let authority = Arc::new(FakeAuthority::default());
  let syncer = Syncer::new(store.clone(), authority.clone(), Duration::from_secs(3600));

  syncer.start();
  syncer.start();
  for _ in 0..100 {
    if store.get("a").await.unwrap().synced {
      break;
    }
    tokio::time::sleep(Duration::from_millis(20)).await;
  }
  syncer.stop().await;
  syncer.stop().await;

  assert!(store.get("a").await.unwrap().synced);
  assert_eq!(*authority.completed.lock().unwrap(), vec!["a"]);
}
