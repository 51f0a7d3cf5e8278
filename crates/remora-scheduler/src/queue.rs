use std::cmp::{Ordering, Reverse};
use std::collections::{BinaryHeap, HashMap};

use chrono::{DateTime, Utc};
use remora_task::Task;

/// Heap entry. Removal is lazy: a key whose `seq` no longer matches the
/// live entry for its id is skipped when popped.
#[derive(Debug, PartialEq, Eq)]
struct QueueKey {
  priority: i32,
  created_at: Option<DateTime<Utc>>,
  seq: u64,
  id: String,
}

impl Ord for QueueKey {
  fn cmp(&self, other: &Self) -> Ordering {
    self
      .priority
      .cmp(&other.priority)
      .then_with(|| self.created_at.cmp(&other.created_at))
      .then_with(|| self.seq.cmp(&other.seq))
  }
}

impl PartialOrd for QueueKey {
  fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
    Some(self.cmp(other))
  }
}

/// Pending tasks ordered by priority (lower first), then creation time,
/// then insertion order. Holds at most one task per id.
#[derive(Debug, Default)]
pub struct TaskQueue {
  heap: BinaryHeap<Reverse<QueueKey>>,
  entries: HashMap<String, (u64, Task)>,
  next_seq: u64,
}

impl TaskQueue {
  pub fn new() -> Self {
    Self::default()
  }

  /// Enqueue `task`. Returns false, leaving the queue unchanged, when a
  /// task with the same id is already queued.
  pub fn push(&mut self, task: Task) -> bool {
    if self.entries.contains_key(&task.id) {
      return false;
    }

    let seq = self.next_seq;
    self.next_seq += 1;
    self.heap.push(Reverse(QueueKey {
      priority: task.priority,
      created_at: task.created_at,
      seq,
      id: task.id.clone(),
    }));
    self.entries.insert(task.id.clone(), (seq, task));
    true
  }

  pub fn pop(&mut self) -> Option<Task> {
    while let Some(Reverse(key)) = self.heap.pop() {
      let live = matches!(self.entries.get(&key.id), Some((seq, _)) if *seq == key.seq);
      if live {
        return self.entries.remove(&key.id).map(|(_, task)| task);
      }
    }
    None
  }

  pub fn remove(&mut self, task_id: &str) -> Option<Task> {
    let (_, task) = self.entries.remove(task_id)?;
    if self.heap.len() > 2 * self.entries.len() + 64 {
      self.compact();
    }
    Some(task)
  }

  pub fn contains(&self, task_id: &str) -> bool {
    self.entries.contains_key(task_id)
  }

  pub fn len(&self) -> usize {
    self.entries.len()
  }

  pub fn is_empty(&self) -> bool {
    self.entries.is_empty()
  }

  fn compact(&mut self) {
    let entries = &self.entries;
    self
      .heap
      .retain(|Reverse(key)| matches!(entries.get(&key.id), Some((seq, _)) if *seq == key.seq));
  }
}
