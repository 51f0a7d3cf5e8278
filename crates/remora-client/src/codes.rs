/// Business codes the authority returns in the `code` field of a rejection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteCode {
  /// The `attempt_id` does not match the current lease holder.
  AttemptMismatch,
  /// The task is already terminal and cannot change.
  TaskImmutable,
  LeaseExpired,
  TaskNotFound,
  InvalidParams,
  Internal,
}

impl RemoteCode {
  pub fn from_code(code: i64) -> Option<Self> {
    match code {
      30001 => Some(Self::AttemptMismatch),
      30002 => Some(Self::TaskImmutable),
      30003 => Some(Self::LeaseExpired),
      30004 => Some(Self::TaskNotFound),
      30005 => Some(Self::InvalidParams),
      30099 => Some(Self::Internal),
      _ => None,
    }
  }

  pub fn code(self) -> i64 {
    match self {
      Self::AttemptMismatch => 30001,
      Self::TaskImmutable => 30002,
      Self::LeaseExpired => 30003,
      Self::TaskNotFound => 30004,
      Self::InvalidParams => 30005,
      Self::Internal => 30099,
    }
  }

  /// Whether the rejection means this agent no longer holds the attempt.
  pub fn is_lease_lost(self) -> bool {
    matches!(
      self,
      Self::AttemptMismatch | Self::LeaseExpired | Self::TaskImmutable | Self::TaskNotFound
    )
  }
}
