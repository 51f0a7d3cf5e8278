//! Signals for task process groups.

use std::io;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Signal {
  Term,
  Kill,
}

impl Signal {
  fn to_libc(self) -> libc::c_int {
    match self {
      Signal::Term => libc::SIGTERM,
      Signal::Kill => libc::SIGKILL,
    }
  }
}

/// Send a signal to every process in the group led by `pgid`.
pub(crate) fn signal_group(pgid: i32, sig: Signal) -> io::Result<()> {
  // Negative pid addresses the process group.
  let ret = unsafe { libc::kill(-pgid, sig.to_libc()) };
  if ret != 0 {
    return Err(io::Error::last_os_error());
  }
  Ok(())
}
