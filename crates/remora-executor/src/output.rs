use std::io;

/// Appended once to captured output that hit the ceiling.
pub const TRUNCATION_MARKER: &str = "\n...[truncated, output exceeded 1MB limit]";

/// Fixed-capacity sink for a child's output stream.
///
/// Writes never fail and never block: bytes past the limit are discarded and
/// the buffer remembers that it dropped something.
#[derive(Debug)]
pub struct OutputBuffer {
  buf: Vec<u8>,
  limit: usize,
  dropped: bool,
}

impl OutputBuffer {
  pub fn new(limit: usize) -> Self {
    Self {
      buf: Vec::new(),
      limit,
      dropped: false,
    }
  }

  pub fn len(&self) -> usize {
    self.buf.len()
  }

  pub fn is_empty(&self) -> bool {
    self.buf.is_empty()
  }

  pub fn is_truncated(&self) -> bool {
    self.dropped
  }

  /// Captured text, lossily decoded, with the marker if anything was dropped.
  ///
  /// A character split by the limit is dropped whole, so the text before
  /// the marker never exceeds the limit.
  pub fn to_string_lossy(&self) -> String {
    let kept = if self.dropped {
      trim_partial_char(&self.buf)
    } else {
      &self.buf[..]
    };
    let mut text = String::from_utf8_lossy(kept).into_owned();
    if self.dropped {
      text.push_str(TRUNCATION_MARKER);
    }
    text
  }
}

/// Strip an incomplete UTF-8 sequence from the end of `bytes`.
fn trim_partial_char(bytes: &[u8]) -> &[u8] {
  // A sequence is at most 4 bytes; only its tail can be cut.
  let tail_start = bytes.len().saturating_sub(3);
  for start in (tail_start..bytes.len()).rev() {
    let width = match bytes[start] {
      b if b & 0b1100_0000 == 0b1000_0000 => continue,
      b if b & 0b1110_0000 == 0b1100_0000 => 2,
      b if b & 0b1111_0000 == 0b1110_0000 => 3,
      b if b & 0b1111_1000 == 0b1111_0000 => 4,
      _ => return bytes,
    };
    return if bytes.len() - start < width {
      &bytes[..start]
    } else {
      bytes
    };
  }
  bytes
}

impl io::Write for OutputBuffer {
  fn write(&mut self, data: &[u8]) -> io::Result<usize> {
    let remaining = self.limit.saturating_sub(self.buf.len());
    if remaining == 0 {
      if !data.is_empty() {
        self.dropped = true;
      }
      return Ok(data.len());
    }

    if data.len() > remaining {
      self.dropped = true;
      self.buf.extend_from_slice(&data[..remaining]);
      return Ok(remaining);
    }

    self.buf.extend_from_slice(data);
    Ok(data.len())
  }

  fn flush(&mut self) -> io::Result<()> {
    Ok(())
  }
}
