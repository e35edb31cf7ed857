use std::os::unix::prelude::RawFd;

use nix::{
  fcntl::OFlag,
  unistd::{self, close, pipe2},
};

use crate::error::SandboxError;

/// Close-on-exec pipe from the confined child back to the supervisor.
///
/// A successful exec closes the write end without writing anything, so an
/// empty read means the target program has been launched.
pub struct LaunchPipe(RawFd, RawFd);

pub struct LaunchReadPipe(RawFd);

pub struct LaunchWritePipe(RawFd);

impl LaunchPipe {
  pub fn new() -> Result<Self, SandboxError> {
    let result = pipe2(OFlag::O_CLOEXEC | OFlag::O_NONBLOCK)?;
    Ok(LaunchPipe(result.0, result.1))
  }

  pub fn read(self) -> Result<LaunchReadPipe, SandboxError> {
    let pipe = LaunchReadPipe(self.0);
    close(self.1)?;
    Ok(pipe)
  }

  pub fn write(self) -> Result<LaunchWritePipe, SandboxError> {
    let pipe = LaunchWritePipe(self.1);
    close(self.0)?;
    Ok(pipe)
  }
}

impl LaunchReadPipe {
  /// Read the failure message, only call it after the child is reaped
  pub fn read(self: &Self) -> Result<Option<String>, SandboxError> {
    let mut buf = vec![0 as u8; 1024];
    let size = unistd::read(self.0, buf.as_mut_slice())?;
    if size == 0 {
      return Ok(None);
    }
    buf.truncate(size);
    let text = String::from_utf8_lossy(&buf).trim_end().to_string();
    Ok(Some(text))
  }
}

impl Drop for LaunchReadPipe {
  fn drop(&mut self) {
    let _ = close(self.0);
  }
}

impl LaunchWritePipe {
  pub fn write<S: Into<String>>(self: &Self, text: S) -> Result<usize, SandboxError> {
    let text: String = text.into();
    let size = unistd::write(self.0, text.as_bytes())?;
    Ok(size)
  }
}

impl Drop for LaunchWritePipe {
  fn drop(&mut self) {
    let _ = close(self.0);
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn it_should_read_nothing_after_writer_closed() {
    let pipe = LaunchPipe::new().unwrap();
    let (read, write) = (LaunchReadPipe(pipe.0), LaunchWritePipe(pipe.1));
    drop(write);
    assert_eq!(read.read().unwrap(), None);
  }

  #[test]
  fn it_should_carry_failure_message() {
    let pipe = LaunchPipe::new().unwrap();
    let (read, write) = (LaunchReadPipe(pipe.0), LaunchWritePipe(pipe.1));
    write.write("Execvp fails: ENOENT\n").unwrap();
    drop(write);
    assert_eq!(read.read().unwrap(), Some("Execvp fails: ENOENT".to_string()));
  }
}
