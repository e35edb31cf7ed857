use std::{
  error::Error,
  fmt::{Debug, Display},
  process::{ExitCode, Termination},
};

use flexi_logger::FlexiLoggerError;
use nix::errno::Errno;

/// Exit status when the caller is not privileged enough
pub const USAGE_EXIT_CODE: u8 = 1;

/// Exit status when the result file can not be opened
pub const RESULT_FILE_EXIT_CODE: u8 = 255;

/// Exit status reserved for the child when confinement or exec fails
pub const LAUNCH_FAILURE_EXIT_CODE: i32 = 253;

pub enum SandboxError {
  Usage(String),
  Privilege(String),
  ResultFile(String),
  Fork(String),
  Confine(String),
  Report(String),
  Nix(Errno),
  Fs(String),
  Logger(FlexiLoggerError),
}

pub enum SandboxExit {
  Ok,
  Err(SandboxError),
}

impl SandboxError {
  pub fn usage<MS: Into<String>>(msg: MS) -> SandboxError {
    SandboxError::Usage(msg.into())
  }

  pub fn privilege<MS: Into<String>>(msg: MS) -> SandboxError {
    SandboxError::Privilege(msg.into())
  }

  pub fn result_file<MS: Into<String>>(msg: MS) -> SandboxError {
    SandboxError::ResultFile(msg.into())
  }

  pub fn fork<MS: Into<String>>(msg: MS) -> SandboxError {
    SandboxError::Fork(msg.into())
  }

  pub fn confine<MS: Into<String>>(msg: MS) -> SandboxError {
    SandboxError::Confine(msg.into())
  }

  pub fn report<MS: Into<String>>(msg: MS) -> SandboxError {
    SandboxError::Report(msg.into())
  }

  /// Process exit status reported for this error
  pub fn exit_code(&self) -> u8 {
    match self {
      SandboxError::ResultFile(_) => RESULT_FILE_EXIT_CODE,
      _ => USAGE_EXIT_CODE,
    }
  }
}

impl Debug for SandboxError {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    std::fmt::Display::fmt(&self, f)
  }
}

impl Display for SandboxError {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match &self {
      SandboxError::Usage(msg) => f.write_fmt(format_args!("Sandbox Usage Error: {}", msg)),
      SandboxError::Privilege(msg) => f.write_fmt(format_args!("Sandbox Privilege Error: {}", msg)),
      SandboxError::ResultFile(msg) => {
        f.write_fmt(format_args!("Sandbox Result File Error: {}", msg))
      }
      SandboxError::Fork(msg) => f.write_fmt(format_args!("Sandbox Fork Error: {}", msg)),
      SandboxError::Confine(msg) => f.write_fmt(format_args!("Sandbox Confine Error: {}", msg)),
      SandboxError::Report(msg) => f.write_fmt(format_args!("Sandbox Report Error: {}", msg)),
      SandboxError::Nix(errno) => f.write_fmt(format_args!("Sandbox Nix Error: {}", errno)),
      SandboxError::Fs(msg) => f.write_fmt(format_args!("Sandbox File System Error: {}", msg)),
      SandboxError::Logger(err) => f.write_fmt(format_args!("Sandbox Logger Error: {}", err)),
    }
  }
}

impl From<Errno> for SandboxError {
  fn from(errno: Errno) -> Self {
    SandboxError::Nix(errno)
  }
}

impl From<std::io::Error> for SandboxError {
  fn from(err: std::io::Error) -> Self {
    SandboxError::Fs(err.to_string())
  }
}

impl From<FlexiLoggerError> for SandboxError {
  fn from(err: FlexiLoggerError) -> Self {
    SandboxError::Logger(err)
  }
}

impl Error for SandboxError {}

impl<T> From<Result<T, SandboxError>> for SandboxExit {
  fn from(result: Result<T, SandboxError>) -> Self {
    match result {
      Ok(_) => SandboxExit::Ok,
      Err(err) => SandboxExit::Err(err),
    }
  }
}

impl Termination for SandboxExit {
  fn report(self) -> ExitCode {
    match self {
      SandboxExit::Ok => ExitCode::SUCCESS,
      SandboxExit::Err(err) => {
        eprintln!("{}", err);
        ExitCode::from(err.exit_code())
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn it_should_distinguish_result_file_error() {
    assert_eq!(SandboxError::result_file("/root/result.txt").exit_code(), 255);
    assert_eq!(SandboxError::privilege("need root").exit_code(), 1);
    assert_eq!(SandboxError::fork("EAGAIN").exit_code(), 1);
  }

  #[test]
  fn it_should_format_with_prefix() {
    let err = SandboxError::from(Errno::ENOENT);
    assert!(format!("{}", err).starts_with("Sandbox Nix Error: "));
    let err = SandboxError::confine("chdir /sandbox fails");
    assert_eq!(format!("{}", err), "Sandbox Confine Error: chdir /sandbox fails");
  }
}
