use std::fmt::{Display, Formatter};
use std::fs;
use std::io::Write;
use std::path::Path;

use nix::errno::Errno;
use nix::sys::signal::Signal;

use crate::utils::{MemoryLimitType, TimeLimitType};
use crate::SandboxError;

/// Classification of one sandboxed run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SandboxStatus {
  ExitedNormally,
  RuntimeError,
  TimeLimitExceeded,
  OutputLimitExceeded,
  MemoryLimitExceeded,
  /// Confinement or exec failed before the target program started
  LaunchFailed,
}

/// The classified outcome of one run, written once to the result file
#[derive(Debug, Clone)]
pub struct Verdict {
  status: SandboxStatus,
  exit_code: Option<i32>,
  signal: Option<i32>,
  /// Unit: microsecond
  time: TimeLimitType,
  /// Unit: KB
  memory: MemoryLimitType,
  diagnostic: String,
}

/// Verdict read back from a result file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SandboxReport {
  pub status: SandboxStatus,
  pub debug_info: String,
  pub time_usage: TimeLimitType,
  pub memory_usage: MemoryLimitType,
}

impl SandboxStatus {
  const ALL: [SandboxStatus; 6] = [
    SandboxStatus::ExitedNormally,
    SandboxStatus::RuntimeError,
    SandboxStatus::TimeLimitExceeded,
    SandboxStatus::OutputLimitExceeded,
    SandboxStatus::MemoryLimitExceeded,
    SandboxStatus::LaunchFailed,
  ];

  pub fn label(&self) -> &'static str {
    match self {
      SandboxStatus::ExitedNormally => "Exited Normally",
      SandboxStatus::RuntimeError => "Runtime Error",
      SandboxStatus::TimeLimitExceeded => "Time Limit Exceeded",
      SandboxStatus::OutputLimitExceeded => "Output Limit Exceeded",
      SandboxStatus::MemoryLimitExceeded => "Memory Limit Exceeded",
      SandboxStatus::LaunchFailed => "Launch Failed",
    }
  }

  pub fn from_label(label: &str) -> Option<Self> {
    Self::ALL.into_iter().find(|status| status.label() == label)
  }
}

impl Display for SandboxStatus {
  fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
    f.write_str(self.label())
  }
}

impl Verdict {
  pub(crate) fn exited(
    status: SandboxStatus,
    code: i32,
    time: TimeLimitType,
    memory: MemoryLimitType,
  ) -> Self {
    Verdict {
      status,
      exit_code: Some(code),
      signal: None,
      time,
      memory,
      diagnostic: format!("WIFEXITED - WEXITSTATUS() = {}", code),
    }
  }

  pub(crate) fn signaled(
    status: SandboxStatus,
    signal: i32,
    time: TimeLimitType,
    memory: MemoryLimitType,
  ) -> Self {
    Verdict {
      status,
      exit_code: None,
      signal: Some(signal),
      time,
      memory,
      diagnostic: format!(
        "WIFSIGNALED - WTERMSIG() = {} ({})",
        signal,
        signal_name(signal)
      ),
    }
  }

  /// `wait4` failed, nothing is known about the child
  pub(crate) fn wait_failed(errno: Errno) -> Self {
    Verdict {
      status: SandboxStatus::RuntimeError,
      exit_code: None,
      signal: None,
      time: 0,
      memory: 0,
      diagnostic: format!("wait4() = -1 ({})", errno),
    }
  }

  pub(crate) fn launch_failed<MS: Into<String>>(
    message: MS,
    exit_code: Option<i32>,
    time: TimeLimitType,
    memory: MemoryLimitType,
  ) -> Self {
    // The result file is line based
    let message: String = message.into();
    let message = message.lines().collect::<Vec<&str>>().join(" ");
    Verdict {
      status: SandboxStatus::LaunchFailed,
      exit_code,
      signal: None,
      time,
      memory,
      diagnostic: message,
    }
  }

  pub fn status(&self) -> SandboxStatus {
    self.status
  }

  pub fn exit_code(&self) -> Option<i32> {
    self.exit_code
  }

  pub fn signal(&self) -> Option<Signal> {
    self.signal.and_then(|signal| Signal::try_from(signal).ok())
  }

  pub fn raw_signal(&self) -> Option<i32> {
    self.signal
  }

  /// CPU time (unit: microsecond)
  pub fn time(&self) -> TimeLimitType {
    self.time
  }

  /// Peak resident memory (unit: KB)
  pub fn memory(&self) -> MemoryLimitType {
    self.memory
  }

  pub fn diagnostic(&self) -> &str {
    &self.diagnostic
  }

  /// Write the four result lines and flush
  pub fn write_to<W: Write>(&self, w: &mut W) -> std::io::Result<()> {
    write!(w, "{}", self)?;
    w.flush()
  }
}

impl Display for Verdict {
  fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
    writeln!(f, "{}", self.status)?;
    writeln!(f, "{}", self.diagnostic)?;
    writeln!(f, "{}", self.time)?;
    writeln!(f, "{}", self.memory)
  }
}

impl SandboxReport {
  pub fn parse(text: &str) -> Result<Self, SandboxError> {
    let lines = text.lines().collect::<Vec<&str>>();
    if lines.len() != 4 {
      return Err(SandboxError::report(format!(
        "expect 4 lines, found {}",
        lines.len()
      )));
    }

    let status = SandboxStatus::from_label(lines[0])
      .ok_or_else(|| SandboxError::report(format!("unknown status {:?}", lines[0])))?;
    let time_usage = lines[2]
      .parse::<TimeLimitType>()
      .map_err(|err| SandboxError::report(format!("bad time usage {:?}: {}", lines[2], err)))?;
    let memory_usage = lines[3]
      .parse::<MemoryLimitType>()
      .map_err(|err| SandboxError::report(format!("bad memory usage {:?}: {}", lines[3], err)))?;

    Ok(SandboxReport {
      status,
      debug_info: lines[1].to_string(),
      time_usage,
      memory_usage,
    })
  }

  pub fn read<P: AsRef<Path>>(path: P) -> Result<Self, SandboxError> {
    let text = fs::read_to_string(path)?;
    Self::parse(&text)
  }
}

impl From<&Verdict> for SandboxReport {
  fn from(verdict: &Verdict) -> Self {
    SandboxReport {
      status: verdict.status,
      debug_info: verdict.diagnostic.clone(),
      time_usage: verdict.time,
      memory_usage: verdict.memory,
    }
  }
}

fn signal_name(signal: i32) -> &'static str {
  match Signal::try_from(signal) {
    Ok(signal) => signal.as_str(),
    Err(_) => "SIGRT",
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn it_should_write_four_lines() {
    let verdict = Verdict::exited(SandboxStatus::ExitedNormally, 0, 1200, 3456);
    let mut buf = vec![];
    verdict.write_to(&mut buf).unwrap();
    assert_eq!(
      String::from_utf8(buf).unwrap(),
      "Exited Normally\nWIFEXITED - WEXITSTATUS() = 0\n1200\n3456\n"
    );
  }

  #[test]
  fn it_should_name_signal() {
    let verdict = Verdict::signaled(SandboxStatus::TimeLimitExceeded, 24, 3000000, 512);
    assert_eq!(verdict.diagnostic(), "WIFSIGNALED - WTERMSIG() = 24 (SIGXCPU)");
    assert_eq!(verdict.signal(), Some(Signal::SIGXCPU));
    assert_eq!(verdict.exit_code(), None);
  }

  #[test]
  fn it_should_zero_wait_failure() {
    let verdict = Verdict::wait_failed(Errno::ECHILD);
    assert_eq!(verdict.status(), SandboxStatus::RuntimeError);
    let text = verdict.to_string();
    let lines = text.lines().collect::<Vec<&str>>();
    assert_eq!(lines.len(), 4);
    assert!(lines[1].starts_with("wait4() = -1"));
    assert_eq!(lines[2], "0");
    assert_eq!(lines[3], "0");
  }

  #[test]
  fn it_should_keep_launch_failure_on_one_line() {
    let verdict = Verdict::launch_failed("Execvp fails:\nENOENT", Some(253), 0, 0);
    assert_eq!(verdict.diagnostic(), "Execvp fails: ENOENT");
    assert_eq!(verdict.to_string().lines().count(), 4);
  }

  #[test]
  fn it_should_parse_written_report() {
    let verdict = Verdict::signaled(SandboxStatus::OutputLimitExceeded, 25, 1024, 2048);
    let report = SandboxReport::parse(&verdict.to_string()).unwrap();
    assert_eq!(report, SandboxReport::from(&verdict));
    assert_eq!(report.debug_info, "WIFSIGNALED - WTERMSIG() = 25 (SIGXFSZ)");
  }

  #[test]
  fn it_should_reject_malformed_report() {
    assert!(SandboxReport::parse("Accepted\n\n0\n0\n").is_err());
    assert!(SandboxReport::parse("Runtime Error\nx\n0\n").is_err());
    assert!(SandboxReport::parse("Runtime Error\nx\n-1\n0\n").is_err());
  }

  #[test]
  fn it_should_map_every_label_back() {
    for status in SandboxStatus::ALL {
      assert_eq!(SandboxStatus::from_label(status.label()), Some(status));
    }
  }
}
