use std::path::PathBuf;

use log::debug;
use nix::unistd::{Gid, Uid};

use crate::utils::{MemoryLimitType, OutputLimitType, TimeLimitType};

/// Default working directory of the target program
pub const SANDBOX_ROOT: &str = "/sandbox";

/// Default uid of the sandbox identity
pub const SANDBOX_UID: u32 = 1111;

/// Default gid of the sandbox identity
pub const SANDBOX_GID: u32 = 1111;

/// Default time limit reserve (unit: second)
pub const TIME_LIMIT_RESERVE: TimeLimitType = 1;

/// Default memory limit reserve (unit: KB)
pub const MEMORY_LIMIT_RESERVE: MemoryLimitType = 32 * 1024;

/// Sandbox running params for one target program.
///
/// All the numeric limits use `0` for unlimited.
#[derive(Debug, Clone)]
pub struct SandboxParams {
  pub(crate) program: String,
  pub(crate) stdin: Option<String>,
  pub(crate) stdout: Option<String>,
  pub(crate) stderr: Option<String>,
  /// Time limit (unit: second)
  pub(crate) time_limit: TimeLimitType,
  pub(crate) time_limit_reserve: TimeLimitType,
  /// Memory limit (unit: KB)
  pub(crate) memory_limit: MemoryLimitType,
  pub(crate) memory_limit_reserve: MemoryLimitType,
  pub(crate) large_stack: bool,
  /// Output limit (unit: byte)
  pub(crate) output_limit: OutputLimitType,
  pub(crate) process_limit: u64,
  pub(crate) result: PathBuf,
  pub(crate) root: PathBuf,
  pub(crate) uid: Uid,
  pub(crate) gid: Gid,
}

impl SandboxParams {
  pub fn new<PS: Into<String>, RP: Into<PathBuf>>(program: PS, result: RP) -> Self {
    SandboxParams {
      program: program.into(),
      stdin: None,
      stdout: None,
      stderr: None,
      time_limit: 0,
      time_limit_reserve: TIME_LIMIT_RESERVE,
      memory_limit: 0,
      memory_limit_reserve: MEMORY_LIMIT_RESERVE,
      large_stack: false,
      output_limit: 0,
      process_limit: 0,
      result: result.into(),
      root: PathBuf::from(SANDBOX_ROOT),
      uid: Uid::from_raw(SANDBOX_UID),
      gid: Gid::from_raw(SANDBOX_GID),
    }
  }

  /// Set stdin redirection, `None` or an empty path means `/dev/null`
  pub fn stdin<PS: Into<String>>(self: &mut Self, path: Option<PS>) -> &mut Self {
    self.stdin = non_empty(path);
    self
  }

  /// Set stdout redirection, `None` or an empty path means `/dev/null`
  pub fn stdout<PS: Into<String>>(self: &mut Self, path: Option<PS>) -> &mut Self {
    self.stdout = non_empty(path);
    self
  }

  /// Set stderr redirection, `None` or an empty path means `/dev/null`
  pub fn stderr<PS: Into<String>>(self: &mut Self, path: Option<PS>) -> &mut Self {
    self.stderr = non_empty(path);
    self
  }

  /// Set time limit and its reserve (unit: second)
  pub fn time_limit(self: &mut Self, value: TimeLimitType, reserve: TimeLimitType) -> &mut Self {
    self.time_limit = value;
    self.time_limit_reserve = reserve;
    self
  }

  /// Set memory limit and its reserve (unit: KB)
  pub fn memory_limit(
    self: &mut Self,
    value: MemoryLimitType,
    reserve: MemoryLimitType,
  ) -> &mut Self {
    self.memory_limit = value;
    self.memory_limit_reserve = reserve;
    self
  }

  /// Raise the stack limit to the memory limit
  pub fn large_stack(self: &mut Self, flag: bool) -> &mut Self {
    self.large_stack = flag;
    self
  }

  /// Set output limit (unit: byte)
  pub fn output_limit(self: &mut Self, value: OutputLimitType) -> &mut Self {
    self.output_limit = value;
    self
  }

  /// Set the max number of child processes
  pub fn process_limit(self: &mut Self, value: u64) -> &mut Self {
    self.process_limit = value;
    self
  }

  /// Set the working directory of the target program
  pub fn root<P: Into<PathBuf>>(self: &mut Self, path: P) -> &mut Self {
    self.root = path.into();
    self
  }

  pub fn uid(self: &mut Self, uid: u32) -> &mut Self {
    self.uid = Uid::from_raw(uid);
    self
  }

  pub fn gid(self: &mut Self, gid: u32) -> &mut Self {
    self.gid = Gid::from_raw(gid);
    self
  }

  /// Wall clock seconds the watchdog waits, also the reported time after it fires
  pub fn time_limit_to_watch(&self) -> TimeLimitType {
    self.time_limit + self.time_limit_reserve
  }

  pub(crate) fn log(&self) {
    debug!("Program: {}", self.program);
    debug!("Standard input file: {:?}", self.stdin);
    debug!("Standard output file: {:?}", self.stdout);
    debug!("Standard error file: {:?}", self.stderr);
    debug!(
      "Time limit (seconds): {} + {}",
      self.time_limit, self.time_limit_reserve
    );
    debug!(
      "Memory limit (kilobytes): {} + {}",
      self.memory_limit, self.memory_limit_reserve
    );
    debug!("Large stack: {}", self.large_stack);
    debug!("Output limit (bytes): {}", self.output_limit);
    debug!("Process limit: {}", self.process_limit);
    debug!("Sandbox root: {}", self.root.to_string_lossy());
    debug!("Sandbox identity: uid {} gid {}", self.uid, self.gid);
    debug!("Result file: {}", self.result.to_string_lossy());
  }
}

fn non_empty<PS: Into<String>>(path: Option<PS>) -> Option<String> {
  path.map(|p| p.into()).filter(|p: &String| !p.is_empty())
}
