use std::ffi::{CStr, CString};
use std::path::PathBuf;

use libc_stdhandle::{stderr, stdin, stdout};
use nix::errno::Errno;
use nix::libc::{self, freopen, FILE};
use nix::sys::resource::{setrlimit, Resource};
use nix::unistd::{chdir, execvp, setgid, setgroups, setuid, Gid, Uid};

use crate::error::LAUNCH_FAILURE_EXIT_CODE;
use crate::pipe::LaunchWritePipe;
use crate::utils::{into_c_string, MemoryLimitType, OutputLimitType, TimeLimitType};
use crate::{SandboxError, SandboxParams};

const NULL_DEVICE: &str = "/dev/null";

/// Everything the child needs, prepared before fork
pub(crate) struct Confiner {
  program: CString,
  stdin: CString,
  stdout: CString,
  stderr: CString,
  read_mode: CString,
  write_mode: CString,
  time_limit: TimeLimitType,
  time_limit_reserve: TimeLimitType,
  memory_limit: MemoryLimitType,
  memory_limit_reserve: MemoryLimitType,
  large_stack: bool,
  output_limit: OutputLimitType,
  process_limit: u64,
  root: PathBuf,
  uid: Uid,
  gid: Gid,
}

impl Confiner {
  pub(crate) fn new(params: &SandboxParams) -> Result<Self, SandboxError> {
    let redirect = |path: &Option<String>| into_c_string(path.as_deref().unwrap_or(NULL_DEVICE));

    Ok(Confiner {
      program: into_c_string(&params.program)?,
      stdin: redirect(&params.stdin)?,
      stdout: redirect(&params.stdout)?,
      stderr: redirect(&params.stderr)?,
      read_mode: into_c_string("r")?,
      write_mode: into_c_string("w")?,
      time_limit: params.time_limit,
      time_limit_reserve: params.time_limit_reserve,
      memory_limit: params.memory_limit,
      memory_limit_reserve: params.memory_limit_reserve,
      large_stack: params.large_stack,
      output_limit: params.output_limit,
      process_limit: params.process_limit,
      root: params.root.clone(),
      uid: params.uid,
      gid: params.gid,
    })
  }

  /// Run in the forked child, never returns.
  ///
  /// Exec replaces the process on success. Otherwise the first failure is
  /// sent through the pipe and the child exits with the reserved status.
  /// Other threads of the parent may hold the logger lock at fork, so
  /// nothing here logs.
  pub(crate) fn enter(&self, pipe: LaunchWritePipe) -> ! {
    let err = match self.confine() {
      Ok(_) => self.exec(),
      Err(err) => err,
    };
    let _ = pipe.write(err.to_string());
    unsafe { libc::_exit(LAUNCH_FAILURE_EXIT_CODE) }
  }

  fn confine(&self) -> Result<(), SandboxError> {
    self.set_resource_limit()?;

    chdir(self.root.as_path()).map_err(|errno| {
      SandboxError::confine(format!("Chdir {} fails: {}", self.root.to_string_lossy(), errno))
    })?;

    self.drop_privilege()?;

    self.redirect_io()
  }

  /// 调用 setrlimit
  fn set_resource_limit(&self) -> Result<(), SandboxError> {
    if self.time_limit > 0 {
      let time_limit = self.time_limit + self.time_limit_reserve;
      set_limit(Resource::RLIMIT_CPU, time_limit)?;
    }

    if self.memory_limit > 0 {
      let memory_limit = (self.memory_limit + self.memory_limit_reserve).saturating_mul(1024);
      set_limit(Resource::RLIMIT_AS, memory_limit)?;
      if self.large_stack {
        set_limit(Resource::RLIMIT_STACK, memory_limit)?;
      }
    }

    if self.output_limit > 0 {
      set_limit(Resource::RLIMIT_FSIZE, self.output_limit)?;
    }

    // Count the process itself
    if self.process_limit > 0 {
      set_limit(Resource::RLIMIT_NPROC, self.process_limit + 1)?;
    }

    Ok(())
  }

  /// Group must go first, setgid is not permitted once uid is dropped
  fn drop_privilege(&self) -> Result<(), SandboxError> {
    setgroups(&[self.gid])
      .map_err(|errno| SandboxError::confine(format!("Set groups fails: {}", errno)))?;
    setgid(self.gid)
      .map_err(|errno| SandboxError::confine(format!("Set gid {} fails: {}", self.gid, errno)))?;
    setuid(self.uid)
      .map_err(|errno| SandboxError::confine(format!("Set uid {} fails: {}", self.uid, errno)))?;
    Ok(())
  }

  /// 重定向输入输出
  fn redirect_io(&self) -> Result<(), SandboxError> {
    unsafe {
      reopen(&self.stdin, &self.read_mode, stdin())?;
      reopen(&self.stdout, &self.write_mode, stdout())?;
      reopen(&self.stderr, &self.write_mode, stderr())?;
    }
    Ok(())
  }

  fn exec(&self) -> SandboxError {
    match execvp(&self.program, &[self.program.as_c_str()]) {
      Ok(never) => match never {},
      Err(errno) => SandboxError::confine(format!(
        "Execvp {} fails: {}",
        self.program.to_string_lossy(),
        errno
      )),
    }
  }
}

fn set_limit(resource: Resource, value: u64) -> Result<(), SandboxError> {
  setrlimit(resource, value, value).map_err(|errno| {
    SandboxError::confine(format!("Set {:?} to {} fails: {}", resource, value, errno))
  })
}

unsafe fn reopen(path: &CStr, mode: &CStr, stream: *mut FILE) -> Result<(), SandboxError> {
  if freopen(path.as_ptr(), mode.as_ptr(), stream).is_null() {
    return Err(SandboxError::confine(format!(
      "Redirect {} fails: {}",
      path.to_string_lossy(),
      Errno::last()
    )));
  }
  Ok(())
}
