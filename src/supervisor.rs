use std::mem::MaybeUninit;

use log::{debug, info};
use nix::errno::Errno;
use nix::libc;
use nix::sys::signal::Signal;
use nix::sys::time::TimeVal;
use nix::unistd::Pid;

use crate::utils::{MemoryLimitType, TimeLimitType};
use crate::verdict::{SandboxStatus, Verdict};
use crate::SandboxParams;

/// How the child terminated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Termination {
  Exited(i32),
  Signaled(i32),
}

/// Resource usage of the reaped child
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct SandboxUsage {
  /// User CPU time (unit: microsecond)
  time_user: TimeLimitType,
  /// Peak resident set size (unit: KB)
  max_rss: MemoryLimitType,
}

impl SandboxUsage {
  pub(crate) fn new(time_user: TimeLimitType, max_rss: MemoryLimitType) -> Self {
    SandboxUsage { time_user, max_rss }
  }

  pub(crate) fn time_user(&self) -> TimeLimitType {
    self.time_user
  }

  pub(crate) fn max_rss(&self) -> MemoryLimitType {
    self.max_rss
  }
}

/// Block until the child terminates without reaping it.
///
/// The zombie keeps its pid reserved, so a watchdog kill racing with a
/// natural exit can never hit an unrelated process.
pub(crate) fn wait_exit(child: Pid) -> Result<(), Errno> {
  loop {
    let mut info = MaybeUninit::<libc::siginfo_t>::zeroed();
    let ret = unsafe {
      libc::waitid(
        libc::P_PID,
        child.as_raw() as libc::id_t,
        info.as_mut_ptr(),
        libc::WEXITED | libc::WNOWAIT,
      )
    };
    if ret == 0 {
      return Ok(());
    }
    match Errno::last() {
      Errno::EINTR => continue,
      errno => return Err(errno),
    }
  }
}

/// Reap the child, collecting its own rusage
pub(crate) fn wait_child(child: Pid) -> Result<(Termination, SandboxUsage), Errno> {
  let mut status: libc::c_int = 0;
  let mut rusage = MaybeUninit::<libc::rusage>::zeroed();

  let termination = loop {
    let ret = unsafe { libc::wait4(child.as_raw(), &mut status, 0, rusage.as_mut_ptr()) };
    if ret == -1 {
      match Errno::last() {
        Errno::EINTR => continue,
        errno => return Err(errno),
      }
    }

    if libc::WIFEXITED(status) {
      break Termination::Exited(libc::WEXITSTATUS(status));
    }
    if libc::WIFSIGNALED(status) {
      break Termination::Signaled(libc::WTERMSIG(status));
    }
    // Stopped or continued, keep waiting
  };

  let rusage = unsafe { rusage.assume_init() };
  let time_user = TimeVal::from(rusage.ru_utime);
  let usage = SandboxUsage::new(microseconds(time_user), rusage.ru_maxrss.max(0) as u64);
  debug!("usage.user_time: {}", time_user);
  debug!("usage.max_rss: {}", usage.max_rss());

  Ok((termination, usage))
}

/// Map the raw termination onto a verdict.
///
/// Time causes win over output causes, which win over memory causes.
pub(crate) fn classify(
  params: &SandboxParams,
  termination: Termination,
  usage: SandboxUsage,
  watchdog_fired: bool,
) -> Verdict {
  let time = if watchdog_fired {
    params.time_limit_to_watch().saturating_mul(1_000_000)
  } else {
    usage.time_user()
  };
  let memory = usage.max_rss();

  match termination {
    Termination::Exited(0) => Verdict::exited(SandboxStatus::ExitedNormally, 0, time, memory),
    Termination::Exited(code) => {
      info!("Child process exited with status {}", code);
      Verdict::exited(SandboxStatus::RuntimeError, code, time, memory)
    }
    Termination::Signaled(signal) => {
      info!("Child process is signaled by {}", signal);

      let time_limit = params.time_limit.saturating_mul(1_000_000);
      let status = if signal == Signal::SIGXCPU as i32
        || (params.time_limit > 0 && usage.time_user() > time_limit)
        || watchdog_fired
      {
        SandboxStatus::TimeLimitExceeded
      } else if signal == Signal::SIGXFSZ as i32 {
        SandboxStatus::OutputLimitExceeded
      } else if params.memory_limit > 0 && usage.max_rss() > params.memory_limit {
        SandboxStatus::MemoryLimitExceeded
      } else {
        SandboxStatus::RuntimeError
      };

      Verdict::signaled(status, signal, time, memory)
    }
  }
}

fn microseconds(val: TimeVal) -> u64 {
  (val.tv_sec() * 1_000_000 + val.tv_usec()).max(0) as u64
}

#[cfg(test)]
mod tests {
  use super::*;

  fn params() -> SandboxParams {
    let mut params = SandboxParams::new("./a.out", "/root/result.txt");
    params.time_limit(1, 1).memory_limit(65536, 32768).output_limit(1024);
    params
  }

  fn usage(time_user: u64, max_rss: u64) -> SandboxUsage {
    SandboxUsage::new(time_user, max_rss)
  }

  const SIGKILL: i32 = Signal::SIGKILL as i32;
  const SIGSEGV: i32 = Signal::SIGSEGV as i32;
  const SIGXCPU: i32 = Signal::SIGXCPU as i32;
  const SIGXFSZ: i32 = Signal::SIGXFSZ as i32;

  #[test]
  fn it_should_accept_zero_exit() {
    let verdict = classify(&params(), Termination::Exited(0), usage(1500, 2048), false);
    assert_eq!(verdict.status(), SandboxStatus::ExitedNormally);
    assert_eq!(verdict.exit_code(), Some(0));
    assert_eq!(verdict.time(), 1500);
    assert_eq!(verdict.memory(), 2048);
  }

  #[test]
  fn it_should_treat_nonzero_exit_as_runtime_error() {
    let verdict = classify(&params(), Termination::Exited(3), usage(10, 10), false);
    assert_eq!(verdict.status(), SandboxStatus::RuntimeError);
    assert_eq!(verdict.diagnostic(), "WIFEXITED - WEXITSTATUS() = 3");
  }

  #[test]
  fn it_should_prefer_exit_over_watchdog() {
    let verdict = classify(&params(), Termination::Exited(0), usage(10, 10), true);
    assert_eq!(verdict.status(), SandboxStatus::ExitedNormally);
  }

  #[test]
  fn it_should_detect_cpu_limit_signal() {
    let verdict = classify(&params(), Termination::Signaled(SIGXCPU), usage(1_990_000, 10), false);
    assert_eq!(verdict.status(), SandboxStatus::TimeLimitExceeded);
    assert_eq!(verdict.time(), 1_990_000);
  }

  #[test]
  fn it_should_detect_cpu_time_over_limit() {
    let verdict = classify(&params(), Termination::Signaled(SIGSEGV), usage(1_000_001, 10), false);
    assert_eq!(verdict.status(), SandboxStatus::TimeLimitExceeded);
  }

  #[test]
  fn it_should_report_watched_duration_after_watchdog() {
    let verdict = classify(&params(), Termination::Signaled(SIGKILL), usage(3, 100), true);
    assert_eq!(verdict.status(), SandboxStatus::TimeLimitExceeded);
    assert_eq!(verdict.time(), 2_000_000);
    assert_eq!(verdict.memory(), 100);
  }

  #[test]
  fn it_should_prefer_time_over_output() {
    let verdict = classify(&params(), Termination::Signaled(SIGXFSZ), usage(10, 10), true);
    assert_eq!(verdict.status(), SandboxStatus::TimeLimitExceeded);
  }

  #[test]
  fn it_should_detect_output_limit() {
    let verdict = classify(&params(), Termination::Signaled(SIGXFSZ), usage(10, 100_000), false);
    assert_eq!(verdict.status(), SandboxStatus::OutputLimitExceeded);
  }

  #[test]
  fn it_should_detect_memory_limit() {
    let verdict = classify(&params(), Termination::Signaled(SIGSEGV), usage(10, 65537), false);
    assert_eq!(verdict.status(), SandboxStatus::MemoryLimitExceeded);
    assert_eq!(verdict.signal(), Some(Signal::SIGSEGV));
  }

  #[test]
  fn it_should_fall_back_to_runtime_error() {
    let verdict = classify(&params(), Termination::Signaled(SIGSEGV), usage(10, 65536), false);
    assert_eq!(verdict.status(), SandboxStatus::RuntimeError);
  }

  #[test]
  fn it_should_skip_unlimited_comparisons() {
    let params = SandboxParams::new("./a.out", "/root/result.txt");
    let verdict = classify(&params, Termination::Signaled(SIGSEGV), usage(5_000_000, 1 << 20), false);
    assert_eq!(verdict.status(), SandboxStatus::RuntimeError);
  }

  #[test]
  fn it_should_keep_child_unreaped_until_wait() {
    use nix::sys::signal::kill;
    use std::process::Command;

    let child = Command::new("sh").args(["-c", "exit 5"]).spawn().unwrap();
    let pid = Pid::from_raw(child.id() as i32);

    wait_exit(pid).unwrap();
    // Zombie still owns the pid
    assert!(kill(pid, None).is_ok());

    let (termination, _) = wait_child(pid).unwrap();
    assert_eq!(termination, Termination::Exited(5));
    assert_eq!(wait_child(pid).unwrap_err(), Errno::ECHILD);
  }

  #[test]
  fn it_should_convert_timeval() {
    assert_eq!(microseconds(TimeVal::new(2, 345)), 2_000_345);
  }
}
