use std::fs::{self, File};
use std::time::Duration;

use log::{error, info};
use nix::libc;
use nix::sys::signal::{kill, Signal};
use nix::unistd::{fork, ForkResult, Pid};

use crate::confine::Confiner;
use crate::error::LAUNCH_FAILURE_EXIT_CODE;
use crate::pipe::{LaunchPipe, LaunchReadPipe};
use crate::supervisor::{classify, wait_child, wait_exit, Termination};
use crate::verdict::Verdict;
use crate::watchdog::Watchdog;
use crate::{SandboxError, SandboxParams};

/// Run the target program once and write its verdict to the result file.
///
/// Failures of the target program are part of the returned verdict. An `Err`
/// means no verdict could be recorded.
pub fn run(params: &SandboxParams) -> Result<Verdict, SandboxError> {
  params.log();

  let confiner = Confiner::new(params)?;
  let pipe = LaunchPipe::new()?;

  // Open before fork, so a bad result path never leaves the target running
  let mut result = File::create(&params.result).map_err(|err| {
    SandboxError::result_file(format!(
      "Failed to open result file '{}': {}",
      params.result.to_string_lossy(),
      err
    ))
  })?;

  match unsafe { fork() } {
    Ok(ForkResult::Parent { child, .. }) => {
      info!("Start running child process (pid = {})", child);

      let verdict = match pipe.read().and_then(|pipe| supervise(params, child, &pipe)) {
        Ok(verdict) => verdict,
        Err(err) => {
          drop(result);
          let _ = fs::remove_file(&params.result);
          return Err(err);
        }
      };
      info!(
        "Child process #{}. finished: {} ({})",
        child,
        verdict.status(),
        verdict.diagnostic()
      );

      verdict.write_to(&mut result)?;
      Ok(verdict)
    }
    Ok(ForkResult::Child) => match pipe.write() {
      Ok(pipe) => confiner.enter(pipe),
      Err(_) => unsafe { libc::_exit(LAUNCH_FAILURE_EXIT_CODE) },
    },
    Err(errno) => {
      drop(result);
      let _ = fs::remove_file(&params.result);
      Err(SandboxError::fork(format!("Fork failed: {}", errno)))
    }
  }
}

fn supervise(
  params: &SandboxParams,
  child: Pid,
  pipe: &LaunchReadPipe,
) -> Result<Verdict, SandboxError> {
  let watchdog = if params.time_limit > 0 {
    let deadline = Duration::from_secs(params.time_limit_to_watch());
    match Watchdog::spawn(child, deadline) {
      Ok(watchdog) => Some(watchdog),
      Err(err) => {
        error!("Start watchdog fails: {}", err);
        let _ = kill(child, Signal::SIGKILL);
        let _ = wait_child(child);
        return Err(err);
      }
    }
  } else {
    None
  };

  // Cancel the watchdog while the pid is still held by the zombie
  let exited = wait_exit(child);
  let watchdog_fired = watchdog.map_or(false, |watchdog| watchdog.finish());
  let waited = exited.and_then(|_| wait_child(child));

  let (termination, usage) = match waited {
    Ok(waited) => waited,
    Err(errno) => {
      error!("Wait child process #{}. fails: {}", child, errno);
      return Ok(Verdict::wait_failed(errno));
    }
  };

  // Read errors are treated as an empty pipe
  if let Some(message) = pipe.read().ok().flatten() {
    error!("Launch child process #{}. fails: {}", child, message);
    let exit_code = match termination {
      Termination::Exited(code) => Some(code),
      Termination::Signaled(_) => None,
    };
    return Ok(Verdict::launch_failed(
      message,
      exit_code,
      usage.time_user(),
      usage.max_rss(),
    ));
  }

  Ok(classify(params, termination, usage, watchdog_fired))
}
