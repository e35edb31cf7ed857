use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{channel, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::{debug, error, info};
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;

use crate::SandboxError;

/// Wall clock backstop for the kernel CPU limit.
///
/// Kills the child once the deadline passes, unless cancelled first. Catches
/// programs that sleep or block instead of burning CPU.
pub(crate) struct Watchdog {
  fired: Arc<AtomicBool>,
  cancel: Option<Sender<()>>,
  handle: Option<JoinHandle<()>>,
}

impl Watchdog {
  pub(crate) fn spawn(child: Pid, deadline: Duration) -> Result<Self, SandboxError> {
    let fired = Arc::new(AtomicBool::new(false));
    let (cancel, cancelled) = channel::<()>();

    let flag = Arc::clone(&fired);
    let handle = thread::Builder::new()
      .name("watchdog".into())
      .spawn(move || match cancelled.recv_timeout(deadline) {
        Err(RecvTimeoutError::Timeout) => {
          info!(
            "Child process #{}. reaches wall clock limit {:?}",
            child, deadline
          );
          // ESRCH means the child has been reaped just before the deadline
          match kill(child, Signal::SIGKILL) {
            Ok(_) => flag.store(true, Ordering::SeqCst),
            Err(err) => error!("Kill child process #{}. fails: {}", child, err),
          }
        }
        _ => {
          debug!("Watchdog of child process #{}. is cancelled", child);
        }
      })?;

    debug!("Start watchdog for {:?}", deadline);

    Ok(Watchdog {
      fired,
      cancel: Some(cancel),
      handle: Some(handle),
    })
  }

  /// Cancel the timer and report whether it killed the child
  pub(crate) fn finish(mut self) -> bool {
    self.stop();
    self.fired.load(Ordering::SeqCst)
  }

  fn stop(&mut self) {
    if let Some(cancel) = self.cancel.take() {
      let _ = cancel.send(());
    }
    if let Some(handle) = self.handle.take() {
      if handle.join().is_err() {
        error!("Watchdog thread panicked");
      }
    }
  }
}

impl Drop for Watchdog {
  fn drop(&mut self) {
    self.stop();
  }
}
