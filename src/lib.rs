pub use context::{
  SandboxParams, MEMORY_LIMIT_RESERVE, SANDBOX_GID, SANDBOX_ROOT, SANDBOX_UID, TIME_LIMIT_RESERVE,
};
pub use error::{SandboxError, SandboxExit, LAUNCH_FAILURE_EXIT_CODE};
pub use sandbox::run;
pub use utils::default_format;
pub use verdict::{SandboxReport, SandboxStatus, Verdict};

mod confine;
mod context;
mod error;
mod pipe;
mod sandbox;
mod supervisor;
mod utils;
mod verdict;
mod watchdog;
