use std::ffi::CString;

use flexi_logger::DeferredNow;
use log::Record;

use crate::SandboxError;

pub type TimeLimitType = u64;

pub type MemoryLimitType = u64;

pub type OutputLimitType = u64;

/// A logline-formatter that produces log lines like <br>
/// ```[datetime: INFO] Start running sandbox```
pub fn default_format(
  w: &mut dyn std::io::Write,
  now: &mut DeferredNow,
  record: &Record,
) -> Result<(), std::io::Error> {
  write!(
    w,
    "[{}: {:5}] {}",
    now.format("%Y-%m-%d %H:%M:%S"),
    record.level(),
    record.args()
  )
}

pub(crate) fn into_c_string<S: AsRef<str>>(string: S) -> Result<CString, SandboxError> {
  let string = string.as_ref();
  CString::new(string).map_err(|_| SandboxError::usage(format!("Unexpected \\0 in {:?}", string)))
}
