#![allow(dead_code)]

use std::fs::{self, Permissions};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Once;

use flexi_logger::Logger;
use log::info;
use nix::unistd::Uid;
use tempfile::{tempdir, TempDir};

static INIT: Once = Once::new();

pub fn setup() {
  INIT.call_once(|| {
    Logger::try_with_str("judge_sandbox=debug,info")
      .unwrap()
      .start()
      .unwrap();
  });
}

/// Confining needs root, skip the test otherwise
pub fn is_root(name: &str) -> bool {
  setup();
  let is_root = Uid::current().is_root();
  if !is_root {
    info!("Skip {}: need root privileges", name);
  }
  is_root
}

/// Scratch sandbox root that the sandbox identity can enter and write
pub fn sandbox_root() -> TempDir {
  let dir = tempdir().unwrap();
  fs::set_permissions(dir.path(), Permissions::from_mode(0o777)).unwrap();
  dir
}

/// Write an executable shell script into the sandbox root
pub fn script(dir: &Path, name: &str, body: &str) -> PathBuf {
  let path = dir.join(name);
  fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
  fs::set_permissions(&path, Permissions::from_mode(0o755)).unwrap();
  path
}
