use std::env;
use std::path::PathBuf;

use clap::{CommandFactory, Parser};
use flexi_logger::{FileSpec, Logger, LoggerHandle};
use log::info;
use nix::unistd::Uid;

use judge_sandbox::{
  default_format, run, SandboxError, SandboxExit, SandboxParams, SANDBOX_GID, SANDBOX_ROOT,
  SANDBOX_UID,
};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
  #[arg(help = "Program to run, searched in PATH")]
  program: String,

  #[arg(help = "Standard input file, empty for /dev/null")]
  stdin: String,

  #[arg(help = "Standard output file, empty for /dev/null")]
  stdout: String,

  #[arg(help = "Standard error file, empty for /dev/null")]
  stderr: String,

  #[arg(help = "CPU time limit (unit: second, 0 for unlimited)")]
  time_limit: u64,

  #[arg(help = "Extra seconds before the limit is enforced")]
  time_limit_reserve: u64,

  #[arg(help = "Memory limit (unit: KB, 0 for unlimited)")]
  memory_limit: u64,

  #[arg(help = "Extra KB before the limit is enforced")]
  memory_limit_reserve: u64,

  #[arg(help = "Raise stack limit to the memory limit (non-zero to enable)")]
  large_stack: u64,

  #[arg(help = "Output limit (unit: byte, 0 for unlimited)")]
  output_limit: u64,

  #[arg(help = "Max number of child processes (0 for unlimited)")]
  process_limit: u64,

  #[arg(help = "Result file")]
  result: PathBuf,

  #[arg(long, env = "SANDBOX_ROOT", default_value = SANDBOX_ROOT, help = "Working directory of the program")]
  root: PathBuf,

  #[arg(long, env = "SANDBOX_UID", default_value_t = SANDBOX_UID)]
  uid: u32,

  #[arg(long, env = "SANDBOX_GID", default_value_t = SANDBOX_GID)]
  gid: u32,

  #[arg(long, default_value_t = false)]
  verbose: bool,
}

impl Cli {
  fn resolve(self) -> SandboxParams {
    let mut params = SandboxParams::new(self.program, self.result);
    params
      .stdin(Some(self.stdin))
      .stdout(Some(self.stdout))
      .stderr(Some(self.stderr))
      .time_limit(self.time_limit, self.time_limit_reserve)
      .memory_limit(self.memory_limit, self.memory_limit_reserve)
      .large_stack(self.large_stack != 0)
      .output_limit(self.output_limit)
      .process_limit(self.process_limit)
      .root(self.root)
      .uid(self.uid)
      .gid(self.gid);
    params
  }
}

fn setup_logger(verbose: bool) -> Result<LoggerHandle, SandboxError> {
  let spec = if verbose {
    "judge_sandbox=debug,sandbox=debug"
  } else {
    "judge_sandbox=warn,sandbox=warn"
  };
  let logger = Logger::try_with_env_or_str(spec)?.format(default_format);

  let logger = match env::var("LOG_DIR") {
    Ok(dir) => logger
      .log_to_file(
        FileSpec::default()
          .directory(dir)
          .basename("sandbox")
          .discriminant(format!("{}", chrono::offset::Local::now().format("%Y-%m-%d")))
          .suppress_timestamp(),
      )
      .append(),
    Err(_) => logger.log_to_stderr(),
  };

  Ok(logger.start()?)
}

fn start(cli: Cli) -> Result<(), SandboxError> {
  if !Uid::current().is_root() {
    eprintln!("{}", Cli::command().render_usage());
    return Err(SandboxError::privilege("need root privileges"));
  }

  let _logger = setup_logger(cli.verbose)?;
  let params = cli.resolve();

  info!("Start running sandbox");

  let verdict = run(&params)?;

  info!(
    "Running sandbox finished: {}, {} us, {} KB",
    verdict.status(),
    verdict.time(),
    verdict.memory()
  );

  Ok(())
}

fn main() -> SandboxExit {
  let cli = Cli::parse();
  SandboxExit::from(start(cli))
}
