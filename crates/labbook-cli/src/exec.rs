use std::process::ExitCode;

use clap::Args;
use labbook_core::{Logger, RunOptions, RunStatus, VersionInfo};
use tokio::process::Command;
use tracing::{info, warn};

use crate::{CliError, StartArgs};

pub const LOG_ID_ENV: &str = "LABBOOK_LOG_ID";
pub const LOG_DIR_ENV: &str = "LABBOOK_LOG_DIR";

/// Conventional exit code for a process stopped by SIGINT.
const INTERRUPTED_EXIT_CODE: u8 = 130;

#[derive(Args, Debug)]
pub struct ExecArgs {
    #[command(flatten)]
    start: StartArgs,
    /// Program and arguments to run.
    #[arg(last = true, required = true, value_name = "PROGRAM")]
    command: Vec<String>,
}

enum Outcome {
    Exited(std::io::Result<std::process::ExitStatus>),
    Interrupted,
}

pub async fn run_exec(args: ExecArgs) -> Result<ExitCode, CliError> {
    let ExecArgs { start, command } = args;
    let (program, program_args) = command
        .split_first()
        .ok_or_else(|| CliError::InvalidArgument("no program given".to_string()))?;

    let options = RunOptions {
        config: start.config()?,
        command: Some(command.clone()),
        code: Some(VersionInfo::collect()),
    };
    let logger = Logger::new(&start.settings()?, options)?;
    let started = std::time::Instant::now();
    info!(log_id = logger.log_id(), program = %program, "launching job");

    let mut child = match Command::new(program)
        .args(program_args)
        .env(LOG_ID_ENV, logger.log_id().to_string())
        .env(LOG_DIR_ENV, logger.log_dir())
        .spawn()
    {
        Ok(child) => child,
        Err(err) => {
            logger.finish_quietly(RunStatus::Failed);
            return Err(err.into());
        }
    };

    let outcome = tokio::select! {
        status = child.wait() => Outcome::Exited(status),
        _ = tokio::signal::ctrl_c() => Outcome::Interrupted,
    };

    let duration_ms = started.elapsed().as_millis();
    match outcome {
        Outcome::Exited(Err(err)) => {
            logger.finish_quietly(RunStatus::Failed);
            Err(err.into())
        }
        Outcome::Exited(Ok(status)) => {
            let run_status = if status.success() {
                RunStatus::Complete
            } else {
                RunStatus::Failed
            };
            info!(log_id = logger.log_id(), status = %run_status, duration_ms, "job finished");
            logger.finish_quietly(run_status);
            Ok(exit_code(status))
        }
        Outcome::Interrupted => {
            warn!(log_id = logger.log_id(), duration_ms, "interrupted, stopping job");
            if let Err(err) = child.kill().await {
                warn!(error = %err, "could not kill job");
            }
            logger.finish_quietly(RunStatus::Interrupted);
            Ok(ExitCode::from(INTERRUPTED_EXIT_CODE))
        }
    }
}

fn exit_code(status: std::process::ExitStatus) -> ExitCode {
    match status.code() {
        Some(0) => ExitCode::SUCCESS,
        Some(code) => ExitCode::from(u8::try_from(code).unwrap_or(1)),
        None => ExitCode::FAILURE,
    }
}
