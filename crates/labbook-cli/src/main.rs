mod exec;
mod logging;

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use labbook_core::settings::{SETTINGS_FILE_NAME, save_settings};
use labbook_core::{
    Error as CoreError, FrameworkDocument, FrameworkSettings, Logger, MetricRecord, RunInfo,
    RunOptions, RunStatus, Scalar, VersionInfo, artifacts, load_settings, metadata, metrics,
    run_dir,
};
use thiserror::Error;

use logging::init_logging;

#[derive(Debug, Error)]
enum CliError {
    #[error("{0}")]
    Core(#[from] CoreError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("toml decode error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("logging error: {0}")]
    Logging(String),
}

#[derive(Parser, Debug)]
#[command(name = "labbook", version, about = "Labbook run logger")]
struct Cli {
    /// Emit framework events as JSON lines on stderr.
    #[arg(long, global = true, default_value_t = false)]
    log_json: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Write a default settings file.
    Init(LocationArgs),
    /// Start a run and print its id; finish it later with `finish`.
    New(StartArgs),
    /// Set the terminal status of a run.
    Finish(FinishArgs),
    /// Append one metric record to a stream.
    Metric(MetricArgs),
    /// Run a program inside a new run and record how it ended.
    Exec(exec::ExecArgs),
    /// Print the info document and contents of a run.
    Show(RunArgs),
    /// Print JSON Schemas of the metadata documents.
    Schema,
}

#[derive(Args, Debug, Clone)]
struct LocationArgs {
    /// Framework settings file.
    #[arg(long, default_value = SETTINGS_FILE_NAME)]
    settings: PathBuf,
    /// Parent log directory, overriding the settings file.
    #[arg(long)]
    log_dir: Option<PathBuf>,
}

impl LocationArgs {
    fn load(&self) -> Result<FrameworkSettings, CliError> {
        let mut settings = load_settings(&self.settings)?;
        if let Some(log_dir) = &self.log_dir {
            settings.logger.parent_log_dir = log_dir.clone();
        }
        Ok(settings)
    }
}

#[derive(Args, Debug, Clone)]
struct StartArgs {
    #[command(flatten)]
    location: LocationArgs,
    /// Resume this run id instead of allocating a new one.
    #[arg(long)]
    id: Option<i64>,
    /// Run configuration (.toml, .yaml/.yml or .json).
    #[arg(long)]
    config: Option<PathBuf>,
}

impl StartArgs {
    fn settings(&self) -> Result<FrameworkSettings, CliError> {
        let mut settings = self.location.load()?;
        if self.id.is_some() {
            settings.logger.forced_log_id = self.id;
        }
        Ok(settings)
    }

    fn config(&self) -> Result<serde_json::Value, CliError> {
        match &self.config {
            Some(path) => read_config(path),
            None => Ok(serde_json::Value::Object(serde_json::Map::new())),
        }
    }
}

#[derive(Args, Debug)]
struct RunArgs {
    #[command(flatten)]
    location: LocationArgs,
    /// Run id.
    id: u64,
}

impl RunArgs {
    fn open(&self) -> Result<run_dir::RunDirectoryHandle, CliError> {
        let settings = self.location.load()?;
        Ok(run_dir::open(&settings.logger.parent_log_dir, self.id)?)
    }
}

#[derive(Args, Debug)]
struct FinishArgs {
    #[command(flatten)]
    run: RunArgs,
    /// COMPLETE, FAILED or INTERRUPTED.
    #[arg(long, value_parser = parse_status)]
    status: RunStatus,
}

#[derive(Args, Debug)]
struct MetricArgs {
    #[command(flatten)]
    run: RunArgs,
    /// Stream name.
    log_name: String,
    /// Values as key=value.
    #[arg(required = true, value_name = "KEY=VALUE")]
    values: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<ExitCode, CliError> {
    let cli = Cli::parse();
    init_logging(cli.log_json)?;

    match cli.command {
        Command::Init(args) => run_init(&args).map(|()| ExitCode::SUCCESS),
        Command::New(args) => run_new(&args).map(|()| ExitCode::SUCCESS),
        Command::Finish(args) => run_finish(&args).map(|()| ExitCode::SUCCESS),
        Command::Metric(args) => run_metric(&args).map(|()| ExitCode::SUCCESS),
        Command::Exec(args) => exec::run_exec(args).await,
        Command::Show(args) => run_show(&args).map(|()| ExitCode::SUCCESS),
        Command::Schema => run_schema().map(|()| ExitCode::SUCCESS),
    }
}

fn run_init(args: &LocationArgs) -> Result<(), CliError> {
    if args.settings.exists() {
        return Err(CliError::InvalidArgument(format!(
            "{} already exists",
            args.settings.display()
        )));
    }
    let settings = args.load()?;
    save_settings(&args.settings, &settings)?;
    println!("{}", args.settings.display());
    Ok(())
}

fn run_new(args: &StartArgs) -> Result<(), CliError> {
    let options = RunOptions {
        config: args.config()?,
        command: None,
        code: Some(VersionInfo::collect()),
    };
    let logger = Logger::new(&args.settings()?, options)?;
    println!("{}\t{}", logger.log_id(), logger.log_dir().display());
    Ok(())
}

fn run_finish(args: &FinishArgs) -> Result<(), CliError> {
    let handle = args.run.open()?;
    let info = metadata::update_status(&handle, args.status, None)?;
    println!("{}\t{}", info.log_id, info.status);
    Ok(())
}

fn run_metric(args: &MetricArgs) -> Result<(), CliError> {
    let handle = args.run.open()?;
    let record = args
        .values
        .iter()
        .map(|pair| parse_pair(pair))
        .collect::<Result<MetricRecord, CliError>>()?;
    metrics::log_metrics(&handle, &record, &args.log_name)?;
    Ok(())
}

fn run_show(args: &RunArgs) -> Result<(), CliError> {
    let handle = args.open()?;
    let info = metadata::read_info(&handle)?;
    print!("{}", serde_yaml::to_string(&info)?);

    match metadata::read_framework(&handle) {
        Ok(framework) => {
            println!("framework_version: {}", framework.version);
            if let Some(commit) = framework.code.and_then(|code| code.commit_hash) {
                println!("commit_hash: {commit}");
            }
        }
        Err(err) if err.is_not_found() => {}
        Err(err) => return Err(err.into()),
    }

    let streams = metrics::list_streams(&handle)?;
    if !streams.is_empty() {
        println!("metrics:");
        for stream in streams {
            let keys = metrics::registered_keys(&handle, &stream)?;
            let keys: Vec<String> = keys.into_iter().collect();
            println!("  {stream}: [{}]", keys.join(", "));
        }
    }

    let checkpoints = artifacts::list_artifacts(&handle, artifacts::CHECKPOINT_TYPE)?;
    if !checkpoints.is_empty() {
        println!("checkpoints: [{}]", checkpoints.join(", "));
    }
    Ok(())
}

fn run_schema() -> Result<(), CliError> {
    let schemas = serde_json::json!({
        "info": schemars::schema_for!(RunInfo),
        "framework": schemars::schema_for!(FrameworkDocument),
    });
    println!("{}", serde_json::to_string_pretty(&schemas)?);
    Ok(())
}

fn read_config(path: &Path) -> Result<serde_json::Value, CliError> {
    let content = std::fs::read_to_string(path)?;
    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .unwrap_or_default()
        .to_ascii_lowercase();
    match extension.as_str() {
        "toml" => {
            let value: toml::Value = toml::from_str(&content)?;
            Ok(serde_json::to_value(value)?)
        }
        "yaml" | "yml" => Ok(serde_yaml::from_str(&content)?),
        "json" => Ok(serde_json::from_str(&content)?),
        other => Err(CliError::InvalidArgument(format!(
            "unsupported config format '{other}' for {}",
            path.display()
        ))),
    }
}

fn parse_status(value: &str) -> Result<RunStatus, String> {
    let status: RunStatus = value.parse()?;
    if !status.is_terminal() {
        return Err("a run can only be finished with a terminal status".to_string());
    }
    Ok(status)
}

fn parse_pair(pair: &str) -> Result<(String, Scalar), CliError> {
    let (key, raw) = pair
        .split_once('=')
        .ok_or_else(|| CliError::InvalidArgument(format!("expected key=value, got '{pair}'")))?;
    if key.is_empty() {
        return Err(CliError::InvalidArgument(format!("empty key in '{pair}'")));
    }
    Ok((key.to_string(), parse_scalar(raw)))
}

fn parse_scalar(raw: &str) -> Scalar {
    if let Ok(value) = raw.parse::<i64>() {
        return Scalar::Int(value);
    }
    if let Ok(value) = raw.parse::<f64>() {
        return Scalar::Float(value);
    }
    match raw {
        "true" => Scalar::Bool(true),
        "false" => Scalar::Bool(false),
        "null" => Scalar::Null,
        _ => Scalar::Text(raw.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scalars_are_typed_from_text() {
        assert_eq!(parse_scalar("3"), Scalar::Int(3));
        assert_eq!(parse_scalar("0.25"), Scalar::Float(0.25));
        assert_eq!(parse_scalar("true"), Scalar::Bool(true));
        assert_eq!(parse_scalar("adam"), Scalar::Text("adam".to_string()));
    }

    #[test]
    fn pairs_need_a_key() {
        assert!(parse_pair("loss=0.5").is_ok());
        assert!(parse_pair("=0.5").is_err());
        assert!(parse_pair("loss").is_err());
    }

    #[test]
    fn finish_rejects_running() {
        assert_eq!(parse_status("failed"), Ok(RunStatus::Failed));
        assert!(parse_status("RUNNING").is_err());
    }

    #[test]
    fn config_formats_share_one_shape() {
        let dir = std::env::temp_dir().join(format!("labbook_cli_config_{}", std::process::id()));
        std::fs::create_dir_all(&dir).expect("create dir");
        std::fs::write(dir.join("c.toml"), "lr = 0.1\n[model]\nlayers = 2\n").expect("toml");
        std::fs::write(dir.join("c.yaml"), "lr: 0.1\nmodel:\n  layers: 2\n").expect("yaml");

        let from_toml = read_config(&dir.join("c.toml")).expect("read toml");
        let from_yaml = read_config(&dir.join("c.yaml")).expect("read yaml");
        assert_eq!(from_toml, from_yaml);
        std::fs::write(dir.join("c.ini"), "lr=0.1\n").expect("ini");
        assert!(matches!(
            read_config(&dir.join("c.ini")),
            Err(CliError::InvalidArgument(_))
        ));
    }

    #[test]
    fn cli_definition_is_consistent() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}
