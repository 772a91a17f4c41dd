//! CLI command definitions for containment.
//!
//! `require-image` makes sure an image is present locally, pulling or
//! building it as directed; `exec` runs a command in a running container.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use tracing::info;

use crate::config::{parse_key_value, ExecConfig, RequireImageConfig, DEFAULT_EXEC_MAX_POLLS};
use crate::docker::{
    connect_local, AttachedExecutor, BollardDockerManager, DetachedExecutor, DockerExecutor,
};
use crate::durations::{format_duration, parse_duration};
use crate::image::AbsentImageDirective;
use crate::require::require_image;
use crate::settings::{LayeredSettingSet, DEFAULT_DOMAIN};

/// Default interval between status checks of a detached exec.
const DEFAULT_POLL_INTERVAL: &str = "1s";

/// Docker image and exec helpers for integration test setups.
#[derive(Parser)]
#[command(name = "containment")]
#[command(about = "Ensure Docker images exist and run commands in containers")]
#[command(version)]
#[command(
    long_about = "containment prepares Docker images for integration tests and runs commands inside containers.\n\nExample usage:\n  containment require-image my-app-test:latest --absent-image-action build:./docker\n  containment exec my-container --detached -- sh -c 'sleep 2'"
)]
pub struct Cli {
    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info", global = true)]
    pub log_level: String,
}

/// Available CLI subcommands.
#[derive(clap::Subcommand)]
pub enum Commands {
    /// Make sure an image is present locally.
    ///
    /// If the image is absent, the absent-image action decides what happens:
    /// `pull[:remote-image]`, `build[:dockerfile-dir]`, `fail` or `ignore`.
    #[command(alias = "require")]
    RequireImage(RequireImageArgs),

    /// Run a command inside a running container.
    Exec(ExecArgs),
}

/// Arguments for `containment require-image`.
#[derive(Parser, Debug)]
pub struct RequireImageArgs {
    /// Image name with optional tag, `name[:tag]`. Overrides the config file.
    pub name: Option<String>,

    /// What to do if the image is absent, `action[:parameter]`.
    #[arg(short = 'a', long)]
    pub absent_image_action: Option<AbsentImageDirective>,

    /// Pull timeout, e.g. `5m`, `90s` or `PT10M`.
    #[arg(long, value_parser = parse_duration)]
    pub pull_timeout: Option<Duration>,

    /// Build timeout, e.g. `30m`.
    #[arg(long, value_parser = parse_duration)]
    pub build_timeout: Option<Duration>,

    /// Build argument, `KEY=VALUE`. Repeatable.
    #[arg(long = "build-arg", value_parser = parse_key_value)]
    pub build_args: Vec<(String, String)>,

    /// Label applied to a built image, `KEY=VALUE`. Repeatable.
    #[arg(long = "label", value_parser = parse_key_value)]
    pub labels: Vec<(String, String)>,

    /// Base directory for the default Dockerfile directory.
    #[arg(long)]
    pub base_dir: Option<PathBuf>,

    /// YAML file with require-image settings.
    #[arg(short = 'c', long, env = "CONTAINMENT_CONFIG")]
    pub config: Option<PathBuf>,
}

/// Arguments for `containment exec`.
#[derive(Parser, Debug)]
pub struct ExecArgs {
    /// Container name or ID.
    pub container: String,

    /// Start the command detached and poll for its exit code.
    #[arg(long)]
    pub detached: bool,

    /// Interval between status checks when detached.
    #[arg(long, default_value = DEFAULT_POLL_INTERVAL, value_parser = parse_duration)]
    pub poll_interval: Duration,

    /// Maximum number of status checks when detached.
    #[arg(long, default_value_t = DEFAULT_EXEC_MAX_POLLS)]
    pub max_polls: u32,

    /// Environment variable, `KEY=VALUE`. Repeatable.
    #[arg(short = 'e', long = "env")]
    pub env: Vec<String>,

    /// Working directory inside the container.
    #[arg(short = 'w', long)]
    pub workdir: Option<String>,

    /// Output the result as JSON.
    #[arg(short = 'j', long)]
    pub json: bool,

    /// Program and arguments to run.
    #[arg(last = true, required = true, num_args = 1..)]
    pub command: Vec<String>,
}

/// Parse CLI arguments without executing.
pub fn parse_cli() -> Cli {
    Cli::parse()
}

/// Run the CLI by parsing arguments and executing the command.
///
/// For more control over logging initialization, use `parse_cli()` and `run_with_cli()`.
pub async fn run() -> anyhow::Result<()> {
    run_with_cli(parse_cli()).await
}

/// Run the CLI with the parsed arguments.
pub async fn run_with_cli(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::RequireImage(args) => run_require_image_command(args).await,
        Commands::Exec(args) => run_exec_command(args).await,
    }
}

// ============================================================================
// require-image
// ============================================================================

/// Settings from the config file, if any, then `settings`, with flags
/// layered on top.
fn build_require_config(
    args: RequireImageArgs,
    settings: &LayeredSettingSet,
) -> anyhow::Result<RequireImageConfig> {
    let config = match &args.config {
        Some(path) => RequireImageConfig::from_yaml_file(path).map_err(|e| {
            anyhow::anyhow!("Failed to load config {}: {}", path.display(), e)
        })?,
        None => RequireImageConfig::default(),
    };
    let mut config = config.apply_settings(settings)?;

    if let Some(name) = args.name {
        config.name = name;
    }
    if let Some(directive) = args.absent_image_action {
        config.absent_image_action = Some(directive);
    }
    if let Some(timeout) = args.pull_timeout {
        config.pull_timeout = timeout;
    }
    if let Some(timeout) = args.build_timeout {
        config.build_timeout = timeout;
    }
    config.build_args.extend(args.build_args);
    config.labels.extend(args.labels);
    if let Some(dir) = args.base_dir {
        config.base_dir = dir;
    }

    config.validate()?;
    Ok(config)
}

async fn run_require_image_command(args: RequireImageArgs) -> anyhow::Result<()> {
    let settings = LayeredSettingSet::environment(DEFAULT_DOMAIN);
    let config = build_require_config(args, &settings)?;
    let manager = BollardDockerManager::connect()?;

    info!(
        image = %config.name,
        pull_timeout = %format_duration(config.pull_timeout),
        build_timeout = %format_duration(config.build_timeout),
        "Requiring image"
    );
    require_image(&manager, &config).await?;
    info!(image = %config.name, "Image requirement satisfied");
    Ok(())
}

// ============================================================================
// exec
// ============================================================================

fn build_exec_config(args: &ExecArgs) -> anyhow::Result<ExecConfig> {
    if args.poll_interval.is_zero() {
        anyhow::bail!("--poll-interval must be positive");
    }
    Ok(ExecConfig {
        env: args.env.clone(),
        working_dir: args.workdir.clone(),
        poll_interval: args.poll_interval,
        max_polls: args.max_polls,
    })
}

async fn run_exec_command(args: ExecArgs) -> anyhow::Result<()> {
    let config = build_exec_config(&args)?;
    let docker = connect_local()?;

    let executor: Box<dyn DockerExecutor> = if args.detached {
        Box::new(DetachedExecutor::new(docker, &args.container).with_config(config))
    } else {
        Box::new(AttachedExecutor::new(docker, &args.container).with_config(config))
    };

    let (executable, rest) = args
        .command
        .split_first()
        .ok_or_else(|| anyhow::anyhow!("No command given"))?;
    let result = executor.execute(executable, rest).await?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        if let Some(stdout) = &result.stdout {
            print!("{stdout}");
        }
        if let Some(stderr) = &result.stderr {
            eprint!("{stderr}");
        }
        info!(container = %args.container, exit_code = result.exit_code, "Command finished");
    }

    if !result.is_success() {
        anyhow::bail!("Command exited with code {}", result.exit_code);
    }
    Ok(())
}
