//! Conveyor CLI tool.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod commands;

#[derive(Parser)]
#[command(name = "conveyor")]
#[command(about = "Conveyor job orchestrator CLI", long_about = None)]
struct Cli {
    /// Directory holding jobs, runs and logs
    #[arg(long, env = "CONVEYOR_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// System configuration file
    #[arg(long, env = "CONVEYOR_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a job from a job file
    CreateJob {
        /// Path to the job file
        path: PathBuf,
    },
    /// Enable one or more jobs
    EnableJob {
        /// Job names
        #[arg(required = true)]
        names: Vec<String>,
    },
    /// Disable a job
    DisableJob {
        /// Job name
        name: String,
    },
    /// Show whether a job is enabled
    Status {
        /// Job name
        name: String,
    },
    /// Run one build of a job and print its log
    Build {
        /// Job name
        name: String,
    },
    /// Poll a job's SCMs and build if they changed
    Poll {
        /// Job name
        name: String,
    },
    /// Delete a job and all of its runs
    DeleteJob {
        /// Job name
        name: String,
    },
    /// List a job's runs
    Runs {
        /// Job name
        name: String,
    },
    /// Validate a build script
    Validate {
        /// Path to the script
        #[arg(default_value = "build.kdl")]
        path: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    if let Commands::Validate { path } = &cli.command {
        return commands::validate(path);
    }

    let ctx = commands::open_context(cli.data_dir.as_deref(), cli.config.as_deref()).await?;

    let result = match cli.command {
        Commands::CreateJob { path } => commands::jobs::create(&ctx, &path).await,
        Commands::EnableJob { names } => commands::jobs::enable(&ctx, &names).await,
        Commands::DisableJob { name } => commands::jobs::disable(&ctx, &name).await,
        Commands::Status { name } => commands::jobs::status(&ctx, &name).await,
        Commands::Build { name } => commands::run::build(&ctx, &name).await,
        Commands::Poll { name } => commands::run::poll(&ctx, &name).await,
        Commands::DeleteJob { name } => commands::jobs::delete(&ctx, &name).await,
        Commands::Runs { name } => commands::runs::list(&ctx, &name).await,
        Commands::Validate { .. } => Ok(()),
    };

    ctx.shutdown().await;
    result
}
