//! Keel CLI tool.

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

mod commands;

#[derive(Parser)]
#[command(name = "keel")]
#[command(about = "Foundation and application stacks on a shared load balancer", long_about = None)]
struct Cli {
    /// Project configuration file
    #[arg(long, env = "KEEL_CONFIG", default_value = "keel.kdl", global = true)]
    config: PathBuf,

    /// Directory holding stack state and the cloud snapshot
    #[arg(long, env = "KEEL_STATE_DIR", default_value = ".keel", global = true)]
    state_dir: PathBuf,

    /// Log output format
    #[arg(long, value_enum, default_value = "text", global = true)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage foundation stacks
    Foundation {
        #[command(subcommand)]
        command: FoundationCommands,
    },
    /// Manage application stacks
    App {
        #[command(subcommand)]
        command: AppCommands,
    },
    /// List routing rules on a foundation's shared listener
    Rules {
        /// Foundation stack name
        #[arg(env = "KEEL_FOUNDATION_STACK")]
        foundation: String,
    },
    /// Validate a project configuration
    Validate {
        /// Path to the configuration file
        path: Option<PathBuf>,
    },
    /// Media storage operations
    Media {
        #[command(subcommand)]
        command: MediaCommands,
    },
}

#[derive(Subcommand)]
enum FoundationCommands {
    /// Build or update a foundation stack
    Up {
        /// Foundation stack name
        #[arg(env = "KEEL_FOUNDATION_STACK")]
        stack: String,
        /// Organization used in resource names
        #[arg(long, env = "KEEL_ORG")]
        org: Option<String>,
    },
    /// Show the outputs a foundation stack publishes
    Outputs {
        /// Foundation stack name
        #[arg(env = "KEEL_FOUNDATION_STACK")]
        stack: String,
    },
    /// Destroy a foundation stack
    Destroy {
        /// Foundation stack name
        #[arg(env = "KEEL_FOUNDATION_STACK")]
        stack: String,
    },
}

#[derive(Subcommand)]
enum AppCommands {
    /// Deploy or update an application stack
    Deploy {
        /// Application stack name
        #[arg(env = "KEEL_STACK")]
        stack: String,
        /// Foundation stack to bind to
        #[arg(long, env = "KEEL_FOUNDATION_STACK")]
        foundation: String,
    },
    /// Destroy an application stack, including its routing rule
    Destroy {
        /// Application stack name
        #[arg(env = "KEEL_STACK")]
        stack: String,
    },
}

#[derive(Subcommand)]
enum MediaCommands {
    /// Upload a file through the selected storage provider
    Upload {
        /// File to upload
        file: PathBuf,
        /// Destination path; defaults to a cover image path for a new post id
        #[arg(long)]
        dest: Option<String>,
    },
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Text => registry.with(fmt::layer().with_target(false)).init(),
        LogFormat::Json => registry.with(fmt::layer().json()).init(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    match cli.command {
        Commands::Foundation { command } => {
            let workspace = commands::Workspace::open(&cli.config, &cli.state_dir).await?;
            match command {
                FoundationCommands::Up { stack, org } => {
                    commands::foundation::up(&workspace, &stack, org).await?;
                }
                FoundationCommands::Outputs { stack } => {
                    commands::foundation::outputs(&workspace, &stack).await?;
                }
                FoundationCommands::Destroy { stack } => {
                    commands::foundation::destroy(&workspace, &stack).await?;
                }
            }
        }
        Commands::App { command } => {
            let workspace = commands::Workspace::open(&cli.config, &cli.state_dir).await?;
            match command {
                AppCommands::Deploy { stack, foundation } => {
                    commands::app::deploy(&workspace, &stack, &foundation).await?;
                }
                AppCommands::Destroy { stack } => {
                    commands::app::destroy(&workspace, &stack).await?;
                }
            }
        }
        Commands::Rules { foundation } => {
            let workspace = commands::Workspace::open(&cli.config, &cli.state_dir).await?;
            commands::rules::list(&workspace, &foundation).await?;
        }
        Commands::Validate { path } => {
            commands::validate(path.as_deref().unwrap_or(&cli.config))?;
        }
        Commands::Media { command } => match command {
            MediaCommands::Upload { file, dest } => {
                commands::media::upload(&file, dest).await?;
            }
        },
    }

    Ok(())
}
