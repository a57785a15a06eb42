use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod commands;

#[derive(Parser)]
#[command(name = "arena")]
#[command(about = "Build and watch arena agent images", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build an agent image from its source directory
    Build {
        /// Agent source directory (defaults to the current directory)
        dir: Option<PathBuf>,

        /// Rebuild whenever the source tree changes
        #[arg(short, long)]
        watch: bool,

        /// Fail the build when the Dockerfile uses a forbidden instruction
        #[arg(long)]
        deny_forbidden: bool,

        /// Configuration file (defaults to the user config directory)
        #[arg(long, env = "ARENA_CONFIG")]
        config: Option<PathBuf>,

        /// Enable debug logging
        #[arg(short, long)]
        verbose: bool,
    },

    /// Shell completion helpers
    #[command(subcommand, hide = true)]
    Complete(CompleteCommands),
}

#[derive(Subcommand)]
enum CompleteCommands {
    /// List subdirectories that contain a Dockerfile
    Build {
        /// Directory to search (defaults to the current directory)
        dir: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Build { dir, watch, deny_forbidden, config, verbose } => {
            let args = commands::build::BuildArgs { dir, watch, deny_forbidden, config, verbose };
            let code = commands::build::build(args).await?;
            if code != 0 {
                std::process::exit(code);
            }
        }

        Commands::Complete(CompleteCommands::Build { dir }) => {
            commands::complete::build(dir.as_deref())?;
        }
    }

    Ok(())
}
