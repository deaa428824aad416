use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

pub mod config;
pub mod init_config;
pub mod run;
pub mod show;

#[derive(Parser)]
#[command(name = "fedpsi")]
#[command(author = "fedpsi Project")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Private set intersection for federated jobs", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run a PSI session between the configured parties (in-process)
    Run {
        /// Path to config file (default: ~/.local/share/fedpsi/config.toml)
        #[arg(long)]
        config: Option<String>,
    },

    /// Print a party's persisted intersection
    Show {
        /// Path to config file (default: ~/.local/share/fedpsi/config.toml)
        #[arg(long)]
        config: Option<String>,

        /// Party whose result to read
        #[arg(long)]
        party: String,

        /// Session id (defaults to the configured session)
        #[arg(long)]
        session: Option<String>,
    },

    /// Write a commented default configuration file
    InitConfig {
        /// Output path (default: ~/.local/share/fedpsi/config.toml)
        #[arg(long)]
        path: Option<String>,

        /// Session id (random if not specified)
        #[arg(long)]
        session: Option<String>,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

pub async fn execute(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    match cli.command {
        Commands::Run { config } => run::execute(config).await,
        Commands::Show {
            config,
            party,
            session,
        } => show::execute(config, party, session).await,
        Commands::InitConfig {
            path,
            session,
            force,
        } => init_config::execute(path, session, force),
    }
}

/// Install the global tracing subscriber. `RUST_LOG` overrides `level`.
pub fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    // Already installed when called twice (tests); keep the first
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}
