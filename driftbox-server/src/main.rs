mod config;
use clap::{Parser, Subcommand};
use config::Config;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

mod server;
use driftbox_core::SweepExpiredOperationOutcome;
use server::{Storage, run_server};

#[derive(Parser)]
#[command(name = "driftbox")]
#[command(about = "Short-lived file sharing with expiring download links")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the server
    Server {
        /// Path to configuration file
        #[arg(short, long)]
        config: Option<String>,
    },
    /// Run one retention sweep and exit
    Sweep {
        /// Path to configuration file
        #[arg(short, long)]
        config: Option<String>,
    },
}

fn load_config(path: Option<&str>) -> Config {
    match Config::load(path) {
        Ok(c) => c,
        Err(e) => {
            tracing::error!("Failed to load config: {}", e);
            std::process::exit(1);
        }
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "driftbox_server=info,driftbox_core=info,tower_http=info".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Server { config } => {
            let cfg = load_config(config.as_deref());

            tracing::info!(
                "Starting Driftbox server, Bind: {}, Storage: {:?}, Metadata: {:?}",
                cfg.bind_addr,
                cfg.storage.storage_dir,
                cfg.storage.metadata_file
            );

            if let Err(e) = run_server(cfg).await {
                tracing::error!("Server error: {}", e);
                std::process::exit(1);
            }
        }
        Commands::Sweep { config } => {
            let cfg = load_config(config.as_deref());

            let storage = match Storage::open(&cfg) {
                Ok(storage) => storage,
                Err(e) => {
                    tracing::error!("Failed to open storage: {}", e);
                    std::process::exit(1);
                }
            };

            match storage.sweeper(&cfg).sweep_now().await {
                Ok(SweepExpiredOperationOutcome::Unchanged) => {
                    tracing::info!("Nothing expired");
                }
                Ok(SweepExpiredOperationOutcome::Reclaimed(result)) => {
                    tracing::info!(
                        "Removed {} expired files, {} kept for retry",
                        result.removed.len(),
                        result.retained.len()
                    );
                }
                Err(e) => {
                    tracing::error!("Sweep failed: {}", e);
                    std::process::exit(1);
                }
            }
        }
    }
}
