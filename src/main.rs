mod app;
mod layer;
mod model;
mod store;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use app::{App, ConfigUpdate};
use model::config::AppConfig;

/// Fetch, cache and run remote compatibility layers.
#[derive(Parser, Debug)]
#[command(name = "compat-loader")]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Config file to layer over the built-in defaults.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Debug logging.
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Load every enabled layer and keep them running until Ctrl-C.
    Run {
        /// Answer every prompt with yes.
        #[arg(short, long)]
        yes: bool,
    },
    /// Show settings and cache state for each layer.
    Status,
    /// Change one layer's settings.
    Config {
        /// bunny, vendetta or revenge.
        layer: String,
        #[arg(long, conflicts_with = "disable")]
        enable: bool,
        #[arg(long)]
        disable: bool,
        /// Custom payload URL.
        #[arg(long)]
        custom_url: Option<String>,
        /// Whether the custom URL replaces the built-in one.
        #[arg(long)]
        use_custom_url: Option<bool>,
        /// Restore the layer's default settings before applying other flags.
        #[arg(long)]
        reset: bool,
    },
    /// Drop cached payloads for one layer, or all of them.
    ClearCache {
        layer: Option<String>,
    },
    /// Forget the load dialog and every cached payload.
    ClearStores,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = AppConfig::load(args.config.as_deref())?;

    // Initialize logging to file (never stdout)
    let log_dir = config.data_dir();
    std::fs::create_dir_all(&log_dir)?;

    let file_appender = tracing_appender::rolling::daily(&log_dir, "compat-loader.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);
    let directive = if args.verbose {
        "compat_loader=debug"
    } else {
        config.general.log_filter.as_str()
    };
    tracing_subscriber::fmt()
        .with_writer(non_blocking)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(directive)),
        )
        .init();

    tracing::info!("compat-loader starting");

    let app = App::new(config)?;

    match args.command {
        Command::Run { yes } => app.run(yes).await?,
        Command::Status => {
            println!("store: {}", app.store_path().display());
            for row in app.status() {
                println!("{row}");
            }
        }
        Command::Config {
            layer,
            enable,
            disable,
            custom_url,
            use_custom_url,
            reset,
        } => {
            let enabled = match (enable, disable) {
                (true, _) => Some(true),
                (_, true) => Some(false),
                _ => None,
            };
            let config = app.configure(
                &layer,
                ConfigUpdate {
                    enabled,
                    use_custom_url,
                    custom_url,
                    reset,
                },
            )?;
            println!(
                "{layer}: enabled={} useCustomURL={} customURL={}",
                config.enabled,
                config.use_custom_url,
                config.custom_url.as_deref().unwrap_or("")
            );
        }
        Command::ClearCache { layer } => {
            let cleared = app.clear_cache(layer.as_deref())?;
            for layer in cleared {
                println!("cleared {layer} cache");
            }
        }
        Command::ClearStores => {
            app.clear_stores()?;
            println!("cleared load dialog and cached payloads");
        }
    }

    Ok(())
}
