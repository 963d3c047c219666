//! mxcast receiver entry point.
//!
//! ```text
//! mxcast-receiver                  Listen and write frames to disk
//! mxcast-receiver --config <path>  Load a custom config TOML
//! mxcast-receiver --listen <addr>  Override the listen address
//! mxcast-receiver --gen-config     Write default config to stdout
//! ```

use std::path::PathBuf;

use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use mxcast_core::WireFormat;
use mxcast_receiver::config::ReceiverConfig;
use mxcast_receiver::service::ReceiverService;

// ── CLI ──────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "mxcast-receiver", about = "Reassemble mxcast frames and write them as PNG")]
struct Cli {
    /// Path to configuration TOML file.
    #[arg(short, long, default_value = "mxcast-receiver.toml")]
    config: PathBuf,

    /// Listen address, overriding `[network] listen`.
    #[arg(long)]
    listen: Option<String>,

    /// Wire format to accept, overriding `[assembly] format`.
    #[arg(long)]
    format: Option<WireFormat>,

    /// Output directory, overriding `[output] directory`.
    #[arg(short, long)]
    out: Option<PathBuf>,

    /// Print the default configuration to stdout and exit.
    #[arg(long)]
    gen_config: bool,
}

// ── Main ─────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // --gen-config: dump defaults and exit.
    if cli.gen_config {
        let text = toml::to_string_pretty(&ReceiverConfig::default())?;
        println!("{text}");
        return Ok(());
    }

    let mut config = ReceiverConfig::load(&cli.config);
    if let Some(listen) = cli.listen {
        config.network.listen = listen;
    }
    if let Some(format) = cli.format {
        config.assembly.format = format;
    }
    if let Some(out) = cli.out {
        config.output.directory = out;
    }

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("mxcast-receiver v{}", env!("CARGO_PKG_VERSION"));
    info!("listen: {}", config.network.listen);
    info!("format: {}", config.assembly.format);
    info!("output: {}", config.output.directory.display());

    let service = ReceiverService::new(config);
    let shutdown = service.shutdown_token();

    // Ctrl-C handler.
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Ctrl-C received, shutting down");
        shutdown.cancel();
    });

    service.run().await?;

    Ok(())
}
