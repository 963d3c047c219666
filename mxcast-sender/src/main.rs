//! mxcast sender entry point.
//!
//! ```text
//! mxcast-sender send <images..>             Send each image once
//! mxcast-sender preview <image> -o out.png  Write the 128x128 preview
//! mxcast-sender interactive <images..>      n/p/s/w/q on stdin
//! mxcast-sender --config <path>             Load a custom config TOML
//! mxcast-sender --gen-config                Write default config to stdout
//! ```

use std::path::PathBuf;

use clap::{Args, CommandFactory, Parser, Subcommand};
use tokio::io::BufReader;
use tracing::info;
use tracing_subscriber::EnvFilter;

use mxcast_core::{ByteOrder, FrameSender, Image, PixelConverter, WireFormat};
use mxcast_sender::app::{CastApp, open_transport, spawn_link_monitor};
use mxcast_sender::config::AppConfig;
use mxcast_sender::playlist::Playlist;

// ── CLI ──────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "mxcast-sender", about = "Send images to a 128x128 RGB565 display")]
struct Cli {
    /// Path to configuration TOML file.
    #[arg(short, long, default_value = "mxcast-sender.toml")]
    config: PathBuf,

    /// Print the default configuration to stdout and exit.
    #[arg(long)]
    gen_config: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Send each image once, in order.
    Send {
        #[arg(required = true)]
        images: Vec<PathBuf>,
        #[command(flatten)]
        link: LinkArgs,
    },
    /// Convert one image and write the preview PNG.
    Preview {
        image: PathBuf,
        /// Output PNG path.
        #[arg(short, long)]
        out: PathBuf,
        /// Byte order used for the conversion.
        #[arg(long)]
        byte_order: Option<ByteOrder>,
    },
    /// Browse and send images from stdin commands.
    Interactive {
        #[arg(required = true)]
        images: Vec<PathBuf>,
        #[command(flatten)]
        link: LinkArgs,
    },
}

/// Overrides for the `[transport]` and `[frame]` config sections.
#[derive(Args, Debug)]
struct LinkArgs {
    /// Broker or device address (`host:port`).
    #[arg(long)]
    address: Option<String>,
    /// Wire format: `binary` or `json`.
    #[arg(long)]
    format: Option<WireFormat>,
    /// Raw payload bytes per chunk.
    #[arg(long)]
    chunk_size: Option<usize>,
    /// Publish to an in-memory transport instead of the network.
    #[arg(long)]
    dry_run: bool,
}

impl LinkArgs {
    fn apply(&self, config: &mut AppConfig) {
        if let Some(address) = &self.address {
            config.transport.address = address.clone();
        }
        if let Some(format) = self.format {
            config.frame.format = format;
        }
        if let Some(chunk_size) = self.chunk_size {
            config.frame.chunk_size = chunk_size;
        }
    }
}

// ── Main ─────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // --gen-config: dump defaults and exit.
    if cli.gen_config {
        let text = toml::to_string_pretty(&AppConfig::default())?;
        println!("{text}");
        return Ok(());
    }

    let Some(command) = cli.command else {
        Cli::command().print_help()?;
        return Ok(());
    };

    let mut config = AppConfig::load(&cli.config);

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("mxcast-sender v{}", env!("CARGO_PKG_VERSION"));

    match command {
        Command::Preview {
            image,
            out,
            byte_order,
        } => {
            let converter = PixelConverter::new(byte_order.unwrap_or(config.frame.byte_order));
            let buffer = converter.convert(&Image::open(&image)?)?;
            buffer.save_preview(&out)?;
            println!("Preview written to {}", out.display());
        }
        Command::Send { images, link } => {
            link.apply(&mut config);
            let mut app = build_app(&config, images, link.dry_run).await?;
            let failed = app.send_all().await;
            if failed > 0 {
                return Err(format!("{failed} image(s) failed to send").into());
            }
        }
        Command::Interactive { images, link } => {
            link.apply(&mut config);
            let mut app = build_app(&config, images, link.dry_run).await?;
            println!("commands: n(ext) p(rev) s(end) w <file.png> q(uit)");

            let stdin = BufReader::new(tokio::io::stdin());
            tokio::select! {
                result = app.run_interactive(stdin) => result?,
                _ = tokio::signal::ctrl_c() => info!("Ctrl-C received, shutting down"),
            }
        }
    }

    Ok(())
}

async fn build_app(
    config: &AppConfig,
    images: Vec<PathBuf>,
    dry_run: bool,
) -> Result<CastApp, Box<dyn std::error::Error>> {
    let sender_config = config.to_sender_config();
    info!(
        address = %config.transport.address,
        format = %sender_config.format,
        chunk_size = sender_config.chunk_size,
        "sender configured"
    );

    let transport = open_transport(config, dry_run).await;
    spawn_link_monitor(&transport, |state| println!("link: {state}"));

    let sender = FrameSender::new(transport, sender_config)?;
    let mut app = CastApp::new(sender, Playlist::new(images));
    app.on_status(|msg| println!("{msg}"));
    Ok(app)
}
