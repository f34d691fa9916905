//! rdpshot: capture a settled screenshot of each remote desktop given.
//!
//! ```text
//! rdpshot host1 host2:3390          Capture with defaults
//! rdpshot -w 1280 -l 1024 -o shots/ host
//! rdpshot --config <path> host      Use custom config TOML
//! rdpshot --gen-config              Dump default config and exit
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use rdpshot_core::{TcpProtocolClient, Target, capture_all};

use rdpshot::config::RdpshotConfig;

// ── CLI ──────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "rdpshot", about = "Screenshot remote desktops once they settle")]
struct Cli {
    /// Targets as host or host:port.
    targets: Vec<String>,

    /// Desktop width.
    #[arg(short = 'w', long)]
    width: Option<u32>,

    /// Desktop height.
    #[arg(short = 'l', long)]
    height: Option<u32>,

    /// Output path prefix; the host name is appended.
    #[arg(short = 'o', long)]
    output: Option<String>,

    /// Seconds without screen updates before capturing.
    #[arg(short = 't', long)]
    timeout: Option<f64>,

    /// JPEG quality, 1-100.
    #[arg(short = 'q', long)]
    quality: Option<u8>,

    /// Path to configuration TOML file.
    #[arg(short, long, default_value = "rdpshot.toml")]
    config: PathBuf,

    /// Print the default configuration to stdout and exit.
    #[arg(long)]
    gen_config: bool,
}

impl Cli {
    /// Flags given on the command line win over the config file.
    fn apply_overrides(&self, config: &mut RdpshotConfig) {
        if let Some(width) = self.width {
            config.capture.width = width;
        }
        if let Some(height) = self.height {
            config.capture.height = height;
        }
        if let Some(output) = &self.output {
            config.capture.output_prefix = output.clone();
        }
        if let Some(timeout) = self.timeout {
            config.capture.idle_timeout_secs = timeout;
        }
        if let Some(quality) = self.quality {
            config.capture.jpeg_quality = quality;
        }
    }
}

// ── Main ─────────────────────────────────────────────────────────

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    if cli.gen_config {
        let text = toml::to_string_pretty(&RdpshotConfig::default())?;
        println!("{text}");
        return Ok(());
    }

    let mut config = RdpshotConfig::load(&cli.config);
    cli.apply_overrides(&mut config);

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("rdpshot v{}", env!("CARGO_PKG_VERSION"));

    let targets: Vec<Target> = cli
        .targets
        .iter()
        .filter_map(|raw| match Target::parse_with_default(raw, config.network.default_port) {
            Ok(target) => Some(target),
            Err(e) => {
                error!("skipping {raw}: {e}");
                None
            }
        })
        .collect();

    if targets.is_empty() {
        warn!("no targets to capture");
        return Ok(());
    }

    let settings = config.to_session_settings();
    let client = Arc::new(TcpProtocolClient::new(config.connect_timeout()));
    let summary = capture_all(client, targets, settings).await;

    info!(
        "done: {} saved, {} failed to connect, {} lost, {} not written",
        summary.saved.len(),
        summary.failed,
        summary.lost,
        summary.save_failures
    );

    Ok(())
}
