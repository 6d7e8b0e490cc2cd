//! ==============================================================================
//! main.rs - telemetry hub entry point
//! ==============================================================================
//!
//! purpose:
//!     wires the hub together: configuration, serial acquisition, the
//!     broadcast hub and the web server. runs until ctrl-c.
//!
//! responsibilities:
//!     - parse cli flags and merge them over hub.toml
//!     - start the acquisition thread (real port or simulator)
//!     - forward telemetry from the acquisition channel into the hub
//!     - serve websocket + http, report frontend urls once ready
//!     - stop acquisition on shutdown
//!
//! architecture:
//!
//!     ┌──────────────────────┐   bounded mpsc   ┌─────────────────────┐
//!     │ acquisition thread   │ ───────────────> │ telemetry forwarder │
//!     │ (serial / simulator) │                  │   (tokio task)      │
//!     └──────────▲───────────┘                  └──────────┬──────────┘
//!                │ set_port / ports_report                 │ data_update
//!                │                               ┌─────────▼─────────┐
//!                └────────────────────────────── │       hub         │
//!                                                │ sessions + perms  │
//!                                                └─────────┬─────────┘
//!                                                          │ per-session channel
//!                                                ┌─────────▼─────────┐
//!                                                │ axum /ws sessions │
//!                                                └───────────────────┘
//!
//! ==============================================================================

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::mpsc;
use tracing_subscriber::{layer::SubscriberExt, reload, util::SubscriberInitExt, EnvFilter};

use telemetry_hub::acquisition::{AcquisitionControl, AcquisitionSource};
use telemetry_hub::broadcast::Hub;
use telemetry_hub::config::HubConfig;
use telemetry_hub::hal::SystemSerial;
use telemetry_hub::launcher::{wait_for_server, FrontendUrls};
use telemetry_hub::server;
use telemetry_hub::widgets::WidgetCatalog;

/// records buffered between the acquisition thread and the hub
const TELEMETRY_BUFFER: usize = 256;
const READY_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Parser)]
#[command(name = "telemetry-hub")]
#[command(about = "Streams serial sensor telemetry to live dashboard clients")]
struct Cli {
    /// Path to configuration file (default: config/hub.toml, then ../config/hub.toml)
    #[arg(short, long, env = "HUB_CONFIG")]
    config: Option<PathBuf>,

    /// Serial device, or SIMULATOR (overrides config file)
    #[arg(long, env = "HUB_SERIAL_PORT")]
    serial_port: Option<String>,

    /// Baud rate (overrides config file)
    #[arg(long)]
    baud_rate: Option<u32>,

    /// Bind host (overrides config file)
    #[arg(long, env = "HUB_HOST")]
    host: Option<String>,

    /// Bind port (overrides config file)
    #[arg(short, long, env = "HUB_PORT")]
    port: Option<u16>,

    /// Redirect pages to the frontend dev server
    #[arg(long)]
    dev: bool,
}

impl Cli {
    fn apply(&self, config: &mut HubConfig) {
        if let Some(port) = &self.serial_port {
            config.serial.port = port.clone();
        }
        if let Some(baud) = self.baud_rate {
            config.serial.baud_rate = baud;
        }
        if let Some(host) = &self.host {
            config.server.host = host.clone();
        }
        if let Some(port) = self.port {
            config.server.port = port;
        }
        if self.dev {
            config.server.dev_mode = true;
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // RUST_LOG wins; otherwise the config file's level is applied once loaded
    let env_filter = EnvFilter::try_from_default_env().ok();
    let from_env = env_filter.is_some();
    let (filter, filter_handle) =
        reload::Layer::new(env_filter.unwrap_or_else(|| EnvFilter::new("telemetry_hub=info")));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    // step 1: configuration
    let mut config = match &cli.config {
        Some(path) => HubConfig::load(path).with_context(|| format!("loading {}", path.display()))?,
        None => HubConfig::load_or_default(),
    };
    cli.apply(&mut config);
    if !from_env {
        filter_handle.reload(EnvFilter::new(format!("telemetry_hub={}", config.logging.level)))?;
    }
    config.log_summary();

    // step 2: widget catalog
    let catalog = WidgetCatalog::load_or_empty(&config.widgets);

    // step 3: acquisition on its own thread
    let control = Arc::new(AcquisitionControl::new(Arc::new(SystemSerial::new()), &config.serial));
    let source = AcquisitionSource::new(control.clone(), &config.serial, &config.simulator);
    let (records_tx, records_rx) = mpsc::channel(TELEMETRY_BUFFER);
    let acquisition = source
        .spawn(records_tx, config.serial.join_timeout())
        .context("starting acquisition thread")?;

    // step 4: hub + telemetry forwarder
    let hub = Hub::new(catalog)
        .with_acquisition(control)
        .with_sensor_logging(config.logging.show_sensor_data);
    tokio::spawn(hub.clone().run_telemetry(records_rx));

    // step 5: web server
    let bind = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&bind)
        .await
        .with_context(|| format!("binding {}", bind))?;
    let local: SocketAddr = listener.local_addr()?;
    tracing::info!("listening on {}", local);

    let urls = FrontendUrls::new(
        &config.server.host,
        local.port(),
        config.server.dev_mode,
        config.server.dev_server_port,
    );
    let probe_url = format!("http://127.0.0.1:{}/", local.port());
    tokio::spawn(async move {
        if wait_for_server(&probe_url, READY_TIMEOUT).await {
            tracing::info!(viewer = %urls.viewer, admin = %urls.admin, "dashboard ready");
        } else {
            tracing::warn!("server did not answer within {:?}", READY_TIMEOUT);
        }
    });

    let app = server::router(hub, config.server.clone());
    server::serve(listener, app, async {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!("shutdown requested");
    })
    .await?;

    // step 6: stop acquisition (bounded wait)
    let stopped = tokio::task::spawn_blocking(move || acquisition.stop()).await?;
    if stopped {
        tracing::info!("acquisition stopped cleanly");
    }
    Ok(())
}
