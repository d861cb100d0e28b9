//! Billboard Daemon - Synchronized Signage Runner
//!
//! Loads the billboard configuration, launches one render session per
//! attached display, and keeps every display rotating in lockstep until it
//! is told to stop.
//!
//! # Usage
//!
//! ```bash
//! # Start with the default configuration file
//! billboard-daemon
//!
//! # Explicit configuration file
//! billboard-daemon --config /etc/billboard/billboard.toml
//!
//! # Validate the configuration and exit
//! billboard-daemon --config ./billboard.toml --check
//!
//! # Verbose logging
//! RUST_LOG=debug billboard-daemon
//! ```
//!
//! # Environment Variables
//!
//! - `BILLBOARD_CONFIG`: configuration file path
//! - `RUST_LOG`: log filter (defaults to `billboard_core=info,billboard_daemon=info`)
//!
//! # Signals
//!
//! - `SIGTERM` / `SIGINT`: close every display and exit
//! - `SIGHUP`: relaunch every display

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use billboard_core::render::{ConfigFileEnumerator, HeadlessBackend, StaticEnumerator};
use billboard_core::{
    default_config_path, load_config, BillboardToml, ConfigOverrides, DisplayEnumerator,
    Orchestrator, OrchestratorEvent, Settings,
};
use clap::Parser;
use tokio::signal::unix::{signal, SignalKind};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// Billboard Daemon - rotate web pages across every attached display
#[derive(Parser, Debug)]
#[command(name = "billboard-daemon")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file path
    #[arg(short = 'c', long, env = "BILLBOARD_CONFIG", value_name = "FILE")]
    config: Option<PathBuf>,

    /// Page shown on every display while sessions launch
    #[arg(long, value_name = "URL")]
    launch_url: Option<String>,

    /// Spare surfaces per display used for preloading (0 disables it)
    #[arg(long, value_name = "COUNT")]
    prepare_pages: Option<usize>,

    /// Do not watch for displays being attached or removed
    #[arg(long)]
    no_watch: bool,

    /// Validate the configuration, print a summary, and exit
    #[arg(long)]
    check: bool,
}

impl Args {
    fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            launch_url: self.launch_url.clone(),
            prepare_pages: self.prepare_pages,
            watch_displays: self.no_watch.then_some(false),
        }
    }

    /// The configuration file the daemon reads, if any
    fn config_path(&self) -> Option<PathBuf> {
        self.config
            .clone()
            .or_else(|| default_config_path().filter(|path| path.exists()))
    }
}

/// Load the file (or defaults) and layer the command line on top
fn load(args: &Args) -> Result<BillboardToml> {
    let mut config = load_config(args.config.as_deref()).context("Failed to load configuration")?;
    args.overrides().apply(&mut config);
    Ok(config)
}

/// Screens come from the config file when there is one, so edits to its
/// `screens` table are picked up by the display watch
fn enumerator(path: Option<&Path>, config: &BillboardToml) -> Arc<dyn DisplayEnumerator> {
    match path {
        Some(path) => Arc::new(ConfigFileEnumerator::new(path)),
        None => match &config.screens {
            Some(screens) if !screens.is_empty() => Arc::new(StaticEnumerator::new(screens.clone())),
            _ => Arc::new(StaticEnumerator::default()),
        },
    }
}

fn summary(settings: &Settings) -> String {
    let mut lines = vec![
        format!("launch url:      {}", settings.launch_url),
        format!("launch timeout:  {}s", settings.launch_timeout.as_secs()),
        format!(
            "preloading:      {} ({} spare surface(s), {}ms lead)",
            if settings.preload_enabled() { "on" } else { "off" },
            settings.prepare_pages,
            settings.preparation_time.as_millis()
        ),
        format!(
            "display watch:   {} (every {}s)",
            if settings.watch_displays { "on" } else { "off" },
            settings.watch_interval.as_secs()
        ),
    ];
    for (index, display) in settings.displays.iter().enumerate() {
        let state = if display.ignore { " [ignored]" } else { "" };
        lines.push(format!(
            "display {index}:       {} page(s), {} {}ms{state}",
            display.pages.len(),
            display.transition.kind,
            display.transition.duration_ms
        ));
        for page in &display.pages {
            lines.push(format!("  {}ms  {}", page.air_time.as_millis(), page.url));
        }
    }
    lines.join("\n")
}

fn log_events(orchestrator: &Orchestrator) {
    let mut events = orchestrator.subscribe();
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match event {
                OrchestratorEvent::SessionsLaunched { run, displays } => {
                    info!(run, displays, "Displays launched");
                }
                OrchestratorEvent::ContentShown { display: index, surface, url } => {
                    info!(display = index, surface, url = %url, "On air");
                }
                OrchestratorEvent::ContentLoaded { .. } => {}
                OrchestratorEvent::Restarting { reason } => {
                    warn!(reason = ?reason, "Relaunching displays");
                }
                OrchestratorEvent::Stopped => break,
            }
        }
    });
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("billboard_daemon=info".parse()?)
                .add_directive("billboard_core=info".parse()?),
        )
        .with_target(true)
        .init();

    let args = Args::parse();
    let config = load(&args)?;

    if args.check {
        let settings = Settings::resolve(&config).context("Invalid configuration")?;
        println!("{}", summary(&settings));
        return Ok(());
    }

    let path = args.config_path();
    info!(
        version = env!("CARGO_PKG_VERSION"),
        config = ?path,
        "Starting billboard daemon"
    );

    let orchestrator = Orchestrator::new(
        enumerator(path.as_deref(), &config),
        Arc::new(HeadlessBackend::new()),
    );
    log_events(&orchestrator);

    let running = orchestrator.clone();
    let mut run = tokio::spawn(async move { running.start(&config).await });

    let mut terminate =
        signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;
    let mut hangup = signal(SignalKind::hangup()).context("Failed to install SIGHUP handler")?;

    let result = loop {
        tokio::select! {
            result = &mut run => break result,
            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl+C, shutting down");
                orchestrator.exit().await;
            }
            _ = terminate.recv() => {
                info!("Received SIGTERM, shutting down");
                orchestrator.exit().await;
            }
            _ = hangup.recv() => {
                info!("Received SIGHUP, relaunching displays");
                orchestrator.restart().await;
            }
        }
    };

    match result.context("Orchestrator task failed")? {
        Ok(()) => {
            info!("Billboard daemon stopped");
            Ok(())
        }
        Err(e) => {
            error!(error = %e, "Orchestrator failed");
            Err(e.into())
        }
    }
}
