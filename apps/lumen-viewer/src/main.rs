//! Lumen demo viewer.
//!
//! Runs the [`ClearRenderer`] with the stock plugins.
//!
//! ```bash
//! cargo run -p lumen-viewer -- --config viewer.toml -S
//! ```
//!
//! `RUST_LOG` sets the log filter (default `info`).

mod config;

use std::process::ExitCode;
use std::time::Duration;

use lumen_engine::PluginHost;
use lumen_plugins::{ClearRenderer, FrameStatsPlugin, ScreenshotPlugin};
use tracing::{error, info};

use crate::config::{Args, ViewerConfig};

fn main() -> ExitCode {
    lumen_engine::init_logging();

    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

fn run() -> anyhow::Result<()> {
    let args = Args::from_env()?;
    if args.help {
        print_help();
        return Ok(());
    }

    let mut config = match &args.config {
        Some(path) => ViewerConfig::load(path)?,
        None => ViewerConfig::default(),
    };
    config.apply(&args);

    let mut plugins = PluginHost::new();
    if let Some(screenshot) = config.screenshot.clone() {
        info!("Screenshots enabled: {}", screenshot.output_directory.display());
        plugins.add(Box::new(ScreenshotPlugin::new(screenshot)));
    }
    if config.stats.enabled {
        let interval = Duration::from_secs_f64(config.stats.interval_secs);
        plugins.add(Box::new(
            FrameStatsPlugin::new(interval).with_title(config.engine.title.clone()),
        ));
    }

    lumen_engine::run(config.engine, Box::new(ClearRenderer::new()), plugins)
}

fn print_help() {
    eprintln!(
        "Lumen demo viewer

USAGE:
    lumen-viewer [OPTIONS]

OPTIONS:
    -c, --config <PATH>     TOML config with [engine], [screenshot] and [stats] tables
    -S, --screenshot        Capture the first frame (F12 captures at any time)
    -f, --frames <FRAMES>   Frame numbers to capture, e.g. \"0,10,20\" or \"0-5\"
    --exit-after            Exit once the last scheduled capture is saved
    -h, --help              Print this help message

KEYS:
    F1-F9    Select a UI tab
    `        Toggle the overlay
    F5       Reload renderer assets (when fewer than 5 tabs exist)
    Space    Pause the clear animation

ENVIRONMENT VARIABLES:
    RUST_LOG                Set log level (e.g., info, debug, trace)"
    );
}
