//! Viewer configuration: TOML file plus command line overrides.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use lumen_engine::EngineConfig;
use lumen_plugins::screenshot::{parse_frame_indices, ScreenshotConfig};
use serde::Deserialize;

/// Contents of the viewer's TOML file.
///
/// ```toml
/// [engine]
/// title = "Lumen"
/// vsync = false
///
/// [screenshot]
/// output_directory = "shots"
/// frames = "0,60"
///
/// [stats]
/// interval_secs = 2.0
/// ```
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ViewerConfig {
    pub engine: EngineConfig,
    /// The screenshot plugin is attached when this table is present.
    pub screenshot: Option<ScreenshotConfig>,
    pub stats: StatsConfig,
}

impl Default for ViewerConfig {
    fn default() -> Self {
        Self {
            engine: EngineConfig::new("Lumen Viewer"),
            screenshot: None,
            stats: StatsConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StatsConfig {
    pub enabled: bool,
    pub interval_secs: f64,
}

impl Default for StatsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 1.0,
        }
    }
}

impl ViewerConfig {
    pub fn from_toml_str(text: &str) -> anyhow::Result<Self> {
        let config: Self = toml::from_str(text)?;
        config.engine.validate()?;
        if !(config.stats.interval_secs.is_finite() && config.stats.interval_secs >= 0.0) {
            bail!("stats.interval_secs must be a non-negative number");
        }
        Ok(config)
    }

    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        Self::from_toml_str(&text).with_context(|| format!("Invalid config {}", path.display()))
    }

    /// Fold command line overrides in.
    pub fn apply(&mut self, args: &Args) {
        if !args.screenshot && args.frames.is_none() && !args.exit_after {
            return;
        }
        let screenshot = self.screenshot.get_or_insert_with(ScreenshotConfig::default);
        if args.screenshot {
            screenshot.capture_on_start = true;
        }
        if let Some(frames) = &args.frames {
            screenshot.frames.extend(frames.iter().copied());
        }
        if args.exit_after {
            screenshot.exit_after_capture = true;
        }
    }
}

/// Parsed command line.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Args {
    pub config: Option<PathBuf>,
    /// Capture the first frame.
    pub screenshot: bool,
    /// Extra frames to capture.
    pub frames: Option<Vec<u64>>,
    pub exit_after: bool,
    pub help: bool,
}

impl Args {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::parse(std::env::args().skip(1))
    }

    pub fn parse(args: impl IntoIterator<Item = String>) -> anyhow::Result<Self> {
        let mut parsed = Self::default();
        let mut args = args.into_iter();

        while let Some(arg) = args.next() {
            match arg.as_str() {
                "-c" | "--config" => {
                    let path = args.next().context("--config needs a path")?;
                    parsed.config = Some(PathBuf::from(path));
                }
                "-S" | "--screenshot" => parsed.screenshot = true,
                "-f" | "--frames" => {
                    let list = args.next().context("--frames needs a list")?;
                    parsed.frames = Some(parse_frame_indices(&list)?.into_iter().collect());
                }
                "--exit-after" => parsed.exit_after = true,
                "-h" | "--help" => parsed.help = true,
                other => bail!("Unknown argument: {other} (see --help)"),
            }
        }

        Ok(parsed)
    }
}
