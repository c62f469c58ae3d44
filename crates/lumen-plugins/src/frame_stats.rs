//! Periodic frame timing report.

use std::time::Duration;

use lumen_engine::{EngineContext, FrameContext, FrameTimings, Plugin, PluginPhase, TabsHost};
use tracing::info;

/// Aggregate over one reporting window.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct WindowReport {
    pub frames: u32,
    pub fps: f64,
    pub avg_ms: f64,
    pub worst_ms: f64,
}

/// Logs frame rate and frame time every `interval`, and optionally mirrors
/// them into the window title.
pub struct FrameStatsPlugin {
    interval: Duration,
    title: Option<String>,
    totals: FrameTimings,
    frames: u32,
    elapsed: f64,
    worst: f64,
    last: Option<WindowReport>,
}

impl FrameStatsPlugin {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            title: None,
            totals: FrameTimings::default(),
            frames: 0,
            elapsed: 0.0,
            worst: 0.0,
            last: None,
        }
    }

    /// Show each report as `"{title} | N fps"`.
    #[must_use]
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    /// The most recent report.
    pub fn last_report(&self) -> Option<WindowReport> {
        self.last
    }

    /// Add one frame; returns a report when the window is complete.
    pub fn record(&mut self, dt: f32) -> Option<WindowReport> {
        self.totals.record(dt);
        if dt <= 0.0 {
            return None;
        }
        let dt = f64::from(dt);
        self.frames += 1;
        self.elapsed += dt;
        self.worst = self.worst.max(dt);

        if self.elapsed < self.interval.as_secs_f64() {
            return None;
        }

        let report = WindowReport {
            frames: self.frames,
            fps: f64::from(self.frames) / self.elapsed,
            avg_ms: self.elapsed * 1000.0 / f64::from(self.frames),
            worst_ms: self.worst * 1000.0,
        };
        self.frames = 0;
        self.elapsed = 0.0;
        self.worst = 0.0;
        self.last = Some(report);
        Some(report)
    }
}

impl Default for FrameStatsPlugin {
    fn default() -> Self {
        Self::new(Duration::from_secs(1))
    }
}

impl Plugin for FrameStatsPlugin {
    fn name(&self) -> &str {
        "frame-stats"
    }

    fn phases(&self) -> PluginPhase {
        PluginPhase::PRE_RENDER | PluginPhase::CLEANUP
    }

    fn pre_render(&mut self, engine: &EngineContext, frame: &FrameContext) -> anyhow::Result<()> {
        let Some(report) = self.record(frame.dt) else {
            return Ok(());
        };
        info!(
            "{:.1} fps, {:.2} ms avg, {:.2} ms worst over {} frames",
            report.fps, report.avg_ms, report.worst_ms, report.frames
        );
        if let Some(title) = &self.title {
            engine
                .services()
                .lock()
                .set_main_window_title(&format!("{title} | {:.0} fps", report.fps));
        }
        Ok(())
    }

    fn cleanup(&mut self, _engine: &EngineContext) {
        self.totals.log_summary();
    }
}
