//! Frame renderer.
//!
//! Every output pixel is independent: its camera ray is converted through the
//! observer frame, traced backwards through spacetime and coloured by the
//! environment. Rows are grouped into tiles that rayon workers fill in a
//! freshly allocated buffer, so an abandoned frame never touches an image
//! that is already on display.

use std::{
    ops::Add,
    sync::atomic::{AtomicBool, Ordering},
    time::{Duration, Instant},
};

use image::{Rgb, Rgb32FImage};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::{
    camera::{RayGenerator, Resolution},
    environment::{Color, EnvironmentMap, EnvironmentSampler},
    geodesic::{GeodesicIntegrator, IntegratorSettings, RayOutcome},
    observer::ObserverFrame,
    scene::Scene,
    BhDiverError, Result,
};

const MAX_SUPER_SAMPLING: u32 = 8;

/// Which quality profile a frame is rendered with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RenderMode {
    /// Interactive preview: reduced budget and resolution.
    Viewport,
    /// Final output at full fidelity.
    Export,
}

/// Cost/fidelity knobs of one render mode.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QualityProfile {
    pub integrator: IntegratorSettings,
    /// Fraction of the camera resolution actually rendered, in `(0, 1]`.
    pub resolution_scale: f64,
    /// Samples per pixel along each axis, averaged with a box filter.
    pub super_sampling: u32,
    /// Rows handed to a worker at a time.
    pub tile_rows: u32,
}

impl Default for QualityProfile {
    fn default() -> Self {
        Self::export()
    }
}

impl QualityProfile {
    pub fn viewport() -> Self {
        Self {
            integrator: IntegratorSettings::interactive(),
            resolution_scale: 0.5,
            super_sampling: 1,
            tile_rows: 8,
        }
    }

    pub fn export() -> Self {
        Self {
            integrator: IntegratorSettings::default(),
            resolution_scale: 1.0,
            super_sampling: 1,
            tile_rows: 4,
        }
    }

    pub fn validate(&self) -> Result<()> {
        self.integrator.validate()?;
        if !(self.resolution_scale > 0.0 && self.resolution_scale <= 1.0) {
            return Err(BhDiverError::config(format!(
                "resolution scale must lie in (0, 1], got {}",
                self.resolution_scale
            )));
        }
        if !(1..=MAX_SUPER_SAMPLING).contains(&self.super_sampling) {
            return Err(BhDiverError::config(format!(
                "super sampling must lie in 1..={MAX_SUPER_SAMPLING}, got {}",
                self.super_sampling
            )));
        }
        if self.tile_rows == 0 {
            return Err(BhDiverError::config("tile rows must be at least one"));
        }
        Ok(())
    }

    /// Resolution the profile produces for a camera of `resolution`.
    pub fn output_resolution(&self, resolution: Resolution) -> Resolution {
        if self.resolution_scale == 1.0 {
            resolution
        } else {
            resolution.scaled(self.resolution_scale)
        }
    }
}

/// Quality profiles for both render modes.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    pub viewport: QualityProfile,
    pub export: QualityProfile,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            viewport: QualityProfile::viewport(),
            export: QualityProfile::export(),
        }
    }
}

impl RenderConfig {
    pub fn profile(&self, mode: RenderMode) -> &QualityProfile {
        match mode {
            RenderMode::Viewport => &self.viewport,
            RenderMode::Export => &self.export,
        }
    }

    pub fn validate(&self) -> Result<()> {
        self.viewport.validate()?;
        self.export.validate()
    }
}

/// Per-frame integration counters, one entry per traced sample.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RenderStats {
    pub captured: u64,
    pub escaped: u64,
    /// Samples whose step budget ran out and were classified by the
    /// nearest-terminal rule.
    pub exhausted: u64,
    pub steps: u64,
    pub elapsed: Duration,
}

impl RenderStats {
    pub fn samples(&self) -> u64 {
        self.captured + self.escaped
    }
}

impl Add for RenderStats {
    type Output = Self;

    fn add(self, other: Self) -> Self {
        Self {
            captured: self.captured + other.captured,
            escaped: self.escaped + other.escaped,
            exhausted: self.exhausted + other.exhausted,
            steps: self.steps + other.steps,
            elapsed: self.elapsed + other.elapsed,
        }
    }
}

/// A completed frame.
#[derive(Debug, Clone)]
pub struct RenderTarget {
    pub image: Rgb32FImage,
    pub stats: RenderStats,
}

impl RenderTarget {
    pub fn resolution(&self) -> Resolution {
        Resolution::new(self.image.width(), self.image.height())
    }

    pub fn pixel(&self, x: u32, y: u32) -> Color {
        let Rgb([r, g, b]) = *self.image.get_pixel(x, y);
        Color::new(r, g, b)
    }
}

/// Renders scenes with the configured quality profiles.
#[derive(Debug, Clone, Default)]
pub struct FrameRenderer {
    config: RenderConfig,
}

impl FrameRenderer {
    pub fn new(config: RenderConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &RenderConfig {
        &self.config
    }

    /// Renders `scene` at observer proper time `time`. Configuration errors
    /// are reported before any pixel work starts.
    pub fn render(
        &self,
        mode: RenderMode,
        scene: &Scene,
        time: f64,
        environment: &dyn EnvironmentMap,
    ) -> Result<RenderTarget> {
        self.render_cancellable(mode, scene, time, environment, &|| false)?
            .ok_or_else(|| BhDiverError::msg("render was cancelled"))
    }

    /// Like [`render`](Self::render), but checks `is_cancelled` before each
    /// tile and returns `Ok(None)` once it reports true. A cancelled frame
    /// yields no image at all.
    pub fn render_cancellable(
        &self,
        mode: RenderMode,
        scene: &Scene,
        time: f64,
        environment: &dyn EnvironmentMap,
        is_cancelled: &(dyn Fn() -> bool + Sync),
    ) -> Result<Option<RenderTarget>> {
        let job = FrameJob::prepare(self.config.profile(mode), scene, time)?;
        let started = Instant::now();

        let output = job.output;
        let row_len = output.width as usize * 3;
        let tile_len = row_len * job.tile_rows as usize;
        let mut buffer = vec![0.0_f32; output.pixel_count() * 3];
        let abandoned = AtomicBool::new(false);
        let sampler = EnvironmentSampler::new(environment);

        let stats = buffer
            .par_chunks_mut(tile_len)
            .enumerate()
            .map(|(tile, pixels)| {
                if abandoned.load(Ordering::Relaxed) || is_cancelled() {
                    abandoned.store(true, Ordering::Relaxed);
                    return RenderStats::default();
                }
                let first_row = tile * job.tile_rows as usize;
                job.fill_tile(&sampler, first_row as u32, pixels)
            })
            .reduce(RenderStats::default, |a, b| a + b);

        if abandoned.load(Ordering::Relaxed) {
            debug!(?mode, time, "frame abandoned");
            return Ok(None);
        }

        let image = Rgb32FImage::from_raw(output.width, output.height, buffer)
            .ok_or_else(|| BhDiverError::msg("render buffer does not match its resolution"))?;
        let stats = RenderStats {
            elapsed: started.elapsed(),
            ..stats
        };

        if stats.exhausted > 0 {
            warn!(
                exhausted = stats.exhausted,
                samples = stats.samples(),
                "step budget exhausted for some rays"
            );
        }
        debug!(
            ?mode,
            time,
            resolution = %output,
            captured = stats.captured,
            escaped = stats.escaped,
            steps = stats.steps,
            elapsed_ms = stats.elapsed.as_secs_f64() * 1e3,
            "frame rendered"
        );

        Ok(Some(RenderTarget { image, stats }))
    }
}

/// Everything resolved once per frame and shared read-only by the workers.
struct FrameJob {
    output: Resolution,
    super_sampling: u32,
    tile_rows: u32,
    rays: RayGenerator,
    frame: ObserverFrame,
    integrator: GeodesicIntegrator,
}

impl FrameJob {
    fn prepare(profile: &QualityProfile, scene: &Scene, time: f64) -> Result<Self> {
        profile.validate()?;
        scene.validate()?;
        if !time.is_finite() {
            return Err(BhDiverError::config(format!(
                "animation time must be finite, got {time}"
            )));
        }

        let spacetime = scene.spacetime()?;
        let state = scene.infall()?.state_at(time);
        if state.is_inside_horizon() {
            debug!(radius = state.radius, time, "observer is inside the horizon");
        }

        let output = profile.output_resolution(scene.camera.resolution);
        let samples = output.multiplied(profile.super_sampling);

        Ok(Self {
            output,
            super_sampling: profile.super_sampling,
            tile_rows: profile.tile_rows,
            rays: RayGenerator::new(&scene.camera, samples)?,
            frame: ObserverFrame::new(state, &spacetime),
            integrator: GeodesicIntegrator::new(spacetime, profile.integrator),
        })
    }

    fn fill_tile(
        &self,
        sampler: &EnvironmentSampler<'_>,
        first_row: u32,
        pixels: &mut [f32],
    ) -> RenderStats {
        let width = self.output.width as usize;
        let mut stats = RenderStats::default();

        for (offset, rgb) in pixels.chunks_exact_mut(3).enumerate() {
            let x = (offset % width) as u32;
            let y = first_row + (offset / width) as u32;
            let color = self.shade(sampler, x, y, &mut stats);
            rgb.copy_from_slice(&color.to_array());
        }

        stats
    }

    /// Box-filtered colour of output pixel `(x, y)`.
    fn shade(
        &self,
        sampler: &EnvironmentSampler<'_>,
        x: u32,
        y: u32,
        stats: &mut RenderStats,
    ) -> Color {
        let n = self.super_sampling;
        let mut sum = Color::ZERO;

        for j in 0..n {
            for i in 0..n {
                let view = self.rays.direction(x * n + i, y * n + j);
                let (plane, initial) = self.frame.view_ray(view);
                let trace = self.integrator.trace(initial);

                match trace.outcome {
                    RayOutcome::Captured => stats.captured += 1,
                    RayOutcome::Escaped { .. } => stats.escaped += 1,
                }
                stats.exhausted += u64::from(trace.exhausted);
                stats.steps += u64::from(trace.steps);
                sum += sampler.sample(trace.outcome, &plane);
            }
        }

        sum / (n * n) as f32
    }
}
