use std::{
    ffi::OsStr,
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Instant,
};

use image::{DynamicImage, ImageBuffer, ImageFormat, Rgb};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::{
    animation::{frame_times, resolve_scene, AnimationSource},
    environment::EnvironmentMap,
    render::{FrameRenderer, RenderMode, RenderTarget},
    scene::Scene,
    BhDiverError, Result,
};

/// Bit depth of written frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PixelFormat {
    #[default]
    Rgb8,
    Rgb16,
    /// Linear floating point, for formats that store it.
    Rgb32F,
}

impl PixelFormat {
    /// Whether files of `format` can hold this bit depth.
    pub fn supports(self, format: ImageFormat) -> bool {
        match self {
            Self::Rgb8 => matches!(
                format,
                ImageFormat::Png
                    | ImageFormat::Jpeg
                    | ImageFormat::Bmp
                    | ImageFormat::Tiff
                    | ImageFormat::Tga
                    | ImageFormat::Pnm
            ),
            Self::Rgb16 => matches!(format, ImageFormat::Png | ImageFormat::Tiff),
            Self::Rgb32F => matches!(format, ImageFormat::OpenExr),
        }
    }

    /// Converts a rendered frame, clamping integer formats to `[0, 1]`.
    pub fn encode(self, target: &RenderTarget) -> DynamicImage {
        let image = &target.image;
        match self {
            Self::Rgb8 => DynamicImage::ImageRgb8(ImageBuffer::from_fn(
                image.width(),
                image.height(),
                |x, y| Rgb(image.get_pixel(x, y).0.map(|c| quantize(c, u8::MAX as f32) as u8)),
            )),
            Self::Rgb16 => DynamicImage::ImageRgb16(ImageBuffer::from_fn(
                image.width(),
                image.height(),
                |x, y| Rgb(image.get_pixel(x, y).0.map(|c| quantize(c, u16::MAX as f32) as u16)),
            )),
            Self::Rgb32F => DynamicImage::ImageRgb32F(image.clone()),
        }
    }
}

fn quantize(value: f32, max: f32) -> f32 {
    if value.is_nan() {
        return 0.0;
    }
    (value.clamp(0.0, 1.0) * max).round()
}

/// Writes one frame to `path`, choosing the file format from its extension.
pub fn save_frame(target: &RenderTarget, path: impl AsRef<Path>, format: PixelFormat) -> Result<()> {
    let path = path.as_ref();
    let file_format = output_format(path, format)?;
    format.encode(target).save_with_format(path, file_format)?;
    debug!(?path, "frame written");
    Ok(())
}

fn output_format(path: &Path, format: PixelFormat) -> Result<ImageFormat> {
    let file_format = ImageFormat::from_path(path).map_err(|_| {
        BhDiverError::config(format!("unsupported output extension: {}", path.display()))
    })?;
    if !format.supports(file_format) {
        return Err(BhDiverError::config(format!(
            "{format:?} frames cannot be stored as {file_format:?}"
        )));
    }
    Ok(file_format)
}

/// Configuration options for the export subsystem.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecordingSettings {
    /// Template path; frames are written next to it as `stem.00001.ext`.
    pub output_path: PathBuf,
    pub pixel_format: PixelFormat,
    /// Observer proper time of the first frame.
    pub start_time: f64,
    /// Proper time covered by the whole sequence.
    pub duration: f64,
    pub frames: usize,
}

impl Default for RecordingSettings {
    fn default() -> Self {
        Self {
            output_path: PathBuf::from("render.png"),
            pixel_format: PixelFormat::Rgb8,
            start_time: 0.0,
            duration: 10.0,
            frames: 60,
        }
    }
}

impl RecordingSettings {
    pub fn validate(&self) -> Result<()> {
        output_format(&self.output_path, self.pixel_format)?;
        if !(self.start_time.is_finite() && self.duration.is_finite() && self.duration >= 0.0) {
            return Err(BhDiverError::config(
                "recording start and duration must be finite, with a non-negative duration",
            ));
        }
        if self.frames == 0 {
            return Err(BhDiverError::config("recording needs at least one frame"));
        }
        Ok(())
    }

    pub fn frame_times(&self) -> Vec<f64> {
        frame_times(self.start_time, self.duration, self.frames)
    }
}

/// Destination of exported frames.
pub trait FrameSink {
    fn write_frame(&mut self, index: usize, time: f64, frame: &RenderTarget) -> Result<()>;

    fn finish(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Numbered image files beside a template path.
#[derive(Debug)]
pub struct ImageSequenceSink {
    directory: PathBuf,
    stem: String,
    extension: String,
    pixel_format: PixelFormat,
    written: Vec<PathBuf>,
}

impl ImageSequenceSink {
    pub fn new(template: impl AsRef<Path>, pixel_format: PixelFormat) -> Result<Self> {
        let template = template.as_ref();
        output_format(template, pixel_format)?;

        let name = |part: Option<&OsStr>| {
            part.and_then(OsStr::to_str)
                .map(str::to_owned)
                .ok_or_else(|| BhDiverError::config(format!("invalid output path: {}", template.display())))
        };

        Ok(Self {
            directory: template.parent().map(Path::to_path_buf).unwrap_or_default(),
            stem: name(template.file_stem())?,
            extension: name(template.extension())?,
            pixel_format,
            written: Vec::new(),
        })
    }

    /// Path of the zero-based frame `index`; numbering starts at one.
    pub fn frame_path(&self, index: usize) -> PathBuf {
        self.directory
            .join(format!("{}.{:05}.{}", self.stem, index + 1, self.extension))
    }

    pub fn written(&self) -> &[PathBuf] {
        &self.written
    }
}

impl FrameSink for ImageSequenceSink {
    fn write_frame(&mut self, index: usize, _time: f64, frame: &RenderTarget) -> Result<()> {
        let path = self.frame_path(index);
        save_frame(frame, &path, self.pixel_format)?;
        self.written.push(path);
        Ok(())
    }
}

/// Outcome of an export run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordingSummary {
    pub frames_written: usize,
    pub frames_requested: usize,
    /// Whether the run ended early through [`Recorder::stop`].
    pub stopped: bool,
}

/// Renders an animation frame by frame in export mode and feeds a sink.
#[derive(Debug)]
pub struct Recorder {
    settings: RecordingSettings,
    stop_requested: Arc<AtomicBool>,
    is_recording: AtomicBool,
}

impl Recorder {
    pub fn new(settings: RecordingSettings) -> Self {
        Self {
            settings,
            stop_requested: Arc::new(AtomicBool::new(false)),
            is_recording: AtomicBool::new(false),
        }
    }

    pub fn settings(&self) -> &RecordingSettings {
        &self.settings
    }

    /// Flag that ends the run after the frame in progress.
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop_requested)
    }

    pub fn stop(&self) {
        self.stop_requested.store(true, Ordering::Release);
    }

    pub fn is_recording(&self) -> bool {
        self.is_recording.load(Ordering::Acquire)
    }

    /// Renders every frame time of the settings. Frames are never cut short;
    /// a stop request takes effect between frames.
    pub fn record(
        &self,
        renderer: &FrameRenderer,
        base: &Scene,
        source: &dyn AnimationSource,
        environment: &dyn EnvironmentMap,
        sink: &mut dyn FrameSink,
    ) -> Result<RecordingSummary> {
        self.settings.validate()?;
        let times = self.settings.frame_times();
        let started = Instant::now();
        info!(frames = times.len(), output = ?self.settings.output_path, "starting export");

        self.stop_requested.store(false, Ordering::Release);
        self.is_recording.store(true, Ordering::Release);
        let result = self.record_frames(renderer, base, source, environment, sink, &times);
        self.is_recording.store(false, Ordering::Release);

        let summary = result?;
        info!(
            written = summary.frames_written,
            stopped = summary.stopped,
            elapsed_s = started.elapsed().as_secs_f64(),
            "export finished"
        );
        Ok(summary)
    }

    fn record_frames(
        &self,
        renderer: &FrameRenderer,
        base: &Scene,
        source: &dyn AnimationSource,
        environment: &dyn EnvironmentMap,
        sink: &mut dyn FrameSink,
        times: &[f64],
    ) -> Result<RecordingSummary> {
        let mut summary = RecordingSummary {
            frames_written: 0,
            frames_requested: times.len(),
            stopped: false,
        };

        for (index, &time) in times.iter().enumerate() {
            if self.stop_requested.load(Ordering::Acquire) {
                info!(index, "export stopped");
                summary.stopped = true;
                break;
            }

            let scene = resolve_scene(base, source, time)?;
            let frame = renderer.render(RenderMode::Export, &scene, time, environment)?;
            sink.write_frame(index, time, &frame)?;
            summary.frames_written += 1;

            info!(
                frame = index + 1,
                of = times.len(),
                time,
                elapsed_ms = frame.stats.elapsed.as_secs_f64() * 1e3,
                "frame exported"
            );
        }

        sink.finish()?;
        Ok(summary)
    }
}
