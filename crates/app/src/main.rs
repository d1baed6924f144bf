mod timeline;

use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use bh_diver_core::{
    animation::{frame_times, Static},
    record::save_frame,
    AnimationSource, AppConfig, CheckerEnvironment, EnvironmentMap, FrameRenderer,
    ImageEnvironment, ImageSequenceSink, PixelFormat, Projection, Recorder, ReleasePolicy,
    RenderMode, Resolution, Scene, Viewport,
};
use clap::{Args, Parser, Subcommand, ValueEnum};
use timeline::KeyframeTimeline;
use tracing_subscriber::EnvFilter;

fn main() -> bh_diver_core::Result<()> {
    init_tracing();

    let cli = Cli::parse();
    let mut config = match &cli.config {
        Some(path) => AppConfig::load(path)?,
        None => AppConfig::default(),
    };

    match cli.command {
        Commands::Still {
            output,
            time,
            format,
            scene,
        } => {
            scene.apply(&mut config);
            let environment = load_environment(cli.environment.as_deref())?;
            run_still(&config, environment.as_ref(), &output, time, format.map(Into::into))
        }
        Commands::Animate {
            output,
            timeline,
            start,
            duration,
            frames,
            format,
            scene,
        } => {
            scene.apply(&mut config);
            let recording = &mut config.recording;
            if let Some(output) = output {
                recording.output_path = output;
            }
            if let Some(start) = start {
                recording.start_time = start;
            }
            if let Some(duration) = duration {
                recording.duration = duration;
            }
            if let Some(frames) = frames {
                recording.frames = frames;
            }
            if let Some(format) = format {
                recording.pixel_format = format.into();
            }
            let environment = load_environment(cli.environment.as_deref())?;
            run_animate(&config, environment.as_ref(), timeline.as_deref())
        }
        Commands::Preview {
            output,
            duration,
            steps,
            scene,
        } => {
            scene.apply(&mut config);
            let environment = load_environment(cli.environment.as_deref())?;
            run_preview(&config, environment, &output, duration, steps)
        }
        Commands::Info { scene } => {
            scene.apply(&mut config);
            run_info(&config.scene)
        }
    }
}

fn run_still(
    config: &AppConfig,
    environment: &dyn EnvironmentMap,
    output: &Path,
    time: f64,
    format: Option<PixelFormat>,
) -> bh_diver_core::Result<()> {
    tracing::info!(?output, time, resolution = %config.scene.camera.resolution, "rendering still");

    let renderer = FrameRenderer::new(config.render)?;
    let target = renderer.render(RenderMode::Export, &config.scene, time, environment)?;
    save_frame(&target, output, format.unwrap_or(config.recording.pixel_format))?;

    tracing::info!(
        captured = target.stats.captured,
        escaped = target.stats.escaped,
        elapsed_ms = target.stats.elapsed.as_secs_f64() * 1e3,
        "still written"
    );
    Ok(())
}

fn run_animate(
    config: &AppConfig,
    environment: &dyn EnvironmentMap,
    timeline: Option<&Path>,
) -> bh_diver_core::Result<()> {
    let source: Box<dyn AnimationSource> = match timeline {
        Some(path) => {
            tracing::info!(?path, "loading keyframe timeline");
            Box::new(KeyframeTimeline::load(path)?)
        }
        None => Box::new(Static),
    };

    let renderer = FrameRenderer::new(config.render)?;
    let mut sink = ImageSequenceSink::new(
        &config.recording.output_path,
        config.recording.pixel_format,
    )?;
    let recorder = Recorder::new(config.recording.clone());
    let summary = recorder.record(
        &renderer,
        &config.scene,
        source.as_ref(),
        environment,
        &mut sink,
    )?;

    if let Some(last) = sink.written().last() {
        tracing::info!(frames = summary.frames_written, last = ?last, "animation written");
    }
    Ok(())
}

fn run_preview(
    config: &AppConfig,
    environment: Arc<dyn EnvironmentMap>,
    output: &Path,
    duration: f64,
    steps: usize,
) -> bh_diver_core::Result<()> {
    let renderer = FrameRenderer::new(config.render)?;
    let viewport = Viewport::new(renderer, environment);

    // Requests arrive faster than frames complete, like a scrubbed timeline.
    let mut handles = Vec::new();
    for time in frame_times(0.0, duration, steps.max(1)) {
        if let Some(handle) = viewport.submit(config.scene, time)? {
            handles.push((time, handle));
        }
    }

    for (time, handle) in handles {
        let committed = handle
            .join()
            .map_err(|_| bh_diver_core::BhDiverError::msg("viewport worker panicked"))??;
        tracing::debug!(time, committed, "viewport request finished");
    }

    let Some(frame) = viewport.displayed() else {
        return Err(bh_diver_core::BhDiverError::msg("no viewport frame was committed"));
    };
    save_frame(&frame.target, output, config.recording.pixel_format)?;
    tracing::info!(
        ?output,
        time = frame.request.time,
        generation = frame.generation,
        "preview written"
    );
    Ok(())
}

fn run_info(scene: &Scene) -> bh_diver_core::Result<()> {
    scene.validate()?;
    let infall = scene.infall()?;
    let start = infall.state_at(0.0);

    println!("mass                  {}", scene.mass);
    println!("horizon radius        {}", 2.0 * scene.mass);
    println!("initial radius        {}", scene.observer.initial_radius);
    println!("release               {:?}", scene.observer.release);
    println!("specific energy       {:.6}", infall.specific_energy());
    if let Some(speed) = start.local_speed() {
        println!("initial local speed   {speed:.6} c");
    }
    println!("horizon crossing at   τ = {:.6}", infall.horizon_crossing_time());
    println!("singularity at        τ = {:.6}", infall.final_time());
    Ok(())
}

fn load_environment(path: Option<&Path>) -> bh_diver_core::Result<Arc<dyn EnvironmentMap>> {
    match path {
        Some(path) => {
            tracing::info!(?path, "loading environment image");
            Ok(Arc::new(ImageEnvironment::open(path)?))
        }
        None => Ok(Arc::new(CheckerEnvironment::default())),
    }
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .try_init();
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Renders the view of an observer falling into a black hole", long_about = None)]
struct Cli {
    /// JSON configuration file; missing fields take their defaults.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
    /// Equirectangular (2:1) background image. A checkerboard sky is used
    /// when omitted.
    #[arg(short, long, global = true)]
    environment: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Render a single frame at full quality.
    Still {
        /// Output image; the format follows the extension.
        output: PathBuf,
        /// Observer proper time of the frame.
        #[arg(short, long, default_value_t = 0.0, allow_negative_numbers = true)]
        time: f64,
        #[arg(long, value_enum)]
        format: Option<FormatArg>,
        #[command(flatten)]
        scene: SceneArgs,
    },
    /// Render an evenly spaced frame sequence.
    Animate {
        /// Template path; frames are written as `stem.00001.ext`.
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Keyframe timeline JSON driving animated properties.
        #[arg(long)]
        timeline: Option<PathBuf>,
        #[arg(long, allow_negative_numbers = true)]
        start: Option<f64>,
        #[arg(long)]
        duration: Option<f64>,
        #[arg(long)]
        frames: Option<usize>,
        #[arg(long, value_enum)]
        format: Option<FormatArg>,
        #[command(flatten)]
        scene: SceneArgs,
    },
    /// Drive the live viewport through a sweep of times and save the frame
    /// left on display.
    Preview {
        output: PathBuf,
        #[arg(long, default_value_t = 10.0)]
        duration: f64,
        #[arg(long, default_value_t = 8)]
        steps: usize,
        #[command(flatten)]
        scene: SceneArgs,
    },
    /// Print infall timing for the configured observer.
    Info {
        #[command(flatten)]
        scene: SceneArgs,
    },
}

/// Command line overrides of the configured scene.
#[derive(Args, Debug)]
struct SceneArgs {
    /// Black hole mass in geometrized units.
    #[arg(long)]
    mass: Option<f64>,
    /// Radius the observer passes at proper time zero.
    #[arg(long)]
    radius: Option<f64>,
    /// Release the observer from rest at `radius` instead of from infinity.
    #[arg(long)]
    from_rest: bool,
    /// Disable light bending and aberration.
    #[arg(long)]
    no_relativity: bool,
    /// Render a 360° equirectangular panorama.
    #[arg(long)]
    panorama: bool,
    /// Vertical field of view in degrees.
    #[arg(long)]
    fov: Option<f64>,
    #[arg(long, allow_negative_numbers = true)]
    yaw: Option<f64>,
    #[arg(long, allow_negative_numbers = true)]
    pitch: Option<f64>,
    #[arg(long)]
    width: Option<u32>,
    #[arg(long)]
    height: Option<u32>,
    /// Samples per pixel along each axis for exported frames.
    #[arg(long)]
    super_sampling: Option<u32>,
}

impl SceneArgs {
    fn apply(&self, config: &mut AppConfig) {
        let scene = &mut config.scene;
        if let Some(mass) = self.mass {
            scene.mass = mass;
        }
        if let Some(radius) = self.radius {
            scene.observer.initial_radius = radius;
        }
        if self.from_rest {
            scene.observer.release = ReleasePolicy::FromRest;
        }
        if self.no_relativity {
            scene.relativity = false;
        }

        let camera = &mut scene.camera;
        if self.panorama {
            camera.projection = Projection::Equirectangular;
        }
        if let Some(fov) = self.fov {
            camera.fov_degrees = fov;
        }
        if let Some(yaw) = self.yaw {
            camera.yaw_degrees = yaw;
        }
        if let Some(pitch) = self.pitch {
            camera.pitch_degrees = pitch;
        }
        if self.width.is_some() || self.height.is_some() {
            camera.resolution = Resolution::new(
                self.width.unwrap_or(camera.resolution.width),
                self.height.unwrap_or(camera.resolution.height),
            );
        }
        if let Some(samples) = self.super_sampling {
            config.render.export.super_sampling = samples;
        }
    }
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum FormatArg {
    Rgb8,
    Rgb16,
    Rgb32f,
}

impl From<FormatArg> for PixelFormat {
    fn from(value: FormatArg) -> Self {
        match value {
            FormatArg::Rgb8 => PixelFormat::Rgb8,
            FormatArg::Rgb16 => PixelFormat::Rgb16,
            FormatArg::Rgb32f => PixelFormat::Rgb32F,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overrides_replace_configured_values() {
        let cli = Cli::parse_from([
            "bh-diver",
            "still",
            "out.png",
            "--radius",
            "30",
            "--no-relativity",
            "--panorama",
            "--width",
            "64",
            "--yaw",
            "-15",
        ]);
        let Commands::Still { scene, output, .. } = cli.command else {
            panic!("expected the still subcommand");
        };

        let mut config = AppConfig::default();
        scene.apply(&mut config);

        assert_eq!(output, PathBuf::from("out.png"));
        assert_eq!(config.scene.observer.initial_radius, 30.0);
        assert!(!config.scene.relativity);
        assert_eq!(config.scene.camera.projection, Projection::Equirectangular);
        assert_eq!(config.scene.camera.resolution, Resolution::new(64, 512));
        assert_eq!(config.scene.camera.yaw_degrees, -15.0);
    }

    #[test]
    fn cli_definition_is_consistent() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}
