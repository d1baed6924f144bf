//! Core library for the black hole diver renderer.
//!
//! Frames show the sky as seen by an observer falling radially into a
//! Schwarzschild black hole. Each module owns one stage of the per-pixel
//! pipeline (camera ray, observer frame, geodesic, environment lookup) or the
//! orchestration around it (parallel frame rendering, the live viewport,
//! animation export).

pub mod animation;
pub mod camera;
pub mod config;
pub mod environment;
pub mod error;
pub mod geodesic;
pub mod observer;
pub mod record;
pub mod render;
pub mod scene;
pub mod spacetime;
pub mod viewport;

pub use animation::{resolve_scene, AnimationSource, PropertyId, PropertyKind, PropertyValue};
pub use camera::{CameraDescriptor, Projection, RayGenerator, Resolution};
pub use config::AppConfig;
pub use environment::{CheckerEnvironment, Color, EnvironmentMap, EnvironmentSampler, ImageEnvironment};
pub use error::{BhDiverError, Result};
pub use geodesic::{GeodesicIntegrator, IntegratorSettings, OrbitalPlane, RayOutcome, RayState, RayTrace};
pub use observer::{Infall, ObserverFrame, ObserverParams, ObserverState, ReleasePolicy};
pub use record::{FrameSink, ImageSequenceSink, PixelFormat, Recorder, RecordingSettings};
pub use render::{FrameRenderer, QualityProfile, RenderConfig, RenderMode, RenderStats, RenderTarget};
pub use scene::Scene;
pub use spacetime::Spacetime;
pub use viewport::{Ticket, Viewport};
