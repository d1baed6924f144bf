use std::sync::Arc;

use approx::assert_abs_diff_eq;
use bh_diver_core::{
    environment::CAPTURED, CameraDescriptor, CheckerEnvironment, Color, EnvironmentMap,
    FrameRenderer, GeodesicIntegrator, ImageEnvironment, IntegratorSettings, ObserverFrame,
    ObserverParams, QualityProfile, RayGenerator, RayOutcome, ReleasePolicy, RenderConfig,
    RenderMode, Resolution, Scene, Viewport,
};
use glam::{DVec3, Vec3};
use image::{Rgb, Rgb32FImage};

/// Colour varies smoothly with direction so small deflections stay small.
struct Smooth;

impl EnvironmentMap for Smooth {
    fn sample_direction(&self, direction: DVec3) -> Color {
        let d = direction.normalize().as_vec3();
        Vec3::splat(0.5) + 0.5 * d
    }
}

fn export_renderer(integrator: IntegratorSettings) -> FrameRenderer {
    FrameRenderer::new(RenderConfig {
        export: QualityProfile {
            integrator,
            ..QualityProfile::export()
        },
        ..RenderConfig::default()
    })
    .unwrap()
}

fn diver_at_ten(relativity: bool) -> Scene {
    Scene {
        camera: CameraDescriptor::perspective(90.0, Resolution::new(33, 33)),
        observer: ObserverParams {
            initial_radius: 10.0,
            release: ReleasePolicy::FromInfinity,
        },
        relativity,
        mass: 1.0,
    }
}

/// Traces one pixel of `scene` at proper time zero; returns the view
/// direction and where the ray ends up.
fn trace_pixel(scene: &Scene, x: u32, y: u32) -> (DVec3, Option<DVec3>) {
    let spacetime = scene.spacetime().unwrap();
    let state = scene.infall().unwrap().state_at(0.0);
    let frame = ObserverFrame::new(state, &spacetime);
    let rays = RayGenerator::new(&scene.camera, scene.camera.resolution).unwrap();
    let integrator = GeodesicIntegrator::new(spacetime, IntegratorSettings::default());

    let view = rays.direction(x, y);
    let (plane, initial) = frame.view_ray(view);
    let escaped = match integrator.trace(initial).outcome {
        RayOutcome::Captured => None,
        RayOutcome::Escaped { angle } => Some(plane.direction(angle)),
    };
    (view, escaped)
}

#[test]
fn looking_at_the_hole_from_radius_ten() {
    let curved = diver_at_ten(true);

    let (_, centre) = trace_pixel(&curved, 16, 16);
    assert!(centre.is_none(), "centre ray must be captured");

    let (view, edge) = trace_pixel(&curved, 0, 16);
    let edge = edge.expect("grazing ray escapes");
    assert!(view.angle_between(edge) > 0.1, "escaped ray is bent");

    let flat = diver_at_ten(false);
    let (view, edge) = trace_pixel(&flat, 0, 16);
    let edge = edge.expect("grazing ray escapes");
    assert_abs_diff_eq!(view.angle_between(edge), 0.0, epsilon = 1e-6);

    let (_, centre) = trace_pixel(&flat, 16, 16);
    assert!(centre.is_none(), "the horizon still absorbs without curvature");
}

#[test]
fn rendered_centre_is_black_and_edges_are_not() {
    let renderer = export_renderer(IntegratorSettings::default());
    let target = renderer
        .render(RenderMode::Export, &diver_at_ten(true), 0.0, &Smooth)
        .unwrap();

    assert_eq!(target.pixel(16, 16), CAPTURED);
    assert_ne!(target.pixel(0, 16), CAPTURED);
    assert_eq!(target.stats.exhausted, 0);
}

#[test]
fn distant_panorama_matches_the_environment() {
    let scene = Scene {
        camera: CameraDescriptor::equirectangular(Resolution::new(32, 16)),
        observer: ObserverParams {
            initial_radius: 1000.0,
            release: ReleasePolicy::FromRest,
        },
        relativity: true,
        mass: 1.0,
    };
    let renderer = export_renderer(IntegratorSettings::default());
    let target = renderer.render(RenderMode::Export, &scene, 0.0, &Smooth).unwrap();
    let rays = RayGenerator::new(&scene.camera, scene.camera.resolution).unwrap();

    // Rows looking away from the hole; the ones close behind it are
    // measurably lensed even at this distance.
    for y in 0..12 {
        for x in 0..32 {
            let expected = Smooth.sample_direction(rays.direction(x, y));
            let rendered = target.pixel(x, y);
            assert_abs_diff_eq!(rendered.distance(expected), 0.0, epsilon = 0.01);
        }
    }
}

fn stripes() -> ImageEnvironment {
    let image = Rgb32FImage::from_fn(64, 32, |x, y| {
        Rgb([x as f32 / 63.0, y as f32 / 31.0, ((x / 4 + y / 4) % 2) as f32])
    });
    ImageEnvironment::new(image).unwrap()
}

#[test]
fn output_is_independent_of_threads_and_repetition() {
    let scene = Scene {
        camera: CameraDescriptor {
            yaw_degrees: 20.0,
            pitch_degrees: -10.0,
            ..CameraDescriptor::perspective(100.0, Resolution::new(20, 14))
        },
        ..Scene::default()
    };
    let environment = stripes();
    let renderer = export_renderer(IntegratorSettings::interactive());

    let single = rayon::ThreadPoolBuilder::new().num_threads(1).build().unwrap();
    let several = rayon::ThreadPoolBuilder::new().num_threads(3).build().unwrap();

    let a = single
        .install(|| renderer.render(RenderMode::Export, &scene, 2.0, &environment))
        .unwrap();
    let b = several
        .install(|| renderer.render(RenderMode::Export, &scene, 2.0, &environment))
        .unwrap();
    let c = renderer.render(RenderMode::Export, &scene, 2.0, &environment).unwrap();

    assert_eq!(a.image.as_raw(), b.image.as_raw());
    assert_eq!(a.image.as_raw(), c.image.as_raw());
    assert_eq!(a.stats.captured, c.stats.captured);
}

#[test]
fn exhausted_budgets_degrade_instead_of_failing() {
    let starved = IntegratorSettings {
        max_steps: 3,
        ..IntegratorSettings::interactive()
    };
    let renderer = export_renderer(starved);
    let target = renderer
        .render(RenderMode::Export, &diver_at_ten(true), 0.0, &CheckerEnvironment::default())
        .unwrap();

    assert!(target.stats.exhausted > 0);
    assert_eq!(target.stats.samples(), 33 * 33);
    assert!(target.image.pixels().all(|p| p.0.iter().all(|c| c.is_finite())));
}

#[test]
fn viewport_follows_the_latest_request() {
    let renderer = FrameRenderer::new(RenderConfig::default()).unwrap();
    let viewport = Viewport::new(renderer, Arc::new(CheckerEnvironment::default()));
    let scene = Scene {
        camera: CameraDescriptor::perspective(90.0, Resolution::new(24, 24)),
        ..Scene::default()
    };

    let early = viewport.request(scene, 0.0).unwrap();
    let late = viewport.request(scene, 5.0).unwrap();
    assert!(!viewport.render(&early).unwrap());
    assert!(viewport.render(&late).unwrap());

    let shown = viewport.displayed().unwrap();
    assert_eq!(shown.generation, late.generation());
    assert_eq!(shown.request.time, 5.0);
}
