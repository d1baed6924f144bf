//! Background radiance lookup.
//!
//! Environment maps are spheres at infinity addressed by global direction:
//! polar angle `θ` from `+z` (the observer's outward axis) and azimuth `φ`
//! from `+x`. Equirectangular images map `φ ∈ [0, 2π)` across the columns and
//! `θ ∈ [0, π]` down the rows.

use std::{f64::consts::TAU, path::Path};

use glam::{DVec3, Vec3};
use image::{Rgb, Rgb32FImage};
use tracing::debug;

use crate::{
    camera::spherical_angles,
    geodesic::{OrbitalPlane, RayOutcome},
    BhDiverError, Result,
};

/// Linear RGB radiance.
pub type Color = Vec3;

/// Colour of pixels whose ray fell into the black hole.
pub const CAPTURED: Color = Vec3::ZERO;

/// Read-only spherical image queried by direction.
pub trait EnvironmentMap: Send + Sync {
    /// Radiance arriving from `direction`, which need not be normalised.
    fn sample_direction(&self, direction: DVec3) -> Color;
}

/// Equirectangular (2:1 latitude/longitude) image environment.
#[derive(Debug, Clone)]
pub struct ImageEnvironment {
    image: Rgb32FImage,
}

impl ImageEnvironment {
    pub fn new(image: Rgb32FImage) -> Result<Self> {
        let (width, height) = image.dimensions();
        if height == 0 || width != 2 * height {
            return Err(BhDiverError::NotEquirectangular { width, height });
        }
        Ok(Self { image })
    }

    /// Decodes an image file of any format supported by `image`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let image = image::open(path)?.into_rgb32f();
        debug!(?path, width = image.width(), height = image.height(), "loaded environment");
        Self::new(image)
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.image.dimensions()
    }

    fn texel(&self, x: i64, y: i64) -> Color {
        let (width, height) = self.image.dimensions();
        let x = x.rem_euclid(width as i64) as u32;
        let y = y.clamp(0, height as i64 - 1) as u32;
        let Rgb([r, g, b]) = *self.image.get_pixel(x, y);
        Vec3::new(r, g, b)
    }
}

impl EnvironmentMap for ImageEnvironment {
    fn sample_direction(&self, direction: DVec3) -> Color {
        let (width, height) = self.image.dimensions();
        let (theta, phi) = spherical_angles(direction);

        // Texel centres sit at half-integer coordinates.
        let x = phi / TAU * width as f64 - 0.5;
        let y = theta / std::f64::consts::PI * height as f64 - 0.5;
        let (x0, y0) = (x.floor(), y.floor());
        let (fx, fy) = ((x - x0) as f32, (y - y0) as f32);
        let (x0, y0) = (x0 as i64, y0 as i64);

        let top = self.texel(x0, y0).lerp(self.texel(x0 + 1, y0), fx);
        let bottom = self.texel(x0, y0 + 1).lerp(self.texel(x0 + 1, y0 + 1), fx);
        top.lerp(bottom, fy)
    }
}

/// Procedural latitude/longitude checkerboard, useful without any asset.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CheckerEnvironment {
    /// Number of cells around the equator.
    pub divisions: u32,
    pub light: Color,
    pub dark: Color,
}

impl Default for CheckerEnvironment {
    fn default() -> Self {
        Self {
            divisions: 24,
            light: Vec3::new(0.9, 0.9, 0.85),
            dark: Vec3::new(0.1, 0.15, 0.3),
        }
    }
}

impl EnvironmentMap for CheckerEnvironment {
    fn sample_direction(&self, direction: DVec3) -> Color {
        let (theta, phi) = spherical_angles(direction);
        let cell = TAU / self.divisions.max(2) as f64;

        let column = (phi / cell).floor() as i64;
        let row = (theta / cell).floor() as i64;
        if (column + row).rem_euclid(2) == 0 {
            self.light
        } else {
            self.dark
        }
    }
}

/// Turns a traced outcome into a pixel colour.
#[derive(Clone, Copy)]
pub struct EnvironmentSampler<'a> {
    map: &'a dyn EnvironmentMap,
}

impl<'a> EnvironmentSampler<'a> {
    pub fn new(map: &'a dyn EnvironmentMap) -> Self {
        Self { map }
    }

    /// Black for captured rays; otherwise the environment seen along the
    /// escape direction, mapped back into the observer's global frame through
    /// the ray's orbital plane.
    pub fn sample(&self, outcome: RayOutcome, plane: &OrbitalPlane) -> Color {
        match outcome {
            RayOutcome::Captured => CAPTURED,
            RayOutcome::Escaped { angle } => self.map.sample_direction(plane.direction(angle)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::spherical_direction;
    use approx::assert_abs_diff_eq;
    use std::f64::consts::{FRAC_PI_2, PI};

    fn gradient(width: u32, height: u32) -> Rgb32FImage {
        Rgb32FImage::from_fn(width, height, |x, y| Rgb([x as f32, y as f32, 1.0]))
    }

    #[test]
    fn rejects_non_equirectangular_images() {
        let err = ImageEnvironment::new(gradient(10, 10)).unwrap_err();
        assert!(matches!(
            err,
            BhDiverError::NotEquirectangular {
                width: 10,
                height: 10
            }
        ));
        assert!(ImageEnvironment::new(gradient(0, 0)).is_err());
    }

    #[test]
    fn texel_centres_are_returned_exactly() {
        let environment = ImageEnvironment::new(gradient(8, 4)).unwrap();
        // Centre of texel (2, 1).
        let direction = spherical_direction(PI * 1.5 / 4.0, TAU * 2.5 / 8.0);

        let color = environment.sample_direction(direction);
        assert_abs_diff_eq!(color.x, 2.0, epsilon = 1e-4);
        assert_abs_diff_eq!(color.y, 1.0, epsilon = 1e-4);
    }

    #[test]
    fn interpolates_between_texels() {
        let environment = ImageEnvironment::new(gradient(8, 4)).unwrap();
        // Halfway between the centres of columns 2 and 3.
        let direction = spherical_direction(PI * 1.5 / 4.0, TAU * 3.0 / 8.0);

        let color = environment.sample_direction(direction);
        assert_abs_diff_eq!(color.x, 2.5, epsilon = 1e-4);
    }

    #[test]
    fn azimuth_wraps_and_poles_clamp() {
        let environment = ImageEnvironment::new(gradient(8, 4)).unwrap();

        // Across the seam the last and first columns are blended.
        let seam = environment.sample_direction(spherical_direction(FRAC_PI_2, 0.0));
        assert_abs_diff_eq!(seam.x, 3.5, epsilon = 1e-4);

        let north = environment.sample_direction(DVec3::Z);
        let south = environment.sample_direction(-DVec3::Z);
        assert_abs_diff_eq!(north.y, 0.0, epsilon = 1e-4);
        assert_abs_diff_eq!(south.y, 3.0, epsilon = 1e-4);
    }

    #[test]
    fn degenerate_directions_still_sample() {
        let environment = ImageEnvironment::new(gradient(8, 4)).unwrap();
        let color = environment.sample_direction(DVec3::new(f64::NAN, 0.0, 1.0));
        assert!(color.is_finite());
    }

    #[test]
    fn captured_rays_are_black() {
        let checker = CheckerEnvironment::default();
        let sampler = EnvironmentSampler::new(&checker);
        let (plane, _, _) = OrbitalPlane::from_direction(DVec3::Z, DVec3::X);

        assert_eq!(sampler.sample(RayOutcome::Captured, &plane), CAPTURED);

        let escaped = sampler.sample(RayOutcome::Escaped { angle: 0.0 }, &plane);
        assert_eq!(escaped, checker.sample_direction(DVec3::Z));
    }

    #[test]
    fn checker_alternates() {
        let checker = CheckerEnvironment {
            divisions: 4,
            ..CheckerEnvironment::default()
        };
        let a = checker.sample_direction(spherical_direction(0.5, 0.5));
        let b = checker.sample_direction(spherical_direction(0.5, 0.5 + FRAC_PI_2));
        assert_ne!(a, b);
    }
}
