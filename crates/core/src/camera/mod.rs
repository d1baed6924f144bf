//! Camera descriptors and per-pixel ray directions.
//!
//! Directions are expressed in the observer's local frame: `+z` points
//! radially away from the black hole, so the default camera, looking along
//! `-z`, faces the hole with `+y` up and `+x` to the right.

use std::f64::consts::{PI, TAU};

use glam::{DMat3, DVec3};
use serde::{Deserialize, Serialize};

use crate::{BhDiverError, Result};

/// How pixels map onto directions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Projection {
    /// Pinhole camera with a vertical field of view.
    #[default]
    Perspective,
    /// Full 360° latitude/longitude panorama.
    Equirectangular,
}

impl std::fmt::Display for Projection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Perspective => f.write_str("perspective"),
            Self::Equirectangular => f.write_str("equirectangular"),
        }
    }
}

/// Image size in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Scales both axes, keeping at least one pixel along each.
    pub fn scaled(&self, factor: f64) -> Self {
        let scale = |value: u32| ((value as f64 * factor).round() as u32).max(1);
        Self::new(scale(self.width), scale(self.height))
    }

    /// Multiplies both axes by an integer factor.
    pub fn multiplied(&self, factor: u32) -> Self {
        Self::new(self.width * factor, self.height * factor)
    }
}

impl Default for Resolution {
    fn default() -> Self {
        Self::new(512, 512)
    }
}

impl std::fmt::Display for Resolution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Immutable description of the camera for one render call.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraDescriptor {
    pub projection: Projection,
    /// Vertical field of view, perspective only.
    pub fov_degrees: f64,
    /// Rotation about the local up axis; positive turns left.
    pub yaw_degrees: f64,
    /// Rotation about the local right axis; positive looks up.
    pub pitch_degrees: f64,
    pub resolution: Resolution,
}

impl Default for CameraDescriptor {
    fn default() -> Self {
        Self {
            projection: Projection::Perspective,
            fov_degrees: 90.0,
            yaw_degrees: 0.0,
            pitch_degrees: 0.0,
            resolution: Resolution::default(),
        }
    }
}

impl CameraDescriptor {
    pub fn perspective(fov_degrees: f64, resolution: Resolution) -> Self {
        Self {
            projection: Projection::Perspective,
            fov_degrees,
            resolution,
            ..Self::default()
        }
    }

    pub fn equirectangular(resolution: Resolution) -> Self {
        Self {
            projection: Projection::Equirectangular,
            resolution,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.resolution.is_empty() {
            return Err(BhDiverError::config(format!(
                "camera resolution must be non-zero, got {}",
                self.resolution
            )));
        }
        if self.projection == Projection::Perspective
            && !(self.fov_degrees > 0.0 && self.fov_degrees < 180.0)
        {
            return Err(BhDiverError::config(format!(
                "perspective field of view must lie in (0, 180) degrees, got {}",
                self.fov_degrees
            )));
        }
        if !(self.yaw_degrees.is_finite() && self.pitch_degrees.is_finite()) {
            return Err(BhDiverError::config("camera orientation must be finite"));
        }
        Ok(())
    }

    /// Rotation from camera space into the observer's local frame.
    pub fn orientation(&self) -> DMat3 {
        DMat3::from_rotation_y(self.yaw_degrees.to_radians())
            * DMat3::from_rotation_x(self.pitch_degrees.to_radians())
    }
}

/// Pure mapping from pixel coordinates to local-frame unit directions.
#[derive(Debug, Clone, Copy)]
pub struct RayGenerator {
    projection: Projection,
    resolution: Resolution,
    tan_half_fov: f64,
    aspect: f64,
    orientation: DMat3,
}

impl RayGenerator {
    /// Builds a generator for `camera` sampled at `resolution`, which may
    /// differ from the camera's own resolution when the renderer scales it.
    pub fn new(camera: &CameraDescriptor, resolution: Resolution) -> Result<Self> {
        camera.validate()?;
        if resolution.is_empty() {
            return Err(BhDiverError::config("render resolution must be non-zero"));
        }

        Ok(Self {
            projection: camera.projection,
            resolution,
            tan_half_fov: (camera.fov_degrees.to_radians() / 2.0).tan(),
            aspect: resolution.width as f64 / resolution.height as f64,
            orientation: camera.orientation(),
        })
    }

    pub fn resolution(&self) -> Resolution {
        self.resolution
    }

    /// Direction the camera looks along through the centre of pixel `(x, y)`.
    pub fn direction(&self, x: u32, y: u32) -> DVec3 {
        let u = (x as f64 + 0.5) / self.resolution.width as f64;
        let v = (y as f64 + 0.5) / self.resolution.height as f64;

        let camera_space = match self.projection {
            Projection::Perspective => DVec3::new(
                (2.0 * u - 1.0) * self.tan_half_fov * self.aspect,
                (1.0 - 2.0 * v) * self.tan_half_fov,
                -1.0,
            )
            .normalize(),
            Projection::Equirectangular => spherical_direction(PI * v, TAU * u),
        };

        (self.orientation * camera_space).normalize()
    }
}

/// Unit vector with polar angle `theta` from `+z` and azimuth `phi` from `+x`.
pub fn spherical_direction(theta: f64, phi: f64) -> DVec3 {
    let (sin_theta, cos_theta) = theta.sin_cos();
    let (sin_phi, cos_phi) = phi.sin_cos();
    DVec3::new(sin_theta * cos_phi, sin_theta * sin_phi, cos_theta)
}

/// Polar angle in `[0, π]` and azimuth in `[0, 2π)` of `direction`.
/// Degenerate input maps to the north pole.
pub fn spherical_angles(direction: DVec3) -> (f64, f64) {
    let length = direction.length();
    if !(length.is_finite() && length > 0.0) {
        return (0.0, 0.0);
    }

    let theta = (direction.z / length).clamp(-1.0, 1.0).acos();
    let phi = direction.y.atan2(direction.x).rem_euclid(TAU);
    (theta, if phi >= TAU { 0.0 } else { phi })
}
