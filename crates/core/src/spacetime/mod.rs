//! Schwarzschild spacetime in geometrized units (G = c = 1).
//!
//! ds² = -(1 - 2M/r)dt² + (1 - 2M/r)⁻¹dr² + r²(dθ² + sin²θ dφ²)
//!
//! The flat variant shares the interface but reports no curvature, which lets
//! the integrator and observer frame stay agnostic to the relativity toggle.

use serde::{Deserialize, Serialize};

use crate::{BhDiverError, Result};

/// Smallest lapse used when inverting `1 - 2M/r` near the horizon.
const LAPSE_FLOOR: f64 = 1e-12;

/// Metric coefficients at a given coordinate radius.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MetricCoefficients {
    /// `1 - 2M/r` for the curved variant, `1` for the flat one.
    pub lapse: f64,
    /// `g_tt = -lapse`.
    pub g_tt: f64,
    /// `g_rr = 1 / lapse`, clamped so it stays finite at the horizon.
    pub g_rr: f64,
    /// Coefficient `3M` of the relativistic correction in the photon orbit
    /// equation. Zero without curvature.
    pub curvature: f64,
}

/// Spacetime variant selected by the relativity toggle.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Spacetime {
    /// Curved spacetime around a non-rotating black hole of mass `mass`.
    Schwarzschild { mass: f64 },
    /// Straight-line propagation. The horizon sphere is kept as an opaque
    /// absorber so the black disk stays visible without lensing.
    Flat { mass: f64 },
}

impl Spacetime {
    /// Builds the variant matching the relativity toggle.
    pub fn new(mass: f64, relativity: bool) -> Result<Self> {
        if !mass.is_finite() || mass <= 0.0 {
            return Err(BhDiverError::config(format!(
                "black hole mass must be positive and finite, got {mass}"
            )));
        }

        Ok(if relativity {
            Self::Schwarzschild { mass }
        } else {
            Self::Flat { mass }
        })
    }

    pub fn mass(&self) -> f64 {
        match *self {
            Self::Schwarzschild { mass } | Self::Flat { mass } => mass,
        }
    }

    /// Returns whether light bending and aberration apply.
    pub fn is_curved(&self) -> bool {
        matches!(self, Self::Schwarzschild { .. })
    }

    /// Schwarzschild radius `r_s = 2M`.
    pub fn horizon_radius(&self) -> f64 {
        2.0 * self.mass()
    }

    /// Radius of the unstable circular photon orbit, `3M`.
    pub fn photon_sphere_radius(&self) -> f64 {
        3.0 * self.mass()
    }

    /// Critical impact parameter `3√3·M`; photons arriving from infinity with a
    /// smaller impact parameter are captured.
    pub fn critical_impact_parameter(&self) -> f64 {
        3.0 * 3.0_f64.sqrt() * self.mass()
    }

    /// Metric coefficients at radius `r`.
    pub fn coefficients(&self, r: f64) -> MetricCoefficients {
        match *self {
            Self::Schwarzschild { mass } => {
                let lapse = 1.0 - 2.0 * mass / r.max(f64::MIN_POSITIVE);
                MetricCoefficients {
                    lapse,
                    g_tt: -lapse,
                    g_rr: 1.0 / lapse.max(LAPSE_FLOOR),
                    curvature: 3.0 * mass,
                }
            }
            Self::Flat { .. } => MetricCoefficients {
                lapse: 1.0,
                g_tt: -1.0,
                g_rr: 1.0,
                curvature: 0.0,
            },
        }
    }

    /// Second derivative of `r` along the affine parameter for a photon with
    /// impact parameter `b` (energy normalised to one):
    /// `d²r/dλ² = b²/r³ · (1 - 3M/r)`.
    pub fn radial_acceleration(&self, r: f64, b: f64) -> f64 {
        let curvature = self.coefficients(r).curvature;
        b * b / (r * r * r) * (1.0 - curvature / r)
    }

    /// Effective potential `b²·lapse/r²`; a photon can only be at radii where
    /// this stays below one.
    pub fn photon_potential(&self, r: f64, b: f64) -> f64 {
        b * b * self.coefficients(r).lapse / (r * r)
    }
}
