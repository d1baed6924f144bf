//! Radially infalling observer.
//!
//! The observer sits on the global `+z` axis and falls towards the origin.
//! Its motion follows a radial timelike geodesic whose conserved specific
//! energy `e` depends on the release policy; the local frame is the boosted
//! tetrad
//!
//! ```text
//! u   = (e/f) ∂t - s ∂r
//! e_r = -(s/f) ∂t + e ∂r        f = 1 - 2M/r,  s = √(e² - f)
//! ```
//!
//! Converting a local photon direction through this tetrad applies the
//! relativistic aberration caused by the fall.

use std::f64::consts::PI;

use glam::DVec3;
use serde::{Deserialize, Serialize};

use crate::{
    geodesic::{OrbitalPlane, RayState},
    spacetime::Spacetime,
    BhDiverError, Result,
};

const ETA_ITERATIONS: usize = 80;

/// Starting condition of the fall.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReleasePolicy {
    /// Dropped from rest at infinity; passes the initial radius at proper time
    /// zero with the local escape speed `√(2M/r)`.
    #[default]
    FromInfinity,
    /// At rest at the initial radius at proper time zero.
    FromRest,
}

/// Parameters of the falling observer.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ObserverParams {
    pub initial_radius: f64,
    pub release: ReleasePolicy,
}

impl Default for ObserverParams {
    fn default() -> Self {
        Self {
            initial_radius: 10.0,
            release: ReleasePolicy::FromInfinity,
        }
    }
}

impl ObserverParams {
    pub fn validate(&self, mass: f64) -> Result<()> {
        if !(self.initial_radius.is_finite() && self.initial_radius > 0.0) {
            return Err(BhDiverError::config(format!(
                "initial radius must be positive, got {}",
                self.initial_radius
            )));
        }
        if self.release == ReleasePolicy::FromRest && self.initial_radius <= 2.0 * mass {
            return Err(BhDiverError::config(format!(
                "an observer cannot start at rest at r = {} inside the horizon r_s = {}",
                self.initial_radius,
                2.0 * mass
            )));
        }
        Ok(())
    }
}

/// Radial free fall of the observer as a function of proper time.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Infall {
    mass: f64,
    params: ObserverParams,
}

impl Infall {
    pub fn new(params: ObserverParams, mass: f64) -> Result<Self> {
        if !(mass.is_finite() && mass > 0.0) {
            return Err(BhDiverError::config(format!(
                "black hole mass must be positive and finite, got {mass}"
            )));
        }
        params.validate(mass)?;
        Ok(Self { mass, params })
    }

    pub fn params(&self) -> &ObserverParams {
        &self.params
    }

    /// Conserved energy per unit rest mass of the fall.
    pub fn specific_energy(&self) -> f64 {
        match self.params.release {
            ReleasePolicy::FromInfinity => 1.0,
            ReleasePolicy::FromRest => (1.0 - 2.0 * self.mass / self.params.initial_radius).sqrt(),
        }
    }

    /// Proper time at which the observer reaches `r = 0`.
    pub fn final_time(&self) -> f64 {
        let r0 = self.params.initial_radius;
        match self.params.release {
            ReleasePolicy::FromInfinity => 2.0 * r0.powf(1.5) / (3.0 * (2.0 * self.mass).sqrt()),
            ReleasePolicy::FromRest => PI * self.cycloid_scale(),
        }
    }

    /// Proper time left before reaching `r = 0`.
    pub fn remaining_time(&self, proper_time: f64) -> f64 {
        (self.final_time() - proper_time).max(0.0)
    }

    /// Proper time at which the horizon is crossed.
    pub fn horizon_crossing_time(&self) -> f64 {
        let horizon = 2.0 * self.mass;
        let r0 = self.params.initial_radius;
        if r0 <= horizon {
            return 0.0;
        }
        match self.params.release {
            ReleasePolicy::FromInfinity => {
                2.0 * (r0.powf(1.5) - horizon.powf(1.5)) / (3.0 * (2.0 * self.mass).sqrt())
            }
            ReleasePolicy::FromRest => {
                let eta = (2.0 * horizon / r0 - 1.0).acos();
                self.cycloid_scale() * (eta + eta.sin())
            }
        }
    }

    /// Coordinate radius at the given proper time.
    pub fn radius_at(&self, proper_time: f64) -> f64 {
        let r0 = self.params.initial_radius;
        match self.params.release {
            ReleasePolicy::FromInfinity => {
                let base = r0.powf(1.5) - 1.5 * (2.0 * self.mass).sqrt() * proper_time;
                base.max(0.0).powf(2.0 / 3.0)
            }
            ReleasePolicy::FromRest => {
                if proper_time <= 0.0 {
                    return r0;
                }
                if proper_time >= self.final_time() {
                    return 0.0;
                }
                let eta = self.cycloid_parameter(proper_time);
                0.5 * r0 * (1.0 + eta.cos())
            }
        }
    }

    /// Full observer state at the given proper time.
    pub fn state_at(&self, proper_time: f64) -> ObserverState {
        ObserverState::new(
            self.mass,
            self.radius_at(proper_time),
            proper_time,
            self.specific_energy(),
        )
    }

    /// `√(R³/8M)`, the time scale of the cycloid `τ = scale·(η + sin η)`.
    fn cycloid_scale(&self) -> f64 {
        (self.params.initial_radius.powi(3) / (8.0 * self.mass)).sqrt()
    }

    /// Inverts `τ = scale·(η + sin η)` on `[0, π]` by bisection.
    fn cycloid_parameter(&self, proper_time: f64) -> f64 {
        let target = proper_time / self.cycloid_scale();
        let (mut low, mut high) = (0.0_f64, PI);
        for _ in 0..ETA_ITERATIONS {
            let mid = 0.5 * (low + high);
            if mid + mid.sin() < target {
                low = mid;
            } else {
                high = mid;
            }
        }
        0.5 * (low + high)
    }
}

/// Components of the observer's tetrad legs in Schwarzschild `(t, r)`
/// coordinates. The angular legs are the static `∂θ/r` and `∂φ/(r sin θ)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Tetrad {
    /// Four-velocity `(u^t, u^r)`.
    pub time: [f64; 2],
    /// Radial spatial leg `(e^t, e^r)`, pointing away from the hole.
    pub radial: [f64; 2],
}

/// Instantaneous state of the falling observer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ObserverState {
    pub mass: f64,
    pub radius: f64,
    pub proper_time: f64,
    /// Conserved specific energy `e`.
    pub specific_energy: f64,
    /// Infall rate `s = -dr/dτ = √(e² - f)`.
    pub infall_rate: f64,
}

impl ObserverState {
    pub fn new(mass: f64, radius: f64, proper_time: f64, specific_energy: f64) -> Self {
        let lapse = 1.0 - 2.0 * mass / radius.max(f64::MIN_POSITIVE);
        let infall_rate = (specific_energy * specific_energy - lapse).max(0.0).sqrt();
        Self {
            mass,
            radius,
            proper_time,
            specific_energy,
            infall_rate,
        }
    }

    pub fn lapse(&self) -> f64 {
        1.0 - 2.0 * self.mass / self.radius.max(f64::MIN_POSITIVE)
    }

    pub fn is_inside_horizon(&self) -> bool {
        self.radius <= 2.0 * self.mass
    }

    /// Speed relative to a static observer at the same radius. Static
    /// observers only exist outside the horizon.
    pub fn local_speed(&self) -> Option<f64> {
        if self.is_inside_horizon() {
            None
        } else {
            Some(self.infall_rate / self.specific_energy)
        }
    }

    /// Tetrad of the observer, undefined on the horizon and at the singularity
    /// where Schwarzschild coordinates break down.
    pub fn tetrad(&self) -> Option<Tetrad> {
        let lapse = self.lapse();
        if lapse.abs() < 1e-12 || self.radius <= 0.0 {
            return None;
        }
        let (e, s) = (self.specific_energy, self.infall_rate);
        Some(Tetrad {
            time: [e / lapse, -s],
            radial: [-s / lapse, e],
        })
    }
}

/// Converts observer-local directions into the global frame used by the
/// integrator.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ObserverFrame {
    state: ObserverState,
    energy: f64,
    infall_rate: f64,
    lapse: f64,
}

impl ObserverFrame {
    /// Builds the frame. Without curvature the frame is the identity: no
    /// aberration is applied.
    pub fn new(state: ObserverState, spacetime: &Spacetime) -> Self {
        let (energy, infall_rate, lapse) = if spacetime.is_curved() {
            (state.specific_energy, state.infall_rate, state.lapse())
        } else {
            (1.0, 0.0, 1.0)
        };
        Self {
            state,
            energy,
            infall_rate,
            lapse,
        }
    }

    pub fn state(&self) -> &ObserverState {
        &self.state
    }

    /// Outward radial axis at the observer.
    pub fn radial_axis(&self) -> DVec3 {
        DVec3::Z
    }

    /// Direction of propagation as measured by a static observer at the same
    /// place. Inside the horizon no static observer exists and the input is
    /// returned unchanged.
    pub fn aberrate(&self, local: DVec3) -> DVec3 {
        let local = local.normalize();
        if self.lapse <= 0.0 {
            return local;
        }

        let radial = local.z;
        let across = DVec3::new(local.x, local.y, 0.0);
        let denominator = self.energy - radial * self.infall_rate;

        let global_radial = (radial * self.energy - self.infall_rate) / denominator;
        let global_across = across * self.lapse.sqrt() / denominator;
        (global_across + DVec3::Z * global_radial).normalize()
    }

    /// Launches the photon seen along `local` (its propagation direction) and
    /// returns the orbital plane used to map the outcome back to the global
    /// frame.
    pub fn launch(&self, local: DVec3) -> (OrbitalPlane, RayState) {
        let (plane, radial, across) =
            OrbitalPlane::from_direction(self.radial_axis(), local.normalize());
        let radius = self.state.radius;

        let denominator = self.energy - radial * self.infall_rate;
        if !(denominator.is_finite() && denominator > 0.0) {
            return (plane, RayState::new(radius, -1.0, 0.0));
        }

        let impact_parameter = radius * across / denominator;
        let radial_velocity = (radial * self.energy - self.infall_rate) / denominator;
        (plane, RayState::new(radius, radial_velocity, impact_parameter))
    }

    /// Ray traced backwards from the camera along the viewing direction
    /// `view`. The photon actually received travels along `-view`; the
    /// returned state is its time reverse, so an escaping outcome names the
    /// point on the sky the light came from.
    pub fn view_ray(&self, view: DVec3) -> (OrbitalPlane, RayState) {
        let (plane, radial, across) =
            OrbitalPlane::from_direction(self.radial_axis(), view.normalize());
        let radius = self.state.radius;

        let denominator = self.energy + radial * self.infall_rate;
        if !(denominator.is_finite() && denominator > 0.0) {
            return (plane, RayState::new(radius, -1.0, 0.0));
        }

        let impact_parameter = radius * across / denominator;
        let radial_velocity = (radial * self.energy + self.infall_rate) / denominator;
        (plane, RayState::new(radius, radial_velocity, impact_parameter))
    }
}
