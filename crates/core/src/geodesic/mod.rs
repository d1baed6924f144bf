//! Null geodesic integration.
//!
//! Spherical symmetry confines every photon to the plane spanned by the radial
//! direction at its origin and its initial propagation direction. Inside that
//! plane the state is `(r, φ, dr/dλ)` with the impact parameter `b = L/E`
//! conserved, and the equations of motion reduce to
//!
//! ```text
//! dr/dλ   = p_r
//! dφ/dλ   = b / r²
//! dp_r/dλ = b²/r³ · (1 - 3M/r)
//! ```
//!
//! which are integrated with an embedded Runge-Kutta-Fehlberg 4(5) pair.

use glam::DVec3;
use serde::{Deserialize, Serialize};

use crate::{spacetime::Spacetime, BhDiverError, Result};

/// Intervals used by the Simpson quadrature of the asymptotic tail.
const TAIL_INTERVALS: usize = 32;
const SAFETY: f64 = 0.9;
const MIN_SHRINK: f64 = 0.2;
const MAX_GROWTH: f64 = 5.0;

/// Numerical budget of the integrator.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IntegratorSettings {
    /// Maximum number of accepted and rejected steps per ray.
    pub max_steps: u32,
    /// Local error tolerance of the adaptive step controller.
    pub tolerance: f64,
    /// Radius beyond which an outgoing ray counts as escaped. The effective
    /// cutoff is never below twice the starting radius.
    pub escape_radius: f64,
    /// Rays are captured once `r <= r_s·(1 + horizon_margin)`.
    pub horizon_margin: f64,
    /// Largest affine step as a fraction of the current radius.
    pub max_step_fraction: f64,
}

impl Default for IntegratorSettings {
    fn default() -> Self {
        Self {
            max_steps: 20_000,
            tolerance: 1e-9,
            escape_radius: 1_000.0,
            horizon_margin: 1e-3,
            max_step_fraction: 0.1,
        }
    }
}

impl IntegratorSettings {
    /// Cheaper settings suitable for the interactive viewport.
    pub fn interactive() -> Self {
        Self {
            max_steps: 2_000,
            tolerance: 1e-6,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_steps == 0 {
            return Err(BhDiverError::config("integrator step budget must be at least one"));
        }
        if !(self.tolerance.is_finite() && self.tolerance > 0.0) {
            return Err(BhDiverError::config(format!(
                "integrator tolerance must be positive, got {}",
                self.tolerance
            )));
        }
        if !(self.escape_radius.is_finite() && self.escape_radius > 0.0) {
            return Err(BhDiverError::config(format!(
                "escape radius must be positive, got {}",
                self.escape_radius
            )));
        }
        if !(self.horizon_margin.is_finite() && self.horizon_margin >= 0.0) {
            return Err(BhDiverError::config("horizon margin must be non-negative"));
        }
        if !(self.max_step_fraction > 0.0 && self.max_step_fraction <= 1.0) {
            return Err(BhDiverError::config(
                "maximum step fraction must lie in (0, 1]",
            ));
        }
        Ok(())
    }
}

/// Position and direction of a photon inside its orbital plane.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RayState {
    /// Coordinate radius.
    pub radius: f64,
    /// Polar angle inside the orbital plane, zero at the ray's origin.
    pub angle: f64,
    /// `dr/dλ` with the photon energy normalised to one.
    pub radial_velocity: f64,
    /// Conserved impact parameter `b = L/E`, non-negative.
    pub impact_parameter: f64,
}

impl RayState {
    pub fn new(radius: f64, radial_velocity: f64, impact_parameter: f64) -> Self {
        Self {
            radius,
            angle: 0.0,
            radial_velocity,
            impact_parameter: impact_parameter.abs(),
        }
    }

    /// Launches a ray from a static observer at `radius` whose unit
    /// propagation direction has `radial` and `tangential` components.
    pub fn from_static_direction(
        spacetime: &Spacetime,
        radius: f64,
        radial: f64,
        tangential: f64,
    ) -> Self {
        let lapse = spacetime.coefficients(radius).lapse;
        if lapse <= 0.0 {
            return Self::new(radius, -1.0, 0.0);
        }
        Self::new(radius, radial, radius * tangential.abs() / lapse.sqrt())
    }

    /// Angle of the current coordinate propagation direction inside the
    /// orbital plane.
    pub fn propagation_angle(&self) -> f64 {
        let tangential = self.impact_parameter / self.radius;
        self.angle + tangential.atan2(self.radial_velocity)
    }

    fn is_finite(&self) -> bool {
        self.radius.is_finite() && self.angle.is_finite() && self.radial_velocity.is_finite()
    }

    fn offset(&self, derivative: &Derivative, h: f64) -> Self {
        Self {
            radius: self.radius + h * derivative.radius,
            angle: self.angle + h * derivative.angle,
            radial_velocity: self.radial_velocity + h * derivative.radial_velocity,
            impact_parameter: self.impact_parameter,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct Derivative {
    radius: f64,
    angle: f64,
    radial_velocity: f64,
}

impl Derivative {
    fn combine(terms: &[(f64, &Derivative)]) -> Self {
        terms.iter().fold(Self::default(), |acc, (weight, k)| Self {
            radius: acc.radius + weight * k.radius,
            angle: acc.angle + weight * k.angle,
            radial_velocity: acc.radial_velocity + weight * k.radial_velocity,
        })
    }
}

/// Orthonormal basis of a ray's orbital plane, anchored at the ray's origin.
///
/// `radial` points away from the black hole at the origin; `tangent` is the
/// in-plane direction of increasing orbital angle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OrbitalPlane {
    pub radial: DVec3,
    pub tangent: DVec3,
}

impl OrbitalPlane {
    /// Splits `direction` into components along `radial` and an orthogonal
    /// tangent. Returns the plane with the `(radial, tangential)` components.
    pub fn from_direction(radial: DVec3, direction: DVec3) -> (Self, f64, f64) {
        let radial = radial.normalize();
        let radial_component = direction.dot(radial);
        let rest = direction - radial * radial_component;
        let tangential_component = rest.length();

        let tangent = if tangential_component > 1e-12 {
            rest / tangential_component
        } else {
            radial.any_orthonormal_vector()
        };

        (Self { radial, tangent }, radial_component, tangential_component)
    }

    /// Unit vector at `angle` from the radial axis inside the plane.
    pub fn direction(&self, angle: f64) -> DVec3 {
        let (sin, cos) = angle.sin_cos();
        self.radial * cos + self.tangent * sin
    }
}

/// Terminal classification of a traced ray.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RayOutcome {
    /// The ray fell through the horizon.
    Captured,
    /// The ray left towards infinity; `angle` is its asymptotic direction in
    /// the orbital plane.
    Escaped { angle: f64 },
}

/// Result of integrating a single ray.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RayTrace {
    pub outcome: RayOutcome,
    /// Number of attempted integration steps.
    pub steps: u32,
    /// Whether the step budget ran out and the outcome was forced.
    pub exhausted: bool,
}

impl RayTrace {
    fn finished(outcome: RayOutcome, steps: u32) -> Self {
        Self {
            outcome,
            steps,
            exhausted: false,
        }
    }
}

/// Adaptive-step null geodesic integrator.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeodesicIntegrator {
    spacetime: Spacetime,
    settings: IntegratorSettings,
}

impl GeodesicIntegrator {
    pub fn new(spacetime: Spacetime, settings: IntegratorSettings) -> Self {
        Self {
            spacetime,
            settings,
        }
    }

    pub fn spacetime(&self) -> &Spacetime {
        &self.spacetime
    }

    pub fn settings(&self) -> &IntegratorSettings {
        &self.settings
    }

    /// Integrates `initial` until it is captured, escapes, or exhausts the
    /// step budget. Never fails; identical inputs give identical results.
    pub fn trace(&self, initial: RayState) -> RayTrace {
        let capture_radius = self.capture_radius();
        let escape_radius = self.settings.escape_radius.max(2.0 * initial.radius);

        if !initial.is_finite() || initial.radius <= capture_radius {
            return RayTrace::finished(RayOutcome::Captured, 0);
        }

        let mut state = initial;
        let mut h = self.step_cap(&state).min(0.01 * state.radius);
        let mut steps = 0;

        while steps < self.settings.max_steps {
            if let Some(outcome) = self.terminal(&state, capture_radius, escape_radius) {
                return RayTrace::finished(outcome, steps);
            }

            steps += 1;
            h = h.min(self.step_cap(&state));
            let min_step = 1e-12 * state.radius.max(1.0);

            let (candidate, error) = self.rkf45_step(&state, h);
            let accept = error <= 1.0 || h <= min_step;

            if accept {
                if !candidate.is_finite() {
                    return RayTrace::finished(self.nearest_terminal(&state), steps);
                }
                state = candidate;
            }

            let factor = if error > 0.0 {
                (SAFETY * error.powf(-0.2)).clamp(MIN_SHRINK, MAX_GROWTH)
            } else {
                MAX_GROWTH
            };
            h = (h * factor).max(min_step);
        }

        if let Some(outcome) = self.terminal(&state, capture_radius, escape_radius) {
            return RayTrace::finished(outcome, steps);
        }

        RayTrace {
            outcome: self.nearest_terminal(&state),
            steps,
            exhausted: true,
        }
    }

    fn capture_radius(&self) -> f64 {
        self.spacetime.horizon_radius() * (1.0 + self.settings.horizon_margin)
    }

    fn terminal(
        &self,
        state: &RayState,
        capture_radius: f64,
        escape_radius: f64,
    ) -> Option<RayOutcome> {
        if state.radius <= capture_radius {
            return Some(RayOutcome::Captured);
        }

        // An ingoing photon inside the photon sphere has no turning point left.
        if self.spacetime.is_curved()
            && state.radial_velocity < 0.0
            && state.radius < self.spacetime.photon_sphere_radius()
        {
            return Some(RayOutcome::Captured);
        }

        if state.radius >= escape_radius && state.radial_velocity > 0.0 {
            return Some(RayOutcome::Escaped {
                angle: state.angle + self.asymptotic_tail(state),
            });
        }

        None
    }

    /// Forced classification used when a ray cannot be followed any further.
    fn nearest_terminal(&self, state: &RayState) -> RayOutcome {
        if !state.radius.is_finite() || state.radius <= self.spacetime.photon_sphere_radius() {
            RayOutcome::Captured
        } else {
            RayOutcome::Escaped {
                angle: state.propagation_angle(),
            }
        }
    }

    /// Largest step allowed at the current state: proportional to the radius
    /// far away, and never more than half the remaining gap to the horizon
    /// for ingoing rays.
    fn step_cap(&self, state: &RayState) -> f64 {
        let mut cap = self.settings.max_step_fraction * state.radius;
        if state.radial_velocity < 0.0 {
            let gap = state.radius - self.spacetime.horizon_radius();
            cap = cap.min(0.5 * gap / state.radial_velocity.abs().max(1e-3));
        }
        cap.max(1e-12)
    }

    fn derivative(&self, state: &RayState) -> Derivative {
        let r = state.radius;
        let b = state.impact_parameter;
        Derivative {
            radius: state.radial_velocity,
            angle: b / (r * r),
            radial_velocity: self.spacetime.radial_acceleration(r, b),
        }
    }

    /// One Runge-Kutta-Fehlberg step. Returns the fifth-order solution and the
    /// error estimate scaled so that values at or below one are acceptable.
    fn rkf45_step(&self, state: &RayState, h: f64) -> (RayState, f64) {
        let k1 = self.derivative(state);
        let k2 = self.derivative(&state.offset(&k1, h / 4.0));
        let k3 = self.derivative(
            &state.offset(&Derivative::combine(&[(3.0 / 32.0, &k1), (9.0 / 32.0, &k2)]), h),
        );
        let k4 = self.derivative(&state.offset(
            &Derivative::combine(&[
                (1932.0 / 2197.0, &k1),
                (-7200.0 / 2197.0, &k2),
                (7296.0 / 2197.0, &k3),
            ]),
            h,
        ));
        let k5 = self.derivative(&state.offset(
            &Derivative::combine(&[
                (439.0 / 216.0, &k1),
                (-8.0, &k2),
                (3680.0 / 513.0, &k3),
                (-845.0 / 4104.0, &k4),
            ]),
            h,
        ));
        let k6 = self.derivative(&state.offset(
            &Derivative::combine(&[
                (-8.0 / 27.0, &k1),
                (2.0, &k2),
                (-3544.0 / 2565.0, &k3),
                (1859.0 / 4104.0, &k4),
                (-11.0 / 40.0, &k5),
            ]),
            h,
        ));

        let fourth = state.offset(
            &Derivative::combine(&[
                (25.0 / 216.0, &k1),
                (1408.0 / 2565.0, &k3),
                (2197.0 / 4104.0, &k4),
                (-1.0 / 5.0, &k5),
            ]),
            h,
        );
        let fifth = state.offset(
            &Derivative::combine(&[
                (16.0 / 135.0, &k1),
                (6656.0 / 12825.0, &k3),
                (28561.0 / 56430.0, &k4),
                (-9.0 / 50.0, &k5),
                (2.0 / 55.0, &k6),
            ]),
            h,
        );

        let tolerance = self.settings.tolerance;
        let error = ((fifth.radius - fourth.radius).abs() / (tolerance * (1.0 + state.radius)))
            .max((fifth.angle - fourth.angle).abs() / tolerance)
            .max((fifth.radial_velocity - fourth.radial_velocity).abs() / tolerance);

        if error.is_nan() {
            (fifth, f64::INFINITY)
        } else {
            (fifth, error)
        }
    }

    /// Orbital angle still to be swept by an outgoing ray between its current
    /// radius and infinity: `∫₀^{1/r} b du / √(1 - b²u²(1 - 2Mu))`.
    fn asymptotic_tail(&self, state: &RayState) -> f64 {
        let b = state.impact_parameter;
        if b == 0.0 {
            return 0.0;
        }

        let upper = 1.0 / state.radius;
        let integrand = |u: f64| {
            let potential = if u == 0.0 {
                0.0
            } else {
                self.spacetime.photon_potential(1.0 / u, b)
            };
            b / (1.0 - potential).max(1e-12).sqrt()
        };

        let width = upper / TAIL_INTERVALS as f64;
        let interior: f64 = (1..TAIL_INTERVALS)
            .map(|i| {
                let weight = if i % 2 == 1 { 4.0 } else { 2.0 };
                weight * integrand(i as f64 * width)
            })
            .sum();

        width / 3.0 * (integrand(0.0) + interior + integrand(upper))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use std::f64::consts::{FRAC_PI_2, PI};

    fn integrator(relativity: bool) -> GeodesicIntegrator {
        GeodesicIntegrator::new(
            Spacetime::new(1.0, relativity).unwrap(),
            IntegratorSettings::default(),
        )
    }

    fn launch(integrator: &GeodesicIntegrator, radius: f64, angle: f64) -> RayState {
        RayState::from_static_direction(integrator.spacetime(), radius, angle.cos(), angle.sin())
    }

    fn escaped_angle(trace: RayTrace) -> f64 {
        match trace.outcome {
            RayOutcome::Escaped { angle } => angle,
            RayOutcome::Captured => panic!("expected the ray to escape: {trace:?}"),
        }
    }

    #[test]
    fn flat_rays_keep_their_direction() {
        let flat = integrator(false);
        for angle in [0.0, 0.3, FRAC_PI_2, 2.0, 2.6] {
            let trace = flat.trace(launch(&flat, 10.0, angle));
            assert!(!trace.exhausted);
            assert_abs_diff_eq!(escaped_angle(trace), angle, epsilon = 1e-6);
        }
    }

    #[test]
    fn flat_rays_still_hit_the_absorbing_sphere() {
        let flat = integrator(false);
        let trace = flat.trace(launch(&flat, 10.0, PI));
        assert_eq!(trace.outcome, RayOutcome::Captured);
    }

    #[test]
    fn rays_inside_the_horizon_are_captured() {
        for relativity in [true, false] {
            let integrator = integrator(relativity);
            for angle in [0.0, 1.0, PI] {
                let state = RayState::new(1.5, angle.cos(), 0.5);
                let trace = integrator.trace(state);
                assert_eq!(trace.outcome, RayOutcome::Captured);
                assert_eq!(trace.steps, 0);
            }
        }
    }

    #[test]
    fn weak_field_rays_barely_bend() {
        let curved = integrator(true);
        let trace = curved.trace(launch(&curved, 10_000.0, 0.1));
        assert_abs_diff_eq!(escaped_angle(trace), 0.1, epsilon = 1e-3);
    }

    #[test]
    fn deflection_matches_the_weak_field_limit() {
        let curved = integrator(true);
        // Aim a ray from far away so that it passes at impact parameter b.
        let radius = 5_000.0;
        let b = 200.0_f64;
        let lapse: f64 = 1.0 - 2.0 / radius;
        let sin = b * lapse.sqrt() / radius;
        let state = RayState::new(radius, -(1.0 - sin * sin).sqrt(), b);

        let angle = escaped_angle(curved.trace(state));
        // A straight line keeps its initial direction π - asin(sin); light
        // bending adds approximately 4M/b.
        let straight = PI - sin.asin();
        let deflection = angle - straight;
        assert_abs_diff_eq!(deflection, 4.0 / b, epsilon = 2e-3);
    }

    #[test]
    fn rays_below_the_critical_impact_parameter_are_captured() {
        let curved = integrator(true);
        let critical = curved.spacetime().critical_impact_parameter();
        let radius = 500.0;

        let ingoing = |b: f64| {
            let potential = curved.spacetime().photon_potential(radius, b);
            RayState::new(radius, -(1.0 - potential).sqrt(), b)
        };

        assert_eq!(curved.trace(ingoing(0.95 * critical)).outcome, RayOutcome::Captured);

        let outside = ingoing(1.05 * critical);
        assert!(matches!(
            curved.trace(outside).outcome,
            RayOutcome::Escaped { .. }
        ));
    }

    #[test]
    fn exhausted_rays_are_forced_to_the_nearest_terminal_state() {
        let settings = IntegratorSettings {
            max_steps: 3,
            ..IntegratorSettings::default()
        };
        let curved = GeodesicIntegrator::new(Spacetime::new(1.0, true).unwrap(), settings);

        let far = curved.trace(launch(&curved, 50.0, 0.5));
        assert!(far.exhausted);
        assert!(matches!(far.outcome, RayOutcome::Escaped { .. }));

        // Tangential ray just inside the photon sphere radius.
        let settings = IntegratorSettings {
            max_steps: 1,
            ..IntegratorSettings::default()
        };
        let flat = GeodesicIntegrator::new(Spacetime::new(1.0, false).unwrap(), settings);
        let near = flat.trace(RayState::new(2.9, 0.0, 2.9));
        assert!(near.exhausted);
        assert_eq!(near.outcome, RayOutcome::Captured);
    }

    #[test]
    fn tracing_is_deterministic() {
        let curved = integrator(true);
        let state = launch(&curved, 10.0, 2.2);
        assert_eq!(curved.trace(state), curved.trace(state));
    }

    #[test]
    fn orbital_plane_handles_radial_directions() {
        let (plane, radial, tangential) = OrbitalPlane::from_direction(DVec3::Z, -DVec3::Z);
        assert_abs_diff_eq!(radial, -1.0);
        assert_abs_diff_eq!(tangential, 0.0);
        assert_abs_diff_eq!(plane.tangent.dot(DVec3::Z), 0.0);
        assert_abs_diff_eq!(plane.tangent.length(), 1.0, epsilon = 1e-12);

        let direction = DVec3::new(0.6, 0.0, 0.8);
        let (plane, radial, tangential) = OrbitalPlane::from_direction(DVec3::Z, direction);
        let rebuilt = plane.direction(tangential.atan2(radial));
        assert_abs_diff_eq!(rebuilt.distance(direction), 0.0, epsilon = 1e-12);
    }

    #[test]
    fn rejects_degenerate_settings() {
        let mut settings = IntegratorSettings::default();
        assert!(settings.validate().is_ok());
        settings.max_steps = 0;
        assert!(settings.validate().is_err());

        let settings = IntegratorSettings {
            tolerance: 0.0,
            ..IntegratorSettings::default()
        };
        assert!(settings.validate().is_err());
    }
}
