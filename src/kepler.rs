//! Keplerian two-body orbits in solar units.
//!
//! Lengths are in solar radii, masses in solar masses, times in days.
//! The sky plane is `(x, y)` with `z` increasing toward the observer, so
//! a transiting body sits at `z > 0` at the transit epoch.

use crate::error::{Error, Result};

/// Gravitational constant in `R_sun^3 / (M_sun day^2)`.
pub const G_GRAV: f64 = 2942.2062175044193;

/// Speed of light in `R_sun / day`.
pub const C_LIGHT: f64 = 37231.6636;

const R_SUN_M: f64 = 6.957e8;
const DAY_S: f64 = 86400.0;

/// Cartesian tracks for a set of sample times, one entry per axis.
pub type Track = [Vec<f64>; 3];

/// The position/velocity contract the light-curve assembler consumes.
/// Implementations that cannot model the light travel time report
/// `Error::OrbitCapability` and the caller falls back to instantaneous
/// positions.
pub trait OrbitSolver {
    /// Secondary position relative to the primary, in solar radii.
    fn relative_position(&self, t: &[f64], light_delay: bool) -> Result<Track>;

    /// Primary reflex position about the system barycenter.
    fn star_position(&self, t: &[f64], light_delay: bool) -> Result<Track>;

    /// Secondary position about the system barycenter.
    fn planet_position(&self, t: &[f64], light_delay: bool) -> Result<Track>;

    /// Primary reflex radial velocity in m/s, positive receding.
    fn radial_velocity(&self, t: &[f64]) -> Vec<f64>;
}

/// A bound two-body orbit referenced to the transit epoch `t0`.
#[derive(Debug, Clone)]
pub struct KeplerianOrbit {
    pub period: f64,
    pub t0: f64,
    pub incl: f64,
    pub ecc: f64,
    pub omega: f64,
    pub big_omega: f64,
    pub m_planet: f64,
    pub m_star: f64,
    /// Semi-major axis of the relative orbit, solar radii.
    pub a: f64,
    /// Mean motion, rad/day.
    n: f64,
    t_periastron: f64,
}

impl KeplerianOrbit {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        period: f64,
        t0: f64,
        incl: f64,
        ecc: f64,
        omega: f64,
        big_omega: f64,
        m_planet: f64,
        m_star: f64,
    ) -> Self {
        let a = (G_GRAV * (m_star + m_planet) * period * period
            / (4.0 * std::f64::consts::PI * std::f64::consts::PI))
            .cbrt();
        let n = 2.0 * std::f64::consts::PI / period;
        // Reference the mean anomaly to the transit configuration,
        // omega + nu = pi/2.
        let nu_tr = std::f64::consts::FRAC_PI_2 - omega;
        let e_tr = ((1.0 - ecc * ecc).sqrt() * nu_tr.sin()).atan2(ecc + nu_tr.cos());
        let m_tr = e_tr - ecc * e_tr.sin();
        let t_periastron = t0 - m_tr / n;
        KeplerianOrbit {
            period,
            t0,
            incl,
            ecc,
            omega,
            big_omega,
            m_planet,
            m_star,
            a,
            n,
            t_periastron,
        }
    }

    /// Builds the orbit from a semi-major axis instead of a period.
    #[allow(clippy::too_many_arguments)]
    pub fn from_semimajor_axis(
        a: f64,
        t0: f64,
        incl: f64,
        ecc: f64,
        omega: f64,
        big_omega: f64,
        m_planet: f64,
        m_star: f64,
    ) -> Self {
        let period =
            2.0 * std::f64::consts::PI * (a * a * a / (G_GRAV * (m_star + m_planet))).sqrt();
        Self::new(period, t0, incl, ecc, omega, big_omega, m_planet, m_star)
    }

    /// Solves Kepler's equation `E - e sin E = M` by Newton iteration
    /// with a bisection fallback when a step leaves the bracket.
    fn eccentric_anomaly(&self, m: f64) -> f64 {
        let e = self.ecc;
        if e == 0.0 {
            return m;
        }
        let m = (m + std::f64::consts::PI).rem_euclid(2.0 * std::f64::consts::PI)
            - std::f64::consts::PI;
        let mut lo = m - e;
        let mut hi = m + e;
        let mut ea = m + e * m.sin();
        for _ in 0..60 {
            let f = ea - e * ea.sin() - m;
            if f.abs() < 1e-13 {
                return ea;
            }
            if f > 0.0 {
                hi = ea;
            } else {
                lo = ea;
            }
            let step = f / (1.0 - e * ea.cos());
            let next = ea - step;
            ea = if next > lo && next < hi {
                next
            } else {
                0.5 * (lo + hi)
            };
        }
        ea
    }

    fn true_anomaly_at(&self, t: f64) -> f64 {
        let m = self.n * (t - self.t_periastron);
        let ea = self.eccentric_anomaly(m);
        ((1.0 - self.ecc * self.ecc).sqrt() * ea.sin()).atan2(ea.cos() - self.ecc)
    }

    /// Relative separation vector at one instant.
    fn separation_at(&self, t: f64) -> [f64; 3] {
        let nu = self.true_anomaly_at(t);
        let r = self.a * (1.0 - self.ecc * self.ecc) / (1.0 + self.ecc * nu.cos());
        let (swf, cwf) = (self.omega + nu).sin_cos();
        let (so, co) = self.big_omega.sin_cos();
        let ci = self.incl.cos();
        [
            r * (co * cwf - so * swf * ci),
            r * (so * cwf + co * swf * ci),
            r * swf * self.incl.sin(),
        ]
    }

    /// Retarded emission time for the secondary: light from the near
    /// side of the orbit arrives sooner, so the apparent orbital phase
    /// leads or lags by `z / c` relative to the barycenter plane.
    fn delayed_time(&self, t: f64) -> f64 {
        let frac = self.m_star / (self.m_star + self.m_planet);
        let mut tau = t;
        for _ in 0..3 {
            let z = frac * self.separation_at(tau)[2];
            tau = t + z / C_LIGHT;
        }
        tau
    }

    fn track<F>(&self, t: &[f64], light_delay: bool, scale: f64, f: F) -> Track
    where
        F: Fn(&Self, f64) -> [f64; 3],
    {
        let mut x = Vec::with_capacity(t.len());
        let mut y = Vec::with_capacity(t.len());
        let mut z = Vec::with_capacity(t.len());
        for &ti in t {
            let ti = if light_delay { self.delayed_time(ti) } else { ti };
            let p = f(self, ti);
            x.push(scale * p[0]);
            y.push(scale * p[1]);
            z.push(scale * p[2]);
        }
        [x, y, z]
    }

    /// Radial-velocity semi-amplitude of the primary, m/s.
    pub fn semi_amplitude(&self) -> f64 {
        let a_star = self.a * self.m_planet / (self.m_star + self.m_planet);
        self.n * a_star * self.incl.sin() / (1.0 - self.ecc * self.ecc).sqrt() * R_SUN_M / DAY_S
    }
}

impl OrbitSolver for KeplerianOrbit {
    fn relative_position(&self, t: &[f64], light_delay: bool) -> Result<Track> {
        Ok(self.track(t, light_delay, 1.0, Self::separation_at))
    }

    fn star_position(&self, t: &[f64], light_delay: bool) -> Result<Track> {
        let frac = -self.m_planet / (self.m_star + self.m_planet);
        Ok(self.track(t, light_delay, frac, Self::separation_at))
    }

    fn planet_position(&self, t: &[f64], light_delay: bool) -> Result<Track> {
        let frac = self.m_star / (self.m_star + self.m_planet);
        Ok(self.track(t, light_delay, frac, Self::separation_at))
    }

    fn radial_velocity(&self, t: &[f64]) -> Vec<f64> {
        let k = self.semi_amplitude();
        t.iter()
            .map(|&ti| {
                let nu = self.true_anomaly_at(ti);
                k * ((self.omega + nu).cos() + self.ecc * self.omega.cos())
            })
            .collect()
    }
}

/// Runs `op` with the light-time correction, falling back to
/// instantaneous positions with a warning when the solver cannot model
/// the delay.
pub fn with_light_delay_fallback<F>(light_delay: bool, mut op: F) -> Result<Track>
where
    F: FnMut(bool) -> Result<Track>,
{
    match op(light_delay) {
        Err(Error::OrbitCapability(what)) if light_delay => {
            log::warn!("orbit solver does not model {}; ignoring", what);
            op(false)
        }
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::f64::consts::{FRAC_PI_2, PI};

    #[test]
    fn earth_sun_semimajor_axis() {
        let orbit = KeplerianOrbit::new(365.25, 0.0, FRAC_PI_2, 0.0, FRAC_PI_2, 0.0, 3e-6, 1.0);
        // 1 au is about 215 solar radii
        assert_relative_eq!(orbit.a, 215.1, epsilon = 0.5);
    }

    #[test]
    fn kepler_equation_round_trip() {
        let orbit = KeplerianOrbit::new(10.0, 0.0, FRAC_PI_2, 0.7, 0.3, 0.0, 0.001, 1.0);
        for i in 0..20 {
            let m = -3.0 + 0.3 * i as f64;
            let ea = orbit.eccentric_anomaly(m);
            let back = ea - orbit.ecc * ea.sin();
            let wrapped = (m + PI).rem_euclid(2.0 * PI) - PI;
            assert_relative_eq!(back, wrapped, epsilon = 1e-10);
        }
    }

    #[test]
    fn circular_orbit_transits_at_epoch() {
        let orbit = KeplerianOrbit::new(3.0, 1.5, FRAC_PI_2, 0.0, FRAC_PI_2, 0.0, 0.001, 1.0);
        let [x, y, z] = orbit.relative_position(&[1.5], false).unwrap();
        assert_relative_eq!(x[0], 0.0, epsilon = 1e-8);
        assert_relative_eq!(y[0], 0.0, epsilon = 1e-8);
        assert_relative_eq!(z[0], orbit.a, epsilon = 1e-8);
    }

    #[test]
    fn eccentric_orbit_transits_at_epoch() {
        let orbit = KeplerianOrbit::new(7.0, 0.4, FRAC_PI_2, 0.4, 1.1, 0.0, 0.001, 1.0);
        let [x, _, z] = orbit.relative_position(&[0.4], false).unwrap();
        assert_relative_eq!(x[0], 0.0, epsilon = 1e-8);
        assert!(z[0] > 0.0);
    }

    #[test]
    fn periastron_distance() {
        let orbit = KeplerianOrbit::new(10.0, 0.0, FRAC_PI_2, 0.3, FRAC_PI_2, 0.0, 0.001, 1.0);
        let [x, y, z] = orbit.relative_position(&[orbit.t_periastron], false).unwrap();
        let r = (x[0] * x[0] + y[0] * y[0] + z[0] * z[0]).sqrt();
        assert_relative_eq!(r, orbit.a * (1.0 - orbit.ecc), epsilon = 1e-8);
    }

    #[test]
    fn reflex_balances_barycenter() {
        let orbit = KeplerianOrbit::new(5.0, 0.0, 1.2, 0.2, 0.5, 0.3, 0.05, 1.0);
        let t = [0.7, 1.9, 3.3];
        let [sx, sy, sz] = orbit.star_position(&t, false).unwrap();
        let [px, py, pz] = orbit.planet_position(&t, false).unwrap();
        for i in 0..t.len() {
            assert_relative_eq!(
                orbit.m_star * sx[i] + orbit.m_planet * px[i],
                0.0,
                epsilon = 1e-10
            );
            assert_relative_eq!(
                orbit.m_star * sy[i] + orbit.m_planet * py[i],
                0.0,
                epsilon = 1e-10
            );
            assert_relative_eq!(
                orbit.m_star * sz[i] + orbit.m_planet * pz[i],
                0.0,
                epsilon = 1e-10
            );
        }
    }

    #[test]
    fn rv_semi_amplitude_closed_form() {
        let orbit = KeplerianOrbit::new(4.2, 0.0, FRAC_PI_2, 0.0, FRAC_PI_2, 0.0, 0.001, 1.0);
        let rv = orbit.radial_velocity(&[0.0, 1.05, 2.1, 3.15]);
        let k = orbit.semi_amplitude();
        // omega + nu sweeps a quarter turn per quarter period
        assert_relative_eq!(rv[0], 0.0, epsilon = k * 1e-8);
        assert_relative_eq!(rv[1], -k, epsilon = k * 1e-8);
        assert_relative_eq!(rv[2], 0.0, epsilon = k * 1e-6);
        assert_relative_eq!(rv[3], k, epsilon = k * 1e-6);
    }

    #[test]
    fn light_delay_shifts_the_apparent_transit() {
        let orbit = KeplerianOrbit::new(100.0, 0.0, FRAC_PI_2, 0.0, FRAC_PI_2, 0.0, 0.001, 1.0);
        let delay = orbit.a / C_LIGHT;
        let [x_inst, _, _] = orbit.relative_position(&[0.0], false).unwrap();
        let [x_del, _, _] = orbit.relative_position(&[0.0], true).unwrap();
        assert_relative_eq!(x_inst[0], 0.0, epsilon = 1e-8);
        // the delayed track at t = 0 shows the planet a little past mid-transit
        let speed = 2.0 * PI * orbit.a / orbit.period;
        assert_relative_eq!(x_del[0], -speed * delay, epsilon = speed * delay * 1e-2);
    }

    #[test]
    fn fallback_retries_without_delay() {
        struct NoDelay(KeplerianOrbit);
        impl OrbitSolver for NoDelay {
            fn relative_position(&self, t: &[f64], light_delay: bool) -> crate::error::Result<Track> {
                if light_delay {
                    return Err(Error::OrbitCapability("light-time correction"));
                }
                self.0.relative_position(t, false)
            }
            fn star_position(&self, t: &[f64], light_delay: bool) -> crate::error::Result<Track> {
                self.0.star_position(t, light_delay)
            }
            fn planet_position(&self, t: &[f64], light_delay: bool) -> crate::error::Result<Track> {
                self.0.planet_position(t, light_delay)
            }
            fn radial_velocity(&self, t: &[f64]) -> Vec<f64> {
                self.0.radial_velocity(t)
            }
        }
        let solver = NoDelay(KeplerianOrbit::new(
            3.0, 0.0, FRAC_PI_2, 0.0, FRAC_PI_2, 0.0, 0.001, 1.0,
        ));
        let track = with_light_delay_fallback(true, |delay| solver.relative_position(&[0.0], delay))
            .unwrap();
        assert_relative_eq!(track[2][0], solver.0.a, epsilon = 1e-8);
    }
}
