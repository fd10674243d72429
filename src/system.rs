//! Keplerian system assembly: one primary plus N secondaries, each with
//! its own surface map, combined into a single design matrix over time.
//!
//! The phase curve of every body is the baseline; occultation
//! corrections are added on top at exactly the occulted samples for
//! each ordered (occulted, occultor) pair, so no contribution is
//! counted twice. Times are in days, lengths in solar radii.

use nalgebra::{DMatrix, DVector};
use ndarray::Array3;

use crate::error::{Error, Result};
use crate::kepler::{with_light_delay_fallback, KeplerianOrbit, OrbitSolver, Track};
use crate::map::{
    occultation_regime, MapProjection, OccultationRegime, ReflectedOps, RvOps, YlmOps,
};

/// Surface-map operator of a secondary; the primary is always seen in
/// emitted light.
pub enum BodyOps {
    Emitted(YlmOps),
    Reflected(ReflectedOps),
}

impl BodyOps {
    fn ncoeff(&self) -> usize {
        match self {
            BodyOps::Emitted(ops) => ops.basis.ny,
            BodyOps::Reflected(ops) => ops.basis.ny,
        }
    }

    fn fdeg(&self) -> usize {
        match self {
            BodyOps::Emitted(ops) => ops.basis.fdeg,
            BodyOps::Reflected(ops) => ops.basis.fdeg,
        }
    }
}

/// Map parameters shared by every body.
pub struct MapState {
    /// Harmonic coefficients, one column per wavelength channel.
    pub y: DMatrix<f64>,
    pub u: DVector<f64>,
    pub f: DVector<f64>,
    pub inc: f64,
    pub obl: f64,
    pub alpha: f64,
    pub veq: f64,
}

pub struct Primary {
    pub ops: YlmOps,
    pub map: MapState,
    /// Radius in solar radii.
    pub radius: f64,
    /// Mass in solar masses.
    pub mass: f64,
    /// Rotation period in days; zero means no rotation.
    pub prot: f64,
    pub t0: f64,
    pub theta0: f64,
    /// Luminosity scale applied to this body's design block.
    pub amp: f64,
}

pub struct Secondary {
    pub ops: BodyOps,
    pub map: MapState,
    pub radius: f64,
    pub mass: f64,
    pub prot: f64,
    pub t0: f64,
    pub theta0: f64,
    pub amp: f64,
    /// Orbital period in days.
    pub porb: f64,
    pub ecc: f64,
    /// Argument of periastron.
    pub omega: f64,
    /// Longitude of the ascending node.
    pub big_omega: f64,
    /// Orbital inclination.
    pub iorb: f64,
}

pub struct System {
    pub primary: Primary,
    pub secondaries: Vec<Secondary>,
    pub light_delay: bool,
    texp: f64,
    oversample: usize,
    order: usize,
}

impl System {
    pub fn new(primary: Primary, secondaries: Vec<Secondary>) -> Self {
        System {
            primary,
            secondaries,
            light_delay: false,
            texp: 0.0,
            oversample: 7,
            order: 0,
        }
    }

    /// Enables finite-exposure averaging: each sample is expanded into
    /// `oversample` sub-samples across the exposure window `texp` and
    /// folded back down with a box, trapezoid, or Simpson stencil
    /// (`order` 0, 1, or 2).
    pub fn with_exposure(mut self, texp: f64, oversample: usize, order: usize) -> Result<Self> {
        if order > 2 {
            return Err(Error::InvalidExposureOrder(order));
        }
        self.texp = texp;
        self.oversample = oversample;
        self.order = order;
        Ok(self)
    }

    pub fn with_light_delay(mut self, light_delay: bool) -> Self {
        self.light_delay = light_delay;
        self
    }

    fn orbit(&self, sec: &Secondary) -> KeplerianOrbit {
        KeplerianOrbit::new(
            sec.porb,
            sec.t0,
            sec.iorb,
            sec.ecc,
            sec.omega,
            sec.big_omega,
            sec.mass,
            self.primary.mass,
        )
    }

    fn has_reflected(&self) -> bool {
        self.secondaries
            .iter()
            .any(|s| matches!(s.ops, BodyOps::Reflected(_)))
    }

    /// Barycentric positions of every body, primary first. With more
    /// than one secondary the primary's track is the summed reflex of
    /// all of them.
    pub fn position(&self, t: &[f64]) -> Result<Vec<Track>> {
        let mut out = Vec::with_capacity(1 + self.secondaries.len());
        let mut star = [vec![0.0; t.len()], vec![0.0; t.len()], vec![0.0; t.len()]];
        if self.secondaries.len() == 1 {
            let orbit = self.orbit(&self.secondaries[0]);
            star = with_light_delay_fallback(self.light_delay, |d| orbit.star_position(t, d))?;
        } else {
            for sec in &self.secondaries {
                let orbit = self.orbit(sec);
                let s = with_light_delay_fallback(self.light_delay, |d| orbit.star_position(t, d))?;
                for ax in 0..3 {
                    for (acc, v) in star[ax].iter_mut().zip(&s[ax]) {
                        *acc += v;
                    }
                }
            }
        }
        out.push(star);
        for sec in &self.secondaries {
            let orbit = self.orbit(sec);
            out.push(with_light_delay_fallback(self.light_delay, |d| {
                orbit.planet_position(t, d)
            })?);
        }
        Ok(out)
    }

    fn rotation_phase(t: &[f64], prot: f64, t0: f64, theta0: f64) -> Vec<f64> {
        // zero rotation period means a frozen map
        if prot == 0.0 {
            return vec![theta0; t.len()];
        }
        let rate = 2.0 * std::f64::consts::PI / prot;
        t.iter().map(|&ti| rate * (ti - t0) + theta0).collect()
    }

    fn stencil(&self) -> (Vec<f64>, Vec<f64>) {
        let os = self.oversample + 1 - self.oversample % 2;
        let (dt, mut weights): (Vec<f64>, Vec<f64>) = match self.order {
            0 => {
                let dt = (0..os)
                    .map(|i| -0.5 + (2 * i + 1) as f64 / (2 * os) as f64)
                    .collect();
                (dt, vec![1.0; os])
            }
            1 => {
                let dt = Self::endpoint_offsets(os);
                let mut w = vec![2.0; os];
                w[0] = 1.0;
                w[os - 1] = 1.0;
                (dt, w)
            }
            _ => {
                let dt = Self::endpoint_offsets(os);
                let mut w = vec![0.0; os];
                for (i, wi) in w.iter_mut().enumerate() {
                    *wi = if i == 0 || i == os - 1 {
                        1.0
                    } else if i % 2 == 1 {
                        4.0
                    } else {
                        2.0
                    };
                }
                (dt, w)
            }
        };
        let total: f64 = weights.iter().sum();
        for w in &mut weights {
            *w /= total;
        }
        (dt.iter().map(|d| d * self.texp).collect(), weights)
    }

    // endpoint-inclusive offsets over [-1/2, 1/2]; a single sample sits
    // at the exposure midpoint
    fn endpoint_offsets(os: usize) -> Vec<f64> {
        if os == 1 {
            return vec![0.0];
        }
        (0..os)
            .map(|i| -0.5 + i as f64 / (os - 1) as f64)
            .collect()
    }

    /// Total number of design columns across all bodies.
    pub fn ncoeff(&self) -> usize {
        self.primary.ops.basis.ny
            + self
                .secondaries
                .iter()
                .map(|s| s.ops.ncoeff())
                .sum::<usize>()
    }

    /// The system design matrix, one column block per body, primary
    /// first.
    pub fn design_matrix(&self, t: &[f64]) -> Result<DMatrix<f64>> {
        let sec_f: Vec<DVector<f64>> =
            self.secondaries.iter().map(|s| s.map.f.clone()).collect();
        self.assemble(t, &self.primary.map.f, &sec_f)
    }

    fn assemble(
        &self,
        t: &[f64],
        pri_f: &DVector<f64>,
        sec_f: &[DVector<f64>],
    ) -> Result<DMatrix<f64>> {
        let nt = t.len();
        let expanded;
        let t_eval: &[f64] = if self.texp > 0.0 {
            let (dt, _) = self.stencil();
            let mut te = Vec::with_capacity(nt * dt.len());
            for &ti in t {
                for &d in &dt {
                    te.push(ti + d);
                }
            }
            expanded = te;
            &expanded
        } else {
            t
        };
        let ns = t_eval.len();

        let rel: Vec<Track> = self
            .secondaries
            .iter()
            .map(|sec| {
                let orbit = self.orbit(sec);
                with_light_delay_fallback(self.light_delay, |d| {
                    orbit.relative_position(t_eval, d)
                })
            })
            .collect::<Result<_>>()?;

        let pri = &self.primary;
        let theta_pri = Self::rotation_phase(t_eval, pri.prot, pri.t0, pri.theta0);
        let theta_sec: Vec<Vec<f64>> = self
            .secondaries
            .iter()
            .map(|s| Self::rotation_phase(t_eval, s.prot, s.t0, s.theta0))
            .collect();

        // Phase baselines
        let zeros = vec![0.0; ns];
        let mut x_pri = pri.ops.design_matrix(
            &theta_pri,
            &zeros,
            &zeros,
            &zeros,
            0.0,
            pri.map.inc,
            pri.map.obl,
            &pri.map.u,
            pri_f,
            pri.map.alpha,
        )? * pri.amp;
        let phase_pri = x_pri.clone();

        let mut x_sec = Vec::with_capacity(self.secondaries.len());
        let mut phase_sec = Vec::with_capacity(self.secondaries.len());
        for (i, sec) in self.secondaries.iter().enumerate() {
            let [x, y, z] = &rel[i];
            let nx: Vec<f64> = x.iter().map(|v| -v).collect();
            let ny: Vec<f64> = y.iter().map(|v| -v).collect();
            let nz: Vec<f64> = z.iter().map(|v| -v).collect();
            let block = match &sec.ops {
                BodyOps::Emitted(ops) => ops.design_matrix(
                    &theta_sec[i],
                    &nx,
                    &ny,
                    &nz,
                    0.0,
                    sec.map.inc,
                    sec.map.obl,
                    &sec.map.u,
                    &sec_f[i],
                    sec.map.alpha,
                )?,
                BodyOps::Reflected(ops) => ops.design_matrix(
                    &theta_sec[i],
                    &nx,
                    &ny,
                    &nz,
                    0.0,
                    sec.map.inc,
                    sec.map.obl,
                    &sec.map.u,
                    &sec_f[i],
                    sec.map.alpha,
                )?,
            } * sec.amp;
            phase_sec.push(block.clone());
            x_sec.push(block);
        }

        // Transits across the primary
        for (i, sec) in self.secondaries.iter().enumerate() {
            let [x, y, z] = &rel[i];
            let ro = sec.radius / pri.radius;
            let idx = occulted_indices(x, y, z, pri.radius, ro, 1.0);
            if idx.is_empty() {
                continue;
            }
            let th = gather(&theta_pri, &idx);
            let xo = gather_scaled(x, &idx, 1.0 / pri.radius);
            let yo = gather_scaled(y, &idx, 1.0 / pri.radius);
            let zo = gather_scaled(z, &idx, 1.0 / pri.radius);
            let occ = pri.ops.design_matrix(
                &th,
                &xo,
                &yo,
                &zo,
                ro,
                pri.map.inc,
                pri.map.obl,
                &pri.map.u,
                pri_f,
                pri.map.alpha,
            )? * pri.amp;
            for (k, &s) in idx.iter().enumerate() {
                let corr = occ.row(k) - phase_pri.row(s);
                let mut row = x_pri.row_mut(s);
                row += corr;
            }
        }

        // Occultations of each secondary by the primary
        for (i, sec) in self.secondaries.iter().enumerate() {
            let [x, y, z] = &rel[i];
            let ro = pri.radius / sec.radius;
            let idx = occulted_indices(x, y, z, sec.radius, ro, -1.0);
            if idx.is_empty() {
                continue;
            }
            let ops = match &sec.ops {
                BodyOps::Emitted(ops) => ops,
                BodyOps::Reflected(_) => return Err(Error::ReflectedOccultation),
            };
            let th = gather(&theta_sec[i], &idx);
            let xo = gather_scaled(x, &idx, -1.0 / sec.radius);
            let yo = gather_scaled(y, &idx, -1.0 / sec.radius);
            let zo = gather_scaled(z, &idx, -1.0 / sec.radius);
            let occ = ops.design_matrix(
                &th,
                &xo,
                &yo,
                &zo,
                ro,
                sec.map.inc,
                sec.map.obl,
                &sec.map.u,
                &sec_f[i],
                sec.map.alpha,
            )? * sec.amp;
            for (k, &s) in idx.iter().enumerate() {
                let corr = occ.row(k) - phase_sec[i].row(s);
                let mut row = x_sec[i].row_mut(s);
                row += corr;
            }
        }

        // Secondary-secondary occultations
        for i in 0..self.secondaries.len() {
            for j in 0..self.secondaries.len() {
                if i == j {
                    continue;
                }
                let sec = &self.secondaries[i];
                let ro = self.secondaries[j].radius / sec.radius;
                let [xi, yi, zi] = &rel[i];
                let [xj, yj, zj] = &rel[j];
                let dx: Vec<f64> = xi.iter().zip(xj).map(|(a, b)| b - a).collect();
                let dy: Vec<f64> = yi.iter().zip(yj).map(|(a, b)| b - a).collect();
                let dz: Vec<f64> = zi.iter().zip(zj).map(|(a, b)| b - a).collect();
                let idx = occulted_indices(&dx, &dy, &dz, sec.radius, ro, 1.0);
                if idx.is_empty() {
                    continue;
                }
                if self.has_reflected() {
                    return Err(Error::ReflectedMutualOccultation);
                }
                let ops = match &sec.ops {
                    BodyOps::Emitted(ops) => ops,
                    BodyOps::Reflected(_) => return Err(Error::ReflectedMutualOccultation),
                };
                let th = gather(&theta_sec[i], &idx);
                let xo = gather_scaled(&dx, &idx, 1.0 / sec.radius);
                let yo = gather_scaled(&dy, &idx, 1.0 / sec.radius);
                let zo = gather_scaled(&dz, &idx, 1.0 / sec.radius);
                let occ = ops.design_matrix(
                    &th,
                    &xo,
                    &yo,
                    &zo,
                    ro,
                    sec.map.inc,
                    sec.map.obl,
                    &sec.map.u,
                    &sec_f[i],
                    sec.map.alpha,
                )? * sec.amp;
                for (k, &s) in idx.iter().enumerate() {
                    let corr = occ.row(k) - phase_sec[i].row(s);
                    let mut row = x_sec[i].row_mut(s);
                    row += corr;
                }
            }
        }

        // Concatenate column blocks
        let ntot = self.ncoeff();
        let mut x = DMatrix::<f64>::zeros(ns, ntot);
        x.view_mut((0, 0), (ns, x_pri.ncols())).copy_from(&x_pri);
        let mut off = x_pri.ncols();
        for block in &x_sec {
            x.view_mut((0, off), (ns, block.ncols())).copy_from(block);
            off += block.ncols();
        }

        if self.texp > 0.0 {
            let (_, weights) = self.stencil();
            let os = weights.len();
            let mut folded = DMatrix::<f64>::zeros(nt, ntot);
            for k in 0..nt {
                for (s, w) in weights.iter().enumerate() {
                    let mut row = folded.row_mut(k);
                    row += x.row(k * os + s) * *w;
                }
            }
            return Ok(folded);
        }
        Ok(x)
    }

    /// System light curve, one column per wavelength channel.
    pub fn flux(&self, t: &[f64]) -> Result<DMatrix<f64>> {
        let x = self.design_matrix(t)?;
        let nw = self.primary.map.y.ncols();
        let mut out = DMatrix::<f64>::zeros(t.len(), nw);
        out += x.view((0, 0), (t.len(), self.primary.ops.basis.ny)) * &self.primary.map.y;
        let mut off = self.primary.ops.basis.ny;
        for sec in &self.secondaries {
            let n = sec.ops.ncoeff();
            out += x.view((0, off), (t.len(), n)) * &sec.map.y;
            off += n;
        }
        Ok(out)
    }

    /// Radial velocity of the system in m/s: the per-body weighted RV
    /// anomaly summed across bodies, plus the Keplerian reflex motion
    /// when `keplerian` is set. Bodies must carry a degree-3 filter.
    pub fn rv(&self, t: &[f64], keplerian: bool) -> Result<DVector<f64>> {
        if self.primary.ops.basis.fdeg != 3
            || self.secondaries.iter().any(|s| s.ops.fdeg() != 3)
        {
            return Err(Error::Dimension(
                "system radial velocity needs every body built with a degree-3 filter".into(),
            ));
        }
        let pri_f = RvOps::rv_filter(
            self.primary.map.inc,
            self.primary.map.obl,
            self.primary.map.veq,
            self.primary.map.alpha,
        );
        let sec_f: Vec<DVector<f64>> = self
            .secondaries
            .iter()
            .map(|s| RvOps::rv_filter(s.map.inc, s.map.obl, s.map.veq, s.map.alpha))
            .collect();
        let f0 = crate::basis::Basis::identity_filter(3);
        let sec_f0: Vec<DVector<f64>> = self.secondaries.iter().map(|_| f0.clone()).collect();

        let xv = self.assemble(t, &pri_f, &sec_f)?;
        let x0 = self.assemble(t, &f0, &sec_f0)?;

        let mut out = DVector::<f64>::zeros(t.len());
        let mut off = 0;
        let mut body = |n: usize, y: &DMatrix<f64>, out: &mut DVector<f64>| {
            let iv = xv.view((0, off), (t.len(), n)) * y;
            let i0 = x0.view((0, off), (t.len(), n)) * y;
            for k in 0..t.len() {
                let denom = i0[(k, 0)];
                if denom != 0.0 {
                    out[k] += iv[(k, 0)] / denom;
                }
            }
            off += n;
        };
        body(self.primary.ops.basis.ny, &self.primary.map.y, &mut out);
        for sec in &self.secondaries {
            body(sec.ops.ncoeff(), &sec.map.y, &mut out);
        }

        if keplerian {
            for sec in &self.secondaries {
                let orbit = self.orbit(sec);
                for (k, v) in orbit.radial_velocity(t).into_iter().enumerate() {
                    out[k] += v;
                }
            }
        }
        Ok(out)
    }

    /// Orthographic image cubes for every body plus the secondaries'
    /// relative positions at each frame.
    pub fn render(&self, t: &[f64], res: usize) -> Result<(Vec<Array3<f64>>, Vec<Track>)> {
        let rel: Vec<Track> = self
            .secondaries
            .iter()
            .map(|sec| {
                let orbit = self.orbit(sec);
                with_light_delay_fallback(self.light_delay, |d| orbit.relative_position(t, d))
            })
            .collect::<Result<_>>()?;

        let pri = &self.primary;
        let theta_pri = Self::rotation_phase(t, pri.prot, pri.t0, pri.theta0);
        let mut cubes = Vec::with_capacity(1 + self.secondaries.len());
        cubes.push(pri.ops.render(
            res,
            MapProjection::Orthographic,
            &theta_pri,
            pri.map.inc,
            pri.map.obl,
            &pri.map.y,
            &pri.map.u,
            &pri.map.f,
            pri.map.alpha,
        )?);
        for (i, sec) in self.secondaries.iter().enumerate() {
            let theta = Self::rotation_phase(t, sec.prot, sec.t0, sec.theta0);
            let [x, y, z] = &rel[i];
            let cube = match &sec.ops {
                BodyOps::Emitted(ops) => ops.render(
                    res,
                    MapProjection::Orthographic,
                    &theta,
                    sec.map.inc,
                    sec.map.obl,
                    &sec.map.y,
                    &sec.map.u,
                    &sec.map.f,
                    sec.map.alpha,
                )?,
                BodyOps::Reflected(ops) => {
                    let nx: Vec<f64> = x.iter().map(|v| -v).collect();
                    let ny: Vec<f64> = y.iter().map(|v| -v).collect();
                    let nz: Vec<f64> = z.iter().map(|v| -v).collect();
                    ops.render(
                        res,
                        MapProjection::Orthographic,
                        true,
                        &theta,
                        sec.map.inc,
                        sec.map.obl,
                        &sec.map.y,
                        &sec.map.u,
                        &sec.map.f,
                        sec.map.alpha,
                        &nx,
                        &ny,
                        &nz,
                    )?
                }
            };
            cubes.push(cube);
        }
        Ok((cubes, rel))
    }
}

/// Samples where the body at the origin is partially covered by an
/// occultor on the given track. `sign` flips the track for occultations
/// seen from the other body of a pair.
fn occulted_indices(
    x: &[f64],
    y: &[f64],
    z: &[f64],
    radius: f64,
    ro: f64,
    sign: f64,
) -> Vec<usize> {
    let mut idx = Vec::new();
    for i in 0..x.len() {
        let xo = sign * x[i] / radius;
        let yo = sign * y[i] / radius;
        let zo = sign * z[i] / radius;
        let b = xo.hypot(yo);
        if occultation_regime(b, zo, ro) == OccultationRegime::Occulted {
            idx.push(i);
        }
    }
    idx
}

fn gather(v: &[f64], idx: &[usize]) -> Vec<f64> {
    idx.iter().map(|&i| v[i]).collect()
}

fn gather_scaled(v: &[f64], idx: &[usize], scale: f64) -> Vec<f64> {
    idx.iter().map(|&i| v[i] * scale).collect()
}
