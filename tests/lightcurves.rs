//! End-to-end checks across operator layers: design matrices against
//! rendered-image integrations, the harmonic pipeline against the
//! closed-form limb-darkened solution, and full system assembly.

use approx::assert_relative_eq;
use nalgebra::{DMatrix, DVector};
use std::f64::consts::{FRAC_PI_2, PI};

use lightcurve::{
    Basis, LimbDarkenedOps, MapProjection, ReflectedOps, System, YlmOps,
};
use lightcurve::system::{BodyOps, MapState, Primary, Secondary};

fn init() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Sums an orthographic image cube frame into a disk integral.
fn integrate_frame(cube: &ndarray::Array3<f64>, frame: usize, res: usize) -> f64 {
    let da = (2.0 / res as f64) * (2.0 / res as f64);
    let mut total = 0.0;
    for i in 0..res {
        for j in 0..res {
            let v = cube[(frame, i, j)];
            if v.is_finite() {
                total += v * da;
            }
        }
    }
    total
}

#[test]
fn reflected_phase_curve_over_a_full_orbit() {
    init();
    let ops = ReflectedOps::new(1, 0, 0, 0);
    let y = DMatrix::from_column_slice(4, 1, &[1.0, 0.1, 0.2, 0.3]);
    let u = Basis::uniform_profile(0);
    let f = Basis::identity_filter(0);
    let inc = PI / 3.0;

    // one full rotation, with the source circling 3.5 times faster so
    // illumination decouples from the rotation phase
    let n = 100;
    let theta: Vec<f64> = (0..n)
        .map(|i| 2.0 * PI * i as f64 / (n - 1) as f64)
        .collect();
    let phi: Vec<f64> = theta.iter().map(|t| 3.5 * t).collect();
    let xo: Vec<f64> = phi.iter().map(|p| p.cos()).collect();
    let yo: Vec<f64> = phi.iter().map(|p| 0.1 * p.cos()).collect();
    let zo: Vec<f64> = phi.iter().map(|p| p.sin()).collect();

    let flux = ops
        .flux(&theta, &xo, &yo, &zo, 0.0, inc, 0.0, &y, &u, &f, 0.0)
        .unwrap();
    for v in flux.column(0).iter() {
        assert!(v.is_finite());
    }

    // Cross-check a handful of phases against a pixel integration of the
    // rendered, illuminated disk.
    let res = 256;
    for &k in &[0usize, 13, 25, 40] {
        let cube = ops
            .render(
                res,
                MapProjection::Orthographic,
                true,
                &[theta[k]],
                inc,
                0.0,
                &y,
                &u,
                &f,
                0.0,
                &[xo[k]],
                &[yo[k]],
                &[zo[k]],
            )
            .unwrap();
        let pix = integrate_frame(&cube, 0, res);
        let exact = flux[(k, 0)];
        assert_relative_eq!(pix, exact, epsilon = 5e-3, max_relative = 0.03);
    }
}

#[test]
fn harmonic_pipeline_matches_closed_form_limb_darkening() {
    init();
    // The same transit computed two ways: the general quadrature-based
    // occultation rows with a limb-darkening filter, and the analytic
    // limb-darkened occultation integral.
    let ylm = YlmOps::new(0, 2, 0, 0);
    let ld = LimbDarkenedOps::new(2);
    let mut u = Basis::uniform_profile(2);
    u[1] = 0.4;
    u[2] = 0.2;
    let f = Basis::identity_filter(0);
    let y = DMatrix::from_element(1, 1, 1.0);
    let ro = 0.15;

    let nb = 25;
    let xo: Vec<f64> = (0..nb).map(|i| 1.2 * i as f64 / (nb - 1) as f64).collect();
    let yo = vec![0.3; nb];
    let zo = vec![1.0; nb];
    let theta = vec![0.0; nb];

    let general = ylm
        .flux(&theta, &xo, &yo, &zo, ro, FRAC_PI_2, 0.0, &y, &u, &f, 0.0)
        .unwrap();
    let closed = ld.flux(&xo, &yo, &zo, ro, &u);
    for i in 0..nb {
        assert_relative_eq!(general[(i, 0)], closed[i], epsilon = 1e-6);
    }
}

#[test]
fn spot_modulates_the_rotation_curve() {
    init();
    let ops = YlmOps::new(5, 0, 0, 0);
    let y0 = DVector::from_fn(36, |i, _| if i == 0 { 1.0 } else { 0.0 });
    let (y, _) = ops.add_spot(&y0, 1.0, -0.2, 0.25, 0.0, 0.0);
    let ym = DMatrix::from_column_slice(36, 1, y.as_slice());
    let u = Basis::uniform_profile(0);
    let f = Basis::identity_filter(0);

    let n = 36;
    let theta: Vec<f64> = (0..n).map(|i| 2.0 * PI * i as f64 / n as f64).collect();
    let far = vec![10.0; n];
    let zero = vec![0.0; n];
    let one = vec![1.0; n];
    let flux = ops
        .flux(&theta, &far, &zero, &one, 0.0, FRAC_PI_2, 0.0, &ym, &u, &f, 0.0)
        .unwrap();

    // extrema sit at the sub-observer and anti-observer passages of the
    // spot, half a rotation apart
    let mut lo = 0;
    let mut hi = 0;
    for i in 0..n {
        if flux[(i, 0)] < flux[(lo, 0)] {
            lo = i;
        }
        if flux[(i, 0)] > flux[(hi, 0)] {
            hi = i;
        }
    }
    assert!(lo == 0 && hi == n / 2 || lo == n / 2 && hi == 0);
    assert!(flux[(hi, 0)] - flux[(lo, 0)] > 1e-3);
}

fn transit_system(udeg: usize, u1: f64) -> System {
    let mut y = DMatrix::<f64>::zeros(1, 1);
    y[(0, 0)] = 1.0;
    let mut u = Basis::uniform_profile(udeg);
    if udeg > 0 {
        u[1] = u1;
    }
    let primary = Primary {
        ops: YlmOps::new(0, udeg, 0, 0),
        map: MapState {
            y,
            u,
            f: Basis::identity_filter(0),
            inc: FRAC_PI_2,
            obl: 0.0,
            alpha: 0.0,
            veq: 0.0,
        },
        radius: 1.0,
        mass: 1.0,
        prot: 1.0,
        t0: 0.0,
        theta0: 0.0,
        amp: 1.0,
    };
    let mut ysec = DMatrix::<f64>::zeros(1, 1);
    ysec[(0, 0)] = 1.0;
    let secondary = Secondary {
        ops: BodyOps::Emitted(YlmOps::new(0, 0, 0, 0)),
        map: MapState {
            y: ysec,
            u: Basis::uniform_profile(0),
            f: Basis::identity_filter(0),
            inc: FRAC_PI_2,
            obl: 0.0,
            alpha: 0.0,
            veq: 0.0,
        },
        radius: 0.1,
        mass: 0.0001,
        prot: 1.0,
        t0: 0.0,
        theta0: 0.0,
        amp: 0.0,
        porb: 8.0,
        ecc: 0.0,
        omega: FRAC_PI_2,
        big_omega: 0.0,
        iorb: FRAC_PI_2,
    };
    System::new(primary, vec![secondary])
}

#[test]
fn system_transit_matches_closed_form() {
    init();
    let sys = transit_system(2, 0.4);
    let ld = LimbDarkenedOps::new(2);
    let mut u = Basis::uniform_profile(2);
    u[1] = 0.4;

    // samples bracketing mid-transit, occultor fully interior
    let t: Vec<f64> = (0..12).map(|i| -0.02 + 0.004 * i as f64).collect();
    let flux = sys.flux(&t).unwrap();

    let orbit_a = 2942.2062175044193_f64 * 1.0001 * 64.0 / (4.0 * PI * PI);
    let a = orbit_a.cbrt();
    let n = 2.0 * PI / 8.0;
    let xo: Vec<f64> = t.iter().map(|ti| -a * (n * ti).sin()).collect();
    let yo = vec![0.0; t.len()];
    let zo = vec![a; t.len()];
    let closed = ld.flux(&xo, &yo, &zo, 0.1, &u);
    for i in 0..t.len() {
        assert_relative_eq!(flux[(i, 0)], closed[i], epsilon = 1e-5);
    }
}

#[test]
fn exposure_orders_converge_at_mid_transit() {
    init();
    // the light curve is flat at mid-transit, so a short exposure window
    // changes nothing regardless of the stencil order
    let sharp = transit_system(0, 0.0).flux(&[0.0]).unwrap()[(0, 0)];
    for order in 0..=2 {
        let smeared = transit_system(0, 0.0)
            .with_exposure(0.001, 9, order)
            .unwrap()
            .flux(&[0.0])
            .unwrap()[(0, 0)];
        assert_relative_eq!(smeared, sharp, epsilon = 1e-8);
    }
}

#[test]
fn reflected_system_phase_curve_is_smooth() {
    init();
    let sec = {
        let mut y = DMatrix::<f64>::zeros(4, 1);
        y[(0, 0)] = 1.0;
        Secondary {
            ops: BodyOps::Reflected(ReflectedOps::new(1, 0, 0, 0)),
            map: MapState {
                y,
                u: Basis::uniform_profile(0),
                f: Basis::identity_filter(0),
                inc: FRAC_PI_2,
                obl: 0.0,
                alpha: 0.0,
                veq: 0.0,
            },
            radius: 0.1,
            mass: 0.0001,
            prot: 1.0,
            t0: 0.0,
            theta0: 0.0,
            amp: 1.0,
            porb: 8.0,
            ecc: 0.0,
            omega: FRAC_PI_2,
            big_omega: 0.0,
            iorb: 1.3,
        }
    };
    let sys = transit_system(0, 0.0);
    let sys = System::new(sys.primary, vec![sec]);

    // the tilted orbit never produces an occultation, so the reflected
    // phase curve runs over the whole period
    let t: Vec<f64> = (0..64).map(|i| 8.0 * i as f64 / 64.0).collect();
    let flux = sys.flux(&t).unwrap();
    let mut lo = f64::INFINITY;
    let mut hi = f64::NEG_INFINITY;
    for v in flux.column(0).iter() {
        assert!(v.is_finite());
        lo = lo.min(*v);
        hi = hi.max(*v);
    }
    // baseline star plus a small reflected modulation
    assert!(lo >= 1.0 - 1e-9);
    assert!(hi > lo);
}
