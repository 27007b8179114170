//! Escape-time iteration, directly in machine precision or as a delta against a
//! high-precision reference orbit.

use crate::expr::Env;
use crate::fractal::PerturbationForm;
use crate::kernel::CompiledKernel;
use crate::pipeline::surface::Sample;
use crate::precision::ExtendedComplex;
use num_complex::Complex64;
use rug::Complex;
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

/// Reference iteration keeps going well past the pixel bailout so deltas near the edge
/// still have samples to lean on.
const REFERENCE_ESCAPE_NORM: f64 = 1e6;

/// Everything besides the point itself that one iteration run needs.
#[derive(Clone, Copy)]
pub struct IterContext<'a> {
    pub kernel: &'a CompiledKernel,
    pub cap: u32,
    pub bailout: f64,
    pub mouse: Complex64,
    pub slots: &'a [f64],
}

impl<'a> IterContext<'a> {
    #[inline]
    fn env(&self, z: Complex64, c: Complex64) -> Env<'a> {
        Env {
            z,
            c,
            power: self.kernel.power,
            mouse: self.mouse,
            bailout: self.bailout,
            slots: self.slots,
        }
    }
}

#[inline]
fn finite(z: Complex64) -> bool {
    z.re.is_finite() && z.im.is_finite()
}

fn escape_loop(ctx: &IterContext<'_>, mut env: Env<'_>) -> Sample {
    for n in 0..ctx.cap {
        if !finite(env.z) {
            // Overflow in direct mode only happens on divergent orbits.
            return Sample::escaped(n, f64::INFINITY);
        }
        if ctx.kernel.bailout.program.truthy(&env) {
            return Sample::escaped(n, env.z.norm_sqr());
        }
        env.z = ctx.kernel.iterate.program.eval(&env);
    }
    Sample::inside(ctx.cap, env.z.norm_sqr())
}

/// Iterates `c` from the formula's initial value.
pub fn iterate_direct(ctx: &IterContext<'_>, c: Complex64) -> Sample {
    let mut env = ctx.env(Complex64::new(0.0, 0.0), c);
    env.z = ctx.kernel.initial.program.eval(&env);
    escape_loop(ctx, env)
}

/// Julia-set iteration: the pixel is the starting value and `seed` is the constant.
pub fn iterate_julia(ctx: &IterContext<'_>, z0: Complex64, seed: Complex64) -> Sample {
    escape_loop(ctx, ctx.env(z0, seed))
}

/// High-precision orbit of the view center, stored in machine precision.
#[derive(Debug, Clone)]
pub struct ReferenceOrbit {
    pub center: ExtendedComplex,
    pub form: PerturbationForm,
    pub cap: u32,
    pub bailout: f64,
    pub points: Vec<Complex64>,
    /// Index of the first sample past the escape radius, if the center escapes.
    pub escaped_at: Option<usize>,
}

impl ReferenceOrbit {
    pub fn compute(center: &ExtendedComplex, form: PerturbationForm, cap: u32, bailout: f64) -> Self {
        let prec = center.prec();
        let c = center.as_complex().clone();
        let mut z = Complex::with_val(prec, (0, 0));
        let escape = (bailout * bailout).max(REFERENCE_ESCAPE_NORM);

        let mut points = Vec::with_capacity(cap as usize + 1);
        points.push(Complex64::new(0.0, 0.0));
        let mut escaped_at = None;
        for _ in 0..cap {
            step_reference(&mut z, &c, form);
            let zf = Complex64::new(z.real().to_f64(), z.imag().to_f64());
            points.push(zf);
            if !finite(zf) || zf.norm_sqr() > escape {
                escaped_at = Some(points.len() - 1);
                break;
            }
        }

        Self {
            center: center.clone(),
            form,
            cap,
            bailout,
            points,
            escaped_at,
        }
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    fn serves(&self, center: &ExtendedComplex, form: PerturbationForm, cap: u32, bailout: f64) -> bool {
        self.form == form
            && self.bailout == bailout
            && (self.cap >= cap || self.escaped_at.is_some())
            && self.center == *center
    }
}

fn step_reference(z: &mut Complex, c: &Complex, form: PerturbationForm) {
    match form {
        PerturbationForm::None | PerturbationForm::Power(2) => z.square_mut(),
        PerturbationForm::Power(p) => {
            let base = z.clone();
            for _ in 1..p.max(1) {
                *z *= &base;
            }
        }
        PerturbationForm::Conjugate => {
            z.conj_mut();
            z.square_mut();
        }
        PerturbationForm::BurningShip => {
            z.mut_real().abs_mut();
            z.mut_imag().abs_mut();
            z.square_mut();
        }
    }
    *z += c;
}

/// Holds the last reference orbit. Matching is by exact center value, so raising precision
/// keeps the orbit while a precision drop that rounds the center recomputes it.
#[derive(Debug, Default)]
pub struct ReferenceCache {
    orbit: Option<Arc<ReferenceOrbit>>,
    recomputations: u64,
}

impl ReferenceCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_compute(
        &mut self,
        center: &ExtendedComplex,
        form: PerturbationForm,
        cap: u32,
        bailout: f64,
    ) -> Arc<ReferenceOrbit> {
        if let Some(orbit) = &self.orbit {
            if orbit.serves(center, form, cap, bailout) {
                return Arc::clone(orbit);
            }
        }
        let started = Instant::now();
        let orbit = Arc::new(ReferenceOrbit::compute(center, form, cap, bailout));
        self.recomputations += 1;
        debug!(
            precision = center.prec(),
            len = orbit.len(),
            escaped = orbit.escaped_at.is_some(),
            elapsed_ms = started.elapsed().as_secs_f64() * 1000.0,
            "reference orbit recomputed"
        );
        self.orbit = Some(Arc::clone(&orbit));
        orbit
    }

    pub fn current(&self) -> Option<&Arc<ReferenceOrbit>> {
        self.orbit.as_ref()
    }

    pub fn invalidate(&mut self) {
        self.orbit = None;
    }

    pub fn recomputations(&self) -> u64 {
        self.recomputations
    }
}

/// `|c + d| - |c|` without cancellation.
#[inline]
fn diffabs(c: f64, d: f64) -> f64 {
    let cd = c + d;
    if c >= 0.0 {
        if cd >= 0.0 { d } else { -d - 2.0 * c }
    } else if cd > 0.0 {
        d + 2.0 * c
    } else {
        -d
    }
}

fn binomial(n: u32, k: u32) -> f64 {
    let mut acc = 1.0f64;
    for i in 0..k {
        acc = acc * f64::from(n - i) / f64::from(i + 1);
    }
    acc
}

/// `f(Z + dz) - f(Z)` for the given form, plus `dc`.
#[inline]
fn delta_step(form: PerturbationForm, zr: Complex64, dz: Complex64, dc: Complex64) -> Complex64 {
    match form {
        PerturbationForm::None | PerturbationForm::Power(2) => zr * dz * 2.0 + dz * dz + dc,
        PerturbationForm::Power(p) => {
            let mut sum = Complex64::new(0.0, 0.0);
            let mut dz_k = dz;
            for k in 1..=p {
                sum += zr.powu(p - k) * dz_k * binomial(p, k);
                dz_k *= dz;
            }
            sum + dc
        }
        PerturbationForm::Conjugate => (zr * dz * 2.0 + dz * dz).conj() + dc,
        PerturbationForm::BurningShip => {
            let (x, y) = (zr.re, zr.im);
            let (dx, dy) = (dz.re, dz.im);
            let re = 2.0 * x * dx + dx * dx - 2.0 * y * dy - dy * dy;
            let im = 2.0 * diffabs(x * y, x * dy + dx * y + dx * dy);
            Complex64::new(re, im) + dc
        }
    }
}

/// Iterates the pixel at `dc` from the reference center.
///
/// Deltas that stop being finite mean the reference no longer describes this pixel; those
/// pixels are reported as reaching the cap instead of an escape count that cannot be
/// trusted.
pub fn iterate_perturbed(ctx: &IterContext<'_>, orbit: &ReferenceOrbit, dc: Complex64) -> Sample {
    if orbit.is_empty() {
        return Sample::inside(ctx.cap, 0.0);
    }
    let mut env = ctx.env(Complex64::new(0.0, 0.0), Complex64::new(0.0, 0.0));
    let mut dz = Complex64::new(0.0, 0.0);
    let mut m = 0usize;
    for n in 0..ctx.cap {
        let zr = orbit.points[m];
        let z = zr + dz;
        if !finite(z) {
            return Sample::inside(ctx.cap, 0.0);
        }
        env.z = z;
        if ctx.kernel.bailout.program.truthy(&env) {
            return Sample::escaped(n, z.norm_sqr());
        }

        // Rebase onto the start of the reference when the full value is closer to zero than
        // the delta, or when the reference has no next sample.
        let (zr, dz_now) = if z.norm_sqr() < dz.norm_sqr() || m + 1 >= orbit.len() {
            m = 0;
            (orbit.points[0], z)
        } else {
            (zr, dz)
        };
        dz = delta_step(orbit.form, zr, dz_now, dc);
        m += 1;
        if !finite(dz) {
            return Sample::inside(ctx.cap, 0.0);
        }
    }
    Sample::inside(ctx.cap, (orbit.points[m.min(orbit.len() - 1)] + dz).norm_sqr())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn diffabs_matches_naive_away_from_cancellation() {
        for (c, d) in [(1.0f64, 0.5f64), (1.0, -3.0), (-2.0, 0.5), (-2.0, 5.0)] {
            let naive = (c + d).abs() - c.abs();
            assert!((diffabs(c, d) - naive).abs() < 1e-12);
        }
    }

    #[test]
    fn binomial_coefficients() {
        assert_eq!(binomial(3, 1), 3.0);
        assert_eq!(binomial(4, 2), 6.0);
        assert_eq!(binomial(5, 5), 1.0);
    }

    #[test]
    fn cubic_delta_matches_direct_difference() {
        let zr = Complex64::new(0.3, -0.2);
        let dz = Complex64::new(1e-3, 2e-3);
        let direct = (zr + dz).powu(3) - zr.powu(3);
        let step = delta_step(PerturbationForm::Power(3), zr, dz, Complex64::new(0.0, 0.0));
        assert!((direct - step).norm() < 1e-15);
    }

    fn compiled(bailout: &str) -> CompiledKernel {
        let text = format!("iterate = z^2 + c\nbailout = {bailout}\ninitial = 0\n");
        let def = crate::fractal::FractalDefinition::parse_formula_file(&text).unwrap();
        crate::kernel::KernelCompiler::new().compile(&def).unwrap()
    }

    fn orbit(points: Vec<Complex64>) -> ReferenceOrbit {
        ReferenceOrbit {
            center: ExtendedComplex::parse(128, "0", "0").unwrap(),
            form: PerturbationForm::None,
            cap: 64,
            bailout: 2.0,
            points,
            escaped_at: None,
        }
    }

    fn ctx(kernel: &CompiledKernel) -> IterContext<'_> {
        IterContext {
            kernel,
            cap: 64,
            bailout: 2.0,
            mouse: Complex64::new(0.0, 0.0),
            slots: &[],
        }
    }

    #[test]
    fn non_finite_reference_sample_counts_as_inside() {
        let kernel = compiled("norm(z) > 4");
        let zero = Complex64::new(0.0, 0.0);
        let broken = orbit(vec![zero, Complex64::new(f64::INFINITY, 0.0), zero]);
        let s = iterate_perturbed(&ctx(&kernel), &broken, Complex64::new(1e-3, 0.0));
        assert_eq!(s.iterations, 64);
        assert!(!s.escaped);
    }

    #[test]
    fn overflowing_delta_counts_as_inside() {
        // A bailout that never fires lets the delta itself overflow.
        let kernel = compiled("0 > 1");
        let flat = orbit(vec![Complex64::new(0.0, 0.0); 8]);
        let s = iterate_perturbed(&ctx(&kernel), &flat, Complex64::new(1e300, 1e300));
        assert_eq!(s.iterations, 64);
        assert!(!s.escaped);
    }

    #[test]
    fn finite_deltas_still_escape_normally() {
        let kernel = compiled("norm(z) > 4");
        let flat = orbit(vec![Complex64::new(0.0, 0.0); 8]);
        let s = iterate_perturbed(&ctx(&kernel), &flat, Complex64::new(3.0, 0.0));
        assert!(s.escaped);
        assert!(s.iterations < 64);
    }
}
