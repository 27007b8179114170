//! Orbit trajectories for one seed point: cycle detection on the render thread, then a
//! lock-free hand-off to the audio callback.

mod buffer;

pub use buffer::{orbit_buffer, OrbitReader, OrbitWriter, TrailSlot};

use crate::view::Viewport;
use num_complex::Complex64;

/// Points kept per trajectory, seed included.
pub const ORBIT_CAPACITY: usize = 1024;

/// Squared distance under which two trajectory points count as the same.
pub const CYCLE_EPSILON: f64 = 1e-12;

/// One interaction's trajectory.
#[derive(Debug, Clone, PartialEq)]
pub struct OrbitTrail {
    pub seed: Complex64,
    /// Seed followed by the iterated sequence, at most [`ORBIT_CAPACITY`] points.
    pub points: Vec<Complex64>,
    /// Start of the periodic tail replayed after the end; `None` plays the trajectory once.
    pub wrap: Option<usize>,
    pub escaped: bool,
}

impl OrbitTrail {
    /// Builds a trail from the seed and the sequence `f(z0), f(f(z0)), ...` traced by the
    /// evaluator. `escaped` reports whether the last traced point failed the bailout test.
    ///
    /// The trajectory is cut at the first point that repeats an earlier one; that earlier point
    /// becomes the wrap index.
    pub fn from_trace(seed: Complex64, traced: &[Complex64], escaped: bool) -> Self {
        let mut points = Vec::with_capacity(ORBIT_CAPACITY.min(traced.len() + 1));
        points.push(seed);
        let mut wrap = None;
        for &p in traced.iter().take(ORBIT_CAPACITY - 1) {
            if !(p.re.is_finite() && p.im.is_finite()) {
                break;
            }
            if let Some(j) = find_repeat(&points, p) {
                wrap = Some(j);
                break;
            }
            points.push(p);
        }
        let wrap = match (wrap, escaped) {
            (Some(j), _) => Some(j),
            (None, true) => None,
            (None, false) => Some(0),
        };
        Self {
            seed,
            points,
            wrap,
            escaped: escaped && wrap.is_none(),
        }
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Length of the periodic tail, 0 when the trajectory plays once.
    pub fn period(&self) -> usize {
        self.wrap.map_or(0, |w| self.points.len() - w)
    }

    /// Screen-space positions of the trajectory for trail drawing; `center` is the machine
    /// precision view center.
    pub fn screen_points(&self, viewport: &Viewport, center: Complex64) -> Vec<(f64, f64)> {
        self.points
            .iter()
            .map(|p| viewport.to_pixel(p.re - center.re, p.im - center.im))
            .collect()
    }
}

fn find_repeat(points: &[Complex64], p: Complex64) -> Option<usize> {
    points.iter().position(|q| (q - p).norm_sqr() < CYCLE_EPSILON)
}

/// Order-dependent checksum over the bit patterns of a trajectory.
pub fn checksum(points: &[Complex64], wrap: Option<usize>) -> u64 {
    const PRIME: u64 = 0x0000_0100_0000_01b3;
    let mut h: u64 = 0xcbf2_9ce4_8422_2325;
    let mut mix = |v: u64| {
        h ^= v;
        h = h.wrapping_mul(PRIME);
    };
    mix(points.len() as u64);
    mix(wrap.map_or(u64::MAX, |w| w as u64));
    for p in points {
        mix(p.re.to_bits());
        mix(p.im.to_bits());
    }
    h
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_point_wraps_onto_itself() {
        let seed = Complex64::new(0.0, 0.0);
        let traced = vec![Complex64::new(0.0, 0.0); 10];
        let t = OrbitTrail::from_trace(seed, &traced, false);
        assert_eq!(t.points.len(), 1);
        assert_eq!(t.wrap, Some(0));
        assert_eq!(t.period(), 1);
    }

    #[test]
    fn two_cycle_is_detected() {
        // c = -1 traced from z0 = 0: -1, 0, -1, 0 ...
        let seed = Complex64::new(-1.0, 0.0);
        let traced: Vec<_> = (0..20)
            .map(|k| Complex64::new(if k % 2 == 0 { 0.0 } else { -1.0 }, 0.0))
            .collect();
        let t = OrbitTrail::from_trace(seed, &traced, false);
        assert_eq!(t.points, vec![Complex64::new(-1.0, 0.0), Complex64::new(0.0, 0.0)]);
        assert_eq!(t.wrap, Some(0));
    }

    #[test]
    fn escaped_orbit_plays_once() {
        let seed = Complex64::new(1.0, 0.0);
        let traced = vec![Complex64::new(1.0, 0.0), Complex64::new(2.0, 0.0), Complex64::new(5.0, 0.0)];
        let t = OrbitTrail::from_trace(seed, &traced, true);
        // the first traced point repeats the seed
        assert_eq!(t.wrap, Some(0));
        let traced = vec![Complex64::new(2.0, 0.0), Complex64::new(5.0, 0.0), Complex64::new(26.0, 0.0)];
        let t = OrbitTrail::from_trace(seed, &traced, true);
        assert_eq!(t.wrap, None);
        assert!(t.escaped);
        assert_eq!(t.len(), 4);
    }

    #[test]
    fn trail_is_capped() {
        let traced: Vec<_> = (1..5000).map(|k| Complex64::new(k as f64, 0.0)).collect();
        let t = OrbitTrail::from_trace(Complex64::new(0.0, 0.0), &traced, false);
        assert_eq!(t.len(), ORBIT_CAPACITY);
    }
}
