/// Separable, normalized Gaussian used to downsample a supersampled surface by an integer
/// factor. Rebuilt whenever the factor changes.
#[derive(Debug, Clone, PartialEq)]
pub struct GaussianKernel {
    factor: usize,
    /// Tap offset (in source samples) of `weights[0]` relative to the start of an output block.
    start: isize,
    weights: Vec<f32>,
}

impl GaussianKernel {
    pub fn new(factor: usize) -> Self {
        let factor = factor.max(1);
        if factor == 1 {
            return Self {
                factor,
                start: 0,
                weights: vec![1.0],
            };
        }
        let f = factor as f64;
        let sigma = 0.5 * f;
        let half = (factor / 2) as isize;
        let taps = 2 * factor;
        let block_center = 0.5 * f;
        let mut weights: Vec<f64> = (0..taps)
            .map(|k| {
                let src = k as isize - half;
                let d = (src as f64 + 0.5) - block_center;
                (-(d * d) / (2.0 * sigma * sigma)).exp()
            })
            .collect();
        let sum: f64 = weights.iter().sum();
        weights.iter_mut().for_each(|w| *w /= sum);
        Self {
            factor,
            start: -half,
            weights: weights.into_iter().map(|w| w as f32).collect(),
        }
    }

    pub fn factor(&self) -> usize {
        self.factor
    }

    pub fn weights(&self) -> &[f32] {
        &self.weights
    }

    /// Downsamples `src` (`sw x sh`) into `dst` (`sw / factor x sh / factor`). Edge taps clamp.
    pub fn downsample(&self, src: &[[f32; 3]], sw: usize, sh: usize, dst: &mut [[f32; 3]]) {
        let f = self.factor;
        let (dw, dh) = (sw / f, sh / f);
        if dw == 0 || dh == 0 {
            return;
        }
        if f == 1 {
            dst[..sw * sh].copy_from_slice(&src[..sw * sh]);
            return;
        }

        // Horizontal pass: sw x sh -> dw x sh.
        let mut tmp = vec![[0.0f32; 3]; dw * sh];
        for y in 0..sh {
            let row = &src[y * sw..(y + 1) * sw];
            for x in 0..dw {
                tmp[y * dw + x] = self.tap(|i| row[i], x * f, sw);
            }
        }
        // Vertical pass: dw x sh -> dw x dh.
        for y in 0..dh {
            for x in 0..dw {
                dst[y * dw + x] = self.tap(|i| tmp[i * dw + x], y * f, sh);
            }
        }
    }

    #[inline]
    fn tap(&self, fetch: impl Fn(usize) -> [f32; 3], base: usize, len: usize) -> [f32; 3] {
        let mut acc = [0.0f32; 3];
        let max = len as isize - 1;
        for (k, w) in self.weights.iter().enumerate() {
            let i = (base as isize + self.start + k as isize).clamp(0, max) as usize;
            let px = fetch(i);
            acc[0] += px[0] * w;
            acc[1] += px[1] * w;
            acc[2] += px[2] * w;
        }
        acc
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn weights_are_normalized_and_symmetric() {
        for f in [2usize, 4, 8] {
            let k = GaussianKernel::new(f);
            let sum: f32 = k.weights().iter().sum();
            assert!((sum - 1.0).abs() < 1e-5);
            let w = k.weights();
            for i in 0..w.len() / 2 {
                assert!((w[i] - w[w.len() - 1 - i]).abs() < 1e-6);
            }
        }
    }

    #[test]
    fn flat_input_stays_flat() {
        let k = GaussianKernel::new(4);
        let src = vec![[0.25f32, 0.5, 0.75]; 16 * 8];
        let mut dst = vec![[0.0f32; 3]; 4 * 2];
        k.downsample(&src, 16, 8, &mut dst);
        for px in dst {
            assert!((px[1] - 0.5).abs() < 1e-5);
        }
    }
}
