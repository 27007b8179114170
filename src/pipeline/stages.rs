use crate::palette::Palette;
use crate::pipeline::gaussian::GaussianKernel;
use crate::pipeline::surface::{ColorSurface, DisplaySurface, IterationSurface, Sample};
use crate::view::Coloring;
use rayon::prelude::*;

/// Iterations per full palette cycle at multiplier 1.
const COLOR_CYCLE: f64 = 32.0;

/// Continuous iteration value `n + 1 - ln(ln|z|) / ln(power)`.
pub fn smooth_iterations(sample: &Sample, power: f64) -> f64 {
    let n = sample.iterations as f64;
    if !sample.escaped || !(power > 1.0) || !(sample.norm.is_finite() && sample.norm > 1.0) {
        return n;
    }
    let log_zn = 0.5 * sample.norm.ln();
    let nu = log_zn.ln() / power.ln();
    if nu.is_finite() { n + 1.0 - nu } else { n }
}

pub fn colorize(sample: &Sample, coloring: &Coloring, palette: &Palette, smooth: bool, power: f64) -> [f32; 3] {
    if !sample.escaped {
        return coloring.inside;
    }
    let v = if smooth {
        smooth_iterations(sample, power)
    } else {
        sample.iterations as f64
    };
    let t = coloring.transfer.apply(v) * coloring.multiplier / COLOR_CYCLE + coloring.palette_offset;
    palette.sample(t)
}

/// POSTPROCESS: iteration samples to linear colors, same resolution.
pub fn postprocess(
    iter: &IterationSurface,
    coloring: &Coloring,
    palette: &Palette,
    smooth: bool,
    power: f64,
    out: &mut ColorSurface,
) {
    out.pixels
        .par_iter_mut()
        .zip(iter.samples.par_iter())
        .for_each(|(px, s)| *px = colorize(s, coloring, palette, smooth, power));
}

/// RENDER: resolve accumulation, downsample, quantize to RGBA8.
pub fn render(color: &ColorSurface, gaussian: &GaussianKernel, out: &mut DisplaySurface) {
    let resolved = color.resolved();
    let f = gaussian.factor();
    let (dw, dh) = (color.width / f, color.height / f);
    let mut down = vec![[0.0f32; 3]; dw * dh];
    gaussian.downsample(&resolved, color.width, color.height, &mut down);
    out.resize(dw, dh);
    for (dst, px) in out.rgba.chunks_exact_mut(4).zip(&down) {
        dst[0] = quantize(px[0]);
        dst[1] = quantize(px[1]);
        dst[2] = quantize(px[2]);
        dst[3] = 255;
    }
}

#[inline]
fn quantize(v: f32) -> u8 {
    (v.clamp(0.0, 1.0) * 255.0 + 0.5) as u8
}
