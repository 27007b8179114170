/// Escape-time result for one sample position.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Sample {
    pub iterations: u32,
    pub escaped: bool,
    /// `|z|^2` at the bailout step (or at the cap for interior points).
    pub norm: f64,
}

impl Sample {
    pub fn escaped(iterations: u32, norm: f64) -> Self {
        Self {
            iterations,
            escaped: true,
            norm,
        }
    }

    pub fn inside(cap: u32, norm: f64) -> Self {
        Self {
            iterations: cap,
            escaped: false,
            norm,
        }
    }
}

/// COMPUTE output: raw iteration data at supersampled resolution.
#[derive(Debug, Clone, Default)]
pub struct IterationSurface {
    pub width: usize,
    pub height: usize,
    pub samples: Vec<Sample>,
}

impl IterationSurface {
    pub fn resize(&mut self, width: usize, height: usize) -> bool {
        if self.width == width && self.height == height {
            return false;
        }
        self.width = width;
        self.height = height;
        self.samples = vec![Sample::default(); width * height];
        true
    }

    pub fn get(&self, x: usize, y: usize) -> Sample {
        self.samples[y * self.width + x]
    }
}

/// POSTPROCESS output: linear RGB at supersampled resolution, plus the running sum used by
/// temporal accumulation.
#[derive(Debug, Clone, Default)]
pub struct ColorSurface {
    pub width: usize,
    pub height: usize,
    pub pixels: Vec<[f32; 3]>,
    pub accum: Vec<[f32; 3]>,
    pub accum_samples: u32,
}

impl ColorSurface {
    pub fn resize(&mut self, width: usize, height: usize) -> bool {
        if self.width == width && self.height == height {
            return false;
        }
        self.width = width;
        self.height = height;
        self.pixels = vec![[0.0; 3]; width * height];
        self.accum = vec![[0.0; 3]; width * height];
        self.accum_samples = 0;
        true
    }

    pub fn clear_accumulation(&mut self) {
        self.accum.iter_mut().for_each(|p| *p = [0.0; 3]);
        self.accum_samples = 0;
    }

    /// Folds the current pixels into the running sum.
    pub fn accumulate(&mut self) {
        for (acc, px) in self.accum.iter_mut().zip(&self.pixels) {
            acc[0] += px[0];
            acc[1] += px[1];
            acc[2] += px[2];
        }
        self.accum_samples += 1;
    }

    /// Pixels to feed RENDER: the accumulated mean when accumulation is active.
    pub fn resolved(&self) -> std::borrow::Cow<'_, [[f32; 3]]> {
        if self.accum_samples <= 1 {
            return std::borrow::Cow::Borrowed(&self.pixels);
        }
        let inv = 1.0 / self.accum_samples as f32;
        std::borrow::Cow::Owned(
            self.accum
                .iter()
                .map(|p| [p[0] * inv, p[1] * inv, p[2] * inv])
                .collect(),
        )
    }
}

/// RENDER output: 8-bit RGBA at display (or recording) resolution.
#[derive(Debug, Clone, Default)]
pub struct DisplaySurface {
    pub width: usize,
    pub height: usize,
    pub rgba: Vec<u8>,
}

impl DisplaySurface {
    pub fn resize(&mut self, width: usize, height: usize) -> bool {
        if self.width == width && self.height == height {
            return false;
        }
        self.width = width;
        self.height = height;
        self.rgba = vec![0; width * height * 4];
        true
    }

    /// Packed RGB24, top row first.
    pub fn to_rgb24(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.width * self.height * 3);
        for px in self.rgba.chunks_exact(4) {
            out.extend_from_slice(&px[..3]);
        }
        out
    }

    /// Nearest-neighbour copy into `dst` at its own size.
    pub fn scale_into(&self, dst: &mut DisplaySurface) {
        if self.width == 0 || self.height == 0 {
            return;
        }
        for y in 0..dst.height {
            let sy = y * self.height / dst.height.max(1);
            for x in 0..dst.width {
                let sx = x * self.width / dst.width.max(1);
                let s = (sy * self.width + sx) * 4;
                let d = (y * dst.width + x) * 4;
                dst.rgba[d..d + 4].copy_from_slice(&self.rgba[s..s + 4]);
            }
        }
    }
}
