use crate::kernel::{CompiledKernel, ComputeRequest, EvalMode, Evaluator};
use crate::palette::Palette;
use crate::pipeline::gaussian::GaussianKernel;
use crate::pipeline::stages;
use crate::pipeline::surface::{ColorSurface, DisplaySurface, IterationSurface};
use crate::precision::{ExtendedComplex, MIN_PRECISION};
use crate::view::{Coloring, Viewport};
use num_complex::Complex64;

/// Width of the plane region shown by the preview, centered on the origin.
pub const JULIA_ZOOM: f64 = 4.0;
const JULIA_MAX_ITERATIONS: u32 = 512;

/// Low-resolution Julia set for the pointer position, rendered through the same evaluator
/// as the main view. Only re-evaluated when the seed or the formula changes.
pub struct JuliaPreview {
    center: ExtendedComplex,
    gaussian: GaussianKernel,
    iter: IterationSurface,
    color: ColorSurface,
    display: DisplaySurface,
    last_seed: Option<Complex64>,
    dirty: bool,
}

impl JuliaPreview {
    pub fn new(width: usize, height: usize) -> Self {
        let mut preview = Self {
            center: ExtendedComplex::zero(MIN_PRECISION),
            gaussian: GaussianKernel::new(1),
            iter: IterationSurface::default(),
            color: ColorSurface::default(),
            display: DisplaySurface::default(),
            last_seed: None,
            dirty: true,
        };
        preview.resize(width, height);
        preview
    }

    pub fn resize(&mut self, width: usize, height: usize) {
        let a = self.iter.resize(width, height);
        let b = self.color.resize(width, height);
        self.display.resize(width, height);
        if a || b {
            self.dirty = true;
        }
    }

    pub fn invalidate(&mut self) {
        self.dirty = true;
    }

    pub fn display(&self) -> &DisplaySurface {
        &self.display
    }

    /// Returns `true` if the preview was recomputed.
    #[allow(clippy::too_many_arguments)]
    pub fn render(
        &mut self,
        evaluator: &mut dyn Evaluator,
        kernel: &CompiledKernel,
        seed: Complex64,
        iterations: u32,
        bailout: f64,
        coloring: &Coloring,
        palette: &Palette,
        slots: &[f64],
    ) -> bool {
        if !self.dirty && self.last_seed == Some(seed) {
            return false;
        }
        if self.iter.width == 0 || self.iter.height == 0 {
            return false;
        }
        let viewport = Viewport {
            width: self.iter.width,
            height: self.iter.height,
            zoom: JULIA_ZOOM,
            rotation: 0.0,
            flip_x: false,
            flip_y: false,
        };
        let req = ComputeRequest {
            kernel,
            viewport,
            center: &self.center,
            iterations: iterations.min(JULIA_MAX_ITERATIONS),
            bailout,
            mouse: seed,
            slots,
            jitter: (0.0, 0.0),
            mode: EvalMode::Julia { seed },
        };
        evaluator.compute(&req, &mut self.iter);
        let smooth = coloring.smooth && kernel.smooth_coloring;
        stages::postprocess(&self.iter, coloring, palette, smooth, kernel.power, &mut self.color);
        stages::render(&self.color, &self.gaussian, &mut self.display);
        self.last_seed = Some(seed);
        self.dirty = false;
        true
    }
}
