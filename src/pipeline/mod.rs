//! Three-stage evaluation pipeline: COMPUTE (iteration data) -> POSTPROCESS (colors) ->
//! RENDER (downsampled display image), driven by a single pending-stage mark.

pub mod gaussian;
mod julia;
pub mod stages;
pub mod surface;

pub use julia::{JuliaPreview, JULIA_ZOOM};

use crate::expr::{CompileError, Env};
use crate::fractal::PerturbationForm;
use crate::kernel::template::{STAGE_COMPUTE, STAGE_POSTPROCESS, STAGE_RENDER};
use crate::kernel::{CompiledKernel, ComputeRequest, EvalMode, Evaluator, OrbitRequest};
use crate::palette::Palette;
use crate::perturb::ReferenceCache;
use crate::view::ViewState;
use gaussian::GaussianKernel;
use num_complex::Complex64;
use std::sync::Arc;
use std::time::Instant;
use surface::{ColorSurface, DisplaySurface, IterationSurface};
use tracing::{info, warn};

/// Jittered samples folded into a static view before refinement stops.
pub const TAA_MAX_SAMPLES: u32 = 64;

/// Ordered by cost: running a stage implies running every cheaper one after it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Stage {
    Render,
    Postprocess,
    Compute,
}

impl Stage {
    /// Numeric selector passed to the kernel template.
    pub fn selector(self) -> u32 {
        match self {
            Self::Render => STAGE_RENDER,
            Self::Postprocess => STAGE_POSTPROCESS,
            Self::Compute => STAGE_COMPUTE,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Render => "render",
            Self::Postprocess => "postprocess",
            Self::Compute => "compute",
        }
    }
}

/// Highest stage required by the next frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageMark {
    pending: Stage,
}

impl Default for StageMark {
    fn default() -> Self {
        Self {
            pending: Stage::Render,
        }
    }
}

impl StageMark {
    /// Raises the mark; never lowers it.
    pub fn set_op(&mut self, stage: Stage) {
        self.pending = self.pending.max(stage);
    }

    /// Sets the mark regardless of its current value.
    pub fn force_op(&mut self, stage: Stage) {
        self.pending = stage;
    }

    pub fn pending(&self) -> Stage {
        self.pending
    }

    /// Returns the pending stage and resets the mark to RENDER.
    pub fn take(&mut self) -> Stage {
        std::mem::replace(&mut self.pending, Stage::Render)
    }
}

/// Per-frame inputs owned by the caller.
pub struct FrameInputs<'a> {
    pub view: &'a ViewState,
    pub palette: &'a Palette,
    pub slots: &'a [f64],
    pub mouse: Complex64,
    /// Seed for the Julia preview; `None` skips it.
    pub julia_seed: Option<Complex64>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameReport {
    /// Most expensive stage executed.
    pub ran: Stage,
    pub perturbed: bool,
    pub refined: bool,
    pub julia: bool,
    pub compute_ms: f32,
    pub postprocess_ms: f32,
    pub render_ms: f32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineStats {
    pub frames: u64,
    pub compute_runs: u64,
    pub postprocess_runs: u64,
    pub render_runs: u64,
    pub kernel_installs: u64,
    pub kernel_failures: u64,
    pub gaussian_rebuilds: u64,
}

/// Independent output size used while recording.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordTarget {
    pub width: usize,
    pub height: usize,
    pub ssaa: usize,
}

/// Owns the evaluator, the active kernel and every surface; all stage functions receive
/// what they need from here explicitly.
pub struct Pipeline {
    evaluator: Box<dyn Evaluator>,
    kernel: Arc<CompiledKernel>,
    diagnostic: Option<String>,
    mark: StageMark,
    reference: ReferenceCache,
    gaussian: GaussianKernel,
    iter: IterationSurface,
    color: ColorSurface,
    display: DisplaySurface,
    finalize: DisplaySurface,
    base_width: usize,
    base_height: usize,
    record: Option<RecordTarget>,
    julia: JuliaPreview,
    stats: PipelineStats,
}

impl Pipeline {
    pub fn new(mut evaluator: Box<dyn Evaluator>, kernel: CompiledKernel) -> Result<Self, CompileError> {
        let kernel = Arc::new(kernel);
        evaluator.install(&kernel)?;
        let mut mark = StageMark::default();
        mark.force_op(Stage::Compute);
        Ok(Self {
            evaluator,
            kernel,
            diagnostic: None,
            mark,
            reference: ReferenceCache::new(),
            gaussian: GaussianKernel::new(1),
            iter: IterationSurface::default(),
            color: ColorSurface::default(),
            display: DisplaySurface::default(),
            finalize: DisplaySurface::default(),
            base_width: 0,
            base_height: 0,
            record: None,
            julia: JuliaPreview::new(0, 0),
            stats: PipelineStats::default(),
        })
    }

    pub fn evaluator_name(&self) -> &'static str {
        self.evaluator.name()
    }

    pub fn kernel(&self) -> &Arc<CompiledKernel> {
        &self.kernel
    }

    /// Last compile/install failure, kept until the next successful install.
    pub fn diagnostic(&self) -> Option<&str> {
        self.diagnostic.as_deref()
    }

    pub fn pending(&self) -> Stage {
        self.mark.pending()
    }

    pub fn stats(&self) -> PipelineStats {
        self.stats
    }

    pub fn reference_recomputations(&self) -> u64 {
        self.reference.recomputations()
    }

    pub fn set_op(&mut self, stage: Stage) {
        self.mark.set_op(stage);
        if stage >= Stage::Postprocess {
            self.julia.invalidate();
        }
    }

    pub fn force_op(&mut self, stage: Stage) {
        self.mark.force_op(stage);
        self.julia.invalidate();
    }

    /// Swaps in a freshly compiled kernel. A failed compile (or backend install) keeps the
    /// previous kernel running, records the diagnostic and leaves the stage mark alone.
    pub fn install(&mut self, compiled: Result<CompiledKernel, CompileError>) -> bool {
        let result = compiled.and_then(|k| {
            let k = Arc::new(k);
            self.evaluator.install(&k)?;
            Ok(k)
        });
        match result {
            Ok(kernel) => {
                info!(
                    kernel = %kernel.name,
                    pointer_dependent = kernel.pointer_dependent,
                    evaluator = self.evaluator.name(),
                    "kernel installed"
                );
                self.kernel = kernel;
                self.diagnostic = None;
                self.stats.kernel_installs += 1;
                self.force_op(Stage::Compute);
                true
            }
            Err(err) => {
                warn!(error = %err, "kernel compile failed; keeping previous kernel");
                self.diagnostic = Some(err.to_string());
                self.stats.kernel_failures += 1;
                false
            }
        }
    }

    /// Pointer moved without a held interaction. Only formulas that read the pointer need
    /// new iteration data.
    pub fn pointer_moved(&mut self) -> bool {
        if self.kernel.pointer_dependent {
            self.set_op(Stage::Compute);
            true
        } else {
            false
        }
    }

    /// On-screen size in pixels (before supersampling).
    pub fn resize(&mut self, width: usize, height: usize) {
        if width != self.base_width || height != self.base_height {
            self.base_width = width;
            self.base_height = height;
            self.set_op(Stage::Compute);
        }
    }

    pub fn resize_julia(&mut self, width: usize, height: usize) {
        self.julia.resize(width, height);
    }

    pub fn set_record_target(&mut self, target: Option<RecordTarget>) {
        if self.record != target {
            self.record = target;
            self.set_op(Stage::Compute);
        }
    }

    pub fn record_target(&self) -> Option<RecordTarget> {
        self.record
    }

    pub fn display(&self) -> &DisplaySurface {
        &self.display
    }

    /// Recording-resolution output of the last frame.
    pub fn finalize(&self) -> &DisplaySurface {
        &self.finalize
    }

    pub fn julia_display(&self) -> &DisplaySurface {
        self.julia.display()
    }

    pub fn iteration_surface(&self) -> &IterationSurface {
        &self.iter
    }

    pub fn accumulated_samples(&self) -> u32 {
        self.color.accum_samples
    }

    /// Traces the orbit of `seed` into `out`. Returns `true` when the orbit escaped, including
    /// a bailout met on the last permitted point.
    pub fn trace_orbit(&mut self, seed: Complex64, inputs: &FrameInputs<'_>, cap: u32, out: &mut Vec<Complex64>) -> bool {
        let iterations = cap.min(inputs.view.iterations);
        let req = OrbitRequest {
            kernel: &self.kernel,
            seed,
            iterations,
            bailout: inputs.view.bailout,
            mouse: inputs.mouse,
            slots: inputs.slots,
        };
        self.evaluator.trace_orbit(&req, out);
        if out.len() < iterations as usize {
            return true;
        }
        out.last().is_some_and(|&z| {
            let env = Env {
                z,
                c: seed,
                power: self.kernel.power,
                mouse: inputs.mouse,
                bailout: inputs.view.bailout,
                slots: inputs.slots,
            };
            self.kernel.bailout.program.truthy(&env)
        })
    }

    /// Runs every stage at or below the pending mark, most expensive first, then resets the
    /// mark to RENDER.
    pub fn run_frame(&mut self, inputs: &FrameInputs<'_>) -> FrameReport {
        let view = inputs.view;
        let requested = self.mark.take();
        self.stats.frames += 1;

        let (out_w, out_h, factor) = match self.record {
            Some(t) => (t.width, t.height, t.ssaa.max(1)),
            None => (self.base_width, self.base_height, view.ssaa.factor()),
        };

        let mut stage = requested;
        if self.iter.resize(out_w * factor, out_h * factor) | self.color.resize(out_w * factor, out_h * factor) {
            stage = Stage::Compute;
        }
        if self.gaussian.factor() != factor {
            self.gaussian = GaussianKernel::new(factor);
            self.stats.gaussian_rebuilds += 1;
        }

        // Temporal accumulation only makes sense on fresh iteration data: coloring requests
        // become COMPUTE and restart the sum; a static view keeps adding jittered samples.
        let mut clear_accum = false;
        let mut refined = false;
        if view.taa {
            if stage >= Stage::Postprocess {
                stage = Stage::Compute;
                clear_accum = true;
            } else if self.color.accum_samples > 0 && self.color.accum_samples < TAA_MAX_SAMPLES {
                stage = Stage::Compute;
                refined = true;
            }
        }

        let mut report = FrameReport {
            ran: stage,
            perturbed: false,
            refined,
            julia: false,
            compute_ms: 0.0,
            postprocess_ms: 0.0,
            render_ms: 0.0,
        };

        if stage >= Stage::Compute && out_w > 0 && out_h > 0 {
            let started = Instant::now();
            let jitter = if refined {
                (fastrand::f64() - 0.5, fastrand::f64() - 0.5)
            } else {
                (0.0, 0.0)
            };
            let kernel = Arc::clone(&self.kernel);
            let orbit = if view.perturbation && kernel.perturbation != PerturbationForm::None {
                Some(self.reference.get_or_compute(
                    &view.center,
                    kernel.perturbation,
                    view.iterations,
                    view.bailout,
                ))
            } else {
                None
            };
            let mode = match orbit.as_deref() {
                Some(o) => EvalMode::Perturbed(o),
                None => EvalMode::Direct,
            };
            report.perturbed = orbit.is_some();
            let req = ComputeRequest {
                kernel: &kernel,
                viewport: view.viewport(out_w * factor, out_h * factor),
                center: &view.center,
                iterations: view.iterations,
                bailout: view.bailout,
                mouse: inputs.mouse,
                slots: inputs.slots,
                jitter,
                mode,
            };
            self.evaluator.compute(&req, &mut self.iter);
            self.stats.compute_runs += 1;
            report.compute_ms = started.elapsed().as_secs_f32() * 1000.0;
        }

        if stage >= Stage::Postprocess {
            let started = Instant::now();
            let smooth = view.coloring.smooth && self.kernel.smooth_coloring;
            stages::postprocess(
                &self.iter,
                &view.coloring,
                inputs.palette,
                smooth,
                self.kernel.power,
                &mut self.color,
            );
            if view.taa {
                if clear_accum || self.color.accum_samples >= TAA_MAX_SAMPLES {
                    self.color.clear_accumulation();
                }
                self.color.accumulate();
            } else {
                self.color.accum_samples = 0;
            }
            self.stats.postprocess_runs += 1;
            report.postprocess_ms = started.elapsed().as_secs_f32() * 1000.0;
        }

        let started = Instant::now();
        if self.record.is_some() {
            stages::render(&self.color, &self.gaussian, &mut self.finalize);
            self.display.resize(self.base_width, self.base_height);
            self.finalize.scale_into(&mut self.display);
        } else {
            stages::render(&self.color, &self.gaussian, &mut self.display);
        }
        self.stats.render_runs += 1;
        report.render_ms = started.elapsed().as_secs_f32() * 1000.0;

        if let Some(seed) = inputs.julia_seed {
            if self.kernel.julia {
                let kernel = Arc::clone(&self.kernel);
                report.julia = self.julia.render(
                    self.evaluator.as_mut(),
                    &kernel,
                    seed,
                    view.iterations,
                    view.bailout,
                    &view.coloring,
                    inputs.palette,
                    inputs.slots,
                );
            }
        }

        report
    }
}
