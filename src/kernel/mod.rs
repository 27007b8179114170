mod compiler;
mod cpu;
#[cfg(target_os = "macos")]
mod metal;
pub mod template;

pub use compiler::{CompiledExpr, CompiledKernel, KernelCompiler};
pub use cpu::CpuEvaluator;
#[cfg(target_os = "macos")]
pub use metal::MetalEvaluator;

use crate::expr::CompileError;
use crate::perturb::{IterContext, ReferenceOrbit};
use crate::pipeline::surface::IterationSurface;
use crate::precision::ExtendedComplex;
use crate::view::Viewport;
use num_complex::Complex64;
use std::sync::Arc;

#[derive(Debug, Clone, Copy)]
pub enum EvalMode<'a> {
    /// Pixel coordinate formed in extended precision, then iterated in f64.
    Direct,
    /// Pixel iterated as a delta against the reference orbit of the center.
    Perturbed(&'a ReferenceOrbit),
    /// Pixel is the starting value, `seed` the constant.
    Julia { seed: Complex64 },
}

/// Inputs for one COMPUTE pass.
#[derive(Clone, Copy)]
pub struct ComputeRequest<'a> {
    pub kernel: &'a CompiledKernel,
    pub viewport: Viewport,
    pub center: &'a ExtendedComplex,
    pub iterations: u32,
    pub bailout: f64,
    pub mouse: Complex64,
    pub slots: &'a [f64],
    /// Sub-pixel offset in sample units, `[-0.5, 0.5)` per axis.
    pub jitter: (f64, f64),
    pub mode: EvalMode<'a>,
}

impl<'a> ComputeRequest<'a> {
    pub fn context(&self) -> IterContext<'a> {
        IterContext {
            kernel: self.kernel,
            cap: self.iterations,
            bailout: self.bailout,
            mouse: self.mouse,
            slots: self.slots,
        }
    }
}

/// Inputs for tracing one orbit from `seed`.
#[derive(Clone, Copy)]
pub struct OrbitRequest<'a> {
    pub kernel: &'a CompiledKernel,
    pub seed: Complex64,
    pub iterations: u32,
    pub bailout: f64,
    pub mouse: Complex64,
    pub slots: &'a [f64],
}

/// Backend that runs the evaluation kernel.
pub trait Evaluator: Send {
    fn name(&self) -> &'static str;

    /// Makes `kernel` the active program. On error the previous program stays active.
    fn install(&mut self, kernel: &Arc<CompiledKernel>) -> Result<(), CompileError>;

    /// Fills `out` (already sized to the viewport) with escape-time samples.
    fn compute(&mut self, req: &ComputeRequest<'_>, out: &mut IterationSurface);

    /// Writes the trajectory `f(init), f(f(init)), ...` of `seed`, stopping after the bailout
    /// step or `iterations` points.
    fn trace_orbit(&mut self, req: &OrbitRequest<'_>, out: &mut Vec<Complex64>);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Backend {
    Cpu,
    #[value(alias = "gpu")]
    Metal,
}

pub fn create_evaluator(backend: Backend) -> anyhow::Result<Box<dyn Evaluator>> {
    match backend {
        Backend::Cpu => Ok(Box::new(CpuEvaluator::new())),
        #[cfg(target_os = "macos")]
        Backend::Metal => Ok(Box::new(MetalEvaluator::new()?)),
        #[cfg(not(target_os = "macos"))]
        Backend::Metal => Err(anyhow::anyhow!("--engine metal is only supported on macOS")),
    }
}
