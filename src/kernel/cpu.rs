use crate::expr::{CompileError, Env};
use crate::kernel::{CompiledKernel, ComputeRequest, EvalMode, Evaluator, OrbitRequest};
use crate::perturb::{iterate_direct, iterate_julia, iterate_perturbed};
use crate::pipeline::surface::IterationSurface;
use num_complex::Complex64;
use rayon::prelude::*;
use std::sync::Arc;

/// Runs compiled formulas as native closures, one rayon task per surface row.
#[derive(Default)]
pub struct CpuEvaluator {
    active: Option<Arc<CompiledKernel>>,
}

impl CpuEvaluator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn active(&self) -> Option<&Arc<CompiledKernel>> {
        self.active.as_ref()
    }
}

impl Evaluator for CpuEvaluator {
    fn name(&self) -> &'static str {
        "cpu"
    }

    fn install(&mut self, kernel: &Arc<CompiledKernel>) -> Result<(), CompileError> {
        self.active = Some(Arc::clone(kernel));
        Ok(())
    }

    fn compute(&mut self, req: &ComputeRequest<'_>, out: &mut IterationSurface) {
        let w = out.width;
        if w == 0 || out.height == 0 {
            return;
        }
        let ctx = req.context();
        let vp = req.viewport;
        out.samples
            .par_chunks_mut(w)
            .enumerate()
            .for_each(|(y, row)| {
                for (x, sample) in row.iter_mut().enumerate() {
                    let (dx, dy) = vp.sample_offset(x, y, req.jitter);
                    *sample = match req.mode {
                        EvalMode::Direct => iterate_direct(&ctx, req.center.offset_to_f64(dx, dy)),
                        EvalMode::Perturbed(orbit) => {
                            iterate_perturbed(&ctx, orbit, Complex64::new(dx, dy))
                        }
                        EvalMode::Julia { seed } => {
                            iterate_julia(&ctx, req.center.offset_to_f64(dx, dy), seed)
                        }
                    };
                }
            });
    }

    fn trace_orbit(&mut self, req: &OrbitRequest<'_>, out: &mut Vec<Complex64>) {
        out.clear();
        let kernel = req.kernel;
        let mut env = Env {
            z: Complex64::new(0.0, 0.0),
            c: req.seed,
            power: kernel.power,
            mouse: req.mouse,
            bailout: req.bailout,
            slots: req.slots,
        };
        env.z = kernel.initial.program.eval(&env);
        for _ in 0..req.iterations {
            env.z = kernel.iterate.program.eval(&env);
            if !(env.z.re.is_finite() && env.z.im.is_finite()) {
                break;
            }
            out.push(env.z);
            if kernel.bailout.program.truthy(&env) {
                break;
            }
        }
    }
}
