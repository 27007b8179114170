use crate::expr::CompileError;
use crate::kernel::template::{MAX_SLOTS, STAGE_COMPUTE};
use crate::kernel::{
    CompiledKernel, ComputeRequest, CpuEvaluator, EvalMode, Evaluator, OrbitRequest,
};
use crate::pipeline::surface::{IterationSurface, Sample};
use anyhow::anyhow;
use metal::*;
use num_complex::Complex64;
use objc::rc::autoreleasepool;
use std::sync::Arc;
use tracing::info;

#[repr(C)]
#[derive(Clone, Copy)]
struct Uniforms {
    width: u32,
    height: u32,
    iterations: u32,
    stage: u32,

    center_hi: [f32; 2],
    center_lo: [f32; 2],

    pixel_size: f32,
    rotation: f32,
    flip_x: u32,
    flip_y: u32,

    power: f32,
    bailout: f32,
    mouse: [f32; 2],

    jitter: [f32; 2],
    seed: [f32; 2],

    julia: u32,
    slot_count: u32,
    _pad0: u32,
    _pad1: u32,

    slots: [f32; MAX_SLOTS],
}

#[repr(C)]
#[derive(Clone, Copy, Default)]
struct GpuSample {
    iterations: u32,
    escaped: u32,
    norm: f32,
    _pad: u32,
}

struct Programs {
    surface: ComputePipelineState,
    orbit: ComputePipelineState,
}

/// Direct-mode evaluation on the GPU in single precision. Perturbed frames need f64 deltas,
/// which Metal does not offer, so they run on the CPU evaluator instead.
pub struct MetalEvaluator {
    device: Device,
    queue: CommandQueue,
    programs: Option<Programs>,
    uniforms: Buffer,
    samples: Buffer,
    samples_len: usize,
    orbit_points: Buffer,
    orbit_capacity: usize,
    orbit_count: Buffer,
    cpu: CpuEvaluator,
}

// Metal objects are reference counted Objective-C handles that may be used from any thread.
unsafe impl Send for MetalEvaluator {}

impl MetalEvaluator {
    pub fn new() -> anyhow::Result<Self> {
        let device = Device::system_default().ok_or_else(|| anyhow!("no Metal device found"))?;
        let queue = device.new_command_queue();
        let uniforms = device.new_buffer(
            std::mem::size_of::<Uniforms>() as u64,
            MTLResourceOptions::StorageModeShared,
        );
        let samples = device.new_buffer(
            std::mem::size_of::<GpuSample>() as u64,
            MTLResourceOptions::StorageModeShared,
        );
        let orbit_points = device.new_buffer(
            std::mem::size_of::<[f32; 2]>() as u64,
            MTLResourceOptions::StorageModeShared,
        );
        let orbit_count = device.new_buffer(4, MTLResourceOptions::StorageModeShared);
        info!(device = %device.name(), "metal evaluator ready");
        Ok(Self {
            device,
            queue,
            programs: None,
            uniforms,
            samples,
            samples_len: 1,
            orbit_points,
            orbit_capacity: 1,
            orbit_count,
            cpu: CpuEvaluator::new(),
        })
    }

    fn build_programs(&self, source: &str) -> Result<Programs, CompileError> {
        let options = CompileOptions::new();
        options.set_fast_math_enabled(true);
        let library = self
            .device
            .new_library_with_source(source, &options)
            .map_err(|e| CompileError::Backend(format!("shader compile failed: {e}")))?;
        let pipeline = |name: &str| -> Result<ComputePipelineState, CompileError> {
            let func = library
                .get_function(name, None)
                .map_err(|e| CompileError::Backend(format!("get_function({name}) failed: {e}")))?;
            self.device
                .new_compute_pipeline_state_with_function(&func)
                .map_err(|e| CompileError::Backend(format!("pipeline {name} failed: {e}")))
        };
        Ok(Programs {
            surface: pipeline("surface_kernel")?,
            orbit: pipeline("orbit_kernel")?,
        })
    }

    fn write_uniforms(&self, u: &Uniforms) {
        unsafe {
            std::ptr::copy_nonoverlapping(
                (u as *const Uniforms).cast::<u8>(),
                self.uniforms.contents().cast::<u8>(),
                std::mem::size_of::<Uniforms>(),
            );
        }
    }

    fn ensure_samples(&mut self, len: usize) {
        if self.samples_len >= len {
            return;
        }
        self.samples = self.device.new_buffer(
            (len * std::mem::size_of::<GpuSample>()) as u64,
            MTLResourceOptions::StorageModeShared,
        );
        self.samples_len = len;
    }

    fn ensure_orbit(&mut self, len: usize) {
        if self.orbit_capacity >= len {
            return;
        }
        self.orbit_points = self.device.new_buffer(
            (len * std::mem::size_of::<[f32; 2]>()) as u64,
            MTLResourceOptions::StorageModeShared,
        );
        self.orbit_capacity = len;
    }

    fn dispatch(&self, pipeline: &ComputePipelineState, output: &Buffer, extra: Option<&Buffer>, size: MTLSize) {
        autoreleasepool(|| {
            let cmd = self.queue.new_command_buffer();
            let encoder = cmd.new_compute_command_encoder();
            encoder.set_compute_pipeline_state(pipeline);
            encoder.set_buffer(0, Some(&self.uniforms), 0);
            encoder.set_buffer(1, Some(output), 0);
            if let Some(extra) = extra {
                encoder.set_buffer(2, Some(extra), 0);
            }
            encoder.dispatch_threads(size, MTLSize::new(16, 16.min(size.height), 1));
            encoder.end_encoding();
            cmd.commit();
            cmd.wait_until_completed();
        });
    }
}

fn split(v: f64) -> (f32, f32) {
    let hi = v as f32;
    (hi, (v - f64::from(hi)) as f32)
}

fn uniforms_for(kernel: &CompiledKernel, iterations: u32, bailout: f64, mouse: Complex64, slots: &[f64]) -> Uniforms {
    let mut slot_arr = [0.0f32; MAX_SLOTS];
    for (dst, src) in slot_arr.iter_mut().zip(slots) {
        *dst = *src as f32;
    }
    Uniforms {
        width: 1,
        height: 1,
        iterations,
        stage: STAGE_COMPUTE,
        center_hi: [0.0; 2],
        center_lo: [0.0; 2],
        pixel_size: 0.0,
        rotation: 0.0,
        flip_x: 0,
        flip_y: 0,
        power: kernel.power as f32,
        bailout: bailout as f32,
        mouse: [mouse.re as f32, mouse.im as f32],
        jitter: [0.0; 2],
        seed: [0.0; 2],
        julia: 0,
        slot_count: slots.len().min(MAX_SLOTS) as u32,
        _pad0: 0,
        _pad1: 0,
        slots: slot_arr,
    }
}

impl Evaluator for MetalEvaluator {
    fn name(&self) -> &'static str {
        "metal"
    }

    fn install(&mut self, kernel: &Arc<CompiledKernel>) -> Result<(), CompileError> {
        let programs = self.build_programs(&kernel.msl)?;
        self.programs = Some(programs);
        self.cpu.install(kernel)
    }

    fn compute(&mut self, req: &ComputeRequest<'_>, out: &mut IterationSurface) {
        if matches!(req.mode, EvalMode::Perturbed(_)) || self.programs.is_none() {
            self.cpu.compute(req, out);
            return;
        }
        let (w, h) = (out.width, out.height);
        if w == 0 || h == 0 {
            return;
        }
        self.ensure_samples(w * h);

        let center = req.center.to_complex64();
        let (cx_hi, cx_lo) = split(center.re);
        let (cy_hi, cy_lo) = split(center.im);
        let mut u = uniforms_for(req.kernel, req.iterations, req.bailout, req.mouse, req.slots);
        u.width = w as u32;
        u.height = h as u32;
        u.center_hi = [cx_hi, cy_hi];
        u.center_lo = [cx_lo, cy_lo];
        u.pixel_size = req.viewport.pixel_size() as f32;
        u.rotation = req.viewport.rotation as f32;
        u.flip_x = req.viewport.flip_x as u32;
        u.flip_y = req.viewport.flip_y as u32;
        u.jitter = [req.jitter.0 as f32, req.jitter.1 as f32];
        if let EvalMode::Julia { seed } = req.mode {
            u.julia = 1;
            u.seed = [seed.re as f32, seed.im as f32];
        }
        self.write_uniforms(&u);

        let Some(programs) = self.programs.as_ref() else {
            return;
        };
        self.dispatch(&programs.surface, &self.samples, None, MTLSize::new(w as u64, h as u64, 1));

        let gpu = unsafe {
            std::slice::from_raw_parts(self.samples.contents().cast::<GpuSample>(), w * h)
        };
        for (dst, src) in out.samples.iter_mut().zip(gpu) {
            *dst = Sample {
                iterations: src.iterations,
                escaped: src.escaped != 0,
                norm: f64::from(src.norm),
            };
        }
    }

    fn trace_orbit(&mut self, req: &OrbitRequest<'_>, out: &mut Vec<Complex64>) {
        if self.programs.is_none() || req.iterations == 0 {
            self.cpu.trace_orbit(req, out);
            return;
        }
        self.ensure_orbit(req.iterations as usize);
        let mut u = uniforms_for(req.kernel, req.iterations, req.bailout, req.mouse, req.slots);
        u.seed = [req.seed.re as f32, req.seed.im as f32];
        self.write_uniforms(&u);

        let Some(programs) = self.programs.as_ref() else {
            return;
        };
        self.dispatch(
            &programs.orbit,
            &self.orbit_points,
            Some(&self.orbit_count),
            MTLSize::new(1, 1, 1),
        );

        out.clear();
        unsafe {
            let n = (*self.orbit_count.contents().cast::<u32>()) as usize;
            let pts = std::slice::from_raw_parts(
                self.orbit_points.contents().cast::<[f32; 2]>(),
                n.min(self.orbit_capacity),
            );
            out.extend(
                pts.iter()
                    .map(|p| Complex64::new(f64::from(p[0]), f64::from(p[1]))),
            );
        }
    }
}
