use deepbrot::fractal::FractalRegistry;
use deepbrot::kernel::{CpuEvaluator, KernelCompiler};
use deepbrot::expr::CompileError;
use deepbrot::palette::Palette;
use deepbrot::pipeline::{FrameInputs, FrameReport, Pipeline, RecordTarget, Stage, StageMark, TAA_MAX_SAMPLES};
use deepbrot::view::{ViewEdit, ViewState};
use num_complex::Complex64;
use proptest::prelude::*;

struct Rig {
    pipeline: Pipeline,
    registry: FractalRegistry,
    view: ViewState,
    palette: Palette,
}

impl Rig {
    fn new(fractal: &str) -> Self {
        let mut registry = FractalRegistry::builtin();
        registry.select_by_name(fractal).expect("fractal exists");
        let kernel = KernelCompiler::new().compile(registry.active()).unwrap();
        let mut pipeline = Pipeline::new(Box::new(CpuEvaluator::new()), kernel).unwrap();
        pipeline.resize(24, 16);
        let mut view = ViewState::default();
        view.apply(ViewEdit::Iterations(64)).unwrap();
        Self {
            pipeline,
            registry,
            view,
            palette: Palette::default(),
        }
    }

    fn edit(&mut self, edit: ViewEdit) {
        let stage = self.view.apply(edit).unwrap();
        self.pipeline.set_op(stage);
    }

    fn frame_with(&mut self, mouse: Complex64, julia_seed: Option<Complex64>) -> FrameReport {
        let slots = self.registry.slot_values();
        self.pipeline.run_frame(&FrameInputs {
            view: &self.view,
            palette: &self.palette,
            slots: &slots,
            mouse,
            julia_seed,
        })
    }

    fn frame(&mut self) -> FrameReport {
        self.frame_with(Complex64::new(0.0, 0.0), None)
    }
}

#[test]
fn first_frame_computes_then_settles_to_render() {
    let mut rig = Rig::new("mandelbrot");
    assert_eq!(rig.pipeline.pending(), Stage::Compute);
    assert_eq!(rig.frame().ran, Stage::Compute);
    assert_eq!(rig.pipeline.pending(), Stage::Render);
    assert_eq!(rig.frame().ran, Stage::Render);

    let stats = rig.pipeline.stats();
    assert_eq!(stats.frames, 2);
    assert_eq!(stats.compute_runs, 1);
    assert_eq!(stats.postprocess_runs, 1);
    assert_eq!(stats.render_runs, 2);
    let display = rig.pipeline.display();
    assert_eq!((display.width, display.height), (24, 16));
}

#[test]
fn coloring_edits_never_recompute() {
    let mut rig = Rig::new("mandelbrot");
    rig.frame();
    for edit in [
        ViewEdit::PaletteOffset(0.3),
        ViewEdit::Multiplier(2.0),
        ViewEdit::Transfer(deepbrot::view::Transfer::Log),
        ViewEdit::Smooth(false),
        ViewEdit::InsideColor([1.0, 0.0, 0.0]),
    ] {
        rig.edit(edit);
        assert_eq!(rig.frame().ran, Stage::Postprocess);
    }
    assert_eq!(rig.pipeline.stats().compute_runs, 1);
    assert_eq!(rig.pipeline.stats().postprocess_runs, 6);
}

#[test]
fn geometry_edits_always_recompute() {
    let mut rig = Rig::new("mandelbrot");
    rig.frame();
    for edit in [
        ViewEdit::Pan { dx: 0.1, dy: 0.0 },
        ViewEdit::Zoom(1.5),
        ViewEdit::Rotation(0.3),
        ViewEdit::FlipX(true),
        ViewEdit::FlipY(true),
        ViewEdit::Iterations(80),
    ] {
        rig.edit(edit);
        assert_eq!(rig.frame().ran, Stage::Compute);
    }
    assert_eq!(rig.pipeline.stats().compute_runs, 7);
}

#[test]
fn lower_request_does_not_downgrade_pending_compute() {
    let mut rig = Rig::new("mandelbrot");
    rig.frame();
    rig.edit(ViewEdit::Zoom(2.0));
    rig.edit(ViewEdit::PaletteOffset(0.5));
    assert_eq!(rig.pipeline.pending(), Stage::Compute);
    assert_eq!(rig.frame().ran, Stage::Compute);
}

#[test]
fn unchanged_view_reproduces_identical_pixels() {
    let mut rig = Rig::new("mandelbrot");
    rig.frame();
    let first = rig.pipeline.display().rgba.clone();
    rig.pipeline.force_op(Stage::Compute);
    rig.frame();
    assert_eq!(rig.pipeline.display().rgba, first);
    rig.frame();
    assert_eq!(rig.pipeline.display().rgba, first);
}

#[test]
fn failed_install_keeps_previous_kernel() {
    let mut rig = Rig::new("mandelbrot");
    rig.frame();
    let before = rig.pipeline.display().rgba.clone();

    let mut broken = rig.registry.custom().clone();
    broken.iterate = "z^2 + ".to_string();
    let result = KernelCompiler::new().compile(&broken);
    assert!(!rig.pipeline.install(result));

    assert_eq!(rig.pipeline.kernel().name, "Mandelbrot");
    let diagnostic = rig.pipeline.diagnostic().expect("diagnostic kept");
    assert!(diagnostic.starts_with("iterate:"), "{diagnostic}");
    assert_eq!(rig.pipeline.pending(), Stage::Render);
    assert_eq!(rig.frame().ran, Stage::Render);
    assert_eq!(rig.pipeline.display().rgba, before);
    assert_eq!(rig.pipeline.stats().kernel_failures, 1);
}

#[test]
fn successful_install_clears_diagnostic_and_recomputes() {
    let mut rig = Rig::new("mandelbrot");
    rig.frame();
    rig.pipeline.install(Err(CompileError::Template("boom".to_string())));
    assert!(rig.pipeline.diagnostic().is_some());

    rig.registry.select_by_name("tricorn").unwrap();
    let compiled = KernelCompiler::new().compile(rig.registry.active());
    assert!(rig.pipeline.install(compiled));
    assert_eq!(rig.pipeline.diagnostic(), None);
    assert_eq!(rig.pipeline.kernel().name, "Tricorn");
    assert_eq!(rig.pipeline.pending(), Stage::Compute);
    assert_eq!(rig.frame().ran, Stage::Compute);
}

#[test]
fn pointer_motion_only_matters_for_pointer_formulas() {
    let mut rig = Rig::new("mandelbrot");
    rig.frame();
    assert!(!rig.pipeline.pointer_moved());
    assert_eq!(rig.pipeline.pending(), Stage::Render);

    let mut warp = Rig::new("pointer warp");
    warp.frame();
    assert!(warp.pipeline.pointer_moved());
    assert_eq!(warp.frame_with(Complex64::new(0.3, 0.3), None).ran, Stage::Compute);
}

#[test]
fn temporal_accumulation_refines_up_to_the_cap() {
    let mut rig = Rig::new("mandelbrot");
    rig.edit(ViewEdit::Taa(true));
    let first = rig.frame();
    assert_eq!(first.ran, Stage::Compute);
    assert!(!first.refined);
    assert_eq!(rig.pipeline.accumulated_samples(), 1);

    let second = rig.frame();
    assert!(second.refined);
    assert_eq!(rig.pipeline.accumulated_samples(), 2);

    for _ in 0..(TAA_MAX_SAMPLES + 8) {
        rig.frame();
    }
    assert_eq!(rig.pipeline.accumulated_samples(), TAA_MAX_SAMPLES);
    assert_eq!(rig.frame().ran, Stage::Render);

    // Coloring changes restart the sum from fresh iteration data.
    rig.edit(ViewEdit::PaletteOffset(0.1));
    assert_eq!(rig.frame().ran, Stage::Compute);
    assert_eq!(rig.pipeline.accumulated_samples(), 1);
}

#[test]
fn disabling_taa_drops_accumulation() {
    let mut rig = Rig::new("mandelbrot");
    rig.edit(ViewEdit::Taa(true));
    rig.frame();
    rig.frame();
    rig.edit(ViewEdit::Taa(false));
    rig.frame();
    assert_eq!(rig.pipeline.accumulated_samples(), 0);
    assert!(!rig.frame().refined);
}

#[test]
fn supersampling_keeps_display_size() {
    let mut rig = Rig::new("mandelbrot");
    rig.edit(ViewEdit::Ssaa(deepbrot::view::Ssaa::X4));
    assert_eq!(rig.frame().ran, Stage::Compute);
    let iter = rig.pipeline.iteration_surface();
    assert_eq!((iter.width, iter.height), (96, 64));
    let display = rig.pipeline.display();
    assert_eq!((display.width, display.height), (24, 16));
}

#[test]
fn resize_forces_compute() {
    let mut rig = Rig::new("mandelbrot");
    rig.frame();
    rig.pipeline.resize(24, 16);
    assert_eq!(rig.pipeline.pending(), Stage::Render);
    rig.pipeline.resize(30, 10);
    assert_eq!(rig.frame().ran, Stage::Compute);
    assert_eq!(rig.pipeline.display().width, 30);
}

#[test]
fn record_target_renders_at_its_own_resolution() {
    let mut rig = Rig::new("mandelbrot");
    rig.frame();
    rig.pipeline.set_record_target(Some(RecordTarget {
        width: 40,
        height: 30,
        ssaa: 2,
    }));
    assert_eq!(rig.pipeline.pending(), Stage::Compute);
    rig.frame();
    let fin = rig.pipeline.finalize();
    assert_eq!((fin.width, fin.height), (40, 30));
    let iter = rig.pipeline.iteration_surface();
    assert_eq!((iter.width, iter.height), (80, 60));
    let display = rig.pipeline.display();
    assert_eq!((display.width, display.height), (24, 16));

    rig.pipeline.set_record_target(None);
    assert_eq!(rig.frame().ran, Stage::Compute);
    let iter = rig.pipeline.iteration_surface();
    assert_eq!((iter.width, iter.height), (24, 16));
}

#[test]
fn julia_preview_follows_seed() {
    let mut rig = Rig::new("mandelbrot");
    rig.pipeline.resize_julia(12, 8);
    let seed = Complex64::new(-0.8, 0.156);
    assert!(rig.frame_with(seed, Some(seed)).julia);
    // Same seed, nothing invalidated: no recompute.
    assert!(!rig.frame_with(seed, Some(seed)).julia);
    let other = Complex64::new(0.285, 0.01);
    assert!(rig.frame_with(other, Some(other)).julia);
    let j = rig.pipeline.julia_display();
    assert_eq!((j.width, j.height), (12, 8));
    assert!(j.rgba.chunks_exact(4).all(|px| px[3] == 255));

    // Formulas without Julia support never render the preview.
    let mut warp = Rig::new("pointer warp");
    warp.pipeline.resize_julia(12, 8);
    assert!(!warp.frame_with(seed, Some(seed)).julia);
}

#[test]
fn interior_is_painted_with_inside_color() {
    let mut rig = Rig::new("mandelbrot");
    rig.edit(ViewEdit::Center(deepbrot::precision::ExtendedComplex::new(128, -0.1, 0.0)));
    rig.edit(ViewEdit::Zoom(0.01));
    rig.edit(ViewEdit::InsideColor([0.0, 1.0, 0.0]));
    rig.frame();
    let display = rig.pipeline.display();
    assert!(display.rgba.chunks_exact(4).all(|px| px == [0, 255, 0, 255]));
}

proptest! {
    #[test]
    fn stage_mark_never_lowers(ops in proptest::collection::vec(0u8..3, 1..24)) {
        let stage = |v: u8| match v {
            0 => Stage::Render,
            1 => Stage::Postprocess,
            _ => Stage::Compute,
        };
        let mut mark = StageMark::default();
        let mut highest = Stage::Render;
        for v in ops {
            mark.set_op(stage(v));
            highest = highest.max(stage(v));
            prop_assert_eq!(mark.pending(), highest);
        }
        prop_assert_eq!(mark.take(), highest);
        prop_assert_eq!(mark.pending(), Stage::Render);
    }
}

#[test]
fn traced_orbit_reports_escape_on_the_last_permitted_point() {
    let mut rig = Rig::new("mandelbrot");
    let slots = rig.registry.slot_values();
    let inputs = FrameInputs {
        view: &rig.view,
        palette: &rig.palette,
        slots: &slots,
        mouse: Complex64::new(0.0, 0.0),
        julia_seed: None,
    };
    let seed = Complex64::new(1.0, 0.0);
    let mut out = Vec::new();
    assert!(rig.pipeline.trace_orbit(seed, &inputs, 64, &mut out));
    let n = out.len() as u32;
    assert!(n >= 2 && n < 64);

    // Capped exactly at the escaping point: still an escape.
    assert!(rig.pipeline.trace_orbit(seed, &inputs, n, &mut out));
    assert_eq!(out.len() as u32, n);
    // One point short: the orbit has not escaped yet.
    assert!(!rig.pipeline.trace_orbit(seed, &inputs, n - 1, &mut out));

    assert!(!rig.pipeline.trace_orbit(Complex64::new(-0.1, 0.1), &inputs, 64, &mut out));
}
