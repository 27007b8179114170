use std::io::Write;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Parser;
use deepbrot::config::{parse_ssaa, TransferArg};
use deepbrot::export::{ExportSettings, Exporter, ZoomDirection};
use deepbrot::fractal::FractalRegistry;
use deepbrot::kernel::{create_evaluator, Backend, KernelCompiler};
use deepbrot::location::Location;
use deepbrot::palette::Palette;
use deepbrot::pipeline::Pipeline;
use deepbrot::precision::{ExtendedComplex, DEFAULT_PRECISION};
use deepbrot::view::{Ssaa, ViewEdit, ViewState};
use tracing::info;

const DEFAULT_OUTPUT: &str = "zoom.avi";

#[derive(Parser, Debug, Clone)]
#[command(
    name = "export_zoom",
    version,
    about = "Offline zoom export (view center and depth -> uncompressed AVI)"
)]
pub(crate) struct Cli {
    /// Real part of the zoom target, as a decimal string.
    #[arg(long, default_value = "-0.5", allow_hyphen_values = true)]
    pub(crate) re: String,

    #[arg(long, default_value = "0", allow_hyphen_values = true)]
    pub(crate) im: String,

    /// Final view width in the complex plane.
    #[arg(long, default_value_t = 1e-6)]
    pub(crate) zoom: f64,

    /// Saved location; overrides --re/--im/--zoom.
    #[arg(long, value_name = "FILE")]
    pub(crate) location: Option<PathBuf>,

    #[arg(long, default_value = "mandelbrot")]
    pub(crate) fractal: String,

    #[arg(long, default_value_t = 1024)]
    pub(crate) iterations: u32,

    #[arg(long, default_value_t = DEFAULT_PRECISION)]
    pub(crate) precision: u32,

    #[arg(long, default_value_t = false)]
    pub(crate) perturbation: bool,

    #[arg(long, value_enum, default_value_t = Backend::Cpu)]
    pub(crate) engine: Backend,

    #[arg(long, default_value_t = 640)]
    pub(crate) width: usize,

    #[arg(long, default_value_t = 360)]
    pub(crate) height: usize,

    #[arg(long, default_value_t = 30)]
    pub(crate) fps: u32,

    #[arg(long, value_name = "SECONDS", default_value_t = 10.0)]
    pub(crate) duration: f64,

    #[arg(long, default_value_t = 1, value_parser = parse_ssaa)]
    pub(crate) ssaa: u32,

    #[arg(long, default_value_t = false)]
    pub(crate) ease: bool,

    #[arg(long, value_enum, default_value_t = ZoomDirection::ZoomIn)]
    pub(crate) direction: ZoomDirection,

    #[arg(long, value_enum, default_value_t = TransferArg::Sqrt)]
    pub(crate) transfer: TransferArg,

    #[arg(long, value_name = "FILE")]
    pub(crate) palette: Option<PathBuf>,

    #[arg(long, value_name = "AVI", default_value = DEFAULT_OUTPUT)]
    pub(crate) out: PathBuf,
}

pub(crate) fn validate_args(args: &Cli) -> Result<()> {
    if args.width == 0 || args.height == 0 {
        bail!("--width and --height must be >= 1");
    }
    if args.fps == 0 {
        bail!("--fps must be >= 1");
    }
    if !(args.duration.is_finite() && args.duration > 0.0) {
        bail!("--duration must be > 0 seconds");
    }
    if !(args.zoom.is_finite() && args.zoom > 0.0) {
        bail!("--zoom must be a positive width");
    }
    if args.iterations == 0 {
        bail!("--iterations must be >= 1");
    }
    Ok(())
}

pub(crate) fn build_view(args: &Cli) -> Result<ViewState> {
    let mut view = ViewState::default();
    let center = ExtendedComplex::parse(args.precision, &args.re, &args.im)
        .with_context(|| format!("parse center ({}, {})", args.re, args.im))?;
    for edit in [
        ViewEdit::Precision(args.precision),
        ViewEdit::Center(center),
        ViewEdit::Zoom(args.zoom),
        ViewEdit::Iterations(args.iterations),
        ViewEdit::Perturbation(args.perturbation),
        ViewEdit::Ssaa(Ssaa::from_factor(args.ssaa)?),
        ViewEdit::Transfer(args.transfer.into()),
    ] {
        view.apply(edit)?;
    }
    if let Some(path) = args.location.as_deref() {
        Location::load(path)?.apply_to(&mut view)?;
    }
    Ok(view)
}

fn main() -> Result<()> {
    deepbrot::logging::init_stderr();
    let args = Cli::parse();
    validate_args(&args)?;
    run(args)
}

fn run(args: Cli) -> Result<()> {
    let mut registry = FractalRegistry::builtin();
    if registry.select_by_name(&args.fractal).is_none() {
        bail!(
            "unknown fractal '{}' (available: {})",
            args.fractal,
            registry.names().join(", ")
        );
    }
    let mut view = build_view(&args)?;
    let def = registry.active();
    view.apply(ViewEdit::FlipX(def.flip_x))?;
    view.apply(ViewEdit::FlipY(def.flip_y))?;

    let palette = match args.palette.as_deref() {
        Some(path) => Palette::load(path)?,
        None => Palette::default(),
    };
    let kernel = KernelCompiler::new().compile(def)?;
    let mut pipeline = Pipeline::new(create_evaluator(args.engine)?, kernel)?;
    let slots = registry.slot_values();
    let mouse = view.center.to_complex64();

    let settings = ExportSettings {
        width: args.width,
        height: args.height,
        fps: args.fps,
        duration: args.duration,
        ssaa: view.ssaa,
        ease: args.ease,
        direction: args.direction,
        output: args.out.clone(),
    };
    let mut exporter = Exporter::start(settings, &view)?;
    info!(
        fractal = %registry.active().name,
        evaluator = pipeline.evaluator_name(),
        "rendering zoom"
    );

    let mut stderr = std::io::stderr();
    let mut last_pct = u32::MAX;
    loop {
        let progress = match exporter.step(&mut pipeline, &palette, &slots, mouse) {
            Ok(p) => p,
            Err(err) => {
                exporter.cancel(&mut pipeline);
                return Err(err.into());
            }
        };
        let pct = (progress.fraction() * 100.0) as u32;
        if pct != last_pct {
            last_pct = pct;
            let _ = write!(stderr, "\r{pct:>3}% ({}/{}) zoom {:.3e}", progress.written, progress.total, progress.zoom);
            let _ = stderr.flush();
        }
        if progress.done() {
            break;
        }
    }
    let _ = writeln!(stderr);

    let summary = exporter.finish(&mut pipeline)?;
    println!(
        "wrote {} frames to {} in {:.1}s",
        summary.frames,
        summary.output.display(),
        summary.elapsed_ms as f64 / 1000.0
    );
    Ok(())
}
