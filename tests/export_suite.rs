#[allow(dead_code)]
#[path = "../src/bin/export_zoom.rs"]
mod export_zoom;

use std::io::Cursor;
use std::path::PathBuf;

use clap::Parser;
use deepbrot::config::TransferArg;
use deepbrot::export::avi::{read_avi, row_stride, AviWriter};
use deepbrot::export::{smoothstep, ExportError, ExportSettings, Exporter, ZoomDirection, ZoomSchedule, BASE_ZOOM};
use deepbrot::fractal::FractalRegistry;
use deepbrot::kernel::{Backend, CpuEvaluator, KernelCompiler};
use deepbrot::palette::Palette;
use deepbrot::pipeline::{Pipeline, Stage};
use deepbrot::view::{Ssaa, ViewEdit, ViewState};
use num_complex::Complex64;

fn temp_path(name: &str) -> PathBuf {
    std::env::temp_dir().join(format!("deepbrot-{}-{name}", std::process::id()))
}

fn close(a: f64, b: f64) -> bool {
    ((a - b) / b).abs() < 1e-9
}

// ── Zoom schedule ───────────────────────────────────────────────────────────

#[test]
fn schedule_hits_both_endpoints() {
    let s = ZoomSchedule::new(1e-6, 120, false, ZoomDirection::ZoomIn).unwrap();
    assert_eq!(s.image_count(), 121);
    assert!(close(s.zoom_at(0), BASE_ZOOM));
    assert!(close(s.zoom_at(120), 1e-6));
    // Past the end stays at the target.
    assert!(close(s.zoom_at(500), 1e-6));
}

#[test]
fn linear_schedule_is_geometric() {
    let s = ZoomSchedule::new(5e-4, 40, false, ZoomDirection::ZoomIn).unwrap();
    let k = s.coefficient();
    assert!(k < 1.0);
    for i in 0..40 {
        assert!(close(s.zoom_at(i + 1) / s.zoom_at(i), k), "frame {i}");
    }
}

#[test]
fn eased_schedule_is_monotonic_and_slow_at_the_ends() {
    let s = ZoomSchedule::new(1e-3, 60, true, ZoomDirection::ZoomIn).unwrap();
    let widths: Vec<f64> = (0..=60).map(|i| s.zoom_at(i)).collect();
    assert!(widths.windows(2).all(|w| w[1] <= w[0]));
    let first_step = widths[0] / widths[1];
    let middle_step = widths[30] / widths[31];
    assert!(first_step < middle_step);
    assert_eq!(smoothstep(0.0), 0.0);
    assert_eq!(smoothstep(0.5), 0.5);
    assert_eq!(smoothstep(2.0), 1.0);
}

#[test]
fn zoom_out_reverses_the_sequence() {
    let inward = ZoomSchedule::new(1e-4, 30, true, ZoomDirection::ZoomIn).unwrap();
    let outward = ZoomSchedule::new(1e-4, 30, true, ZoomDirection::ZoomOut).unwrap();
    for i in 0..=30 {
        assert!(close(outward.zoom_at(i), inward.zoom_at(30 - i)), "frame {i}");
    }
    assert!(close(outward.zoom_at(0), 1e-4));
    assert!(close(outward.zoom_at(30), BASE_ZOOM));
}

#[test]
fn frame_counts_round_and_never_hit_zero() {
    assert_eq!(ZoomSchedule::frames_for(10.0, 30), 300);
    assert_eq!(ZoomSchedule::frames_for(1.0 / 60.0, 30), 1);
    assert_eq!(ZoomSchedule::frames_for(0.0, 30), 1);
    assert_eq!(ZoomSchedule::frames_for(f64::NAN, 30), 1);
    assert!(ZoomSchedule::new(0.0, 10, false, ZoomDirection::ZoomIn).is_none());
    assert!(ZoomSchedule::new(f64::INFINITY, 10, false, ZoomDirection::ZoomIn).is_none());
    assert_eq!(ZoomSchedule::new(1.0, 0, false, ZoomDirection::ZoomIn).unwrap().frames(), 1);
}

// ── AVI container ───────────────────────────────────────────────────────────

fn gradient(width: usize, height: usize, shade: u8) -> Vec<u8> {
    let mut rgb = Vec::with_capacity(width * height * 3);
    for y in 0..height {
        for x in 0..width {
            rgb.extend_from_slice(&[(x * 40) as u8, (y * 60) as u8, shade]);
        }
    }
    rgb
}

#[test]
fn avi_round_trip_preserves_frames_and_header() {
    // Width 5 forces row padding (15 bytes of BGR -> 16).
    let (w, h) = (5, 3);
    assert_eq!(row_stride(w), 16);
    let frames: Vec<Vec<u8>> = (0..3).map(|i| gradient(w, h, 90 * i as u8)).collect();

    let mut writer = AviWriter::new(Cursor::new(Vec::new()), w, h, 24).unwrap();
    for f in &frames {
        writer.write_frame(f).unwrap();
    }
    assert_eq!(writer.frames(), 3);
    let bytes = writer.finish().unwrap().into_inner();

    assert_eq!(&bytes[0..4], b"RIFF");
    assert_eq!(u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]) as usize, bytes.len() - 8);

    let avi = read_avi(&bytes).unwrap();
    assert_eq!((avi.width, avi.height, avi.fps), (5, 3, 24));
    assert_eq!(avi.total_frames, 3);
    assert_eq!(avi.index.len(), 3);
    assert!(avi.index.iter().all(|&(_, size)| size as usize == row_stride(w) * h));
    assert!(avi.index.windows(2).all(|p| p[1].0 > p[0].0));
    assert_eq!(avi.frames, frames);
}

#[test]
fn avi_rejects_wrong_frame_sizes_and_bad_input() {
    let mut writer = AviWriter::new(Cursor::new(Vec::new()), 4, 4, 30).unwrap();
    assert!(matches!(
        writer.write_frame(&[0u8; 10]),
        Err(ExportError::FrameSize { expected: 48, found: 10 })
    ));
    assert!(AviWriter::new(Cursor::new(Vec::new()), 0, 4, 30).is_err());
    assert!(matches!(read_avi(b"RIFF\0\0\0\0WAVE"), Err(ExportError::Malformed(_))));

    let bytes = writer.finish().unwrap().into_inner();
    assert!(read_avi(&bytes[..bytes.len() / 2]).is_err());
}

// ── Settings and the exporter ───────────────────────────────────────────────

fn settings(output: PathBuf) -> ExportSettings {
    ExportSettings {
        width: 16,
        height: 12,
        fps: 4,
        duration: 1.0,
        ssaa: Ssaa::X1,
        ease: false,
        direction: ZoomDirection::ZoomIn,
        output,
    }
}

#[test]
fn settings_validation_rejects_degenerate_values() {
    let ok = settings(temp_path("unused.avi"));
    assert!(ok.validate().is_ok());
    for bad in [
        ExportSettings { width: 0, ..ok.clone() },
        ExportSettings { fps: 0, ..ok.clone() },
        ExportSettings { duration: 0.0, ..ok.clone() },
        ExportSettings { duration: f64::NAN, ..ok.clone() },
    ] {
        assert!(matches!(bad.validate(), Err(ExportError::InvalidSettings(_))));
    }
}

fn export_rig() -> (Pipeline, ViewState, Palette) {
    let registry = FractalRegistry::builtin();
    let kernel = KernelCompiler::new().compile(registry.active()).unwrap();
    let mut pipeline = Pipeline::new(Box::new(CpuEvaluator::new()), kernel).unwrap();
    pipeline.resize(20, 10);
    let mut view = ViewState::default();
    view.apply(ViewEdit::Zoom(0.05)).unwrap();
    view.apply(ViewEdit::Iterations(64)).unwrap();
    (pipeline, view, Palette::default())
}

#[test]
fn exporter_writes_every_image_and_restores_the_pipeline() {
    let path = temp_path("finish.avi");
    let (mut pipeline, view, palette) = export_rig();
    let mut exporter = Exporter::start(settings(path.clone()), &view).unwrap();
    assert_eq!(exporter.schedule().image_count(), 5);

    let mouse = Complex64::new(0.0, 0.0);
    let mut zooms = Vec::new();
    loop {
        let before = exporter.progress().zoom;
        let p = exporter.step(&mut pipeline, &palette, &[], mouse).unwrap();
        zooms.push(before);
        if p.done() {
            break;
        }
    }
    assert_eq!(zooms.len(), 5);
    assert!(close(zooms[0], BASE_ZOOM));
    assert!(close(zooms[4], 0.05));
    // Stepping past the end is a no-op.
    assert_eq!(exporter.step(&mut pipeline, &palette, &[], mouse).unwrap().written, 5);

    let summary = exporter.finish(&mut pipeline).unwrap();
    assert_eq!(summary.frames, 5);
    assert_eq!(pipeline.pending(), Stage::Compute);

    let bytes = std::fs::read(&path).unwrap();
    let avi = read_avi(&bytes).unwrap();
    assert_eq!((avi.width, avi.height, avi.fps, avi.total_frames), (16, 12, 4, 5));
    // The wide first frame and the deep last frame differ.
    assert_ne!(avi.frames[0], avi.frames[4]);
    let _ = std::fs::remove_file(&path);
}

#[test]
fn cancelled_export_removes_the_partial_file() {
    let path = temp_path("cancel.avi");
    let (mut pipeline, view, palette) = export_rig();
    let mut exporter = Exporter::start(settings(path.clone()), &view).unwrap();
    exporter
        .step(&mut pipeline, &palette, &[], Complex64::new(0.0, 0.0))
        .unwrap();
    assert!(path.exists());
    exporter.cancel(&mut pipeline);
    assert!(!path.exists());
    assert_eq!(pipeline.pending(), Stage::Compute);
}

#[test]
fn exporter_refuses_sequences_past_4gib() {
    let (_, view, _) = export_rig();
    let path = temp_path("huge.avi");
    let huge = ExportSettings {
        width: 1920,
        height: 1080,
        fps: 30,
        duration: 25.0,
        ..settings(path.clone())
    };
    match Exporter::start(huge, &view) {
        Err(ExportError::TooLarge { frames }) => assert!(frames > 600 && frames < 751, "{frames}"),
        Err(other) => panic!("expected TooLarge, got {other}"),
        Ok(_) => panic!("expected TooLarge"),
    }
    assert!(!path.exists());
}

#[test]
fn exporter_refuses_unwritable_output() {
    let (_, view, _) = export_rig();
    let path = temp_path("missing-dir").join("nested").join("out.avi");
    assert!(matches!(
        Exporter::start(settings(path), &view),
        Err(ExportError::Open { .. })
    ));
}

// ── export_zoom binary ──────────────────────────────────────────────────────

#[test]
fn cli_defaults_are_stable() {
    let args = export_zoom::Cli::try_parse_from(["export_zoom"]).expect("parse should succeed");
    assert_eq!(args.re, "-0.5");
    assert_eq!(args.im, "0");
    assert_eq!(args.zoom, 1e-6);
    assert_eq!(args.fractal, "mandelbrot");
    assert_eq!((args.width, args.height, args.fps), (640, 360, 30));
    assert_eq!(args.duration, 10.0);
    assert_eq!(args.ssaa, 1);
    assert_eq!(args.engine, Backend::Cpu);
    assert_eq!(args.direction, ZoomDirection::ZoomIn);
    assert_eq!(args.transfer, TransferArg::Sqrt);
    assert_eq!(args.out, PathBuf::from("zoom.avi"));
    assert!(export_zoom::validate_args(&args).is_ok());
}

#[test]
fn cli_overrides_work() {
    let args = export_zoom::Cli::try_parse_from([
        "export_zoom",
        "--re",
        "-0.743643887037158704752191506114774",
        "--im",
        "0.131825904205311970493132056385139",
        "--zoom",
        "1e-12",
        "--fractal",
        "burning-ship",
        "--perturbation",
        "--ssaa",
        "4",
        "--ease",
        "--direction",
        "out",
        "--out",
        "clips/deep.avi",
    ])
    .expect("parse should succeed");
    assert_eq!(args.re, "-0.743643887037158704752191506114774");
    assert_eq!(args.zoom, 1e-12);
    assert_eq!(args.fractal, "burning-ship");
    assert!(args.perturbation);
    assert_eq!(args.ssaa, 4);
    assert!(args.ease);
    assert_eq!(args.direction, ZoomDirection::ZoomOut);
    assert_eq!(args.out, PathBuf::from("clips/deep.avi"));

    let view = export_zoom::build_view(&args).unwrap();
    assert_eq!(view.zoom, 1e-12);
    assert!(view.perturbation);
    assert_eq!(view.ssaa, Ssaa::X4);
}

#[test]
fn cli_rejects_invalid_values() {
    assert!(export_zoom::Cli::try_parse_from(["export_zoom", "--ssaa", "3"]).is_err());
    for argv in [
        ["export_zoom", "--width", "0"],
        ["export_zoom", "--fps", "0"],
        ["export_zoom", "--duration", "0"],
        ["export_zoom", "--zoom=-1", "--fps=30"],
        ["export_zoom", "--iterations", "0"],
    ] {
        let args = export_zoom::Cli::try_parse_from(argv).expect("parse should succeed");
        assert!(export_zoom::validate_args(&args).is_err(), "{argv:?}");
    }
}
