use std::path::PathBuf;

use clap::Parser;
use deepbrot::config::{Config, RendererMode, TransferArg};
use deepbrot::kernel::Backend;
use deepbrot::location::{Location, LocationError, SavedCenter};
use deepbrot::palette::{ColorStop, Palette, PaletteError, MAX_STOPS, RECORD_BYTES};
use deepbrot::pipeline::Stage;
use deepbrot::precision::ExtendedComplex;
use deepbrot::prefs::{AppPrefs, PrefsError};
use deepbrot::view::{ViewEdit, ViewState};

fn temp_path(name: &str) -> PathBuf {
    std::env::temp_dir().join(format!("deepbrot-{}-{name}", std::process::id()))
}

// ── Palette files ───────────────────────────────────────────────────────────

#[test]
fn palette_file_round_trips_in_file_order() {
    let stops = vec![
        ColorStop::new(0.2, 0.4, 0.6, 0.7),
        ColorStop::new(1.0, 0.0, 0.0, 0.1),
        ColorStop::new(0.0, 0.0, 1.0, 0.4),
    ];
    let palette = Palette::from_stops(stops.clone()).unwrap();
    let bytes = palette.encode();
    assert_eq!(bytes.len(), 3 * RECORD_BYTES);
    let back = Palette::decode(&bytes).unwrap();
    assert_eq!(back.stops(), stops.as_slice());
    assert_eq!(back, palette);

    let path = temp_path("palette.bin");
    palette.save(&path).unwrap();
    assert_eq!(Palette::load(&path).unwrap(), palette);
    let _ = std::fs::remove_file(&path);
}

#[test]
fn palette_sampling_wraps_between_last_and_first_stop() {
    let palette = Palette::from_stops(vec![
        ColorStop::new(1.0, 0.0, 0.0, 0.25),
        ColorStop::new(0.0, 0.0, 1.0, 0.75),
    ])
    .unwrap();
    // 0.0 sits halfway along the wrap from 0.75 back to 1.25.
    let c = palette.sample(0.0);
    assert!((c[0] - 0.5).abs() < 1e-6 && (c[2] - 0.5).abs() < 1e-6);
    assert_eq!(palette.sample(1.25), palette.sample(0.25));
    assert_eq!(palette.sample(-0.25), palette.sample(0.75));
}

#[test]
fn malformed_palette_file_leaves_palette_unchanged() {
    let mut palette = Palette::default();
    let before = palette.clone();

    let path = temp_path("bad-palette.bin");
    std::fs::write(&path, [0u8; RECORD_BYTES + 3]).unwrap();
    assert!(matches!(palette.replace_from_file(&path), Err(PaletteError::Length(19))));
    assert_eq!(palette, before);

    std::fs::write(&path, vec![0u8; (MAX_STOPS + 1) * RECORD_BYTES]).unwrap();
    assert!(matches!(palette.replace_from_file(&path), Err(PaletteError::TooMany(17))));
    assert_eq!(palette, before);

    assert!(matches!(palette.replace_from_file(&temp_path("nope.bin")), Err(PaletteError::Io { .. })));
    assert_eq!(palette, before);
    let _ = std::fs::remove_file(&path);
}

#[test]
fn palette_rejects_empty_and_non_finite_entries() {
    assert!(matches!(Palette::decode(&[]), Err(PaletteError::Empty)));
    let mut bytes = Palette::default().encode();
    bytes[RECORD_BYTES..RECORD_BYTES + 4].copy_from_slice(&f32::NAN.to_le_bytes());
    assert!(matches!(Palette::decode(&bytes), Err(PaletteError::NonFinite(1))));
}

// ── Location files ──────────────────────────────────────────────────────────

#[test]
fn short_location_holds_only_the_zoom() {
    let loc = Location::decode(&2.5e-9f64.to_le_bytes()).unwrap();
    assert_eq!(loc.zoom, 2.5e-9);
    assert_eq!(loc.center, None);

    let mut view = ViewState::default();
    let center = view.center.clone();
    assert_eq!(loc.apply_to(&mut view).unwrap(), Stage::Compute);
    assert_eq!(view.zoom, 2.5e-9);
    assert_eq!(view.center, center);
}

#[test]
fn long_location_restores_center_digits() {
    let mut view = ViewState::default();
    view.apply(ViewEdit::Precision(256)).unwrap();
    let center = ExtendedComplex::parse(
        256,
        "-1.76877851659959660419174432673086",
        "-0.00173889062155380258737071144183",
    )
    .unwrap();
    view.apply(ViewEdit::Center(center)).unwrap();
    view.apply(ViewEdit::Zoom(3e-28)).unwrap();

    let path = temp_path("deep.loc");
    Location::from_view(&view).save(&path).unwrap();
    let loaded = Location::load(&path).unwrap();
    let _ = std::fs::remove_file(&path);
    assert_eq!(loaded.center.as_ref().map(|c| c.precision), Some(256));

    let mut restored = ViewState::default();
    loaded.apply_to(&mut restored).unwrap();
    assert_eq!(restored.zoom, 3e-28);
    assert_eq!(restored.precision(), 256);
    assert_eq!(restored.center, view.center);
}

#[test]
fn trailing_or_truncated_location_bytes_are_rejected() {
    let loc = Location {
        zoom: 1.0,
        center: Some(SavedCenter {
            precision: 128,
            re: "0.25".to_string(),
            im: "-0.5".to_string(),
        }),
    };
    let mut bytes = loc.encode();
    assert_eq!(Location::decode(&bytes).unwrap(), loc);

    bytes.push(0);
    assert!(matches!(Location::decode(&bytes), Err(LocationError::Malformed(_))));
    bytes.truncate(bytes.len() - 3);
    assert!(matches!(Location::decode(&bytes), Err(LocationError::Malformed(_))));
    assert!(matches!(Location::decode(&[0u8; 5]), Err(LocationError::Malformed(_))));
}

#[test]
fn invalid_location_leaves_view_unchanged() {
    let mut view = ViewState::default();
    let before = view.clone();

    let bad_zoom = Location { zoom: -1.0, center: None };
    assert!(matches!(bad_zoom.apply_to(&mut view), Err(LocationError::View(_))));
    assert_eq!(view, before);

    let bad_center = Location {
        zoom: 1e-3,
        center: Some(SavedCenter {
            precision: 128,
            re: "minus one".to_string(),
            im: "0".to_string(),
        }),
    };
    assert!(matches!(bad_center.apply_to(&mut view), Err(LocationError::Center(_))));
    assert_eq!(view, before);
}

// ── Preferences ─────────────────────────────────────────────────────────────

#[test]
fn prefs_parse_ignores_comments_and_unknown_keys() {
    let prefs = AppPrefs::parse("# saved\nmuted = yes\nshow_trail=off\nfuture_key=1\n").unwrap();
    assert!(prefs.muted);
    assert!(!prefs.show_trail);
    assert!(prefs.julia_preview);
    assert!(prefs.show_hud);
}

#[test]
fn prefs_parse_errors_name_the_line() {
    assert_eq!(
        AppPrefs::parse("muted=true\njulia_preview\n").unwrap_err(),
        PrefsError::Parse {
            line: 2,
            message: "expected <key>=<value>".to_string()
        }
    );
    assert!(matches!(
        AppPrefs::parse("show_hud=maybe").unwrap_err(),
        PrefsError::Parse { line: 1, .. }
    ));
}

#[test]
fn prefs_save_then_load() {
    let dir = temp_path("prefs");
    let path = dir.join("prefs.txt");
    let prefs = AppPrefs {
        muted: true,
        julia_preview: false,
        show_trail: true,
        show_hud: false,
    };
    prefs.save(Some(&path)).unwrap();
    assert_eq!(AppPrefs::load(Some(&path)).unwrap(), prefs);
    assert!(!path.with_extension("tmp").exists());
    let _ = std::fs::remove_dir_all(&dir);

    assert_eq!(AppPrefs::load(Some(&dir.join("missing.txt"))).unwrap(), AppPrefs::default());
    assert_eq!(AppPrefs::load(None).unwrap(), AppPrefs::default());
    assert!(prefs.save(None).is_ok());
}

// ── Command line ────────────────────────────────────────────────────────────

#[test]
fn config_defaults_are_stable() {
    let cfg = Config::try_parse_from(["deepbrot"]).expect("parse should succeed");
    assert_eq!(cfg.renderer, RendererMode::HalfBlock);
    assert_eq!(cfg.engine, Backend::Cpu);
    assert_eq!(cfg.fractal, "mandelbrot");
    assert_eq!(cfg.iterations, 256);
    assert_eq!(cfg.ssaa, 1);
    assert!(!cfg.taa);
    assert!(!cfg.perturbation);
    assert_eq!(cfg.transfer, TransferArg::Sqrt);
    assert_eq!(cfg.location, PathBuf::from("deepbrot.loc"));
    assert_eq!(cfg.formula, None);
    assert!(cfg.sync_updates);
    assert!(!cfg.no_audio);
}

#[test]
fn config_accepts_renderer_aliases_and_rejects_bad_ssaa() {
    let cfg = Config::try_parse_from(["deepbrot", "--renderer", "hb", "--ssaa", "8", "--transfer", "log"])
        .expect("parse should succeed");
    assert_eq!(cfg.renderer, RendererMode::HalfBlock);
    assert_eq!(cfg.ssaa, 8);
    assert_eq!(cfg.transfer, TransferArg::Log);

    let kitty = Config::try_parse_from(["deepbrot", "--renderer", "kitty", "--sync-updates", "false"]).unwrap();
    assert_eq!(kitty.renderer, RendererMode::Kitty);
    assert!(!kitty.sync_updates);

    assert!(Config::try_parse_from(["deepbrot", "--ssaa", "3"]).is_err());
    assert!(Config::try_parse_from(["deepbrot", "--ssaa", "two"]).is_err());
}
