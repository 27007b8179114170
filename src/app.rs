use crate::audio::{AudioOutput, Sonifier, SonifierControls};
use crate::config::{Config, RendererMode};
use crate::expr::CompileError;
use crate::export::{ExportSettings, Exporter, ZoomDirection};
use crate::fractal::{FractalDefinition, FractalRegistry};
use crate::kernel::{create_evaluator, KernelCompiler};
use crate::location::Location;
use crate::orbit::{orbit_buffer, OrbitTrail, OrbitWriter, ORBIT_CAPACITY};
use crate::palette::Palette;
use crate::pipeline::{FrameInputs, FrameReport, Pipeline, Stage};
use crate::precision::precision_for_zoom;
use crate::prefs::{prefs_storage_path, AppPrefs};
use crate::render::{blit_inset, cell_pixels, create_renderer, draw_trail, Corner, Frame, Renderer};
use crate::terminal::TerminalGuard;
use crate::view::{Ssaa, ViewEdit, ViewState, MAX_ITERATIONS};
use anyhow::{bail, Context};
use crossterm::event::{
    self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers, MouseButton, MouseEvent, MouseEventKind,
};
use num_complex::Complex64;
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tracing::{info, warn};

const STATUS_TTL: Duration = Duration::from_secs(4);
const ZOOM_STEP: f64 = 0.8;
const PAN_FRACTION: f64 = 0.1;
const ROTATE_STEP: f64 = std::f64::consts::PI / 24.0;
const PRECISION_STEP: u32 = 32;
const MIN_ITERATIONS: u32 = 16;
const TRAIL_RGB: [u8; 3] = [255, 64, 200];
const JULIA_DIVISOR: usize = 4;

pub fn run(cfg: Config) -> anyhow::Result<()> {
    let mut app = App::new(&cfg)?;
    let _term = TerminalGuard::new()?;
    let mut out = BufWriter::new(TerminalGuard::stdout());
    let result = app.run_loop(&cfg, &mut out);
    app.shutdown();
    result
}

struct FpsCounter {
    last: Instant,
    frames: u32,
    fps: f32,
}

impl FpsCounter {
    fn new() -> Self {
        Self {
            last: Instant::now(),
            frames: 0,
            fps: 0.0,
        }
    }

    fn tick(&mut self) {
        self.frames += 1;
        let now = Instant::now();
        let dt = now.duration_since(self.last).as_secs_f32();
        if dt >= 0.5 {
            self.fps = self.frames as f32 / dt;
            self.frames = 0;
            self.last = now;
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct Layout {
    cols: u16,
    rows: u16,
    visual_rows: u16,
    hud_rows: u16,
    width: usize,
    height: usize,
}

struct App {
    registry: FractalRegistry,
    compiler: KernelCompiler,
    pipeline: Pipeline,
    view: ViewState,
    palette: Palette,
    slots: Vec<f64>,

    renderer: Box<dyn Renderer>,
    renderer_mode: RendererMode,
    canvas: Vec<u8>,
    layout: Layout,

    prefs: AppPrefs,
    prefs_path: Option<PathBuf>,
    controls: Arc<SonifierControls>,
    audio: Option<AudioOutput>,

    orbit_writer: OrbitWriter,
    orbit_scratch: Vec<Complex64>,
    trail: Option<OrbitTrail>,
    publish_pending: bool,

    /// Pointer position in image pixels.
    pointer: Option<(f64, f64)>,
    dragging: bool,

    exporter: Option<Exporter>,
    export_dir: PathBuf,
    export_template: ExportSettings,
    location_path: PathBuf,
    formula_path: Option<PathBuf>,

    /// Index of the formula parameter edited by `;`/`'`.
    param_cursor: usize,
    status: Option<(String, Instant)>,
    show_help: bool,
    fps: FpsCounter,
    last_report: Option<FrameReport>,
    quit: bool,
}

impl App {
    fn new(cfg: &Config) -> anyhow::Result<Self> {
        let mut status = None;
        let mut registry = FractalRegistry::builtin();
        if let Some(path) = cfg.formula.as_deref() {
            let loaded = std::fs::read_to_string(path)
                .with_context(|| format!("read formula file {}", path.display()))
                .and_then(|text| Ok(FractalDefinition::parse_formula_file(&text)?))
                .and_then(|def| Ok(registry.edit_custom(def)?));
            if let Err(err) = loaded {
                warn!(error = %err, "custom formula not loaded");
                status = Some(format!("formula: {err:#}"));
            }
        }
        if registry.select_by_name(&cfg.fractal).is_none() {
            bail!(
                "unknown fractal '{}' (available: {})",
                cfg.fractal,
                registry.names().join(", ")
            );
        }

        let mut view = ViewState::default();
        let def = registry.active();
        for edit in [
            ViewEdit::Iterations(cfg.iterations),
            ViewEdit::Precision(cfg.precision),
            ViewEdit::Ssaa(Ssaa::from_factor(cfg.ssaa)?),
            ViewEdit::Taa(cfg.taa),
            ViewEdit::Perturbation(cfg.perturbation),
            ViewEdit::Transfer(cfg.transfer.into()),
            ViewEdit::FlipX(def.flip_x),
            ViewEdit::FlipY(def.flip_y),
        ] {
            view.apply(edit)?;
        }
        if cfg.location.exists() {
            if let Err(err) = Location::load(&cfg.location).and_then(|loc| loc.apply_to(&mut view)) {
                warn!(path = %cfg.location.display(), error = %err, "location not loaded");
                status = Some(format!("location: {err}"));
            }
        }

        let mut palette = Palette::default();
        if let Some(path) = cfg.palette.as_deref() {
            if let Err(err) = palette.replace_from_file(path) {
                warn!(error = %err, "palette not loaded; using default");
                status = Some(err.to_string());
            }
        }

        let compiler = KernelCompiler::new();
        let kernel = match compiler.compile(registry.active()) {
            Ok(k) => k,
            Err(err) => {
                warn!(error = %err, fractal = %registry.active().name, "falling back to the first built-in");
                status = Some(format!("compile failed: {err}"));
                registry.select(0);
                compiler.compile(registry.active())?
            }
        };
        let evaluator = create_evaluator(cfg.engine)?;
        let pipeline = Pipeline::new(evaluator, kernel)?;
        let slots = registry.slot_values();

        let prefs_path = prefs_storage_path();
        let prefs = AppPrefs::load(prefs_path.as_deref()).unwrap_or_else(|err| {
            warn!(error = %err, "prefs not loaded; using defaults");
            AppPrefs::default()
        });
        let controls = Arc::new(SonifierControls::new(!(prefs.muted || cfg.mute)));
        let (orbit_writer, orbit_reader) = orbit_buffer();
        let audio = if cfg.no_audio {
            None
        } else {
            let ctl = Arc::clone(&controls);
            match AudioOutput::start(move |rate| Sonifier::new(orbit_reader, ctl, rate)) {
                Ok(a) => Some(a),
                Err(err) => {
                    warn!(error = %err, "audio output unavailable");
                    status = Some(format!("audio off: {err:#}"));
                    None
                }
            }
        };

        let export_template = ExportSettings {
            width: cfg.export_width,
            height: cfg.export_height,
            fps: cfg.export_fps,
            duration: cfg.export_seconds,
            ssaa: view.ssaa,
            ease: cfg.export_ease,
            direction: ZoomDirection::ZoomIn,
            output: PathBuf::new(),
        };

        info!(
            fractal = %registry.active().name,
            evaluator = pipeline.evaluator_name(),
            precision = view.precision(),
            "deepbrot started"
        );

        Ok(Self {
            registry,
            compiler,
            pipeline,
            view,
            palette,
            slots,
            renderer: create_renderer(cfg.renderer),
            renderer_mode: cfg.renderer,
            canvas: Vec::new(),
            layout: Layout::default(),
            prefs,
            prefs_path,
            controls,
            audio,
            orbit_writer,
            orbit_scratch: Vec::with_capacity(ORBIT_CAPACITY),
            trail: None,
            publish_pending: false,
            pointer: None,
            dragging: false,
            exporter: None,
            export_dir: cfg.export_dir.clone(),
            export_template,
            location_path: cfg.location.clone(),
            formula_path: cfg.formula.clone(),
            param_cursor: 0,
            status: status.map(|s| (s, Instant::now())),
            show_help: false,
            fps: FpsCounter::new(),
            last_report: None,
            quit: false,
        })
    }

    fn run_loop(&mut self, cfg: &Config, out: &mut dyn Write) -> anyhow::Result<()> {
        let size = crossterm::terminal::size().context("get terminal size")?;
        if size.0 < 4 || size.1 < 2 {
            bail!("terminal too small (need at least 4x2, got {}x{})", size.0, size.1);
        }
        self.relayout(size);
        let target = Duration::from_secs_f32(1.0 / cfg.fps.max(1) as f32);

        while !self.quit {
            let now = Instant::now();

            while event::poll(Duration::from_millis(0))? {
                match event::read()? {
                    Event::Key(k) if k.kind != KeyEventKind::Release => self.handle_key(k),
                    Event::Mouse(m) => self.handle_mouse(m),
                    Event::Resize(c, r) => self.relayout((c, r)),
                    _ => {}
                }
                if self.quit {
                    return Ok(());
                }
            }
            // Resize events can be missed in some terminals.
            let sz = crossterm::terminal::size()?;
            if sz != (self.layout.cols, self.layout.rows) {
                self.relayout(sz);
            }

            self.step_frame();
            if self.publish_pending {
                if let Some(trail) = &self.trail {
                    self.publish_pending = !self.orbit_writer.publish(trail);
                }
            }
            self.present(cfg.sync_updates, out)?;
            self.fps.tick();

            // Exports run unpaced.
            let elapsed = now.elapsed();
            if self.exporter.is_none() && elapsed < target {
                std::thread::sleep(target - elapsed);
            }
        }
        Ok(())
    }

    fn shutdown(&mut self) {
        if let Some(exp) = self.exporter.take() {
            exp.cancel(&mut self.pipeline);
        }
        self.save_prefs();
        self.audio = None;
    }

    fn set_status(&mut self, msg: impl Into<String>) {
        self.status = Some((msg.into(), Instant::now()));
    }

    fn relayout(&mut self, (cols, rows): (u16, u16)) {
        let hud_rows = if self.prefs.show_hud || self.pipeline.diagnostic().is_some() {
            rows.saturating_sub(1).min(3)
        } else {
            0
        };
        let visual_rows = rows.saturating_sub(hud_rows).max(1);
        let (cw, ch) = cell_pixels(self.renderer_mode);
        let width = cols as usize * cw;
        let height = visual_rows as usize * ch;
        self.layout = Layout {
            cols,
            rows,
            visual_rows,
            hud_rows,
            width,
            height,
        };
        self.pipeline.resize(width, height);
        self.pipeline
            .resize_julia((width / JULIA_DIVISOR).max(8), (height / JULIA_DIVISOR).max(8));
    }

    /// Image pixel to absolute plane coordinate.
    fn plane_at(&self, (px, py): (f64, f64)) -> Complex64 {
        let (dx, dy) = self.view.viewport(self.layout.width, self.layout.height).offset(px, py);
        self.view.center.offset_to_f64(dx, dy)
    }

    fn pointer_plane(&self) -> Complex64 {
        match self.pointer {
            Some(p) => self.plane_at(p),
            None => self.view.center.to_complex64(),
        }
    }

    fn edit(&mut self, edit: ViewEdit) {
        match self.view.apply(edit) {
            Ok(stage) => self.pipeline.set_op(stage),
            Err(err) => self.set_status(err.to_string()),
        }
    }

    fn step_frame(&mut self) {
        let mouse = self.pointer_plane();
        if let Some(exp) = self.exporter.as_mut() {
            match exp.step(&mut self.pipeline, &self.palette, &self.slots, mouse) {
                Ok(p) if p.done() => self.finish_export(),
                Ok(_) => {}
                Err(err) => {
                    warn!(error = %err, "export failed");
                    if let Some(exp) = self.exporter.take() {
                        exp.cancel(&mut self.pipeline);
                    }
                    self.set_status(format!("export failed: {err}"));
                }
            }
            return;
        }

        let julia_seed = (self.prefs.julia_preview && self.pointer.is_some()).then_some(mouse);
        let report = self.pipeline.run_frame(&FrameInputs {
            view: &self.view,
            palette: &self.palette,
            slots: &self.slots,
            mouse,
            julia_seed,
        });
        self.last_report = Some(report);
    }

    fn present(&mut self, sync_updates: bool, out: &mut dyn Write) -> anyhow::Result<()> {
        let layout = self.layout;
        let display = self.pipeline.display();
        let (w, h) = (layout.width, layout.height);
        self.canvas.clear();
        self.canvas.resize(w * h * 4, 0);
        if display.width == w && display.height == h {
            self.canvas.copy_from_slice(&display.rgba);
        }

        if self.exporter.is_none() {
            if self.prefs.show_trail {
                if let Some(trail) = &self.trail {
                    let vp = self.view.viewport(w, h);
                    let pts = trail.screen_points(&vp, self.view.center.to_complex64());
                    draw_trail(&mut self.canvas, w, h, &pts, TRAIL_RGB);
                }
            }
            if self.prefs.julia_preview && self.pointer.is_some() && self.pipeline.kernel().julia {
                blit_inset(&mut self.canvas, w, h, self.pipeline.julia_display(), Corner::TopRight);
            }
        }

        let hud = if layout.hud_rows > 0 { self.hud_text() } else { String::new() };
        let overlay = self.show_help.then(help_popup_text);
        let frame = Frame {
            term_cols: layout.cols,
            term_rows: layout.rows,
            visual_rows: layout.visual_rows,
            pixel_width: w,
            pixel_height: h,
            pixels_rgba: &self.canvas,
            hud: &hud,
            hud_rows: layout.hud_rows,
            diagnostic: self.pipeline.diagnostic(),
            overlay,
            sync_updates,
        };
        self.renderer.render(&frame, out)
    }

    fn hud_text(&self) -> String {
        let kernel = self.pipeline.kernel();
        let c = self.view.center.to_complex64();
        let line1 = format!(
            "{} | {} | zoom {:.3e} | center {:.10} {:+.10}i | {} bits{} | iter {} | ssaa x{} | taa {} | pert {} | {:.1} fps",
            kernel.name,
            self.pipeline.evaluator_name(),
            self.view.zoom,
            c.re,
            c.im,
            self.view.precision(),
            precision_hint(self.view.precision(), self.view.zoom),
            self.view.iterations,
            self.view.ssaa.factor(),
            on_off(self.view.taa),
            on_off(self.view.perturbation),
            self.fps.fps,
        );
        let stage = match self.last_report {
            Some(r) => format!(
                "{}{} c/p/r {:.1}/{:.1}/{:.1} ms",
                r.ran.label(),
                if r.perturbed { " (perturbed)" } else { "" },
                r.compute_ms,
                r.postprocess_ms,
                r.render_ms
            ),
            None => "-".to_string(),
        };
        let trail = match &self.trail {
            Some(t) if t.wrap.is_some() => format!("{} pts, period {}", t.len(), t.period()),
            Some(t) => format!("{} pts, escapes", t.len()),
            None => "none".to_string(),
        };
        let export = match &self.exporter {
            Some(e) => {
                let p = e.progress();
                format!(" | export {}/{} ({:.0}%)", p.written, p.total, p.fraction() * 100.0)
            }
            None => String::new(),
        };
        let line2 = format!(
            "{stage} | ref orbits {} | trail {trail} | audio {} | {} x{:.2} off {:.2}{export}",
            self.pipeline.reference_recomputations(),
            match (&self.audio, self.controls.playing()) {
                (None, _) => "off",
                (Some(_), true) => "on",
                (Some(_), false) => "muted",
            },
            self.view.coloring.transfer.label(),
            self.view.coloring.multiplier,
            self.view.coloring.palette_offset,
        );
        let line3 = match &self.status {
            Some((msg, at)) if at.elapsed() < STATUS_TTL => msg.clone(),
            _ => "h help | f/F fractal | mouse: drag orbit, scroll zoom | e export | q quit".to_string(),
        };
        [line1, line2, line3].join("\n")
    }

    fn handle_key(&mut self, k: KeyEvent) {
        if k.modifiers.contains(KeyModifiers::CONTROL) && k.code == KeyCode::Char('c') {
            self.quit = true;
            return;
        }
        if self.show_help {
            if matches!(k.code, KeyCode::Char('h' | '?' | 'q') | KeyCode::Esc) {
                self.show_help = false;
            }
            return;
        }
        let (w, h) = (self.layout.width as f64, self.layout.height as f64);
        match k.code {
            KeyCode::Char('q') | KeyCode::Esc => self.quit = true,
            KeyCode::Left => self.pan(-PAN_FRACTION * w, 0.0),
            KeyCode::Right => self.pan(PAN_FRACTION * w, 0.0),
            KeyCode::Up => self.pan(0.0, -PAN_FRACTION * h),
            KeyCode::Down => self.pan(0.0, PAN_FRACTION * h),
            KeyCode::Char('+' | '=') => self.edit(ViewEdit::Zoom(self.view.zoom * ZOOM_STEP)),
            KeyCode::Char('-' | '_') => self.edit(ViewEdit::Zoom(self.view.zoom / ZOOM_STEP)),
            KeyCode::Char('r') => self.edit(ViewEdit::Rotation(self.view.rotation + ROTATE_STEP)),
            KeyCode::Char('R') => self.edit(ViewEdit::Rotation(self.view.rotation - ROTATE_STEP)),
            KeyCode::Char('x') => self.edit(ViewEdit::FlipX(!self.view.flip_x)),
            KeyCode::Char('y') => self.edit(ViewEdit::FlipY(!self.view.flip_y)),
            KeyCode::Char('[') => {
                let n = (self.view.iterations / 2).max(MIN_ITERATIONS);
                self.edit(ViewEdit::Iterations(n));
            }
            KeyCode::Char(']') => {
                let n = self.view.iterations.saturating_mul(2).min(MAX_ITERATIONS);
                self.edit(ViewEdit::Iterations(n));
            }
            KeyCode::Char('s') => self.edit(ViewEdit::Ssaa(self.view.ssaa.next())),
            KeyCode::Char('t') => self.edit(ViewEdit::Taa(!self.view.taa)),
            KeyCode::Char('p') => self.edit(ViewEdit::Perturbation(!self.view.perturbation)),
            KeyCode::Char('o') => {
                let bits = self.view.precision().saturating_add(PRECISION_STEP);
                self.edit(ViewEdit::Precision(bits));
            }
            KeyCode::Char('O') => {
                let bits = self.view.precision().saturating_sub(PRECISION_STEP);
                self.edit(ViewEdit::Precision(bits));
            }
            KeyCode::Char(',') => {
                self.edit(ViewEdit::PaletteOffset(self.view.coloring.palette_offset - 0.02))
            }
            KeyCode::Char('.') => {
                self.edit(ViewEdit::PaletteOffset(self.view.coloring.palette_offset + 0.02))
            }
            KeyCode::Char('<') => self.edit(ViewEdit::Multiplier(self.view.coloring.multiplier / 1.25)),
            KeyCode::Char('>') => self.edit(ViewEdit::Multiplier(self.view.coloring.multiplier * 1.25)),
            KeyCode::Char('g') => self.edit(ViewEdit::Transfer(self.view.coloring.transfer.next())),
            KeyCode::Char('n') => self.edit(ViewEdit::Smooth(!self.view.coloring.smooth)),
            KeyCode::Char('f') => self.select_fractal(true),
            KeyCode::Char('F') => self.select_fractal(false),
            KeyCode::Char('u') => self.reload_formula(),
            KeyCode::Tab => self.next_param(),
            KeyCode::Char(';') => self.nudge_param(-1.0),
            KeyCode::Char('\'') => self.nudge_param(1.0),
            KeyCode::Char('0') => {
                self.registry.reset_params();
                self.slots = self.registry.slot_values();
                self.pipeline.set_op(Stage::Compute);
                self.set_status("parameters reset");
            }
            KeyCode::Char('m') => {
                self.prefs.muted = !self.prefs.muted;
                self.controls.set_playing(!self.prefs.muted);
                self.save_prefs();
            }
            KeyCode::Char('j') => {
                self.prefs.julia_preview = !self.prefs.julia_preview;
                self.save_prefs();
            }
            KeyCode::Char('c') => {
                self.prefs.show_trail = !self.prefs.show_trail;
                self.save_prefs();
            }
            KeyCode::Char('l') => self.save_location(),
            KeyCode::Char('L') => self.load_location(),
            KeyCode::Char('e') => self.toggle_export(),
            KeyCode::Char('i') => {
                self.prefs.show_hud = !self.prefs.show_hud;
                self.save_prefs();
                self.relayout((self.layout.cols, self.layout.rows));
            }
            KeyCode::Char('h' | '?') | KeyCode::F(1) => self.show_help = true,
            _ => {}
        }
    }

    /// Pans by a screen-space distance in image pixels.
    fn pan(&mut self, px: f64, py: f64) {
        let vp = self.view.viewport(self.layout.width, self.layout.height);
        let (cx, cy) = (0.5 * vp.width as f64, 0.5 * vp.height as f64);
        let (ax, ay) = vp.offset(cx, cy);
        let (bx, by) = vp.offset(cx + px, cy + py);
        self.edit(ViewEdit::Pan {
            dx: bx - ax,
            dy: by - ay,
        });
    }

    fn handle_mouse(&mut self, m: MouseEvent) {
        if m.row >= self.layout.visual_rows || self.show_help {
            return;
        }
        let (cw, ch) = cell_pixels(self.renderer_mode);
        let pos = (
            (f64::from(m.column) + 0.5) * cw as f64,
            (f64::from(m.row) + 0.5) * ch as f64,
        );
        match m.kind {
            MouseEventKind::Down(MouseButton::Left) => {
                self.pointer = Some(pos);
                self.dragging = true;
                self.trace_orbit();
            }
            MouseEventKind::Drag(MouseButton::Left) => {
                self.pointer = Some(pos);
                self.pipeline.pointer_moved();
                if self.dragging {
                    self.trace_orbit();
                }
            }
            MouseEventKind::Up(MouseButton::Left) => self.dragging = false,
            MouseEventKind::Moved => {
                self.pointer = Some(pos);
                self.pipeline.pointer_moved();
            }
            MouseEventKind::ScrollUp | MouseEventKind::ScrollDown => {
                let factor = if m.kind == MouseEventKind::ScrollUp {
                    ZOOM_STEP
                } else {
                    1.0 / ZOOM_STEP
                };
                let offset = self
                    .view
                    .viewport(self.layout.width, self.layout.height)
                    .offset(pos.0, pos.1);
                self.edit(ViewEdit::ZoomAbout { factor, offset });
            }
            _ => {}
        }
    }

    fn trace_orbit(&mut self) {
        let seed = self.pointer_plane();
        let cap = (ORBIT_CAPACITY as u32 - 1).min(self.view.iterations);
        let inputs = FrameInputs {
            view: &self.view,
            palette: &self.palette,
            slots: &self.slots,
            mouse: seed,
            julia_seed: None,
        };
        let escaped = self
            .pipeline
            .trace_orbit(seed, &inputs, cap, &mut self.orbit_scratch);
        self.trail = Some(OrbitTrail::from_trace(seed, &self.orbit_scratch, escaped));
        self.publish_pending = true;
    }

    fn next_param(&mut self) {
        let n = self.registry.active().params.len();
        if n == 0 {
            self.set_status("no parameters");
            return;
        }
        self.param_cursor = (self.param_cursor + 1) % n;
        let p = &self.registry.active().params[self.param_cursor];
        let msg = format!("param {} = {:.4}", p.name, p.value);
        self.set_status(msg);
    }

    fn nudge_param(&mut self, dir: f64) {
        let Some(p) = self.registry.active().params.get(self.param_cursor) else {
            self.set_status("no parameters");
            return;
        };
        let step = match (p.min, p.max) {
            (Some(lo), Some(hi)) => (hi - lo) / 50.0,
            _ => 0.01,
        };
        let name = p.name.clone();
        let want = p.value + dir * step;
        if let Some(v) = self.registry.set_param(&name, want) {
            // Slots are uniforms: no recompile.
            self.slots = self.registry.slot_values();
            self.pipeline.set_op(Stage::Compute);
            self.set_status(format!("param {name} = {v:.4}"));
        }
    }

    fn select_fractal(&mut self, forward: bool) {
        if !self.registry.select_next(forward) {
            return;
        }
        self.param_cursor = 0;
        let def = self.registry.active();
        let (fx, fy) = (def.flip_x, def.flip_y);
        self.edit(ViewEdit::FlipX(fx));
        self.edit(ViewEdit::FlipY(fy));
        self.recompile();
    }

    fn recompile(&mut self) {
        let compiled = self.compiler.compile(self.registry.active());
        let had_diagnostic = self.pipeline.diagnostic().is_some();
        if self.pipeline.install(compiled) {
            self.slots = self.registry.slot_values();
            self.set_status(format!("kernel: {}", self.registry.active().name));
        } else {
            self.set_status("compile failed; previous kernel kept");
        }
        if had_diagnostic != self.pipeline.diagnostic().is_some() {
            self.relayout((self.layout.cols, self.layout.rows));
        }
    }

    fn reload_formula(&mut self) {
        let Some(path) = self.formula_path.clone() else {
            self.set_status("no --formula file given");
            return;
        };
        let text = match std::fs::read_to_string(&path) {
            Ok(t) => t,
            Err(err) => {
                self.set_status(format!("read {}: {err}", path.display()));
                return;
            }
        };
        let had_diagnostic = self.pipeline.diagnostic().is_some();
        let parsed = FractalDefinition::parse_formula_file(&text);
        if install_custom(&mut self.registry, &self.compiler, &mut self.pipeline, parsed) {
            self.param_cursor = 0;
            self.slots = self.registry.slot_values();
            self.set_status(format!("kernel: {}", self.registry.active().name));
        } else {
            self.set_status("formula rejected; previous kernel kept");
        }
        if had_diagnostic != self.pipeline.diagnostic().is_some() {
            self.relayout((self.layout.cols, self.layout.rows));
        }
    }

    fn save_location(&mut self) {
        let loc = Location::from_view(&self.view);
        match loc.save(&self.location_path) {
            Ok(()) => self.set_status(format!("saved {}", self.location_path.display())),
            Err(err) => {
                warn!(error = %err, "location not saved");
                self.set_status(err.to_string());
            }
        }
    }

    fn load_location(&mut self) {
        match Location::load(&self.location_path).and_then(|loc| loc.apply_to(&mut self.view)) {
            Ok(stage) => {
                self.pipeline.set_op(stage);
                self.set_status(format!("loaded {}", self.location_path.display()));
            }
            Err(err) => {
                warn!(error = %err, "location not loaded");
                self.set_status(err.to_string());
            }
        }
    }

    fn toggle_export(&mut self) {
        if let Some(exp) = self.exporter.take() {
            exp.cancel(&mut self.pipeline);
            self.set_status("export cancelled");
            return;
        }
        let stamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        let settings = ExportSettings {
            ssaa: self.view.ssaa,
            output: self.export_dir.join(format!("deepbrot-{stamp}.avi")),
            ..self.export_template.clone()
        };
        match Exporter::start(settings, &self.view) {
            Ok(exp) => {
                self.set_status(format!("exporting {}", exp.settings().output.display()));
                self.exporter = Some(exp);
            }
            Err(err) => self.set_status(format!("export not started: {err}")),
        }
    }

    fn finish_export(&mut self) {
        let Some(exp) = self.exporter.take() else {
            return;
        };
        match exp.finish(&mut self.pipeline) {
            Ok(summary) => self.set_status(format!(
                "exported {} frames -> {}",
                summary.frames,
                summary.output.display()
            )),
            Err(err) => {
                warn!(error = %err, "export not finalized");
                self.set_status(format!("export failed: {err}"));
            }
        }
        self.pipeline.set_op(Stage::Compute);
    }

    fn save_prefs(&self) {
        if let Err(err) = self.prefs.save(self.prefs_path.as_deref()) {
            warn!(error = %err, "prefs not saved");
        }
    }
}

/// Compiles a reloaded Custom formula and commits it to the registry only once the
/// pipeline has accepted the kernel. On failure the registry and kernel are untouched.
fn install_custom(
    registry: &mut FractalRegistry,
    compiler: &KernelCompiler,
    pipeline: &mut Pipeline,
    parsed: Result<FractalDefinition, CompileError>,
) -> bool {
    let def = match parsed.and_then(|def| registry.prepare_custom(def)) {
        Ok(def) => def,
        Err(err) => {
            pipeline.install(Err(err));
            return false;
        }
    };
    if !pipeline.install(compiler.compile(&def)) {
        return false;
    }
    registry.commit_custom(def);
    true
}

/// Suggests more bits once the zoom outruns the configured precision.
fn precision_hint(bits: u32, zoom: f64) -> String {
    let want = precision_for_zoom(zoom);
    if bits < want { format!(" (o: {want} needed)") } else { String::new() }
}

fn on_off(v: bool) -> &'static str {
    if v { "on" } else { "off" }
}

fn help_popup_text() -> &'static str {
    "deepbrot keys\n\
arrows  pan\n\
+ / -  zoom in / out (mouse wheel zooms about the pointer)\n\
r / R  rotate\n\
x / y  flip horizontally / vertically\n\
[ / ]  halve / double iteration cap\n\
s  cycle supersampling 1x/2x/4x/8x\n\
t  temporal accumulation\n\
p  perturbation\n\
o / O  raise / lower precision\n\
, / .  palette offset\n\
< / >  color multiplier\n\
g  cycle transfer function\n\
n  smooth coloring\n\
f / F  next / previous fractal\n\
u  reload custom formula file\n\
tab  next formula parameter\n\
; / '  lower / raise parameter, 0 resets\n\
left drag  trace orbit (sonified)\n\
m  mute\n\
j  Julia preview\n\
c  orbit trail\n\
l / L  save / load location\n\
e  start / cancel zoom export\n\
i  HUD\n\
h or ?  close this help\n\
q or esc  quit"
}
