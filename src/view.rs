use crate::pipeline::Stage;
use crate::precision::{clamp_precision, ExtendedComplex, DEFAULT_PRECISION};

pub const MAX_ITERATIONS: u32 = 1_000_000;
pub const DEFAULT_ZOOM: f64 = 3.5;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ViewError {
    #[error("zoom width must be finite and > 0 (got {0})")]
    Zoom(f64),
    #[error("iteration cap must be in 1..={max} (got {0})", max = MAX_ITERATIONS)]
    Iterations(u32),
    #[error("bailout radius must be finite and > 0 (got {0})")]
    Bailout(f64),
    #[error("{0} must be finite")]
    NonFinite(&'static str),
    #[error("supersampling factor must be 1, 2, 4 or 8 (got {0})")]
    Ssaa(u32),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ssaa {
    X1,
    X2,
    X4,
    X8,
}

impl Ssaa {
    pub fn factor(self) -> usize {
        match self {
            Self::X1 => 1,
            Self::X2 => 2,
            Self::X4 => 4,
            Self::X8 => 8,
        }
    }

    pub fn from_factor(factor: u32) -> Result<Self, ViewError> {
        match factor {
            1 => Ok(Self::X1),
            2 => Ok(Self::X2),
            4 => Ok(Self::X4),
            8 => Ok(Self::X8),
            other => Err(ViewError::Ssaa(other)),
        }
    }

    pub fn next(self) -> Self {
        match self {
            Self::X1 => Self::X2,
            Self::X2 => Self::X4,
            Self::X4 => Self::X8,
            Self::X8 => Self::X1,
        }
    }
}

/// Maps normalized iteration values onto the palette.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transfer {
    Linear,
    Sqrt,
    Log,
    Cbrt,
}

impl Transfer {
    pub fn apply(self, v: f64) -> f64 {
        let v = v.max(0.0);
        match self {
            Self::Linear => v,
            Self::Sqrt => v.sqrt(),
            Self::Log => (1.0 + v).ln(),
            Self::Cbrt => v.cbrt(),
        }
    }

    pub fn next(self) -> Self {
        match self {
            Self::Linear => Self::Sqrt,
            Self::Sqrt => Self::Log,
            Self::Log => Self::Cbrt,
            Self::Cbrt => Self::Linear,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Linear => "linear",
            Self::Sqrt => "sqrt",
            Self::Log => "log",
            Self::Cbrt => "cbrt",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Coloring {
    pub palette_offset: f64,
    pub multiplier: f64,
    pub transfer: Transfer,
    pub inside: [f32; 3],
    pub smooth: bool,
}

impl Default for Coloring {
    fn default() -> Self {
        Self {
            palette_offset: 0.0,
            multiplier: 1.0,
            transfer: Transfer::Sqrt,
            inside: [0.0, 0.0, 0.0],
            smooth: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ViewState {
    pub center: ExtendedComplex,
    /// Width of the visible region in the complex plane.
    pub zoom: f64,
    pub rotation: f64,
    pub flip_x: bool,
    pub flip_y: bool,
    pub ssaa: Ssaa,
    pub taa: bool,
    pub iterations: u32,
    pub bailout: f64,
    pub coloring: Coloring,
    pub perturbation: bool,
}

impl Default for ViewState {
    fn default() -> Self {
        Self {
            center: ExtendedComplex::new(DEFAULT_PRECISION, -0.5, 0.0),
            zoom: DEFAULT_ZOOM,
            rotation: 0.0,
            flip_x: false,
            flip_y: false,
            ssaa: Ssaa::X1,
            taa: false,
            iterations: 256,
            bailout: 8.0,
            coloring: Coloring::default(),
            perturbation: false,
        }
    }
}

/// One independently settable field of [`ViewState`].
#[derive(Debug, Clone, PartialEq)]
pub enum ViewEdit {
    Center(ExtendedComplex),
    /// Moves the center by a complex-plane offset.
    Pan { dx: f64, dy: f64 },
    Zoom(f64),
    /// Scales the zoom width by `factor`, keeping the point at `offset` from the center fixed.
    ZoomAbout { factor: f64, offset: (f64, f64) },
    Rotation(f64),
    FlipX(bool),
    FlipY(bool),
    Ssaa(Ssaa),
    Taa(bool),
    Iterations(u32),
    Bailout(f64),
    Precision(u32),
    Perturbation(bool),
    PaletteOffset(f64),
    Multiplier(f64),
    Transfer(Transfer),
    InsideColor([f32; 3]),
    Smooth(bool),
}

impl ViewEdit {
    /// Lowest stage that must re-run after this edit.
    pub fn stage(&self) -> Stage {
        match self {
            Self::PaletteOffset(_)
            | Self::Multiplier(_)
            | Self::Transfer(_)
            | Self::InsideColor(_)
            | Self::Smooth(_) => Stage::Postprocess,
            _ => Stage::Compute,
        }
    }
}

fn finite(name: &'static str, v: f64) -> Result<f64, ViewError> {
    if v.is_finite() {
        Ok(v)
    } else {
        Err(ViewError::NonFinite(name))
    }
}

impl ViewState {
    /// Applies `edit` and returns the stage it invalidates. A rejected edit leaves the view
    /// untouched.
    pub fn apply(&mut self, edit: ViewEdit) -> Result<Stage, ViewError> {
        let stage = edit.stage();
        match edit {
            ViewEdit::Center(c) => {
                let prec = self.center.prec();
                self.center = c;
                self.center.set_prec(prec);
            }
            ViewEdit::Pan { dx, dy } => {
                self.center
                    .add_offset(finite("pan x", dx)?, finite("pan y", dy)?);
            }
            ViewEdit::Zoom(z) => {
                if !(z.is_finite() && z > 0.0) {
                    return Err(ViewError::Zoom(z));
                }
                self.zoom = z;
            }
            ViewEdit::ZoomAbout { factor, offset } => {
                let next = self.zoom * factor;
                if !(factor.is_finite() && factor > 0.0 && next.is_finite() && next > 0.0) {
                    return Err(ViewError::Zoom(next));
                }
                let (ox, oy) = (finite("offset x", offset.0)?, finite("offset y", offset.1)?);
                self.center.add_offset(ox * (1.0 - factor), oy * (1.0 - factor));
                self.zoom = next;
            }
            ViewEdit::Rotation(r) => {
                self.rotation = finite("rotation", r)?.rem_euclid(std::f64::consts::TAU);
            }
            ViewEdit::FlipX(v) => self.flip_x = v,
            ViewEdit::FlipY(v) => self.flip_y = v,
            ViewEdit::Ssaa(v) => self.ssaa = v,
            ViewEdit::Taa(v) => self.taa = v,
            ViewEdit::Iterations(n) => {
                if n == 0 || n > MAX_ITERATIONS {
                    return Err(ViewError::Iterations(n));
                }
                self.iterations = n;
            }
            ViewEdit::Bailout(b) => {
                if !(b.is_finite() && b > 0.0) {
                    return Err(ViewError::Bailout(b));
                }
                self.bailout = b;
            }
            ViewEdit::Precision(bits) => self.center.set_prec(clamp_precision(bits)),
            ViewEdit::Perturbation(v) => self.perturbation = v,
            ViewEdit::PaletteOffset(v) => {
                self.coloring.palette_offset = finite("palette offset", v)?.rem_euclid(1.0);
            }
            ViewEdit::Multiplier(v) => {
                self.coloring.multiplier = finite("multiplier", v)?.max(1e-3);
            }
            ViewEdit::Transfer(t) => self.coloring.transfer = t,
            ViewEdit::InsideColor(rgb) => self.coloring.inside = rgb,
            ViewEdit::Smooth(v) => self.coloring.smooth = v,
        }
        Ok(stage)
    }

    pub fn precision(&self) -> u32 {
        self.center.prec()
    }

    pub fn viewport(&self, width: usize, height: usize) -> Viewport {
        Viewport {
            width,
            height,
            zoom: self.zoom,
            rotation: self.rotation,
            flip_x: self.flip_x,
            flip_y: self.flip_y,
        }
    }
}

/// Pixel grid to complex-plane offset mapping (relative to the view center).
///
/// Pixel size is `zoom / width`, `y` grows upward in the plane, flips apply before rotation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    pub width: usize,
    pub height: usize,
    pub zoom: f64,
    pub rotation: f64,
    pub flip_x: bool,
    pub flip_y: bool,
}

impl Viewport {
    pub fn pixel_size(&self) -> f64 {
        self.zoom / self.width.max(1) as f64
    }

    /// Offset of continuous pixel position `(x, y)`; pixel centers sit at `i + 0.5`.
    pub fn offset(&self, x: f64, y: f64) -> (f64, f64) {
        let s = self.pixel_size();
        let mut px = (x - 0.5 * self.width as f64) * s;
        let mut py = (0.5 * self.height as f64 - y) * s;
        if self.flip_x {
            px = -px;
        }
        if self.flip_y {
            py = -py;
        }
        let (sin, cos) = self.rotation.sin_cos();
        (px * cos - py * sin, px * sin + py * cos)
    }

    #[inline]
    pub fn sample_offset(&self, ix: usize, iy: usize, jitter: (f64, f64)) -> (f64, f64) {
        self.offset(ix as f64 + 0.5 + jitter.0, iy as f64 + 0.5 + jitter.1)
    }

    /// Inverse of [`Viewport::offset`].
    pub fn to_pixel(&self, dx: f64, dy: f64) -> (f64, f64) {
        let (sin, cos) = self.rotation.sin_cos();
        let mut px = dx * cos + dy * sin;
        let mut py = -dx * sin + dy * cos;
        if self.flip_x {
            px = -px;
        }
        if self.flip_y {
            py = -py;
        }
        let s = self.pixel_size();
        (px / s + 0.5 * self.width as f64, 0.5 * self.height as f64 - py / s)
    }
}
