use std::path::Path;

pub const MAX_STOPS: usize = 16;
pub const RECORD_BYTES: usize = 16;

#[derive(Debug, thiserror::Error)]
pub enum PaletteError {
    #[error("read palette {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("palette size {0} is not a multiple of {RECORD_BYTES} bytes")]
    Length(usize),
    #[error("palette has {0} entries (max {MAX_STOPS})")]
    TooMany(usize),
    #[error("palette is empty")]
    Empty,
    #[error("palette entry {0} is not finite")]
    NonFinite(usize),
}

/// One gradient stop: linear RGB in `[0, 1]` plus its position along the gradient.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ColorStop {
    pub r: f32,
    pub g: f32,
    pub b: f32,
    pub pos: f32,
}

impl ColorStop {
    pub const fn new(r: f32, g: f32, b: f32, pos: f32) -> Self {
        Self { r, g, b, pos }
    }

    fn rgb(&self) -> [f32; 3] {
        [self.r, self.g, self.b]
    }
}

/// Cyclic gradient used by the colorize stage.
#[derive(Debug, Clone, PartialEq)]
pub struct Palette {
    /// As loaded; file order is preserved for saving.
    stops: Vec<ColorStop>,
    /// Sorted by position for sampling.
    sorted: Vec<ColorStop>,
}

impl Default for Palette {
    fn default() -> Self {
        let stops = vec![
            ColorStop::new(0.0, 0.03, 0.39, 0.0),
            ColorStop::new(0.13, 0.42, 0.8, 0.16),
            ColorStop::new(0.93, 1.0, 1.0, 0.42),
            ColorStop::new(1.0, 0.67, 0.0, 0.64),
            ColorStop::new(0.0, 0.01, 0.0, 0.86),
        ];
        Self::sorted_from(stops)
    }
}

impl Palette {
    fn sorted_from(stops: Vec<ColorStop>) -> Self {
        let mut sorted = stops.clone();
        sorted.sort_by(|a, b| a.pos.total_cmp(&b.pos));
        Self { stops, sorted }
    }

    pub fn from_stops(stops: Vec<ColorStop>) -> Result<Self, PaletteError> {
        if stops.is_empty() {
            return Err(PaletteError::Empty);
        }
        if stops.len() > MAX_STOPS {
            return Err(PaletteError::TooMany(stops.len()));
        }
        if let Some(idx) = stops
            .iter()
            .position(|s| !(s.r.is_finite() && s.g.is_finite() && s.b.is_finite() && s.pos.is_finite()))
        {
            return Err(PaletteError::NonFinite(idx));
        }
        Ok(Self::sorted_from(stops))
    }

    pub fn stops(&self) -> &[ColorStop] {
        &self.stops
    }

    /// Flat little-endian `(r, g, b, pos)` f32 records, no header.
    pub fn decode(bytes: &[u8]) -> Result<Self, PaletteError> {
        if bytes.len() % RECORD_BYTES != 0 {
            return Err(PaletteError::Length(bytes.len()));
        }
        let count = bytes.len() / RECORD_BYTES;
        if count > MAX_STOPS {
            return Err(PaletteError::TooMany(count));
        }
        let stops = bytes
            .chunks_exact(RECORD_BYTES)
            .map(|rec| {
                let f = |i: usize| f32::from_le_bytes([rec[i], rec[i + 1], rec[i + 2], rec[i + 3]]);
                ColorStop::new(f(0), f(4), f(8), f(12))
            })
            .collect();
        Self::from_stops(stops)
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.stops.len() * RECORD_BYTES);
        for s in &self.stops {
            for v in [s.r, s.g, s.b, s.pos] {
                out.extend_from_slice(&v.to_le_bytes());
            }
        }
        out
    }

    pub fn load(path: &Path) -> Result<Self, PaletteError> {
        let bytes = std::fs::read(path).map_err(|source| PaletteError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::decode(&bytes)
    }

    pub fn save(&self, path: &Path) -> Result<(), PaletteError> {
        std::fs::write(path, self.encode()).map_err(|source| PaletteError::Io {
            path: path.display().to_string(),
            source,
        })
    }

    /// Replaces `self` with the file contents; on error `self` is left as it was.
    pub fn replace_from_file(&mut self, path: &Path) -> Result<(), PaletteError> {
        *self = Self::load(path)?;
        Ok(())
    }

    /// Color at gradient position `t`, wrapping around past the last stop.
    pub fn sample(&self, t: f64) -> [f32; 3] {
        let stops = &self.sorted;
        match stops.len() {
            0 => return [0.0; 3],
            1 => return stops[0].rgb(),
            _ => {}
        }
        let t = t.rem_euclid(1.0) as f32;
        let n = stops.len();
        // Find the stop pair bracketing t, treating the list as a ring.
        let hi = stops.iter().position(|s| s.pos > t).unwrap_or(n);
        let (a, b, span, local) = if hi == 0 || hi == n {
            let a = stops[n - 1];
            let b = stops[0];
            let span = (b.pos + 1.0 - a.pos).max(1e-6);
            let local = if t >= a.pos { t - a.pos } else { t + 1.0 - a.pos };
            (a, b, span, local)
        } else {
            let a = stops[hi - 1];
            let b = stops[hi];
            (a, b, (b.pos - a.pos).max(1e-6), t - a.pos)
        };
        let f = (local / span).clamp(0.0, 1.0);
        [
            a.r + (b.r - a.r) * f,
            a.g + (b.g - a.g) * f,
            a.b + (b.b - a.b) * f,
        ]
    }
}
