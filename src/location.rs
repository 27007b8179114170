use crate::pipeline::Stage;
use crate::precision::{ExtendedComplex, PrecisionError};
use crate::view::{ViewEdit, ViewError, ViewState};
use std::path::Path;

const V1_LEN: usize = 8;

#[derive(Debug, thiserror::Error)]
pub enum LocationError {
    #[error("location file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed location file: {0}")]
    Malformed(String),
    #[error(transparent)]
    View(#[from] ViewError),
    #[error(transparent)]
    Center(#[from] PrecisionError),
}

/// Saved center coordinate, kept as decimal strings so no digits are lost.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SavedCenter {
    pub precision: u32,
    pub re: String,
    pub im: String,
}

/// Contents of a location file.
///
/// The short form is the zoom width alone (8-byte little-endian f64). The long form appends
/// the precision (`u32`) and the center as two length-prefixed (`u32`) UTF-8 strings.
#[derive(Debug, Clone, PartialEq)]
pub struct Location {
    pub zoom: f64,
    pub center: Option<SavedCenter>,
}

impl Location {
    pub fn from_view(view: &ViewState) -> Self {
        let (re, im) = view.center.to_decimal_strings();
        Self {
            zoom: view.zoom,
            center: Some(SavedCenter {
                precision: view.precision(),
                re,
                im,
            }),
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = self.zoom.to_le_bytes().to_vec();
        if let Some(c) = &self.center {
            out.extend_from_slice(&c.precision.to_le_bytes());
            for s in [&c.re, &c.im] {
                out.extend_from_slice(&(s.len() as u32).to_le_bytes());
                out.extend_from_slice(s.as_bytes());
            }
        }
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, LocationError> {
        if bytes.len() < V1_LEN {
            return Err(LocationError::Malformed(format!(
                "{} bytes, need at least {V1_LEN}",
                bytes.len()
            )));
        }
        let zoom = f64::from_le_bytes(bytes[..V1_LEN].try_into().map_err(|_| malformed("zoom"))?);
        if bytes.len() == V1_LEN {
            return Ok(Self { zoom, center: None });
        }
        let mut cur = Cursor {
            bytes,
            pos: V1_LEN,
        };
        let precision = cur.u32("precision")?;
        let re = cur.string("real part")?;
        let im = cur.string("imaginary part")?;
        if cur.pos != bytes.len() {
            return Err(LocationError::Malformed(format!(
                "{} trailing bytes",
                bytes.len() - cur.pos
            )));
        }
        Ok(Self {
            zoom,
            center: Some(SavedCenter { precision, re, im }),
        })
    }

    pub fn load(path: &Path) -> Result<Self, LocationError> {
        let bytes = std::fs::read(path).map_err(|source| LocationError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::decode(&bytes)
    }

    pub fn save(&self, path: &Path) -> Result<(), LocationError> {
        std::fs::write(path, self.encode()).map_err(|source| LocationError::Io {
            path: path.display().to_string(),
            source,
        })
    }

    /// Moves `view` to this location. Everything is validated first; on error `view` is
    /// unchanged.
    pub fn apply_to(&self, view: &mut ViewState) -> Result<Stage, LocationError> {
        let mut next = view.clone();
        let mut stage = next.apply(ViewEdit::Zoom(self.zoom))?;
        if let Some(c) = &self.center {
            let center = ExtendedComplex::parse(c.precision, &c.re, &c.im)?;
            next.apply(ViewEdit::Precision(center.prec()))?;
            stage = stage.max(next.apply(ViewEdit::Center(center))?);
        }
        *view = next;
        Ok(stage)
    }
}

fn malformed(what: &str) -> LocationError {
    LocationError::Malformed(format!("truncated {what}"))
}

struct Cursor<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl Cursor<'_> {
    fn take(&mut self, n: usize, what: &str) -> Result<&[u8], LocationError> {
        let end = self.pos.checked_add(n).ok_or_else(|| malformed(what))?;
        let out = self.bytes.get(self.pos..end).ok_or_else(|| malformed(what))?;
        self.pos = end;
        Ok(out)
    }

    fn u32(&mut self, what: &str) -> Result<u32, LocationError> {
        let b = self.take(4, what)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn string(&mut self, what: &str) -> Result<String, LocationError> {
        let len = self.u32(what)? as usize;
        let raw = self.take(len, what)?;
        String::from_utf8(raw.to_vec())
            .map_err(|_| LocationError::Malformed(format!("{what} is not UTF-8")))
    }
}
