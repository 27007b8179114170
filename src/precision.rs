use num_complex::Complex64;
use rug::{Complex, Float};
use std::fmt;

pub const MIN_PRECISION: u32 = 53;
pub const MAX_PRECISION: u32 = 4096;
pub const DEFAULT_PRECISION: u32 = 128;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PrecisionError {
    #[error("invalid {axis} coordinate '{text}': {message}")]
    Parse {
        axis: &'static str,
        text: String,
        message: String,
    },
}

pub fn clamp_precision(bits: u32) -> u32 {
    bits.clamp(MIN_PRECISION, MAX_PRECISION)
}

/// Bits needed to resolve individual pixels at `width`, plus guard bits.
pub fn precision_for_zoom(width: f64) -> u32 {
    if !(width.is_finite() && width > 0.0) {
        return MAX_PRECISION;
    }
    let needed = (-width.log2()).ceil().max(0.0) as u32;
    clamp_precision(needed.saturating_add(64))
}

/// Arbitrary-precision complex value. Every operation keeps the receiver's
/// configured precision; only [`ExtendedComplex::set_prec`] changes it.
#[derive(Clone, PartialEq)]
pub struct ExtendedComplex {
    value: Complex,
}

impl ExtendedComplex {
    pub fn new(prec: u32, re: f64, im: f64) -> Self {
        Self {
            value: Complex::with_val(clamp_precision(prec), (re, im)),
        }
    }

    pub fn zero(prec: u32) -> Self {
        Self::new(prec, 0.0, 0.0)
    }

    pub fn parse(prec: u32, re: &str, im: &str) -> Result<Self, PrecisionError> {
        let prec = clamp_precision(prec);
        let re = parse_float(prec, re, "real")?;
        let im = parse_float(prec, im, "imaginary")?;
        Ok(Self {
            value: Complex::with_val(prec, (re, im)),
        })
    }

    pub fn prec(&self) -> u32 {
        self.value.prec().0
    }

    /// Rescales in place, rounding to nearest when precision is lowered.
    pub fn set_prec(&mut self, bits: u32) {
        self.value.set_prec(clamp_precision(bits));
    }

    pub fn re(&self) -> &Float {
        self.value.real()
    }

    pub fn im(&self) -> &Float {
        self.value.imag()
    }

    pub fn as_complex(&self) -> &Complex {
        &self.value
    }

    /// `self + (dx, dy)` at this value's precision.
    pub fn offset(&self, dx: f64, dy: f64) -> Self {
        let prec = self.prec();
        Self {
            value: Complex::with_val(
                prec,
                (
                    Float::with_val(prec, self.value.real() + dx),
                    Float::with_val(prec, self.value.imag() + dy),
                ),
            ),
        }
    }

    pub fn add_offset(&mut self, dx: f64, dy: f64) {
        *self.value.mut_real() += dx;
        *self.value.mut_imag() += dy;
    }

    /// Absolute coordinate of a pixel: the sum is formed in extended precision and
    /// rounded to machine precision once.
    pub fn offset_to_f64(&self, dx: f64, dy: f64) -> Complex64 {
        let prec = self.prec();
        let re = Float::with_val(prec, self.value.real() + dx);
        let im = Float::with_val(prec, self.value.imag() + dy);
        Complex64::new(re.to_f64(), im.to_f64())
    }

    pub fn to_complex64(&self) -> Complex64 {
        Complex64::new(self.value.real().to_f64(), self.value.imag().to_f64())
    }

    pub fn add(&self, other: &Self) -> Self {
        let prec = self.prec();
        Self {
            value: Complex::with_val(prec, &self.value + &other.value),
        }
    }

    pub fn sub(&self, other: &Self) -> Self {
        let prec = self.prec();
        Self {
            value: Complex::with_val(prec, &self.value - &other.value),
        }
    }

    pub fn mul(&self, other: &Self) -> Self {
        let prec = self.prec();
        Self {
            value: Complex::with_val(prec, &self.value * &other.value),
        }
    }

    pub fn norm_sqr(&self) -> Float {
        let prec = self.prec();
        let mut sum = Float::with_val(prec, self.value.real().square_ref());
        sum += Float::with_val(prec, self.value.imag().square_ref());
        sum
    }

    /// Decimal strings with enough digits to round-trip this precision.
    pub fn to_decimal_strings(&self) -> (String, String) {
        let digits = decimal_digits(self.prec());
        (
            self.value.real().to_string_radix(10, Some(digits)),
            self.value.imag().to_string_radix(10, Some(digits)),
        )
    }
}

impl fmt::Debug for ExtendedComplex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (re, im) = self.to_decimal_strings();
        write!(f, "ExtendedComplex({re}, {im}; {} bits)", self.prec())
    }
}

impl fmt::Display for ExtendedComplex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (re, im) = self.to_decimal_strings();
        if im.starts_with('-') {
            write!(f, "{re} - {}i", &im[1..])
        } else {
            write!(f, "{re} + {im}i")
        }
    }
}

fn parse_float(prec: u32, text: &str, axis: &'static str) -> Result<Float, PrecisionError> {
    let trimmed = text.trim();
    let parsed = Float::parse(trimmed).map_err(|e| PrecisionError::Parse {
        axis,
        text: trimmed.to_string(),
        message: e.to_string(),
    })?;
    Ok(Float::with_val(prec, parsed))
}

fn decimal_digits(bits: u32) -> usize {
    // log10(2) ~= 0.30103
    ((bits as f64) * 0.301_03).ceil() as usize + 2
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn precision_is_clamped() {
        assert_eq!(ExtendedComplex::zero(8).prec(), MIN_PRECISION);
        assert_eq!(ExtendedComplex::zero(1 << 20).prec(), MAX_PRECISION);
    }

    #[test]
    fn offset_keeps_digits_beyond_f64() {
        let base = ExtendedComplex::parse(256, "-1.75000000000000000000000001", "0").unwrap();
        let moved = base.offset(1e-27, 0.0);
        let diff = moved.sub(&base);
        let d = diff.to_complex64();
        assert!((d.re - 1e-27).abs() < 1e-40, "diff = {}", d.re);
        assert_eq!(moved.prec(), 256);
    }

    #[test]
    fn parse_rejects_garbage() {
        let err = ExtendedComplex::parse(128, "1.2.3", "0").unwrap_err();
        assert!(matches!(err, PrecisionError::Parse { axis: "real", .. }));
    }

    #[test]
    fn decimal_strings_round_trip() {
        let v = ExtendedComplex::parse(200, "0.2501", "-0.0000123456789").unwrap();
        let (re, im) = v.to_decimal_strings();
        let back = ExtendedComplex::parse(200, &re, &im).unwrap();
        assert_eq!(back, v);
    }

    #[test]
    fn zoom_precision_grows_with_depth() {
        assert!(precision_for_zoom(1e-40) > precision_for_zoom(1e-10));
        assert_eq!(precision_for_zoom(4.0), 64.max(MIN_PRECISION));
    }
}
