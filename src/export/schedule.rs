/// Zoom width every exported sequence starts from (or ends at, zooming out).
pub const BASE_ZOOM: f64 = 5.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum ZoomDirection {
    /// From [`BASE_ZOOM`] down to the target width.
    #[default]
    #[value(alias = "in")]
    ZoomIn,
    /// From the target width back out to [`BASE_ZOOM`].
    #[value(alias = "out")]
    ZoomOut,
}

/// Per-frame zoom widths for a sequence of `frames + 1` images (frame `0..=frames`).
///
/// `zoom(i) = base * k^(frames * p(i))` with `k = (target / base)^(1 / frames)`, where `p` is
/// `i / frames` or its smoothstep when easing.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ZoomSchedule {
    base: f64,
    target: f64,
    frames: u32,
    coefficient: f64,
    ease: bool,
    direction: ZoomDirection,
}

impl ZoomSchedule {
    /// `frames` is clamped to at least 1; `target` must be finite and positive.
    pub fn new(target: f64, frames: u32, ease: bool, direction: ZoomDirection) -> Option<Self> {
        Self::with_base(BASE_ZOOM, target, frames, ease, direction)
    }

    pub fn with_base(base: f64, target: f64, frames: u32, ease: bool, direction: ZoomDirection) -> Option<Self> {
        if !(base.is_finite() && base > 0.0 && target.is_finite() && target > 0.0) {
            return None;
        }
        let frames = frames.max(1);
        Some(Self {
            base,
            target,
            frames,
            coefficient: (target / base).powf(1.0 / f64::from(frames)),
            ease,
            direction,
        })
    }

    /// Frame count for `duration` seconds at `fps`, at least 1.
    pub fn frames_for(duration: f64, fps: u32) -> u32 {
        let n = (duration.max(0.0) * f64::from(fps)).round();
        if n.is_finite() { (n as u32).max(1) } else { 1 }
    }

    pub fn frames(&self) -> u32 {
        self.frames
    }

    /// Number of images produced, both endpoints included.
    pub fn image_count(&self) -> u32 {
        self.frames + 1
    }

    pub fn target(&self) -> f64 {
        self.target
    }

    pub fn coefficient(&self) -> f64 {
        self.coefficient
    }

    /// Progress fraction in `[0, 1]` for frame `index`, after easing and direction.
    pub fn progress(&self, index: u32) -> f64 {
        let x = f64::from(index.min(self.frames)) / f64::from(self.frames);
        let x = if self.ease { smoothstep(x) } else { x };
        match self.direction {
            ZoomDirection::ZoomIn => x,
            ZoomDirection::ZoomOut => 1.0 - x,
        }
    }

    pub fn zoom_at(&self, index: u32) -> f64 {
        let p = self.progress(index);
        self.base * self.coefficient.powf(f64::from(self.frames) * p)
    }
}

pub fn smoothstep(x: f64) -> f64 {
    let x = x.clamp(0.0, 1.0);
    x * x * (3.0 - 2.0 * x)
}
