//! Offline zoom sequences: a scripted zoom trajectory pushed frame by frame through the
//! pipeline at an independent resolution and appended to an AVI container.

pub mod avi;
mod schedule;

pub use avi::{read_avi, AviFile, AviWriter};
pub use schedule::{smoothstep, ZoomDirection, ZoomSchedule, BASE_ZOOM};

use crate::palette::Palette;
use crate::pipeline::{FrameInputs, Pipeline, RecordTarget, Stage};
use crate::view::{Ssaa, ViewEdit, ViewState};
use num_complex::Complex64;
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{info, warn};

#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    #[error("invalid export settings: {0}")]
    InvalidSettings(String),
    #[error("cannot open {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("write failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("frame is {found} bytes, expected {expected}")]
    FrameSize { expected: usize, found: usize },
    #[error("avi would exceed 4 GiB after {frames} frames")]
    TooLarge { frames: usize },
    #[error("malformed avi: {0}")]
    Malformed(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExportSettings {
    pub width: usize,
    pub height: usize,
    pub fps: u32,
    /// Seconds.
    pub duration: f64,
    pub ssaa: Ssaa,
    pub ease: bool,
    pub direction: ZoomDirection,
    pub output: PathBuf,
}

impl ExportSettings {
    pub fn validate(&self) -> Result<(), ExportError> {
        if self.width == 0 || self.height == 0 {
            return Err(ExportError::InvalidSettings(format!(
                "size must be non-zero (got {}x{})",
                self.width, self.height
            )));
        }
        if self.fps == 0 {
            return Err(ExportError::InvalidSettings("fps must be >= 1".into()));
        }
        if !(self.duration.is_finite() && self.duration > 0.0) {
            return Err(ExportError::InvalidSettings(format!(
                "duration must be > 0 seconds (got {})",
                self.duration
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExportProgress {
    /// Images written so far.
    pub written: u32,
    pub total: u32,
    pub zoom: f64,
}

impl ExportProgress {
    pub fn done(&self) -> bool {
        self.written >= self.total
    }

    pub fn fraction(&self) -> f32 {
        self.written as f32 / self.total.max(1) as f32
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExportSummary {
    pub frames: u32,
    pub output: PathBuf,
    pub elapsed_ms: u64,
}

/// One running export. Owns a private copy of the view; the interactive view is untouched.
pub struct Exporter {
    settings: ExportSettings,
    schedule: ZoomSchedule,
    view: ViewState,
    writer: AviWriter<BufWriter<File>>,
    written: u32,
    started: Instant,
}

impl Exporter {
    /// Validates the settings and opens the output. Nothing is created on error.
    pub fn start(settings: ExportSettings, view: &ViewState) -> Result<Self, ExportError> {
        settings.validate()?;
        let frames = ZoomSchedule::frames_for(settings.duration, settings.fps);
        let schedule = ZoomSchedule::new(view.zoom, frames, settings.ease, settings.direction)
            .ok_or_else(|| ExportError::InvalidSettings(format!("zoom width {} is not usable", view.zoom)))?;
        let images = u64::from(schedule.image_count());
        let fit = avi::max_frames(settings.width, settings.height);
        if images > fit {
            return Err(ExportError::TooLarge { frames: fit as usize });
        }

        let file = File::create(&settings.output).map_err(|source| ExportError::Open {
            path: settings.output.clone(),
            source,
        })?;
        let writer = match AviWriter::new(BufWriter::new(file), settings.width, settings.height, settings.fps) {
            Ok(w) => w,
            Err(err) => {
                let _ = std::fs::remove_file(&settings.output);
                return Err(err);
            }
        };

        let mut view = view.clone();
        view.taa = false;
        view.ssaa = settings.ssaa;

        info!(
            output = %settings.output.display(),
            width = settings.width,
            height = settings.height,
            fps = settings.fps,
            images = schedule.image_count(),
            target_zoom = view.zoom,
            "export started"
        );
        Ok(Self {
            settings,
            schedule,
            view,
            writer,
            written: 0,
            started: Instant::now(),
        })
    }

    pub fn settings(&self) -> &ExportSettings {
        &self.settings
    }

    pub fn schedule(&self) -> &ZoomSchedule {
        &self.schedule
    }

    pub fn progress(&self) -> ExportProgress {
        ExportProgress {
            written: self.written,
            total: self.schedule.image_count(),
            zoom: self.schedule.zoom_at(self.written),
        }
    }

    /// Renders and appends the next image. Does nothing once every image is written.
    pub fn step(
        &mut self,
        pipeline: &mut Pipeline,
        palette: &Palette,
        slots: &[f64],
        mouse: Complex64,
    ) -> Result<ExportProgress, ExportError> {
        if self.written >= self.schedule.image_count() {
            return Ok(self.progress());
        }
        let zoom = self.schedule.zoom_at(self.written);
        self.view
            .apply(ViewEdit::Zoom(zoom))
            .map_err(|e| ExportError::InvalidSettings(e.to_string()))?;

        pipeline.set_record_target(Some(RecordTarget {
            width: self.settings.width,
            height: self.settings.height,
            ssaa: self.settings.ssaa.factor(),
        }));
        pipeline.force_op(Stage::Compute);
        pipeline.run_frame(&FrameInputs {
            view: &self.view,
            palette,
            slots,
            mouse,
            julia_seed: None,
        });
        self.writer.write_frame(&pipeline.finalize().to_rgb24())?;
        self.written += 1;
        Ok(self.progress())
    }

    /// Closes the container and returns the pipeline to interactive output.
    pub fn finish(self, pipeline: &mut Pipeline) -> Result<ExportSummary, ExportError> {
        restore(pipeline);
        let frames = self.written;
        let output = self.settings.output;
        self.writer.finish()?;
        let elapsed_ms = self.started.elapsed().as_millis() as u64;
        info!(output = %output.display(), frames, elapsed_ms, "export finished");
        Ok(ExportSummary {
            frames,
            output,
            elapsed_ms,
        })
    }

    /// Abandons the export and deletes the partial file.
    pub fn cancel(self, pipeline: &mut Pipeline) {
        restore(pipeline);
        let output = self.settings.output;
        drop(self.writer);
        remove_partial(&output);
        warn!(output = %output.display(), written = self.written, "export cancelled");
    }
}

fn restore(pipeline: &mut Pipeline) {
    pipeline.set_record_target(None);
    pipeline.force_op(Stage::Compute);
}

fn remove_partial(path: &Path) {
    if let Err(err) = std::fs::remove_file(path) {
        warn!(path = %path.display(), error = %err, "could not remove partial export");
    }
}
