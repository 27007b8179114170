use crate::kernel::Backend;
use crate::precision::DEFAULT_PRECISION;
use crate::view::Transfer;
use clap::{Parser, ValueEnum};
use std::path::PathBuf;

#[derive(Parser, Debug, Clone)]
#[command(name = "deepbrot", version, about = "Deep-zoom escape-time fractal explorer for the terminal")]
pub struct Config {
    #[arg(long, value_enum, default_value_t = RendererMode::HalfBlock)]
    pub renderer: RendererMode,

    #[arg(long, default_value_t = 30)]
    pub fps: u32,

    /// Evaluation backend for the COMPUTE stage.
    #[arg(long, value_enum, default_value_t = Backend::Cpu)]
    pub engine: Backend,

    /// Fractal to start with (name, case-insensitive; spaces may be written as dashes).
    #[arg(long, default_value = "mandelbrot")]
    pub fractal: String,

    #[arg(long, default_value_t = 256)]
    pub iterations: u32,

    /// Bits of precision for the view center.
    #[arg(long, default_value_t = DEFAULT_PRECISION)]
    pub precision: u32,

    #[arg(long, default_value_t = 1, value_parser = parse_ssaa)]
    pub ssaa: u32,

    #[arg(long, default_value_t = false)]
    pub taa: bool,

    #[arg(long, default_value_t = false)]
    pub perturbation: bool,

    #[arg(long, value_enum, default_value_t = TransferArg::Sqrt)]
    pub transfer: TransferArg,

    /// Palette file: little-endian (r, g, b, position) f32 records.
    #[arg(long, value_name = "FILE")]
    pub palette: Option<PathBuf>,

    /// Location file loaded at startup and written by `l`.
    #[arg(long, value_name = "FILE", default_value = "deepbrot.loc")]
    pub location: PathBuf,

    /// Formula file for the Custom fractal; reloaded with `u`.
    #[arg(long, value_name = "FILE")]
    pub formula: Option<PathBuf>,

    /// Directory for exported zoom sequences.
    #[arg(long, value_name = "DIR", default_value = ".")]
    pub export_dir: PathBuf,

    #[arg(long, default_value_t = 10.0)]
    pub export_seconds: f64,

    #[arg(long, default_value_t = 640)]
    pub export_width: usize,

    #[arg(long, default_value_t = 360)]
    pub export_height: usize,

    #[arg(long, default_value_t = 30)]
    pub export_fps: u32,

    /// Smoothstep easing for exported zooms.
    #[arg(long, default_value_t = false)]
    pub export_ease: bool,

    #[arg(long, default_value_t = false)]
    pub mute: bool,

    /// Disable audio output entirely.
    #[arg(long, default_value_t = false)]
    pub no_audio: bool,

    /// Write logs to this file (the terminal is owned by the UI).
    #[arg(long, value_name = "FILE")]
    pub log_file: Option<PathBuf>,

    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    pub sync_updates: bool,
}

pub fn parse_ssaa(s: &str) -> Result<u32, String> {
    match s.trim().parse::<u32>() {
        Ok(v @ (1 | 2 | 4 | 8)) => Ok(v),
        Ok(v) => Err(format!("supersampling factor must be 1, 2, 4 or 8 (got {v})")),
        Err(e) => Err(e.to_string()),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum RendererMode {
    #[value(name = "half-block", alias = "halfblock", alias = "half_block", alias = "hb")]
    HalfBlock,
    Kitty,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum TransferArg {
    Linear,
    Sqrt,
    Log,
    Cbrt,
}

impl From<TransferArg> for Transfer {
    fn from(v: TransferArg) -> Self {
        match v {
            TransferArg::Linear => Self::Linear,
            TransferArg::Sqrt => Self::Sqrt,
            TransferArg::Log => Self::Log,
            TransferArg::Cbrt => Self::Cbrt,
        }
    }
}
