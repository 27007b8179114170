use crate::orbit::OrbitReader;
use anyhow::{anyhow, Context};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, Sample, SampleFormat, SizedSample};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use tracing::{error, info};

/// Orbit points traversed per second of audio.
pub const DEFAULT_POINTS_PER_SECOND: f32 = 2400.0;

/// Peak output level after normalization.
const HEADROOM: f32 = 0.5;
/// Per-sample step of the gain envelope (about 10ms at 48kHz).
const GAIN_STEP: f32 = 1.0 / 480.0;

/// Play/mute and volume shared between the UI and the audio callback.
#[derive(Debug)]
pub struct SonifierControls {
    playing: AtomicBool,
    volume: AtomicU32,
}

impl SonifierControls {
    pub fn new(playing: bool) -> Self {
        Self {
            playing: AtomicBool::new(playing),
            volume: AtomicU32::new(1.0f32.to_bits()),
        }
    }

    pub fn set_playing(&self, on: bool) {
        self.playing.store(on, Ordering::Relaxed);
    }

    pub fn playing(&self) -> bool {
        self.playing.load(Ordering::Relaxed)
    }

    pub fn set_volume(&self, v: f32) {
        let v = if v.is_finite() { v.clamp(0.0, 1.0) } else { 0.0 };
        self.volume.store(v.to_bits(), Ordering::Relaxed);
    }

    pub fn volume(&self) -> f32 {
        f32::from_bits(self.volume.load(Ordering::Relaxed))
    }
}

impl Default for SonifierControls {
    fn default() -> Self {
        Self::new(true)
    }
}

/// Turns the current orbit trail into a stereo waveform: x drives the left channel, y the
/// right, with Catmull-Rom interpolation between consecutive points.
pub struct Sonifier {
    reader: OrbitReader,
    controls: Arc<SonifierControls>,
    step: f32,
    /// Position along the trail, in points.
    phase: f32,
    finished: bool,
    centroid: (f64, f64),
    scale: f64,
    gain: f32,
    generation: u64,
}

impl Sonifier {
    pub fn new(reader: OrbitReader, controls: Arc<SonifierControls>, sample_rate: u32) -> Self {
        Self::with_rate(reader, controls, sample_rate, DEFAULT_POINTS_PER_SECOND)
    }

    pub fn with_rate(
        reader: OrbitReader,
        controls: Arc<SonifierControls>,
        sample_rate: u32,
        points_per_second: f32,
    ) -> Self {
        Self {
            reader,
            controls,
            step: points_per_second / sample_rate.max(1) as f32,
            phase: 0.0,
            finished: true,
            centroid: (0.0, 0.0),
            scale: 0.0,
            gain: 0.0,
            generation: 0,
        }
    }

    /// Generation of the trail being played; 0 before the first publish.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Fills an interleaved stereo block. Checks for a new trail once, at the block start.
    pub fn fill(&mut self, out: &mut [f32]) {
        if self.reader.acquire() {
            self.adopt();
        }
        let target = if self.controls.playing() {
            self.controls.volume()
        } else {
            0.0
        };
        for frame in out.chunks_mut(2) {
            self.gain += (target - self.gain).clamp(-GAIN_STEP, GAIN_STEP);
            let (l, r) = self.next_frame();
            frame[0] = l * self.gain;
            if let Some(right) = frame.get_mut(1) {
                *right = r * self.gain;
            }
        }
    }

    fn adopt(&mut self) {
        let slot = self.reader.front();
        let pts = slot.points();
        self.generation = slot.generation();
        self.phase = 0.0;
        self.finished = pts.is_empty();
        if pts.is_empty() {
            return;
        }
        let n = pts.len() as f64;
        let (sx, sy) = pts.iter().fold((0.0, 0.0), |(x, y), p| (x + p.re, y + p.im));
        self.centroid = (sx / n, sy / n);
        let peak = pts
            .iter()
            .map(|p| (p.re - self.centroid.0).abs().max((p.im - self.centroid.1).abs()))
            .fold(0.0f64, f64::max);
        self.scale = if peak > 1e-12 { f64::from(HEADROOM) / peak } else { 0.0 };
    }

    fn next_frame(&mut self) -> (f32, f32) {
        if self.finished {
            return (0.0, 0.0);
        }
        let slot = self.reader.front();
        let pts = slot.points();
        let len = pts.len();
        let wrap = slot.wrap();

        let i = self.phase.floor() as usize;
        let t = f64::from(self.phase - i as f32);
        let at = |k: isize| -> (f64, f64) {
            let idx = resolve(k, len, wrap);
            let p = pts[idx];
            (
                (p.re - self.centroid.0) * self.scale,
                (p.im - self.centroid.1) * self.scale,
            )
        };
        let i = i as isize;
        let (p0, p1, p2, p3) = (at(i - 1), at(i), at(i + 1), at(i + 2));
        let x = catmull_rom(p0.0, p1.0, p2.0, p3.0, t);
        let y = catmull_rom(p0.1, p1.1, p2.1, p3.1, t);

        self.phase += self.step;
        let end = len as f32;
        if self.phase >= end {
            match wrap {
                Some(w) => {
                    let period = (len - w) as f32;
                    while self.phase >= end {
                        self.phase -= period;
                    }
                }
                None => self.finished = true,
            }
        }
        (x as f32, y as f32)
    }
}

/// Maps a possibly out-of-range point index onto the trail: before the start clamps to 0,
/// past the end follows the periodic tail or clamps to the last point.
fn resolve(k: isize, len: usize, wrap: Option<usize>) -> usize {
    if k < 0 {
        return 0;
    }
    let k = k as usize;
    if k < len {
        return k;
    }
    match wrap {
        Some(w) if w < len => w + (k - w) % (len - w),
        _ => len - 1,
    }
}

/// Cubic Hermite segment between `p1` and `p2` with Catmull-Rom tangents.
pub fn catmull_rom(p0: f64, p1: f64, p2: f64, p3: f64, t: f64) -> f64 {
    let t2 = t * t;
    let t3 = t2 * t;
    0.5 * ((2.0 * p1)
        + (-p0 + p2) * t
        + (2.0 * p0 - 5.0 * p1 + 4.0 * p2 - p3) * t2
        + (-p0 + 3.0 * p1 - 3.0 * p2 + p3) * t3)
}

/// Running output stream; dropping it stops playback.
pub struct AudioOutput {
    _stream: cpal::Stream,
    pub sample_rate_hz: u32,
    pub device_name: String,
}

impl AudioOutput {
    /// Opens the default output device and drives `make_sonifier(sample_rate)` from its
    /// callback.
    pub fn start(make_sonifier: impl FnOnce(u32) -> Sonifier) -> anyhow::Result<Self> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| anyhow!("no default audio output device"))?;
        let device_name = device.name().unwrap_or_else(|_| "<unknown>".to_string());
        let supported = device
            .default_output_config()
            .context("get default output config")?;
        let sample_rate_hz = supported.sample_rate().0;
        let channels = supported.channels() as usize;
        let config: cpal::StreamConfig = supported.clone().into();
        let sonifier = make_sonifier(sample_rate_hz);

        let stream = match supported.sample_format() {
            SampleFormat::F32 => build_stream::<f32>(&device, &config, channels, sonifier)?,
            SampleFormat::I16 => build_stream::<i16>(&device, &config, channels, sonifier)?,
            SampleFormat::U16 => build_stream::<u16>(&device, &config, channels, sonifier)?,
            fmt => return Err(anyhow!("unsupported sample format: {fmt:?}")),
        };
        stream.play().context("start output stream")?;
        info!(device = %device_name, sample_rate_hz, channels, "audio output started");

        Ok(Self {
            _stream: stream,
            sample_rate_hz,
            device_name,
        })
    }
}

/// Largest device buffer rendered without splitting, in stereo frames.
const SCRATCH_FRAMES: usize = 4096;

fn build_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    channels: usize,
    mut sonifier: Sonifier,
) -> anyhow::Result<cpal::Stream>
where
    T: SizedSample + FromSample<f32>,
{
    let mut scratch = vec![0.0f32; SCRATCH_FRAMES * 2];
    let err_fn = |err| error!(error = %err, "audio stream error");
    let stream = device.build_output_stream(
        config,
        move |data: &mut [T], _| write_block(data, channels, &mut sonifier, &mut scratch),
        err_fn,
        None,
    )?;
    Ok(stream)
}

fn write_block<T: Sample + FromSample<f32>>(data: &mut [T], channels: usize, sonifier: &mut Sonifier, scratch: &mut [f32]) {
    let channels = channels.max(1);
    for chunk in data.chunks_mut(SCRATCH_FRAMES * channels) {
        let frames = chunk.len() / channels;
        let stereo = &mut scratch[..frames * 2];
        sonifier.fill(stereo);
        for (dst, src) in chunk.chunks_mut(channels).zip(stereo.chunks(2)) {
            match dst.len() {
                1 => dst[0] = T::from_sample(0.5 * (src[0] + src[1])),
                _ => {
                    dst[0] = T::from_sample(src[0]);
                    dst[1] = T::from_sample(src[1]);
                    for extra in &mut dst[2..] {
                        *extra = T::from_sample(0.0);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catmull_rom_hits_control_points() {
        assert!((catmull_rom(0.0, 1.0, 2.0, 3.0, 0.0) - 1.0).abs() < 1e-12);
        assert!((catmull_rom(0.0, 1.0, 2.0, 3.0, 1.0) - 2.0).abs() < 1e-12);
        assert!((catmull_rom(0.0, 1.0, 2.0, 3.0, 0.5) - 1.5).abs() < 1e-12);
    }

    #[test]
    fn resolve_follows_periodic_tail() {
        assert_eq!(resolve(-1, 5, Some(2)), 0);
        assert_eq!(resolve(5, 5, Some(2)), 2);
        assert_eq!(resolve(6, 5, Some(2)), 3);
        assert_eq!(resolve(8, 5, Some(2)), 2);
        assert_eq!(resolve(9, 5, None), 4);
    }
}
