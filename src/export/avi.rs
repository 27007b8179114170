//! Uncompressed RGB24 AVI (RIFF) container.
//!
//! Layout: `RIFF 'AVI '` > `LIST 'hdrl'` (`avih`, `LIST 'strl'` (`strh`, `strf`)) >
//! `LIST 'movi'` of `00db` frame chunks > `idx1` with one `(offset, size)` entry per frame.
//! Frame count and chunk sizes are backpatched by [`AviWriter::finish`].

use super::ExportError;
use std::io::{Seek, SeekFrom, Write};

const AVIF_HASINDEX: u32 = 0x10;
const AVIIF_KEYFRAME: u32 = 0x10;
const FRAME_CHUNK: &[u8; 4] = b"00db";

const AVIH_LEN: u32 = 56;
const STRH_LEN: u32 = 56;
const STRF_LEN: u32 = 40;
const STRL_LEN: u32 = 4 + (8 + STRH_LEN) + (8 + STRF_LEN);
const HDRL_LEN: u32 = 4 + (8 + AVIH_LEN) + (8 + STRL_LEN);

const RIFF_SIZE_AT: u64 = 4;
const AVIH_TOTAL_FRAMES_AT: u64 = 24 + 8 + 16;
const STRH_LENGTH_AT: u64 = 100 + 8 + 32;
const MOVI_SIZE_AT: u64 = 12 + 8 + HDRL_LEN as u64 + 4;
/// Position of the `movi` fourcc; index offsets are relative to it.
const MOVI_FOURCC_AT: u64 = MOVI_SIZE_AT + 4;

/// Largest file whose RIFF size field (file length minus 8) still fits in 32 bits.
pub const MAX_FILE_BYTES: u64 = u32::MAX as u64 + 8;
/// `00db` header plus the `idx1` entry each frame adds.
const PER_FRAME_OVERHEAD: u64 = 8 + 16;

/// Bytes per stored row: BGR24 padded to a multiple of 4.
pub fn row_stride(width: usize) -> usize {
    (width * 3 + 3) & !3
}

/// Total file length for `frames` frames of `width`x`height`.
pub fn projected_len(width: usize, height: usize, frames: u64) -> u64 {
    let frame_bytes = (row_stride(width) as u64).saturating_mul(height as u64);
    let per_frame = frame_bytes.saturating_add(PER_FRAME_OVERHEAD);
    (MOVI_FOURCC_AT + 4 + 8).saturating_add(per_frame.saturating_mul(frames))
}

/// Most frames of `width`x`height` that fit in one file.
pub fn max_frames(width: usize, height: usize) -> u64 {
    let frame_bytes = (row_stride(width) as u64).saturating_mul(height as u64);
    MAX_FILE_BYTES.saturating_sub(MOVI_FOURCC_AT + 4 + 8) / frame_bytes.saturating_add(PER_FRAME_OVERHEAD)
}

pub struct AviWriter<W: Write + Seek> {
    out: W,
    width: usize,
    height: usize,
    fps: u32,
    /// `(offset from the movi fourcc, payload size)` per frame.
    index: Vec<(u32, u32)>,
    pos: u64,
    scratch: Vec<u8>,
}

impl<W: Write + Seek> AviWriter<W> {
    /// Writes the header with a zero frame count.
    pub fn new(mut out: W, width: usize, height: usize, fps: u32) -> Result<Self, ExportError> {
        if width == 0 || height == 0 || fps == 0 {
            return Err(ExportError::InvalidSettings(format!(
                "avi needs non-zero size and rate (got {width}x{height} @ {fps})"
            )));
        }
        if projected_len(width, height, 1) > MAX_FILE_BYTES {
            return Err(ExportError::TooLarge { frames: 0 });
        }
        let frame_bytes = (row_stride(width) * height) as u32;
        let mut h = Vec::with_capacity(MOVI_FOURCC_AT as usize + 4);

        h.extend_from_slice(b"RIFF");
        put32(&mut h, 0);
        h.extend_from_slice(b"AVI ");

        h.extend_from_slice(b"LIST");
        put32(&mut h, HDRL_LEN);
        h.extend_from_slice(b"hdrl");

        h.extend_from_slice(b"avih");
        put32(&mut h, AVIH_LEN);
        put32(&mut h, 1_000_000 / fps);
        put32(&mut h, frame_bytes.saturating_mul(fps));
        put32(&mut h, 0);
        put32(&mut h, AVIF_HASINDEX);
        put32(&mut h, 0); // total frames
        put32(&mut h, 0);
        put32(&mut h, 1);
        put32(&mut h, frame_bytes);
        put32(&mut h, width as u32);
        put32(&mut h, height as u32);
        for _ in 0..4 {
            put32(&mut h, 0);
        }

        h.extend_from_slice(b"LIST");
        put32(&mut h, STRL_LEN);
        h.extend_from_slice(b"strl");

        h.extend_from_slice(b"strh");
        put32(&mut h, STRH_LEN);
        h.extend_from_slice(b"vids");
        h.extend_from_slice(b"DIB ");
        put32(&mut h, 0);
        put16(&mut h, 0);
        put16(&mut h, 0);
        put32(&mut h, 0);
        put32(&mut h, 1); // scale
        put32(&mut h, fps); // rate
        put32(&mut h, 0);
        put32(&mut h, 0); // length
        put32(&mut h, frame_bytes);
        put32(&mut h, u32::MAX);
        put32(&mut h, 0);
        put16(&mut h, 0);
        put16(&mut h, 0);
        put16(&mut h, width as u16);
        put16(&mut h, height as u16);

        h.extend_from_slice(b"strf");
        put32(&mut h, STRF_LEN);
        put32(&mut h, STRF_LEN);
        put32(&mut h, width as u32);
        put32(&mut h, height as u32); // positive: rows stored bottom-up
        put16(&mut h, 1);
        put16(&mut h, 24);
        put32(&mut h, 0);
        put32(&mut h, frame_bytes);
        for _ in 0..4 {
            put32(&mut h, 0);
        }

        h.extend_from_slice(b"LIST");
        put32(&mut h, 4);
        h.extend_from_slice(b"movi");
        debug_assert_eq!(h.len() as u64, MOVI_FOURCC_AT + 4);

        out.write_all(&h)?;
        Ok(Self {
            out,
            width,
            height,
            fps,
            index: Vec::new(),
            pos: h.len() as u64,
            scratch: vec![0; frame_bytes as usize],
        })
    }

    pub fn frames(&self) -> usize {
        self.index.len()
    }

    pub fn fps(&self) -> u32 {
        self.fps
    }

    /// Appends one frame given as packed top-down RGB24.
    pub fn write_frame(&mut self, rgb: &[u8]) -> Result<(), ExportError> {
        let expected = self.width * self.height * 3;
        if rgb.len() != expected {
            return Err(ExportError::FrameSize {
                expected,
                found: rgb.len(),
            });
        }
        let size = self.scratch.len() as u64;
        let end = self.pos + 8 + size + 8 + 16 * (self.index.len() as u64 + 1);
        if end > MAX_FILE_BYTES {
            return Err(ExportError::TooLarge {
                frames: self.index.len(),
            });
        }
        let stride = row_stride(self.width);
        for (y, src) in rgb.chunks_exact(self.width * 3).enumerate() {
            let row = &mut self.scratch[(self.height - 1 - y) * stride..][..stride];
            for (dst, px) in row.chunks_exact_mut(3).zip(src.chunks_exact(3)) {
                dst[0] = px[2];
                dst[1] = px[1];
                dst[2] = px[0];
            }
        }
        let size = size as u32;
        let offset = (self.pos - MOVI_FOURCC_AT) as u32;
        self.out.write_all(FRAME_CHUNK)?;
        self.out.write_all(&size.to_le_bytes())?;
        self.out.write_all(&self.scratch)?;
        self.pos += 8 + u64::from(size);
        self.index.push((offset, size));
        Ok(())
    }

    /// Writes the index, backpatches counts and sizes, and returns the sink.
    pub fn finish(mut self) -> Result<W, ExportError> {
        let movi_len = (self.pos - MOVI_FOURCC_AT) as u32;
        let mut idx = Vec::with_capacity(8 + 16 * self.index.len());
        idx.extend_from_slice(b"idx1");
        put32(&mut idx, (16 * self.index.len()) as u32);
        for &(offset, size) in &self.index {
            idx.extend_from_slice(FRAME_CHUNK);
            put32(&mut idx, AVIIF_KEYFRAME);
            put32(&mut idx, offset);
            put32(&mut idx, size);
        }
        self.out.write_all(&idx)?;
        let end = self.pos + idx.len() as u64;

        let frames = self.index.len() as u32;
        self.patch(RIFF_SIZE_AT, (end - 8) as u32)?;
        self.patch(AVIH_TOTAL_FRAMES_AT, frames)?;
        self.patch(STRH_LENGTH_AT, frames)?;
        self.patch(MOVI_SIZE_AT, movi_len)?;
        self.out.seek(SeekFrom::Start(end))?;
        self.out.flush()?;
        Ok(self.out)
    }

    fn patch(&mut self, at: u64, value: u32) -> Result<(), ExportError> {
        self.out.seek(SeekFrom::Start(at))?;
        self.out.write_all(&value.to_le_bytes())?;
        Ok(())
    }
}

fn put32(buf: &mut Vec<u8>, v: u32) {
    buf.extend_from_slice(&v.to_le_bytes());
}

fn put16(buf: &mut Vec<u8>, v: u16) {
    buf.extend_from_slice(&v.to_le_bytes());
}

/// Parsed container, frames converted back to top-down RGB24.
#[derive(Debug, Clone, PartialEq)]
pub struct AviFile {
    pub width: usize,
    pub height: usize,
    pub fps: u32,
    pub total_frames: u32,
    pub index: Vec<(u32, u32)>,
    pub frames: Vec<Vec<u8>>,
}

fn le32(bytes: &[u8], at: usize) -> Result<u32, ExportError> {
    bytes
        .get(at..at + 4)
        .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .ok_or_else(|| ExportError::Malformed(format!("truncated at byte {at}")))
}

/// Reads a file produced by [`AviWriter`]; frames are located through `idx1`.
pub fn read_avi(bytes: &[u8]) -> Result<AviFile, ExportError> {
    if bytes.len() < 12 || &bytes[0..4] != b"RIFF" || &bytes[8..12] != b"AVI " {
        return Err(ExportError::Malformed("not a RIFF/AVI file".into()));
    }

    let mut avih: Option<usize> = None;
    let mut strh: Option<usize> = None;
    let mut movi: Option<usize> = None;
    let mut idx1: Option<(usize, usize)> = None;

    // Walk top-level chunks, descending into hdrl/strl lists.
    let mut stack = vec![(12usize, bytes.len())];
    while let Some((mut pos, end)) = stack.pop() {
        while pos + 8 <= end {
            let id = &bytes[pos..pos + 4];
            let size = le32(bytes, pos + 4)? as usize;
            let start = pos + 8;
            let stop = start.saturating_add(size);
            if stop > end {
                return Err(ExportError::Malformed(format!(
                    "chunk {} overruns its parent",
                    String::from_utf8_lossy(id)
                )));
            }
            match id {
                b"LIST" if size >= 4 => match &bytes[start..start + 4] {
                    b"hdrl" | b"strl" => stack.push((start + 4, stop)),
                    b"movi" => movi = Some(start),
                    _ => {}
                },
                b"avih" => avih = Some(start),
                b"strh" if strh.is_none() => strh = Some(start),
                b"idx1" => idx1 = Some((start, size)),
                _ => {}
            }
            pos = stop + (size % 2);
        }
    }

    let avih = avih.ok_or_else(|| ExportError::Malformed("missing avih".into()))?;
    let strh = strh.ok_or_else(|| ExportError::Malformed("missing strh".into()))?;
    let movi = movi.ok_or_else(|| ExportError::Malformed("missing movi list".into()))?;
    let (idx_start, idx_len) = idx1.ok_or_else(|| ExportError::Malformed("missing idx1".into()))?;

    let total_frames = le32(bytes, avih + 16)?;
    let width = le32(bytes, avih + 32)? as usize;
    let height = le32(bytes, avih + 36)? as usize;
    let scale = le32(bytes, strh + 20)?.max(1);
    let fps = le32(bytes, strh + 24)? / scale;

    let stride = row_stride(width);
    let mut index = Vec::with_capacity(idx_len / 16);
    let mut frames = Vec::with_capacity(idx_len / 16);
    for entry in bytes[idx_start..idx_start + idx_len].chunks_exact(16) {
        let offset = le32(entry, 8)?;
        let size = le32(entry, 12)?;
        index.push((offset, size));
        let data_at = movi + offset as usize + 8;
        let data = bytes
            .get(data_at..data_at + size as usize)
            .ok_or_else(|| ExportError::Malformed(format!("frame at offset {offset} out of range")))?;
        if size as usize != stride * height {
            return Err(ExportError::FrameSize {
                expected: stride * height,
                found: size as usize,
            });
        }
        let mut rgb = Vec::with_capacity(width * height * 3);
        for y in (0..height).rev() {
            for px in data[y * stride..y * stride + width * 3].chunks_exact(3) {
                rgb.extend_from_slice(&[px[2], px[1], px[0]]);
            }
        }
        frames.push(rgb);
    }

    Ok(AviFile {
        width,
        height,
        fps,
        total_frames,
        index,
        frames,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    /// Counts bytes without storing them.
    #[derive(Default)]
    struct CountingSink {
        pos: u64,
        len: u64,
    }

    impl Write for CountingSink {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.pos += buf.len() as u64;
            self.len = self.len.max(self.pos);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl Seek for CountingSink {
        fn seek(&mut self, to: SeekFrom) -> io::Result<u64> {
            self.pos = match to {
                SeekFrom::Start(p) => p,
                SeekFrom::End(d) => self.len.saturating_add_signed(d),
                SeekFrom::Current(d) => self.pos.saturating_add_signed(d),
            };
            Ok(self.pos)
        }
    }

    #[test]
    fn frame_that_would_pass_4gib_is_refused_before_writing() {
        // 2x1 frames store 8 bytes; each frame costs 8 + 8 + 16 in the file.
        let mut w = AviWriter::new(CountingSink::default(), 2, 1, 30).unwrap();
        let rgb = [0u8; 6];
        w.pos = MAX_FILE_BYTES - 8 - 8 - 8 - 16;
        w.write_frame(&rgb).unwrap();
        let written = w.out.len;

        assert!(matches!(w.write_frame(&rgb), Err(ExportError::TooLarge { frames: 1 })));
        assert_eq!(w.out.len, written);
        assert_eq!(w.frames(), 1);
    }

    #[test]
    fn projected_length_matches_a_real_file() {
        let mut w = AviWriter::new(CountingSink::default(), 5, 3, 10).unwrap();
        for _ in 0..4 {
            w.write_frame(&[7u8; 45]).unwrap();
        }
        let sink = w.finish().unwrap();
        assert_eq!(sink.len, projected_len(5, 3, 4));
    }

    #[test]
    fn max_frames_is_the_last_count_that_fits() {
        let n = max_frames(1920, 1080);
        assert!(projected_len(1920, 1080, n) <= MAX_FILE_BYTES);
        assert!(projected_len(1920, 1080, n + 1) > MAX_FILE_BYTES);
    }

    #[test]
    fn oversized_frame_is_rejected_up_front() {
        assert!(matches!(
            AviWriter::new(CountingSink::default(), 40_000, 40_000, 30),
            Err(ExportError::TooLarge { frames: 0 })
        ));
    }
}
