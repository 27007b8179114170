use crate::render::{draw_overlay_popup, write_hud, Frame, Renderer};
use anyhow::Context;
use base64::Engine;
use std::io::Write;

const IMAGE_ID: u32 = 1;
const PLACEMENT_ID: u32 = 1;

/// Kitty graphics protocol, direct (inline base64) transmission scaled to the visual area.
pub struct KittyRenderer {
    b64_buf: Vec<u8>,
    overlay_visible_last: bool,
    last_hud_rows: u16,
}

impl KittyRenderer {
    pub fn new() -> Self {
        Self {
            b64_buf: Vec::new(),
            overlay_visible_last: false,
            last_hud_rows: 0,
        }
    }
}

impl Default for KittyRenderer {
    fn default() -> Self {
        Self::new()
    }
}

impl Renderer for KittyRenderer {
    fn name(&self) -> &'static str {
        "kitty"
    }

    fn render(&mut self, frame: &Frame<'_>, out: &mut dyn Write) -> anyhow::Result<()> {
        let cols = frame.term_cols as usize;
        let visual_rows = frame.visual_rows as usize;
        let w = frame.pixel_width;
        let h = frame.pixel_height;
        if cols == 0 || visual_rows == 0 || w == 0 || h == 0 || frame.pixels_rgba.len() < w * h * 4 {
            return Ok(());
        }

        if frame.sync_updates {
            out.write_all(b"\x1b[?2026h")?;
        }

        if let Some(text) = frame.overlay {
            write!(out, "\x1b_Ga=d,d=I,i={IMAGE_ID}\x1b\\")?;
            clear_rows(out, frame.term_rows as usize)?;
            draw_overlay_popup(out, frame.term_cols, frame.term_rows, text)?;
            self.overlay_visible_last = true;
        } else {
            if self.overlay_visible_last || frame.hud_rows != self.last_hud_rows {
                clear_rows(out, frame.term_rows as usize)?;
            }
            out.write_all(b"\x1b[H")?;
            write_direct(
                out,
                &frame.pixels_rgba[..w * h * 4],
                w,
                h,
                cols,
                visual_rows,
                &mut self.b64_buf,
            )?;
            write_hud(
                out,
                visual_rows + 1,
                cols,
                frame.hud_rows as usize,
                frame.hud,
                frame.diagnostic,
            )?;
            self.overlay_visible_last = false;
        }
        self.last_hud_rows = frame.hud_rows;

        if frame.sync_updates {
            out.write_all(b"\x1b[?2026l")?;
        }
        out.flush()?;
        Ok(())
    }
}

/// Raw bytes per escape sequence; 3072 encodes to exactly 4096 base64 bytes.
const RAW_CHUNK: usize = 3 * 1024;

/// Transmits `rgba` as one image, split into `m=1` continuation chunks.
pub(crate) fn write_direct(
    out: &mut dyn Write,
    rgba: &[u8],
    w: usize,
    h: usize,
    cols: usize,
    rows: usize,
    b64_buf: &mut Vec<u8>,
) -> anyhow::Result<()> {
    let total = rgba.chunks(RAW_CHUNK).count();
    for (i, chunk) in rgba.chunks(RAW_CHUNK).enumerate() {
        let b64_len = chunk.len().div_ceil(3) * 4;
        if b64_buf.len() < b64_len {
            b64_buf.resize(b64_len, 0);
        }
        let written = base64::engine::general_purpose::STANDARD
            .encode_slice(chunk, &mut b64_buf[..b64_len])
            .context("base64 encode pixels")?;
        let more = u8::from(i + 1 < total);
        if i == 0 {
            write!(
                out,
                "\x1b_Ga=T,f=32,s={w},v={h},t=d,i={IMAGE_ID},p={PLACEMENT_ID},c={cols},r={rows},C=1,q=2,z=-1,m={more};"
            )?;
        } else {
            write!(out, "\x1b_Gm={more};")?;
        }
        out.write_all(&b64_buf[..written])?;
        out.write_all(b"\x1b\\")?;
    }
    Ok(())
}

fn clear_rows(out: &mut dyn Write, rows: usize) -> anyhow::Result<()> {
    for row in 1..=rows {
        write!(out, "\x1b[{row};1H\x1b[0m\x1b[2K")?;
    }
    Ok(())
}
