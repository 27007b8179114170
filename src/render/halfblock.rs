use crate::render::{draw_overlay_popup, write_hud, Frame, Renderer};
use std::io::Write;

/// Two image rows per cell: `▀` with the top pixel as foreground and the bottom as background.
pub struct HalfBlockRenderer {
    last_fg: Option<[u8; 3]>,
    last_bg: Option<[u8; 3]>,
}

impl HalfBlockRenderer {
    pub fn new() -> Self {
        Self {
            last_fg: None,
            last_bg: None,
        }
    }
}

impl Default for HalfBlockRenderer {
    fn default() -> Self {
        Self::new()
    }
}

impl Renderer for HalfBlockRenderer {
    fn name(&self) -> &'static str {
        "halfblock"
    }

    fn render(&mut self, frame: &Frame<'_>, out: &mut dyn Write) -> anyhow::Result<()> {
        let cols = frame.term_cols as usize;
        let visual_rows = frame.visual_rows as usize;
        let w = frame.pixel_width;
        let h = frame.pixel_height;

        if cols == 0 || visual_rows == 0 || w == 0 || h == 0 {
            return Ok(());
        }
        // Mid-resize: the surface has not caught up with the terminal yet.
        if w != cols || h != visual_rows * 2 || frame.pixels_rgba.len() < w * h * 4 {
            return Ok(());
        }

        if frame.sync_updates {
            out.write_all(b"\x1b[?2026h")?;
        }
        out.write_all(b"\x1b[H\x1b[0m\x1b[?7l")?;
        self.last_fg = None;
        self.last_bg = None;

        let px = |x: usize, y: usize| {
            let i = (y * w + x) * 4;
            [frame.pixels_rgba[i], frame.pixels_rgba[i + 1], frame.pixels_rgba[i + 2]]
        };
        for row in 0..visual_rows {
            for x in 0..cols {
                let top = px(x, row * 2);
                let bottom = px(x, row * 2 + 1);
                if self.last_fg != Some(top) {
                    write!(out, "\x1b[38;2;{};{};{}m", top[0], top[1], top[2])?;
                    self.last_fg = Some(top);
                }
                if self.last_bg != Some(bottom) {
                    write!(out, "\x1b[48;2;{};{};{}m", bottom[0], bottom[1], bottom[2])?;
                    self.last_bg = Some(bottom);
                }
                out.write_all("\u{2580}".as_bytes())?;
            }
            out.write_all(b"\r\n")?;
        }

        write_hud(
            out,
            visual_rows + 1,
            cols,
            frame.hud_rows as usize,
            frame.hud,
            frame.diagnostic,
        )?;
        if let Some(text) = frame.overlay {
            draw_overlay_popup(out, frame.term_cols, frame.term_rows, text)?;
        }

        out.write_all(b"\x1b[?7h")?;
        if frame.sync_updates {
            out.write_all(b"\x1b[?2026l")?;
        }
        out.flush()?;
        Ok(())
    }
}
