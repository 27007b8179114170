mod compose;
mod halfblock;
mod kitty;

pub use compose::{blit_inset, draw_marker, draw_trail, Corner};
pub use halfblock::HalfBlockRenderer;
pub use kitty::KittyRenderer;

use crate::config::RendererMode;
use std::io::Write;

/// One presented terminal frame.
pub struct Frame<'a> {
    pub term_cols: u16,
    pub term_rows: u16,
    /// Rows covered by the image; HUD rows follow.
    pub visual_rows: u16,
    pub pixel_width: usize,
    pub pixel_height: usize,
    pub pixels_rgba: &'a [u8],
    pub hud: &'a str,
    pub hud_rows: u16,
    /// Kernel compile failure, shown on the last HUD row.
    pub diagnostic: Option<&'a str>,
    pub overlay: Option<&'a str>,
    pub sync_updates: bool,
}

pub trait Renderer {
    fn name(&self) -> &'static str;
    fn render(&mut self, frame: &Frame<'_>, out: &mut dyn Write) -> anyhow::Result<()>;
}

pub fn create_renderer(mode: RendererMode) -> Box<dyn Renderer> {
    match mode {
        RendererMode::HalfBlock => Box::new(HalfBlockRenderer::new()),
        RendererMode::Kitty => Box::new(KittyRenderer::new()),
    }
}

/// Image pixels per terminal cell.
pub fn cell_pixels(mode: RendererMode) -> (usize, usize) {
    match mode {
        RendererMode::HalfBlock => (1, 2),
        RendererMode::Kitty => (4, 8),
    }
}

/// Clears `rows` HUD lines starting at 1-based `first_row` and writes `hud` into them. The
/// diagnostic, if any, replaces the last row.
pub fn write_hud(
    out: &mut dyn Write,
    first_row: usize,
    cols: usize,
    rows: usize,
    hud: &str,
    diagnostic: Option<&str>,
) -> anyhow::Result<()> {
    let mut lines = hud.lines();
    for i in 0..rows {
        write!(out, "\x1b[{};1H\x1b[0m\x1b[2K", first_row + i)?;
        let is_last = i + 1 == rows;
        match (is_last, diagnostic) {
            (true, Some(diag)) => {
                let message = format!("error: {diag}");
                let text = truncate_chars(&message, cols);
                write!(out, "\x1b[38;2;255;120;110m{text}\x1b[0m")?;
            }
            _ => {
                if let Some(line) = lines.next() {
                    write!(out, "{}", truncate_chars(line, cols))?;
                }
            }
        }
    }
    Ok(())
}

fn truncate_chars(s: &str, cols: usize) -> &str {
    match s.char_indices().nth(cols) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

/// Centered text box over a dimmed backdrop. The first line is the title.
pub fn draw_overlay_popup(
    out: &mut dyn Write,
    term_cols: u16,
    term_rows: u16,
    text: &str,
) -> anyhow::Result<()> {
    let cols = term_cols as usize;
    let rows = term_rows as usize;
    if text.trim().is_empty() || cols < 8 || rows < 4 {
        return Ok(());
    }

    let max_inner = cols.saturating_sub(6).max(1);
    let lines: Vec<String> = text
        .lines()
        .flat_map(|raw| wrap_chars(raw, max_inner))
        .collect();

    let inner_w = lines
        .iter()
        .map(|l| l.chars().count())
        .max()
        .unwrap_or(0)
        .clamp(1, max_inner);
    let box_w = (inner_w + 4).min(cols.saturating_sub(2)).max(4);
    let inner_w = box_w - 4;
    let body_h = lines.len().min(rows.saturating_sub(3).max(1));
    let box_h = (body_h + 2).min(rows.saturating_sub(1)).max(3);
    let left = (cols - box_w) / 2 + 1;
    let top = (rows.saturating_sub(box_h)) / 2 + 1;

    out.write_all(b"\x1b[0m\x1b[38;2;220;228;242m\x1b[48;2;2;4;10m")?;
    for row in 1..=rows {
        write!(out, "\x1b[{row};1H\x1b[2K")?;
    }

    let edge = "-".repeat(box_w - 2);
    let blank = " ".repeat(inner_w);
    out.write_all(b"\x1b[0m\x1b[38;2;236;242;255m\x1b[48;2;10;14;24m")?;
    write!(out, "\x1b[{top};{left}H+{edge}+")?;
    for (i, line) in lines.iter().take(body_h).enumerate() {
        let row = top + 1 + i;
        write!(out, "\x1b[{row};{left}H| {blank} |")?;
        if i == 0 {
            write!(
                out,
                "\x1b[{row};{}H\x1b[1m\x1b[38;2;255;236;160m{line}\x1b[22m\x1b[38;2;236;242;255m",
                left + 2
            )?;
        } else {
            write!(out, "\x1b[{row};{}H{line}", left + 2)?;
        }
    }
    write!(out, "\x1b[{};{left}H+{edge}+", top + box_h - 1)?;
    out.write_all(b"\x1b[0m")?;
    Ok(())
}

fn wrap_chars(line: &str, width: usize) -> Vec<String> {
    if line.is_empty() {
        return vec![String::new()];
    }
    let chars: Vec<char> = line.chars().collect();
    chars
        .chunks(width.max(1))
        .map(|c| c.iter().collect())
        .collect()
}
