use deepbrot::config::RendererMode;
use deepbrot::pipeline::surface::DisplaySurface;
use deepbrot::render::{
    blit_inset, cell_pixels, create_renderer, draw_trail, write_hud, Corner, Frame, HalfBlockRenderer, KittyRenderer,
    Renderer,
};

/// Build a solid-color RGBA pixel buffer.
fn solid_pixels(w: usize, h: usize, r: u8, g: u8, b: u8) -> Vec<u8> {
    let mut buf = vec![0u8; w * h * 4];
    for px in buf.chunks_exact_mut(4) {
        px.copy_from_slice(&[r, g, b, 255]);
    }
    buf
}

fn gradient_pixels(w: usize, h: usize) -> Vec<u8> {
    let mut buf = vec![0u8; w * h * 4];
    for y in 0..h {
        for x in 0..w {
            let i = (y * w + x) * 4;
            let t = (x as f32 / w.max(1) as f32 * 255.0) as u8;
            buf[i..i + 4].copy_from_slice(&[t, 128, 255 - t, 255]);
        }
    }
    buf
}

fn make_frame<'a>(cols: u16, visual_rows: u16, pw: usize, ph: usize, pixels: &'a [u8], sync: bool) -> Frame<'a> {
    Frame {
        term_cols: cols,
        term_rows: visual_rows + 2,
        visual_rows,
        pixel_width: pw,
        pixel_height: ph,
        pixels_rgba: pixels,
        hud: "Mandelbrot | zoom 3.50e0 | iter 256\nC 1.2ms P 0.3ms R 0.8ms",
        hud_rows: 2,
        diagnostic: None,
        overlay: None,
        sync_updates: sync,
    }
}

// ── HalfBlock renderer ──────────────────────────────────────────────────────

#[test]
fn halfblock_renders_gradient_frame() {
    let (cols, rows) = (8u16, 4u16);
    let (pw, ph) = (cols as usize, rows as usize * 2);
    let pixels = gradient_pixels(pw, ph);
    let frame = make_frame(cols, rows, pw, ph, &pixels, true);
    let mut out = Vec::new();
    HalfBlockRenderer::new().render(&frame, &mut out).unwrap();
    let s = String::from_utf8_lossy(&out);
    assert!(s.contains("\x1b[?2026h"), "missing sync-begin");
    assert!(s.contains("\x1b[?2026l"), "missing sync-end");
    assert_eq!(s.matches('\u{2580}').count(), 32);
    assert!(s.contains("38;2;"), "missing FG escape");
    assert!(s.contains("48;2;"), "missing BG escape");
    assert!(s.contains("iter 256"), "HUD line missing");
}

#[test]
fn halfblock_skips_dimension_mismatch() {
    // pixel_height should be visual_rows * 2.
    let pixels = solid_pixels(4, 4, 100, 100, 100);
    let frame = make_frame(4, 4, 4, 4, &pixels, false);
    let mut out = Vec::new();
    HalfBlockRenderer::new().render(&frame, &mut out).unwrap();
    assert!(out.is_empty(), "expected empty output for dimension mismatch");
}

#[test]
fn halfblock_resets_color_cache_each_frame() {
    let mut renderer = HalfBlockRenderer::new();

    let red = solid_pixels(4, 4, 255, 0, 0);
    let mut out = Vec::new();
    renderer.render(&make_frame(4, 2, 4, 4, &red, false), &mut out).unwrap();
    let s = String::from_utf8_lossy(&out);
    // One color change for a solid frame.
    assert_eq!(s.matches("38;2;255;0;0").count(), 1);

    let blue = solid_pixels(4, 4, 0, 0, 255);
    let mut out = Vec::new();
    renderer.render(&make_frame(4, 2, 4, 4, &blue, false), &mut out).unwrap();
    assert!(String::from_utf8_lossy(&out).contains("38;2;0;0;255"));
}

#[test]
fn diagnostic_replaces_last_hud_row() {
    let pixels = solid_pixels(60, 4, 10, 10, 10);
    let mut frame = make_frame(60, 2, 60, 4, &pixels, false);
    frame.diagnostic = Some("iterate: unknown identifier 'q'");
    let mut out = Vec::new();
    HalfBlockRenderer::new().render(&frame, &mut out).unwrap();
    let s = String::from_utf8_lossy(&out);
    assert!(s.contains("error: iterate: unknown"));
    assert!(s.contains("Mandelbrot"));
    assert!(!s.contains("C 1.2ms"));
}

#[test]
fn overlay_popup_is_drawn_over_the_image() {
    let (cols, rows) = (40u16, 10u16);
    let pixels = solid_pixels(40, 20, 50, 50, 50);
    let mut frame = make_frame(cols, rows, 40, 20, &pixels, false);
    frame.overlay = Some("Keys\n+/- zoom");
    let mut out = Vec::new();
    HalfBlockRenderer::new().render(&frame, &mut out).unwrap();
    let s = String::from_utf8_lossy(&out);
    assert!(s.contains("Keys"));
    assert!(s.contains("+/- zoom"));
}

// ── Kitty renderer ──────────────────────────────────────────────────────────

#[test]
fn kitty_transmits_image_in_chunks() {
    let (cols, rows) = (10u16, 4u16);
    let (pw, ph) = (40, 32);
    let pixels = gradient_pixels(pw, ph);
    let frame = make_frame(cols, rows, pw, ph, &pixels, false);
    let mut out = Vec::new();
    KittyRenderer::new().render(&frame, &mut out).unwrap();
    let s = String::from_utf8_lossy(&out);
    assert!(s.contains("\x1b_Ga=T,f=32,s=40,v=32"));
    assert!(s.contains(",c=10,r=4,"));
    // 40 * 32 * 4 = 5120 raw bytes -> two chunks.
    assert_eq!(s.matches("\x1b_G").count(), 2);
    assert!(s.contains("m=1;"));
    assert!(s.contains("\x1b_Gm=0;"));
    assert!(s.contains("iter 256"));
}

#[test]
fn kitty_overlay_deletes_the_image() {
    let pixels = solid_pixels(40, 32, 1, 2, 3);
    let mut frame = make_frame(40, 8, 40, 32, &pixels, false);
    frame.overlay = Some("Help\nq quit");
    let mut out = Vec::new();
    KittyRenderer::new().render(&frame, &mut out).unwrap();
    let s = String::from_utf8_lossy(&out);
    assert!(s.contains("a=d,d=I,i=1"));
    assert!(!s.contains("a=T"));
    assert!(s.contains("q quit"));
}

#[test]
fn renderer_selection_and_cell_geometry() {
    assert_eq!(create_renderer(RendererMode::HalfBlock).name(), "halfblock");
    assert_eq!(create_renderer(RendererMode::Kitty).name(), "kitty");
    assert_eq!(cell_pixels(RendererMode::HalfBlock), (1, 2));
    assert_eq!(cell_pixels(RendererMode::Kitty), (4, 8));
}

// ── HUD and overlays on the pixel buffer ────────────────────────────────────

#[test]
fn hud_lines_are_truncated_to_width() {
    let mut out = Vec::new();
    write_hud(&mut out, 5, 6, 2, "abcdefghij\nxy", None).unwrap();
    let s = String::from_utf8_lossy(&out);
    assert!(s.contains("\x1b[5;1H"));
    assert!(s.contains("\x1b[6;1H"));
    assert!(s.contains("abcdef"));
    assert!(!s.contains("abcdefg"));
    assert!(s.contains("xy"));
}

#[test]
fn trail_is_clipped_to_the_image() {
    let (w, h) = (16, 16);
    let mut rgba = vec![0u8; w * h * 4];
    draw_trail(&mut rgba, w, h, &[(2.5, 2.5), (12.5, 2.5), (40.0, 40.0), (f64::NAN, 1.0)], [255, 0, 0]);
    // Marker at the seed is white.
    assert_eq!(&rgba[(2 * w + 2) * 4..][..4], &[255, 255, 255, 255]);
    assert_eq!(&rgba[(2 * w + 8) * 4..][..3], &[255, 0, 0]);
    assert_eq!(&rgba[(15 * w + 15) * 4..][..4], &[0, 0, 0, 0]);
}

#[test]
fn julia_inset_lands_in_the_requested_corner() {
    let (w, h) = (20, 12);
    let mut rgba = vec![0u8; w * h * 4];
    let mut inset = DisplaySurface::default();
    inset.resize(5, 4);
    inset.rgba = solid_pixels(5, 4, 0, 200, 0);

    assert_eq!(blit_inset(&mut rgba, w, h, &inset, Corner::TopRight), Some((14, 1)));
    assert_eq!(&rgba[(w + 14) * 4..][..4], &[0, 200, 0, 255]);
    // Border column left of the inset.
    assert_eq!(&rgba[(w + 13) * 4..][..3], &[200, 200, 210]);

    let mut rgba = vec![0u8; w * h * 4];
    assert_eq!(blit_inset(&mut rgba, w, h, &inset, Corner::BottomLeft), Some((1, 7)));
}
