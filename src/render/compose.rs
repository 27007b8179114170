use crate::pipeline::surface::DisplaySurface;

/// Screen corner for the Julia inset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Corner {
    TopLeft,
    TopRight,
    BottomLeft,
    BottomRight,
}

#[inline]
fn put(rgba: &mut [u8], w: usize, h: usize, x: i64, y: i64, rgb: [u8; 3]) {
    if x < 0 || y < 0 || x as usize >= w || y as usize >= h {
        return;
    }
    let i = (y as usize * w + x as usize) * 4;
    rgba[i..i + 3].copy_from_slice(&rgb);
    rgba[i + 3] = 255;
}

/// Connects consecutive points with 1-pixel lines, clipped to the image. Segments with
/// endpoints far outside the image are skipped.
pub fn draw_trail(rgba: &mut [u8], w: usize, h: usize, points: &[(f64, f64)], rgb: [u8; 3]) {
    let limit = 4.0 * (w.max(h) as f64);
    let inside = |p: (f64, f64)| p.0.is_finite() && p.1.is_finite() && p.0.abs() < limit && p.1.abs() < limit;
    for seg in points.windows(2) {
        let (a, b) = (seg[0], seg[1]);
        if !inside(a) || !inside(b) {
            continue;
        }
        line(rgba, w, h, (a.0.floor() as i64, a.1.floor() as i64), (b.0.floor() as i64, b.1.floor() as i64), rgb);
    }
    if let Some(&p) = points.first() {
        if inside(p) {
            draw_marker(rgba, w, h, p, [255, 255, 255]);
        }
    }
}

/// Small plus sign centered on `p`.
pub fn draw_marker(rgba: &mut [u8], w: usize, h: usize, p: (f64, f64), rgb: [u8; 3]) {
    let (x, y) = (p.0.floor() as i64, p.1.floor() as i64);
    for d in -1..=1 {
        put(rgba, w, h, x + d, y, rgb);
        put(rgba, w, h, x, y + d, rgb);
    }
}

fn line(rgba: &mut [u8], w: usize, h: usize, a: (i64, i64), b: (i64, i64), rgb: [u8; 3]) {
    let (mut x, mut y) = a;
    let dx = (b.0 - a.0).abs();
    let dy = -(b.1 - a.1).abs();
    let sx = if a.0 < b.0 { 1 } else { -1 };
    let sy = if a.1 < b.1 { 1 } else { -1 };
    let mut err = dx + dy;
    loop {
        put(rgba, w, h, x, y, rgb);
        if x == b.0 && y == b.1 {
            break;
        }
        let e2 = 2 * err;
        if e2 >= dy {
            err += dy;
            x += sx;
        }
        if e2 <= dx {
            err += dx;
            y += sy;
        }
    }
}

/// Copies `src` into a corner of the image with a 1-pixel border. Returns the top-left of
/// the copied area, or `None` if it does not fit.
pub fn blit_inset(rgba: &mut [u8], w: usize, h: usize, src: &DisplaySurface, corner: Corner) -> Option<(usize, usize)> {
    let (sw, sh) = (src.width, src.height);
    if sw == 0 || sh == 0 || sw + 2 > w || sh + 2 > h {
        return None;
    }
    let x0 = match corner {
        Corner::TopLeft | Corner::BottomLeft => 1,
        Corner::TopRight | Corner::BottomRight => w - sw - 1,
    };
    let y0 = match corner {
        Corner::TopLeft | Corner::TopRight => 1,
        Corner::BottomLeft | Corner::BottomRight => h - sh - 1,
    };
    let border = [200, 200, 210];
    for x in x0 - 1..=x0 + sw {
        put(rgba, w, h, x as i64, (y0 - 1) as i64, border);
        put(rgba, w, h, x as i64, (y0 + sh) as i64, border);
    }
    for y in y0..y0 + sh {
        put(rgba, w, h, (x0 - 1) as i64, y as i64, border);
        put(rgba, w, h, (x0 + sw) as i64, y as i64, border);
        let d = (y * w + x0) * 4;
        let s = (y - y0) * sw * 4;
        rgba[d..d + sw * 4].copy_from_slice(&src.rgba[s..s + sw * 4]);
    }
    Some((x0, y0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn line_endpoints_are_painted() {
        let (w, h) = (8, 8);
        let mut rgba = vec![0u8; w * h * 4];
        line(&mut rgba, w, h, (0, 0), (7, 3), [9, 9, 9]);
        assert_eq!(rgba[0], 9);
        assert_eq!(rgba[(3 * w + 7) * 4], 9);
    }

    #[test]
    fn inset_that_does_not_fit_is_skipped() {
        let mut rgba = vec![0u8; 4 * 4 * 4];
        let mut src = DisplaySurface::default();
        src.resize(4, 4);
        assert_eq!(blit_inset(&mut rgba, 4, 4, &src, Corner::TopRight), None);
    }
}
