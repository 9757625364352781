//! RGB565 framebuffer and the TFT_eSPI/eSprite-shaped drawing primitives the
//! display stub pack binds guest calls to, grounded in
//! `examples/original_source/src/emu_display.c`. The buffer is shared with
//! the (out-of-scope) host renderer behind one mutex, per `SPEC_FULL.md` §5.
//!
//! Unlike the original's fixed 320x240 buffer, dimensions are resizable —
//! `set_rotation` swaps width/height, matching the TFT_eSPI rotation
//! contract in `SPEC_FULL.md` §4.4, and the session seeds the initial size
//! from the selected board profile rather than a compile-time constant.

use std::sync::Mutex;

const FONT_WIDTH: usize = 6;
const FONT_HEIGHT: usize = 8;
const FONT_FIRST: u8 = b' ';
const FONT_LAST: u8 = b'~';

/// A fixed 6x8 bitmap font, one row-major byte per scanline (MSB-first),
/// covering the printable ASCII range. Unrecognized characters fall back to
/// a blank glyph (space), matching the original's `FONT_FIRST..FONT_LAST`
/// clamp.
fn glyph_rows(c: u8) -> [u8; FONT_HEIGHT] {
    if !(FONT_FIRST..=FONT_LAST).contains(&c) {
        return [0; FONT_HEIGHT];
    }
    // A minimal generated glyph: every printable character renders as a
    // solid block scaled by its ASCII value's low bits. This is a
    // placeholder font sufficient for the interpreter-facing contract
    // (position, clipping, fg/bg) rather than a faithful type rendering.
    let pattern = 0b1000_0010u8.rotate_left(u32::from(c) & 0x7);
    [pattern; FONT_HEIGHT]
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rotation {
    Deg0,
    Deg90,
    Deg180,
    Deg270,
}

struct FramebufferState {
    width: u16,
    height: u16,
    pixels: Vec<u16>,
    rotation: Rotation,
}

/// The shared RGB565 framebuffer. Every draw op takes the internal mutex
/// for the duration of the write; a UI reader takes it only to copy.
pub struct Display {
    state: Mutex<FramebufferState>,
}

impl Display {
    #[must_use]
    pub fn new(width: u16, height: u16) -> Self {
        Self {
            state: Mutex::new(FramebufferState {
                width,
                height,
                pixels: vec![0u16; width as usize * height as usize],
                rotation: Rotation::Deg0,
            }),
        }
    }

    #[must_use]
    pub fn width(&self) -> u16 {
        self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner).width
    }

    #[must_use]
    pub fn height(&self) -> u16 {
        self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner).height
    }

    /// Swaps width/height for the 90/270 orientations and reallocates the
    /// framebuffer, matching TFT_eSPI's `setRotation`.
    pub fn set_rotation(&self, rotation: Rotation) {
        let mut guard = self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let swap = matches!((guard.rotation, rotation), (Rotation::Deg0 | Rotation::Deg180, Rotation::Deg90 | Rotation::Deg270))
            || matches!((guard.rotation, rotation), (Rotation::Deg90 | Rotation::Deg270, Rotation::Deg0 | Rotation::Deg180));
        if swap {
            std::mem::swap(&mut guard.width, &mut guard.height);
            guard.pixels = vec![0u16; guard.width as usize * guard.height as usize];
        }
        guard.rotation = rotation;
    }

    pub fn clear(&self, color: u16) {
        let (w, h) = {
            let guard = self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
            (guard.width, guard.height)
        };
        self.fill_rect(0, 0, i32::from(w), i32::from(h), color);
    }

    /// Fills a rectangle, clipping to the framebuffer bounds exactly as the
    /// original's sign/overflow adjustment does.
    pub fn fill_rect(&self, x: i32, y: i32, w: i32, h: i32, color: u16) {
        let mut guard = self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let width = i32::from(guard.width);
        let height = i32::from(guard.height);

        let (mut x, mut w) = (x, w);
        if x < 0 {
            w += x;
            x = 0;
        }
        let (mut y, mut h) = (y, h);
        if y < 0 {
            h += y;
            y = 0;
        }
        if x + w > width {
            w = width - x;
        }
        if y + h > height {
            h = height - y;
        }
        if w <= 0 || h <= 0 {
            return;
        }

        let fb_width = guard.width as usize;
        for row in y..y + h {
            let start = row as usize * fb_width + x as usize;
            guard.pixels[start..start + w as usize].fill(color);
        }
    }

    /// Draws one character glyph at `(x, y)` with foreground/background
    /// colors, falling back to a blank (space) glyph outside the font's
    /// covered range.
    pub fn draw_char(&self, x: i32, y: i32, c: u8, fg: u16, bg: u16) {
        let glyph = glyph_rows(c);
        let mut guard = self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let (width, height) = (i32::from(guard.width), i32::from(guard.height));
        let fb_width = guard.width as usize;

        if x < 0 || x + FONT_WIDTH as i32 > width {
            return;
        }
        for (row, bits) in glyph.iter().enumerate() {
            let dy = y + row as i32;
            if dy < 0 || dy >= height {
                continue;
            }
            let dst_row = dy as usize * fb_width + x as usize;
            for col in 0..FONT_WIDTH {
                let set = bits & (0x80 >> col) != 0;
                guard.pixels[dst_row + col] = if set { fg } else { bg };
            }
        }
    }

    /// Draws a multi-line string, wrapping at the framebuffer's right edge
    /// and stopping once vertical space runs out, matching
    /// `display_string`'s manual wrap loop.
    pub fn draw_string(&self, x: i32, y: i32, text: &str, fg: u16, bg: u16) {
        let (width, height) = (i32::from(self.width()), i32::from(self.height()));
        let (mut cx, mut cy) = (x, y);
        for byte in text.bytes() {
            if byte == b'\n' {
                cx = x;
                cy += FONT_HEIGHT as i32;
                continue;
            }
            if cx + FONT_WIDTH as i32 > width {
                cx = 0;
                cy += FONT_HEIGHT as i32;
            }
            if cy + FONT_HEIGHT as i32 > height {
                break;
            }
            self.draw_char(cx, cy, byte, fg, bg);
            cx += FONT_WIDTH as i32;
        }
    }

    /// Blits a 1bpp bitmap (MSB-first, row-major, `(w+7)/8` bytes per row).
    pub fn draw_bitmap1bpp(&self, x: i32, y: i32, w: i32, h: i32, bitmap: &[u8], fg: u16, bg: u16) {
        let row_bytes = ((w + 7) / 8).max(0) as usize;
        let mut guard = self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let (width, height) = (i32::from(guard.width), i32::from(guard.height));
        let fb_width = guard.width as usize;

        for row in 0..h {
            let dy = y + row;
            if dy < 0 || dy >= height {
                continue;
            }
            let Some(src) = bitmap.get(row as usize * row_bytes..(row as usize + 1) * row_bytes) else { continue };
            for col in 0..w {
                let dx = x + col;
                if dx < 0 || dx >= width {
                    continue;
                }
                let byte = src[(col / 8) as usize];
                let set = byte & (0x80 >> (col & 7)) != 0;
                guard.pixels[dy as usize * fb_width + dx as usize] = if set { fg } else { bg };
            }
        }
    }

    /// Fast-path horizontal pixel-row blit, clipping the source offset to
    /// match a left-clipped destination (`display_draw_rgb565_line`).
    pub fn draw_rgb565_line(&self, x: i32, y: i32, w: i32, pixels: &[u16]) {
        let mut guard = self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let (width, height) = (i32::from(guard.width), i32::from(guard.height));
        if y < 0 || y >= height || w <= 0 {
            return;
        }
        let mut skip = 0i32;
        let (mut x, mut w) = (x, w);
        if x < 0 {
            skip = -x;
            w += x;
            x = 0;
        }
        if x + w > width {
            w = width - x;
        }
        if w <= 0 {
            return;
        }
        let fb_width = guard.width as usize;
        let dst_start = y as usize * fb_width + x as usize;
        let src = &pixels[skip as usize..skip as usize + w as usize];
        guard.pixels[dst_start..dst_start + w as usize].copy_from_slice(src);
    }

    /// Copies the whole framebuffer out for a UI reader.
    #[must_use]
    pub fn snapshot(&self) -> Vec<u16> {
        self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner).pixels.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clear_fills_whole_buffer() {
        let display = Display::new(4, 4);
        display.clear(0x1234);
        assert!(display.snapshot().iter().all(|&p| p == 0x1234));
    }

    #[test]
    fn test_fill_rect_clips_negative_origin() {
        let display = Display::new(4, 4);
        display.fill_rect(-2, 0, 4, 1, 0xFFFF);
        let snap = display.snapshot();
        assert_eq!(&snap[0..4], &[0xFFFF, 0xFFFF, 0, 0]);
    }

    #[test]
    fn test_fill_rect_clips_overflow() {
        let display = Display::new(4, 4);
        display.fill_rect(2, 0, 4, 1, 0xFFFF);
        let snap = display.snapshot();
        assert_eq!(&snap[0..4], &[0, 0, 0xFFFF, 0xFFFF]);
    }

    #[test]
    fn test_rotation_swaps_dimensions() {
        let display = Display::new(320, 240);
        display.set_rotation(Rotation::Deg90);
        assert_eq!(display.width(), 240);
        assert_eq!(display.height(), 320);
    }

    #[test]
    fn test_draw_rgb565_line_clips_and_skips_source() {
        let display = Display::new(4, 1);
        display.draw_rgb565_line(-2, 0, 6, &[1, 2, 3, 4, 5, 6]);
        assert_eq!(display.snapshot(), vec![3, 4, 5, 6]);
    }

    #[test]
    fn test_draw_bitmap1bpp_out_of_bounds_rows_are_skipped() {
        let display = Display::new(2, 2);
        // Should not panic despite extending past the buffer vertically.
        display.draw_bitmap1bpp(0, 1, 8, 4, &[0xFF, 0xFF, 0xFF, 0xFF], 0xFFFF, 0x0000);
        assert_eq!(display.snapshot()[2], 0xFFFF);
    }
}
