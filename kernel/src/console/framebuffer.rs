//! Bitmap-font framebuffer writer (§4.11). Same shape as the boot console
//! the teacher drew against `bootloader_api`'s linear framebuffer — glyph
//! raster lookup, a cursor, scroll-by-memmove — generalized to whatever
//! width/height/pitch/bpp Limine's framebuffer response reports instead of
//! a fixed 80x24 grid.

use core::fmt;

use noto_sans_mono_bitmap::{get_raster, get_raster_width, FontWeight, RasterHeight};

const FONT_SIZE: RasterHeight = RasterHeight::Size16;

pub struct Framebuffer {
    base: *mut u8,
    width: usize,
    height: usize,
    pitch: usize,
    bytes_per_pixel: usize,
    cursor_row: usize,
    cursor_col: usize,
    cols: usize,
    rows: usize,
}

unsafe impl Send for Framebuffer {}

impl Framebuffer {
    /// # Safety
    /// `base` must point at `height * pitch` writable, volatile-safe bytes
    /// for as long as the returned value is alive.
    pub unsafe fn new(base: *mut u8, width: usize, height: usize, pitch: usize, bytes_per_pixel: usize) -> Self {
        let glyph_width = get_raster_width(FontWeight::Regular, FONT_SIZE);
        let cols = width / glyph_width;
        let rows = height / FONT_SIZE.val();
        Framebuffer { base, width, height, pitch, bytes_per_pixel, cursor_row: 0, cursor_col: 0, cols, rows }
    }

    fn put_pixel(&mut self, x: usize, y: usize, intensity: u8) {
        if x >= self.width || y >= self.height {
            return;
        }
        let offset = y * self.pitch + x * self.bytes_per_pixel;
        unsafe {
            for channel in 0..self.bytes_per_pixel.min(3) {
                core::ptr::write_volatile(self.base.add(offset + channel), intensity);
            }
        }
    }

    fn draw_glyph(&mut self, row: usize, col: usize, ch: char) {
        let glyph_width = get_raster_width(FontWeight::Regular, FONT_SIZE);
        let raster = get_raster(ch, FontWeight::Regular, FONT_SIZE)
            .unwrap_or_else(|| get_raster('?', FontWeight::Regular, FONT_SIZE).unwrap());
        let origin_x = col * glyph_width;
        let origin_y = row * FONT_SIZE.val();
        for (dy, line) in raster.raster().iter().enumerate() {
            for (dx, intensity) in line.iter().enumerate() {
                self.put_pixel(origin_x + dx, origin_y + dy, *intensity);
            }
        }
    }

    /// Shifts the whole buffer up by one glyph row and blanks the row that
    /// scrolled in, rather than tracking a ring offset into a separate
    /// character buffer.
    fn scroll(&mut self) {
        let row_bytes = FONT_SIZE.val() * self.pitch;
        let total_bytes = self.height * self.pitch;
        unsafe {
            core::ptr::copy(self.base.add(row_bytes), self.base, total_bytes - row_bytes);
            core::ptr::write_bytes(self.base.add(total_bytes - row_bytes), 0, row_bytes);
        }
    }

    fn newline(&mut self) {
        self.cursor_col = 0;
        if self.cursor_row + 1 >= self.rows {
            self.scroll();
        } else {
            self.cursor_row += 1;
        }
    }

    pub fn write_byte(&mut self, byte: u8) {
        match byte {
            b'\n' => self.newline(),
            b'\r' => self.cursor_col = 0,
            _ => {
                if self.cursor_col >= self.cols {
                    self.newline();
                }
                self.draw_glyph(self.cursor_row, self.cursor_col, byte as char);
                self.cursor_col += 1;
            }
        }
    }
}

impl fmt::Write for Framebuffer {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        for byte in s.bytes() {
            self.write_byte(byte);
        }
        Ok(())
    }
}
