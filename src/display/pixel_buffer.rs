// ============================================================================
// Utility Functions
// ============================================================================

/// Write ABGR pixel with custom alpha (RGBA8888 little-endian byte order)
#[inline]
fn write_pixel_rgba(dest: &mut [u8], r: u8, g: u8, b: u8, a: u8) {
    dest[0] = a; // A
    dest[1] = b; // B
    dest[2] = g; // G
    dest[3] = r; // R
}

/// Quantize a linear [0, 1] channel to a byte. NaN maps to 0.
#[inline]
pub fn quantize(value: f64) -> u8 {
    if value.is_nan() {
        0
    } else {
        (value.clamp(0.0, 1.0) * 255.0).round() as u8
    }
}

// ============================================================================
// PixelBuffer
// ============================================================================

/// RGBA8888 pixel buffer for software rendering.
/// The renderer fills it row by row, the display uploads it as a texture.
pub struct PixelBuffer {
    pixels: Vec<u8>,
    width: u32,
    height: u32,
}

impl PixelBuffer {
    /// Zeroed (transparent black) buffer of `width * height` pixels
    pub fn with_size(width: u32, height: u32) -> Self {
        Self {
            pixels: vec![0; width as usize * height as usize * 4],
            width,
            height,
        }
    }

    #[inline]
    pub fn width(&self) -> u32 {
        self.width
    }

    #[inline]
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Check if coordinates are within bounds
    #[inline]
    fn in_bounds(&self, x: i32, y: i32) -> bool {
        x >= 0 && x < self.width as i32 && y >= 0 && y < self.height as i32
    }

    /// Calculate byte offset for pixel at (x, y)
    #[inline]
    fn pixel_index(&self, x: u32, y: u32) -> usize {
        (y as usize * self.width as usize + x as usize) * 4
    }

    /// Read all 4 channels of a pixel (bounds checked)
    /// Returns (r, g, b, a) or None if out of bounds
    #[inline]
    pub fn get_pixel_rgba(&self, x: i32, y: i32) -> Option<(u8, u8, u8, u8)> {
        if self.in_bounds(x, y) {
            let idx = self.pixel_index(x as u32, y as u32);
            Some((
                self.pixels[idx + 3], // R
                self.pixels[idx + 2], // G
                self.pixels[idx + 1], // B
                self.pixels[idx],     // A
            ))
        } else {
            None
        }
    }

    /// Store a floating point RGBA color into one 4-byte pixel slot
    #[inline]
    pub fn write_color(dest: &mut [u8], rgba: [f64; 4]) {
        write_pixel_rgba(
            dest,
            quantize(rgba[0]),
            quantize(rgba[1]),
            quantize(rgba[2]),
            quantize(rgba[3]),
        );
    }

    /// Raw bytes for SDL texture upload
    pub fn as_bytes(&self) -> &[u8] {
        &self.pixels
    }

    /// Mutable access to raw pixels, for parallel row fills
    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        &mut self.pixels
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quantize() {
        assert_eq!(quantize(0.0), 0);
        assert_eq!(quantize(1.0), 255);
        assert_eq!(quantize(2.5), 255);
        assert_eq!(quantize(-0.3), 0);
        assert_eq!(quantize(0.5), 128);
        assert_eq!(quantize(f64::NAN), 0);
    }

    #[test]
    fn test_byte_order_is_abgr() {
        let mut buffer = PixelBuffer::with_size(2, 2);
        PixelBuffer::write_color(&mut buffer.as_bytes_mut()[4..8], [1.0, 0.0, 0.5, 0.2]);
        assert_eq!(&buffer.as_bytes()[4..8], &[51, 128, 0, 255]);
        assert_eq!(buffer.get_pixel_rgba(1, 0), Some((255, 0, 128, 51)));
        assert_eq!(buffer.get_pixel_rgba(0, 0), Some((0, 0, 0, 0)));
    }

    #[test]
    fn test_out_of_bounds_reads_are_none() {
        let buffer = PixelBuffer::with_size(3, 2);
        assert_eq!(buffer.as_bytes().len(), 3 * 2 * 4);
        assert_eq!(buffer.get_pixel_rgba(-1, 0), None);
        assert_eq!(buffer.get_pixel_rgba(3, 1), None);
        assert_eq!(buffer.get_pixel_rgba(0, 2), None);
    }
}
