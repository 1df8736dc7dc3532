//! RGBA drawing surface for marker icons.
//!
//! `Canvas` is an `embedded-graphics` draw target backed by a plain
//! `width * height * 4` byte buffer in the row-major, non-premultiplied RGBA
//! layout map engines accept for style images. Every pixel drawn is
//! composited source-over with the canvas's current paint alpha, which is how
//! the translucent outer pulse ring sits under the opaque inner dot.

use embedded_graphics::{pixelcolor::Rgb888, prelude::*, Pixel};

const BYTES_PER_PIXEL: usize = 4;

pub struct Canvas {
    width: u32,
    height: u32,
    paint_alpha: f32,
    data: Vec<u8>,
}

impl Canvas {
    /// Allocate a transparent canvas.
    ///
    /// Returns `None` for a zero-sized surface or one whose byte length
    /// does not fit in memory.
    pub fn new(width: u32, height: u32) -> Option<Self> {
        if width == 0 || height == 0 {
            return None;
        }
        let len = (width as usize)
            .checked_mul(height as usize)?
            .checked_mul(BYTES_PER_PIXEL)?;
        Some(Self {
            width,
            height,
            paint_alpha: 1.0,
            data: vec![0; len],
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Reset every pixel to fully transparent.
    pub fn clear_transparent(&mut self) {
        self.data.fill(0);
    }

    /// Opacity applied to everything drawn until the next call.
    pub fn set_paint_alpha(&mut self, alpha: f32) {
        self.paint_alpha = alpha.clamp(0.0, 1.0);
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// RGBA value at `(x, y)`, or `None` outside the canvas.
    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let offset = self.offset(x, y);
        let mut rgba = [0; 4];
        rgba.copy_from_slice(&self.data[offset..offset + BYTES_PER_PIXEL]);
        Some(rgba)
    }

    fn offset(&self, x: u32, y: u32) -> usize {
        (y as usize * self.width as usize + x as usize) * BYTES_PER_PIXEL
    }

    fn blend_pixel(&mut self, point: Point, color: Rgb888) {
        if point.x < 0 || point.y < 0 {
            return;
        }
        let (x, y) = (point.x as u32, point.y as u32);
        if x >= self.width || y >= self.height {
            return;
        }

        let src_alpha = self.paint_alpha;
        if src_alpha <= 0.0 {
            return;
        }

        let offset = self.offset(x, y);
        let dst = &mut self.data[offset..offset + BYTES_PER_PIXEL];
        let dst_alpha = dst[3] as f32 / 255.0;
        let out_alpha = src_alpha + dst_alpha * (1.0 - src_alpha);

        // Straight-alpha source-over
        let channel = |src: u8, dst: u8| -> u8 {
            let value = (src as f32 * src_alpha + dst as f32 * dst_alpha * (1.0 - src_alpha))
                / out_alpha;
            value.round().clamp(0.0, 255.0) as u8
        };

        dst[0] = channel(color.r(), dst[0]);
        dst[1] = channel(color.g(), dst[1]);
        dst[2] = channel(color.b(), dst[2]);
        dst[3] = (out_alpha * 255.0).round().clamp(0.0, 255.0) as u8;
    }
}

impl OriginDimensions for Canvas {
    fn size(&self) -> Size {
        Size::new(self.width, self.height)
    }
}

impl DrawTarget for Canvas {
    type Color = Rgb888;
    type Error = core::convert::Infallible;

    fn draw_iter<I>(&mut self, pixels: I) -> Result<(), Self::Error>
    where
        I: IntoIterator<Item = Pixel<Self::Color>>,
    {
        for Pixel(point, color) in pixels {
            self.blend_pixel(point, color);
        }
        Ok(())
    }
}
