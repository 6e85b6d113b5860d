use crate::grid::DrawImage;
use crate::util::Color;

const BACKGROUND_COLOR: Color = Color::rgb(10, 10, 14);

/// Anything that displays the published draw image.
pub trait PresentationSink {
    fn present(&mut self, image: &DrawImage);
}

/// Scale `image` into a 0RGB framebuffer of `width` x `height` pixels.
/// Dye alpha is used as coverage over a dark background.
pub fn display_image(image: &DrawImage, buf: &mut [u32], width: usize, height: usize) {
    let ratio_x = image.resolution.width as f32 / width as f32;
    let ratio_y = image.resolution.height as f32 / height as f32;
    for x in 0..width {
        for y in 0..height {
            let cell_x = (x as f32 * ratio_x) as u32;
            let cell_y = (y as f32 * ratio_y) as u32;
            let dye = image.get(cell_x, cell_y);
            let coverage = if dye.w.is_nan() { 0.0 } else { dye.w.clamp(0.0, 1.0) };
            buf[x + y * width] = BACKGROUND_COLOR
                .lerp(&Color::from_linear(dye), coverage)
                .as_u32();
        }
    }
}

/// A presentation sink that keeps the last presented frame in memory.
pub struct FramebufferSink {
    pub width: usize,
    pub height: usize,
    pub pixels: Vec<u32>,
    pub frames_presented: u64,
}

impl FramebufferSink {
    pub fn new(width: usize, height: usize) -> Self {
        Self {
            width,
            height,
            pixels: vec![BACKGROUND_COLOR.as_u32(); width * height],
            frames_presented: 0,
        }
    }

    /// Mean brightness of the framebuffer in `[0, 1]`.
    pub fn mean_brightness(&self) -> f32 {
        if self.pixels.is_empty() {
            return 0.0;
        }
        let total: u64 = self
            .pixels
            .iter()
            .map(|p| u64::from((p >> 16) & 0xFF) + u64::from((p >> 8) & 0xFF) + u64::from(p & 0xFF))
            .sum();
        total as f32 / (self.pixels.len() as f32 * 3.0 * 255.0)
    }
}

impl PresentationSink for FramebufferSink {
    fn present(&mut self, image: &DrawImage) {
        display_image(image, &mut self.pixels, self.width, self.height);
        self.frames_presented += 1;
    }
}

#[cfg(test)]
mod tests {
    use glam::Vec4;

    use super::*;
    use crate::config::Resolution;

    #[test]
    fn empty_image_shows_background() {
        let image = DrawImage::from_cells(Resolution::new(2, 2), &[[0.0; 4]; 4]);
        let mut sink = FramebufferSink::new(4, 4);
        sink.present(&image);
        assert!(sink.pixels.iter().all(|p| *p == BACKGROUND_COLOR.as_u32()));
        assert_eq!(sink.frames_presented, 1);
    }

    #[test]
    fn opaque_dye_is_scaled_up() {
        let mut image = DrawImage::from_cells(Resolution::new(2, 1), &[[0.0; 4]; 2]);
        image.pixels[1] = Vec4::new(1.0, 0.0, 0.0, 1.0);
        let mut buf = vec![0; 4 * 2];
        display_image(&image, &mut buf, 4, 2);
        assert_eq!(buf[3], 0xFF0000);
        assert_eq!(buf[2 + 4], 0xFF0000);
        assert_eq!(buf[0], BACKGROUND_COLOR.as_u32());
    }
}
