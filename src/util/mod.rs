use glam::Vec4;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Color {
    r: u8,
    g: u8,
    b: u8,
}

impl Color {
    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    /// Quantize a linear float color. Channels are clamped to `[0, 1]`;
    /// alpha is ignored.
    pub fn from_linear(color: Vec4) -> Self {
        let channel = |v: f32| {
            if v.is_nan() {
                0
            } else {
                (v.clamp(0.0, 1.0) * 255.0).round() as u8
            }
        };
        Self {
            r: channel(color.x),
            g: channel(color.y),
            b: channel(color.z),
        }
    }

    pub fn as_u32(&self) -> u32 {
        (self.r as u32) << 16 | (self.g as u32) << 8 | (self.b as u32)
    }

    pub fn lerp(&self, other: &Color, factor: f32) -> Color {
        let r = (self.r as f32 + (other.r as f32 - self.r as f32) * factor).round() as u8;
        let g = (self.g as f32 + (other.g as f32 - self.g as f32) * factor).round() as u8;
        let b = (self.b as f32 + (other.b as f32 - self.b as f32) * factor).round() as u8;
        Color { r, g, b }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_linear_clamps_and_rounds() {
        let c = Color::from_linear(Vec4::new(2.0, 0.5, -1.0, 0.0));
        assert_eq!(c, Color::rgb(255, 128, 0));
        assert_eq!(c.as_u32(), 0xFF8000);
    }

    #[test]
    fn nan_channels_are_black() {
        assert_eq!(Color::from_linear(Vec4::splat(f32::NAN)), Color::rgb(0, 0, 0));
    }

    #[test]
    fn lerp_hits_endpoints() {
        let a = Color::rgb(0, 0, 0);
        let b = Color::rgb(200, 100, 50);
        assert_eq!(a.lerp(&b, 0.0), a);
        assert_eq!(a.lerp(&b, 1.0), b);
    }
}
