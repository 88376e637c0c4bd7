// src/color.rs
use glam::Vec4;
use serde::{Deserialize, Serialize};

/// RGBA color with components in `0.0..=1.0`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Color {
    pub red: f32,
    pub green: f32,
    pub blue: f32,
    #[serde(default = "opaque")]
    pub alpha: f32,
}

fn opaque() -> f32 {
    1.0
}

impl Color {
    pub const BLACK: Color = Color::new(0.0, 0.0, 0.0, 1.0);
    pub const WHITE: Color = Color::new(1.0, 1.0, 1.0, 1.0);
    pub const TRANSPARENT: Color = Color::new(0.0, 0.0, 0.0, 0.0);

    pub const fn new(red: f32, green: f32, blue: f32, alpha: f32) -> Self {
        Self { red, green, blue, alpha }
    }

    pub fn from_bytes(bytes: [u8; 4]) -> Self {
        Self::new(
            Self::byte_to_float(bytes[0]),
            Self::byte_to_float(bytes[1]),
            Self::byte_to_float(bytes[2]),
            Self::byte_to_float(bytes[3]),
        )
    }

    /// Quantizes a normalized component. `1.0` maps to 255, everything else to
    /// `floor(v * 256)`, so every byte bucket is the same width.
    pub fn float_to_byte(value: f32) -> u8 {
        let value = value.clamp(0.0, 1.0);
        if value >= 1.0 {
            255
        } else {
            (value * 256.0) as u8
        }
    }

    pub fn byte_to_float(byte: u8) -> f32 {
        byte as f32 / 255.0
    }

    pub fn to_bytes(self) -> [u8; 4] {
        [
            Self::float_to_byte(self.red),
            Self::float_to_byte(self.green),
            Self::float_to_byte(self.blue),
            Self::float_to_byte(self.alpha),
        ]
    }

    pub fn to_vec4(self) -> Vec4 {
        Vec4::new(self.red, self.green, self.blue, self.alpha)
    }
}

impl Default for Color {
    fn default() -> Self {
        Color::BLACK
    }
}

impl From<Vec4> for Color {
    fn from(v: Vec4) -> Self {
        Color::new(v.x, v.y, v.z, v.w)
    }
}
