use image::{DynamicImage, GenericImageView};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::gpu::GpuError;

// ─────────────────────────────────────────────────────────────────────────────
// Pixel formats
// ─────────────────────────────────────────────────────────────────────────────

/// Pixel layout of a texture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PixelFormat {
    DepthComponent,
    DepthStencil,
    Alpha,
    Rgb,
    Rgba,
    Luminance,
    LuminanceAlpha,
}

impl PixelFormat {
    /// Whether a stage may render into this format.
    pub fn is_color_format(self) -> bool {
        matches!(
            self,
            PixelFormat::Alpha
                | PixelFormat::Rgb
                | PixelFormat::Rgba
                | PixelFormat::Luminance
                | PixelFormat::LuminanceAlpha
        )
    }

    pub fn is_depth_format(self) -> bool {
        matches!(self, PixelFormat::DepthComponent | PixelFormat::DepthStencil)
    }

    pub fn component_count(self) -> u32 {
        match self {
            PixelFormat::Alpha | PixelFormat::Luminance | PixelFormat::DepthComponent => 1,
            PixelFormat::LuminanceAlpha | PixelFormat::DepthStencil => 2,
            PixelFormat::Rgb => 3,
            PixelFormat::Rgba => 4,
        }
    }
}

/// Per-component data type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PixelDatatype {
    UnsignedByte,
    UnsignedShort,
    UnsignedInt,
    Float,
    HalfFloat,
}

impl PixelDatatype {
    pub fn size_in_bytes(self) -> u32 {
        match self {
            PixelDatatype::UnsignedByte => 1,
            PixelDatatype::UnsignedShort | PixelDatatype::HalfFloat => 2,
            PixelDatatype::UnsignedInt | PixelDatatype::Float => 4,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Sampling
// ─────────────────────────────────────────────────────────────────────────────

/// How a stage samples its input color texture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SampleMode {
    #[default]
    Nearest,
    Linear,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextureFilter {
    Nearest,
    Linear,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextureWrap {
    ClampToEdge,
    Repeat,
    MirroredRepeat,
}

/// Sampler state attached to a texture.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sampler {
    pub wrap_s: TextureWrap,
    pub wrap_t: TextureWrap,
    pub min_filter: TextureFilter,
    pub mag_filter: TextureFilter,
}

impl Sampler {
    pub const NEAREST: Sampler = Sampler {
        wrap_s: TextureWrap::ClampToEdge,
        wrap_t: TextureWrap::ClampToEdge,
        min_filter: TextureFilter::Nearest,
        mag_filter: TextureFilter::Nearest,
    };

    pub const LINEAR: Sampler = Sampler {
        wrap_s: TextureWrap::ClampToEdge,
        wrap_t: TextureWrap::ClampToEdge,
        min_filter: TextureFilter::Linear,
        mag_filter: TextureFilter::Linear,
    };

    pub fn for_sample_mode(mode: SampleMode) -> Self {
        match mode {
            SampleMode::Nearest => Sampler::NEAREST,
            SampleMode::Linear => Sampler::LINEAR,
        }
    }
}

impl Default for Sampler {
    fn default() -> Self {
        Sampler::LINEAR
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// In-memory pixel sources
// ─────────────────────────────────────────────────────────────────────────────

/// Decoded RGBA8 image that can be uploaded as a texture.
///
/// Pixels are shared, so cloning an `ImageSource` is cheap.
#[derive(Clone, PartialEq, Eq)]
pub struct ImageSource {
    width: u32,
    height: u32,
    pixels: Arc<[u8]>,
}

impl ImageSource {
    pub fn from_rgba8(width: u32, height: u32, pixels: Vec<u8>) -> Result<Self, GpuError> {
        let expected = width as usize * height as usize * 4;
        if width == 0 || height == 0 || pixels.len() != expected {
            return Err(GpuError::InvalidSource(format!(
                "{}x{} RGBA image needs {} bytes, got {}",
                width,
                height,
                expected,
                pixels.len()
            )));
        }
        Ok(Self {
            width,
            height,
            pixels: pixels.into(),
        })
    }

    /// Solid single-color image, mostly useful for placeholders.
    pub fn solid(width: u32, height: u32, rgba: [u8; 4]) -> Self {
        let count = width.max(1) as usize * height.max(1) as usize;
        let pixels: Vec<u8> = rgba.iter().copied().cycle().take(count * 4).collect();
        Self {
            width: width.max(1),
            height: height.max(1),
            pixels: pixels.into(),
        }
    }

    /// Decodes PNG or JPEG bytes.
    pub fn decode(bytes: &[u8]) -> Result<Self, image::ImageError> {
        let img = image::load_from_memory(bytes)?;
        Ok(Self::from_dynamic(&img))
    }

    pub fn from_dynamic(img: &DynamicImage) -> Self {
        let (width, height) = img.dimensions();
        let rgba = img.to_rgba8();
        Self {
            width,
            height,
            pixels: rgba.into_raw().into(),
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }
}

impl std::fmt::Debug for ImageSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImageSource")
            .field("width", &self.width)
            .field("height", &self.height)
            .finish()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Texture creation
// ─────────────────────────────────────────────────────────────────────────────

/// Everything a graphics context needs to create a texture.
#[derive(Debug, Clone)]
pub struct TextureDescriptor<'a> {
    pub label: Option<&'a str>,
    pub width: u32,
    pub height: u32,
    pub pixel_format: PixelFormat,
    pub pixel_datatype: PixelDatatype,
    /// Initial contents; `None` leaves the texture uninitialized.
    pub data: Option<&'a [u8]>,
    pub sampler: Sampler,
}

impl<'a> TextureDescriptor<'a> {
    pub fn rgba8(width: u32, height: u32, data: &'a [u8]) -> Self {
        Self {
            label: None,
            width,
            height,
            pixel_format: PixelFormat::Rgba,
            pixel_datatype: PixelDatatype::UnsignedByte,
            data: Some(data),
            sampler: Sampler::default(),
        }
    }

    pub fn from_image(image: &'a ImageSource) -> Self {
        Self::rgba8(image.width(), image.height(), image.pixels())
    }

    pub fn render_target(
        width: u32,
        height: u32,
        pixel_format: PixelFormat,
        pixel_datatype: PixelDatatype,
    ) -> Self {
        Self {
            label: None,
            width,
            height,
            pixel_format,
            pixel_datatype,
            data: None,
            sampler: Sampler::NEAREST,
        }
    }

    pub fn with_label(mut self, label: &'a str) -> Self {
        self.label = Some(label);
        self
    }

    pub fn with_sampler(mut self, sampler: Sampler) -> Self {
        self.sampler = sampler;
        self
    }

    /// Bytes `data` must hold for this descriptor.
    pub fn byte_len(&self) -> usize {
        self.width as usize
            * self.height as usize
            * self.pixel_format.component_count() as usize
            * self.pixel_datatype.size_in_bytes() as usize
    }
}
