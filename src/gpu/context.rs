//! Capability surface of the graphics context.
//!
//! Stages never talk to a concrete GPU API. Everything they need — textures,
//! programs, framebuffers and draw submission — goes through [`GraphicsContext`],
//! so the same engine runs against a real backend or the in-memory
//! [`HeadlessContext`](super::HeadlessContext).

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

use crate::texture::{PixelDatatype, PixelFormat, Sampler, TextureDescriptor};
use crate::uniforms::UniformValue;

// ---------- Handle types ----------

macro_rules! define_handle {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Copy, Clone, PartialEq, Eq, Hash, Debug, PartialOrd, Ord)]
        pub struct $name(u32);

        impl $name {
            /// Packs a slot index (low 24 bits) and a generation (high 8 bits).
            pub fn new(index: u32, gen: u8) -> Self {
                $name((index & 0x00FF_FFFF) | ((gen as u32) << 24))
            }
            pub fn index(self) -> usize {
                (self.0 & 0x00FF_FFFF) as usize
            }
            pub fn gen(self) -> u8 {
                ((self.0 >> 24) & 0xFF) as u8
            }
            pub fn invalid() -> Self {
                $name(u32::MAX)
            }
            pub fn is_valid(self) -> bool {
                self.0 != u32::MAX
            }
        }
    };
}

define_handle!(
    /// GPU texture owned by whoever created it.
    TextureHandle
);
define_handle!(
    /// Compiled shader program.
    ProgramHandle
);
define_handle!(FramebufferHandle);

// ---------- Errors ----------

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GpuError {
    #[error("texture {0:?} was already destroyed")]
    TextureAlreadyDestroyed(TextureHandle),

    #[error("program {0:?} was already destroyed")]
    ProgramAlreadyDestroyed(ProgramHandle),

    #[error("framebuffer {0:?} was already destroyed")]
    FramebufferAlreadyDestroyed(FramebufferHandle),

    #[error("invalid texture source: {0}")]
    InvalidSource(String),

    #[error("shader compilation failed: {0}")]
    Compile(String),

    #[error("draw failed: {0}")]
    Draw(String),
}

// ---------- Pass & command state ----------

/// Rectangle given by a corner, width and height, in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BoundingRectangle {
    #[serde(default)]
    pub x: i32,
    #[serde(default)]
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl BoundingRectangle {
    pub const fn new(x: i32, y: i32, width: u32, height: u32) -> Self {
        Self { x, y, width, height }
    }

    /// A zero-area rectangle means "scissoring disabled".
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

/// Per-pass overrides supplied at draw time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PassState {
    pub scissor: BoundingRectangle,
}

/// Render target owned by the texture cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Framebuffer {
    pub handle: FramebufferHandle,
    pub color_texture: TextureHandle,
    pub width: u32,
    pub height: u32,
}

/// Fragment shader text plus preprocessor defines.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ShaderSource {
    pub defines: Vec<String>,
    pub sources: Vec<String>,
}

impl ShaderSource {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            defines: Vec::new(),
            sources: vec![source.into()],
        }
    }

    pub fn with_define(mut self, define: impl Into<String>) -> Self {
        self.defines.push(define.into());
        self
    }

    pub fn has_define(&self, define: &str) -> bool {
        self.defines.iter().any(|d| d == define)
    }

    /// Final text handed to the compiler.
    pub fn combined(&self) -> String {
        let mut out = String::new();
        for define in self.defines.iter().filter(|d| !d.is_empty()) {
            out.push_str("#define ");
            out.push_str(define);
            out.push('\n');
        }
        for source in &self.sources {
            out.push_str(source);
            out.push('\n');
        }
        out
    }
}

/// Full-screen quad draw bound to a program.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DrawCommand {
    pub program: ProgramHandle,
    /// Target; `None` means the command is not drawable yet.
    pub framebuffer: Option<Framebuffer>,
    /// Viewport override when the target is not drawing-buffer sized.
    pub viewport: Option<BoundingRectangle>,
}

/// Uniform values bound for a single draw, keyed by uniform name.
pub type UniformMap = BTreeMap<String, UniformValue>;

// ---------- Capability trait ----------

pub trait GraphicsContext {
    fn create_texture(&mut self, desc: &TextureDescriptor<'_>) -> Result<TextureHandle, GpuError>;

    /// Must reject a second destroy of the same handle.
    fn destroy_texture(&mut self, texture: TextureHandle) -> Result<(), GpuError>;

    fn texture_dimensions(&self, texture: TextureHandle) -> Option<(u32, u32)>;

    fn texture_sampler(&self, texture: TextureHandle) -> Option<Sampler>;

    fn set_texture_sampler(&mut self, texture: TextureHandle, sampler: Sampler) -> Result<(), GpuError>;

    fn compile_program(&mut self, source: &ShaderSource) -> Result<ProgramHandle, GpuError>;

    fn destroy_program(&mut self, program: ProgramHandle) -> Result<(), GpuError>;

    fn create_framebuffer(
        &mut self,
        width: u32,
        height: u32,
        pixel_format: PixelFormat,
        pixel_datatype: PixelDatatype,
    ) -> Result<Framebuffer, GpuError>;

    fn destroy_framebuffer(&mut self, framebuffer: Framebuffer) -> Result<(), GpuError>;

    fn execute_draw(
        &mut self,
        command: &DrawCommand,
        uniforms: &UniformMap,
        pass: Option<&PassState>,
    ) -> Result<(), GpuError>;

    fn drawing_buffer_size(&self) -> (u32, u32);

    fn supports_depth_texture(&self) -> bool;

    fn supports_float_texture(&self) -> bool;

    fn supports_half_float_texture(&self) -> bool;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handle_packing() {
        let h = TextureHandle::new(0x12_3456, 7);
        assert_eq!(h.index(), 0x12_3456);
        assert_eq!(h.gen(), 7);
        assert!(h.is_valid());
        assert!(!TextureHandle::invalid().is_valid());
    }

    #[test]
    fn combined_shader_skips_empty_defines() {
        let src = ShaderSource::new("void main() {}").with_define("").with_define("LOG_DEPTH");
        assert_eq!(src.combined(), "#define LOG_DEPTH\nvoid main() {}\n");
        assert!(src.has_define("LOG_DEPTH"));
    }

    #[test]
    fn empty_rectangles() {
        assert!(BoundingRectangle::default().is_empty());
        assert!(BoundingRectangle::new(0, 0, 10, 0).is_empty());
        assert!(!BoundingRectangle::new(5, 5, 10, 10).is_empty());
    }
}
