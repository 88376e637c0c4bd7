pub mod context;
pub mod headless;

pub use context::{
    BoundingRectangle, DrawCommand, Framebuffer, FramebufferHandle, GpuError, GraphicsContext,
    PassState, ProgramHandle, ShaderSource, TextureHandle, UniformMap,
};
pub use headless::{DrawRecord, HeadlessCapabilities, HeadlessContext, HeadlessStats};
