// src/lib.rs

//! Resource lifecycle for full-screen post-process stages.
//!
//! A [`PostProcessStage`] owns one fragment shader and its uniforms. Uniforms
//! that name images or other stages are materialized into GPU textures in the
//! background; the stage reports itself ready once everything it needs exists
//! and releases all of it deterministically when disabled or destroyed.

pub mod color;
pub mod command_cache;
pub mod config;
pub mod context;
pub mod error;
pub mod fetch;
pub mod glsl;
pub mod gpu;
pub mod materializer;
pub mod selection;
pub mod stage;
pub mod texture;
pub mod texture_cache;
pub mod uniforms;

pub use color::Color;
pub use config::{StageConfig, StageOptions};
pub use context::{Context, OptionContext};
pub use error::{Result, StageError};
pub use fetch::{FetchError, ImageFetcher, TokioImageFetcher};
pub use gpu::{GraphicsContext, HeadlessContext, TextureHandle};
pub use selection::{Feature, FeatureRef, PickId, Selection};
pub use stage::{PostProcessStage, StageState};
pub use texture::{ImageSource, PixelDatatype, PixelFormat, SampleMode};
pub use texture_cache::{SimpleTextureCache, TextureCache};
pub use uniforms::{BindingValue, UniformProvider, UniformValue};
