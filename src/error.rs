// src/error.rs
//! Error handling for the stage engine.
//!
//! - **Configuration errors** are raised once, at stage construction, and are fatal to it.
//! - **GPU errors** come from the graphics context (including rejected double destroys).
//! - **Fetch errors** never reach the render loop through `update()`; they are only
//!   wrapped here when a caller asks for them explicitly.
//! - Works with `?`, `.context()` and the `bail!` / `ensure!` macros in [`crate::context`].

use std::fmt;
use thiserror::Error;

use crate::fetch::FetchError;
use crate::gpu::GpuError;
use crate::texture::PixelFormat;

/// Main error type for stages and their collaborators.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum StageError {
    /// `texture_scale` outside `(0.0, 1.0]`.
    #[error("texture scale must be greater than 0.0 and less than or equal to 1.0, got {0}")]
    InvalidTextureScale(f32),

    /// Output pixel format is a depth or depth/stencil format.
    #[error("pixel format must be a color format, got {0:?}")]
    NonColorPixelFormat(PixelFormat),

    /// Options were parsed from JSON without a `fragmentShader`.
    #[error("fragment shader is required")]
    MissingFragmentShader,

    /// Any mutating call after `destroy()`.
    #[error("post-process stage '{0}' was destroyed")]
    Destroyed(String),

    #[error("GPU error: {0}")]
    Gpu(#[from] GpuError),

    #[error("image fetch error: {0}")]
    Fetch(#[from] FetchError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Simple custom message.
    #[error("{0}")]
    Custom(String),

    /// Context chaining, see [`crate::context::Context`].
    #[error("{message}: {source}")]
    WithContext {
        message: String,
        #[source]
        source: Box<StageError>,
    },
}

impl StageError {
    #[inline]
    pub fn custom<S: Into<String>>(msg: S) -> Self {
        Self::Custom(msg.into())
    }

    #[inline]
    pub fn format(args: fmt::Arguments) -> Self {
        Self::Custom(fmt::format(args))
    }

    #[inline]
    pub fn msg(msg: &'static str) -> Self {
        Self::Custom(msg.into())
    }

    /// Wrap this error with a message describing what was being attempted.
    #[inline]
    pub fn context<C: Into<String>>(self, context: C) -> Self {
        Self::WithContext {
            message: context.into(),
            source: Box::new(self),
        }
    }

    /// Strips any context layers.
    pub fn root(&self) -> &StageError {
        match self {
            StageError::WithContext { source, .. } => source.root(),
            other => other,
        }
    }

    #[inline]
    pub fn is_config(&self) -> bool {
        matches!(
            self.root(),
            StageError::InvalidTextureScale(_)
                | StageError::NonColorPixelFormat(_)
                | StageError::MissingFragmentShader
        )
    }

    #[inline]
    pub fn is_destroyed(&self) -> bool {
        matches!(self.root(), StageError::Destroyed(_))
    }

    #[inline]
    pub fn is_gpu(&self) -> bool {
        matches!(self.root(), StageError::Gpu(_))
    }
}

/// Convenient `Result` alias — use `crate::Result<T>` everywhere.
pub type Result<T> = std::result::Result<T, StageError>;
