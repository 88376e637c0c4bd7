//! Stage registry and output framebuffers.
//!
//! Stages look up each other's outputs by name through [`TextureCache`]. The
//! framebuffers behind those outputs belong to the cache, never to a stage.

use log::debug;
use parking_lot::RwLock;
use std::collections::HashMap;

use crate::config::StageConfig;
use crate::error::Result;
use crate::gpu::{Framebuffer, GraphicsContext, TextureHandle};

pub trait TextureCache: Send + Sync {
    fn has_stage(&self, name: &str) -> bool;

    /// Current output framebuffer of the named stage.
    fn framebuffer(&self, name: &str) -> Option<Framebuffer>;

    fn output_texture(&self, name: &str) -> Option<TextureHandle> {
        self.framebuffer(name).map(|fb| fb.color_texture)
    }
}

#[derive(Debug)]
struct Entry {
    config: StageConfig,
    framebuffer: Option<Framebuffer>,
}

/// One framebuffer per registered stage, resized with the drawing buffer.
#[derive(Debug, Default)]
pub struct SimpleTextureCache {
    entries: RwLock<HashMap<String, Entry>>,
}

impl SimpleTextureCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, config: &StageConfig) {
        self.entries.write().insert(
            config.name.clone(),
            Entry {
                config: config.clone(),
                framebuffer: None,
            },
        );
    }

    pub fn unregister(&self, ctx: &mut dyn GraphicsContext, name: &str) -> Result<()> {
        let removed = self.entries.write().remove(name);
        if let Some(fb) = removed.and_then(|e| e.framebuffer) {
            ctx.destroy_framebuffer(fb)?;
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// (Re)creates framebuffers whose size no longer matches the drawing buffer.
    pub fn update(&self, ctx: &mut dyn GraphicsContext) -> Result<()> {
        let drawing_buffer = ctx.drawing_buffer_size();
        let mut entries = self.entries.write();
        for (name, entry) in entries.iter_mut() {
            let (width, height) = entry.config.output_dimensions(drawing_buffer);
            if let Some(fb) = entry.framebuffer {
                if fb.width == width && fb.height == height {
                    continue;
                }
                entry.framebuffer = None;
                ctx.destroy_framebuffer(fb)?;
            }
            let fb = ctx.create_framebuffer(
                width,
                height,
                entry.config.pixel_format,
                entry.config.pixel_datatype,
            )?;
            debug!("allocated {}x{} framebuffer for stage '{}'", width, height, name);
            entry.framebuffer = Some(fb);
        }
        Ok(())
    }

    /// Destroys every framebuffer; registrations are kept.
    pub fn release(&self, ctx: &mut dyn GraphicsContext) -> Result<()> {
        for entry in self.entries.write().values_mut() {
            if let Some(fb) = entry.framebuffer.take() {
                ctx.destroy_framebuffer(fb)?;
            }
        }
        Ok(())
    }
}

impl TextureCache for SimpleTextureCache {
    fn has_stage(&self, name: &str) -> bool {
        self.entries.read().contains_key(name)
    }

    fn framebuffer(&self, name: &str) -> Option<Framebuffer> {
        self.entries.read().get(name).and_then(|e| e.framebuffer)
    }
}
