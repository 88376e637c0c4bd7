//! The one compiled draw command a stage keeps alive.

use log::debug;
use xxhash_rust::xxh3::xxh3_64;

use crate::context::Context;
use crate::error::Result;
use crate::glsl;
use crate::gpu::{DrawCommand, GraphicsContext, ShaderSource};
use crate::selection::SelectionTexture;

pub const LOG_DEPTH_DEFINE: &str = "LOG_DEPTH";

/// Program plus the draw command bound to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledCommand {
    pub draw: DrawCommand,
    pub use_log_depth: bool,
    /// Width of the selection texture baked into the shader, if any.
    pub selection_width: Option<u32>,
    /// xxh3 of the final shader text.
    pub fingerprint: u64,
}

/// What the next frame needs from the command.
#[derive(Debug, Clone, Copy)]
pub struct CommandRequest<'a> {
    pub fragment_shader: &'a str,
    pub use_log_depth: bool,
    pub selection: Option<SelectionTexture>,
    pub selection_dirty: bool,
}

#[derive(Debug, Default)]
pub struct CommandCache {
    command: Option<CompiledCommand>,
    builds: u64,
}

impl CommandCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn command(&self) -> Option<&CompiledCommand> {
        self.command.as_ref()
    }

    pub fn command_mut(&mut self) -> Option<&mut CompiledCommand> {
        self.command.as_mut()
    }

    /// Number of programs compiled so far.
    pub fn builds(&self) -> u64 {
        self.builds
    }

    pub fn needs_rebuild(&self, request: &CommandRequest<'_>) -> bool {
        match &self.command {
            None => true,
            Some(cmd) => cmd.use_log_depth != request.use_log_depth || request.selection_dirty,
        }
    }

    /// Returns the current command, compiling a new one first if needed. The
    /// previous program is destroyed only after the new one compiled.
    pub fn ensure(
        &mut self,
        ctx: &mut dyn GraphicsContext,
        request: &CommandRequest<'_>,
    ) -> Result<&mut CompiledCommand> {
        if self.needs_rebuild(request) {
            let fresh = build(ctx, request)?;
            self.builds += 1;
            if let Some(old) = self.command.replace(fresh) {
                ctx.destroy_program(old.draw.program)
                    .context("releasing previous program")?;
            }
        }
        self.command
            .as_mut()
            .ok_or_else(|| crate::error::StageError::msg("draw command missing after rebuild"))
    }

    pub fn release(&mut self, ctx: &mut dyn GraphicsContext) -> Result<()> {
        if let Some(old) = self.command.take() {
            ctx.destroy_program(old.draw.program).context("releasing program")?;
        }
        Ok(())
    }
}

fn build(ctx: &mut dyn GraphicsContext, request: &CommandRequest<'_>) -> Result<CompiledCommand> {
    let source = match request.selection {
        Some(texture) => glsl::with_selected_feature(request.fragment_shader, texture.width),
        None => request.fragment_shader.to_owned(),
    };
    let mut shader = ShaderSource::new(source);
    if request.use_log_depth {
        shader = shader.with_define(LOG_DEPTH_DEFINE);
    }

    let fingerprint = xxh3_64(shader.combined().as_bytes());
    let program = ctx.compile_program(&shader).context("compiling post-process shader")?;
    debug!(
        "compiled {:?} (fingerprint {:016x}, log depth: {})",
        program, fingerprint, request.use_log_depth
    );

    Ok(CompiledCommand {
        draw: DrawCommand {
            program,
            framebuffer: None,
            viewport: None,
        },
        use_log_depth: request.use_log_depth,
        selection_width: request.selection.map(|t| t.width),
        fingerprint,
    })
}
