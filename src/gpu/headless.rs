//! # Headless graphics context
//!
//! An in-memory implementation of [`GraphicsContext`] that keeps every texture,
//! program and framebuffer in generation-checked slabs and records each draw.
//!
//! * **Slabs** – free slots are reused; every reuse bumps the slot generation so
//!   stale handles are rejected instead of aliasing a newer resource.
//! * **Statistics** – creation / destruction counters and live counts, used to
//!   check that a stage returns to its resource baseline.
//! * **Draw log** – each submitted draw is kept with its bound uniforms and pass
//!   state for inspection.

use log::{debug, trace};

use super::context::{
    DrawCommand, Framebuffer, FramebufferHandle, GpuError, GraphicsContext, PassState, ProgramHandle,
    ShaderSource, TextureHandle, UniformMap,
};
use crate::texture::{PixelDatatype, PixelFormat, Sampler, TextureDescriptor};

// -----------------------------------------------------------------------------
// Configuration
// -----------------------------------------------------------------------------

/// Optional features the headless device pretends to support.
#[derive(Clone, Copy, Debug)]
pub struct HeadlessCapabilities {
    pub depth_texture: bool,
    pub float_texture: bool,
    pub half_float_texture: bool,
}

impl Default for HeadlessCapabilities {
    fn default() -> Self {
        Self {
            depth_texture: true,
            float_texture: true,
            half_float_texture: true,
        }
    }
}

// -----------------------------------------------------------------------------
// Statistics
// -----------------------------------------------------------------------------

#[derive(Default, Clone, Debug, PartialEq, Eq)]
pub struct HeadlessStats {
    pub textures_created: u64,
    pub textures_destroyed: u64,
    pub programs_created: u64,
    pub programs_destroyed: u64,
    pub framebuffers_created: u64,
    pub framebuffers_destroyed: u64,
    pub draw_calls: u64,
}

/// One submitted draw.
#[derive(Clone, Debug)]
pub struct DrawRecord {
    pub program: ProgramHandle,
    pub framebuffer: Option<FramebufferHandle>,
    pub viewport: Option<super::BoundingRectangle>,
    pub scissor: Option<super::BoundingRectangle>,
    pub uniforms: UniformMap,
}

// -----------------------------------------------------------------------------
// Records
// -----------------------------------------------------------------------------

#[derive(Debug)]
struct TextureRecord {
    width: u32,
    height: u32,
    pixel_format: PixelFormat,
    pixel_datatype: PixelDatatype,
    sampler: Sampler,
    data: Vec<u8>,
    label: Option<String>,
}

#[derive(Debug)]
struct ProgramRecord {
    source: String,
}

#[derive(Debug)]
struct FramebufferRecord {
    color_texture: TextureHandle,
}

/// Slots + generations, shared by all three resource kinds. A slot whose
/// generation reaches `u8::MAX` is retired so stale handles never alias.
#[derive(Debug)]
struct Slab<T> {
    slots: Vec<Option<T>>,
    gens: Vec<u8>,
    live: usize,
}

impl<T> Default for Slab<T> {
    fn default() -> Self {
        Self {
            slots: Vec::new(),
            gens: Vec::new(),
            live: 0,
        }
    }
}

impl<T> Slab<T> {
    fn insert(&mut self, value: T) -> (u32, u8) {
        let reusable = self
            .slots
            .iter()
            .zip(&self.gens)
            .position(|(slot, &gen)| slot.is_none() && gen < u8::MAX);
        let index = match reusable {
            Some(i) => i,
            None => {
                self.slots.push(None);
                self.gens.push(0);
                self.slots.len() - 1
            }
        };
        self.gens[index] += 1;
        self.slots[index] = Some(value);
        self.live += 1;
        (index as u32, self.gens[index])
    }

    fn get(&self, index: usize, gen: u8) -> Option<&T> {
        match (self.slots.get(index), self.gens.get(index)) {
            (Some(Some(value)), Some(&g)) if g == gen => Some(value),
            _ => None,
        }
    }

    fn get_mut(&mut self, index: usize, gen: u8) -> Option<&mut T> {
        match self.gens.get(index) {
            Some(&g) if g == gen => self.slots.get_mut(index).and_then(Option::as_mut),
            _ => None,
        }
    }

    fn remove(&mut self, index: usize, gen: u8) -> Option<T> {
        match self.gens.get(index) {
            Some(&g) if g == gen => {
                let removed = self.slots.get_mut(index).and_then(Option::take);
                if removed.is_some() {
                    self.live -= 1;
                }
                removed
            }
            _ => None,
        }
    }
}

// -----------------------------------------------------------------------------
// Context
// -----------------------------------------------------------------------------

#[derive(Debug)]
pub struct HeadlessContext {
    drawing_buffer: (u32, u32),
    capabilities: HeadlessCapabilities,
    textures: Slab<TextureRecord>,
    programs: Slab<ProgramRecord>,
    framebuffers: Slab<FramebufferRecord>,
    stats: HeadlessStats,
    draws: Vec<DrawRecord>,
}

impl HeadlessContext {
    pub fn new(width: u32, height: u32) -> Self {
        Self::with_capabilities(width, height, HeadlessCapabilities::default())
    }

    pub fn with_capabilities(width: u32, height: u32, capabilities: HeadlessCapabilities) -> Self {
        Self {
            drawing_buffer: (width.max(1), height.max(1)),
            capabilities,
            textures: Slab::default(),
            programs: Slab::default(),
            framebuffers: Slab::default(),
            stats: HeadlessStats::default(),
            draws: Vec::new(),
        }
    }

    pub fn set_drawing_buffer_size(&mut self, width: u32, height: u32) {
        self.drawing_buffer = (width.max(1), height.max(1));
    }

    pub fn stats(&self) -> &HeadlessStats {
        &self.stats
    }

    pub fn live_texture_count(&self) -> usize {
        self.textures.live
    }

    pub fn live_program_count(&self) -> usize {
        self.programs.live
    }

    pub fn live_framebuffer_count(&self) -> usize {
        self.framebuffers.live
    }

    pub fn draws(&self) -> &[DrawRecord] {
        &self.draws
    }

    pub fn clear_draws(&mut self) {
        self.draws.clear();
    }

    pub fn is_texture_alive(&self, texture: TextureHandle) -> bool {
        self.textures.get(texture.index(), texture.gen()).is_some()
    }

    pub fn is_program_alive(&self, program: ProgramHandle) -> bool {
        self.programs.get(program.index(), program.gen()).is_some()
    }

    /// Initial contents of a texture, empty for render targets.
    pub fn texture_data(&self, texture: TextureHandle) -> Option<&[u8]> {
        self.textures
            .get(texture.index(), texture.gen())
            .map(|t| t.data.as_slice())
    }

    pub fn texture_label(&self, texture: TextureHandle) -> Option<&str> {
        self.textures
            .get(texture.index(), texture.gen())
            .and_then(|t| t.label.as_deref())
    }

    pub fn texture_format(&self, texture: TextureHandle) -> Option<(PixelFormat, PixelDatatype)> {
        self.textures
            .get(texture.index(), texture.gen())
            .map(|t| (t.pixel_format, t.pixel_datatype))
    }

    pub fn program_source(&self, program: ProgramHandle) -> Option<&str> {
        self.programs
            .get(program.index(), program.gen())
            .map(|p| p.source.as_str())
    }
}

impl GraphicsContext for HeadlessContext {
    fn create_texture(&mut self, desc: &TextureDescriptor<'_>) -> Result<TextureHandle, GpuError> {
        if desc.width == 0 || desc.height == 0 {
            return Err(GpuError::InvalidSource(format!(
                "texture dimensions must be non-zero, got {}x{}",
                desc.width, desc.height
            )));
        }
        let data = match desc.data {
            Some(bytes) if bytes.len() != desc.byte_len() => {
                return Err(GpuError::InvalidSource(format!(
                    "expected {} bytes of pixel data, got {}",
                    desc.byte_len(),
                    bytes.len()
                )));
            }
            Some(bytes) => bytes.to_vec(),
            None => Vec::new(),
        };
        let (index, gen) = self.textures.insert(TextureRecord {
            width: desc.width,
            height: desc.height,
            pixel_format: desc.pixel_format,
            pixel_datatype: desc.pixel_datatype,
            sampler: desc.sampler,
            data,
            label: desc.label.map(str::to_owned),
        });
        self.stats.textures_created += 1;
        let handle = TextureHandle::new(index, gen);
        trace!("created texture {:?} ({}x{})", handle, desc.width, desc.height);
        Ok(handle)
    }

    fn destroy_texture(&mut self, texture: TextureHandle) -> Result<(), GpuError> {
        match self.textures.remove(texture.index(), texture.gen()) {
            Some(_) => {
                self.stats.textures_destroyed += 1;
                trace!("destroyed texture {:?}", texture);
                Ok(())
            }
            None => Err(GpuError::TextureAlreadyDestroyed(texture)),
        }
    }

    fn texture_dimensions(&self, texture: TextureHandle) -> Option<(u32, u32)> {
        self.textures
            .get(texture.index(), texture.gen())
            .map(|t| (t.width, t.height))
    }

    fn texture_sampler(&self, texture: TextureHandle) -> Option<Sampler> {
        self.textures.get(texture.index(), texture.gen()).map(|t| t.sampler)
    }

    fn set_texture_sampler(&mut self, texture: TextureHandle, sampler: Sampler) -> Result<(), GpuError> {
        match self.textures.get_mut(texture.index(), texture.gen()) {
            Some(record) => {
                record.sampler = sampler;
                Ok(())
            }
            None => Err(GpuError::TextureAlreadyDestroyed(texture)),
        }
    }

    fn compile_program(&mut self, source: &ShaderSource) -> Result<ProgramHandle, GpuError> {
        let text = source.combined();
        if !text.contains("main") {
            return Err(GpuError::Compile("fragment shader has no main()".into()));
        }
        let (index, gen) = self.programs.insert(ProgramRecord { source: text });
        self.stats.programs_created += 1;
        let handle = ProgramHandle::new(index, gen);
        debug!("compiled program {:?}", handle);
        Ok(handle)
    }

    fn destroy_program(&mut self, program: ProgramHandle) -> Result<(), GpuError> {
        match self.programs.remove(program.index(), program.gen()) {
            Some(_) => {
                self.stats.programs_destroyed += 1;
                debug!("destroyed program {:?}", program);
                Ok(())
            }
            None => Err(GpuError::ProgramAlreadyDestroyed(program)),
        }
    }

    fn create_framebuffer(
        &mut self,
        width: u32,
        height: u32,
        pixel_format: PixelFormat,
        pixel_datatype: PixelDatatype,
    ) -> Result<Framebuffer, GpuError> {
        let desc = TextureDescriptor::render_target(width, height, pixel_format, pixel_datatype)
            .with_label("framebuffer color attachment");
        let color_texture = self.create_texture(&desc)?;
        let (index, gen) = self.framebuffers.insert(FramebufferRecord { color_texture });
        self.stats.framebuffers_created += 1;
        Ok(Framebuffer {
            handle: FramebufferHandle::new(index, gen),
            color_texture,
            width,
            height,
        })
    }

    fn destroy_framebuffer(&mut self, framebuffer: Framebuffer) -> Result<(), GpuError> {
        let handle = framebuffer.handle;
        let record = self
            .framebuffers
            .remove(handle.index(), handle.gen())
            .ok_or(GpuError::FramebufferAlreadyDestroyed(handle))?;
        self.stats.framebuffers_destroyed += 1;
        self.destroy_texture(record.color_texture)
    }

    fn execute_draw(
        &mut self,
        command: &DrawCommand,
        uniforms: &UniformMap,
        pass: Option<&PassState>,
    ) -> Result<(), GpuError> {
        if !self.is_program_alive(command.program) {
            return Err(GpuError::Draw(format!(
                "program {:?} is not alive",
                command.program
            )));
        }
        if let Some(fb) = command.framebuffer {
            if self.framebuffers.get(fb.handle.index(), fb.handle.gen()).is_none() {
                return Err(GpuError::Draw(format!("framebuffer {:?} is not alive", fb.handle)));
            }
        }
        self.stats.draw_calls += 1;
        self.draws.push(DrawRecord {
            program: command.program,
            framebuffer: command.framebuffer.map(|f| f.handle),
            viewport: command.viewport,
            scissor: pass.map(|p| p.scissor),
            uniforms: uniforms.clone(),
        });
        Ok(())
    }

    fn drawing_buffer_size(&self) -> (u32, u32) {
        self.drawing_buffer
    }

    fn supports_depth_texture(&self) -> bool {
        self.capabilities.depth_texture
    }

    fn supports_float_texture(&self) -> bool {
        self.capabilities.float_texture
    }

    fn supports_half_float_texture(&self) -> bool {
        self.capabilities.half_float_texture
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn double_destroy_is_rejected() {
        let mut ctx = HeadlessContext::new(4, 4);
        let px = [0u8; 16];
        let tex = ctx.create_texture(&TextureDescriptor::rgba8(2, 2, &px)).unwrap();
        assert!(ctx.destroy_texture(tex).is_ok());
        assert_eq!(
            ctx.destroy_texture(tex),
            Err(GpuError::TextureAlreadyDestroyed(tex))
        );
        assert_eq!(ctx.stats().textures_destroyed, 1);
        assert_eq!(ctx.live_texture_count(), 0);
    }

    #[test]
    fn exhausted_slots_are_retired() {
        let mut ctx = HeadlessContext::new(4, 4);
        let px = [0u8; 16];
        let first = ctx.create_texture(&TextureDescriptor::rgba8(2, 2, &px)).unwrap();
        ctx.destroy_texture(first).unwrap();
        for _ in 0..300 {
            let tex = ctx.create_texture(&TextureDescriptor::rgba8(2, 2, &px)).unwrap();
            ctx.destroy_texture(tex).unwrap();
        }
        let live = ctx.create_texture(&TextureDescriptor::rgba8(2, 2, &px)).unwrap();
        assert_ne!(live.index(), first.index());
        assert!(ctx.destroy_texture(first).is_err());
        assert!(ctx.is_texture_alive(live));
        assert_eq!(ctx.live_texture_count(), 1);
    }

    #[test]
    fn reused_slots_reject_stale_handles() {
        let mut ctx = HeadlessContext::new(4, 4);
        let px = [0u8; 4];
        let first = ctx.create_texture(&TextureDescriptor::rgba8(1, 1, &px)).unwrap();
        ctx.destroy_texture(first).unwrap();
        let second = ctx.create_texture(&TextureDescriptor::rgba8(1, 1, &px)).unwrap();
        assert_eq!(first.index(), second.index());
        assert_ne!(first, second);
        assert!(!ctx.is_texture_alive(first));
        assert!(ctx.destroy_texture(first).is_err());
        assert!(ctx.is_texture_alive(second));
    }

    #[test]
    fn wrong_sized_data_is_rejected() {
        let mut ctx = HeadlessContext::new(4, 4);
        let px = [0u8; 3];
        assert!(matches!(
            ctx.create_texture(&TextureDescriptor::rgba8(1, 1, &px)),
            Err(GpuError::InvalidSource(_))
        ));
    }

    #[test]
    fn framebuffers_own_their_color_texture() {
        let mut ctx = HeadlessContext::new(8, 8);
        let fb = ctx
            .create_framebuffer(8, 8, PixelFormat::Rgba, PixelDatatype::UnsignedByte)
            .unwrap();
        assert_eq!(ctx.texture_dimensions(fb.color_texture), Some((8, 8)));
        ctx.destroy_framebuffer(fb).unwrap();
        assert!(!ctx.is_texture_alive(fb.color_texture));
        assert!(ctx.destroy_framebuffer(fb).is_err());
    }

    #[test]
    fn draws_are_recorded() {
        let mut ctx = HeadlessContext::new(8, 8);
        let program = ctx.compile_program(&ShaderSource::new("void main() {}")).unwrap();
        let command = DrawCommand {
            program,
            framebuffer: None,
            viewport: None,
        };
        ctx.execute_draw(&command, &UniformMap::new(), None).unwrap();
        assert_eq!(ctx.stats().draw_calls, 1);
        assert_eq!(ctx.draws()[0].program, program);

        ctx.destroy_program(program).unwrap();
        assert!(ctx.execute_draw(&command, &UniformMap::new(), None).is_err());
    }
}
