//! # Post-process stage
//!
//! A single full-screen pass: one fragment shader, its uniforms, an optional
//! selected-feature lookup, and an output framebuffer owned by the texture
//! cache.
//!
//! Each frame the owner calls [`PostProcessStage::update`] and then, if the
//! stage is ready, [`PostProcessStage::execute`]:
//!
//! 1. **Enable transitions** – turning a stage off releases every GPU resource
//!    it created; turning it back on starts from a clean slate.
//! 2. **Selection** – the selected-feature texture is rebuilt only when the
//!    combined selection changed.
//! 3. **Materialization** – dirty uniforms are resolved, uploaded or fetched.
//! 4. **Command** – the program is recompiled when log depth or the selection
//!    changed.
//! 5. **Readiness** – ready once nothing is pending; then the output
//!    framebuffer and viewport are bound to the draw command.
//!
//! Nothing but `update`, `execute` and `destroy` touches the graphics context.

use log::{debug, info, warn};
use std::sync::Arc;

use crate::command_cache::{CommandCache, CommandRequest, CompiledCommand};
use crate::config::{StageConfig, StageOptions};
use crate::error::{Result, StageError};
use crate::fetch::{FetchError, ImageFetcher, TokioImageFetcher};
use crate::glsl;
use crate::gpu::{BoundingRectangle, GraphicsContext, PassState, TextureHandle, UniformMap};
use crate::materializer::ResourceMaterializer;
use crate::selection::{Selection, SelectionDiffEngine, SelectionTexture};
use crate::texture::{PixelDatatype, Sampler};
use crate::texture_cache::TextureCache;
use crate::uniforms::{insert_uniform, BindingValue, UniformBindingTable, UniformValue};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageState {
    /// Disabled (or destroyed); holds no GPU resources of its own.
    Disabled,
    /// Enabled, but a uniform, the command or the framebuffer is missing.
    AwaitingResources,
    Ready,
}

pub struct PostProcessStage {
    config: StageConfig,
    bindings: UniformBindingTable,
    materializer: ResourceMaterializer,
    selection: SelectionDiffEngine,
    commands: CommandCache,
    texture_cache: Option<Arc<dyn TextureCache>>,
    sampler: Sampler,

    selected: Option<Selection>,
    parent_selected: Option<Selection>,

    enabled: bool,
    was_enabled: bool,
    use_log_depth: bool,
    ready: bool,
    destroyed: bool,
}

impl PostProcessStage {
    /// Creates a stage that loads images on the current tokio runtime, if any.
    pub fn new(options: StageOptions) -> Result<Self> {
        let fetcher = TokioImageFetcher::current().map(|f| Arc::new(f) as Arc<dyn ImageFetcher>);
        Self::with_fetcher(options, fetcher)
    }

    pub fn with_fetcher(options: StageOptions, fetcher: Option<Arc<dyn ImageFetcher>>) -> Result<Self> {
        let (config, uniforms) = options.validate()?;
        debug!("creating post-process stage '{}'", config.name);
        Ok(Self {
            materializer: ResourceMaterializer::new(config.name.clone(), fetcher),
            bindings: UniformBindingTable::from_bindings(uniforms),
            selection: SelectionDiffEngine::new(),
            commands: CommandCache::new(),
            texture_cache: None,
            sampler: Sampler::for_sample_mode(config.sample_mode),
            selected: None,
            parent_selected: None,
            enabled: true,
            was_enabled: true,
            use_log_depth: false,
            ready: false,
            destroyed: false,
            config,
        })
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Self::new(StageOptions::from_json(json)?)
    }

    fn check_alive(&self) -> Result<()> {
        crate::ensure!(!self.destroyed, StageError::Destroyed(self.config.name.clone()));
        Ok(())
    }

    // ----- accessors -----

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn config(&self) -> &StageConfig {
        &self.config
    }

    pub fn ready(&self) -> bool {
        self.ready
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed
    }

    pub fn use_log_depth(&self) -> bool {
        self.use_log_depth
    }

    pub fn state(&self) -> StageState {
        if self.destroyed || !self.enabled {
            return StageState::Disabled;
        }
        let drawable = self
            .commands
            .command()
            .map_or(false, |c| c.draw.framebuffer.is_some());
        if self.ready && drawable {
            StageState::Ready
        } else {
            StageState::AwaitingResources
        }
    }

    pub fn selected(&self) -> Option<&Selection> {
        self.selected.as_ref()
    }

    pub fn parent_selected(&self) -> Option<&Selection> {
        self.parent_selected.as_ref()
    }

    pub fn uniform(&self, name: &str) -> Option<&BindingValue> {
        self.bindings.get_binding(name)
    }

    pub fn uniform_names(&self) -> impl Iterator<Item = &str> {
        self.bindings.names()
    }

    pub fn command(&self) -> Option<&CompiledCommand> {
        self.commands.command()
    }

    pub fn selection_texture(&self) -> Option<SelectionTexture> {
        self.selection.texture()
    }

    pub fn sampler(&self) -> Sampler {
        self.sampler
    }

    pub fn texture_cache(&self) -> Option<&Arc<dyn TextureCache>> {
        self.texture_cache.as_ref()
    }

    /// This stage's output, as currently held by the texture cache.
    pub fn output_texture(&self) -> Option<TextureHandle> {
        self.texture_cache
            .as_ref()
            .and_then(|c| c.output_texture(&self.config.name))
    }

    /// Uniforms whose image failed to load. They keep the stage from becoming
    /// ready until reassigned.
    pub fn failed_uniforms(&self) -> Vec<(String, Arc<FetchError>)> {
        self.materializer
            .failed()
            .into_iter()
            .map(|(name, err)| (name.to_owned(), err))
            .collect()
    }

    /// Whether the context can run this stage at all.
    pub fn is_supported(&self, ctx: &dyn GraphicsContext) -> bool {
        let depth = !glsl::uses_depth_texture(&self.config.fragment_shader) || ctx.supports_depth_texture();
        let datatype = match self.config.pixel_datatype {
            PixelDatatype::Float => ctx.supports_float_texture(),
            PixelDatatype::HalfFloat => ctx.supports_half_float_texture(),
            _ => true,
        };
        depth && datatype
    }

    // ----- mutators -----

    pub fn attach_texture_cache(&mut self, cache: Arc<dyn TextureCache>) -> Result<()> {
        self.check_alive()?;
        self.texture_cache = Some(cache);
        Ok(())
    }

    pub fn set_enabled(&mut self, enabled: bool) -> Result<()> {
        self.check_alive()?;
        self.enabled = enabled;
        Ok(())
    }

    pub fn set_selected(&mut self, selected: Option<Selection>) -> Result<()> {
        self.check_alive()?;
        self.selected = selected;
        Ok(())
    }

    pub fn set_parent_selected(&mut self, parent: Option<Selection>) -> Result<()> {
        self.check_alive()?;
        self.parent_selected = parent;
        Ok(())
    }

    /// Reassigns a uniform. Textures created for the previous value are
    /// released during the next `update`.
    pub fn set_uniform(&mut self, name: impl Into<String>, value: impl Into<BindingValue>) -> Result<()> {
        self.check_alive()?;
        self.bindings.set_binding(name, value.into());
        Ok(())
    }

    // ----- frame -----

    pub fn update(&mut self, ctx: &mut dyn GraphicsContext, use_log_depth: bool) -> Result<()> {
        self.check_alive()?;

        if self.was_enabled && !self.enabled {
            self.release_resources(ctx)?;
            info!("stage '{}' disabled, resources released", self.config.name);
        } else if !self.was_enabled && self.enabled {
            info!("stage '{}' enabled", self.config.name);
        }
        self.was_enabled = self.enabled;
        if !self.enabled {
            return Ok(());
        }

        self.use_log_depth = use_log_depth;

        let selection_dirty =
            self.selection
                .update(ctx, self.selected.as_ref(), self.parent_selected.as_ref())?;

        let cache = self.texture_cache.clone();
        self.materializer
            .process(&mut self.bindings, ctx, cache.as_deref())?;

        let request = CommandRequest {
            fragment_shader: &self.config.fragment_shader,
            use_log_depth,
            selection: self.selection.texture(),
            selection_dirty,
        };
        self.commands.ensure(ctx, &request)?;

        self.sampler = Sampler::for_sample_mode(self.config.sample_mode);

        let was_ready = self.ready;
        self.ready = !self.bindings.has_dirty() && self.materializer.is_settled();
        if self.ready != was_ready {
            debug!("stage '{}' ready: {}", self.config.name, self.ready);
        }
        if !self.ready {
            return Ok(());
        }

        let framebuffer = cache.as_ref().and_then(|c| c.framebuffer(&self.config.name));
        let drawing_buffer = ctx.drawing_buffer_size();
        let viewport = framebuffer.and_then(|fb| {
            ((fb.width, fb.height) != drawing_buffer).then(|| BoundingRectangle::new(0, 0, fb.width, fb.height))
        });
        if let Some(command) = self.commands.command_mut() {
            command.draw.framebuffer = framebuffer;
            command.draw.viewport = viewport;
        }
        Ok(())
    }

    /// Draws the stage into its output framebuffer. Does nothing unless the
    /// stage is enabled, ready and has a framebuffer.
    pub fn execute(
        &mut self,
        ctx: &mut dyn GraphicsContext,
        color_texture: TextureHandle,
        depth_texture: Option<TextureHandle>,
        id_texture: Option<TextureHandle>,
    ) -> Result<()> {
        self.check_alive()?;
        if !self.enabled || !self.ready {
            return Ok(());
        }
        let Some(command) = self.commands.command() else {
            return Ok(());
        };
        if command.draw.framebuffer.is_none() {
            return Ok(());
        }

        if ctx.texture_sampler(color_texture) != Some(self.sampler) {
            ctx.set_texture_sampler(color_texture, self.sampler)?;
        }

        let mut uniforms = UniformMap::new();
        insert_uniform(&mut uniforms, "colorTexture", UniformValue::Texture(color_texture), &*ctx);
        if let Some(depth) = depth_texture {
            insert_uniform(&mut uniforms, "depthTexture", UniformValue::Texture(depth), &*ctx);
        }
        if let Some(id) = id_texture {
            uniforms.insert("czm_idTexture".into(), UniformValue::Texture(id));
        }
        if let Some(selection) = self.selection.texture() {
            uniforms.insert(
                "czm_selectedIdTexture".into(),
                UniformValue::Texture(selection.handle),
            );
            uniforms.insert(
                "czm_selectedIdTextureStep".into(),
                UniformValue::Float(selection.step()),
            );
        }
        // user uniforms win over built-ins of the same name
        self.bindings
            .bind_into(&mut uniforms, &*ctx, self.texture_cache.as_deref());

        let scissor = self.config.scissor_rectangle;
        let pass = (!scissor.is_empty()).then_some(PassState { scissor });
        ctx.execute_draw(&command.draw, &uniforms, pass.as_ref())?;
        Ok(())
    }

    fn release_resources(&mut self, ctx: &mut dyn GraphicsContext) -> Result<()> {
        self.commands.release(ctx)?;
        self.selection.release(ctx)?;
        self.materializer.release_all(&mut self.bindings, ctx)?;
        self.ready = false;
        Ok(())
    }

    /// Releases every GPU resource the stage created. Any later call other
    /// than `is_destroyed` fails with [`StageError::Destroyed`].
    pub fn destroy(&mut self, ctx: &mut dyn GraphicsContext) -> Result<()> {
        self.check_alive()?;
        self.release_resources(ctx)?;
        self.materializer.shutdown();
        self.destroyed = true;
        info!("stage '{}' destroyed", self.config.name);
        Ok(())
    }
}

impl Drop for PostProcessStage {
    fn drop(&mut self) {
        if !self.destroyed && self.commands.command().is_some() {
            warn!(
                "stage '{}' dropped without destroy(); its GPU resources were not released",
                self.config.name
            );
        }
    }
}

impl std::fmt::Debug for PostProcessStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostProcessStage")
            .field("name", &self.config.name)
            .field("enabled", &self.enabled)
            .field("ready", &self.ready)
            .field("destroyed", &self.destroyed)
            .field("uniforms", &self.bindings.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::testing::ManualFetcher;
    use crate::gpu::{HeadlessCapabilities, HeadlessContext};
    use crate::selection::{selection, Feature, FeatureRef, PickId};
    use crate::texture::{ImageSource, PixelFormat, TextureDescriptor, TextureFilter};
    use crate::texture_cache::SimpleTextureCache;
    use glam::Vec2;

    const FS: &str = "uniform sampler2D colorTexture;\n\
                      varying vec2 v_textureCoordinates;\n\
                      void main() { gl_FragColor = texture2D(colorTexture, v_textureCoordinates); }";

    struct Harness {
        ctx: HeadlessContext,
        cache: Arc<SimpleTextureCache>,
        fetcher: Arc<ManualFetcher>,
        stage: PostProcessStage,
        color: TextureHandle,
    }

    impl Harness {
        fn new(options: StageOptions) -> Self {
            let mut ctx = HeadlessContext::new(64, 32);
            let fetcher = ManualFetcher::new();
            let dyn_fetcher: Arc<dyn ImageFetcher> = fetcher.clone();
            let mut stage = PostProcessStage::with_fetcher(options, Some(dyn_fetcher)).unwrap();

            let cache = Arc::new(SimpleTextureCache::new());
            cache.register(stage.config());
            cache.update(&mut ctx).unwrap();
            let dyn_cache: Arc<dyn TextureCache> = cache.clone();
            stage.attach_texture_cache(dyn_cache).unwrap();

            let pixels = vec![0u8; 64 * 32 * 4];
            let color = ctx.create_texture(&TextureDescriptor::rgba8(64, 32, &pixels)).unwrap();
            Self {
                ctx,
                cache,
                fetcher,
                stage,
                color,
            }
        }

        fn update(&mut self) {
            self.stage.update(&mut self.ctx, false).unwrap();
        }

        fn execute(&mut self) {
            self.stage.execute(&mut self.ctx, self.color, None, None).unwrap();
        }

        fn last_uniforms(&self) -> &UniformMap {
            &self.ctx.draws().last().unwrap().uniforms
        }
    }

    fn features(n: u32) -> Vec<FeatureRef> {
        (0..n)
            .map(|i| Arc::new(Feature::single(PickId::from_key(i + 1))))
            .collect()
    }

    #[test]
    fn construction_validates_options() {
        let err = PostProcessStage::with_fetcher(StageOptions::new(FS).with_texture_scale(0.0), None).unwrap_err();
        assert!(matches!(err, StageError::InvalidTextureScale(_)));
        let err = PostProcessStage::with_fetcher(
            StageOptions::new(FS).with_pixel_format(PixelFormat::DepthStencil),
            None,
        )
        .unwrap_err();
        assert!(matches!(err, StageError::NonColorPixelFormat(_)));

        let stage = PostProcessStage::with_fetcher(StageOptions::new(FS), None).unwrap();
        assert_eq!(stage.name().len(), 36);
        assert!(!stage.ready());
        assert!(stage.enabled());
    }

    #[test]
    fn one_constant_uniform_one_draw() {
        let mut h = Harness::new(StageOptions::new(FS).with_uniform("amount", UniformValue::Float(0.25)));
        h.update();
        assert!(h.stage.ready());
        assert_eq!(h.stage.state(), StageState::Ready);

        h.execute();
        assert_eq!(h.ctx.stats().draw_calls, 1);
        let draw = h.ctx.draws()[0].clone();
        assert_eq!(draw.framebuffer, h.cache.framebuffer(h.stage.name()).map(|f| f.handle));
        assert!(draw.scissor.is_none());
        assert!(draw.viewport.is_none());
        assert_eq!(draw.uniforms["amount"], UniformValue::Float(0.25));
        assert_eq!(draw.uniforms["colorTexture"], UniformValue::Texture(h.color));
        assert_eq!(
            draw.uniforms["colorTextureDimensions"],
            UniformValue::Vec2(Vec2::new(64.0, 32.0))
        );
        assert!(!draw.uniforms.contains_key("czm_selectedIdTexture"));
    }

    #[test]
    fn repeated_updates_allocate_nothing() {
        let mut h = Harness::new(
            StageOptions::new(FS).with_uniform("lut", BindingValue::Image(ImageSource::solid(4, 4, [1; 4]))),
        );
        h.stage
            .set_selected(Some(selection(features(2))))
            .unwrap();
        h.update();
        let after_first = h.ctx.stats().clone();
        h.update();
        h.update();
        assert_eq!(h.ctx.stats(), &after_first);
        assert_eq!(h.stage.commands.builds(), 1);
    }

    #[test]
    fn uri_uniforms_become_ready_after_the_fetch() {
        let mut h = Harness::new(StageOptions::new(FS).with_uniform("noise", BindingValue::uri("noise.png")));
        h.update();
        assert!(!h.stage.ready());
        assert_eq!(h.stage.state(), StageState::AwaitingResources);
        h.execute();
        assert_eq!(h.ctx.stats().draw_calls, 0);

        h.fetcher.resolve("noise.png", Ok(ImageSource::solid(2, 3, [5; 4])));
        h.update();
        assert!(h.stage.ready());
        h.execute();
        let uniforms = h.last_uniforms();
        assert!(matches!(uniforms["noise"], UniformValue::Texture(_)));
        assert_eq!(uniforms["noiseDimensions"], UniformValue::Vec2(Vec2::new(2.0, 3.0)));
    }

    #[test]
    fn failed_fetches_keep_the_stage_waiting() {
        let mut h = Harness::new(StageOptions::new(FS).with_uniform("noise", BindingValue::uri("missing.png")));
        h.update();
        let err = std::io::Error::new(std::io::ErrorKind::NotFound, "missing.png");
        h.fetcher.resolve("missing.png", Err(FetchError::Io(err)));
        h.update();
        h.update();
        assert!(!h.stage.ready());
        let failed = h.stage.failed_uniforms();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].0, "noise");

        h.stage.set_uniform("noise", UniformValue::Float(1.0)).unwrap();
        h.update();
        assert!(h.stage.ready());
        assert!(h.stage.failed_uniforms().is_empty());
    }

    #[test]
    fn stage_references_track_the_current_output() {
        let mut h = Harness::new(StageOptions::new(FS).with_uniform("previous", BindingValue::uri("blur")));
        let (blur, _) = StageOptions::new(FS).with_name("blur").validate().unwrap();
        h.cache.register(&blur);
        h.cache.update(&mut h.ctx).unwrap();

        h.update();
        assert!(h.stage.ready());
        assert!(h.fetcher.pending_uris().is_empty());
        h.execute();
        let first = h.cache.output_texture("blur").unwrap();
        assert_eq!(h.last_uniforms()["previous"], UniformValue::Texture(first));

        h.ctx.set_drawing_buffer_size(128, 64);
        h.cache.update(&mut h.ctx).unwrap();
        h.update();
        h.execute();
        let second = h.cache.output_texture("blur").unwrap();
        assert_ne!(first, second);
        assert_eq!(h.last_uniforms()["previous"], UniformValue::Texture(second));
        assert_eq!(
            h.last_uniforms()["previousDimensions"],
            UniformValue::Vec2(Vec2::new(128.0, 64.0))
        );
    }

    #[test]
    fn missing_stage_references_keep_the_stage_waiting() {
        let mut h = Harness::new(StageOptions::new(FS).with_uniform("previous", BindingValue::stage("nope")));
        h.update();
        h.execute();
        assert!(!h.stage.ready());
        assert_eq!(h.stage.state(), StageState::AwaitingResources);
        assert_eq!(h.ctx.stats().draw_calls, 0);

        let (nope, _) = StageOptions::new(FS).with_name("nope").validate().unwrap();
        h.cache.register(&nope);
        h.cache.update(&mut h.ctx).unwrap();
        h.update();
        assert!(h.stage.ready());
        h.execute();
        let output = h.cache.output_texture("nope").unwrap();
        assert_eq!(h.last_uniforms()["previous"], UniformValue::Texture(output));
    }

    #[test]
    fn providers_are_not_treated_as_stage_references() {
        let mut h = Harness::new(
            StageOptions::new(FS).with_uniform("blur", BindingValue::provider(|| UniformValue::Float(0.5))),
        );
        let (blur, _) = StageOptions::new(FS).with_name("blur").validate().unwrap();
        h.cache.register(&blur);
        h.cache.update(&mut h.ctx).unwrap();

        h.update();
        assert!(h.stage.ready());
        assert!(h.fetcher.pending_uris().is_empty());
        h.execute();
        assert_eq!(h.last_uniforms()["blur"], UniformValue::Float(0.5));
        assert!(!h.last_uniforms().contains_key("blurDimensions"));
    }

    #[test]
    fn reassigning_an_image_releases_the_old_texture() {
        let mut h = Harness::new(
            StageOptions::new(FS).with_uniform("lut", BindingValue::Image(ImageSource::solid(1, 1, [0; 4]))),
        );
        h.update();
        let textures = h.ctx.live_texture_count();
        h.stage
            .set_uniform("lut", BindingValue::Image(ImageSource::solid(2, 2, [0; 4])))
            .unwrap();
        h.update();
        assert_eq!(h.ctx.live_texture_count(), textures);
        assert_eq!(h.ctx.stats().textures_destroyed, 1);
    }

    #[test]
    fn disable_then_enable_returns_to_baseline() {
        let mut h = Harness::new(
            StageOptions::new(FS).with_uniform("lut", BindingValue::Image(ImageSource::solid(2, 2, [0; 4]))),
        );
        let baseline = (h.ctx.live_texture_count(), h.ctx.live_program_count());
        h.stage.set_selected(Some(selection(features(3)))).unwrap();
        h.update();
        assert_eq!(h.ctx.live_texture_count(), baseline.0 + 2);
        assert_eq!(h.ctx.live_program_count(), 1);

        h.stage.set_enabled(false).unwrap();
        h.update();
        assert_eq!((h.ctx.live_texture_count(), h.ctx.live_program_count()), baseline);
        assert_eq!(h.stage.state(), StageState::Disabled);
        h.execute();
        assert_eq!(h.ctx.stats().draw_calls, 0);

        h.update();
        assert_eq!((h.ctx.live_texture_count(), h.ctx.live_program_count()), baseline);

        h.stage.set_enabled(true).unwrap();
        h.update();
        assert!(h.stage.ready());
        assert_eq!(h.ctx.live_texture_count(), baseline.0 + 2);
        assert_eq!(h.stage.selection_texture().map(|t| t.width), Some(3));
        h.execute();
        assert_eq!(h.ctx.stats().draw_calls, 1);
    }

    #[test]
    fn selection_changes_rebuild_texture_and_program() {
        let mut h = Harness::new(StageOptions::new(FS));
        let f = features(2);
        h.stage.set_selected(Some(selection(f.clone()))).unwrap();
        h.update();
        let program = h.stage.command().unwrap().draw.program;
        assert!(h.ctx.program_source(program).unwrap().contains("czm_selected()"));

        h.stage.set_selected(Some(selection(f.clone()))).unwrap();
        h.update();
        assert_eq!(h.stage.command().unwrap().draw.program, program);

        h.stage.set_parent_selected(Some(selection(features(1)))).unwrap();
        h.update();
        assert_ne!(h.stage.command().unwrap().draw.program, program);
        assert_eq!(h.stage.selection_texture().unwrap().width, 3);

        h.execute();
        assert_eq!(
            h.last_uniforms()["czm_selectedIdTextureStep"],
            UniformValue::Float(1.0 / 3.0)
        );
        assert_eq!(h.ctx.live_program_count(), 1);
    }

    #[test]
    fn empty_selection_uses_the_sentinel_texture() {
        let mut h = Harness::new(StageOptions::new(FS));
        h.stage.set_selected(Some(selection(Vec::new()))).unwrap();
        h.update();
        let texture = h.stage.selection_texture().unwrap();
        assert_eq!(texture.width, 1);
        assert_eq!(h.ctx.texture_data(texture.handle), Some(&[255u8, 255, 255, 255][..]));
    }

    #[test]
    fn log_depth_changes_recompile() {
        let mut h = Harness::new(StageOptions::new(FS));
        h.update();
        let program = h.stage.command().unwrap().draw.program;
        h.stage.update(&mut h.ctx, true).unwrap();
        let log_program = h.stage.command().unwrap().draw.program;
        assert_ne!(program, log_program);
        assert!(h.stage.use_log_depth());
        assert!(h.ctx.program_source(log_program).unwrap().contains("#define LOG_DEPTH"));
        assert_eq!(h.ctx.live_program_count(), 1);
    }

    #[test]
    fn scissor_rectangle_adds_a_pass_state() {
        let rect = BoundingRectangle::new(4, 4, 16, 8);
        let mut h = Harness::new(StageOptions::new(FS).with_scissor_rectangle(rect));
        h.update();
        h.execute();
        assert_eq!(h.ctx.draws()[0].scissor, Some(rect));
    }

    #[test]
    fn scaled_outputs_get_a_viewport() {
        let mut h = Harness::new(StageOptions::new(FS).with_texture_scale(0.5));
        h.update();
        assert_eq!(
            h.stage.command().unwrap().draw.viewport,
            Some(BoundingRectangle::new(0, 0, 32, 16))
        );
    }

    #[test]
    fn execute_syncs_the_color_sampler() {
        let mut h = Harness::new(StageOptions::new(FS));
        assert_eq!(h.ctx.texture_sampler(h.color), Some(Sampler::LINEAR));
        h.update();
        h.execute();
        let sampler = h.ctx.texture_sampler(h.color).unwrap();
        assert_eq!(sampler.min_filter, TextureFilter::Nearest);
        assert_eq!(sampler.mag_filter, TextureFilter::Nearest);
    }

    #[test]
    fn destroyed_stages_reject_everything() {
        let mut h = Harness::new(
            StageOptions::new(FS).with_uniform("lut", BindingValue::Image(ImageSource::solid(1, 1, [0; 4]))),
        );
        h.update();
        h.stage.destroy(&mut h.ctx).unwrap();
        assert!(h.stage.is_destroyed());
        assert_eq!(h.ctx.live_program_count(), 0);
        assert_eq!(h.ctx.live_texture_count(), 2);

        assert!(h.stage.update(&mut h.ctx, false).unwrap_err().is_destroyed());
        assert!(h.stage.execute(&mut h.ctx, h.color, None, None).unwrap_err().is_destroyed());
        assert!(h.stage.set_uniform("lut", UniformValue::Int(1)).unwrap_err().is_destroyed());
        assert!(h.stage.set_enabled(false).unwrap_err().is_destroyed());
        assert!(h.stage.destroy(&mut h.ctx).unwrap_err().is_destroyed());
        assert_eq!(h.stage.state(), StageState::Disabled);
    }

    #[test]
    fn late_completions_after_destroy_are_ignored() {
        let mut h = Harness::new(StageOptions::new(FS).with_uniform("noise", BindingValue::uri("noise.png")));
        h.update();
        let created = h.ctx.stats().textures_created;
        h.stage.destroy(&mut h.ctx).unwrap();
        assert!(h.fetcher.resolve("noise.png", Ok(ImageSource::solid(1, 1, [0; 4]))));
        assert_eq!(h.ctx.stats().textures_created, created);
    }

    #[test]
    fn support_depends_on_capabilities() {
        let depth_fs = "uniform sampler2D depthTexture;\nvoid main() {}";
        let stage = PostProcessStage::with_fetcher(StageOptions::new(depth_fs), None).unwrap();
        let half = PostProcessStage::with_fetcher(
            StageOptions::new(FS).with_pixel_datatype(PixelDatatype::HalfFloat),
            None,
        )
        .unwrap();

        let full = HeadlessContext::new(8, 8);
        let limited = HeadlessContext::with_capabilities(
            8,
            8,
            HeadlessCapabilities {
                depth_texture: false,
                float_texture: false,
                half_float_texture: false,
            },
        );
        assert!(stage.is_supported(&full));
        assert!(!stage.is_supported(&limited));
        assert!(half.is_supported(&full));
        assert!(!half.is_supported(&limited));
    }

    #[test]
    fn stages_build_from_json() {
        let stage = PostProcessStage::from_json(
            r#"{ "fragmentShader": "void main() {}", "name": "json", "uniforms": { "amount": 2 } }"#,
        )
        .unwrap();
        assert_eq!(stage.name(), "json");
        assert_eq!(
            stage.uniform("amount"),
            Some(&BindingValue::Constant(UniformValue::Float(2.0)))
        );
        assert_eq!(stage.uniform_names().collect::<Vec<_>>(), vec!["amount"]);
    }
}
