//! Turns dirty uniform bindings into GPU resources.
//!
//! Stage references resolve on the spot, in-memory images are uploaded during
//! the same update, and URIs go through an [`ImageFetcher`]. Fetch completions
//! arrive on a channel and are merged on a later `process` call, so the render
//! thread is the only one touching the binding table.

use crossbeam::channel::{unbounded, Receiver, Sender};
use log::{debug, error, trace, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::context::Context;
use crate::error::Result;
use crate::fetch::{FetchError, FetchResult, ImageFetcher};
use crate::gpu::GraphicsContext;
use crate::texture::{ImageSource, TextureDescriptor};
use crate::texture_cache::TextureCache;
use crate::uniforms::{BindingValue, ResolvedValue, UniformBindingTable};

#[derive(Debug, Clone)]
pub enum RequestState {
    Pending,
    Loaded,
    Failed(Arc<FetchError>),
}

/// One outstanding image load for a binding.
#[derive(Debug, Clone)]
pub struct MaterializationRequest {
    pub binding: String,
    /// Binding generation the request was started for.
    pub generation: u64,
    pub uri: String,
    pub state: RequestState,
}

impl MaterializationRequest {
    pub fn is_pending(&self) -> bool {
        matches!(self.state, RequestState::Pending)
    }

    pub fn error(&self) -> Option<&Arc<FetchError>> {
        match &self.state {
            RequestState::Failed(e) => Some(e),
            _ => None,
        }
    }
}

struct Completion {
    binding: String,
    generation: u64,
    result: FetchResult,
}

struct Upload {
    binding: String,
    generation: u64,
    image: ImageSource,
}

pub struct ResourceMaterializer {
    stage: String,
    fetcher: Option<Arc<dyn ImageFetcher>>,
    requests: Vec<MaterializationRequest>,
    uploads: Vec<Upload>,
    tx: Sender<Completion>,
    rx: Receiver<Completion>,
    alive: Arc<AtomicBool>,
}

impl ResourceMaterializer {
    pub fn new(stage: impl Into<String>, fetcher: Option<Arc<dyn ImageFetcher>>) -> Self {
        let (tx, rx) = unbounded();
        Self {
            stage: stage.into(),
            fetcher,
            requests: Vec::new(),
            uploads: Vec::new(),
            tx,
            rx,
            alive: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn requests(&self) -> &[MaterializationRequest] {
        &self.requests
    }

    pub fn has_pending(&self) -> bool {
        self.requests.iter().any(MaterializationRequest::is_pending) || !self.uploads.is_empty()
    }

    /// Failed loads, by binding name.
    pub fn failed(&self) -> Vec<(&str, Arc<FetchError>)> {
        self.requests
            .iter()
            .filter_map(|r| r.error().map(|e| (r.binding.as_str(), Arc::clone(e))))
            .collect()
    }

    /// Nothing in flight, nothing failed, nothing waiting for upload.
    pub fn is_settled(&self) -> bool {
        self.requests.is_empty() && self.uploads.is_empty()
    }

    /// One materialization pass. Fetch failures are recorded, never returned.
    pub fn process(
        &mut self,
        table: &mut UniformBindingTable,
        ctx: &mut dyn GraphicsContext,
        cache: Option<&dyn TextureCache>,
    ) -> Result<()> {
        // Reassigned bindings invalidate whatever was started for them.
        self.requests
            .retain(|r| table.generation(&r.binding) == Some(r.generation));
        self.drain_completions();

        self.release_pending(table, ctx)?;

        let mut waiting = Vec::new();
        for name in table.enumerate_dirty() {
            let Some(value) = table.get_binding(&name).cloned() else {
                continue;
            };
            let Some(generation) = table.generation(&name) else {
                continue;
            };
            match value {
                BindingValue::StageRef(stage) if cache.map_or(false, |c| c.has_stage(&stage)) => {
                    table.resolve(name, ResolvedValue::StageOutput(stage));
                }
                BindingValue::StageRef(stage) => {
                    trace!("uniform '{}' waits for stage '{}'", name, stage);
                    waiting.push(name);
                }
                BindingValue::Uri(uri) if cache.map_or(false, |c| c.has_stage(&uri)) => {
                    trace!("uniform '{}' references stage '{}'", name, uri);
                    table.resolve(name, ResolvedValue::StageOutput(uri));
                }
                BindingValue::Image(image) => self.uploads.push(Upload {
                    binding: name,
                    generation,
                    image,
                }),
                BindingValue::Uri(uri) => self.start_fetch(name, generation, uri),
                BindingValue::Constant(_) | BindingValue::Texture(_) | BindingValue::Provider(_) => {}
            }
        }

        // Unresolved stage references are retried next pass and keep the stage not ready.
        for name in &waiting {
            table.mark_dirty(name);
        }

        // Fetchers may complete synchronously, e.g. on a cache hit.
        self.drain_completions();
        self.upload(table, ctx)
    }

    fn start_fetch(&mut self, binding: String, generation: u64, uri: String) {
        let in_flight = self
            .requests
            .iter()
            .any(|r| r.binding == binding && r.generation == generation && r.is_pending());
        if in_flight {
            return;
        }

        let Some(fetcher) = self.fetcher.clone() else {
            error!(
                "stage '{}': cannot load '{}' for uniform '{}': no image fetcher",
                self.stage, uri, binding
            );
            self.requests.push(MaterializationRequest {
                binding,
                generation,
                state: RequestState::Failed(Arc::new(FetchError::NoFetcher(uri.clone()))),
                uri,
            });
            return;
        };

        debug!("stage '{}': fetching '{}' for uniform '{}'", self.stage, uri, binding);
        self.requests.push(MaterializationRequest {
            binding: binding.clone(),
            generation,
            uri: uri.clone(),
            state: RequestState::Pending,
        });

        let tx = self.tx.clone();
        let alive = Arc::clone(&self.alive);
        fetcher.fetch(
            &uri,
            Box::new(move |result| {
                if !alive.load(Ordering::Acquire) {
                    trace!("dropping completion for '{}': stage is gone", binding);
                    return;
                }
                let _ = tx.send(Completion {
                    binding,
                    generation,
                    result,
                });
            }),
        );
    }

    fn drain_completions(&mut self) {
        while let Ok(completion) = self.rx.try_recv() {
            let request = self.requests.iter_mut().find(|r| {
                r.binding == completion.binding && r.generation == completion.generation && r.is_pending()
            });
            let Some(request) = request else {
                warn!(
                    "stage '{}': discarding stale image for uniform '{}'",
                    self.stage, completion.binding
                );
                continue;
            };
            match completion.result {
                Ok(image) => {
                    request.state = RequestState::Loaded;
                    self.uploads.push(Upload {
                        binding: completion.binding,
                        generation: completion.generation,
                        image,
                    });
                }
                Err(e) => {
                    error!(
                        "stage '{}': failed to load '{}' for uniform '{}': {}",
                        self.stage, request.uri, request.binding, e
                    );
                    request.state = RequestState::Failed(Arc::new(e));
                }
            }
        }
        self.requests.retain(|r| !matches!(r.state, RequestState::Loaded));
    }

    fn upload(&mut self, table: &mut UniformBindingTable, ctx: &mut dyn GraphicsContext) -> Result<()> {
        for upload in std::mem::take(&mut self.uploads) {
            if table.generation(&upload.binding) != Some(upload.generation) {
                continue;
            }
            if let Some(old) = table.resolved(&upload.binding).and_then(ResolvedValue::owned_texture) {
                ctx.destroy_texture(old)
                    .with_context(|| format!("releasing texture of uniform '{}'", upload.binding))?;
            }
            let desc = TextureDescriptor::from_image(&upload.image).with_label(&upload.binding);
            let texture = ctx
                .create_texture(&desc)
                .with_context(|| format!("creating texture for uniform '{}'", upload.binding))?;
            debug!(
                "stage '{}': uniform '{}' -> {:?} ({}x{})",
                self.stage,
                upload.binding,
                texture,
                upload.image.width(),
                upload.image.height()
            );
            table.resolve(upload.binding, ResolvedValue::OwnedTexture(texture));
        }
        Ok(())
    }

    /// Destroys textures queued by reassignments.
    pub fn release_pending(
        &mut self,
        table: &mut UniformBindingTable,
        ctx: &mut dyn GraphicsContext,
    ) -> Result<()> {
        for texture in table.take_pending_release() {
            trace!("stage '{}': destroying {:?}", self.stage, texture);
            ctx.destroy_texture(texture).context("releasing uniform texture")?;
        }
        Ok(())
    }

    /// Destroys every texture the stage created and forgets outstanding work.
    /// Affected bindings are dirty again afterwards.
    pub fn release_all(&mut self, table: &mut UniformBindingTable, ctx: &mut dyn GraphicsContext) -> Result<()> {
        for request in self.requests.drain(..) {
            table.mark_dirty(&request.binding);
        }
        for upload in self.uploads.drain(..) {
            table.mark_dirty(&upload.binding);
        }
        for texture in table.release_owned() {
            ctx.destroy_texture(texture).context("releasing uniform texture")?;
        }
        while self.rx.try_recv().is_ok() {}
        Ok(())
    }

    /// Stops accepting completions. In-flight fetches finish into the void.
    pub fn shutdown(&mut self) {
        self.alive.store(false, Ordering::Release);
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }
}

impl Drop for ResourceMaterializer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for ResourceMaterializer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceMaterializer")
            .field("stage", &self.stage)
            .field("requests", &self.requests)
            .field("uploads", &self.uploads.len())
            .field("alive", &self.is_alive())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StageOptions;
    use crate::fetch::testing::ManualFetcher;
    use crate::gpu::HeadlessContext;
    use crate::texture_cache::SimpleTextureCache;

    fn setup() -> (Arc<ManualFetcher>, ResourceMaterializer, UniformBindingTable, HeadlessContext) {
        let fetcher = ManualFetcher::new();
        let dyn_fetcher: Arc<dyn ImageFetcher> = fetcher.clone();
        let materializer = ResourceMaterializer::new("test", Some(dyn_fetcher));
        (fetcher, materializer, UniformBindingTable::new(), HeadlessContext::new(8, 8))
    }

    #[test]
    fn in_memory_images_upload_in_the_same_pass() {
        let (_, mut m, mut table, mut ctx) = setup();
        table.set_binding("lut", BindingValue::Image(ImageSource::solid(4, 1, [9; 4])));
        m.process(&mut table, &mut ctx, None).unwrap();

        let tex = table.resolved("lut").and_then(ResolvedValue::owned_texture).unwrap();
        assert_eq!(ctx.texture_dimensions(tex), Some((4, 1)));
        assert_eq!(ctx.texture_label(tex), Some("lut"));
        assert!(m.is_settled());
    }

    #[test]
    fn uris_complete_on_a_later_pass() {
        let (fetcher, mut m, mut table, mut ctx) = setup();
        table.set_binding("noise", BindingValue::uri("noise.png"));
        m.process(&mut table, &mut ctx, None).unwrap();
        assert!(m.has_pending());
        assert!(!m.is_settled());
        assert_eq!(fetcher.pending_uris(), vec!["noise.png"]);

        m.process(&mut table, &mut ctx, None).unwrap();
        assert_eq!(fetcher.pending_uris().len(), 1);

        assert!(fetcher.resolve("noise.png", Ok(ImageSource::solid(2, 2, [0; 4]))));
        assert!(table.resolved("noise").is_none());
        m.process(&mut table, &mut ctx, None).unwrap();
        assert!(m.is_settled());
        assert!(table.resolved("noise").and_then(ResolvedValue::owned_texture).is_some());
        assert_eq!(ctx.live_texture_count(), 1);
    }

    #[test]
    fn reassignment_supersedes_an_in_flight_fetch() {
        let (fetcher, mut m, mut table, mut ctx) = setup();
        table.set_binding("noise", BindingValue::uri("a.png"));
        m.process(&mut table, &mut ctx, None).unwrap();
        table.set_binding("noise", BindingValue::uri("b.png"));
        m.process(&mut table, &mut ctx, None).unwrap();

        fetcher.resolve("a.png", Ok(ImageSource::solid(1, 1, [0; 4])));
        m.process(&mut table, &mut ctx, None).unwrap();
        assert_eq!(ctx.live_texture_count(), 0);
        assert!(m.has_pending());

        fetcher.resolve("b.png", Ok(ImageSource::solid(3, 3, [0; 4])));
        m.process(&mut table, &mut ctx, None).unwrap();
        let tex = table.resolved("noise").and_then(ResolvedValue::owned_texture).unwrap();
        assert_eq!(ctx.texture_dimensions(tex), Some((3, 3)));
        assert!(m.is_settled());
    }

    #[test]
    fn reassignment_releases_the_old_texture() {
        let (_, mut m, mut table, mut ctx) = setup();
        table.set_binding("lut", BindingValue::Image(ImageSource::solid(1, 1, [0; 4])));
        m.process(&mut table, &mut ctx, None).unwrap();
        let first = table.resolved("lut").and_then(ResolvedValue::owned_texture).unwrap();

        table.set_binding("lut", BindingValue::Image(ImageSource::solid(2, 2, [0; 4])));
        m.process(&mut table, &mut ctx, None).unwrap();
        assert!(!ctx.is_texture_alive(first));
        assert_eq!(ctx.live_texture_count(), 1);
        assert_eq!(ctx.stats().textures_destroyed, 1);
    }

    #[test]
    fn failures_block_until_reassigned() {
        let (fetcher, mut m, mut table, mut ctx) = setup();
        table.set_binding("noise", BindingValue::uri("missing.png"));
        m.process(&mut table, &mut ctx, None).unwrap();
        let err = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        fetcher.resolve("missing.png", Err(FetchError::Io(err)));
        m.process(&mut table, &mut ctx, None).unwrap();

        assert!(!m.is_settled());
        assert!(!m.has_pending());
        let failed = m.failed();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].0, "noise");
        assert!(matches!(*failed[0].1, FetchError::Io(_)));

        table.set_binding("noise", BindingValue::constant(0.0f32));
        m.process(&mut table, &mut ctx, None).unwrap();
        assert!(m.is_settled());
    }

    #[test]
    fn stage_names_resolve_without_fetching() {
        let (fetcher, mut m, mut table, mut ctx) = setup();
        let cache = SimpleTextureCache::new();
        let (config, _) = StageOptions::new("void main() {}").with_name("blur").validate().unwrap();
        cache.register(&config);

        table.set_binding("previous", BindingValue::uri("blur"));
        table.set_binding("explicit", BindingValue::stage("blur"));
        m.process(&mut table, &mut ctx, Some(&cache)).unwrap();

        assert!(fetcher.pending_uris().is_empty());
        assert_eq!(
            table.resolved("previous"),
            Some(&ResolvedValue::StageOutput("blur".into()))
        );
        assert_eq!(
            table.resolved("explicit"),
            Some(&ResolvedValue::StageOutput("blur".into()))
        );
        assert!(m.is_settled());
    }

    #[test]
    fn stage_references_wait_for_the_stage() {
        let (fetcher, mut m, mut table, mut ctx) = setup();
        let cache = SimpleTextureCache::new();
        table.set_binding("previous", BindingValue::stage("nope"));

        m.process(&mut table, &mut ctx, Some(&cache)).unwrap();
        assert!(table.resolved("previous").is_none());
        assert!(table.has_dirty());
        assert!(fetcher.pending_uris().is_empty());

        m.process(&mut table, &mut ctx, None).unwrap();
        assert!(table.has_dirty());

        let (config, _) = StageOptions::new("void main() {}").with_name("nope").validate().unwrap();
        cache.register(&config);
        m.process(&mut table, &mut ctx, Some(&cache)).unwrap();
        assert_eq!(
            table.resolved("previous"),
            Some(&ResolvedValue::StageOutput("nope".into()))
        );
        assert!(!table.has_dirty());
    }

    #[test]
    fn missing_fetcher_fails_the_request() {
        let mut m = ResourceMaterializer::new("test", None);
        let mut table = UniformBindingTable::new();
        let mut ctx = HeadlessContext::new(8, 8);
        table.set_binding("noise", BindingValue::uri("noise.png"));
        m.process(&mut table, &mut ctx, None).unwrap();
        assert!(matches!(*m.failed()[0].1, FetchError::NoFetcher(_)));
    }

    #[test]
    fn completions_after_shutdown_are_dropped() {
        let (fetcher, mut m, mut table, mut ctx) = setup();
        table.set_binding("noise", BindingValue::uri("noise.png"));
        m.process(&mut table, &mut ctx, None).unwrap();

        m.shutdown();
        assert!(fetcher.resolve("noise.png", Ok(ImageSource::solid(1, 1, [0; 4]))));
        m.process(&mut table, &mut ctx, None).unwrap();
        assert_eq!(ctx.stats().textures_created, 0);
    }

    #[test]
    fn release_all_returns_to_baseline() {
        let (fetcher, mut m, mut table, mut ctx) = setup();
        table.set_binding("lut", BindingValue::Image(ImageSource::solid(1, 1, [0; 4])));
        table.set_binding("noise", BindingValue::uri("noise.png"));
        m.process(&mut table, &mut ctx, None).unwrap();
        assert_eq!(ctx.live_texture_count(), 1);

        m.release_all(&mut table, &mut ctx).unwrap();
        assert_eq!(ctx.live_texture_count(), 0);
        assert!(m.is_settled());
        let mut dirty = table.enumerate_dirty();
        dirty.sort();
        assert_eq!(dirty, vec!["lut", "noise"]);

        // the old fetch has no request to land in any more
        fetcher.resolve("noise.png", Ok(ImageSource::solid(1, 1, [0; 4])));
        table.mark_dirty("lut");
        table.mark_dirty("noise");
        m.process(&mut table, &mut ctx, None).unwrap();
        assert_eq!(ctx.live_texture_count(), 1);
        assert_eq!(fetcher.pending_uris(), vec!["noise.png"]);
    }
}
