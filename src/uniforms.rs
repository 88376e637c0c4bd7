//! Uniform bindings of a stage.
//!
//! Every configured uniform is recorded twice: the value the caller *declared*
//! and, once usable, the value it *resolved* to. Declared values that need a
//! GPU resource first (images, URIs, other stages' outputs) stay dirty until the
//! [`ResourceMaterializer`](crate::materializer::ResourceMaterializer) resolves
//! them.

use glam::{Vec2, Vec3, Vec4};
use log::trace;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use crate::color::Color;
use crate::gpu::{GraphicsContext, TextureHandle, UniformMap};
use crate::texture::ImageSource;
use crate::texture_cache::TextureCache;

/// A value the shader actually receives.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum UniformValue {
    Float(f32),
    Int(i32),
    Bool(bool),
    Vec2(Vec2),
    Vec3(Vec3),
    Vec4(Vec4),
    Color(Color),
    Texture(TextureHandle),
}

impl UniformValue {
    pub fn as_texture(&self) -> Option<TextureHandle> {
        match self {
            UniformValue::Texture(t) => Some(*t),
            _ => None,
        }
    }
}

impl From<f32> for UniformValue {
    fn from(v: f32) -> Self {
        UniformValue::Float(v)
    }
}

impl From<i32> for UniformValue {
    fn from(v: i32) -> Self {
        UniformValue::Int(v)
    }
}

impl From<bool> for UniformValue {
    fn from(v: bool) -> Self {
        UniformValue::Bool(v)
    }
}

impl From<Vec2> for UniformValue {
    fn from(v: Vec2) -> Self {
        UniformValue::Vec2(v)
    }
}

impl From<Vec3> for UniformValue {
    fn from(v: Vec3) -> Self {
        UniformValue::Vec3(v)
    }
}

impl From<Vec4> for UniformValue {
    fn from(v: Vec4) -> Self {
        UniformValue::Vec4(v)
    }
}

impl From<Color> for UniformValue {
    fn from(v: Color) -> Self {
        UniformValue::Color(v)
    }
}

/// Closure evaluated every time the stage binds its uniforms.
#[derive(Clone)]
pub struct UniformProvider(Arc<dyn Fn() -> UniformValue + Send + Sync>);

impl UniformProvider {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn() -> UniformValue + Send + Sync + 'static,
    {
        Self(Arc::new(f))
    }

    pub fn call(&self) -> UniformValue {
        (self.0)()
    }
}

/// Two providers are equal only if they are the same closure.
impl PartialEq for UniformProvider {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for UniformProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("UniformProvider(..)")
    }
}

/// What the caller assigned to a uniform.
#[derive(Debug, Clone, PartialEq)]
pub enum BindingValue {
    Constant(UniformValue),
    /// Texture supplied by the caller. Borrowed; the stage never destroys it.
    Texture(TextureHandle),
    Provider(UniformProvider),
    /// Decoded pixels, uploaded synchronously on the next update.
    Image(ImageSource),
    /// Image location, or the name of another stage.
    Uri(String),
    /// Explicit reference to another stage's output.
    StageRef(String),
}

impl BindingValue {
    pub fn constant(value: impl Into<UniformValue>) -> Self {
        BindingValue::Constant(value.into())
    }

    pub fn provider<F>(f: F) -> Self
    where
        F: Fn() -> UniformValue + Send + Sync + 'static,
    {
        BindingValue::Provider(UniformProvider::new(f))
    }

    pub fn uri(uri: impl Into<String>) -> Self {
        BindingValue::Uri(uri.into())
    }

    pub fn stage(name: impl Into<String>) -> Self {
        BindingValue::StageRef(name.into())
    }

    /// Whether the value needs a GPU resource before the stage can draw.
    pub fn requires_materialization(&self) -> bool {
        matches!(
            self,
            BindingValue::Image(_) | BindingValue::Uri(_) | BindingValue::StageRef(_)
        )
    }

    /// Resolution for values that need no materialization.
    fn immediate(&self) -> Option<ResolvedValue> {
        match self {
            BindingValue::Constant(v) => Some(ResolvedValue::Constant(*v)),
            BindingValue::Texture(t) => Some(ResolvedValue::BorrowedTexture(*t)),
            BindingValue::Provider(p) => Some(ResolvedValue::Provider(p.clone())),
            BindingValue::Image(_) | BindingValue::Uri(_) | BindingValue::StageRef(_) => None,
        }
    }
}

impl From<UniformValue> for BindingValue {
    fn from(v: UniformValue) -> Self {
        BindingValue::Constant(v)
    }
}

impl From<ImageSource> for BindingValue {
    fn from(v: ImageSource) -> Self {
        BindingValue::Image(v)
    }
}

/// What a uniform currently binds to.
#[derive(Debug, Clone, PartialEq)]
pub enum ResolvedValue {
    Constant(UniformValue),
    Provider(UniformProvider),
    BorrowedTexture(TextureHandle),
    /// Created by the stage; destroyed through the pending-release queue.
    OwnedTexture(TextureHandle),
    /// Looked up from the texture cache every time uniforms are bound.
    StageOutput(String),
}

impl ResolvedValue {
    pub fn owned_texture(&self) -> Option<TextureHandle> {
        match self {
            ResolvedValue::OwnedTexture(t) => Some(*t),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
struct Declared {
    value: BindingValue,
    generation: u64,
}

#[derive(Debug, Default)]
pub struct UniformBindingTable {
    declared: BTreeMap<String, Declared>,
    resolved: HashMap<String, ResolvedValue>,
    dirty: Vec<String>,
    pending_release: Vec<TextureHandle>,
    next_generation: u64,
}

impl UniformBindingTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_bindings<I, S>(bindings: I) -> Self
    where
        I: IntoIterator<Item = (S, BindingValue)>,
        S: Into<String>,
    {
        let mut table = Self::new();
        for (name, value) in bindings {
            table.set_binding(name, value);
        }
        table
    }

    /// Assigns a uniform and returns the generation of the assignment.
    ///
    /// Re-assigning an equal value keeps the current resolution. Otherwise any
    /// texture the stage created for the old value is queued for release.
    pub fn set_binding(&mut self, name: impl Into<String>, value: BindingValue) -> u64 {
        let name = name.into();
        if let Some(existing) = self.declared.get(&name) {
            if existing.value == value {
                return existing.generation;
            }
        }

        self.next_generation += 1;
        let generation = self.next_generation;

        if let Some(old) = self.resolved.remove(&name) {
            if let Some(texture) = old.owned_texture() {
                trace!("uniform '{}' reassigned, releasing {:?}", name, texture);
                self.pending_release.push(texture);
            }
        }

        match value.immediate() {
            Some(resolved) => {
                self.dirty.retain(|d| d != &name);
                self.resolved.insert(name.clone(), resolved);
            }
            None => self.mark_dirty(&name),
        }

        self.declared.insert(name, Declared { value, generation });
        generation
    }

    pub fn get_binding(&self, name: &str) -> Option<&BindingValue> {
        self.declared.get(name).map(|d| &d.value)
    }

    pub fn generation(&self, name: &str) -> Option<u64> {
        self.declared.get(name).map(|d| d.generation)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.declared.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.declared.len()
    }

    pub fn is_empty(&self) -> bool {
        self.declared.is_empty()
    }

    /// Drains the names that still need materialization, oldest first.
    pub fn enumerate_dirty(&mut self) -> Vec<String> {
        std::mem::take(&mut self.dirty)
    }

    pub fn has_dirty(&self) -> bool {
        !self.dirty.is_empty()
    }

    /// Flags a declared binding for another materialization pass.
    pub fn mark_dirty(&mut self, name: &str) {
        let needs = self
            .declared
            .get(name)
            .map_or(true, |d| d.value.requires_materialization());
        if needs && !self.dirty.iter().any(|d| d == name) {
            self.dirty.push(name.to_owned());
        }
    }

    pub fn resolved(&self, name: &str) -> Option<&ResolvedValue> {
        self.resolved.get(name)
    }

    /// Records a resolution, returning whatever it replaced.
    pub fn resolve(&mut self, name: impl Into<String>, value: ResolvedValue) -> Option<ResolvedValue> {
        self.resolved.insert(name.into(), value)
    }

    pub fn queue_release(&mut self, texture: TextureHandle) {
        if !self.pending_release.contains(&texture) {
            self.pending_release.push(texture);
        }
    }

    pub fn take_pending_release(&mut self) -> Vec<TextureHandle> {
        std::mem::take(&mut self.pending_release)
    }

    pub fn has_pending_release(&self) -> bool {
        !self.pending_release.is_empty()
    }

    /// Drops every stage-owned texture resolution and marks those bindings
    /// dirty again. Returned handles (plus anything already queued) still
    /// need destroying.
    pub fn release_owned(&mut self) -> Vec<TextureHandle> {
        let owned: Vec<String> = self
            .resolved
            .iter()
            .filter(|(_, v)| v.owned_texture().is_some())
            .map(|(k, _)| k.clone())
            .collect();

        let mut released = self.take_pending_release();
        for name in owned {
            if let Some(texture) = self.resolved.remove(&name).and_then(|v| v.owned_texture()) {
                released.push(texture);
            }
            self.mark_dirty(&name);
        }
        released
    }

    /// Writes every resolved uniform into `map`. Texture uniforms also get a
    /// `<name>Dimensions` vector.
    pub fn bind_into(
        &self,
        map: &mut UniformMap,
        ctx: &dyn GraphicsContext,
        cache: Option<&dyn TextureCache>,
    ) {
        for name in self.declared.keys() {
            let value = match self.resolved.get(name) {
                Some(ResolvedValue::Constant(v)) => Some(*v),
                Some(ResolvedValue::Provider(p)) => Some(p.call()),
                Some(ResolvedValue::BorrowedTexture(t)) | Some(ResolvedValue::OwnedTexture(t)) => {
                    Some(UniformValue::Texture(*t))
                }
                Some(ResolvedValue::StageOutput(stage)) => cache
                    .and_then(|c| c.output_texture(stage))
                    .map(UniformValue::Texture),
                None => None,
            };
            if let Some(value) = value {
                insert_uniform(map, name, value, ctx);
            }
        }
    }
}

/// Inserts a uniform, adding `<name>Dimensions` for textures.
pub fn insert_uniform(map: &mut UniformMap, name: &str, value: UniformValue, ctx: &dyn GraphicsContext) {
    if let UniformValue::Texture(texture) = value {
        if let Some((w, h)) = ctx.texture_dimensions(texture) {
            map.insert(
                format!("{}Dimensions", name),
                UniformValue::Vec2(Vec2::new(w as f32, h as f32)),
            );
        }
    }
    map.insert(name.to_owned(), value);
}
