//! Selected-feature tracking.
//!
//! A stage may be told which features are selected, both directly and through
//! its parent. Every pick id of the combined selection is packed into a 1-row
//! RGBA lookup texture that the generated `czm_selected()` shader function
//! scans. The texture is rebuilt only when the selection actually changes.

use log::debug;
use std::sync::Arc;

use crate::color::Color;
use crate::context::Context;
use crate::error::Result;
use crate::gpu::{GraphicsContext, TextureHandle};
use crate::texture::{Sampler, TextureDescriptor};

/// Color-encoded identifier written to the pick buffer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PickId {
    pub color: Color,
}

impl PickId {
    pub fn new(color: Color) -> Self {
        Self { color }
    }

    /// Encodes a numeric key little-endian into the four color channels.
    pub fn from_key(key: u32) -> Self {
        Self::new(Color::from_bytes(key.to_le_bytes()))
    }
}

/// A selectable thing; may own several pick ids (e.g. one per primitive).
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Feature {
    pick_ids: Vec<PickId>,
}

impl Feature {
    pub fn new(pick_ids: Vec<PickId>) -> Self {
        Self { pick_ids }
    }

    pub fn single(pick_id: PickId) -> Self {
        Self::new(vec![pick_id])
    }

    pub fn pick_ids(&self) -> &[PickId] {
        &self.pick_ids
    }
}

pub type FeatureRef = Arc<Feature>;

/// Immutable snapshot of selected features. Identity of the elements, not
/// their contents, is what the diff compares.
pub type Selection = Arc<[FeatureRef]>;

pub fn selection<I>(features: I) -> Selection
where
    I: IntoIterator<Item = FeatureRef>,
{
    features.into_iter().collect()
}

#[derive(Debug, Clone)]
pub struct SelectionDiff {
    pub dirty: bool,
    /// Own selection followed by the parent's.
    pub combined: Option<Selection>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SelectionTexture {
    pub handle: TextureHandle,
    /// Number of pick ids stored, at least 1.
    pub width: u32,
}

impl SelectionTexture {
    /// Texture-space distance between two adjacent ids.
    pub fn step(&self) -> f32 {
        1.0 / self.width as f32
    }
}

#[derive(Debug, Default)]
pub struct SelectionDiffEngine {
    current: Option<Selection>,
    parent: Option<Selection>,
    combined: Option<Selection>,
    texture: Option<SelectionTexture>,
}

fn same(a: Option<&Selection>, b: Option<&Selection>) -> bool {
    match (a, b) {
        (None, None) => true,
        (Some(a), Some(b)) => Arc::ptr_eq(a, b),
        _ => false,
    }
}

fn len(s: Option<&Selection>) -> usize {
    s.map_or(0, |s| s.len())
}

pub fn combine(current: Option<&Selection>, parent: Option<&Selection>) -> Option<Selection> {
    match (current, parent) {
        (None, None) => None,
        (Some(c), None) => Some(Arc::clone(c)),
        (None, Some(p)) => Some(Arc::clone(p)),
        (Some(c), Some(p)) => Some(c.iter().chain(p.iter()).cloned().collect()),
    }
}

impl SelectionDiffEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn texture(&self) -> Option<SelectionTexture> {
        self.texture
    }

    pub fn combined(&self) -> Option<&Selection> {
        self.combined.as_ref()
    }

    pub fn compute_dirty(&self, current: Option<&Selection>, parent: Option<&Selection>) -> SelectionDiff {
        if same(current, self.current.as_ref()) && same(parent, self.parent.as_ref()) {
            return SelectionDiff {
                dirty: false,
                combined: self.combined.clone(),
            };
        }

        let combined = combine(current, parent);
        let dirty = if combined.is_some() != self.combined.is_some()
            || len(current) != len(self.current.as_ref())
            || len(parent) != len(self.parent.as_ref())
        {
            true
        } else {
            match (&combined, &self.combined) {
                (Some(now), Some(before)) => {
                    now.len() != before.len()
                        || now.iter().zip(before.iter()).any(|(a, b)| !Arc::ptr_eq(a, b))
                }
                _ => false,
            }
        };
        SelectionDiff { dirty, combined }
    }

    /// Remembers what was seen this frame.
    pub fn commit(&mut self, current: Option<&Selection>, parent: Option<&Selection>, diff: SelectionDiff) {
        self.current = current.cloned();
        self.parent = parent.cloned();
        self.combined = diff.combined;
    }

    /// Diffs, rebuilds the lookup texture if needed and commits. Returns
    /// whether the selection changed.
    pub fn update(
        &mut self,
        ctx: &mut dyn GraphicsContext,
        current: Option<&Selection>,
        parent: Option<&Selection>,
    ) -> Result<bool> {
        let diff = self.compute_dirty(current, parent);
        let dirty = diff.dirty;
        if dirty {
            self.destroy_texture(ctx)?;
            if let Some(combined) = &diff.combined {
                let (width, texels) = selection_pixels(Some(combined));
                let desc = TextureDescriptor::rgba8(width, 1, bytemuck::cast_slice(texels.as_slice()))
                    .with_label("selected feature ids")
                    .with_sampler(Sampler::NEAREST);
                let handle = ctx.create_texture(&desc).context("creating selection texture")?;
                debug!("selection texture rebuilt with {} id(s)", width);
                self.texture = Some(SelectionTexture { handle, width });
            }
        }
        self.commit(current, parent, diff);
        Ok(dirty)
    }

    fn destroy_texture(&mut self, ctx: &mut dyn GraphicsContext) -> Result<()> {
        if let Some(texture) = self.texture.take() {
            ctx.destroy_texture(texture.handle)
                .context("releasing selection texture")?;
        }
        Ok(())
    }

    /// Destroys the texture and forgets the previous selection.
    pub fn release(&mut self, ctx: &mut dyn GraphicsContext) -> Result<()> {
        self.destroy_texture(ctx)?;
        self.current = None;
        self.parent = None;
        self.combined = None;
        Ok(())
    }
}

/// One RGBA texel per pick id, in selection order. No ids at all yields the
/// single reserved texel `[255, 255, 255, 255]`.
pub fn selection_pixels(combined: Option<&Selection>) -> (u32, Vec<[u8; 4]>) {
    let texels: Vec<[u8; 4]> = combined
        .into_iter()
        .flat_map(|s| s.iter())
        .flat_map(|feature| feature.pick_ids().iter())
        .map(|id| id.color.to_bytes())
        .collect();
    if texels.is_empty() {
        (1, vec![[255; 4]])
    } else {
        (texels.len() as u32, texels)
    }
}
