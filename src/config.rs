//! Stage construction options.
//!
//! [`StageOptions`] is what callers fill in (directly, through the builder
//! methods, or from JSON). [`StageOptions::validate`] turns it into the
//! immutable [`StageConfig`] a stage keeps for its whole life.

use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::color::Color;
use crate::context::OptionContext;
use crate::error::{Result, StageError};
use crate::gpu::BoundingRectangle;
use crate::texture::{PixelDatatype, PixelFormat, SampleMode};
use crate::uniforms::{BindingValue, UniformValue};

#[derive(Debug, Clone)]
pub struct StageOptions {
    pub fragment_shader: String,
    pub uniforms: Vec<(String, BindingValue)>,
    /// Output size relative to the drawing buffer, in `(0.0, 1.0]`.
    pub texture_scale: f32,
    pub force_power_of_two: bool,
    pub sample_mode: SampleMode,
    pub pixel_format: PixelFormat,
    pub pixel_datatype: PixelDatatype,
    pub clear_color: Color,
    pub scissor_rectangle: Option<BoundingRectangle>,
    /// Generated when not given.
    pub name: Option<String>,
}

impl Default for StageOptions {
    fn default() -> Self {
        Self {
            fragment_shader: String::new(),
            uniforms: Vec::new(),
            texture_scale: 1.0,
            force_power_of_two: false,
            sample_mode: SampleMode::Nearest,
            pixel_format: PixelFormat::Rgba,
            pixel_datatype: PixelDatatype::UnsignedByte,
            clear_color: Color::BLACK,
            scissor_rectangle: None,
            name: None,
        }
    }
}

impl StageOptions {
    pub fn new(fragment_shader: impl Into<String>) -> Self {
        Self {
            fragment_shader: fragment_shader.into(),
            ..Self::default()
        }
    }

    pub fn with_uniform(mut self, name: impl Into<String>, value: impl Into<BindingValue>) -> Self {
        self.uniforms.push((name.into(), value.into()));
        self
    }

    pub fn with_texture_scale(mut self, scale: f32) -> Self {
        self.texture_scale = scale;
        self
    }

    pub fn with_force_power_of_two(mut self, force: bool) -> Self {
        self.force_power_of_two = force;
        self
    }

    pub fn with_sample_mode(mut self, mode: SampleMode) -> Self {
        self.sample_mode = mode;
        self
    }

    pub fn with_pixel_format(mut self, format: PixelFormat) -> Self {
        self.pixel_format = format;
        self
    }

    pub fn with_pixel_datatype(mut self, datatype: PixelDatatype) -> Self {
        self.pixel_datatype = datatype;
        self
    }

    pub fn with_clear_color(mut self, color: Color) -> Self {
        self.clear_color = color;
        self
    }

    pub fn with_scissor_rectangle(mut self, rect: BoundingRectangle) -> Self {
        self.scissor_rectangle = Some(rect);
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Parses options from JSON.
    ///
    /// Uniform values map as follows: numbers to floats, booleans to bools,
    /// arrays of 2 to 4 numbers to vectors, strings to URIs (or stage names,
    /// resolved when the stage materializes them).
    pub fn from_json(json: &str) -> Result<Self> {
        let raw: RawStageOptions = serde_json::from_str(json)?;
        let fragment_shader = raw.fragment_shader.ok_or(StageError::MissingFragmentShader)?;

        let uniforms = raw
            .uniforms
            .iter()
            .map(|(name, value)| Ok((name.clone(), json_uniform(name, value)?)))
            .collect::<Result<Vec<_>>>()?;

        let defaults = Self::default();
        Ok(Self {
            fragment_shader,
            uniforms,
            texture_scale: raw.texture_scale.unwrap_or(defaults.texture_scale),
            force_power_of_two: raw.force_power_of_two.unwrap_or(defaults.force_power_of_two),
            sample_mode: raw.sample_mode.unwrap_or(defaults.sample_mode),
            pixel_format: raw.pixel_format.unwrap_or(defaults.pixel_format),
            pixel_datatype: raw.pixel_datatype.unwrap_or(defaults.pixel_datatype),
            clear_color: raw.clear_color.unwrap_or(defaults.clear_color),
            scissor_rectangle: raw.scissor_rectangle,
            name: raw.name,
        })
    }

    /// Checks the options and splits them into the stage configuration and its
    /// initial uniform bindings.
    pub fn validate(self) -> Result<(StageConfig, Vec<(String, BindingValue)>)> {
        let scale = self.texture_scale;
        crate::ensure!(scale > 0.0 && scale <= 1.0, StageError::InvalidTextureScale(scale));
        crate::ensure!(
            self.pixel_format.is_color_format(),
            StageError::NonColorPixelFormat(self.pixel_format)
        );

        let config = StageConfig {
            name: self.name.unwrap_or_else(create_guid),
            fragment_shader: self.fragment_shader,
            texture_scale: scale,
            force_power_of_two: self.force_power_of_two,
            sample_mode: self.sample_mode,
            pixel_format: self.pixel_format,
            pixel_datatype: self.pixel_datatype,
            clear_color: self.clear_color,
            scissor_rectangle: self.scissor_rectangle.unwrap_or_default(),
        };
        Ok((config, self.uniforms))
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawStageOptions {
    fragment_shader: Option<String>,
    #[serde(default)]
    uniforms: BTreeMap<String, Value>,
    texture_scale: Option<f32>,
    force_power_of_two: Option<bool>,
    sample_mode: Option<SampleMode>,
    pixel_format: Option<PixelFormat>,
    pixel_datatype: Option<PixelDatatype>,
    clear_color: Option<Color>,
    scissor_rectangle: Option<BoundingRectangle>,
    name: Option<String>,
}

fn json_uniform(name: &str, value: &Value) -> Result<BindingValue> {
    let unsupported = || format!("unsupported value for uniform '{}': {}", name, value);
    let value = match value {
        Value::Bool(b) => UniformValue::Bool(*b),
        Value::Number(n) => UniformValue::Float(n.as_f64().with_context(unsupported)? as f32),
        Value::String(s) => return Ok(BindingValue::Uri(s.clone())),
        Value::Array(items) => {
            let v = items
                .iter()
                .map(|item| item.as_f64().map(|f| f as f32))
                .collect::<Option<Vec<f32>>>()
                .with_context(unsupported)?;
            match v.as_slice() {
                [x, y] => UniformValue::Vec2(glam::Vec2::new(*x, *y)),
                [x, y, z] => UniformValue::Vec3(glam::Vec3::new(*x, *y, *z)),
                [x, y, z, w] => UniformValue::Vec4(glam::Vec4::new(*x, *y, *z, *w)),
                _ => crate::bail!(StageError::custom(unsupported())),
            }
        }
        Value::Null | Value::Object(_) => crate::bail!(StageError::custom(unsupported())),
    };
    Ok(BindingValue::Constant(value))
}

/// Random RFC 4122 version 4 identifier.
pub fn create_guid() -> String {
    Uuid::new_v4().to_string()
}

/// Validated, immutable stage configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct StageConfig {
    pub name: String,
    pub fragment_shader: String,
    pub texture_scale: f32,
    pub force_power_of_two: bool,
    pub sample_mode: SampleMode,
    pub pixel_format: PixelFormat,
    pub pixel_datatype: PixelDatatype,
    pub clear_color: Color,
    /// Zero-sized when scissoring is off.
    pub scissor_rectangle: BoundingRectangle,
}

impl StageConfig {
    /// Output framebuffer size for a drawing buffer of the given size.
    ///
    /// Power-of-two outputs are square, sized from the smaller scaled side.
    pub fn output_dimensions(&self, drawing_buffer: (u32, u32)) -> (u32, u32) {
        let scaled = |v: u32| ((v as f32 * self.texture_scale).ceil() as u32).max(1);
        let (width, height) = (scaled(drawing_buffer.0), scaled(drawing_buffer.1));
        if self.force_power_of_two {
            let size = width.min(height).next_power_of_two();
            (size, size)
        } else {
            (width, height)
        }
    }
}
