#![cfg(not(target_arch = "wasm32"))]

use std::backtrace::Backtrace;
use std::io::Cursor;
use std::panic;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context as _};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use image::{DynamicImage, ImageFormat, Rgba, RgbaImage};
use log::{info, LevelFilter};

use slop_stage::selection::selection;
use slop_stage::texture::TextureDescriptor;
use slop_stage::{
    BindingValue, Feature, GraphicsContext, HeadlessContext, PickId, PostProcessStage, SimpleTextureCache,
    StageOptions, TextureCache, UniformValue,
};

const TINT_SHADER: &str = "\
uniform sampler2D colorTexture;
uniform sampler2D gradient;
uniform float strength;
varying vec2 v_textureCoordinates;
void main()
{
    vec4 color = texture2D(colorTexture, v_textureCoordinates);
    vec4 tint = texture2D(gradient, v_textureCoordinates);
    if (czm_selected()) {
        color = mix(color, tint, strength);
    }
    gl_FragColor = color;
}
";

const MAX_FRAMES: u32 = 120;

fn main() -> anyhow::Result<()> {
    setup_diagnostics();

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .thread_name("slop-stage-fetch")
        .enable_all()
        .build()
        .context("failed to start the image fetch runtime")?;
    let _guard = runtime.enter();

    run()
}

/// Renders a single stage headlessly until its image uniform has loaded.
fn run() -> anyhow::Result<()> {
    let mut ctx = HeadlessContext::new(320, 180);
    let cache = Arc::new(SimpleTextureCache::new());

    let mut stage = PostProcessStage::new(
        StageOptions::new(TINT_SHADER)
            .with_name("tint")
            .with_texture_scale(0.5)
            .with_uniform("strength", UniformValue::Float(0.6))
            .with_uniform("gradient", BindingValue::uri(gradient_data_uri()?)),
    )?;
    cache.register(stage.config());
    cache.update(&mut ctx)?;
    stage.attach_texture_cache(cache.clone())?;

    let feature = Arc::new(Feature::new(vec![PickId::from_key(1), PickId::from_key(2)]));
    stage.set_selected(Some(selection([feature])))?;

    let scene = vec![128u8; 320 * 180 * 4];
    let color = ctx.create_texture(&TextureDescriptor::rgba8(320, 180, &scene).with_label("scene color"))?;

    let mut frame = 0;
    while !stage.ready() {
        if frame == MAX_FRAMES {
            bail!("stage '{}' never became ready: {:?}", stage.name(), stage.failed_uniforms());
        }
        stage.update(&mut ctx, false)?;
        if !stage.ready() {
            std::thread::sleep(Duration::from_millis(16));
        }
        frame += 1;
    }
    info!("stage '{}' ready after {} frame(s)", stage.name(), frame);

    stage.execute(&mut ctx, color, None, None)?;
    if let Some(draw) = ctx.draws().last() {
        info!("drew into {:?} with {} uniform(s)", draw.framebuffer, draw.uniforms.len());
    }
    info!("output texture: {:?}", cache.output_texture(stage.name()));

    stage.destroy(&mut ctx)?;
    cache.release(&mut ctx)?;
    ctx.destroy_texture(color)?;
    info!("{:?}", ctx.stats());
    Ok(())
}

fn gradient_data_uri() -> anyhow::Result<String> {
    let img = RgbaImage::from_fn(16, 1, |x, _| Rgba([(x * 16) as u8, 64, 255 - (x * 16) as u8, 255]));
    let mut png = Vec::new();
    DynamicImage::ImageRgba8(img)
        .write_to(&mut Cursor::new(&mut png), ImageFormat::Png)
        .context("failed to encode gradient")?;
    Ok(format!("data:image/png;base64,{}", STANDARD.encode(png)))
}

/// Sets up logging and the panic hook.
fn setup_diagnostics() {
    env_logger::Builder::new()
        .filter_level(if cfg!(debug_assertions) {
            LevelFilter::Debug
        } else {
            LevelFilter::Warn
        })
        .format_timestamp_millis()
        .format_target(false)
        .parse_default_env()
        .init();

    panic::set_hook(Box::new(|panic_info| {
        let backtrace = Backtrace::force_capture();
        let msg = match panic_info.payload().downcast_ref::<&'static str>() {
            Some(s) => *s,
            None => match panic_info.payload().downcast_ref::<String>() {
                Some(s) => &s[..],
                None => "Box<dyn Any>",
            },
        };
        let location = panic_info
            .location()
            .map_or("unknown location".to_string(), |loc| format!("{}:{}", loc.file(), loc.line()));
        eprintln!("\x1b[31;1mstage demo panicked: {}\nat {}\n\n{}\x1b[0m", msg, location, backtrace);
    }));
}
