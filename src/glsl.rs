//! Small GLSL source rewrites.
//!
//! Declarations are matched as whitespace-separated token sequences, the way
//! `uniform   sampler2D\n depthTexture` is still one declaration to a compiler.
//! The last token only has to be a prefix of the source token, so trailing
//! punctuation such as `;` or `[2]` does not get in the way.

use std::fmt::Write as _;
use std::ops::Range;

const DEPTH_TEXTURE: [&str; 3] = ["uniform", "sampler2D", "depthTexture"];
const TEXTURE_COORDINATES: [&str; 3] = ["varying", "vec2", "v_textureCoordinates;"];

fn tokens(source: &str) -> Vec<Range<usize>> {
    let mut out = Vec::new();
    let mut start = None;
    for (i, c) in source.char_indices() {
        match (c.is_whitespace(), start) {
            (true, Some(s)) => {
                out.push(s..i);
                start = None;
            }
            (false, None) => start = Some(i),
            _ => {}
        }
    }
    if let Some(s) = start {
        out.push(s..source.len());
    }
    out
}

/// Byte ranges of every occurrence of `pattern` in `source`.
fn find_all(source: &str, pattern: &[&str]) -> Vec<Range<usize>> {
    let Some((last, head)) = pattern.split_last() else {
        return Vec::new();
    };
    let toks = tokens(source);
    let mut found = Vec::new();
    let mut i = 0;
    while i + pattern.len() <= toks.len() {
        let window = &toks[i..i + pattern.len()];
        let head_matches = head
            .iter()
            .zip(window)
            .all(|(p, t)| &source[t.clone()] == *p);
        let tail = &window[pattern.len() - 1];
        if head_matches && source[tail.clone()].starts_with(last) {
            found.push(window[0].start..tail.start + last.len());
            i += pattern.len();
        } else {
            i += 1;
        }
    }
    found
}

pub fn contains_declaration(source: &str, pattern: &[&str]) -> bool {
    !find_all(source, pattern).is_empty()
}

/// Removes every occurrence of `pattern`.
pub fn strip_declarations(source: &str, pattern: &[&str]) -> String {
    let mut out = String::with_capacity(source.len());
    let mut cursor = 0;
    for range in find_all(source, pattern) {
        out.push_str(&source[cursor..range.start]);
        cursor = range.end;
    }
    out.push_str(&source[cursor..]);
    out
}

/// Whether the shader samples the scene depth texture.
pub fn uses_depth_texture(source: &str) -> bool {
    contains_declaration(source, &DEPTH_TEXTURE)
}

/// Prelude declaring `czm_selected(vec2)` and `czm_selected()` over a lookup
/// texture holding `width` ids.
pub fn selected_feature_block(width: u32) -> String {
    let mut block = String::new();
    block.push_str("#define CZM_SELECTED_FEATURE \n");
    block.push_str("uniform sampler2D czm_idTexture; \n");
    block.push_str("uniform sampler2D czm_selectedIdTexture; \n");
    block.push_str("uniform float czm_selectedIdTextureStep; \n");
    block.push_str("varying vec2 v_textureCoordinates; \n");
    block.push_str("bool czm_selected(vec2 offset) \n{ \n");
    block.push_str("    vec4 id = texture2D(czm_idTexture, v_textureCoordinates + offset); \n");
    let _ = writeln!(block, "    for (int i = 0; i < {}; ++i) ", width);
    block.push_str("    { \n");
    block.push_str(
        "        vec4 selectedId = texture2D(czm_selectedIdTexture, \
         vec2((float(i) + 0.5) * czm_selectedIdTextureStep, 0.5)); \n",
    );
    block.push_str("        if (all(equal(id, selectedId))) \n        { \n");
    block.push_str("            return true; \n        } \n    } \n");
    block.push_str("    return false; \n} \n\n");
    block.push_str("bool czm_selected() \n{ \n");
    block.push_str("    return czm_selected(vec2(0.0)); \n} \n\n");
    block
}

/// Prepends the selection prelude, dropping the shader's own
/// `varying vec2 v_textureCoordinates;` so it is declared once.
pub fn with_selected_feature(source: &str, width: u32) -> String {
    let mut out = selected_feature_block(width);
    out.push_str(&strip_declarations(source, &TEXTURE_COORDINATES));
    out
}
