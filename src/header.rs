//! Shader header synthesis.
//!
//! Every pass program is `prelude + common fragment + user fragment`. The
//! prelude is a pure function of (pass kind, API level, bound channel
//! categories): it declares the public uniform contract, one sampler per
//! channel typed after the bound category, the `st_assert` helper, and a
//! `main()` that forwards to the pass entry point. Because the prelude is
//! always prepended, its line count is the offset for mapping compiler
//! errors back to user-authored lines.

use std::fmt;
use std::fmt::Write as _;

/// Which of the five pass flavors a shader fragment compiles as.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PassKind {
    Common,
    Buffer,
    Image,
    Cubemap,
    Sound,
}

impl fmt::Display for PassKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PassKind::Common => "Common",
            PassKind::Buffer => "Buffer",
            PassKind::Image => "Image",
            PassKind::Cubemap => "Cubemap",
            PassKind::Sound => "Sound",
        };
        f.write_str(s)
    }
}

/// Shading-language target. `Legacy` writes `gl_FragColor`; `Modern`
/// declares an explicit color output and a `#version` line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiLevel {
    Legacy,
    Modern,
}

/// The sampler type a bound input requires. Governs both the synthesized
/// channel declarations and the recompilation policy: swapping producers
/// inside one category reuses the compiled program.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SamplerCategory {
    Tex2d,
    Cube,
    Tex3d,
}

impl SamplerCategory {
    fn glsl_type(self) -> &'static str {
        match self {
            SamplerCategory::Tex2d => "sampler2D",
            SamplerCategory::Cube => "samplerCube",
            SamplerCategory::Tex3d => "sampler3D",
        }
    }
}

/// Synthesized boilerplate for one pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub vertex_src: String,
    /// Fragment prelude, textually prepended to the common + user fragments.
    pub prelude: String,
    /// Number of lines in `prelude`, for error source-mapping.
    pub line_count: u32,
}

/// Output variable name used by modern preludes.
const OUT_COLOR: &str = "sdFragColor";

pub fn synthesize(kind: PassKind, api: ApiLevel, categories: [SamplerCategory; 4]) -> Header {
    let prelude = match kind {
        PassKind::Common => common_prelude(api),
        PassKind::Buffer => image_prelude(api, categories, false),
        PassKind::Image => image_prelude(api, categories, true),
        PassKind::Cubemap => cubemap_prelude(api, categories),
        PassKind::Sound => sound_prelude(api, categories),
    };
    let line_count = prelude.lines().count() as u32;
    Header {
        vertex_src: vertex_src(api),
        prelude,
        line_count,
    }
}

fn vertex_src(api: ApiLevel) -> String {
    match api {
        ApiLevel::Modern => "#version 300 es\n\
             precision highp float;\n\
             layout(location = 0) in vec2 pos;\n\
             void main() { gl_Position = vec4(pos, 0.0, 1.0); }\n"
            .to_string(),
        ApiLevel::Legacy => "precision highp float;\n\
             attribute vec2 pos;\n\
             void main() { gl_Position = vec4(pos, 0.0, 1.0); }\n"
            .to_string(),
    }
}

fn push_fragment_prefix(out: &mut String, api: ApiLevel) {
    if api == ApiLevel::Modern {
        out.push_str("#version 300 es\n");
    }
    out.push_str("#ifdef GL_ES\n");
    out.push_str("precision highp float;\n");
    out.push_str("precision highp int;\n");
    if api == ApiLevel::Modern {
        out.push_str("precision mediump sampler3D;\n");
    }
    out.push_str("#endif\n");
    if api == ApiLevel::Modern {
        let _ = writeln!(out, "layout(location = 0) out vec4 {OUT_COLOR};");
    }
}

fn push_shared_uniforms(out: &mut String) {
    out.push_str("uniform vec3      iResolution;\n");
    out.push_str("uniform float     iTime;\n");
    out.push_str("uniform float     iChannelTime[4];\n");
    out.push_str("uniform vec4      iMouse;\n");
    out.push_str("uniform vec4      iDate;\n");
    out.push_str("uniform float     iSampleRate;\n");
    out.push_str("uniform vec3      iChannelResolution[4];\n");
    out.push_str("uniform int       iFrame;\n");
    out.push_str("uniform float     iTimeDelta;\n");
    out.push_str("uniform float     iFrameRate;\n");
}

fn push_channel_samplers(out: &mut String, categories: [SamplerCategory; 4], with_structs: bool) {
    for (i, cat) in categories.iter().enumerate() {
        let ty = cat.glsl_type();
        let _ = writeln!(out, "uniform {ty} iChannel{i};");
        if with_structs {
            let _ = writeln!(
                out,
                "uniform struct {{ {ty} sampler; vec3 size; float time; int loaded; }} iCh{i};"
            );
        }
    }
}

fn push_assert_helper(out: &mut String) {
    out.push_str("int stAssertSentinel = 0;\n");
    out.push_str("void st_assert(bool cond) { if (!cond) stAssertSentinel = 1; }\n");
    out.push_str("void st_assert(bool cond, int label) { if (!cond) stAssertSentinel = 2 + label; }\n");
}

fn write_color_stmt(api: ApiLevel, expr: &str) -> String {
    match api {
        ApiLevel::Modern => format!("{OUT_COLOR} = {expr};"),
        ApiLevel::Legacy => format!("gl_FragColor = {expr};"),
    }
}

fn image_prelude(api: ApiLevel, categories: [SamplerCategory; 4], opaque_alpha: bool) -> String {
    let mut out = String::new();
    push_fragment_prefix(&mut out, api);
    push_shared_uniforms(&mut out);
    push_channel_samplers(&mut out, categories, true);
    push_assert_helper(&mut out);
    out.push_str("void mainImage(out vec4 fragColor, in vec2 fragCoord);\n");
    out.push_str("void main() {\n");
    out.push_str("    vec4 color = vec4(0.0, 0.0, 0.0, 1.0);\n");
    out.push_str("    mainImage(color, gl_FragCoord.xy);\n");
    out.push_str("    if (stAssertSentinel != 0) { color = vec4(1.0, 0.0, 1.0, 1.0); }\n");
    let final_expr = if opaque_alpha {
        "vec4(color.xyz, 1.0)"
    } else {
        "color"
    };
    let _ = writeln!(out, "    {}", write_color_stmt(api, final_expr));
    out.push_str("}\n");
    out
}

fn cubemap_prelude(api: ApiLevel, categories: [SamplerCategory; 4]) -> String {
    let mut out = String::new();
    push_fragment_prefix(&mut out, api);
    push_shared_uniforms(&mut out);
    out.push_str("uniform vec4      unViewport;\n");
    out.push_str("uniform vec3      unCorners[5];\n");
    push_channel_samplers(&mut out, categories, true);
    push_assert_helper(&mut out);
    out.push_str(
        "void mainCubemap(out vec4 fragColor, in vec2 fragCoord, in vec3 rayOri, in vec3 rayDir);\n",
    );
    out.push_str("void main() {\n");
    out.push_str("    vec2 uv = (gl_FragCoord.xy - unViewport.xy) / unViewport.zw;\n");
    out.push_str("    vec3 rayDir = normalize(mix(mix(unCorners[0], unCorners[1], uv.x),\n");
    out.push_str("                                mix(unCorners[3], unCorners[2], uv.x), uv.y));\n");
    out.push_str("    vec4 color = vec4(0.0, 0.0, 0.0, 1.0);\n");
    out.push_str("    mainCubemap(color, gl_FragCoord.xy - unViewport.xy, unCorners[4], rayDir);\n");
    out.push_str("    if (stAssertSentinel != 0) { color = vec4(1.0, 0.0, 1.0, 1.0); }\n");
    let _ = writeln!(out, "    {}", write_color_stmt(api, "color"));
    out.push_str("}\n");
    out
}

/// Sound tiles are square; one tile encodes `SOUND_TILE_DIM^2` samples.
pub const SOUND_TILE_DIM: u32 = 512;

fn sound_prelude(api: ApiLevel, categories: [SamplerCategory; 4]) -> String {
    let mut out = String::new();
    push_fragment_prefix(&mut out, api);
    out.push_str("uniform vec4      iDate;\n");
    out.push_str("uniform float     iSampleRate;\n");
    out.push_str("uniform float     iChannelTime[4];\n");
    out.push_str("uniform vec3      iChannelResolution[4];\n");
    out.push_str("uniform float     iTimeOffset;\n");
    out.push_str("uniform int       iSampleOffset;\n");
    push_channel_samplers(&mut out, categories, false);
    out.push_str("vec2 mainSound(int samp, float time);\n");
    out.push_str("void main() {\n");
    let _ = writeln!(
        out,
        "    int idx = int(gl_FragCoord.x) + int(gl_FragCoord.y) * {SOUND_TILE_DIM};"
    );
    out.push_str("    float t = iTimeOffset + float(idx) / iSampleRate;\n");
    out.push_str("    vec2 y = clamp(mainSound(iSampleOffset + idx, t), -1.0, 1.0);\n");
    out.push_str("    vec2 v = floor((0.5 + 0.5 * y) * 65535.0 + 0.5);\n");
    out.push_str("    vec2 vl = mod(v, 256.0) / 255.0;\n");
    out.push_str("    vec2 vh = floor(v / 256.0) / 255.0;\n");
    let _ = writeln!(
        out,
        "    {}",
        write_color_stmt(api, "vec4(vl.x, vh.x, vl.y, vh.y)")
    );
    out.push_str("}\n");
    out
}

fn common_prelude(api: ApiLevel) -> String {
    let mut out = String::new();
    push_fragment_prefix(&mut out, api);
    out.push_str("uniform vec4      iDate;\n");
    out.push_str("uniform float     iSampleRate;\n");
    out.push_str("void main() { }\n");
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL_2D: [SamplerCategory; 4] = [SamplerCategory::Tex2d; 4];

    #[test]
    fn synthesis_is_pure() {
        for kind in [
            PassKind::Common,
            PassKind::Buffer,
            PassKind::Image,
            PassKind::Cubemap,
            PassKind::Sound,
        ] {
            for api in [ApiLevel::Legacy, ApiLevel::Modern] {
                let a = synthesize(kind, api, ALL_2D);
                let b = synthesize(kind, api, ALL_2D);
                assert_eq!(a, b, "{kind} {api:?} should synthesize identically");
            }
        }
    }

    #[test]
    fn line_count_matches_prelude() {
        let h = synthesize(PassKind::Buffer, ApiLevel::Modern, ALL_2D);
        assert_eq!(h.line_count as usize, h.prelude.lines().count());
        assert!(h.line_count > 0);
    }

    #[test]
    fn sampler_type_follows_category() {
        let cats = [
            SamplerCategory::Tex2d,
            SamplerCategory::Cube,
            SamplerCategory::Tex3d,
            SamplerCategory::Tex2d,
        ];
        let h = synthesize(PassKind::Image, ApiLevel::Modern, cats);
        assert!(h.prelude.contains("uniform sampler2D iChannel0;"));
        assert!(h.prelude.contains("uniform samplerCube iChannel1;"));
        assert!(h.prelude.contains("uniform sampler3D iChannel2;"));
        assert!(h.prelude.contains("samplerCube sampler; vec3 size; float time; int loaded; } iCh1;"));
    }

    #[test]
    fn modern_and_legacy_write_different_targets() {
        let modern = synthesize(PassKind::Image, ApiLevel::Modern, ALL_2D);
        let legacy = synthesize(PassKind::Image, ApiLevel::Legacy, ALL_2D);
        assert!(modern.prelude.starts_with("#version 300 es"));
        assert!(modern.prelude.contains("sdFragColor = "));
        assert!(!legacy.prelude.contains("#version"));
        assert!(legacy.prelude.contains("gl_FragColor = "));
    }

    #[test]
    fn image_forces_opaque_alpha_buffer_does_not() {
        let image = synthesize(PassKind::Image, ApiLevel::Modern, ALL_2D);
        let buffer = synthesize(PassKind::Buffer, ApiLevel::Modern, ALL_2D);
        assert!(image.prelude.contains("vec4(color.xyz, 1.0)"));
        assert!(!buffer.prelude.contains("vec4(color.xyz, 1.0)"));
    }

    #[test]
    fn cubemap_declares_frustum_uniforms() {
        let h = synthesize(PassKind::Cubemap, ApiLevel::Modern, ALL_2D);
        assert!(h.prelude.contains("uniform vec4      unViewport;"));
        assert!(h.prelude.contains("uniform vec3      unCorners[5];"));
        assert!(h.prelude.contains("mainCubemap"));
    }

    #[test]
    fn sound_packs_two_16_bit_channels() {
        let h = synthesize(PassKind::Sound, ApiLevel::Modern, ALL_2D);
        assert!(h.prelude.contains("mainSound"));
        assert!(h.prelude.contains("65535.0"));
        assert!(h.prelude.contains("vec4(vl.x, vh.x, vl.y, vh.y)"));
        // Sound declares no mouse/resolution convenience uniforms.
        assert!(!h.prelude.contains("iMouse"));
        assert!(!h.prelude.contains("uniform vec3      iResolution;"));
    }

    #[test]
    fn common_is_a_no_op_main() {
        let h = synthesize(PassKind::Common, ApiLevel::Legacy, ALL_2D);
        assert!(h.prelude.contains("void main() { }"));
        assert!(!h.prelude.contains("iChannel0"));
    }
}
