//! JSON effect description.
//!
//! An effect ships as a small JSON document: one entry per pass with its
//! fragment code, typed channel bindings, and output assignments.
//! `instantiate` turns a parsed document into a live [`Effect`]: passes
//! added, channels bound, everything compiled.

use std::sync::Arc;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

use crate::assets::AssetFetcher;
use crate::channel::InputDescriptor;
use crate::effect::{Effect, Platform};
use crate::gfx::{FilterMode, Renderer, SamplerConfig, WrapMode};
use crate::header::{ApiLevel, PassKind};
use crate::loader::VolumeSource;

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct EffectDsl {
    pub version: String,
    #[serde(default)]
    pub name: Option<String>,
    pub passes: Vec<PassDsl>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct PassDsl {
    pub name: String,
    #[serde(rename = "type")]
    pub pass_type: String,
    pub code: String,
    #[serde(default)]
    pub inputs: Vec<InputDsl>,
    #[serde(default)]
    pub outputs: Vec<OutputDsl>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct InputDsl {
    pub channel: usize,
    #[serde(rename = "type")]
    pub input_type: String,
    /// Asset id / URL / stream id, depending on `type`.
    #[serde(default)]
    pub source: Option<String>,
    /// Double-buffer index for feedback inputs.
    #[serde(default)]
    pub index: Option<usize>,
    #[serde(default)]
    pub sampler: SamplerDsl,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct OutputDsl {
    /// Which double buffer this pass writes.
    pub id: usize,
    #[serde(default)]
    pub channel: usize,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SamplerDsl {
    #[serde(default = "default_filter")]
    pub filter: String,
    #[serde(default = "default_wrap")]
    pub wrap: String,
    #[serde(default)]
    pub vflip: bool,
}

fn default_filter() -> String {
    "nearest".to_string()
}

fn default_wrap() -> String {
    "clamp".to_string()
}

impl Default for SamplerDsl {
    fn default() -> Self {
        Self {
            filter: default_filter(),
            wrap: default_wrap(),
            vflip: false,
        }
    }
}

pub fn parse_effect(json: &str) -> Result<EffectDsl> {
    serde_json::from_str(json).context("failed to parse effect DSL json")
}

pub fn load_effect_from_path(path: impl AsRef<std::path::Path>) -> Result<EffectDsl> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read effect DSL at {}", path.display()))?;
    parse_effect(&text)
}

pub fn pass_kind(s: &str) -> Result<PassKind> {
    match s.to_ascii_lowercase().as_str() {
        "common" => Ok(PassKind::Common),
        "buffer" => Ok(PassKind::Buffer),
        "image" => Ok(PassKind::Image),
        "cubemap" => Ok(PassKind::Cubemap),
        "sound" => Ok(PassKind::Sound),
        other => bail!("unknown pass type '{other}'"),
    }
}

fn filter_mode(s: &str) -> Result<FilterMode> {
    match s.to_ascii_lowercase().as_str() {
        "nearest" | "none" => Ok(FilterMode::Nearest),
        "linear" => Ok(FilterMode::Linear),
        "mipmap" => Ok(FilterMode::Mipmap),
        other => bail!("unknown filter '{other}'"),
    }
}

fn wrap_mode(s: &str) -> Result<WrapMode> {
    match s.to_ascii_lowercase().as_str() {
        "clamp" => Ok(WrapMode::Clamp),
        "repeat" => Ok(WrapMode::Repeat),
        other => bail!("unknown wrap mode '{other}'"),
    }
}

fn sampler_config(s: &SamplerDsl) -> Result<SamplerConfig> {
    Ok(SamplerConfig {
        filter: filter_mode(&s.filter)?,
        wrap: wrap_mode(&s.wrap)?,
        vflip: s.vflip,
    })
}

/// Map one DSL input to a bindable descriptor.
pub fn input_descriptor(input: &InputDsl) -> Result<InputDescriptor> {
    let sampler = sampler_config(&input.sampler)?;
    let source = || {
        input
            .source
            .clone()
            .with_context(|| format!("input '{}' needs a source", input.input_type))
    };
    match input.input_type.to_ascii_lowercase().as_str() {
        "empty" => Ok(InputDescriptor::Empty),
        "texture" => Ok(InputDescriptor::Texture {
            asset: source()?,
            sampler,
        }),
        "volume" => Ok(InputDescriptor::Volume {
            source: VolumeSource::Asset(source()?),
            sampler,
        }),
        "noisevolume" => {
            // Procedural volume; `index` carries the edge size when given.
            let size = input.index.unwrap_or(32) as u32;
            Ok(InputDescriptor::Volume {
                source: VolumeSource::Noise { size, channels: 1 },
                sampler,
            })
        }
        "cubemap" => Ok(InputDescriptor::Cubemap {
            asset: source()?,
            sampler,
        }),
        "video" => Ok(InputDescriptor::Video {
            url: source()?,
            sampler,
        }),
        "webcam" => Ok(InputDescriptor::Webcam { sampler }),
        "mic" => Ok(InputDescriptor::Mic),
        "music" => Ok(InputDescriptor::Music { url: source()? }),
        "musicstream" => Ok(InputDescriptor::MusicStream {
            stream_id: source()?,
        }),
        "keyboard" => Ok(InputDescriptor::Keyboard),
        "buffer" => Ok(InputDescriptor::BufferFeedback {
            index: input
                .index
                .context("buffer feedback input needs an index")?,
            sampler,
        }),
        "cubemapbuffer" => Ok(InputDescriptor::CubemapFeedback {
            index: input.index.unwrap_or(0),
            sampler,
        }),
        other => bail!("unknown input type '{other}'"),
    }
}

/// Build a live effect from a parsed document: create passes, bind every
/// input, then compile everything (headers already match the bound
/// categories by then).
pub fn instantiate(
    renderer: &mut dyn Renderer,
    platform: &mut Platform<'_>,
    dsl: &EffectDsl,
    api: ApiLevel,
    resolution: [u32; 2],
    fetcher: Arc<dyn AssetFetcher>,
) -> Result<Effect> {
    let mut effect = Effect::new(api, resolution, fetcher);

    let mut next_buffer = 0usize;
    let mut pass_ids = Vec::with_capacity(dsl.passes.len());
    for p in &dsl.passes {
        let id = match pass_kind(&p.pass_type)? {
            PassKind::Common => {
                effect.set_common_source(p.code.clone());
                effect.common_id()
            }
            PassKind::Image => {
                effect.set_image_source(p.code.clone());
                effect.image_id()
            }
            PassKind::Buffer => {
                let index = match p.outputs.first() {
                    Some(out) => out.id,
                    None => next_buffer,
                };
                next_buffer = index + 1;
                effect.add_buffer(index, p.name.clone(), p.code.clone())?
            }
            PassKind::Cubemap => effect.add_cubemap(p.name.clone(), p.code.clone())?,
            PassKind::Sound => effect.add_sound(p.name.clone(), p.code.clone())?,
        };
        pass_ids.push(id);
    }

    for (p, id) in dsl.passes.iter().zip(&pass_ids) {
        for input in &p.inputs {
            if input.channel >= crate::pass::CHANNEL_COUNT {
                bail!(
                    "pass '{}' binds channel {} (only 4 channels exist)",
                    p.name,
                    input.channel
                );
            }
            let descriptor = input_descriptor(input)?;
            effect.bind_input(renderer, platform, *id, input.channel, descriptor)?;
        }
    }

    effect.compile_all(renderer);
    Ok(effect)
}

#[cfg(test)]
mod tests {
    use super::*;

    const FIXTURE: &str = r#"{
        "version": "1.0",
        "name": "feedback demo",
        "passes": [
            {
                "name": "Buffer A",
                "type": "buffer",
                "code": "void mainImage(out vec4 c, in vec2 f) { c = vec4(0.5); }",
                "inputs": [
                    {"channel": 0, "type": "buffer", "index": 0, "sampler": {"filter": "linear"}}
                ],
                "outputs": [{"id": 0, "channel": 0}]
            },
            {
                "name": "Image",
                "type": "image",
                "code": "void mainImage(out vec4 c, in vec2 f) { c = texture(iChannel0, f / iResolution.xy); }",
                "inputs": [
                    {"channel": 0, "type": "buffer", "index": 0, "sampler": {"filter": "mipmap", "wrap": "repeat"}}
                ]
            }
        ]
    }"#;

    #[test]
    fn fixture_parses_with_defaults() {
        let dsl = parse_effect(FIXTURE).unwrap();
        assert_eq!(dsl.passes.len(), 2);
        let buf = &dsl.passes[0];
        assert_eq!(buf.pass_type, "buffer");
        assert_eq!(buf.inputs[0].sampler.filter, "linear");
        assert_eq!(buf.inputs[0].sampler.wrap, "clamp"); // default
        assert_eq!(buf.outputs[0].id, 0);
    }

    #[test]
    fn unknown_pass_type_errors() {
        assert!(pass_kind("postprocess").is_err());
        assert!(pass_kind("Buffer").is_ok());
    }

    #[test]
    fn buffer_feedback_requires_an_index() {
        let input = InputDsl {
            channel: 0,
            input_type: "buffer".into(),
            source: None,
            index: None,
            sampler: SamplerDsl::default(),
        };
        assert!(input_descriptor(&input).is_err());
    }

    #[test]
    fn texture_input_requires_a_source() {
        let input = InputDsl {
            channel: 0,
            input_type: "texture".into(),
            source: None,
            index: None,
            sampler: SamplerDsl::default(),
        };
        assert!(input_descriptor(&input).is_err());
    }
}
