//! Offline sound rendering.
//!
//! The sound pass never runs on the frame cadence. It renders into square
//! offscreen tiles where every texel encodes one stereo sample as four
//! bytes (16 bits per channel, low/high byte pairs), reads the tiles back
//! sequentially, and decodes them into a PCM buffer covering the full
//! requested duration.

use anyhow::{Context, Result, ensure};

use crate::channel::ResolvedInput;
use crate::gfx::{Renderer, TextureFormat, TextureSpec, UnitBinding};
use crate::header::SOUND_TILE_DIM;
use crate::pass::{CHANNEL_COUNT, FrameUniforms, Pass};

/// Samples encoded by one 512x512 tile.
pub const SAMPLES_PER_TILE: usize = (SOUND_TILE_DIM * SOUND_TILE_DIM) as usize;

#[derive(Debug, Clone)]
pub struct SoundBuffer {
    pub left: Vec<f32>,
    pub right: Vec<f32>,
    pub sample_rate: f32,
}

impl SoundBuffer {
    pub fn len(&self) -> usize {
        self.left.len()
    }

    pub fn is_empty(&self) -> bool {
        self.left.is_empty()
    }
}

/// Quantize one stereo sample to the 4-byte texel layout the sound header
/// emits: low/high byte of the left channel, then of the right.
/// Intermediate math runs in f64, which is exact for f32 inputs, so the
/// quantization error is the pure half-step bound.
pub fn encode_sample(left: f32, right: f32) -> [u8; 4] {
    let q = |x: f32| -> u16 {
        (((0.5 + 0.5 * f64::from(x.clamp(-1.0, 1.0))) * 65535.0) + 0.5) as u16
    };
    let l = q(left);
    let r = q(right);
    [(l & 0xff) as u8, (l >> 8) as u8, (r & 0xff) as u8, (r >> 8) as u8]
}

/// Inverse of [`encode_sample`], exact to within `1/65535` of the input.
pub fn decode_sample(texel: [u8; 4]) -> (f32, f32) {
    let d = |lo: u8, hi: u8| {
        (-1.0 + 2.0 * (f64::from(lo) + 256.0 * f64::from(hi)) / 65535.0) as f32
    };
    (d(texel[0], texel[1]), d(texel[2], texel[3]))
}

/// Number of tiles needed for `total_samples`.
pub fn tile_count(total_samples: usize) -> usize {
    total_samples.div_ceil(SAMPLES_PER_TILE)
}

/// Drive the compiled sound pass across offscreen tiles until
/// `duration_secs * sample_rate` samples are decoded. Strictly sequential:
/// every tile reuses one offscreen target.
pub fn render_offline(
    renderer: &mut dyn Renderer,
    pass: &Pass,
    resolved: &[ResolvedInput; CHANNEL_COUNT],
    duration_secs: f32,
    sample_rate: f32,
    date: [f32; 4],
) -> Result<SoundBuffer> {
    ensure!(duration_secs > 0.0, "sound duration must be positive");
    ensure!(sample_rate > 0.0, "sample rate must be positive");
    let program = pass
        .program()
        .with_context(|| format!("{} has no compiled program", pass.id()))?;

    let total = (duration_secs * sample_rate).ceil() as usize;
    let tiles = tile_count(total);
    let dim = SOUND_TILE_DIM;

    let texture = renderer.create_texture(&TextureSpec::tex2d(dim, dim, TextureFormat::Rgba8))?;
    let target = renderer.create_render_target(texture)?;

    let uniforms = FrameUniforms {
        sample_rate,
        date,
        ..FrameUniforms::default()
    };
    let units: [UnitBinding; CHANNEL_COUNT] =
        std::array::from_fn(|i| resolved[i].texture.map(|t| (t, resolved[i].sampler)));

    renderer.use_program(program);
    pass.bind_frame_uniforms(renderer, &uniforms, resolved);
    renderer.attach_textures(units);

    let mut left = Vec::with_capacity(total);
    let mut right = Vec::with_capacity(total);
    let mut bytes = vec![0u8; SAMPLES_PER_TILE * 4];

    let result = (|| -> Result<()> {
        for tile in 0..tiles {
            let offset = tile * SAMPLES_PER_TILE;
            renderer.set_uniform_f32(program, "iTimeOffset", offset as f32 / sample_rate);
            renderer.set_uniform_i32(program, "iSampleOffset", offset as i32);
            renderer.set_render_target(Some(target));
            renderer.set_viewport(0, 0, dim, dim);
            renderer.draw_fullscreen_triangle()?;
            renderer.read_pixels(target, dim, dim, &mut bytes)?;

            let texels: &[[u8; 4]] = bytemuck::cast_slice(&bytes);
            let take = (total - offset).min(SAMPLES_PER_TILE);
            for texel in &texels[..take] {
                let (l, r) = decode_sample(*texel);
                left.push(l);
                right.push(r);
            }
        }
        Ok(())
    })();

    renderer.set_render_target(None);
    renderer.destroy_render_target(target);
    renderer.destroy_texture(texture);
    result?;

    Ok(SoundBuffer {
        left,
        right,
        sample_rate,
    })
}
