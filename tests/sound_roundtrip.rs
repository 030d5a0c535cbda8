//! Sound pipeline: quantization round-trip, tile partitioning/ordering,
//! and the not-until-loaded gate on offline rendering.

mod common;

use std::sync::Arc;

use proptest::prelude::*;
use shaderdeck::assets::{AssetData, AssetStore};
use shaderdeck::channel::InputDescriptor;
use shaderdeck::effect::{Effect, FrameInput, Platform};
use shaderdeck::gfx::SamplerConfig;
use shaderdeck::gfx::trace::{TraceRenderer, UniformValue};
use shaderdeck::header::ApiLevel;
use shaderdeck::sound::{SAMPLES_PER_TILE, decode_sample, encode_sample};

use common::{png_bytes, wait_until};

const SOUND_SRC: &str = "vec2 mainSound(int samp, float time) { return vec2(sin(6.2831*440.0*time)); }";

// One quantization step, plus an epsilon for the final f32 cast.
const TOL: f32 = 1.0 / 65535.0 + f32::EPSILON;

proptest! {
    #[test]
    fn quantization_roundtrip_within_one_lsb(l in -1.0f32..=1.0, r in -1.0f32..=1.0) {
        let (dl, dr) = decode_sample(encode_sample(l, r));
        prop_assert!((dl - l).abs() <= TOL);
        prop_assert!((dr - r).abs() <= TOL);
    }

    #[test]
    fn encoded_bytes_decode_to_unit_range(a: u8, b: u8, c: u8, d: u8) {
        let (l, r) = decode_sample([a, b, c, d]);
        prop_assert!((-1.0..=1.0).contains(&l));
        prop_assert!((-1.0..=1.0).contains(&r));
    }
}

fn sound_effect(store: Arc<AssetStore>) -> Effect {
    let mut effect = Effect::new(ApiLevel::Modern, [320, 240], store);
    effect.set_image_source("void mainImage(out vec4 c, in vec2 f) { c = vec4(0.0); }");
    effect.add_sound("Sound", SOUND_SRC).unwrap();
    effect
}

#[test]
fn offline_render_concatenates_tiles_in_order() {
    let mut r = TraceRenderer::new();
    let mut effect = sound_effect(Arc::new(AssetStore::new()));
    effect.compile_all(&mut r);
    assert!(effect.sound_pending());

    // Tile 0 decodes to 0.25, tile 1 to 0.75 (right channels negated).
    r.set_readback_fill(|tile, out| {
        let value = if tile == 0 { 0.25 } else { 0.75 };
        let texel = encode_sample(value, -value);
        for chunk in out.chunks_exact_mut(4) {
            chunk.copy_from_slice(&texel);
        }
    });

    let sample_rate = 44_100.0f32;
    let duration = 8.0f32; // two tiles at 44.1 kHz
    let total = (duration * sample_rate).ceil() as usize;
    assert!(total > SAMPLES_PER_TILE && total <= 2 * SAMPLES_PER_TILE);

    let mut platform = Platform::default();
    let buffer = effect
        .render_sound(&mut r, &mut platform, duration, sample_rate)
        .unwrap()
        .expect("sound render should run");

    assert_eq!(buffer.len(), total);
    assert!((buffer.left[0] - 0.25).abs() <= 1.0 / 65535.0);
    assert!((buffer.right[0] + 0.25).abs() <= 1.0 / 65535.0);
    assert!((buffer.left[SAMPLES_PER_TILE] - 0.75).abs() <= 1.0 / 65535.0);
    assert!((buffer.left[total - 1] - 0.75).abs() <= 1.0 / 65535.0);

    // The second tile saw the advanced sample/time offsets.
    let sound_id = shaderdeck::pass::PassId {
        kind: shaderdeck::header::PassKind::Sound,
        index: 0,
    };
    let program = effect.pass(sound_id).unwrap().program().unwrap();
    assert_eq!(
        r.uniform(program, "iSampleOffset"),
        Some(&UniformValue::I32(SAMPLES_PER_TILE as i32))
    );

    // Rendering clears the pending flag until something retriggers it.
    assert!(!effect.sound_pending());
    effect.request_sound_render();
    assert!(effect.sound_pending());
}

#[test]
fn sound_waits_for_loading_inputs() {
    let store = AssetStore::new();
    store.insert(
        "pad.png",
        AssetData {
            bytes: png_bytes(4, 4, [1, 2, 3, 255]),
            mime_type: "image/png".into(),
        },
    );
    let mut r = TraceRenderer::new();
    let mut effect = sound_effect(Arc::new(store));
    let sound_id = shaderdeck::pass::PassId {
        kind: shaderdeck::header::PassKind::Sound,
        index: 0,
    };
    let mut platform = Platform::default();
    effect
        .bind_input(
            &mut r,
            &mut platform,
            sound_id,
            0,
            InputDescriptor::Texture {
                asset: "pad.png".into(),
                sampler: SamplerConfig::default(),
            },
        )
        .unwrap();
    effect.compile_all(&mut r);

    // The texture decode is still in flight on a worker; rendering must
    // refuse to start rather than read a half-loaded input.
    let first_try = effect
        .render_sound(&mut r, &mut platform, 1.0, 44_100.0)
        .unwrap();
    if first_try.is_some() {
        // The worker can win the race; that is a valid schedule too.
        return;
    }
    assert!(effect.sound_pending(), "aborted attempts stay pending");

    assert!(wait_until(|| {
        effect
            .tick(&mut r, &mut platform, &FrameInput::default())
            .unwrap();
        effect
            .render_sound(&mut r, &mut platform, 1.0, 44_100.0)
            .unwrap()
            .is_some()
    }));
    assert!(!effect.sound_pending());
}
