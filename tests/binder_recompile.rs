//! Resource binder behavior: recompilation policy, async loads, teardown,
//! capability gating, and the synthetic fallbacks for audio and camera.

mod common;

use std::sync::Arc;

use common::{StubAudioContext, StubProvider, const_audio_bytes, draw_attachments, png_bytes, wait_until};
use shaderdeck::assets::{AssetData, AssetStore};
use shaderdeck::audio::{AUDIO_TEXTURE_WIDTH, Analyser, SyntheticAnalyser};
use shaderdeck::channel::InputDescriptor;
use shaderdeck::effect::{Effect, FrameInput, Platform, SharedKeyboard};
use shaderdeck::gfx::trace::{TraceEvent, TraceRenderer, UniformValue};
use shaderdeck::gfx::{
    Renderer, SamplerConfig, TextureFormat, TextureSpec, WrapMode,
};
use shaderdeck::header::ApiLevel;
use shaderdeck::loader::VolumeSource;

const IMAGE_SRC: &str =
    "void mainImage(out vec4 c, in vec2 f) { c = texture(iChannel0, f / iResolution.xy); }";

fn store_with_textures() -> Arc<AssetStore> {
    let store = AssetStore::new();
    store.insert(
        "texA.png",
        AssetData {
            bytes: png_bytes(8, 8, [10, 20, 30, 255]),
            mime_type: "image/png".into(),
        },
    );
    store.insert(
        "texB.png",
        AssetData {
            bytes: png_bytes(4, 4, [200, 100, 50, 255]),
            mime_type: "image/png".into(),
        },
    );
    Arc::new(store)
}

fn new_effect(store: Arc<AssetStore>) -> Effect {
    let mut effect = Effect::new(ApiLevel::Modern, [320, 240], store);
    effect.set_image_source(IMAGE_SRC);
    effect
}

fn frame(time: f32) -> FrameInput {
    FrameInput {
        time,
        time_delta: 1.0 / 60.0,
        frame_rate: 60.0,
        ..FrameInput::default()
    }
}

fn program_count(r: &TraceRenderer) -> usize {
    r.events
        .iter()
        .filter(|e| matches!(e, TraceEvent::CreateProgram(_)))
        .count()
}

fn texture(sampler: SamplerConfig, asset: &str) -> InputDescriptor {
    InputDescriptor::Texture {
        asset: asset.to_string(),
        sampler,
    }
}

#[test]
fn same_category_swap_recompiles_exactly_once() {
    let mut r = TraceRenderer::new();
    let mut effect = new_effect(store_with_textures());
    effect.compile_all(&mut r);
    let before = program_count(&r);

    let mut platform = Platform::default();
    let image = effect.image_id();

    // First bind leaves the empty category: one recompile.
    let first = effect
        .bind_input(&mut r, &mut platform, image, 0, texture(SamplerConfig::default(), "texA.png"))
        .unwrap();
    assert!(first.needs_recompile);
    assert!(!first.failed);
    assert_eq!(program_count(&r), before + 1);

    // Texture -> texture stays in the 2D category: no recompile.
    let second = effect
        .bind_input(&mut r, &mut platform, image, 0, texture(SamplerConfig::default(), "texB.png"))
        .unwrap();
    assert!(!second.needs_recompile);
    assert_eq!(program_count(&r), before + 1);
}

#[test]
fn cross_category_rebind_always_recompiles() {
    let mut r = TraceRenderer::new();
    let mut effect = new_effect(store_with_textures());
    effect.compile_all(&mut r);
    let mut platform = Platform::default();
    let image = effect.image_id();

    effect
        .bind_input(&mut r, &mut platform, image, 0, texture(SamplerConfig::default(), "texA.png"))
        .unwrap();
    let report = effect
        .bind_input(
            &mut r,
            &mut platform,
            image,
            0,
            InputDescriptor::Volume {
                source: VolumeSource::Noise {
                    size: 8,
                    channels: 1,
                },
                sampler: SamplerConfig::default(),
            },
        )
        .unwrap();
    assert!(report.needs_recompile, "2D -> 3D must regenerate the header");

    // The regenerated header now declares a 3D sampler on channel 0.
    let (_, fs) = r.last_shader_sources.clone().unwrap();
    assert!(fs.contains("uniform sampler3D iChannel0;"));
}

#[test]
fn buffer_feedback_counts_as_plain_2d() {
    let mut r = TraceRenderer::new();
    let mut effect = new_effect(store_with_textures());
    effect.compile_all(&mut r);
    let mut platform = Platform::default();
    let image = effect.image_id();

    effect
        .bind_input(&mut r, &mut platform, image, 0, texture(SamplerConfig::default(), "texA.png"))
        .unwrap();
    let report = effect
        .bind_input(
            &mut r,
            &mut platform,
            image,
            0,
            InputDescriptor::BufferFeedback {
                index: 0,
                sampler: SamplerConfig::default(),
            },
        )
        .unwrap();
    assert!(
        !report.needs_recompile,
        "texture and buffer feedback both bind sampler2D"
    );
}

#[test]
fn async_texture_load_flips_loaded_and_uploads_pixels() {
    let mut r = TraceRenderer::new();
    let mut effect = new_effect(store_with_textures());
    effect.compile_all(&mut r);
    let mut platform = Platform::default();
    let image = effect.image_id();
    effect
        .bind_input(&mut r, &mut platform, image, 0, texture(SamplerConfig::default(), "texA.png"))
        .unwrap();

    let program = effect.pass(image).unwrap().program().unwrap();
    let loaded = wait_until(|| {
        effect.tick(&mut r, &mut platform, &frame(0.0)).unwrap();
        r.uniform(program, "iCh0.loaded") == Some(&UniformValue::I32(1))
    });
    assert!(loaded, "texture load never completed");

    // The uploaded texels carry the decoded image.
    let draws = draw_attachments(&r);
    let (units, _) = draws.last().unwrap();
    let tex = units[0].expect("loaded texture attached");
    let data = &r.texture_data[&tex];
    assert_eq!(data.len(), 8 * 8 * 4);
    assert_eq!(&data[..4], &[10, 20, 30, 255]);

    // Resolution reaches the channel struct uniform.
    assert_eq!(
        r.uniform(program, "iCh0.size"),
        Some(&UniformValue::Vec3([8.0, 8.0, 1.0]))
    );
}

#[test]
fn rebinding_tears_down_the_previous_resource() {
    let mut r = TraceRenderer::new();
    let mut effect = new_effect(store_with_textures());
    effect.compile_all(&mut r);
    let mut platform = Platform::default();
    let image = effect.image_id();
    effect
        .bind_input(&mut r, &mut platform, image, 0, texture(SamplerConfig::default(), "texA.png"))
        .unwrap();

    let program = effect.pass(image).unwrap().program().unwrap();
    assert!(wait_until(|| {
        effect.tick(&mut r, &mut platform, &frame(0.0)).unwrap();
        r.uniform(program, "iCh0.loaded") == Some(&UniformValue::I32(1))
    }));
    let draws = draw_attachments(&r);
    let old_tex = draws.last().unwrap().0[0].unwrap();

    effect
        .bind_input(&mut r, &mut platform, image, 0, InputDescriptor::Empty)
        .unwrap();
    assert!(
        !r.textures.contains_key(&old_tex),
        "teardown must release the GPU texture"
    );
}

#[test]
fn keyboard_is_stateless_and_always_loaded() {
    let mut r = TraceRenderer::new();
    let keyboard_tex = r
        .create_texture(&TextureSpec::tex2d(256, 3, TextureFormat::R8))
        .unwrap();
    let mut effect = new_effect(store_with_textures());
    effect.compile_all(&mut r);
    let mut platform = Platform {
        keyboard: Some(SharedKeyboard {
            texture: keyboard_tex,
            resolution: [256, 3],
        }),
        ..Platform::default()
    };

    let image = effect.image_id();
    effect
        .bind_input(&mut r, &mut platform, image, 0, InputDescriptor::Keyboard)
        .unwrap();
    effect.tick(&mut r, &mut platform, &frame(0.0)).unwrap();

    let program = effect.pass(image).unwrap().program().unwrap();
    assert_eq!(
        r.uniform(program, "iCh0.loaded"),
        Some(&UniformValue::I32(1))
    );
    let draws = draw_attachments(&r);
    assert_eq!(draws.last().unwrap().0[0], Some(keyboard_tex));
    // The shared texture is not ours to destroy on rebind.
    effect
        .bind_input(&mut r, &mut platform, image, 0, InputDescriptor::Empty)
        .unwrap();
    assert!(r.textures.contains_key(&keyboard_tex));
}

#[test]
fn muted_music_keeps_supplying_deterministic_data() {
    let mut r = TraceRenderer::new();
    let mut effect = new_effect(store_with_textures());
    effect.compile_all(&mut r);

    let mut media = StubProvider::default();
    let mut audio = StubAudioContext::default();
    let image = effect.image_id();
    {
        let mut platform = Platform {
            media: Some(&mut media),
            audio: Some(&mut audio),
            ..Platform::default()
        };
        effect
            .bind_input(
                &mut r,
                &mut platform,
                image,
                0,
                InputDescriptor::Music {
                    url: "song.mp3".into(),
                },
            )
            .unwrap();
        effect.tick(&mut r, &mut platform, &frame(1.0)).unwrap();
    }

    // Live analyser data first.
    let draws = draw_attachments(&r);
    let audio_tex = draws.last().unwrap().0[0].expect("audio texture bound");
    assert_eq!(r.texture_data[&audio_tex], const_audio_bytes(200));

    // Mute mid-playback: data keeps flowing, now from the synthetic path.
    effect.set_input_muted(image, 0, true);
    effect.set_input_muted(image, 0, true); // idempotent
    {
        let mut platform = Platform {
            media: Some(&mut media),
            audio: Some(&mut audio),
            ..Platform::default()
        };
        effect.tick(&mut r, &mut platform, &frame(2.0)).unwrap();
    }

    let mut expected = vec![0u8; AUDIO_TEXTURE_WIDTH * 2];
    let (freq, wave) = expected.split_at_mut(AUDIO_TEXTURE_WIDTH);
    let mut synth = SyntheticAnalyser;
    synth.fill_frequency(2.0, freq);
    synth.fill_waveform(2.0, wave);
    assert_eq!(r.texture_data[&audio_tex], expected);
    assert!(expected.iter().any(|&b| b != 0), "synthetic data is non-null");
}

#[test]
fn denied_mic_and_camera_fall_back_to_synthetic() {
    let mut r = TraceRenderer::new();
    let mut effect = new_effect(store_with_textures());
    effect.compile_all(&mut r);

    let mut media = StubProvider {
        deny_webcam: true,
        ..StubProvider::default()
    };
    let mut audio = StubAudioContext {
        deny_mic: true,
        ..StubAudioContext::default()
    };
    let image = effect.image_id();
    let mut platform = Platform {
        media: Some(&mut media),
        audio: Some(&mut audio),
        ..Platform::default()
    };

    let mic = effect
        .bind_input(&mut r, &mut platform, image, 0, InputDescriptor::Mic)
        .unwrap();
    let cam = effect
        .bind_input(
            &mut r,
            &mut platform,
            image,
            1,
            InputDescriptor::Webcam {
                sampler: SamplerConfig::default(),
            },
        )
        .unwrap();
    assert!(!mic.failed, "capability gaps are not bind failures");
    assert!(!cam.failed);

    effect.tick(&mut r, &mut platform, &frame(3.0)).unwrap();
    let program = effect.pass(image).unwrap().program().unwrap();
    assert_eq!(
        r.uniform(program, "iCh0.loaded"),
        Some(&UniformValue::I32(1))
    );
    assert_eq!(
        r.uniform(program, "iCh1.loaded"),
        Some(&UniformValue::I32(1))
    );

    let draws = draw_attachments(&r);
    let (units, _) = draws.last().unwrap();
    let mic_data = &r.texture_data[&units[0].unwrap()];
    let cam_data = &r.texture_data[&units[1].unwrap()];
    assert!(mic_data.iter().any(|&b| b != 0));
    assert!(cam_data.iter().any(|&b| b != 0));
}

#[test]
fn capability_table_gates_sampler_setters() {
    let mut r = TraceRenderer::new();
    let mut effect = new_effect(store_with_textures());
    effect.compile_all(&mut r);
    let mut platform = Platform::default();
    let image = effect.image_id();

    effect
        .bind_input(&mut r, &mut platform, image, 0, texture(SamplerConfig::default(), "texA.png"))
        .unwrap();
    assert!(effect.set_input_wrap(image, 0, WrapMode::Repeat));

    let mut media = StubProvider::default();
    let mut audio = StubAudioContext::default();
    let mut platform = Platform {
        media: Some(&mut media),
        audio: Some(&mut audio),
        ..Platform::default()
    };
    effect
        .bind_input(
            &mut r,
            &mut platform,
            image,
            1,
            InputDescriptor::Music {
                url: "song.mp3".into(),
            },
        )
        .unwrap();
    assert!(
        !effect.set_input_wrap(image, 1, WrapMode::Repeat),
        "audio inputs reject wrap repeat"
    );
    assert!(effect.set_input_wrap(image, 1, WrapMode::Clamp));
}

#[test]
fn video_open_failure_retries_alternate_container() {
    let mut r = TraceRenderer::new();
    let mut effect = new_effect(store_with_textures());
    effect.compile_all(&mut r);

    let mut media = StubProvider::default();
    media.fail_urls.insert("clip.mp4".to_string());
    let image = effect.image_id();
    let mut platform = Platform {
        media: Some(&mut media),
        ..Platform::default()
    };
    let report = effect
        .bind_input(
            &mut r,
            &mut platform,
            image,
            0,
            InputDescriptor::Video {
                url: "clip.mp4".into(),
                sampler: SamplerConfig::default(),
            },
        )
        .unwrap();
    assert!(!report.failed);
    assert_eq!(media.opened, vec!["clip.mp4".to_string(), "clip.webm".to_string()]);
}
