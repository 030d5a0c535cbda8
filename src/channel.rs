//! Input channel binding.
//!
//! Each pass owns up to four channels. A channel holds one producer
//! variant (static texture, volume, cubemap, video, webcam, mic, music,
//! streamed music, keyboard, or a sibling pass's feedback) plus the
//! sampler state legal for that variant. Rebinding always tears the old
//! producer down first; whether the swap forces a header recompile depends
//! only on whether the sampler category changed.

use anyhow::{Context, Result, bail};

use crate::audio::{AUDIO_TEXTURE_WIDTH, Analyser, SyntheticAnalyser};
use crate::doublebuf::{BUFFER_SLOT_COUNT, FeedbackStore};
use crate::effect::Platform;
use crate::gfx::{
    CubeFace, FilterMode, Renderer, SamplerConfig, TextureFormat, TextureId, TextureSpec, WrapMode,
};
use crate::header::SamplerCategory;
use crate::loader::{DecodedAsset, Loader, VolumeSource};
use crate::media::{MediaElement, MediaProvider, alternate_extension};
use crate::pass::PassId;

/// Variant tag, used for the capability table, recompile policy, and the
/// kind code reported to UI callbacks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputKind {
    Empty,
    Texture,
    Volume,
    Cubemap,
    Video,
    Webcam,
    Mic,
    Music,
    MusicStream,
    Keyboard,
    BufferFeedback,
    CubemapFeedback,
}

impl InputKind {
    pub fn code(self) -> u8 {
        match self {
            InputKind::Empty => 0,
            InputKind::Texture => 1,
            InputKind::Volume => 2,
            InputKind::Cubemap => 3,
            InputKind::Video => 4,
            InputKind::Webcam => 5,
            InputKind::Mic => 6,
            InputKind::Music => 7,
            InputKind::MusicStream => 8,
            InputKind::Keyboard => 9,
            InputKind::BufferFeedback => 10,
            InputKind::CubemapFeedback => 11,
        }
    }

    /// The sampler type this variant binds, or `None` for an empty slot.
    /// An empty slot counts as its own category: the first real bind always
    /// recompiles, swaps inside one category never do.
    pub fn sampler_category(self) -> Option<SamplerCategory> {
        match self {
            InputKind::Empty => None,
            InputKind::Cubemap | InputKind::CubemapFeedback => Some(SamplerCategory::Cube),
            InputKind::Volume => Some(SamplerCategory::Tex3d),
            _ => Some(SamplerCategory::Tex2d),
        }
    }

    /// Static producers never change after load; the UI uses this to skip
    /// per-frame thumbnail refreshes.
    pub fn is_static(self) -> bool {
        matches!(
            self,
            InputKind::Empty | InputKind::Texture | InputKind::Volume | InputKind::Cubemap
        )
    }

    pub fn capabilities(self) -> Capabilities {
        match self {
            InputKind::Empty | InputKind::Keyboard => Capabilities::NONE,
            InputKind::Texture => Capabilities {
                mipmap: true,
                linear: true,
                wrap_repeat: true,
                vflip: true,
            },
            InputKind::Volume => Capabilities {
                mipmap: true,
                linear: true,
                wrap_repeat: true,
                vflip: false,
            },
            InputKind::Cubemap => Capabilities {
                mipmap: true,
                linear: true,
                wrap_repeat: false,
                vflip: false,
            },
            InputKind::Video | InputKind::Webcam => Capabilities {
                mipmap: false,
                linear: true,
                wrap_repeat: false,
                vflip: true,
            },
            InputKind::Mic | InputKind::Music | InputKind::MusicStream => Capabilities {
                mipmap: false,
                linear: true,
                wrap_repeat: false,
                vflip: false,
            },
            InputKind::BufferFeedback => Capabilities {
                mipmap: true,
                linear: true,
                wrap_repeat: true,
                vflip: false,
            },
            InputKind::CubemapFeedback => Capabilities {
                mipmap: false,
                linear: true,
                wrap_repeat: false,
                vflip: false,
            },
        }
    }
}

/// Which sampler-config knobs a variant accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    pub mipmap: bool,
    pub linear: bool,
    pub wrap_repeat: bool,
    pub vflip: bool,
}

impl Capabilities {
    pub const NONE: Capabilities = Capabilities {
        mipmap: false,
        linear: false,
        wrap_repeat: false,
        vflip: false,
    };
}

/// Drop sampler settings the variant does not accept.
pub fn clamp_sampler(requested: SamplerConfig, caps: Capabilities) -> SamplerConfig {
    let filter = match requested.filter {
        FilterMode::Mipmap if !caps.mipmap => {
            if caps.linear {
                FilterMode::Linear
            } else {
                FilterMode::Nearest
            }
        }
        FilterMode::Linear if !caps.linear => FilterMode::Nearest,
        f => f,
    };
    let wrap = match requested.wrap {
        WrapMode::Repeat if !caps.wrap_repeat => WrapMode::Clamp,
        w => w,
    };
    SamplerConfig {
        filter,
        wrap,
        vflip: requested.vflip && caps.vflip,
    }
}

/// What a host asks a channel to become.
#[derive(Debug, Clone)]
pub enum InputDescriptor {
    Empty,
    Texture { asset: String, sampler: SamplerConfig },
    Volume { source: VolumeSource, sampler: SamplerConfig },
    Cubemap { asset: String, sampler: SamplerConfig },
    Video { url: String, sampler: SamplerConfig },
    Webcam { sampler: SamplerConfig },
    Mic,
    Music { url: String },
    MusicStream { stream_id: String },
    Keyboard,
    BufferFeedback { index: usize, sampler: SamplerConfig },
    CubemapFeedback { index: usize, sampler: SamplerConfig },
}

impl InputDescriptor {
    pub fn kind(&self) -> InputKind {
        match self {
            InputDescriptor::Empty => InputKind::Empty,
            InputDescriptor::Texture { .. } => InputKind::Texture,
            InputDescriptor::Volume { .. } => InputKind::Volume,
            InputDescriptor::Cubemap { .. } => InputKind::Cubemap,
            InputDescriptor::Video { .. } => InputKind::Video,
            InputDescriptor::Webcam { .. } => InputKind::Webcam,
            InputDescriptor::Mic => InputKind::Mic,
            InputDescriptor::Music { .. } => InputKind::Music,
            InputDescriptor::MusicStream { .. } => InputKind::MusicStream,
            InputDescriptor::Keyboard => InputKind::Keyboard,
            InputDescriptor::BufferFeedback { .. } => InputKind::BufferFeedback,
            InputDescriptor::CubemapFeedback { .. } => InputKind::CubemapFeedback,
        }
    }

    fn sampler(&self) -> SamplerConfig {
        match self {
            InputDescriptor::Texture { sampler, .. }
            | InputDescriptor::Volume { sampler, .. }
            | InputDescriptor::Cubemap { sampler, .. }
            | InputDescriptor::Video { sampler, .. }
            | InputDescriptor::Webcam { sampler }
            | InputDescriptor::BufferFeedback { sampler, .. }
            | InputDescriptor::CubemapFeedback { sampler, .. } => *sampler,
            _ => SamplerConfig::default(),
        }
    }
}

// ---------------------------------------------------------------------------
// Runtime binding state
// ---------------------------------------------------------------------------

/// Async-loaded GPU texture state shared by texture/volume/cubemap inputs.
#[derive(Debug, Default)]
pub struct LoadingTexture {
    texture: Option<TextureId>,
    resolution: [f32; 3],
    loaded: bool,
}

pub struct VideoInput {
    /// `None` after an unrecoverable open failure, or for the synthetic
    /// webcam fallback.
    element: Option<Box<dyn MediaElement>>,
    /// Original URL, for the one-shot container-fallback retry. Webcams
    /// have no URL and never retry.
    url: Option<String>,
    retried: bool,
    /// Camera-denied fallback: a deterministic animated pattern.
    synthetic: bool,
    texture: Option<TextureId>,
    resolution: [f32; 3],
    loaded: bool,
}

impl VideoInput {
    fn unloaded(element: Option<Box<dyn MediaElement>>, url: Option<String>, retried: bool, synthetic: bool) -> Self {
        Self {
            element,
            url,
            retried,
            synthetic,
            texture: None,
            resolution: [0.0; 3],
            loaded: false,
        }
    }
}

pub struct AudioInput {
    /// Present for music variants; mic has no element.
    element: Option<Box<dyn MediaElement>>,
    url: Option<String>,
    retried: bool,
    analyser: Option<Box<dyn Analyser>>,
    synth: SyntheticAnalyser,
    texture: Option<TextureId>,
    loaded: bool,
    muted: bool,
    scratch: Vec<u8>,
    stream_title: Option<String>,
}

pub enum InputBinding {
    Empty,
    Texture(LoadingTexture),
    Volume(LoadingTexture),
    Cubemap(LoadingTexture),
    Video(VideoInput),
    Webcam(VideoInput),
    Mic(AudioInput),
    Music(AudioInput),
    MusicStream(AudioInput),
    Keyboard,
    BufferFeedback(usize),
    CubemapFeedback(usize),
}

impl InputBinding {
    pub fn kind(&self) -> InputKind {
        match self {
            InputBinding::Empty => InputKind::Empty,
            InputBinding::Texture(_) => InputKind::Texture,
            InputBinding::Volume(_) => InputKind::Volume,
            InputBinding::Cubemap(_) => InputKind::Cubemap,
            InputBinding::Video(_) => InputKind::Video,
            InputBinding::Webcam(_) => InputKind::Webcam,
            InputBinding::Mic(_) => InputKind::Mic,
            InputBinding::Music(_) => InputKind::Music,
            InputBinding::MusicStream(_) => InputKind::MusicStream,
            InputBinding::Keyboard => InputKind::Keyboard,
            InputBinding::BufferFeedback(_) => InputKind::BufferFeedback,
            InputBinding::CubemapFeedback(_) => InputKind::CubemapFeedback,
        }
    }
}

/// Result of a bind request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BindReport {
    pub failed: bool,
    /// True iff the sampler category changed, so the pass header (and
    /// therefore the program) must be regenerated.
    pub needs_recompile: bool,
}

/// Per-frame view of a channel, fed to uniform binding. Feedback inputs are
/// resolved fresh against the store every frame; nothing here is cached.
#[derive(Debug, Clone, Copy)]
pub struct ResolvedInput {
    pub texture: Option<TextureId>,
    pub sampler: SamplerConfig,
    pub resolution: [f32; 3],
    pub time: f32,
    pub loaded: bool,
}

impl ResolvedInput {
    pub const EMPTY: ResolvedInput = ResolvedInput {
        texture: None,
        sampler: SamplerConfig {
            filter: FilterMode::Nearest,
            wrap: WrapMode::Clamp,
            vflip: false,
        },
        resolution: [0.0; 3],
        time: 0.0,
        loaded: false,
    };
}

pub struct Channel {
    slot: usize,
    binding: InputBinding,
    sampler: SamplerConfig,
    /// Bumped on every teardown so stale loader completions are dropped.
    generation: u64,
}

impl Channel {
    pub fn new(slot: usize) -> Self {
        Self {
            slot,
            binding: InputBinding::Empty,
            sampler: SamplerConfig::default(),
            generation: 0,
        }
    }

    pub fn slot(&self) -> usize {
        self.slot
    }

    pub fn kind(&self) -> InputKind {
        self.binding.kind()
    }

    pub fn sampler(&self) -> SamplerConfig {
        self.sampler
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Category used when synthesizing the header. Empty slots declare a
    /// plain 2D sampler.
    pub fn header_category(&self) -> SamplerCategory {
        self.kind()
            .sampler_category()
            .unwrap_or(SamplerCategory::Tex2d)
    }

    /// Index of the double buffer this channel reads, if it is buffer
    /// feedback. The scheduler uses this to decide which outputs need
    /// mipmaps rebuilt after rendering.
    pub fn buffer_feedback_index(&self) -> Option<usize> {
        match &self.binding {
            InputBinding::BufferFeedback(i) => Some(*i),
            _ => None,
        }
    }

    pub fn is_cubemap_feedback(&self) -> bool {
        matches!(self.binding, InputBinding::CubemapFeedback(_))
    }

    /// Stream metadata for UI display, when the binding has any.
    pub fn stream_title(&self) -> Option<&str> {
        match &self.binding {
            InputBinding::MusicStream(a) => a.stream_title.as_deref(),
            _ => None,
        }
    }

    // -- binding ------------------------------------------------------------

    /// Replace this channel's producer. The previous resource is always
    /// torn down first, whatever its load state.
    pub fn bind(
        &mut self,
        renderer: &mut dyn Renderer,
        loader: &Loader,
        platform: &mut Platform<'_>,
        pass: PassId,
        descriptor: InputDescriptor,
    ) -> BindReport {
        let old_category = self.kind().sampler_category();
        self.teardown(renderer);

        let kind = descriptor.kind();
        self.sampler = clamp_sampler(descriptor.sampler(), kind.capabilities());

        let failed = match self.instantiate(renderer, loader, platform, pass, descriptor) {
            Ok(soft_failure) => soft_failure,
            Err(e) => {
                // Hard failure: the slot stays empty.
                eprintln!("[bind] {pass} channel {}: {e:#}", self.slot);
                true
            }
        };

        BindReport {
            failed,
            needs_recompile: old_category != self.kind().sampler_category(),
        }
    }

    /// Construct the new binding. `Ok(true)` is a soft failure: the variant
    /// is installed but will never reach its real data source.
    fn instantiate(
        &mut self,
        renderer: &mut dyn Renderer,
        loader: &Loader,
        platform: &mut Platform<'_>,
        pass: PassId,
        descriptor: InputDescriptor,
    ) -> Result<bool> {
        match descriptor {
            InputDescriptor::Empty => {
                self.binding = InputBinding::Empty;
            }
            InputDescriptor::Keyboard => {
                self.binding = InputBinding::Keyboard;
            }
            InputDescriptor::Texture { asset, .. } => {
                let url = resolve_url(platform, &asset)?;
                loader.request_texture(pass, self.slot, self.generation, url, self.sampler.vflip);
                self.binding = InputBinding::Texture(LoadingTexture::default());
            }
            InputDescriptor::Volume { source, .. } => {
                let source = match source {
                    VolumeSource::Asset(asset) => {
                        VolumeSource::Asset(resolve_url(platform, &asset)?)
                    }
                    s => s,
                };
                loader.request_volume(pass, self.slot, self.generation, source);
                self.binding = InputBinding::Volume(LoadingTexture::default());
            }
            InputDescriptor::Cubemap { asset, .. } => {
                let faces = match platform.resolver {
                    Some(r) => r.resolve_cubemap(&asset)?,
                    None => crate::assets::AssetResolver::resolve_cubemap(
                        &crate::assets::IdentityResolver,
                        &asset,
                    )?,
                };
                loader.request_cubemap(pass, self.slot, self.generation, faces, self.sampler.vflip);
                self.binding = InputBinding::Cubemap(LoadingTexture::default());
            }
            InputDescriptor::Video { url, .. } => {
                match open_media_with_retry(platform, &url, false) {
                    Ok((element, retried)) => {
                        self.binding = InputBinding::Video(VideoInput::unloaded(
                            Some(element),
                            Some(url),
                            retried,
                            false,
                        ));
                    }
                    Err(e) => {
                        // No fallback for file video: the slot stays bound
                        // but permanently unloaded.
                        eprintln!("[bind] video '{url}' unavailable: {e:#}");
                        self.binding =
                            InputBinding::Video(VideoInput::unloaded(None, Some(url), true, false));
                        return Ok(true);
                    }
                }
            }
            InputDescriptor::Webcam { .. } => {
                // Camera denial is a capability gap, not a failure: fall
                // back to the synthetic pattern.
                let element = platform.media.as_mut().and_then(|m| m.open_webcam().ok());
                let synthetic = element.is_none();
                self.binding =
                    InputBinding::Webcam(VideoInput::unloaded(element, None, true, synthetic));
            }
            InputDescriptor::Mic => {
                let analyser = platform
                    .audio
                    .as_mut()
                    .and_then(|a| a.create_mic_analyser());
                self.binding =
                    InputBinding::Mic(new_audio_input(renderer, None, None, analyser, None)?);
            }
            InputDescriptor::Music { url } => {
                self.binding = InputBinding::Music(open_music(renderer, platform, url, None)?);
            }
            InputDescriptor::MusicStream { stream_id } => {
                let info = platform
                    .resolver
                    .context("no resolver for streamed music")
                    .and_then(|r| r.resolve_stream(&stream_id));
                match info {
                    Ok(info) => {
                        self.binding = InputBinding::MusicStream(open_music(
                            renderer, platform, info.url, info.title,
                        )?);
                    }
                    Err(e) => {
                        // Keep the slot bound; it synthesizes audio data and
                        // simply never reaches the real stream.
                        eprintln!("[bind] stream '{stream_id}' did not resolve: {e:#}");
                        self.binding = InputBinding::MusicStream(new_audio_input(
                            renderer, None, None, None, None,
                        )?);
                        return Ok(true);
                    }
                }
            }
            InputDescriptor::BufferFeedback { index, .. } => {
                if index >= BUFFER_SLOT_COUNT {
                    bail!("buffer feedback index {index} out of range");
                }
                self.binding = InputBinding::BufferFeedback(index);
            }
            InputDescriptor::CubemapFeedback { index, .. } => {
                self.binding = InputBinding::CubemapFeedback(index);
            }
        }
        Ok(false)
    }

    /// Release everything the current binding owns. Safe in any load state;
    /// in-flight loads are invalidated via the generation counter.
    pub fn teardown(&mut self, renderer: &mut dyn Renderer) {
        match &mut self.binding {
            InputBinding::Texture(t) | InputBinding::Volume(t) | InputBinding::Cubemap(t) => {
                if let Some(id) = t.texture.take() {
                    renderer.destroy_texture(id);
                }
            }
            InputBinding::Video(v) | InputBinding::Webcam(v) => {
                if let Some(el) = v.element.as_mut() {
                    el.pause();
                }
                if let Some(id) = v.texture.take() {
                    renderer.destroy_texture(id);
                }
            }
            InputBinding::Mic(a) | InputBinding::Music(a) | InputBinding::MusicStream(a) => {
                if let Some(el) = a.element.as_mut() {
                    el.pause();
                }
                if let Some(id) = a.texture.take() {
                    renderer.destroy_texture(id);
                }
            }
            // Feedback and keyboard reference resources owned elsewhere.
            InputBinding::Empty
            | InputBinding::Keyboard
            | InputBinding::BufferFeedback(_)
            | InputBinding::CubemapFeedback(_) => {}
        }
        self.binding = InputBinding::Empty;
        self.sampler = SamplerConfig::default();
        self.generation += 1;
    }

    // -- async load completion ---------------------------------------------

    /// Apply a finished decode. Returns true when the channel flipped to
    /// loaded (the caller emits the channel-update notification).
    pub fn apply_load(
        &mut self,
        renderer: &mut dyn Renderer,
        generation: u64,
        result: Result<DecodedAsset, String>,
    ) -> bool {
        if generation != self.generation {
            return false; // stale: the slot was rebound since the request
        }
        let decoded = match result {
            Ok(d) => d,
            // Failed loads leave the slot unloaded forever; never fatal.
            Err(_) => return false,
        };
        let wants_mipmaps = self.sampler.filter == FilterMode::Mipmap;
        match (&mut self.binding, decoded) {
            (
                InputBinding::Texture(t),
                DecodedAsset::Texture {
                    pixels,
                    width,
                    height,
                },
            ) => {
                let spec = TextureSpec::tex2d(width, height, TextureFormat::Rgba8);
                finish_upload(
                    renderer,
                    t,
                    &spec,
                    &pixels,
                    [width as f32, height as f32, 1.0],
                    wants_mipmaps,
                )
            }
            (
                InputBinding::Volume(t),
                DecodedAsset::Volume {
                    voxels,
                    width,
                    height,
                    depth,
                    channels,
                },
            ) => {
                let format = if channels == 1 {
                    TextureFormat::R8
                } else {
                    TextureFormat::Rgba8
                };
                let spec = TextureSpec::tex3d(width, height, depth, format);
                finish_upload(
                    renderer,
                    t,
                    &spec,
                    &voxels,
                    [width as f32, height as f32, depth as f32],
                    wants_mipmaps,
                )
            }
            (InputBinding::Cubemap(t), DecodedAsset::Cubemap { faces, face_size }) => {
                let spec = TextureSpec::cube(face_size, TextureFormat::Rgba8);
                let upload = |renderer: &mut dyn Renderer| -> Result<TextureId> {
                    let id = renderer.create_texture(&spec)?;
                    for (face, pixels) in CubeFace::ALL.iter().zip(faces.iter()) {
                        renderer.update_texture(id, Some(*face), pixels)?;
                    }
                    if wants_mipmaps {
                        renderer.create_mipmaps(id);
                    }
                    Ok(id)
                };
                match upload(renderer) {
                    Ok(id) => {
                        t.texture = Some(id);
                        t.resolution = [face_size as f32, face_size as f32, 1.0];
                        t.loaded = true;
                        true
                    }
                    Err(e) => {
                        eprintln!("[loader] cubemap upload failed: {e:#}");
                        false
                    }
                }
            }
            _ => false,
        }
    }

    // -- per-frame updates --------------------------------------------------

    /// Upload media/audio data for this frame. Called once per tick before
    /// any pass renders.
    pub fn update_per_frame(
        &mut self,
        renderer: &mut dyn Renderer,
        platform: &mut Platform<'_>,
        time: f32,
    ) {
        let vflip = self.sampler.vflip;
        match &mut self.binding {
            InputBinding::Video(v) | InputBinding::Webcam(v) => {
                update_video(renderer, platform, v, time, vflip);
            }
            InputBinding::Mic(a) | InputBinding::Music(a) | InputBinding::MusicStream(a) => {
                update_audio(renderer, platform, a, time);
            }
            _ => {}
        }
    }

    // -- per-frame resolution ----------------------------------------------

    /// Current data for uniform binding. Feedback reads the store's
    /// committed side fresh; dangling references degrade to empty.
    pub fn resolve(
        &self,
        store: &FeedbackStore,
        platform: &Platform<'_>,
        time: f32,
    ) -> ResolvedInput {
        match &self.binding {
            InputBinding::Empty => ResolvedInput::EMPTY,
            InputBinding::Keyboard => match &platform.keyboard {
                Some(kb) => ResolvedInput {
                    texture: Some(kb.texture),
                    sampler: self.sampler,
                    resolution: [kb.resolution[0] as f32, kb.resolution[1] as f32, 1.0],
                    time,
                    loaded: true,
                },
                None => ResolvedInput {
                    loaded: true,
                    ..ResolvedInput::EMPTY
                },
            },
            InputBinding::Texture(t) | InputBinding::Volume(t) | InputBinding::Cubemap(t) => {
                ResolvedInput {
                    texture: t.texture,
                    sampler: self.sampler,
                    resolution: t.resolution,
                    time,
                    loaded: t.loaded,
                }
            }
            InputBinding::Video(v) | InputBinding::Webcam(v) => ResolvedInput {
                texture: v.texture,
                sampler: self.sampler,
                resolution: v.resolution,
                time: v
                    .element
                    .as_ref()
                    .map_or(time, |el| el.current_time() as f32),
                loaded: v.loaded,
            },
            InputBinding::Mic(a) | InputBinding::Music(a) | InputBinding::MusicStream(a) => {
                ResolvedInput {
                    texture: a.texture,
                    sampler: self.sampler,
                    resolution: [AUDIO_TEXTURE_WIDTH as f32, 2.0, 1.0],
                    time: a
                        .element
                        .as_ref()
                        .map_or(time, |el| el.current_time() as f32),
                    loaded: a.loaded,
                }
            }
            InputBinding::BufferFeedback(index) => match store.buffer(*index) {
                Some(db) => ResolvedInput {
                    texture: Some(db.read_texture()),
                    sampler: self.sampler,
                    resolution: [db.resolution()[0] as f32, db.resolution()[1] as f32, 1.0],
                    time,
                    loaded: true,
                },
                None => ResolvedInput::EMPTY, // dangling reference: empty, not an error
            },
            InputBinding::CubemapFeedback(_) => match store.cubemap() {
                Some(db) => ResolvedInput {
                    texture: Some(db.read_texture()),
                    sampler: self.sampler,
                    resolution: [db.resolution()[0] as f32, db.resolution()[1] as f32, 1.0],
                    time,
                    loaded: true,
                },
                None => ResolvedInput::EMPTY,
            },
        }
    }

    /// GPU handle suitable for UI thumbnails.
    pub fn preview_texture(
        &self,
        store: &FeedbackStore,
        platform: &Platform<'_>,
    ) -> Option<TextureId> {
        self.resolve(store, platform, 0.0).texture
    }

    // -- sampler + transport commands ---------------------------------------

    /// Returns false (and changes nothing) when the variant rejects the
    /// requested filter.
    pub fn set_filter(&mut self, filter: FilterMode) -> bool {
        let caps = self.kind().capabilities();
        let allowed = match filter {
            FilterMode::Nearest => true,
            FilterMode::Linear => caps.linear,
            FilterMode::Mipmap => caps.mipmap,
        };
        if allowed {
            self.sampler.filter = filter;
        }
        allowed
    }

    pub fn set_wrap(&mut self, wrap: WrapMode) -> bool {
        let allowed = wrap == WrapMode::Clamp || self.kind().capabilities().wrap_repeat;
        if allowed {
            self.sampler.wrap = wrap;
        }
        allowed
    }

    /// Takes effect at the next upload; already-resident texels keep their
    /// orientation until the asset reloads.
    pub fn set_vflip(&mut self, vflip: bool) -> bool {
        let allowed = !vflip || self.kind().capabilities().vflip;
        if allowed {
            self.sampler.vflip = vflip;
        }
        allowed
    }

    /// Idempotent; valid in any load state.
    pub fn set_paused(&mut self, paused: bool) {
        if let Some(el) = self.media_element_mut() {
            if paused {
                el.pause();
            } else {
                el.play();
            }
        }
    }

    pub fn set_muted(&mut self, muted: bool) {
        match &mut self.binding {
            InputBinding::Mic(a) | InputBinding::Music(a) | InputBinding::MusicStream(a) => {
                a.muted = muted;
                if let Some(el) = a.element.as_mut() {
                    el.set_muted(muted);
                }
            }
            InputBinding::Video(v) | InputBinding::Webcam(v) => {
                if let Some(el) = v.element.as_mut() {
                    el.set_muted(muted);
                }
            }
            _ => {}
        }
    }

    pub fn rewind(&mut self) {
        self.seek(0.0);
    }

    pub fn seek(&mut self, seconds: f64) {
        if let Some(el) = self.media_element_mut() {
            el.seek(seconds);
        }
    }

    fn media_element_mut(&mut self) -> Option<&mut dyn MediaElement> {
        match &mut self.binding {
            InputBinding::Video(v) | InputBinding::Webcam(v) => {
                v.element.as_deref_mut().map(|e| e as &mut dyn MediaElement)
            }
            InputBinding::Mic(a) | InputBinding::Music(a) | InputBinding::MusicStream(a) => {
                a.element.as_deref_mut().map(|e| e as &mut dyn MediaElement)
            }
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Variant construction + per-frame helpers
// ---------------------------------------------------------------------------

fn resolve_url(platform: &Platform<'_>, asset: &str) -> Result<String> {
    match platform.resolver {
        Some(r) => r.resolve(asset),
        None => Ok(asset.to_string()),
    }
}

fn open_media_with_retry(
    platform: &mut Platform<'_>,
    url: &str,
    audio: bool,
) -> Result<(Box<dyn MediaElement>, bool)> {
    let media = platform
        .media
        .as_mut()
        .context("no media provider available")?;
    let open = |m: &mut dyn MediaProvider, u: &str| {
        if audio { m.open_audio(u) } else { m.open_video(u) }
    };
    match open(&mut **media, url) {
        Ok(el) => Ok((el, false)),
        Err(first) => match alternate_extension(url) {
            Some(alt) => {
                eprintln!("[bind] '{url}' failed ({first:#}); retrying as '{alt}'");
                Ok((open(&mut **media, &alt)?, true))
            }
            None => Err(first),
        },
    }
}

fn new_audio_input(
    renderer: &mut dyn Renderer,
    element: Option<Box<dyn MediaElement>>,
    url: Option<String>,
    analyser: Option<Box<dyn Analyser>>,
    stream_title: Option<String>,
) -> Result<AudioInput> {
    let spec = TextureSpec::tex2d(AUDIO_TEXTURE_WIDTH as u32, 2, TextureFormat::R8);
    let texture = renderer.create_texture(&spec)?;
    Ok(AudioInput {
        element,
        url,
        retried: false,
        analyser,
        synth: SyntheticAnalyser,
        texture: Some(texture),
        loaded: false,
        muted: false,
        scratch: vec![0u8; AUDIO_TEXTURE_WIDTH * 2],
        stream_title,
    })
}

fn open_music(
    renderer: &mut dyn Renderer,
    platform: &mut Platform<'_>,
    url: String,
    stream_title: Option<String>,
) -> Result<AudioInput> {
    let mut element = match open_media_with_retry(platform, &url, true) {
        Ok((el, _)) => Some(el),
        Err(e) => {
            // The channel still synthesizes audio data; only the real
            // stream is lost.
            eprintln!("[bind] music '{url}' unavailable: {e:#}");
            None
        }
    };
    let analyser = match (&mut element, platform.audio.as_mut()) {
        (Some(el), Some(audio)) => audio.create_media_analyser(el.as_mut()),
        _ => None,
    };
    new_audio_input(renderer, element, Some(url), analyser, stream_title)
}

fn finish_upload(
    renderer: &mut dyn Renderer,
    t: &mut LoadingTexture,
    spec: &TextureSpec,
    data: &[u8],
    resolution: [f32; 3],
    mipmaps: bool,
) -> bool {
    let upload = |renderer: &mut dyn Renderer| -> Result<TextureId> {
        let id = renderer.create_texture(spec)?;
        renderer.update_texture(id, None, data)?;
        if mipmaps {
            renderer.create_mipmaps(id);
        }
        Ok(id)
    };
    match upload(renderer) {
        Ok(id) => {
            t.texture = Some(id);
            t.resolution = resolution;
            t.loaded = true;
            true
        }
        Err(e) => {
            eprintln!("[loader] upload failed: {e:#}");
            false
        }
    }
}

fn update_video(
    renderer: &mut dyn Renderer,
    platform: &mut Platform<'_>,
    v: &mut VideoInput,
    time: f32,
    vflip: bool,
) {
    if v.synthetic {
        upload_synthetic_video(renderer, v, time);
        return;
    }

    let element_failed = v.element.as_ref().is_some_and(|el| el.failed());
    if element_failed {
        if v.retried {
            return;
        }
        v.retried = true;
        let retry = v
            .url
            .as_deref()
            .and_then(alternate_extension)
            .and_then(|alt| platform.media.as_mut().and_then(|m| m.open_video(&alt).ok()));
        match retry {
            Some(new_el) => v.element = Some(new_el),
            None => {
                v.element = None;
                return;
            }
        }
    }

    let Some(el) = v.element.as_mut() else {
        return; // open failed for good: loaded stays false
    };
    if el.is_paused() || !el.ready() {
        return; // upload happens only while playing
    }
    let Some(frame) = el.take_frame() else {
        return;
    };

    let dims_changed =
        v.resolution[0] as u32 != frame.width || v.resolution[1] as u32 != frame.height;
    if dims_changed {
        if let Some(old) = v.texture.take() {
            renderer.destroy_texture(old);
        }
    }

    let mut pixels = frame.pixels;
    if vflip {
        flip_rows_in_place(&mut pixels, frame.width as usize * 4);
    }
    let texture = match v.texture {
        Some(id) => {
            if renderer.update_texture(id, None, &pixels).is_err() {
                return;
            }
            id
        }
        None => {
            let spec = TextureSpec::tex2d(frame.width, frame.height, TextureFormat::Rgba8);
            match renderer.create_texture(&spec) {
                Ok(id) => {
                    if renderer.update_texture(id, None, &pixels).is_err() {
                        renderer.destroy_texture(id);
                        return;
                    }
                    id
                }
                Err(e) => {
                    eprintln!("[media] frame upload failed: {e:#}");
                    return;
                }
            }
        }
    };
    v.texture = Some(texture);
    v.resolution = [frame.width as f32, frame.height as f32, 1.0];
    v.loaded = true;
}

fn flip_rows_in_place(pixels: &mut [u8], stride: usize) {
    if stride == 0 {
        return;
    }
    let rows = pixels.len() / stride;
    for y in 0..rows / 2 {
        let (head, tail) = pixels.split_at_mut((rows - 1 - y) * stride);
        head[y * stride..(y + 1) * stride].swap_with_slice(&mut tail[..stride]);
    }
}

const SYNTH_VIDEO_DIM: u32 = 64;

fn upload_synthetic_video(renderer: &mut dyn Renderer, v: &mut VideoInput, time: f32) {
    let n = SYNTH_VIDEO_DIM as usize;
    let mut pixels = vec![0u8; n * n * 4];
    for y in 0..n {
        for x in 0..n {
            let i = (y * n + x) * 4;
            let fx = x as f32 / n as f32;
            let fy = y as f32 / n as f32;
            pixels[i] = (255.0 * (0.5 + 0.5 * (time + fx * 6.0).sin())) as u8;
            pixels[i + 1] = (255.0 * (0.5 + 0.5 * (time * 0.7 + fy * 6.0).sin())) as u8;
            pixels[i + 2] = (255.0 * fx * fy) as u8;
            pixels[i + 3] = 255;
        }
    }
    let texture = match v.texture {
        Some(id) => id,
        None => {
            let spec = TextureSpec::tex2d(SYNTH_VIDEO_DIM, SYNTH_VIDEO_DIM, TextureFormat::Rgba8);
            match renderer.create_texture(&spec) {
                Ok(id) => id,
                Err(_) => return,
            }
        }
    };
    if renderer.update_texture(texture, None, &pixels).is_ok() {
        v.texture = Some(texture);
        v.resolution = [SYNTH_VIDEO_DIM as f32, SYNTH_VIDEO_DIM as f32, 1.0];
        v.loaded = true;
    }
}

fn update_audio(
    renderer: &mut dyn Renderer,
    platform: &mut Platform<'_>,
    a: &mut AudioInput,
    time: f32,
) {
    let element_failed = a.element.as_ref().is_some_and(|el| el.failed());
    if element_failed && !a.retried {
        a.retried = true;
        let retry = a
            .url
            .as_deref()
            .and_then(alternate_extension)
            .and_then(|alt| platform.media.as_mut().and_then(|m| m.open_audio(&alt).ok()));
        if let Some(mut new_el) = retry {
            a.analyser = platform
                .audio
                .as_mut()
                .and_then(|ctx| ctx.create_media_analyser(new_el.as_mut()));
            a.element = Some(new_el);
        }
    }

    let (freq, wave) = a.scratch.split_at_mut(AUDIO_TEXTURE_WIDTH);
    // Muted or contextless channels must keep producing data: shaders bound
    // to this slot stay visually stable on deterministic synthetic input.
    match (a.muted, a.analyser.as_mut()) {
        (false, Some(an)) => {
            an.fill_frequency(time, freq);
            an.fill_waveform(time, wave);
        }
        _ => {
            a.synth.fill_frequency(time, freq);
            a.synth.fill_waveform(time, wave);
        }
    }

    let Some(texture) = a.texture else { return };
    if renderer.update_texture(texture, None, &a.scratch).is_ok() {
        a.loaded = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_has_no_category_everything_else_does() {
        assert_eq!(InputKind::Empty.sampler_category(), None);
        assert_eq!(
            InputKind::Texture.sampler_category(),
            Some(SamplerCategory::Tex2d)
        );
        assert_eq!(
            InputKind::BufferFeedback.sampler_category(),
            Some(SamplerCategory::Tex2d)
        );
        assert_eq!(
            InputKind::CubemapFeedback.sampler_category(),
            Some(SamplerCategory::Cube)
        );
        assert_eq!(
            InputKind::Volume.sampler_category(),
            Some(SamplerCategory::Tex3d)
        );
    }

    #[test]
    fn video_and_texture_share_a_category() {
        // Swapping Video <-> Webcam <-> Texture must not recompile.
        let cats: Vec<_> = [InputKind::Video, InputKind::Webcam, InputKind::Texture]
            .iter()
            .map(|k| k.sampler_category())
            .collect();
        assert!(cats.windows(2).all(|w| w[0] == w[1]));
    }

    #[test]
    fn capability_table_gates_sampler_clamp() {
        let want = SamplerConfig {
            filter: FilterMode::Mipmap,
            wrap: WrapMode::Repeat,
            vflip: true,
        };
        let tex = clamp_sampler(want, InputKind::Texture.capabilities());
        assert_eq!(tex, want);

        let video = clamp_sampler(want, InputKind::Video.capabilities());
        assert_eq!(video.filter, FilterMode::Linear); // mipmap falls to linear
        assert_eq!(video.wrap, WrapMode::Clamp);
        assert!(video.vflip);

        let keyboard = clamp_sampler(want, InputKind::Keyboard.capabilities());
        assert_eq!(keyboard.filter, FilterMode::Nearest);
        assert_eq!(keyboard.wrap, WrapMode::Clamp);
        assert!(!keyboard.vflip);
    }

    #[test]
    fn kind_codes_are_distinct() {
        let kinds = [
            InputKind::Empty,
            InputKind::Texture,
            InputKind::Volume,
            InputKind::Cubemap,
            InputKind::Video,
            InputKind::Webcam,
            InputKind::Mic,
            InputKind::Music,
            InputKind::MusicStream,
            InputKind::Keyboard,
            InputKind::BufferFeedback,
            InputKind::CubemapFeedback,
        ];
        let mut codes: Vec<u8> = kinds.iter().map(|k| k.code()).collect();
        codes.sort_unstable();
        codes.dedup();
        assert_eq!(codes.len(), kinds.len());
    }

    #[test]
    fn flip_rows_reverses_row_order() {
        // 2x3 image, stride 2.
        let mut px = vec![1, 1, 2, 2, 3, 3];
        flip_rows_in_place(&mut px, 2);
        assert_eq!(px, vec![3, 3, 2, 2, 1, 1]);
    }
}
