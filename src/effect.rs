//! The effect: pass set, feedback store, and the per-frame scheduler.
//!
//! One `Effect` owns every pass of one shader program set, the double
//! buffers their outputs render into, and the loader that feeds their
//! channels. `tick` runs the whole set once, in fixed order: loader
//! completions, media uploads, double-buffer upkeep, Buffers in slot
//! order, the Cubemap pass face by face, then the Image pass into the
//! presentation target. Sound renders off-cadence through
//! [`Effect::render_sound`].

use std::sync::Arc;

use anyhow::{Result, bail};

use crate::assets::{AssetFetcher, AssetResolver};
use crate::audio::AudioContext;
use crate::channel::{BindReport, InputDescriptor, ResolvedInput};
use crate::doublebuf::{BUFFER_SLOT_COUNT, FeedbackStore};
use crate::gfx::{CubeFace, FilterMode, Renderer, TextureId, UnitBinding, WrapMode};
use crate::header::{ApiLevel, PassKind};
use crate::loader::Loader;
use crate::media::MediaProvider;
use crate::pass::{CHANNEL_COUNT, CompileOutcome, FrameUniforms, OutputBinding, Pass, PassId};
use crate::sound::{self, SoundBuffer};

/// Fixed face size for cubemap pass outputs.
pub const CUBEMAP_FACE_SIZE: u32 = 1024;

/// Keyboard state texture, owned by the host and shared across effects.
#[derive(Debug, Clone, Copy)]
pub struct SharedKeyboard {
    pub texture: TextureId,
    pub resolution: [u32; 2],
}

/// Host-supplied collaborators, passed by reference into binds and ticks.
/// Everything is optional; missing pieces degrade to synthetic or unloaded
/// channels, never to errors.
#[derive(Default)]
pub struct Platform<'a> {
    pub audio: Option<&'a mut dyn AudioContext>,
    pub media: Option<&'a mut dyn MediaProvider>,
    pub resolver: Option<&'a dyn AssetResolver>,
    pub keyboard: Option<SharedKeyboard>,
}

/// Per-tick inputs from the host loop.
#[derive(Debug, Clone, Copy, Default)]
pub struct FrameInput {
    pub time: f32,
    pub time_delta: f32,
    pub frame_rate: f32,
    /// xy = current drag position, zw = click position (sign encodes state).
    pub mouse: [f32; 4],
    /// year, month, day, seconds-of-day.
    pub date: [f32; 4],
}

/// Snapshot handed to the per-channel UI callback once per tick.
#[derive(Debug, Clone, Copy)]
pub struct ChannelUpdate {
    pub pass: PassId,
    pub slot: usize,
    pub kind_code: u8,
    pub is_static: bool,
    pub loaded: bool,
    pub time: f32,
    pub preview: Option<TextureId>,
}

type ChannelUpdateFn = Box<dyn FnMut(&ChannelUpdate)>;
type CompileResultFn = Box<dyn FnMut(&CompileOutcome)>;

pub struct Effect {
    api: ApiLevel,
    resolution: [u32; 2],
    /// All passes in scheduler order: Common, Buffers A..D, Cubemap,
    /// Image, Sound.
    passes: Vec<Pass>,
    store: FeedbackStore,
    loader: Loader,
    sound_dirty: bool,
    /// Date of the most recent tick, reused by off-cadence sound renders.
    last_date: [f32; 4],
    on_channel_update: Option<ChannelUpdateFn>,
    on_compile_result: Option<CompileResultFn>,
}

impl std::fmt::Debug for Effect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Effect")
            .field("api", &self.api)
            .field("resolution", &self.resolution)
            .field("pass_count", &self.passes.len())
            .field("store", &self.store)
            .field("sound_dirty", &self.sound_dirty)
            .field("last_date", &self.last_date)
            .finish_non_exhaustive()
    }
}

fn order_key(id: PassId) -> u32 {
    let kind = match id.kind {
        PassKind::Common => 0,
        PassKind::Buffer => 1,
        PassKind::Cubemap => 2,
        PassKind::Image => 3,
        PassKind::Sound => 4,
    };
    kind * BUFFER_SLOT_COUNT as u32 + id.index as u32
}

impl Effect {
    pub fn new(api: ApiLevel, resolution: [u32; 2], fetcher: Arc<dyn AssetFetcher>) -> Self {
        let common = Pass::new(
            PassId {
                kind: PassKind::Common,
                index: 0,
            },
            "Common",
            api,
        );
        let image = Pass::new(
            PassId {
                kind: PassKind::Image,
                index: 0,
            },
            "Image",
            api,
        );
        Self {
            api,
            resolution,
            passes: vec![common, image],
            store: FeedbackStore::default(),
            loader: Loader::new(fetcher),
            sound_dirty: false,
            last_date: [0.0; 4],
            on_channel_update: None,
            on_compile_result: None,
        }
    }

    pub fn api(&self) -> ApiLevel {
        self.api
    }

    pub fn resolution(&self) -> [u32; 2] {
        self.resolution
    }

    pub fn store(&self) -> &FeedbackStore {
        &self.store
    }

    pub fn set_on_channel_update(&mut self, f: impl FnMut(&ChannelUpdate) + 'static) {
        self.on_channel_update = Some(Box::new(f));
    }

    pub fn set_on_compile_result(&mut self, f: impl FnMut(&CompileOutcome) + 'static) {
        self.on_compile_result = Some(Box::new(f));
    }

    // -- pass management ----------------------------------------------------

    pub fn pass(&self, id: PassId) -> Option<&Pass> {
        self.passes.iter().find(|p| p.id() == id)
    }

    pub fn pass_mut(&mut self, id: PassId) -> Option<&mut Pass> {
        self.passes.iter_mut().find(|p| p.id() == id)
    }

    pub fn pass_ids(&self) -> Vec<PassId> {
        self.passes.iter().map(|p| p.id()).collect()
    }

    fn insert_pass(&mut self, pass: Pass) -> PassId {
        let id = pass.id();
        let at = self
            .passes
            .partition_point(|p| order_key(p.id()) <= order_key(id));
        self.passes.insert(at, pass);
        id
    }

    /// Add a Buffer pass. Its output lands in the double buffer of the
    /// same index unless reassigned.
    pub fn add_buffer(
        &mut self,
        index: usize,
        name: impl Into<String>,
        source: impl Into<String>,
    ) -> Result<PassId> {
        if index >= BUFFER_SLOT_COUNT {
            bail!("buffer index {index} out of range");
        }
        let id = PassId {
            kind: PassKind::Buffer,
            index: index as u8,
        };
        if self.pass(id).is_some() {
            bail!("{id} already exists");
        }
        let mut pass = Pass::new(id, name, self.api);
        pass.set_source(source);
        pass.set_output(0, OutputBinding::Buffer(index));
        Ok(self.insert_pass(pass))
    }

    pub fn add_cubemap(
        &mut self,
        name: impl Into<String>,
        source: impl Into<String>,
    ) -> Result<PassId> {
        let id = PassId {
            kind: PassKind::Cubemap,
            index: 0,
        };
        if self.pass(id).is_some() {
            bail!("{id} already exists");
        }
        let mut pass = Pass::new(id, name, self.api);
        pass.set_source(source);
        pass.set_output(0, OutputBinding::Cubemap(0));
        Ok(self.insert_pass(pass))
    }

    pub fn add_sound(
        &mut self,
        name: impl Into<String>,
        source: impl Into<String>,
    ) -> Result<PassId> {
        let id = PassId {
            kind: PassKind::Sound,
            index: 0,
        };
        if self.pass(id).is_some() {
            bail!("{id} already exists");
        }
        let mut pass = Pass::new(id, name, self.api);
        pass.set_source(source);
        Ok(self.insert_pass(pass))
    }

    pub fn image_id(&self) -> PassId {
        PassId {
            kind: PassKind::Image,
            index: 0,
        }
    }

    pub fn common_id(&self) -> PassId {
        PassId {
            kind: PassKind::Common,
            index: 0,
        }
    }

    pub fn set_source(&mut self, id: PassId, source: impl Into<String>) -> Result<()> {
        match self.pass_mut(id) {
            Some(p) => {
                p.set_source(source);
                Ok(())
            }
            None => bail!("no such pass: {id}"),
        }
    }

    pub fn set_image_source(&mut self, source: impl Into<String>) {
        let id = self.image_id();
        // The image pass always exists.
        if let Some(p) = self.pass_mut(id) {
            p.set_source(source);
        }
    }

    /// The common fragment is prepended to every other pass at compile
    /// time; callers should recompile all passes after changing it.
    pub fn set_common_source(&mut self, source: impl Into<String>) {
        let id = self.common_id();
        if let Some(p) = self.pass_mut(id) {
            p.set_source(source);
        }
    }

    fn common_source(&self) -> String {
        self.pass(self.common_id())
            .map(|p| p.source().to_string())
            .unwrap_or_default()
    }

    /// Reassign where a pass's color output lands.
    pub fn assign_output(
        &mut self,
        renderer: &mut dyn Renderer,
        id: PassId,
        slot: usize,
        binding: OutputBinding,
    ) -> Result<()> {
        if slot >= CHANNEL_COUNT {
            bail!("output slot {slot} out of range");
        }
        // The double buffer comes to life on first assignment.
        match binding {
            OutputBinding::Buffer(i) => {
                let res = self.resolution;
                self.store.ensure_buffer(renderer, i, res)?;
            }
            OutputBinding::Cubemap(_) => {
                self.store.ensure_cubemap(renderer, CUBEMAP_FACE_SIZE)?;
            }
        }
        match self.pass_mut(id) {
            Some(p) => {
                p.set_output(slot, binding);
                Ok(())
            }
            None => bail!("no such pass: {id}"),
        }
    }

    // -- compilation ---------------------------------------------------------

    /// Compile one pass. Regenerates a stale header first; on failure the
    /// pass keeps its previous program and the outcome carries the
    /// remapped error log.
    pub fn compile_pass(&mut self, renderer: &mut dyn Renderer, id: PassId) -> Result<CompileOutcome> {
        let common = self.common_source();
        let api = self.api;
        let Some(pass) = self.pass_mut(id) else {
            bail!("no such pass: {id}");
        };
        let outcome = pass.compile(renderer, api, &common);
        if id.kind == PassKind::Sound && outcome.success {
            self.sound_dirty = true;
        }
        if let Some(cb) = self.on_compile_result.as_mut() {
            cb(&outcome);
        }
        Ok(outcome)
    }

    /// Compile every pass in scheduler order.
    pub fn compile_all(&mut self, renderer: &mut dyn Renderer) -> Vec<CompileOutcome> {
        let common = self.common_source();
        let api = self.api;
        let mut outcomes = Vec::with_capacity(self.passes.len());
        for pass in &mut self.passes {
            let outcome = pass.compile(renderer, api, &common);
            if pass.id().kind == PassKind::Sound && outcome.success {
                self.sound_dirty = true;
            }
            outcomes.push(outcome);
        }
        if let Some(cb) = self.on_compile_result.as_mut() {
            for outcome in &outcomes {
                cb(outcome);
            }
        }
        outcomes
    }

    // -- input binding -------------------------------------------------------

    /// Bind a channel to a new producer. When the sampler category changes
    /// the pass header is regenerated and the pass recompiled immediately;
    /// a failed recompile keeps the old program live (stale output beats a
    /// dead frame).
    pub fn bind_input(
        &mut self,
        renderer: &mut dyn Renderer,
        platform: &mut Platform<'_>,
        id: PassId,
        slot: usize,
        descriptor: InputDescriptor,
    ) -> Result<BindReport> {
        if slot >= CHANNEL_COUNT {
            bail!("channel slot {slot} out of range");
        }
        let Self { passes, loader, .. } = self;
        let Some(pass) = passes.iter_mut().find(|p| p.id() == id) else {
            bail!("no such pass: {id}");
        };
        let report = pass
            .channel_mut(slot)
            .bind(renderer, loader, platform, id, descriptor);

        if report.needs_recompile {
            pass.mark_header_stale();
            // Only recompile a pass that was compiled before; fresh passes
            // compile through compile_all once sources are in place.
            if pass.program().is_some() {
                self.compile_pass(renderer, id)?;
            }
        }
        if id.kind == PassKind::Sound {
            self.sound_dirty = true;
        }
        Ok(report)
    }

    // -- transport + sampler commands ---------------------------------------

    pub fn set_input_paused(&mut self, id: PassId, slot: usize, paused: bool) {
        if let Some(p) = self.pass_mut(id) {
            p.channel_mut(slot).set_paused(paused);
        }
    }

    pub fn set_input_muted(&mut self, id: PassId, slot: usize, muted: bool) {
        if let Some(p) = self.pass_mut(id) {
            p.channel_mut(slot).set_muted(muted);
        }
    }

    pub fn rewind_input(&mut self, id: PassId, slot: usize) {
        if let Some(p) = self.pass_mut(id) {
            p.channel_mut(slot).rewind();
        }
    }

    pub fn seek_input(&mut self, id: PassId, slot: usize, seconds: f64) {
        if let Some(p) = self.pass_mut(id) {
            p.channel_mut(slot).seek(seconds);
        }
    }

    pub fn set_input_filter(&mut self, id: PassId, slot: usize, filter: FilterMode) -> bool {
        self.pass_mut(id)
            .is_some_and(|p| p.channel_mut(slot).set_filter(filter))
    }

    pub fn set_input_wrap(&mut self, id: PassId, slot: usize, wrap: WrapMode) -> bool {
        self.pass_mut(id)
            .is_some_and(|p| p.channel_mut(slot).set_wrap(wrap))
    }

    pub fn set_input_vflip(&mut self, id: PassId, slot: usize, vflip: bool) -> bool {
        self.pass_mut(id)
            .is_some_and(|p| p.channel_mut(slot).set_vflip(vflip))
    }

    // -- the frame scheduler -------------------------------------------------

    /// Run one output frame. Must be called once per host tick; all I/O
    /// completions observed here happened strictly before any draw below.
    pub fn tick(
        &mut self,
        renderer: &mut dyn Renderer,
        platform: &mut Platform<'_>,
        input: &FrameInput,
    ) -> Result<()> {
        let time = input.time;
        self.last_date = input.date;

        // 1) Apply async load completions. Unloaded channels simply stay
        //    zero-filled; the tick never waits.
        for c in self.loader.poll() {
            if let Some(pass) = self.passes.iter_mut().find(|p| p.id() == c.pass) {
                pass.channel_mut(c.slot)
                    .apply_load(renderer, c.generation, c.result);
            }
        }

        // 2) Per-frame media/audio uploads.
        for pass in &mut self.passes {
            for slot in 0..CHANNEL_COUNT {
                pass.channel_mut(slot)
                    .update_per_frame(renderer, platform, time);
            }
        }

        // 3) Create missing double buffers and resize stale ones.
        let res = self.resolution;
        let mut needed: Vec<usize> = Vec::new();
        let mut need_cube = false;
        for pass in &self.passes {
            match pass.id().kind {
                PassKind::Buffer => {
                    for out in pass.outputs().iter().flatten() {
                        if let OutputBinding::Buffer(i) = out {
                            needed.push(*i);
                        }
                    }
                }
                PassKind::Cubemap => need_cube = true,
                _ => {}
            }
        }
        for i in needed {
            let db = self.store.ensure_buffer(renderer, i, res)?;
            db.resize(renderer, res)?;
        }
        if need_cube {
            self.store.ensure_cubemap(renderer, CUBEMAP_FACE_SIZE)?;
        }

        // Which outputs need mipmaps after rendering: any consumer binding
        // them as feedback with a mipmap filter.
        let mut mip_buffers = [false; BUFFER_SLOT_COUNT];
        let mut mip_cube = false;
        for pass in &self.passes {
            for ch in pass.channels() {
                if ch.sampler().filter != FilterMode::Mipmap {
                    continue;
                }
                if let Some(i) = ch.buffer_feedback_index() {
                    mip_buffers[i] = true;
                }
                if ch.is_cubemap_feedback() {
                    mip_cube = true;
                }
            }
        }

        let sample_rate = platform
            .audio
            .as_ref()
            .map_or(44_100.0, |a| a.sample_rate());
        let base_uniforms = FrameUniforms {
            resolution: [res[0] as f32, res[1] as f32, 1.0],
            time,
            time_delta: input.time_delta,
            frame_rate: input.frame_rate,
            mouse: input.mouse,
            date: input.date,
            sample_rate,
        };

        let Self {
            passes,
            store,
            on_channel_update,
            ..
        } = self;

        // 4) Buffer passes in slot order. Each reads feedback from the
        //    committed side and flips only after its own draw lands.
        for pass in passes
            .iter_mut()
            .filter(|p| p.id().kind == PassKind::Buffer)
        {
            let Some(OutputBinding::Buffer(out)) = pass.output(0) else {
                continue;
            };
            let Some(program) = pass.program() else {
                continue; // compile error: stale output, not a dead frame
            };
            let Some(db) = store.buffer(out) else {
                continue;
            };
            let buf_res = db.resolution();
            let target = db.write_target();
            let write_tex = db.write_texture();

            let resolved = gather(pass, store, platform, time);
            let uniforms = FrameUniforms {
                resolution: [buf_res[0] as f32, buf_res[1] as f32, 1.0],
                ..base_uniforms
            };
            renderer.use_program(program);
            pass.bind_frame_uniforms(renderer, &uniforms, &resolved);
            renderer.attach_textures(to_units(&resolved));
            renderer.set_render_target(Some(target));
            renderer.set_viewport(0, 0, buf_res[0], buf_res[1]);
            renderer.draw_fullscreen_triangle()?;
            if mip_buffers[out] {
                renderer.create_mipmaps(write_tex);
            }
            if let Some(db) = store.buffer_mut(out) {
                db.flip();
            }
            pass.advance_frame();
        }

        // 5) Cubemap pass: six draws, one frustum per face, then one flip.
        if let Some(pass) = passes
            .iter_mut()
            .find(|p| p.id().kind == PassKind::Cubemap)
        {
            if let (Some(program), Some(db)) = (pass.program(), store.cubemap()) {
                let size = db.resolution()[0];
                let target = db.write_target();
                let write_tex = db.write_texture();

                let resolved = gather(pass, store, platform, time);
                let uniforms = FrameUniforms {
                    resolution: [size as f32, size as f32, 1.0],
                    ..base_uniforms
                };
                renderer.use_program(program);
                pass.bind_frame_uniforms(renderer, &uniforms, &resolved);
                renderer.attach_textures(to_units(&resolved));
                for face in CubeFace::ALL {
                    renderer.set_render_target_cube_face(target, face);
                    renderer.set_viewport(0, 0, size, size);
                    renderer.set_uniform_vec4(
                        program,
                        "unViewport",
                        [0.0, 0.0, size as f32, size as f32],
                    );
                    renderer.set_uniform_vec3_array(
                        program,
                        "unCorners",
                        &cube_face_corners(face),
                    );
                    renderer.draw_fullscreen_triangle()?;
                }
                if mip_cube {
                    renderer.create_mipmaps(write_tex);
                }
                if let Some(db) = store.cubemap_mut() {
                    db.flip();
                }
                pass.advance_frame();
            }
        }

        // 6) Image pass into the presentation target.
        if let Some(pass) = passes.iter_mut().find(|p| p.id().kind == PassKind::Image) {
            if let Some(program) = pass.program() {
                let resolved = gather(pass, store, platform, time);
                renderer.use_program(program);
                pass.bind_frame_uniforms(renderer, &base_uniforms, &resolved);
                renderer.attach_textures(to_units(&resolved));
                renderer.set_render_target(None);
                renderer.set_viewport(0, 0, res[0], res[1]);
                renderer.draw_fullscreen_triangle()?;
                pass.advance_frame();
            }
        }

        // 7) Per-channel UI notifications.
        if let Some(cb) = on_channel_update.as_mut() {
            for pass in passes.iter() {
                for slot in 0..CHANNEL_COUNT {
                    let ch = pass.channel(slot);
                    let r = ch.resolve(store, platform, time);
                    cb(&ChannelUpdate {
                        pass: pass.id(),
                        slot,
                        kind_code: ch.kind().code(),
                        is_static: ch.kind().is_static(),
                        loaded: r.loaded,
                        time: r.time,
                        preview: r.texture,
                    });
                }
            }
        }

        Ok(())
    }

    // -- sound ---------------------------------------------------------------

    /// True when the sound pass changed since it last rendered.
    pub fn sound_pending(&self) -> bool {
        self.sound_dirty
            && self
                .passes
                .iter()
                .any(|p| p.id().kind == PassKind::Sound && p.program().is_some())
    }

    /// Re-arm the offline sound render (e.g. after a rewind).
    pub fn request_sound_render(&mut self) {
        self.sound_dirty = true;
    }

    /// Render the sound pass offline if it is pending and all of its static
    /// inputs finished loading. Returns `Ok(None)` when there is nothing to
    /// do yet; the attempt is retried on a later call.
    pub fn render_sound(
        &mut self,
        renderer: &mut dyn Renderer,
        platform: &mut Platform<'_>,
        duration_secs: f32,
        sample_rate: f32,
    ) -> Result<Option<SoundBuffer>> {
        if !self.sound_pending() {
            return Ok(None);
        }
        let date = self.last_date;
        let Self { passes, store, .. } = self;
        let Some(pass) = passes.iter_mut().find(|p| p.id().kind == PassKind::Sound) else {
            return Ok(None);
        };

        // Sound rendering must never start mid-decode of a dependency.
        for ch in pass.channels() {
            let waiting = matches!(
                ch.kind(),
                crate::channel::InputKind::Texture
                    | crate::channel::InputKind::Volume
                    | crate::channel::InputKind::Cubemap
            );
            if waiting && !ch.resolve(store, platform, 0.0).loaded {
                return Ok(None);
            }
        }

        let resolved = gather(pass, store, platform, 0.0);
        let buffer =
            sound::render_offline(renderer, pass, &resolved, duration_secs, sample_rate, date)?;
        self.sound_dirty = false;
        Ok(Some(buffer))
    }

    // -- lifecycle -----------------------------------------------------------

    pub fn resize(&mut self, resolution: [u32; 2]) {
        // Double buffers pick the new size up on the next tick.
        self.resolution = resolution;
    }

    /// Release every GPU resource the effect owns.
    pub fn destroy(&mut self, renderer: &mut dyn Renderer) {
        for pass in &mut self.passes {
            pass.destroy(renderer);
        }
        self.store.destroy_all(renderer);
    }
}

fn gather(
    pass: &Pass,
    store: &FeedbackStore,
    platform: &Platform<'_>,
    time: f32,
) -> [ResolvedInput; CHANNEL_COUNT] {
    std::array::from_fn(|i| pass.channel(i).resolve(store, platform, time))
}

fn to_units(resolved: &[ResolvedInput; CHANNEL_COUNT]) -> [UnitBinding; CHANNEL_COUNT] {
    std::array::from_fn(|i| resolved[i].texture.map(|t| (t, resolved[i].sampler)))
}

/// Ray-direction corners (bl, br, tr, tl) for each cube face, GL face
/// order, plus the shared origin as the fifth entry.
fn cube_face_corners(face: CubeFace) -> [[f32; 3]; 5] {
    const CORNERS: [[[f32; 3]; 4]; 6] = [
        // +x
        [
            [1.0, -1.0, 1.0],
            [1.0, -1.0, -1.0],
            [1.0, 1.0, -1.0],
            [1.0, 1.0, 1.0],
        ],
        // -x
        [
            [-1.0, -1.0, -1.0],
            [-1.0, -1.0, 1.0],
            [-1.0, 1.0, 1.0],
            [-1.0, 1.0, -1.0],
        ],
        // +y
        [
            [-1.0, 1.0, -1.0],
            [1.0, 1.0, -1.0],
            [1.0, 1.0, 1.0],
            [-1.0, 1.0, 1.0],
        ],
        // -y
        [
            [-1.0, -1.0, 1.0],
            [1.0, -1.0, 1.0],
            [1.0, -1.0, -1.0],
            [-1.0, -1.0, -1.0],
        ],
        // +z
        [
            [-1.0, -1.0, 1.0],
            [1.0, -1.0, 1.0],
            [1.0, 1.0, 1.0],
            [-1.0, 1.0, 1.0],
        ],
        // -z
        [
            [1.0, -1.0, -1.0],
            [-1.0, -1.0, -1.0],
            [-1.0, 1.0, -1.0],
            [1.0, 1.0, -1.0],
        ],
    ];
    let c = CORNERS[face.index()];
    [c[0], c[1], c[2], c[3], [0.0, 0.0, 0.0]]
}
