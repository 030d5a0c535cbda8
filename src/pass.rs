//! Pass: the unit of compilation and execution.
//!
//! A pass owns its header, its compiled program, up to four input channels
//! and up to four output bindings. Recompilation is atomic from the
//! scheduler's point of view: the old program stays bound and usable until
//! a replacement compiles successfully, and compile errors only update the
//! error state.

use std::fmt;
use std::time::Instant;

use crate::channel::{Channel, ResolvedInput};
use crate::gfx::{ProgramId, Renderer};
use crate::header::{ApiLevel, Header, PassKind, SamplerCategory, synthesize};
use crate::validation::remap_error_log;

pub const CHANNEL_COUNT: usize = 4;

/// Pass identity: flavor plus slot index (Buffer A..D are indices 0..3;
/// singleton flavors use index 0).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PassId {
    pub kind: PassKind,
    pub index: u8,
}

impl fmt::Display for PassId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            PassKind::Buffer => write!(f, "Buffer {}", (b'A' + self.index) as char),
            kind => write!(f, "{kind}"),
        }
    }
}

/// Where a pass's color output lands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputBinding {
    Buffer(usize),
    Cubemap(usize),
}

/// Result of one compile attempt, forwarded to the host's compile callback.
#[derive(Debug, Clone)]
pub struct CompileOutcome {
    pub pass: PassId,
    pub success: bool,
    /// Backend error log with line numbers remapped to user source.
    pub error: Option<String>,
    pub compile_time_ms: f64,
}

/// Global uniform values for one tick.
#[derive(Debug, Clone, Copy, Default)]
pub struct FrameUniforms {
    pub resolution: [f32; 3],
    pub time: f32,
    pub time_delta: f32,
    pub frame_rate: f32,
    pub mouse: [f32; 4],
    pub date: [f32; 4],
    pub sample_rate: f32,
}

pub struct Pass {
    id: PassId,
    name: String,
    source: String,
    header: Header,
    header_stale: bool,
    /// Lines the user's code is offset by in the full fragment (prelude +
    /// common fragment).
    user_line_offset: u32,
    program: Option<ProgramId>,
    pub last_error: Option<String>,
    pub last_compile_ms: f64,
    frame: i32,
    channels: [Channel; CHANNEL_COUNT],
    outputs: [Option<OutputBinding>; CHANNEL_COUNT],
}

impl Pass {
    pub fn new(id: PassId, name: impl Into<String>, api: ApiLevel) -> Self {
        Self {
            id,
            name: name.into(),
            source: String::new(),
            header: synthesize(id.kind, api, [SamplerCategory::Tex2d; CHANNEL_COUNT]),
            header_stale: false,
            user_line_offset: 0,
            program: None,
            last_error: None,
            last_compile_ms: 0.0,
            frame: 0,
            channels: std::array::from_fn(Channel::new),
            outputs: [None; CHANNEL_COUNT],
        }
    }

    pub fn id(&self) -> PassId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn set_source(&mut self, source: impl Into<String>) {
        self.source = source.into();
    }

    pub fn program(&self) -> Option<ProgramId> {
        self.program
    }

    pub fn frame(&self) -> i32 {
        self.frame
    }

    pub fn advance_frame(&mut self) {
        self.frame += 1;
    }

    pub fn channel(&self, slot: usize) -> &Channel {
        &self.channels[slot]
    }

    pub fn channel_mut(&mut self, slot: usize) -> &mut Channel {
        &mut self.channels[slot]
    }

    pub fn channels(&self) -> &[Channel; CHANNEL_COUNT] {
        &self.channels
    }

    pub fn output(&self, slot: usize) -> Option<OutputBinding> {
        self.outputs[slot]
    }

    pub fn set_output(&mut self, slot: usize, binding: OutputBinding) {
        self.outputs[slot] = Some(binding);
    }

    pub fn outputs(&self) -> &[Option<OutputBinding>; CHANNEL_COUNT] {
        &self.outputs
    }

    /// Number of synthesized lines ahead of user code, for mapping compiler
    /// errors back to the editor.
    pub fn user_line_offset(&self) -> u32 {
        self.user_line_offset
    }

    pub fn categories(&self) -> [SamplerCategory; CHANNEL_COUNT] {
        std::array::from_fn(|i| self.channels[i].header_category())
    }

    /// Invalidate the header after a cross-category rebind; the next
    /// compile regenerates it. Headers must always match the bound
    /// categories, so a stale header blocks compilation until regenerated.
    pub fn mark_header_stale(&mut self) {
        self.header_stale = true;
    }

    pub fn header(&self) -> &Header {
        &self.header
    }

    /// Compile the pass against the current header, common fragment, and
    /// user source. On success the old program is destroyed and replaced;
    /// on failure the previous program (if any) stays live and only the
    /// error state changes.
    pub fn compile(
        &mut self,
        renderer: &mut dyn Renderer,
        api: ApiLevel,
        common_source: &str,
    ) -> CompileOutcome {
        if self.header_stale {
            self.header = synthesize(self.id.kind, api, self.categories());
            self.header_stale = false;
        }

        // The common fragment is prepended to every pass except Common
        // itself, where it *is* the user source.
        let common = if self.id.kind == PassKind::Common {
            ""
        } else {
            common_source
        };
        let mut fragment =
            String::with_capacity(self.header.prelude.len() + common.len() + self.source.len() + 2);
        fragment.push_str(&self.header.prelude);
        if !common.is_empty() {
            fragment.push_str(common);
            if !common.ends_with('\n') {
                fragment.push('\n');
            }
        }
        fragment.push_str(&self.source);

        let offset = self.header.line_count
            + if common.is_empty() {
                0
            } else {
                common.lines().count() as u32
            };

        let started = Instant::now();
        let result = renderer.create_shader(&self.header.vertex_src, &fragment);
        let compile_time_ms = started.elapsed().as_secs_f64() * 1e3;
        self.last_compile_ms = compile_time_ms;
        self.user_line_offset = offset;

        match result {
            Ok(new_program) => {
                if let Some(old) = self.program.take() {
                    renderer.destroy_program(old);
                }
                self.program = Some(new_program);
                self.last_error = None;
                CompileOutcome {
                    pass: self.id,
                    success: true,
                    error: None,
                    compile_time_ms,
                }
            }
            Err(log) => {
                let remapped = remap_error_log(&log, offset);
                eprintln!("[compile] {} failed: {remapped}", self.id);
                self.last_error = Some(remapped.clone());
                CompileOutcome {
                    pass: self.id,
                    success: false,
                    error: Some(remapped),
                    compile_time_ms,
                }
            }
        }
    }

    /// Upload the shared uniform contract plus per-channel samplers and
    /// channel structs. Sound passes only carry the reduced set their
    /// header declares.
    pub fn bind_frame_uniforms(
        &self,
        renderer: &mut dyn Renderer,
        u: &FrameUniforms,
        resolved: &[ResolvedInput; CHANNEL_COUNT],
    ) {
        let Some(p) = self.program else {
            return;
        };

        let channel_time: Vec<f32> = resolved.iter().map(|r| r.time).collect();
        let channel_res: Vec<[f32; 3]> = resolved.iter().map(|r| r.resolution).collect();

        renderer.set_uniform_vec4(p, "iDate", u.date);
        renderer.set_uniform_f32(p, "iSampleRate", u.sample_rate);
        renderer.set_uniform_f32_array(p, "iChannelTime", &channel_time);
        renderer.set_uniform_vec3_array(p, "iChannelResolution", &channel_res);

        if self.id.kind != PassKind::Sound {
            renderer.set_uniform_vec3(p, "iResolution", u.resolution);
            renderer.set_uniform_f32(p, "iTime", u.time);
            renderer.set_uniform_f32(p, "iTimeDelta", u.time_delta);
            renderer.set_uniform_f32(p, "iFrameRate", u.frame_rate);
            renderer.set_uniform_i32(p, "iFrame", self.frame);
            renderer.set_uniform_vec4(p, "iMouse", u.mouse);
        }

        for (i, r) in resolved.iter().enumerate() {
            renderer.set_uniform_sampler(p, &format!("iChannel{i}"), i as u32);
            if self.id.kind != PassKind::Sound {
                renderer.set_uniform_sampler(p, &format!("iCh{i}.sampler"), i as u32);
                renderer.set_uniform_vec3(p, &format!("iCh{i}.size"), r.resolution);
                renderer.set_uniform_f32(p, &format!("iCh{i}.time"), r.time);
                renderer.set_uniform_i32(p, &format!("iCh{i}.loaded"), r.loaded as i32);
            }
        }
    }

    /// Tear down everything the pass owns.
    pub fn destroy(&mut self, renderer: &mut dyn Renderer) {
        for ch in &mut self.channels {
            ch.teardown(renderer);
        }
        if let Some(p) = self.program.take() {
            renderer.destroy_program(p);
        }
    }
}
