//! Renderer facade.
//!
//! Everything the engine needs from a graphics API goes through the
//! [`Renderer`] trait: texture/program/render-target primitives, uniform
//! uploads, draw calls and readback. Backends implement it; the engine never
//! touches a device directly. [`trace::TraceRenderer`] is the in-memory
//! implementation used by the test suites.

use anyhow::Result;

pub mod trace;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProgramId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TargetId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextureKind {
    Tex2d,
    Tex3d,
    Cube,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextureFormat {
    Rgba8,
    R8,
    Rgba16f,
}

/// Texel filtering requested by a channel. `Nearest` is the engine default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FilterMode {
    #[default]
    Nearest,
    Linear,
    Mipmap,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WrapMode {
    #[default]
    Clamp,
    Repeat,
}

/// Per-channel sampler state. `vflip` applies at upload time, not sampling
/// time, but travels with the sampler so rebinding keeps it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SamplerConfig {
    pub filter: FilterMode,
    pub wrap: WrapMode,
    pub vflip: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct TextureSpec {
    pub kind: TextureKind,
    pub width: u32,
    pub height: u32,
    /// Depth for `Tex3d`; ignored otherwise.
    pub depth: u32,
    pub format: TextureFormat,
}

impl TextureSpec {
    pub fn tex2d(width: u32, height: u32, format: TextureFormat) -> Self {
        Self {
            kind: TextureKind::Tex2d,
            width,
            height,
            depth: 1,
            format,
        }
    }

    pub fn cube(face_size: u32, format: TextureFormat) -> Self {
        Self {
            kind: TextureKind::Cube,
            width: face_size,
            height: face_size,
            depth: 1,
            format,
        }
    }

    pub fn tex3d(width: u32, height: u32, depth: u32, format: TextureFormat) -> Self {
        Self {
            kind: TextureKind::Tex3d,
            width,
            height,
            depth,
            format,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CubeFace {
    PosX,
    NegX,
    PosY,
    NegY,
    PosZ,
    NegZ,
}

impl CubeFace {
    pub const ALL: [CubeFace; 6] = [
        CubeFace::PosX,
        CubeFace::NegX,
        CubeFace::PosY,
        CubeFace::NegY,
        CubeFace::PosZ,
        CubeFace::NegZ,
    ];

    pub fn index(self) -> usize {
        match self {
            CubeFace::PosX => 0,
            CubeFace::NegX => 1,
            CubeFace::PosY => 2,
            CubeFace::NegY => 3,
            CubeFace::PosZ => 4,
            CubeFace::NegZ => 5,
        }
    }
}

/// One texture unit binding: the texture plus the sampler state to bind it
/// with. `None` leaves the unit empty (samples as zero).
pub type UnitBinding = Option<(TextureId, SamplerConfig)>;

/// The narrow seam between the engine and a graphics backend.
///
/// Shader compilation reports failure as an `Err(String)` carrying the
/// backend's raw error log; the engine remaps line numbers before surfacing
/// it. Everything else uses `anyhow::Result` for genuinely unexpected
/// conditions (device loss, allocation failure).
pub trait Renderer {
    fn create_texture(&mut self, spec: &TextureSpec) -> Result<TextureId>;
    /// Upload texel data for the whole texture. For cube textures `data` is
    /// one face; `face` selects which.
    fn update_texture(&mut self, id: TextureId, face: Option<CubeFace>, data: &[u8]) -> Result<()>;
    fn destroy_texture(&mut self, id: TextureId);
    fn create_mipmaps(&mut self, id: TextureId);

    fn create_shader(&mut self, vertex_src: &str, fragment_src: &str)
        -> std::result::Result<ProgramId, String>;
    fn destroy_program(&mut self, id: ProgramId);
    fn use_program(&mut self, id: ProgramId);

    fn create_render_target(&mut self, color: TextureId) -> Result<TargetId>;
    fn destroy_render_target(&mut self, id: TargetId);
    /// `None` selects the presentation target.
    fn set_render_target(&mut self, target: Option<TargetId>);
    fn set_render_target_cube_face(&mut self, target: TargetId, face: CubeFace);
    fn set_viewport(&mut self, x: i32, y: i32, width: u32, height: u32);

    fn attach_textures(&mut self, units: [UnitBinding; 4]);

    fn set_uniform_f32(&mut self, program: ProgramId, name: &str, value: f32);
    fn set_uniform_i32(&mut self, program: ProgramId, name: &str, value: i32);
    fn set_uniform_vec2(&mut self, program: ProgramId, name: &str, value: [f32; 2]);
    fn set_uniform_vec3(&mut self, program: ProgramId, name: &str, value: [f32; 3]);
    fn set_uniform_vec4(&mut self, program: ProgramId, name: &str, value: [f32; 4]);
    fn set_uniform_f32_array(&mut self, program: ProgramId, name: &str, values: &[f32]);
    fn set_uniform_vec3_array(&mut self, program: ProgramId, name: &str, values: &[[f32; 3]]);
    /// Point a sampler uniform at a texture unit.
    fn set_uniform_sampler(&mut self, program: ProgramId, name: &str, unit: u32);

    fn draw_fullscreen_triangle(&mut self) -> Result<()>;
    fn draw_unit_quad(&mut self) -> Result<()>;

    /// Read back the full color attachment of `target` as tightly packed
    /// RGBA8 into `out`.
    fn read_pixels(&mut self, target: TargetId, width: u32, height: u32, out: &mut [u8])
        -> Result<()>;
}
