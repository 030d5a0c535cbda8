//! A recording, allocation-only [`Renderer`] for headless runs and tests.
//!
//! `TraceRenderer` hands out handles, tracks which ones are alive, logs the
//! call sequence, and keeps the latest value written to every uniform. It
//! draws nothing; readback is served by an optional caller-supplied fill
//! closure so sound-rendering paths can be exercised end to end.

use std::collections::{HashMap, HashSet};

use anyhow::{Result, bail};

use super::{
    CubeFace, ProgramId, Renderer, TargetId, TextureId, TextureSpec, UnitBinding,
};

#[derive(Debug, Clone, PartialEq)]
pub enum TraceEvent {
    CreateTexture(TextureId),
    UpdateTexture(TextureId, usize),
    DestroyTexture(TextureId),
    CreateMipmaps(TextureId),
    CreateProgram(ProgramId),
    DestroyProgram(ProgramId),
    UseProgram(ProgramId),
    CreateTarget(TargetId, TextureId),
    DestroyTarget(TargetId),
    SetTarget(Option<TargetId>),
    SetTargetCubeFace(TargetId, usize),
    AttachTextures([Option<TextureId>; 4]),
    Draw {
        program: Option<ProgramId>,
        target: Option<TargetId>,
    },
    ReadPixels(TargetId),
}

#[derive(Debug, Clone, PartialEq)]
pub enum UniformValue {
    F32(f32),
    I32(i32),
    Vec2([f32; 2]),
    Vec3([f32; 3]),
    Vec4([f32; 4]),
    F32Array(Vec<f32>),
    Vec3Array(Vec<[f32; 3]>),
    Sampler(u32),
}

type ReadbackFill = Box<dyn FnMut(usize, &mut [u8])>;

#[derive(Default)]
pub struct TraceRenderer {
    next_handle: u64,
    pub textures: HashMap<TextureId, TextureSpec>,
    /// Most recent bytes uploaded per texture (last face wins for cubes).
    pub texture_data: HashMap<TextureId, Vec<u8>>,
    pub programs: HashSet<ProgramId>,
    pub targets: HashMap<TargetId, TextureId>,
    pub events: Vec<TraceEvent>,
    /// Latest value written per (program, uniform name).
    pub uniforms: HashMap<(ProgramId, String), UniformValue>,
    /// Sources of the most recent successful `create_shader` call.
    pub last_shader_sources: Option<(String, String)>,
    /// When set, every `create_shader` call fails with this log.
    pub fail_compiles_with: Option<String>,
    current_program: Option<ProgramId>,
    current_target: Option<TargetId>,
    readback_count: usize,
    readback_fill: Option<ReadbackFill>,
}

impl TraceRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install a closure that fills readback buffers. It receives the
    /// zero-based index of the `read_pixels` call.
    pub fn set_readback_fill(&mut self, fill: impl FnMut(usize, &mut [u8]) + 'static) {
        self.readback_fill = Some(Box::new(fill));
    }

    pub fn draws(&self) -> Vec<&TraceEvent> {
        self.events
            .iter()
            .filter(|e| matches!(e, TraceEvent::Draw { .. }))
            .collect()
    }

    pub fn uniform(&self, program: ProgramId, name: &str) -> Option<&UniformValue> {
        self.uniforms.get(&(program, name.to_string()))
    }

    fn alloc(&mut self) -> u64 {
        self.next_handle += 1;
        self.next_handle
    }
}

impl Renderer for TraceRenderer {
    fn create_texture(&mut self, spec: &TextureSpec) -> Result<TextureId> {
        let id = TextureId(self.alloc());
        self.textures.insert(id, *spec);
        self.events.push(TraceEvent::CreateTexture(id));
        Ok(id)
    }

    fn update_texture(&mut self, id: TextureId, _face: Option<CubeFace>, data: &[u8]) -> Result<()> {
        if !self.textures.contains_key(&id) {
            bail!("update_texture on dead handle {id:?}");
        }
        self.texture_data.insert(id, data.to_vec());
        self.events.push(TraceEvent::UpdateTexture(id, data.len()));
        Ok(())
    }

    fn destroy_texture(&mut self, id: TextureId) {
        self.textures.remove(&id);
        self.texture_data.remove(&id);
        self.events.push(TraceEvent::DestroyTexture(id));
    }

    fn create_mipmaps(&mut self, id: TextureId) {
        self.events.push(TraceEvent::CreateMipmaps(id));
    }

    fn create_shader(
        &mut self,
        vertex_src: &str,
        fragment_src: &str,
    ) -> std::result::Result<ProgramId, String> {
        if let Some(log) = &self.fail_compiles_with {
            return Err(log.clone());
        }
        let id = ProgramId(self.alloc());
        self.programs.insert(id);
        self.last_shader_sources = Some((vertex_src.to_string(), fragment_src.to_string()));
        self.events.push(TraceEvent::CreateProgram(id));
        Ok(id)
    }

    fn destroy_program(&mut self, id: ProgramId) {
        self.programs.remove(&id);
        self.events.push(TraceEvent::DestroyProgram(id));
    }

    fn use_program(&mut self, id: ProgramId) {
        self.current_program = Some(id);
        self.events.push(TraceEvent::UseProgram(id));
    }

    fn create_render_target(&mut self, color: TextureId) -> Result<TargetId> {
        if !self.textures.contains_key(&color) {
            bail!("create_render_target on dead texture {color:?}");
        }
        let id = TargetId(self.alloc());
        self.targets.insert(id, color);
        self.events.push(TraceEvent::CreateTarget(id, color));
        Ok(id)
    }

    fn destroy_render_target(&mut self, id: TargetId) {
        self.targets.remove(&id);
        self.events.push(TraceEvent::DestroyTarget(id));
    }

    fn set_render_target(&mut self, target: Option<TargetId>) {
        self.current_target = target;
        self.events.push(TraceEvent::SetTarget(target));
    }

    fn set_render_target_cube_face(&mut self, target: TargetId, face: CubeFace) {
        self.current_target = Some(target);
        self.events
            .push(TraceEvent::SetTargetCubeFace(target, face.index()));
    }

    fn set_viewport(&mut self, _x: i32, _y: i32, _width: u32, _height: u32) {}

    fn attach_textures(&mut self, units: [UnitBinding; 4]) {
        self.events.push(TraceEvent::AttachTextures(
            units.map(|u| u.map(|(id, _)| id)),
        ));
    }

    fn set_uniform_f32(&mut self, program: ProgramId, name: &str, value: f32) {
        self.uniforms
            .insert((program, name.to_string()), UniformValue::F32(value));
    }

    fn set_uniform_i32(&mut self, program: ProgramId, name: &str, value: i32) {
        self.uniforms
            .insert((program, name.to_string()), UniformValue::I32(value));
    }

    fn set_uniform_vec2(&mut self, program: ProgramId, name: &str, value: [f32; 2]) {
        self.uniforms
            .insert((program, name.to_string()), UniformValue::Vec2(value));
    }

    fn set_uniform_vec3(&mut self, program: ProgramId, name: &str, value: [f32; 3]) {
        self.uniforms
            .insert((program, name.to_string()), UniformValue::Vec3(value));
    }

    fn set_uniform_vec4(&mut self, program: ProgramId, name: &str, value: [f32; 4]) {
        self.uniforms
            .insert((program, name.to_string()), UniformValue::Vec4(value));
    }

    fn set_uniform_f32_array(&mut self, program: ProgramId, name: &str, values: &[f32]) {
        self.uniforms.insert(
            (program, name.to_string()),
            UniformValue::F32Array(values.to_vec()),
        );
    }

    fn set_uniform_vec3_array(&mut self, program: ProgramId, name: &str, values: &[[f32; 3]]) {
        self.uniforms.insert(
            (program, name.to_string()),
            UniformValue::Vec3Array(values.to_vec()),
        );
    }

    fn set_uniform_sampler(&mut self, program: ProgramId, name: &str, unit: u32) {
        self.uniforms
            .insert((program, name.to_string()), UniformValue::Sampler(unit));
    }

    fn draw_fullscreen_triangle(&mut self) -> Result<()> {
        self.events.push(TraceEvent::Draw {
            program: self.current_program,
            target: self.current_target,
        });
        Ok(())
    }

    fn draw_unit_quad(&mut self) -> Result<()> {
        self.draw_fullscreen_triangle()
    }

    fn read_pixels(
        &mut self,
        target: TargetId,
        width: u32,
        height: u32,
        out: &mut [u8],
    ) -> Result<()> {
        if !self.targets.contains_key(&target) {
            bail!("read_pixels on dead target {target:?}");
        }
        let expected = (width * height * 4) as usize;
        if out.len() != expected {
            bail!("read_pixels buffer is {} bytes, expected {expected}", out.len());
        }
        out.fill(0);
        let idx = self.readback_count;
        self.readback_count += 1;
        if let Some(fill) = self.readback_fill.as_mut() {
            fill(idx, out);
        }
        self.events.push(TraceEvent::ReadPixels(target));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gfx::{TextureFormat, TextureSpec};

    #[test]
    fn handles_are_unique_and_tracked() {
        let mut r = TraceRenderer::new();
        let a = r
            .create_texture(&TextureSpec::tex2d(4, 4, TextureFormat::Rgba8))
            .unwrap();
        let b = r
            .create_texture(&TextureSpec::tex2d(4, 4, TextureFormat::Rgba8))
            .unwrap();
        assert_ne!(a, b);
        r.destroy_texture(a);
        assert!(!r.textures.contains_key(&a));
        assert!(r.textures.contains_key(&b));
    }

    #[test]
    fn update_on_dead_handle_errors() {
        let mut r = TraceRenderer::new();
        let a = r
            .create_texture(&TextureSpec::tex2d(2, 2, TextureFormat::Rgba8))
            .unwrap();
        r.destroy_texture(a);
        assert!(r.update_texture(a, None, &[0; 16]).is_err());
    }

    #[test]
    fn forced_compile_failure_returns_log() {
        let mut r = TraceRenderer::new();
        r.fail_compiles_with = Some("ERROR: 0:12: bad".to_string());
        let err = r.create_shader("vs", "fs").unwrap_err();
        assert!(err.contains("0:12"));
    }
}
