//! Double-buffered feedback storage.
//!
//! Each Buffer/Cubemap output owns two equal-resolution texture/target
//! pairs and an index naming the side whose render has completed. Readers
//! always sample that side; the scheduler draws into the other one and
//! flips only after the draw finishes, so no pass can observe a partial
//! write.

use anyhow::Result;

use crate::gfx::{Renderer, TargetId, TextureFormat, TextureId, TextureKind, TextureSpec};

#[derive(Debug)]
pub struct DoubleBuffer {
    textures: [TextureId; 2],
    targets: [TargetId; 2],
    resolution: [u32; 2],
    kind: TextureKind,
    last_render_done: usize,
}

impl DoubleBuffer {
    pub fn new(renderer: &mut dyn Renderer, kind: TextureKind, resolution: [u32; 2]) -> Result<Self> {
        let (textures, targets) = Self::alloc_pair(renderer, kind, resolution)?;
        Ok(Self {
            textures,
            targets,
            resolution,
            kind,
            last_render_done: 0,
        })
    }

    fn alloc_pair(
        renderer: &mut dyn Renderer,
        kind: TextureKind,
        resolution: [u32; 2],
    ) -> Result<([TextureId; 2], [TargetId; 2])> {
        let spec = match kind {
            TextureKind::Cube => TextureSpec::cube(resolution[0], TextureFormat::Rgba16f),
            _ => TextureSpec::tex2d(resolution[0], resolution[1], TextureFormat::Rgba16f),
        };
        let t0 = renderer.create_texture(&spec)?;
        let t1 = renderer.create_texture(&spec)?;
        let r0 = renderer.create_render_target(t0)?;
        let r1 = renderer.create_render_target(t1)?;
        Ok(([t0, t1], [r0, r1]))
    }

    pub fn resolution(&self) -> [u32; 2] {
        self.resolution
    }

    /// Index of the most recently completed side. Always 0 or 1.
    pub fn last_render_done(&self) -> usize {
        self.last_render_done
    }

    /// The texture safe to sample this frame.
    pub fn read_texture(&self) -> TextureId {
        self.textures[self.last_render_done]
    }

    /// The texture being written this frame (the other side).
    pub fn write_texture(&self) -> TextureId {
        self.textures[1 - self.last_render_done]
    }

    pub fn write_target(&self) -> TargetId {
        self.targets[1 - self.last_render_done]
    }

    /// Commit the side just written. Call once per successful render.
    pub fn flip(&mut self) {
        self.last_render_done = 1 - self.last_render_done;
    }

    /// Drop and reallocate both sides at a new resolution. History is lost;
    /// the new read side is zero-filled by texture creation.
    pub fn resize(&mut self, renderer: &mut dyn Renderer, resolution: [u32; 2]) -> Result<()> {
        if resolution == self.resolution {
            return Ok(());
        }
        self.destroy_gpu(renderer);
        let (textures, targets) = Self::alloc_pair(renderer, self.kind, resolution)?;
        self.textures = textures;
        self.targets = targets;
        self.resolution = resolution;
        self.last_render_done = 0;
        Ok(())
    }

    pub fn destroy(mut self, renderer: &mut dyn Renderer) {
        self.destroy_gpu(renderer);
    }

    fn destroy_gpu(&mut self, renderer: &mut dyn Renderer) {
        for t in self.targets {
            renderer.destroy_render_target(t);
        }
        for t in self.textures {
            renderer.destroy_texture(t);
        }
    }
}

pub const BUFFER_SLOT_COUNT: usize = 4;

/// All live double buffers of one effect: up to four Buffer outputs plus
/// one Cubemap output. Written only by the owning pass, read by any pass
/// binding it as feedback.
#[derive(Debug, Default)]
pub struct FeedbackStore {
    buffers: [Option<DoubleBuffer>; BUFFER_SLOT_COUNT],
    cubemap: Option<DoubleBuffer>,
}

impl FeedbackStore {
    pub fn buffer(&self, index: usize) -> Option<&DoubleBuffer> {
        self.buffers.get(index).and_then(|b| b.as_ref())
    }

    pub fn buffer_mut(&mut self, index: usize) -> Option<&mut DoubleBuffer> {
        self.buffers.get_mut(index).and_then(|b| b.as_mut())
    }

    pub fn cubemap(&self) -> Option<&DoubleBuffer> {
        self.cubemap.as_ref()
    }

    pub fn cubemap_mut(&mut self) -> Option<&mut DoubleBuffer> {
        self.cubemap.as_mut()
    }

    /// Create the buffer's double buffer on first output assignment.
    pub fn ensure_buffer(
        &mut self,
        renderer: &mut dyn Renderer,
        index: usize,
        resolution: [u32; 2],
    ) -> Result<&mut DoubleBuffer> {
        anyhow::ensure!(index < BUFFER_SLOT_COUNT, "buffer index {index} out of range");
        if self.buffers[index].is_none() {
            self.buffers[index] = Some(DoubleBuffer::new(renderer, TextureKind::Tex2d, resolution)?);
        }
        Ok(self.buffers[index].as_mut().unwrap())
    }

    pub fn ensure_cubemap(
        &mut self,
        renderer: &mut dyn Renderer,
        face_size: u32,
    ) -> Result<&mut DoubleBuffer> {
        if self.cubemap.is_none() {
            self.cubemap = Some(DoubleBuffer::new(
                renderer,
                TextureKind::Cube,
                [face_size, face_size],
            )?);
        }
        Ok(self.cubemap.as_mut().unwrap())
    }

    pub fn destroy_all(&mut self, renderer: &mut dyn Renderer) {
        for slot in &mut self.buffers {
            if let Some(db) = slot.take() {
                db.destroy(renderer);
            }
        }
        if let Some(db) = self.cubemap.take() {
            db.destroy(renderer);
        }
    }
}
