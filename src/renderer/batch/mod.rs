pub mod quad;
pub mod slots;

use std::sync::{Arc, Mutex};
use ash::vk;
use color_eyre::Result;
use glam::{Vec2, Vec4};
use gpu_allocator::{vulkan::Allocator, MemoryLocation};
use smallvec::SmallVec;

use crate::renderer::batch::quad::{Quad, QuadBatcher};
use crate::renderer::batch::slots::{SlotResolution, TextureSlots};
use crate::renderer::destroy::DestroyQueue;
use crate::renderer::resources::buffer::Buffer;
use crate::renderer::resources::texture::Texture;
use crate::renderer::resources::upload::UploadContext;
use crate::renderer::shader_data::{
    QuadVertex, INDICES_PER_QUAD, MAX_TEXTURE_SLOTS, VERTICES_PER_QUAD,
};

/// A quad paired with its own texture, for mixed-texture array submission.
pub struct TexturedQuad {
    pub quad: Quad,
    pub texture: Option<Arc<Texture>>,
}

/// Read-only per-pass counters, reset once per frame by the owner.
#[derive(Debug, Default, Clone, Copy)]
pub struct BatchStats {
    pub drawn_quads: u32,
    pub truncated_quads: u32,
    pub active_batches: u32,
    pub draw_calls: u32,
}

/// Converts a stream of quad draw requests into a handful of indexed draw
/// calls. One instance per logical layer (scene, UI), owned by the renderer
/// rather than reached through a global.
pub struct BatchRenderer {
    batcher: QuadBatcher,
    slots: TextureSlots,
    slot_textures: Vec<Arc<Texture>>,
    white: Arc<Texture>,

    // Parallel to `batcher`'s batches; grown lazily at flush.
    vertex_buffers: Vec<Buffer>,
    index_buffer: Buffer,
    quads_per_batch: usize,
    draw_calls: u32,
    name: &'static str,

    memory_allocator: Arc<Mutex<Allocator>>,
    device: Arc<ash::Device>,
}

impl BatchRenderer {
    pub fn new(
        name: &'static str,
        quads_per_batch: usize,
        max_batches: usize,
        white: Arc<Texture>,
        memory_allocator: Arc<Mutex<Allocator>>,
        device: Arc<ash::Device>,
        upload_context: &UploadContext,
    ) -> Result<Self> {
        let index_buffer = Self::create_index_buffer(
            quads_per_batch,
            name,
            memory_allocator.clone(),
            device.clone(),
            upload_context,
        )?;

        Ok(Self {
            batcher: QuadBatcher::new(quads_per_batch, max_batches),
            slots: TextureSlots::new(MAX_TEXTURE_SLOTS),
            slot_textures: Vec::with_capacity(MAX_TEXTURE_SLOTS),
            white,
            vertex_buffers: Vec::new(),
            index_buffer,
            quads_per_batch,
            draw_calls: 0,
            name,
            memory_allocator,
            device,
        })
    }

    /// Every batch shares one index buffer: the quad-to-triangle pattern is
    /// identical for all of them, so it is staged to the GPU exactly once.
    fn create_index_buffer(
        quads_per_batch: usize,
        name: &str,
        memory_allocator: Arc<Mutex<Allocator>>,
        device: Arc<ash::Device>,
        upload_context: &UploadContext,
    ) -> Result<Buffer> {
        let mut indices = Vec::with_capacity(quads_per_batch * INDICES_PER_QUAD);
        for quad in 0..quads_per_batch as u32 {
            let base = quad * VERTICES_PER_QUAD as u32;
            indices.extend_from_slice(&[
                base, base + 1, base + 2,
                base + 2, base + 3, base,
            ]);
        }

        let size = (indices.len() * size_of::<u32>()) as u64;
        let mut staging = Buffer::new(
            size,
            vk::BufferUsageFlags::TRANSFER_SRC,
            &format!("{name} index staging buffer"),
            MemoryLocation::CpuToGpu,
            memory_allocator.clone(),
            device.clone(),
        )?;
        staging.write(&indices, 0)?;

        let index_buffer = Buffer::new(
            size,
            vk::BufferUsageFlags::INDEX_BUFFER | vk::BufferUsageFlags::TRANSFER_DST,
            &format!("{name} index buffer"),
            MemoryLocation::GpuOnly,
            memory_allocator,
            device,
        )?;

        upload_context.immediate_submit(|cmd, device| {
            let region = vk::BufferCopy {
                src_offset: 0,
                dst_offset: 0,
                size,
            };
            unsafe {
                device.cmd_copy_buffer(cmd, staging.buffer, index_buffer.buffer, &[region]);
            }
            Ok(())
        })?;

        Ok(index_buffer)
    }

    /// Map a draw request's texture to the shifted slot attribute.
    ///
    /// 0 is the untextured sentinel. On slot exhaustion the quad keeps slot 0
    /// of the array (visually wrong texture, but the geometry still renders).
    fn resolve_slot(&mut self, texture: Option<&Arc<Texture>>) -> u32 {
        let Some(texture) = texture else {
            return 0;
        };
        match self.slots.resolve_or_assign(texture.id()) {
            SlotResolution::Existing(slot) => slot + 1,
            SlotResolution::Assigned(slot) => {
                debug_assert_eq!(slot as usize, self.slot_textures.len());
                self.slot_textures.push(texture.clone());
                slot + 1
            }
            SlotResolution::Overflow => {
                log::trace!("{}: texture slots exhausted, using slot 0", self.name);
                1
            }
        }
    }

    pub fn draw_quad(
        &mut self,
        position: Vec2,
        size: Vec2,
        color: Vec4,
        texture: Option<&Arc<Texture>>,
    ) {
        let slot = self.resolve_slot(texture);
        let quad = Quad { position, size, color };
        self.batcher.push(&quad, slot);
    }

    /// Array variant sharing one texture: the slot is resolved once and as
    /// many quads as fit are accepted.
    pub fn draw_quads(&mut self, quads: &[Quad], texture: Option<&Arc<Texture>>) -> usize {
        let slot = self.resolve_slot(texture);
        self.batcher.push_many(quads, slot)
    }

    /// Array variant with per-quad textures.
    pub fn draw_quad_array(&mut self, quads: &[TexturedQuad]) -> usize {
        let mut accepted = 0;
        for entry in quads {
            let slot = self.resolve_slot(entry.texture.as_ref());
            if self.batcher.push(&entry.quad, slot) {
                accepted += 1;
            }
        }
        accepted
    }

    /// Upload every filled batch and record one indexed draw per batch.
    /// Pipeline and descriptor sets must already be bound.
    pub fn flush(&mut self, cmd: vk::CommandBuffer) -> Result<()> {
        while self.vertex_buffers.len() < self.batcher.active_batches() {
            let size = (self.quads_per_batch
                * VERTICES_PER_QUAD
                * size_of::<QuadVertex>()) as u64;
            self.vertex_buffers.push(Buffer::new(
                size,
                vk::BufferUsageFlags::VERTEX_BUFFER,
                &format!("{} vertex buffer {}", self.name, self.vertex_buffers.len()),
                MemoryLocation::CpuToGpu,
                self.memory_allocator.clone(),
                self.device.clone(),
            )?);
        }

        let mut index_buffer_bound = false;
        for (batch, buffer) in self
            .batcher
            .batches_mut()
            .iter_mut()
            .zip(self.vertex_buffers.iter_mut())
        {
            if batch.is_empty() {
                continue;
            }

            // Only the filled prefix leaves the CPU mirror.
            buffer.write(batch.vertices(), 0)?;

            unsafe {
                if !index_buffer_bound {
                    self.device.cmd_bind_index_buffer(
                        cmd,
                        self.index_buffer.buffer,
                        0,
                        vk::IndexType::UINT32,
                    );
                    index_buffer_bound = true;
                }
                self.device
                    .cmd_bind_vertex_buffers(cmd, 0, &[buffer.buffer], &[0]);
                self.device.cmd_draw_indexed(
                    cmd,
                    (batch.quad_count() * INDICES_PER_QUAD) as u32,
                    1,
                    0,
                    0,
                    0,
                );
            }
            self.draw_calls += 1;
            batch.reset();
        }

        Ok(())
    }

    /// Maintenance: free the trailing run of empty batches through the
    /// deferred queue so in-flight frames are unaffected.
    pub fn compact(&mut self, destroy_queue: &mut DestroyQueue) {
        let removed = self.batcher.compact_trailing();
        while self.vertex_buffers.len() > self.batcher.active_batches() {
            match self.vertex_buffers.pop() {
                Some(buffer) => destroy_queue.schedule(Box::new(buffer)),
                None => break,
            }
        }
        if removed > 0 {
            log::debug!("{}: compacted {} empty batches", self.name, removed);
        }
    }

    /// One combined-image-sampler info per slot; unused slots fall back to
    /// the white texture.
    pub fn descriptor_image_infos(
        &self,
    ) -> SmallVec<[vk::DescriptorImageInfo; MAX_TEXTURE_SLOTS]> {
        (0..MAX_TEXTURE_SLOTS)
            .map(|slot| {
                self.slot_textures
                    .get(slot)
                    .unwrap_or(&self.white)
                    .descriptor_info()
            })
            .collect()
    }

    pub fn stats(&self) -> BatchStats {
        BatchStats {
            drawn_quads: self.batcher.drawn(),
            truncated_quads: self.batcher.truncated(),
            active_batches: self.batcher.active_batches() as u32,
            draw_calls: self.draw_calls,
        }
    }

    /// Once per frame. Counters only: the slot array and its texture
    /// references live as long as the layer, so a texture keeps its slot
    /// for the whole run.
    pub fn reset_counters(&mut self) {
        self.batcher.reset_counters();
        self.draw_calls = 0;
    }

    /// Changes exactly when a texture claims a new slot; the caller skips
    /// the sampler-array descriptor write while it holds still.
    pub fn slots_generation(&self) -> u64 {
        self.slots.generation()
    }

    /// Release everything this layer owns into the deferred queue. The slot
    /// array and its texture references are released here and nowhere else.
    pub fn close(self, destroy_queue: &mut DestroyQueue) {
        let Self {
            vertex_buffers,
            index_buffer,
            name,
            ..
        } = self;
        for buffer in vertex_buffers {
            destroy_queue.schedule(Box::new(buffer));
        }
        destroy_queue.schedule(Box::new(index_buffer));
        log::debug!("{name}: layer closed");
    }
}
