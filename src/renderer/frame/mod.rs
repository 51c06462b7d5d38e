pub mod scheduler;

use std::sync::{Arc, Mutex};
use ash::vk;
use color_eyre::Result;
use gpu_allocator::{vulkan::Allocator, MemoryLocation};
use smallvec::SmallVec;

use crate::renderer::frame::scheduler::{FenceSet, FrameScheduler};
use crate::renderer::resources::buffer::Buffer;
use crate::renderer::shader_data::{PerFrameData, MAX_TEXTURE_SLOTS};

/// One of F concurrently pipelined CPU/GPU timelines. Owns the
/// synchronization primitives, command buffer, mapped uniform buffer, and
/// the descriptor sets for both passes of its frame.
pub struct FrameSlot {
    pub cmd: vk::CommandBuffer,

    // Signals when the acquired swapchain image is ready to be written.
    pub image_available: vk::Semaphore,

    // Signals when all rendering commands for this frame have executed.
    pub render_finished: vk::Semaphore,

    // Signals when the whole submission has retired on the GPU.
    pub in_flight: vk::Fence,

    pub uniform: Buffer,
    pub scene_set: vk::DescriptorSet,
    pub ui_set: vk::DescriptorSet,

    // Slot generations the sampler arrays were last written with.
    written_generations: Option<(u64, u64)>,
}

/// `vkWaitForFences` adapter over the slots' fences.
struct DeviceFences<'a> {
    device: &'a ash::Device,
    fences: SmallVec<[vk::Fence; 3]>,
}

impl<'a> DeviceFences<'a> {
    fn new(device: &'a ash::Device, slots: &[FrameSlot]) -> Self {
        Self {
            device,
            fences: slots.iter().map(|slot| slot.in_flight).collect(),
        }
    }
}

impl FenceSet for DeviceFences<'_> {
    fn wait(&mut self, slot: usize) -> Result<()> {
        unsafe {
            self.device
                .wait_for_fences(&[self.fences[slot]], true, u64::MAX)?;
        }
        Ok(())
    }

    fn reset(&mut self, slot: usize) -> Result<()> {
        unsafe {
            self.device.reset_fences(&[self.fences[slot]])?;
        }
        Ok(())
    }
}

pub struct FrameContext {
    slots: Vec<FrameSlot>,
    scheduler: FrameScheduler,
    command_pool: vk::CommandPool,
    descriptor_pool: vk::DescriptorPool,
    device: Arc<ash::Device>,
}

impl FrameContext {
    pub fn new(
        frames_in_flight: usize,
        swapchain_image_count: usize,
        queue_family_index: u32,
        set_layout: vk::DescriptorSetLayout,
        memory_allocator: Arc<Mutex<Allocator>>,
        device: Arc<ash::Device>,
    ) -> Result<Self> {
        let command_pool = {
            let info = vk::CommandPoolCreateInfo::default()
                .queue_family_index(queue_family_index)
                .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER);
            unsafe { device.create_command_pool(&info, None)? }
        };

        let command_buffers = {
            let info = vk::CommandBufferAllocateInfo::default()
                .command_pool(command_pool)
                .command_buffer_count(frames_in_flight as u32)
                .level(vk::CommandBufferLevel::PRIMARY);
            unsafe { device.allocate_command_buffers(&info)? }
        };

        // Two descriptor sets (scene pass, UI pass) per frame slot.
        let descriptor_pool = {
            let sets_per_slot = 2u32;
            let max_sets = frames_in_flight as u32 * sets_per_slot;
            let pool_sizes = [
                vk::DescriptorPoolSize {
                    ty: vk::DescriptorType::UNIFORM_BUFFER,
                    descriptor_count: max_sets,
                },
                vk::DescriptorPoolSize {
                    ty: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
                    descriptor_count: max_sets * MAX_TEXTURE_SLOTS as u32,
                },
            ];
            let info = vk::DescriptorPoolCreateInfo::default()
                .max_sets(max_sets)
                .pool_sizes(&pool_sizes);
            unsafe { device.create_descriptor_pool(&info, None)? }
        };

        let mut slots = Vec::with_capacity(frames_in_flight);
        for (index, cmd) in command_buffers.into_iter().enumerate() {
            let image_available = unsafe {
                device.create_semaphore(&vk::SemaphoreCreateInfo::default(), None)?
            };
            let render_finished = unsafe {
                device.create_semaphore(&vk::SemaphoreCreateInfo::default(), None)?
            };
            // The scheduler only waits on fences it saw submitted, so the
            // fence starts unsignaled.
            let in_flight = unsafe {
                device.create_fence(&vk::FenceCreateInfo::default(), None)?
            };

            let mut uniform = Buffer::new(
                size_of::<PerFrameData>() as u64,
                vk::BufferUsageFlags::UNIFORM_BUFFER,
                &format!("Frame {index} uniform buffer"),
                MemoryLocation::CpuToGpu,
                memory_allocator.clone(),
                device.clone(),
            )?;
            uniform.write(&[PerFrameData::default()], 0)?;

            let set_layouts = [set_layout, set_layout];
            let alloc_info = vk::DescriptorSetAllocateInfo::default()
                .descriptor_pool(descriptor_pool)
                .set_layouts(&set_layouts);
            let sets = unsafe { device.allocate_descriptor_sets(&alloc_info)? };
            let (scene_set, ui_set) = (sets[0], sets[1]);

            // The uniform binding never changes; point both passes' sets at
            // this slot's buffer once.
            let buffer_info = vk::DescriptorBufferInfo {
                buffer: uniform.buffer,
                offset: 0,
                range: size_of::<PerFrameData>() as u64,
            };
            let buffer_infos = [buffer_info];
            let writes = [
                vk::WriteDescriptorSet::default()
                    .dst_set(scene_set)
                    .dst_binding(0)
                    .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
                    .buffer_info(&buffer_infos),
                vk::WriteDescriptorSet::default()
                    .dst_set(ui_set)
                    .dst_binding(0)
                    .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
                    .buffer_info(&buffer_infos),
            ];
            unsafe {
                device.update_descriptor_sets(&writes, &[]);
            }

            slots.push(FrameSlot {
                cmd,
                image_available,
                render_finished,
                in_flight,
                uniform,
                scene_set,
                ui_set,
                written_generations: None,
            });
        }

        Ok(Self {
            slots,
            scheduler: FrameScheduler::new(frames_in_flight, swapchain_image_count),
            command_pool,
            descriptor_pool,
            device,
        })
    }

    pub fn current(&self) -> &FrameSlot {
        &self.slots[self.scheduler.current_slot()]
    }

    /// Blocks until the current slot's previous submission retired.
    pub fn begin_frame(&mut self) -> Result<()> {
        let mut fences = DeviceFences::new(&self.device, &self.slots);
        self.scheduler.begin_frame(&mut fences)
    }

    /// Blocks if the image's last writer is a different, unretired slot.
    pub fn claim_image(&mut self, image: usize) -> Result<()> {
        let mut fences = DeviceFences::new(&self.device, &self.slots);
        self.scheduler.claim_image(image, &mut fences)
    }

    pub fn prepare_submit(&mut self) -> Result<()> {
        let mut fences = DeviceFences::new(&self.device, &self.slots);
        self.scheduler.prepare_submit(&mut fences)
    }

    pub fn end_frame(&mut self) {
        self.scheduler.end_frame();
    }

    pub fn reset_images(&mut self, image_count: usize) {
        self.scheduler.reset_images(image_count);
    }

    /// Write this frame's uniform data straight into the mapped buffer.
    pub fn update_uniforms(&mut self, data: PerFrameData) -> Result<()> {
        let slot = self.scheduler.current_slot();
        self.slots[slot].uniform.write(&[data], 0)?;
        Ok(())
    }

    /// Rewrite the sampler-array binding of both passes' sets for the
    /// current slot, skipped while the layers' slot assignments hold still.
    /// Safe without update-after-bind: the slot's previous frame has
    /// already been fence-waited.
    pub fn update_textures(
        &mut self,
        scene_generation: u64,
        ui_generation: u64,
        scene_infos: &[vk::DescriptorImageInfo],
        ui_infos: &[vk::DescriptorImageInfo],
    ) {
        let index = self.scheduler.current_slot();
        let slot = &mut self.slots[index];
        let generations = (scene_generation, ui_generation);
        if slot.written_generations == Some(generations) {
            return;
        }
        let writes = [
            vk::WriteDescriptorSet::default()
                .dst_set(slot.scene_set)
                .dst_binding(1)
                .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
                .image_info(scene_infos),
            vk::WriteDescriptorSet::default()
                .dst_set(slot.ui_set)
                .dst_binding(1)
                .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
                .image_info(ui_infos),
        ];
        unsafe {
            self.device.update_descriptor_sets(&writes, &[]);
        }
        slot.written_generations = Some(generations);
    }
}

impl Drop for FrameContext {
    fn drop(&mut self) {
        unsafe {
            for slot in &self.slots {
                self.device.destroy_semaphore(slot.image_available, None);
                self.device.destroy_semaphore(slot.render_finished, None);
                self.device.destroy_fence(slot.in_flight, None);
            }
            self.device.destroy_descriptor_pool(self.descriptor_pool, None);
            self.device.destroy_command_pool(self.command_pool, None);
        }
    }
}
