use std::sync::{Arc, Mutex};
use ash::vk;
use color_eyre::eyre::Result;
use color_eyre::eyre::eyre;
use gpu_allocator::{
    vulkan::{Allocation, AllocationCreateDesc, AllocationScheme, Allocator},
    MemoryLocation,
};

use crate::renderer::destroy::GpuResource;
use crate::renderer::resources::buffer::Buffer;
use crate::renderer::resources::upload::UploadContext;
use crate::renderer::util::transition_image_layout;

/// GPU-only 2D image in `R8G8B8A8_SRGB`, sampled from the fragment shader.
/// Pixels travel through a staging buffer on the upload context and the
/// image is left in `SHADER_READ_ONLY_OPTIMAL`.
pub struct Image {
    pub image: vk::Image,
    pub view: vk::ImageView,
    pub extent: vk::Extent2D,

    allocation: Option<Allocation>,
    memory_allocator: Arc<Mutex<Allocator>>,
    device: Arc<ash::Device>,
}

impl Image {
    const FORMAT: vk::Format = vk::Format::R8G8B8A8_SRGB;

    /// Create a sampled image and fill it with `pixels` (tightly packed RGBA,
    /// `width * height * 4` bytes).
    pub fn new_sampled(
        pixels: &[u8],
        width: u32,
        height: u32,
        name: &str,
        memory_allocator: Arc<Mutex<Allocator>>,
        device: Arc<ash::Device>,
        upload_context: &UploadContext,
    ) -> Result<Self> {
        debug_assert_eq!(pixels.len(), (width * height * 4) as usize);

        let extent = vk::Extent2D { width, height };
        let image_info = vk::ImageCreateInfo::default()
            .image_type(vk::ImageType::TYPE_2D)
            .format(Self::FORMAT)
            .extent(vk::Extent3D {
                width,
                height,
                depth: 1,
            })
            .mip_levels(1)
            .array_layers(1)
            .samples(vk::SampleCountFlags::TYPE_1)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(vk::ImageUsageFlags::SAMPLED | vk::ImageUsageFlags::TRANSFER_DST);
        let image = unsafe { device.create_image(&image_info, None)? };

        let requirements = unsafe { device.get_image_memory_requirements(image) };
        let allocation = memory_allocator
            .lock()
            .map_err(|e| eyre!(e.to_string()))?
            .allocate(&AllocationCreateDesc {
                name,
                requirements,
                location: MemoryLocation::GpuOnly,
                linear: false,
                allocation_scheme: AllocationScheme::DedicatedImage(image),
            })?;
        unsafe {
            device.bind_image_memory(image, allocation.memory(), 0)?;
        }

        let view_info = vk::ImageViewCreateInfo::default()
            .image(image)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(Self::FORMAT)
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask: vk::ImageAspectFlags::COLOR,
                base_mip_level: 0,
                level_count: 1,
                base_array_layer: 0,
                layer_count: 1,
            });
        let view = unsafe { device.create_image_view(&view_info, None)? };

        let img = Self {
            image,
            view,
            extent,
            allocation: Some(allocation),
            memory_allocator,
            device,
        };
        img.upload(pixels, upload_context)?;

        Ok(img)
    }

    fn upload(&self, pixels: &[u8], upload_context: &UploadContext) -> Result<()> {
        let mut staging = Buffer::new(
            pixels.len() as u64,
            vk::BufferUsageFlags::TRANSFER_SRC,
            "Image staging buffer",
            MemoryLocation::CpuToGpu,
            self.memory_allocator.clone(),
            self.device.clone(),
        )?;
        staging.write(pixels, 0)?;

        upload_context.immediate_submit(|cmd, device| {
            transition_image_layout(
                device,
                cmd,
                self.image,
                vk::ImageLayout::UNDEFINED,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            );

            let copy = vk::BufferImageCopy::default()
                .image_subresource(vk::ImageSubresourceLayers {
                    aspect_mask: vk::ImageAspectFlags::COLOR,
                    mip_level: 0,
                    base_array_layer: 0,
                    layer_count: 1,
                })
                .image_extent(vk::Extent3D {
                    width: self.extent.width,
                    height: self.extent.height,
                    depth: 1,
                });
            unsafe {
                device.cmd_copy_buffer_to_image(
                    cmd,
                    staging.buffer,
                    self.image,
                    vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                    &[copy],
                );
            }

            transition_image_layout(
                device,
                cmd,
                self.image,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            );

            Ok(())
        })?;

        Ok(())
    }
}

impl GpuResource for Image {
    fn destroy(&mut self) {
        debug_assert!(self.is_live(), "image destroyed twice");
        if let Some(allocation) = self.allocation.take() {
            unsafe {
                self.device.destroy_image_view(self.view, None);
                if let Ok(mut allocator) = self.memory_allocator.lock() {
                    if let Err(e) = allocator.free(allocation) {
                        log::error!("failed to free image allocation: {e}");
                    }
                }
                self.device.destroy_image(self.image, None);
            }
            self.image = vk::Image::null();
            self.view = vk::ImageView::null();
        }
    }

    fn is_live(&self) -> bool {
        self.allocation.is_some()
    }
}

impl Drop for Image {
    fn drop(&mut self) {
        if self.is_live() {
            self.destroy();
        }
    }
}
