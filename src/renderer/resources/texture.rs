use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use ash::vk;
use color_eyre::Result;
use gpu_allocator::vulkan::Allocator;

use crate::renderer::destroy::GpuResource;
use crate::renderer::resources::image::Image;
use crate::renderer::resources::upload::UploadContext;

static TEXTURE_ID_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Process-unique texture identity, used by the slot array to detect reuse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureId(u64);

impl TextureId {
    pub fn next() -> Self {
        Self(TEXTURE_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

/// A sampled 2D texture: image, view, and its own sampler.
pub struct Texture {
    pub image: Image,
    pub sampler: vk::Sampler,
    id: TextureId,
    device: Arc<ash::Device>,
}

impl Texture {
    pub fn new_from_bytes(
        data: &[u8],
        width: u32,
        height: u32,
        name: &str,
        memory_allocator: Arc<Mutex<Allocator>>,
        device: Arc<ash::Device>,
        upload_context: &UploadContext,
    ) -> Result<Self> {
        let image = Image::new_sampled(
            data,
            width,
            height,
            name,
            memory_allocator,
            device.clone(),
            upload_context,
        )?;

        let sampler_info = vk::SamplerCreateInfo::default()
            .mag_filter(vk::Filter::NEAREST)
            .min_filter(vk::Filter::NEAREST)
            .address_mode_u(vk::SamplerAddressMode::REPEAT)
            .address_mode_v(vk::SamplerAddressMode::REPEAT)
            .address_mode_w(vk::SamplerAddressMode::REPEAT);
        let sampler = unsafe { device.create_sampler(&sampler_info, None)? };

        Ok(Self {
            image,
            sampler,
            id: TextureId::next(),
            device,
        })
    }

    pub fn new_from_image(
        image: &image::DynamicImage,
        name: &str,
        memory_allocator: Arc<Mutex<Allocator>>,
        device: Arc<ash::Device>,
        upload_context: &UploadContext,
    ) -> Result<Self> {
        let data = image.to_rgba8().into_raw();
        let width = image.width();
        let height = image.height();
        Self::new_from_bytes(
            &data,
            width,
            height,
            name,
            memory_allocator,
            device,
            upload_context,
        )
    }

    /// 1x1 opaque white. Bound into every unused texture slot so sampling
    /// them degenerates to the vertex color.
    pub fn new_white(
        memory_allocator: Arc<Mutex<Allocator>>,
        device: Arc<ash::Device>,
        upload_context: &UploadContext,
    ) -> Result<Self> {
        Self::new_from_bytes(
            &[0xff, 0xff, 0xff, 0xff],
            1,
            1,
            "White fallback texture",
            memory_allocator,
            device,
            upload_context,
        )
    }

    pub fn id(&self) -> TextureId {
        self.id
    }

    pub fn descriptor_info(&self) -> vk::DescriptorImageInfo {
        vk::DescriptorImageInfo {
            sampler: self.sampler,
            image_view: self.image.view,
            image_layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        }
    }
}

impl GpuResource for Texture {
    fn destroy(&mut self) {
        debug_assert!(self.is_live(), "texture destroyed twice");
        if self.image.is_live() {
            unsafe {
                self.device.destroy_sampler(self.sampler, None);
            }
            self.sampler = vk::Sampler::null();
            self.image.destroy();
        }
    }

    fn is_live(&self) -> bool {
        self.image.is_live()
    }
}

// The image's own Drop handles the implicit-release path; only the sampler
// needs cleanup here.
impl Drop for Texture {
    fn drop(&mut self) {
        if self.is_live() {
            unsafe {
                self.device.destroy_sampler(self.sampler, None);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn texture_ids_are_unique() {
        let a = TextureId::next();
        let b = TextureId::next();
        assert_ne!(a, b);
    }
}
