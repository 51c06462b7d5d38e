use std::ffi::{c_char, CStr};
use std::sync::{Arc, Mutex};
use ash::vk;
use color_eyre::eyre::OptionExt;
use color_eyre::Result;
use gpu_allocator::vulkan::{Allocator, AllocatorCreateDesc};
use gpu_allocator::AllocationSizes;

use crate::renderer::core::instance::RenderInstance;

const REQUIRED_DEVICE_EXTENSIONS: &[&CStr] = &[
    ash::khr::swapchain::NAME,
    #[cfg(target_os = "macos")]
    ash::khr::portability_subset::NAME,
];

/// Physical + logical device and the single graphics/present queue that
/// drives both the frame loop and staging uploads.
pub struct RenderDevice {
    pub physical: vk::PhysicalDevice,
    pub logical: Arc<ash::Device>,
    pub graphics_queue: vk::Queue,
    pub graphics_queue_family: u32,
}

impl RenderDevice {
    pub fn new(
        ins: &RenderInstance,
        surface: vk::SurfaceKHR,
        surface_loader: &ash::khr::surface::Instance,
    ) -> Result<Self> {
        let (physical, graphics_queue_family) =
            Self::select_physical_device(&ins.instance, surface, surface_loader)?;

        let queue_priorities = [1.0];
        let queue_infos = [vk::DeviceQueueCreateInfo::default()
            .queue_family_index(graphics_queue_family)
            .queue_priorities(&queue_priorities)];
        let extension_names: Vec<*const c_char> = REQUIRED_DEVICE_EXTENSIONS
            .iter()
            .map(|ext| ext.as_ptr())
            .collect();
        // Dynamic rendering removes render pass and framebuffer objects from
        // the swapchain-dependent set; synchronization2 backs the layout
        // transition barriers.
        let mut features13 = vk::PhysicalDeviceVulkan13Features::default()
            .dynamic_rendering(true)
            .synchronization2(true);

        let device_info = vk::DeviceCreateInfo::default()
            .queue_create_infos(&queue_infos)
            .enabled_extension_names(&extension_names)
            .push_next(&mut features13);
        let logical = unsafe { ins.instance.create_device(physical, &device_info, None)? };
        let graphics_queue = unsafe { logical.get_device_queue(graphics_queue_family, 0) };

        Ok(Self {
            physical,
            logical: Arc::new(logical),
            graphics_queue,
            graphics_queue_family,
        })
    }

    /// Candidates must carry the required extensions and a queue family that
    /// can both draw and present to `surface`. Discrete GPUs win ties.
    fn select_physical_device(
        instance: &ash::Instance,
        surface: vk::SurfaceKHR,
        surface_loader: &ash::khr::surface::Instance,
    ) -> Result<(vk::PhysicalDevice, u32)> {
        let devices = unsafe { instance.enumerate_physical_devices()? };
        devices
            .into_iter()
            .filter(|&device| Self::supports_required_extensions(instance, device))
            .filter_map(|device| {
                Self::find_graphics_present_family(device, instance, surface, surface_loader)
                    .map(|family| (device, family))
            })
            .min_by_key(|&(device, _)| Self::device_type_rank(instance, device))
            .ok_or_eyre("No suitable physical device found")
    }

    fn supports_required_extensions(
        instance: &ash::Instance,
        device: vk::PhysicalDevice,
    ) -> bool {
        let supported = unsafe {
            instance
                .enumerate_device_extension_properties(device)
                .unwrap_or_default()
        };
        REQUIRED_DEVICE_EXTENSIONS.iter().all(|&required| {
            supported
                .iter()
                .any(|ext| ext.extension_name_as_c_str().is_ok_and(|name| name == required))
        })
    }

    fn find_graphics_present_family(
        device: vk::PhysicalDevice,
        instance: &ash::Instance,
        surface: vk::SurfaceKHR,
        surface_loader: &ash::khr::surface::Instance,
    ) -> Option<u32> {
        let families =
            unsafe { instance.get_physical_device_queue_family_properties(device) };
        families.iter().enumerate().position(|(index, family)| {
            let graphics = family.queue_flags.contains(vk::QueueFlags::GRAPHICS);
            let present = unsafe {
                surface_loader
                    .get_physical_device_surface_support(device, index as u32, surface)
                    .unwrap_or(false)
            };
            graphics && present
        })
        .map(|index| index as u32)
    }

    fn device_type_rank(instance: &ash::Instance, device: vk::PhysicalDevice) -> u32 {
        let props = unsafe { instance.get_physical_device_properties(device) };
        match props.device_type {
            vk::PhysicalDeviceType::DISCRETE_GPU => 0,
            vk::PhysicalDeviceType::INTEGRATED_GPU => 1,
            vk::PhysicalDeviceType::VIRTUAL_GPU => 2,
            vk::PhysicalDeviceType::CPU => 3,
            _ => 4,
        }
    }

    pub fn create_allocator(&self, ins: &RenderInstance) -> Result<Arc<Mutex<Allocator>>> {
        let allocator = Allocator::new(&AllocatorCreateDesc {
            instance: ins.instance.clone(),
            device: (*self.logical).clone(),
            physical_device: self.physical,
            debug_settings: Default::default(),
            buffer_device_address: false,
            allocation_sizes: AllocationSizes::default(),
        })?;
        Ok(Arc::new(Mutex::new(allocator)))
    }

    pub fn wait_idle(&self) -> Result<()> {
        unsafe {
            self.logical.device_wait_idle()?;
        }
        Ok(())
    }
}

impl Drop for RenderDevice {
    fn drop(&mut self) {
        unsafe {
            self.logical.destroy_device(None);
        }
    }
}
