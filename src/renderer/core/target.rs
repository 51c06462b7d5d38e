use std::sync::Arc;
use ash::prelude::VkResult;
use ash::vk;
use color_eyre::eyre::OptionExt;
use color_eyre::Result;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use winit::window::Window;

use crate::renderer::core::device::RenderDevice;
use crate::renderer::core::instance::RenderInstance;

/// Result of a swapchain image acquisition.
pub enum AcquiredImage {
    /// Image index plus whether the swapchain is suboptimal for the surface.
    Image(u32, bool),
    /// The swapchain no longer matches the surface; rebuild before drawing.
    OutOfDate,
}

/// Presentation target of the renderer, encapsulating the window, surface,
/// and swapchain
pub struct RenderTarget {
    pub window: Arc<Window>,

    pub surface: vk::SurfaceKHR,
    pub surface_loader: ash::khr::surface::Instance,
    pub surface_format: vk::SurfaceFormatKHR,
    pub present_mode: vk::PresentModeKHR,

    pub swapchain: vk::SwapchainKHR,
    pub swapchain_loader: ash::khr::swapchain::Device,
    pub swapchain_images: Vec<vk::Image>,
    pub swapchain_image_views: Vec<vk::ImageView>,
    pub swapchain_extent: vk::Extent2D,

    device: Arc<ash::Device>,
}

impl RenderTarget {
    pub fn create_surface(
        ins: &RenderInstance,
        window: &Window,
    ) -> Result<(vk::SurfaceKHR, ash::khr::surface::Instance)> {
        let surface = unsafe {
            ash_window::create_surface(
                &ins.entry,
                &ins.instance,
                window.display_handle()?.as_raw(),
                window.window_handle()?.as_raw(),
                None,
            )?
        };
        let surface_loader = ash::khr::surface::Instance::new(&ins.entry, &ins.instance);
        Ok((surface, surface_loader))
    }

    pub fn new(
        window: Arc<Window>,
        surface: vk::SurfaceKHR,
        surface_loader: ash::khr::surface::Instance,
        ins: &RenderInstance,
        dev: &RenderDevice,
        vsync: bool,
    ) -> Result<Self> {
        let surface_formats = unsafe {
            surface_loader
                .get_physical_device_surface_formats(dev.physical, surface)?
        };
        let surface_format = *surface_formats
            .iter()
            .find(|format| {
                format.format == vk::Format::B8G8R8A8_SRGB
                    && format.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
            })
            .ok_or_eyre("No suitable surface format found")?;

        let surface_present_modes = unsafe {
            surface_loader
                .get_physical_device_surface_present_modes(dev.physical, surface)?
        };
        // FIFO is the only mode guaranteed to exist and the one that vsyncs.
        let present_mode = if vsync {
            vk::PresentModeKHR::FIFO
        } else {
            *surface_present_modes
                .iter()
                .find(|mode| **mode == vk::PresentModeKHR::MAILBOX)
                .unwrap_or(&vk::PresentModeKHR::FIFO)
        };

        let swapchain_loader = ash::khr::swapchain::Device::new(
            &ins.instance, &dev.logical);

        let (swapchain, swapchain_extent) = Self::create_swapchain(
            surface,
            &surface_loader,
            &surface_format,
            present_mode,
            &swapchain_loader,
            &window,
            dev,
        )?;

        let (swapchain_images, swapchain_image_views) = Self::get_swapchain_images(
            swapchain,
            &swapchain_loader,
            surface_format.format,
            &dev.logical,
        )?;

        Ok(Self {
            window,
            surface,
            surface_loader,
            surface_format,
            present_mode,
            swapchain,
            swapchain_loader,
            swapchain_images,
            swapchain_image_views,
            swapchain_extent,
            device: dev.logical.clone(),
        })
    }

    fn create_swapchain(
        surface: vk::SurfaceKHR,
        surface_loader: &ash::khr::surface::Instance,
        surface_format: &vk::SurfaceFormatKHR,
        present_mode: vk::PresentModeKHR,
        swapchain_loader: &ash::khr::swapchain::Device,
        window: &Window,
        dev: &RenderDevice,
    ) -> Result<(vk::SwapchainKHR, vk::Extent2D)> {
        let surface_capabilities = unsafe {
            surface_loader
                .get_physical_device_surface_capabilities(dev.physical, surface)?
        };

        let image_extent = {
            if surface_capabilities.current_extent.width != u32::MAX {
                surface_capabilities.current_extent
            } else {
                let window_size = window.inner_size();
                vk::Extent2D {
                    width: window_size.width.clamp(
                        surface_capabilities.min_image_extent.width,
                        surface_capabilities.max_image_extent.width,
                    ),
                    height: window_size.height.clamp(
                        surface_capabilities.min_image_extent.height,
                        surface_capabilities.max_image_extent.height,
                    ),
                }
            }
        };

        let min_image_count = {
            let min = surface_capabilities.min_image_count;
            let max = surface_capabilities.max_image_count;
            // One above the minimum so acquire rarely blocks on the driver.
            if max > 0 && min + 1 > max {
                max
            } else {
                min + 1
            }
        };
        let pre_transform = if surface_capabilities
            .supported_transforms
            .contains(vk::SurfaceTransformFlagsKHR::IDENTITY)
        {
            vk::SurfaceTransformFlagsKHR::IDENTITY
        } else {
            surface_capabilities.current_transform
        };

        let swapchain_info = vk::SwapchainCreateInfoKHR::default()
            .surface(surface)
            .min_image_count(min_image_count)
            .image_format(surface_format.format)
            .image_color_space(surface_format.color_space)
            .image_extent(image_extent)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .image_sharing_mode(vk::SharingMode::EXCLUSIVE)
            .pre_transform(pre_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(present_mode)
            .clipped(true)
            .image_array_layers(1);

        let swapchain = unsafe {
            swapchain_loader.create_swapchain(&swapchain_info, None)?
        };

        Ok((swapchain, image_extent))
    }

    fn get_swapchain_images(
        swapchain: vk::SwapchainKHR,
        swapchain_loader: &ash::khr::swapchain::Device,
        swapchain_image_format: vk::Format,
        device: &ash::Device,
    ) -> Result<(Vec<vk::Image>, Vec<vk::ImageView>)> {
        let swapchain_images = unsafe {
            swapchain_loader.get_swapchain_images(swapchain)?
        };
        let swapchain_image_views = swapchain_images
            .iter()
            .map(|image| {
                let view_info = vk::ImageViewCreateInfo::default()
                    .view_type(vk::ImageViewType::TYPE_2D)
                    .format(swapchain_image_format)
                    .subresource_range(vk::ImageSubresourceRange {
                        aspect_mask: vk::ImageAspectFlags::COLOR,
                        base_mip_level: 0,
                        level_count: 1,
                        base_array_layer: 0,
                        layer_count: 1,
                    })
                    .image(*image);
                unsafe {
                    device.create_image_view(&view_info, None)
                }
            })
            .collect::<VkResult<Vec<vk::ImageView>>>()?;

        Ok((
            swapchain_images,
            swapchain_image_views,
        ))
    }

    /// Tear down and rebuild the swapchain-dependent objects at the current
    /// window extent. Only legal once the device is idle.
    pub fn recreate(&mut self, dev: &RenderDevice) -> Result<()> {
        self.destroy_swapchain();

        let (swapchain, swapchain_extent) = Self::create_swapchain(
            self.surface,
            &self.surface_loader,
            &self.surface_format,
            self.present_mode,
            &self.swapchain_loader,
            &self.window,
            dev,
        )?;
        let (swapchain_images, swapchain_image_views) = Self::get_swapchain_images(
            swapchain,
            &self.swapchain_loader,
            self.surface_format.format,
            &self.device,
        )?;

        self.swapchain = swapchain;
        self.swapchain_extent = swapchain_extent;
        self.swapchain_images = swapchain_images;
        self.swapchain_image_views = swapchain_image_views;

        log::info!(
            "swapchain recreated at {}x{}",
            swapchain_extent.width,
            swapchain_extent.height
        );
        Ok(())
    }

    /// Acquire the next presentable image, signaling `semaphore` when the
    /// display subsystem releases it.
    pub fn acquire(&self, semaphore: vk::Semaphore) -> Result<AcquiredImage> {
        let result = unsafe {
            self.swapchain_loader.acquire_next_image(
                self.swapchain,
                u64::MAX,
                semaphore,
                vk::Fence::null(),
            )
        };
        match result {
            Ok((index, suboptimal)) => Ok(AcquiredImage::Image(index, suboptimal)),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(AcquiredImage::OutOfDate),
            Err(e) => Err(e.into()),
        }
    }

    fn destroy_swapchain(&mut self) {
        unsafe {
            for view in self.swapchain_image_views.drain(..) {
                self.device.destroy_image_view(view, None);
            }
            self.swapchain_loader.destroy_swapchain(self.swapchain, None);
        }
        self.swapchain = vk::SwapchainKHR::null();
    }
}

impl Drop for RenderTarget {
    fn drop(&mut self) {
        self.destroy_swapchain();
        unsafe {
            self.surface_loader.destroy_surface(self.surface, None);
        }
    }
}
