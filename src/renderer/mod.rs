pub mod batch;
pub mod camera;
pub mod config;
pub mod core;
pub mod destroy;
pub mod frame;
pub mod pipeline;
pub mod resources;
pub mod shader_data;
pub mod util;

use std::sync::{Arc, Mutex};
use ash::vk;
use color_eyre::Result;
use gpu_allocator::vulkan::Allocator;
use winit::window::Window;

use crate::renderer::batch::{BatchRenderer, BatchStats};
use crate::renderer::camera::Camera;
use crate::renderer::config::RenderConfig;
use crate::renderer::core::device::RenderDevice;
use crate::renderer::core::instance::RenderInstance;
use crate::renderer::core::target::{AcquiredImage, RenderTarget};
use crate::renderer::destroy::{DestroyQueue, GpuResource};
use crate::renderer::frame::FrameContext;
use crate::renderer::pipeline::QuadPipeline;
use crate::renderer::resources::texture::Texture;
use crate::renderer::resources::upload::UploadContext;
use crate::renderer::shader_data::PerFrameData;
use crate::renderer::util::transition_image_layout;

const CLEAR_COLOR: [f32; 4] = [0.05, 0.05, 0.08, 1.0];

/// Per-frame counters snapshot, taken at the end of `draw`.
#[derive(Copy, Clone, Debug, Default)]
pub struct RenderStats {
    pub scene: BatchStats,
    pub ui: BatchStats,
}

/// Owns the whole rendering stack and drives the frame loop. Quads are
/// submitted through the `scene` and `ui` layers between calls to `draw`.
pub struct Renderer {
    // Layers are `Option` only so teardown can consume them; they are
    // `Some` for the renderer's whole usable life.
    scene_layer: Option<BatchRenderer>,
    ui_layer: Option<BatchRenderer>,

    frames: FrameContext,
    pipeline: QuadPipeline,
    upload_context: UploadContext,
    white_texture: Arc<Texture>,
    destroy_queue: DestroyQueue,

    camera: Camera,
    last_stats: RenderStats,
    resize_requested: bool,

    target: RenderTarget,
    memory_allocator: Arc<Mutex<Allocator>>,
    device: RenderDevice,
    instance: RenderInstance,
}

impl Renderer {
    pub fn new(window: Arc<Window>, config: RenderConfig) -> Result<Self> {
        use raw_window_handle::HasDisplayHandle;

        let frames_in_flight = config.frames_in_flight.max(1);

        let instance = RenderInstance::new(window.display_handle()?.as_raw())?;
        let (surface, surface_loader) =
            RenderTarget::create_surface(&instance, &window)?;
        let device = RenderDevice::new(&instance, surface, &surface_loader)?;
        let memory_allocator = device.create_allocator(&instance)?;
        let target = RenderTarget::new(
            window,
            surface,
            surface_loader,
            &instance,
            &device,
            config.vsync,
        )?;

        let upload_context = UploadContext::new(
            device.graphics_queue,
            device.graphics_queue_family,
            device.logical.clone(),
        )?;
        let pipeline = QuadPipeline::new(
            target.surface_format.format,
            device.logical.clone(),
        )?;
        let frames = FrameContext::new(
            frames_in_flight,
            target.swapchain_images.len(),
            device.graphics_queue_family,
            pipeline.set_layout,
            memory_allocator.clone(),
            device.logical.clone(),
        )?;

        let white_texture = Arc::new(Texture::new_white(
            memory_allocator.clone(),
            device.logical.clone(),
            &upload_context,
        )?);
        let scene_layer = BatchRenderer::new(
            "scene",
            config.quads_per_batch,
            config.max_batches,
            white_texture.clone(),
            memory_allocator.clone(),
            device.logical.clone(),
            &upload_context,
        )?;
        let ui_layer = BatchRenderer::new(
            "ui",
            config.quads_per_batch,
            config.max_batches,
            white_texture.clone(),
            memory_allocator.clone(),
            device.logical.clone(),
            &upload_context,
        )?;

        log::info!(
            "renderer up: {} frames in flight, {} swapchain images",
            frames_in_flight,
            target.swapchain_images.len()
        );

        Ok(Self {
            scene_layer: Some(scene_layer),
            ui_layer: Some(ui_layer),
            frames,
            pipeline,
            upload_context,
            white_texture,
            destroy_queue: DestroyQueue::new(frames_in_flight),
            camera: Camera::new(),
            last_stats: RenderStats::default(),
            resize_requested: false,
            target,
            memory_allocator,
            device,
            instance,
        })
    }

    /// World-space layer, drawn first with a cleared background.
    pub fn scene(&mut self) -> &mut BatchRenderer {
        self.scene_layer.as_mut().expect("scene layer present until teardown")
    }

    /// Overlay layer, drawn on top of the scene.
    pub fn ui(&mut self) -> &mut BatchRenderer {
        self.ui_layer.as_mut().expect("ui layer present until teardown")
    }

    pub fn camera(&mut self) -> &mut Camera {
        &mut self.camera
    }

    pub fn stats(&self) -> RenderStats {
        self.last_stats
    }

    /// Decode an image into a GPU texture, blocking until the pixel upload
    /// completes.
    pub fn create_texture(&self, img: &image::DynamicImage, name: &str) -> Result<Arc<Texture>> {
        Ok(Arc::new(Texture::new_from_image(
            img,
            name,
            self.memory_allocator.clone(),
            self.device.logical.clone(),
            &self.upload_context,
        )?))
    }

    /// Hand a resource to the deferred queue; it is destroyed once every
    /// frame that may reference it has retired.
    pub fn schedule_destroy(&mut self, resource: Box<dyn GpuResource>) {
        self.destroy_queue.schedule(resource);
    }

    /// Note that the surface size changed. Equivalent to a resize
    /// notification carrying the new width and height: the swapchain rebuild
    /// on the next `draw` reads the actual extent from the surface, so the
    /// dimensions themselves are not taken here.
    pub fn request_resize(&mut self) {
        self.resize_requested = true;
    }

    /// Record, submit, and present one frame from the quads accumulated in
    /// both layers since the previous call.
    pub fn draw(&mut self) -> Result<()> {
        if self.resize_requested {
            // A minimized window reports a zero extent, which is not a legal
            // swapchain size. Keep the request pending until it reopens.
            let size = self.target.window.inner_size();
            if !drawable(size.width, size.height) {
                return Ok(());
            }
            self.recreate_swapchain()?;
        }
        let extent = self.target.swapchain_extent;
        if !drawable(extent.width, extent.height) {
            return Ok(());
        }

        // Wait for this slot's previous submission to retire.
        self.frames.begin_frame()?;

        let (image_index, suboptimal) = {
            let slot = self.frames.current();
            match self.target.acquire(slot.image_available)? {
                AcquiredImage::Image(index, suboptimal) => (index, suboptimal),
                AcquiredImage::OutOfDate => {
                    self.resize_requested = true;
                    return Ok(());
                }
            }
        };
        // A different slot may still be writing this image.
        self.frames.claim_image(image_index as usize)?;

        self.frames.update_uniforms(PerFrameData {
            viewproj: self.camera.get_viewproj_mat(extent),
        })?;

        let scene = self.scene_layer.as_mut().expect("scene layer present until teardown");
        let ui = self.ui_layer.as_mut().expect("ui layer present until teardown");

        // Trailing batches that went unused this frame are retired before
        // their vertex buffers would be rewritten.
        scene.compact(&mut self.destroy_queue);
        ui.compact(&mut self.destroy_queue);

        let scene_infos = scene.descriptor_image_infos();
        let ui_infos = ui.descriptor_image_infos();
        self.frames.update_textures(
            scene.slots_generation(),
            ui.slots_generation(),
            &scene_infos,
            &ui_infos,
        );

        let device = &self.device.logical;
        let slot = self.frames.current();
        let cmd = slot.cmd;
        let image = self.target.swapchain_images[image_index as usize];
        let view = self.target.swapchain_image_views[image_index as usize];

        unsafe {
            device.reset_command_buffer(cmd, vk::CommandBufferResetFlags::empty())?;
            let begin_info = vk::CommandBufferBeginInfo::default()
                .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
            device.begin_command_buffer(cmd, &begin_info)?;
        }

        transition_image_layout(
            device,
            cmd,
            image,
            vk::ImageLayout::UNDEFINED,
            vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        );

        unsafe {
            device.cmd_set_viewport(cmd, 0, &[vk::Viewport {
                x: 0.0,
                y: 0.0,
                width: extent.width as f32,
                height: extent.height as f32,
                min_depth: 0.0,
                max_depth: 1.0,
            }]);
            device.cmd_set_scissor(cmd, 0, &[vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent,
            }]);
        }

        // Scene pass clears, UI pass draws over its output.
        Self::begin_rendering(device, cmd, view, extent, true);
        self.pipeline.bind(cmd, slot.scene_set);
        scene.flush(cmd)?;
        unsafe { device.cmd_end_rendering(cmd) };

        Self::begin_rendering(device, cmd, view, extent, false);
        self.pipeline.bind(cmd, slot.ui_set);
        ui.flush(cmd)?;
        unsafe { device.cmd_end_rendering(cmd) };

        transition_image_layout(
            device,
            cmd,
            image,
            vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            vk::ImageLayout::PRESENT_SRC_KHR,
        );

        unsafe {
            device.end_command_buffer(cmd)?;
        }

        self.last_stats = RenderStats {
            scene: scene.stats(),
            ui: ui.stats(),
        };
        scene.reset_counters();
        ui.reset_counters();

        self.frames.prepare_submit()?;
        let slot = self.frames.current();

        let wait_semaphores = [slot.image_available];
        let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let command_buffers = [slot.cmd];
        let signal_semaphores = [slot.render_finished];
        let submit_info = vk::SubmitInfo::default()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores);
        unsafe {
            self.device.logical.queue_submit(
                self.device.graphics_queue,
                &[submit_info],
                slot.in_flight,
            )?;
        }

        let swapchains = [self.target.swapchain];
        let image_indices = [image_index];
        let present_info = vk::PresentInfoKHR::default()
            .wait_semaphores(&signal_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);
        let present_result = unsafe {
            self.target
                .swapchain_loader
                .queue_present(self.device.graphics_queue, &present_info)
        };
        match present_result {
            Ok(present_suboptimal) => {
                if present_suboptimal || suboptimal {
                    self.resize_requested = true;
                }
            }
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => {
                self.resize_requested = true;
            }
            Err(e) => return Err(e.into()),
        }

        self.frames.end_frame();
        self.destroy_queue.age_one_step();

        Ok(())
    }

    fn begin_rendering(
        device: &ash::Device,
        cmd: vk::CommandBuffer,
        view: vk::ImageView,
        extent: vk::Extent2D,
        clear: bool,
    ) {
        let mut color_attachment = vk::RenderingAttachmentInfo::default()
            .image_view(view)
            .image_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
            .load_op(if clear {
                vk::AttachmentLoadOp::CLEAR
            } else {
                vk::AttachmentLoadOp::LOAD
            })
            .store_op(vk::AttachmentStoreOp::STORE);
        if clear {
            color_attachment = color_attachment.clear_value(vk::ClearValue {
                color: vk::ClearColorValue { float32: CLEAR_COLOR },
            });
        }

        let color_attachments = [color_attachment];
        let rendering_info = vk::RenderingInfo::default()
            .render_area(vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent,
            })
            .layer_count(1)
            .color_attachments(&color_attachments);
        unsafe {
            device.cmd_begin_rendering(cmd, &rendering_info);
        }
    }

    /// Rebuild everything that depends on the swapchain. Pipelines use
    /// dynamic viewport state and survive unchanged.
    fn recreate_swapchain(&mut self) -> Result<()> {
        self.device.wait_idle()?;
        self.target.recreate(&self.device)?;
        self.frames.reset_images(self.target.swapchain_images.len());
        self.resize_requested = false;
        Ok(())
    }
}

impl Drop for Renderer {
    fn drop(&mut self) {
        if let Err(e) = self.device.wait_idle() {
            log::error!("device wait on teardown failed: {e}");
        }
        if let Some(layer) = self.scene_layer.take() {
            layer.close(&mut self.destroy_queue);
        }
        if let Some(layer) = self.ui_layer.take() {
            layer.close(&mut self.destroy_queue);
        }
        self.destroy_queue.drain_all();
    }
}

/// Whether a surface of these dimensions can back a swapchain.
fn drawable(width: u32, height: u32) -> bool {
    width > 0 && height > 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_sized_surfaces_are_not_drawable() {
        // Minimized windows report 0x0; rebuilding a swapchain there is
        // invalid, so the frame loop has to sit those sizes out.
        assert!(!drawable(0, 0));
        assert!(!drawable(0, 720));
        assert!(!drawable(1280, 0));
        assert!(drawable(1280, 720));
        assert!(drawable(1, 1));
    }
}
