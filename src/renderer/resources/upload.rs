use std::sync::Arc;
use ash::vk;
use color_eyre::eyre::Result;

/// One-shot command submission used for staging uploads outside the frame
/// loop (index buffers, texture pixels). Each submission records into a
/// fresh command buffer from a transient pool and blocks on a fence until
/// the GPU is done, so callers can free their staging memory on return.
pub struct UploadContext {
    fence: vk::Fence,
    command_pool: vk::CommandPool,

    queue: vk::Queue,
    device: Arc<ash::Device>,
}

impl UploadContext {
    pub fn new(
        queue: vk::Queue,
        queue_family_index: u32,
        device: Arc<ash::Device>,
    ) -> Result<Self> {
        let fence = unsafe { device.create_fence(&vk::FenceCreateInfo::default(), None)? };

        let pool_info = vk::CommandPoolCreateInfo::default()
            .queue_family_index(queue_family_index)
            .flags(vk::CommandPoolCreateFlags::TRANSIENT);
        let command_pool = unsafe { device.create_command_pool(&pool_info, None)? };

        Ok(Self {
            fence,
            command_pool,
            queue,
            device,
        })
    }

    /// Record commands through `func`, submit them, and wait for retirement.
    /// Not part of the frame loop synchronization.
    pub fn immediate_submit<F>(&self, func: F) -> Result<()>
    where
        F: FnOnce(vk::CommandBuffer, &ash::Device) -> Result<()>,
    {
        let alloc_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(self.command_pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);
        let cmd = unsafe { self.device.allocate_command_buffers(&alloc_info)?[0] };

        let result = self.record_and_submit(cmd, func);
        unsafe {
            self.device.free_command_buffers(self.command_pool, &[cmd]);
        }
        result
    }

    fn record_and_submit<F>(&self, cmd: vk::CommandBuffer, func: F) -> Result<()>
    where
        F: FnOnce(vk::CommandBuffer, &ash::Device) -> Result<()>,
    {
        let begin_info = vk::CommandBufferBeginInfo::default()
            .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        unsafe {
            self.device.begin_command_buffer(cmd, &begin_info)?;
        }

        func(cmd, &self.device)?;

        let command_buffers = [cmd];
        let submit = vk::SubmitInfo::default().command_buffers(&command_buffers);
        unsafe {
            self.device.end_command_buffer(cmd)?;
            self.device.queue_submit(self.queue, &[submit], self.fence)?;
            self.device.wait_for_fences(&[self.fence], true, u64::MAX)?;
            self.device.reset_fences(&[self.fence])?;
        }

        Ok(())
    }
}

impl Drop for UploadContext {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_command_pool(self.command_pool, None);
            self.device.destroy_fence(self.fence, None);
        }
    }
}
