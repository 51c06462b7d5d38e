use ash::vk;

/// Records a full-image layout transition using a synchronization2 barrier.
/// Stage and access masks are the conservative ALL_COMMANDS / MEMORY ones;
/// fine-grained masks are only worth it on hot per-draw paths.
pub fn transition_image_layout(
    device: &ash::Device,
    cmd: vk::CommandBuffer,
    image: vk::Image,
    old_layout: vk::ImageLayout,
    new_layout: vk::ImageLayout,
) {
    let barrier = vk::ImageMemoryBarrier2::default()
        .src_stage_mask(vk::PipelineStageFlags2::ALL_COMMANDS)
        .src_access_mask(vk::AccessFlags2::MEMORY_WRITE)
        .dst_stage_mask(vk::PipelineStageFlags2::ALL_COMMANDS)
        .dst_access_mask(vk::AccessFlags2::MEMORY_WRITE | vk::AccessFlags2::MEMORY_READ)
        .old_layout(old_layout)
        .new_layout(new_layout)
        .subresource_range(vk::ImageSubresourceRange {
            aspect_mask: vk::ImageAspectFlags::COLOR,
            base_mip_level: 0,
            level_count: vk::REMAINING_MIP_LEVELS,
            base_array_layer: 0,
            layer_count: vk::REMAINING_ARRAY_LAYERS,
        })
        .image(image);

    let barriers = [barrier];
    let dependency_info = vk::DependencyInfo::default()
        .image_memory_barriers(&barriers);
    unsafe {
        device.cmd_pipeline_barrier2(cmd, &dependency_info);
    }
}
