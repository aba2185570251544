// Command buffer helpers
//
// The allocate/begin/end/submit boilerplate shared by everything that
// records commands, plus the image layout transition used at init time.

use anyhow::{Context, Result};
use ash::vk;

/// Create a command pool for the given queue family.
///
/// RESET allows individual buffer reset; clear commands are re-recorded on
/// every swapchain rebuild.
pub fn create_command_pool(device: &ash::Device, queue_family: u32) -> Result<vk::CommandPool> {
    let pool_info = vk::CommandPoolCreateInfo::builder()
        .queue_family_index(queue_family)
        .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER);

    let pool = unsafe { device.create_command_pool(&pool_info, None) }
        .context("Failed to create command pool")?;
    Ok(pool)
}

/// Allocate primary command buffers from a pool.
pub fn allocate_command_buffers(
    device: &ash::Device,
    pool: vk::CommandPool,
    count: u32,
) -> Result<Vec<vk::CommandBuffer>> {
    let alloc_info = vk::CommandBufferAllocateInfo::builder()
        .command_pool(pool)
        .level(vk::CommandBufferLevel::PRIMARY)
        .command_buffer_count(count);

    let buffers = unsafe { device.allocate_command_buffers(&alloc_info) }
        .context("Failed to allocate command buffers")?;
    Ok(buffers)
}

/// Begin recording. Pass `vk::CommandBufferUsageFlags::empty()` for the
/// default begin info.
pub fn begin_command_buffer(
    device: &ash::Device,
    cmd: vk::CommandBuffer,
    usage: vk::CommandBufferUsageFlags,
) -> Result<()> {
    let begin_info = vk::CommandBufferBeginInfo::builder().flags(usage);
    unsafe { device.begin_command_buffer(cmd, &begin_info) }
        .context("Failed to begin command buffer")?;
    Ok(())
}

/// End recording.
pub fn end_command_buffer(device: &ash::Device, cmd: vk::CommandBuffer) -> Result<()> {
    unsafe { device.end_command_buffer(cmd) }.context("Failed to end command buffer")?;
    Ok(())
}

/// Submit a batch of command buffers to a queue.
///
/// `wait_semaphores` and `wait_stages` must be the same length. Pass
/// `vk::Fence::null()` when nothing needs to observe completion.
pub fn submit_command_buffers(
    device: &ash::Device,
    queue: vk::Queue,
    command_buffers: &[vk::CommandBuffer],
    wait_semaphores: &[vk::Semaphore],
    wait_stages: &[vk::PipelineStageFlags],
    signal_semaphores: &[vk::Semaphore],
    fence: vk::Fence,
) -> Result<()> {
    let submit_info = vk::SubmitInfo::builder()
        .wait_semaphores(wait_semaphores)
        .wait_dst_stage_mask(wait_stages)
        .command_buffers(command_buffers)
        .signal_semaphores(signal_semaphores);

    unsafe { device.queue_submit(queue, &[submit_info.build()], fence) }
        .context("Failed to submit command buffers")?;
    Ok(())
}

/// Submit a single command buffer and block until the GPU finishes it.
///
/// Used for one-shot work at init, e.g. the depth image layout transition.
pub fn submit_and_wait(
    device: &ash::Device,
    queue: vk::Queue,
    cmd: vk::CommandBuffer,
) -> Result<()> {
    let fence_info = vk::FenceCreateInfo::builder();
    let fence = unsafe { device.create_fence(&fence_info, None) }
        .context("Failed to create submit fence")?;

    let result = submit_command_buffers(device, queue, &[cmd], &[], &[], &[], fence)
        .and_then(|_| {
            unsafe { device.wait_for_fences(&[fence], true, u64::MAX) }
                .context("Failed waiting for submit fence")
        });

    unsafe { device.destroy_fence(fence, None) };
    result
}

/// Record a pipeline barrier transitioning `image` between layouts.
///
/// The destination access mask is derived from the new layout; the source
/// access mask describes whatever last touched the image.
#[allow(clippy::too_many_arguments)]
pub fn set_image_layout(
    device: &ash::Device,
    cmd: vk::CommandBuffer,
    image: vk::Image,
    aspect_mask: vk::ImageAspectFlags,
    old_layout: vk::ImageLayout,
    new_layout: vk::ImageLayout,
    src_access: vk::AccessFlags,
    src_stage: vk::PipelineStageFlags,
    dst_stage: vk::PipelineStageFlags,
) {
    let barrier = vk::ImageMemoryBarrier::builder()
        .src_access_mask(src_access)
        .dst_access_mask(dst_access_for(new_layout))
        .old_layout(old_layout)
        .new_layout(new_layout)
        .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .image(image)
        .subresource_range(vk::ImageSubresourceRange {
            aspect_mask,
            base_mip_level: 0,
            level_count: 1,
            base_array_layer: 0,
            layer_count: 1,
        })
        .build();

    unsafe {
        device.cmd_pipeline_barrier(
            cmd,
            src_stage,
            dst_stage,
            vk::DependencyFlags::empty(),
            &[],
            &[],
            &[barrier],
        );
    }
}

/// Access mask an image needs once it arrives in `layout`.
fn dst_access_for(layout: vk::ImageLayout) -> vk::AccessFlags {
    match layout {
        vk::ImageLayout::TRANSFER_DST_OPTIMAL => vk::AccessFlags::TRANSFER_WRITE,
        vk::ImageLayout::TRANSFER_SRC_OPTIMAL => vk::AccessFlags::TRANSFER_READ,
        vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL => vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
        vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL => {
            vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE
        }
        vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL => vk::AccessFlags::SHADER_READ,
        vk::ImageLayout::PRESENT_SRC_KHR => vk::AccessFlags::MEMORY_READ,
        _ => vk::AccessFlags::empty(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transfer_layouts_map_to_transfer_access() {
        assert_eq!(
            dst_access_for(vk::ImageLayout::TRANSFER_DST_OPTIMAL),
            vk::AccessFlags::TRANSFER_WRITE
        );
        assert_eq!(
            dst_access_for(vk::ImageLayout::TRANSFER_SRC_OPTIMAL),
            vk::AccessFlags::TRANSFER_READ
        );
    }

    #[test]
    fn attachment_layouts_map_to_attachment_writes() {
        assert_eq!(
            dst_access_for(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL),
            vk::AccessFlags::COLOR_ATTACHMENT_WRITE
        );
        assert_eq!(
            dst_access_for(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL),
            vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE
        );
    }

    #[test]
    fn present_layout_maps_to_memory_read() {
        assert_eq!(
            dst_access_for(vk::ImageLayout::PRESENT_SRC_KHR),
            vk::AccessFlags::MEMORY_READ
        );
    }

    #[test]
    fn unknown_layouts_need_no_access() {
        assert_eq!(
            dst_access_for(vk::ImageLayout::UNDEFINED),
            vk::AccessFlags::empty()
        );
        assert_eq!(
            dst_access_for(vk::ImageLayout::GENERAL),
            vk::AccessFlags::empty()
        );
    }
}
