// Synchronization primitives
//
// One semaphore pair plus an in-flight fence per frame slot.

use super::VulkanDevice;
use anyhow::Result;
use ash::vk;
use std::sync::Arc;

/// Frame synchronization - one per frame in flight
pub struct FrameSync {
    /// Signalled when the acquired swapchain image is ready to draw into
    pub image_available: vk::Semaphore,
    /// Signalled when submitted commands finish; presentation waits on it
    pub render_finished: vk::Semaphore,
    pub in_flight_fence: vk::Fence,
}

impl FrameSync {
    pub fn new(device: &Arc<VulkanDevice>) -> Result<Self> {
        let semaphore_info = vk::SemaphoreCreateInfo::builder();
        let fence_info = vk::FenceCreateInfo::builder().flags(vk::FenceCreateFlags::SIGNALED); // Start signaled

        unsafe {
            Ok(Self {
                image_available: device.device.create_semaphore(&semaphore_info, None)?,
                render_finished: device.device.create_semaphore(&semaphore_info, None)?,
                in_flight_fence: device.device.create_fence(&fence_info, None)?,
            })
        }
    }

    pub fn destroy(&self, device: &ash::Device) {
        unsafe {
            device.destroy_semaphore(self.image_available, None);
            device.destroy_semaphore(self.render_finished, None);
            device.destroy_fence(self.in_flight_fence, None);
        }
    }
}
