// Backend module - thin wrappers over the Vulkan API
//
// Each submodule forwards almost directly to a handful of native calls.

pub mod command;
pub mod depth;
pub mod device;
pub mod layers;
pub mod swapchain;
pub mod sync;

pub use depth::DepthBuffer;
pub use device::VulkanDevice;
pub use swapchain::Swapchain;
