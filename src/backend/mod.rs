// Backend module - Vulkan abstraction layer
//
// Thin wrappers around ash. Each wrapper holds the device Arc and destroys
// its own handles, so teardown order follows ownership.

pub mod buffer;
pub mod commands;
pub mod device;
pub mod pipeline;
pub mod shader;
pub mod swapchain;
pub mod sync;
pub mod texture;

pub use device::VulkanDevice;
pub use swapchain::Swapchain;
