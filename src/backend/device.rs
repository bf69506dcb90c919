// Vulkan Device - Core GPU interface
//
// Responsibilities:
// - Instance creation with the window system's extensions and validation layers
// - Presentation surface for the window
// - Physical device selection (graphics + present support, prefer discrete GPU)
// - Logical device + queue creation
// - Memory allocator setup

use anyhow::{Context, Result};
use ash::extensions::{ext::DebugUtils, khr};
use ash::{vk, Entry};
use gpu_allocator::vulkan::{Allocator, AllocatorCreateDesc};
use parking_lot::Mutex;
use raw_window_handle::{HasRawDisplayHandle, HasRawWindowHandle};
use std::ffi::{CStr, CString};
use std::mem::ManuallyDrop;
use std::sync::Arc;
use winit::window::Window;

const VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";

/// Queue families used for drawing and presenting.
///
/// Some GPUs expose a family that can draw but not present (or the reverse).
/// It is rare, but both indices are tracked and may differ.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueFamilyIndices {
    pub graphics: u32,
    pub present: u32,
}

impl QueueFamilyIndices {
    /// Prefer a single family that can do both; otherwise take the first
    /// graphics family and the first present family.
    pub fn find(
        families: &[vk::QueueFamilyProperties],
        mut supports_present: impl FnMut(u32) -> bool,
    ) -> Option<Self> {
        let mut graphics = None;
        let mut present = None;

        for (index, family) in families.iter().enumerate() {
            let index = index as u32;
            if family.queue_count == 0 {
                continue;
            }

            let can_draw = family.queue_flags.contains(vk::QueueFlags::GRAPHICS);
            let can_present = supports_present(index);

            if can_draw && can_present {
                return Some(Self { graphics: index, present: index });
            }
            if can_draw && graphics.is_none() {
                graphics = Some(index);
            }
            if can_present && present.is_none() {
                present = Some(index);
            }
        }

        Some(Self {
            graphics: graphics?,
            present: present?,
        })
    }

    pub fn is_shared(&self) -> bool {
        self.graphics == self.present
    }

    /// Distinct family indices, for queue creation and concurrent sharing
    pub fn unique(&self) -> Vec<u32> {
        if self.is_shared() {
            vec![self.graphics]
        } else {
            vec![self.graphics, self.present]
        }
    }
}

/// Rank physical devices, higher wins
pub fn device_type_score(device_type: vk::PhysicalDeviceType) -> u32 {
    match device_type {
        vk::PhysicalDeviceType::DISCRETE_GPU => 1000,
        vk::PhysicalDeviceType::INTEGRATED_GPU => 100,
        vk::PhysicalDeviceType::VIRTUAL_GPU => 10,
        _ => 1,
    }
}

/// Vulkan device wrapper with automatic cleanup
pub struct VulkanDevice {
    // Dropped by hand before the device it was created from
    pub allocator: ManuallyDrop<Mutex<Allocator>>,
    pub device: ash::Device,
    pub physical_device: vk::PhysicalDevice,
    pub instance: ash::Instance,
    _entry: Entry,

    // Presentation surface for the window this device was created for
    pub surface: vk::SurfaceKHR,
    pub surface_loader: khr::Surface,

    pub queue_families: QueueFamilyIndices,
    pub graphics_queue: vk::Queue,
    pub present_queue: vk::Queue,

    debug_utils: Option<(DebugUtils, vk::DebugUtilsMessengerEXT)>,
}

impl VulkanDevice {
    /// Create the instance, surface and logical device for `window`.
    ///
    /// # Arguments
    /// * `app_name` - Application name reported to the driver
    /// * `enable_validation` - Enable Vulkan validation layers
    /// * `window` - Window the surface is created for
    pub fn new(app_name: &str, enable_validation: bool, window: &Window) -> Result<Arc<Self>> {
        log::info!("Creating Vulkan device: {}", app_name);

        let entry = unsafe { Entry::load() }
            .context("Failed to load Vulkan library. Is Vulkan installed?")?;

        log_available_extensions(&entry);

        let display_handle = window.raw_display_handle();
        let window_handle = window.raw_window_handle();

        let enable_validation = enable_validation && validation_layer_available(&entry);
        let instance = Self::create_instance(&entry, app_name, enable_validation, display_handle)?;

        let debug_utils = if enable_validation {
            Some(Self::setup_debug_messenger(&entry, &instance)?)
        } else {
            None
        };

        let surface = unsafe {
            ash_window::create_surface(&entry, &instance, display_handle, window_handle, None)
        }
        .context("Failed to create window surface")?;
        let surface_loader = khr::Surface::new(&entry, &instance);

        let (physical_device, queue_families) =
            Self::pick_physical_device(&instance, &surface_loader, surface)?;

        let (device, graphics_queue, present_queue) =
            Self::create_logical_device(&instance, physical_device, queue_families)?;

        let properties = unsafe { instance.get_physical_device_properties(physical_device) };

        log::info!(
            "Selected GPU: {}",
            unsafe { CStr::from_ptr(properties.device_name.as_ptr()) }.to_string_lossy()
        );
        log::info!(
            "API Version: {}.{}.{}",
            vk::api_version_major(properties.api_version),
            vk::api_version_minor(properties.api_version),
            vk::api_version_patch(properties.api_version)
        );
        log::info!(
            "Queue families: graphics={} present={}",
            queue_families.graphics,
            queue_families.present
        );

        let allocator = Self::create_allocator(&instance, physical_device, &device)?;

        Ok(Arc::new(Self {
            allocator: ManuallyDrop::new(Mutex::new(allocator)),
            device,
            physical_device,
            instance,
            _entry: entry,
            surface,
            surface_loader,
            queue_families,
            graphics_queue,
            present_queue,
            debug_utils,
        }))
    }

    fn create_instance(
        entry: &Entry,
        app_name: &str,
        enable_validation: bool,
        display_handle: raw_window_handle::RawDisplayHandle,
    ) -> Result<ash::Instance> {
        let app_name_cstr = CString::new(app_name)?;
        let engine_name = CString::new("No Engine")?;

        let app_info = vk::ApplicationInfo::builder()
            .application_name(&app_name_cstr)
            .application_version(vk::make_api_version(0, 1, 0, 0))
            .engine_name(&engine_name)
            .engine_version(vk::make_api_version(0, 1, 0, 0))
            .api_version(vk::API_VERSION_1_3);

        // Whatever the window system needs for surfaces on this platform
        let mut extensions = ash_window::enumerate_required_extensions(display_handle)
            .context("Failed to query window system extensions")?
            .to_vec();

        if enable_validation {
            extensions.push(DebugUtils::name().as_ptr());
        }

        for &name in &extensions {
            log::debug!("Instance extension: {}", unsafe { CStr::from_ptr(name) }.to_string_lossy());
        }

        let layer_names = if enable_validation {
            vec![VALIDATION_LAYER.as_ptr()]
        } else {
            vec![]
        };

        let create_info = vk::InstanceCreateInfo::builder()
            .application_info(&app_info)
            .enabled_extension_names(&extensions)
            .enabled_layer_names(&layer_names);

        let instance = unsafe { entry.create_instance(&create_info, None) }
            .context("Failed to create Vulkan instance")?;

        log::info!("Created Vulkan instance (validation: {})", enable_validation);
        Ok(instance)
    }

    fn setup_debug_messenger(
        entry: &Entry,
        instance: &ash::Instance,
    ) -> Result<(DebugUtils, vk::DebugUtilsMessengerEXT)> {
        let debug_utils = DebugUtils::new(entry, instance);

        let create_info = vk::DebugUtilsMessengerCreateInfoEXT::builder()
            .message_severity(
                vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                    | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
            )
            .message_type(
                vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                    | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                    | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
            )
            .pfn_user_callback(Some(debug_callback));

        let messenger = unsafe { debug_utils.create_debug_utils_messenger(&create_info, None) }
            .context("Failed to create debug messenger")?;

        Ok((debug_utils, messenger))
    }

    fn pick_physical_device(
        instance: &ash::Instance,
        surface_loader: &khr::Surface,
        surface: vk::SurfaceKHR,
    ) -> Result<(vk::PhysicalDevice, QueueFamilyIndices)> {
        let devices = unsafe { instance.enumerate_physical_devices() }?;

        if devices.is_empty() {
            anyhow::bail!("No Vulkan-capable GPU found");
        }

        let mut best_device = None;
        let mut best_score = 0;

        for device in devices {
            let props = unsafe { instance.get_physical_device_properties(device) };
            let name = unsafe { CStr::from_ptr(props.device_name.as_ptr()) }.to_string_lossy();

            let queue_families =
                unsafe { instance.get_physical_device_queue_family_properties(device) };

            let indices = QueueFamilyIndices::find(&queue_families, |index| unsafe {
                surface_loader
                    .get_physical_device_surface_support(device, index, surface)
                    .unwrap_or(false)
            });

            let Some(indices) = indices else {
                log::debug!("Skipping {}: no graphics/present queue", name);
                continue;
            };

            if !Self::supports_swapchain(instance, device, surface_loader, surface) {
                log::debug!("Skipping {}: cannot present to this surface", name);
                continue;
            }

            let score = device_type_score(props.device_type);
            if score > best_score {
                best_score = score;
                best_device = Some((device, indices));
            }
        }

        best_device.ok_or_else(|| anyhow::anyhow!("No suitable GPU found"))
    }

    fn supports_swapchain(
        instance: &ash::Instance,
        device: vk::PhysicalDevice,
        surface_loader: &khr::Surface,
        surface: vk::SurfaceKHR,
    ) -> bool {
        let extensions = unsafe { instance.enumerate_device_extension_properties(device) }
            .unwrap_or_default();
        if !lists_extension(&extensions, khr::Swapchain::name()) {
            return false;
        }

        let formats = unsafe { surface_loader.get_physical_device_surface_formats(device, surface) }
            .unwrap_or_default();
        let modes =
            unsafe { surface_loader.get_physical_device_surface_present_modes(device, surface) }
                .unwrap_or_default();

        !formats.is_empty() && !modes.is_empty()
    }

    fn create_logical_device(
        instance: &ash::Instance,
        physical_device: vk::PhysicalDevice,
        families: QueueFamilyIndices,
    ) -> Result<(ash::Device, vk::Queue, vk::Queue)> {
        let queue_priorities = [1.0];
        let queue_create_infos: Vec<_> = families
            .unique()
            .into_iter()
            .map(|family| {
                vk::DeviceQueueCreateInfo::builder()
                    .queue_family_index(family)
                    .queue_priorities(&queue_priorities)
                    .build()
            })
            .collect();

        let extensions = [khr::Swapchain::name().as_ptr()];
        let features = vk::PhysicalDeviceFeatures::default();

        let create_info = vk::DeviceCreateInfo::builder()
            .queue_create_infos(&queue_create_infos)
            .enabled_extension_names(&extensions)
            .enabled_features(&features);

        let device = unsafe { instance.create_device(physical_device, &create_info, None) }
            .context("Failed to create logical device")?;

        let graphics_queue = unsafe { device.get_device_queue(families.graphics, 0) };
        let present_queue = unsafe { device.get_device_queue(families.present, 0) };

        Ok((device, graphics_queue, present_queue))
    }

    fn create_allocator(
        instance: &ash::Instance,
        physical_device: vk::PhysicalDevice,
        device: &ash::Device,
    ) -> Result<Allocator> {
        let allocator = Allocator::new(&AllocatorCreateDesc {
            instance: instance.clone(),
            device: device.clone(),
            physical_device,
            debug_settings: Default::default(),
            buffer_device_address: false,
            allocation_sizes: Default::default(),
        })
        .context("Failed to create GPU allocator")?;

        Ok(allocator)
    }

    /// Wait for device to be idle (e.g., before cleanup)
    pub fn wait_idle(&self) -> Result<()> {
        unsafe { self.device.device_wait_idle() }?;
        Ok(())
    }
}

impl Drop for VulkanDevice {
    fn drop(&mut self) {
        log::info!("Destroying Vulkan device...");

        let _ = self.wait_idle();

        // Cleanup in reverse order
        unsafe {
            ManuallyDrop::drop(&mut self.allocator);
            self.device.destroy_device(None);
            self.surface_loader.destroy_surface(self.surface, None);

            if let Some((debug_utils, messenger)) = self.debug_utils.take() {
                debug_utils.destroy_debug_utils_messenger(messenger, None);
            }

            self.instance.destroy_instance(None);
        }
    }
}

fn validation_layer_available(entry: &Entry) -> bool {
    let layers = entry.enumerate_instance_layer_properties().unwrap_or_default();
    let found = layers
        .iter()
        .any(|layer| unsafe { CStr::from_ptr(layer.layer_name.as_ptr()) } == VALIDATION_LAYER);

    if !found {
        log::warn!("Validation layer requested but not installed, continuing without it");
    }
    found
}

pub fn lists_extension(extensions: &[vk::ExtensionProperties], wanted: &CStr) -> bool {
    extensions.iter().any(|ext| {
        let name = unsafe { CStr::from_ptr(ext.extension_name.as_ptr()) };
        name == wanted
    })
}

fn log_available_extensions(entry: &Entry) {
    if !log::log_enabled!(log::Level::Debug) {
        return;
    }

    let extensions = entry
        .enumerate_instance_extension_properties(None)
        .unwrap_or_default();

    let names: Vec<_> = extensions
        .iter()
        .map(|ext| unsafe { CStr::from_ptr(ext.extension_name.as_ptr()) }.to_string_lossy())
        .collect();

    log::debug!("Available instance extensions ({}): {}", names.len(), names.join(" "));
}

// Debug callback for validation layers
unsafe extern "system" fn debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    _message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    p_callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _p_user_data: *mut std::ffi::c_void,
) -> vk::Bool32 {
    let message = CStr::from_ptr((*p_callback_data).p_message);

    match message_severity {
        vk::DebugUtilsMessageSeverityFlagsEXT::ERROR => {
            log::error!("[Vulkan] {}", message.to_string_lossy());
        }
        vk::DebugUtilsMessageSeverityFlagsEXT::WARNING => {
            log::warn!("[Vulkan] {}", message.to_string_lossy());
        }
        _ => {
            log::debug!("[Vulkan] {}", message.to_string_lossy());
        }
    }

    vk::FALSE
}

#[cfg(test)]
mod tests {
    use super::*;

    fn family(flags: vk::QueueFlags) -> vk::QueueFamilyProperties {
        vk::QueueFamilyProperties {
            queue_flags: flags,
            queue_count: 1,
            ..Default::default()
        }
    }

    #[test]
    fn prefers_family_with_both_capabilities() {
        let families = [
            family(vk::QueueFlags::GRAPHICS),
            family(vk::QueueFlags::COMPUTE),
            family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE),
        ];
        let indices = QueueFamilyIndices::find(&families, |i| i != 0).unwrap();
        assert_eq!(indices, QueueFamilyIndices { graphics: 2, present: 2 });
        assert!(indices.is_shared());
        assert_eq!(indices.unique(), vec![2]);
    }

    #[test]
    fn falls_back_to_separate_families() {
        let families = [family(vk::QueueFlags::GRAPHICS), family(vk::QueueFlags::TRANSFER)];
        let indices = QueueFamilyIndices::find(&families, |i| i == 1).unwrap();
        assert_eq!(indices, QueueFamilyIndices { graphics: 0, present: 1 });
        assert_eq!(indices.unique(), vec![0, 1]);
    }

    #[test]
    fn missing_capability_yields_none() {
        let families = [family(vk::QueueFlags::COMPUTE)];
        assert!(QueueFamilyIndices::find(&families, |_| true).is_none());

        let families = [family(vk::QueueFlags::GRAPHICS)];
        assert!(QueueFamilyIndices::find(&families, |_| false).is_none());
    }

    #[test]
    fn empty_families_are_skipped() {
        let mut empty = family(vk::QueueFlags::GRAPHICS);
        empty.queue_count = 0;
        let families = [empty, family(vk::QueueFlags::GRAPHICS)];
        let indices = QueueFamilyIndices::find(&families, |_| true).unwrap();
        assert_eq!(indices.graphics, 1);
    }

    fn extension(name: &CStr) -> vk::ExtensionProperties {
        let mut props = vk::ExtensionProperties::default();
        for (dst, &src) in props.extension_name.iter_mut().zip(name.to_bytes()) {
            *dst = src as std::ffi::c_char;
        }
        props
    }

    #[test]
    fn swapchain_extension_is_found_by_name() {
        let listed = [extension(c"VK_KHR_maintenance1"), extension(khr::Swapchain::name())];
        assert!(lists_extension(&listed, khr::Swapchain::name()));
        assert!(!lists_extension(&listed[..1], khr::Swapchain::name()));
        assert!(!lists_extension(&[], khr::Swapchain::name()));
    }

    #[test]
    fn discrete_gpu_outranks_the_rest() {
        let discrete = device_type_score(vk::PhysicalDeviceType::DISCRETE_GPU);
        let integrated = device_type_score(vk::PhysicalDeviceType::INTEGRATED_GPU);
        let cpu = device_type_score(vk::PhysicalDeviceType::CPU);
        assert!(discrete > integrated && integrated > cpu);
        assert!(cpu > 0);
    }
}
