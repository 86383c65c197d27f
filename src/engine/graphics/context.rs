//! Vulkan instance/device pair created to the XR runtime's requirements.

use std::sync::Arc;

use ash::vk::Handle;
use openxr as xr;
use tracing::{debug, info, warn};
use vulkano::command_buffer::allocator::StandardCommandBufferAllocator;
use vulkano::descriptor_set::allocator::StandardDescriptorSetAllocator;
use vulkano::device::physical::PhysicalDevice;
use vulkano::device::{Device, DeviceCreateInfo, DeviceExtensions, Queue, QueueCreateInfo, QueueFlags};
use vulkano::instance::{Instance, InstanceCreateInfo, InstanceExtensions};
use vulkano::memory::allocator::StandardMemoryAllocator;
use vulkano::{Version, VulkanLibrary, VulkanObject};

use crate::engine::{EngineError, EngineResult, InitStage};

pub struct GraphicsContext {
    pub instance: Arc<Instance>,
    pub physical_device: Arc<PhysicalDevice>,
    pub device: Arc<Device>,
    pub queue: Arc<Queue>,
    pub memory_allocator: Arc<StandardMemoryAllocator>,
    pub command_buffer_allocator: Arc<StandardCommandBufferAllocator>,
    pub descriptor_set_allocator: Arc<StandardDescriptorSetAllocator>,
}

fn ctx_err(reason: impl std::fmt::Display) -> EngineError {
    EngineError::init(InitStage::GraphicsContext, reason)
}

impl GraphicsContext {
    /// Build the instance and device the runtime asks for: its minimum API
    /// version, its extension lists and the physical device it names.
    pub fn for_xr(xr_instance: &xr::Instance, system: xr::SystemId, app_name: &str) -> EngineResult<Self> {
        let reqs = xr_instance
            .graphics_requirements::<xr::Vulkan>(system)
            .map_err(|e| EngineError::init(InitStage::GraphicsRequirements, e))?;
        let min_version = Version::major_minor(
            reqs.min_api_version_supported.major() as u32,
            reqs.min_api_version_supported.minor() as u32,
        );
        info!(
            "[Graphics] runtime requires Vulkan >= {}.{}.{}",
            reqs.min_api_version_supported.major(),
            reqs.min_api_version_supported.minor(),
            reqs.min_api_version_supported.patch()
        );

        let library = VulkanLibrary::new().map_err(ctx_err)?;
        if library.api_version() < min_version {
            return Err(EngineError::init(
                InitStage::GraphicsRequirements,
                format!("loader supports {}, runtime needs {min_version}", library.api_version()),
            ));
        }

        let instance_ext_names = xr_instance
            .vulkan_legacy_instance_extensions(system)
            .map_err(|e| EngineError::init(InitStage::GraphicsRequirements, e))?;
        debug!("[Graphics] instance extensions requested by runtime: {instance_ext_names}");
        let requested = InstanceExtensions::from_iter(instance_ext_names.split_ascii_whitespace());
        let enabled_extensions = requested.intersection(library.supported_extensions());
        if enabled_extensions != requested {
            warn!(
                "[Graphics] loader lacks instance extensions: {:?}",
                requested.difference(library.supported_extensions())
            );
        }

        let instance = Instance::new(
            library,
            InstanceCreateInfo {
                application_name: Some(app_name.to_owned()),
                enabled_extensions,
                max_api_version: Some(min_version.max(Version::V1_1)),
                ..Default::default()
            },
        )
        .map_err(ctx_err)?;

        let raw_physical = unsafe { xr_instance.vulkan_graphics_device(system, instance.handle().as_raw() as _) }
            .map_err(ctx_err)?;
        let physical_device = instance
            .enumerate_physical_devices()
            .map_err(ctx_err)?
            .find(|pd| pd.handle().as_raw() == raw_physical as u64)
            .ok_or_else(|| ctx_err("runtime named a physical device the instance does not expose"))?;
        info!(
            "[Graphics] physical device: {} ({:?})",
            physical_device.properties().device_name,
            physical_device.properties().device_type
        );

        let queue_family_index = physical_device
            .queue_family_properties()
            .iter()
            .position(|q| q.queue_flags.intersects(QueueFlags::GRAPHICS))
            .ok_or_else(|| ctx_err("no graphics queue family"))? as u32;

        let device_ext_names = xr_instance
            .vulkan_legacy_device_extensions(system)
            .map_err(|e| EngineError::init(InitStage::GraphicsRequirements, e))?;
        debug!("[Graphics] device extensions requested by runtime: {device_ext_names}");
        let requested = DeviceExtensions::from_iter(device_ext_names.split_ascii_whitespace());
        let enabled_extensions = requested.intersection(physical_device.supported_extensions());
        if enabled_extensions != requested {
            warn!(
                "[Graphics] device lacks extensions: {:?}",
                requested.difference(physical_device.supported_extensions())
            );
        }

        let (device, mut queues) = Device::new(
            physical_device.clone(),
            DeviceCreateInfo {
                queue_create_infos: vec![QueueCreateInfo {
                    queue_family_index,
                    ..Default::default()
                }],
                enabled_extensions,
                ..Default::default()
            },
        )
        .map_err(ctx_err)?;
        let queue = queues.next().ok_or_else(|| ctx_err("device returned no queue"))?;

        let memory_allocator = Arc::new(StandardMemoryAllocator::new_default(device.clone()));
        let command_buffer_allocator = Arc::new(StandardCommandBufferAllocator::new(
            device.clone(),
            Default::default(),
        ));
        let descriptor_set_allocator = Arc::new(StandardDescriptorSetAllocator::new(
            device.clone(),
            Default::default(),
        ));

        info!("[Graphics] device ready, queue family {queue_family_index}");

        Ok(Self {
            instance,
            physical_device,
            device,
            queue,
            memory_allocator,
            command_buffer_allocator,
            descriptor_set_allocator,
        })
    }

    pub fn queue_family_index(&self) -> u32 {
        self.queue.queue_family_index()
    }

    /// Raw handles the runtime binds the session to.
    pub fn session_create_info(&self) -> xr::vulkan::SessionCreateInfo {
        xr::vulkan::SessionCreateInfo {
            instance: self.instance.handle().as_raw() as _,
            physical_device: self.physical_device.handle().as_raw() as _,
            device: self.device.handle().as_raw() as _,
            queue_family_index: self.queue_family_index(),
            queue_index: 0,
        }
    }
}

impl Drop for GraphicsContext {
    fn drop(&mut self) {
        // Last owner of the device; the swapchains and session are gone by now.
        if let Err(e) = unsafe { self.device.wait_idle() } {
            warn!("[Graphics] wait_idle on teardown failed: {e}");
        }
        debug!("[Graphics] context destroyed");
    }
}
