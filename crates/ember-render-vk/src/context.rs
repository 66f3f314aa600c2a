// SPDX-License-Identifier: CEPL-1.0
use std::ffi::{CStr, CString};

use ash::ext::debug_utils;
use ash::khr::{surface, swapchain};
use ash::vk;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use tracing::{debug, info, warn};

use crate::debug::{messenger_create_info, DebugMessenger, VALIDATION_LAYER};
use crate::device::Queue;
use crate::error::{Error, Result, VkResultExt};
use crate::probe;

/// Device extensions every candidate must support.
pub const REQUIRED_DEVICE_EXTENSIONS: [&CStr; 1] = [swapchain::NAME];

const ENGINE_NAME: &CStr = c"ember";
const QUEUE_PRIORITY: [f32; 1] = [1.0];

/// Graphics-capable and present-capable family indices of one candidate.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct QueueAllocation {
    pub graphics: u32,
    pub present: u32,
}

impl QueueAllocation {
    /// Walks `families` in index order, taking the first graphics family and,
    /// independently, the first family that can present.
    pub fn find<F>(
        families: &[vk::QueueFamilyProperties],
        mut supports_present: F,
    ) -> Result<Option<Self>>
    where
        F: FnMut(u32) -> Result<bool>,
    {
        let mut graphics = None;
        let mut present = None;
        for (index, family) in (0u32..).zip(families) {
            if graphics.is_none() && family.queue_flags.contains(vk::QueueFlags::GRAPHICS) {
                graphics = Some(index);
            }
            if present.is_none() && supports_present(index)? {
                present = Some(index);
            }
            if graphics.is_some() && present.is_some() {
                break;
            }
        }
        Ok(graphics
            .zip(present)
            .map(|(graphics, present)| Self { graphics, present }))
    }

    /// Graphics and present work run on the same family.
    pub fn is_unified(&self) -> bool {
        self.graphics == self.present
    }

    /// Distinct families, graphics first.
    pub fn families(&self) -> Vec<u32> {
        if self.is_unified() {
            vec![self.graphics]
        } else {
            vec![self.graphics, self.present]
        }
    }
}

pub(crate) fn queue_create_infos<'a>(
    queues: &QueueAllocation,
    priorities: &'a [f32],
) -> Vec<vk::DeviceQueueCreateInfo<'a>> {
    queues
        .families()
        .into_iter()
        .map(|family| {
            vk::DeviceQueueCreateInfo::default()
                .queue_family_index(family)
                .queue_priorities(priorities)
        })
        .collect()
}

/// A physical device that passed every suitability check.
#[derive(Clone, Copy, Debug)]
pub struct DeviceCandidate {
    pub physical_device: vk::PhysicalDevice,
    pub properties: vk::PhysicalDeviceProperties,
    pub queues: QueueAllocation,
}

/// First item `evaluate` accepts, in iteration order. No ranking.
pub(crate) fn first_suitable<T, C, F>(
    items: impl IntoIterator<Item = T>,
    mut evaluate: F,
) -> Result<C>
where
    F: FnMut(T) -> Result<Option<C>>,
{
    for item in items {
        if let Some(candidate) = evaluate(item)? {
            return Ok(candidate);
        }
    }
    Err(Error::NoSuitableDevices)
}

/// First memory type allowed by `type_bits` whose flags contain `wanted`.
pub fn find_memory_type(
    props: &vk::PhysicalDeviceMemoryProperties,
    type_bits: u32,
    wanted: vk::MemoryPropertyFlags,
) -> Option<u32> {
    let count = (props.memory_type_count as usize).min(props.memory_types.len());
    (0u32..)
        .zip(&props.memory_types[..count])
        .find(|(i, ty)| type_bits & (1 << i) != 0 && ty.property_flags.contains(wanted))
        .map(|(i, _)| i)
}

// Drop order across the three layers below is device → surface → messenger
// → instance → loader.

struct InstanceParts {
    entry: ash::Entry,
    instance: ash::Instance,
    messenger: Option<DebugMessenger>,
}

impl Drop for InstanceParts {
    fn drop(&mut self) {
        if let Some(messenger) = self.messenger.take() {
            // SAFETY: the messenger was created from this instance, which is
            // still alive.
            unsafe { messenger.destroy() };
        }
        debug!("destroying instance {:?}", self.instance.handle());
        // SAFETY: every child object has been destroyed by now.
        unsafe { self.instance.destroy_instance(None) };
    }
}

struct Presentation {
    loader: surface::Instance,
    surface: vk::SurfaceKHR,
    base: InstanceParts,
}

impl Drop for Presentation {
    fn drop(&mut self) {
        debug!("destroying surface {:?}", self.surface);
        // SAFETY: the device (the only user of the surface) is already gone.
        unsafe { self.loader.destroy_surface(self.surface, None) };
    }
}

/// Instance, surface, and logical device for one window, plus the queues
/// frames are submitted and presented on.
pub struct Context {
    device: ash::Device,
    swapchain_loader: swapchain::Device,
    graphics_queue: Queue,
    present_queue: Queue,
    physical_device: vk::PhysicalDevice,
    properties: vk::PhysicalDeviceProperties,
    memory_properties: vk::PhysicalDeviceMemoryProperties,
    validation: bool,
    presentation: Presentation,
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("device", &self.device.handle())
            .field("physical_device", &self.physical_device)
            .field("graphics_queue", &self.graphics_queue)
            .field("present_queue", &self.present_queue)
            .field("validation", &self.validation)
            .finish_non_exhaustive()
    }
}

impl Drop for Context {
    fn drop(&mut self) {
        // SAFETY: all swapchains and per-image objects borrow the context,
        // so they are gone; waiting covers any stray queue work.
        unsafe {
            if let Err(e) = self.device.device_wait_idle() {
                warn!("vkDeviceWaitIdle during teardown: {e}");
            }
            debug!("destroying device {:?}", self.device.handle());
            self.device.destroy_device(None);
        }
    }
}

impl Context {
    /// Brings up instance, optional validation messenger, window surface and
    /// a logical device on the first physical device that can drive it.
    ///
    /// Anything created before a failing step is torn down before the error
    /// is returned.
    pub fn create<W>(app_name: &str, window: &W, enable_diagnostics: bool) -> Result<Self>
    where
        W: HasDisplayHandle + HasWindowHandle + ?Sized,
    {
        let display = window.display_handle()?.as_raw();
        let window_raw = window.window_handle()?.as_raw();

        // SAFETY: loading the system Vulkan library runs its initialisers;
        // `entry` outlives every object derived from it (see InstanceParts).
        let entry = unsafe { ash::Entry::load() }?;

        let base = create_instance(entry, app_name, display, enable_diagnostics)?;

        // SAFETY: handles come from a live window that outlives the context
        // (caller contract), and the instance enabled its WSI extensions.
        let surface = unsafe {
            ash_window::create_surface(&base.entry, &base.instance, display, window_raw, None)
        }
        .map_err(Error::SurfaceInitFailed)?;
        let presentation = Presentation {
            loader: surface::Instance::new(&base.entry, &base.instance),
            surface,
            base,
        };

        let candidate = select_physical_device(&presentation)?;
        let name = candidate
            .properties
            .device_name_as_c_str()
            .unwrap_or(c"<unnamed>")
            .to_string_lossy()
            .into_owned();
        info!(
            "selected {} ({:?}), graphics family {}, present family {}",
            name,
            candidate.properties.device_type,
            candidate.queues.graphics,
            candidate.queues.present
        );

        let instance = &presentation.base.instance;
        let queue_infos = queue_create_infos(&candidate.queues, &QUEUE_PRIORITY);
        let extension_names: Vec<_> = REQUIRED_DEVICE_EXTENSIONS
            .iter()
            .map(|name| name.as_ptr())
            .collect();
        let device_info = vk::DeviceCreateInfo::default()
            .queue_create_infos(&queue_infos)
            .enabled_extension_names(&extension_names);
        // SAFETY: the physical device came from this instance and the create
        // info only borrows locals that outlive the call.
        let device =
            unsafe { instance.create_device(candidate.physical_device, &device_info, None) }
                .during("vkCreateDevice")?;

        // SAFETY: both families were requested with one queue each.
        let (graphics, present) = unsafe {
            (
                device.get_device_queue(candidate.queues.graphics, 0),
                device.get_device_queue(candidate.queues.present, 0),
            )
        };
        // SAFETY: physical device belongs to this instance.
        let memory_properties =
            unsafe { instance.get_physical_device_memory_properties(candidate.physical_device) };
        let swapchain_loader = swapchain::Device::new(instance, &device);

        Ok(Self {
            device,
            swapchain_loader,
            graphics_queue: Queue {
                handle: graphics,
                family: candidate.queues.graphics,
            },
            present_queue: Queue {
                handle: present,
                family: candidate.queues.present,
            },
            physical_device: candidate.physical_device,
            properties: candidate.properties,
            memory_properties,
            validation: enable_diagnostics,
            presentation,
        })
    }

    pub fn entry(&self) -> &ash::Entry {
        &self.presentation.base.entry
    }

    pub fn instance(&self) -> &ash::Instance {
        &self.presentation.base.instance
    }

    pub fn device(&self) -> &ash::Device {
        &self.device
    }

    pub fn physical_device(&self) -> vk::PhysicalDevice {
        self.physical_device
    }

    pub fn properties(&self) -> &vk::PhysicalDeviceProperties {
        &self.properties
    }

    pub fn memory_properties(&self) -> &vk::PhysicalDeviceMemoryProperties {
        &self.memory_properties
    }

    pub fn graphics_queue(&self) -> Queue {
        self.graphics_queue
    }

    pub fn present_queue(&self) -> Queue {
        self.present_queue
    }

    pub fn surface(&self) -> vk::SurfaceKHR {
        self.presentation.surface
    }

    pub fn surface_loader(&self) -> &surface::Instance {
        &self.presentation.loader
    }

    pub fn swapchain_loader(&self) -> &swapchain::Device {
        &self.swapchain_loader
    }

    pub fn validation_enabled(&self) -> bool {
        self.validation
    }

    pub fn device_name(&self) -> String {
        self.properties
            .device_name_as_c_str()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    /// Allocates device memory from the first type compatible with
    /// `requirements` that has every flag in `wanted`.
    ///
    /// The caller owns the returned memory and must free it before the
    /// context is dropped.
    pub fn allocate_memory(
        &self,
        requirements: &vk::MemoryRequirements,
        wanted: vk::MemoryPropertyFlags,
    ) -> Result<vk::DeviceMemory> {
        let type_index =
            find_memory_type(&self.memory_properties, requirements.memory_type_bits, wanted)
                .ok_or(Error::NoSuitableMemoryType)?;
        let info = vk::MemoryAllocateInfo::default()
            .allocation_size(requirements.size)
            .memory_type_index(type_index);
        // SAFETY: the type index was validated against this device's table.
        unsafe { self.device.allocate_memory(&info, None) }.during("vkAllocateMemory")
    }

    /// Blocks until the device has no outstanding work.
    pub fn wait_idle(&self) -> Result<()> {
        // SAFETY: always valid on a live device.
        unsafe { self.device.device_wait_idle() }.during("vkDeviceWaitIdle")
    }
}

fn create_instance(
    entry: ash::Entry,
    app_name: &str,
    display: raw_window_handle::RawDisplayHandle,
    enable_diagnostics: bool,
) -> Result<InstanceParts> {
    let app_name = CString::new(app_name).map_err(|_| Error::InvalidAppName)?;

    let mut extensions: Vec<&CStr> = ash_window::enumerate_required_extensions(display)
        .during("ash_window::enumerate_required_extensions")?
        .iter()
        // SAFETY: ash_window returns pointers to static NUL-terminated names.
        .map(|&name| unsafe { CStr::from_ptr(name) })
        .collect();
    if enable_diagnostics {
        extensions.push(debug_utils::NAME);
    }
    let layers: Vec<&CStr> = if enable_diagnostics {
        vec![VALIDATION_LAYER]
    } else {
        Vec::new()
    };

    match probe::instance_extensions(&entry) {
        Ok(available) => probe::report_availability("instance extension", &extensions, &available),
        Err(e) => warn!("could not enumerate instance extensions: {e}"),
    }
    match probe::instance_layers(&entry) {
        Ok(available) => probe::report_availability("instance layer", &layers, &available),
        Err(e) => warn!("could not enumerate instance layers: {e}"),
    }

    let extension_ptrs: Vec<_> = extensions.iter().map(|name| name.as_ptr()).collect();
    let layer_ptrs: Vec<_> = layers.iter().map(|name| name.as_ptr()).collect();

    let app_info = vk::ApplicationInfo::default()
        .application_name(&app_name)
        .application_version(vk::make_api_version(0, 0, 1, 0))
        .engine_name(ENGINE_NAME)
        .engine_version(vk::make_api_version(0, 0, 1, 0))
        .api_version(vk::API_VERSION_1_0);

    // Chained so messages raised by vkCreateInstance itself are reported.
    let mut instance_messenger: vk::DebugUtilsMessengerCreateInfoEXT<'_> = messenger_create_info();
    let mut create_info = vk::InstanceCreateInfo::default()
        .application_info(&app_info)
        .enabled_extension_names(&extension_ptrs)
        .enabled_layer_names(&layer_ptrs);
    if enable_diagnostics {
        create_info = create_info.push_next(&mut instance_messenger);
    }

    // SAFETY: every pointer in `create_info` borrows a local that outlives
    // the call.
    let instance = unsafe { entry.create_instance(&create_info, None) }.during("vkCreateInstance")?;

    let mut parts = InstanceParts {
        entry,
        instance,
        messenger: None,
    };
    if enable_diagnostics {
        // SAFETY: debug utils was enabled on this instance above.
        parts.messenger = Some(unsafe { DebugMessenger::new(&parts.entry, &parts.instance) }?);
    }
    Ok(parts)
}

fn select_physical_device(presentation: &Presentation) -> Result<DeviceCandidate> {
    let instance = &presentation.base.instance;
    // SAFETY: plain enumeration on a live instance.
    let devices = unsafe { instance.enumerate_physical_devices() }
        .during("vkEnumeratePhysicalDevices")?;
    debug!("{} physical device(s) enumerated", devices.len());

    first_suitable(devices, |phys| {
        // SAFETY: `phys` was just enumerated from this instance, and the
        // surface was created on it too.
        unsafe { evaluate_candidate(instance, &presentation.loader, presentation.surface, phys) }
    })
}

/// # Safety
/// `phys` and `surface` must both belong to `instance`.
unsafe fn evaluate_candidate(
    instance: &ash::Instance,
    loader: &surface::Instance,
    surface: vk::SurfaceKHR,
    phys: vk::PhysicalDevice,
) -> Result<Option<DeviceCandidate>> {
    // SAFETY: caller guarantees provenance for every query below.
    unsafe {
        let properties = instance.get_physical_device_properties(phys);
        let name = properties.device_name_as_c_str().unwrap_or(c"<unnamed>");

        let available = probe::device_extensions(instance, phys)?;
        let missing = probe::missing(&REQUIRED_DEVICE_EXTENSIONS, &available);
        if !missing.is_empty() {
            debug!("skipping {name:?}: missing device extensions {missing:?}");
            return Ok(None);
        }

        if probe::surface_formats(loader, phys, surface)?.is_empty()
            || probe::surface_present_modes(loader, phys, surface)?.is_empty()
        {
            debug!("skipping {name:?}: no surface formats or present modes");
            return Ok(None);
        }

        let families = probe::queue_families(instance, phys);
        let queues = QueueAllocation::find(&families, |family| {
            probe::present_support(loader, phys, family, surface)
        })?;
        let Some(queues) = queues else {
            debug!("skipping {name:?}: no graphics or present queue family");
            return Ok(None);
        };

        Ok(Some(DeviceCandidate {
            physical_device: phys,
            properties,
            queues,
        }))
    }
}
