// SPDX-License-Identifier: CEPL-1.0
//! Stateless capability queries against the loader, an instance, or a
//! physical device.

use std::ffi::{CStr, CString};

use ash::khr::surface;
use ash::vk;
use tracing::{debug, warn};

use crate::error::{Result, VkResultExt};

/// Names of every instance extension the loader exposes.
pub fn instance_extensions(entry: &ash::Entry) -> Result<Vec<CString>> {
    // SAFETY: global command, valid for any loaded entry.
    let props = unsafe { entry.enumerate_instance_extension_properties(None) }
        .during("vkEnumerateInstanceExtensionProperties")?;
    Ok(props
        .iter()
        .filter_map(|p| p.extension_name_as_c_str().ok().map(CStr::to_owned))
        .collect())
}

/// Names of every instance layer the loader exposes.
pub fn instance_layers(entry: &ash::Entry) -> Result<Vec<CString>> {
    // SAFETY: global command, valid for any loaded entry.
    let props = unsafe { entry.enumerate_instance_layer_properties() }
        .during("vkEnumerateInstanceLayerProperties")?;
    Ok(props
        .iter()
        .filter_map(|p| p.layer_name_as_c_str().ok().map(CStr::to_owned))
        .collect())
}

/// Names of every extension `phys` supports.
///
/// # Safety
/// `phys` must have been enumerated from `instance`.
pub unsafe fn device_extensions(
    instance: &ash::Instance,
    phys: vk::PhysicalDevice,
) -> Result<Vec<CString>> {
    // SAFETY: caller guarantees `phys` belongs to `instance`.
    let props = unsafe { instance.enumerate_device_extension_properties(phys) }
        .during("vkEnumerateDeviceExtensionProperties")?;
    Ok(props
        .iter()
        .filter_map(|p| p.extension_name_as_c_str().ok().map(CStr::to_owned))
        .collect())
}

/// Queue family properties of `phys`, in family index order.
///
/// # Safety
/// `phys` must have been enumerated from `instance`.
pub unsafe fn queue_families(
    instance: &ash::Instance,
    phys: vk::PhysicalDevice,
) -> Vec<vk::QueueFamilyProperties> {
    // SAFETY: caller guarantees `phys` belongs to `instance`.
    unsafe { instance.get_physical_device_queue_family_properties(phys) }
}

/// Whether queue family `family` of `phys` can present to `surface`.
///
/// # Safety
/// `phys` and `surface` must come from the instance `loader` was built on.
pub unsafe fn present_support(
    loader: &surface::Instance,
    phys: vk::PhysicalDevice,
    family: u32,
    surface: vk::SurfaceKHR,
) -> Result<bool> {
    // SAFETY: caller guarantees provenance of `phys` and `surface`.
    unsafe { loader.get_physical_device_surface_support(phys, family, surface) }
        .during("vkGetPhysicalDeviceSurfaceSupportKHR")
}

/// Surface formats `phys` offers for `surface`.
///
/// # Safety
/// `phys` and `surface` must come from the instance `loader` was built on.
pub unsafe fn surface_formats(
    loader: &surface::Instance,
    phys: vk::PhysicalDevice,
    surface: vk::SurfaceKHR,
) -> Result<Vec<vk::SurfaceFormatKHR>> {
    // SAFETY: caller guarantees provenance of `phys` and `surface`.
    unsafe { loader.get_physical_device_surface_formats(phys, surface) }
        .during("vkGetPhysicalDeviceSurfaceFormatsKHR")
}

/// Present modes `phys` offers for `surface`.
///
/// # Safety
/// `phys` and `surface` must come from the instance `loader` was built on.
pub unsafe fn surface_present_modes(
    loader: &surface::Instance,
    phys: vk::PhysicalDevice,
    surface: vk::SurfaceKHR,
) -> Result<Vec<vk::PresentModeKHR>> {
    // SAFETY: caller guarantees provenance of `phys` and `surface`.
    unsafe { loader.get_physical_device_surface_present_modes(phys, surface) }
        .during("vkGetPhysicalDeviceSurfacePresentModesKHR")
}

/// Entries of `required` that do not appear in `available`.
pub fn missing<'a>(required: &[&'a CStr], available: &[CString]) -> Vec<&'a CStr> {
    required
        .iter()
        .copied()
        .filter(|name| !available.iter().any(|a| a.as_c_str() == *name))
        .collect()
}

/// Logs which of `required` are absent from `available`.
///
/// Advisory only: the subsequent create call is what actually fails.
pub fn report_availability(kind: &str, required: &[&CStr], available: &[CString]) {
    debug!("available {kind}: {available:?}");
    for name in missing(required, available) {
        warn!("required {kind} {name:?} is not reported as available");
    }
}
