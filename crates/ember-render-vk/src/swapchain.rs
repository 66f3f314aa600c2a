// SPDX-License-Identifier: CEPL-1.0
//! Present chain negotiation, the per-frame present protocol, and
//! recreation on resize or staleness.

use std::mem;

use ash::vk;
use ember_render::RenderSize;
use tracing::{debug, info, warn};

use crate::context::Context;
use crate::device::{FrameSubmit, ImageTransition, PresentDevice, Queue};
use crate::error::{Error, Result, VkResultExt};
use crate::record::{FrameRecorder, FrameTarget};
use crate::swap_image::{build_pool, destroy_pool, SwapImage};

pub const PREFERRED_FORMAT: vk::Format = vk::Format::B8G8R8A8_SRGB;
pub const PREFERRED_COLOR_SPACE: vk::ColorSpaceKHR = vk::ColorSpaceKHR::SRGB_NONLINEAR;

const PRESENT_MODE_PREFERENCE: [vk::PresentModeKHR; 2] =
    [vk::PresentModeKHR::MAILBOX, vk::PresentModeKHR::IMMEDIATE];

const COMPOSITE_ALPHA_PREFERENCE: [vk::CompositeAlphaFlagsKHR; 4] = [
    vk::CompositeAlphaFlagsKHR::OPAQUE,
    vk::CompositeAlphaFlagsKHR::PRE_MULTIPLIED,
    vk::CompositeAlphaFlagsKHR::POST_MULTIPLIED,
    vk::CompositeAlphaFlagsKHR::INHERIT,
];

/// How the chain fared on the last present.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PresentState {
    Optimal,
    /// Still usable but no longer an exact match for the surface.
    Suboptimal,
}

/// Parameters agreed with the surface for one chain.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Negotiated {
    pub format: vk::Format,
    pub color_space: vk::ColorSpaceKHR,
    pub present_mode: vk::PresentModeKHR,
    pub extent: vk::Extent2D,
    pub min_image_count: u32,
    pub composite_alpha: vk::CompositeAlphaFlagsKHR,
    pub pre_transform: vk::SurfaceTransformFlagsKHR,
}

impl Negotiated {
    pub fn surface_format(&self) -> vk::SurfaceFormatKHR {
        vk::SurfaceFormatKHR {
            format: self.format,
            color_space: self.color_space,
        }
    }
}

/// Resolves the chain extent. A `u32::MAX` current extent means the surface
/// takes its size from the chain, so the request is clamped to the allowed
/// range; otherwise the surface's size wins. A zero request is rejected
/// before clamping could round it up.
pub fn choose_extent(
    caps: &vk::SurfaceCapabilitiesKHR,
    requested: RenderSize,
) -> Result<vk::Extent2D> {
    if requested.is_empty() {
        return Err(Error::InvalidSurfaceDimensions {
            width: requested.width,
            height: requested.height,
        });
    }
    let extent = if caps.current_extent.width == u32::MAX {
        vk::Extent2D {
            width: requested
                .width
                .clamp(caps.min_image_extent.width, caps.max_image_extent.width),
            height: requested
                .height
                .clamp(caps.min_image_extent.height, caps.max_image_extent.height),
        }
    } else {
        caps.current_extent
    };
    if extent.width == 0 || extent.height == 0 {
        return Err(Error::InvalidSurfaceDimensions {
            width: extent.width,
            height: extent.height,
        });
    }
    Ok(extent)
}

/// The preferred sRGB pair if offered, else whatever the surface lists first.
pub fn choose_surface_format(formats: &[vk::SurfaceFormatKHR]) -> Option<vk::SurfaceFormatKHR> {
    formats
        .iter()
        .find(|f| f.format == PREFERRED_FORMAT && f.color_space == PREFERRED_COLOR_SPACE)
        .or_else(|| formats.first())
        .copied()
}

pub fn choose_present_mode(modes: &[vk::PresentModeKHR]) -> vk::PresentModeKHR {
    PRESENT_MODE_PREFERENCE
        .into_iter()
        .find(|mode| modes.contains(mode))
        .unwrap_or(vk::PresentModeKHR::FIFO)
}

/// One more than the minimum, capped by a declared maximum (0 means none).
pub fn choose_image_count(caps: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let count = caps.min_image_count.max(1) + 1;
    if caps.max_image_count > 0 {
        count.min(caps.max_image_count)
    } else {
        count
    }
}

pub fn choose_composite_alpha(supported: vk::CompositeAlphaFlagsKHR) -> vk::CompositeAlphaFlagsKHR {
    COMPOSITE_ALPHA_PREFERENCE
        .into_iter()
        .find(|mode| supported.contains(*mode))
        .unwrap_or(vk::CompositeAlphaFlagsKHR::OPAQUE)
}

/// Pure negotiation over already-queried surface support.
pub fn negotiate(
    caps: &vk::SurfaceCapabilitiesKHR,
    formats: &[vk::SurfaceFormatKHR],
    modes: &[vk::PresentModeKHR],
    requested: RenderSize,
) -> Result<Negotiated> {
    let extent = choose_extent(caps, requested)?;
    let surface_format = choose_surface_format(formats).ok_or(Error::Vulkan {
        op: "vkGetPhysicalDeviceSurfaceFormatsKHR",
        result: vk::Result::ERROR_FORMAT_NOT_SUPPORTED,
    })?;
    Ok(Negotiated {
        format: surface_format.format,
        color_space: surface_format.color_space,
        present_mode: choose_present_mode(modes),
        extent,
        min_image_count: choose_image_count(caps),
        composite_alpha: choose_composite_alpha(caps.supported_composite_alpha),
        pre_transform: caps.current_transform,
    })
}

/// # Safety
/// `device` must be live.
unsafe fn query_and_negotiate<D: PresentDevice + ?Sized>(
    device: &D,
    requested: RenderSize,
) -> Result<Negotiated> {
    // SAFETY: caller contract.
    let (caps, formats, modes) = unsafe {
        (
            device
                .surface_capabilities()
                .during("vkGetPhysicalDeviceSurfaceCapabilitiesKHR")?,
            device
                .surface_formats()
                .during("vkGetPhysicalDeviceSurfaceFormatsKHR")?,
            device
                .surface_present_modes()
                .during("vkGetPhysicalDeviceSurfacePresentModesKHR")?,
        )
    };
    negotiate(&caps, &formats, &modes, requested)
}

/// Sharing mode and the families to list for concurrent sharing.
pub fn sharing(graphics: Queue, present: Queue) -> (vk::SharingMode, Vec<u32>) {
    if graphics.family == present.family {
        (vk::SharingMode::EXCLUSIVE, Vec::new())
    } else {
        (
            vk::SharingMode::CONCURRENT,
            vec![graphics.family, present.family],
        )
    }
}

/// A negotiated present chain plus one [`SwapImage`] per image.
///
/// Borrows the device it was created from, so it cannot outlive it.
pub struct Swapchain<'ctx, D: PresentDevice = Context> {
    device: &'ctx D,
    handle: vk::SwapchainKHR,
    config: Negotiated,
    images: Vec<SwapImage>,
    current: u32,
    // Unsignaled, and handed to the next acquire. Swapped into the acquired
    // slot right after, so each slot always waits on the semaphore that the
    // acquire of its current image signaled.
    spare: vk::Semaphore,
}

impl<'ctx, D: PresentDevice> Swapchain<'ctx, D> {
    /// Negotiates against the surface and builds the chain. Nothing is
    /// created if negotiation fails.
    pub fn create(device: &'ctx D, requested: RenderSize) -> Result<Self> {
        // SAFETY: `device` is borrowed for the chain's whole life.
        let config = unsafe { query_and_negotiate(device, requested) }?;
        let mut chain = Self {
            device,
            handle: vk::SwapchainKHR::null(),
            config,
            images: Vec::new(),
            current: 0,
            spare: vk::Semaphore::null(),
        };
        // On error `chain` drops and releases whatever was built.
        // SAFETY: `chain` holds no live handles yet.
        unsafe { chain.rebuild(config) }?;
        Ok(chain)
    }

    /// Rebuilds the chain for `requested`, handing the current one to the
    /// driver as the old chain.
    ///
    /// The caller waits for the device to go idle first. If negotiation
    /// fails (for instance a 0x0 surface) the current chain is left intact.
    pub fn recreate(&mut self, requested: RenderSize) -> Result<()> {
        // SAFETY: the device is borrowed for `'ctx`.
        let config = unsafe { query_and_negotiate(self.device, requested) }?;
        info!(
            "recreating swapchain: {}x{} -> {}x{}",
            self.config.extent.width,
            self.config.extent.height,
            config.extent.width,
            config.extent.height
        );
        // SAFETY: caller contract says no frame work is outstanding.
        unsafe { self.rebuild(config) }
    }

    unsafe fn rebuild(&mut self, config: Negotiated) -> Result<()> {
        let device = self.device;
        let old = self.handle;

        // SAFETY: the caller has made sure no work uses the old slots; each
        // slot still waits on its own fence.
        unsafe { self.release_pool() };

        let graphics = device.graphics_queue();
        let (sharing_mode, families) = sharing(graphics, device.present_queue());
        let info = vk::SwapchainCreateInfoKHR::default()
            .surface(device.surface())
            .min_image_count(config.min_image_count)
            .image_format(config.format)
            .image_color_space(config.color_space)
            .image_extent(config.extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::TRANSFER_DST)
            .image_sharing_mode(sharing_mode)
            .queue_family_indices(&families)
            .pre_transform(config.pre_transform)
            .composite_alpha(config.composite_alpha)
            .present_mode(config.present_mode)
            .clipped(true)
            .old_swapchain(old);

        // SAFETY: `info` only borrows locals; `old` (if any) is still alive
        // and retired by this call.
        unsafe {
            let handle = device.create_swapchain(&info).during("vkCreateSwapchainKHR")?;
            if old != vk::SwapchainKHR::null() {
                debug!("destroying retired swapchain {old:?}");
                device.destroy_swapchain(old);
            }
            self.handle = handle;
            self.config = config;

            // A chain without a usable current image keeps no slots, so
            // `present` reports it out of date instead of using them.
            let populated = self.populate(graphics.family);
            if populated.is_err() {
                self.release_pool();
            }
            populated
        }
    }

    /// Builds the slots and the spare for the chain in `self.handle`, then
    /// acquires the first image.
    unsafe fn populate(&mut self, family: u32) -> Result<()> {
        let device = self.device;
        let config = self.config;
        // SAFETY: `self.handle` is live and belongs to `device`.
        unsafe {
            let images = device
                .swapchain_images(self.handle)
                .during("vkGetSwapchainImagesKHR")?;
            self.images = build_pool(device, &images, config.format, family)?;
            self.spare = device.create_semaphore().during("vkCreateSemaphore")?;

            info!(
                "swapchain {}x{} {:?}/{:?} {:?}, {} images",
                config.extent.width,
                config.extent.height,
                config.format,
                config.color_space,
                config.present_mode,
                self.images.len()
            );

            let (index, _suboptimal) = device
                .acquire_next_image(self.handle, self.spare)
                .map_err(Error::ImageAcquireFailed)?;
            self.adopt_acquired(index, "vkAcquireNextImageKHR")
        }
    }

    /// Destroys every slot and the spare. The chain handle stays.
    ///
    /// # Safety
    /// No device work may still be pending on the slots beyond what their
    /// fences cover.
    unsafe fn release_pool(&mut self) {
        let device = self.device;
        // SAFETY: caller contract; every handle came from `device`.
        unsafe {
            destroy_pool(device, mem::take(&mut self.images));
            if self.spare != vk::Semaphore::null() {
                device.destroy_semaphore(mem::replace(&mut self.spare, vk::Semaphore::null()));
            }
        }
    }

    /// Puts a fresh signaled fence in slot `index` after a frame failed
    /// between resetting its fence and submitting, so later waits on the
    /// slot return. If no fence can be made the slot is left without one
    /// and `present` asks for recreation.
    ///
    /// # Safety
    /// The slot's current fence must not be pending on any queue.
    unsafe fn rearm_fence(&mut self, index: usize) {
        let device = self.device;
        let Some(slot) = self.images.get_mut(index) else {
            return;
        };
        // SAFETY: caller contract; the fence belongs to `device`.
        unsafe {
            let fresh = device.create_fence(true).unwrap_or_else(|e| {
                warn!("replacing frame fence after a failed frame: {e}");
                vk::Fence::null()
            });
            device.destroy_fence(mem::replace(&mut slot.frame_fence, fresh));
        }
    }

    /// Moves the semaphore the last acquire signaled into the slot of the
    /// image it produced and makes that slot current.
    fn adopt_acquired(&mut self, index: u32, op: &'static str) -> Result<()> {
        let slot = self
            .images
            .get_mut(index as usize)
            .ok_or(Error::Vulkan {
                op,
                result: vk::Result::ERROR_UNKNOWN,
            })?;
        mem::swap(&mut self.spare, &mut slot.image_acquired);
        self.current = index;
        Ok(())
    }

    /// Records, submits and presents one frame on the current image, then
    /// acquires the next one.
    ///
    /// [`Error::OutOfDate`] means the chain must be recreated before the next
    /// call.
    pub fn present<R>(&mut self, frame: u64, recorder: &mut R) -> Result<PresentState>
    where
        R: FrameRecorder<D> + ?Sized,
    {
        let device = self.device;
        let index = self.current as usize;
        // No slots after a failed rebuild, and no fence after a failed frame
        // whose fence could not be replaced. Both need a recreate.
        let slot = match self.images.get(index) {
            Some(slot) if slot.frame_fence != vk::Fence::null() => slot,
            _ => return Err(Error::OutOfDate),
        };
        let target = FrameTarget {
            command_buffer: slot.command_buffer,
            image: slot.image,
            view: slot.view,
            format: self.config.format,
            extent: self.config.extent,
            index: self.current,
        };
        let submit = FrameSubmit {
            command_buffer: slot.command_buffer,
            wait: slot.image_acquired,
            wait_stage: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
            signal: slot.render_finished,
            fence: slot.frame_fence,
        };

        // SAFETY: the fence belongs to `device`; the wait is what makes
        // touching this slot's command buffer legal.
        unsafe {
            device.wait_for_fence(submit.fence).during("vkWaitForFences")?;
            device.reset_fence(submit.fence).during("vkResetFences")?;
        }
        // SAFETY: the slot's previous frame finished with the wait above.
        let recorded =
            unsafe { Self::record_and_submit(device, &target, &submit, frame, recorder) };
        if let Err(e) = recorded {
            // SAFETY: the fence was reset and never reached a queue.
            unsafe { self.rearm_fence(index) };
            return Err(e);
        }

        // SAFETY: the submit above signals `render_finished`.
        let present = unsafe {
            device.queue_present(
                device.present_queue().handle,
                self.handle,
                self.current,
                submit.signal,
            )
        };
        let mut state = match present {
            Ok(false) => PresentState::Optimal,
            Ok(true) => PresentState::Suboptimal,
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => return Err(Error::OutOfDate),
            Err(result) => {
                return Err(Error::Vulkan {
                    op: "vkQueuePresentKHR",
                    result,
                })
            }
        };

        // SAFETY: the spare is unsignaled with nothing pending on it.
        match unsafe { device.acquire_next_image(self.handle, self.spare) } {
            Ok((index, suboptimal)) => {
                self.adopt_acquired(index, "vkAcquireNextImageKHR")?;
                if suboptimal {
                    state = PresentState::Suboptimal;
                }
            }
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => return Err(Error::OutOfDate),
            Err(result) => {
                return Err(Error::Vulkan {
                    op: "vkAcquireNextImageKHR",
                    result,
                })
            }
        }
        Ok(state)
    }

    /// Records `target` between its layout transitions and submits it.
    ///
    /// # Safety
    /// The command buffer must not be pending and `submit.fence` must be
    /// unsignaled.
    unsafe fn record_and_submit<R>(
        device: &D,
        target: &FrameTarget,
        submit: &FrameSubmit,
        frame: u64,
        recorder: &mut R,
    ) -> Result<()>
    where
        R: FrameRecorder<D> + ?Sized,
    {
        let cmd = target.command_buffer;
        // SAFETY: caller contract.
        unsafe {
            device.begin_command_buffer(cmd).during("vkBeginCommandBuffer")?;
            device.cmd_transition_image(cmd, &ImageTransition::to_general(target.image));
        }
        recorder.record(device, target, frame);
        // SAFETY: `cmd` is recording until `end_command_buffer`.
        unsafe {
            device.cmd_transition_image(cmd, &ImageTransition::to_present(target.image));
            device.end_command_buffer(cmd).during("vkEndCommandBuffer")?;
            device
                .queue_submit(device.graphics_queue().handle, submit)
                .during("vkQueueSubmit")
        }
    }

    /// Waits for every slot's fence, then for the whole device. Failures are
    /// logged and otherwise ignored.
    pub fn wait_idle(&self) {
        // SAFETY: fences belong to `device`.
        unsafe {
            for slot in &self.images {
                if slot.frame_fence == vk::Fence::null() {
                    continue;
                }
                if let Err(e) = self.device.wait_for_fence(slot.frame_fence) {
                    warn!("waiting on frame fence {:?}: {e}", slot.frame_fence);
                }
            }
            if let Err(e) = self.device.wait_idle() {
                warn!("vkDeviceWaitIdle: {e}");
            }
        }
    }

    pub fn handle(&self) -> vk::SwapchainKHR {
        self.handle
    }

    pub fn config(&self) -> &Negotiated {
        &self.config
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.config.extent
    }

    pub fn surface_format(&self) -> vk::SurfaceFormatKHR {
        self.config.surface_format()
    }

    pub fn present_mode(&self) -> vk::PresentModeKHR {
        self.config.present_mode
    }

    pub fn image_count(&self) -> u32 {
        self.images.len() as u32
    }

    pub fn images(&self) -> &[SwapImage] {
        &self.images
    }

    pub fn current_index(&self) -> u32 {
        self.current
    }

    /// `None` after a failed rebuild left the chain without images.
    pub fn current_image(&self) -> Option<&SwapImage> {
        self.images.get(self.current as usize)
    }

    /// Whether the chain was built for `size`.
    pub fn matches(&self, size: RenderSize) -> bool {
        self.config.extent.width == size.width && self.config.extent.height == size.height
    }
}

impl<D: PresentDevice> Drop for Swapchain<'_, D> {
    fn drop(&mut self) {
        self.wait_idle();
        let device = self.device;
        // SAFETY: everything below was created from `device` and the waits
        // above drained any work that used it.
        unsafe {
            self.release_pool();
            if self.handle != vk::SwapchainKHR::null() {
                debug!("destroying swapchain {:?}", self.handle);
                device.destroy_swapchain(self.handle);
            }
        }
    }
}
