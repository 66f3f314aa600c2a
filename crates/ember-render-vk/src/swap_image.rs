// SPDX-License-Identifier: CEPL-1.0
use ash::vk;
use tracing::warn;

use crate::device::PresentDevice;
use crate::error::{Result, VkResultExt};

/// Everything one presentable image needs to be recorded into and presented.
///
/// The image itself belongs to the swapchain; every other handle is owned
/// here and released by [`SwapImage::destroy`].
#[derive(Debug)]
pub struct SwapImage {
    pub(crate) image: vk::Image,
    pub(crate) view: vk::ImageView,
    pub(crate) image_acquired: vk::Semaphore,
    pub(crate) render_finished: vk::Semaphore,
    /// Signaled once this image's previous frame has finished on the device.
    pub(crate) frame_fence: vk::Fence,
    pub(crate) command_pool: vk::CommandPool,
    pub(crate) command_buffer: vk::CommandBuffer,
}

impl SwapImage {
    /// # Safety
    /// `image` must be a swap image of `device`, and `family` one of the
    /// device's queue families.
    pub(crate) unsafe fn new<D: PresentDevice + ?Sized>(
        device: &D,
        image: vk::Image,
        format: vk::Format,
        family: u32,
    ) -> Result<Self> {
        let mut slot = Self {
            image,
            view: vk::ImageView::null(),
            image_acquired: vk::Semaphore::null(),
            render_finished: vk::Semaphore::null(),
            frame_fence: vk::Fence::null(),
            command_pool: vk::CommandPool::null(),
            command_buffer: vk::CommandBuffer::null(),
        };
        // SAFETY: forwarded caller contract.
        match unsafe { slot.populate(device, format, family) } {
            Ok(()) => Ok(slot),
            Err(e) => {
                // SAFETY: nothing created so far has been used.
                unsafe { slot.release(device) };
                Err(e)
            }
        }
    }

    unsafe fn populate<D: PresentDevice + ?Sized>(
        &mut self,
        device: &D,
        format: vk::Format,
        family: u32,
    ) -> Result<()> {
        // SAFETY: see `new`.
        unsafe {
            self.view = device
                .create_image_view(self.image, format)
                .during("vkCreateImageView")?;
            self.image_acquired = device.create_semaphore().during("vkCreateSemaphore")?;
            self.render_finished = device.create_semaphore().during("vkCreateSemaphore")?;
            // Pre-signaled so the first frame on this slot does not block.
            self.frame_fence = device.create_fence(true).during("vkCreateFence")?;
            self.command_pool = device
                .create_command_pool(family)
                .during("vkCreateCommandPool")?;
            self.command_buffer = device
                .allocate_command_buffer(self.command_pool)
                .during("vkAllocateCommandBuffers")?;
        }
        Ok(())
    }

    /// Releases every non-null owned handle. The command buffer goes with
    /// its pool.
    unsafe fn release<D: PresentDevice + ?Sized>(&mut self, device: &D) {
        // SAFETY: caller guarantees no pending device work uses these.
        unsafe {
            if self.command_pool != vk::CommandPool::null() {
                device.destroy_command_pool(self.command_pool);
            }
            if self.frame_fence != vk::Fence::null() {
                device.destroy_fence(self.frame_fence);
            }
            if self.render_finished != vk::Semaphore::null() {
                device.destroy_semaphore(self.render_finished);
            }
            if self.image_acquired != vk::Semaphore::null() {
                device.destroy_semaphore(self.image_acquired);
            }
            if self.view != vk::ImageView::null() {
                device.destroy_image_view(self.view);
            }
        }
        self.command_buffer = vk::CommandBuffer::null();
        self.command_pool = vk::CommandPool::null();
        self.frame_fence = vk::Fence::null();
        self.render_finished = vk::Semaphore::null();
        self.image_acquired = vk::Semaphore::null();
        self.view = vk::ImageView::null();
    }

    /// Waits for this slot's last frame, then releases its resources.
    /// A failed wait is logged and destruction goes ahead anyway.
    ///
    /// # Safety
    /// Handles must have been created from `device`.
    pub(crate) unsafe fn destroy<D: PresentDevice + ?Sized>(mut self, device: &D) {
        // SAFETY: caller contract.
        unsafe {
            if self.frame_fence != vk::Fence::null() {
                if let Err(e) = device.wait_for_fence(self.frame_fence) {
                    warn!("waiting on swap image fence before teardown: {e}");
                }
            }
            self.release(device);
        }
    }

    pub fn image(&self) -> vk::Image {
        self.image
    }

    pub fn view(&self) -> vk::ImageView {
        self.view
    }

    pub fn command_buffer(&self) -> vk::CommandBuffer {
        self.command_buffer
    }

    pub fn image_acquired(&self) -> vk::Semaphore {
        self.image_acquired
    }

    pub fn render_finished(&self) -> vk::Semaphore {
        self.render_finished
    }

    pub fn frame_fence(&self) -> vk::Fence {
        self.frame_fence
    }
}

/// Builds one [`SwapImage`] per entry of `images`. On failure only the slots
/// already built are torn down.
///
/// # Safety
/// Same as [`SwapImage::new`], for every image.
pub(crate) unsafe fn build_pool<D: PresentDevice + ?Sized>(
    device: &D,
    images: &[vk::Image],
    format: vk::Format,
    family: u32,
) -> Result<Vec<SwapImage>> {
    let mut pool = Vec::with_capacity(images.len());
    for &image in images {
        // SAFETY: forwarded caller contract.
        match unsafe { SwapImage::new(device, image, format, family) } {
            Ok(slot) => pool.push(slot),
            Err(e) => {
                // SAFETY: the prefix was created from `device` and never used.
                unsafe { destroy_pool(device, pool) };
                return Err(e);
            }
        }
    }
    Ok(pool)
}

/// # Safety
/// Every slot must have been created from `device`.
pub(crate) unsafe fn destroy_pool<D: PresentDevice + ?Sized>(device: &D, pool: Vec<SwapImage>) {
    for slot in pool {
        // SAFETY: caller contract.
        unsafe { slot.destroy(device) };
    }
}
