// SPDX-License-Identifier: CEPL-1.0
//! The device calls the swapchain layer is built on.
//!
//! [`Context`] is the real implementation. Keeping the swapchain generic over
//! [`PresentDevice`] lets its frame protocol run against a scripted device.

use ash::prelude::VkResult;
use ash::vk;

use crate::context::Context;

/// A queue handle together with the family it was retrieved from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Queue {
    pub handle: vk::Queue,
    pub family: u32,
}

/// One layout transition recorded as a pipeline barrier.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ImageTransition {
    pub image: vk::Image,
    pub old_layout: vk::ImageLayout,
    pub new_layout: vk::ImageLayout,
    pub src_stage: vk::PipelineStageFlags,
    pub dst_stage: vk::PipelineStageFlags,
    pub src_access: vk::AccessFlags,
    pub dst_access: vk::AccessFlags,
}

impl ImageTransition {
    /// Undefined (or previously presented) contents to a layout any command
    /// may write to.
    pub fn to_general(image: vk::Image) -> Self {
        Self {
            image,
            old_layout: vk::ImageLayout::UNDEFINED,
            new_layout: vk::ImageLayout::GENERAL,
            src_stage: vk::PipelineStageFlags::TOP_OF_PIPE,
            dst_stage: vk::PipelineStageFlags::ALL_COMMANDS,
            src_access: vk::AccessFlags::empty(),
            dst_access: vk::AccessFlags::MEMORY_READ | vk::AccessFlags::MEMORY_WRITE,
        }
    }

    /// General layout to the presentation source layout.
    pub fn to_present(image: vk::Image) -> Self {
        Self {
            image,
            old_layout: vk::ImageLayout::GENERAL,
            new_layout: vk::ImageLayout::PRESENT_SRC_KHR,
            src_stage: vk::PipelineStageFlags::ALL_COMMANDS,
            dst_stage: vk::PipelineStageFlags::BOTTOM_OF_PIPE,
            src_access: vk::AccessFlags::MEMORY_WRITE,
            dst_access: vk::AccessFlags::empty(),
        }
    }

    pub(crate) fn barrier(&self) -> vk::ImageMemoryBarrier<'static> {
        vk::ImageMemoryBarrier::default()
            .src_access_mask(self.src_access)
            .dst_access_mask(self.dst_access)
            .old_layout(self.old_layout)
            .new_layout(self.new_layout)
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .image(self.image)
            .subresource_range(color_subresource_range())
    }
}

/// Single-mip, single-layer color range used for every swap image.
pub fn color_subresource_range() -> vk::ImageSubresourceRange {
    vk::ImageSubresourceRange {
        aspect_mask: vk::ImageAspectFlags::COLOR,
        base_mip_level: 0,
        level_count: 1,
        base_array_layer: 0,
        layer_count: 1,
    }
}

/// One command buffer submission with a single wait and a single signal.
#[derive(Clone, Copy, Debug)]
pub struct FrameSubmit {
    pub command_buffer: vk::CommandBuffer,
    pub wait: vk::Semaphore,
    pub wait_stage: vk::PipelineStageFlags,
    pub signal: vk::Semaphore,
    pub fence: vk::Fence,
}

/// Device operations used to build and drive a present chain.
///
/// Every method is a thin wrapper over one driver call. Callers uphold the
/// usual Vulkan validity rules; handles passed in must come from `self`.
#[allow(clippy::missing_safety_doc)]
pub trait PresentDevice {
    fn graphics_queue(&self) -> Queue;
    fn present_queue(&self) -> Queue;
    /// Surface every chain of this device presents to.
    fn surface(&self) -> vk::SurfaceKHR;

    unsafe fn surface_capabilities(&self) -> VkResult<vk::SurfaceCapabilitiesKHR>;
    unsafe fn surface_formats(&self) -> VkResult<Vec<vk::SurfaceFormatKHR>>;
    unsafe fn surface_present_modes(&self) -> VkResult<Vec<vk::PresentModeKHR>>;

    unsafe fn create_swapchain(
        &self,
        info: &vk::SwapchainCreateInfoKHR<'_>,
    ) -> VkResult<vk::SwapchainKHR>;
    unsafe fn destroy_swapchain(&self, swapchain: vk::SwapchainKHR);
    unsafe fn swapchain_images(&self, swapchain: vk::SwapchainKHR) -> VkResult<Vec<vk::Image>>;

    /// Returns `(image_index, suboptimal)`; never times out.
    unsafe fn acquire_next_image(
        &self,
        swapchain: vk::SwapchainKHR,
        signal: vk::Semaphore,
    ) -> VkResult<(u32, bool)>;

    /// Returns whether the chain was reported suboptimal.
    unsafe fn queue_present(
        &self,
        queue: vk::Queue,
        swapchain: vk::SwapchainKHR,
        image_index: u32,
        wait: vk::Semaphore,
    ) -> VkResult<bool>;

    unsafe fn create_image_view(&self, image: vk::Image, format: vk::Format)
        -> VkResult<vk::ImageView>;
    unsafe fn destroy_image_view(&self, view: vk::ImageView);

    unsafe fn create_semaphore(&self) -> VkResult<vk::Semaphore>;
    unsafe fn destroy_semaphore(&self, semaphore: vk::Semaphore);

    unsafe fn create_fence(&self, signaled: bool) -> VkResult<vk::Fence>;
    unsafe fn destroy_fence(&self, fence: vk::Fence);
    /// Blocks until `fence` is signaled.
    unsafe fn wait_for_fence(&self, fence: vk::Fence) -> VkResult<()>;
    unsafe fn reset_fence(&self, fence: vk::Fence) -> VkResult<()>;

    /// Pool whose buffers can be reset individually.
    unsafe fn create_command_pool(&self, family: u32) -> VkResult<vk::CommandPool>;
    /// Also frees every buffer allocated from `pool`.
    unsafe fn destroy_command_pool(&self, pool: vk::CommandPool);
    unsafe fn allocate_command_buffer(&self, pool: vk::CommandPool)
        -> VkResult<vk::CommandBuffer>;

    /// Resets `cmd` and begins one-time-submit recording.
    unsafe fn begin_command_buffer(&self, cmd: vk::CommandBuffer) -> VkResult<()>;
    unsafe fn end_command_buffer(&self, cmd: vk::CommandBuffer) -> VkResult<()>;
    unsafe fn cmd_transition_image(&self, cmd: vk::CommandBuffer, transition: &ImageTransition);

    unsafe fn queue_submit(&self, queue: vk::Queue, submit: &FrameSubmit) -> VkResult<()>;

    unsafe fn wait_idle(&self) -> VkResult<()>;
}

impl PresentDevice for Context {
    fn graphics_queue(&self) -> Queue {
        Context::graphics_queue(self)
    }

    fn present_queue(&self) -> Queue {
        Context::present_queue(self)
    }

    fn surface(&self) -> vk::SurfaceKHR {
        Context::surface(self)
    }

    unsafe fn surface_capabilities(&self) -> VkResult<vk::SurfaceCapabilitiesKHR> {
        // SAFETY: surface and physical device both belong to this context.
        unsafe {
            self.surface_loader().get_physical_device_surface_capabilities(
                self.physical_device(),
                Context::surface(self),
            )
        }
    }

    unsafe fn surface_formats(&self) -> VkResult<Vec<vk::SurfaceFormatKHR>> {
        // SAFETY: surface and physical device both belong to this context.
        unsafe {
            self.surface_loader()
                .get_physical_device_surface_formats(self.physical_device(), Context::surface(self))
        }
    }

    unsafe fn surface_present_modes(&self) -> VkResult<Vec<vk::PresentModeKHR>> {
        // SAFETY: surface and physical device both belong to this context.
        unsafe {
            self.surface_loader().get_physical_device_surface_present_modes(
                self.physical_device(),
                Context::surface(self),
            )
        }
    }

    unsafe fn create_swapchain(
        &self,
        info: &vk::SwapchainCreateInfoKHR<'_>,
    ) -> VkResult<vk::SwapchainKHR> {
        // SAFETY: caller provides a valid create info for this surface.
        unsafe { self.swapchain_loader().create_swapchain(info, None) }
    }

    unsafe fn destroy_swapchain(&self, swapchain: vk::SwapchainKHR) {
        // SAFETY: caller guarantees no pending use of `swapchain`.
        unsafe { self.swapchain_loader().destroy_swapchain(swapchain, None) }
    }

    unsafe fn swapchain_images(&self, swapchain: vk::SwapchainKHR) -> VkResult<Vec<vk::Image>> {
        // SAFETY: `swapchain` was created from this device.
        unsafe { self.swapchain_loader().get_swapchain_images(swapchain) }
    }

    unsafe fn acquire_next_image(
        &self,
        swapchain: vk::SwapchainKHR,
        signal: vk::Semaphore,
    ) -> VkResult<(u32, bool)> {
        // SAFETY: caller guarantees `signal` is unsignaled with no pending ops.
        unsafe {
            self.swapchain_loader()
                .acquire_next_image(swapchain, u64::MAX, signal, vk::Fence::null())
        }
    }

    unsafe fn queue_present(
        &self,
        queue: vk::Queue,
        swapchain: vk::SwapchainKHR,
        image_index: u32,
        wait: vk::Semaphore,
    ) -> VkResult<bool> {
        let waits = [wait];
        let swapchains = [swapchain];
        let indices = [image_index];
        let info = vk::PresentInfoKHR::default()
            .wait_semaphores(&waits)
            .swapchains(&swapchains)
            .image_indices(&indices);
        // SAFETY: the arrays outlive the call; image_index was acquired.
        unsafe { self.swapchain_loader().queue_present(queue, &info) }
    }

    unsafe fn create_image_view(
        &self,
        image: vk::Image,
        format: vk::Format,
    ) -> VkResult<vk::ImageView> {
        let info = vk::ImageViewCreateInfo::default()
            .image(image)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(format)
            .components(vk::ComponentMapping::default())
            .subresource_range(color_subresource_range());
        // SAFETY: `image` is a swap image of this device.
        unsafe { self.device().create_image_view(&info, None) }
    }

    unsafe fn destroy_image_view(&self, view: vk::ImageView) {
        // SAFETY: caller guarantees no pending use of `view`.
        unsafe { self.device().destroy_image_view(view, None) }
    }

    unsafe fn create_semaphore(&self) -> VkResult<vk::Semaphore> {
        // SAFETY: default create info has no pointers.
        unsafe {
            self.device()
                .create_semaphore(&vk::SemaphoreCreateInfo::default(), None)
        }
    }

    unsafe fn destroy_semaphore(&self, semaphore: vk::Semaphore) {
        // SAFETY: caller guarantees no pending use of `semaphore`.
        unsafe { self.device().destroy_semaphore(semaphore, None) }
    }

    unsafe fn create_fence(&self, signaled: bool) -> VkResult<vk::Fence> {
        let flags = if signaled {
            vk::FenceCreateFlags::SIGNALED
        } else {
            vk::FenceCreateFlags::empty()
        };
        // SAFETY: create info has no pointers.
        unsafe {
            self.device()
                .create_fence(&vk::FenceCreateInfo::default().flags(flags), None)
        }
    }

    unsafe fn destroy_fence(&self, fence: vk::Fence) {
        // SAFETY: caller guarantees no pending use of `fence`.
        unsafe { self.device().destroy_fence(fence, None) }
    }

    unsafe fn wait_for_fence(&self, fence: vk::Fence) -> VkResult<()> {
        // SAFETY: `fence` belongs to this device.
        unsafe { self.device().wait_for_fences(&[fence], true, u64::MAX) }
    }

    unsafe fn reset_fence(&self, fence: vk::Fence) -> VkResult<()> {
        // SAFETY: caller guarantees `fence` is not pending on a queue.
        unsafe { self.device().reset_fences(&[fence]) }
    }

    unsafe fn create_command_pool(&self, family: u32) -> VkResult<vk::CommandPool> {
        let info = vk::CommandPoolCreateInfo::default()
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER)
            .queue_family_index(family);
        // SAFETY: `family` is one of the families the device was created with.
        unsafe { self.device().create_command_pool(&info, None) }
    }

    unsafe fn destroy_command_pool(&self, pool: vk::CommandPool) {
        // SAFETY: caller guarantees no buffer of `pool` is pending.
        unsafe { self.device().destroy_command_pool(pool, None) }
    }

    unsafe fn allocate_command_buffer(
        &self,
        pool: vk::CommandPool,
    ) -> VkResult<vk::CommandBuffer> {
        let info = vk::CommandBufferAllocateInfo::default()
            .command_pool(pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);
        // SAFETY: `pool` belongs to this device.
        let buffers = unsafe { self.device().allocate_command_buffers(&info) }?;
        buffers
            .into_iter()
            .next()
            .ok_or(vk::Result::ERROR_OUT_OF_HOST_MEMORY)
    }

    unsafe fn begin_command_buffer(&self, cmd: vk::CommandBuffer) -> VkResult<()> {
        let info = vk::CommandBufferBeginInfo::default()
            .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        // SAFETY: caller guarantees `cmd` is not pending execution.
        unsafe {
            self.device()
                .reset_command_buffer(cmd, vk::CommandBufferResetFlags::empty())?;
            self.device().begin_command_buffer(cmd, &info)
        }
    }

    unsafe fn end_command_buffer(&self, cmd: vk::CommandBuffer) -> VkResult<()> {
        // SAFETY: `cmd` is in the recording state (caller contract).
        unsafe { self.device().end_command_buffer(cmd) }
    }

    unsafe fn cmd_transition_image(&self, cmd: vk::CommandBuffer, transition: &ImageTransition) {
        let barrier = transition.barrier();
        // SAFETY: `cmd` is recording and the barrier targets a swap image.
        unsafe {
            self.device().cmd_pipeline_barrier(
                cmd,
                transition.src_stage,
                transition.dst_stage,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                std::slice::from_ref(&barrier),
            )
        }
    }

    unsafe fn queue_submit(&self, queue: vk::Queue, submit: &FrameSubmit) -> VkResult<()> {
        let waits = [submit.wait];
        let stages = [submit.wait_stage];
        let buffers = [submit.command_buffer];
        let signals = [submit.signal];
        let info = vk::SubmitInfo::default()
            .wait_semaphores(&waits)
            .wait_dst_stage_mask(&stages)
            .command_buffers(&buffers)
            .signal_semaphores(&signals);
        // SAFETY: the arrays outlive the call; `cmd` has finished recording.
        unsafe {
            self.device()
                .queue_submit(queue, std::slice::from_ref(&info), submit.fence)
        }
    }

    unsafe fn wait_idle(&self) -> VkResult<()> {
        // SAFETY: always valid on a live device.
        unsafe { self.device().device_wait_idle() }
    }
}
