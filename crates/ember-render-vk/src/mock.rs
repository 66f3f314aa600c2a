// SPDX-License-Identifier: CEPL-1.0
//! Scripted [`PresentDevice`] that tracks handle lifetimes and sync state.
//!
//! Misuse the driver would not catch (waiting on a fence that can never
//! signal, acquiring into a signaled semaphore, double destroys) panics.

use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap, VecDeque};

use ash::prelude::VkResult;
use ash::vk::{self, Handle};

use crate::device::{FrameSubmit, ImageTransition, PresentDevice, Queue};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Kind {
    Swapchain,
    ImageView,
    Semaphore,
    Fence,
    CommandPool,
    CommandBuffer,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum Event {
    Create(Kind, u64),
    Destroy(u64),
    WaitFence(vk::Fence),
    ResetFence(vk::Fence),
    Begin(vk::CommandBuffer),
    End(vk::CommandBuffer),
    Transition {
        image: vk::Image,
        new_layout: vk::ImageLayout,
    },
    Submit {
        cmd: vk::CommandBuffer,
        wait: vk::Semaphore,
        signal: vk::Semaphore,
        fence: vk::Fence,
    },
    Present {
        index: u32,
        wait: vk::Semaphore,
    },
    Acquire {
        index: u32,
        signal: vk::Semaphore,
    },
    WaitIdle,
    Note(&'static str),
}

/// What a `create_swapchain` call asked for.
#[derive(Clone, Debug)]
pub(crate) struct SwapchainRecord {
    pub min_image_count: u32,
    pub format: vk::Format,
    pub extent: vk::Extent2D,
    pub present_mode: vk::PresentModeKHR,
    pub usage: vk::ImageUsageFlags,
    pub sharing_mode: vk::SharingMode,
    pub queue_families: Vec<u32>,
    pub old_swapchain: vk::SwapchainKHR,
}

struct Chain {
    images: Vec<vk::Image>,
    next: usize,
}

#[derive(Default)]
struct State {
    next_handle: u64,
    live: BTreeMap<u64, Kind>,
    fences: HashMap<u64, bool>,
    semaphores: HashMap<u64, bool>,
    chains: HashMap<u64, Chain>,
    pool_buffers: HashMap<u64, Vec<u64>>,
    pool_families: Vec<u32>,
    swapchain_infos: Vec<SwapchainRecord>,
    events: Vec<Event>,
    acquire_script: VecDeque<VkResult<bool>>,
    present_script: VecDeque<VkResult<bool>>,
    submit_failure: Option<vk::Result>,
    created: usize,
    destroyed: usize,
    create_limit: Option<usize>,
}

impl State {
    fn create(&mut self, kind: Kind) -> VkResult<u64> {
        if self.create_limit.is_some_and(|limit| self.created >= limit) {
            return Err(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY);
        }
        let raw = self.fresh();
        self.created += 1;
        self.live.insert(raw, kind);
        self.events.push(Event::Create(kind, raw));
        Ok(raw)
    }

    fn fresh(&mut self) -> u64 {
        self.next_handle += 1;
        self.next_handle
    }

    fn destroy(&mut self, raw: u64, kind: Kind) {
        match self.live.remove(&raw) {
            Some(k) => assert_eq!(k, kind, "destroying {raw:#x} as the wrong kind"),
            None => panic!("destroying {kind:?} {raw:#x} which is not live"),
        }
        self.destroyed += 1;
        self.events.push(Event::Destroy(raw));
    }

    fn expect_live(&self, raw: u64, kind: Kind) {
        assert_eq!(self.live.get(&raw), Some(&kind), "{kind:?} {raw:#x} is not live");
    }
}

pub(crate) struct MockDevice {
    graphics: Queue,
    present: Queue,
    surface: vk::SurfaceKHR,
    caps: RefCell<vk::SurfaceCapabilitiesKHR>,
    formats: RefCell<Vec<vk::SurfaceFormatKHR>>,
    modes: RefCell<Vec<vk::PresentModeKHR>>,
    state: RefCell<State>,
}

impl MockDevice {
    /// One family doing graphics and present; min 2 images, no maximum,
    /// extent taken from the request.
    pub fn new() -> Self {
        Self::with_families(0, 0)
    }

    pub fn with_families(graphics: u32, present: u32) -> Self {
        let caps = vk::SurfaceCapabilitiesKHR {
            min_image_count: 2,
            max_image_count: 0,
            current_extent: vk::Extent2D {
                width: u32::MAX,
                height: u32::MAX,
            },
            min_image_extent: vk::Extent2D { width: 1, height: 1 },
            max_image_extent: vk::Extent2D {
                width: 8192,
                height: 8192,
            },
            max_image_array_layers: 1,
            supported_transforms: vk::SurfaceTransformFlagsKHR::IDENTITY,
            current_transform: vk::SurfaceTransformFlagsKHR::IDENTITY,
            supported_composite_alpha: vk::CompositeAlphaFlagsKHR::OPAQUE,
            supported_usage_flags: vk::ImageUsageFlags::COLOR_ATTACHMENT
                | vk::ImageUsageFlags::TRANSFER_DST,
        };
        Self {
            graphics: Queue {
                handle: vk::Queue::from_raw(0xA000 + u64::from(graphics)),
                family: graphics,
            },
            present: Queue {
                handle: vk::Queue::from_raw(0xA000 + u64::from(present)),
                family: present,
            },
            surface: vk::SurfaceKHR::from_raw(0xB000),
            caps: RefCell::new(caps),
            formats: RefCell::new(vec![
                vk::SurfaceFormatKHR {
                    format: vk::Format::B8G8R8A8_UNORM,
                    color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
                },
                vk::SurfaceFormatKHR {
                    format: vk::Format::B8G8R8A8_SRGB,
                    color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
                },
            ]),
            modes: RefCell::new(vec![vk::PresentModeKHR::FIFO, vk::PresentModeKHR::MAILBOX]),
            state: RefCell::new(State::default()),
        }
    }

    pub fn set_capabilities(&self, caps: vk::SurfaceCapabilitiesKHR) {
        *self.caps.borrow_mut() = caps;
    }

    pub fn set_formats(&self, formats: Vec<vk::SurfaceFormatKHR>) {
        *self.formats.borrow_mut() = formats;
    }

    /// Lets `n` more creations succeed, then fails every later one.
    pub fn fail_create_after(&self, n: usize) {
        let mut state = self.state.borrow_mut();
        state.create_limit = Some(state.created + n);
    }

    pub fn allow_creates(&self) {
        self.state.borrow_mut().create_limit = None;
    }

    pub fn script_acquire(&self, result: VkResult<bool>) {
        self.state.borrow_mut().acquire_script.push_back(result);
    }

    pub fn script_present(&self, result: VkResult<bool>) {
        self.state.borrow_mut().present_script.push_back(result);
    }

    /// Fails the next `queue_submit` with `result` before it touches any
    /// sync state.
    pub fn fail_next_submit(&self, result: vk::Result) {
        self.state.borrow_mut().submit_failure = Some(result);
    }

    pub fn note(&self, what: &'static str) {
        self.state.borrow_mut().events.push(Event::Note(what));
    }

    pub fn live_count(&self) -> usize {
        self.state.borrow().live.len()
    }

    pub fn live_of(&self, kind: Kind) -> usize {
        self.state.borrow().live.values().filter(|k| **k == kind).count()
    }

    pub fn live_swapchains(&self) -> usize {
        self.live_of(Kind::Swapchain)
    }

    pub fn is_live(&self, raw: u64) -> bool {
        self.state.borrow().live.contains_key(&raw)
    }

    pub fn created_count(&self) -> usize {
        self.state.borrow().created
    }

    pub fn destroyed_count(&self) -> usize {
        self.state.borrow().destroyed
    }

    pub fn fence_signaled(&self, fence: vk::Fence) -> bool {
        self.state.borrow().fences[&fence.as_raw()]
    }

    pub fn semaphore_signaled(&self, semaphore: vk::Semaphore) -> bool {
        self.state.borrow().semaphores[&semaphore.as_raw()]
    }

    pub fn command_pool_families(&self) -> Vec<u32> {
        self.state.borrow().pool_families.clone()
    }

    pub fn last_swapchain_info(&self) -> Option<SwapchainRecord> {
        self.state.borrow().swapchain_infos.last().cloned()
    }

    pub fn events(&self) -> Vec<Event> {
        self.state.borrow().events.clone()
    }

    pub fn clear_events(&self) {
        self.state.borrow_mut().events.clear();
    }

    pub fn position(&self, pred: impl Fn(&Event) -> bool) -> Option<usize> {
        self.state.borrow().events.iter().position(pred)
    }

    pub fn last_acquire(&self) -> Option<Event> {
        self.state
            .borrow()
            .events
            .iter()
            .rev()
            .find(|e| matches!(e, Event::Acquire { .. }))
            .cloned()
    }
}

impl PresentDevice for MockDevice {
    fn graphics_queue(&self) -> Queue {
        self.graphics
    }

    fn present_queue(&self) -> Queue {
        self.present
    }

    fn surface(&self) -> vk::SurfaceKHR {
        self.surface
    }

    unsafe fn surface_capabilities(&self) -> VkResult<vk::SurfaceCapabilitiesKHR> {
        Ok(*self.caps.borrow())
    }

    unsafe fn surface_formats(&self) -> VkResult<Vec<vk::SurfaceFormatKHR>> {
        Ok(self.formats.borrow().clone())
    }

    unsafe fn surface_present_modes(&self) -> VkResult<Vec<vk::PresentModeKHR>> {
        Ok(self.modes.borrow().clone())
    }

    unsafe fn create_swapchain(
        &self,
        info: &vk::SwapchainCreateInfoKHR<'_>,
    ) -> VkResult<vk::SwapchainKHR> {
        assert_eq!(info.surface, self.surface);
        let mut state = self.state.borrow_mut();
        if info.old_swapchain != vk::SwapchainKHR::null() {
            state.expect_live(info.old_swapchain.as_raw(), Kind::Swapchain);
        }
        let queue_families = if info.queue_family_index_count == 0 {
            Vec::new()
        } else {
            // SAFETY: count and pointer come from the same slice.
            unsafe {
                std::slice::from_raw_parts(
                    info.p_queue_family_indices,
                    info.queue_family_index_count as usize,
                )
            }
            .to_vec()
        };
        state.swapchain_infos.push(SwapchainRecord {
            min_image_count: info.min_image_count,
            format: info.image_format,
            extent: info.image_extent,
            present_mode: info.present_mode,
            usage: info.image_usage,
            sharing_mode: info.image_sharing_mode,
            queue_families,
            old_swapchain: info.old_swapchain,
        });

        let raw = state.create(Kind::Swapchain)?;
        let images = (0..info.min_image_count)
            .map(|_| vk::Image::from_raw(state.fresh()))
            .collect();
        state.chains.insert(raw, Chain { images, next: 0 });
        Ok(vk::SwapchainKHR::from_raw(raw))
    }

    unsafe fn destroy_swapchain(&self, swapchain: vk::SwapchainKHR) {
        let mut state = self.state.borrow_mut();
        state.destroy(swapchain.as_raw(), Kind::Swapchain);
        state.chains.remove(&swapchain.as_raw());
    }

    unsafe fn swapchain_images(&self, swapchain: vk::SwapchainKHR) -> VkResult<Vec<vk::Image>> {
        let state = self.state.borrow();
        state.expect_live(swapchain.as_raw(), Kind::Swapchain);
        Ok(state.chains[&swapchain.as_raw()].images.clone())
    }

    unsafe fn acquire_next_image(
        &self,
        swapchain: vk::SwapchainKHR,
        signal: vk::Semaphore,
    ) -> VkResult<(u32, bool)> {
        let mut state = self.state.borrow_mut();
        state.expect_live(swapchain.as_raw(), Kind::Swapchain);
        state.expect_live(signal.as_raw(), Kind::Semaphore);
        let suboptimal = state.acquire_script.pop_front().unwrap_or(Ok(false))?;
        assert!(
            !state.semaphores[&signal.as_raw()],
            "acquire handed an already signaled semaphore"
        );
        state.semaphores.insert(signal.as_raw(), true);

        let chain = state
            .chains
            .get_mut(&swapchain.as_raw())
            .expect("live chain");
        let index = chain.next as u32;
        chain.next = (chain.next + 1) % chain.images.len();
        state.events.push(Event::Acquire { index, signal });
        Ok((index, suboptimal))
    }

    unsafe fn queue_present(
        &self,
        queue: vk::Queue,
        swapchain: vk::SwapchainKHR,
        image_index: u32,
        wait: vk::Semaphore,
    ) -> VkResult<bool> {
        assert_eq!(queue, self.present.handle);
        let mut state = self.state.borrow_mut();
        state.expect_live(swapchain.as_raw(), Kind::Swapchain);
        assert!(
            state.semaphores[&wait.as_raw()],
            "present waits on an unsignaled semaphore"
        );
        state.semaphores.insert(wait.as_raw(), false);
        state.events.push(Event::Present {
            index: image_index,
            wait,
        });
        state.present_script.pop_front().unwrap_or(Ok(false))
    }

    unsafe fn create_image_view(
        &self,
        image: vk::Image,
        _format: vk::Format,
    ) -> VkResult<vk::ImageView> {
        assert_ne!(image, vk::Image::null());
        let raw = self.state.borrow_mut().create(Kind::ImageView)?;
        Ok(vk::ImageView::from_raw(raw))
    }

    unsafe fn destroy_image_view(&self, view: vk::ImageView) {
        self.state.borrow_mut().destroy(view.as_raw(), Kind::ImageView);
    }

    unsafe fn create_semaphore(&self) -> VkResult<vk::Semaphore> {
        let mut state = self.state.borrow_mut();
        let raw = state.create(Kind::Semaphore)?;
        state.semaphores.insert(raw, false);
        Ok(vk::Semaphore::from_raw(raw))
    }

    unsafe fn destroy_semaphore(&self, semaphore: vk::Semaphore) {
        let mut state = self.state.borrow_mut();
        state.destroy(semaphore.as_raw(), Kind::Semaphore);
        state.semaphores.remove(&semaphore.as_raw());
    }

    unsafe fn create_fence(&self, signaled: bool) -> VkResult<vk::Fence> {
        let mut state = self.state.borrow_mut();
        let raw = state.create(Kind::Fence)?;
        state.fences.insert(raw, signaled);
        Ok(vk::Fence::from_raw(raw))
    }

    unsafe fn destroy_fence(&self, fence: vk::Fence) {
        let mut state = self.state.borrow_mut();
        state.destroy(fence.as_raw(), Kind::Fence);
        state.fences.remove(&fence.as_raw());
    }

    unsafe fn wait_for_fence(&self, fence: vk::Fence) -> VkResult<()> {
        let mut state = self.state.borrow_mut();
        state.expect_live(fence.as_raw(), Kind::Fence);
        assert!(
            state.fences[&fence.as_raw()],
            "waiting on fence {fence:?} that nothing will signal"
        );
        state.events.push(Event::WaitFence(fence));
        Ok(())
    }

    unsafe fn reset_fence(&self, fence: vk::Fence) -> VkResult<()> {
        let mut state = self.state.borrow_mut();
        state.expect_live(fence.as_raw(), Kind::Fence);
        state.fences.insert(fence.as_raw(), false);
        state.events.push(Event::ResetFence(fence));
        Ok(())
    }

    unsafe fn create_command_pool(&self, family: u32) -> VkResult<vk::CommandPool> {
        let mut state = self.state.borrow_mut();
        let raw = state.create(Kind::CommandPool)?;
        state.pool_buffers.insert(raw, Vec::new());
        state.pool_families.push(family);
        Ok(vk::CommandPool::from_raw(raw))
    }

    unsafe fn destroy_command_pool(&self, pool: vk::CommandPool) {
        let mut state = self.state.borrow_mut();
        let buffers = state.pool_buffers.remove(&pool.as_raw()).unwrap_or_default();
        for buffer in buffers {
            state.destroy(buffer, Kind::CommandBuffer);
        }
        state.destroy(pool.as_raw(), Kind::CommandPool);
    }

    unsafe fn allocate_command_buffer(
        &self,
        pool: vk::CommandPool,
    ) -> VkResult<vk::CommandBuffer> {
        let mut state = self.state.borrow_mut();
        state.expect_live(pool.as_raw(), Kind::CommandPool);
        let raw = state.create(Kind::CommandBuffer)?;
        state
            .pool_buffers
            .get_mut(&pool.as_raw())
            .expect("live pool")
            .push(raw);
        Ok(vk::CommandBuffer::from_raw(raw))
    }

    unsafe fn begin_command_buffer(&self, cmd: vk::CommandBuffer) -> VkResult<()> {
        let mut state = self.state.borrow_mut();
        state.expect_live(cmd.as_raw(), Kind::CommandBuffer);
        state.events.push(Event::Begin(cmd));
        Ok(())
    }

    unsafe fn end_command_buffer(&self, cmd: vk::CommandBuffer) -> VkResult<()> {
        self.state.borrow_mut().events.push(Event::End(cmd));
        Ok(())
    }

    unsafe fn cmd_transition_image(&self, _cmd: vk::CommandBuffer, transition: &ImageTransition) {
        self.state.borrow_mut().events.push(Event::Transition {
            image: transition.image,
            new_layout: transition.new_layout,
        });
    }

    unsafe fn queue_submit(&self, queue: vk::Queue, submit: &FrameSubmit) -> VkResult<()> {
        assert_eq!(queue, self.graphics.handle);
        let mut state = self.state.borrow_mut();
        state.expect_live(submit.fence.as_raw(), Kind::Fence);
        if let Some(result) = state.submit_failure.take() {
            return Err(result);
        }
        assert!(
            state.semaphores[&submit.wait.as_raw()],
            "submit waits on an unsignaled semaphore"
        );
        assert!(
            !state.semaphores[&submit.signal.as_raw()],
            "submit signals an already signaled semaphore"
        );
        assert!(
            !state.fences[&submit.fence.as_raw()],
            "submit with a fence that is still signaled"
        );
        // The mock device finishes work the moment it is submitted.
        state.semaphores.insert(submit.wait.as_raw(), false);
        state.semaphores.insert(submit.signal.as_raw(), true);
        state.fences.insert(submit.fence.as_raw(), true);
        state.events.push(Event::Submit {
            cmd: submit.command_buffer,
            wait: submit.wait,
            signal: submit.signal,
            fence: submit.fence,
        });
        Ok(())
    }

    unsafe fn wait_idle(&self) -> VkResult<()> {
        self.state.borrow_mut().events.push(Event::WaitIdle);
        Ok(())
    }
}
