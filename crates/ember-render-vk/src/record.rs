// SPDX-License-Identifier: CEPL-1.0
use std::f32::consts::TAU;

use ash::vk;

use crate::context::Context;
use crate::device::color_subresource_range;

/// The swap image a frame is being recorded for.
#[derive(Clone, Copy, Debug)]
pub struct FrameTarget {
    /// In the recording state for the duration of [`FrameRecorder::record`].
    pub command_buffer: vk::CommandBuffer,
    /// In `GENERAL` layout while recording.
    pub image: vk::Image,
    pub view: vk::ImageView,
    pub format: vk::Format,
    pub extent: vk::Extent2D,
    pub index: u32,
}

/// Records a frame's work between the swapchain's layout transitions.
pub trait FrameRecorder<D: ?Sized = Context> {
    fn record(&mut self, device: &D, target: &FrameTarget, frame: u64);
}

/// Layout transitions only.
impl<D: ?Sized> FrameRecorder<D> for () {
    fn record(&mut self, _device: &D, _target: &FrameTarget, _frame: u64) {}
}

const PULSE_PERIOD: u64 = 240;

/// Clears the whole swap image to one color.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ClearColor {
    pub rgba: [f32; 4],
    /// Modulate brightness with the frame counter.
    pub pulse: bool,
}

impl ClearColor {
    pub fn new(rgba: [f32; 4]) -> Self {
        Self { rgba, pulse: false }
    }

    pub fn pulsing(mut self) -> Self {
        self.pulse = true;
        self
    }

    /// Color for `frame`. When pulsing, RGB swings between half and full
    /// strength; alpha never changes.
    pub fn color_for(&self, frame: u64) -> [f32; 4] {
        if !self.pulse {
            return self.rgba;
        }
        let phase = (frame % PULSE_PERIOD) as f32 / PULSE_PERIOD as f32 * TAU;
        let k = 0.75 + 0.25 * phase.sin();
        let [r, g, b, a] = self.rgba;
        [r * k, g * k, b * k, a]
    }
}

impl FrameRecorder<Context> for ClearColor {
    fn record(&mut self, ctx: &Context, target: &FrameTarget, frame: u64) {
        let value = vk::ClearColorValue {
            float32: self.color_for(frame),
        };
        // SAFETY: the swapchain only calls recorders while `command_buffer`
        // is recording and `image` is in GENERAL layout; swap images are
        // created with TRANSFER_DST usage.
        unsafe {
            ctx.device().cmd_clear_color_image(
                target.command_buffer,
                target.image,
                vk::ImageLayout::GENERAL,
                &value,
                &[color_subresource_range()],
            );
        }
    }
}
