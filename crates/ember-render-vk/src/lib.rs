// SPDX-License-Identifier: CEPL-1.0
//! Vulkan device bootstrap and swapchain lifecycle for ember.
//!
//! [`Context`] owns the instance, surface and logical device for one window.
//! [`Swapchain`] borrows it, negotiates a present chain against the surface,
//! and drives the acquire, record, submit and present cycle.
#![deny(unsafe_op_in_unsafe_fn)]
#![warn(clippy::undocumented_unsafe_blocks)]

mod context;
mod debug;
mod device;
mod error;
pub mod probe;
mod record;
mod swap_image;
mod swapchain;

#[cfg(test)]
mod mock;

pub use ash;

pub use context::{
    find_memory_type, Context, DeviceCandidate, QueueAllocation, REQUIRED_DEVICE_EXTENSIONS,
};
pub use device::{color_subresource_range, FrameSubmit, ImageTransition, PresentDevice, Queue};
pub use error::{Error, Result};
pub use record::{ClearColor, FrameRecorder, FrameTarget};
pub use swap_image::SwapImage;
pub use swapchain::{
    choose_composite_alpha, choose_extent, choose_image_count, choose_present_mode,
    choose_surface_format, negotiate, sharing, Negotiated, PresentState, Swapchain,
    PREFERRED_COLOR_SPACE, PREFERRED_FORMAT,
};
