// SPDX-License-Identifier: CEPL-1.0
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RenderSize {
    pub width: u32,
    pub height: u32,
}

impl RenderSize {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// A zero-sized framebuffer (minimized window) cannot back a present chain.
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

/// What a renderer needs from the windowing layer.
///
/// The raw handles feed surface creation; the rest drives the frame loop.
pub trait WindowSystem: HasWindowHandle + HasDisplayHandle {
    /// Current framebuffer size in pixels.
    fn framebuffer_size(&self) -> RenderSize;

    /// True once the user asked the window to close.
    fn should_close(&self) -> bool;

    /// Dispatch pending window events without blocking.
    fn pump_events(&mut self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_dimension_is_empty() {
        assert!(RenderSize::new(0, 720).is_empty());
        assert!(RenderSize::new(1280, 0).is_empty());
        assert!(!RenderSize::new(1, 1).is_empty());
    }
}
