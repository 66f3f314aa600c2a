// SPDX-License-Identifier: CEPL-1.0
use ash::prelude::VkResult;
use ash::vk;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("could not load the Vulkan loader: {0}")]
    Loading(#[from] ash::LoadingError),

    #[error("window handle unavailable: {0}")]
    WindowHandle(#[from] raw_window_handle::HandleError),

    #[error("application name contains an interior NUL byte")]
    InvalidAppName,

    #[error("presentation surface creation failed: {0}")]
    SurfaceInitFailed(vk::Result),

    #[error("no physical device supports the required extensions, surface and queues")]
    NoSuitableDevices,

    #[error("surface extent {width}x{height} cannot back a swapchain")]
    InvalidSurfaceDimensions { width: u32, height: u32 },

    #[error("acquiring the initial swapchain image failed: {0}")]
    ImageAcquireFailed(vk::Result),

    #[error("no memory type satisfies the requested property flags")]
    NoSuitableMemoryType,

    #[error("swapchain is out of date with its surface and must be recreated")]
    OutOfDate,

    #[error("{op} failed: {result}")]
    Vulkan {
        op: &'static str,
        result: vk::Result,
    },
}

impl Error {
    /// True for conditions a caller recovers from by recreating the swapchain,
    /// including a rebuilt chain that went stale before its first acquire.
    pub fn needs_recreate(&self) -> bool {
        matches!(
            self,
            Error::OutOfDate | Error::ImageAcquireFailed(vk::Result::ERROR_OUT_OF_DATE_KHR)
        )
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Labels a raw driver result with the call that produced it.
pub(crate) trait VkResultExt<T> {
    fn during(self, op: &'static str) -> Result<T>;
}

impl<T> VkResultExt<T> for VkResult<T> {
    fn during(self, op: &'static str) -> Result<T> {
        self.map_err(|result| Error::Vulkan { op, result })
    }
}
