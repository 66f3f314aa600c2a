// SPDX-License-Identifier: CEPL-1.0
#![deny(unsafe_op_in_unsafe_fn)]
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use ember_render::{RenderSize, WindowSystem};
use tracing::{debug, info};
use winit::{
    application::ApplicationHandler,
    dpi::PhysicalSize,
    error::OsError,
    event::WindowEvent,
    event_loop::{ActiveEventLoop, EventLoop},
    platform::pump_events::{EventLoopExtPumpEvents, PumpStatus},
    raw_window_handle::{
        DisplayHandle, HandleError, HasDisplayHandle, HasWindowHandle, WindowHandle,
    },
    window::{Window, WindowAttributes, WindowId},
};

pub use winit;

/// How long `open` lets a single pump wait for the platform to resume us.
const OPEN_PUMP_TIMEOUT: Duration = Duration::from_millis(10);

struct WindowState {
    attributes: Option<WindowAttributes>,
    window: Option<Window>,
    create_error: Option<OsError>,
    close_requested: bool,
}

impl ApplicationHandler for WindowState {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }
        let Some(attributes) = self.attributes.take() else {
            return;
        };
        match event_loop.create_window(attributes) {
            Ok(window) => {
                let size = window.inner_size();
                info!("window created ({}x{})", size.width, size.height);
                self.window = Some(window);
            }
            Err(e) => self.create_error = Some(e),
        }
    }

    fn window_event(
        &mut self,
        _event_loop: &ActiveEventLoop,
        window_id: WindowId,
        event: WindowEvent,
    ) {
        if let Some(window) = &self.window {
            if window_id != window.id() {
                return;
            }
        }

        match event {
            WindowEvent::CloseRequested => {
                info!("CloseRequested");
                self.close_requested = true;
            }
            WindowEvent::Resized(size) => {
                debug!("Resized → {}x{}", size.width, size.height);
            }
            _ => {}
        }
    }
}

/// A single winit window driven by explicit event pumping.
///
/// The frame loop owns control flow: it calls [`WindowSystem::pump_events`]
/// once per iteration instead of handing the thread to `run_app`.
pub struct PlatformWindow {
    // Declared before the event loop so the window is dropped first.
    state: WindowState,
    event_loop: EventLoop<()>,
}

impl PlatformWindow {
    pub fn open(title: &str, size: RenderSize) -> Result<Self> {
        let event_loop = EventLoop::new().context("EventLoop::new")?;
        let attributes = Window::default_attributes()
            .with_title(title)
            .with_inner_size(PhysicalSize::new(size.width.max(1), size.height.max(1)));

        let mut this = Self {
            state: WindowState {
                attributes: Some(attributes),
                window: None,
                create_error: None,
                close_requested: false,
            },
            event_loop,
        };

        while this.state.window.is_none() {
            let status = this
                .event_loop
                .pump_app_events(Some(OPEN_PUMP_TIMEOUT), &mut this.state);
            if let Some(e) = this.state.create_error.take() {
                return Err(anyhow!(e).context("create_window"));
            }
            if let PumpStatus::Exit(code) = status {
                bail!("event loop exited with code {code} before the window opened");
            }
        }

        Ok(this)
    }

    fn window(&self) -> Option<&Window> {
        self.state.window.as_ref()
    }
}

impl WindowSystem for PlatformWindow {
    fn framebuffer_size(&self) -> RenderSize {
        self.window()
            .map(|w| {
                let size = w.inner_size();
                RenderSize::new(size.width, size.height)
            })
            .unwrap_or_default()
    }

    fn should_close(&self) -> bool {
        self.state.close_requested
    }

    fn pump_events(&mut self) {
        let status = self
            .event_loop
            .pump_app_events(Some(Duration::ZERO), &mut self.state);
        if let PumpStatus::Exit(code) = status {
            debug!("event loop exit requested (code {code})");
            self.state.close_requested = true;
        }
    }
}

impl HasWindowHandle for PlatformWindow {
    fn window_handle(&self) -> Result<WindowHandle<'_>, HandleError> {
        self.window()
            .ok_or(HandleError::Unavailable)?
            .window_handle()
    }
}

impl HasDisplayHandle for PlatformWindow {
    fn display_handle(&self) -> Result<DisplayHandle<'_>, HandleError> {
        self.window()
            .ok_or(HandleError::Unavailable)?
            .display_handle()
    }
}
