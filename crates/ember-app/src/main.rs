// SPDX-License-Identifier: CEPL-1.0
#![deny(unsafe_op_in_unsafe_fn)]
use std::path::PathBuf;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context as _, Result};
use clap::Parser;
use ember_core::init_tracing;
use ember_platform::PlatformWindow;
use ember_render::{RenderSize, WindowSystem};
use ember_render_vk::{ClearColor, Context, Error, PresentState, Swapchain};
use tracing::{debug, info};

mod config;

use config::{AppCfg, VALIDATION_ENV};

/// Sleep between event pumps while there is nothing to draw into.
const PAUSE_POLL: Duration = Duration::from_millis(16);

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// TOML config file; missing means defaults
    #[arg(long, default_value = "ember.toml")]
    config: PathBuf,
    /// Force Vulkan validation on or off
    #[arg(long)]
    validation: Option<bool>,
    /// Exit after presenting this many frames
    #[arg(long)]
    frames: Option<u64>,
}

/// Counts presented frames and reports them about once a second.
struct FpsCounter {
    frames: u32,
    since: Instant,
}

impl FpsCounter {
    fn new(now: Instant) -> Self {
        Self { frames: 0, since: now }
    }

    /// Returns the count for the window that just closed, if one did.
    fn tick(&mut self, now: Instant) -> Option<u32> {
        self.frames = self.frames.saturating_add(1);
        if now.duration_since(self.since) < Duration::from_secs(1) {
            return None;
        }
        let fps = self.frames;
        self.frames = 0;
        self.since = now;
        Some(fps)
    }

    fn reset(&mut self, now: Instant) {
        self.frames = 0;
        self.since = now;
    }
}

fn main() -> Result<()> {
    init_tracing();
    let args = Args::parse();
    let cfg = config::load(&args.config);
    let validation = config::resolve_validation(
        args.validation,
        std::env::var(VALIDATION_ENV).ok().as_deref(),
        cfg.validation,
    );
    info!("app = {}, validation = {}", cfg.app_name, validation);

    // Dropped in reverse: context before window.
    let mut window = PlatformWindow::open(
        &cfg.window.title,
        RenderSize::new(cfg.window.width, cfg.window.height),
    )?;
    let ctx = Context::create(&cfg.app_name, &window, validation).context("vulkan init")?;
    info!("device = {}", ctx.device_name());

    run(&mut window, &ctx, &cfg, args.frames)
}

fn wait_for_area(window: &mut PlatformWindow) -> Option<RenderSize> {
    loop {
        window.pump_events();
        if window.should_close() {
            return None;
        }
        let size = window.framebuffer_size();
        if !size.is_empty() {
            return Some(size);
        }
        thread::sleep(PAUSE_POLL);
    }
}

fn run(
    window: &mut PlatformWindow,
    ctx: &Context,
    cfg: &AppCfg,
    max_frames: Option<u64>,
) -> Result<()> {
    let Some(mut requested) = wait_for_area(window) else {
        return Ok(());
    };
    let mut swapchain = Swapchain::create(ctx, requested).context("swapchain init")?;

    let mut clear = ClearColor::new(cfg.render.clear_color);
    if cfg.render.pulse {
        clear = clear.pulsing();
    }

    let mut frame: u64 = 0;
    let mut stale = false;
    let mut paused = false;
    let mut fps = FpsCounter::new(Instant::now());

    while !window.should_close() {
        window.pump_events();

        let size = window.framebuffer_size();
        if size.is_empty() {
            if !paused {
                info!("paused (framebuffer is {}x{})", size.width, size.height);
                paused = true;
            }
            thread::sleep(PAUSE_POLL);
            continue;
        }
        if paused {
            info!("resumed at {}x{}", size.width, size.height);
            paused = false;
            fps.reset(Instant::now());
        }

        if stale || size != requested {
            ctx.wait_idle().context("idle before swapchain recreation")?;
            match swapchain.recreate(size) {
                Ok(()) => {
                    requested = size;
                    stale = false;
                }
                Err(Error::InvalidSurfaceDimensions { width, height }) => {
                    debug!("surface reports {width}x{height}, retrying");
                    thread::sleep(PAUSE_POLL);
                    continue;
                }
                Err(e) if e.needs_recreate() => {
                    debug!("swapchain went stale while rebuilding, retrying");
                    stale = true;
                    continue;
                }
                Err(e) => return Err(e).context("swapchain recreation"),
            }
        }

        match swapchain.present(frame, &mut clear) {
            Ok(PresentState::Optimal) => {}
            Ok(PresentState::Suboptimal) => stale = true,
            Err(e) if e.needs_recreate() => {
                debug!("swapchain out of date");
                stale = true;
                continue;
            }
            Err(e) => return Err(e).context("present"),
        }

        frame += 1;
        if let Some(n) = fps.tick(Instant::now()) {
            info!("fps ~ {n}");
        }
        if max_frames.is_some_and(|max| frame >= max) {
            info!("presented {frame} frames, exiting");
            break;
        }
    }

    swapchain.wait_idle();
    Ok(())
}
