//! framepace - windowed demo
//!
//! Opens a window, renders a spinning quad through the Vulkan backend and
//! paces the loop to the configured frame rate.

use anyhow::Result;
use tracing::{debug, error, info};
use winit::application::ApplicationHandler;
use winit::event::WindowEvent;
use winit::event_loop::{ActiveEventLoop, ControlFlow, EventLoop};
use winit::window::WindowId;

use framepace_core::{Config, FrameClock};
use framepace_platform::Window;
use framepace_renderer::{RenderPacket, Renderer, VulkanBackend};

struct App {
    config: Config,
    window: Option<Window>,
    renderer: Option<Renderer>,
    clock: FrameClock,
    /// First fatal error; reported by `main` once the loop exits.
    failure: Option<anyhow::Error>,
}

impl App {
    fn new(config: Config) -> Self {
        let clock = FrameClock::new(config.frame.target_fps);
        Self {
            config,
            window: None,
            renderer: None,
            clock,
            failure: None,
        }
    }

    fn create_renderer(&self, window: &Window) -> Result<Renderer> {
        let backend = VulkanBackend::new(window.inner_arc(), self.config.renderer.clone());
        let renderer = Renderer::new(
            Box::new(backend),
            &self.config.window.title,
            window.width(),
            window.height(),
        )?;
        Ok(renderer)
    }

    /// Shuts the renderer down while the window still exists.
    fn shutdown(&mut self) {
        if let Some(mut renderer) = self.renderer.take()
            && let Err(e) = renderer.shutdown()
        {
            error!("Renderer shutdown failed: {}", e);
            self.failure.get_or_insert(e.into());
        }
        self.window = None;
    }

    fn fail(&mut self, event_loop: &ActiveEventLoop, err: anyhow::Error) {
        error!("{:#}", err);
        self.failure.get_or_insert(err);
        self.shutdown();
        event_loop.exit();
    }

    fn tick(&mut self, event_loop: &ActiveEventLoop) {
        let delta_time = self.clock.tick();

        if let Some(window) = &self.window
            && window.is_minimized()
        {
            return;
        }

        if let Some(renderer) = self.renderer.as_mut()
            && let Err(e) = renderer.draw_frame(&RenderPacket { delta_time })
        {
            self.fail(event_loop, e.into());
            return;
        }

        self.clock.sleep_remaining();
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }

        let window = match Window::from_config(event_loop, &self.config.window) {
            Ok(window) => window,
            Err(e) => {
                self.fail(event_loop, e.into());
                return;
            }
        };

        match self.create_renderer(&window) {
            Ok(renderer) => {
                info!("Initialization complete, entering main loop");
                self.renderer = Some(renderer);
                self.window = Some(window);
            }
            Err(e) => self.fail(event_loop, e.context("Failed to create renderer")),
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        match event {
            WindowEvent::CloseRequested => {
                info!("Close requested, shutting down");
                self.shutdown();
                event_loop.exit();
            }
            WindowEvent::Resized(size) => {
                if let Some(window) = self.window.as_mut() {
                    window.resize(size.width, size.height);
                }
                if size.width == 0 || size.height == 0 {
                    debug!("Window minimised, ignoring resize");
                    return;
                }
                if let Some(renderer) = self.renderer.as_mut() {
                    renderer.resize(size.width, size.height);
                }
            }
            WindowEvent::RedrawRequested => self.tick(event_loop),
            _ => {}
        }
    }

    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(window) = &self.window {
            window.request_redraw();
        }
    }

    fn exiting(&mut self, _event_loop: &ActiveEventLoop) {
        self.shutdown();
    }
}

fn main() -> Result<()> {
    let config = Config::load()?;
    framepace_core::init_logging_with(&config.log.filter);
    info!("Starting framepace");

    let event_loop = EventLoop::new()?;
    event_loop.set_control_flow(ControlFlow::Poll);

    let mut app = App::new(config);
    event_loop.run_app(&mut app)?;

    match app.failure.take() {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

