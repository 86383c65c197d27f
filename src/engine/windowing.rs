use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{error, info};

use crate::engine::{Engine, EngineError, EngineResult};

use winit::application::ApplicationHandler;
use winit::event::{ElementState, KeyEvent, WindowEvent};
use winit::event_loop::{ActiveEventLoop, ControlFlow, EventLoop};
use winit::keyboard::{Key, NamedKey};
use winit::window::{Window, WindowAttributes, WindowId};

/// How often the desktop loop checks whether the render thread is still alive.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Desktop host for the engine (winit ApplicationHandler).
///
/// The window is the host surface: created on resume, handed to the engine,
/// and withdrawn on suspend. Closing it or pressing Escape destroys the
/// engine.
pub struct Windowing;

impl Windowing {
    pub fn run_app(engine: Engine) -> EngineResult<()> {
        let event_loop = EventLoop::new().map_err(|e| EngineError::Windowing(e.to_string()))?;
        event_loop.set_control_flow(ControlFlow::WaitUntil(Instant::now() + POLL_INTERVAL));

        let mut app = App {
            window: None,
            engine,
            title: String::new(),
            result: Ok(()),
        };

        event_loop
            .run_app(&mut app)
            .map_err(|e| EngineError::Windowing(e.to_string()))?;

        app.engine.destroy()?;
        app.result
    }
}

struct App {
    window: Option<Arc<Window>>,
    engine: Engine,
    title: String,
    result: EngineResult<()>,
}

impl App {
    fn shutdown(&mut self, event_loop: &ActiveEventLoop) {
        if let Err(e) = self.engine.destroy() {
            error!("[Windowing] engine destroy failed: {e}");
            self.result = Err(e);
        }
        self.window = None;
        event_loop.exit();
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }

        let attrs: WindowAttributes = Window::default_attributes()
            .with_title("stereo-plane")
            .with_inner_size(winit::dpi::LogicalSize::new(640.0, 360.0));

        let window = match event_loop.create_window(attrs) {
            Ok(window) => Arc::new(window),
            Err(e) => {
                error!("[Windowing] failed to create window: {e}");
                self.result = Err(EngineError::Windowing(e.to_string()));
                self.shutdown(event_loop);
                return;
            }
        };

        self.engine.attach_surface(u64::from(window.id()));
        self.engine.resume();
        self.window = Some(window);
    }

    fn suspended(&mut self, _event_loop: &ActiveEventLoop) {
        self.engine.pause();
        self.engine.detach_surface();
        self.window = None;
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        match event {
            WindowEvent::CloseRequested => self.shutdown(event_loop),

            WindowEvent::KeyboardInput {
                event:
                    KeyEvent {
                        logical_key: Key::Named(NamedKey::Escape),
                        state: ElementState::Pressed,
                        ..
                    },
                ..
            } => self.shutdown(event_loop),

            WindowEvent::Focused(focused) => {
                if focused {
                    self.engine.resume();
                } else {
                    self.engine.pause();
                }
            }

            _ => {}
        }
    }

    fn about_to_wait(&mut self, event_loop: &ActiveEventLoop) {
        if self.engine.is_finished() {
            info!("[Windowing] render thread exited, closing");
            self.shutdown(event_loop);
            return;
        }

        if let Some(window) = &self.window {
            let title = match self.engine.video_texture_id() {
                Some(id) => format!("stereo-plane - rendering (texture {id:#x})"),
                None => "stereo-plane - starting".to_string(),
            };
            if title != self.title {
                window.set_title(&title);
                self.title = title;
            }
        }

        event_loop.set_control_flow(ControlFlow::WaitUntil(Instant::now() + POLL_INTERVAL));
    }
}
