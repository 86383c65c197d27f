//! Control-thread side of the engine: spawns the render thread, forwards
//! lifecycle commands over a channel, and exposes a small set of status flags.
//!
//! The render thread is the only owner of the XR session, the swapchains and
//! the GPU context. Nothing here touches them.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use tracing::{debug, error, info, warn};

use crate::engine::frame_loop::FrameLoop;
use crate::engine::graphics::{GraphicsContext, StillImageSource, VideoFrameSource, VulkanoEyeRenderer};
use crate::engine::xr::{OpenXrRuntime, SwapchainManager, XrBootstrap, XrRuntime};
use crate::engine::{EngineConfig, EngineError, EngineResult};

/// Opaque native window handle supplied by the host.
pub type SurfaceHandle = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostCommand {
    Resume,
    Pause,
    AttachSurface(SurfaceHandle),
    DetachSurface,
    Destroy,
}

/// Flags readable from any thread.
#[derive(Debug, Default)]
pub struct EngineStatus {
    running: AtomicBool,
    resumed: AtomicBool,
    graphics_initialized: AtomicBool,
    video_texture_id: AtomicU64,
}

impl EngineStatus {
    pub fn is_graphics_initialized(&self) -> bool {
        self.graphics_initialized.load(Ordering::Acquire)
    }

    /// Only meaningful once graphics initialization has completed.
    pub fn video_texture_id(&self) -> Option<u64> {
        if self.is_graphics_initialized() {
            Some(self.video_texture_id.load(Ordering::Acquire))
        } else {
            None
        }
    }

    fn publish_graphics(&self, video_texture_id: u64) {
        self.video_texture_id.store(video_texture_id, Ordering::Release);
        self.graphics_initialized.store(true, Ordering::Release);
    }

    fn reset(&self) {
        self.running.store(false, Ordering::Release);
        self.resumed.store(false, Ordering::Release);
        self.graphics_initialized.store(false, Ordering::Release);
        self.video_texture_id.store(0, Ordering::Release);
    }
}

/// Render-thread end of the command channel.
pub struct CommandInbox {
    rx: Receiver<HostCommand>,
    status: Arc<EngineStatus>,
    surface: Option<SurfaceHandle>,
}

impl CommandInbox {
    fn new(rx: Receiver<HostCommand>, status: Arc<EngineStatus>) -> Self {
        Self {
            rx,
            status,
            surface: None,
        }
    }

    /// Apply every queued command without blocking. Returns true once the
    /// loop should stop (`Destroy`, or the control side hung up).
    pub fn drain(&mut self) -> bool {
        loop {
            match self.rx.try_recv() {
                Ok(HostCommand::Resume) => {
                    debug!("[Engine] resume");
                    self.status.resumed.store(true, Ordering::Release);
                }
                Ok(HostCommand::Pause) => {
                    debug!("[Engine] pause");
                    self.status.resumed.store(false, Ordering::Release);
                }
                Ok(HostCommand::AttachSurface(handle)) => {
                    info!("[Engine] surface {handle:#x} attached");
                    self.surface = Some(handle);
                }
                Ok(HostCommand::DetachSurface) => {
                    if let Some(handle) = self.surface.take() {
                        info!("[Engine] surface {handle:#x} detached");
                    }
                }
                Ok(HostCommand::Destroy) => return true,
                Err(TryRecvError::Empty) => return false,
                Err(TryRecvError::Disconnected) => {
                    warn!("[Engine] control channel closed");
                    return true;
                }
            }
        }
    }
}

/// Handle held by the control thread.
pub struct Engine {
    commands: Sender<HostCommand>,
    status: Arc<EngineStatus>,
    render_thread: Option<JoinHandle<()>>,
    surface: Option<SurfaceHandle>,
}

impl Engine {
    /// Spawn the render thread. Startup failures happen on that thread; they
    /// are logged there and show up here as `video_texture_id()` staying `None`.
    pub fn create(config: EngineConfig) -> EngineResult<Self> {
        Self::spawn_with(config, run_session)
    }

    fn spawn_with<F>(config: EngineConfig, body: F) -> EngineResult<Self>
    where
        F: FnOnce(&EngineConfig, &EngineStatus, &mut CommandInbox) -> EngineResult<()> + Send + 'static,
    {
        let (tx, rx) = mpsc::channel();
        let status = Arc::new(EngineStatus::default());
        status.running.store(true, Ordering::Release);

        let thread_status = status.clone();
        let handle = thread::Builder::new()
            .name("xr-render".to_string())
            .spawn(move || {
                let mut inbox = CommandInbox::new(rx, thread_status.clone());
                match body(&config, &thread_status, &mut inbox) {
                    Ok(()) => info!("[Engine] render thread finished"),
                    Err(e @ EngineError::Init { .. }) => error!("[Engine] startup aborted: {e}"),
                    Err(e) => error!("[Engine] render thread failed: {e}"),
                }
                thread_status.running.store(false, Ordering::Release);
                thread_status.graphics_initialized.store(false, Ordering::Release);
            })?;

        info!("[Engine] render thread spawned");
        Ok(Self {
            commands: tx,
            status,
            render_thread: Some(handle),
            surface: None,
        })
    }

    fn send(&self, command: HostCommand) {
        if self.commands.send(command).is_err() {
            debug!("[Engine] render thread gone, dropped {command:?}");
        }
    }

    pub fn resume(&self) {
        self.send(HostCommand::Resume);
    }

    pub fn pause(&self) {
        self.send(HostCommand::Pause);
    }

    pub fn attach_surface(&mut self, handle: SurfaceHandle) {
        self.surface = Some(handle);
        self.send(HostCommand::AttachSurface(handle));
    }

    pub fn detach_surface(&mut self) {
        self.surface = None;
        self.send(HostCommand::DetachSurface);
    }

    pub fn video_texture_id(&self) -> Option<u64> {
        self.status.video_texture_id()
    }

    /// True once the render thread has returned (or was never started).
    pub fn is_finished(&self) -> bool {
        self.render_thread.as_ref().map_or(true, JoinHandle::is_finished)
    }

    /// Block until the render thread exits on its own.
    pub fn wait(&mut self) -> EngineResult<()> {
        self.join()
    }

    /// Stop the render thread, wait for it, then release the surface and
    /// clear every status flag. Safe to call more than once.
    pub fn destroy(&mut self) -> EngineResult<()> {
        if self.render_thread.is_some() {
            info!("[Engine] destroy requested");
            self.send(HostCommand::Destroy);
        }
        self.join()
    }

    fn join(&mut self) -> EngineResult<()> {
        let joined = match self.render_thread.take() {
            Some(handle) => handle.join().map_err(|_| EngineError::RenderThreadPanicked),
            None => Ok(()),
        };

        if let Some(handle) = self.surface.take() {
            info!("[Engine] released surface {handle:#x}");
        }
        self.status.reset();
        joined
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        if let Err(e) = self.destroy() {
            warn!("[Engine] destroy on drop: {e}");
        }
    }
}

/// Run the engine without a window until the session ends.
pub fn run_headless(config: EngineConfig) -> EngineResult<()> {
    let mut engine = Engine::create(config)?;
    engine.resume();
    engine.wait()
}

fn open_video_source(config: &EngineConfig) -> Option<Box<dyn VideoFrameSource>> {
    let path = config.video.frame_path.as_ref()?;
    match StillImageSource::open(path, config.video.size) {
        Ok(source) => Some(Box::new(source)),
        Err(e) => {
            warn!("[Engine] video frame {}: {e}", path.display());
            None
        }
    }
}

/// Everything the render thread does: startup in dependency order, the frame
/// loop, then teardown in reverse.
fn run_session(config: &EngineConfig, status: &EngineStatus, inbox: &mut CommandInbox) -> EngineResult<()> {
    let bootstrap = XrBootstrap::new(&config.app_name)?;
    let graphics = GraphicsContext::for_xr(&bootstrap.instance, bootstrap.system, &config.app_name)?;
    let mut runtime = OpenXrRuntime::new(bootstrap, &graphics, config.reference_space)?;

    let views = runtime.view_configurations().to_vec();
    let mut swapchains = SwapchainManager::create(&mut runtime, &views)?;
    let mut renderer = VulkanoEyeRenderer::new(&graphics, &swapchains, config, open_video_source(config))?;

    status.publish_graphics(renderer.video_texture_id());
    info!("[Engine] graphics initialized, video texture {:#x}", renderer.video_texture_id());

    let result = FrameLoop::new(&mut runtime, &mut swapchains, &mut renderer, config).run(|| inbox.drain());

    status.graphics_initialized.store(false, Ordering::Release);
    drop(renderer);
    swapchains.teardown();
    drop(swapchains);
    drop(runtime);
    drop(graphics);
    info!("[Engine] session torn down");

    result
}
