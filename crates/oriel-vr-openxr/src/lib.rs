//! OpenXR session/frame lifecycle engine for a head-mounted display client.
//!
//! The engine owns one dedicated render thread that brings the runtime
//! session up, drives the wait/begin/render/end frame protocol, and tears
//! everything down in reverse order. The owning thread interacts with it
//! through exactly two lifecycle calls — [`VrAppThread::start`] and
//! [`VrAppThread::stop`] — plus the non-blocking signal channel they wrap.

use std::sync::mpsc;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Instant;

use log::{error, info};

use oriel_vr::{set_vr_status, Signal, SignalChannel, VrError, VrResult};

pub mod app;
pub mod egl;
pub mod input;
pub mod session;
pub mod swapchain;

pub use app::{AppState, ClearRenderer, EyeRenderer, VrApp};
pub use egl::{EglContext, GlExtensions};
pub use input::{ButtonState, InputStateFrame, InputStateStatic, StickState};
pub use session::{EnabledExtensions, RuntimeSession};
pub use swapchain::Framebuffer;

const RENDER_THREAD_NAME: &str = "oriel-vr-render";

/// Engine configuration. Plain values, fixed after start.
#[derive(Debug, Clone)]
pub struct VrConfig {
    pub application_name: String,
    pub application_version: u32,
    /// GL internal format for the eye swapchains.
    pub color_format: u32,
    /// MSAA sample count; 1 disables multisampling.
    pub sample_count: i32,
    /// Render both eyes through one 2D-array chain when the driver allows.
    pub use_multiview: bool,
}

impl Default for VrConfig {
    fn default() -> Self {
        Self {
            application_name: "Oriel".to_string(),
            application_version: 1,
            color_format: glow::SRGB8_ALPHA8,
            sample_count: 4,
            use_multiview: false,
        }
    }
}

/// Handle held by the owning thread.
///
/// `start` spawns the render thread and blocks until the session stack is
/// accepted; `stop` posts the exit signal and joins. The join is the only
/// blocking cross-thread synchronization point in the design.
pub struct VrAppThread {
    signals: Arc<SignalChannel>,
    handle: Option<JoinHandle<()>>,
}

impl VrAppThread {
    pub fn start(config: VrConfig, renderer: Box<dyn EyeRenderer>) -> VrResult<Self> {
        let signals = Arc::new(SignalChannel::new());
        let thread_signals = signals.clone();
        let (accept_tx, accept_rx) = mpsc::sync_channel::<VrResult<()>>(1);

        let handle = std::thread::Builder::new()
            .name(RENDER_THREAD_NAME.to_string())
            .spawn(move || render_thread(config, renderer, thread_signals, accept_tx))
            .map_err(|e| VrError::Thread(format!("spawn render thread: {e}")))?;

        match accept_rx.recv() {
            Ok(Ok(())) => Ok(Self {
                signals,
                handle: Some(handle),
            }),
            Ok(Err(e)) => {
                let _ = handle.join();
                Err(e)
            }
            Err(_) => {
                let _ = handle.join();
                Err(VrError::Thread(
                    "render thread exited before accepting start".to_string(),
                ))
            }
        }
    }

    /// Post exit and wait for the render thread to unwind. Idempotent.
    pub fn stop(&mut self) {
        if let Some(handle) = self.handle.take() {
            self.signals.post(Signal::exit());
            info!("waiting for render thread to join");
            let _ = handle.join();
            info!("render thread joined");
        }
    }
}

impl Drop for VrAppThread {
    fn drop(&mut self) {
        self.stop();
    }
}

fn render_thread(
    config: VrConfig,
    renderer: Box<dyn EyeRenderer>,
    signals: Arc<SignalChannel>,
    accept_tx: mpsc::SyncSender<VrResult<()>>,
) {
    set_vr_status("VR: render thread starting");
    let started_at = Instant::now();

    let mut xr_session = match RuntimeSession::new(&config) {
        Ok(session) => session,
        Err(e) => {
            error!("OpenXR initialization failed: {e}");
            set_vr_status(format!("VR: initialization failed: {e}"));
            let _ = accept_tx.send(Err(e));
            return;
        }
    };

    let mut app = match VrApp::new(&xr_session, config, renderer, started_at) {
        Ok(app) => app,
        Err(e) => {
            error!("VR app initialization failed: {e}");
            set_vr_status(format!("VR: initialization failed: {e}"));
            xr_session.shutdown();
            let _ = accept_tx.send(Err(e));
            return;
        }
    };

    let _ = accept_tx.send(Ok(()));
    set_vr_status("VR: session loop running");

    match app.main_loop(&mut xr_session, &signals) {
        Ok(()) => set_vr_status("VR: render thread stopped"),
        Err(e) => {
            error!("render loop failed: {e}");
            set_vr_status(format!("VR: render loop failed: {e}"));
        }
    }

    // Image chains go first, then input handles with the app, then the
    // session stack itself.
    app.shutdown(&xr_session);
    drop(app);
    if let Ok(egl) = xr_session.egl() {
        let _ = egl.release_current();
    }
    xr_session.shutdown();
}
