//! Frame/session state machine and the render-thread main loop.
//!
//! Each iteration drains runtime events and cross-thread signals, applies
//! session-state transitions, and — only while the session is active —
//! drives the wait/begin/render/end frame protocol against the runtime's
//! predicted display times.

use std::thread;
use std::time::{Duration, Instant};

use glow::HasContext;
use openxr as xr;

use log::{debug, error, info, warn};
use oriel_vr::{SignalChannel, SignalKind, VrResult};

use crate::input::{InputStateFrame, InputStateStatic};
use crate::session::{xr_err, RuntimeSession, MAX_EYES};
use crate::swapchain::{effective_multiview, Framebuffer};
use crate::VrConfig;

/// Cap on signals drained per loop iteration, so a burst from the owning
/// thread cannot stall a frame.
const MAX_SIGNALS_PER_TICK: usize = 20;

const IDLE_POLL_INTERVAL: Duration = Duration::from_millis(5);

/// Scene content seam. The loop owns the frame protocol and the image
/// chains; implementors only draw into the already-bound framebuffer.
///
/// With multiview in effect the renderer is invoked once per frame (eye 0)
/// and is expected to cover both layers of the array target.
pub trait EyeRenderer: Send {
    fn render_eye(
        &mut self,
        gl: &glow::Context,
        eye: usize,
        width: u32,
        height: u32,
        view: &xr::View,
    );
}

/// Default renderer: clears each eye to a solid color.
pub struct ClearRenderer {
    pub color: [f32; 4],
}

impl Default for ClearRenderer {
    fn default() -> Self {
        Self {
            color: [0.0, 0.0, 0.0, 1.0],
        }
    }
}

impl EyeRenderer for ClearRenderer {
    fn render_eye(
        &mut self,
        gl: &glow::Context,
        _eye: usize,
        _width: u32,
        _height: u32,
        _view: &xr::View,
    ) {
        unsafe {
            gl.clear_color(self.color[0], self.color[1], self.color[2], self.color[3]);
            gl.clear_depth_f32(1.0);
            gl.clear(glow::COLOR_BUFFER_BIT | glow::DEPTH_BUFFER_BIT);
        }
    }
}

/// Application-level state carried across loop iterations.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AppState {
    pub stop_requested: bool,
    pub session_active: bool,
    pub has_focus: bool,
}

/// What a session-state event asks the loop to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TransitionAction {
    BeginSession,
    EndSession,
    SetFocus(bool),
    RequestStop,
    Ignore,
}

pub(crate) fn transition_action(state: xr::SessionState) -> TransitionAction {
    match state {
        xr::SessionState::READY => TransitionAction::BeginSession,
        xr::SessionState::STOPPING => TransitionAction::EndSession,
        xr::SessionState::FOCUSED => TransitionAction::SetFocus(true),
        xr::SessionState::VISIBLE => TransitionAction::SetFocus(false),
        xr::SessionState::EXITING | xr::SessionState::LOSS_PENDING => TransitionAction::RequestStop,
        _ => TransitionAction::Ignore,
    }
}

/// Frame index progression: counting restarts from zero whenever the
/// session leaves the active state, so re-activation re-triggers the
/// first-frame work.
pub(crate) fn advance_frame_index(index: u64, session_active: bool) -> u64 {
    if session_active {
        index + 1
    } else {
        0
    }
}

pub struct VrApp {
    renderer: Box<dyn EyeRenderer>,
    framebuffers: Vec<Framebuffer>,
    input_static: InputStateStatic,
    input_frame: InputStateFrame,
    frame_index: u64,
    last_state: AppState,
    // Explicit change-detection state for transition logging.
    last_logged_session_state: xr::SessionState,
    started_at: Instant,
}

impl VrApp {
    pub fn new(
        xr_session: &RuntimeSession,
        config: VrConfig,
        renderer: Box<dyn EyeRenderer>,
        started_at: Instant,
    ) -> VrResult<Self> {
        let instance = xr_session.instance()?.clone();
        let session = xr_session.session()?.clone();
        let input_static = InputStateStatic::new(&instance, &session)?;

        let (eye_width, eye_height) = xr_session.recommended_eye_extent();
        let egl = xr_session.egl()?;
        let multiview = effective_multiview(config.use_multiview, egl.extensions());
        let chain_count = if multiview { 1 } else { MAX_EYES };

        let mut framebuffers = Vec::with_capacity(chain_count);
        for _ in 0..chain_count {
            framebuffers.push(Framebuffer::create(
                &session,
                &instance,
                egl.gl(),
                egl.extensions(),
                config.color_format,
                eye_width,
                eye_height,
                config.sample_count,
                multiview,
            )?);
        }
        debug!("initialized VR app with eye buffers {eye_width}x{eye_height}");

        Ok(Self {
            renderer,
            framebuffers,
            input_static,
            input_frame: InputStateFrame::default(),
            frame_index: 0,
            last_state: AppState::default(),
            last_logged_session_state: xr::SessionState::UNKNOWN,
            started_at,
        })
    }

    /// Run until a stop is requested by the runtime, the owning thread, or
    /// the user.
    pub fn main_loop(
        &mut self,
        xr_session: &mut RuntimeSession,
        signals: &SignalChannel,
    ) -> VrResult<()> {
        let mut event_buffer = xr::EventDataBuffer::new();

        loop {
            let mut state = self.last_state;
            self.poll_runtime_events(xr_session, &mut event_buffer, &mut state)?;
            self.drain_signals(signals, &mut state);

            if state.stop_requested {
                self.last_state = state;
                debug!("stop requested, leaving main loop");
                break;
            }

            if state.session_active {
                self.frame_index = advance_frame_index(self.frame_index, true);
                if self.frame_index == 1 {
                    info!(
                        "time to first frame: {} ms",
                        self.started_at.elapsed().as_millis()
                    );
                }

                self.input_frame
                    .sync_buttons_and_thumbsticks(xr_session.session()?, &mut self.input_static)?;
                self.handle_input(&mut state);

                self.frame(xr_session)?;
            } else {
                self.frame_index = advance_frame_index(self.frame_index, false);
                thread::sleep(IDLE_POLL_INTERVAL);
            }

            self.last_state = state;
        }

        Ok(())
    }

    /// Delete the image chains. Must run before the session that issued
    /// their swapchains is destroyed.
    pub fn shutdown(&mut self, xr_session: &RuntimeSession) {
        if let Ok(gl) = xr_session.gl() {
            for framebuffer in self.framebuffers.drain(..) {
                framebuffer.destroy(gl);
            }
        } else {
            self.framebuffers.clear();
        }
    }

    fn poll_runtime_events(
        &mut self,
        xr_session: &mut RuntimeSession,
        event_buffer: &mut xr::EventDataBuffer,
        state: &mut AppState,
    ) -> VrResult<()> {
        loop {
            let event = match xr_session.poll_event(event_buffer)? {
                Some(event) => event,
                None => break,
            };
            match event {
                xr::Event::SessionStateChanged(changed) => {
                    self.handle_session_state_change(xr_session, changed.state(), state)?;
                }
                xr::Event::EventsLost(lost) => {
                    warn!("runtime dropped {} events", lost.lost_event_count());
                }
                xr::Event::InstanceLossPending(_) => {
                    debug!("received INSTANCE_LOSS_PENDING event");
                }
                xr::Event::InteractionProfileChanged(_) => {
                    debug!("received INTERACTION_PROFILE_CHANGED event");
                }
                xr::Event::ReferenceSpaceChangePending(_) => {
                    debug!("received REFERENCE_SPACE_CHANGE_PENDING event");
                }
                xr::Event::PerfSettingsEXT(perf) => {
                    debug!(
                        "perf settings notification: domain {:?} sub-domain {:?} level {:?} -> {:?}",
                        perf.domain(),
                        perf.sub_domain(),
                        perf.from_level(),
                        perf.to_level()
                    );
                }
                _ => {
                    debug!("ignoring unrecognized runtime event");
                }
            }
        }
        Ok(())
    }

    fn handle_session_state_change(
        &mut self,
        xr_session: &mut RuntimeSession,
        new_state: xr::SessionState,
        state: &mut AppState,
    ) -> VrResult<()> {
        if new_state != self.last_logged_session_state {
            debug!(
                "session state {:?} -> {:?}",
                self.last_logged_session_state, new_state
            );
            self.last_logged_session_state = new_state;
        }
        xr_session.session_state = new_state;

        match transition_action(new_state) {
            TransitionAction::BeginSession => {
                debug_assert!(
                    !self.last_state.session_active,
                    "READY received while session already active"
                );
                if self.last_state.session_active {
                    error!("READY received while session already active");
                    return Ok(());
                }
                xr_session.begin_session()?;
                state.session_active = true;
                xr_session.request_performance_boost()?;
                xr_session.register_render_thread()?;
                debug!("session began, performance levels requested");
            }
            TransitionAction::EndSession => {
                debug_assert!(
                    self.last_state.session_active,
                    "STOPPING received while session inactive"
                );
                if !self.last_state.session_active {
                    error!("STOPPING received while session inactive");
                    return Ok(());
                }
                xr_session.end_session()?;
                state.session_active = false;
            }
            TransitionAction::SetFocus(focused) => {
                state.has_focus = focused;
            }
            TransitionAction::RequestStop => {
                state.stop_requested = true;
            }
            TransitionAction::Ignore => {
                debug!("session state {new_state:?} requires no transition");
            }
        }
        Ok(())
    }

    fn drain_signals(&self, signals: &SignalChannel, state: &mut AppState) {
        let mut handled = 0;
        while handled < MAX_SIGNALS_PER_TICK {
            let Some(signal) = signals.poll() else { break };
            handled += 1;
            match signal.kind {
                SignalKind::ExitRequested => {
                    debug!("received exit signal");
                    state.stop_requested = true;
                }
            }
        }
    }

    fn handle_input(&self, state: &mut AppState) {
        // Menu-button press edge winds the app down.
        if self.input_frame.menu_button.changed && self.input_frame.menu_button.pressed {
            state.stop_requested = true;
        }
    }

    /// One pass of the wait/begin/render/end protocol. Once wait-frame has
    /// returned the frame always runs to end-frame.
    fn frame(&mut self, xr_session: &mut RuntimeSession) -> VrResult<()> {
        let frame_state = xr_session.wait_frame()?;
        xr_session.begin_frame()?;
        let predicted_display_time = frame_state.predicted_display_time;

        // First frame of this activation: pin the anchor spaces to the
        // user's starting pose.
        if self.frame_index == 1 {
            xr_session.rederive_anchor_spaces(predicted_display_time)?;
        }

        xr_session.locate_head(predicted_display_time)?;
        {
            let local = xr_session.local_space()?;
            self.input_frame
                .sync_hand_poses(&self.input_static, local, predicted_display_time)?;
        }

        let (view_flags, views) = xr_session.locate_views(predicted_display_time)?;
        let pose_valid = view_flags.contains(xr::ViewStateFlags::POSITION_VALID)
            && view_flags.contains(xr::ViewStateFlags::ORIENTATION_VALID);
        if !pose_valid {
            warn!("skipping render: located view pose invalid");
        }

        let renderable = frame_state.should_render && pose_valid && views.len() >= MAX_EYES;
        let context_current = renderable
            && match xr_session.egl()?.make_current() {
                Ok(()) => true,
                Err(e) => {
                    error!("skipping render: {e}");
                    false
                }
            };

        if !context_current {
            return end_frame(xr_session, predicted_display_time, &[]);
        }

        let layer_views = self.render_eyes(xr_session, &views)?;
        let local = xr_session
            .local_space
            .as_ref()
            .ok_or_else(|| oriel_vr::VrError::Runtime("local space not initialized".into()))?;
        let layer = xr::CompositionLayerProjection::new()
            .space(local)
            .views(&layer_views);
        let layers: [&xr::CompositionLayerBase<xr::OpenGlEs>; 1] = [&layer];

        let stream = xr_session
            .frame_stream
            .as_mut()
            .ok_or_else(|| oriel_vr::VrError::Runtime("frame stream not initialized".into()))?;
        stream
            .end(
                predicted_display_time,
                xr::EnvironmentBlendMode::OPAQUE,
                &layers,
            )
            .map_err(|e| xr_err("xrEndFrame", e))
    }

    fn render_eyes(
        &mut self,
        xr_session: &RuntimeSession,
        views: &[xr::View],
    ) -> VrResult<[xr::CompositionLayerProjectionView<'static, xr::OpenGlEs>; MAX_EYES]> {
        let gl = xr_session.gl()?;
        let mut layer_views = [
            xr::CompositionLayerProjectionView::new(),
            xr::CompositionLayerProjectionView::new(),
        ];

        if self.framebuffers.len() == 1 {
            // Multiview: one chain covers both eyes as array layers.
            let framebuffer = &mut self.framebuffers[0];
            framebuffer.acquire()?;
            framebuffer.set_current(gl);
            unsafe {
                gl.viewport(
                    0,
                    0,
                    framebuffer.width() as i32,
                    framebuffer.height() as i32,
                );
            }
            self.renderer.render_eye(
                gl,
                0,
                framebuffer.width(),
                framebuffer.height(),
                &views[0],
            );
            framebuffer.resolve(gl);
            framebuffer.release()?;
            for (eye, layer_view) in layer_views.iter_mut().enumerate() {
                *layer_view = projection_view(framebuffer, &views[eye], eye as u32);
            }
        } else {
            for (eye, framebuffer) in self.framebuffers.iter_mut().enumerate() {
                framebuffer.acquire()?;
                framebuffer.set_current(gl);
                unsafe {
                    gl.viewport(
                        0,
                        0,
                        framebuffer.width() as i32,
                        framebuffer.height() as i32,
                    );
                }
                self.renderer.render_eye(
                    gl,
                    eye,
                    framebuffer.width(),
                    framebuffer.height(),
                    &views[eye],
                );
                framebuffer.resolve(gl);
                framebuffer.release()?;
                layer_views[eye] = projection_view(framebuffer, &views[eye], 0);
            }
        }

        Framebuffer::set_none(gl);
        Ok(layer_views)
    }
}

fn end_frame(
    xr_session: &mut RuntimeSession,
    predicted_display_time: xr::Time,
    layers: &[&xr::CompositionLayerBase<xr::OpenGlEs>],
) -> VrResult<()> {
    let stream = xr_session
        .frame_stream
        .as_mut()
        .ok_or_else(|| oriel_vr::VrError::Runtime("frame stream not initialized".into()))?;
    stream
        .end(
            predicted_display_time,
            xr::EnvironmentBlendMode::OPAQUE,
            layers,
        )
        .map_err(|e| xr_err("xrEndFrame", e))
}

fn projection_view(
    framebuffer: &Framebuffer,
    view: &xr::View,
    image_array_index: u32,
) -> xr::CompositionLayerProjectionView<'static, xr::OpenGlEs> {
    let sub_image: xr::SwapchainSubImage<'static, xr::OpenGlEs> = unsafe {
        xr::SwapchainSubImage::from_raw(xr::sys::SwapchainSubImage {
            swapchain: framebuffer.swapchain_raw(),
            image_rect: xr::Rect2Di {
                offset: xr::Offset2Di { x: 0, y: 0 },
                extent: xr::Extent2Di {
                    width: framebuffer.width() as i32,
                    height: framebuffer.height() as i32,
                },
            },
            image_array_index,
        })
    };
    xr::CompositionLayerProjectionView::new()
        .pose(view.pose)
        .fov(view.fov)
        .sub_image(sub_image)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_state_transitions_map_to_the_expected_actions() {
        assert_eq!(
            transition_action(xr::SessionState::READY),
            TransitionAction::BeginSession
        );
        assert_eq!(
            transition_action(xr::SessionState::STOPPING),
            TransitionAction::EndSession
        );
        assert_eq!(
            transition_action(xr::SessionState::FOCUSED),
            TransitionAction::SetFocus(true)
        );
        assert_eq!(
            transition_action(xr::SessionState::VISIBLE),
            TransitionAction::SetFocus(false)
        );
        assert_eq!(
            transition_action(xr::SessionState::EXITING),
            TransitionAction::RequestStop
        );
        assert_eq!(
            transition_action(xr::SessionState::LOSS_PENDING),
            TransitionAction::RequestStop
        );
    }

    #[test]
    fn informational_states_are_ignored() {
        for state in [
            xr::SessionState::UNKNOWN,
            xr::SessionState::IDLE,
            xr::SessionState::SYNCHRONIZED,
        ] {
            assert_eq!(transition_action(state), TransitionAction::Ignore);
        }
    }

    #[test]
    fn frame_index_starts_at_one_and_resets_when_inactive() {
        let mut index = 0;
        index = advance_frame_index(index, true);
        assert_eq!(index, 1);
        index = advance_frame_index(index, true);
        assert_eq!(index, 2);

        index = advance_frame_index(index, false);
        assert_eq!(index, 0);

        // Re-activation restarts counting, re-triggering first-frame work.
        index = advance_frame_index(index, true);
        assert_eq!(index, 1);
    }

    #[test]
    fn first_frame_work_runs_exactly_once_per_activation() {
        let activity = [
            false, true, true, true, false, false, true, true, false, true,
        ];
        let mut index = 0;
        let mut first_frames = 0;
        for active in activity {
            index = advance_frame_index(index, active);
            if index == 1 {
                first_frames += 1;
            }
        }
        // One per activation burst: three bursts above.
        assert_eq!(first_frames, 3);
    }
}
