//! OpenXR instance/session bring-up and teardown.
//!
//! Startup is a fixed sequence — loader, instance, system, GL context,
//! session, view configuration, reference spaces — where every step can fail
//! independently and unwinds whatever the previous steps created. Teardown
//! runs in exact reverse order and is idempotent: handles live in `Option`s
//! and an already-taken slot is a no-op.

use glow::HasContext;
use openxr as xr;
use openxr::sys;

use log::{debug, info, warn};
use oriel_vr::{VrError, VrResult};

use crate::egl::EglContext;
use crate::VrConfig;

pub const MAX_EYES: usize = 2;
pub const VIEW_CONFIG_TYPE: xr::ViewConfigurationType = xr::ViewConfigurationType::PRIMARY_STEREO;

const ENGINE_NAME: &str = "OrielEngine";
const ENGINE_VERSION: u32 = 1;

/// Process-wide handle to the live OpenXR instance.
///
/// Error-string lookups need an instance from arbitrary call sites, so the
/// session manager publishes its instance here on creation and withdraws it
/// before destruction. Lookup before set or after clear is a programming
/// error and falls back to numeric formatting.
pub mod registry {
    use super::*;
    use std::ffi::CStr;
    use std::os::raw::c_char;
    use std::sync::Mutex;

    static CURRENT: Mutex<Option<xr::Instance>> = Mutex::new(None);

    fn cell() -> std::sync::MutexGuard<'static, Option<xr::Instance>> {
        match CURRENT.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn set(instance: xr::Instance) {
        *cell() = Some(instance);
    }

    pub fn clear() {
        *cell() = None;
    }

    /// Human-readable form of an `XrResult`, via `xrResultToString` when an
    /// instance is registered.
    pub fn describe(result: sys::Result) -> String {
        let guard = cell();
        match guard.as_ref() {
            Some(instance) => {
                let mut buffer = [0 as c_char; sys::MAX_RESULT_STRING_SIZE];
                let ret = unsafe {
                    (instance.fp().result_to_string)(
                        instance.as_raw(),
                        result,
                        buffer.as_mut_ptr(),
                    )
                };
                if ret.into_raw() >= 0 {
                    let name = unsafe { CStr::from_ptr(buffer.as_ptr()) };
                    return name.to_string_lossy().into_owned();
                }
                format!("{result:?}")
            }
            None => {
                log::error!("OpenXR result lookup with no registered instance");
                format!("{result:?}")
            }
        }
    }
}

/// Wrap a failed runtime call into a `VrError` with the result name resolved
/// through the instance registry.
pub(crate) fn xr_err(what: &str, result: sys::Result) -> VrError {
    VrError::Runtime(format!("{what}: {}", registry::describe(result)))
}

/// Optional extensions actually enabled on the instance.
#[derive(Debug, Clone, Copy, Default)]
pub struct EnabledExtensions {
    pub passthrough: bool,
    pub performance_metrics: bool,
    pub composition_layer_settings: bool,
    pub hand_tracking: bool,
    pub touch_controller_pro: bool,
    pub visibility_mask: bool,
}

/// Owner of all runtime handles: instance, system, session, frame objects,
/// view configuration, and reference spaces.
pub struct RuntimeSession {
    pub(crate) instance: Option<xr::Instance>,
    pub(crate) system: xr::SystemId,
    pub(crate) session: Option<xr::Session<xr::OpenGlEs>>,
    pub(crate) frame_waiter: Option<xr::FrameWaiter>,
    pub(crate) frame_stream: Option<xr::FrameStream<xr::OpenGlEs>>,

    pub(crate) view_config_views: Vec<xr::ViewConfigurationView>,
    pub(crate) fov_mutable: bool,
    pub(crate) max_layer_count: u32,

    // Declared and destroyed in reverse creation order: view, head, local,
    // forward-direction, stage.
    pub(crate) view_space: Option<xr::Space>,
    pub(crate) head_space: Option<xr::Space>,
    pub(crate) local_space: Option<xr::Space>,
    pub(crate) forward_space: Option<xr::Space>,
    pub(crate) stage_space: Option<xr::Space>,

    pub(crate) session_state: xr::SessionState,
    pub(crate) head_location: Option<xr::SpaceLocation>,
    pub(crate) enabled_extensions: EnabledExtensions,

    pub(crate) egl: Option<EglContext>,
}

impl RuntimeSession {
    /// Run the full ordered startup sequence.
    pub fn new(config: &VrConfig) -> VrResult<Self> {
        let entry = load_entry()?;
        let (instance, enabled_extensions) = create_instance(&entry, config)?;
        registry::set(instance.clone());

        match Self::init_after_instance(instance, enabled_extensions) {
            Ok(this) => Ok(this),
            Err(e) => {
                // Locals created inside init drop in reverse creation order;
                // only the registry entry needs explicit withdrawal.
                registry::clear();
                Err(e)
            }
        }
    }

    fn init_after_instance(
        instance: xr::Instance,
        enabled_extensions: EnabledExtensions,
    ) -> VrResult<Self> {
        let (system, max_layer_count) = init_system(&instance)?;

        let egl = EglContext::new()?;
        check_graphics_requirements(&instance, system, &egl)?;

        let (session, frame_waiter, frame_stream) = create_session(&instance, system, &egl)?;

        let (view_config_views, fov_mutable) = init_view_config(&instance, system)?;

        let spaces = init_spaces(&session)?;

        info!("OpenXR initialization complete");
        Ok(Self {
            instance: Some(instance),
            system,
            session: Some(session),
            frame_waiter: Some(frame_waiter),
            frame_stream: Some(frame_stream),
            view_config_views,
            fov_mutable,
            max_layer_count,
            view_space: Some(spaces.view),
            head_space: Some(spaces.head),
            local_space: Some(spaces.local),
            forward_space: Some(spaces.forward),
            stage_space: spaces.stage,
            session_state: xr::SessionState::UNKNOWN,
            head_location: None,
            enabled_extensions,
            egl: Some(egl),
        })
    }

    pub fn instance(&self) -> VrResult<&xr::Instance> {
        require(&self.instance, "instance")
    }

    pub fn session(&self) -> VrResult<&xr::Session<xr::OpenGlEs>> {
        require(&self.session, "session")
    }

    pub fn gl(&self) -> VrResult<&glow::Context> {
        Ok(require(&self.egl, "EGL context")?.gl())
    }

    pub fn egl(&self) -> VrResult<&EglContext> {
        require(&self.egl, "EGL context")
    }

    pub fn local_space(&self) -> VrResult<&xr::Space> {
        require(&self.local_space, "local space")
    }

    pub fn system(&self) -> xr::SystemId {
        self.system
    }

    /// Head pose sampled by the most recent [`Self::locate_head`] call.
    pub fn head_location(&self) -> Option<xr::SpaceLocation> {
        self.head_location
    }

    pub fn fov_mutable(&self) -> bool {
        self.fov_mutable
    }

    pub fn max_layer_count(&self) -> u32 {
        self.max_layer_count
    }

    pub fn enabled_extensions(&self) -> &EnabledExtensions {
        &self.enabled_extensions
    }

    /// Recommended per-eye image size from the negotiated view configuration.
    pub fn recommended_eye_extent(&self) -> (u32, u32) {
        let view = &self.view_config_views[0];
        (
            view.recommended_image_rect_width,
            view.recommended_image_rect_height,
        )
    }

    pub fn poll_event<'buf>(
        &self,
        buffer: &'buf mut xr::EventDataBuffer,
    ) -> VrResult<Option<xr::Event<'buf>>> {
        self.instance()?
            .poll_event(buffer)
            .map_err(|e| xr_err("xrPollEvent", e))
    }

    pub fn begin_session(&mut self) -> VrResult<()> {
        self.session()?
            .begin(VIEW_CONFIG_TYPE)
            .map(|_| ())
            .map_err(|e| xr_err("xrBeginSession", e))
    }

    pub fn end_session(&mut self) -> VrResult<()> {
        self.session()?
            .end()
            .map(|_| ())
            .map_err(|e| xr_err("xrEndSession", e))
    }

    pub fn wait_frame(&mut self) -> VrResult<xr::FrameState> {
        require_mut(&mut self.frame_waiter, "frame waiter")?
            .wait()
            .map_err(|e| xr_err("xrWaitFrame", e))
    }

    pub fn begin_frame(&mut self) -> VrResult<()> {
        require_mut(&mut self.frame_stream, "frame stream")?
            .begin()
            .map_err(|e| xr_err("xrBeginFrame", e))?;
        Ok(())
    }

    pub fn locate_views(&self, time: xr::Time) -> VrResult<(xr::ViewStateFlags, Vec<xr::View>)> {
        let session = self.session()?;
        let local = require(&self.local_space, "local space")?;
        session
            .locate_views(VIEW_CONFIG_TYPE, time, local)
            .map_err(|e| xr_err("xrLocateViews", e))
    }

    /// Locate the head (view space) in the local space and remember it as
    /// the frame's tracking sample.
    pub fn locate_head(&mut self, time: xr::Time) -> VrResult<xr::SpaceLocation> {
        let view = require(&self.view_space, "view space")?;
        let local = require(&self.local_space, "local space")?;
        let location = view
            .locate(local, time)
            .map_err(|e| xr_err("xrLocateSpace", e))?;
        self.head_location = Some(location);
        Ok(location)
    }

    /// Re-derive the forward-direction and head spaces from the pose of the
    /// view space in the local space at `time`.
    ///
    /// This pins the world-forward axis to the user's orientation on the
    /// first rendered frame and must run exactly once per session
    /// activation. The view space itself is never recreated; both derived
    /// spaces are LOCAL-typed and anchored at the sampled pose.
    pub fn rederive_anchor_spaces(&mut self, time: xr::Time) -> VrResult<()> {
        let session = self.session()?.clone();
        let view = require(&self.view_space, "view space")?;
        let local = require(&self.local_space, "local space")?;
        let location = view
            .locate(local, time)
            .map_err(|e| xr_err("xrLocateSpace", e))?;

        if !location
            .location_flags
            .contains(xr::SpaceLocationFlags::ORIENTATION_VALID)
        {
            warn!("anchor re-derivation skipped: view pose not yet valid");
            return Ok(());
        }

        let anchor = location.pose;
        self.forward_space = Some(
            session
                .create_reference_space(xr::ReferenceSpaceType::LOCAL, anchor)
                .map_err(|e| xr_err("xrCreateReferenceSpace(forward)", e))?,
        );
        self.head_space = Some(
            session
                .create_reference_space(xr::ReferenceSpaceType::LOCAL, anchor)
                .map_err(|e| xr_err("xrCreateReferenceSpace(head)", e))?,
        );
        debug!("anchor spaces re-derived from first-frame head pose");
        Ok(())
    }

    /// Ask the runtime for maximum CPU/GPU clocks.
    pub fn request_performance_boost(&self) -> VrResult<()> {
        let instance = self.instance()?;
        let session = self.session()?;
        let ext = instance
            .exts()
            .ext_performance_settings
            .ok_or_else(|| VrError::Runtime("XR_EXT_performance_settings missing".to_string()))?;

        for domain in [
            sys::PerfSettingsDomainEXT::CPU,
            sys::PerfSettingsDomainEXT::GPU,
        ] {
            let result = unsafe {
                (ext.perf_settings_set_performance_level)(
                    session.as_raw(),
                    domain,
                    sys::PerfSettingsLevelEXT::BOOST,
                )
            };
            if result.into_raw() < 0 {
                return Err(xr_err("xrPerfSettingsSetPerformanceLevelEXT", result));
            }
        }
        debug!("requested BOOST performance level for CPU and GPU");
        Ok(())
    }

    /// Tell the runtime which OS thread runs the frame loop so it can apply
    /// scheduling hints.
    #[cfg(target_os = "android")]
    pub fn register_render_thread(&self) -> VrResult<()> {
        let instance = self.instance()?;
        let session = self.session()?;
        let ext = instance.exts().khr_android_thread_settings.ok_or_else(|| {
            VrError::Runtime("XR_KHR_android_thread_settings missing".to_string())
        })?;

        let tid = unsafe { libc::gettid() } as u32;
        let result = unsafe {
            (ext.set_android_application_thread)(
                session.as_raw(),
                sys::AndroidThreadTypeKHR::APPLICATION_MAIN,
                tid,
            )
        };
        if result.into_raw() < 0 {
            return Err(xr_err("xrSetAndroidApplicationThreadKHR", result));
        }
        Ok(())
    }

    #[cfg(not(target_os = "android"))]
    pub fn register_render_thread(&self) -> VrResult<()> {
        Ok(())
    }

    /// Reverse-order teardown. Safe to call more than once.
    pub fn shutdown(&mut self) {
        // Spaces go first, newest first.
        self.stage_space.take();
        self.forward_space.take();
        self.local_space.take();
        self.head_space.take();
        self.view_space.take();

        self.frame_waiter.take();
        self.frame_stream.take();

        if let Some(session) = self.session.take() {
            if can_end_session(self.session_state) {
                debug!("ending active session before destruction");
                if let Err(e) = session.end() {
                    warn!("xrEndSession during shutdown: {}", registry::describe(e));
                }
            }
            debug!("destroying session");
            drop(session);
        }

        if let Some(instance) = self.instance.take() {
            debug!("destroying instance");
            registry::clear();
            drop(instance);
        }

        self.egl.take();
    }
}

impl Drop for RuntimeSession {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// States in which `xrEndSession` is a legal call.
pub(crate) fn can_end_session(state: xr::SessionState) -> bool {
    matches!(
        state,
        xr::SessionState::READY
            | xr::SessionState::SYNCHRONIZED
            | xr::SessionState::VISIBLE
            | xr::SessionState::FOCUSED
    )
}

fn require<'a, T>(slot: &'a Option<T>, what: &str) -> VrResult<&'a T> {
    slot.as_ref()
        .ok_or_else(|| VrError::Runtime(format!("{what} not initialized")))
}

fn require_mut<'a, T>(slot: &'a mut Option<T>, what: &str) -> VrResult<&'a mut T> {
    slot.as_mut()
        .ok_or_else(|| VrError::Runtime(format!("{what} not initialized")))
}

fn load_entry() -> VrResult<xr::Entry> {
    let entry = unsafe { xr::Entry::load() }
        .map_err(|e| VrError::Unavailable(format!("OpenXR loader not found: {e}")))?;

    #[cfg(target_os = "android")]
    entry
        .initialize_android_loader()
        .map_err(|e| VrError::Runtime(format!("android loader init failed: {e:?}")))?;

    Ok(entry)
}

fn create_instance(
    entry: &xr::Entry,
    config: &VrConfig,
) -> VrResult<(xr::Instance, EnabledExtensions)> {
    let available = entry
        .enumerate_extensions()
        .map_err(|e| VrError::Runtime(format!("xrEnumerateInstanceExtensionProperties: {e:?}")))?;

    // Required set: fail hard on any absence.
    if !available.khr_opengl_es_enable {
        return Err(VrError::Unavailable(
            "required extension XR_KHR_opengl_es_enable not available".to_string(),
        ));
    }
    if !available.ext_performance_settings {
        return Err(VrError::Unavailable(
            "required extension XR_EXT_performance_settings not available".to_string(),
        ));
    }
    #[cfg(target_os = "android")]
    if !available.khr_android_thread_settings {
        return Err(VrError::Unavailable(
            "required extension XR_KHR_android_thread_settings not available".to_string(),
        ));
    }

    let mut exts = xr::ExtensionSet::default();
    exts.khr_opengl_es_enable = true;
    exts.ext_performance_settings = true;
    #[cfg(target_os = "android")]
    {
        exts.khr_android_thread_settings = true;
    }

    // Optional set: enable whichever the runtime offers.
    let enabled = EnabledExtensions {
        passthrough: available.fb_passthrough,
        performance_metrics: available.meta_performance_metrics,
        composition_layer_settings: available.fb_composition_layer_settings,
        hand_tracking: available.ext_hand_tracking,
        touch_controller_pro: available.fb_touch_controller_pro,
        visibility_mask: available.khr_visibility_mask,
    };
    exts.fb_passthrough = enabled.passthrough;
    exts.meta_performance_metrics = enabled.performance_metrics;
    exts.fb_composition_layer_settings = enabled.composition_layer_settings;
    exts.ext_hand_tracking = enabled.hand_tracking;
    exts.fb_touch_controller_pro = enabled.touch_controller_pro;
    exts.khr_visibility_mask = enabled.visibility_mask;
    for (name, on) in [
        ("XR_FB_passthrough", enabled.passthrough),
        ("XR_META_performance_metrics", enabled.performance_metrics),
        (
            "XR_FB_composition_layer_settings",
            enabled.composition_layer_settings,
        ),
        ("XR_EXT_hand_tracking", enabled.hand_tracking),
        ("XR_FB_touch_controller_pro", enabled.touch_controller_pro),
        ("XR_KHR_visibility_mask", enabled.visibility_mask),
    ] {
        if on {
            debug!("enabling optional extension: {name}");
        }
    }

    let app_info = xr::ApplicationInfo {
        application_name: config.application_name.as_str(),
        application_version: config.application_version,
        engine_name: ENGINE_NAME,
        engine_version: ENGINE_VERSION,
        api_version: xr::Version::new(1, 0, 0),
    };
    let instance = entry
        .create_instance(&app_info, &exts, &[])
        .map_err(|e| VrError::Runtime(format!("xrCreateInstance: {e:?}")))?;

    if let Ok(props) = instance.properties() {
        info!(
            "connected to OpenXR runtime: {} (version {}.{}.{})",
            props.runtime_name,
            props.runtime_version.major(),
            props.runtime_version.minor(),
            props.runtime_version.patch()
        );
    }

    Ok((instance, enabled))
}

fn init_system(instance: &xr::Instance) -> VrResult<(xr::SystemId, u32)> {
    let system = instance
        .system(xr::FormFactor::HEAD_MOUNTED_DISPLAY)
        .map_err(|e| xr_err("xrGetSystem", e))?;

    let props = instance
        .system_properties(system)
        .map_err(|e| xr_err("xrGetSystemProperties", e))?;

    debug!("system name: {}", props.system_name);
    debug!("vendor id: {}", props.vendor_id);
    debug!(
        "max swapchain image size: {}x{}",
        props.graphics_properties.max_swapchain_image_width,
        props.graphics_properties.max_swapchain_image_height
    );
    debug!(
        "max layer count: {}",
        props.graphics_properties.max_layer_count
    );
    debug!(
        "tracking: orientation={} position={}",
        props.tracking_properties.orientation_tracking,
        props.tracking_properties.position_tracking
    );

    Ok((system, props.graphics_properties.max_layer_count))
}

fn check_graphics_requirements(
    instance: &xr::Instance,
    system: xr::SystemId,
    egl: &EglContext,
) -> VrResult<()> {
    let reqs = instance
        .graphics_requirements::<xr::OpenGlEs>(system)
        .map_err(|e| xr_err("xrGetOpenGLESGraphicsRequirementsKHR", e))?;

    let gl = egl.gl();
    let major = unsafe { gl.get_parameter_i32(glow::MAJOR_VERSION) };
    let minor = unsafe { gl.get_parameter_i32(glow::MINOR_VERSION) };
    let gl_version = xr::Version::new(major as u16, minor as u16, 0);

    if gl_version < reqs.min_api_version_supported || gl_version > reqs.max_api_version_supported {
        return Err(VrError::Unavailable(format!(
            "OpenGL ES {major}.{minor} outside the runtime-supported range {}.{} - {}.{}",
            reqs.min_api_version_supported.major(),
            reqs.min_api_version_supported.minor(),
            reqs.max_api_version_supported.major(),
            reqs.max_api_version_supported.minor()
        )));
    }
    Ok(())
}

#[cfg(target_os = "android")]
fn create_session(
    instance: &xr::Instance,
    system: xr::SystemId,
    egl: &EglContext,
) -> VrResult<(
    xr::Session<xr::OpenGlEs>,
    xr::FrameWaiter,
    xr::FrameStream<xr::OpenGlEs>,
)> {
    let create_info = xr::opengles::SessionCreateInfo::Android {
        config: egl.config_ptr(),
        context: egl.context_ptr(),
        display: egl.display_ptr(),
    };
    unsafe { instance.create_session::<xr::OpenGlEs>(system, &create_info) }
        .map_err(|e| xr_err("xrCreateSession", e))
}

#[cfg(not(target_os = "android"))]
fn create_session(
    instance: &xr::Instance,
    system: xr::SystemId,
    egl: &EglContext,
) -> VrResult<(
    xr::Session<xr::OpenGlEs>,
    xr::FrameWaiter,
    xr::FrameStream<xr::OpenGlEs>,
)> {
    let _ = (instance, system, egl);
    Err(VrError::Unavailable(
        "OpenGL ES session creation requires the Android EGL platform binding".to_string(),
    ))
}

fn init_view_config(
    instance: &xr::Instance,
    system: xr::SystemId,
) -> VrResult<(Vec<xr::ViewConfigurationView>, bool)> {
    let config_types = instance
        .enumerate_view_configurations(system)
        .map_err(|e| xr_err("xrEnumerateViewConfigurations", e))?;
    if !config_types.contains(&VIEW_CONFIG_TYPE) {
        return Err(VrError::Unavailable(
            "required view configuration PRIMARY_STEREO not found".to_string(),
        ));
    }

    let props = instance
        .view_configuration_properties(system, VIEW_CONFIG_TYPE)
        .map_err(|e| xr_err("xrGetViewConfigurationProperties", e))?;
    debug!("view configuration FOV mutable: {}", props.fov_mutable);

    let mut views = instance
        .enumerate_view_configuration_views(system, VIEW_CONFIG_TYPE)
        .map_err(|e| xr_err("xrEnumerateViewConfigurationViews", e))?;
    if views.len() > MAX_EYES {
        warn!(
            "more views available ({}) than supported ({MAX_EYES})",
            views.len()
        );
        views.truncate(MAX_EYES);
    }
    if views.len() < MAX_EYES {
        return Err(VrError::Runtime(format!(
            "stereo view configuration reported {} views",
            views.len()
        )));
    }

    for (i, view) in views.iter().enumerate() {
        debug!(
            "view [{i}]: recommended {}x{} max {}x{} samples {}",
            view.recommended_image_rect_width,
            view.recommended_image_rect_height,
            view.max_image_rect_width,
            view.max_image_rect_height,
            view.recommended_swapchain_sample_count
        );
    }

    Ok((views, props.fov_mutable))
}

struct ReferenceSpaces {
    view: xr::Space,
    head: xr::Space,
    local: xr::Space,
    forward: xr::Space,
    stage: Option<xr::Space>,
}

fn init_spaces(session: &xr::Session<xr::OpenGlEs>) -> VrResult<ReferenceSpaces> {
    let space_types = session
        .enumerate_reference_spaces()
        .map_err(|e| xr_err("xrEnumerateReferenceSpaces", e))?;
    debug!("reference space types: {space_types:?}");
    let has_stage = space_types.contains(&xr::ReferenceSpaceType::STAGE);

    let create = |ty: xr::ReferenceSpaceType, what: &str| {
        session
            .create_reference_space(ty, xr::Posef::IDENTITY)
            .map_err(|e| xr_err(what, e))
    };

    let view = create(xr::ReferenceSpaceType::VIEW, "xrCreateReferenceSpace(view)")?;
    let head = create(xr::ReferenceSpaceType::VIEW, "xrCreateReferenceSpace(head)")?;
    let local = create(
        xr::ReferenceSpaceType::LOCAL,
        "xrCreateReferenceSpace(local)",
    )?;
    let forward = create(
        xr::ReferenceSpaceType::LOCAL,
        "xrCreateReferenceSpace(forward)",
    )?;

    let stage = if has_stage {
        let space = create(
            xr::ReferenceSpaceType::STAGE,
            "xrCreateReferenceSpace(stage)",
        )?;
        debug!("stage space created");
        Some(space)
    } else {
        warn!("stage reference space not available on this device");
        None
    };

    Ok(ReferenceSpaces {
        view,
        head,
        local,
        forward,
        stage,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn end_session_is_only_legal_in_running_states() {
        for state in [
            xr::SessionState::READY,
            xr::SessionState::SYNCHRONIZED,
            xr::SessionState::VISIBLE,
            xr::SessionState::FOCUSED,
        ] {
            assert!(can_end_session(state), "{state:?} should permit ending");
        }
        for state in [
            xr::SessionState::UNKNOWN,
            xr::SessionState::IDLE,
            xr::SessionState::STOPPING,
            xr::SessionState::LOSS_PENDING,
            xr::SessionState::EXITING,
        ] {
            assert!(!can_end_session(state), "{state:?} should not permit ending");
        }
    }

    #[test]
    fn describe_without_instance_falls_back_to_debug_format() {
        registry::clear();
        let text = registry::describe(sys::Result::ERROR_VALIDATION_FAILURE);
        assert!(text.contains("ERROR_VALIDATION_FAILURE"));
    }
}
