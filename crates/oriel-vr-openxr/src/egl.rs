//! EGL context management for OpenGL ES rendering.
//!
//! The runtime needs a current GL context before any visible surface exists,
//! so the context is bound to a minimal off-screen pbuffer. The raw
//! display/config/context handles are handed to the OpenXR session graphics
//! binding; everything else goes through [`glow`].

use std::ffi::c_void;

use glow::HasContext;
use khronos_egl as egl;
use log::{debug, error, warn};

use oriel_vr::{VrError, VrResult};

type EglInstance = egl::DynamicInstance<egl::EGL1_4>;

const PBUFFER_SIZE: egl::Int = 16;

/// Entry point for `glFramebufferTextureMultiviewOVR`.
pub type FramebufferTextureMultiviewFn =
    unsafe extern "system" fn(u32, u32, u32, i32, i32, i32);

/// Entry point for `glRenderbufferStorageMultisampleEXT`.
pub type RenderbufferStorageMultisampleFn =
    unsafe extern "system" fn(u32, i32, u32, i32, i32);

/// GL extension capabilities probed once at context creation.
///
/// `glow` does not expose these extension entry points, so they are loaded
/// through `eglGetProcAddress` and kept as raw function pointers, falling
/// back to baseline entry points when absent.
#[derive(Clone, Copy, Default)]
pub struct GlExtensions {
    pub has_multiview: bool,
    pub has_multisampled_render_to_texture: bool,
    pub framebuffer_texture_multiview: Option<FramebufferTextureMultiviewFn>,
    pub renderbuffer_storage_multisample_ext: Option<RenderbufferStorageMultisampleFn>,
}

pub struct EglContext {
    egl: EglInstance,
    display: egl::Display,
    config: egl::Config,
    context: egl::Context,
    dummy_surface: egl::Surface,
    gl: glow::Context,
    extensions: GlExtensions,
}

impl EglContext {
    /// Bring up EGL and leave the context current on the calling thread.
    ///
    /// Every step is fatal on failure; anything created up to that point is
    /// torn down before returning the error.
    pub fn new() -> VrResult<Self> {
        let lib = unsafe { EglInstance::load_required() }
            .map_err(|e| VrError::Graphics(format!("libEGL load failed: {e}")))?;

        let display = unsafe { lib.get_display(egl::DEFAULT_DISPLAY) }
            .ok_or_else(|| VrError::Graphics("eglGetDisplay failed".to_string()))?;

        let (major, minor) = lib
            .initialize(display)
            .map_err(|e| VrError::Graphics(format!("eglInitialize failed: {e}")))?;
        debug!("EGL initialized: version {major}.{minor}");

        match Self::create_context(&lib, display) {
            Ok((config, context, dummy_surface, gl, extensions)) => Ok(Self {
                egl: lib,
                display,
                config,
                context,
                dummy_surface,
                gl,
                extensions,
            }),
            Err(e) => {
                let _ = lib.terminate(display);
                Err(e)
            }
        }
    }

    fn create_context(
        lib: &EglInstance,
        display: egl::Display,
    ) -> VrResult<(
        egl::Config,
        egl::Context,
        egl::Surface,
        glow::Context,
        GlExtensions,
    )> {
        let config_attribs = [
            egl::RENDERABLE_TYPE,
            egl::OPENGL_ES3_BIT,
            egl::RED_SIZE,
            8,
            egl::GREEN_SIZE,
            8,
            egl::BLUE_SIZE,
            8,
            egl::ALPHA_SIZE,
            8,
            egl::DEPTH_SIZE,
            0,
            egl::STENCIL_SIZE,
            0,
            egl::SAMPLES,
            0,
            egl::NONE,
        ];

        let config = lib
            .choose_first_config(display, &config_attribs)
            .map_err(|e| VrError::Graphics(format!("eglChooseConfig failed: {e}")))?
            .ok_or_else(|| VrError::Graphics("no matching EGL configs found".to_string()))?;
        log_config(lib, display, config);

        lib.bind_api(egl::OPENGL_ES_API)
            .map_err(|e| VrError::Graphics(format!("eglBindAPI failed: {e}")))?;

        let context_attribs = [egl::CONTEXT_CLIENT_VERSION, 3, egl::NONE];
        let context = lib
            .create_context(display, config, None, &context_attribs)
            .map_err(|e| VrError::Graphics(format!("eglCreateContext failed: {e}")))?;

        let surface_attribs = [
            egl::WIDTH,
            PBUFFER_SIZE,
            egl::HEIGHT,
            PBUFFER_SIZE,
            egl::NONE,
        ];
        let dummy_surface = match lib.create_pbuffer_surface(display, config, &surface_attribs) {
            Ok(surface) => surface,
            Err(e) => {
                let _ = lib.destroy_context(display, context);
                return Err(VrError::Graphics(format!(
                    "eglCreatePbufferSurface failed: {e}"
                )));
            }
        };

        if let Err(e) =
            lib.make_current(display, Some(dummy_surface), Some(dummy_surface), Some(context))
        {
            let _ = lib.destroy_surface(display, dummy_surface);
            let _ = lib.destroy_context(display, context);
            return Err(VrError::Graphics(format!(
                "initial eglMakeCurrent failed: {e}"
            )));
        }

        let gl = unsafe {
            glow::Context::from_loader_function(|name| {
                lib.get_proc_address(name)
                    .map_or(std::ptr::null(), |f| f as *const c_void)
            })
        };
        let version = unsafe { gl.get_parameter_string(glow::VERSION) };
        debug!("OpenGL ES version: {version}");

        let extensions = load_extensions(lib, &gl);
        Ok((config, context, dummy_surface, gl, extensions))
    }

    /// Rebind the context to the calling thread.
    pub fn make_current(&self) -> VrResult<()> {
        self.egl
            .make_current(
                self.display,
                Some(self.dummy_surface),
                Some(self.dummy_surface),
                Some(self.context),
            )
            .map_err(|e| {
                error!("eglMakeCurrent failed: {e}");
                VrError::Graphics(format!("eglMakeCurrent failed: {e}"))
            })
    }

    pub fn release_current(&self) -> VrResult<()> {
        self.egl
            .make_current(self.display, None, None, None)
            .map_err(|e| VrError::Graphics(format!("eglMakeCurrent(none) failed: {e}")))
    }

    pub fn gl(&self) -> &glow::Context {
        &self.gl
    }

    pub fn extensions(&self) -> &GlExtensions {
        &self.extensions
    }

    pub fn display_ptr(&self) -> *mut c_void {
        self.display.as_ptr()
    }

    pub fn config_ptr(&self) -> *mut c_void {
        self.config.as_ptr()
    }

    pub fn context_ptr(&self) -> *mut c_void {
        self.context.as_ptr()
    }
}

impl Drop for EglContext {
    fn drop(&mut self) {
        let _ = self.egl.make_current(self.display, None, None, None);
        let _ = self.egl.destroy_surface(self.display, self.dummy_surface);
        let _ = self.egl.destroy_context(self.display, self.context);
        let _ = self.egl.terminate(self.display);
    }
}

fn load_extensions(lib: &EglInstance, gl: &glow::Context) -> GlExtensions {
    let supported = gl.supported_extensions();
    let has_multiview = supported.contains("GL_OVR_multiview2");
    let has_msrtt = supported.contains("GL_EXT_multisampled_render_to_texture");
    debug!(
        "GL extension support: multiview={has_multiview} multisampled_render_to_texture={has_msrtt}"
    );

    let framebuffer_texture_multiview = lib
        .get_proc_address("glFramebufferTextureMultiviewOVR")
        .map(|f| unsafe {
            std::mem::transmute::<extern "system" fn(), FramebufferTextureMultiviewFn>(f)
        });
    if has_multiview && framebuffer_texture_multiview.is_none() {
        warn!("glFramebufferTextureMultiviewOVR not found");
    }

    let renderbuffer_storage_multisample_ext = lib
        .get_proc_address("glRenderbufferStorageMultisampleEXT")
        .map(|f| unsafe {
            std::mem::transmute::<extern "system" fn(), RenderbufferStorageMultisampleFn>(f)
        });

    GlExtensions {
        has_multiview,
        has_multisampled_render_to_texture: has_msrtt,
        framebuffer_texture_multiview,
        renderbuffer_storage_multisample_ext,
    }
}

fn log_config(lib: &EglInstance, display: egl::Display, config: egl::Config) {
    let attribs = [
        ("EGL_RED_SIZE", egl::RED_SIZE),
        ("EGL_GREEN_SIZE", egl::GREEN_SIZE),
        ("EGL_BLUE_SIZE", egl::BLUE_SIZE),
        ("EGL_ALPHA_SIZE", egl::ALPHA_SIZE),
        ("EGL_DEPTH_SIZE", egl::DEPTH_SIZE),
        ("EGL_STENCIL_SIZE", egl::STENCIL_SIZE),
        ("EGL_SAMPLES", egl::SAMPLES),
    ];
    for (name, attrib) in attribs {
        if let Ok(value) = lib.get_config_attrib(display, config, attrib) {
            debug!("EGL config {name}: {value}");
        }
    }
}
