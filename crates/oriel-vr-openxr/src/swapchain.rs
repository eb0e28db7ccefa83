//! Per-eye image chains: a runtime-owned swapchain plus locally-owned depth,
//! multisample, and framebuffer objects for each backing image.
//!
//! The runtime decides how many color images back a chain (typically 2-3);
//! exactly one may be acquired at a time. MSAA is handled locally: the chain
//! is created single-sampled and, when multisampling is requested without
//! multiview, rendering goes to a multisampled color renderbuffer that
//! `resolve()` blits into the runtime image before release.

use glow::HasContext;
use openxr as xr;
use openxr::sys;

use log::{debug, error, warn};
use oriel_vr::{VrError, VrResult};

use crate::egl::GlExtensions;
use crate::session::xr_err;

const IMAGE_WAIT_TIMEOUT_NS: i64 = 1_000_000_000;
const IMAGE_WAIT_RETRIES: u32 = 3;

pub struct Framebuffer {
    instance: xr::Instance,
    swapchain: xr::Swapchain<xr::OpenGlEs>,
    width: u32,
    height: u32,
    sample_count: i32,
    multiview: bool,
    color_images: Vec<u32>,
    depth_buffers: Vec<glow::NativeRenderbuffer>,
    msaa_color_buffers: Vec<Option<glow::NativeRenderbuffer>>,
    framebuffers: Vec<glow::NativeFramebuffer>,
    current_index: usize,
    acquired: bool,
}

impl Framebuffer {
    /// Create a chain for one eye (or both, when multiview is in effect).
    ///
    /// `use_multiview` is honored only when the extension and its attach
    /// entry point are present; otherwise the chain silently falls back to
    /// per-eye 2D images. On any failure no partial chain is left bound as
    /// the current draw framebuffer.
    #[allow(clippy::too_many_arguments)]
    pub fn create(
        session: &xr::Session<xr::OpenGlEs>,
        instance: &xr::Instance,
        gl: &glow::Context,
        exts: &GlExtensions,
        color_format: u32,
        width: u32,
        height: u32,
        sample_count: i32,
        use_multiview: bool,
    ) -> VrResult<Self> {
        let multiview = effective_multiview(use_multiview, exts);
        if use_multiview && !multiview {
            warn!("GL_OVR_multiview2 unsupported, falling back to non-multiview");
        }
        if sample_count > 1 && exts.renderbuffer_storage_multisample_ext.is_none() {
            warn!("glRenderbufferStorageMultisampleEXT not found, multisampling may not work");
        }

        let formats = session
            .enumerate_swapchain_formats()
            .map_err(|e| xr_err("xrEnumerateSwapchainFormats", e))?;
        if !format_supported(&formats, color_format) {
            return Err(VrError::Graphics(format!(
                "unsupported swapchain color format 0x{color_format:X}"
            )));
        }

        let create_info = xr::SwapchainCreateInfo {
            create_flags: xr::SwapchainCreateFlags::EMPTY,
            usage_flags: xr::SwapchainUsageFlags::COLOR_ATTACHMENT
                | xr::SwapchainUsageFlags::SAMPLED,
            format: color_format,
            // MSAA is resolved locally, the runtime images stay single-sampled.
            sample_count: 1,
            width,
            height,
            face_count: 1,
            array_size: if multiview { 2 } else { 1 },
            mip_count: 1,
        };
        let swapchain = session
            .create_swapchain(&create_info)
            .map_err(|e| xr_err("xrCreateSwapchain", e))?;
        let color_images = swapchain
            .enumerate_images()
            .map_err(|e| xr_err("xrEnumerateSwapchainImages", e))?;
        debug!(
            "creating {} framebuffers: {width}x{height} samples={sample_count} multiview={multiview}",
            color_images.len()
        );

        let mut depth_buffers = Vec::with_capacity(color_images.len());
        let mut msaa_color_buffers = Vec::with_capacity(color_images.len());
        let mut framebuffers = Vec::with_capacity(color_images.len());
        for &color_tex in &color_images {
            match create_image_targets(
                gl,
                exts,
                color_tex,
                color_format,
                width,
                height,
                sample_count,
                multiview,
            ) {
                Ok((depth, msaa, framebuffer)) => {
                    depth_buffers.push(depth);
                    msaa_color_buffers.push(msaa);
                    framebuffers.push(framebuffer);
                }
                Err(e) => {
                    unsafe { gl.bind_framebuffer(glow::DRAW_FRAMEBUFFER, None) };
                    delete_targets(gl, &framebuffers, &depth_buffers, &msaa_color_buffers);
                    return Err(e);
                }
            }
        }

        Ok(Self {
            instance: instance.clone(),
            swapchain,
            width,
            height,
            sample_count,
            multiview,
            color_images,
            depth_buffers,
            msaa_color_buffers,
            framebuffers,
            current_index: 0,
            acquired: false,
        })
    }

    /// Acquire the next image and wait until it is render-ready.
    ///
    /// The wait is retried a bounded number of times on timeout; after that
    /// the frame proceeds best-effort.
    pub fn acquire(&mut self) -> VrResult<u32> {
        let index = self
            .swapchain
            .acquire_image()
            .map_err(|e| xr_err("xrAcquireSwapchainImage", e))?;

        let wait_info = sys::SwapchainImageWaitInfo {
            ty: sys::SwapchainImageWaitInfo::TYPE,
            next: std::ptr::null_mut(),
            timeout: xr::Duration::from_nanos(IMAGE_WAIT_TIMEOUT_NS),
        };
        let wait = self.instance.fp().wait_swapchain_image;
        let mut result = unsafe { wait(self.swapchain.as_raw(), &wait_info) };
        let mut retries = 0;
        while result == sys::Result::TIMEOUT_EXPIRED && retries < IMAGE_WAIT_RETRIES {
            retries += 1;
            debug!("retry {retries} xrWaitSwapchainImage after timeout");
            result = unsafe { wait(self.swapchain.as_raw(), &wait_info) };
        }
        if result.into_raw() < 0 {
            return Err(xr_err("xrWaitSwapchainImage", result));
        }
        if result == sys::Result::TIMEOUT_EXPIRED {
            warn!("swapchain image not ready after {retries} retries, rendering anyway");
        }

        self.current_index = index as usize;
        self.acquired = true;
        Ok(index)
    }

    /// Bind the framebuffer of the acquired image as the draw target.
    pub fn set_current(&self, gl: &glow::Context) {
        debug_assert!(self.acquired, "set_current without a prior acquire");
        if let Some(&framebuffer) = self.framebuffers.get(self.current_index) {
            unsafe { gl.bind_framebuffer(glow::DRAW_FRAMEBUFFER, Some(framebuffer)) };
        }
    }

    pub fn set_none(gl: &glow::Context) {
        unsafe { gl.bind_framebuffer(glow::DRAW_FRAMEBUFFER, None) };
    }

    /// Blit the multisampled color buffer into the runtime image.
    ///
    /// No-op unless the chain is multisampled without multiview. The depth
    /// attachment is invalidated afterwards so the driver can skip its
    /// store.
    pub fn resolve(&self, gl: &glow::Context) {
        if self.sample_count <= 1 || self.multiview {
            return;
        }
        debug_assert!(self.acquired, "resolve without a prior acquire");
        let Some(&msaa_fb) = self.framebuffers.get(self.current_index) else {
            return;
        };
        let Some(&color_tex) = self.color_images.get(self.current_index) else {
            return;
        };

        unsafe {
            let temp = match gl.create_framebuffer() {
                Ok(fb) => fb,
                Err(e) => {
                    error!("resolve framebuffer alloc failed: {e}");
                    return;
                }
            };
            gl.bind_framebuffer(glow::DRAW_FRAMEBUFFER, Some(temp));
            let tex = std::mem::transmute::<u32, Option<glow::NativeTexture>>(color_tex);
            gl.framebuffer_texture_2d(
                glow::DRAW_FRAMEBUFFER,
                glow::COLOR_ATTACHMENT0,
                glow::TEXTURE_2D,
                tex,
                0,
            );

            let status = gl.check_framebuffer_status(glow::DRAW_FRAMEBUFFER);
            if status != glow::FRAMEBUFFER_COMPLETE {
                error!("resolve target framebuffer incomplete: 0x{status:X}");
                gl.bind_framebuffer(glow::DRAW_FRAMEBUFFER, None);
                gl.delete_framebuffer(temp);
                return;
            }

            gl.bind_framebuffer(glow::READ_FRAMEBUFFER, Some(msaa_fb));
            let status = gl.check_framebuffer_status(glow::READ_FRAMEBUFFER);
            if status != glow::FRAMEBUFFER_COMPLETE {
                error!("MSAA source framebuffer incomplete before blit: 0x{status:X}");
                gl.bind_framebuffer(glow::READ_FRAMEBUFFER, None);
                gl.bind_framebuffer(glow::DRAW_FRAMEBUFFER, None);
                gl.delete_framebuffer(temp);
                return;
            }

            let (w, h) = (self.width as i32, self.height as i32);
            gl.blit_framebuffer(0, 0, w, h, 0, 0, w, h, glow::COLOR_BUFFER_BIT, glow::NEAREST);

            // The depth content is dead after the resolve.
            gl.invalidate_framebuffer(glow::READ_FRAMEBUFFER, &[glow::DEPTH_ATTACHMENT]);

            gl.bind_framebuffer(glow::READ_FRAMEBUFFER, None);
            gl.bind_framebuffer(glow::DRAW_FRAMEBUFFER, None);
            gl.delete_framebuffer(temp);
        }
    }

    /// Hand the image back to the runtime. All GPU work referencing it for
    /// this frame must already be issued (not necessarily completed).
    pub fn release(&mut self) -> VrResult<()> {
        debug_assert!(self.acquired, "release without a prior acquire");
        self.swapchain
            .release_image()
            .map_err(|e| xr_err("xrReleaseSwapchainImage", e))?;
        self.acquired = false;
        Ok(())
    }

    /// Delete all locally-owned GL objects; the swapchain handle is
    /// destroyed when `self` drops at the end of this call.
    pub fn destroy(self, gl: &glow::Context) {
        unsafe { gl.bind_framebuffer(glow::DRAW_FRAMEBUFFER, None) };
        delete_targets(
            gl,
            &self.framebuffers,
            &self.depth_buffers,
            &self.msaa_color_buffers,
        );
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn multiview(&self) -> bool {
        self.multiview
    }

    pub fn swapchain_raw(&self) -> sys::Swapchain {
        self.swapchain.as_raw()
    }
}

/// Whether multiview can actually be used for this chain.
pub(crate) fn effective_multiview(requested: bool, exts: &GlExtensions) -> bool {
    requested && exts.has_multiview && exts.framebuffer_texture_multiview.is_some()
}

pub(crate) fn format_supported(formats: &[u32], want: u32) -> bool {
    formats.contains(&want)
}

#[allow(clippy::too_many_arguments)]
fn create_image_targets(
    gl: &glow::Context,
    exts: &GlExtensions,
    color_tex: u32,
    color_format: u32,
    width: u32,
    height: u32,
    sample_count: i32,
    multiview: bool,
) -> VrResult<(
    glow::NativeRenderbuffer,
    Option<glow::NativeRenderbuffer>,
    glow::NativeFramebuffer,
)> {
    let (w, h) = (width as i32, height as i32);
    let tex_target = if multiview {
        glow::TEXTURE_2D_ARRAY
    } else {
        glow::TEXTURE_2D
    };

    unsafe {
        let tex = std::mem::transmute::<u32, Option<glow::NativeTexture>>(color_tex);
        gl.bind_texture(tex_target, tex);
        gl.tex_parameter_i32(tex_target, glow::TEXTURE_WRAP_S, glow::CLAMP_TO_EDGE as i32);
        gl.tex_parameter_i32(tex_target, glow::TEXTURE_WRAP_T, glow::CLAMP_TO_EDGE as i32);
        gl.tex_parameter_i32(tex_target, glow::TEXTURE_MIN_FILTER, glow::LINEAR as i32);
        gl.tex_parameter_i32(tex_target, glow::TEXTURE_MAG_FILTER, glow::LINEAR as i32);
        gl.bind_texture(tex_target, None);
    }

    // Depth renderbuffer. With MSAA this prefers the EXT storage entry
    // point; without it the depth stays single-sampled, which the
    // completeness check below may then have to repair.
    let depth = unsafe { gl.create_renderbuffer() }
        .map_err(|e| VrError::Graphics(format!("create depth renderbuffer: {e}")))?;
    unsafe {
        gl.bind_renderbuffer(glow::RENDERBUFFER, Some(depth));
        match (sample_count > 1, exts.renderbuffer_storage_multisample_ext) {
            (true, Some(storage_ext)) => {
                storage_ext(
                    glow::RENDERBUFFER,
                    sample_count,
                    glow::DEPTH_COMPONENT24,
                    w,
                    h,
                );
            }
            _ => {
                gl.renderbuffer_storage(glow::RENDERBUFFER, glow::DEPTH_COMPONENT24, w, h);
            }
        }
        gl.bind_renderbuffer(glow::RENDERBUFFER, None);
    }

    let framebuffer = match unsafe { gl.create_framebuffer() } {
        Ok(fb) => fb,
        Err(e) => {
            unsafe { gl.delete_renderbuffer(depth) };
            return Err(VrError::Graphics(format!("create framebuffer: {e}")));
        }
    };

    let mut msaa_color = None;
    unsafe {
        gl.bind_framebuffer(glow::DRAW_FRAMEBUFFER, Some(framebuffer));
        gl.framebuffer_renderbuffer(
            glow::DRAW_FRAMEBUFFER,
            glow::DEPTH_ATTACHMENT,
            glow::RENDERBUFFER,
            Some(depth),
        );

        if multiview {
            // Guaranteed by effective_multiview.
            if let Some(attach) = exts.framebuffer_texture_multiview {
                attach(glow::DRAW_FRAMEBUFFER, glow::COLOR_ATTACHMENT0, color_tex, 0, 0, 2);
            }
        } else if sample_count > 1 {
            let msaa = match gl.create_renderbuffer() {
                Ok(rb) => rb,
                Err(e) => {
                    gl.bind_framebuffer(glow::DRAW_FRAMEBUFFER, None);
                    gl.delete_framebuffer(framebuffer);
                    gl.delete_renderbuffer(depth);
                    return Err(VrError::Graphics(format!("create MSAA renderbuffer: {e}")));
                }
            };
            gl.bind_renderbuffer(glow::RENDERBUFFER, Some(msaa));
            match exts.renderbuffer_storage_multisample_ext {
                Some(storage_ext) => {
                    storage_ext(glow::RENDERBUFFER, sample_count, color_format, w, h);
                }
                None => {
                    gl.renderbuffer_storage_multisample(
                        glow::RENDERBUFFER,
                        sample_count,
                        color_format,
                        w,
                        h,
                    );
                }
            }
            gl.bind_renderbuffer(glow::RENDERBUFFER, None);
            gl.framebuffer_renderbuffer(
                glow::DRAW_FRAMEBUFFER,
                glow::COLOR_ATTACHMENT0,
                glow::RENDERBUFFER,
                Some(msaa),
            );
            msaa_color = Some(msaa);
        } else {
            let tex = std::mem::transmute::<u32, Option<glow::NativeTexture>>(color_tex);
            gl.framebuffer_texture_2d(
                glow::DRAW_FRAMEBUFFER,
                glow::COLOR_ATTACHMENT0,
                glow::TEXTURE_2D,
                tex,
                0,
            );
        }

        let mut status = gl.check_framebuffer_status(glow::DRAW_FRAMEBUFFER);
        if status == glow::FRAMEBUFFER_INCOMPLETE_MULTISAMPLE {
            error!(
                "incomplete framebuffer: {} (0x{status:X})",
                framebuffer_status_str(status)
            );
            // Depth and color attachments ended up with different sample
            // counts; redo the depth storage through the same path the
            // color buffer used and check once more.
            gl.bind_renderbuffer(glow::RENDERBUFFER, Some(depth));
            match exts.renderbuffer_storage_multisample_ext {
                Some(storage_ext) => {
                    storage_ext(
                        glow::RENDERBUFFER,
                        sample_count,
                        glow::DEPTH_COMPONENT24,
                        w,
                        h,
                    );
                }
                None => {
                    gl.renderbuffer_storage_multisample(
                        glow::RENDERBUFFER,
                        sample_count,
                        glow::DEPTH_COMPONENT24,
                        w,
                        h,
                    );
                }
            }
            gl.bind_renderbuffer(glow::RENDERBUFFER, None);
            gl.bind_framebuffer(glow::DRAW_FRAMEBUFFER, Some(framebuffer));
            gl.framebuffer_renderbuffer(
                glow::DRAW_FRAMEBUFFER,
                glow::DEPTH_ATTACHMENT,
                glow::RENDERBUFFER,
                Some(depth),
            );
            status = gl.check_framebuffer_status(glow::DRAW_FRAMEBUFFER);
            if status == glow::FRAMEBUFFER_COMPLETE {
                debug!("framebuffer repaired by matching depth sample count to color");
            }
        }

        if status != glow::FRAMEBUFFER_COMPLETE {
            gl.bind_framebuffer(glow::DRAW_FRAMEBUFFER, None);
            gl.delete_framebuffer(framebuffer);
            gl.delete_renderbuffer(depth);
            if let Some(msaa) = msaa_color {
                gl.delete_renderbuffer(msaa);
            }
            return Err(VrError::Graphics(format!(
                "incomplete framebuffer: {} (0x{status:X})",
                framebuffer_status_str(status)
            )));
        }

        gl.bind_framebuffer(glow::DRAW_FRAMEBUFFER, None);
    }

    Ok((depth, msaa_color, framebuffer))
}

fn delete_targets(
    gl: &glow::Context,
    framebuffers: &[glow::NativeFramebuffer],
    depth_buffers: &[glow::NativeRenderbuffer],
    msaa_color_buffers: &[Option<glow::NativeRenderbuffer>],
) {
    unsafe {
        for &fb in framebuffers {
            gl.delete_framebuffer(fb);
        }
        for &rb in depth_buffers {
            gl.delete_renderbuffer(rb);
        }
        for &rb in msaa_color_buffers.iter().flatten() {
            gl.delete_renderbuffer(rb);
        }
    }
}

pub(crate) fn framebuffer_status_str(status: u32) -> &'static str {
    match status {
        glow::FRAMEBUFFER_COMPLETE => "GL_FRAMEBUFFER_COMPLETE",
        glow::FRAMEBUFFER_INCOMPLETE_ATTACHMENT => "GL_FRAMEBUFFER_INCOMPLETE_ATTACHMENT",
        glow::FRAMEBUFFER_INCOMPLETE_MISSING_ATTACHMENT => {
            "GL_FRAMEBUFFER_INCOMPLETE_MISSING_ATTACHMENT"
        }
        glow::FRAMEBUFFER_INCOMPLETE_DIMENSIONS => "GL_FRAMEBUFFER_INCOMPLETE_DIMENSIONS",
        glow::FRAMEBUFFER_INCOMPLETE_MULTISAMPLE => "GL_FRAMEBUFFER_INCOMPLETE_MULTISAMPLE",
        glow::FRAMEBUFFER_UNSUPPORTED => "GL_FRAMEBUFFER_UNSUPPORTED",
        _ => "unknown framebuffer status",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_check_matches_exactly() {
        let formats = [glow::RGBA8, glow::SRGB8_ALPHA8];
        assert!(format_supported(&formats, glow::SRGB8_ALPHA8));
        assert!(format_supported(&formats, glow::RGBA8));
        assert!(!format_supported(&formats, glow::DEPTH_COMPONENT24));
        assert!(!format_supported(&[], glow::RGBA8));
    }

    #[test]
    fn multiview_requires_extension_and_entry_point() {
        let none = GlExtensions::default();
        assert!(!effective_multiview(true, &none));

        let ext_only = GlExtensions {
            has_multiview: true,
            ..Default::default()
        };
        assert!(!effective_multiview(true, &ext_only));

        extern "system" fn fake(_: u32, _: u32, _: u32, _: i32, _: i32, _: i32) {}
        let full = GlExtensions {
            has_multiview: true,
            framebuffer_texture_multiview: Some(
                fake as crate::egl::FramebufferTextureMultiviewFn,
            ),
            ..Default::default()
        };
        assert!(effective_multiview(true, &full));
        assert!(!effective_multiview(false, &full));
    }

    #[test]
    fn framebuffer_status_names_are_descriptive() {
        assert_eq!(
            framebuffer_status_str(glow::FRAMEBUFFER_INCOMPLETE_MULTISAMPLE),
            "GL_FRAMEBUFFER_INCOMPLETE_MULTISAMPLE"
        );
        assert_eq!(
            framebuffer_status_str(glow::FRAMEBUFFER_COMPLETE),
            "GL_FRAMEBUFFER_COMPLETE"
        );
        assert_eq!(framebuffer_status_str(0), "unknown framebuffer status");
    }
}
