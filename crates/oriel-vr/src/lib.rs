#![forbid(unsafe_code)]

pub mod channel;
pub mod status;
pub mod types;

pub use channel::{Signal, SignalChannel, SignalKind};
pub use status::{set_vr_status, vr_status};
pub use types::Hand;

use thiserror::Error;

/// Errors produced by the VR subsystem.
///
/// Each ordered startup step fails with a distinct message under one of these
/// variants; steady-state runtime failures surface as `Runtime`.
#[derive(Debug, Error)]
pub enum VrError {
    #[error("runtime unavailable: {0}")]
    Unavailable(String),
    #[error("graphics context error: {0}")]
    Graphics(String),
    #[error("runtime error: {0}")]
    Runtime(String),
    #[error("input error: {0}")]
    Input(String),
    #[error("render thread error: {0}")]
    Thread(String),
}

pub type VrResult<T> = Result<T, VrError>;
