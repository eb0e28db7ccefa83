use std::sync::{Mutex, OnceLock};

fn default_status() -> String {
    "VR: idle (render thread not started)".to_string()
}

static VR_STATUS: OnceLock<Mutex<String>> = OnceLock::new();

fn status_cell() -> &'static Mutex<String> {
    VR_STATUS.get_or_init(|| Mutex::new(default_status()))
}

/// Last reported lifecycle status of the VR subsystem.
pub fn vr_status() -> String {
    match status_cell().lock() {
        Ok(guard) => guard.clone(),
        Err(poisoned) => poisoned.into_inner().clone(),
    }
}

pub fn set_vr_status(status: impl Into<String>) {
    let mut guard = match status_cell().lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    };
    *guard = status.into();
}
