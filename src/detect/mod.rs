//! Presence detection collaborators.

use anyhow::{anyhow, Result};

mod backend;
mod backends;

pub use backend::{Analysis, DetectorBackend};
pub use backends::motion::DEFAULT_MOTION_THRESHOLD;
pub use backends::{MotionBackend, StubBackend};

/// Names accepted by `backend_by_name`.
pub const BACKEND_NAMES: &[&str] = &["motion", "stub"];

/// Build a detector backend from its configured name.
pub fn backend_by_name(name: &str, motion_threshold: f32) -> Result<Box<dyn DetectorBackend>> {
    match name {
        "motion" => Ok(Box::new(MotionBackend::new(motion_threshold)?)),
        "stub" => Ok(Box::new(StubBackend::new())),
        other => Err(anyhow!(
            "unknown detector backend '{}'; expected one of {:?}",
            other,
            BACKEND_NAMES
        )),
    }
}
