use anyhow::Result;
use image::RgbImage;

use crate::detect::backend::{Analysis, DetectorBackend};

/// Pass-through backend. Never reports a subject and never draws.
#[derive(Default)]
pub struct StubBackend;

impl StubBackend {
    pub fn new() -> Self {
        Self
    }
}

impl DetectorBackend for StubBackend {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn analyze(&mut self, image: RgbImage) -> Result<Analysis> {
        Ok(Analysis::passthrough(image))
    }
}
