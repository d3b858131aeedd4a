use anyhow::Result;
use image::RgbImage;

/// Output of one analysis pass.
#[derive(Clone, Debug)]
pub struct Analysis {
    /// Is a subject present in the frame?
    pub subject_present: bool,
    /// Frame to re-serve. Backends without an overlay return the input unchanged.
    pub annotated: RgbImage,
}

impl Analysis {
    pub fn passthrough(image: RgbImage) -> Self {
        Self {
            subject_present: false,
            annotated: image,
        }
    }
}

/// Presence detector backend.
///
/// Called synchronously by the ingestion loop once per decoded frame. An error
/// means "skip this frame": the loop logs it and keeps the previous detection
/// state.
pub trait DetectorBackend: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Analyze a frame, taking ownership so overlays can be drawn in place.
    fn analyze(&mut self, image: RgbImage) -> Result<Analysis>;

    /// Optional warm-up hook.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}
