//! MJPEG relay
//!
//! Pulls a Motion-JPEG stream from an upstream camera, runs every frame
//! through a presence detector, and re-serves the annotated frames as an
//! independent MJPEG stream per downstream client.
//!
//! # Data flow
//!
//! ```text
//! upstream bytes -> MjpegExtractor -> decode -> DetectorBackend -> encode
//!     -> LatestFrameStore -> (fan-out) -> /video_feed clients
//!                  \-> DetectionState -> Notifier (on transitions only)
//! ```
//!
//! # Module Structure
//!
//! - `ingest`: upstream sources and JPEG boundary extraction
//! - `pipeline`: the reconnecting ingestion loop
//! - `frame`: the latest-frame slot and detection state
//! - `detect`: presence detector backends
//! - `transport`: detection-transition notifiers
//! - `api`: the HTTP restream and status endpoints
//! - `config`: file + environment configuration

pub mod api;
pub mod config;
pub mod detect;
pub mod frame;
pub mod ingest;
pub mod pipeline;
pub mod transport;

pub use api::{ApiConfig, ApiHandle, ApiServer};
pub use config::RelayConfig;
pub use detect::{backend_by_name, Analysis, DetectorBackend, MotionBackend, StubBackend};
pub use frame::{DetectionState, Frame, LatestFrameStore};
pub use ingest::{HttpSource, HttpSourceConfig, MjpegExtractor, StreamSource};
pub use pipeline::{encode_jpeg, IngestConfig, IngestLoop, IngestStats};
pub use transport::{DashboardConfig, DashboardNotifier, LogNotifier, Notifier};
