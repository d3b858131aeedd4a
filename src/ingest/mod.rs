//! Upstream ingestion.
//!
//! - `http`: streaming GET against the camera's MJPEG endpoint
//! - `mjpeg`: JPEG boundary extraction over arbitrarily chunked bytes
//!
//! A `StreamSource` only knows how to open a byte stream. Reconnects, framing
//! and detection live in the ingestion loop (`crate::pipeline`).

use anyhow::Result;
use std::io::Read;

pub mod http;
pub mod mjpeg;

pub use http::{HttpSource, HttpSourceConfig};
pub use mjpeg::MjpegExtractor;

/// Something that can open a fresh upstream byte stream.
///
/// Each successful `open` is one connection; dropping the reader releases it.
pub trait StreamSource: Send {
    /// Human-readable source identifier for logs.
    fn describe(&self) -> String;

    fn open(&mut self) -> Result<Box<dyn Read + Send>>;
}
