//! Outbound notification of detection-state transitions.
//!
//! The ingestion loop calls `Notifier::notify` once per transition, never per
//! frame. Implementations swallow and log their own failures: a dashboard
//! outage must never stall or fail ingestion.

pub mod dashboard;

pub use dashboard::{DashboardConfig, DashboardNotifier};

pub trait Notifier: Send {
    fn notify(&mut self, subject_present: bool);
}

/// Notifier that only writes the transition to the log.
#[derive(Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&mut self, subject_present: bool) {
        log::info!("detection state changed: subject_present={}", subject_present);
    }
}
