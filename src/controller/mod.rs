pub mod backup_schedule;
pub mod context;
pub mod crash_recovery;
pub mod error;
pub mod reconciler;
pub mod status;
pub mod volume_resize;

#[cfg(test)]
mod test_support;

pub use context::{Context, ControllerConfig};
pub use error::{BackoffConfig, Error, Result};
pub use reconciler::{error_policy, reconcile};
pub use status::StatusUpdate;
