// Test code is allowed to panic on failure
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing,
    clippy::panic
)]

//! Unit tests for the XtraDB operator
//!
//! - Component status evaluation and state joining
//! - Crash log parsing and recovery leader selection
//! - Backup CronJob generation and retention selection
//! - Storage quantity alignment

#[path = "../common/mod.rs"]
mod common;

mod crash_recovery;
mod resources;
mod retention;
mod status;
