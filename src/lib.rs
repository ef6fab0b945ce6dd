//! Snapshot a mobile app's on-device state and diff two snapshots.
//!
//! Pipeline: `bridge` (attach and load the agent) -> `capture` (validate
//! what the agent returned) -> `transfer` (pull scope archives) -> `store`
//! (persist) -> `diff` (compare two stored snapshots). `snapshot` wires the
//! first four together.

pub mod bridge;
pub mod capture;
pub mod cli;
pub mod config;
pub mod diff;
pub mod error;
pub mod platform;
pub mod progress;
pub mod report;
pub mod snapshot;
pub mod store;
pub mod transfer;
pub mod util;

pub use error::{Error, Result};
