//! Shared domain types for the Smartguard surveillance pipeline.

pub mod config;
pub mod events;
pub mod frame;
pub mod report;
pub mod telemetry;

mod errors;

pub use errors::{Result, SmartguardError};
