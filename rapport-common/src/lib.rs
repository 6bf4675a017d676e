//! Shared types for the rapport aggregate report delivery engine.
//!
//! This crate provides:
//! - The published policy record model and its tag parser
//! - The queued aggregate report model
//! - Logging bootstrap shared by the binary and tests

pub mod logging;
pub mod policy;
pub mod report;

pub use tracing;
