//! Aggregate report delivery engine.
//!
//! Takes previously generated, queued feedback reports and transmits
//! each to the endpoints its publisher requested:
//! - Resolve a report's endpoints and enforce per-endpoint size caps
//! - Dispatch over SMTP or HTTP, with optional DKIM signing
//! - Account errors persistently and delete reports past the threshold
//! - Drive the run in batches with a per-report deadline, isolating
//!   every failure at the report boundary

mod accountant;
mod config;
mod dispatcher;
mod endpoint;
mod error;
pub mod planner;
pub mod queue;
mod scheduler;
mod signer;

pub use accountant::{ErrorAccountant, MAX_ERRORS};
pub use config::{CC_PLACEHOLDER, ConfigError, DeliveryConfig, DkimConfig};
pub use dispatcher::{DeliveryOutcome, DispatchState, TransportDispatcher};
pub use endpoint::{DeliveryEndpoint, EndpointKind};
pub use error::DeliveryError;
pub use queue::{MemoryQueue, QueueError, ReportQueue};
pub use scheduler::{BatchScheduler, ReportDisposition, RunSummary};
pub use signer::{Canonicalization, DkimSigner, SignerError};
