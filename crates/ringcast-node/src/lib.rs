//! ringcast node-layer primitives.
//!
//! This crate holds the subject-scoped capability ledger, the token-gated
//! delivery path, interest advertisement, acknowledgement bookkeeping and
//! the `Node` context that wires them to a transport and a rendezvous
//! resolver.

pub mod ack;
pub mod advert;
pub mod config;
pub mod delivery;
pub mod error;
pub mod ledger;
pub mod link;
pub mod node;
pub mod property;
pub mod scheduler;
pub mod stats;
mod sync;
pub mod token;

pub use config::NodeConfig;
pub use delivery::PublishOutcome;
pub use error::NodeError;
pub use node::{MaintenanceReport, Node};
pub use property::MessageProperty;
pub use scheduler::{install_node_jobs, JobQueue};
