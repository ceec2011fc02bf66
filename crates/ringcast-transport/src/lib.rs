//! Transport abstractions for ringcast.
//!
//! The node only depends on the byte-oriented [`adapter::Transport`] and the
//! [`ring::Rendezvous`] resolver defined in this crate.

pub mod adapter;
pub mod ring;

pub use adapter::{InMemoryEndpoint, InMemoryNetwork, Transport, TransportError};
pub use ring::{Rendezvous, RingDirectory};
