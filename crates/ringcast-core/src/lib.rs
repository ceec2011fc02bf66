//! Core ringcast primitives shared across crates.
//!
//! Includes the fixed-width key space, hash helpers, the message-exchange
//! mode types and base errors.

pub mod error;
pub mod hash;
pub mod key;
pub mod mode;
pub mod time;

pub use key::{KeyPoint, KEY_HALF, KEY_MAX, KEY_ZERO};
pub use mode::{AckMode, CacheOrder, CachePolicy, MepType, Pattern, Role};
