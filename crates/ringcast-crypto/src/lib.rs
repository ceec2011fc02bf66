//! Identity signing and payload sealing for ringcast nodes.

pub mod session;
pub mod signing;
