//! ringcast wire codec primitives.
//!
//! Defines capability tokens, subject messages and the frame envelope that
//! carries them between nodes, plus CBOR encode/decode helpers.

pub mod error;
pub mod frame;
pub mod message;
pub mod token;

pub use error::CodecError;
pub use frame::{decode_frame, encode_frame, AckFrame, Frame};
pub use message::{Message, MessageBody, SealedBody};
pub use token::{CapabilityToken, ExtValue, Extensions};
