use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::hash::blake3_32;

/// Number of hex digits in the string form of a key.
pub const KEY_HEX_LEN: usize = 64;

/// 256-bit unsigned point on the identifier ring.
///
/// Stored as four big-endian `u64` words (`0` is most significant), so the
/// derived lexicographic ordering is the numeric ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct KeyPoint([u64; 4]);

pub const KEY_ZERO: KeyPoint = KeyPoint([0; 4]);
pub const KEY_MAX: KeyPoint = KeyPoint([u64::MAX; 4]);
/// `2^255 - 1`, the point half-way around the ring.
pub const KEY_HALF: KeyPoint = KeyPoint([u64::MAX / 2, u64::MAX, u64::MAX, u64::MAX]);

impl KeyPoint {
    pub const fn from_words(words: [u64; 4]) -> Self {
        Self(words)
    }

    pub const fn words(&self) -> [u64; 4] {
        self.0
    }

    /// Interprets 32 bytes as a big-endian 256-bit value.
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        let mut words = [0_u64; 4];
        for (idx, chunk) in bytes.chunks_exact(8).enumerate() {
            let mut word = [0_u8; 8];
            word.copy_from_slice(chunk);
            words[idx] = u64::from_be_bytes(word);
        }
        Self(words)
    }

    pub fn to_bytes(&self) -> [u8; 32] {
        let mut out = [0_u8; 32];
        for (idx, word) in self.0.iter().enumerate() {
            out[idx * 8..(idx + 1) * 8].copy_from_slice(&word.to_be_bytes());
        }
        out
    }

    /// Derives the rendezvous point of a subject or host name.
    ///
    /// Independent peers hashing the same string always agree on the point.
    pub fn from_string(s: &str) -> Self {
        Self::from_bytes(blake3_32(s.as_bytes()))
    }

    /// Derives a point from `"{host}:{port}"`.
    pub fn from_host_port(host: &str, port: &str) -> Self {
        Self::from_string(&format!("{host}:{port}"))
    }

    pub fn compare(&self, other: &Self) -> Ordering {
        self.cmp(other)
    }

    /// Wrapping 256-bit addition.
    pub fn add(&self, other: &Self) -> Self {
        let mut out = [0_u64; 4];
        let mut carry = false;
        for i in (0..4).rev() {
            let (sum, c1) = self.0[i].overflowing_add(other.0[i]);
            let (sum, c2) = sum.overflowing_add(u64::from(carry));
            out[i] = sum;
            carry = c1 || c2;
        }
        Self(out)
    }

    /// Wrapping 256-bit subtraction.
    pub fn sub(&self, other: &Self) -> Self {
        let mut out = [0_u64; 4];
        let mut borrow = false;
        for i in (0..4).rev() {
            let (diff, b1) = self.0[i].overflowing_sub(other.0[i]);
            let (diff, b2) = diff.overflowing_sub(u64::from(borrow));
            out[i] = diff;
            borrow = b1 || b2;
        }
        Self(out)
    }

    /// Absolute difference `|a - b|`, taking whichever subtraction does not
    /// underflow.
    pub fn distance(&self, other: &Self) -> Self {
        if self >= other {
            self.sub(other)
        } else {
            other.sub(self)
        }
    }

    /// The point opposite `self` on the ring.
    pub fn midpoint(&self) -> Self {
        if *self < KEY_HALF {
            self.add(&KEY_HALF)
        } else {
            self.sub(&KEY_HALF)
        }
    }

    /// Returns whether `self` lies on the closed arc from `left` to `right`.
    ///
    /// When `left > right` the arc wraps through zero. A degenerate arc
    /// (`left == right`) only contains its endpoint.
    pub fn between(&self, left: &Self, right: &Self) -> bool {
        if self == left || self == right {
            return true;
        }
        match left.cmp(right) {
            Ordering::Less => left < self && self < right,
            Ordering::Equal => false,
            Ordering::Greater => left < self || self < right,
        }
    }

    /// Number of leading hex digits shared with `other`, capped at 63.
    pub fn prefix_index(&self, other: &Self) -> usize {
        let mine = self.to_hex();
        let theirs = other.to_hex();
        let shared = mine
            .bytes()
            .zip(theirs.bytes())
            .take_while(|(a, b)| a == b)
            .count();
        shared.min(KEY_HEX_LEN - 1)
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.to_bytes())
    }

    pub fn from_hex(value: &str) -> Result<Self, CoreError> {
        if value.len() != KEY_HEX_LEN {
            return Err(CoreError::InvalidInput("key hex must be 64 digits"));
        }
        let mut bytes = [0_u8; 32];
        hex::decode_to_slice(value, &mut bytes)
            .map_err(|_| CoreError::InvalidInput("key hex is not hexadecimal"))?;
        Ok(Self::from_bytes(bytes))
    }
}

impl fmt::Display for KeyPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}
