use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Which side of an exchange a principal is on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    Sender,
    Receiver,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Sender => "sender",
            Role::Receiver => "receiver",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "sender" => Some(Role::Sender),
            "receiver" => Some(Role::Receiver),
            _ => None,
        }
    }

    /// The role a matching capability must hold.
    pub fn counterpart(self) -> Self {
        match self {
            Role::Sender => Role::Receiver,
            Role::Receiver => Role::Sender,
        }
    }
}

/// How many simultaneous capability holders one side of a subject may have.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Pattern {
    /// Latest-wins, at most one holder.
    Single,
    /// Any number of holders.
    Group,
    /// Reserved; handled as `Group`.
    Any,
}

/// Message-exchange pattern: one sender pattern and one receiver pattern.
///
/// The low nibble holds the sender pattern, the second nibble the receiver
/// pattern, each as exactly one of the SINGLE/GROUP/ANY bits or empty.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u16", into = "u16")]
pub struct MepType(u16);

impl MepType {
    pub const SENDER_MASK: u16 = 0x000F;
    pub const RECEIVER_MASK: u16 = 0x00F0;

    pub const SINGLE_SENDER: Self = Self(0x0001);
    pub const GROUP_SENDER: Self = Self(0x0002);
    pub const ANY_SENDER: Self = Self(0x0004);
    pub const SINGLE_RECEIVER: Self = Self(0x0010);
    pub const GROUP_RECEIVER: Self = Self(0x0020);
    pub const ANY_RECEIVER: Self = Self(0x0040);

    pub const ONE_WAY: Self = Self::SINGLE_SENDER.with(Self::SINGLE_RECEIVER);
    pub const ONE_TO_GROUP: Self = Self::SINGLE_SENDER.with(Self::GROUP_RECEIVER);
    pub const GROUP_TO_ONE: Self = Self::GROUP_SENDER.with(Self::SINGLE_RECEIVER);
    pub const GROUP_TO_GROUP: Self = Self::GROUP_SENDER.with(Self::GROUP_RECEIVER);
    pub const ANY_TO_ANY: Self = Self::ANY_SENDER.with(Self::ANY_RECEIVER);

    /// Combines the bits of two patterns.
    pub const fn with(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    pub const fn bits(self) -> u16 {
        self.0
    }

    /// Parses raw bits, rejecting unknown bits and ambiguous nibbles.
    pub fn from_bits(bits: u16) -> Result<Self, CoreError> {
        let known = Self::SENDER_MASK | Self::RECEIVER_MASK;
        if bits & !known != 0 {
            return Err(CoreError::InvalidModeBits(bits));
        }
        let sender = bits & Self::SENDER_MASK;
        let receiver = (bits & Self::RECEIVER_MASK) >> 4;
        for nibble in [sender, receiver] {
            if !matches!(nibble, 0 | 1 | 2 | 4) {
                return Err(CoreError::InvalidModeBits(bits));
            }
        }
        Ok(Self(bits))
    }

    pub fn sender_pattern(self) -> Option<Pattern> {
        Self::decode_nibble(self.0 & Self::SENDER_MASK)
    }

    pub fn receiver_pattern(self) -> Option<Pattern> {
        Self::decode_nibble((self.0 & Self::RECEIVER_MASK) >> 4)
    }

    pub fn pattern_for(self, role: Role) -> Option<Pattern> {
        match role {
            Role::Sender => self.sender_pattern(),
            Role::Receiver => self.receiver_pattern(),
        }
    }

    fn decode_nibble(nibble: u16) -> Option<Pattern> {
        match nibble {
            1 => Some(Pattern::Single),
            2 => Some(Pattern::Group),
            4 => Some(Pattern::Any),
            _ => None,
        }
    }
}

impl Default for MepType {
    fn default() -> Self {
        Self::GROUP_TO_GROUP
    }
}

impl TryFrom<u16> for MepType {
    type Error = CoreError;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        Self::from_bits(value)
    }
}

impl From<MepType> for u16 {
    fn from(value: MepType) -> Self {
        value.0
    }
}

/// Acknowledgement requirement attached to a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum AckMode {
    #[default]
    None,
    /// Final destination acknowledges once.
    Destination,
    /// Every hop on the route acknowledges.
    EachHop,
}

impl AckMode {
    pub fn to_u8(self) -> u8 {
        match self {
            AckMode::None => 0,
            AckMode::Destination => 1,
            AckMode::EachHop => 2,
        }
    }

    pub fn from_u8(value: u8) -> Result<Self, CoreError> {
        match value {
            0 => Ok(AckMode::None),
            1 => Ok(AckMode::Destination),
            2 => Ok(AckMode::EachHop),
            other => Err(CoreError::InvalidModeBits(u16::from(other))),
        }
    }

    /// Number of acks a transmission over `hops` hops expects.
    pub fn expected_acks(self, hops: u16) -> u16 {
        match self {
            AckMode::None => 0,
            AckMode::Destination => 1,
            AckMode::EachHop => hops.max(1),
        }
    }
}

/// Which end of the pending-message cache is evicted on overflow.
///
/// New messages always enter at the head; the order only picks the victim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CacheOrder {
    /// Evict the tail, which holds the oldest message.
    Fifo,
    /// Evict the head, which holds the newest message.
    Filo,
}

/// Pending-message cache behavior: eviction order plus overflow handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CachePolicy {
    pub order: CacheOrder,
    pub purge: bool,
    pub reject: bool,
}

impl CachePolicy {
    pub const FIFO: u8 = 0x01;
    pub const FILO: u8 = 0x02;
    pub const OVERFLOW_REJECT: u8 = 0x10;
    pub const OVERFLOW_PURGE: u8 = 0x20;

    pub const fn fifo_purge() -> Self {
        Self {
            order: CacheOrder::Fifo,
            purge: true,
            reject: false,
        }
    }

    pub const fn filo_purge() -> Self {
        Self {
            order: CacheOrder::Filo,
            purge: true,
            reject: false,
        }
    }

    pub const fn reject(order: CacheOrder) -> Self {
        Self {
            order,
            purge: false,
            reject: true,
        }
    }

    pub fn bits(self) -> u8 {
        let mut bits = match self.order {
            CacheOrder::Fifo => Self::FIFO,
            CacheOrder::Filo => Self::FILO,
        };
        if self.purge {
            bits |= Self::OVERFLOW_PURGE;
        }
        if self.reject {
            bits |= Self::OVERFLOW_REJECT;
        }
        bits
    }

    /// Parses flag bits; exactly one of FIFO/FILO must be set.
    pub fn from_bits(bits: u8) -> Result<Self, CoreError> {
        let known = Self::FIFO | Self::FILO | Self::OVERFLOW_PURGE | Self::OVERFLOW_REJECT;
        if bits & !known != 0 {
            return Err(CoreError::InvalidModeBits(u16::from(bits)));
        }
        let order = match bits & (Self::FIFO | Self::FILO) {
            Self::FIFO => CacheOrder::Fifo,
            Self::FILO => CacheOrder::Filo,
            _ => return Err(CoreError::InvalidModeBits(u16::from(bits))),
        };
        Ok(Self {
            order,
            purge: bits & Self::OVERFLOW_PURGE != 0,
            reject: bits & Self::OVERFLOW_REJECT != 0,
        })
    }
}

impl Default for CachePolicy {
    fn default() -> Self {
        Self::fifo_purge()
    }
}
