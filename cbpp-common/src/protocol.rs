//! # Native Boundary Types
//!
//! Purpose: Define the small values that cross between the binding layer and
//! the native collaborator: callback kinds, response flags, and the opaque
//! cookie attached to each scheduled request.
//!
//! ## Design Principles
//!
//! 1. **Opaque Cookies**: A cookie is an integer handle, never a pointer. The
//!    binding resolves it back to its own registry.
//! 2. **Tagged Kinds**: Every response carries the kind of the request that
//!    produced it so a single dispatch entry point can route it.
//! 3. **Copy Semantics**: Everything here is `Copy` and `repr`-stable.

use core::fmt;

/// Maximum key length accepted by the scheduler.
pub const MAX_KEY_SIZE: usize = 250;

/// Maximum value length accepted by the scheduler (20 MiB).
pub const MAX_VALUE_SIZE: usize = 20 * 1024 * 1024;

/// Expiry values above this many seconds are absolute Unix timestamps.
pub const RELATIVE_EXPIRY_LIMIT: u32 = 30 * 24 * 60 * 60;

/// Opaque per-request handle attached at schedule time and echoed in every
/// response for that request.
#[repr(transparent)]
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct Cookie(pub u64);

impl fmt::Display for Cookie {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Kind of request that produced a response.
#[repr(u8)]
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum CallbackType {
    Get = 1,
    Store = 2,
    Counter = 3,
    Touch = 4,
    Remove = 5,
    Unlock = 6,
    Stats = 7,
    Observe = 8,
    Endure = 9,
}

impl CallbackType {
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(Self::Get),
            2 => Some(Self::Store),
            3 => Some(Self::Counter),
            4 => Some(Self::Touch),
            5 => Some(Self::Remove),
            6 => Some(Self::Unlock),
            7 => Some(Self::Stats),
            8 => Some(Self::Observe),
            9 => Some(Self::Endure),
            _ => None,
        }
    }

    /// Returns true for kinds that may deliver more than one response per
    /// request.
    pub const fn is_multi_response(self) -> bool {
        matches!(self, Self::Stats | Self::Observe | Self::Endure)
    }
}

/// Flags set on a native response.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash)]
pub struct RespFlags(u16);

impl RespFlags {
    pub const NONE: RespFlags = RespFlags(0);
    /// No more responses will follow for this cookie.
    pub const FINAL: RespFlags = RespFlags(1 << 0);
    /// Response synthesized by the client rather than received from a node.
    pub const CLIENTGEN: RespFlags = RespFlags(1 << 1);

    pub const fn bits(self) -> u16 {
        self.0
    }

    pub const fn union(self, other: RespFlags) -> RespFlags {
        RespFlags(self.0 | other.0)
    }

    pub const fn contains(self, other: RespFlags) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn is_final(self) -> bool {
        self.contains(Self::FINAL)
    }
}

impl core::ops::BitOr for RespFlags {
    type Output = RespFlags;

    fn bitor(self, rhs: RespFlags) -> RespFlags {
        self.union(rhs)
    }
}
