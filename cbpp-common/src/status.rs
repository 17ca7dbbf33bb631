//! # Status Codes
//!
//! ## Design Principles
//!
//! 1. **Stable Codes**: A status is a plain signed integer so it crosses the
//!    native boundary unchanged.
//! 2. **Derived Classification**: Network/input/data/temporary predicates are
//!    bit tests against a per-code flag table, never stored alongside the code.
//! 3. **Low Overhead**: `Status` is `Copy` and one word wide.
//! 4. **Unknown Codes Survive**: Codes outside the table keep their value and
//!    classify as generic errors.

use core::fmt;

/// Result type used for synchronous scheduling failures.
pub type CbResult<T> = core::result::Result<T, Status>;

/// Classification bits attached to each status code.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash)]
pub struct ErrorFlags(u8);

impl ErrorFlags {
    pub const NONE: ErrorFlags = ErrorFlags(0);
    /// Input or parameter validation failure.
    pub const INPUT: ErrorFlags = ErrorFlags(1 << 0);
    /// Network or connectivity failure.
    pub const NETWORK: ErrorFlags = ErrorFlags(1 << 1);
    /// Fatal; the instance should be discarded.
    pub const FATAL: ErrorFlags = ErrorFlags(1 << 2);
    /// Transient; may succeed when retried later.
    pub const TRANSIENT: ErrorFlags = ErrorFlags(1 << 3);
    /// Item-level condition (missing, exists, CAS mismatch).
    pub const DATA: ErrorFlags = ErrorFlags(1 << 4);
    /// Generated by the client rather than the server.
    pub const INTERNAL: ErrorFlags = ErrorFlags(1 << 5);

    pub const fn bits(self) -> u8 {
        self.0
    }

    pub const fn union(self, other: ErrorFlags) -> ErrorFlags {
        ErrorFlags(self.0 | other.0)
    }

    pub const fn contains(self, other: ErrorFlags) -> bool {
        self.0 & other.0 == other.0 && other.0 != 0
    }
}

/// Result code returned by scheduling calls and carried by every response.
#[derive(Clone, Copy, Eq, PartialEq, Hash)]
pub struct Status(i32);

macro_rules! status_table {
    ($( $(#[$doc:meta])* $name:ident = $code:literal, [$($flag:ident)|*], $desc:expr; )*) => {
        impl Status {
            $( $(#[$doc])* pub const $name: Status = Status($code); )*

            /// Returns the textual description for the code.
            pub const fn description(self) -> &'static str {
                match self.0 {
                    $( $code => $desc, )*
                    _ => "unknown error code",
                }
            }

            /// Returns the classification bits for the code.
            pub const fn flags(self) -> ErrorFlags {
                match self.0 {
                    $( $code => ErrorFlags::NONE $( .union(ErrorFlags::$flag) )*, )*
                    _ => ErrorFlags::NONE,
                }
            }

            /// Returns the symbolic name for the code, if known.
            pub const fn name(self) -> Option<&'static str> {
                match self.0 {
                    $( $code => Some(stringify!($name)), )*
                    _ => None,
                }
            }
        }
    };
}

status_table! {
    /// Operation completed.
    SUCCESS = 0x00, [], "success";
    /// Bucket credentials were rejected.
    AUTH_ERROR = 0x02, [FATAL], "authentication failed";
    /// Counter target is not a number.
    DELTA_BADVAL = 0x03, [INPUT | DATA], "the value for the counter is not numeric";
    /// Key or value exceeds the size limit.
    E2BIG = 0x04, [INPUT | DATA], "object too big";
    /// Server is busy.
    EBUSY = 0x05, [TRANSIENT], "the server is too busy to handle the request";
    /// Invalid argument.
    EINVAL = 0x07, [INPUT], "invalid arguments";
    /// Server out of memory.
    ENOMEM = 0x08, [TRANSIENT], "the server is out of memory";
    /// Range error.
    ERANGE = 0x09, [INPUT | DATA], "invalid range";
    /// Generic failure.
    ERROR = 0x0A, [], "generic error";
    /// Temporary failure, such as a locked item.
    ETMPFAIL = 0x0B, [TRANSIENT], "temporary failure received from server";
    /// Key exists or CAS mismatch.
    KEY_EEXISTS = 0x0C, [DATA], "the key already exists in the server";
    /// Key does not exist.
    KEY_ENOENT = 0x0D, [DATA], "the key does not exist on the server";
    /// Network failure.
    NETWORK_ERROR = 0x10, [NETWORK], "generic network failure";
    /// Item was not stored.
    NOT_STORED = 0x12, [DATA], "the item was not stored";
    /// Operation not supported.
    NOT_SUPPORTED = 0x13, [], "operation not supported";
    /// Operation timed out.
    ETIMEDOUT = 0x17, [NETWORK | TRANSIENT], "client-side timeout exceeded for operation";
    /// Connection could not be established.
    CONNECT_ERROR = 0x18, [NETWORK], "error while establishing connection";
    /// Bucket does not exist.
    BUCKET_ENOENT = 0x19, [INPUT | FATAL], "the bucket requested does not exist";
    /// Client-side allocation failure.
    CLIENT_ENOMEM = 0x1A, [TRANSIENT | INTERNAL], "memory allocation for client failed";
    /// Client is not ready to schedule.
    CLIENT_ETMPFAIL = 0x1B, [TRANSIENT | INTERNAL], "client not bootstrapped, retry later";
    /// Bad or destroyed handle.
    EBADHANDLE = 0x1C, [INPUT], "bad handle";
    /// Empty key.
    EMPTY_KEY = 0x1D, [INPUT], "empty key";
    /// Durability request exceeds the cluster size.
    DURABILITY_ETOOMANY = 0x28, [INPUT], "durability constraints exceed the number of nodes";
    /// Same key added twice to a fan-out context.
    DUPLICATE_COMMANDS = 0x29, [INPUT], "the same key was passed multiple times";
    /// No node can serve the request.
    NO_MATCHING_SERVER = 0x2A, [NETWORK | TRANSIENT], "no node could serve the request";
    /// Scheduling call made in the wrong transaction state.
    SCHED_STATE = 0x2B, [INPUT | INTERNAL], "invalid scheduling transaction state";
}

impl Status {
    /// Wraps a raw code.
    pub const fn from_code(code: i32) -> Self {
        Status(code)
    }

    /// Returns the raw code.
    pub const fn code(self) -> i32 {
        self.0
    }

    /// Returns true if the code is `SUCCESS`.
    pub const fn success(self) -> bool {
        self.0 == Self::SUCCESS.0
    }

    pub const fn is_network_error(self) -> bool {
        self.flags().contains(ErrorFlags::NETWORK)
    }

    pub const fn is_input_error(self) -> bool {
        self.flags().contains(ErrorFlags::INPUT)
    }

    pub const fn is_data_error(self) -> bool {
        self.flags().contains(ErrorFlags::DATA)
    }

    pub const fn is_temporary(self) -> bool {
        self.flags().contains(ErrorFlags::TRANSIENT)
    }

    pub const fn is_fatal(self) -> bool {
        self.flags().contains(ErrorFlags::FATAL)
    }

    /// Converts into a `Result`, mapping success to `Ok(())`.
    pub const fn into_result(self) -> CbResult<()> {
        if self.success() { Ok(()) } else { Err(self) }
    }
}

impl Default for Status {
    fn default() -> Self {
        Status::SUCCESS
    }
}

impl From<i32> for Status {
    fn from(code: i32) -> Self {
        Status(code)
    }
}

impl From<Status> for i32 {
    fn from(status: Status) -> Self {
        status.0
    }
}

impl fmt::Debug for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => write!(f, "Status({})", name),
            None => write!(f, "Status({:#x})", self.0),
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{:#x}]: {}", self.0, self.description())
    }
}

impl std::error::Error for Status {}
