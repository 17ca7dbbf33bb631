//! # Shared Request Types
//!
//! Enumerations shared by the binding layer and the native collaborator:
//! store modes, durability levels, and per-node observe status bits.

use std::time::Duration;

/// Mutation mode for a store request.
#[repr(u8)]
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash)]
pub enum StoreMode {
    /// Store unconditionally.
    #[default]
    Upsert = 1,
    /// Store only if the key does not exist.
    Add = 2,
    /// Store only if the key exists.
    Replace = 3,
    /// Append to an existing value.
    Append = 4,
    /// Prepend to an existing value.
    Prepend = 5,
}

impl StoreMode {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Upsert => "upsert",
            Self::Add => "add",
            Self::Replace => "replace",
            Self::Append => "append",
            Self::Prepend => "prepend",
        }
    }
}

/// How many nodes must have persisted a mutation to disk.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub enum PersistTo {
    None,
    /// The active (master) node only.
    #[default]
    Master,
    /// Master plus one replica.
    Two,
    Three,
    Four,
}

impl PersistTo {
    /// Number of nodes the level requires.
    pub const fn nodes(self) -> usize {
        match self {
            Self::None => 0,
            Self::Master => 1,
            Self::Two => 2,
            Self::Three => 3,
            Self::Four => 4,
        }
    }

    pub const fn from_nodes(n: usize) -> Self {
        match n {
            0 => Self::None,
            1 => Self::Master,
            2 => Self::Two,
            3 => Self::Three,
            _ => Self::Four,
        }
    }
}

/// How many replicas must hold a mutation in memory.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub enum ReplicateTo {
    #[default]
    None,
    One,
    Two,
    Three,
}

impl ReplicateTo {
    /// Number of replicas the level requires.
    pub const fn replicas(self) -> usize {
        match self {
            Self::None => 0,
            Self::One => 1,
            Self::Two => 2,
            Self::Three => 3,
        }
    }

    pub const fn from_replicas(n: usize) -> Self {
        match n {
            0 => Self::None,
            1 => Self::One,
            2 => Self::Two,
            _ => Self::Three,
        }
    }
}

/// Durability requirements for an endure fan-out.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub struct DurabilityOptions {
    pub persist_to: PersistTo,
    pub replicate_to: ReplicateTo,
    /// Lower the requirements to the cluster size instead of failing.
    pub cap_max: bool,
    /// Upper bound on the whole fan-out; `None` uses the collaborator default.
    pub timeout: Option<Duration>,
}

impl Default for DurabilityOptions {
    fn default() -> Self {
        DurabilityOptions {
            persist_to: PersistTo::Master,
            replicate_to: ReplicateTo::None,
            cap_max: true,
            timeout: None,
        }
    }
}

impl DurabilityOptions {
    pub fn new(persist_to: PersistTo, replicate_to: ReplicateTo) -> Self {
        DurabilityOptions { persist_to, replicate_to, cap_max: false, timeout: None }
    }

    pub fn cap_max(mut self, cap: bool) -> Self {
        self.cap_max = cap;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Returns the options adjusted to a cluster of `nodes` nodes, or `None`
    /// if they cannot be met and capping is disabled.
    pub fn fit_to(self, nodes: usize) -> Option<Self> {
        let replicas = nodes.saturating_sub(1);
        let fits = self.persist_to.nodes() <= nodes && self.replicate_to.replicas() <= replicas;
        if fits {
            return Some(self);
        }
        if !self.cap_max {
            return None;
        }
        Some(DurabilityOptions {
            persist_to: PersistTo::from_nodes(self.persist_to.nodes().min(nodes)),
            replicate_to: ReplicateTo::from_replicas(self.replicate_to.replicas().min(replicas)),
            ..self
        })
    }
}

/// Per-node key state reported by an observe request.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash)]
pub struct ObserveStatus(pub u8);

impl ObserveStatus {
    /// Item is in memory.
    pub const FOUND: ObserveStatus = ObserveStatus(0x00);
    /// Item is on disk (combined with FOUND).
    pub const PERSISTED: ObserveStatus = ObserveStatus(0x01);
    /// Item is not present.
    pub const NOT_FOUND: ObserveStatus = ObserveStatus(0x80);
    /// Item was deleted but the deletion is not yet persisted.
    pub const LOGICALLY_DELETED: ObserveStatus = ObserveStatus(0x81);

    pub const fn bits(self) -> u8 {
        self.0
    }

    pub const fn exists(self) -> bool {
        self.0 & Self::NOT_FOUND.0 == 0
    }

    pub const fn persisted(self) -> bool {
        self.0 & Self::PERSISTED.0 != 0
    }
}
