// cbpp-common - Shared status codes and boundary types for cbpp
//
// This crate defines the values exchanged between the binding layer and the
// native collaborator.

pub mod protocol;
pub mod status;
pub mod types;

// Re-export for convenience
pub use protocol::*;
pub use status::*;
pub use types::*;
