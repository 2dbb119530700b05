//! FFI bindings for native UI integration
//!
//! The native app owns the player and the network link; this module wraps
//! them behind the coordinator's traits and exposes a single `Session`
//! object to Swift/Kotlin via uniffi.

mod bridge;
mod session;
mod types;

pub use session::*;
pub use types::*;
