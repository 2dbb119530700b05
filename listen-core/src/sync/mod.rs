//! Sync Model
//!
//! Session state and the events peers exchange about it.

mod protocol;
mod state;

pub use protocol::*;
pub use state::*;
