//! HopCraft Core Types
//!
//! Identifiers, addresses, key material and control messages shared by the
//! client circuit builder and the relay agent.

mod control;
mod error;
mod types;

pub use control::*;
pub use error::*;
pub use types::*;
