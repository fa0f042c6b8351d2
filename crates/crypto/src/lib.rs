//! HopCraft Cryptography
//!
//! Per-hop primitives for layered relay encryption: the fixed relay header,
//! nonce derivation from packet and hop salts, and single-layer
//! XChaCha20-Poly1305 seal/open. Circuit-wide layering is built on these by
//! the client (all layers) and the relay agent (one layer).

mod error;
mod header;
mod keys;
mod layer;
mod nonce;

pub use error::*;
pub use header::*;
pub use keys::*;
pub use layer::*;
pub use nonce::*;
