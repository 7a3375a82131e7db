//! handx-core: Shared protocol library for the handx terminal gateway.
//!
//! Provides the JSON message envelope, the closed set of message kinds with
//! their payload types, the session/window data model, the two-stage decoder
//! and the wire error codes.

pub mod codec;
pub mod error;
pub mod messages;

// Re-export commonly used items at crate root.
pub use codec::{decode, encode, DecodeError};
pub use error::{HandxError, HandxResult};
pub use messages::{Envelope, ErrorCode, MessageType, Payload, Session, Window};
