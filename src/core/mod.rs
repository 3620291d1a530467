//! Core domain types.
//!
//! Module order follows type dependency order:
//! - time: Generation, Version, WallClock
//! - identity: NodeId, ClusterId, PeerAddr
//! - error: validation errors

pub mod error;
pub mod identity;
pub mod time;

pub use error::{CoreError, InvalidId};
pub use identity::{ClusterId, NodeId, PeerAddr};
pub use time::{Generation, Version, WallClock};
