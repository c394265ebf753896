//! meshbridge-core: identifiers, wire formats and configuration.
//! All other meshbridge crates depend on this one.

pub mod config;
pub mod id;
pub mod wire;

pub use id::{IdError, NodeId, RendezvousTag, TopicId};
