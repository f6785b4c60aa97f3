//! Data models for collab-link.
//!
//! Outbound and inbound socket frames, resource tags, configuration and the
//! diagnostic status snapshot.

pub mod client_frame;
pub mod connection_options;
pub mod connection_status;
pub mod inbound_event;
pub mod resource;


pub use client_frame::ClientFrame;
pub use connection_options::ConnectionOptions;
pub use connection_status::{ConnectionState, ConnectionStatus};
pub use inbound_event::{CacheInvalidation, ChangeKind, InboundEvent};
pub use resource::{MutationAction, Resource};
