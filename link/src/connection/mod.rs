//! Connection management.
//!
//! - [`driver`]: the background task that owns the session and the socket slot
//! - [`socket_task`]: per-socket reader, heartbeat and frame routing
//! - [`backoff`]: reconnect delay computation
//! - [`close_code`]: close-code classification

mod backoff;
mod close_code;
mod driver;
mod socket_task;

pub(crate) use driver::{spawn_driver, ConnCmd, DriverConfig, SharedForbiddenCallback};
pub use driver::VisibilityProbe;
