//! The serial monitors
//!
//! Two request/response dispatchers share one command vocabulary: the
//! bootstrap monitor runs in the first boot stage and can receive and hand
//! off to a recovery image; the update monitor runs in the field-update
//! stage and owns staging, binding, OTP provisioning and the commit to
//! flash. Each loops on its transport until told to end the session.

pub mod bootstrap;
pub use bootstrap::{BootstrapEnv, BootstrapExit, BootstrapMonitor};
pub mod command;
pub use command::Command;
pub mod update;
pub use update::{UpdateEnv, UpdateMonitor};
