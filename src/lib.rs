pub mod bind;
#[cfg(feature = "cli")]
pub mod cli;
pub mod commit;
pub mod crypto;
pub mod fip;
pub mod logger;
pub mod monitor;
pub mod otp;
pub mod platform;
pub mod secret;
pub mod staging;
pub mod transport;
pub mod util;

pub use monitor::{BootstrapEnv, BootstrapExit, BootstrapMonitor, Command, UpdateEnv, UpdateMonitor};
pub use secret::{Secret, SecretScope};
pub use staging::{Staging, StagingParams};
pub use transport::{Request, Response, Transport};
