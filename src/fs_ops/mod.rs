//! Filesystem operations shared by the stages.

pub mod container;
mod helpers;
pub mod lock;
pub mod resilient;
pub mod space;
mod util;

pub use container::{Container, ContainerState, scan_revealed};
pub use helpers::{io_error_with_help, io_error_with_help_io};
pub use lock::{ExecutionGuard, LockDir};
pub use resilient::ResilientFs;
pub use util::is_hidden_or_locked;
pub(crate) use util::unique_token;
