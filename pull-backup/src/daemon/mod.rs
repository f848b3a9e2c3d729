//! Process-level concerns of a run: signals and the root lock.

pub mod lock;
pub mod shutdown;

pub use lock::RunLock;
pub use shutdown::ShutdownCoordinator;
