//! Maintainers
//!
//! Long-running background tasks keeping host-chain contracts in sync with
//! the Bitcoin chain.

pub mod difficulty;
pub mod shutdown;
pub mod spv;

pub use difficulty::{DifficultyConfig, DifficultyMaintainer, MaintainerError};
pub use shutdown::{shutdown_channel, ShutdownSignal, ShutdownTrigger};
pub use spv::{SpvConfig, SpvMaintainer, SpvMaintainerError};
