//! Configuration and dependency initialization.

mod dependencies;

pub use dependencies::{BootstrapConfig, ConnectionMode, Dependencies};
