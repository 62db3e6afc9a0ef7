//! Configuration loading and management

mod hierarchical_loader;
mod types;

pub use hierarchical_loader::{ConfigLoader, CONFIG_FILE_NAME};
pub use types::{InflightConfig, OptimisticConfig, ResilienceConfig, RetryPolicy};
