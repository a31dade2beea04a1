pub mod api;
pub mod bridge;
pub mod config;
pub mod discovery;
pub mod display;
pub mod error;
pub mod extract;
pub mod mqtt;
pub mod portal;
pub mod reading;
pub mod scheduler;
pub mod scrape;
pub mod snapshot;

// Re-export commonly used items
pub use config::Config;
pub use error::{AppError, Result};
pub use reading::Reading;
pub use snapshot::{Snapshot, SnapshotCache};
