pub mod config;
pub mod types;

pub use config::LaunchpadConfig;
pub use types::*;
