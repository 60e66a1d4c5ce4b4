pub mod config;
pub(crate) mod edgarsync_toml;
pub mod logger;
pub mod user_agent;

pub use config::*;
pub use logger::{Colors, setup_logging};
pub use user_agent::resolve_user_agent;
