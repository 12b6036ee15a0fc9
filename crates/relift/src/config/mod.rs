pub mod loader;
pub mod schema;

pub use loader::{load_config, load_config_from_str};
pub use schema::{Config, DebugConfig, InvokeConfig, ProvidersConfig, PublishingConfig};
