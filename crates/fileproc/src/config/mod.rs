pub mod loader;
pub mod schema;

pub use loader::{
    apply_env_overrides, load_config, load_config_from_str, validate_config, ConfigFormat,
};
pub use schema::{EngineConfig, TimeoutsConfig};
