mod settings;

use config::{Config, Environment, File};

use crate::utils::Result;

pub use settings::{
    AuthzSettings, BusSettings, LogSettings, LoraSettings, PartialSettings, RouteMapSettings,
    ServerSettings, Settings,
};

pub const DEFAULT_CONFIG_FILE: &str = "config/default";

/// Environment variables look like `CHANBRIDGE_AUTHZ__TIMEOUT_MS`.
pub const ENV_PREFIX: &str = "CHANBRIDGE";

/// Loads the configuration from the default file and environment variables.
pub fn load_config() -> Result<Settings> {
    load_config_from(DEFAULT_CONFIG_FILE)
}

/// Loads `file` (any format the `config` crate understands, extension
/// optional, missing file allowed) layered under environment variables and
/// merges the result with default values.
pub fn load_config_from(file: &str) -> Result<Settings> {
    let config = Config::builder()
        .add_source(File::with_name(file).required(false))
        .add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__"),
        )
        .build()?;

    // Try to deserialize what is available
    let partial: PartialSettings = config.try_deserialize()?;

    Ok(Settings::merge(partial))
}
