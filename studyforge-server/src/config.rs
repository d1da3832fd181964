//! Settings loading: defaults, then an optional file, then `STUDYFORGE__*` variables.

use config::{Config, ConfigError, Environment, File};
use studyforge::settings::Settings;

/// File looked up in the working directory when no path is given.
pub const DEFAULT_CONFIG_NAME: &str = "studyforge";

pub fn load(path: Option<&str>) -> Result<Settings, ConfigError> {
    let file = match path {
        Some(path) => File::with_name(path).required(true),
        None => File::with_name(DEFAULT_CONFIG_NAME).required(false),
    };
    Config::builder()
        .add_source(file)
        .add_source(
            Environment::with_prefix("STUDYFORGE")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        )
        .build()?
        .try_deserialize()
}
