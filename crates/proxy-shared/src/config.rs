//! Layered configuration loading: built-in defaults, overridden by an
//! optional TOML file, overridden by `PROXY_`-prefixed environment
//! variables. Both `proxy-client` and `proxy-server` build their own typed
//! config struct on top of this.

use std::path::Path;

use ::config::{Config, ConfigError, Environment, File, FileFormat};
use serde::de::DeserializeOwned;

pub const ENV_PREFIX: &str = "PROXY";

/// Builds a layered [`Config`] from built-in `defaults` (expressed as TOML
/// text so each binary can keep its defaults next to its struct
/// definition), an optional config file, and environment variables.
pub fn load_layered(defaults_toml: &str, file_path: Option<&Path>) -> Result<Config, ConfigError> {
    let mut builder =
        Config::builder().add_source(File::from_str(defaults_toml, FileFormat::Toml));

    if let Some(path) = file_path {
        builder = builder.add_source(File::from(path).required(false));
    }

    builder = builder.add_source(
        Environment::with_prefix(ENV_PREFIX)
            .separator("__")
            .try_parsing(true),
    );

    builder.build()
}

pub fn load_layered_as<T: DeserializeOwned>(
    defaults_toml: &str,
    file_path: Option<&Path>,
) -> Result<T, ConfigError> {
    load_layered(defaults_toml, file_path)?.try_deserialize()
}
