use crate::error::AppError;
use config::{Config as Cfg, Environment, File};
use serde::de::DeserializeOwned;

/// Load a service configuration.
///
/// Sources, lowest precedence first: the optional `file` (any format the
/// `config` crate recognises, extension omitted), then environment variables
/// `<PREFIX>__SECTION__KEY`. A `.env` file is read into the environment first.
pub fn load<T: DeserializeOwned>(file: &str, env_prefix: &str) -> Result<T, AppError> {
    dotenvy::dotenv().ok();

    let config = Cfg::builder()
        .add_source(File::with_name(file).required(false))
        .add_source(
            Environment::with_prefix(env_prefix)
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        )
        .build()?;

    Ok(config.try_deserialize()?)
}
