//! Configuration loading
//!
//! A TOML file (`narrator.toml` in the working directory unless `--config`
//! names another) overlaid with `NARRATOR__*` environment variables, e.g.
//! `NARRATOR__CONCURRENCY_LIMIT=4` or
//! `NARRATOR__ENGINES__OPENAI__CREDENTIAL_REF=env:OPENAI_API_KEY`.

use std::path::Path;

use speech_synthesis::SynthesisConfig;

const DEFAULT_FILE: &str = "narrator";
const ENV_PREFIX: &str = "NARRATOR";

/// Load configuration from the file and the process environment
pub fn load(path: Option<&Path>) -> Result<SynthesisConfig, config::ConfigError> {
    load_with_env(path, None)
}

/// Load configuration, reading variables from `env` instead of the process
/// environment when given
pub fn load_with_env(
    path: Option<&Path>,
    env: Option<config::Map<String, String>>,
) -> Result<SynthesisConfig, config::ConfigError> {
    let file = match path {
        Some(path) => config::File::from(path).required(true),
        None => config::File::with_name(DEFAULT_FILE).required(false),
    };

    let builder = config::Config::builder()
        .add_source(file)
        // Override with environment variables (e.g., NARRATOR__RETRY__MAX_ATTEMPTS)
        .add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .separator("__")
                .try_parsing(true)
                .list_separator(",")
                .with_list_parse_key("fallback_order")
                .source(env),
        );

    builder.build()?.try_deserialize()
}
