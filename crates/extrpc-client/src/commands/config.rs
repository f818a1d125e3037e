//! Configuration commands.

use crate::config::RpcConfig;
use crate::error::{ClientError, ClientResult};

/// Dump the current configuration to stdout.
pub fn dump(config: &RpcConfig) -> ClientResult<()> {
    let toml_str = toml::to_string_pretty(config)
        .map_err(|e| ClientError::Config(format!("failed to serialize config: {}", e)))?;
    println!("# config.toml ({})", RpcConfig::default_path().display());
    println!("{}", toml_str);

    Ok(())
}

/// Validate the configuration.
pub fn validate(config: &RpcConfig) -> ClientResult<()> {
    check(config)?;
    println!("Configuration is valid.");
    Ok(())
}

/// Checks every setting that is only interpreted at use time.
pub fn check(config: &RpcConfig) -> ClientResult<()> {
    config
        .engine()
        .map_err(|e| ClientError::Config(e.to_string()))?;
    config.logging.to_tracing_config()?;

    if config.extension_id.trim().is_empty() {
        return Err(ClientError::Config(
            "extension_id must not be empty".to_string(),
        ));
    }
    if config.call_timeout_secs == Some(0) {
        return Err(ClientError::Config(
            "call_timeout_secs must be positive; remove it to wait forever".to_string(),
        ));
    }
    Ok(())
}

/// Show the configuration file path.
pub fn path() -> ClientResult<()> {
    let config_path = RpcConfig::default_path();
    println!("config: {}", config_path.display());
    Ok(())
}
