use crate::config::Config;
use crate::error::{Error, Result};

/// Validates a single file name setting
fn validate_file_name(key: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(Error::ConfigInvalid(format!("'{}' must not be empty", key)));
    }

    if value.contains('/') || value.contains('\\') || value == "." || value == ".." {
        return Err(Error::ConfigInvalid(format!(
            "'{}' must be a plain file name, got '{}'",
            key, value
        )));
    }

    Ok(())
}

/// Full configuration validation
pub fn validate_config(config: &Config) -> Result<()> {
    if config.console_capacity == 0 {
        return Err(Error::ConfigInvalid(
            "'consoleCapacity' must be greater than zero".to_string(),
        ));
    }

    if config.subscriber_capacity == 0 {
        return Err(Error::ConfigInvalid(
            "'subscriberCapacity' must be greater than zero".to_string(),
        ));
    }

    if config.restart_timeout_secs == 0 {
        return Err(Error::ConfigInvalid(
            "'restartTimeoutSecs' must be greater than zero".to_string(),
        ));
    }

    validate_file_name("envDir", &config.env_dir)?;
    validate_file_name("launchScript", &config.launch_script)?;
    validate_file_name("jarLinkName", &config.jar_link_name)?;
    validate_file_name("modsLinkName", &config.mods_link_name)?;

    Ok(())
}
