use crate::error::{Error, Result};
use std::env;
use std::path::PathBuf;

/// Environment variable that overrides the config file location.
pub const CONFIG_ENV: &str = "SKYDOCK_CONFIG";

/// Base skydock config directory (~/.config/skydock/)
pub fn skydock() -> Result<PathBuf> {
    let home = env::var("HOME").map_err(|_| {
        Error::internal_unexpected("HOME environment variable not set on Unix-like system")
    })?;
    Ok(PathBuf::from(home).join(".config").join("skydock"))
}

/// Default skydock.toml path
pub fn config_file() -> Result<PathBuf> {
    Ok(skydock()?.join("skydock.toml"))
}

/// Expand `~` and `$VARS` in a configured path.
pub fn expand(path: &str) -> Result<PathBuf> {
    let expanded = shellexpand::full(path).map_err(|e| {
        Error::config_invalid_value("path", Some(path.to_string()), e.to_string())
    })?;
    Ok(PathBuf::from(expanded.as_ref()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expand_leaves_absolute_paths_alone() {
        assert_eq!(expand("/var/www").unwrap(), PathBuf::from("/var/www"));
    }

    #[test]
    fn expand_rejects_unknown_variables() {
        assert!(expand("$SKYDOCK_SURELY_UNSET_VAR/x").is_err());
    }
}
