//! Configuration loading

use anyhow::Result;
use std::path::Path;

use crate::Config;

/// Resolve which config file to read
///
/// Search order:
/// 1. explicit path (CLI flag)
/// 2. `PARLEY_CONFIG_PATH` environment variable
/// 3. ./config.yaml (current working directory)
/// 4. /config/config.yaml (container mount path)
#[must_use]
pub fn resolve_config_path(explicit: Option<&str>) -> Option<String> {
    explicit
        .map(str::to_string)
        .filter(|p| Path::new(p).exists())
        .or_else(|| {
            std::env::var("PARLEY_CONFIG_PATH")
                .ok()
                .filter(|p| Path::new(p).exists())
        })
        .or_else(|| {
            ["config.yaml", "/config/config.yaml"]
                .into_iter()
                .find(|p| Path::new(p).exists())
                .map(str::to_string)
        })
}

/// Load configuration from a config file and/or environment variables
///
/// Runs before logging is initialized, so progress goes to stderr.
pub fn load_config(explicit: Option<&str>) -> Result<Config> {
    let config = if let Some(path) = resolve_config_path(explicit) {
        eprintln!("Loading config from {path}");
        match Config::from_file(&path) {
            Ok(cfg) => cfg,
            Err(e) => {
                eprintln!("Failed to load {path}: {e}");
                eprintln!("Falling back to environment variables");
                Config::from_env().unwrap_or_default()
            }
        }
    } else {
        eprintln!("No config file found, using environment variables");
        Config::from_env().unwrap_or_else(|e| {
            eprintln!("Failed to load config: {e}");
            eprintln!("Using default configuration");
            Config::default()
        })
    };

    // Fail fast on misconfigurations
    if let Err(errors) = config.validate() {
        for error in &errors {
            eprintln!("Config validation error: {error}");
        }
        return Err(anyhow::anyhow!(
            "Configuration validation failed with {} error(s): {}",
            errors.len(),
            errors.join("; ")
        ));
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_explicit_path_wins() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(file, "server:\n  port: 17000").unwrap();
        let path = file.path().to_str().unwrap().to_string();

        assert_eq!(resolve_config_path(Some(&path)), Some(path.clone()));

        let config = load_config(Some(&path)).unwrap();
        assert_eq!(config.server.port, 17000);
    }

    #[test]
    fn test_invalid_file_values_fail_validation() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(file, "media:\n  rtc_min_port: 45000\n  rtc_max_port: 44000").unwrap();
        let path = file.path().to_str().unwrap().to_string();

        assert!(load_config(Some(&path)).is_err());
    }
}
