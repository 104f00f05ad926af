//! CLI configuration handling.

use anyhow::{Context, Result};
use curalink_core::ApiConfig;
use directories::ProjectDirs;
use std::path::PathBuf;

/// Default location of the CLI configuration file.
pub fn default_config_path() -> PathBuf {
    project_dirs()
        .map(|d| d.config_dir().join("cli.toml"))
        .unwrap_or_else(|| PathBuf::from("curalink-cli.toml"))
}

/// Load the API configuration from the given path or the default
/// location. The file must exist and set at least `base_url` and
/// `api_key`; everything else falls back to defaults.
pub fn load_config(path: Option<PathBuf>) -> Result<(ApiConfig, PathBuf)> {
    let config_path = path.unwrap_or_else(default_config_path);
    let contents = std::fs::read_to_string(&config_path).with_context(|| {
        format!(
            "Failed to read config from {:?}; create it with at least `base_url` and `api_key`",
            config_path
        )
    })?;
    let config: ApiConfig = toml::from_str(&contents)
        .with_context(|| format!("Failed to parse config from {:?}", config_path))?;
    Ok((config, config_path))
}

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("com", "curalink", "curalink")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_config_loads_with_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cli.toml");
        std::fs::write(
            &path,
            "base_url = \"https://api.curalink.example\"\napi_key = \"k\"\n",
        )
        .unwrap();

        let (config, loaded_from) = load_config(Some(path.clone())).unwrap();
        assert_eq!(loaded_from, path);
        assert_eq!(config.environment, "production");
        assert_eq!(config.retry.max_retries, 3);
    }

    #[test]
    fn test_tuned_config_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cli.toml");
        std::fs::write(
            &path,
            concat!(
                "base_url = \"https://staging.curalink.example\"\n",
                "api_key = \"k\"\n",
                "environment = \"staging\"\n",
                "signing_secret = \"shh\"\n",
                "[retry]\n",
                "max_retries = 1\n",
            ),
        )
        .unwrap();

        let (config, _) = load_config(Some(path)).unwrap();
        assert_eq!(config.environment, "staging");
        assert!(config.signing_secret.is_some());
        assert_eq!(config.retry.max_retries, 1);
    }

    #[test]
    fn test_missing_config_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_config(Some(dir.path().join("nope.toml"))).unwrap_err();
        assert!(err.to_string().contains("Failed to read config"));
    }
}
