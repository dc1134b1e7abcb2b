//! Configuration loading from files and environment variables

use super::CmuxConfig;
use crate::error::{CmuxError, CmuxResult};
use std::path::{Path, PathBuf};

/// Load configuration from a file
///
/// `.toml` files are parsed as TOML, anything else as JSON.
/// Returns default config if the file doesn't exist.
pub fn load_from_file(path: &Path) -> CmuxResult<CmuxConfig> {
    if !path.exists() {
        return Ok(CmuxConfig::default());
    }

    let content = std::fs::read_to_string(path).map_err(|e| {
        CmuxError::config_with_context(
            format!("Failed to read config file: {}", e),
            format!("Reading configuration from '{}'", path.display()),
        )
    })?;

    let config = match path.extension().and_then(|s| s.to_str()) {
        Some("toml") => toml::from_str(&content).map_err(|e| {
            CmuxError::config_with_context(
                format!("Failed to parse TOML config: {}", e),
                format!("Deserializing TOML configuration from '{}'", path.display()),
            )
        })?,
        _ => serde_json::from_str(&content).map_err(|e| {
            CmuxError::config_with_context(
                format!("Failed to parse JSON config: {}", e),
                format!("Deserializing JSON configuration from '{}'", path.display()),
            )
        })?,
    };

    Ok(config)
}

fn parse_env<T: std::str::FromStr>(name: &str, value: &str) -> CmuxResult<T> {
    value
        .trim()
        .parse()
        .map_err(|_| CmuxError::config(format!("Invalid {} value: {}", name, value)))
}

/// Apply `CMUX_*` overrides using `lookup` to read variables
pub fn apply_env_overrides<F>(config: &mut CmuxConfig, lookup: F) -> CmuxResult<()>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(root) = lookup("CMUX_CONFIG_ROOT") {
        config.root_dir = PathBuf::from(root);
    }

    if let Some(model) = lookup("CMUX_MODEL") {
        config.default_model = model;
    }

    if let Some(prompt) = lookup("CMUX_SYSTEM_PROMPT") {
        config.system_prompt = Some(prompt);
    }

    if let Some(value) = lookup("CMUX_PARTIAL_WRITE_INTERVAL_MS") {
        config.stream.partial_write_interval_ms =
            parse_env("CMUX_PARTIAL_WRITE_INTERVAL_MS", &value)?;
    }

    if let Some(value) = lookup("CMUX_USAGE_TIMEOUT_MS") {
        config.stream.usage_timeout_ms = parse_env("CMUX_USAGE_TIMEOUT_MS", &value)?;
    }

    if let Some(level) = lookup("CMUX_LOG_LEVEL") {
        config.logging.level = level;
    }

    if let Some(format) = lookup("CMUX_LOG_FORMAT") {
        config.logging.format = format;
    }

    Ok(())
}

/// Load, override from the process environment, and validate.
///
/// Without an explicit path, `<root>/config.toml` is used when present.
pub fn load_config(path: Option<&Path>) -> CmuxResult<CmuxConfig> {
    let mut config = match path {
        Some(path) => load_from_file(path)?,
        None => {
            let root = std::env::var("CMUX_CONFIG_ROOT")
                .map(PathBuf::from)
                .unwrap_or_else(|_| CmuxConfig::default().root_dir);
            load_from_file(&root.join("config.toml"))?
        }
    };

    apply_env_overrides(&mut config, |name| std::env::var(name).ok())?;
    config.validate()?;

    tracing::debug!(
        root_dir = %config.root_dir.display(),
        model = %config.default_model,
        "Loaded configuration"
    );
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_yields_defaults() {
        let temp = TempDir::new().unwrap();
        let config = load_from_file(&temp.path().join("absent.toml")).unwrap();
        assert_eq!(config.stream.partial_write_interval_ms, 500);
    }

    #[test]
    fn test_load_toml() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
default_model = "openai:gpt-5"

[stream]
partial_write_interval_ms = 250

[logging]
level = "debug"
"#,
        )
        .unwrap();

        let config = load_from_file(&path).unwrap();
        assert_eq!(config.default_model, "openai:gpt-5");
        assert_eq!(config.stream.partial_write_interval_ms, 250);
        assert_eq!(config.stream.usage_timeout_ms, 1000);
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_load_json() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.json");
        std::fs::write(&path, r#"{"stream": {"usage_timeout_ms": 50}}"#).unwrap();

        let config = load_from_file(&path).unwrap();
        assert_eq!(config.stream.usage_timeout_ms, 50);
    }

    #[test]
    fn test_invalid_file_is_config_error() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.toml");
        std::fs::write(&path, "stream = [").unwrap();

        assert!(matches!(
            load_from_file(&path),
            Err(CmuxError::Config { .. })
        ));
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("CMUX_CONFIG_ROOT", "/srv/cmux"),
            ("CMUX_MODEL", "anthropic:claude-opus-4-1"),
            ("CMUX_PARTIAL_WRITE_INTERVAL_MS", "100"),
        ]);

        let mut config = CmuxConfig::default();
        apply_env_overrides(&mut config, |k| env.get(k).map(|v| v.to_string())).unwrap();

        assert_eq!(config.root_dir, PathBuf::from("/srv/cmux"));
        assert_eq!(config.default_model, "anthropic:claude-opus-4-1");
        assert_eq!(config.stream.partial_write_interval_ms, 100);
        assert_eq!(config.sessions_dir(), PathBuf::from("/srv/cmux/sessions"));
    }

    #[test]
    fn test_env_override_rejects_garbage() {
        let mut config = CmuxConfig::default();
        let result = apply_env_overrides(&mut config, |k| {
            (k == "CMUX_USAGE_TIMEOUT_MS").then(|| "soon".to_string())
        });
        assert!(matches!(result, Err(CmuxError::Config { .. })));
    }
}
