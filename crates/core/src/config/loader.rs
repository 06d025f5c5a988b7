use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use std::path::Path;

use super::{types::Config, ConfigError};

/// Load configuration from file with environment variable overrides.
///
/// Nested keys use a double underscore, e.g. `GLEANER_PIPELINE__MAX_ATTEMPTS=5`.
pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    if !path.exists() {
        return Err(ConfigError::FileNotFound(path.display().to_string()));
    }

    let config: Config = Figment::new()
        .merge(Toml::file(path))
        .merge(Env::prefixed("GLEANER_").split("__"))
        .extract()
        .map_err(|e| ConfigError::ParseError(e.to_string()))?;

    Ok(config)
}

/// Load configuration from TOML string (useful for testing)
pub fn load_config_from_str(toml_str: &str) -> Result<Config, ConfigError> {
    toml::from_str(toml_str).map_err(|e| ConfigError::ParseError(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::path::PathBuf;
    use tempfile::NamedTempFile;

    #[test]
    fn test_load_config_from_str_empty_uses_defaults() {
        let config = load_config_from_str("").unwrap();
        assert_eq!(config.pipeline.max_attempts, 3);
        assert_eq!(config.database.path, PathBuf::from("./data/gleaner.db"));
        assert!(config.summarizer.is_none());
    }

    #[test]
    fn test_load_config_from_str_invalid() {
        let result = load_config_from_str("[pipeline]\nmax_attempts = \"many\"\n");
        assert!(matches!(result, Err(ConfigError::ParseError(_))));
    }

    #[test]
    fn test_load_config_summarizer_requires_key() {
        let toml = r#"
[summarizer]
model = "some-model"
"#;
        let result = load_config_from_str(toml);
        assert!(matches!(result, Err(ConfigError::ParseError(_))));
    }

    #[test]
    fn test_load_config_file_not_found() {
        let result = load_config(Path::new("/nonexistent/config.toml"));
        assert!(matches!(result, Err(ConfigError::FileNotFound(_))));
    }

    #[test]
    fn test_load_config_from_file() {
        let mut temp_file = NamedTempFile::new().unwrap();
        writeln!(
            temp_file,
            r#"
[database]
path = "/tmp/jobs.db"

[pipeline]
output_dir = "/tmp/out"
retry_backoff_secs = 1.5

[summarizer]
api_key = "sk-test"
"#
        )
        .unwrap();

        let config = load_config(temp_file.path()).unwrap();
        assert_eq!(config.database.path, PathBuf::from("/tmp/jobs.db"));
        assert_eq!(config.pipeline.output_dir, PathBuf::from("/tmp/out"));
        assert_eq!(config.pipeline.retry_backoff_secs, 1.5);
        let summarizer = config.summarizer.unwrap();
        assert_eq!(summarizer.api_key, "sk-test");
        assert_eq!(summarizer.language, "en");
    }
}
