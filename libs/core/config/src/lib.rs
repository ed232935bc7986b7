pub mod tracing;

use std::env;
use std::str::FromStr;
use thiserror::Error;

/// Configuration error type
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Environment variable '{0}' is required but not set")]
    MissingEnvVar(String),

    #[error("Failed to parse environment variable '{key}': {details}")]
    ParseError { key: String, details: String },
}

/// Application environment
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Environment {
    Development, // Local dev (pretty logs)
    Production,  // Deployed (JSON logs)
}

impl Environment {
    pub fn from_env() -> Self {
        let app_env = env::var("APP_ENV").unwrap_or_else(|_| "development".to_string());

        if app_env.eq_ignore_ascii_case("production") {
            Environment::Production
        } else {
            Environment::Development
        }
    }

    pub fn is_production(&self) -> bool {
        matches!(self, Environment::Production)
    }

    pub fn is_development(&self) -> bool {
        matches!(self, Environment::Development)
    }
}

/// Trait for configuration that can be loaded from environment variables
pub trait FromEnv: Sized {
    fn from_env() -> Result<Self, ConfigError>;
}

/// Helper to load and parse environment variable with a default value
pub fn env_or_default(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Helper to load and parse environment variable or return error
pub fn env_required(key: &str) -> Result<String, ConfigError> {
    match env_optional(key) {
        Some(value) => Ok(value),
        None => Err(ConfigError::MissingEnvVar(key.to_string())),
    }
}

/// Read a variable, treating unset and blank values alike.
pub fn env_optional(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

/// Parse a variable into `T`, falling back to `default` when it is unset or blank.
///
/// A value that is present but unparsable is an error rather than a silent fallback.
pub fn env_parse_or<T>(key: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env_optional(key) {
        Some(raw) => raw.parse::<T>().map_err(|e| ConfigError::ParseError {
            key: key.to_string(),
            details: e.to_string(),
        }),
        None => Ok(default),
    }
}

/// Boolean flag: `1`, `true`, `yes`, `on` (any case) are true, everything else is false.
pub fn env_flag(key: &str, default: bool) -> bool {
    match env_optional(key) {
        Some(raw) => matches!(
            raw.to_ascii_lowercase().as_str(),
            "1" | "true" | "yes" | "on"
        ),
        None => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_environment_defaults_to_development() {
        temp_env::with_var_unset("APP_ENV", || {
            let env = Environment::from_env();
            assert_eq!(env, Environment::Development);
            assert!(env.is_development());
            assert!(!env.is_production());
        });
    }

    #[test]
    fn test_environment_production_case_insensitive() {
        temp_env::with_var("APP_ENV", Some("PRODUCTION"), || {
            assert_eq!(Environment::from_env(), Environment::Production);
        });

        temp_env::with_var("APP_ENV", Some("Production"), || {
            assert_eq!(Environment::from_env(), Environment::Production);
        });
    }

    #[test]
    fn test_env_or_default_without_value() {
        temp_env::with_var_unset("MAILER_MISSING_VAR", || {
            let result = env_or_default("MAILER_MISSING_VAR", "default_value");
            assert_eq!(result, "default_value");
        });
    }

    #[test]
    fn test_env_required_missing() {
        temp_env::with_var_unset("MAILER_MISSING_REQUIRED", || {
            let err = env_required("MAILER_MISSING_REQUIRED").unwrap_err();
            assert!(err.to_string().contains("MAILER_MISSING_REQUIRED"));
            assert!(err.to_string().contains("required"));
        });
    }

    #[test]
    fn test_env_required_rejects_blank() {
        temp_env::with_var("MAILER_BLANK_REQUIRED", Some("   "), || {
            assert_eq!(
                env_required("MAILER_BLANK_REQUIRED"),
                Err(ConfigError::MissingEnvVar("MAILER_BLANK_REQUIRED".into()))
            );
        });
    }

    #[test]
    fn test_env_parse_or_uses_default_when_unset() {
        temp_env::with_var_unset("MAILER_PARSE_UNSET", || {
            assert_eq!(env_parse_or("MAILER_PARSE_UNSET", 25u64), Ok(25));
        });
    }

    #[test]
    fn test_env_parse_or_parses_value() {
        temp_env::with_var("MAILER_PARSE_SET", Some(" 1024 "), || {
            assert_eq!(env_parse_or("MAILER_PARSE_SET", 25u64), Ok(1024));
        });
    }

    #[test]
    fn test_env_parse_or_reports_bad_value() {
        temp_env::with_var("MAILER_PARSE_BAD", Some("lots"), || {
            let err = env_parse_or("MAILER_PARSE_BAD", 25u64).unwrap_err();
            assert!(matches!(err, ConfigError::ParseError { ref key, .. } if key == "MAILER_PARSE_BAD"));
        });
    }

    #[test]
    fn test_env_flag() {
        temp_env::with_var("MAILER_FLAG", Some("TRUE"), || {
            assert!(env_flag("MAILER_FLAG", false));
        });
        temp_env::with_var("MAILER_FLAG", Some("0"), || {
            assert!(!env_flag("MAILER_FLAG", true));
        });
        temp_env::with_var_unset("MAILER_FLAG", || {
            assert!(env_flag("MAILER_FLAG", true));
        });
    }
}
