//! Environment-backed configuration helpers shared by the services.
//!
//! Services build their typed `Config` from these so that defaults, boolean
//! spelling and secret wrapping behave the same everywhere.

use crate::error::AppError;
use secrecy::Secret;
use std::str::FromStr;

/// Load a `.env` file if one exists. Missing files are not an error.
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

/// Read a trimmed, non-empty environment variable.
pub fn env_opt(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

pub fn env_or(key: &str, default: &str) -> String {
    env_opt(key).unwrap_or_else(|| default.to_string())
}

/// Parse an environment variable, falling back to `default` when unset.
pub fn env_parse<T>(key: &str, default: T) -> Result<T, AppError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env_opt(key) {
        Some(raw) => raw.parse::<T>().map_err(|e| {
            AppError::ConfigError(anyhow::anyhow!("Invalid value for {}: {}", key, e))
        }),
        None => Ok(default),
    }
}

/// Boolean flag: `1`, `true`, `yes` and `y` (any case) are true.
pub fn env_flag(key: &str, default: bool) -> bool {
    match env_opt(key) {
        Some(raw) => parse_flag(&raw),
        None => default,
    }
}

pub fn parse_flag(raw: &str) -> bool {
    matches!(
        raw.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "y"
    )
}

/// Comma separated list with blank entries dropped.
pub fn env_list(key: &str) -> Vec<String> {
    env_opt(key).map(|raw| parse_list(&raw)).unwrap_or_default()
}

pub fn parse_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|entry| entry.trim())
        .filter(|entry| !entry.is_empty())
        .map(|entry| entry.to_string())
        .collect()
}

pub fn env_secret(key: &str) -> Option<Secret<String>> {
    env_opt(key).map(Secret::new)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn flags_accept_common_spellings() {
        for raw in ["1", "true", "TRUE", "yes", "Y"] {
            assert!(parse_flag(raw), "{raw} should be true");
        }
        for raw in ["0", "false", "no", ""] {
            assert!(!parse_flag(raw), "{raw} should be false");
        }
    }

    #[test]
    fn lists_drop_blank_entries() {
        assert_eq!(parse_list(" a, ,b ,,c"), vec!["a", "b", "c"]);
        assert!(parse_list("  ").is_empty());
    }

    #[test]
    #[serial]
    fn parse_reports_offending_key() {
        // SAFETY: serialized with the other env-mutating tests.
        unsafe { std::env::set_var("SERVICE_CORE_TEST_PORT", "not-a-port") };
        let err = env_parse::<u16>("SERVICE_CORE_TEST_PORT", 80).unwrap_err();
        assert!(err.to_string().contains("SERVICE_CORE_TEST_PORT"));
        unsafe { std::env::remove_var("SERVICE_CORE_TEST_PORT") };
        assert_eq!(env_parse::<u16>("SERVICE_CORE_TEST_PORT", 80).unwrap(), 80);
    }
}
