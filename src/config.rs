use std::{env, fmt::Display, net::SocketAddr, path::PathBuf, str::FromStr};

use anyhow::Result;
use tracing::warn;

pub const DEFAULT_LOG_LIMIT: usize = 200;

#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: SocketAddr,
    pub import_bin: String,
    pub mock_import: bool,
    pub music_path: Option<PathBuf>,
    pub log_limit: usize,
    pub web_dist: PathBuf,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let port = env_value::<u16>("PORT").unwrap_or(5000);

        let bind_addr = env_value::<SocketAddr>("ND_IMPORT_BIND_ADDR")
            .unwrap_or_else(|| SocketAddr::from(([0, 0, 0, 0], port)));

        let import_bin = env::var("ND_IMPORT_BIN")
            .ok()
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| "nd-import".to_string());

        let mock_import = env::var("MOCK_IMPORT")
            .ok()
            .map(|v| is_truthy(&v))
            .unwrap_or(false);

        let music_path = env::var("NAVIDROME_MUSIC_PATH")
            .ok()
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .map(PathBuf::from);

        let log_limit = env_value::<usize>("ND_IMPORT_LOG_LIMIT")
            .unwrap_or(DEFAULT_LOG_LIMIT)
            .max(1);

        let web_dist = PathBuf::from(
            env::var("ND_IMPORT_WEB_DIST").unwrap_or_else(|_| "web/dist".to_string()),
        );

        Ok(Self {
            bind_addr,
            import_bin,
            mock_import,
            music_path,
            log_limit,
            web_dist,
        })
    }
}

fn env_value<T>(key: &str) -> Option<T>
where
    T: FromStr,
    T::Err: Display,
{
    let raw = env::var(key).ok()?;
    parse_value(key, &raw)
}

/// Blank means unset. Anything else that fails to parse is logged and ignored
/// so the default applies.
fn parse_value<T>(key: &str, raw: &str) -> Option<T>
where
    T: FromStr,
    T::Err: Display,
{
    let value = raw.trim().trim_matches('"').trim_matches('\'');
    if value.is_empty() {
        return None;
    }
    match value.parse::<T>() {
        Ok(parsed) => Some(parsed),
        Err(err) => {
            warn!("Ignoring invalid {key}={raw:?}: {err}; using default");
            None
        }
    }
}

fn is_truthy(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

#[cfg(test)]
mod tests {
    use std::net::SocketAddr;

    use super::{is_truthy, parse_value};

    #[test]
    fn mock_flag_accepts_common_truthy_spellings() {
        for raw in ["1", "true", " YES ", "On"] {
            assert!(is_truthy(raw), "{raw:?} should enable mock mode");
        }
        for raw in ["0", "false", "", "mock"] {
            assert!(!is_truthy(raw), "{raw:?} should not enable mock mode");
        }
    }

    #[test]
    fn numeric_values_parse_or_fall_back() {
        assert_eq!(parse_value::<u16>("PORT", " 8080 "), Some(8080));
        assert_eq!(parse_value::<u16>("PORT", "abc"), None);
        assert_eq!(parse_value::<usize>("ND_IMPORT_LOG_LIMIT", "x"), None);
        assert_eq!(parse_value::<usize>("ND_IMPORT_LOG_LIMIT", ""), None);
    }

    #[test]
    fn bind_address_may_be_quoted() {
        assert_eq!(
            parse_value::<SocketAddr>("ND_IMPORT_BIND_ADDR", "\"127.0.0.1:9000\""),
            Some(SocketAddr::from(([127, 0, 0, 1], 9000)))
        );
        assert_eq!(parse_value::<SocketAddr>("ND_IMPORT_BIND_ADDR", "nope"), None);
    }
}
