use std::path::PathBuf;
use std::time::Duration;

/// The confirmation-code alphabet: upper-case letters and digits minus the
/// visually ambiguous `O`, `0`, `I`, `1`. Matching is case-sensitive.
pub const CODE_ALPHABET: &str = "ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub database_path: PathBuf,
    pub frontend_build_path: PathBuf,
    pub code_lifetime: Duration,
    pub code_length: usize,
    pub code_alphabet: Vec<char>,
    pub storage_timeout: Duration,
    pub probe_interval: Duration,
    pub probe_grace: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            database_path: PathBuf::from("rollcall.db"),
            frontend_build_path: PathBuf::from("./web-ui/out"),
            code_lifetime: Duration::from_secs(300),
            code_length: 6,
            code_alphabet: CODE_ALPHABET.chars().collect(),
            storage_timeout: Duration::from_secs(5),
            probe_interval: Duration::from_secs(10),
            probe_grace: Duration::from_secs(20),
        }
    }
}

impl ServerConfig {
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(host) = std::env::var("SERVER_HOST") {
            if !host.is_empty() {
                config.host = host;
            }
        }

        if let Ok(port) = std::env::var("SERVER_PORT") {
            match port.parse::<u16>() {
                Ok(parsed) => config.port = parsed,
                Err(_) => tracing::warn!(value = %port, "Invalid SERVER_PORT, using default"),
            }
        }

        if let Ok(url) = std::env::var("DATABASE_URL") {
            if !url.is_empty() {
                config.database_path = PathBuf::from(strip_sqlite_scheme(&url));
            }
        }

        if let Ok(path) = std::env::var("FRONTEND_BUILD_PATH") {
            if !path.is_empty() {
                config.frontend_build_path = PathBuf::from(path);
            }
        }

        if let Ok(secs) = std::env::var("CONFIRMATION_CODE_DURATION_SECONDS") {
            match secs.parse::<u64>() {
                Ok(parsed) if parsed > 0 => config.code_lifetime = Duration::from_secs(parsed),
                _ => tracing::warn!(
                    value = %secs,
                    "Invalid CONFIRMATION_CODE_DURATION_SECONDS, using default"
                ),
            }
        }

        config
    }
}

/// `DATABASE_URL` is accepted either as a bare filesystem path or with a
/// `sqlite:` scheme prefix.
fn strip_sqlite_scheme(url: &str) -> &str {
    url.strip_prefix("sqlite://")
        .or_else(|| url.strip_prefix("sqlite:"))
        .unwrap_or(url)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.port, 8080);
        assert_eq!(config.code_lifetime, Duration::from_secs(300));
        assert_eq!(config.code_length, 6);
        assert_eq!(config.code_alphabet.len(), 32);
    }

    #[test]
    fn alphabet_has_no_ambiguous_symbols() {
        for ambiguous in ['O', '0', 'I', '1'] {
            assert!(!CODE_ALPHABET.contains(ambiguous));
        }
    }

    #[test]
    fn test_strip_sqlite_scheme() {
        assert_eq!(strip_sqlite_scheme("sqlite:attendance.db"), "attendance.db");
        assert_eq!(strip_sqlite_scheme("sqlite:///tmp/a.db"), "/tmp/a.db");
        assert_eq!(strip_sqlite_scheme("/var/lib/rollcall.db"), "/var/lib/rollcall.db");
    }
}
