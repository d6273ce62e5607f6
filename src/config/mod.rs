use chrono::Duration;
use serde::Deserialize;

/// Complete service configuration
///
/// Every section has defaults, so an empty file (or no file) is valid.
/// Secrets are never read from here; see [`crate::auth::SessionConfig::from_env`]
/// and [`crate::credentials::TokenVault::from_env`].
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub session: SessionSettings,
    #[serde(default)]
    pub cleanup: CleanupConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    /// Public origin used to build OAuth callback URLs. Required.
    #[serde(default)]
    pub base_url: String,
    #[serde(default = "default_app_name")]
    pub app_name: String,
    /// Marks cookies `Secure`.
    #[serde(default)]
    pub production: bool,
}

fn default_port() -> u16 {
    8080
}

fn default_app_name() -> String {
    crate::oauth::DEFAULT_APP_NAME.to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            base_url: String::new(),
            app_name: default_app_name(),
            production: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_database_path")]
    pub path: String,
}

fn default_database_path() -> String {
    "nowplaying.db".to_string()
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_database_path(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SessionSettings {
    #[serde(default = "default_session_hours")]
    pub duration_hours: i64,
    #[serde(default = "default_cookie_name")]
    pub cookie_name: String,
}

/// Ten years.
pub const MAX_SESSION_HOURS: i64 = 24 * 365 * 10;

/// One day.
pub const MAX_HANDSHAKE_TTL_SECONDS: i64 = 24 * 60 * 60;

fn default_session_hours() -> i64 {
    crate::auth::session::DEFAULT_SESSION_HOURS
}

fn default_cookie_name() -> String {
    crate::auth::session::DEFAULT_COOKIE_NAME.to_string()
}

impl SessionSettings {
    /// `None` when the configured hours are outside `1..=MAX_SESSION_HOURS`.
    pub fn duration(&self) -> Option<Duration> {
        (1..=MAX_SESSION_HOURS)
            .contains(&self.duration_hours)
            .then(|| Duration::try_hours(self.duration_hours))
            .flatten()
    }
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            duration_hours: default_session_hours(),
            cookie_name: default_cookie_name(),
        }
    }
}

/// Handshake session lifetime and sweep cadence
#[derive(Debug, Clone, Deserialize)]
pub struct CleanupConfig {
    #[serde(default = "default_cleanup_interval")]
    pub interval_seconds: u64,
    #[serde(default = "default_handshake_ttl")]
    pub handshake_ttl_seconds: i64,
}

fn default_cleanup_interval() -> u64 {
    300
}

fn default_handshake_ttl() -> i64 {
    crate::credentials::DEFAULT_SESSION_TTL_SECONDS
}

impl CleanupConfig {
    /// `None` when the TTL is outside `1..=MAX_HANDSHAKE_TTL_SECONDS`.
    pub fn handshake_ttl(&self) -> Option<Duration> {
        (1..=MAX_HANDSHAKE_TTL_SECONDS)
            .contains(&self.handshake_ttl_seconds)
            .then(|| Duration::try_seconds(self.handshake_ttl_seconds))
            .flatten()
    }
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self {
            interval_seconds: default_cleanup_interval(),
            handshake_ttl_seconds: default_handshake_ttl(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid config file: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid value for {key}: {value:?}")]
    InvalidEnv { key: &'static str, value: String },
    #[error("{key} must be {expected}, got {value}")]
    OutOfRange {
        key: &'static str,
        value: i64,
        expected: &'static str,
    },
}

/// Load configuration from TOML file
pub fn load_config(path: &str) -> Result<AppConfig, ConfigError> {
    let contents = std::fs::read_to_string(path)?;
    let config: AppConfig = toml::from_str(&contents)?;
    Ok(config)
}

impl AppConfig {
    /// Overlay environment variables on top of file values.
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        self.apply_lookup(|key| std::env::var(key).ok())
    }

    /// Rejects values that parse but cannot be used.
    ///
    /// Covers file and environment values alike, so call it after
    /// [`AppConfig::apply_env`].
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.session.duration().is_none() {
            return Err(ConfigError::OutOfRange {
                key: "SESSION_DURATION_HOURS",
                value: self.session.duration_hours,
                expected: "between 1 and 87600",
            });
        }
        if self.cleanup.interval_seconds == 0 {
            return Err(ConfigError::OutOfRange {
                key: "SESSION_CLEANUP_INTERVAL_SECONDS",
                value: 0,
                expected: "at least 1",
            });
        }
        if self.cleanup.handshake_ttl().is_none() {
            return Err(ConfigError::OutOfRange {
                key: "HANDSHAKE_TTL_SECONDS",
                value: self.cleanup.handshake_ttl_seconds,
                expected: "between 1 and 86400",
            });
        }
        Ok(())
    }

    /// Same as [`AppConfig::apply_env`] with an injectable variable source.
    pub fn apply_lookup<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.is_empty());

        if let Some(port) = get("PORT") {
            self.server.port = parse_env("PORT", port)?;
        }
        if let Some(base_url) = get("BASE_URL") {
            self.server.base_url = base_url;
        }
        if let Some(app_name) = get("APP_NAME") {
            self.server.app_name = app_name;
        }
        if let Some(env) = get("ENV") {
            self.server.production = env == "production";
        }
        if let Some(path) = get("DATABASE_PATH") {
            self.database.path = path;
        }
        if let Some(hours) = get("SESSION_DURATION_HOURS") {
            self.session.duration_hours = parse_env("SESSION_DURATION_HOURS", hours)?;
        }
        if let Some(interval) = get("SESSION_CLEANUP_INTERVAL_SECONDS") {
            self.cleanup.interval_seconds = parse_env("SESSION_CLEANUP_INTERVAL_SECONDS", interval)?;
        }
        if let Some(ttl) = get("HANDSHAKE_TTL_SECONDS") {
            self.cleanup.handshake_ttl_seconds = parse_env("HANDSHAKE_TTL_SECONDS", ttl)?;
        }
        Ok(())
    }
}

fn parse_env<T: std::str::FromStr>(key: &'static str, value: String) -> Result<T, ConfigError> {
    let parsed = value.trim().parse();
    parsed.map_err(|_| ConfigError::InvalidEnv { key, value })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.server.app_name, "Spotify NowPlaying");
        assert!(!config.server.production);
        assert_eq!(config.database.path, "nowplaying.db");
        assert_eq!(config.session.duration_hours, 168);
        assert_eq!(config.session.cookie_name, "session_token");
        assert_eq!(config.cleanup.interval_seconds, 300);
        assert_eq!(config.cleanup.handshake_ttl_seconds, 600);
    }

    #[test]
    fn test_config_deserialization() {
        let toml = r#"
            [server]
            port = 3000
            base_url = "https://np.example"

            [database]
            path = "/var/lib/nowplaying/db.sqlite"

            [cleanup]
            interval_seconds = 60
        "#;

        let config: AppConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.server.base_url, "https://np.example");
        assert_eq!(config.server.app_name, "Spotify NowPlaying");
        assert_eq!(config.database.path, "/var/lib/nowplaying/db.sqlite");
        assert_eq!(config.cleanup.interval_seconds, 60);
        assert_eq!(config.cleanup.handshake_ttl_seconds, 600);
        assert_eq!(config.session.duration_hours, 168);
    }

    #[test]
    fn test_env_overrides_file() {
        let mut config: AppConfig = toml::from_str("[server]\nport = 3000").unwrap();

        config
            .apply_lookup(env(&[
                ("PORT", "9090"),
                ("BASE_URL", "https://np.example"),
                ("ENV", "production"),
                ("SESSION_DURATION_HOURS", "24"),
                ("APP_NAME", ""),
            ]))
            .unwrap();

        assert_eq!(config.server.port, 9090);
        assert_eq!(config.server.base_url, "https://np.example");
        assert!(config.server.production);
        assert_eq!(config.session.duration_hours, 24);
        // Empty values are ignored
        assert_eq!(config.server.app_name, "Spotify NowPlaying");
    }

    #[test]
    fn test_invalid_env_value() {
        let mut config = AppConfig::default();
        let err = config.apply_lookup(env(&[("PORT", "eighty")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidEnv { key: "PORT", .. }));
    }

    #[test]
    fn test_defaults_are_valid() {
        let config = AppConfig::default();
        config.validate().unwrap();
        assert_eq!(config.session.duration(), Some(Duration::hours(168)));
        assert_eq!(config.cleanup.handshake_ttl(), Some(Duration::seconds(600)));
    }

    #[test]
    fn test_zero_cleanup_interval_is_rejected() {
        let mut config = AppConfig::default();
        config
            .apply_lookup(env(&[("SESSION_CLEANUP_INTERVAL_SECONDS", "0")]))
            .unwrap();

        assert!(matches!(
            config.validate(),
            Err(ConfigError::OutOfRange {
                key: "SESSION_CLEANUP_INTERVAL_SECONDS",
                ..
            })
        ));
    }

    #[test]
    fn test_handshake_ttl_must_be_positive() {
        for ttl in ["0", "-30", "86401"] {
            let mut config = AppConfig::default();
            config
                .apply_lookup(env(&[("HANDSHAKE_TTL_SECONDS", ttl)]))
                .unwrap();

            assert!(
                matches!(
                    config.validate(),
                    Err(ConfigError::OutOfRange { key: "HANDSHAKE_TTL_SECONDS", .. })
                ),
                "ttl {ttl}"
            );
            assert_eq!(config.cleanup.handshake_ttl(), None);
        }
    }

    #[test]
    fn test_session_hours_range() {
        for hours in ["0", "-1", "87601", "2500000000000000"] {
            let mut config = AppConfig::default();
            config
                .apply_lookup(env(&[("SESSION_DURATION_HOURS", hours)]))
                .unwrap();

            assert!(
                matches!(
                    config.validate(),
                    Err(ConfigError::OutOfRange { key: "SESSION_DURATION_HOURS", .. })
                ),
                "hours {hours}"
            );
        }

        let mut config = AppConfig::default();
        config
            .apply_lookup(env(&[("SESSION_DURATION_HOURS", "87600")]))
            .unwrap();
        config.validate().unwrap();
    }

    #[test]
    fn test_file_values_are_validated() {
        let config: AppConfig = toml::from_str("[cleanup]\ninterval_seconds = 0").unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_config_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[database]\npath = \"test.db\"\n").unwrap();

        let config = load_config(path.to_str().unwrap()).unwrap();
        assert_eq!(config.database.path, "test.db");

        assert!(matches!(
            load_config(dir.path().join("missing.toml").to_str().unwrap()),
            Err(ConfigError::Io(_))
        ));
    }
}
