//! Configuration management for Tootgate

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono_tz::Tz;
use secrecy::SecretString;
use serde::{Deserialize, Serialize};

use crate::confirm::ConfirmationPolicy;
use crate::error::{ConfigError, Result, TimelineError};
use crate::rate_gate::MAX_INTERVAL_HOURS;
use crate::types::CandidateLimits;

/// Longest allowed pause between media upload and publish
pub const MAX_SETTLING_SECONDS: f64 = 3600.0;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub mastodon: MastodonConfig,
    #[serde(default)]
    pub posting: PostingConfig,
    #[serde(default)]
    pub audit: AuditConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MastodonConfig {
    pub instance: String,
    pub token_file: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PostingConfig {
    pub minimum_interval_hours: f64,
    pub timezone: String,
    pub confirmation: ConfirmationPolicy,
    pub upload_settling_seconds: f64,
    pub max_text_length: usize,
    pub max_alt_text_length: usize,
    pub image_dir: Option<String>,
}

impl Default for PostingConfig {
    fn default() -> Self {
        Self {
            minimum_interval_hours: 20.0,
            timezone: "UTC".to_string(),
            confirmation: ConfirmationPolicy::Interactive,
            upload_settling_seconds: 8.0,
            max_text_length: 500,
            max_alt_text_length: 1500,
            image_dir: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditConfig {
    pub directory: String,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            directory: "~/.local/share/tootgate/logs".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from the default location
    pub fn load() -> Result<Self> {
        let config_path = resolve_config_path(None)?;
        Self::load_from_path(&config_path)
    }

    /// Load and validate configuration from a specific path
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(ConfigError::ReadError)?;
        let config: Config = toml::from_str(&content).map_err(ConfigError::ParseError)?;
        config.validate()?;
        Ok(config)
    }

    /// Create a default configuration
    pub fn default_config() -> Self {
        Self {
            mastodon: MastodonConfig {
                instance: "https://mastodon.social".to_string(),
                token_file: "~/.config/tootgate/mastodon.token".to_string(),
            },
            posting: PostingConfig::default(),
            audit: AuditConfig::default(),
        }
    }

    /// Check value ranges that serde cannot express
    pub fn validate(&self) -> Result<()> {
        if self.mastodon.instance.trim().is_empty() {
            return Err(ConfigError::MissingField("mastodon.instance".to_string()).into());
        }

        let posting = &self.posting;
        if !(posting.minimum_interval_hours > 0.0
            && posting.minimum_interval_hours <= MAX_INTERVAL_HOURS)
        {
            return Err(ConfigError::InvalidValue {
                field: "posting.minimum_interval_hours".to_string(),
                reason: format!(
                    "must be a positive number of hours up to {} (got {})",
                    MAX_INTERVAL_HOURS, posting.minimum_interval_hours
                ),
            }
            .into());
        }
        if !(posting.upload_settling_seconds >= 0.0
            && posting.upload_settling_seconds <= MAX_SETTLING_SECONDS)
        {
            return Err(ConfigError::InvalidValue {
                field: "posting.upload_settling_seconds".to_string(),
                reason: format!(
                    "must be between 0 and {} seconds (got {})",
                    MAX_SETTLING_SECONDS, posting.upload_settling_seconds
                ),
            }
            .into());
        }

        self.timezone()?;
        Ok(())
    }

    /// The account's local timezone
    pub fn timezone(&self) -> Result<Tz> {
        self.posting
            .timezone
            .parse::<Tz>()
            .map_err(|_| ConfigError::UnknownTimezone(self.posting.timezone.clone()).into())
    }

    /// Instance URL with an `https://` scheme added when none was given
    pub fn instance_url(&self) -> String {
        let instance = self.mastodon.instance.trim();
        if instance.starts_with("http://") || instance.starts_with("https://") {
            instance.to_string()
        } else {
            format!("https://{}", instance)
        }
    }

    /// Read the access token from the configured token file
    ///
    /// A missing, unreadable or empty token file is an authentication failure.
    pub fn read_access_token(&self) -> Result<SecretString> {
        let token_path = shellexpand::full(&self.mastodon.token_file).map_err(|e| {
            TimelineError::Authentication(format!("Failed to expand token file path: {}", e))
        })?;

        let token = std::fs::read_to_string(token_path.as_ref())
            .map_err(|e| {
                TimelineError::Authentication(format!(
                    "Failed to read Mastodon token file {}: {}",
                    token_path, e
                ))
            })?
            .trim()
            .to_string();

        if token.is_empty() {
            return Err(
                TimelineError::Authentication("Mastodon token file is empty".to_string()).into(),
            );
        }

        Ok(SecretString::from(token))
    }

    /// Pause between media upload and publish, clamped to `MAX_SETTLING_SECONDS`
    pub fn settling_delay(&self) -> Duration {
        let seconds = self
            .posting
            .upload_settling_seconds
            .max(0.0)
            .min(MAX_SETTLING_SECONDS);
        Duration::try_from_secs_f64(seconds).unwrap_or_default()
    }

    pub fn limits(&self) -> CandidateLimits {
        CandidateLimits {
            max_text_length: self.posting.max_text_length,
            max_alt_text_length: self.posting.max_alt_text_length,
        }
    }

    /// Directory that receives one audit CSV per run
    pub fn audit_dir(&self) -> Result<PathBuf> {
        expand_path(&self.audit.directory, "audit.directory")
    }

    /// Resolve a candidate image path; relative paths are taken from `posting.image_dir`
    pub fn resolve_image_path(&self, image: &str) -> Result<PathBuf> {
        let path = expand_path(image, "image")?;
        if path.is_absolute() {
            return Ok(path);
        }
        match &self.posting.image_dir {
            Some(dir) => Ok(expand_path(dir, "posting.image_dir")?.join(path)),
            None => Ok(path),
        }
    }
}

fn expand_path(raw: &str, field: &str) -> Result<PathBuf> {
    let expanded = shellexpand::full(raw).map_err(|e| ConfigError::InvalidValue {
        field: field.to_string(),
        reason: e.to_string(),
    })?;
    Ok(PathBuf::from(expanded.as_ref()))
}

/// Resolve the configuration file path following XDG Base Directory spec
///
/// Precedence: explicit path, `TOOTGATE_CONFIG`, `<config_dir>/tootgate/config.toml`.
pub fn resolve_config_path(explicit: Option<&Path>) -> Result<PathBuf> {
    if let Some(path) = explicit {
        return Ok(PathBuf::from(
            shellexpand::tilde(&path.to_string_lossy()).to_string(),
        ));
    }

    if let Ok(path) = std::env::var("TOOTGATE_CONFIG") {
        return Ok(PathBuf::from(shellexpand::tilde(&path).to_string()));
    }

    let config_dir = dirs::config_dir()
        .ok_or_else(|| ConfigError::MissingField("config directory".to_string()))?;

    Ok(config_dir.join("tootgate").join("config.toml"))
}

/// Render a token as `abc...xyz` for diagnostics
pub fn mask_token(token: &str) -> String {
    let chars: Vec<char> = token.chars().collect();
    if chars.len() <= 6 {
        return "*".repeat(chars.len());
    }
    let head: String = chars[..3].iter().collect();
    let tail: String = chars[chars.len() - 3..].iter().collect();
    format!("{}...{}", head, tail)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TootgateError;
    use secrecy::ExposeSecret;
    use serial_test::serial;
    use std::io::Write;
    use tempfile::{NamedTempFile, TempDir};

    fn write_config(dir: &TempDir, body: &str) -> PathBuf {
        let path = dir.path().join("config.toml");
        std::fs::write(&path, body).unwrap();
        path
    }

    #[test]
    fn test_load_minimal_config_uses_defaults() {
        let dir = TempDir::new().unwrap();
        let path = write_config(
            &dir,
            r#"
[mastodon]
instance = "mastodon.social"
token_file = "/tmp/token"
"#,
        );

        let config = Config::load_from_path(&path).unwrap();
        assert_eq!(config.posting.minimum_interval_hours, 20.0);
        assert_eq!(config.posting.upload_settling_seconds, 8.0);
        assert_eq!(config.posting.max_text_length, 500);
        assert_eq!(config.posting.max_alt_text_length, 1500);
        assert_eq!(config.posting.confirmation, ConfirmationPolicy::Interactive);
        assert_eq!(config.instance_url(), "https://mastodon.social");
        assert_eq!(config.settling_delay(), Duration::from_secs(8));
    }

    #[test]
    fn test_load_full_config() {
        let dir = TempDir::new().unwrap();
        let path = write_config(
            &dir,
            r#"
[mastodon]
instance = "http://localhost:3000"
token_file = "/tmp/token"

[posting]
minimum_interval_hours = 12.5
timezone = "America/Toronto"
confirmation = "always"
upload_settling_seconds = 0.5
max_text_length = 400
max_alt_text_length = 1000
image_dir = "/srv/images"

[audit]
directory = "/var/log/tootgate"
"#,
        );

        let config = Config::load_from_path(&path).unwrap();
        assert_eq!(config.instance_url(), "http://localhost:3000");
        assert_eq!(config.timezone().unwrap(), chrono_tz::America::Toronto);
        assert_eq!(config.posting.confirmation, ConfirmationPolicy::Always);
        assert_eq!(config.settling_delay(), Duration::from_millis(500));
        assert_eq!(config.limits().max_text_length, 400);
        assert_eq!(config.audit_dir().unwrap(), PathBuf::from("/var/log/tootgate"));
        assert_eq!(
            config.resolve_image_path("pump.jpeg").unwrap(),
            PathBuf::from("/srv/images/pump.jpeg")
        );
        assert_eq!(
            config.resolve_image_path("/abs/pump.jpeg").unwrap(),
            PathBuf::from("/abs/pump.jpeg")
        );
    }

    #[test]
    fn test_unknown_timezone_rejected() {
        let dir = TempDir::new().unwrap();
        let path = write_config(
            &dir,
            r#"
[mastodon]
instance = "mastodon.social"
token_file = "/tmp/token"

[posting]
timezone = "Mars/Olympus_Mons"
"#,
        );

        let err = Config::load_from_path(&path).unwrap_err();
        assert!(err.to_string().contains("Unknown timezone"));
    }

    #[test]
    fn test_non_positive_interval_rejected() {
        let mut config = Config::default_config();
        config.posting.minimum_interval_hours = 0.0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("minimum_interval_hours"));

        config.posting.minimum_interval_hours = f64::NAN;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_negative_settling_rejected() {
        let mut config = Config::default_config();
        config.posting.upload_settling_seconds = -1.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_oversized_interval_rejected() {
        let mut config = Config::default_config();
        config.posting.minimum_interval_hours = MAX_INTERVAL_HOURS;
        assert!(config.validate().is_ok());

        config.posting.minimum_interval_hours = 1e12;
        assert!(matches!(
            config.validate(),
            Err(TootgateError::Config(ConfigError::InvalidValue { ref field, .. }))
                if field == "posting.minimum_interval_hours"
        ));
    }

    #[test]
    fn test_oversized_settling_rejected_and_clamped() {
        let mut config = Config::default_config();
        config.posting.upload_settling_seconds = 1e20;
        assert!(matches!(
            config.validate(),
            Err(TootgateError::Config(ConfigError::InvalidValue { ref field, .. }))
                if field == "posting.upload_settling_seconds"
        ));
        assert_eq!(config.settling_delay(), Duration::from_secs(3600));

        config.posting.upload_settling_seconds = f64::NAN;
        assert!(config.validate().is_err());
        assert_eq!(config.settling_delay(), Duration::ZERO);
    }

    #[test]
    fn test_invalid_confirmation_policy_is_parse_error() {
        let dir = TempDir::new().unwrap();
        let path = write_config(
            &dir,
            r#"
[mastodon]
instance = "mastodon.social"
token_file = "/tmp/token"

[posting]
confirmation = "sometimes"
"#,
        );

        let err = Config::load_from_path(&path).unwrap_err();
        assert!(err.to_string().contains("Failed to parse config"));
    }

    #[test]
    fn test_missing_file_is_read_error() {
        let err = Config::load_from_path(Path::new("/nonexistent/tootgate.toml")).unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
        assert_eq!(err.exit_code(), 1);
    }

    #[test]
    fn test_read_access_token_trims_whitespace() {
        let mut token_file = NamedTempFile::new().unwrap();
        token_file.write_all(b"  secret-token-123  \n").unwrap();
        token_file.flush().unwrap();

        let mut config = Config::default_config();
        config.mastodon.token_file = token_file.path().to_string_lossy().to_string();

        let token = config.read_access_token().unwrap();
        assert_eq!(token.expose_secret(), "secret-token-123");
    }

    #[test]
    fn test_read_access_token_empty_file_is_auth_error() {
        let token_file = NamedTempFile::new().unwrap();
        let mut config = Config::default_config();
        config.mastodon.token_file = token_file.path().to_string_lossy().to_string();

        let err = config.read_access_token().unwrap_err();
        assert_eq!(err.exit_code(), 2);
        assert!(err.to_string().contains("empty"));
    }

    #[test]
    fn test_read_access_token_missing_file_is_auth_error() {
        let mut config = Config::default_config();
        config.mastodon.token_file = "/nonexistent/mastodon.token".to_string();

        let err = config.read_access_token().unwrap_err();
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn test_mask_token() {
        assert_eq!(mask_token("abcdef123456xyz"), "abc...xyz");
        assert_eq!(mask_token("short"), "*****");
        assert_eq!(mask_token(""), "");
    }

    #[test]
    #[serial]
    fn test_resolve_config_path_precedence() {
        std::env::set_var("TOOTGATE_CONFIG", "/etc/tootgate/from-env.toml");

        let explicit = resolve_config_path(Some(Path::new("/tmp/explicit.toml"))).unwrap();
        assert_eq!(explicit, PathBuf::from("/tmp/explicit.toml"));

        let from_env = resolve_config_path(None).unwrap();
        assert_eq!(from_env, PathBuf::from("/etc/tootgate/from-env.toml"));

        std::env::remove_var("TOOTGATE_CONFIG");
        let default = resolve_config_path(None).unwrap();
        assert!(default.ends_with("tootgate/config.toml"));
    }
}
