//! Configuration types.
//!
//! Everything is read once at startup into an immutable [`MailerConfig`] and
//! passed by reference into each component.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use secrecy::SecretString;

use crate::error::ConfigError;

/// Default SMTP socket timeout.
const DEFAULT_SMTP_TIMEOUT_SECS: u64 = 30;

/// Default directory for per-run log files.
pub const DEFAULT_LOG_DIR: &str = "logs";

/// Environment variable naming the log directory.
pub const LOG_DIR_VAR: &str = "OUTREACH_LOG_DIR";

/// Where the recipient table comes from.
#[derive(Debug, Clone)]
pub struct SourceConfig {
    /// Local file path or remote URL.
    pub location: String,
    /// Fetch `location` over HTTP as delimited text.
    pub remote: bool,
}

/// Who the mail is from.
#[derive(Debug, Clone)]
pub struct SenderIdentity {
    pub name: String,
    pub email: String,
    pub phone: String,
    /// SMTP app password for `email`.
    pub password: SecretString,
}

/// Outbound SMTP server.
#[derive(Debug, Clone)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub timeout: Duration,
}

/// Optional deliverability headers. All off unless enabled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HeaderOptions {
    pub include_reply_to: bool,
    pub include_unsubscribe: bool,
    pub include_bulk_precedence: bool,
}

/// Message content settings shared by every recipient.
#[derive(Debug, Clone)]
pub struct MessageConfig {
    pub subject: String,
    pub profile_url: String,
    pub resume_url: String,
    /// Extra paragraph placed after the opening line.
    pub pitch: Option<String>,
    pub headers: HeaderOptions,
}

/// Pacing limits for a single run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacingConfig {
    /// Maximum send attempts per run.
    pub daily_limit: usize,
    /// Successful sends between cool-downs.
    pub batch_size: usize,
    pub batch_cooldown: Duration,
    pub min_delay: Duration,
    pub max_delay: Duration,
}

/// Complete mailer configuration.
#[derive(Debug, Clone)]
pub struct MailerConfig {
    pub source: SourceConfig,
    pub sender: SenderIdentity,
    pub smtp: SmtpConfig,
    pub message: MessageConfig,
    pub pacing: PacingConfig,
    pub state_file: PathBuf,
}

impl MailerConfig {
    /// Build config from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build config from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let vars = Vars(&lookup);

        let source = SourceConfig {
            location: vars.required("OUTREACH_SOURCE")?,
            remote: vars.flag("OUTREACH_SOURCE_REMOTE")?,
        };

        let sender = SenderIdentity {
            name: vars.required("OUTREACH_SENDER_NAME")?,
            email: vars.required("OUTREACH_SENDER_EMAIL")?,
            phone: vars.required("OUTREACH_SENDER_PHONE")?,
            password: SecretString::from(vars.required("OUTREACH_APP_PASSWORD")?),
        };

        let smtp = SmtpConfig {
            host: vars.required("OUTREACH_SMTP_HOST")?,
            port: vars.parsed("OUTREACH_SMTP_PORT")?,
            timeout: Duration::from_secs(
                vars.parsed_or("OUTREACH_SMTP_TIMEOUT_SECS", DEFAULT_SMTP_TIMEOUT_SECS)?,
            ),
        };

        let message = MessageConfig {
            subject: vars.required("OUTREACH_SUBJECT")?,
            profile_url: vars.required("OUTREACH_PROFILE_URL")?,
            resume_url: vars.required("OUTREACH_RESUME_URL")?,
            pitch: vars.optional("OUTREACH_PITCH"),
            headers: HeaderOptions {
                include_reply_to: vars.flag("OUTREACH_REPLY_TO")?,
                include_unsubscribe: vars.flag("OUTREACH_LIST_UNSUBSCRIBE")?,
                include_bulk_precedence: vars.flag("OUTREACH_BULK_PRECEDENCE")?,
            },
        };

        let pacing = PacingConfig {
            daily_limit: vars.parsed("OUTREACH_DAILY_LIMIT")?,
            batch_size: vars.parsed("OUTREACH_BATCH_SIZE")?,
            batch_cooldown: Duration::from_secs(vars.parsed("OUTREACH_BATCH_COOLDOWN_SECS")?),
            min_delay: Duration::from_secs(vars.parsed("OUTREACH_MIN_DELAY_SECS")?),
            max_delay: Duration::from_secs(vars.parsed("OUTREACH_MAX_DELAY_SECS")?),
        };
        pacing.validate()?;

        Ok(Self {
            source,
            sender,
            smtp,
            message,
            pacing,
            state_file: PathBuf::from(vars.required("OUTREACH_STATE_FILE")?),
        })
    }
}

impl PacingConfig {
    /// Reject limits the pipeline cannot honour.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.batch_size == 0 {
            return Err(ConfigError::InvalidValue {
                key: "OUTREACH_BATCH_SIZE".into(),
                message: "must be at least 1".into(),
            });
        }
        if self.min_delay > self.max_delay {
            return Err(ConfigError::InvalidValue {
                key: "OUTREACH_MIN_DELAY_SECS".into(),
                message: format!(
                    "{}s exceeds OUTREACH_MAX_DELAY_SECS ({}s)",
                    self.min_delay.as_secs(),
                    self.max_delay.as_secs()
                ),
            });
        }
        Ok(())
    }
}

/// Log directory, read ahead of [`MailerConfig`] so startup errors land in
/// the run log too.
pub fn log_dir_from_env() -> PathBuf {
    log_dir_from_lookup(|key| std::env::var(key).ok())
}

pub fn log_dir_from_lookup<F>(lookup: F) -> PathBuf
where
    F: Fn(&str) -> Option<String>,
{
    Vars(&lookup)
        .optional(LOG_DIR_VAR)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_LOG_DIR))
}

struct Vars<'a, F>(&'a F);

impl<F> Vars<'_, F>
where
    F: Fn(&str) -> Option<String>,
{
    fn optional(&self, key: &str) -> Option<String> {
        (self.0)(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn required(&self, key: &str) -> Result<String, ConfigError> {
        self.optional(key)
            .ok_or_else(|| ConfigError::MissingEnvVar(key.to_string()))
    }

    fn parsed<T>(&self, key: &str) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        let raw = self.required(key)?;
        raw.parse::<T>().map_err(|e| ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("{raw:?}: {e}"),
        })
    }

    fn parsed_or<T>(&self, key: &str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        match self.optional(key) {
            Some(_) => self.parsed(key),
            None => Ok(default),
        }
    }

    fn flag(&self, key: &str) -> Result<bool, ConfigError> {
        let Some(raw) = self.optional(key) else {
            return Ok(false);
        };
        match raw.to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" => Ok(true),
            "0" | "false" | "no" => Ok(false),
            _ => Err(ConfigError::InvalidValue {
                key: key.to_string(),
                message: format!("{raw:?} is not a boolean"),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use secrecy::ExposeSecret;

    use super::*;

    fn base_env() -> HashMap<&'static str, &'static str> {
        HashMap::from([
            ("OUTREACH_SOURCE", "recipients.xlsx"),
            ("OUTREACH_SENDER_NAME", "Dana Reyes"),
            ("OUTREACH_SENDER_EMAIL", "dana@example.com"),
            ("OUTREACH_SENDER_PHONE", "+1 555 0100"),
            ("OUTREACH_APP_PASSWORD", "app-secret"),
            ("OUTREACH_SMTP_HOST", "smtp.example.com"),
            ("OUTREACH_SMTP_PORT", "587"),
            ("OUTREACH_SUBJECT", "Backend roles"),
            ("OUTREACH_PROFILE_URL", "https://example.com/in/dana"),
            ("OUTREACH_RESUME_URL", "https://example.com/resume.pdf"),
            ("OUTREACH_DAILY_LIMIT", "40"),
            ("OUTREACH_BATCH_SIZE", "10"),
            ("OUTREACH_BATCH_COOLDOWN_SECS", "300"),
            ("OUTREACH_MIN_DELAY_SECS", "20"),
            ("OUTREACH_MAX_DELAY_SECS", "60"),
            ("OUTREACH_STATE_FILE", "state.json"),
        ])
    }

    fn load(env: &HashMap<&'static str, &'static str>) -> Result<MailerConfig, ConfigError> {
        MailerConfig::from_lookup(|key| env.get(key).map(|v| v.to_string()))
    }

    #[test]
    fn parses_complete_environment() {
        let config = load(&base_env()).unwrap();
        assert_eq!(config.source.location, "recipients.xlsx");
        assert!(!config.source.remote);
        assert_eq!(config.sender.password.expose_secret(), "app-secret");
        assert_eq!(config.smtp.port, 587);
        assert_eq!(config.smtp.timeout, Duration::from_secs(30));
        assert_eq!(config.pacing.daily_limit, 40);
        assert_eq!(config.pacing.batch_cooldown, Duration::from_secs(300));
        assert_eq!(config.message.headers, HeaderOptions::default());
        assert!(config.message.pitch.is_none());
    }

    #[test]
    fn log_dir_defaults_and_overrides() {
        let env = base_env();
        assert_eq!(
            log_dir_from_lookup(|key| env.get(key).map(|v| v.to_string())),
            PathBuf::from("logs")
        );

        let mut env = base_env();
        env.insert(LOG_DIR_VAR, " /var/log/outreach ");
        assert_eq!(
            log_dir_from_lookup(|key| env.get(key).map(|v| v.to_string())),
            PathBuf::from("/var/log/outreach")
        );

        env.insert(LOG_DIR_VAR, "  ");
        assert_eq!(
            log_dir_from_lookup(|key| env.get(key).map(|v| v.to_string())),
            PathBuf::from("logs")
        );
    }

    #[test]
    fn missing_required_variable_is_reported_by_name() {
        let mut env = base_env();
        env.remove("OUTREACH_SMTP_HOST");
        match load(&env) {
            Err(ConfigError::MissingEnvVar(key)) => assert_eq!(key, "OUTREACH_SMTP_HOST"),
            other => panic!("expected MissingEnvVar, got {other:?}"),
        }
    }

    #[test]
    fn blank_value_counts_as_missing() {
        let mut env = base_env();
        env.insert("OUTREACH_SUBJECT", "   ");
        assert!(matches!(load(&env), Err(ConfigError::MissingEnvVar(_))));
    }

    #[test]
    fn non_numeric_limit_is_invalid() {
        let mut env = base_env();
        env.insert("OUTREACH_DAILY_LIMIT", "forty");
        match load(&env) {
            Err(ConfigError::InvalidValue { key, .. }) => assert_eq!(key, "OUTREACH_DAILY_LIMIT"),
            other => panic!("expected InvalidValue, got {other:?}"),
        }
    }

    #[test]
    fn zero_batch_size_is_rejected() {
        let mut env = base_env();
        env.insert("OUTREACH_BATCH_SIZE", "0");
        assert!(matches!(load(&env), Err(ConfigError::InvalidValue { .. })));
    }

    #[test]
    fn min_delay_above_max_is_rejected() {
        let mut env = base_env();
        env.insert("OUTREACH_MIN_DELAY_SECS", "90");
        match load(&env) {
            Err(ConfigError::InvalidValue { key, .. }) => {
                assert_eq!(key, "OUTREACH_MIN_DELAY_SECS")
            }
            other => panic!("expected InvalidValue, got {other:?}"),
        }
    }

    #[test]
    fn header_flags_and_remote_source() {
        let mut env = base_env();
        env.insert("OUTREACH_SOURCE_REMOTE", "yes");
        env.insert("OUTREACH_REPLY_TO", "1");
        env.insert("OUTREACH_LIST_UNSUBSCRIBE", "TRUE");
        env.insert("OUTREACH_BULK_PRECEDENCE", "false");
        let config = load(&env).unwrap();
        assert!(config.source.remote);
        assert!(config.message.headers.include_reply_to);
        assert!(config.message.headers.include_unsubscribe);
        assert!(!config.message.headers.include_bulk_precedence);
    }

    #[test]
    fn garbage_flag_is_invalid() {
        let mut env = base_env();
        env.insert("OUTREACH_SOURCE_REMOTE", "maybe");
        assert!(matches!(load(&env), Err(ConfigError::InvalidValue { .. })));
    }
}
