//! Engine settings loading from config.toml
//!
//! Every section is optional; missing values fall back to the defaults below so a
//! bare deployment only needs `DATABASE_URL` and the mail relay endpoint.

use crate::entities::enums::OperatorRole;
use crate::errors::{Error, Result};
use chrono_tz::Tz;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Configuration structure representing the entire config.toml file
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// `[organization]` section
    pub organization: OrganizationSettings,
    /// `[mail]` section
    pub mail: MailSettings,
    /// `[scheduler]` section
    pub scheduler: SchedulerSettings,
    /// `[alerts]` section
    pub alerts: AlertSettings,
    /// `[database]` section
    pub database: DatabaseSettings,
}

/// Organisation-wide settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OrganizationSettings {
    /// IANA timezone that defines the organisational calendar day
    pub timezone: String,
}

impl Default for OrganizationSettings {
    fn default() -> Self {
        Self {
            timezone: "Europe/Rome".to_string(),
        }
    }
}

/// Mail relay settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MailSettings {
    /// HTTP mail relay endpoint, None disables delivery and emailed alerts fail
    pub endpoint: Option<String>,
    /// Bearer token for the relay
    pub api_key: Option<String>,
    /// From address used by automatic channels
    pub from: String,
    /// Upper bound of a single send, in seconds
    pub timeout_secs: u64,
}

impl Default for MailSettings {
    fn default() -> Self {
        Self {
            endpoint: None,
            api_key: None,
            from: "noreply@fieldops.local".to_string(),
            timeout_secs: 15,
        }
    }
}

/// Scheduler settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SchedulerSettings {
    /// How often the external trigger runs; a rule fires when its send time
    /// falls inside the current tick window
    pub tick_minutes: u32,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self { tick_minutes: 5 }
    }
}

/// Role whitelists of the automatic channels
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AlertSettings {
    /// Roles that always receive automatic invoice-due alerts
    pub invoice_due_roles: Vec<OperatorRole>,
    /// Roles that always receive renewal alerts
    pub renewal_roles: Vec<OperatorRole>,
}

impl Default for AlertSettings {
    fn default() -> Self {
        Self {
            invoice_due_roles: vec![OperatorRole::Administration],
            renewal_roles: vec![OperatorRole::Administration, OperatorRole::ProjectManager],
        }
    }
}

/// Database settings; the URL itself comes from `DATABASE_URL`
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseSettings {
    /// Connect and acquire timeout, in seconds
    pub timeout_secs: u64,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self { timeout_secs: 10 }
    }
}

impl Settings {
    /// Parses the organisational timezone.
    pub fn timezone(&self) -> Result<Tz> {
        parse_timezone(&self.organization.timezone)
    }

    /// Upper bound of a single mail send.
    #[must_use]
    pub const fn mail_timeout(&self) -> Duration {
        Duration::from_secs(self.mail.timeout_secs)
    }

    /// Width of the window a rule's send time must fall in, at least one minute.
    #[must_use]
    pub fn tick_granularity(&self) -> chrono::Duration {
        chrono::Duration::minutes(i64::from(self.scheduler.tick_minutes.max(1)))
    }

    fn validate(&self) -> Result<()> {
        self.timezone()?;
        if self.mail.timeout_secs == 0 {
            return Err(Error::Config {
                message: "mail.timeout_secs must be greater than zero".to_string(),
            });
        }
        if self.scheduler.tick_minutes == 0 {
            return Err(Error::Config {
                message: "scheduler.tick_minutes must be greater than zero".to_string(),
            });
        }
        Ok(())
    }
}

/// Parses an IANA timezone name such as `Europe/Rome`.
pub fn parse_timezone(name: &str) -> Result<Tz> {
    name.parse::<Tz>().map_err(|e| Error::Config {
        message: format!("Unknown timezone {name:?}: {e}"),
    })
}

/// Loads settings from a TOML file
///
/// # Errors
/// Returns an error if:
/// - The file cannot be read
/// - The TOML syntax is invalid
/// - A value fails validation (unknown timezone, zero timeout)
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Settings> {
    let contents = std::fs::read_to_string(path.as_ref()).map_err(|e| Error::Config {
        message: format!("Failed to read config file: {e}"),
    })?;
    parse_config(&contents)
}

/// Loads settings from `./config.toml`, using defaults when the file is absent.
pub fn load_default_config() -> Result<Settings> {
    if Path::new("config.toml").exists() {
        load_config("config.toml")
    } else {
        tracing::warn!("config.toml not found, using default settings");
        Ok(Settings::default())
    }
}

fn parse_config(contents: &str) -> Result<Settings> {
    let settings: Settings = toml::from_str(contents).map_err(|e| Error::Config {
        message: format!("Failed to parse config.toml: {e}"),
    })?;
    settings.validate()?;
    Ok(settings)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;

    #[test]
    fn test_parse_full_config() {
        let toml_str = r#"
            [organization]
            timezone = "America/New_York"

            [mail]
            endpoint = "https://relay.example.com/send"
            from = "ops@example.com"
            timeout_secs = 5

            [scheduler]
            tick_minutes = 1

            [alerts]
            invoice_due_roles = ["ADMINISTRATION", "SUPERVISOR"]
        "#;

        let settings = parse_config(toml_str).unwrap();
        assert_eq!(settings.timezone().unwrap(), chrono_tz::America::New_York);
        assert_eq!(settings.mail.from, "ops@example.com");
        assert_eq!(settings.mail_timeout(), Duration::from_secs(5));
        assert_eq!(settings.tick_granularity(), chrono::Duration::minutes(1));
        assert_eq!(
            settings.alerts.invoice_due_roles,
            vec![OperatorRole::Administration, OperatorRole::Supervisor]
        );
        // Untouched section keeps its default
        assert_eq!(
            settings.alerts.renewal_roles,
            vec![OperatorRole::Administration, OperatorRole::ProjectManager]
        );
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let settings = parse_config("").unwrap();
        assert_eq!(settings.timezone().unwrap(), chrono_tz::Europe::Rome);
        assert!(settings.mail.endpoint.is_none());
        assert_eq!(settings.scheduler.tick_minutes, 5);
    }

    #[test]
    fn test_unknown_timezone_is_rejected() {
        let result = parse_config("[organization]\ntimezone = \"Mars/Olympus\"\n");
        assert!(matches!(result, Err(Error::Config { .. })));
    }

    #[test]
    fn test_zero_timeout_is_rejected() {
        let result = parse_config("[mail]\ntimeout_secs = 0\n");
        assert!(matches!(result, Err(Error::Config { .. })));
    }
}
