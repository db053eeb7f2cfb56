use sctid::{Error, Result};
use std::time::Duration;
use url::Url;

/// Connection settings for a [`CisClient`](crate::CisClient).
#[derive(Debug, Clone, PartialEq)]
pub struct CisConfig {
    /// Root of the authority's API, e.g. `https://cis.example.org/api/`.
    pub base_url: Url,
    /// Session token sent as the `token` query parameter.
    pub token: String,
    /// When both are set the client logs in to obtain a token whenever the
    /// current one is rejected.
    pub username: Option<String>,
    pub password: Option<String>,
    /// Hard deadline for one bulk job. A warning is logged after a third of
    /// it has passed. Also used as the HTTP connect and read timeout.
    pub timeout: Duration,
    pub poll_interval: Duration,
    /// Largest number of identifiers sent in one bulk job.
    pub max_bulk_size: usize,
    /// Pause before retrying an operation whose job status poll was
    /// rejected with a 4xx.
    pub transient_cooldown: Duration,
    pub max_transient_retries: usize,
    /// Sent as `software` with reservation requests.
    pub software_name: String,
    /// Sent as `schemeName` with registration requests.
    pub scheme_name: String,
}

impl CisConfig {
    pub fn new(base_url: Url, token: impl Into<String>) -> Self {
        Self {
            base_url,
            token: token.into(),
            username: None,
            password: None,
            timeout: Duration::from_secs(120),
            poll_interval: Duration::from_millis(500),
            max_bulk_size: 1000,
            transient_cooldown: Duration::from_secs(5),
            max_transient_retries: 3,
            software_name: "sctid".to_string(),
            scheme_name: "SNOMEDID".to_string(),
        }
    }

    #[must_use]
    pub fn with_credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    pub(crate) fn credentials(&self) -> Option<(&str, &str)> {
        match (&self.username, &self.password) {
            (Some(username), Some(password)) => Some((username, password)),
            _ => None,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.base_url.cannot_be_a_base() {
            return Err(Error::InvalidConfig(format!(
                "base_url {} cannot be used as a base URL",
                self.base_url
            )));
        }
        if self.timeout.is_zero() {
            return Err(Error::InvalidConfig("timeout must be > 0".into()));
        }
        if self.poll_interval.is_zero() {
            return Err(Error::InvalidConfig("poll_interval must be > 0".into()));
        }
        if self.max_bulk_size == 0 {
            return Err(Error::InvalidConfig("max_bulk_size must be > 0".into()));
        }
        if self.username.is_some() != self.password.is_some() {
            return Err(Error::InvalidConfig(
                "username and password must be set together".into(),
            ));
        }
        Ok(())
    }
}
