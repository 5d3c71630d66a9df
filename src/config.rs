use crate::error::{Error, Result};
use clap::Parser;
use std::fmt;

pub const DEFAULT_API_URL: &str = "https://api.clubhouse.io/api/v3/";

/// Settings for one run of the notification job.
///
/// Every setting is read from the environment of the invocation. The local CLI
/// additionally accepts them as flags.
#[derive(Clone, PartialEq, Eq, Parser)]
pub struct NotifyConfig {
    /// Address the digest is sent to.
    #[arg(long, env = "TOADDRESS")]
    pub to_address: String,

    /// Address the digest is sent from, also used as the reply-to address.
    #[arg(long, env = "FROMADDRESS")]
    pub from_address: String,

    /// AWS region of the mail service.
    #[arg(long, env = "REGION")]
    pub region: String,

    /// Clubhouse API token.
    #[arg(long, env = "APITOKEN", hide_env_values = true)]
    pub api_token: String,

    /// Number of days to look ahead for due stories.
    #[arg(long, env = "DAYS")]
    pub days: u32,

    /// Clubhouse owner to search stories for.
    #[arg(long, env = "OWNER")]
    pub owner: String,

    /// Base URL of the Clubhouse API.
    #[arg(long, env = "API_URL", default_value = DEFAULT_API_URL)]
    pub api_url: String,
}

impl fmt::Debug for NotifyConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NotifyConfig")
            .field("to_address", &self.to_address)
            .field("from_address", &self.from_address)
            .field("region", &self.region)
            .field("api_token", &"<redacted>")
            .field("days", &self.days)
            .field("owner", &self.owner)
            .field("api_url", &self.api_url)
            .finish()
    }
}

impl NotifyConfig {
    /// Loads the configuration from the process environment only.
    pub fn from_env() -> Result<Self> {
        Self::from_args([crate::APP_NAME])
    }

    pub fn from_args<I, T>(args: I) -> Result<Self>
    where
        I: IntoIterator<Item = T>,
        T: Into<std::ffi::OsString> + Clone,
    {
        Self::try_parse_from(args).map_err(|e| Error::Config(e.to_string()))
    }
}
