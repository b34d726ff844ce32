//! Process configuration.
//!
//! Settings come from an optional TOML file, then environment variables
//! override individual keys. Credentials have no defaults and are checked
//! by [`BelleConfig::credentials`].

use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use belle_core::{Error, GuildId, Result};
use belle_runtime::{CacheConfig, ClientConfig, DEFAULT_INACTIVITY_TIMEOUT, GuildFilter};
use belle_web::{DEFAULT_CORS_ORIGINS, ServerConfig};
use serde::Deserialize;

pub const DISCORD_API_BASE: &str = "https://discord.com/api/v10/";
pub const GOOGLE_API_BASE: &str = "https://www.googleapis.com/";

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct DiscordConfig {
    pub token: Option<String>,
    /// Application id; the bot's own user id.
    pub client_id: Option<String>,
    pub api_base: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct GoogleConfig {
    pub access_token: Option<String>,
    /// Spreadsheet copied for every new puzzle.
    pub template_sheet_id: Option<String>,
    pub api_base: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub port: u16,
    pub cors_origins: Vec<String>,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            port: 3000,
            cors_origins: DEFAULT_CORS_ORIGINS.iter().map(ToString::to_string).collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct DocumentConfig {
    /// Seconds an unused hunt document stays open.
    pub inactivity_timeout_secs: u64,
}

impl Default for DocumentConfig {
    fn default() -> Self {
        Self {
            inactivity_timeout_secs: DEFAULT_INACTIVITY_TIMEOUT.as_secs(),
        }
    }
}

/// Top-level configuration file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct BelleConfig {
    pub discord: DiscordConfig,
    pub google: GoogleConfig,
    pub api: ApiConfig,
    pub documents: DocumentConfig,
    pub guilds: GuildFilter,
}

/// Credentials required to talk to the outside world.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub discord_token: String,
    pub client_id: String,
    pub google_access_token: String,
    pub template_sheet_id: String,
}

impl BelleConfig {
    /// Load `path` (if given) and apply overrides from the process
    /// environment.
    ///
    /// # Errors
    ///
    /// Fails when the file cannot be read or parsed, or an override is
    /// malformed.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.with_env(|key| std::env::var(key).ok())
    }

    /// # Errors
    ///
    /// Fails when the file cannot be read or is not valid TOML.
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| Error::file_read_failed(path, e.to_string()))?;
        Self::parse(&raw)
    }

    /// # Errors
    ///
    /// Fails on invalid TOML or unknown value types.
    pub fn parse(raw: &str) -> Result<Self> {
        Ok(toml::from_str(raw)?)
    }

    /// Apply environment overrides read through `lookup`.
    ///
    /// `TESTING_LOCALLY` restricts the bot to `LOCAL_TEST_SERVER_ID`;
    /// without it that guild is ignored, so a local instance and the
    /// deployed one can share a bot account.
    ///
    /// # Errors
    ///
    /// Fails when a numeric override does not parse.
    pub fn with_env(mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        if let Some(token) = lookup("DISCORD_TOKEN") {
            self.discord.token = Some(token);
        }
        if let Some(client_id) = lookup("CLIENT_ID") {
            self.discord.client_id = Some(client_id);
        }
        if let Some(token) = lookup("GOOGLE_ACCESS_TOKEN") {
            self.google.access_token = Some(token);
        }
        if let Some(template) = lookup("GOOGLE_TEMPLATE_SHEET_ID") {
            self.google.template_sheet_id = Some(template);
        }
        if let Some(port) = lookup("PORT") {
            self.api.port = port
                .parse()
                .map_err(|_| Error::invalid_config("PORT", format!("'{port}' is not a port")))?;
        }
        if let Some(secs) = lookup("BELLE_DOCUMENT_TIMEOUT_SECS") {
            self.documents.inactivity_timeout_secs = secs.parse().map_err(|_| {
                Error::invalid_config(
                    "BELLE_DOCUMENT_TIMEOUT_SECS",
                    format!("'{secs}' is not a number of seconds"),
                )
            })?;
        }
        if let Some(local) = lookup("LOCAL_TEST_SERVER_ID") {
            let local = GuildId::new(local);
            if lookup("TESTING_LOCALLY").is_some() {
                self.guilds.allowed = vec![local];
            } else {
                self.guilds.blocked.push(local);
            }
        }
        Ok(self)
    }

    /// # Errors
    ///
    /// Names the first missing credential.
    pub fn credentials(&self) -> Result<Credentials> {
        Ok(Credentials {
            discord_token: required(self.discord.token.as_ref(), "discord.token")?,
            client_id: required(self.discord.client_id.as_ref(), "discord.client_id")?,
            google_access_token: required(
                self.google.access_token.as_ref(),
                "google.access_token",
            )?,
            template_sheet_id: required(
                self.google.template_sheet_id.as_ref(),
                "google.template_sheet_id",
            )?,
        })
    }

    #[must_use]
    pub fn discord_api_base(&self) -> &str {
        self.discord.api_base.as_deref().unwrap_or(DISCORD_API_BASE)
    }

    #[must_use]
    pub fn google_api_base(&self) -> &str {
        self.google.api_base.as_deref().unwrap_or(GOOGLE_API_BASE)
    }

    #[must_use]
    pub fn client_config(&self) -> ClientConfig {
        ClientConfig {
            cache: CacheConfig {
                inactivity_timeout: Duration::from_secs(self.documents.inactivity_timeout_secs),
            },
            guilds: self.guilds.clone(),
        }
    }

    #[must_use]
    pub fn server_config(&self) -> ServerConfig {
        ServerConfig {
            bind_address: SocketAddr::from(([0, 0, 0, 0], self.api.port)),
            cors_origins: self.api.cors_origins.clone(),
        }
    }
}

fn required(value: Option<&String>, key: &str) -> Result<String> {
    value
        .filter(|v| !v.is_empty())
        .cloned()
        .ok_or_else(|| Error::missing_config(key))
}
