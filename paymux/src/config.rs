//! Payment configuration.
//!
//! A [`PaymentConfig`] is split into two halves:
//!
//! - **Identity fields** decide which manager bundle a context receives:
//!   card publishable key, server URL, Solana cluster, Solana RPC endpoint
//!   override and tenant id. They feed the [`Fingerprint`].
//! - **Behavior fields** (theme, locale, log level, dedup timings, request
//!   timeout, automatic subscription check) never affect sharing.
//!
//! Configuration can be built in code or loaded from a TOML file. String
//! values may reference environment variables with `$VAR` or `${VAR}`.
//!
//! ```toml
//! serverUrl = "https://shop.example/"
//! stripePublicKey = "$STRIPE_PUBLISHABLE_KEY"
//! solanaCluster = "devnet"
//!
//! [dedup]
//! cooldownMs = 200
//! deduplicationWindowMs = 0
//! ```
//!
//! # Environment Variables
//!
//! - `PAYMUX_CONFIG` - Path to the configuration file (default: `paymux.toml`)
//! - `PAYMUX_SERVER_URL` - Overrides the server URL from the file

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::dedup::DedupOptions;
use crate::fingerprint::Fingerprint;

/// Solana cluster a context pays on.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SolanaCluster {
    /// Mainnet beta.
    #[default]
    MainnetBeta,
    /// Devnet.
    Devnet,
    /// Testnet.
    Testnet,
    /// A local validator.
    Localnet,
}

impl SolanaCluster {
    /// Returns the kebab-case name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::MainnetBeta => "mainnet-beta",
            Self::Devnet => "devnet",
            Self::Testnet => "testnet",
            Self::Localnet => "localnet",
        }
    }
}

impl std::fmt::Display for SolanaCluster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Click and request deduplication timings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DedupSettings {
    /// Minimum delay between two permitted invocations.
    #[serde(default = "default_cooldown_ms")]
    pub cooldown_ms: u64,
    /// Window during which callers share an in-flight or fresh result.
    /// Zero disables sharing.
    #[serde(default)]
    pub deduplication_window_ms: u64,
}

const fn default_cooldown_ms() -> u64 {
    200
}

impl Default for DedupSettings {
    fn default() -> Self {
        Self {
            cooldown_ms: default_cooldown_ms(),
            deduplication_window_ms: 0,
        }
    }
}

impl From<DedupSettings> for DedupOptions {
    fn from(value: DedupSettings) -> Self {
        Self::new(
            Duration::from_millis(value.cooldown_ms),
            Duration::from_millis(value.deduplication_window_ms),
        )
    }
}

/// Top-level payment configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentConfig {
    /// Base URL of the paywall server.
    #[serde(default)]
    pub server_url: String,

    /// Stripe publishable key (`pk_live_...` / `pk_test_...`). Card payments
    /// are unavailable without it.
    #[serde(default)]
    pub stripe_public_key: Option<String>,

    /// Solana cluster (default: mainnet-beta).
    #[serde(default)]
    pub solana_cluster: SolanaCluster,

    /// Custom Solana RPC endpoint; the cluster's public endpoint is used otherwise.
    #[serde(default)]
    pub solana_endpoint: Option<String>,

    /// Tenant identifier for multi-tenant hosts.
    #[serde(default)]
    pub tenant_id: Option<String>,

    /// UI theme name. Behavior only.
    #[serde(default)]
    pub theme: Option<String>,

    /// UI locale (default: `en`). Behavior only.
    #[serde(default = "default_locale")]
    pub locale: String,

    /// Log level hint for embedding applications. Behavior only.
    #[serde(default)]
    pub log_level: Option<String>,

    /// Deduplication timings. Behavior only.
    #[serde(default)]
    pub dedup: DedupSettings,

    /// Per-request HTTP timeout in milliseconds.
    #[serde(default)]
    pub request_timeout_ms: Option<u64>,

    /// Check subscription status on mount when a wallet is already connected.
    #[serde(default)]
    pub auto_check_subscription: bool,
}

fn default_locale() -> String {
    "en".to_owned()
}

/// Errors produced while loading or validating a [`PaymentConfig`].
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The configuration file exists but could not be read.
    #[error("failed to read config file {path}: {source}")]
    Read {
        /// File path.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// The file is not valid TOML for [`PaymentConfig`].
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    /// `serverUrl` is empty.
    #[error("server URL is required")]
    MissingServerUrl,
    /// `serverUrl` or `solanaEndpoint` is not an absolute URL.
    #[error("invalid URL for {field}: {source}")]
    InvalidUrl {
        /// Offending field.
        field: &'static str,
        /// Parse error.
        #[source]
        source: url::ParseError,
    },
    /// The Stripe key is not a publishable key.
    #[error("stripe public key must start with `pk_`")]
    InvalidStripeKey,
}

impl PaymentConfig {
    /// Creates a configuration with the given server URL and default behavior.
    pub fn new(server_url: impl Into<String>) -> Self {
        Self {
            server_url: server_url.into(),
            stripe_public_key: None,
            solana_cluster: SolanaCluster::default(),
            solana_endpoint: None,
            tenant_id: None,
            theme: None,
            locale: default_locale(),
            log_level: None,
            dedup: DedupSettings::default(),
            request_timeout_ms: None,
            auto_check_subscription: false,
        }
    }

    /// Sets the Stripe publishable key.
    #[must_use]
    pub fn with_stripe_public_key(mut self, key: impl Into<String>) -> Self {
        self.stripe_public_key = Some(key.into());
        self
    }

    /// Sets the Solana cluster.
    #[must_use]
    pub const fn with_cluster(mut self, cluster: SolanaCluster) -> Self {
        self.solana_cluster = cluster;
        self
    }

    /// Sets a custom Solana RPC endpoint.
    #[must_use]
    pub fn with_solana_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.solana_endpoint = Some(endpoint.into());
        self
    }

    /// Sets the tenant id.
    #[must_use]
    pub fn with_tenant_id(mut self, tenant_id: impl Into<String>) -> Self {
        self.tenant_id = Some(tenant_id.into());
        self
    }

    /// Sets the theme.
    #[must_use]
    pub fn with_theme(mut self, theme: impl Into<String>) -> Self {
        self.theme = Some(theme.into());
        self
    }

    /// Sets the locale.
    #[must_use]
    pub fn with_locale(mut self, locale: impl Into<String>) -> Self {
        self.locale = locale.into();
        self
    }

    /// Sets the dedup timings.
    #[must_use]
    pub const fn with_dedup(mut self, dedup: DedupSettings) -> Self {
        self.dedup = dedup;
        self
    }

    /// Sets the per-request timeout.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout_ms = Some(timeout.as_millis() as u64);
        self
    }

    /// Enables or disables the automatic subscription check.
    #[must_use]
    pub const fn with_auto_check_subscription(mut self, enabled: bool) -> Self {
        self.auto_check_subscription = enabled;
        self
    }

    /// Returns the cache key of the identity subset.
    #[must_use]
    pub fn fingerprint(&self) -> Fingerprint {
        Fingerprint::of(self)
    }

    /// Returns the request timeout, if configured.
    #[must_use]
    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_ms.map(Duration::from_millis)
    }

    /// Returns the dedup options derived from [`Self::dedup`].
    #[must_use]
    pub fn dedup_options(&self) -> DedupOptions {
        self.dedup.into()
    }

    /// Parses [`Self::server_url`].
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the URL is empty or malformed.
    pub fn server_url(&self) -> Result<Url, ConfigError> {
        let raw = self.server_url.trim();
        if raw.is_empty() {
            return Err(ConfigError::MissingServerUrl);
        }
        Url::parse(raw).map_err(|source| ConfigError::InvalidUrl {
            field: "serverUrl",
            source,
        })
    }

    /// Checks the identity fields for obvious mistakes.
    ///
    /// # Errors
    ///
    /// Returns the first [`ConfigError`] found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.server_url()?;
        if let Some(endpoint) = &self.solana_endpoint {
            Url::parse(endpoint).map_err(|source| ConfigError::InvalidUrl {
                field: "solanaEndpoint",
                source,
            })?;
        }
        if let Some(key) = &self.stripe_public_key
            && !key.starts_with("pk_")
        {
            return Err(ConfigError::InvalidStripeKey);
        }
        Ok(())
    }

    /// Loads configuration from the path in `PAYMUX_CONFIG`, falling back to
    /// `paymux.toml` in the current directory.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the file cannot be read, parsed or validated.
    pub fn load() -> Result<Self, ConfigError> {
        let path = std::env::var("PAYMUX_CONFIG").unwrap_or_else(|_| "paymux.toml".to_owned());
        Self::load_from(path)
    }

    /// Loads configuration from a specific file path.
    ///
    /// A missing file is treated as empty, so `PAYMUX_SERVER_URL` alone is
    /// enough to produce a valid configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the file cannot be read, parsed or validated.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = if path.exists() {
            std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
                path: path.to_path_buf(),
                source,
            })?
        } else {
            String::new()
        };

        let mut config: Self = toml::from_str(&expand_env_vars(&content))?;

        if let Ok(server_url) = std::env::var("PAYMUX_SERVER_URL")
            && !server_url.is_empty()
        {
            config.server_url = server_url;
        }

        config.validate()?;

        #[cfg(feature = "telemetry")]
        tracing::debug!(
            path = %path.display(),
            cluster = %config.solana_cluster,
            "loaded payment config"
        );

        Ok(config)
    }
}

/// Expands `$VAR` and `${VAR}` references from the process environment.
/// Unresolved references are kept verbatim.
fn expand_env_vars(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch != '$' {
            out.push(ch);
            continue;
        }
        let braced = chars.next_if_eq(&'{').is_some();
        let mut name = String::new();
        let mut closed = false;
        while let Some(&c) = chars.peek() {
            if braced && c == '}' {
                chars.next();
                closed = true;
                break;
            }
            if !braced && !(c.is_ascii_alphanumeric() || c == '_') {
                break;
            }
            name.push(c);
            chars.next();
        }

        match std::env::var(&name) {
            Ok(value) if !name.is_empty() => out.push_str(&value),
            _ => {
                out.push('$');
                if braced {
                    out.push('{');
                }
                out.push_str(&name);
                if closed {
                    out.push('}');
                }
            }
        }
    }

    out
}
