//! Configuration for the soulmarket client.

use crate::payment::TransferMethod;
use crate::wallet::{normalize_address, SupportedChain};
use alloy_primitives::Address;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// File name of the entitlement store inside `data_dir`.
pub const ENTITLEMENTS_FILE: &str = "entitlements.json";

/// Client configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Marketplace API base, without a trailing slash.
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,

    /// JSON-RPC endpoint used for settlement verification.
    #[serde(default = "default_rpc_url")]
    pub rpc_url: String,

    /// The single chain settlements are accepted on.
    #[serde(default = "default_chain_id")]
    pub chain_id: u64,

    /// Domain shown in challenge messages.
    #[serde(default = "default_domain")]
    pub domain: String,

    /// URI shown in challenge messages.
    #[serde(default = "default_uri")]
    pub uri: String,

    /// Transfer method to ask for.
    #[serde(default)]
    pub preferred_transfer_method: TransferMethod,

    /// Seller every payment must go to. Unset disables the recipient check.
    #[serde(default)]
    pub expected_seller: Option<String>,

    /// Ceiling for API requests.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Ceiling for RPC receipt lookups.
    #[serde(default = "default_rpc_timeout")]
    pub rpc_timeout_secs: u64,

    /// Session lifetime assumed when the server does not report one.
    #[serde(default = "default_session_ttl")]
    pub session_ttl_secs: u64,

    /// Directory holding the entitlement store.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Log level.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_base_url: default_api_base_url(),
            rpc_url: default_rpc_url(),
            chain_id: default_chain_id(),
            domain: default_domain(),
            uri: default_uri(),
            preferred_transfer_method: TransferMethod::default(),
            expected_seller: None,
            request_timeout_secs: default_request_timeout(),
            rpc_timeout_secs: default_rpc_timeout(),
            session_ttl_secs: default_session_ttl(),
            data_dir: default_data_dir(),
            log_level: default_log_level(),
        }
    }
}

fn default_api_base_url() -> String {
    "http://127.0.0.1:3000/api".to_string()
}

fn default_rpc_url() -> String {
    "https://mainnet.base.org".to_string()
}

const fn default_chain_id() -> u64 {
    8453 // Base mainnet
}

fn default_domain() -> String {
    "soulmarket.local".to_string()
}

fn default_uri() -> String {
    "http://127.0.0.1:3000".to_string()
}

const fn default_request_timeout() -> u64 {
    30
}

const fn default_rpc_timeout() -> u64 {
    20
}

const fn default_session_ttl() -> u64 {
    600
}

fn default_data_dir() -> PathBuf {
    directories::ProjectDirs::from("", "", "soulmarket")
        .map(|dirs| dirs.data_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from(".soulmarket"))
}

fn default_log_level() -> String {
    "info".to_string()
}

impl ClientConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed, or if it names an
    /// invalid seller address.
    pub fn from_file(path: &Path) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self =
            toml::from_str(&content).map_err(|e| crate::Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn to_file(&self, path: &Path) -> crate::Result<()> {
        let content =
            toml::to_string_pretty(self).map_err(|e| crate::Error::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Reject values that would only fail later, mid-purchase.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Config`] describing the first bad field.
    pub fn validate(&self) -> crate::Result<()> {
        if let Some(seller) = &self.expected_seller {
            if normalize_address(seller).is_none() {
                return Err(crate::Error::Config(format!(
                    "expected_seller is not an address: {seller}"
                )));
            }
        }
        if self.chain_id == 0 {
            return Err(crate::Error::Config("chain_id must be non-zero".into()));
        }
        if self.request_timeout_secs == 0 || self.rpc_timeout_secs == 0 {
            return Err(crate::Error::Config("timeouts must be non-zero".into()));
        }
        Ok(())
    }

    /// The expected seller, parsed.
    #[must_use]
    pub fn expected_seller_address(&self) -> Option<Address> {
        self.expected_seller.as_deref().and_then(normalize_address)
    }

    /// The supported chain.
    #[must_use]
    pub fn chain(&self) -> SupportedChain {
        SupportedChain::new(self.chain_id)
    }

    /// API request ceiling.
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// RPC lookup ceiling.
    #[must_use]
    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_secs(self.rpc_timeout_secs)
    }

    /// Fallback session lifetime in milliseconds.
    #[must_use]
    pub fn session_ttl_ms(&self) -> i64 {
        i64::try_from(self.session_ttl_secs.saturating_mul(1000)).unwrap_or(i64::MAX)
    }

    /// Path of the entitlement store file.
    #[must_use]
    pub fn entitlements_path(&self) -> PathBuf {
        self.data_dir.join(ENTITLEMENTS_FILE)
    }
}
