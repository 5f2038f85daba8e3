//! Command-line interface definition.

use clap::{Args, Parser, Subcommand, ValueEnum};
use soulmarket::config::ClientConfig;
use soulmarket::TransferMethod;
use std::path::PathBuf;

/// Buyer-side client for the soulmarket pay-per-request marketplace.
#[derive(Parser, Debug)]
#[command(name = "soulmarket")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Marketplace API base URL.
    #[arg(long, env = "SOULMARKET_API_BASE_URL", global = true)]
    pub api_base_url: Option<String>,

    /// JSON-RPC endpoint for settlement verification.
    #[arg(long, env = "SOULMARKET_RPC_URL", global = true)]
    pub rpc_url: Option<String>,

    /// Chain id settlements must be on.
    #[arg(long, env = "SOULMARKET_CHAIN_ID", global = true)]
    pub chain_id: Option<u64>,

    /// Seller every payment must go to.
    #[arg(long, env = "SOULMARKET_EXPECTED_SELLER", global = true)]
    pub expected_seller: Option<String>,

    /// Preferred transfer method.
    #[arg(long, value_enum, env = "SOULMARKET_TRANSFER_METHOD", global = true)]
    pub transfer_method: Option<CliTransferMethod>,

    /// Directory holding the entitlement store.
    #[arg(long, env = "SOULMARKET_DATA_DIR", global = true)]
    pub data_dir: Option<PathBuf>,

    /// Log level.
    #[arg(long, default_value = "info", env = "RUST_LOG", global = true)]
    pub log_level: String,

    /// Path to configuration file.
    #[arg(long, short, global = true)]
    pub config: Option<PathBuf>,

    /// What to do.
    #[command(subcommand)]
    pub command: Command,
}

/// Subcommands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Print the challenge message a wallet would sign.
    Challenge(ChallengeArgs),
    /// Verify a settlement transaction against the configured chain.
    Verify(VerifyArgs),
    /// Select a payment requirement from a server offer.
    Select(SelectArgs),
    /// List stored entitlements for a wallet.
    Receipts {
        /// Wallet address.
        #[arg(long)]
        wallet: String,
    },
    /// Write the effective configuration as TOML.
    Config {
        /// Output file; stdout when omitted.
        #[arg(long, short)]
        output: Option<PathBuf>,
    },
}

/// Arguments for `challenge`.
#[derive(Args, Debug)]
pub struct ChallengeArgs {
    /// Wallet address.
    #[arg(long)]
    pub wallet: String,

    /// Action being authorised.
    #[arg(long, default_value = "session")]
    pub action: String,

    /// Named scope.
    #[arg(long, conflicts_with = "soul", default_value = "session")]
    pub scope: String,

    /// Asset id, for an asset-scoped challenge.
    #[arg(long)]
    pub soul: Option<String>,

    /// Timestamp in milliseconds; now when omitted.
    #[arg(long)]
    pub timestamp_ms: Option<i64>,
}

/// Arguments for `verify`.
#[derive(Args, Debug)]
pub struct VerifyArgs {
    /// Settlement transaction hash.
    #[arg(long)]
    pub tx: String,

    /// Token contract.
    #[arg(long)]
    pub token: Option<String>,

    /// Expected recipient.
    #[arg(long)]
    pub pay_to: Option<String>,

    /// Expected payer.
    #[arg(long)]
    pub payer: Option<String>,

    /// Minimum amount in smallest units.
    #[arg(long)]
    pub amount: Option<String>,

    /// Network the settlement claims.
    #[arg(long)]
    pub network: Option<String>,
}

/// Arguments for `select`.
#[derive(Args, Debug)]
pub struct SelectArgs {
    /// JSON file holding a 402 body (`{"accepts": [...]}`) or a bare offer list.
    #[arg(long, conflicts_with = "header", required_unless_present = "header")]
    pub offers: Option<PathBuf>,

    /// Base64 `PAYMENT-REQUIRED` header value.
    #[arg(long)]
    pub header: Option<String>,
}

/// Transfer method CLI enum.
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum CliTransferMethod {
    /// ERC-3009 transfer with authorization.
    Eip3009,
    /// Permit2 signature transfer.
    Permit2,
}

impl From<CliTransferMethod> for TransferMethod {
    fn from(m: CliTransferMethod) -> Self {
        match m {
            CliTransferMethod::Eip3009 => TransferMethod::Eip3009,
            CliTransferMethod::Permit2 => TransferMethod::Permit2,
        }
    }
}

impl Cli {
    /// Effective configuration: the file (if any), then CLI overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if a config file is specified but cannot be loaded, or
    /// the merged configuration is invalid.
    pub fn to_config(&self) -> color_eyre::Result<ClientConfig> {
        let mut config = if let Some(ref path) = self.config {
            ClientConfig::from_file(path)?
        } else {
            ClientConfig::default()
        };

        if let Some(url) = &self.api_base_url {
            config.api_base_url.clone_from(url);
        }
        if let Some(url) = &self.rpc_url {
            config.rpc_url.clone_from(url);
        }
        if let Some(chain_id) = self.chain_id {
            config.chain_id = chain_id;
        }
        if let Some(seller) = &self.expected_seller {
            config.expected_seller = Some(seller.clone());
        }
        if let Some(method) = self.transfer_method {
            config.preferred_transfer_method = method.into();
        }
        if let Some(dir) = &self.data_dir {
            config.data_dir.clone_from(dir);
        }
        config.log_level.clone_from(&self.log_level);

        config.validate()?;
        Ok(config)
    }
}
