//! soulmarket CLI entry point.

mod cli;

use alloy_primitives::U256;
use clap::Parser;
use cli::{ChallengeArgs, Cli, Command, SelectArgs, VerifyArgs};
use color_eyre::eyre::eyre;
use soulmarket::payment::decode_header;
use soulmarket::settlement::ProviderCache;
use soulmarket::wallet::{normalize_address, parse_address};
use soulmarket::{
    ChallengeMessageBuilder, ChallengeScope, ClientConfig, EntitlementStore, PaymentRequired,
    PaymentRequirement, PaymentRequirementSelector, SettlementExpectation, SettlementVerifier,
};
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;

    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&cli.log_level));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    info!("soulmarket v{}", env!("CARGO_PKG_VERSION"));

    let config = cli.to_config()?;

    match cli.command {
        Command::Challenge(args) => challenge(&config, args)?,
        Command::Verify(args) => verify(&config, args).await?,
        Command::Select(args) => select(&config, args)?,
        Command::Receipts { wallet } => receipts(&config, &wallet)?,
        Command::Config { output } => match output {
            Some(path) => {
                config.to_file(&path)?;
                info!("Wrote configuration to {}", path.display());
            }
            None => print!("{}", toml::to_string_pretty(&config)?),
        },
    }

    Ok(())
}

fn challenge(config: &ClientConfig, args: ChallengeArgs) -> color_eyre::Result<()> {
    let wallet = parse_address(&args.wallet)?;
    let scope = match args.soul {
        Some(soul) => ChallengeScope::Soul(soul),
        None => ChallengeScope::Scope(args.scope),
    };
    let timestamp_ms = args
        .timestamp_ms
        .unwrap_or_else(|| chrono::Utc::now().timestamp_millis());

    let builder = ChallengeMessageBuilder::new(&config.domain, &config.uri, config.chain_id);
    let message = builder.build(&wallet, &scope, &args.action, timestamp_ms)?;

    println!("{}", message.text);
    eprintln!("nonce={} timestamp_ms={}", message.nonce, message.timestamp_ms);
    Ok(())
}

async fn verify(config: &ClientConfig, args: VerifyArgs) -> color_eyre::Result<()> {
    let optional_address = |value: Option<String>| -> color_eyre::Result<_> {
        value.as_deref().map(parse_address).transpose().map_err(Into::into)
    };
    let amount = args
        .amount
        .as_deref()
        .map(|a| U256::from_str_radix(a, 10))
        .transpose()
        .map_err(|e| eyre!("invalid amount: {e}"))?;

    let expected = SettlementExpectation {
        token: optional_address(args.token)?,
        pay_to: optional_address(args.pay_to)?,
        payer: optional_address(args.payer)?,
        amount,
        network: args.network,
    };

    let verifier = SettlementVerifier::from_config(config, &ProviderCache::new());
    let result = verifier.verify(&args.tx, &expected).await?;

    println!("{}", serde_json::to_string_pretty(&result)?);
    if result.verified {
        Ok(())
    } else if result.is_pending() {
        Err(eyre!("pending confirmation: receipt not found yet"))
    } else {
        Err(eyre!(
            "settlement not verified: {}",
            result.reason.unwrap_or_default()
        ))
    }
}

fn select(config: &ClientConfig, args: SelectArgs) -> color_eyre::Result<()> {
    let accepts: Vec<PaymentRequirement> = match (args.header, args.offers) {
        (Some(header), _) => decode_header::<PaymentRequired>(&header)?.accepts,
        (None, Some(path)) => {
            let raw = std::fs::read(&path)?;
            match serde_json::from_slice::<PaymentRequired>(&raw) {
                Ok(required) => required.accepts,
                Err(_) => serde_json::from_slice(&raw)?,
            }
        }
        (None, None) => return Err(eyre!("either --offers or --header is required")),
    };

    let selector = PaymentRequirementSelector::new(
        config.expected_seller_address(),
        config.preferred_transfer_method,
    )
    .with_chain(config.chain());
    let selected = selector.select(&accepts).map_err(|e| {
        let message = e.user_message();
        color_eyre::Report::new(e).wrap_err(message)
    })?;

    println!("{}", serde_json::to_string_pretty(selected)?);
    Ok(())
}

fn receipts(config: &ClientConfig, wallet: &str) -> color_eyre::Result<()> {
    let wallet = normalize_address(wallet).ok_or_else(|| eyre!("invalid wallet address"))?;
    let store = EntitlementStore::load(&config.entitlements_path())?;

    let owned = store.owned_assets(&wallet);
    for asset in store.receipt_assets(&wallet) {
        let marker = if owned.contains(&asset) { "owned" } else { "receipt" };
        println!("{asset}\t{marker}");
    }
    for asset in owned
        .iter()
        .filter(|a| store.receipt(&wallet, a).is_none())
    {
        println!("{asset}\towned (no receipt)");
    }
    Ok(())
}
