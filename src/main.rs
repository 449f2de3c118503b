use alloy::primitives::utils::format_units;
use alloy::primitives::Address;
use clap::{Parser, Subcommand};
use eyre::{eyre, Result};
use std::sync::Arc;

use walletsync::config::Config;
use walletsync::models::chain::Chain;
use walletsync::models::token::{BalanceRefreshPolicy, Token, TokenBalance};
use walletsync::resolution::AvatarImage;
use walletsync::store::TokenStore;
use walletsync::utils::address::parse_address;
use walletsync::utils::app_context::AppContext;
use walletsync::utils::logger::setup_logger;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Resolve a name (ENS, Unstoppable, .bit) or address literal to an address
    Resolve { query: String },
    /// Find the verified name of an address
    Reverse { address: String },
    /// Run one token detection pass for a wallet on one chain
    Detect {
        #[arg(long)]
        wallet: String,
        #[arg(long, default_value_t = 1)]
        chain: u64,
    },
    /// Keep every enabled chain in sync and print the token list on each change
    Watch {
        #[arg(long)]
        wallet: String,
    },
}

fn wallet_address(value: &str) -> Result<Address> {
    parse_address(value).ok_or_else(|| eyre!("not a wallet address: {value}"))
}

fn describe_avatar(avatar: Option<&AvatarImage>) -> String {
    match avatar {
        Some(AvatarImage::Remote(url)) => url.to_string(),
        Some(AvatarImage::Blockie(blockie)) => format!("blockie {}", blockie.color),
        None => "none".to_string(),
    }
}

fn format_token(token: &Token) -> String {
    let balance = match &token.balance {
        TokenBalance::Fungible(value) => {
            format_units(*value, token.decimals).unwrap_or_else(|_| value.to_string())
        }
        TokenBalance::NonFungible(entries) => format!("{} items", entries.len()),
    };
    format!(
        "{:>6} {:<10} {:<16} {} {}",
        token.chain(),
        token.symbol,
        token.token_type.to_string(),
        token.contract(),
        balance
    )
}

async fn resolve(context: &AppContext, query: &str) -> Result<()> {
    let (address, avatar) = context.resolver.resolve_address(query).await?;
    println!("{query} -> {address} (avatar: {})", describe_avatar(avatar.as_ref()));
    Ok(())
}

async fn reverse(context: &AppContext, address: &str) -> Result<()> {
    let address = wallet_address(address)?;
    let (name, avatar) = context.resolver.resolve_name(address).await?;
    println!("{address} -> {name} (avatar: {})", describe_avatar(avatar.as_ref()));
    Ok(())
}

async fn detect(context: &AppContext, wallet: Address, chain: Chain) -> Result<()> {
    let store = Arc::new(TokenStore::new(wallet));
    let provider = context
        .source_factory()
        .create(context.session(wallet, chain), store.clone());

    store.bootstrap_native(chain);
    let detected = provider.detect_once().await;
    provider.refresh_balance(&BalanceRefreshPolicy::All).await;

    println!("{} new tokens on {}", detected.len(), chain.name());
    for token in provider.tokens() {
        println!("{}", format_token(&token));
    }
    Ok(())
}

async fn watch(context: &AppContext, wallet: Address) -> Result<()> {
    let service = context.tokens_service(wallet);
    service.start(context.sessions(wallet));
    let mut tokens = service.tokens_publisher();

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            changed = tokens.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = tokens.borrow_and_update().clone();
                println!("--- {} tokens", snapshot.len());
                for token in snapshot.iter() {
                    println!("{}", format_token(token));
                }
            }
        }
    }

    service.stop();
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env()?;
    setup_logger(config.log_level)?;

    let cli = Cli::parse();
    let context = AppContext::new(config)?;

    match cli.command {
        Commands::Resolve { query } => resolve(&context, &query).await?,
        Commands::Reverse { address } => reverse(&context, &address).await?,
        Commands::Detect { wallet, chain } => {
            detect(&context, wallet_address(&wallet)?, Chain::from(chain)).await?;
        }
        Commands::Watch { wallet } => watch(&context, wallet_address(&wallet)?).await?,
    }

    Ok(())
}
