//! Command Line Interface for the constant-product AMM client.
use anyhow::{Result, bail};
use clap::{Parser, Subcommand};
use cpamm_data::{FileStore, KeyValueStore, MemoryStore};
use cpamm_domain::{
    SlippageTolerance, SlippageWarning, TokenDescriptor, U256, format_compact,
    format_units, my_pools, parse_address, parse_units, pool_stats, to_hex,
};
use cpamm_execution::prelude::*;
use cpamm_protocols::{ContractAddresses, JsonRpcNode, LedgerNode};
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

mod demo;

#[derive(Parser)]
#[command(name = "cpamm")]
#[command(
    about = "Quote, swap and provide liquidity on a constant-product exchange",
    long_about = None
)]
struct Cli {
    /// JSON-RPC endpoint of the node
    #[arg(long, env = "CPAMM_RPC_URL")]
    rpc_url: Option<String>,

    /// Chain id, selects the built-in contract addresses
    #[arg(long, env = "CPAMM_CHAIN_ID")]
    chain_id: Option<u64>,

    /// Account that signs transactions (must be unlocked on the node)
    #[arg(long, env = "CPAMM_ACCOUNT")]
    account: Option<String>,

    /// Run against a seeded in-memory exchange instead of a node
    #[arg(long)]
    demo: bool,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check the node and the exchange deployment
    Diagnose,
    /// List built-in and custom tokens
    Tokens,
    /// Add a custom token by contract address
    AddToken { address: String },
    /// Remove a custom token
    RemoveToken { address: String },
    /// List pools
    Pools {
        /// Number of pools to load
        #[arg(short, long)]
        limit: Option<u64>,

        /// Only pools where the account holds liquidity
        #[arg(long)]
        mine: bool,
    },
    /// Quote a swap
    Quote {
        /// Amount to sell, in token units (e.g. 1.5)
        amount: String,
        /// Token to sell (symbol or address)
        from: String,
        /// Token to buy (symbol or address)
        to: String,
    },
    /// Swap an exact input amount
    Swap {
        amount: String,
        from: String,
        to: String,

        /// Slippage tolerance in percent
        #[arg(short, long)]
        slippage: Option<Decimal>,

        /// Approve the router first if the allowance is too low
        #[arg(long)]
        approve: bool,
    },
    /// Deposit two tokens into a pool
    AddLiquidity {
        token_a: String,
        amount_a: String,
        token_b: String,

        /// Amount of token B; derived from the pool ratio when omitted
        #[arg(long)]
        amount_b: Option<String>,

        #[arg(short, long)]
        slippage: Option<Decimal>,

        #[arg(long)]
        approve: bool,
    },
    /// Withdraw a share of the account's liquidity
    RemoveLiquidity {
        token_a: String,
        token_b: String,

        /// Percent of the position to withdraw
        #[arg(short, long, default_value_t = 100)]
        percent: u8,

        #[arg(short, long)]
        slippage: Option<Decimal>,

        #[arg(long)]
        approve: bool,
    },
    /// Let the router spend a token
    Approve {
        token: String,

        /// Amount in token units; unlimited when omitted
        #[arg(long)]
        amount: Option<String>,
    },
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)),
        )
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let mut config = ClientConfig::from_env()?;
    if let Some(url) = cli.rpc_url {
        config.rpc_url = url;
    }
    if let Some(chain_id) = cli.chain_id {
        config.chain_id = chain_id;
        config.contracts = ContractAddresses::from_env(chain_id)?;
    }
    let mut account = cli.account.as_deref().map(parse_address).transpose()?;

    let node: Arc<dyn LedgerNode> = if cli.demo {
        let demo_account = match account {
            Some(account) => account,
            None => parse_address(demo::DEMO_ACCOUNT)?,
        };
        account = Some(demo_account);
        let ledger = demo::ledger(demo_account)?;
        config.contracts = ledger.contracts().clone();
        println!("🧪 Demo mode: in-memory exchange, account {}", to_hex(&demo_account));
        Arc::new(ledger)
    } else {
        Arc::new(JsonRpcNode::new(&config.rpc_url)?)
    };

    let store: Arc<dyn KeyValueStore> = match &config.store_path {
        Some(path) => Arc::new(FileStore::new(path)),
        None => Arc::new(MemoryStore::new()),
    };
    let session = ClientSession::connect(
        node,
        config.contracts.clone(),
        config.trading.clone(),
        store,
        account,
    )
    .await?;

    let result = run(&session, cli.command).await;
    session.shutdown().await;
    result
}

async fn run(session: &ClientSession, command: Commands) -> Result<()> {
    match command {
        Commands::Diagnose => diagnose(session).await,
        Commands::Tokens => {
            let tokens = session.tokens().await?;
            println!("{:<8} | {:<42} | {:>8} | {}", "Symbol", "Address", "Decimals", "Name");
            println!("{}", "-".repeat(80));
            for token in tokens {
                let marker = if token.is_user_added { " (custom)" } else { "" };
                println!(
                    "{:<8} | {:<42} | {:>8} | {}{}",
                    token.symbol,
                    to_hex(&token.address),
                    token.decimals,
                    token.name,
                    marker
                );
            }
            Ok(())
        }
        Commands::AddToken { address } => {
            let token = session.add_custom_token(&address).await?;
            println!("✅ Added {} ({}, {} decimals)", token.symbol, token.name, token.decimals);
            Ok(())
        }
        Commands::RemoveToken { address } => {
            if session.remove_custom_token(&address).await? {
                println!("✅ Removed {address}");
            } else {
                println!("ℹ️  {address} is not a custom token");
            }
            Ok(())
        }
        Commands::Pools { limit, mine } => {
            let limit = limit.unwrap_or(session.trading().page_size as u64);
            pools(session, limit, mine).await
        }
        Commands::Quote { amount, from, to } => {
            let token_in = session.find_token(&from).await?;
            let token_out = session.find_token(&to).await?;
            let amount_in = parse_units(&amount, token_in.decimals)?;
            let quote = quote(session, &token_in, &token_out, amount_in).await?;
            print_quote(session, &quote, &token_in, &token_out, None).await;
            Ok(())
        }
        Commands::Swap {
            amount,
            from,
            to,
            slippage,
            approve,
        } => {
            let token_in = session.find_token(&from).await?;
            let token_out = session.find_token(&to).await?;
            let amount_in = parse_units(&amount, token_in.decimals)?;
            let slippage = slippage_from(session, slippage)?;
            ensure_approved(session, &token_in, amount_in, approve).await?;

            let quote = quote(session, &token_in, &token_out, amount_in).await?;
            print_quote(session, &quote, &token_in, &token_out, Some(slippage)).await;
            let confirmation = session
                .orchestrator()
                .submit_swap(SwapRequest {
                    token_in: token_in.address,
                    token_out: token_out.address,
                    quote,
                    slippage,
                    recipient: None,
                })
                .await?;
            print_confirmation(&confirmation);
            Ok(())
        }
        Commands::AddLiquidity {
            token_a,
            amount_a,
            token_b,
            amount_b,
            slippage,
            approve,
        } => {
            let token_a = session.find_token(&token_a).await?;
            let token_b = session.find_token(&token_b).await?;
            let amount_a = parse_units(&amount_a, token_a.decimals)?;
            let amount_b = match amount_b {
                Some(text) => parse_units(&text, token_b.decimals)?,
                None => match session
                    .quotes()
                    .counter_amount(token_a.address, token_b.address, amount_a)
                    .await?
                {
                    Some(amount) => amount,
                    None => bail!("no pool yet: pass --amount-b to set the initial price"),
                },
            };
            let slippage = slippage_from(session, slippage)?;
            ensure_approved(session, &token_a, amount_a, approve).await?;
            ensure_approved(session, &token_b, amount_b, approve).await?;

            println!(
                "💧 Depositing {} {} + {} {}",
                format_units(amount_a, token_a.decimals),
                token_a.symbol,
                format_units(amount_b, token_b.decimals),
                token_b.symbol
            );
            let confirmation = session
                .orchestrator()
                .submit_add_liquidity(AddLiquidityRequest {
                    token_a: token_a.address,
                    token_b: token_b.address,
                    amount_a,
                    amount_b,
                    slippage,
                    recipient: None,
                })
                .await?;
            print_confirmation(&confirmation);
            Ok(())
        }
        Commands::RemoveLiquidity {
            token_a,
            token_b,
            percent,
            slippage,
            approve,
        } => {
            let token_a = session.find_token(&token_a).await?;
            let token_b = session.find_token(&token_b).await?;
            let request = RemoveLiquidityRequest {
                token_a: token_a.address,
                token_b: token_b.address,
                amount: RemoveAmount::Percent(percent),
                slippage: slippage_from(session, slippage)?,
                recipient: None,
            };
            let orchestrator = session.orchestrator();
            let preview = orchestrator.preview_remove_liquidity(&request).await?;
            println!(
                "💧 Burning {} of {} liquidity for ~{} {} + ~{} {}",
                format_units(preview.liquidity, 18),
                format_units(preview.balance, 18),
                format_units(preview.amount_a, token_a.decimals),
                token_a.symbol,
                format_units(preview.amount_b, token_b.decimals),
                token_b.symbol
            );
            let pair_token = TokenDescriptor::new(preview.pair, "UNI-V2", "Liquidity", 18);
            ensure_approved(session, &pair_token, preview.liquidity, approve).await?;

            let confirmation = orchestrator.submit_remove_liquidity(request).await?;
            print_confirmation(&confirmation);
            Ok(())
        }
        Commands::Approve { token, amount } => {
            let token = session.find_token(&token).await?;
            let amount = match amount {
                Some(text) => ApprovalAmount::Exact(parse_units(&text, token.decimals)?),
                None => ApprovalAmount::Unlimited,
            };
            let confirmation = session.orchestrator().approve(token.address, amount).await?;
            println!("✅ Router approved for {}", token.symbol);
            print_confirmation(&confirmation);
            Ok(())
        }
    }
}

async fn diagnose(session: &ClientSession) -> Result<()> {
    let report = session.diagnose().await;
    let mark = |ok: bool| if ok { "✅" } else { "❌" };
    let contracts = session.contracts();
    println!("🔍 Node diagnostics");
    println!(
        "{} chain id: {} (expected {})",
        mark(report.chain_id == Some(report.expected_chain_id)),
        report.chain_id.map_or("unknown".to_string(), |id| id.to_string()),
        report.expected_chain_id
    );
    println!(
        "{} block number: {}",
        mark(report.block_number.is_some()),
        report.block_number.map_or("unknown".to_string(), |n| n.to_string())
    );
    println!("{} factory {}", mark(report.factory_deployed), to_hex(&contracts.factory));
    println!("{} router {}", mark(report.router_deployed), to_hex(&contracts.router));
    println!("{} wrapped native {}", mark(report.weth_deployed), to_hex(&contracts.weth));
    if let Some(count) = report.pool_count {
        println!("ℹ️  {count} pools");
    }
    for error in &report.errors {
        println!("⚠️  {error}");
    }
    if !report.is_healthy() {
        bail!("diagnostics failed");
    }
    Ok(())
}

async fn pools(session: &ClientSession, limit: u64, mine: bool) -> Result<()> {
    let listing = session.pools(limit).await?.newest_first();
    if listing.loading {
        bail!("pool addresses could not be loaded, try again");
    }
    let views = session.pool_views(&listing);
    let shown = if mine {
        my_pools(&views)
    } else {
        views.iter().collect()
    };

    println!(
        "{:<14} | {:>22} | {:>22} | {:>8} | {:>10}",
        "Pair", "Reserve A", "Reserve B", "Share", "Est. Value"
    );
    println!("{}", "-".repeat(88));
    for view in &shown {
        println!(
            "{:<14} | {:>22} | {:>22} | {:>7}% | {:>10}",
            view.pair_label(),
            view.reserve_a,
            view.reserve_b,
            view.share_percent(),
            format!("${}", format_compact(view.estimated_value))
        );
    }

    let stats = pool_stats(&views);
    println!(
        "📊 {} of {} pools loaded, {} with a position, TVL ~${}, yours ~${}",
        stats.pool_count,
        listing.total_pools,
        stats.active_pools,
        format_compact(stats.total_value),
        format_compact(stats.caller_value)
    );
    if !listing.excluded.is_empty() {
        println!("⚠️  {} pools could not be read", listing.excluded.len());
    }
    if listing.has_more() {
        println!("ℹ️  more pools available, raise --limit");
    }
    Ok(())
}

async fn quote(
    session: &ClientSession,
    token_in: &TokenDescriptor,
    token_out: &TokenDescriptor,
    amount_in: U256,
) -> Result<QuoteResult> {
    let engine = session.quotes();
    let path = engine.route(token_in.address, token_out.address).await?;
    Ok(engine.quote(amount_in, &path).await?)
}

async fn print_quote(
    session: &ClientSession,
    quote: &QuoteResult,
    token_in: &TokenDescriptor,
    token_out: &TokenDescriptor,
    slippage: Option<SlippageTolerance>,
) {
    let mut hops = Vec::new();
    for address in quote.path.tokens() {
        let label = match session.resolver().cached(address).await {
            Some(token) => token.symbol,
            None => to_hex(address),
        };
        hops.push(label);
    }
    println!("🔀 Route: {}", hops.join(" → "));
    println!(
        "💱 {} {} → {} {}",
        format_units(quote.amount_in(), token_in.decimals),
        token_in.symbol,
        format_units(quote.amount_out(), token_out.decimals),
        token_out.symbol
    );
    if let Some(slippage) = slippage {
        println!(
            "🛡️  Minimum received at {}% slippage: {} {}",
            slippage.as_percent(),
            format_units(slippage.minimum_output(quote.amount_out()), token_out.decimals),
            token_out.symbol
        );
    }
}

fn slippage_from(session: &ClientSession, percent: Option<Decimal>) -> Result<SlippageTolerance> {
    let trading = session.trading();
    let slippage = match percent {
        Some(percent) => SlippageTolerance::from_percent(percent, &trading.slippage_bounds)?,
        None => trading.default_slippage()?,
    };
    match slippage.warning() {
        SlippageWarning::None => {}
        SlippageWarning::Low => println!("⚠️  Low slippage: the transaction may fail"),
        SlippageWarning::High | SlippageWarning::Extreme => {
            println!("⚠️  High slippage: you may receive much less than quoted")
        }
    }
    Ok(slippage)
}

async fn ensure_approved(
    session: &ClientSession,
    token: &TokenDescriptor,
    amount: U256,
    approve: bool,
) -> Result<()> {
    let orchestrator = session.orchestrator();
    match orchestrator.approval_state(token.address, amount).await? {
        ApprovalState::NotRequired | ApprovalState::Sufficient { .. } => Ok(()),
        ApprovalState::Pending => bail!("an approval for {} is still pending", token.symbol),
        ApprovalState::Required { allowance, .. } => {
            if !approve {
                bail!(
                    "router may spend {} {}; rerun with --approve",
                    format_units(allowance, token.decimals),
                    token.symbol
                );
            }
            println!("🔓 Approving {} for the router...", token.symbol);
            let confirmation = orchestrator
                .approve(token.address, ApprovalAmount::Exact(amount))
                .await?;
            print_confirmation(&confirmation);
            Ok(())
        }
    }
}

fn print_confirmation(confirmation: &Confirmation) {
    println!(
        "✅ {} confirmed in block {} ({:?})",
        confirmation.key.kind, confirmation.block_number, confirmation.hash
    );
}
