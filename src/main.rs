//! Hedge Ratio Keeper - Main Entry Point
//!
//! Runs the rebalancing loop in paper mode against live Hyperliquid market
//! data, plus one-shot operator commands.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use hedge_ratio_keeper::config::{Config, TargetParams};
use hedge_ratio_keeper::exchange::{
    CachedPriceFeed, HyperliquidClient, PaperExchange, PRICE_CACHE_TTL,
};
use hedge_ratio_keeper::persistence::paper::PaperStore;
use hedge_ratio_keeper::persistence::StateStore;
use hedge_ratio_keeper::risk::{ComplianceReport, LeverageController};
use hedge_ratio_keeper::strategy::{PortfolioState, RebalanceDecision, RebalanceEngine, SnapshotBuilder};
use hedge_ratio_keeper::Trader;
use rust_decimal_macros::dec;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{info, warn, Level};
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::EnvFilter;

type PaperFeed = Arc<CachedPriceFeed<HyperliquidClient>>;
type PaperTrader = Trader<Arc<PaperExchange<PaperFeed>>, PaperFeed>;

/// Hedge Ratio Keeper CLI
#[derive(Parser)]
#[command(name = "hedge-ratio-keeper")]
#[command(version, about = "Keeps a core/hedge basket at a target margin ratio on Hyperliquid")]
struct Cli {
    /// Config file (defaults to ./config.{toml,json,yaml} when present)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the rebalancing loop (default)
    Run,

    /// Show portfolio state, leverage compliance and the pending decision
    Status {
        /// Read the configured Hyperliquid account instead of the paper account
        #[arg(long)]
        live: bool,
    },

    /// Close every open position
    CloseAll {
        /// Confirm the action
        #[arg(long)]
        yes: bool,
    },

    /// Rebalance now, ignoring the threshold
    Rebalance {
        /// Confirm the action
        #[arg(long)]
        yes: bool,
    },

    /// Leverage compliance tools
    Leverage {
        #[command(subcommand)]
        action: LeverageAction,
    },
}

#[derive(Subcommand)]
enum LeverageAction {
    /// Compare venue leverage with the configured leverage
    Check,
    /// Close all positions, set leverage and reopen
    Reset {
        /// Confirm the action
        #[arg(long)]
        yes: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging()?;

    let config = Config::load(cli.config.as_deref())?;

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => run(&config).await,
        Commands::Status { live: true } => show_live_status(&config).await,
        Commands::Status { live: false } => show_paper_status(&config).await,
        Commands::CloseAll { yes } => {
            require_confirmation(yes, "close-all")?;
            let mut trader = build_paper_trader(&config).await?;
            let report = trader.close_all_positions().await?;
            let closed = report.orders.iter().filter(|o| o.filled()).count();
            println!("Closed {} position(s), {} failure(s)", closed, report.failures.len());
            for failure in &report.failures {
                println!("   ✗ {}", failure);
            }
            Ok(())
        }
        Commands::Rebalance { yes } => {
            require_confirmation(yes, "rebalance")?;
            let mut trader = build_paper_trader(&config).await?;
            let report = trader.force_rebalance().await?;
            println!(
                "Rebalance {}: {} order(s) filled, {} skipped",
                if report.success { "succeeded" } else { "FAILED" },
                report.fill_count(),
                report.skipped.len()
            );
            for failure in &report.failures {
                println!("   ✗ {}", failure);
            }
            Ok(())
        }
        Commands::Leverage { action: LeverageAction::Check } => {
            let trader = build_paper_trader(&config).await?;
            let report = trader.check_leverage().await?;
            print_compliance(&report);
            Ok(())
        }
        Commands::Leverage { action: LeverageAction::Reset { yes } } => {
            require_confirmation(yes, "leverage reset")?;
            let mut trader = build_paper_trader(&config).await?;
            let report = trader.enforce_leverage().await?;
            println!(
                "Leverage reset completed: {} order(s), stages {:?}",
                report.orders.len(),
                report.completed_stages
            );
            Ok(())
        }
    }
}

async fn run(config: &Config) -> Result<()> {
    info!("╔════════════════════════════════════════════════════════════╗");
    info!(
        "║        Hedge Ratio Keeper v{} - Paper Trading           ║",
        env!("CARGO_PKG_VERSION")
    );
    info!("╚════════════════════════════════════════════════════════════╝");
    log_config(config);

    let mut trader = build_paper_trader(config).await?;

    let running = Arc::new(AtomicBool::new(true));
    spawn_signal_handler(running.clone());

    trader.run_loop(running).await;

    info!("👋 Hedge Ratio Keeper shutdown complete");
    Ok(())
}

/// Paper venue marked to live Hyperliquid prices.
async fn build_paper_trader(config: &Config) -> Result<PaperTrader> {
    let client = HyperliquidClient::new(
        &config.hyperliquid.base_url,
        config.hyperliquid.account_address.clone(),
    )?;
    let feed: PaperFeed = Arc::new(CachedPriceFeed::new(client, PRICE_CACHE_TTL));

    ensure_parent_dir(&config.runtime.paper_db)?;
    let paper_store = PaperStore::open(&config.runtime.paper_db)?;
    let exchange = PaperExchange::new(feed.clone(), config.runtime.paper_initial_balance)
        .with_fee_rate(config.runtime.fee_rate)
        .with_store(paper_store)
        .await?;

    let store = StateStore::open(&config.runtime.state_file)?;
    Ok(Trader::new(config, Arc::new(exchange), feed, store))
}

fn ensure_parent_dir(path: &str) -> Result<()> {
    if let Some(parent) = Path::new(path).parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory {:?}", parent))?;
    }
    Ok(())
}

fn require_confirmation(yes: bool, action: &str) -> Result<()> {
    if !yes {
        bail!("{} changes positions; re-run with --yes to confirm", action);
    }
    Ok(())
}

/// Stop the loop on SIGINT or SIGTERM.
fn spawn_signal_handler(running: Arc<AtomicBool>) {
    tokio::spawn(async move {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            match signal(SignalKind::terminate()) {
                Ok(mut term) => {
                    tokio::select! {
                        _ = tokio::signal::ctrl_c() => {}
                        _ = term.recv() => {}
                    }
                }
                Err(e) => {
                    warn!(error = %e, "SIGTERM handler unavailable, listening for Ctrl-C only");
                    tokio::signal::ctrl_c().await.ok();
                }
            }
        }
        #[cfg(not(unix))]
        tokio::signal::ctrl_c().await.ok();

        info!("🛑 Shutdown signal received, finishing current cycle");
        running.store(false, Ordering::SeqCst);
    });
}

/// Initialize logging to stdout and an hourly rolling file.
fn init_logging() -> Result<()> {
    use tracing_subscriber::fmt::writer::MakeWriterExt;

    std::fs::create_dir_all("logs")?;

    let file_appender = tracing_appender::rolling::hourly("logs", "hedge-ratio-keeper.log");
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    // Leak the guard to keep it alive for the program duration
    Box::leak(Box::new(guard));

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("hedge_ratio_keeper=debug".parse()?)
                .add_directive(Level::INFO.into()),
        )
        .with_writer(std::io::stdout.and(file_writer))
        .with_target(true)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_ansi(true)
        .init();

    Ok(())
}

fn log_config(config: &Config) {
    let s = &config.strategy;
    info!("📋 Configuration:");
    info!("   Core: {} @ {}x", s.core_symbol, config.leverage.core);
    info!("   Hedges: {} @ {}x", s.hedge_symbols.join(", "), config.leverage.hedge);
    info!(
        "   Ratio Target: {} (band {} - {})",
        s.ratio_target, s.ratio_low, s.ratio_high
    );
    info!("   Reserve: {:.1}%", s.reserve_percent * dec!(100));
    info!("   Rebalance Threshold: {:.1}%", s.rebalance_threshold * dec!(100));
    info!("   Cycle Interval: {}s", config.runtime.cycle_interval_secs);
    info!(
        "   Protocol Delays: {}s / {}s / {}s",
        config.api_delays.order_processing,
        config.api_delays.leverage_update,
        config.api_delays.position_check
    );
}

async fn show_paper_status(config: &Config) -> Result<()> {
    let trader = build_paper_trader(config).await?;
    let status = trader.portfolio_status().await?;

    println!("╔════════════════════════════════════════════════════════════╗");
    println!("║              PAPER PORTFOLIO STATUS                        ║");
    println!("╚════════════════════════════════════════════════════════════╝");
    print_status(trader.params(), &status.state, &status.compliance, &status.decision);

    let ledger = trader.store().summary();
    println!("\n📒 Ledger ({})", trader.store().path().display());
    println!("   ├─ NAV Records:      {}", ledger.nav_records);
    if let (Some(first), Some(last)) = (ledger.first_nav, ledger.last_nav) {
        println!("   ├─ NAV:              ${:.2} → ${:.2}", first, last);
    }
    println!("   ├─ Trades:           {}", ledger.trades);
    println!("   ├─ Commission:       ${:.4}", ledger.total_commission_usd);
    println!("   ├─ Funding:          ${:.4}", ledger.total_funding_usd);
    println!("   └─ Rebalance Events: {}", ledger.rebalance_events);

    let paper = trader.gateway().get_state().await;
    let store = PaperStore::open(&config.runtime.paper_db)?;
    println!("\n🧾 Paper Account");
    println!("   ├─ Initial Balance:  ${:.2}", paper.initial_balance);
    println!("   ├─ Cash Balance:     ${:.2}", paper.balance);
    println!("   ├─ Realized PnL:     ${:.4}", paper.realized_pnl);
    println!("   ├─ Fees Paid:        ${:.4}", paper.total_fees);
    println!("   ├─ Fills Recorded:   {}", store.fill_count()?);
    println!("   └─ Funding:          ${:.4}", paper.total_funding);
    for (symbol, total) in store.funding_by_symbol()? {
        println!("       {}: ${:.4}", symbol, total);
    }

    println!();
    Ok(())
}

async fn show_live_status(config: &Config) -> Result<()> {
    if config
        .hyperliquid
        .account_address
        .as_deref()
        .map_or(true, str::is_empty)
    {
        bail!("status --live needs HRK__HYPERLIQUID__ACCOUNT_ADDRESS or hyperliquid.account_address");
    }

    let client = HyperliquidClient::new(
        &config.hyperliquid.base_url,
        config.hyperliquid.account_address.clone(),
    )?;
    let params = config.target_params();

    let state = SnapshotBuilder::new(&params).build(&client, &client).await?;
    let compliance = LeverageController::new(&params, config.protocol_delays())
        .check_compliance(&client)
        .await?;
    let decision = RebalanceEngine::new(&params).decide(&state);

    println!("╔════════════════════════════════════════════════════════════╗");
    println!("║              LIVE ACCOUNT STATUS (read-only)               ║");
    println!("╚════════════════════════════════════════════════════════════╝");
    print_status(&params, &state, &compliance, &decision);
    println!();
    Ok(())
}

fn print_status(
    params: &TargetParams,
    state: &PortfolioState,
    compliance: &ComplianceReport,
    decision: &RebalanceDecision,
) {
    println!("\n📊 Account");
    println!("   ├─ NAV:              ${:.2}", state.nav);
    println!("   ├─ Margin Used:      ${:.2} ({:.1}%)", state.margin_used, state.margin_usage_percent);
    println!("   └─ Available:        ${:.2}", state.available_balance);

    println!("\n⚖️  Positions");
    println!(
        "   ├─ {} (core):  {} ≈ ${:.2}, margin ${:.2}",
        params.core_symbol, state.core_position, state.core_value_usd, state.core_margin
    );
    for (symbol, size) in &state.hedge_positions {
        println!(
            "   ├─ {} (hedge): {} ≈ ${:.2}",
            symbol,
            size,
            state.hedge_value(symbol)
        );
    }
    println!(
        "   └─ Ratio:          {:.3} (target {}, hedge margin ${:.2})",
        state.position_ratio, params.ratio_target, state.hedge_margin
    );

    print_compliance(compliance);

    println!("\n🎯 Decision");
    println!("   ├─ Deviation:        {:.2}%", decision.deviation_percent * dec!(100));
    println!(
        "   ├─ Targets:          core ${:.2} / hedge ${:.2}",
        decision.target_core_usd, decision.target_hedge_usd
    );
    println!(
        "   └─ Rebalance:        {} ({})",
        if decision.should_rebalance { "YES" } else { "no" },
        decision.reason
    );
}

fn print_compliance(report: &ComplianceReport) {
    println!("\n🔧 Leverage");
    for entry in &report.entries {
        println!(
            "   ├─ {}: expected {}x, venue {}x{} {}",
            entry.symbol,
            entry.expected,
            entry.current,
            if entry.has_position { "" } else { " (no position)" },
            if entry.compliant { "✓" } else { "✗" }
        );
    }
    println!(
        "   └─ {}",
        if report.is_compliant() { "Compliant" } else { "NON-COMPLIANT: reset required" }
    );
}
