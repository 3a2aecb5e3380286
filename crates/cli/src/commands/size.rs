//! Sizing preview: what the engine would open for a given signal and account.

use anyhow::{Context, Result};
use clap::{Args, ValueEnum};
use perp_sentinel_core::{Balance, ConfigLoader, Side};
use perp_sentinel_risk::{RiskSizer, RiskState, SizingDecision};
use rust_decimal::Decimal;

#[derive(Clone, Copy, Debug, ValueEnum)]
pub enum SideArg {
    Long,
    Short,
}

impl From<SideArg> for Side {
    fn from(side: SideArg) -> Self {
        match side {
            SideArg::Long => Self::Long,
            SideArg::Short => Self::Short,
        }
    }
}

/// Arguments for the size command.
#[derive(Args, Debug)]
pub struct SizeArgs {
    /// Config file path
    #[arg(short, long, default_value = "config/Sentinel.toml")]
    pub config: String,

    /// Account equity
    #[arg(long)]
    pub equity: Decimal,

    /// Free margin (defaults to equity)
    #[arg(long)]
    pub free: Option<Decimal>,

    /// Peak equity for the drawdown throttle (defaults to equity)
    #[arg(long)]
    pub peak: Option<Decimal>,

    /// Signal confidence, 0 to 1
    #[arg(long)]
    pub confidence: Decimal,

    /// Volatility as a fraction of price
    #[arg(long)]
    pub volatility: Decimal,

    /// Expected entry price
    #[arg(long)]
    pub price: Decimal,

    #[arg(long, value_enum, default_value = "long")]
    pub side: SideArg,

    /// Print JSON instead of a table
    #[arg(long)]
    pub json: bool,
}

pub fn run(args: SizeArgs) -> Result<()> {
    let config = ConfigLoader::load(&args.config)?;
    let peak = args.peak.unwrap_or(args.equity).max(args.equity);

    let mut state = RiskState::new(peak, config.sizing.rolling_window);
    state.sync_equity(args.equity);
    let balance = Balance {
        free: args.free.unwrap_or(args.equity),
        used: Decimal::ZERO,
        total: args.equity,
    };

    let sizer = RiskSizer::new(config.sizing);
    let decision = sizer
        .size(
            &balance,
            args.confidence,
            args.volatility,
            &state,
            args.price,
        )
        .context("no position would be opened")?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&decision)?);
    } else {
        print_table(&decision, args.side.into(), args.price, &state);
    }
    Ok(())
}

fn print_table(decision: &SizingDecision, side: Side, price: Decimal, state: &RiskState) {
    println!();
    println!("Sizing preview ({side} @ {price})");
    println!("─────────────────────────────────────────");
    println!("  Quantity:        {}", decision.quantity);
    println!("  Leverage:        {}x", decision.leverage);
    println!("  Notional:        {}", decision.notional);
    println!("  Margin:          {}", decision.margin);
    println!(
        "  Stop:            {} ({}%)",
        decision.stop_price(side, price).round_dp(4),
        (decision.stop_distance * Decimal::ONE_HUNDRED).round_dp(2)
    );
    println!(
        "  Target:          {} ({}%)",
        decision.target_price(side, price).round_dp(4),
        (decision.target_distance * Decimal::ONE_HUNDRED).round_dp(2)
    );
    println!("  Risk at stop:    {}", decision.risk_amount.round_dp(2));
    println!("  Kelly fraction:  {}", decision.risk_fraction);
    println!(
        "  Throttle:        {} (drawdown {}%)",
        decision.throttle,
        (state.drawdown() * Decimal::ONE_HUNDRED).round_dp(2)
    );
    println!();
}
