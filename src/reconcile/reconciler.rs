use chrono::{DateTime, Utc};
use futures::future::try_join_all;
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::EngineError;
use crate::exchange::{base_asset, AssetBalance, ExchangeApi, ExchangeFill, OrderSide};
use crate::ledger::LedgerStore;
use crate::models::{Action, Position, TradeRecord, TradeStatus};
use crate::Result;

/// Result of merging balances with trade history
#[derive(Debug, Clone, PartialEq)]
pub struct Reconciliation {
    pub position: Option<Position>,
    /// Free balance of the quote asset
    pub quote_free: f64,
    pub warnings: Vec<String>,
}

/// Entry reconstruction from a run of buys: (entry, invested notional, opened at)
type EntryRun = (f64, f64, Option<DateTime<Utc>>);

fn weighted_entry<I>(buys: I) -> Option<EntryRun>
where
    I: IntoIterator<Item = (f64, f64, DateTime<Utc>)>,
{
    let mut weighted = 0.0;
    let mut notional = 0.0;
    let mut opened_at = None;

    for (price, amount, at) in buys {
        if price <= 0.0 || amount <= 0.0 {
            continue;
        }
        weighted += price * amount;
        notional += amount;
        opened_at.get_or_insert(at);
    }

    if notional > 0.0 {
        Some((weighted / notional, notional, opened_at))
    } else {
        None
    }
}

/// BUY fills after the last closing SELL for `pair`
fn ledger_buy_run<'a>(ledger: &'a [TradeRecord], pair: &str) -> Vec<&'a TradeRecord> {
    let fills: Vec<&TradeRecord> = ledger
        .iter()
        .filter(|r| r.pair == pair && r.is_fill())
        .collect();

    let start = fills
        .iter()
        .rposition(|r| r.action == Action::Sell && r.status == TradeStatus::Closed)
        .map(|i| i + 1)
        .unwrap_or(0);

    fills[start..]
        .iter()
        .copied()
        .filter(|r| r.action == Action::Buy && r.status == TradeStatus::Open)
        .collect()
}

/// Derive the single open position from balances, ledger and prices
///
/// An asset counts as held when `total * price > dust_threshold`. Assets
/// without a price in `prices` are not tradable and are ignored. Pure and
/// idempotent for the same inputs.
pub fn reconcile(
    balances: &[AssetBalance],
    ledger: &[TradeRecord],
    prices: &HashMap<String, f64>,
    quote_asset: &str,
    dust_threshold: f64,
) -> Result<Reconciliation> {
    let quote_free = balances
        .iter()
        .find(|b| b.asset == quote_asset)
        .map(|b| b.free)
        .unwrap_or(0.0);

    let mut held: Vec<(String, f64, f64)> = balances
        .iter()
        .filter(|b| b.asset != quote_asset)
        .filter_map(|b| {
            let pair = format!("{}{}", b.asset, quote_asset);
            let price = *prices.get(&pair)?;
            let value = b.total() * price;
            (value > dust_threshold).then_some((pair, b.total(), value))
        })
        .collect();

    if held.len() > 1 {
        let mut pairs: Vec<String> = held.into_iter().map(|(pair, _, _)| pair).collect();
        pairs.sort();
        return Err(EngineError::MultiplePositionsDetected(pairs));
    }

    let Some((pair, quantity, market_value)) = held.pop() else {
        return Ok(Reconciliation {
            position: None,
            quote_free,
            warnings: Vec::new(),
        });
    };

    let run = ledger_buy_run(ledger, &pair);
    let mut warnings = Vec::new();

    let position = match weighted_entry(run.iter().map(|r| (r.price, r.notional, r.timestamp))) {
        Some((entry_price, size, opened_at)) => {
            let last = run.last();
            Position {
                pair,
                entry_price,
                size,
                quantity,
                stop_pct: last.and_then(|r| r.stop_pct),
                take_pct: last.and_then(|r| r.take_pct),
                opened_at,
                entry_reliable: true,
            }
        }
        None => {
            warnings.push(format!(
                "no ledger history for held {}; entry unknown, sized at market value {:.2}",
                pair, market_value
            ));
            Position {
                pair,
                entry_price: 0.0,
                size: market_value,
                quantity,
                stop_pct: None,
                take_pct: None,
                opened_at: None,
                entry_reliable: false,
            }
        }
    };

    Ok(Reconciliation {
        position: Some(position),
        quote_free,
        warnings,
    })
}

/// Rebuild an unreliable position's entry from the exchange's own fills
pub fn position_from_fills(position: &Position, fills: &[ExchangeFill]) -> Option<Position> {
    let start = fills
        .iter()
        .rposition(|f| f.side == OrderSide::Sell)
        .map(|i| i + 1)
        .unwrap_or(0);

    let buys = fills[start..]
        .iter()
        .filter(|f| f.side == OrderSide::Buy)
        .map(|f| (f.price, f.quote_qty, f.time));

    let (entry_price, size, opened_at) = weighted_entry(buys)?;
    Some(Position {
        entry_price,
        size,
        opened_at,
        entry_reliable: true,
        ..position.clone()
    })
}

/// Async wrapper: gathers balances, prices and history, then reconciles
pub struct Reconciler {
    exchange: Arc<dyn ExchangeApi>,
    ledger: Arc<dyn LedgerStore>,
    pairs: Vec<String>,
    quote_asset: String,
    dust_threshold: f64,
}

impl Reconciler {
    pub fn new(
        exchange: Arc<dyn ExchangeApi>,
        ledger: Arc<dyn LedgerStore>,
        pairs: Vec<String>,
        quote_asset: String,
        dust_threshold: f64,
    ) -> Self {
        Self {
            exchange,
            ledger,
            pairs,
            quote_asset,
            dust_threshold,
        }
    }

    pub fn quote_asset(&self) -> &str {
        &self.quote_asset
    }

    pub async fn reconcile(&self) -> Result<Reconciliation> {
        let balances = self.exchange.balances().await?;

        // Price only the configured pairs we actually hold something of
        let to_price: Vec<&String> = self
            .pairs
            .iter()
            .filter(|pair| {
                let base = base_asset(pair, &self.quote_asset);
                balances.iter().any(|b| b.asset == base && b.total() > 0.0)
            })
            .collect();

        let quotes = try_join_all(to_price.iter().map(|pair| async move {
            let price = self.exchange.price(pair).await?;
            Ok::<_, EngineError>(((*pair).clone(), price))
        }))
        .await?;
        let prices: HashMap<String, f64> = quotes.into_iter().collect();

        let ledger = self.ledger.history().await?;
        let mut result = reconcile(
            &balances,
            &ledger,
            &prices,
            &self.quote_asset,
            self.dust_threshold,
        )?;

        if let Some(position) = result.position.clone().filter(|p| !p.entry_reliable) {
            match self.exchange.trades(&position.pair).await {
                Ok(fills) => {
                    if let Some(recovered) = position_from_fills(&position, &fills) {
                        tracing::info!(
                            pair = %recovered.pair,
                            entry = recovered.entry_price,
                            "Recovered entry from exchange trade history"
                        );
                        result.warnings.clear();
                        result.position = Some(recovered);
                    }
                }
                Err(e) => {
                    result
                        .warnings
                        .push(format!("exchange trade history unavailable: {}", e));
                }
            }
        }

        for warning in &result.warnings {
            tracing::warn!("Reconciliation: {}", warning);
        }

        Ok(result)
    }
}
