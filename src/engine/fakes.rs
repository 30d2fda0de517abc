//! In-memory stand-ins for the exchange and advisory services

use async_trait::async_trait;
use chrono::Utc;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use crate::advisory::{AdvisoryApi, AdvisoryError, PlanRequest, ScoreRequest};
use crate::exchange::{
    base_asset, AssetBalance, BookTicker, ExchangeApi, ExchangeError, ExchangeFill, OrderAck,
    OrderRequest, OrderSide,
};
use crate::indicators::test_support::candles_from_closes;
use crate::models::{Action, Candle, Decision, OrderKind, Opportunity, RegimeFlags};

pub(crate) enum OrderScript {
    Reject(ExchangeError),
    MissingId,
}

/// Exchange with a live balance sheet; market orders fill at the set price
pub(crate) struct FakeExchange {
    pub balances: Mutex<HashMap<String, f64>>,
    pub locked: Mutex<HashMap<String, f64>>,
    pub prices: Mutex<HashMap<String, f64>>,
    pub closes: Mutex<HashMap<String, Vec<f64>>>,
    pub order_script: Mutex<VecDeque<OrderScript>>,
    pub orders: Mutex<Vec<OrderRequest>>,
    pub fills: Mutex<HashMap<String, Vec<ExchangeFill>>>,
    pub online: AtomicBool,
    pub kline_delay: Mutex<Duration>,
    pub kline_calls: AtomicUsize,
    /// Highest number of kline requests seen in flight at once
    pub kline_peak: AtomicUsize,
    kline_in_flight: AtomicUsize,
    /// Relative bid/ask spread quoted by `book_ticker`
    pub spread: Mutex<f64>,
    next_order_id: AtomicUsize,
}

impl FakeExchange {
    pub fn new(quote_balance: f64) -> Self {
        Self {
            balances: Mutex::new(HashMap::from([("USDT".to_string(), quote_balance)])),
            locked: Mutex::new(HashMap::new()),
            prices: Mutex::new(HashMap::new()),
            closes: Mutex::new(HashMap::new()),
            order_script: Mutex::new(VecDeque::new()),
            orders: Mutex::new(Vec::new()),
            fills: Mutex::new(HashMap::new()),
            online: AtomicBool::new(true),
            kline_delay: Mutex::new(Duration::ZERO),
            kline_calls: AtomicUsize::new(0),
            kline_peak: AtomicUsize::new(0),
            kline_in_flight: AtomicUsize::new(0),
            spread: Mutex::new(0.0001),
            next_order_id: AtomicUsize::new(1),
        }
    }

    /// Rising market ending at `price`
    pub fn with_market(self, pair: &str, price: f64) -> Self {
        let closes: Vec<f64> = (0..120)
            .map(|i| price * (1.0 - 0.0005 * (119 - i) as f64))
            .collect();
        self.prices.lock().unwrap().insert(pair.to_string(), price);
        self.closes.lock().unwrap().insert(pair.to_string(), closes);
        self
    }

    pub fn set_balance(&self, asset: &str, amount: f64) {
        self.balances
            .lock()
            .unwrap()
            .insert(asset.to_string(), amount);
    }

    /// Balance held by open orders; reported but not sellable
    pub fn set_locked(&self, asset: &str, amount: f64) {
        self.locked
            .lock()
            .unwrap()
            .insert(asset.to_string(), amount);
    }

    pub fn set_spread(&self, spread: f64) {
        *self.spread.lock().unwrap() = spread;
    }

    pub fn set_price(&self, pair: &str, price: f64) {
        self.prices.lock().unwrap().insert(pair.to_string(), price);
    }

    pub fn balance(&self, asset: &str) -> f64 {
        self.balances
            .lock()
            .unwrap()
            .get(asset)
            .copied()
            .unwrap_or(0.0)
    }

    pub fn order_count(&self) -> usize {
        self.orders.lock().unwrap().len()
    }

    fn price_of(&self, pair: &str) -> Result<f64, ExchangeError> {
        self.prices
            .lock()
            .unwrap()
            .get(pair)
            .copied()
            .ok_or_else(|| ExchangeError::Rejected {
                status: 400,
                code: Some(-1121),
                message: format!("Invalid symbol {}", pair),
            })
    }

    fn check_online(&self) -> Result<(), ExchangeError> {
        if self.online.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(ExchangeError::Transport("connection refused".into()))
        }
    }
}

#[async_trait]
impl ExchangeApi for FakeExchange {
    async fn ping(&self) -> Result<(), ExchangeError> {
        self.check_online()
    }

    async fn balances(&self) -> Result<Vec<AssetBalance>, ExchangeError> {
        self.check_online()?;
        let locked = self.locked.lock().unwrap().clone();
        let mut balances: Vec<AssetBalance> = self
            .balances
            .lock()
            .unwrap()
            .iter()
            .map(|(asset, free)| AssetBalance {
                asset: asset.clone(),
                free: *free,
                locked: locked.get(asset).copied().unwrap_or(0.0),
            })
            .collect();
        for (asset, amount) in locked {
            if !balances.iter().any(|b| b.asset == asset) {
                balances.push(AssetBalance {
                    asset,
                    free: 0.0,
                    locked: amount,
                });
            }
        }
        balances.sort_by(|a, b| a.asset.cmp(&b.asset));
        Ok(balances)
    }

    async fn klines(
        &self,
        symbol: &str,
        _interval: &str,
        limit: u32,
    ) -> Result<Vec<Candle>, ExchangeError> {
        self.check_online()?;
        self.kline_calls.fetch_add(1, Ordering::SeqCst);
        let in_flight = self.kline_in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.kline_peak.fetch_max(in_flight, Ordering::SeqCst);
        let delay = *self.kline_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.kline_in_flight.fetch_sub(1, Ordering::SeqCst);

        let closes = self
            .closes
            .lock()
            .unwrap()
            .get(symbol)
            .cloned()
            .unwrap_or_default();
        let skip = closes.len().saturating_sub(limit as usize);
        Ok(candles_from_closes(symbol, &closes[skip..]))
    }

    async fn book_ticker(&self, symbol: &str) -> Result<BookTicker, ExchangeError> {
        self.check_online()?;
        let price = self.price_of(symbol)?;
        let half = *self.spread.lock().unwrap() / 2.0;
        Ok(BookTicker {
            bid: price * (1.0 - half),
            ask: price * (1.0 + half),
        })
    }

    async fn price(&self, symbol: &str) -> Result<f64, ExchangeError> {
        self.check_online()?;
        self.price_of(symbol)
    }

    async fn create_order(&self, order: &OrderRequest) -> Result<OrderAck, ExchangeError> {
        self.check_online()?;
        self.orders.lock().unwrap().push(order.clone());

        if let Some(script) = self.order_script.lock().unwrap().pop_front() {
            return match script {
                OrderScript::Reject(e) => Err(e),
                OrderScript::MissingId => Ok(OrderAck {
                    order_id: None,
                    status: "EXPIRED".to_string(),
                    executed_qty: 0.0,
                    quote_qty: 0.0,
                }),
            };
        }

        let price = order.price.unwrap_or(self.price_of(&order.symbol)?);
        let base = base_asset(&order.symbol, "USDT").to_string();
        let (quantity, quote) = match order.side {
            OrderSide::Buy => {
                let quote = order
                    .quote_notional
                    .unwrap_or_else(|| order.quantity.unwrap_or(0.0) * price);
                (quote / price, quote)
            }
            OrderSide::Sell => {
                let quantity = order.quantity.unwrap_or(0.0);
                (quantity, quantity * price)
            }
        };

        {
            let mut balances = self.balances.lock().unwrap();
            let (base_delta, quote_delta) = match order.side {
                OrderSide::Buy => (quantity, -quote),
                OrderSide::Sell => (-quantity, quote),
            };
            *balances.entry(base).or_insert(0.0) += base_delta;
            *balances.entry("USDT".to_string()).or_insert(0.0) += quote_delta;
        }

        self.fills
            .lock()
            .unwrap()
            .entry(order.symbol.clone())
            .or_default()
            .push(ExchangeFill {
                side: order.side,
                price,
                quantity,
                quote_qty: quote,
                time: Utc::now(),
            });

        let id = self.next_order_id.fetch_add(1, Ordering::SeqCst);
        Ok(OrderAck {
            order_id: Some(id.to_string()),
            status: "FILLED".to_string(),
            executed_qty: quantity,
            quote_qty: quote,
        })
    }

    async fn trades(&self, symbol: &str) -> Result<Vec<ExchangeFill>, ExchangeError> {
        self.check_online()?;
        Ok(self
            .fills
            .lock()
            .unwrap()
            .get(symbol)
            .cloned()
            .unwrap_or_default())
    }
}

/// Advisory with fixed per-pair answers
#[derive(Default)]
pub(crate) struct FakeAdvisory {
    pub scores: Mutex<HashMap<String, (f64, f64)>>,
    pub failing_pairs: Mutex<Vec<String>>,
    pub plans: Mutex<HashMap<String, (Action, f64, f64)>>,
    pub score_calls: AtomicUsize,
    pub plan_calls: AtomicUsize,
    pub score_delay: Mutex<Duration>,
}

impl FakeAdvisory {
    /// Score a pair with (p_up, score)
    pub fn with_score(self, pair: &str, p_up: f64, score: f64) -> Self {
        self.scores
            .lock()
            .unwrap()
            .insert(pair.to_string(), (p_up, score));
        self
    }

    /// Plan for a pair: (action, notional, confidence)
    pub fn with_plan(self, pair: &str, action: Action, notional: f64, confidence: f64) -> Self {
        self.set_plan(pair, action, notional, confidence);
        self
    }

    pub fn set_plan(&self, pair: &str, action: Action, notional: f64, confidence: f64) {
        self.plans
            .lock()
            .unwrap()
            .insert(pair.to_string(), (action, notional, confidence));
    }

    pub fn failing(self, pair: &str) -> Self {
        self.failing_pairs.lock().unwrap().push(pair.to_string());
        self
    }
}

#[async_trait]
impl AdvisoryApi for FakeAdvisory {
    async fn score(&self, request: &ScoreRequest) -> Result<Opportunity, AdvisoryError> {
        self.score_calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.score_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        if self.failing_pairs.lock().unwrap().contains(&request.pair) {
            return Err(AdvisoryError::Status {
                status: 503,
                body: "scoring model offline".to_string(),
            });
        }

        let (p_up, score) = self
            .scores
            .lock()
            .unwrap()
            .get(&request.pair)
            .copied()
            .unwrap_or((0.5, 0.0));

        Ok(Opportunity {
            pair: request.pair.clone(),
            p_up,
            score,
            regime: RegimeFlags::default(),
            rationale: format!("scored {}", request.pair),
        })
    }

    async fn plan(&self, request: &PlanRequest) -> Result<Decision, AdvisoryError> {
        self.plan_calls.fetch_add(1, Ordering::SeqCst);
        let (action, notional, confidence) = self
            .plans
            .lock()
            .unwrap()
            .get(&request.pair)
            .copied()
            .unwrap_or((Action::Hold, 0.0, 0.5));

        Ok(Decision {
            pair: request.pair.clone(),
            action,
            order_kind: OrderKind::Market,
            notional,
            stop_pct: None,
            take_pct: None,
            limit_price: None,
            confidence,
            rationale: format!("plan for {}", request.pair),
            exit_flags: None,
        })
    }
}
