use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use governor::{Quota, RateLimiter};
use hmac::{Hmac, Mac};
use reqwest::{Client, Method};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};
use sha2::Sha256;
use std::collections::HashMap;
use std::num::NonZeroU32;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::config::ExchangeSettings;
use crate::exchange::{
    AssetBalance, BookTicker, ExchangeApi, ExchangeError, ExchangeFill, OrderAck, OrderRequest,
    OrderSide,
};
use crate::models::{Candle, OrderKind};

type HmacSha256 = Hmac<Sha256>;

type BinanceRateLimiter = RateLimiter<
    governor::state::direct::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

/// Binance-compatible spot REST client
///
/// Private endpoints are signed with HMAC-SHA256 over the canonical query
/// string (including `timestamp` and `recvWindow`), hex encoded and appended
/// as `signature`. Cloning shares the rate limiter and the lot size cache.
#[derive(Clone)]
pub struct BinanceClient {
    client: Client,
    base_url: String,
    api_key: String,
    api_secret: String,
    recv_window_ms: u64,
    rate_limiter: Arc<BinanceRateLimiter>,
    lot_steps: Arc<Mutex<HashMap<String, Option<f64>>>>,
}

#[derive(Debug, Deserialize)]
struct AccountResponse {
    balances: Vec<RawBalance>,
}

#[derive(Debug, Deserialize)]
struct RawBalance {
    asset: String,
    #[serde(deserialize_with = "de_f64")]
    free: f64,
    #[serde(deserialize_with = "de_f64")]
    locked: f64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BookTickerResponse {
    #[serde(deserialize_with = "de_f64")]
    bid_price: f64,
    #[serde(deserialize_with = "de_f64")]
    ask_price: f64,
}

#[derive(Debug, Deserialize)]
struct ExchangeInfoResponse {
    symbols: Vec<SymbolInfo>,
}

#[derive(Debug, Deserialize)]
struct SymbolInfo {
    symbol: String,
    #[serde(default)]
    filters: Vec<SymbolFilter>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SymbolFilter {
    filter_type: String,
    #[serde(default)]
    step_size: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PriceResponse {
    #[serde(deserialize_with = "de_f64")]
    price: f64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OrderResponse {
    order_id: Option<serde_json::Value>,
    #[serde(default)]
    status: String,
    #[serde(default, deserialize_with = "de_f64")]
    executed_qty: f64,
    #[serde(default, deserialize_with = "de_f64")]
    cummulative_quote_qty: f64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TradeResponse {
    #[serde(deserialize_with = "de_f64")]
    price: f64,
    #[serde(deserialize_with = "de_f64")]
    qty: f64,
    #[serde(deserialize_with = "de_f64")]
    quote_qty: f64,
    time: i64,
    is_buyer: bool,
}

/// Binance sends decimals as strings; accept numbers too
fn de_f64<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum StrOrNum {
        Str(String),
        Num(f64),
    }

    match StrOrNum::deserialize(deserializer)? {
        StrOrNum::Str(s) => s.parse().map_err(serde::de::Error::custom),
        StrOrNum::Num(n) => Ok(n),
    }
}

/// Format a decimal without exponent or trailing zeros
fn format_decimal(value: f64) -> String {
    let s = format!("{:.8}", value);
    let s = s.trim_end_matches('0').trim_end_matches('.');
    if s.is_empty() {
        "0".to_string()
    } else {
        s.to_string()
    }
}

/// Round a base quantity down to a multiple of the symbol's lot step
fn floor_to_step(quantity: f64, step: f64) -> f64 {
    if step <= 0.0 {
        return quantity;
    }
    // Tolerate float error such as 0.3 / 0.1 = 2.9999999999999996
    ((quantity / step) + 1e-9).floor() * step
}

fn canonical_query(params: &[(&str, String)]) -> String {
    params
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join("&")
}

impl BinanceClient {
    pub fn new(settings: &ExchangeSettings) -> Result<Self, ExchangeError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .map_err(|e| ExchangeError::Transport(format!("failed to build HTTP client: {}", e)))?;

        let per_minute = NonZeroU32::new(settings.requests_per_minute.max(1))
            .unwrap_or(NonZeroU32::MIN);
        let rate_limiter = Arc::new(RateLimiter::direct(Quota::per_minute(per_minute)));

        Ok(Self {
            client,
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            api_key: settings.api_key.clone(),
            api_secret: settings.api_secret.clone(),
            recv_window_ms: settings.recv_window_ms,
            rate_limiter,
            lot_steps: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    /// LOT_SIZE step for `symbol`, fetched once from exchangeInfo
    async fn lot_step(&self, symbol: &str) -> Result<Option<f64>, ExchangeError> {
        if let Some(step) = self
            .lot_steps
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(symbol)
        {
            return Ok(*step);
        }

        let info: ExchangeInfoResponse = self
            .public_get("/api/v3/exchangeInfo", &[("symbol", symbol.to_string())])
            .await?;
        let step = info
            .symbols
            .iter()
            .filter(|s| s.symbol == symbol)
            .flat_map(|s| s.filters.iter())
            .find(|f| f.filter_type == "LOT_SIZE")
            .and_then(|f| f.step_size.as_deref())
            .and_then(|s| s.parse::<f64>().ok())
            .filter(|step| *step > 0.0);

        tracing::debug!(symbol, step = ?step, "Loaded lot size");
        self.lot_steps
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(symbol.to_string(), step);
        Ok(step)
    }

    /// Hex HMAC-SHA256 of the canonical query string
    pub fn sign(&self, payload: &str) -> Result<String, ExchangeError> {
        let mut mac = HmacSha256::new_from_slice(self.api_secret.as_bytes())
            .map_err(|e| ExchangeError::Transport(format!("failed to create signing key: {}", e)))?;
        mac.update(payload.as_bytes());
        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    async fn public_get<T: DeserializeOwned>(
        &self,
        path: &str,
        params: &[(&str, String)],
    ) -> Result<T, ExchangeError> {
        let query = canonical_query(params);
        let url = if query.is_empty() {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}{}?{}", self.base_url, path, query)
        };

        self.rate_limiter.until_ready().await;
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| ExchangeError::Transport(e.to_string()))?;

        Self::decode(response).await
    }

    async fn signed_request<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        mut params: Vec<(&str, String)>,
    ) -> Result<T, ExchangeError> {
        params.push(("recvWindow", self.recv_window_ms.to_string()));
        params.push(("timestamp", Utc::now().timestamp_millis().to_string()));

        let query = canonical_query(&params);
        let signature = self.sign(&query)?;
        let url = format!("{}{}?{}&signature={}", self.base_url, path, query, signature);

        self.rate_limiter.until_ready().await;
        let response = self
            .client
            .request(method, &url)
            .header("X-MBX-APIKEY", &self.api_key)
            .send()
            .await
            .map_err(|e| ExchangeError::Transport(e.to_string()))?;

        Self::decode(response).await
    }

    /// Map status + body into a typed value or a rejection
    ///
    /// Error payloads (`{"code": -1013, "msg": "..."}`) are rejections even
    /// when they arrive with a 2xx status.
    async fn decode<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, ExchangeError> {
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| ExchangeError::Transport(e.to_string()))?;

        let value: serde_json::Value = match serde_json::from_str(&body) {
            Ok(v) => v,
            Err(e) if status.is_success() => {
                return Err(ExchangeError::Decode(format!("{} (body: {})", e, body)))
            }
            Err(_) => {
                return Err(ExchangeError::Rejected {
                    status: status.as_u16(),
                    code: None,
                    message: body,
                })
            }
        };

        let embedded_code = value
            .get("code")
            .and_then(|c| c.as_i64())
            .filter(|c| *c != 0 && *c != 200);

        if !status.is_success() || embedded_code.is_some() {
            let message = value
                .get("msg")
                .and_then(|m| m.as_str())
                .unwrap_or(&body)
                .to_string();
            return Err(ExchangeError::Rejected {
                status: status.as_u16(),
                code: embedded_code,
                message,
            });
        }

        serde_json::from_value(value).map_err(|e| ExchangeError::Decode(e.to_string()))
    }
}

fn parse_kline(symbol: &str, row: &[serde_json::Value]) -> Result<Candle, ExchangeError> {
    let field = |i: usize| -> Result<f64, ExchangeError> {
        let value = row
            .get(i)
            .ok_or_else(|| ExchangeError::Decode(format!("kline missing field {}", i)))?;
        match value {
            serde_json::Value::String(s) => s
                .parse()
                .map_err(|e| ExchangeError::Decode(format!("kline field {}: {}", i, e))),
            serde_json::Value::Number(n) => n
                .as_f64()
                .ok_or_else(|| ExchangeError::Decode(format!("kline field {} not a float", i))),
            other => Err(ExchangeError::Decode(format!(
                "kline field {} unexpected: {}",
                i, other
            ))),
        }
    };

    let open_time = row
        .first()
        .and_then(|v| v.as_i64())
        .ok_or_else(|| ExchangeError::Decode("kline missing open time".to_string()))?;
    let timestamp = Utc
        .timestamp_millis_opt(open_time)
        .single()
        .ok_or_else(|| ExchangeError::Decode(format!("bad kline open time {}", open_time)))?;

    Ok(Candle {
        pair: symbol.to_string(),
        timestamp,
        open: field(1)?,
        high: field(2)?,
        low: field(3)?,
        close: field(4)?,
        volume: field(5)?,
    })
}

#[async_trait]
impl ExchangeApi for BinanceClient {
    async fn ping(&self) -> Result<(), ExchangeError> {
        let _: serde_json::Value = self.public_get("/api/v3/ping", &[]).await?;
        Ok(())
    }

    async fn balances(&self) -> Result<Vec<AssetBalance>, ExchangeError> {
        let account: AccountResponse = self
            .signed_request(Method::GET, "/api/v3/account", Vec::new())
            .await?;

        Ok(account
            .balances
            .into_iter()
            .map(|b| AssetBalance {
                asset: b.asset,
                free: b.free,
                locked: b.locked,
            })
            .collect())
    }

    async fn klines(
        &self,
        symbol: &str,
        interval: &str,
        limit: u32,
    ) -> Result<Vec<Candle>, ExchangeError> {
        let rows: Vec<Vec<serde_json::Value>> = self
            .public_get(
                "/api/v3/klines",
                &[
                    ("symbol", symbol.to_string()),
                    ("interval", interval.to_string()),
                    ("limit", limit.to_string()),
                ],
            )
            .await?;

        tracing::debug!(symbol, interval, count = rows.len(), "Fetched klines");

        rows.iter().map(|row| parse_kline(symbol, row)).collect()
    }

    async fn book_ticker(&self, symbol: &str) -> Result<BookTicker, ExchangeError> {
        let ticker: BookTickerResponse = self
            .public_get("/api/v3/ticker/bookTicker", &[("symbol", symbol.to_string())])
            .await?;

        Ok(BookTicker {
            bid: ticker.bid_price,
            ask: ticker.ask_price,
        })
    }

    async fn price(&self, symbol: &str) -> Result<f64, ExchangeError> {
        let ticker: PriceResponse = self
            .public_get("/api/v3/ticker/price", &[("symbol", symbol.to_string())])
            .await?;
        Ok(ticker.price)
    }

    async fn create_order(&self, order: &OrderRequest) -> Result<OrderAck, ExchangeError> {
        let mut params = vec![
            ("symbol", order.symbol.clone()),
            ("side", order.side.as_str().to_string()),
        ];

        match order.kind {
            OrderKind::Market => params.push(("type", "MARKET".to_string())),
            OrderKind::Limit => {
                params.push(("type", "LIMIT".to_string()));
                params.push(("timeInForce", "GTC".to_string()));
            }
        }

        if let Some(quantity) = order.quantity {
            let quantity = match self.lot_step(&order.symbol).await? {
                Some(step) => floor_to_step(quantity, step),
                None => quantity,
            };
            if quantity <= 0.0 {
                return Err(ExchangeError::Rejected {
                    status: 400,
                    code: None,
                    message: format!("quantity below lot size for {}", order.symbol),
                });
            }
            params.push(("quantity", format_decimal(quantity)));
        } else if let Some(quote) = order.quote_notional {
            params.push(("quoteOrderQty", format_decimal(quote)));
        }
        if let Some(price) = order.price {
            params.push(("price", format_decimal(price)));
        }
        params.push(("newOrderRespType", "FULL".to_string()));

        tracing::info!(
            symbol = %order.symbol,
            side = order.side.as_str(),
            "Submitting order"
        );

        let response: OrderResponse = self
            .signed_request(Method::POST, "/api/v3/order", params)
            .await?;

        let order_id = response.order_id.and_then(|id| match id {
            serde_json::Value::Number(n) => Some(n.to_string()),
            serde_json::Value::String(s) if !s.is_empty() => Some(s),
            _ => None,
        });

        Ok(OrderAck {
            order_id,
            status: response.status,
            executed_qty: response.executed_qty,
            quote_qty: response.cummulative_quote_qty,
        })
    }

    async fn trades(&self, symbol: &str) -> Result<Vec<ExchangeFill>, ExchangeError> {
        let trades: Vec<TradeResponse> = self
            .signed_request(
                Method::GET,
                "/api/v3/myTrades",
                vec![("symbol", symbol.to_string()), ("limit", "1000".to_string())],
            )
            .await?;

        trades
            .into_iter()
            .map(|t| {
                let time = Utc
                    .timestamp_millis_opt(t.time)
                    .single()
                    .ok_or_else(|| ExchangeError::Decode(format!("bad trade time {}", t.time)))?;
                Ok(ExchangeFill {
                    side: if t.is_buyer { OrderSide::Buy } else { OrderSide::Sell },
                    price: t.price,
                    quantity: t.qty,
                    quote_qty: t.quote_qty,
                    time,
                })
            })
            .collect()
    }
}
