pub mod advisory_http;
pub mod binance;

pub use advisory_http::HttpAdvisoryClient;
pub use binance::BinanceClient;
