// Technical indicators used by the snapshot builder
// SMA/EMA, ATR, ADX, close z-score and the trend label

pub mod adx;
pub mod atr;
pub mod moving_average;
pub mod trend;
pub mod volatility;

pub use adx::calculate_adx;
pub use atr::{calculate_atr, true_ranges};
pub use moving_average::{calculate_ema, calculate_sma, closes};
pub use trend::classify_trend;
pub use volatility::close_zscore;
