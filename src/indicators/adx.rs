//! Average Directional Index (ADX) - trend strength
//!
//! - ADX > 25: strong trend
//! - ADX < 20: ranging / choppy
//!
//! +DI above -DI means buyers dominate, the reverse means sellers do.
use crate::models::Candle;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Adx {
    pub adx: f64,
    pub plus_di: f64,
    pub minus_di: f64,
}

/// ADX with Wilder smoothing
///
/// Needs at least `2 * period` candles: `period + 1` to seed the directional
/// indices, the rest to smooth DX into ADX. Returns None otherwise.
pub fn calculate_adx(candles: &[Candle], period: usize) -> Option<Adx> {
    if period == 0 || candles.len() < 2 * period {
        return None;
    }

    let mut trs = Vec::with_capacity(candles.len() - 1);
    let mut plus_dms = Vec::with_capacity(candles.len() - 1);
    let mut minus_dms = Vec::with_capacity(candles.len() - 1);

    for pair in candles.windows(2) {
        let (prev, cur) = (&pair[0], &pair[1]);

        let tr = (cur.high - cur.low)
            .max((cur.high - prev.close).abs())
            .max((cur.low - prev.close).abs());

        let up_move = cur.high - prev.high;
        let down_move = prev.low - cur.low;

        trs.push(tr);
        plus_dms.push(if up_move > down_move && up_move > 0.0 { up_move } else { 0.0 });
        minus_dms.push(if down_move > up_move && down_move > 0.0 { down_move } else { 0.0 });
    }

    let p = period as f64;
    let mut tr_s: f64 = trs[..period].iter().sum();
    let mut plus_s: f64 = plus_dms[..period].iter().sum();
    let mut minus_s: f64 = minus_dms[..period].iter().sum();

    let di = |plus: f64, minus: f64, tr: f64| -> (f64, f64) {
        if tr > 0.0 {
            (plus / tr * 100.0, minus / tr * 100.0)
        } else {
            (0.0, 0.0)
        }
    };
    let dx = |plus_di: f64, minus_di: f64| -> f64 {
        let sum = plus_di + minus_di;
        if sum > 0.0 {
            (plus_di - minus_di).abs() / sum * 100.0
        } else {
            0.0
        }
    };

    let (mut plus_di, mut minus_di) = di(plus_s, minus_s, tr_s);
    let mut dxs = vec![dx(plus_di, minus_di)];

    for i in period..trs.len() {
        tr_s = tr_s - tr_s / p + trs[i];
        plus_s = plus_s - plus_s / p + plus_dms[i];
        minus_s = minus_s - minus_s / p + minus_dms[i];
        (plus_di, minus_di) = di(plus_s, minus_s, tr_s);
        dxs.push(dx(plus_di, minus_di));
    }

    // Seed ADX with the mean of the first available DX values, then smooth
    let seed_len = dxs.len().min(period);
    let mut adx = dxs[..seed_len].iter().sum::<f64>() / seed_len as f64;
    for value in &dxs[seed_len..] {
        adx = (adx * (p - 1.0) + value) / p;
    }

    Some(Adx {
        adx,
        plus_di,
        minus_di,
    })
}
