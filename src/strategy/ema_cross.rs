use super::Strategy;
use crate::config::StrategySettings;
use crate::indicators::{calculate_ema_series, calculate_rsi};
use crate::models::{Candle, Signal};

/// Fast/slow EMA crossover filtered by RSI
///
/// LONG when the fast EMA crosses above the slow EMA on the last candle and
/// RSI is not overbought; SHORT on the opposite cross when RSI is not
/// oversold.
#[derive(Debug, Clone)]
pub struct EmaCrossStrategy {
    fast_period: usize,
    slow_period: usize,
    rsi_period: usize,
    rsi_overbought: f64,
    rsi_oversold: f64,
}

impl EmaCrossStrategy {
    pub fn new(
        fast_period: usize,
        slow_period: usize,
        rsi_period: usize,
        rsi_overbought: f64,
        rsi_oversold: f64,
    ) -> Self {
        Self {
            fast_period,
            slow_period,
            rsi_period,
            rsi_overbought,
            rsi_oversold,
        }
    }

    pub fn from_settings(settings: &StrategySettings) -> Self {
        Self::new(
            settings.fast_period,
            settings.slow_period,
            settings.rsi_period,
            settings.rsi_overbought,
            settings.rsi_oversold,
        )
    }

    /// (previous, current) values of an EMA series
    fn last_two(prices: &[f64], period: usize) -> Option<(f64, f64)> {
        let series = calculate_ema_series(prices, period)?;
        match series.as_slice() {
            [.., prev, last] => Some((*prev, *last)),
            _ => None,
        }
    }
}

impl Default for EmaCrossStrategy {
    fn default() -> Self {
        Self::from_settings(&StrategySettings::default())
    }
}

impl Strategy for EmaCrossStrategy {
    fn evaluate(&self, candles: &[Candle]) -> Signal {
        if candles.len() < self.min_candles_required() {
            return Signal::None;
        }

        let prices: Vec<f64> = candles.iter().map(|c| c.close).collect();

        let (Some((fast_prev, fast_now)), Some((slow_prev, slow_now)), Some(rsi)) = (
            Self::last_two(&prices, self.fast_period),
            Self::last_two(&prices, self.slow_period),
            calculate_rsi(&prices, self.rsi_period),
        ) else {
            return Signal::None;
        };

        let crossed_up = fast_prev <= slow_prev && fast_now > slow_now;
        let crossed_down = fast_prev >= slow_prev && fast_now < slow_now;

        let signal = if crossed_up && rsi < self.rsi_overbought {
            Signal::Long
        } else if crossed_down && rsi > self.rsi_oversold {
            Signal::Short
        } else {
            Signal::None
        };

        tracing::debug!(fast = fast_now, slow = slow_now, rsi, %signal, "EMA cross evaluated");
        signal
    }

    fn name(&self) -> &str {
        "EmaCrossStrategy"
    }

    fn min_candles_required(&self) -> usize {
        // One extra candle so the previous EMA values exist
        (self.slow_period.max(self.fast_period) + 1).max(self.rsi_period + 1)
    }
}
