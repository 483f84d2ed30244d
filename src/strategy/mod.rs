// Strategy oracle: candle window in, directional call out
pub mod ema_cross;

pub use ema_cross::EmaCrossStrategy;

use crate::models::{Candle, Signal};

/// Base trait for all trading strategies
///
/// Implementations are pure: the same window always yields the same signal.
pub trait Strategy: Send + Sync {
    /// Directional call for the most recent closed candle
    fn evaluate(&self, candles: &[Candle]) -> Signal;

    /// Get strategy name
    fn name(&self) -> &str;

    /// Minimum candles required before anything but NONE can be returned
    fn min_candles_required(&self) -> usize;
}
