// Technical indicators used by the strategy oracle
pub mod moving_average;
pub mod rsi;

pub use moving_average::{calculate_ema, calculate_ema_series, calculate_sma};
pub use rsi::calculate_rsi;
