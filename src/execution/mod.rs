// Order execution and position tracking
pub mod bracket;
pub mod candle_window;
pub mod reconciler;
pub mod trailing;

pub use bracket::BracketExecutor;
pub use candle_window::CandleWindow;
pub use reconciler::{PositionReconciler, Reconciliation};
pub use trailing::{TrailingAction, TrailingStop};
