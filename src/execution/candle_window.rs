use crate::error::InvalidCandleError;
use crate::models::Candle;
use std::collections::VecDeque;

/// Rolling window of closed candles for one symbol
///
/// Owned by the session task; candles are kept in chronological order and the
/// oldest one is evicted once the window is full.
#[derive(Debug, Clone)]
pub struct CandleWindow {
    candles: VecDeque<Candle>,
    capacity: usize,
}

impl CandleWindow {
    /// Create an empty window
    ///
    /// # Arguments
    /// * `capacity` - Number of candles kept after warm-up
    pub fn new(capacity: usize) -> Self {
        Self {
            candles: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Replace the contents with warm-up history
    ///
    /// Candles still in progress are dropped, only the newest `capacity`
    /// closed candles are kept. Returns how many candles were kept.
    pub fn seed(&mut self, history: Vec<Candle>) -> usize {
        self.candles.clear();

        let mut closed: Vec<Candle> = history.into_iter().filter(|c| c.closed).collect();
        closed.sort_by_key(|c| c.close_time);
        closed.dedup_by_key(|c| c.close_time);

        let skip = closed.len().saturating_sub(self.capacity);
        self.candles.extend(closed.into_iter().skip(skip));
        self.candles.len()
    }

    /// Append the newest candle
    ///
    /// Rejects duplicate or out-of-order delivery: `close_time` must be
    /// strictly after the current last candle.
    pub fn push(&mut self, candle: Candle) -> Result<(), InvalidCandleError> {
        if let Some(last) = self.candles.back() {
            if candle.close_time <= last.close_time {
                return Err(InvalidCandleError {
                    last: last.close_time,
                    got: candle.close_time,
                });
            }
        }

        self.candles.push_back(candle);
        while self.candles.len() > self.capacity {
            self.candles.pop_front();
        }

        Ok(())
    }

    /// Ordered copy for the strategy
    pub fn snapshot(&self) -> Vec<Candle> {
        self.candles.iter().cloned().collect()
    }

    pub fn last(&self) -> Option<&Candle> {
        self.candles.back()
    }

    pub fn len(&self) -> usize {
        self.candles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candles.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// True once the window holds `capacity` candles
    pub fn is_warm(&self) -> bool {
        self.candles.len() == self.capacity
    }
}
