use crate::models::{Position, PositionSide};

/// What the trailing stop wants after a price update
#[derive(Debug, Clone, PartialEq)]
pub enum TrailingAction {
    /// Nothing to do
    Hold,
    /// Trailing switched on during this update
    Activated { extreme_price: f64 },
    /// Price retraced through the stop level; close the position
    Close { stop_level: f64 },
}

/// Trailing profit lock layered on top of the static bracket
///
/// Activation is one-way. Once active the extreme price only ratchets in the
/// favorable direction (max for longs, min for shorts).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrailingStop {
    activation_pct: f64,
    distance_pct: f64,
}

impl TrailingStop {
    pub fn new(activation_pct: f64, distance_pct: f64) -> Self {
        Self {
            activation_pct,
            distance_pct,
        }
    }

    /// Price that must be reached before trailing starts
    pub fn activation_price(&self, position: &Position) -> f64 {
        match position.side {
            PositionSide::Long => position.entry_price * (1.0 + self.activation_pct),
            PositionSide::Short => position.entry_price * (1.0 - self.activation_pct),
        }
    }

    /// Current stop level derived from the extreme price
    pub fn stop_level(&self, position: &Position) -> f64 {
        match position.side {
            PositionSide::Long => position.extreme_price * (1.0 - self.distance_pct),
            PositionSide::Short => position.extreme_price * (1.0 + self.distance_pct),
        }
    }

    /// Feed the latest closed price, updating trailing state on the position
    pub fn update(&self, position: &mut Position, price: f64) -> TrailingAction {
        let mut activated_now = false;

        if !position.trailing_active {
            let activation_price = self.activation_price(position);
            let reached = match position.side {
                PositionSide::Long => price >= activation_price,
                PositionSide::Short => price <= activation_price,
            };
            if !reached {
                return TrailingAction::Hold;
            }

            position.trailing_active = true;
            activated_now = true;
            tracing::info!(
                symbol = %position.symbol,
                side = %position.side,
                price,
                activation_price,
                "Trailing stop activated"
            );
        }

        // Ratchet toward the favorable side only
        position.extreme_price = match position.side {
            PositionSide::Long => position.extreme_price.max(price),
            PositionSide::Short => position.extreme_price.min(price),
        };

        let stop_level = self.stop_level(position);
        let crossed = match position.side {
            PositionSide::Long => price <= stop_level,
            PositionSide::Short => price >= stop_level,
        };

        if crossed {
            TrailingAction::Close { stop_level }
        } else if activated_now {
            TrailingAction::Activated {
                extreme_price: position.extreme_price,
            }
        } else {
            TrailingAction::Hold
        }
    }
}
