//! Order status state machine.
//!
//! RULES:
//!   - The transition table below is the single source of truth.
//!   - Every engine that changes order status checks `can_transition`
//!     and rejects with `InvalidTransition` instead of forcing a write.
//!   - Terminal statuses have no outgoing transitions.
//!   - A self-transition is not a transition and is always rejected.

use crate::error::{OpsError, OpsResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Created,
    Confirmed,
    Shipped,
    AtWarehouse,
    PickedUp,
    Returned,
    Cancelled,
}

/// Every status, in pipeline order. Used by reporting rollups and tests.
pub const ALL_STATUSES: [OrderStatus; 7] = [
    OrderStatus::Created,
    OrderStatus::Confirmed,
    OrderStatus::Shipped,
    OrderStatus::AtWarehouse,
    OrderStatus::PickedUp,
    OrderStatus::Returned,
    OrderStatus::Cancelled,
];

impl OrderStatus {
    /// Stable storage form — this is what the orders table holds.
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Created => "created",
            OrderStatus::Confirmed => "confirmed",
            OrderStatus::Shipped => "shipped",
            OrderStatus::AtWarehouse => "at_warehouse",
            OrderStatus::PickedUp => "picked_up",
            OrderStatus::Returned => "returned",
            OrderStatus::Cancelled => "cancelled",
        }
    }

    /// Allowed next statuses. Terminal statuses return the empty slice.
    pub fn allowed_transitions(&self) -> &'static [OrderStatus] {
        match self {
            OrderStatus::Created => &[OrderStatus::Confirmed, OrderStatus::Cancelled],
            OrderStatus::Confirmed => &[OrderStatus::Shipped, OrderStatus::Cancelled],
            OrderStatus::Shipped => &[OrderStatus::AtWarehouse, OrderStatus::Returned],
            OrderStatus::AtWarehouse => &[OrderStatus::PickedUp, OrderStatus::Returned],
            OrderStatus::PickedUp | OrderStatus::Returned | OrderStatus::Cancelled => &[],
        }
    }

    pub fn can_transition(&self, to: OrderStatus) -> bool {
        self.allowed_transitions().contains(&to)
    }

    pub fn is_terminal(&self) -> bool {
        self.allowed_transitions().is_empty()
    }

    /// The typed rejection for a bad transition.
    pub fn check_transition(&self, to: OrderStatus) -> OpsResult<()> {
        if self.can_transition(to) {
            Ok(())
        } else {
            Err(OpsError::InvalidTransition { from: *self, to })
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrderStatus {
    type Err = OpsError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        ALL_STATUSES
            .iter()
            .find(|s| s.as_str() == raw)
            .copied()
            .ok_or_else(|| OpsError::Unrecognized {
                what: "order status",
                raw: raw.to_string(),
            })
    }
}
