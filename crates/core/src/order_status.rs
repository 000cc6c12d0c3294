use serde::{Deserialize, Serialize};

/// Order lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    /// Created but not yet sent to a broker
    Pending,
    /// Sent to the broker
    Submitted,
    /// Broker confirmed receipt
    Acknowledged,
    /// Partially executed
    PartiallyFilled,
    /// Completely executed
    Filled,
    /// Successfully cancelled
    Cancelled,
    /// Rejected by risk or by the broker
    Rejected,
    /// Failure during processing
    Error,
    /// Expired (e.g. a DAY order after the close)
    Expired,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Submitted => "SUBMITTED",
            Self::Acknowledged => "ACKNOWLEDGED",
            Self::PartiallyFilled => "PARTIALLY_FILLED",
            Self::Filled => "FILLED",
            Self::Cancelled => "CANCELLED",
            Self::Rejected => "REJECTED",
            Self::Error => "ERROR",
            Self::Expired => "EXPIRED",
        }
    }

    /// Returns true if no further updates will be emitted for the order
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Filled | Self::Cancelled | Self::Rejected | Self::Error | Self::Expired
        )
    }

    /// Returns true if the order can still trade
    pub fn is_active(&self) -> bool {
        !self.is_terminal()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_set() {
        assert!(OrderStatus::Filled.is_terminal());
        assert!(OrderStatus::Cancelled.is_terminal());
        assert!(OrderStatus::Rejected.is_terminal());
        assert!(OrderStatus::Error.is_terminal());
        assert!(OrderStatus::Expired.is_terminal());

        assert!(OrderStatus::Pending.is_active());
        assert!(OrderStatus::Submitted.is_active());
        assert!(OrderStatus::Acknowledged.is_active());
        assert!(OrderStatus::PartiallyFilled.is_active());
    }

    #[test]
    fn test_stable_text_forms() {
        assert_eq!(OrderStatus::PartiallyFilled.as_str(), "PARTIALLY_FILLED");
        assert_eq!(
            serde_json::to_string(&OrderStatus::PartiallyFilled).unwrap(),
            "\"PARTIALLY_FILLED\""
        );
    }
}
