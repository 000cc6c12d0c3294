use serde::{Deserialize, Serialize};

/// Order type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderType {
    /// Execute at the current market price
    Market,
    /// Execute at the limit price or better
    Limit,
    /// Trigger a market order when the stop level trades
    Stop,
    /// Trigger a limit order when the stop level trades
    StopLimit,
}

impl OrderType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Market => "MARKET",
            Self::Limit => "LIMIT",
            Self::Stop => "STOP",
            Self::StopLimit => "STOP_LIMIT",
        }
    }

    /// Whether this type carries a mandatory limit price
    pub fn requires_price(&self) -> bool {
        matches!(self, Self::Limit | Self::StopLimit)
    }

    /// Whether this type carries a mandatory stop price
    pub fn requires_stop_price(&self) -> bool {
        matches!(self, Self::Stop | Self::StopLimit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_price_requirements() {
        assert!(!OrderType::Market.requires_price());
        assert!(OrderType::Limit.requires_price());
        assert!(OrderType::Stop.requires_stop_price());
        assert!(OrderType::StopLimit.requires_price());
        assert!(OrderType::StopLimit.requires_stop_price());
    }

    #[test]
    fn test_stable_text_forms() {
        assert_eq!(OrderType::StopLimit.as_str(), "STOP_LIMIT");
        assert_eq!(
            serde_json::to_string(&OrderType::StopLimit).unwrap(),
            "\"STOP_LIMIT\""
        );
    }
}
