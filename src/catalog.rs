//! Fixed purchase tiers

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A (queries, price) purchase option
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Tier {
    Single,
    Ten,
    Hundred,
}

impl Tier {
    pub const ALL: [Tier; 3] = [Tier::Single, Tier::Ten, Tier::Hundred];

    /// Offered automatically when a query arrives with no balance left
    pub const TOP_UP: Tier = Tier::Single;

    pub fn queries(&self) -> i64 {
        match self {
            Tier::Single => 1,
            Tier::Ten => 10,
            Tier::Hundred => 100,
        }
    }

    pub fn price_sats(&self) -> i64 {
        match self {
            Tier::Single => 50,
            Tier::Ten => 450,
            Tier::Hundred => 3200,
        }
    }

    /// Invoice description shown in the payer's wallet
    pub fn memo(&self) -> String {
        match self {
            Tier::Single => "Single query credit purchase".to_string(),
            _ => format!("Bulk purchase of {} queries", self.queries()),
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.queries())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown tier '{0}' (expected 1, 10 or 100)")]
pub struct UnknownTier(String);

impl FromStr for Tier {
    type Err = UnknownTier;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        Tier::ALL
            .into_iter()
            .find(|tier| tier.queries().to_string() == trimmed)
            .ok_or_else(|| UnknownTier(trimmed.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_catalog_prices() {
        let catalog: Vec<(i64, i64)> = Tier::ALL
            .iter()
            .map(|t| (t.queries(), t.price_sats()))
            .collect();
        assert_eq!(catalog, vec![(1, 50), (10, 450), (100, 3200)]);
        assert_eq!(Tier::TOP_UP.price_sats(), 50);
    }

    #[test]
    fn test_tier_parsing() {
        assert_eq!("10".parse::<Tier>().unwrap(), Tier::Ten);
        assert_eq!(" 100".parse::<Tier>().unwrap(), Tier::Hundred);
        assert!("5".parse::<Tier>().is_err());
        assert_eq!(Tier::Ten.memo(), "Bulk purchase of 10 queries");
    }
}
