//! Ledger key layout. Every key is prefixed with the coin name.

/// Identity of a round's share accumulator.
///
/// The open round has no identity of its own until its block is found; a closed
/// round is identified by the height of the block that closed it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Round {
    Current,
    Closed { height: u64 },
}

impl Round {
    fn suffix(&self) -> String {
        match self {
            Round::Current => "Current".to_string(),
            Round::Closed { height } => height.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerKeys {
    coin: String,
}

impl LedgerKeys {
    pub fn new(coin: impl Into<String>) -> Self {
        Self { coin: coin.into() }
    }

    pub fn coin(&self) -> &str {
        &self.coin
    }

    /// Worker -> accumulated difficulty hash of a round.
    pub fn round(&self, round: Round) -> String {
        format!("{}:shares:round{}", self.coin, round.suffix())
    }

    /// Share timing hash kept parallel to the round accumulator.
    pub fn times(&self, round: Round) -> String {
        format!("{}:shares:times{}", self.coin, round.suffix())
    }

    pub fn stats(&self) -> String {
        format!("{}:stats", self.coin)
    }

    pub fn hashrate(&self) -> String {
        format!("{}:hashrate", self.coin)
    }

    pub fn blocks_pending(&self) -> String {
        format!("{}:blocksPending", self.coin)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_layout() {
        let keys = LedgerKeys::new("litecoin");
        assert_eq!(keys.round(Round::Current), "litecoin:shares:roundCurrent");
        assert_eq!(keys.times(Round::Current), "litecoin:shares:timesCurrent");
        assert_eq!(
            keys.round(Round::Closed { height: 500 }),
            "litecoin:shares:round500"
        );
        assert_eq!(
            keys.times(Round::Closed { height: 500 }),
            "litecoin:shares:times500"
        );
        assert_eq!(keys.stats(), "litecoin:stats");
        assert_eq!(keys.hashrate(), "litecoin:hashrate");
        assert_eq!(keys.blocks_pending(), "litecoin:blocksPending");
    }
}
