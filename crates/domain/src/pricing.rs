//! Static, symbol-keyed price table.
//!
//! Values derived from this table are advisory estimates for display only.
//! They must never feed slippage minimums or any other safety check.

use crate::value_objects::amount::Amount;
use rust_decimal::Decimal;
use std::collections::HashMap;

/// Symbol-keyed USD price estimates.
#[derive(Debug, Clone)]
pub struct PriceTable {
    prices: HashMap<String, Decimal>,
    fallback: Decimal,
}

impl PriceTable {
    pub fn new(fallback: Decimal) -> Self {
        Self {
            prices: HashMap::new(),
            fallback,
        }
    }

    #[must_use]
    pub fn with_price(mut self, symbol: impl Into<String>, price: Decimal) -> Self {
        self.prices.insert(symbol.into(), price);
        self
    }

    pub fn price_of(&self, symbol: &str) -> Decimal {
        self.prices.get(symbol).copied().unwrap_or(self.fallback)
    }

    /// Estimated USD value of `amount` of the token with `symbol`.
    pub fn value_of(&self, amount: Amount, symbol: &str) -> Decimal {
        amount
            .to_decimal()
            .checked_mul(self.price_of(symbol))
            .unwrap_or(Decimal::MAX)
    }
}

impl Default for PriceTable {
    fn default() -> Self {
        Self::new(Decimal::new(1, 1))
            .with_price("ETH", Decimal::from(2000))
            .with_price("WETH", Decimal::from(2000))
            .with_price("USDC", Decimal::ONE)
            .with_price("USDT", Decimal::ONE)
            .with_price("CAFE", Decimal::new(1, 1))
    }
}
