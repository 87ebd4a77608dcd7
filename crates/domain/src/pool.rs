use crate::address::Address;
use crate::math::constant_product::mul_div_floor;
use crate::token::TokenDescriptor;
use primitive_types::U256;
use serde::{Deserialize, Serialize};

/// Point-in-time read of one pair contract.
///
/// Snapshots are replaced wholesale on every refresh, never patched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolSnapshot {
    pub pair_address: Address,
    pub token_a: TokenDescriptor,
    pub token_b: TokenDescriptor,
    pub reserve_a: U256,
    pub reserve_b: U256,
    pub total_supply: U256,
    pub caller_balance: U256,
}

impl PoolSnapshot {
    /// Caller balance clamped to the total supply.
    pub fn effective_caller_balance(&self) -> U256 {
        self.caller_balance.min(self.total_supply)
    }

    /// `(floor(reserve_a * liquidity / supply), floor(reserve_b * liquidity / supply))`.
    ///
    /// Liquidity above the total supply is clamped, so neither amount can
    /// exceed its reserve.
    pub fn redeemable(&self, liquidity: U256) -> (U256, U256) {
        if self.total_supply.is_zero() {
            return (U256::zero(), U256::zero());
        }
        let liquidity = liquidity.min(self.total_supply);
        let share = |reserve: U256| {
            mul_div_floor(reserve, liquidity, self.total_supply).unwrap_or_default()
        };
        (share(self.reserve_a), share(self.reserve_b))
    }

    pub fn contains(&self, token: &Address) -> bool {
        self.token_a.address == *token || self.token_b.address == *token
    }

    /// Reserve held for `token`, if it is one side of the pair.
    pub fn reserve_of(&self, token: &Address) -> Option<U256> {
        if self.token_a.address == *token {
            Some(self.reserve_a)
        } else if self.token_b.address == *token {
            Some(self.reserve_b)
        } else {
            None
        }
    }
}
