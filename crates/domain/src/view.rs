//! Derived, non-authoritative pool views.
//!
//! All functions here are pure: the same snapshot always yields the same view.

use crate::address::Address;
use crate::math::constant_product::mul_div_floor;
use crate::pool::PoolSnapshot;
use crate::pricing::PriceTable;
use crate::token::TokenDescriptor;
use crate::value_objects::amount::{Amount, format_units};
use primitive_types::U256;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Share precision: parts per 10 000.
const SHARE_SCALE: u32 = 10_000;

/// Liquidity tokens always use 18 decimals.
const LIQUIDITY_DECIMALS: u8 = 18;

/// User-facing figures computed from one [`PoolSnapshot`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DerivedPoolView {
    pub pair_address: Address,
    pub token_a: TokenDescriptor,
    pub token_b: TokenDescriptor,
    /// Exact decimal text of reserve A.
    pub reserve_a: String,
    /// Exact decimal text of reserve B.
    pub reserve_b: String,
    pub total_supply: String,
    pub caller_liquidity: U256,
    /// Caller share in parts per 10 000, floored.
    pub share_bps: u32,
    pub redeemable_a: U256,
    pub redeemable_b: U256,
    /// Advisory USD value of both reserves.
    pub estimated_value: Decimal,
    /// Advisory USD value of the caller's redeemable amounts.
    pub caller_value: Decimal,
}

impl DerivedPoolView {
    /// Caller share as a percentage, e.g. `12.5` for 12.5%.
    pub fn share_percent(&self) -> Decimal {
        Decimal::from(self.share_bps) / Decimal::from(100)
    }

    pub fn has_position(&self) -> bool {
        !self.caller_liquidity.is_zero()
    }

    pub fn pair_label(&self) -> String {
        format!("{}/{}", self.token_a.symbol, self.token_b.symbol)
    }
}

/// Builds the view for one snapshot.
pub fn build_pool_view(snapshot: &PoolSnapshot, prices: &PriceTable) -> DerivedPoolView {
    let balance = snapshot.effective_caller_balance();
    let share_bps = if snapshot.total_supply.is_zero() {
        0
    } else {
        mul_div_floor(balance, U256::from(SHARE_SCALE), snapshot.total_supply)
            .map(|s| s.low_u32())
            .unwrap_or(0)
    };
    let (redeemable_a, redeemable_b) = snapshot.redeemable(balance);

    let value = |raw_a: U256, raw_b: U256| {
        let a = prices.value_of(
            Amount::new(raw_a, snapshot.token_a.decimals),
            &snapshot.token_a.symbol,
        );
        let b = prices.value_of(
            Amount::new(raw_b, snapshot.token_b.decimals),
            &snapshot.token_b.symbol,
        );
        a.checked_add(b).unwrap_or(Decimal::MAX)
    };

    DerivedPoolView {
        pair_address: snapshot.pair_address,
        token_a: snapshot.token_a.clone(),
        token_b: snapshot.token_b.clone(),
        reserve_a: format_units(snapshot.reserve_a, snapshot.token_a.decimals),
        reserve_b: format_units(snapshot.reserve_b, snapshot.token_b.decimals),
        total_supply: format_units(snapshot.total_supply, LIQUIDITY_DECIMALS),
        caller_liquidity: balance,
        share_bps,
        redeemable_a,
        redeemable_b,
        estimated_value: value(snapshot.reserve_a, snapshot.reserve_b),
        caller_value: value(redeemable_a, redeemable_b),
    }
}

/// Aggregate figures across a set of pool views.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PoolStats {
    /// Advisory total value locked.
    pub total_value: Decimal,
    /// Advisory value of the caller's positions.
    pub caller_value: Decimal,
    pub pool_count: usize,
    pub active_pools: usize,
}

pub fn pool_stats(views: &[DerivedPoolView]) -> PoolStats {
    views.iter().fold(PoolStats::default(), |mut stats, view| {
        stats.total_value = stats.total_value.saturating_add(view.estimated_value);
        stats.caller_value = stats.caller_value.saturating_add(view.caller_value);
        stats.pool_count += 1;
        if view.has_position() {
            stats.active_pools += 1;
        }
        stats
    })
}

/// Views in which the caller holds liquidity.
pub fn my_pools(views: &[DerivedPoolView]) -> Vec<&DerivedPoolView> {
    views.iter().filter(|v| v.has_position()).collect()
}
