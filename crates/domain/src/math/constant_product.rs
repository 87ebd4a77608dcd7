use crate::token::TokenAmount;
use primitive_types::{U256, U512};

/// Protocol fee taken on every swap hop, in basis points (0.3%).
pub const DEFAULT_FEE_BPS: u32 = 30;

/// Liquidity tokens locked forever when a pool is first funded.
pub const MINIMUM_LIQUIDITY: u64 = 1000;

/// `floor(a * b / c)` without intermediate overflow. `None` on division by zero
/// or when the result does not fit 256 bits.
pub fn mul_div_floor(a: U256, b: U256, c: U256) -> Option<U256> {
    if c.is_zero() {
        return None;
    }
    if let Some(product) = a.checked_mul(b) {
        return Some(product / c);
    }
    let wide: U512 = a.full_mul(b) / U512::from(c);
    U256::try_from(wide).ok()
}

/// Calculates the output amount for a given input amount in a constant product pool (x * y = k).
///
/// formula: dy = y * dx / (x + dx)
/// taking fee into account: dy = y * (dx * (1 - fee)) / (x + (dx * (1 - fee)))
pub fn calculate_out_amount(
    amount_in: TokenAmount,
    reserve_in: TokenAmount,
    reserve_out: TokenAmount,
    fee_bps: u32,
) -> Result<TokenAmount, &'static str> {
    let amount_in = amount_in.0;
    let reserve_in = reserve_in.0;
    let reserve_out = reserve_out.0;

    if amount_in.is_zero() {
        return Ok(TokenAmount::zero());
    }
    if reserve_in.is_zero() || reserve_out.is_zero() {
        return Err("Reserves must be non-zero");
    }

    let amount_in_with_fee = amount_in
        .checked_mul(U256::from(10000 - fee_bps))
        .ok_or("Overflow")?;
    let denominator = reserve_in
        .checked_mul(U256::from(10000))
        .ok_or("Overflow")?
        .checked_add(amount_in_with_fee)
        .ok_or("Overflow")?;

    let amount_out = mul_div_floor(amount_in_with_fee, reserve_out, denominator).ok_or("Overflow")?;

    Ok(TokenAmount(amount_out))
}

/// Input required to receive exactly `amount_out`, rounded up.
pub fn calculate_in_amount(
    amount_out: TokenAmount,
    reserve_in: TokenAmount,
    reserve_out: TokenAmount,
    fee_bps: u32,
) -> Result<TokenAmount, &'static str> {
    let amount_out = amount_out.0;
    let reserve_in = reserve_in.0;
    let reserve_out = reserve_out.0;

    if amount_out.is_zero() {
        return Ok(TokenAmount::zero());
    }
    if reserve_in.is_zero() || reserve_out.is_zero() {
        return Err("Reserves must be non-zero");
    }
    if amount_out >= reserve_out {
        return Err("Insufficient liquidity");
    }

    let numerator = reserve_in
        .checked_mul(U256::from(10000))
        .ok_or("Overflow")?;
    let denominator = (reserve_out - amount_out)
        .checked_mul(U256::from(10000 - fee_bps))
        .ok_or("Overflow")?;

    let amount_in = mul_div_floor(numerator, amount_out, denominator).ok_or("Overflow")?;
    Ok(TokenAmount(amount_in + U256::one()))
}

/// Amount of token B matching `amount_a` at the pool's current ratio.
pub fn quote_counter_amount(
    amount_a: TokenAmount,
    reserve_a: TokenAmount,
    reserve_b: TokenAmount,
) -> Result<TokenAmount, &'static str> {
    if reserve_a.is_zero() || reserve_b.is_zero() {
        return Err("Reserves must be non-zero");
    }
    mul_div_floor(amount_a.0, reserve_b.0, reserve_a.0)
        .map(TokenAmount)
        .ok_or("Overflow")
}

/// Liquidity tokens minted for a deposit of `amount_a` and `amount_b`.
pub fn calculate_liquidity_minted(
    amount_a: TokenAmount,
    amount_b: TokenAmount,
    reserve_a: TokenAmount,
    reserve_b: TokenAmount,
    total_supply: TokenAmount,
) -> Result<TokenAmount, &'static str> {
    if total_supply.is_zero() {
        let root = amount_a
            .0
            .checked_mul(amount_b.0)
            .ok_or("Overflow")?
            .integer_sqrt();
        let minimum = U256::from(MINIMUM_LIQUIDITY);
        if root <= minimum {
            return Err("Insufficient liquidity minted");
        }
        return Ok(TokenAmount(root - minimum));
    }

    let by_a = mul_div_floor(amount_a.0, total_supply.0, reserve_a.0).ok_or("Overflow")?;
    let by_b = mul_div_floor(amount_b.0, total_supply.0, reserve_b.0).ok_or("Overflow")?;
    let minted = by_a.min(by_b);
    if minted.is_zero() {
        return Err("Insufficient liquidity minted");
    }
    Ok(TokenAmount(minted))
}
