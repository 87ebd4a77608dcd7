use crate::address::{Address, is_native, to_hex};
use crate::error::DomainError;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Ordered token hops for a trade; every consecutive pair is a pool.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TradePath(Vec<Address>);

impl TradePath {
    /// Validates that the path has at least two distinct tokens and no repeats.
    pub fn new(tokens: Vec<Address>) -> Result<Self, DomainError> {
        if tokens.len() < 2 {
            return Err(DomainError::InvalidPath(format!(
                "expected at least 2 tokens, got {}",
                tokens.len()
            )));
        }
        if tokens.len() == 2 && tokens[0] == tokens[1] {
            return Err(DomainError::IdenticalTokens);
        }
        let mut seen = HashSet::with_capacity(tokens.len());
        for token in &tokens {
            if !seen.insert(*token) {
                return Err(DomainError::InvalidPath(format!(
                    "token {} appears twice",
                    to_hex(token)
                )));
            }
        }
        Ok(Self(tokens))
    }

    /// Tokens in trade order.
    pub fn tokens(&self) -> &[Address] {
        &self.0
    }

    /// Number of tokens, always at least two.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Token sold. Paths always hold at least two tokens.
    pub fn first(&self) -> Address {
        self.0[0]
    }

    /// Token bought.
    pub fn last(&self) -> Address {
        self.0[self.0.len() - 1]
    }

    /// Consecutive `(from, to)` pool hops.
    pub fn hops(&self) -> impl Iterator<Item = (Address, Address)> + '_ {
        self.0.windows(2).map(|w| (w[0], w[1]))
    }

    pub fn into_inner(self) -> Vec<Address> {
        self.0
    }
}

/// Replaces the native sentinel with the routing asset's wrapped form.
pub fn wrap_native(token: Address, routing_asset: Address) -> Address {
    if is_native(&token) { routing_asset } else { token }
}

/// Builds a trade path, routing through `routing_asset` when neither end is it.
///
/// Rules, in order:
/// 1. a native endpoint becomes the wrapped routing asset;
/// 2. if either endpoint is the routing asset the path is direct;
/// 3. otherwise the path is `[token_in, routing_asset, token_out]`.
pub fn build_path(
    token_in: Address,
    token_out: Address,
    routing_asset: Address,
) -> Result<TradePath, DomainError> {
    let start = wrap_native(token_in, routing_asset);
    let end = wrap_native(token_out, routing_asset);

    if start == end {
        return Err(DomainError::IdenticalTokens);
    }
    if start == routing_asset || end == routing_asset {
        return TradePath::new(vec![start, end]);
    }
    TradePath::new(vec![start, routing_asset, end])
}

/// Direct two-token path, with native endpoints wrapped.
pub fn direct_path(
    token_in: Address,
    token_out: Address,
    routing_asset: Address,
) -> Result<TradePath, DomainError> {
    TradePath::new(vec![
        wrap_native(token_in, routing_asset),
        wrap_native(token_out, routing_asset),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::NATIVE_TOKEN;
    use primitive_types::H160;

    fn weth() -> Address {
        H160::repeat_byte(0xee)
    }

    #[test]
    fn test_native_input_starts_with_wrapped() {
        let token_x = H160::repeat_byte(0x01);
        let path = build_path(NATIVE_TOKEN, token_x, weth()).unwrap();
        assert_eq!(path.first(), weth());
        assert_ne!(path.first(), NATIVE_TOKEN);
        assert_eq!(path.tokens(), &[weth(), token_x]);
    }

    #[test]
    fn test_native_output_ends_with_wrapped() {
        let token_x = H160::repeat_byte(0x01);
        let path = build_path(token_x, NATIVE_TOKEN, weth()).unwrap();
        assert_eq!(path.tokens(), &[token_x, weth()]);
    }

    #[test]
    fn test_routes_through_routing_asset() {
        let a = H160::repeat_byte(0x0a);
        let b = H160::repeat_byte(0x0b);
        let path = build_path(a, b, weth()).unwrap();
        assert_eq!(path.tokens(), &[a, weth(), b]);
        assert_eq!(path.hops().count(), 2);
    }

    #[test]
    fn test_identical_endpoints_rejected() {
        let a = H160::repeat_byte(0x0a);
        assert_eq!(build_path(a, a, weth()), Err(DomainError::IdenticalTokens));
        assert_eq!(
            build_path(NATIVE_TOKEN, weth(), weth()),
            Err(DomainError::IdenticalTokens)
        );
    }

    #[test]
    fn test_path_validation() {
        let a = H160::repeat_byte(0x0a);
        assert!(TradePath::new(vec![a]).is_err());
        assert!(TradePath::new(vec![a, weth(), a]).is_err());
    }
}
