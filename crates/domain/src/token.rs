use crate::address::{Address, NATIVE_TOKEN};
use primitive_types::U256;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Decimals assumed for the native asset and for unresolved tokens.
pub const DEFAULT_DECIMALS: u8 = 18;

/// Resolved metadata for a token contract.
///
/// Identity is the address; two descriptors with the same address describe the
/// same token regardless of the other fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenDescriptor {
    pub address: Address,
    pub symbol: String,
    pub name: String,
    pub decimals: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    #[serde(default)]
    pub is_user_added: bool,
}

impl TokenDescriptor {
    pub fn new(
        address: Address,
        symbol: impl Into<String>,
        name: impl Into<String>,
        decimals: u8,
    ) -> Self {
        let symbol = symbol.into();
        Self {
            address,
            icon: icon_for_symbol(&symbol),
            symbol,
            name: name.into(),
            decimals,
            is_user_added: false,
        }
    }

    /// Built-in descriptor for the native asset.
    pub fn native() -> Self {
        Self::new(NATIVE_TOKEN, "ETH", "Ether", DEFAULT_DECIMALS)
    }

    /// Placeholder used when metadata for `address` could not be resolved.
    pub fn unknown(address: Address) -> Self {
        Self {
            address,
            symbol: "Unknown".to_string(),
            name: "Unknown Token".to_string(),
            decimals: DEFAULT_DECIMALS,
            icon: None,
            is_user_added: false,
        }
    }

    /// Marks the descriptor as added by the user.
    #[must_use]
    pub fn user_added(mut self) -> Self {
        self.is_user_added = true;
        self
    }

    pub fn is_native(&self) -> bool {
        self.address == NATIVE_TOKEN
    }
}

impl PartialEq for TokenDescriptor {
    fn eq(&self, other: &Self) -> bool {
        self.address == other.address
    }
}

impl Eq for TokenDescriptor {}

impl std::hash::Hash for TokenDescriptor {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.address.hash(state);
    }
}

/// Display icon reference for well-known symbols.
pub fn icon_for_symbol(symbol: &str) -> Option<String> {
    let icon = match symbol {
        "ETH" | "WETH" => "/eth.png",
        "USDC" => "/usdc.png",
        "USDT" => "/usdt.png",
        "DAI" => "/dai.png",
        _ => return None,
    };
    Some(icon.to_string())
}

/// A raw token amount in the token's smallest unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TokenAmount(pub U256);

impl TokenAmount {
    pub fn new(amount: impl Into<U256>) -> Self {
        Self(amount.into())
    }

    pub fn zero() -> Self {
        Self(U256::zero())
    }

    pub fn as_u256(&self) -> U256 {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }
}

impl From<u64> for TokenAmount {
    fn from(v: u64) -> Self {
        Self(U256::from(v))
    }
}

impl From<u128> for TokenAmount {
    fn from(v: u128) -> Self {
        Self(U256::from(v))
    }
}

impl From<U256> for TokenAmount {
    fn from(v: U256) -> Self {
        Self(v)
    }
}

impl fmt::Display for TokenAmount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::parse_address;

    #[test]
    fn test_identity_is_address() {
        let addr = parse_address("0x5FC8d32690cc91D4c39d9d3abcBD16989F875707").unwrap();
        let a = TokenDescriptor::new(addr, "USDC", "USD Coin", 6);
        let b = TokenDescriptor::unknown(addr);
        assert_eq!(a, b);
        assert_eq!(a.icon.as_deref(), Some("/usdc.png"));
    }

    #[test]
    fn test_native_descriptor() {
        let native = TokenDescriptor::native();
        assert!(native.is_native());
        assert_eq!(native.decimals, 18);
    }
}
