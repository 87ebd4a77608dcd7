use crate::error::DomainError;
use primitive_types::H160;

/// A 20-byte contract or account address.
///
/// Equality is on bytes, so textual case never matters.
pub type Address = H160;

/// Sentinel used for the chain's native asset.
pub const NATIVE_TOKEN: Address = H160::zero();

/// Returns true when `address` is the native-asset sentinel.
pub fn is_native(address: &Address) -> bool {
    *address == NATIVE_TOKEN
}

/// Parses a `0x`-prefixed (or bare) 40 hex digit address.
pub fn parse_address(input: &str) -> Result<Address, DomainError> {
    let trimmed = input.trim();
    let digits = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);

    if digits.len() != 40 {
        return Err(DomainError::InvalidAddress(input.to_string()));
    }

    let bytes = hex::decode(digits).map_err(|_| DomainError::InvalidAddress(input.to_string()))?;
    Ok(H160::from_slice(&bytes))
}

/// Lowercase `0x` hex rendering of an address.
pub fn to_hex(address: &Address) -> String {
    format!("0x{}", hex::encode(address.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_is_case_insensitive() {
        let lower = parse_address("0x5fbdb2315678afecb367f032d93f642f64180aa3").unwrap();
        let mixed = parse_address("0x5FbDB2315678afecb367f032d93F642f64180aa3").unwrap();
        assert_eq!(lower, mixed);
        assert_eq!(to_hex(&mixed), "0x5fbdb2315678afecb367f032d93f642f64180aa3");
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert!(parse_address("0x1234").is_err());
        assert!(parse_address("0xZZbdb2315678afecb367f032d93f642f64180aa3").is_err());
        assert!(parse_address("").is_err());
    }

    #[test]
    fn test_native_sentinel() {
        let zero = parse_address("0x0000000000000000000000000000000000000000").unwrap();
        assert!(is_native(&zero));
    }
}
