//! Token metadata resolution with a session-lifetime cache.

use crate::error::ClientError;
use cpamm_domain::{Address, TokenDescriptor, is_native, parse_address, to_hex};
use cpamm_protocols::{CallOutput, LedgerNode, NodeError, ReadCall};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, warn};

/// Outcome of a metadata lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Resolved(TokenDescriptor),
    /// The metadata calls did not all succeed. Not cached, so the next
    /// lookup retries.
    Unresolved(Address),
}

impl Resolution {
    pub fn is_resolved(&self) -> bool {
        matches!(self, Self::Resolved(_))
    }

    /// The descriptor, or the `Unknown` placeholder.
    pub fn descriptor_or_placeholder(self) -> TokenDescriptor {
        match self {
            Self::Resolved(token) => token,
            Self::Unresolved(address) => TokenDescriptor::unknown(address),
        }
    }

    pub fn into_result(self) -> Result<TokenDescriptor, ClientError> {
        match self {
            Self::Resolved(token) => Ok(token),
            Self::Unresolved(address) => Err(ClientError::Unresolved(to_hex(&address))),
        }
    }
}

fn metadata_calls(token: Address) -> [ReadCall; 3] {
    [
        ReadCall::Symbol { token },
        ReadCall::Name { token },
        ReadCall::Decimals { token },
    ]
}

fn descriptor_from(
    address: Address,
    symbol: Result<CallOutput, NodeError>,
    name: Result<CallOutput, NodeError>,
    decimals: Result<CallOutput, NodeError>,
) -> Result<TokenDescriptor, NodeError> {
    Ok(TokenDescriptor::new(
        address,
        symbol?.into_text()?,
        name?.into_text()?,
        decimals?.into_decimals()?,
    ))
}

/// Resolves symbol, name and decimals for token contracts.
pub struct TokenResolver {
    node: Arc<dyn LedgerNode>,
    cache: RwLock<HashMap<Address, TokenDescriptor>>,
}

impl TokenResolver {
    pub fn new(node: Arc<dyn LedgerNode>) -> Self {
        Self {
            node,
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Pre-populates the cache with descriptors whose metadata is already
    /// known, such as the built-in token list.
    pub async fn seed(&self, tokens: impl IntoIterator<Item = TokenDescriptor>) {
        let mut cache = self.cache.write().await;
        for token in tokens {
            cache.entry(token.address).or_insert(token);
        }
    }

    pub async fn cached(&self, address: &Address) -> Option<TokenDescriptor> {
        if is_native(address) {
            return Some(TokenDescriptor::native());
        }
        self.cache.read().await.get(address).cloned()
    }

    /// Parses `input` and resolves it. Malformed input fails before any call.
    pub async fn resolve(&self, input: &str) -> Result<Resolution, ClientError> {
        let address = parse_address(input)?;
        Ok(self.resolve_address(address).await)
    }

    pub async fn resolve_address(&self, address: Address) -> Resolution {
        if let Some(token) = self.cached(&address).await {
            return Resolution::Resolved(token);
        }

        let [symbol, name, decimals] = metadata_calls(address);
        let mut results = self
            .node
            .call_batch(vec![symbol, name, decimals])
            .await
            .into_iter();
        let mut next = || {
            results
                .next()
                .unwrap_or_else(|| Err(NodeError::Decode("missing response".to_string())))
        };
        let (symbol, name, decimals) = (next(), next(), next());
        self.finish(address, descriptor_from(address, symbol, name, decimals))
            .await
    }

    /// Resolves every address, issuing one batched request for all cache
    /// misses. Duplicates are looked up once.
    pub async fn resolve_many(&self, addresses: &[Address]) -> HashMap<Address, Resolution> {
        let mut resolved = HashMap::new();
        let mut misses = Vec::new();
        for address in addresses {
            if resolved.contains_key(address) || misses.contains(address) {
                continue;
            }
            match self.cached(address).await {
                Some(token) => {
                    resolved.insert(*address, Resolution::Resolved(token));
                }
                None => misses.push(*address),
            }
        }
        if misses.is_empty() {
            return resolved;
        }

        debug!(count = misses.len(), "resolving token metadata");
        let calls = misses.iter().flat_map(|a| metadata_calls(*a)).collect();
        let mut results = self.node.call_batch(calls).await.into_iter();
        for address in misses {
            let mut next = || {
                results
                    .next()
                    .unwrap_or_else(|| Err(NodeError::Decode("missing response".to_string())))
            };
            let (symbol, name, decimals) = (next(), next(), next());
            let resolution = self
                .finish(address, descriptor_from(address, symbol, name, decimals))
                .await;
            resolved.insert(address, resolution);
        }
        resolved
    }

    async fn finish(
        &self,
        address: Address,
        outcome: Result<TokenDescriptor, NodeError>,
    ) -> Resolution {
        match outcome {
            Ok(token) => {
                debug!(token = %to_hex(&address), symbol = %token.symbol, "resolved token");
                self.cache
                    .write()
                    .await
                    .entry(address)
                    .or_insert_with(|| token.clone());
                Resolution::Resolved(token)
            }
            Err(e) => {
                warn!(token = %to_hex(&address), error = %e, "token metadata unresolved");
                Resolution::Unresolved(address)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::Fixture;
    use cpamm_domain::NATIVE_TOKEN;

    #[tokio::test]
    async fn test_native_resolves_without_network() {
        let fx = Fixture::new();
        let resolver = TokenResolver::new(fx.node());
        let token = resolver
            .resolve_address(NATIVE_TOKEN)
            .await
            .into_result()
            .unwrap();
        assert_eq!(token.symbol, "ETH");
        assert_eq!(token.decimals, 18);
        assert_eq!(fx.ledger.round_trips(), 0);
    }

    #[tokio::test]
    async fn test_malformed_address_fails_before_any_call() {
        let fx = Fixture::new();
        let resolver = TokenResolver::new(fx.node());
        let err = resolver.resolve("0x12345").await.unwrap_err();
        assert!(matches!(err, ClientError::InvalidAddress(_)));
        assert_eq!(fx.ledger.round_trips(), 0);
    }

    #[tokio::test]
    async fn test_repeat_resolution_is_cache_hit() {
        let fx = Fixture::new();
        let resolver = TokenResolver::new(fx.node());
        let first = resolver.resolve(&to_hex(&fx.usdc)).await.unwrap();
        assert_eq!(fx.ledger.round_trips(), 1);
        let shouted = to_hex(&fx.usdc).to_uppercase().replace("0X", "0x");
        let second = resolver.resolve(&shouted).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(fx.ledger.round_trips(), 1);
        match second {
            Resolution::Resolved(token) => assert_eq!(token.decimals, 6),
            Resolution::Unresolved(_) => panic!("expected resolved token"),
        }
    }

    #[tokio::test]
    async fn test_non_token_is_unresolved_and_retried() {
        let fx = Fixture::new();
        let resolver = TokenResolver::new(fx.node());
        let bare = Address::repeat_byte(0xee);
        fx.ledger.add_bare_token(bare);

        let first = resolver.resolve_address(bare).await;
        assert_eq!(first, Resolution::Unresolved(bare));
        assert_eq!(first.descriptor_or_placeholder().symbol, "Unknown");

        resolver.resolve_address(bare).await;
        assert_eq!(fx.ledger.round_trips(), 2);
    }

    #[tokio::test]
    async fn test_resolve_many_batches_misses() {
        let fx = Fixture::new();
        let resolver = TokenResolver::new(fx.node());
        resolver.resolve_address(fx.usdc).await;
        let trips = fx.ledger.round_trips();

        let result = resolver
            .resolve_many(&[fx.usdc, fx.cafe, fx.weth, fx.cafe, NATIVE_TOKEN])
            .await;
        assert_eq!(result.len(), 4);
        assert!(result.values().all(Resolution::is_resolved));
        assert_eq!(fx.ledger.round_trips(), trips + 1);
    }
}
