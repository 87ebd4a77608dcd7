//! Pool enumeration against the factory contract.
//!
//! A listing is fetched in a fixed number of round trips regardless of the
//! pool count: the count, the pool addresses, the pair details, the token
//! metadata misses and the caller's liquidity balances.

use crate::error::ClientError;
use crate::resolver::{Resolution, TokenResolver};
use cpamm_domain::path::wrap_native;
use cpamm_domain::{
    Address, DerivedPoolView, PoolSnapshot, PriceTable, TokenDescriptor, U256, build_pool_view,
    to_hex,
};
use cpamm_protocols::{CallOutput, ContractAddresses, LedgerNode, NodeError, ReadCall};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Result of one enumeration pass.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PoolListing {
    /// Snapshots in factory order (oldest first).
    pub pools: Vec<PoolSnapshot>,
    /// Pool count reported by the factory.
    pub total_pools: u64,
    /// Factory index of the first pool in this page.
    pub offset: u64,
    /// Addresses read in this pass, including excluded pools.
    pub scanned: u64,
    /// Set while a refresh is in flight, and when the address reads failed
    /// and the listing could not be completed.
    pub loading: bool,
    /// Pools dropped because their pair details could not be read.
    pub excluded: Vec<Address>,
}

impl PoolListing {
    fn settled(total_pools: u64, offset: u64) -> Self {
        Self {
            total_pools,
            offset,
            ..Self::default()
        }
    }

    /// Reverses the order so the most recently created pool comes first.
    #[must_use]
    pub fn newest_first(mut self) -> Self {
        self.pools.reverse();
        self
    }

    pub fn has_more(&self) -> bool {
        self.offset + self.scanned < self.total_pools
    }

    pub fn is_empty(&self) -> bool {
        self.pools.is_empty()
    }

    /// Derived views for every pool, priced with `prices`.
    pub fn views(&self, prices: &PriceTable) -> Vec<DerivedPoolView> {
        self.pools
            .iter()
            .map(|pool| build_pool_view(pool, prices))
            .collect()
    }
}

fn next_result(
    results: &mut impl Iterator<Item = Result<CallOutput, NodeError>>,
) -> Result<CallOutput, NodeError> {
    results
        .next()
        .unwrap_or_else(|| Err(NodeError::Decode("missing response".to_string())))
}

struct PairDetails {
    pair: Address,
    token0: Address,
    token1: Address,
    reserve0: U256,
    reserve1: U256,
    total_supply: U256,
}

fn pair_details(
    pair: Address,
    results: &mut impl Iterator<Item = Result<CallOutput, NodeError>>,
) -> Result<PairDetails, NodeError> {
    // Always consume all four results so the iterator stays aligned.
    let token0 = next_result(results);
    let token1 = next_result(results);
    let reserves = next_result(results);
    let supply = next_result(results);
    let (reserve0, reserve1) = reserves?.into_reserves()?;
    Ok(PairDetails {
        pair,
        token0: token0?.into_address()?,
        token1: token1?.into_address()?,
        reserve0,
        reserve1,
        total_supply: supply?.into_uint()?,
    })
}

/// Enumerates pools and publishes the latest listing to subscribers.
pub struct PoolRegistry {
    node: Arc<dyn LedgerNode>,
    resolver: Arc<TokenResolver>,
    contracts: ContractAddresses,
    listing: watch::Sender<PoolListing>,
}

impl PoolRegistry {
    pub fn new(
        node: Arc<dyn LedgerNode>,
        resolver: Arc<TokenResolver>,
        contracts: ContractAddresses,
    ) -> Self {
        // Nothing fetched yet: subscribers start in the loading state.
        let (listing, _) = watch::channel(PoolListing {
            loading: true,
            ..PoolListing::default()
        });
        Self {
            node,
            resolver,
            contracts,
            listing,
        }
    }

    /// The first `limit` pools in factory order.
    pub async fn list_pools(
        &self,
        limit: u64,
        caller: Option<Address>,
    ) -> Result<PoolListing, ClientError> {
        self.list_pools_page(0, limit, caller).await
    }

    /// Up to `limit` pools starting at factory index `offset`.
    ///
    /// Fails only when the pool count itself cannot be read. Later failures
    /// degrade the listing instead: see [`PoolListing::loading`] and
    /// [`PoolListing::excluded`].
    pub async fn list_pools_page(
        &self,
        offset: u64,
        limit: u64,
        caller: Option<Address>,
    ) -> Result<PoolListing, ClientError> {
        let factory = self.contracts.factory;
        let count = self
            .node
            .call(ReadCall::PoolCount { factory })
            .await
            .and_then(CallOutput::into_uint)
            .map_err(|e| ClientError::NodeUnavailable(e.to_string()))?;
        let total_pools = if count > U256::from(u64::MAX) {
            u64::MAX
        } else {
            count.low_u64()
        };

        let end = total_pools.min(offset.saturating_add(limit));
        if offset >= end {
            debug!(total_pools, offset, "no pools in range");
            return Ok(PoolListing::settled(total_pools, offset));
        }

        let address_calls = (offset..end)
            .map(|index| ReadCall::PoolAt { factory, index })
            .collect();
        let addresses: Result<Vec<Address>, NodeError> = self
            .node
            .call_batch(address_calls)
            .await
            .into_iter()
            .map(|r| r.and_then(CallOutput::into_address))
            .collect();
        let addresses = match addresses {
            Ok(addresses) => addresses,
            Err(e) => {
                warn!(error = %e, "pool address reads failed, listing incomplete");
                return Ok(PoolListing {
                    loading: true,
                    ..PoolListing::settled(total_pools, offset)
                });
            }
        };

        let detail_calls = addresses
            .iter()
            .flat_map(|&pair| {
                [
                    ReadCall::Token0 { pair },
                    ReadCall::Token1 { pair },
                    ReadCall::Reserves { pair },
                    ReadCall::TotalSupply { token: pair },
                ]
            })
            .collect();
        let mut results = self.node.call_batch(detail_calls).await.into_iter();

        let mut details = Vec::with_capacity(addresses.len());
        let mut excluded = Vec::new();
        for &pair in &addresses {
            match pair_details(pair, &mut results) {
                Ok(d) => details.push(d),
                Err(e) => {
                    warn!(pair = %to_hex(&pair), error = %e, "excluding pool");
                    excluded.push(pair);
                }
            }
        }

        let tokens: Vec<Address> = details
            .iter()
            .flat_map(|d| [d.token0, d.token1])
            .collect();
        let metadata = self.resolver.resolve_many(&tokens).await;
        let lookup = |address: &Address| {
            metadata
                .get(address)
                .cloned()
                .map(Resolution::descriptor_or_placeholder)
                .unwrap_or_else(|| TokenDescriptor::unknown(*address))
        };

        let balances = match caller {
            Some(owner) => self.caller_balances(owner, &details).await,
            None => vec![U256::zero(); details.len()],
        };

        let pools = details
            .into_iter()
            .zip(balances)
            .map(|(d, caller_balance)| PoolSnapshot {
                pair_address: d.pair,
                token_a: lookup(&d.token0),
                token_b: lookup(&d.token1),
                reserve_a: d.reserve0,
                reserve_b: d.reserve1,
                total_supply: d.total_supply,
                caller_balance,
            })
            .collect::<Vec<_>>();

        info!(
            total_pools,
            loaded = pools.len(),
            excluded = excluded.len(),
            "pool listing fetched"
        );
        Ok(PoolListing {
            pools,
            total_pools,
            offset,
            scanned: end - offset,
            loading: false,
            excluded,
        })
    }

    async fn caller_balances(&self, owner: Address, details: &[PairDetails]) -> Vec<U256> {
        if details.is_empty() {
            return Vec::new();
        }
        let calls = details
            .iter()
            .map(|d| ReadCall::BalanceOf { token: d.pair, owner })
            .collect();
        self.node
            .call_batch(calls)
            .await
            .into_iter()
            .zip(details)
            .map(|(result, d)| {
                result.and_then(CallOutput::into_uint).unwrap_or_else(|e| {
                    warn!(
                        pair = %to_hex(&d.pair),
                        error = %e,
                        "liquidity balance unavailable, using zero"
                    );
                    U256::zero()
                })
            })
            .collect()
    }

    /// Pair contract for two tokens, `None` when no pool exists. Native
    /// endpoints are looked up as the wrapped asset.
    pub async fn pair_for(
        &self,
        token_a: Address,
        token_b: Address,
    ) -> Result<Option<Address>, ClientError> {
        let weth = self.contracts.weth;
        let pair = self
            .node
            .call(ReadCall::PairFor {
                factory: self.contracts.factory,
                token_a: wrap_native(token_a, weth),
                token_b: wrap_native(token_b, weth),
            })
            .await?
            .into_address()?;
        Ok((!pair.is_zero()).then_some(pair))
    }

    /// Re-fetches the listing and publishes it.
    ///
    /// Subscribers first see the previous pools flagged as loading. When the
    /// pool addresses cannot be read the previous pools stay published with
    /// the flag still set. On failure the flag is cleared and the previous
    /// pools stay published.
    pub async fn refresh(
        &self,
        limit: u64,
        caller: Option<Address>,
    ) -> Result<PoolListing, ClientError> {
        self.listing.send_modify(|l| l.loading = true);
        match self.list_pools(limit, caller).await {
            Ok(listing) if listing.loading => {
                debug!("listing incomplete, keeping previous pools");
                self.listing.send_modify(|l| l.loading = true);
                Ok(listing)
            }
            Ok(listing) => {
                self.listing.send_replace(listing.clone());
                Ok(listing)
            }
            Err(e) => {
                self.listing.send_modify(|l| l.loading = false);
                Err(e)
            }
        }
    }

    /// Most recently published listing.
    pub fn latest(&self) -> PoolListing {
        self.listing.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<PoolListing> {
        self.listing.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{Fixture, units};
    use async_trait::async_trait;
    use cpamm_domain::NATIVE_TOKEN;
    use cpamm_protocols::{TxHash, TxReceipt, WriteCall};
    use std::sync::atomic::{AtomicBool, Ordering};

    /// Drops factory index reads on demand and forwards everything else.
    struct DroppingNode {
        inner: Arc<dyn LedgerNode>,
        drop_pool_reads: AtomicBool,
    }

    #[async_trait]
    impl LedgerNode for DroppingNode {
        async fn call(&self, call: ReadCall) -> Result<CallOutput, NodeError> {
            let dropping = self.drop_pool_reads.load(Ordering::SeqCst);
            if dropping && matches!(call, ReadCall::PoolAt { .. }) {
                return Err(NodeError::Unavailable("dropped".to_string()));
            }
            self.inner.call(call).await
        }

        async fn call_batch(&self, calls: Vec<ReadCall>) -> Vec<Result<CallOutput, NodeError>> {
            let dropping = self.drop_pool_reads.load(Ordering::SeqCst);
            let dropped: Vec<bool> = calls
                .iter()
                .map(|c| dropping && matches!(c, ReadCall::PoolAt { .. }))
                .collect();
            self.inner
                .call_batch(calls)
                .await
                .into_iter()
                .zip(dropped)
                .map(|(result, dropped)| {
                    if dropped {
                        Err(NodeError::Unavailable("dropped".to_string()))
                    } else {
                        result
                    }
                })
                .collect()
        }

        async fn send(&self, tx: WriteCall) -> Result<TxHash, NodeError> {
            self.inner.send(tx).await
        }

        async fn receipt(&self, hash: TxHash) -> Result<Option<TxReceipt>, NodeError> {
            self.inner.receipt(hash).await
        }

        async fn chain_id(&self) -> Result<u64, NodeError> {
            self.inner.chain_id().await
        }

        async fn block_number(&self) -> Result<u64, NodeError> {
            self.inner.block_number().await
        }

        async fn has_code(&self, address: Address) -> Result<bool, NodeError> {
            self.inner.has_code(address).await
        }
    }

    fn registry(fx: &Fixture) -> PoolRegistry {
        let node = fx.node();
        let resolver = Arc::new(TokenResolver::new(node.clone()));
        PoolRegistry::new(node, resolver, fx.contracts.clone())
    }

    #[tokio::test]
    async fn test_listing_uses_constant_round_trips() {
        let fx = Fixture::new();
        let registry = registry(&fx);

        let listing = registry.list_pools(10, Some(fx.user)).await.unwrap();
        assert_eq!(listing.total_pools, 2);
        assert_eq!(listing.pools.len(), 2);
        assert!(!listing.loading);
        assert!(!listing.has_more());
        // count, addresses, details, metadata, balances
        assert_eq!(fx.ledger.round_trips(), 5);

        let first = &listing.pools[0];
        assert_eq!(first.pair_address, fx.weth_usdc);
        assert!(first.contains(&fx.usdc));
        assert_eq!(first.reserve_of(&fx.usdc), Some(units(200_000, 6)));
        assert!(first.caller_balance.is_zero());

        let second = &listing.pools[1];
        assert_eq!(second.caller_balance, units(100, 18) - U256::from(1_000));

        let newest = listing.newest_first();
        assert_eq!(newest.pools[0].pair_address, fx.cafe_weth);
    }

    #[tokio::test]
    async fn test_second_listing_hits_metadata_cache() {
        let fx = Fixture::new();
        let registry = registry(&fx);
        registry.list_pools(10, None).await.unwrap();
        let before = fx.ledger.round_trips();
        registry.list_pools(10, None).await.unwrap();
        // count, addresses, details
        assert_eq!(fx.ledger.round_trips() - before, 3);
    }

    #[tokio::test]
    async fn test_empty_factory_is_settled() {
        let fx = Fixture::new();
        let ledger = cpamm_protocols::MemoryLedger::new(fx.contracts.clone());
        let node: Arc<dyn LedgerNode> = Arc::new(ledger);
        let registry = PoolRegistry::new(
            node.clone(),
            Arc::new(TokenResolver::new(node)),
            fx.contracts.clone(),
        );
        let listing = registry.list_pools(10, None).await.unwrap();
        assert!(listing.is_empty());
        assert!(!listing.loading);
        assert_eq!(listing.total_pools, 0);
    }

    #[tokio::test]
    async fn test_count_failure_is_an_error() {
        let fx = Fixture::new();
        fx.ledger.set_unavailable(true);
        let err = registry(&fx).list_pools(10, None).await.unwrap_err();
        assert!(matches!(err, ClientError::NodeUnavailable(_)));
    }

    #[tokio::test]
    async fn test_failed_pool_is_excluded() {
        let fx = Fixture::new();
        fx.ledger.fail_reads_for(fx.weth_usdc);
        let listing = registry(&fx).list_pools(10, Some(fx.user)).await.unwrap();
        assert_eq!(listing.pools.len(), 1);
        assert_eq!(listing.excluded, vec![fx.weth_usdc]);
        assert_eq!(listing.pools[0].pair_address, fx.cafe_weth);
        assert_eq!(listing.scanned, 2);
    }

    #[tokio::test]
    async fn test_unresolved_token_uses_placeholder() {
        let fx = Fixture::new();
        fx.ledger.fail_reads_for(fx.cafe);
        let listing = registry(&fx).list_pools(10, None).await.unwrap();
        let pool = listing
            .pools
            .iter()
            .find(|p| p.pair_address == fx.cafe_weth)
            .unwrap();
        assert!(pool.token_a.symbol == "Unknown" || pool.token_b.symbol == "Unknown");
        assert!(pool.token_a.symbol == "WETH" || pool.token_b.symbol == "WETH");
    }

    #[tokio::test]
    async fn test_paging() {
        let fx = Fixture::new();
        let registry = registry(&fx);
        let page = registry.list_pools(1, None).await.unwrap();
        assert_eq!(page.pools.len(), 1);
        assert!(page.has_more());
        let next = registry.list_pools_page(1, 1, None).await.unwrap();
        assert_eq!(next.pools[0].pair_address, fx.cafe_weth);
        assert!(!next.has_more());
        let beyond = registry.list_pools_page(5, 1, None).await.unwrap();
        assert!(beyond.is_empty());
    }

    #[tokio::test]
    async fn test_pair_for() {
        let fx = Fixture::new();
        let registry = registry(&fx);
        assert_eq!(
            registry.pair_for(NATIVE_TOKEN, fx.usdc).await.unwrap(),
            Some(fx.weth_usdc)
        );
        assert_eq!(registry.pair_for(fx.usdc, fx.cafe).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_refresh_publishes_to_subscribers() {
        let fx = Fixture::new();
        let registry = registry(&fx);
        let mut rx = registry.subscribe();
        assert!(rx.borrow().loading);

        registry.refresh(10, None).await.unwrap();
        rx.changed().await.unwrap();
        let listing = rx.borrow_and_update().clone();
        assert_eq!(listing.pools.len(), 2);
        assert!(!listing.loading);

        let views = listing.views(&PriceTable::default());
        assert_eq!(views.len(), 2);
        assert!(views.iter().all(|v| !v.has_position()));
    }

    #[tokio::test]
    async fn test_address_read_failure_is_incomplete_not_empty() {
        let fx = Fixture::new();
        let node = Arc::new(DroppingNode {
            inner: fx.node(),
            drop_pool_reads: AtomicBool::new(true),
        });
        let registry = PoolRegistry::new(
            node.clone(),
            Arc::new(TokenResolver::new(node.clone())),
            fx.contracts.clone(),
        );

        let listing = registry.list_pools(10, None).await.unwrap();
        assert!(listing.loading);
        assert!(listing.is_empty());
        assert_eq!(listing.total_pools, 2);
        assert_eq!(listing.scanned, 0);
    }

    #[tokio::test]
    async fn test_refresh_keeps_pools_when_address_reads_fail() {
        let fx = Fixture::new();
        let node = Arc::new(DroppingNode {
            inner: fx.node(),
            drop_pool_reads: AtomicBool::new(false),
        });
        let registry = PoolRegistry::new(
            node.clone(),
            Arc::new(TokenResolver::new(node.clone())),
            fx.contracts.clone(),
        );
        registry.refresh(10, None).await.unwrap();
        assert_eq!(registry.latest().pools.len(), 2);

        node.drop_pool_reads.store(true, Ordering::SeqCst);
        let listing = registry.refresh(10, None).await.unwrap();
        assert!(listing.loading);

        let published = registry.latest();
        assert_eq!(published.pools.len(), 2);
        assert!(published.loading);

        node.drop_pool_reads.store(false, Ordering::SeqCst);
        registry.refresh(10, None).await.unwrap();
        let published = registry.latest();
        assert_eq!(published.pools.len(), 2);
        assert!(!published.loading);
    }
}
