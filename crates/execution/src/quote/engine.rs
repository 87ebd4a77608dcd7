use crate::error::ClientError;
use cpamm_domain::math::constant_product::quote_counter_amount;
use cpamm_domain::path::direct_path;
use cpamm_domain::{Address, TokenAmount, TradePath, U256, build_path, to_hex};
use cpamm_protocols::{CallOutput, ContractAddresses, LedgerNode, NodeError, ReadCall};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

/// Router amounts for one path, one entry per token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuoteResult {
    /// Wrapped token path the router priced.
    pub path: TradePath,
    /// Amount at each step of `path`, input first.
    pub amounts: Vec<U256>,
}

impl QuoteResult {
    /// Amount sold.
    pub fn amount_in(&self) -> U256 {
        self.amounts.first().copied().unwrap_or_default()
    }

    /// Amount received before slippage.
    pub fn amount_out(&self) -> U256 {
        self.amounts.last().copied().unwrap_or_default()
    }

    /// Whether the trade crosses more than one pool.
    pub fn is_multi_hop(&self) -> bool {
        self.path.len() > 2
    }
}

fn no_route(err: NodeError) -> ClientError {
    match err {
        NodeError::Reverted(reason) | NodeError::Decode(reason) => ClientError::NoRoute { reason },
        other => other.into(),
    }
}

/// Asks the router for swap amounts. Quotes are never cached.
pub struct QuoteEngine {
    node: Arc<dyn LedgerNode>,
    contracts: ContractAddresses,
}

impl QuoteEngine {
    pub fn new(node: Arc<dyn LedgerNode>, contracts: ContractAddresses) -> Self {
        Self { node, contracts }
    }

    pub fn contracts(&self) -> &ContractAddresses {
        &self.contracts
    }

    /// Path for a trade. Pairs without the routing asset go direct when a
    /// pool exists for them and through the routing asset otherwise.
    pub async fn route(
        &self,
        token_in: Address,
        token_out: Address,
    ) -> Result<TradePath, ClientError> {
        let weth = self.contracts.weth;
        let path = build_path(token_in, token_out, weth)?;
        if path.len() == 2 {
            return Ok(path);
        }
        let pair = self
            .node
            .call(ReadCall::PairFor {
                factory: self.contracts.factory,
                token_a: path.first(),
                token_b: path.last(),
            })
            .await
            .and_then(CallOutput::into_address);
        match pair {
            Ok(pair) if !pair.is_zero() => Ok(direct_path(token_in, token_out, weth)?),
            Ok(_) => Ok(path),
            Err(e) => {
                debug!(error = %e, "pair lookup failed, routing through wrapped native");
                Ok(path)
            }
        }
    }

    /// Output amounts for selling `amount_in` along `path`.
    pub async fn quote(
        &self,
        amount_in: U256,
        path: &TradePath,
    ) -> Result<QuoteResult, ClientError> {
        if amount_in.is_zero() {
            return Err(ClientError::ZeroAmount);
        }
        let amounts = self
            .node
            .call(ReadCall::AmountsOut {
                router: self.contracts.router,
                amount_in,
                path: path.tokens().to_vec(),
            })
            .await
            .and_then(CallOutput::into_amounts)
            .map_err(no_route)?;
        self.checked(path, amounts)
    }

    /// Input amounts required to buy `amount_out` along `path`.
    pub async fn quote_in(
        &self,
        amount_out: U256,
        path: &TradePath,
    ) -> Result<QuoteResult, ClientError> {
        if amount_out.is_zero() {
            return Err(ClientError::ZeroAmount);
        }
        let amounts = self
            .node
            .call(ReadCall::AmountsIn {
                router: self.contracts.router,
                amount_out,
                path: path.tokens().to_vec(),
            })
            .await
            .and_then(CallOutput::into_amounts)
            .map_err(no_route)?;
        self.checked(path, amounts)
    }

    fn checked(&self, path: &TradePath, amounts: Vec<U256>) -> Result<QuoteResult, ClientError> {
        if amounts.len() != path.len() {
            return Err(ClientError::NoRoute {
                reason: format!(
                    "router returned {} amounts for {} tokens",
                    amounts.len(),
                    path.len()
                ),
            });
        }
        debug!(
            path = ?path.tokens().iter().map(to_hex).collect::<Vec<_>>(),
            amount_out = %amounts.last().copied().unwrap_or_default(),
            "quote"
        );
        Ok(QuoteResult {
            path: path.clone(),
            amounts,
        })
    }

    /// Amount of `token_b` matching `amount_a` of `token_a` at the current
    /// pool ratio, or `None` when the pool does not exist yet and the
    /// provider sets the price.
    pub async fn counter_amount(
        &self,
        token_a: Address,
        token_b: Address,
        amount_a: U256,
    ) -> Result<Option<U256>, ClientError> {
        let weth = self.contracts.weth;
        let path = direct_path(token_a, token_b, weth)?;
        let (a, b) = (path.first(), path.last());
        let pair = self
            .node
            .call(ReadCall::PairFor {
                factory: self.contracts.factory,
                token_a: a,
                token_b: b,
            })
            .await?
            .into_address()?;
        if pair.is_zero() {
            return Ok(None);
        }
        let results = self
            .node
            .call_batch(vec![ReadCall::Token0 { pair }, ReadCall::Reserves { pair }])
            .await;
        let mut results = results.into_iter();
        let token0 = results
            .next()
            .unwrap_or_else(|| Err(NodeError::Decode("missing response".to_string())))?
            .into_address()?;
        let (reserve0, reserve1) = results
            .next()
            .unwrap_or_else(|| Err(NodeError::Decode("missing response".to_string())))?
            .into_reserves()?;
        if reserve0.is_zero() || reserve1.is_zero() {
            return Ok(None);
        }
        let (reserve_a, reserve_b) = if token0 == a {
            (reserve0, reserve1)
        } else {
            (reserve1, reserve0)
        };
        let amount = quote_counter_amount(
            TokenAmount(amount_a),
            TokenAmount(reserve_a),
            TokenAmount(reserve_b),
        )
        .map_err(|e| ClientError::InvalidAmount(e.to_string()))?;
        Ok(Some(amount.as_u256()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{Fixture, units};
    use cpamm_domain::NATIVE_TOKEN;

    fn engine(fx: &Fixture) -> QuoteEngine {
        QuoteEngine::new(fx.node(), fx.contracts.clone())
    }

    #[tokio::test]
    async fn test_route_through_wrapped_native() {
        let fx = Fixture::new();
        let engine = engine(&fx);
        let path = engine.route(fx.usdc, fx.cafe).await.unwrap();
        assert_eq!(path.tokens(), &[fx.usdc, fx.weth, fx.cafe]);

        let direct = engine.route(NATIVE_TOKEN, fx.usdc).await.unwrap();
        assert_eq!(direct.tokens(), &[fx.weth, fx.usdc]);
    }

    #[tokio::test]
    async fn test_route_prefers_existing_direct_pool() {
        let fx = Fixture::new();
        fx.ledger
            .create_pool(fx.usdc, fx.cafe, units(1_000, 6), units(1_000, 18), fx.provider)
            .unwrap();
        let path = engine(&fx).route(fx.usdc, fx.cafe).await.unwrap();
        assert_eq!(path.tokens(), &[fx.usdc, fx.cafe]);
    }

    #[tokio::test]
    async fn test_identical_tokens_rejected() {
        let fx = Fixture::new();
        let err = engine(&fx).route(NATIVE_TOKEN, fx.weth).await.unwrap_err();
        assert_eq!(err, ClientError::IdenticalTokens);
    }

    #[tokio::test]
    async fn test_quote_matches_constant_product() {
        let fx = Fixture::new();
        let engine = engine(&fx);
        let path = engine.route(NATIVE_TOKEN, fx.usdc).await.unwrap();
        let quote = engine.quote(units(1, 18), &path).await.unwrap();
        assert_eq!(quote.amount_in(), units(1, 18));
        // 1 WETH into 100 WETH / 200,000 USDC at 0.3% fee
        let expected = units(200_000, 6) * U256::from(997) * units(1, 18)
            / (units(100, 18) * U256::from(1000) + units(1, 18) * U256::from(997));
        assert_eq!(quote.amount_out(), expected);
        assert!(!quote.is_multi_hop());
    }

    #[tokio::test]
    async fn test_multi_hop_quote() {
        let fx = Fixture::new();
        let engine = engine(&fx);
        let path = engine.route(fx.usdc, fx.cafe).await.unwrap();
        let quote = engine.quote(units(100, 6), &path).await.unwrap();
        assert_eq!(quote.amounts.len(), 3);
        assert!(quote.is_multi_hop());
        assert!(!quote.amount_out().is_zero());

        let reverse = engine.quote_in(quote.amount_out(), &path).await.unwrap();
        assert!(reverse.amount_in() <= units(100, 6));
    }

    #[tokio::test]
    async fn test_zero_amount_is_rejected_without_call() {
        let fx = Fixture::new();
        let engine = engine(&fx);
        let path = engine.route(NATIVE_TOKEN, fx.usdc).await.unwrap();
        let trips = fx.ledger.round_trips();
        assert_eq!(
            engine.quote(U256::zero(), &path).await.unwrap_err(),
            ClientError::ZeroAmount
        );
        assert_eq!(fx.ledger.round_trips(), trips);
    }

    #[tokio::test]
    async fn test_missing_pool_is_no_route() {
        let fx = Fixture::new();
        let engine = engine(&fx);
        let path = TradePath::new(vec![fx.usdc, fx.cafe]).unwrap();
        let err = engine.quote(units(1, 6), &path).await.unwrap_err();
        assert!(matches!(err, ClientError::NoRoute { .. }));
    }

    #[tokio::test]
    async fn test_unavailable_node_is_not_no_route() {
        let fx = Fixture::new();
        let engine = engine(&fx);
        let path = TradePath::new(vec![fx.weth, fx.usdc]).unwrap();
        fx.ledger.set_unavailable(true);
        let err = engine.quote(units(1, 18), &path).await.unwrap_err();
        assert!(matches!(err, ClientError::NodeUnavailable(_)));
    }

    #[tokio::test]
    async fn test_counter_amount() {
        let fx = Fixture::new();
        let engine = engine(&fx);
        let amount = engine
            .counter_amount(fx.usdc, NATIVE_TOKEN, units(2_000, 6))
            .await
            .unwrap();
        assert_eq!(amount, Some(units(1, 18)));
        assert_eq!(
            engine.counter_amount(fx.usdc, fx.cafe, units(1, 6)).await.unwrap(),
            None
        );
    }
}
