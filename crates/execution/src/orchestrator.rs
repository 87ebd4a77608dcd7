//! Approve, swap and liquidity submission with confirmation tracking.
//!
//! Each action runs `validate -> claim slot -> gate on allowance and balance
//! -> send -> poll receipt`. Validation errors return before the lifecycle
//! slot is touched; anything after the claim ends in a terminal state.

use crate::clock::{Clock, SystemClock};
use crate::config::TradingConfig;
use crate::error::{ClientError, classify_revert};
use crate::lifecycle::{ActionKey, TransactionTracker, TxEvent, TxStatus};
use crate::quote::QuoteResult;
use cpamm_domain::math::constant_product::mul_div_floor;
use cpamm_domain::path::wrap_native;
use cpamm_domain::{Address, Deadline, SlippageTolerance, U256, is_native, to_hex};
use cpamm_protocols::{
    CallOutput, ContractAddresses, ContractWrite, LedgerNode, NodeError, ReadCall, TxHash,
    TxReceipt, WriteCall,
};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{RwLock, broadcast};
use tracing::{debug, info};
use uuid::Uuid;

/// How much to approve.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApprovalAmount {
    Exact(U256),
    /// `2^256 - 1`, never decremented by the token.
    Unlimited,
}

impl ApprovalAmount {
    pub fn value(self) -> U256 {
        match self {
            Self::Exact(amount) => amount,
            Self::Unlimited => U256::MAX,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApprovalState {
    /// Native asset, spent as attached value.
    NotRequired,
    /// Current allowance already covers the amount.
    Sufficient { allowance: U256 },
    /// An approval must confirm before the action can be submitted.
    Required { allowance: U256, required: U256 },
    /// An approval for the token is in flight.
    Pending,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwapRequest {
    /// May be the native sentinel.
    pub token_in: Address,
    /// May be the native sentinel.
    pub token_out: Address,
    /// Router quote the trade is based on; its path and amounts are used as is.
    pub quote: QuoteResult,
    /// Applied to the quoted output to derive the minimum received.
    pub slippage: SlippageTolerance,
    /// Defaults to the connected account.
    pub recipient: Option<Address>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddLiquidityRequest {
    /// At most one side may be the native sentinel.
    pub token_a: Address,
    pub token_b: Address,
    /// Desired deposit of `token_a`.
    pub amount_a: U256,
    /// Desired deposit of `token_b`.
    pub amount_b: U256,
    /// Bounds how far below the desired amounts the router may deposit.
    pub slippage: SlippageTolerance,
    /// Receives the liquidity tokens. Defaults to the connected account.
    pub recipient: Option<Address>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoveAmount {
    /// Whole percent of the caller's liquidity, 1 to 100.
    Percent(u8),
    /// Exact liquidity token amount.
    Liquidity(U256),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoveLiquidityRequest {
    pub token_a: Address,
    pub token_b: Address,
    pub amount: RemoveAmount,
    /// Applied to the redeemable amounts to derive the minimums.
    pub slippage: SlippageTolerance,
    /// Receives the withdrawn tokens. Defaults to the connected account.
    pub recipient: Option<Address>,
}

/// Expected outcome of a removal at current reserves.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemovalPreview {
    /// Pair contract whose liquidity tokens are burned.
    pub pair: Address,
    /// Liquidity to burn.
    pub liquidity: U256,
    /// Caller's liquidity balance before the burn.
    pub balance: U256,
    /// `floor(reserve_a * liquidity / supply)`.
    pub amount_a: U256,
    /// `floor(reserve_b * liquidity / supply)`.
    pub amount_b: U256,
    /// Minimum of token A after slippage.
    pub min_a: U256,
    /// Minimum of token B after slippage.
    pub min_b: U256,
}

/// A transaction included successfully.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Confirmation {
    /// Lifecycle id assigned when the action was claimed.
    pub id: Uuid,
    pub key: ActionKey,
    pub hash: TxHash,
    /// Block that included the transaction.
    pub block_number: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum CacheKey {
    Balance {
        token: Address,
        owner: Address,
    },
    Allowance {
        token: Address,
        owner: Address,
        spender: Address,
    },
}

impl CacheKey {
    fn read_call(self) -> ReadCall {
        match self {
            Self::Balance { token, owner } if is_native(&token) => {
                ReadCall::NativeBalance { owner }
            }
            Self::Balance { token, owner } => ReadCall::BalanceOf { token, owner },
            Self::Allowance {
                token,
                owner,
                spender,
            } => ReadCall::Allowance {
                token,
                owner,
                spender,
            },
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Cached {
    value: U256,
    stale: bool,
}

fn next_result(
    results: &mut impl Iterator<Item = Result<CallOutput, NodeError>>,
) -> Result<CallOutput, NodeError> {
    results
        .next()
        .unwrap_or_else(|| Err(NodeError::Decode("missing response".to_string())))
}

/// Drives approvals, swaps and liquidity changes for one account.
pub struct TransactionOrchestrator {
    node: Arc<dyn LedgerNode>,
    contracts: ContractAddresses,
    config: TradingConfig,
    clock: Arc<dyn Clock>,
    account: Option<Address>,
    tracker: TransactionTracker,
    cache: RwLock<HashMap<CacheKey, Cached>>,
}

impl TransactionOrchestrator {
    pub fn new(
        node: Arc<dyn LedgerNode>,
        contracts: ContractAddresses,
        config: TradingConfig,
        account: Option<Address>,
    ) -> Self {
        Self {
            node,
            contracts,
            config,
            clock: Arc::new(SystemClock),
            account,
            tracker: TransactionTracker::new(),
            cache: RwLock::new(HashMap::new()),
        }
    }

    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn account(&self) -> Result<Address, ClientError> {
        self.account.ok_or(ClientError::NoAccount)
    }

    pub fn config(&self) -> &TradingConfig {
        &self.config
    }

    pub fn tracker(&self) -> &TransactionTracker {
        &self.tracker
    }

    pub async fn status(&self, key: &ActionKey) -> TxStatus {
        self.tracker.status(key).await
    }

    /// Returns a terminal slot to `Idle`.
    pub async fn acknowledge(&self, key: &ActionKey) -> bool {
        self.tracker.acknowledge(key).await
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TxEvent> {
        self.tracker.subscribe()
    }

    /// Balance of `token` (or the native asset) for the connected account.
    /// Served from cache until a confirmation marks it stale.
    pub async fn balance(&self, token: Address) -> Result<U256, ClientError> {
        let owner = self.account()?;
        self.read_cached(CacheKey::Balance { token, owner }).await
    }

    /// Router allowance of `token` for the connected account.
    pub async fn allowance(&self, token: Address) -> Result<U256, ClientError> {
        let owner = self.account()?;
        self.read_cached(CacheKey::Allowance {
            token,
            owner,
            spender: self.contracts.router,
        })
        .await
    }

    async fn read_cached(&self, key: CacheKey) -> Result<U256, ClientError> {
        if let Some(cached) = self.cache.read().await.get(&key).filter(|c| !c.stale) {
            return Ok(cached.value);
        }
        self.read_fresh(key).await
    }

    async fn read_fresh(&self, key: CacheKey) -> Result<U256, ClientError> {
        let value = self.node.call(key.read_call()).await?.into_uint()?;
        self.cache
            .write()
            .await
            .insert(key, Cached { value, stale: false });
        Ok(value)
    }

    async fn mark_stale(&self) {
        let mut cache = self.cache.write().await;
        for entry in cache.values_mut() {
            entry.stale = true;
        }
        debug!(entries = cache.len(), "balance cache marked stale");
    }

    /// Whether the router may spend `required` of `token` right now.
    pub async fn approval_state(
        &self,
        token: Address,
        required: U256,
    ) -> Result<ApprovalState, ClientError> {
        if is_native(&token) {
            return Ok(ApprovalState::NotRequired);
        }
        if self.tracker.is_in_flight(&ActionKey::approve(token)).await {
            return Ok(ApprovalState::Pending);
        }
        let owner = self.account()?;
        let allowance = self
            .read_fresh(CacheKey::Allowance {
                token,
                owner,
                spender: self.contracts.router,
            })
            .await?;
        Ok(if allowance >= required {
            ApprovalState::Sufficient { allowance }
        } else {
            ApprovalState::Required {
                allowance,
                required,
            }
        })
    }

    async fn ensure_allowance(
        &self,
        owner: Address,
        token: Address,
        required: U256,
    ) -> Result<(), ClientError> {
        if is_native(&token) {
            return Ok(());
        }
        let allowance = self
            .read_fresh(CacheKey::Allowance {
                token,
                owner,
                spender: self.contracts.router,
            })
            .await?;
        if allowance < required {
            return Err(ClientError::InsufficientAllowance(format!(
                "{} allows {allowance}, needs {required}",
                to_hex(&token)
            )));
        }
        Ok(())
    }

    async fn ensure_balance(
        &self,
        owner: Address,
        token: Address,
        required: U256,
    ) -> Result<(), ClientError> {
        let balance = self.read_fresh(CacheKey::Balance { token, owner }).await?;
        if balance < required {
            return Err(ClientError::InsufficientBalance(format!(
                "{} balance {balance}, needs {required}",
                to_hex(&token)
            )));
        }
        Ok(())
    }

    fn deadline(&self) -> U256 {
        Deadline::from_now(self.clock.now_unix(), self.config.deadline_minutes).as_u256()
    }

    fn wrapped(&self, token: Address) -> Address {
        wrap_native(token, self.contracts.weth)
    }

    /// Lets the router spend `token` on behalf of the connected account.
    pub async fn approve(
        &self,
        token: Address,
        amount: ApprovalAmount,
    ) -> Result<Confirmation, ClientError> {
        let owner = self.account()?;
        if is_native(&token) {
            return Err(ClientError::InvalidAddress(
                "the native asset is not approved, it is attached as value".to_string(),
            ));
        }
        let spender = self.contracts.router;
        let key = ActionKey::approve(token);
        let description = format!(
            "approve router to spend {} of {}",
            amount.value(),
            to_hex(&token)
        );
        self.execute(key, &[], description, async move {
            Ok(WriteCall {
                from: owner,
                to: token,
                value: U256::zero(),
                call: ContractWrite::Approve {
                    spender,
                    amount: amount.value(),
                },
            })
        })
        .await
    }

    /// Sells exactly the quoted input for at least the quoted output less
    /// slippage.
    pub async fn submit_swap(&self, request: SwapRequest) -> Result<Confirmation, ClientError> {
        let owner = self.account()?;
        let SwapRequest {
            token_in,
            token_out,
            quote,
            slippage,
            recipient,
        } = request;
        let amount_in = quote.amount_in();
        if amount_in.is_zero() {
            return Err(ClientError::ZeroAmount);
        }
        if self.wrapped(token_in) == self.wrapped(token_out) {
            return Err(ClientError::IdenticalTokens);
        }
        if quote.path.first() != self.wrapped(token_in)
            || quote.path.last() != self.wrapped(token_out)
        {
            return Err(ClientError::InvalidPath(
                "quote path does not connect the selected tokens".to_string(),
            ));
        }
        if quote.amount_out().is_zero() {
            return Err(ClientError::NoRoute {
                reason: "quote has no output".to_string(),
            });
        }

        let key = ActionKey::swap(token_in);
        let blockers: Vec<ActionKey> = (!is_native(&token_in))
            .then(|| ActionKey::approve(token_in))
            .into_iter()
            .collect();
        let description = format!(
            "swap {amount_in} of {} for {}",
            to_hex(&token_in),
            to_hex(&token_out)
        );
        self.execute(key, &blockers, description, async move {
            self.ensure_allowance(owner, token_in, amount_in).await?;
            self.ensure_balance(owner, token_in, amount_in).await?;

            let amount_out_min = slippage.minimum_output(quote.amount_out());
            let path = quote.path.into_inner();
            let to = recipient.unwrap_or(owner);
            let deadline = self.deadline();
            let (value, call) = if is_native(&token_in) {
                (
                    amount_in,
                    ContractWrite::SwapExactEthForTokens {
                        amount_out_min,
                        path,
                        to,
                        deadline,
                    },
                )
            } else if is_native(&token_out) {
                (
                    U256::zero(),
                    ContractWrite::SwapExactTokensForEth {
                        amount_in,
                        amount_out_min,
                        path,
                        to,
                        deadline,
                    },
                )
            } else {
                (
                    U256::zero(),
                    ContractWrite::SwapExactTokensForTokens {
                        amount_in,
                        amount_out_min,
                        path,
                        to,
                        deadline,
                    },
                )
            };
            Ok(WriteCall {
                from: owner,
                to: self.contracts.router,
                value,
                call,
            })
        })
        .await
    }

    /// Deposits both sides; the router takes the pool ratio and each side is
    /// protected by the slippage minimum.
    pub async fn submit_add_liquidity(
        &self,
        request: AddLiquidityRequest,
    ) -> Result<Confirmation, ClientError> {
        let owner = self.account()?;
        let AddLiquidityRequest {
            token_a,
            token_b,
            amount_a,
            amount_b,
            slippage,
            recipient,
        } = request;
        if amount_a.is_zero() || amount_b.is_zero() {
            return Err(ClientError::ZeroAmount);
        }
        let (wrapped_a, wrapped_b) = (self.wrapped(token_a), self.wrapped(token_b));
        if wrapped_a == wrapped_b {
            return Err(ClientError::IdenticalTokens);
        }

        let key = ActionKey::add_liquidity(wrapped_a, wrapped_b);
        let blockers: Vec<ActionKey> = [token_a, token_b]
            .into_iter()
            .filter(|t| !is_native(t))
            .map(ActionKey::approve)
            .collect();
        let description = format!(
            "add {amount_a} of {} and {amount_b} of {}",
            to_hex(&token_a),
            to_hex(&token_b)
        );
        self.execute(key, &blockers, description, async move {
            self.ensure_allowance(owner, token_a, amount_a).await?;
            self.ensure_allowance(owner, token_b, amount_b).await?;
            self.ensure_balance(owner, token_a, amount_a).await?;
            self.ensure_balance(owner, token_b, amount_b).await?;

            let (min_a, min_b) = (
                slippage.minimum_output(amount_a),
                slippage.minimum_output(amount_b),
            );
            let to = recipient.unwrap_or(owner);
            let deadline = self.deadline();
            let (value, call) = if is_native(&token_a) || is_native(&token_b) {
                let (token, amount_token, min_token, amount_eth, min_eth) = if is_native(&token_a) {
                    (token_b, amount_b, min_b, amount_a, min_a)
                } else {
                    (token_a, amount_a, min_a, amount_b, min_b)
                };
                (
                    amount_eth,
                    ContractWrite::AddLiquidityEth {
                        token,
                        amount_token_desired: amount_token,
                        amount_token_min: min_token,
                        amount_eth_min: min_eth,
                        to,
                        deadline,
                    },
                )
            } else {
                (
                    U256::zero(),
                    ContractWrite::AddLiquidity {
                        token_a,
                        token_b,
                        amount_a_desired: amount_a,
                        amount_b_desired: amount_b,
                        amount_a_min: min_a,
                        amount_b_min: min_b,
                        to,
                        deadline,
                    },
                )
            };
            Ok(WriteCall {
                from: owner,
                to: self.contracts.router,
                value,
                call,
            })
        })
        .await
    }

    async fn pair_address(
        &self,
        token_a: Address,
        token_b: Address,
    ) -> Result<Address, ClientError> {
        let pair = self
            .node
            .call(ReadCall::PairFor {
                factory: self.contracts.factory,
                token_a: self.wrapped(token_a),
                token_b: self.wrapped(token_b),
            })
            .await?
            .into_address()?;
        if pair.is_zero() {
            return Err(ClientError::NoRoute {
                reason: "no pool for this pair".to_string(),
            });
        }
        Ok(pair)
    }

    /// Liquidity to burn and the amounts it redeems at current reserves.
    pub async fn preview_remove_liquidity(
        &self,
        request: &RemoveLiquidityRequest,
    ) -> Result<RemovalPreview, ClientError> {
        let owner = self.account()?;
        let pair = self.pair_address(request.token_a, request.token_b).await?;
        let mut results = self
            .node
            .call_batch(vec![
                ReadCall::Token0 { pair },
                ReadCall::Reserves { pair },
                ReadCall::TotalSupply { token: pair },
                ReadCall::BalanceOf { token: pair, owner },
            ])
            .await
            .into_iter();
        let token0 = next_result(&mut results)?.into_address()?;
        let (reserve0, reserve1) = next_result(&mut results)?.into_reserves()?;
        let total_supply = next_result(&mut results)?.into_uint()?;
        let balance = next_result(&mut results)?.into_uint()?;

        let liquidity = match request.amount {
            RemoveAmount::Percent(percent) => {
                mul_div_floor(balance, U256::from(percent), U256::from(100))
                    .ok_or_else(|| ClientError::InvalidAmount("liquidity overflow".to_string()))?
            }
            RemoveAmount::Liquidity(liquidity) => liquidity,
        };
        if liquidity.is_zero() {
            return Err(ClientError::ZeroAmount);
        }
        if liquidity > balance {
            return Err(ClientError::InsufficientBalance(format!(
                "liquidity balance {balance}, needs {liquidity}"
            )));
        }

        let (reserve_a, reserve_b) = if token0 == self.wrapped(request.token_a) {
            (reserve0, reserve1)
        } else {
            (reserve1, reserve0)
        };
        let share = |reserve: U256| {
            if total_supply.is_zero() {
                U256::zero()
            } else {
                mul_div_floor(reserve, liquidity, total_supply).unwrap_or_default()
            }
        };
        let (amount_a, amount_b) = (share(reserve_a), share(reserve_b));
        Ok(RemovalPreview {
            pair,
            liquidity,
            balance,
            amount_a,
            amount_b,
            min_a: request.slippage.minimum_output(amount_a),
            min_b: request.slippage.minimum_output(amount_b),
        })
    }

    /// Burns liquidity for both underlying tokens. The pair token must be
    /// approved for the router first.
    pub async fn submit_remove_liquidity(
        &self,
        request: RemoveLiquidityRequest,
    ) -> Result<Confirmation, ClientError> {
        let owner = self.account()?;
        let (token_a, token_b) = (request.token_a, request.token_b);
        let (wrapped_a, wrapped_b) = (self.wrapped(token_a), self.wrapped(token_b));
        if wrapped_a == wrapped_b {
            return Err(ClientError::IdenticalTokens);
        }
        match request.amount {
            RemoveAmount::Percent(p) if p == 0 || p > 100 => {
                return Err(ClientError::InvalidAmount(format!(
                    "{p}% is outside 1 to 100"
                )));
            }
            RemoveAmount::Liquidity(l) if l.is_zero() => return Err(ClientError::ZeroAmount),
            _ => {}
        }
        let pair = self.pair_address(token_a, token_b).await?;

        let key = ActionKey::remove_liquidity(wrapped_a, wrapped_b);
        let description = format!(
            "remove liquidity from {} ({}/{})",
            to_hex(&pair),
            to_hex(&token_a),
            to_hex(&token_b)
        );
        self.execute(key, &[ActionKey::approve(pair)], description, async move {
            let preview = self.preview_remove_liquidity(&request).await?;
            self.ensure_allowance(owner, pair, preview.liquidity).await?;

            let to = request.recipient.unwrap_or(owner);
            let deadline = self.deadline();
            let call = if is_native(&token_a) || is_native(&token_b) {
                let (token, min_token, min_eth) = if is_native(&token_a) {
                    (token_b, preview.min_b, preview.min_a)
                } else {
                    (token_a, preview.min_a, preview.min_b)
                };
                ContractWrite::RemoveLiquidityEth {
                    token,
                    liquidity: preview.liquidity,
                    amount_token_min: min_token,
                    amount_eth_min: min_eth,
                    to,
                    deadline,
                }
            } else {
                ContractWrite::RemoveLiquidity {
                    token_a,
                    token_b,
                    liquidity: preview.liquidity,
                    amount_a_min: preview.min_a,
                    amount_b_min: preview.min_b,
                    to,
                    deadline,
                }
            };
            Ok(WriteCall {
                from: owner,
                to: self.contracts.router,
                value: U256::zero(),
                call,
            })
        })
        .await
    }

    async fn execute(
        &self,
        key: ActionKey,
        blockers: &[ActionKey],
        description: String,
        prepare: impl Future<Output = Result<WriteCall, ClientError>>,
    ) -> Result<Confirmation, ClientError> {
        let id = self.tracker.begin(key, blockers, description).await?;

        let tx = match prepare.await {
            Ok(tx) => tx,
            Err(e) => return self.fail(key, id, e, None).await,
        };
        let method = tx.call.method_name();
        let hash = match self.node.send(tx).await {
            Ok(hash) => hash,
            Err(e) => return self.fail(key, id, e.into(), None).await,
        };
        info!(action = %key, method, ?hash, "transaction sent");
        self.tracker
            .transition(key, id, TxStatus::Confirming { hash })
            .await;

        match self.wait_for_receipt(hash).await {
            Some(receipt) if receipt.success => {
                self.mark_stale().await;
                self.tracker
                    .transition(
                        key,
                        id,
                        TxStatus::Confirmed {
                            hash,
                            block_number: receipt.block_number,
                        },
                    )
                    .await;
                Ok(Confirmation {
                    id,
                    key,
                    hash,
                    block_number: receipt.block_number,
                })
            }
            Some(receipt) => {
                self.mark_stale().await;
                let reason = receipt
                    .revert_reason
                    .unwrap_or_else(|| "transaction reverted".to_string());
                self.fail(key, id, classify_revert(&reason), Some(hash)).await
            }
            None => {
                self.tracker
                    .transition(key, id, TxStatus::Unconfirmed { hash })
                    .await;
                Err(ClientError::Timeout {
                    hash: format!("{hash:?}"),
                })
            }
        }
    }

    /// Polls until a receipt appears or the confirmation timeout elapses.
    /// Poll errors are retried.
    async fn wait_for_receipt(&self, hash: TxHash) -> Option<TxReceipt> {
        let poll = async {
            loop {
                match self.node.receipt(hash).await {
                    Ok(Some(receipt)) => return receipt,
                    Ok(None) => {}
                    Err(e) => debug!(?hash, error = %e, "receipt poll failed"),
                }
                tokio::time::sleep(self.config.receipt_poll_interval).await;
            }
        };
        tokio::time::timeout(self.config.confirmation_timeout, poll)
            .await
            .ok()
    }

    async fn fail(
        &self,
        key: ActionKey,
        id: Uuid,
        error: ClientError,
        hash: Option<TxHash>,
    ) -> Result<Confirmation, ClientError> {
        self.tracker
            .transition(
                key,
                id,
                TxStatus::Failed {
                    error: error.clone(),
                    hash,
                },
            )
            .await;
        Err(error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::quote::QuoteEngine;
    use crate::testing::{Fixture, units};
    use cpamm_domain::NATIVE_TOKEN;

    fn orchestrator(fx: &Fixture) -> Arc<TransactionOrchestrator> {
        Arc::new(TransactionOrchestrator::new(
            fx.node(),
            fx.contracts.clone(),
            TradingConfig::default(),
            Some(fx.user),
        ))
    }

    fn slippage() -> SlippageTolerance {
        TradingConfig::default().default_slippage().unwrap()
    }

    async fn quote(
        fx: &Fixture,
        token_in: Address,
        token_out: Address,
        amount: U256,
    ) -> QuoteResult {
        let engine = QuoteEngine::new(fx.node(), fx.contracts.clone());
        let path = engine.route(token_in, token_out).await.unwrap();
        engine.quote(amount, &path).await.unwrap()
    }

    async fn swap_request(
        fx: &Fixture,
        token_in: Address,
        token_out: Address,
        amount: U256,
    ) -> SwapRequest {
        SwapRequest {
            token_in,
            token_out,
            quote: quote(fx, token_in, token_out, amount).await,
            slippage: slippage(),
            recipient: None,
        }
    }

    async fn wait_until(orch: &TransactionOrchestrator, key: ActionKey, state: &str) {
        while orch.status(&key).await.label() != state {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn test_swap_requires_allowance() {
        let fx = Fixture::new();
        let orch = orchestrator(&fx);
        let request = swap_request(&fx, fx.usdc, NATIVE_TOKEN, units(100, 6)).await;

        let err = orch.submit_swap(request).await.unwrap_err();
        assert!(matches!(err, ClientError::InsufficientAllowance(_)));
        assert_eq!(fx.ledger.sent_count(), 0);
        assert!(matches!(
            orch.status(&ActionKey::swap(fx.usdc)).await,
            TxStatus::Failed {
                error: ClientError::InsufficientAllowance(_),
                hash: None
            }
        ));
    }

    #[tokio::test]
    async fn test_approve_then_swap() {
        let fx = Fixture::new();
        let orch = orchestrator(&fx);
        let amount = units(100, 6);

        assert!(matches!(
            orch.approval_state(fx.usdc, amount).await.unwrap(),
            ApprovalState::Required { .. }
        ));
        orch.approve(fx.usdc, ApprovalAmount::Exact(amount)).await.unwrap();
        assert_eq!(
            orch.approval_state(fx.usdc, amount).await.unwrap(),
            ApprovalState::Sufficient { allowance: amount }
        );

        let eth_before = fx.ledger.native_balance(fx.user);
        let request = swap_request(&fx, fx.usdc, NATIVE_TOKEN, amount).await;
        let expected = request.quote.amount_out();
        let confirmation = orch.submit_swap(request).await.unwrap();

        assert_eq!(fx.ledger.balance_of(fx.usdc, fx.user), units(9_900, 6));
        assert_eq!(fx.ledger.native_balance(fx.user), eth_before + expected);
        let key = ActionKey::swap(fx.usdc);
        assert_eq!(
            orch.status(&key).await,
            TxStatus::Confirmed {
                hash: confirmation.hash,
                block_number: confirmation.block_number
            }
        );
        assert!(orch.acknowledge(&key).await);
        assert_eq!(orch.status(&key).await, TxStatus::Idle);
    }

    #[tokio::test]
    async fn test_native_swap_skips_approval() {
        let fx = Fixture::new();
        let orch = orchestrator(&fx);
        assert_eq!(
            orch.approval_state(NATIVE_TOKEN, units(1, 18)).await.unwrap(),
            ApprovalState::NotRequired
        );
        let request = swap_request(&fx, NATIVE_TOKEN, fx.usdc, units(1, 18)).await;
        let expected = request.quote.amount_out();
        orch.submit_swap(request).await.unwrap();
        assert_eq!(
            fx.ledger.balance_of(fx.usdc, fx.user),
            units(10_000, 6) + expected
        );
        assert_eq!(fx.ledger.native_balance(fx.user), units(99, 18));
    }

    #[tokio::test(start_paused = true)]
    async fn test_swap_rejected_while_approval_pending() {
        let fx = Fixture::new();
        let orch = orchestrator(&fx);
        fx.ledger.set_manual_mining(true);

        let o = orch.clone();
        let usdc = fx.usdc;
        let approval =
            tokio::spawn(async move { o.approve(usdc, ApprovalAmount::Unlimited).await });
        wait_until(&orch, ActionKey::approve(fx.usdc), "confirming").await;
        assert_eq!(
            orch.approval_state(fx.usdc, units(1, 6)).await.unwrap(),
            ApprovalState::Pending
        );

        let request = swap_request(&fx, fx.usdc, NATIVE_TOKEN, units(100, 6)).await;
        let err = orch.submit_swap(request).await.unwrap_err();
        assert!(matches!(err, ClientError::AlreadyPending(_)));
        assert_eq!(orch.status(&ActionKey::swap(fx.usdc)).await, TxStatus::Idle);

        let err = orch
            .approve(fx.usdc, ApprovalAmount::Unlimited)
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::AlreadyPending(_)));

        fx.ledger.mine();
        approval.await.unwrap().unwrap();
        assert_eq!(fx.ledger.allowance(fx.usdc, fx.user, fx.contracts.router), U256::MAX);
    }

    #[tokio::test]
    async fn test_stale_quote_fails_with_slippage() {
        let fx = Fixture::new();
        let orch = orchestrator(&fx);
        let stale = swap_request(&fx, NATIVE_TOKEN, fx.usdc, units(1, 18)).await;

        // Someone else's trade in the same direction moves the price first.
        orch.submit_swap(swap_request(&fx, NATIVE_TOKEN, fx.usdc, units(10, 18)).await)
            .await
            .unwrap();
        orch.acknowledge(&ActionKey::swap(NATIVE_TOKEN)).await;

        let err = orch.submit_swap(stale).await.unwrap_err();
        assert!(matches!(err, ClientError::SlippageExceeded(_)));
        assert!(matches!(
            orch.status(&ActionKey::swap(NATIVE_TOKEN)).await,
            TxStatus::Failed {
                error: ClientError::SlippageExceeded(_),
                ..
            }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_passes_while_pending() {
        let fx = Fixture::new();
        let clock = Arc::new(FixedClock::new(fx.ledger.timestamp()));
        let orch = Arc::new(
            TransactionOrchestrator::new(
                fx.node(),
                fx.contracts.clone(),
                TradingConfig::default(),
                Some(fx.user),
            )
            .with_clock(clock),
        );
        fx.ledger.set_manual_mining(true);

        let request = swap_request(&fx, NATIVE_TOKEN, fx.usdc, units(1, 18)).await;
        let o = orch.clone();
        let swap = tokio::spawn(async move { o.submit_swap(request).await });
        let key = ActionKey::swap(NATIVE_TOKEN);
        wait_until(&orch, key, "confirming").await;

        fx.ledger.advance_time(3_600);
        fx.ledger.mine();
        assert_eq!(swap.await.unwrap().unwrap_err(), ClientError::DeadlineExpired);
        let status = orch.status(&key).await;
        assert!(matches!(
            status,
            TxStatus::Failed {
                error: ClientError::DeadlineExpired,
                hash: Some(_)
            }
        ));
        assert_eq!(fx.ledger.native_balance(fx.user), units(100, 18));
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_receipt_times_out_as_unconfirmed() {
        let fx = Fixture::new();
        let orch = orchestrator(&fx);
        fx.ledger.set_manual_mining(true);

        let request = swap_request(&fx, NATIVE_TOKEN, fx.usdc, units(1, 18)).await;
        let err = orch.submit_swap(request).await.unwrap_err();
        assert!(matches!(err, ClientError::Timeout { .. }));
        let status = orch.status(&ActionKey::swap(NATIVE_TOKEN)).await;
        assert!(matches!(status, TxStatus::Unconfirmed { .. }));
        assert!(!status.is_in_flight());
        assert_eq!(fx.ledger.pending_count(), 1);
    }

    #[tokio::test]
    async fn test_signer_rejection() {
        let fx = Fixture::new();
        let orch = orchestrator(&fx);
        fx.ledger.reject_next_send();
        let err = orch
            .approve(fx.usdc, ApprovalAmount::Unlimited)
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::Rejected(_)));
        assert!(matches!(
            orch.status(&ActionKey::approve(fx.usdc)).await,
            TxStatus::Failed {
                error: ClientError::Rejected(_),
                hash: None
            }
        ));
    }

    #[tokio::test]
    async fn test_insufficient_balance() {
        let fx = Fixture::new();
        let orch = orchestrator(&fx);
        orch.approve(fx.usdc, ApprovalAmount::Unlimited).await.unwrap();
        let request = swap_request(&fx, fx.usdc, NATIVE_TOKEN, units(20_000, 6)).await;
        let err = orch.submit_swap(request).await.unwrap_err();
        assert!(matches!(err, ClientError::InsufficientBalance(_)));
    }

    #[tokio::test]
    async fn test_validation_leaves_state_idle() {
        let fx = Fixture::new();
        let orch = orchestrator(&fx);

        let mut request = swap_request(&fx, NATIVE_TOKEN, fx.usdc, units(1, 18)).await;
        request.token_out = fx.cafe;
        assert!(matches!(
            orch.submit_swap(request).await.unwrap_err(),
            ClientError::InvalidPath(_)
        ));

        let err = orch
            .submit_add_liquidity(AddLiquidityRequest {
                token_a: NATIVE_TOKEN,
                token_b: fx.weth,
                amount_a: units(1, 18),
                amount_b: units(1, 18),
                slippage: slippage(),
                recipient: None,
            })
            .await
            .unwrap_err();
        assert_eq!(err, ClientError::IdenticalTokens);

        let err = orch
            .submit_remove_liquidity(RemoveLiquidityRequest {
                token_a: fx.cafe,
                token_b: NATIVE_TOKEN,
                amount: RemoveAmount::Percent(0),
                slippage: slippage(),
                recipient: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::InvalidAmount(_)));

        assert!(orch.tracker().history().await.is_empty());
        assert_eq!(fx.ledger.sent_count(), 0);

        let detached = TransactionOrchestrator::new(
            fx.node(),
            fx.contracts.clone(),
            TradingConfig::default(),
            None,
        );
        assert_eq!(detached.balance(fx.usdc).await.unwrap_err(), ClientError::NoAccount);
    }

    #[tokio::test]
    async fn test_add_liquidity_with_native_side() {
        let fx = Fixture::new();
        let orch = orchestrator(&fx);
        orch.approve(fx.usdc, ApprovalAmount::Exact(units(2_000, 6)))
            .await
            .unwrap();

        orch.submit_add_liquidity(AddLiquidityRequest {
            token_a: fx.usdc,
            token_b: NATIVE_TOKEN,
            amount_a: units(2_000, 6),
            amount_b: units(1, 18),
            slippage: slippage(),
            recipient: None,
        })
        .await
        .unwrap();

        assert!(!fx.ledger.balance_of(fx.weth_usdc, fx.user).is_zero());
        assert_eq!(fx.ledger.balance_of(fx.usdc, fx.user), units(8_000, 6));
        assert_eq!(fx.ledger.native_balance(fx.user), units(99, 18));
    }

    #[tokio::test]
    async fn test_remove_liquidity_by_percent() {
        let fx = Fixture::new();
        let orch = orchestrator(&fx);
        let request = RemoveLiquidityRequest {
            token_a: fx.cafe,
            token_b: NATIVE_TOKEN,
            amount: RemoveAmount::Percent(50),
            slippage: slippage(),
            recipient: None,
        };

        let preview = orch.preview_remove_liquidity(&request).await.unwrap();
        assert_eq!(preview.pair, fx.cafe_weth);
        assert_eq!(preview.liquidity, preview.balance / 2);

        let err = orch
            .submit_remove_liquidity(request.clone())
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::InsufficientAllowance(_)));

        orch.approve(fx.cafe_weth, ApprovalAmount::Unlimited)
            .await
            .unwrap();
        let eth_before = fx.ledger.native_balance(fx.user);
        orch.submit_remove_liquidity(request).await.unwrap();

        assert_eq!(
            fx.ledger.balance_of(fx.cafe_weth, fx.user),
            preview.balance - preview.liquidity
        );
        assert_eq!(
            fx.ledger.balance_of(fx.cafe, fx.user),
            units(1_000, 18) + preview.amount_a
        );
        assert_eq!(fx.ledger.native_balance(fx.user), eth_before + preview.amount_b);
    }

    #[tokio::test]
    async fn test_balance_cache_refreshes_after_confirmation() {
        let fx = Fixture::new();
        let orch = orchestrator(&fx);
        assert_eq!(orch.balance(fx.usdc).await.unwrap(), units(10_000, 6));
        let reads = fx.ledger.read_count();
        orch.balance(fx.usdc).await.unwrap();
        assert_eq!(fx.ledger.read_count(), reads);

        orch.submit_swap(swap_request(&fx, NATIVE_TOKEN, fx.usdc, units(1, 18)).await)
            .await
            .unwrap();
        let fresh = orch.balance(fx.usdc).await.unwrap();
        assert!(fresh > units(10_000, 6));
        assert_eq!(fresh, fx.ledger.balance_of(fx.usdc, fx.user));
    }
}
