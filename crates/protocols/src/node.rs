//! The ledger node seam: typed read calls, write calls and receipts.

use async_trait::async_trait;
use cpamm_domain::Address;
use primitive_types::{H256, U256};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Transaction hash.
pub type TxHash = H256;

/// Errors reported by a ledger node.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NodeError {
    #[error("node unavailable: {0}")]
    Unavailable(String),
    #[error("execution reverted: {0}")]
    Reverted(String),
    #[error("request rejected: {0}")]
    Rejected(String),
    #[error("malformed node response: {0}")]
    Decode(String),
}

/// Read-only contract calls consumed by the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadCall {
    /// `Factory.allPairsLength()`
    PoolCount { factory: Address },
    /// `Factory.allPairs(index)`
    PoolAt { factory: Address, index: u64 },
    /// `Factory.getPair(tokenA, tokenB)`
    PairFor {
        factory: Address,
        token_a: Address,
        token_b: Address,
    },
    Token0 { pair: Address },
    Token1 { pair: Address },
    /// `Pair.getReserves()`
    Reserves { pair: Address },
    TotalSupply { token: Address },
    BalanceOf { token: Address, owner: Address },
    Allowance {
        token: Address,
        owner: Address,
        spender: Address,
    },
    Decimals { token: Address },
    Symbol { token: Address },
    Name { token: Address },
    /// `Router.getAmountsOut(amountIn, path)`
    AmountsOut {
        router: Address,
        amount_in: U256,
        path: Vec<Address>,
    },
    /// `Router.getAmountsIn(amountOut, path)`
    AmountsIn {
        router: Address,
        amount_out: U256,
        path: Vec<Address>,
    },
    /// Account balance of the native asset.
    NativeBalance { owner: Address },
}

/// Shape of a read call's return value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputKind {
    Uint,
    Address,
    Text,
    Reserves,
    Amounts,
}

impl ReadCall {
    pub fn output_kind(&self) -> OutputKind {
        match self {
            Self::PoolCount { .. }
            | Self::TotalSupply { .. }
            | Self::BalanceOf { .. }
            | Self::Allowance { .. }
            | Self::Decimals { .. }
            | Self::NativeBalance { .. } => OutputKind::Uint,
            Self::PoolAt { .. }
            | Self::PairFor { .. }
            | Self::Token0 { .. }
            | Self::Token1 { .. } => OutputKind::Address,
            Self::Symbol { .. } | Self::Name { .. } => OutputKind::Text,
            Self::Reserves { .. } => OutputKind::Reserves,
            Self::AmountsOut { .. } | Self::AmountsIn { .. } => OutputKind::Amounts,
        }
    }
}

/// Decoded return value of a [`ReadCall`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallOutput {
    Uint(U256),
    Address(Address),
    Text(String),
    Reserves { reserve0: U256, reserve1: U256 },
    Amounts(Vec<U256>),
}

impl CallOutput {
    pub fn into_uint(self) -> Result<U256, NodeError> {
        match self {
            Self::Uint(v) => Ok(v),
            other => Err(unexpected("uint", &other)),
        }
    }

    pub fn into_address(self) -> Result<Address, NodeError> {
        match self {
            Self::Address(a) => Ok(a),
            other => Err(unexpected("address", &other)),
        }
    }

    pub fn into_text(self) -> Result<String, NodeError> {
        match self {
            Self::Text(s) => Ok(s),
            other => Err(unexpected("string", &other)),
        }
    }

    pub fn into_reserves(self) -> Result<(U256, U256), NodeError> {
        match self {
            Self::Reserves { reserve0, reserve1 } => Ok((reserve0, reserve1)),
            other => Err(unexpected("reserves", &other)),
        }
    }

    pub fn into_amounts(self) -> Result<Vec<U256>, NodeError> {
        match self {
            Self::Amounts(v) => Ok(v),
            other => Err(unexpected("amounts", &other)),
        }
    }

    /// Token decimals; values that do not fit a `u8` are malformed.
    pub fn into_decimals(self) -> Result<u8, NodeError> {
        let raw = self.into_uint()?;
        if raw > U256::from(u8::MAX) {
            return Err(NodeError::Decode(format!("decimals out of range: {raw}")));
        }
        Ok(raw.low_u32() as u8)
    }
}

fn unexpected(expected: &str, got: &CallOutput) -> NodeError {
    NodeError::Decode(format!("expected {expected}, got {got:?}"))
}

/// State-changing contract calls issued by the orchestrator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "camelCase")]
pub enum ContractWrite {
    Approve {
        spender: Address,
        amount: U256,
    },
    SwapExactTokensForTokens {
        amount_in: U256,
        amount_out_min: U256,
        path: Vec<Address>,
        to: Address,
        deadline: U256,
    },
    /// Input is the attached native value.
    SwapExactEthForTokens {
        amount_out_min: U256,
        path: Vec<Address>,
        to: Address,
        deadline: U256,
    },
    SwapExactTokensForEth {
        amount_in: U256,
        amount_out_min: U256,
        path: Vec<Address>,
        to: Address,
        deadline: U256,
    },
    AddLiquidity {
        token_a: Address,
        token_b: Address,
        amount_a_desired: U256,
        amount_b_desired: U256,
        amount_a_min: U256,
        amount_b_min: U256,
        to: Address,
        deadline: U256,
    },
    /// Native side is the attached value.
    AddLiquidityEth {
        token: Address,
        amount_token_desired: U256,
        amount_token_min: U256,
        amount_eth_min: U256,
        to: Address,
        deadline: U256,
    },
    RemoveLiquidity {
        token_a: Address,
        token_b: Address,
        liquidity: U256,
        amount_a_min: U256,
        amount_b_min: U256,
        to: Address,
        deadline: U256,
    },
    RemoveLiquidityEth {
        token: Address,
        liquidity: U256,
        amount_token_min: U256,
        amount_eth_min: U256,
        to: Address,
        deadline: U256,
    },
}

impl ContractWrite {
    pub fn method_name(&self) -> &'static str {
        match self {
            Self::Approve { .. } => "approve",
            Self::SwapExactTokensForTokens { .. } => "swapExactTokensForTokens",
            Self::SwapExactEthForTokens { .. } => "swapExactETHForTokens",
            Self::SwapExactTokensForEth { .. } => "swapExactTokensForETH",
            Self::AddLiquidity { .. } => "addLiquidity",
            Self::AddLiquidityEth { .. } => "addLiquidityETH",
            Self::RemoveLiquidity { .. } => "removeLiquidity",
            Self::RemoveLiquidityEth { .. } => "removeLiquidityETH",
        }
    }
}

/// A write call addressed to a contract, sent from `from`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteCall {
    pub from: Address,
    /// Target contract: the token for approvals, the router otherwise.
    pub to: Address,
    /// Attached native value.
    pub value: U256,
    pub call: ContractWrite,
}

/// Inclusion result of a submitted transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxReceipt {
    pub hash: TxHash,
    pub block_number: u64,
    pub success: bool,
    /// Decoded revert reason, when the node reports one.
    pub revert_reason: Option<String>,
}

/// A remote ledger exposing contract reads, transaction submission and receipts.
#[async_trait]
pub trait LedgerNode: Send + Sync {
    async fn call(&self, call: ReadCall) -> Result<CallOutput, NodeError>;

    /// Issues several reads in one round trip. Each member succeeds or fails
    /// independently; the result order matches `calls`.
    async fn call_batch(&self, calls: Vec<ReadCall>) -> Vec<Result<CallOutput, NodeError>> {
        futures::future::join_all(calls.into_iter().map(|call| self.call(call))).await
    }

    /// Submits a transaction and returns its hash once the node accepts it.
    async fn send(&self, tx: WriteCall) -> Result<TxHash, NodeError>;

    /// Receipt of `hash`, or `None` while the transaction is pending.
    async fn receipt(&self, hash: TxHash) -> Result<Option<TxReceipt>, NodeError>;

    async fn chain_id(&self) -> Result<u64, NodeError>;

    async fn block_number(&self) -> Result<u64, NodeError>;

    /// Whether `address` holds deployed contract code.
    async fn has_code(&self, address: Address) -> Result<bool, NodeError>;
}
