//! In-memory ledger implementing the factory, pair, token and router call
//! contracts with the 0.3% constant-product fee.
//!
//! Used by tests and by the CLI demo mode. Write calls are dry-run against the
//! current state when submitted, the way a node estimates gas, and applied
//! when mined. Mining is automatic unless switched to manual.

use crate::abi;
use crate::contracts::ContractAddresses;
use crate::node::{
    CallOutput, ContractWrite, LedgerNode, NodeError, ReadCall, TxHash, TxReceipt, WriteCall,
};
use async_trait::async_trait;
use cpamm_domain::math::constant_product::{
    DEFAULT_FEE_BPS, MINIMUM_LIQUIDITY, calculate_in_amount, calculate_liquidity_minted,
    calculate_out_amount, mul_div_floor, quote_counter_amount,
};
use cpamm_domain::{Address, TokenAmount};
use primitive_types::U256;
use sha3::{Digest, Keccak256};
use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::debug;

/// Block timestamp of a fresh ledger.
pub const GENESIS_TIMESTAMP: u64 = 1_700_000_000;

/// Seconds between mined blocks.
const BLOCK_TIME: u64 = 12;

#[derive(Debug, Clone, Default)]
struct Erc20 {
    symbol: Option<String>,
    name: Option<String>,
    decimals: Option<u8>,
    balances: HashMap<Address, U256>,
    allowances: HashMap<(Address, Address), U256>,
    total_supply: U256,
}

impl Erc20 {
    fn with_metadata(symbol: &str, name: &str, decimals: u8) -> Self {
        Self {
            symbol: Some(symbol.to_string()),
            name: Some(name.to_string()),
            decimals: Some(decimals),
            ..Self::default()
        }
    }

    fn balance(&self, owner: &Address) -> U256 {
        self.balances.get(owner).copied().unwrap_or_default()
    }

    fn allowance(&self, owner: &Address, spender: &Address) -> U256 {
        self.allowances
            .get(&(*owner, *spender))
            .copied()
            .unwrap_or_default()
    }

    fn mint(&mut self, to: Address, amount: U256) {
        *self.balances.entry(to).or_default() += amount;
        self.total_supply += amount;
    }

    fn burn(&mut self, from: Address, amount: U256) -> Result<(), String> {
        let balance = self.balance(&from);
        if balance < amount {
            return Err("ERC20: burn amount exceeds balance".to_string());
        }
        self.balances.insert(from, balance - amount);
        self.total_supply -= amount;
        Ok(())
    }

    fn transfer(&mut self, from: Address, to: Address, amount: U256) -> Result<(), String> {
        let balance = self.balance(&from);
        if balance < amount {
            return Err("ERC20: transfer amount exceeds balance".to_string());
        }
        self.balances.insert(from, balance - amount);
        *self.balances.entry(to).or_default() += amount;
        Ok(())
    }

    fn transfer_from(
        &mut self,
        spender: Address,
        from: Address,
        to: Address,
        amount: U256,
    ) -> Result<(), String> {
        let allowance = self.allowance(&from, &spender);
        if allowance < amount {
            return Err("ERC20: insufficient allowance".to_string());
        }
        self.transfer(from, to, amount)?;
        if allowance != U256::MAX {
            self.allowances.insert((from, spender), allowance - amount);
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
struct Pair {
    address: Address,
    token0: Address,
    token1: Address,
    reserve0: U256,
    reserve1: U256,
}

#[derive(Debug, Clone, Default)]
struct Ledger {
    tokens: HashMap<Address, Erc20>,
    pairs: Vec<Pair>,
    native: HashMap<Address, U256>,
    timestamp: u64,
    block: u64,
}

fn sort_tokens(a: Address, b: Address) -> (Address, Address) {
    if a < b { (a, b) } else { (b, a) }
}

fn derive_pair_address(token0: &Address, token1: &Address) -> Address {
    let mut hasher = Keccak256::new();
    hasher.update(token0.as_bytes());
    hasher.update(token1.as_bytes());
    Address::from_slice(&hasher.finalize()[12..])
}

fn revert(reason: &str) -> String {
    reason.to_string()
}

impl Ledger {
    fn token(&self, address: &Address) -> Option<&Erc20> {
        self.tokens.get(address)
    }

    fn token_mut(&mut self, address: &Address) -> Result<&mut Erc20, String> {
        self.tokens
            .get_mut(address)
            .ok_or_else(|| format!("call to non-contract {address:?}"))
    }

    fn native_of(&self, owner: &Address) -> U256 {
        self.native.get(owner).copied().unwrap_or_default()
    }

    fn credit_native(&mut self, owner: Address, amount: U256) {
        *self.native.entry(owner).or_default() += amount;
    }

    fn debit_native(&mut self, owner: Address, amount: U256) -> Result<(), String> {
        let balance = self.native_of(&owner);
        if balance < amount {
            return Err("insufficient balance for transfer".to_string());
        }
        self.native.insert(owner, balance - amount);
        Ok(())
    }

    fn pair_for(&self, a: &Address, b: &Address) -> Option<&Pair> {
        let (token0, token1) = sort_tokens(*a, *b);
        self.pairs
            .iter()
            .find(|p| p.token0 == token0 && p.token1 == token1)
    }

    fn pair_at(&self, address: &Address) -> Option<&Pair> {
        self.pairs.iter().find(|p| p.address == *address)
    }

    /// Reserves of the `a`/`b` pool oriented as `(reserve_a, reserve_b)`.
    fn reserves_for(&self, a: &Address, b: &Address) -> Option<(U256, U256)> {
        self.pair_for(a, b).map(|p| {
            if p.token0 == *a {
                (p.reserve0, p.reserve1)
            } else {
                (p.reserve1, p.reserve0)
            }
        })
    }

    fn create_pair(&mut self, a: Address, b: Address) -> Result<Address, String> {
        if a == b {
            return Err(revert("UniswapV2: IDENTICAL_ADDRESSES"));
        }
        if a.is_zero() || b.is_zero() {
            return Err(revert("UniswapV2: ZERO_ADDRESS"));
        }
        if let Some(pair) = self.pair_for(&a, &b) {
            return Ok(pair.address);
        }
        let (token0, token1) = sort_tokens(a, b);
        let address = derive_pair_address(&token0, &token1);
        self.tokens.insert(
            address,
            Erc20::with_metadata("UNI-V2", "Uniswap V2", 18),
        );
        self.pairs.push(Pair {
            address,
            token0,
            token1,
            reserve0: U256::zero(),
            reserve1: U256::zero(),
        });
        Ok(address)
    }

    fn sync(&mut self, pair_address: &Address) {
        let Some(index) = self.pairs.iter().position(|p| p.address == *pair_address) else {
            return;
        };
        let (token0, token1) = (self.pairs[index].token0, self.pairs[index].token1);
        let balance = |token: &Address| {
            self.tokens
                .get(token)
                .map(|t| t.balance(pair_address))
                .unwrap_or_default()
        };
        let (reserve0, reserve1) = (balance(&token0), balance(&token1));
        self.pairs[index].reserve0 = reserve0;
        self.pairs[index].reserve1 = reserve1;
    }

    fn amounts_out(&self, amount_in: U256, path: &[Address]) -> Result<Vec<U256>, String> {
        if path.len() < 2 {
            return Err(revert("UniswapV2Library: INVALID_PATH"));
        }
        let mut amounts = vec![amount_in];
        for hop in path.windows(2) {
            let last = amounts[amounts.len() - 1];
            if last.is_zero() {
                return Err(revert("UniswapV2Library: INSUFFICIENT_INPUT_AMOUNT"));
            }
            let (reserve_in, reserve_out) = self
                .reserves_for(&hop[0], &hop[1])
                .filter(|(r_in, r_out)| !r_in.is_zero() && !r_out.is_zero())
                .ok_or_else(|| revert("UniswapV2Library: INSUFFICIENT_LIQUIDITY"))?;
            let out = calculate_out_amount(
                TokenAmount(last),
                TokenAmount(reserve_in),
                TokenAmount(reserve_out),
                DEFAULT_FEE_BPS,
            )?;
            amounts.push(out.0);
        }
        Ok(amounts)
    }

    fn amounts_in(&self, amount_out: U256, path: &[Address]) -> Result<Vec<U256>, String> {
        if path.len() < 2 {
            return Err(revert("UniswapV2Library: INVALID_PATH"));
        }
        let mut amounts = vec![U256::zero(); path.len()];
        amounts[path.len() - 1] = amount_out;
        for i in (1..path.len()).rev() {
            if amounts[i].is_zero() {
                return Err(revert("UniswapV2Library: INSUFFICIENT_OUTPUT_AMOUNT"));
            }
            let (reserve_in, reserve_out) = self
                .reserves_for(&path[i - 1], &path[i])
                .filter(|(r_in, r_out)| !r_in.is_zero() && !r_out.is_zero())
                .ok_or_else(|| revert("UniswapV2Library: INSUFFICIENT_LIQUIDITY"))?;
            let amount_in = calculate_in_amount(
                TokenAmount(amounts[i]),
                TokenAmount(reserve_in),
                TokenAmount(reserve_out),
                DEFAULT_FEE_BPS,
            )
            .map_err(|_| revert("UniswapV2Library: INSUFFICIENT_LIQUIDITY"))?;
            amounts[i - 1] = amount_in.0;
        }
        Ok(amounts)
    }
}

/// Executes one write call against `ledger` as the router or a token would.
struct Execution<'a> {
    ledger: &'a mut Ledger,
    router: Address,
    weth: Address,
    sender: Address,
    value: U256,
}

impl Execution<'_> {
    fn ensure(&self, deadline: U256) -> Result<(), String> {
        if deadline < U256::from(self.ledger.timestamp) {
            return Err(revert("UniswapV2Router: EXPIRED"));
        }
        Ok(())
    }

    fn pull(&mut self, token: Address, to: Address, amount: U256) -> Result<(), String> {
        let (router, sender) = (self.router, self.sender);
        self.ledger
            .token_mut(&token)
            .and_then(|t| t.transfer_from(router, sender, to, amount))
            .map_err(|_| revert("TransferHelper: TRANSFER_FROM_FAILED"))
    }

    fn transfer(
        &mut self,
        token: Address,
        from: Address,
        to: Address,
        amount: U256,
    ) -> Result<(), String> {
        self.ledger.token_mut(&token)?.transfer(from, to, amount)
    }

    fn deposit_weth(&mut self, to: Address, amount: U256) -> Result<(), String> {
        let weth = self.weth;
        self.ledger.token_mut(&weth)?.mint(to, amount);
        self.ledger.credit_native(weth, amount);
        Ok(())
    }

    fn withdraw_weth(&mut self, from: Address, to: Address, amount: U256) -> Result<(), String> {
        let weth = self.weth;
        self.ledger.token_mut(&weth)?.burn(from, amount)?;
        self.ledger.debit_native(weth, amount)?;
        self.ledger.credit_native(to, amount);
        Ok(())
    }

    fn pair_address(&self, a: &Address, b: &Address) -> Result<Address, String> {
        self.ledger
            .pair_for(a, b)
            .map(|p| p.address)
            .ok_or_else(|| revert("UniswapV2Library: INSUFFICIENT_LIQUIDITY"))
    }

    /// Moves `amounts` along `path`, paying the final output to `to`.
    fn swap(&mut self, amounts: &[U256], path: &[Address], to: Address) -> Result<(), String> {
        for i in 0..path.len() - 1 {
            let pair = self.pair_address(&path[i], &path[i + 1])?;
            let recipient = if i + 2 < path.len() {
                self.pair_address(&path[i + 1], &path[i + 2])?
            } else {
                to
            };
            self.transfer(path[i + 1], pair, recipient, amounts[i + 1])?;
            self.ledger.sync(&pair);
        }
        Ok(())
    }

    fn checked_output(amounts: Vec<U256>, amount_out_min: U256) -> Result<Vec<U256>, String> {
        match amounts.last() {
            Some(out) if *out >= amount_out_min => Ok(amounts),
            _ => Err(revert("UniswapV2Router: INSUFFICIENT_OUTPUT_AMOUNT")),
        }
    }

    fn liquidity_amounts(
        &mut self,
        token_a: Address,
        token_b: Address,
        a_desired: U256,
        b_desired: U256,
        a_min: U256,
        b_min: U256,
    ) -> Result<(U256, U256), String> {
        self.ledger.create_pair(token_a, token_b)?;
        let (reserve_a, reserve_b) = self
            .ledger
            .reserves_for(&token_a, &token_b)
            .unwrap_or_default();
        if reserve_a.is_zero() && reserve_b.is_zero() {
            return Ok((a_desired, b_desired));
        }
        let quote = |amount: U256, r_in: U256, r_out: U256| {
            if amount.is_zero() {
                return Err(revert("UniswapV2Library: INSUFFICIENT_AMOUNT"));
            }
            quote_counter_amount(TokenAmount(amount), TokenAmount(r_in), TokenAmount(r_out))
                .map(|a| a.0)
                .map_err(|_| revert("UniswapV2Library: INSUFFICIENT_LIQUIDITY"))
        };
        let b_optimal = quote(a_desired, reserve_a, reserve_b)?;
        if b_optimal <= b_desired {
            if b_optimal < b_min {
                return Err(revert("UniswapV2Router: INSUFFICIENT_B_AMOUNT"));
            }
            return Ok((a_desired, b_optimal));
        }
        let a_optimal = quote(b_desired, reserve_b, reserve_a)?;
        if a_optimal < a_min {
            return Err(revert("UniswapV2Router: INSUFFICIENT_A_AMOUNT"));
        }
        Ok((a_optimal, b_desired))
    }

    /// Mints liquidity for whatever the pair holds above its reserves.
    fn mint(&mut self, pair_address: Address, to: Address) -> Result<U256, String> {
        let pair = self
            .ledger
            .pair_at(&pair_address)
            .cloned()
            .ok_or_else(|| revert("UniswapV2: PAIR_NOT_FOUND"))?;
        let held = |ledger: &Ledger, token: &Address| {
            ledger
                .token(token)
                .map(|t| t.balance(&pair_address))
                .unwrap_or_default()
        };
        let amount0 = held(&*self.ledger, &pair.token0) - pair.reserve0;
        let amount1 = held(&*self.ledger, &pair.token1) - pair.reserve1;
        let lp = self.ledger.token_mut(&pair_address)?;
        let supply = lp.total_supply;
        let liquidity = calculate_liquidity_minted(
            TokenAmount(amount0),
            TokenAmount(amount1),
            TokenAmount(pair.reserve0),
            TokenAmount(pair.reserve1),
            TokenAmount(supply),
        )
        .map_err(|_| revert("UniswapV2: INSUFFICIENT_LIQUIDITY_MINTED"))?;
        if supply.is_zero() {
            lp.mint(Address::zero(), U256::from(MINIMUM_LIQUIDITY));
        }
        lp.mint(to, liquidity.0);
        self.ledger.sync(&pair_address);
        Ok(liquidity.0)
    }

    /// Burns the liquidity held by the pair itself; returns `(amount0, amount1)`.
    fn burn(&mut self, pair_address: Address, to: Address) -> Result<(U256, U256), String> {
        let pair = self
            .ledger
            .pair_at(&pair_address)
            .cloned()
            .ok_or_else(|| revert("UniswapV2: PAIR_NOT_FOUND"))?;
        let lp = self.ledger.token_mut(&pair_address)?;
        let liquidity = lp.balance(&pair_address);
        let supply = lp.total_supply;
        let share = |reserve: U256| mul_div_floor(liquidity, reserve, supply).unwrap_or_default();
        let (amount0, amount1) = (share(pair.reserve0), share(pair.reserve1));
        if amount0.is_zero() || amount1.is_zero() {
            return Err(revert("UniswapV2: INSUFFICIENT_LIQUIDITY_BURNED"));
        }
        lp.burn(pair_address, liquidity)?;
        self.transfer(pair.token0, pair_address, to, amount0)?;
        self.transfer(pair.token1, pair_address, to, amount1)?;
        self.ledger.sync(&pair_address);
        Ok((amount0, amount1))
    }

    fn remove_liquidity(
        &mut self,
        token_a: Address,
        token_b: Address,
        liquidity: U256,
        a_min: U256,
        b_min: U256,
        to: Address,
    ) -> Result<(U256, U256), String> {
        let pair = self.pair_address(&token_a, &token_b)?;
        self.pull(pair, pair, liquidity)?;
        let (amount0, amount1) = self.burn(pair, to)?;
        let (token0, _) = sort_tokens(token_a, token_b);
        let (amount_a, amount_b) = if token_a == token0 {
            (amount0, amount1)
        } else {
            (amount1, amount0)
        };
        if amount_a < a_min {
            return Err(revert("UniswapV2Router: INSUFFICIENT_A_AMOUNT"));
        }
        if amount_b < b_min {
            return Err(revert("UniswapV2Router: INSUFFICIENT_B_AMOUNT"));
        }
        Ok((amount_a, amount_b))
    }

    fn run(&mut self, target: Address, call: &ContractWrite) -> Result<(), String> {
        if !self.value.is_zero() {
            self.ledger.debit_native(self.sender, self.value)?;
        }
        if let ContractWrite::Approve { spender, amount } = call {
            let sender = self.sender;
            self.ledger
                .token_mut(&target)?
                .allowances
                .insert((sender, *spender), *amount);
            return Ok(());
        }
        if target != self.router {
            return Err(format!("call to non-contract {target:?}"));
        }

        match call {
            ContractWrite::Approve { .. } => Ok(()),
            ContractWrite::SwapExactTokensForTokens {
                amount_in,
                amount_out_min,
                path,
                to,
                deadline,
            } => {
                self.ensure(*deadline)?;
                let quoted = self.ledger.amounts_out(*amount_in, path)?;
                let amounts = Self::checked_output(quoted, *amount_out_min)?;
                let first_pair = self.pair_address(&path[0], &path[1])?;
                self.pull(path[0], first_pair, amounts[0])?;
                self.swap(&amounts, path, *to)
            }
            ContractWrite::SwapExactEthForTokens {
                amount_out_min,
                path,
                to,
                deadline,
            } => {
                self.ensure(*deadline)?;
                if path.first() != Some(&self.weth) {
                    return Err(revert("UniswapV2Router: INVALID_PATH"));
                }
                let quoted = self.ledger.amounts_out(self.value, path)?;
                let amounts = Self::checked_output(quoted, *amount_out_min)?;
                let first_pair = self.pair_address(&path[0], &path[1])?;
                self.deposit_weth(first_pair, amounts[0])?;
                self.swap(&amounts, path, *to)
            }
            ContractWrite::SwapExactTokensForEth {
                amount_in,
                amount_out_min,
                path,
                to,
                deadline,
            } => {
                self.ensure(*deadline)?;
                if path.last() != Some(&self.weth) {
                    return Err(revert("UniswapV2Router: INVALID_PATH"));
                }
                let quoted = self.ledger.amounts_out(*amount_in, path)?;
                let amounts = Self::checked_output(quoted, *amount_out_min)?;
                let first_pair = self.pair_address(&path[0], &path[1])?;
                self.pull(path[0], first_pair, amounts[0])?;
                let router = self.router;
                self.swap(&amounts, path, router)?;
                self.withdraw_weth(router, *to, amounts[amounts.len() - 1])
            }
            ContractWrite::AddLiquidity {
                token_a,
                token_b,
                amount_a_desired,
                amount_b_desired,
                amount_a_min,
                amount_b_min,
                to,
                deadline,
            } => {
                self.ensure(*deadline)?;
                let (amount_a, amount_b) = self.liquidity_amounts(
                    *token_a,
                    *token_b,
                    *amount_a_desired,
                    *amount_b_desired,
                    *amount_a_min,
                    *amount_b_min,
                )?;
                let pair = self.pair_address(token_a, token_b)?;
                self.pull(*token_a, pair, amount_a)?;
                self.pull(*token_b, pair, amount_b)?;
                self.mint(pair, *to).map(|_| ())
            }
            ContractWrite::AddLiquidityEth {
                token,
                amount_token_desired,
                amount_token_min,
                amount_eth_min,
                to,
                deadline,
            } => {
                self.ensure(*deadline)?;
                let weth = self.weth;
                let (amount_token, amount_eth) = self.liquidity_amounts(
                    *token,
                    weth,
                    *amount_token_desired,
                    self.value,
                    *amount_token_min,
                    *amount_eth_min,
                )?;
                let pair = self.pair_address(token, &weth)?;
                self.pull(*token, pair, amount_token)?;
                self.deposit_weth(pair, amount_eth)?;
                self.mint(pair, *to)?;
                if self.value > amount_eth {
                    self.ledger.credit_native(self.sender, self.value - amount_eth);
                }
                Ok(())
            }
            ContractWrite::RemoveLiquidity {
                token_a,
                token_b,
                liquidity,
                amount_a_min,
                amount_b_min,
                to,
                deadline,
            } => {
                self.ensure(*deadline)?;
                self.remove_liquidity(
                    *token_a,
                    *token_b,
                    *liquidity,
                    *amount_a_min,
                    *amount_b_min,
                    *to,
                )
                .map(|_| ())
            }
            ContractWrite::RemoveLiquidityEth {
                token,
                liquidity,
                amount_token_min,
                amount_eth_min,
                to,
                deadline,
            } => {
                self.ensure(*deadline)?;
                let (router, weth) = (self.router, self.weth);
                let (amount_token, amount_eth) = self.remove_liquidity(
                    *token,
                    weth,
                    *liquidity,
                    *amount_token_min,
                    *amount_eth_min,
                    router,
                )?;
                self.transfer(*token, router, *to, amount_token)?;
                self.withdraw_weth(router, *to, amount_eth)
            }
        }
    }
}

#[derive(Debug, Default)]
struct Faults {
    unavailable: bool,
    reject_next_send: bool,
    failing: HashSet<Address>,
    latency: Duration,
    manual_mining: bool,
}

#[derive(Debug, Default)]
struct Counters {
    reads: u64,
    round_trips: u64,
    sent: u64,
}

#[derive(Debug, Default)]
struct Inner {
    ledger: Ledger,
    pending: Vec<(TxHash, WriteCall)>,
    receipts: HashMap<TxHash, TxReceipt>,
    faults: Faults,
    counters: Counters,
}

/// A self-contained exchange deployment held in memory.
pub struct MemoryLedger {
    contracts: ContractAddresses,
    inner: Mutex<Inner>,
}

impl MemoryLedger {
    /// Empty deployment at `contracts`, with the wrapped native token registered.
    pub fn new(contracts: ContractAddresses) -> Self {
        let mut ledger = Ledger {
            timestamp: GENESIS_TIMESTAMP,
            block: 1,
            ..Ledger::default()
        };
        ledger
            .tokens
            .insert(contracts.weth, Erc20::with_metadata("WETH", "Wrapped Ether", 18));
        Self {
            contracts,
            inner: Mutex::new(Inner {
                ledger,
                ..Inner::default()
            }),
        }
    }

    pub fn contracts(&self) -> &ContractAddresses {
        &self.contracts
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn add_token(&self, address: Address, symbol: &str, name: &str, decimals: u8) {
        self.lock()
            .ledger
            .tokens
            .insert(address, Erc20::with_metadata(symbol, name, decimals));
    }

    /// Registers a contract whose metadata calls revert.
    pub fn add_bare_token(&self, address: Address) {
        self.lock().ledger.tokens.insert(address, Erc20::default());
    }

    pub fn mint(&self, token: Address, owner: Address, amount: U256) -> Result<(), String> {
        self.lock().ledger.token_mut(&token)?.mint(owner, amount);
        Ok(())
    }

    pub fn set_native_balance(&self, owner: Address, amount: U256) {
        self.lock().ledger.native.insert(owner, amount);
    }

    /// Creates and funds a pool, minting liquidity tokens to `provider`.
    pub fn create_pool(
        &self,
        token_a: Address,
        token_b: Address,
        amount_a: U256,
        amount_b: U256,
        provider: Address,
    ) -> Result<Address, String> {
        let mut inner = self.lock();
        let mut next = inner.ledger.clone();
        let pair = next.create_pair(token_a, token_b)?;
        next.token_mut(&token_a)?.mint(pair, amount_a);
        next.token_mut(&token_b)?.mint(pair, amount_b);
        let mut exec = Execution {
            ledger: &mut next,
            router: self.contracts.router,
            weth: self.contracts.weth,
            sender: provider,
            value: U256::zero(),
        };
        exec.mint(pair, provider)?;
        inner.ledger = next;
        Ok(pair)
    }

    pub fn pair_address(&self, token_a: Address, token_b: Address) -> Option<Address> {
        self.lock().ledger.pair_for(&token_a, &token_b).map(|p| p.address)
    }

    pub fn balance_of(&self, token: Address, owner: Address) -> U256 {
        self.lock()
            .ledger
            .token(&token)
            .map(|t| t.balance(&owner))
            .unwrap_or_default()
    }

    pub fn allowance(&self, token: Address, owner: Address, spender: Address) -> U256 {
        self.lock()
            .ledger
            .token(&token)
            .map(|t| t.allowance(&owner, &spender))
            .unwrap_or_default()
    }

    pub fn native_balance(&self, owner: Address) -> U256 {
        self.lock().ledger.native_of(&owner)
    }

    /// `(reserve_a, reserve_b)` of the `a`/`b` pool.
    pub fn reserves(&self, token_a: Address, token_b: Address) -> Option<(U256, U256)> {
        self.lock().ledger.reserves_for(&token_a, &token_b)
    }

    pub fn timestamp(&self) -> u64 {
        self.lock().ledger.timestamp
    }

    pub fn advance_time(&self, seconds: u64) {
        let mut inner = self.lock();
        inner.ledger.timestamp = inner.ledger.timestamp.saturating_add(seconds);
    }

    /// With manual mining, submitted transactions stay pending until [`mine`](Self::mine).
    pub fn set_manual_mining(&self, manual: bool) {
        self.lock().faults.manual_mining = manual;
    }

    pub fn pending_count(&self) -> usize {
        self.lock().pending.len()
    }

    /// Includes every pending transaction in a new block and returns its number.
    pub fn mine(&self) -> u64 {
        let mut inner = self.lock();
        let pending = std::mem::take(&mut inner.pending);
        self.mine_block(&mut inner, pending)
    }

    fn mine_block(&self, inner: &mut Inner, txs: Vec<(TxHash, WriteCall)>) -> u64 {
        inner.ledger.block += 1;
        inner.ledger.timestamp += BLOCK_TIME;
        let block_number = inner.ledger.block;
        for (hash, tx) in txs {
            let mut next = inner.ledger.clone();
            let outcome = self.execute(&mut next, &tx);
            let receipt = match outcome {
                Ok(()) => {
                    inner.ledger = next;
                    TxReceipt {
                        hash,
                        block_number,
                        success: true,
                        revert_reason: None,
                    }
                }
                Err(reason) => TxReceipt {
                    hash,
                    block_number,
                    success: false,
                    revert_reason: Some(reason),
                },
            };
            debug!(?hash, block_number, success = receipt.success, "mined transaction");
            inner.receipts.insert(hash, receipt);
        }
        block_number
    }

    fn execute(&self, ledger: &mut Ledger, tx: &WriteCall) -> Result<(), String> {
        Execution {
            ledger,
            router: self.contracts.router,
            weth: self.contracts.weth,
            sender: tx.from,
            value: tx.value,
        }
        .run(tx.to, &tx.call)
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.lock().faults.unavailable = unavailable;
    }

    /// Makes every read targeting `address` fail as if the node dropped it.
    pub fn fail_reads_for(&self, address: Address) {
        self.lock().faults.failing.insert(address);
    }

    /// The next submission is declined by the signer.
    pub fn reject_next_send(&self) {
        self.lock().faults.reject_next_send = true;
    }

    /// Delay applied to every request before it is answered.
    pub fn set_latency(&self, latency: Duration) {
        self.lock().faults.latency = latency;
    }

    /// Number of individual reads answered so far.
    pub fn read_count(&self) -> u64 {
        self.lock().counters.reads
    }

    /// Number of read requests, counting a batch once.
    pub fn round_trips(&self) -> u64 {
        self.lock().counters.round_trips
    }

    pub fn sent_count(&self) -> u64 {
        self.lock().counters.sent
    }

    async fn round_trip(&self) -> Result<(), NodeError> {
        let latency = self.lock().faults.latency;
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        if self.lock().faults.unavailable {
            return Err(NodeError::Unavailable("connection refused".to_string()));
        }
        Ok(())
    }

    fn read(&self, inner: &mut Inner, call: &ReadCall) -> Result<CallOutput, NodeError> {
        inner.counters.reads += 1;
        if let Some((target, _)) = abi::encode_read(call) {
            if inner.faults.failing.contains(&target) {
                return Err(NodeError::Unavailable(format!("request for {target:?} dropped")));
            }
        }

        let ledger = &inner.ledger;
        let no_contract = || NodeError::Decode("empty return data".to_string());
        let token = |address: &Address| ledger.token(address).ok_or_else(no_contract);
        let pair = |address: &Address| ledger.pair_at(address).ok_or_else(no_contract);
        let factory = |address: &Address| {
            if *address == self.contracts.factory {
                Ok(())
            } else {
                Err(no_contract())
            }
        };
        let router = |address: &Address| {
            if *address == self.contracts.router {
                Ok(())
            } else {
                Err(no_contract())
            }
        };
        let metadata_missing = || NodeError::Reverted(String::new());

        Ok(match call {
            ReadCall::PoolCount { factory: f } => {
                factory(f)?;
                CallOutput::Uint(U256::from(ledger.pairs.len()))
            }
            ReadCall::PoolAt { factory: f, index } => {
                factory(f)?;
                let pair = usize::try_from(*index)
                    .ok()
                    .and_then(|i| ledger.pairs.get(i))
                    .ok_or_else(|| NodeError::Reverted(String::new()))?;
                CallOutput::Address(pair.address)
            }
            ReadCall::PairFor {
                factory: f,
                token_a,
                token_b,
            } => {
                factory(f)?;
                CallOutput::Address(
                    ledger
                        .pair_for(token_a, token_b)
                        .map(|p| p.address)
                        .unwrap_or_default(),
                )
            }
            ReadCall::Token0 { pair: p } => CallOutput::Address(pair(p)?.token0),
            ReadCall::Token1 { pair: p } => CallOutput::Address(pair(p)?.token1),
            ReadCall::Reserves { pair: p } => {
                let pair = pair(p)?;
                CallOutput::Reserves {
                    reserve0: pair.reserve0,
                    reserve1: pair.reserve1,
                }
            }
            ReadCall::TotalSupply { token: t } => CallOutput::Uint(token(t)?.total_supply),
            ReadCall::BalanceOf { token: t, owner } => CallOutput::Uint(token(t)?.balance(owner)),
            ReadCall::Allowance {
                token: t,
                owner,
                spender,
            } => CallOutput::Uint(token(t)?.allowance(owner, spender)),
            ReadCall::Decimals { token: t } => CallOutput::Uint(U256::from(
                token(t)?.decimals.ok_or_else(metadata_missing)?,
            )),
            ReadCall::Symbol { token: t } => {
                CallOutput::Text(token(t)?.symbol.clone().ok_or_else(metadata_missing)?)
            }
            ReadCall::Name { token: t } => {
                CallOutput::Text(token(t)?.name.clone().ok_or_else(metadata_missing)?)
            }
            ReadCall::AmountsOut {
                router: r,
                amount_in,
                path,
            } => {
                router(r)?;
                CallOutput::Amounts(
                    ledger
                        .amounts_out(*amount_in, path)
                        .map_err(NodeError::Reverted)?,
                )
            }
            ReadCall::AmountsIn {
                router: r,
                amount_out,
                path,
            } => {
                router(r)?;
                CallOutput::Amounts(
                    ledger
                        .amounts_in(*amount_out, path)
                        .map_err(NodeError::Reverted)?,
                )
            }
            ReadCall::NativeBalance { owner } => CallOutput::Uint(ledger.native_of(owner)),
        })
    }

    fn transaction_hash(inner: &Inner, tx: &WriteCall) -> TxHash {
        let mut hasher = Keccak256::new();
        hasher.update(tx.from.as_bytes());
        hasher.update(inner.counters.sent.to_be_bytes());
        hasher.update(tx.call.method_name().as_bytes());
        TxHash::from_slice(&hasher.finalize())
    }
}

#[async_trait]
impl LedgerNode for MemoryLedger {
    async fn call(&self, call: ReadCall) -> Result<CallOutput, NodeError> {
        self.round_trip().await?;
        let mut inner = self.lock();
        inner.counters.round_trips += 1;
        self.read(&mut inner, &call)
    }

    async fn call_batch(&self, calls: Vec<ReadCall>) -> Vec<Result<CallOutput, NodeError>> {
        if let Err(e) = self.round_trip().await {
            return calls.iter().map(|_| Err(e.clone())).collect();
        }
        let mut inner = self.lock();
        inner.counters.round_trips += 1;
        calls.iter().map(|call| self.read(&mut inner, call)).collect()
    }

    async fn send(&self, tx: WriteCall) -> Result<TxHash, NodeError> {
        self.round_trip().await?;
        let mut inner = self.lock();
        if std::mem::take(&mut inner.faults.reject_next_send) {
            return Err(NodeError::Rejected("User rejected the request.".to_string()));
        }

        // Dry run, as gas estimation would.
        let mut scratch = inner.ledger.clone();
        self.execute(&mut scratch, &tx).map_err(NodeError::Reverted)?;

        let hash = Self::transaction_hash(&inner, &tx);
        inner.counters.sent += 1;
        debug!(?hash, method = tx.call.method_name(), "accepted transaction");
        if inner.faults.manual_mining {
            inner.pending.push((hash, tx));
        } else {
            self.mine_block(&mut inner, vec![(hash, tx)]);
        }
        Ok(hash)
    }

    async fn receipt(&self, hash: TxHash) -> Result<Option<TxReceipt>, NodeError> {
        self.round_trip().await?;
        Ok(self.lock().receipts.get(&hash).cloned())
    }

    async fn chain_id(&self) -> Result<u64, NodeError> {
        self.round_trip().await?;
        Ok(self.contracts.chain_id)
    }

    async fn block_number(&self) -> Result<u64, NodeError> {
        self.round_trip().await?;
        Ok(self.lock().ledger.block)
    }

    async fn has_code(&self, address: Address) -> Result<bool, NodeError> {
        self.round_trip().await?;
        let inner = self.lock();
        Ok(address == self.contracts.factory
            || address == self.contracts.router
            || inner.ledger.tokens.contains_key(&address))
    }
}
