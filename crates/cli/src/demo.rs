//! Self-contained exchange for `--demo`: the local token list, funded
//! balances and a handful of pools, all in memory.

use anyhow::{Result, anyhow};
use cpamm_domain::{Address, U256};
use cpamm_protocols::contracts::ANVIL_CHAIN_ID;
use cpamm_protocols::{ContractAddresses, MemoryLedger, default_tokens};
use tracing::info;

/// First Anvil development account.
pub const DEMO_ACCOUNT: &str = "0xf39Fd6e51aad88F6F4ce6aB8827279cffFb92266";

fn units(amount: u64, decimals: u8) -> U256 {
    U256::from(amount) * U256::exp10(usize::from(decimals))
}

/// Builds the demo deployment. The listed WETH doubles as the routing asset.
pub fn ledger(account: Address) -> Result<MemoryLedger> {
    let tokens = default_tokens(ANVIL_CHAIN_ID)?;
    let find = |symbol: &str| {
        tokens
            .iter()
            .find(|t| t.symbol == symbol)
            .map(|t| t.address)
            .ok_or_else(|| anyhow!("{symbol} missing from the local token list"))
    };
    let weth = find("WETH")?;
    let contracts = ContractAddresses {
        weth,
        ..ContractAddresses::for_chain(ANVIL_CHAIN_ID)?
    };

    let ledger = MemoryLedger::new(contracts);
    for token in tokens.iter().filter(|t| !t.is_native() && t.address != weth) {
        ledger.add_token(token.address, &token.symbol, &token.name, token.decimals);
    }
    let (usdc, usdt, cafe) = (find("USDC")?, find("USDT")?, find("CAFE")?);
    let provider = Address::repeat_byte(0x99);

    let seed = |token, amount| ledger.mint(token, account, amount).map_err(|e| anyhow!(e));
    seed(usdc, units(10_000, 6))?;
    seed(usdt, units(10_000, 6))?;
    seed(cafe, units(1_000, 18))?;
    ledger.set_native_balance(account, units(100, 18));

    let pools = [
        (weth, usdc, units(100, 18), units(200_000, 6), provider),
        (weth, usdt, units(50, 18), units(100_000, 6), provider),
        (usdc, usdt, units(50_000, 6), units(50_000, 6), provider),
        (cafe, weth, units(1_000, 18), units(10, 18), account),
    ];
    for (a, b, amount_a, amount_b, owner) in pools {
        ledger
            .create_pool(a, b, amount_a, amount_b, owner)
            .map_err(|e| anyhow!(e))?;
    }
    info!(pools = 4, "demo ledger ready");
    Ok(ledger)
}
