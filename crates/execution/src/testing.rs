//! Seeded in-memory deployment shared by the unit tests.

use cpamm_domain::{Address, U256};
use cpamm_protocols::contracts::ANVIL_CHAIN_ID;
use cpamm_protocols::{ContractAddresses, LedgerNode, MemoryLedger, default_tokens};
use std::sync::Arc;

pub(crate) fn units(amount: u64, decimals: u8) -> U256 {
    U256::from(amount) * U256::exp10(decimals as usize)
}

pub(crate) struct Fixture {
    pub ledger: Arc<MemoryLedger>,
    pub contracts: ContractAddresses,
    pub weth: Address,
    pub usdc: Address,
    pub cafe: Address,
    pub user: Address,
    pub provider: Address,
    /// 100 WETH / 200,000 USDC, owned by `provider`.
    pub weth_usdc: Address,
    /// 1,000 CAFE / 10 WETH, owned by `user`.
    pub cafe_weth: Address,
}

impl Fixture {
    pub fn new() -> Self {
        let contracts = ContractAddresses::for_chain(ANVIL_CHAIN_ID).unwrap();
        let tokens = default_tokens(ANVIL_CHAIN_ID).unwrap();
        let find = |symbol: &str| tokens.iter().find(|t| t.symbol == symbol).unwrap().address;
        let (usdc, cafe) = (find("USDC"), find("CAFE"));
        let weth = contracts.weth;
        let user = Address::repeat_byte(0x77);
        let provider = Address::repeat_byte(0x99);

        let ledger = MemoryLedger::new(contracts.clone());
        ledger.add_token(usdc, "USDC", "USD Coin (Local)", 6);
        ledger.add_token(cafe, "CAFE", "0xcafe Token", 18);
        ledger.mint(usdc, user, units(10_000, 6)).unwrap();
        ledger.mint(cafe, user, units(1_000, 18)).unwrap();
        ledger.set_native_balance(user, units(100, 18));

        let weth_usdc = ledger
            .create_pool(weth, usdc, units(100, 18), units(200_000, 6), provider)
            .unwrap();
        let cafe_weth = ledger
            .create_pool(cafe, weth, units(1_000, 18), units(10, 18), user)
            .unwrap();

        Self {
            ledger: Arc::new(ledger),
            contracts,
            weth,
            usdc,
            cafe,
            user,
            provider,
            weth_usdc,
            cafe_weth,
        }
    }

    pub fn node(&self) -> Arc<dyn LedgerNode> {
        self.ledger.clone()
    }
}
