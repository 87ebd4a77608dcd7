//! Per-chain address book for the exchange contracts and default token lists.

use cpamm_domain::{Address, DomainError, TokenDescriptor, parse_address};
use serde::{Deserialize, Serialize};

pub const ANVIL_CHAIN_ID: u64 = 31337;
pub const MAINNET_CHAIN_ID: u64 = 1;
pub const SEPOLIA_CHAIN_ID: u64 = 11_155_111;

struct ChainDefaults {
    chain_id: u64,
    factory: &'static str,
    router: &'static str,
    weth: &'static str,
    tokens: &'static [(&'static str, &'static str, &'static str, u8)],
}

const CHAINS: &[ChainDefaults] = &[
    ChainDefaults {
        chain_id: ANVIL_CHAIN_ID,
        factory: "0x5FbDB2315678afecb367f032d93F642f64180aa3",
        router: "0xe7f1725E7734CE288F8367e1Bb143E90bb3F0512",
        weth: "0x9fE46736679d2D9a65F0992F2272dE9f3c7fa6e0",
        tokens: &[
            ("0x5FC8d32690cc91D4c39d9d3abcBD16989F875707", "USDC", "USD Coin (Local)", 6),
            ("0x0165878A594ca255338adfa4d48449f69242Eb8F", "USDT", "Tether USD (Local)", 6),
            ("0xa513E6E4b8f2a923D98304ec87F64353C4D5C853", "WETH", "Wrapped Ether (Local)", 18),
            ("0x2279B7A0a67DB372996a5FaB50D91eAA73d2eBe6", "CAFE", "0xcafe Token", 18),
        ],
    },
    ChainDefaults {
        chain_id: MAINNET_CHAIN_ID,
        factory: "0x5C69bEe701ef814a2B6a3EDD4B1652CB9cc5aA6f",
        router: "0x7a250d5630B4cF539739dF2C5dAcb4c659F2488D",
        weth: "0xC02aaA39b223FE8D0A0e5C4F27eAD9083C756Cc2",
        tokens: &[
            ("0xA0b86991c6218b36c1d19D4a2e9Eb0cE3606eB48", "USDC", "USD Coin", 6),
            ("0xdAC17F958D2ee523a2206206994597C13D831ec7", "USDT", "Tether USD", 6),
            ("0xC02aaA39b223FE8D0A0e5C4F27eAD9083C756Cc2", "WETH", "Wrapped Ether", 18),
            ("0x6B175474E89094C44Da98b954EedeAC495271d0F", "DAI", "Dai Stablecoin", 18),
            ("0x1f9840a85d5aF5bf1D1762F925BDADdC4201F984", "UNI", "Uniswap", 18),
        ],
    },
    ChainDefaults {
        chain_id: SEPOLIA_CHAIN_ID,
        factory: "0x5C69bEe701ef814a2B6a3EDD4B1652CB9cc5aA6f",
        router: "0x7a250d5630B4cF539739dF2C5dAcb4c659F2488D",
        weth: "0xfFf9976782d46CC05630D1f6eBAb18b2324d6B14",
        tokens: &[("0x1f9840a85d5aF5bf1D1762F925BDADdC4201F984", "TEST", "Test Token", 18)],
    },
];

fn defaults_for(chain_id: u64) -> &'static ChainDefaults {
    CHAINS
        .iter()
        .find(|c| c.chain_id == chain_id)
        .unwrap_or(&CHAINS[0])
}

/// Factory, router and wrapped-native addresses of one deployment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractAddresses {
    pub chain_id: u64,
    pub factory: Address,
    pub router: Address,
    /// Wrapped native asset, also the routing asset.
    pub weth: Address,
}

impl ContractAddresses {
    /// Built-in addresses for `chain_id`. Unknown chains fall back to the
    /// local Anvil deployment.
    pub fn for_chain(chain_id: u64) -> Result<Self, DomainError> {
        let defaults = defaults_for(chain_id);
        Ok(Self {
            chain_id: defaults.chain_id,
            factory: parse_address(defaults.factory)?,
            router: parse_address(defaults.router)?,
            weth: parse_address(defaults.weth)?,
        })
    }

    /// Built-in addresses with `CPAMM_FACTORY`, `CPAMM_ROUTER` and `CPAMM_WETH`
    /// overrides applied.
    pub fn from_env(chain_id: u64) -> Result<Self, DomainError> {
        Self::for_chain(chain_id)?.with_overrides(|key| std::env::var(key).ok())
    }

    pub fn with_overrides(
        mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, DomainError> {
        if let Some(v) = lookup("CPAMM_FACTORY") {
            self.factory = parse_address(&v)?;
        }
        if let Some(v) = lookup("CPAMM_ROUTER") {
            self.router = parse_address(&v)?;
        }
        if let Some(v) = lookup("CPAMM_WETH") {
            self.weth = parse_address(&v)?;
        }
        Ok(self)
    }
}

/// Built-in token list for `chain_id`, native asset first.
pub fn default_tokens(chain_id: u64) -> Result<Vec<TokenDescriptor>, DomainError> {
    let mut tokens = vec![TokenDescriptor::native()];
    for (address, symbol, name, decimals) in defaults_for(chain_id).tokens {
        tokens.push(TokenDescriptor::new(
            parse_address(address)?,
            *symbol,
            *name,
            *decimals,
        ));
    }
    Ok(tokens)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_chains() {
        let local = ContractAddresses::for_chain(ANVIL_CHAIN_ID).unwrap();
        assert_eq!(
            local.factory,
            parse_address("0x5fbdb2315678afecb367f032d93f642f64180aa3").unwrap()
        );
        let sepolia = ContractAddresses::for_chain(SEPOLIA_CHAIN_ID).unwrap();
        assert_eq!(sepolia.chain_id, SEPOLIA_CHAIN_ID);
        assert_ne!(sepolia.weth, local.weth);
    }

    #[test]
    fn test_unknown_chain_falls_back_to_local() {
        let addresses = ContractAddresses::for_chain(424242).unwrap();
        assert_eq!(addresses.chain_id, ANVIL_CHAIN_ID);
    }

    #[test]
    fn test_overrides() {
        let router = "0x00000000000000000000000000000000000000aa";
        let addresses = ContractAddresses::for_chain(ANVIL_CHAIN_ID)
            .unwrap()
            .with_overrides(|key| (key == "CPAMM_ROUTER").then(|| router.to_string()))
            .unwrap();
        assert_eq!(addresses.router, parse_address(router).unwrap());

        let bad = ContractAddresses::for_chain(ANVIL_CHAIN_ID)
            .unwrap()
            .with_overrides(|key| (key == "CPAMM_WETH").then(|| "0x1234".to_string()));
        assert!(matches!(bad, Err(DomainError::InvalidAddress(_))));
    }

    #[test]
    fn test_default_tokens_start_with_native() {
        let tokens = default_tokens(MAINNET_CHAIN_ID).unwrap();
        assert!(tokens[0].is_native());
        assert!(tokens.iter().any(|t| t.symbol == "DAI"));
    }
}
