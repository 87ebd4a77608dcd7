//! One connected client: the components wired over a shared node.

use crate::clock::Clock;
use crate::config::TradingConfig;
use crate::error::ClientError;
use crate::orchestrator::TransactionOrchestrator;
use crate::quote::{QuoteDebouncer, QuoteEngine};
use crate::registry::{PoolListing, PoolRegistry};
use crate::resolver::TokenResolver;
use cpamm_data::{CustomTokenRepository, KeyValueStore};
use cpamm_domain::{
    Address, DerivedPoolView, PriceTable, TokenDescriptor, is_native, parse_address, to_hex,
};
use cpamm_protocols::{CallOutput, ContractAddresses, LedgerNode, ReadCall, default_tokens};
use std::sync::Arc;
use tracing::{info, warn};

/// Connectivity and deployment checks against the node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostics {
    /// Chain id the contract addresses were configured for.
    pub expected_chain_id: u64,
    /// Chain id reported by the node, `None` when unreachable.
    pub chain_id: Option<u64>,
    /// Latest block reported by the node.
    pub block_number: Option<u64>,
    /// Factory address holds code.
    pub factory_deployed: bool,
    /// Router address holds code.
    pub router_deployed: bool,
    /// Wrapped native asset address holds code.
    pub weth_deployed: bool,
    /// Pools reported by the factory.
    pub pool_count: Option<u64>,
    /// Failed checks, in the order they ran.
    pub errors: Vec<String>,
}

impl Diagnostics {
    pub fn is_healthy(&self) -> bool {
        self.chain_id == Some(self.expected_chain_id)
            && self.factory_deployed
            && self.router_deployed
            && self.weth_deployed
            && self.errors.is_empty()
    }
}

pub struct ClientSession {
    node: Arc<dyn LedgerNode>,
    contracts: ContractAddresses,
    trading: TradingConfig,
    account: Option<Address>,
    defaults: Vec<TokenDescriptor>,
    custom_tokens: CustomTokenRepository,
    prices: PriceTable,
    resolver: Arc<TokenResolver>,
    registry: Arc<PoolRegistry>,
    quotes: Arc<QuoteEngine>,
    debouncer: Arc<QuoteDebouncer>,
    orchestrator: Arc<TransactionOrchestrator>,
}

impl ClientSession {
    /// Wires the components and seeds the metadata cache with the built-in
    /// and user-added token lists.
    pub async fn connect(
        node: Arc<dyn LedgerNode>,
        contracts: ContractAddresses,
        trading: TradingConfig,
        store: Arc<dyn KeyValueStore>,
        account: Option<Address>,
    ) -> Result<Self, ClientError> {
        let defaults = default_tokens(contracts.chain_id)?;
        let custom_tokens = CustomTokenRepository::new(store);
        let custom = custom_tokens.load().await?;

        let resolver = Arc::new(TokenResolver::new(node.clone()));
        resolver
            .seed(defaults.iter().chain(custom.iter()).cloned())
            .await;
        let registry = Arc::new(PoolRegistry::new(
            node.clone(),
            resolver.clone(),
            contracts.clone(),
        ));
        let quotes = Arc::new(QuoteEngine::new(node.clone(), contracts.clone()));
        let debouncer = Arc::new(QuoteDebouncer::new(quotes.clone(), trading.quote_debounce));
        let orchestrator = Arc::new(TransactionOrchestrator::new(
            node.clone(),
            contracts.clone(),
            trading.clone(),
            account,
        ));

        info!(
            chain_id = contracts.chain_id,
            account = ?account.map(|a| to_hex(&a)),
            custom_tokens = custom.len(),
            "session connected"
        );
        Ok(Self {
            node,
            contracts,
            trading,
            account,
            defaults,
            custom_tokens,
            prices: PriceTable::default(),
            resolver,
            registry,
            quotes,
            debouncer,
            orchestrator,
        })
    }

    /// Replaces the deadline clock. Call before any submission.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.orchestrator = Arc::new(
            TransactionOrchestrator::new(
                self.node.clone(),
                self.contracts.clone(),
                self.trading.clone(),
                self.account,
            )
            .with_clock(clock),
        );
        self
    }

    #[must_use]
    pub fn with_prices(mut self, prices: PriceTable) -> Self {
        self.prices = prices;
        self
    }

    pub fn account(&self) -> Option<Address> {
        self.account
    }

    pub fn contracts(&self) -> &ContractAddresses {
        &self.contracts
    }

    pub fn trading(&self) -> &TradingConfig {
        &self.trading
    }

    pub fn prices(&self) -> &PriceTable {
        &self.prices
    }

    pub fn resolver(&self) -> &Arc<TokenResolver> {
        &self.resolver
    }

    pub fn registry(&self) -> &Arc<PoolRegistry> {
        &self.registry
    }

    pub fn quotes(&self) -> &Arc<QuoteEngine> {
        &self.quotes
    }

    pub fn debouncer(&self) -> &Arc<QuoteDebouncer> {
        &self.debouncer
    }

    pub fn orchestrator(&self) -> &Arc<TransactionOrchestrator> {
        &self.orchestrator
    }

    /// Built-in tokens followed by user-added ones.
    pub async fn tokens(&self) -> Result<Vec<TokenDescriptor>, ClientError> {
        let mut tokens = self.defaults.clone();
        for token in self.custom_tokens.load().await? {
            if !tokens.contains(&token) {
                tokens.push(token);
            }
        }
        Ok(tokens)
    }

    /// Finds a listed token by symbol (case-insensitive), or resolves `query`
    /// as a contract address.
    pub async fn find_token(&self, query: &str) -> Result<TokenDescriptor, ClientError> {
        let query = query.trim();
        if let Some(token) = self
            .tokens()
            .await?
            .into_iter()
            .find(|t| t.symbol.eq_ignore_ascii_case(query))
        {
            return Ok(token);
        }
        self.resolver.resolve(query).await?.into_result()
    }

    /// Validates, resolves and persists a user-added token. Nothing is
    /// written unless the metadata resolves.
    pub async fn add_custom_token(&self, input: &str) -> Result<TokenDescriptor, ClientError> {
        let address = parse_address(input)?;
        if is_native(&address) || self.defaults.iter().any(|t| t.address == address) {
            return Err(ClientError::DuplicateToken(to_hex(&address)));
        }
        let token = self
            .resolver
            .resolve_address(address)
            .await
            .into_result()?
            .user_added();
        self.custom_tokens.add(token.clone()).await?;
        Ok(token)
    }

    pub async fn remove_custom_token(&self, input: &str) -> Result<bool, ClientError> {
        let address = parse_address(input)?;
        let removed = self.custom_tokens.remove(&address).await?;
        if removed {
            info!(token = %to_hex(&address), "custom token removed");
        }
        Ok(removed)
    }

    /// Refreshes the first `limit` pools with the account's positions.
    pub async fn pools(&self, limit: u64) -> Result<PoolListing, ClientError> {
        self.registry.refresh(limit, self.account).await
    }

    pub fn pool_views(&self, listing: &PoolListing) -> Vec<DerivedPoolView> {
        listing.views(&self.prices)
    }

    pub async fn diagnose(&self) -> Diagnostics {
        let mut errors = Vec::new();
        let mut record = |what: &str, e: &dyn std::fmt::Display| {
            errors.push(format!("{what}: {e}"));
        };

        let chain_id = match self.node.chain_id().await {
            Ok(id) => Some(id),
            Err(e) => {
                record("chain id", &e);
                None
            }
        };
        let block_number = match self.node.block_number().await {
            Ok(n) => Some(n),
            Err(e) => {
                record("block number", &e);
                None
            }
        };

        let targets = [
            ("factory", self.contracts.factory),
            ("router", self.contracts.router),
            ("wrapped native", self.contracts.weth),
        ];
        let checks = futures::future::join_all(
            targets.iter().map(|(_, address)| self.node.has_code(*address)),
        )
        .await;
        let mut deployed = [false; 3];
        for (i, ((name, _), check)) in targets.iter().zip(checks).enumerate() {
            match check {
                Ok(has_code) => deployed[i] = has_code,
                Err(e) => record(name, &e),
            }
        }

        let pool_count = match self
            .node
            .call(ReadCall::PoolCount {
                factory: self.contracts.factory,
            })
            .await
            .and_then(CallOutput::into_uint)
        {
            Ok(count) => Some(count.low_u64()),
            Err(e) => {
                record("pool count", &e);
                None
            }
        };

        let diagnostics = Diagnostics {
            expected_chain_id: self.contracts.chain_id,
            chain_id,
            block_number,
            factory_deployed: deployed[0],
            router_deployed: deployed[1],
            weth_deployed: deployed[2],
            pool_count,
            errors,
        };
        if !diagnostics.is_healthy() {
            warn!(?diagnostics, "node diagnostics failed");
        }
        diagnostics
    }

    /// Ends the session. Transactions already sent are not cancelled.
    pub async fn shutdown(self) {
        let in_flight = self.orchestrator.tracker().in_flight().await;
        if !in_flight.is_empty() {
            warn!(count = in_flight.len(), "closing with transactions in flight");
        }
        info!("session closed");
    }
}
