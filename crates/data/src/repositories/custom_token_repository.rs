//! User-added token list persistence.

use crate::error::StoreError;
use crate::store::KeyValueStore;
use cpamm_domain::{Address, TokenDescriptor, to_hex};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};

/// Namespace key holding the custom token list.
pub const CUSTOM_TOKENS_KEY: &str = "uniswap_custom_tokens";

/// Ordered list of user-added tokens, rewritten whole on every change.
#[derive(Clone)]
pub struct CustomTokenRepository {
    store: Arc<dyn KeyValueStore>,
    key: String,
    /// Serializes read-modify-write cycles.
    update: Arc<Mutex<()>>,
}

impl CustomTokenRepository {
    /// Creates a repository under the default namespace.
    #[must_use]
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self::with_namespace(store, CUSTOM_TOKENS_KEY)
    }

    #[must_use]
    pub fn with_namespace(store: Arc<dyn KeyValueStore>, key: impl Into<String>) -> Self {
        Self {
            store,
            key: key.into(),
            update: Arc::new(Mutex::new(())),
        }
    }

    /// Loads the stored list. A value that does not parse is treated as an
    /// empty list.
    pub async fn load(&self) -> Result<Vec<TokenDescriptor>, StoreError> {
        let Some(raw) = self.store.get(&self.key).await? else {
            return Ok(Vec::new());
        };
        match serde_json::from_str::<Vec<TokenDescriptor>>(&raw) {
            Ok(tokens) => Ok(tokens),
            Err(e) => {
                warn!(key = %self.key, error = %e, "ignoring unreadable custom token list");
                Ok(Vec::new())
            }
        }
    }

    /// Appends `token`, marked as user-added. Addresses compare
    /// case-insensitively; a duplicate leaves the stored list untouched.
    pub async fn add(&self, token: TokenDescriptor) -> Result<Vec<TokenDescriptor>, StoreError> {
        let _guard = self.update.lock().await;
        let mut tokens = self.load().await?;
        if tokens.iter().any(|t| t.address == token.address) {
            return Err(StoreError::Duplicate(to_hex(&token.address)));
        }
        info!(token = %to_hex(&token.address), symbol = %token.symbol, "adding custom token");
        tokens.push(token.user_added());
        self.write(&tokens).await?;
        Ok(tokens)
    }

    /// Removes the token at `address`; returns whether it was present.
    pub async fn remove(&self, address: &Address) -> Result<bool, StoreError> {
        let _guard = self.update.lock().await;
        let mut tokens = self.load().await?;
        let before = tokens.len();
        tokens.retain(|t| t.address != *address);
        if tokens.len() == before {
            return Ok(false);
        }
        self.write(&tokens).await?;
        Ok(true)
    }

    pub async fn replace_all(&self, tokens: &[TokenDescriptor]) -> Result<(), StoreError> {
        let _guard = self.update.lock().await;
        self.write(tokens).await
    }

    async fn write(&self, tokens: &[TokenDescriptor]) -> Result<(), StoreError> {
        let raw = serde_json::to_string(tokens)?;
        self.store.put(&self.key, raw).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{FileStore, MemoryStore};
    use cpamm_domain::parse_address;

    fn token(byte: u8, symbol: &str) -> TokenDescriptor {
        TokenDescriptor::new(
            Address::repeat_byte(byte),
            symbol,
            format!("{symbol} Token"),
            6 + byte,
        )
    }

    #[tokio::test]
    async fn test_round_trip_preserves_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tokens.json");
        let repo = CustomTokenRepository::new(Arc::new(FileStore::new(&path)));

        repo.add(token(3, "CCC")).await.unwrap();
        repo.add(token(1, "AAA")).await.unwrap();
        repo.add(token(2, "BBB")).await.unwrap();
        let saved = repo.load().await.unwrap();

        let reloaded = CustomTokenRepository::new(Arc::new(FileStore::new(&path)))
            .load()
            .await
            .unwrap();
        let symbols: Vec<_> = reloaded.iter().map(|t| t.symbol.as_str()).collect();
        assert_eq!(symbols, ["CCC", "AAA", "BBB"]);
        let expected: Vec<_> = [token(3, "CCC"), token(1, "AAA"), token(2, "BBB")]
            .into_iter()
            .map(TokenDescriptor::user_added)
            .collect();
        // descriptor equality is address-only, so compare every field
        assert_eq!(
            serde_json::to_value(&reloaded).unwrap(),
            serde_json::to_value(&expected).unwrap()
        );
        assert_eq!(
            serde_json::to_value(&saved).unwrap(),
            serde_json::to_value(&expected).unwrap()
        );
        let first = &reloaded[0];
        assert_eq!(first.name, "CCC Token");
        assert_eq!(first.decimals, 9);
        assert_eq!(first.icon, saved[0].icon);
        assert!(reloaded.iter().all(|t| t.is_user_added));
    }

    #[tokio::test]
    async fn test_duplicate_is_rejected_case_insensitively() {
        let repo = CustomTokenRepository::new(Arc::new(MemoryStore::new()));
        let lower = parse_address("0xabcdef0000000000000000000000000000000001").unwrap();
        let upper = parse_address("0xABCDEF0000000000000000000000000000000001").unwrap();
        repo.add(TokenDescriptor::new(lower, "X", "X", 18))
            .await
            .unwrap();
        let err = repo
            .add(TokenDescriptor::new(upper, "Y", "Y", 6))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Duplicate(_)));
        assert_eq!(repo.load().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_remove_and_replace() {
        let repo = CustomTokenRepository::new(Arc::new(MemoryStore::new()));
        repo.add(token(1, "AAA")).await.unwrap();
        repo.add(token(2, "BBB")).await.unwrap();

        assert!(repo.remove(&Address::repeat_byte(1)).await.unwrap());
        assert!(!repo.remove(&Address::repeat_byte(9)).await.unwrap());
        assert_eq!(repo.load().await.unwrap(), vec![token(2, "BBB")]);

        repo.replace_all(&[]).await.unwrap();
        assert!(repo.load().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unreadable_value_loads_empty() {
        let store = Arc::new(MemoryStore::new());
        store
            .put(CUSTOM_TOKENS_KEY, "{broken".to_string())
            .await
            .unwrap();
        let repo = CustomTokenRepository::new(store);
        assert!(repo.load().await.unwrap().is_empty());
    }
}
