//! Identity store backends.
//!
//! Both backends implement the library's [`IdentityStore`] for membership
//! lookups and [`KeyStore`] for startup key loading. The sidecar only reads;
//! the identity provider owns the data.
use crate::config::{GatekeeperConfig, StorageBackend};
use anyhow::Context;
use async_trait::async_trait;
use gatekeeper_authz::{IdentityStore, StoreResult};
use std::sync::Arc;

pub mod memory;
pub mod postgres;

/// Signing key row as published by the identity provider.
#[derive(Clone, PartialEq, Eq)]
pub struct StoredKey {
    pub key_id: String,
    /// JWT algorithm name, e.g. `HS256` or `EdDSA`.
    pub algorithm: String,
    /// Shared secret for HS* keys, PEM public key otherwise.
    pub key_material: String,
}

impl std::fmt::Debug for StoredKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoredKey")
            .field("key_id", &self.key_id)
            .field("algorithm", &self.algorithm)
            .finish_non_exhaustive()
    }
}

#[async_trait]
pub trait KeyStore: Send + Sync {
    async fn verification_key(&self, key_id: &str) -> StoreResult<Option<StoredKey>>;
}

/// One backend viewed through both store traits.
#[derive(Clone)]
pub struct Stores {
    pub identity: Arc<dyn IdentityStore>,
    pub keys: Arc<dyn KeyStore>,
}

impl Stores {
    pub fn new<S>(store: Arc<S>) -> Self
    where
        S: IdentityStore + KeyStore + 'static,
    {
        let identity: Arc<dyn IdentityStore> = store.clone();
        let keys: Arc<dyn KeyStore> = store;
        Self { identity, keys }
    }
}

/// Open the configured backend.
pub async fn open(config: &GatekeeperConfig) -> anyhow::Result<Stores> {
    match config.storage {
        StorageBackend::Memory => {
            let store = memory::InMemoryIdentityStore::from_seed(&config.memory_seed);
            Ok(Stores::new(Arc::new(store)))
        }
        StorageBackend::Postgres => {
            let pg = config
                .postgres
                .as_ref()
                .context("postgres configuration missing")?;
            let store = postgres::PostgresIdentityStore::connect(pg)
                .await
                .context("connect identity store")?;
            Ok(Stores::new(Arc::new(store)))
        }
    }
}
