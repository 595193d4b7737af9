//! In-memory identity store.
//!
//! Holds subjects and signing keys in `HashMap`s behind `tokio::sync::RwLock`.
//! Used for local runs, seeded from the YAML config, and for tests, which can
//! flip it into an unavailable or slow state to exercise fail-closed paths.
use super::{KeyStore, StoredKey};
use crate::config::MemorySeed;
use async_trait::async_trait;
use gatekeeper_authz::{IdentityStore, StoreError, StoreResult, SubjectId, SubjectLookup};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::RwLock;

#[derive(Debug, Default)]
pub struct InMemoryIdentityStore {
    subjects: RwLock<HashMap<SubjectId, Vec<String>>>,
    keys: RwLock<HashMap<String, StoredKey>>,
    unavailable: AtomicBool,
    latency_ms: AtomicU64,
}

impl InMemoryIdentityStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_seed(seed: &MemorySeed) -> Self {
        let subjects = seed
            .subjects
            .iter()
            .map(|(subject, groups)| (SubjectId::new(subject.as_str()), groups.clone()))
            .collect();
        let keys = seed
            .keys
            .iter()
            .map(|key| {
                (
                    key.key_id.clone(),
                    StoredKey {
                        key_id: key.key_id.clone(),
                        algorithm: key.algorithm.clone(),
                        key_material: key.key_material.clone(),
                    },
                )
            })
            .collect();
        Self {
            subjects: RwLock::new(subjects),
            keys: RwLock::new(keys),
            ..Self::default()
        }
    }

    pub async fn upsert_subject<I, S>(&self, subject: &str, groups: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let groups = groups.into_iter().map(Into::into).collect();
        self.subjects
            .write()
            .await
            .insert(SubjectId::new(subject), groups);
    }

    pub async fn insert_key(&self, key: StoredKey) {
        self.keys.write().await.insert(key.key_id.clone(), key);
    }

    /// Make every call fail as if the backing service were down.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Delay every call by `latency`.
    pub fn set_latency(&self, latency: Duration) {
        self.latency_ms
            .store(latency.as_millis() as u64, Ordering::SeqCst);
    }

    async fn gate(&self) -> StoreResult<()> {
        let latency = self.latency_ms.load(Ordering::SeqCst);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable(
                "memory store marked unavailable".to_string(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl IdentityStore for InMemoryIdentityStore {
    async fn subject_groups(&self, subject: &SubjectId) -> StoreResult<SubjectLookup> {
        self.gate().await?;
        Ok(match self.subjects.read().await.get(subject) {
            Some(groups) => SubjectLookup::Found(groups.clone()),
            None => SubjectLookup::NotFound,
        })
    }

    async fn health_check(&self) -> StoreResult<()> {
        self.gate().await
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}

#[async_trait]
impl KeyStore for InMemoryIdentityStore {
    async fn verification_key(&self, key_id: &str) -> StoreResult<Option<StoredKey>> {
        self.gate().await?;
        Ok(self.keys.read().await.get(key_id).cloned())
    }
}
