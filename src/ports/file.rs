//! State snapshots kept in a single JSON file.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::credentials::PoolSnapshot;
use crate::ports::repository::{PersistenceResult, StateRepository, StateSnapshot};
use crate::ratelimit::SlidingWindow;
use crate::resilience::BreakerState;

#[derive(Debug, Default)]
struct FileState {
    pools: BTreeMap<Uuid, PoolSnapshot>,
    breakers: BTreeMap<String, BreakerState>,
    limiters: Vec<SlidingWindow>,
}

impl FileState {
    fn to_snapshot(&self) -> StateSnapshot {
        StateSnapshot {
            pools: self.pools.values().cloned().collect(),
            breakers: self.breakers.values().cloned().collect(),
            limiters: self.limiters.clone(),
            saved_at: Some(Utc::now()),
        }
    }
}

/// Writes go to a temp file and are renamed over the target.
#[derive(Debug)]
pub struct JsonFileStateStore {
    path: PathBuf,
    state: Mutex<FileState>,
}

impl JsonFileStateStore {
    /// Open `path`, loading existing state when the file is present.
    pub async fn open(path: impl AsRef<Path>) -> PersistenceResult<Self> {
        let path = path.as_ref().to_path_buf();
        let state = match tokio::fs::read(&path).await {
            Ok(bytes) if !bytes.is_empty() => {
                let snapshot: StateSnapshot = serde_json::from_slice(&bytes)?;
                tracing::info!(
                    path = %path.display(),
                    pools = snapshot.pools.len(),
                    breakers = snapshot.breakers.len(),
                    "Loaded persisted state"
                );
                FileState {
                    pools: snapshot.pools.into_iter().map(|p| (p.tenant_id, p)).collect(),
                    breakers: snapshot.breakers.into_iter().map(|b| (b.name.clone(), b)).collect(),
                    limiters: snapshot.limiters,
                }
            }
            Ok(_) => FileState::default(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => FileState::default(),
            Err(e) => return Err(e.into()),
        };
        Ok(Self {
            path,
            state: Mutex::new(state),
        })
    }

    async fn flush(&self, state: &FileState) -> PersistenceResult<()> {
        let json = serde_json::to_vec_pretty(&state.to_snapshot())?;
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

#[async_trait]
impl StateRepository for JsonFileStateStore {
    async fn save_pool(&self, pool: &PoolSnapshot) -> PersistenceResult<()> {
        let mut state = self.state.lock().await;
        state.pools.insert(pool.tenant_id, pool.clone());
        self.flush(&state).await
    }

    async fn delete_pool(&self, tenant_id: Uuid) -> PersistenceResult<()> {
        let mut state = self.state.lock().await;
        state.pools.remove(&tenant_id);
        self.flush(&state).await
    }

    async fn save_breaker(&self, breaker: &BreakerState) -> PersistenceResult<()> {
        let mut state = self.state.lock().await;
        state.breakers.insert(breaker.name.clone(), breaker.clone());
        self.flush(&state).await
    }

    async fn delete_breaker(&self, name: &str) -> PersistenceResult<()> {
        let mut state = self.state.lock().await;
        state.breakers.remove(name);
        self.flush(&state).await
    }

    async fn save_limiters(&self, limiters: &[SlidingWindow]) -> PersistenceResult<()> {
        let mut state = self.state.lock().await;
        state.limiters = limiters.to_vec();
        self.flush(&state).await
    }

    async fn load(&self) -> PersistenceResult<StateSnapshot> {
        Ok(self.state.lock().await.to_snapshot())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::credentials::{CredentialPool, QuotaRollover, SelectionStrategy};
    use crate::resilience::{BreakerConfig, CircuitBreaker};
    use std::sync::Arc;

    #[tokio::test]
    async fn state_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state").join("gateway.json");
        let clock = Arc::new(ManualClock::starting_now());

        let store = JsonFileStateStore::open(&path).await.unwrap();
        let pool = CredentialPool::new(
            Uuid::new_v4(),
            "main",
            SelectionStrategy::Priority,
            QuotaRollover::default(),
            clock.clone(),
        );
        store.save_pool(&pool.snapshot()).await.unwrap();
        let breaker = CircuitBreaker::new("datajud:tjmg", BreakerConfig::default(), clock);
        breaker.force_open();
        store.save_breaker(&breaker.snapshot()).await.unwrap();
        drop(store);

        let reopened = JsonFileStateStore::open(&path).await.unwrap();
        let snapshot = reopened.load().await.unwrap();
        assert_eq!(snapshot.pools.len(), 1);
        assert_eq!(snapshot.pools[0].strategy, SelectionStrategy::Priority);
        assert_eq!(snapshot.breakers[0].name, "datajud:tjmg");

        reopened.delete_breaker("datajud:tjmg").await.unwrap();
        assert!(reopened.load().await.unwrap().breakers.is_empty());
    }

    #[tokio::test]
    async fn missing_file_is_empty_state() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStateStore::open(dir.path().join("none.json")).await.unwrap();
        let snapshot = store.load().await.unwrap();
        assert!(snapshot.pools.is_empty() && snapshot.breakers.is_empty());
    }
}
