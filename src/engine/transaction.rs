//! Held-open transaction sessions keyed by transaction id
//!
//! Query execution is otherwise stateless, so a transaction keeps one
//! physical session alive here between independent calls. The map lock is
//! only held for lookup/insert/remove; each session has its own mutex, so a
//! long statement in one transaction never blocks another.
//!
//! Finishing a transaction removes the entry first and then takes the
//! session out of its slot. A caller that looked the slot up just before the
//! removal waits on the session mutex and then finds the slot empty, which
//! surfaces as [`AionError::TransactionNotFound`].

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMappedMutexGuard, OwnedMutexGuard, RwLock};
use uuid::Uuid;

use crate::engine::TransactionInfo;
use crate::error::{AionError, Result};

type Slot<S> = Arc<Mutex<Option<S>>>;

/// Exclusive access to a live session for the duration of one statement
pub type SessionGuard<S> = OwnedMappedMutexGuard<Option<S>, S>;

pub struct TransactionRegistry<S> {
    sessions: RwLock<HashMap<String, Slot<S>>>,
}

impl<S: Send + 'static> TransactionRegistry<S> {
    #[must_use]
    pub fn new() -> Self {
        Self { sessions: RwLock::new(HashMap::new()) }
    }

    /// Store an already-begun session under a fresh id
    pub async fn register(&self, session: S) -> TransactionInfo {
        let info = TransactionInfo::begin(Uuid::new_v4().to_string());
        self.sessions
            .write()
            .await
            .insert(info.id.clone(), Arc::new(Mutex::new(Some(session))));
        info
    }

    /// Lock the session for one statement
    pub async fn acquire(&self, transaction_id: &str) -> Result<SessionGuard<S>> {
        let slot = self
            .sessions
            .read()
            .await
            .get(transaction_id)
            .cloned()
            .ok_or_else(|| AionError::transaction_not_found(transaction_id))?;

        let guard = slot.lock_owned().await;
        OwnedMutexGuard::try_map(guard, Option::as_mut)
            .map_err(|_| AionError::transaction_not_found(transaction_id))
    }

    /// Remove the entry and hand back the session for commit/rollback
    ///
    /// Waits for any statement currently running on the session.
    pub async fn take(&self, transaction_id: &str) -> Result<S> {
        let slot = self
            .sessions
            .write()
            .await
            .remove(transaction_id)
            .ok_or_else(|| AionError::transaction_not_found(transaction_id))?;

        let session = slot.lock().await.take();
        session.ok_or_else(|| AionError::transaction_not_found(transaction_id))
    }

    pub async fn contains(&self, transaction_id: &str) -> bool {
        self.sessions.read().await.contains_key(transaction_id)
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }
}

impl<S: Send + 'static> Default for TransactionRegistry<S> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::TransactionStatus;
    use std::time::Duration;

    #[tokio::test]
    async fn test_register_and_acquire() {
        let registry = TransactionRegistry::new();
        let info = registry.register(vec![1_u8]).await;
        assert_eq!(info.status, TransactionStatus::Active);

        let mut session = registry.acquire(&info.id).await.unwrap();
        session.push(2);
        drop(session);

        assert_eq!(registry.take(&info.id).await.unwrap(), vec![1, 2]);
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn test_unknown_id_is_not_found() {
        let registry: TransactionRegistry<()> = TransactionRegistry::new();
        assert!(matches!(
            registry.acquire("missing").await,
            Err(AionError::TransactionNotFound(_))
        ));
        assert!(matches!(registry.take("missing").await, Err(AionError::TransactionNotFound(_))));
    }

    #[tokio::test]
    async fn test_double_take_fails_second_time() {
        let registry = TransactionRegistry::new();
        let info = registry.register(()).await;
        assert!(registry.take(&info.id).await.is_ok());
        assert!(matches!(registry.take(&info.id).await, Err(AionError::TransactionNotFound(_))));
    }

    #[tokio::test]
    async fn test_take_waits_for_in_flight_statement() {
        let registry = Arc::new(TransactionRegistry::new());
        let info = registry.register(0_u32).await;

        let guard = registry.acquire(&info.id).await.unwrap();
        let taker = {
            let registry = Arc::clone(&registry);
            let id = info.id.clone();
            tokio::spawn(async move { registry.take(&id).await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!taker.is_finished());
        // Entry is already gone for new callers
        assert!(!registry.contains(&info.id).await);

        drop(guard);
        assert_eq!(taker.await.unwrap().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_late_acquire_after_take_is_not_found() {
        let registry = Arc::new(TransactionRegistry::new());
        let info = registry.register(()).await;

        // Hold the session so take() has to wait, then race a late acquire behind it
        let guard = registry.acquire(&info.id).await.unwrap();
        let slot_holder = {
            let registry = Arc::clone(&registry);
            let id = info.id.clone();
            tokio::spawn(async move { registry.take(&id).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        drop(guard);
        slot_holder.await.unwrap().unwrap();

        assert!(matches!(
            registry.acquire(&info.id).await,
            Err(AionError::TransactionNotFound(_))
        ));
    }
}
