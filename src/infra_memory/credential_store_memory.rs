use crate::domain_port::*;
use dashmap::DashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::watch;

/// Credentials kept for the life of the process. Writes can be held at a
/// gate so tests can overlap them with sign-out.
pub struct MemoryCredentialStore {
    entries: DashMap<CredentialKey, String>,
    write_gate: watch::Sender<bool>,
    writes_waiting: AtomicUsize,
}

impl Default for MemoryCredentialStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        let (write_gate, _) = watch::channel(true);
        MemoryCredentialStore {
            entries: DashMap::new(),
            write_gate,
            writes_waiting: AtomicUsize::new(0),
        }
    }

    pub fn with_tokens(access: &str, refresh: &str) -> Self {
        let store = Self::new();
        store.entries.insert(CredentialKey::Access, access.to_string());
        store
            .entries
            .insert(CredentialKey::Refresh, refresh.to_string());
        store
    }

    pub fn peek(&self, key: CredentialKey) -> Option<String> {
        self.entries.get(&key).map(|entry| entry.value().clone())
    }

    pub fn hold_writes(&self) {
        self.write_gate.send_replace(false);
    }

    pub fn release_writes(&self) {
        self.write_gate.send_replace(true);
    }

    /// `set` calls parked at the write gate.
    pub fn writes_waiting(&self) -> usize {
        self.writes_waiting.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl CredentialStore for MemoryCredentialStore {
    async fn get(&self, key: CredentialKey) -> Result<Option<String>, StoreError> {
        Ok(self.peek(key))
    }

    async fn set(&self, key: CredentialKey, value: &str) -> Result<(), StoreError> {
        self.writes_waiting.fetch_add(1, Ordering::SeqCst);
        let mut open = self.write_gate.subscribe();
        let _ = open.wait_for(|open| *open).await;
        self.writes_waiting.fetch_sub(1, Ordering::SeqCst);

        self.entries.insert(key, value.to_string());
        Ok(())
    }

    async fn remove(&self, key: CredentialKey) -> Result<(), StoreError> {
        self.entries.remove(&key);
        Ok(())
    }
}
