use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CredentialKey {
    Access,
    Refresh,
}

impl CredentialKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            CredentialKey::Access => "access",
            CredentialKey::Refresh => "refresh",
        }
    }
}

impl fmt::Display for CredentialKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("io error: {0}")]
    Io(String),
    #[error("corrupt credential data: {0}")]
    Corrupt(String),
    #[error("backend error: {0}")]
    Backend(String),
}

/// Durable key-value home of the session tokens.
#[async_trait::async_trait]
pub trait CredentialStore: Send + Sync {
    async fn get(&self, key: CredentialKey) -> Result<Option<String>, StoreError>;
    async fn set(&self, key: CredentialKey, value: &str) -> Result<(), StoreError>;
    async fn remove(&self, key: CredentialKey) -> Result<(), StoreError>;
}
