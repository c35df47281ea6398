use crate::domain_port::*;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;

pub struct RedisCredentialStore {
    conn: ConnectionManager,
    prefix: String,
}

impl RedisCredentialStore {
    pub fn new(conn: ConnectionManager, prefix: impl Into<String>) -> Self {
        RedisCredentialStore {
            conn,
            prefix: prefix.into(),
        }
    }

    pub async fn connect(url: &str, prefix: impl Into<String>) -> Result<Self, StoreError> {
        let client = redis::Client::open(url).map_err(|e| StoreError::Backend(e.to_string()))?;
        let conn = ConnectionManager::new(client)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(Self::new(conn, prefix))
    }

    fn key(&self, key: CredentialKey) -> String {
        format!("{}:{}", self.prefix, key)
    }
}

#[async_trait::async_trait]
impl CredentialStore for RedisCredentialStore {
    async fn get(&self, key: CredentialKey) -> Result<Option<String>, StoreError> {
        let mut conn = self.conn.clone();
        let value: Option<String> = conn
            .get(self.key(key))
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(value)
    }

    async fn set(&self, key: CredentialKey, value: &str) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let _: () = conn
            .set(self.key(key), value)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(())
    }

    async fn remove(&self, key: CredentialKey) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let _: () = conn
            .del(self.key(key))
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(())
    }
}
