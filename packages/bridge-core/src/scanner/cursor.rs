use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;

use crate::error::Result;
use crate::types::BridgeRole;

/// Cursor key for block-height scanning.
pub const HEIGHT_CURSOR: &str = "height";

/// Cursor key for the action log of `account`.
pub fn sequence_cursor(account: &str) -> String {
    format!("seq:{}", account)
}

/// Persisted scan position, one integer per `(role, key)`.
///
/// `store` must never move a cursor backwards.
#[async_trait]
pub trait ScanCursorStore: Send + Sync {
    async fn load(&self, role: BridgeRole, key: &str) -> Result<Option<u64>>;
    async fn store(&self, role: BridgeRole, key: &str, value: u64) -> Result<()>;
}

/// Process-local cursor store, used when no database is configured.
#[derive(Default)]
pub struct MemoryCursorStore {
    values: Mutex<HashMap<(BridgeRole, String), u64>>,
}

impl MemoryCursorStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ScanCursorStore for MemoryCursorStore {
    async fn load(&self, role: BridgeRole, key: &str) -> Result<Option<u64>> {
        let values = self.values.lock().unwrap_or_else(|p| p.into_inner());
        Ok(values.get(&(role, key.to_string())).copied())
    }

    async fn store(&self, role: BridgeRole, key: &str, value: u64) -> Result<()> {
        let mut values = self.values.lock().unwrap_or_else(|p| p.into_inner());
        let entry = values.entry((role, key.to_string())).or_insert(value);
        if value > *entry {
            *entry = value;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_cursor_is_monotonic_per_role() {
        let store = MemoryCursorStore::new();
        assert_eq!(store.load(BridgeRole::Source, HEIGHT_CURSOR).await.unwrap(), None);
        store.store(BridgeRole::Source, HEIGHT_CURSOR, 10).await.unwrap();
        store.store(BridgeRole::Source, HEIGHT_CURSOR, 7).await.unwrap();
        store.store(BridgeRole::Destination, HEIGHT_CURSOR, 3).await.unwrap();
        assert_eq!(store.load(BridgeRole::Source, HEIGHT_CURSOR).await.unwrap(), Some(10));
        assert_eq!(store.load(BridgeRole::Destination, HEIGHT_CURSOR).await.unwrap(), Some(3));
        assert_eq!(sequence_cursor("bridgedepo11"), "seq:bridgedepo11");
    }
}
