use serde::{Deserialize, Serialize};
use std::fmt;

/// Client-side identity of a record the server has not assigned an id to yet.
#[derive(Debug, Clone, Copy, Ord, PartialOrd, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct LocalId(pub uuid::Uuid);

impl LocalId {
    pub fn new() -> Self {
        LocalId(uuid::Uuid::new_v4())
    }
}

impl Default for LocalId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for LocalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "local:{}", self.0)
    }
}

/// Identity of a cached record. Provisional and confirmed keys never compare
/// equal, whatever the server id space looks like.
#[derive(Debug, Clone, Copy, Ord, PartialOrd, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(tag = "state", content = "id", rename_all = "lowercase")]
pub enum RecordKey<I> {
    Provisional(LocalId),
    Confirmed(I),
}

impl<I: Copy> RecordKey<I> {
    pub fn is_provisional(&self) -> bool {
        matches!(self, RecordKey::Provisional(_))
    }

    pub fn confirmed(&self) -> Option<I> {
        match self {
            RecordKey::Confirmed(id) => Some(*id),
            RecordKey::Provisional(_) => None,
        }
    }
}

impl<I: fmt::Display> fmt::Display for RecordKey<I> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordKey::Provisional(local) => write!(f, "{}", local),
            RecordKey::Confirmed(id) => write!(f, "{}", id),
        }
    }
}
