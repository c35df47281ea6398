use crate::domain_model::*;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, Ord, PartialOrd, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PostId(pub u64);

impl fmt::Display for PostId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for PostId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse::<u64>().map(PostId)
    }
}

pub type PostKey = RecordKey<PostId>;

/// An achievement post as the feed shows it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Post {
    pub key: PostKey,
    pub author: String,
    pub title: String,
    pub description: String,
    pub category: Option<String>,
    pub image: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub like_count: u32,
    pub comment_count: u32,
}

impl Post {
    /// Stand-in shown while `input` is being written.
    pub fn provisional(local_id: LocalId, input: &NewPost) -> Self {
        let now = Utc::now();
        Post {
            key: RecordKey::Provisional(local_id),
            author: "You".to_string(),
            title: input.title.clone(),
            description: input.description.clone(),
            category: input.category.clone(),
            image: input.image.clone(),
            created_at: now,
            updated_at: now,
            like_count: 0,
            comment_count: 0,
        }
    }

    pub fn id(&self) -> Option<PostId> {
        self.key.confirmed()
    }
}

/// Post as serialized by the REST API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostRecord {
    pub id: PostId,
    #[serde(default)]
    pub user: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub image: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub like_count: u32,
    #[serde(default)]
    pub comment_count: u32,
}

impl From<PostRecord> for Post {
    fn from(record: PostRecord) -> Self {
        Post {
            key: RecordKey::Confirmed(record.id),
            author: record.user,
            title: record.title,
            description: record.description,
            category: record.category.filter(|c| !c.is_empty()),
            image: record.image.filter(|i| !i.is_empty()),
            created_at: record.created_at,
            updated_at: record.updated_at,
            like_count: record.like_count,
            comment_count: record.comment_count,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NewPost {
    pub title: String,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
}

/// List endpoints answer either with a bare array or with a paginated
/// envelope, depending on the server's pagination settings.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum Listing<T> {
    Paginated { results: Vec<T> },
    Plain(Vec<T>),
}

impl<T> Listing<T> {
    pub fn into_items(self) -> Vec<T> {
        match self {
            Listing::Paginated { results } => results,
            Listing::Plain(items) => items,
        }
    }
}
