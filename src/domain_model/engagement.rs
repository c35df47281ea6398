use crate::domain_model::*;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Ord, PartialOrd, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CommentId(pub u64);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Comment {
    pub id: CommentId,
    pub post: PostId,
    pub text: String,
    #[serde(default)]
    pub user: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaderboardEntry {
    pub rank: u32,
    pub username: String,
    #[serde(default)]
    pub field: String,
    #[serde(default)]
    pub score: i64,
    #[serde(default)]
    pub total_likes: u32,
    #[serde(default)]
    pub total_comments: u32,
    #[serde(default)]
    pub total_follows: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimePeriod {
    Weekly,
    Monthly,
    AllTime,
}

impl TimePeriod {
    pub fn as_str(&self) -> &'static str {
        match self {
            TimePeriod::Weekly => "WEEKLY",
            TimePeriod::Monthly => "MONTHLY",
            TimePeriod::AllTime => "ALL_TIME",
        }
    }
}

impl std::str::FromStr for TimePeriod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "WEEKLY" => Ok(TimePeriod::Weekly),
            "MONTHLY" => Ok(TimePeriod::Monthly),
            "ALL_TIME" | "ALL-TIME" | "ALLTIME" => Ok(TimePeriod::AllTime),
            other => Err(format!("unknown time period: {other}")),
        }
    }
}
