use crate::application_port::ApiError;
use crate::domain_model::*;

#[async_trait::async_trait]
pub trait EngagementService: Send + Sync {
    async fn comments(&self, post: PostId) -> Result<Vec<Comment>, ApiError>;
    async fn follow(&self, user: UserId) -> Result<(), ApiError>;
    async fn unfollow(&self, user: UserId) -> Result<(), ApiError>;
    async fn profile(&self, user: UserId) -> Result<UserProfile, ApiError>;
    /// Users following `user`.
    async fn followers(&self, user: UserId) -> Result<Vec<UserProfile>, ApiError>;
    /// Users `user` follows.
    async fn following(&self, user: UserId) -> Result<Vec<UserProfile>, ApiError>;
    async fn leaderboard(
        &self,
        field: &str,
        period: TimePeriod,
    ) -> Result<Vec<LeaderboardEntry>, ApiError>;
}
