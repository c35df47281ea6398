use crate::application_port::*;
use crate::domain_model::*;
use crate::domain_port::ApiRequest;
use std::sync::Arc;
use tracing::info;

fn user_path(user: UserId) -> String {
    format!("/api/users/{user}/")
}

fn follow_path(user: UserId) -> String {
    format!("{}follow/", user_path(user))
}

pub struct RealEngagementService {
    client: Arc<dyn ApiClient>,
}

impl RealEngagementService {
    pub fn new(client: Arc<dyn ApiClient>) -> Self {
        RealEngagementService { client }
    }

    async fn users(&self, path: String) -> Result<Vec<UserProfile>, ApiError> {
        let listing: Listing<UserProfile> =
            self.client.execute(ApiRequest::get(path)).await?.json()?;
        Ok(listing.into_items())
    }
}

#[async_trait::async_trait]
impl EngagementService for RealEngagementService {
    async fn comments(&self, post: PostId) -> Result<Vec<Comment>, ApiError> {
        let listing: Listing<Comment> = self
            .client
            .execute(ApiRequest::get(format!("/api/posts/{post}/comments/")))
            .await?
            .json()?;
        Ok(listing.into_items())
    }

    async fn follow(&self, user: UserId) -> Result<(), ApiError> {
        self.client
            .execute(ApiRequest::post(follow_path(user)))
            .await?;
        info!(%user, "followed");
        Ok(())
    }

    async fn unfollow(&self, user: UserId) -> Result<(), ApiError> {
        self.client
            .execute(ApiRequest::delete(follow_path(user)))
            .await?;
        info!(%user, "unfollowed");
        Ok(())
    }

    async fn profile(&self, user: UserId) -> Result<UserProfile, ApiError> {
        self.client
            .execute(ApiRequest::get(user_path(user)))
            .await?
            .json()
    }

    async fn followers(&self, user: UserId) -> Result<Vec<UserProfile>, ApiError> {
        self.users(format!("{}followers/", user_path(user))).await
    }

    async fn following(&self, user: UserId) -> Result<Vec<UserProfile>, ApiError> {
        self.users(format!("{}following/", user_path(user))).await
    }

    async fn leaderboard(
        &self,
        field: &str,
        period: TimePeriod,
    ) -> Result<Vec<LeaderboardEntry>, ApiError> {
        let request = ApiRequest::get("/api/leaderboard/")
            .with_query("field", field)
            .with_query("time_period", period.as_str());
        let listing: Listing<LeaderboardEntry> = self.client.execute(request).await?.json()?;
        Ok(listing.into_items())
    }
}
