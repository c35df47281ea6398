use crate::application_port::ApiError;
use crate::domain_model::*;
use tokio::sync::watch;

#[async_trait::async_trait]
pub trait FeedService: Send + Sync {
    /// Current view of the feed, provisional posts included.
    fn posts(&self) -> Vec<Post>;
    fn subscribe(&self) -> watch::Receiver<Vec<Post>>;
    async fn load(&self) -> Result<Vec<Post>, ApiError>;
    async fn create_post(&self, input: NewPost) -> Result<Post, ApiError>;
    async fn delete_post(&self, post: PostId) -> Result<(), ApiError>;
    async fn like_post(&self, post: PostId) -> Result<(), ApiError>;
    async fn unlike_post(&self, post: PostId) -> Result<(), ApiError>;
    async fn add_comment(&self, post: PostId, text: String) -> Result<Comment, ApiError>;
}
