use crate::application_impl::optimistic_cache::{CollectionFetcher, Edit, OptimisticCache, edit};
use crate::application_port::*;
use crate::domain_model::*;
use crate::domain_port::ApiRequest;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::info;

const POSTS: &str = "/api/posts/";

fn post_path(post: PostId) -> String {
    format!("{POSTS}{post}/")
}

#[derive(Serialize)]
struct CommentRequest<'a> {
    text: &'a str,
}

pub struct PostFetcher {
    client: Arc<dyn ApiClient>,
}

impl PostFetcher {
    pub fn new(client: Arc<dyn ApiClient>) -> Self {
        PostFetcher { client }
    }
}

#[async_trait::async_trait]
impl CollectionFetcher<Post> for PostFetcher {
    async fn fetch(&self, _key: &QueryKey) -> Result<Vec<Post>, ApiError> {
        let listing: Listing<PostRecord> = self.client.execute(ApiRequest::get(POSTS)).await?.json()?;
        Ok(listing.into_items().into_iter().map(Post::from).collect())
    }
}

#[derive(Debug, Clone, Copy)]
enum Counter {
    Likes,
    Comments,
}

impl Counter {
    fn value(self, post: &Post) -> u32 {
        match self {
            Counter::Likes => post.like_count,
            Counter::Comments => post.comment_count,
        }
    }

    fn of(self, post: &mut Post) -> &mut u32 {
        match self {
            Counter::Likes => &mut post.like_count,
            Counter::Comments => &mut post.comment_count,
        }
    }
}

/// Pins a counter to `value` rather than stepping it, so replaying the edit
/// over a refetched feed that already counts the write changes nothing.
fn set_counter(id: PostId, counter: Counter, value: u32) -> Edit<Post> {
    edit(move |posts: &mut Vec<Post>| {
        if let Some(post) = posts.iter_mut().find(|post| post.id() == Some(id)) {
            *counter.of(post) = value;
        }
    })
}

fn remove_post(id: PostId) -> Edit<Post> {
    edit(move |posts: &mut Vec<Post>| posts.retain(|post| post.id() != Some(id)))
}

fn insert_head(post: Post) -> Edit<Post> {
    edit(move |posts: &mut Vec<Post>| {
        if !posts.iter().any(|existing| existing.key == post.key) {
            posts.insert(0, post.clone());
        }
    })
}

/// Feed of achievement posts, written through the optimistic cache.
pub struct RealFeedService {
    client: Arc<dyn ApiClient>,
    cache: OptimisticCache<Post>,
    key: QueryKey,
}

impl RealFeedService {
    pub fn new(client: Arc<dyn ApiClient>) -> Self {
        let fetcher = Arc::new(PostFetcher::new(client.clone()));
        RealFeedService {
            client,
            cache: OptimisticCache::new(fetcher),
            key: QueryKey::feed(),
        }
    }

    /// Forgets the cached feed, e.g. after sign-out.
    pub fn clear(&self) {
        self.cache.clear();
    }

    async fn write_only(&self, request: ApiRequest) -> Result<(), ApiError> {
        self.client.execute(request).await.map(|_| ())
    }

    /// Edit moving `counter` on `post` by `step` from what readers see now.
    fn stepped(&self, post: PostId, counter: Counter, step: i64) -> Edit<Post> {
        let current = self
            .posts()
            .iter()
            .find(|candidate| candidate.id() == Some(post))
            .map(|found| counter.value(found));
        match current {
            Some(value) => {
                let value = (i64::from(value) + step).clamp(0, i64::from(u32::MAX)) as u32;
                set_counter(post, counter, value)
            }
            // Not loaded; nothing to show until the server answers.
            None => edit(|_: &mut Vec<Post>| {}),
        }
    }
}

#[async_trait::async_trait]
impl FeedService for RealFeedService {
    fn posts(&self) -> Vec<Post> {
        self.cache.get(&self.key).unwrap_or_default()
    }

    fn subscribe(&self) -> watch::Receiver<Vec<Post>> {
        self.cache.subscribe(&self.key)
    }

    async fn load(&self) -> Result<Vec<Post>, ApiError> {
        self.cache.refetch(&self.key).await?;
        Ok(self.posts())
    }

    async fn create_post(&self, input: NewPost) -> Result<Post, ApiError> {
        let request = ApiRequest::post(POSTS).with_json(&input)?;
        let provisional = Post::provisional(LocalId::new(), &input);
        info!(key = %provisional.key, title = %input.title, "creating post");

        let client = self.client.clone();
        let write = async move {
            let record: PostRecord = client.execute(request).await?.json()?;
            let post = Post::from(record);
            Ok::<_, ApiError>((post.clone(), insert_head(post)))
        };
        self.cache.submit(&self.key, insert_head(provisional), write).await
    }

    async fn delete_post(&self, post: PostId) -> Result<(), ApiError> {
        let write = async move {
            self.write_only(ApiRequest::delete(post_path(post))).await?;
            Ok::<_, ApiError>(((), remove_post(post)))
        };
        self.cache.submit(&self.key, remove_post(post), write).await
    }

    async fn like_post(&self, post: PostId) -> Result<(), ApiError> {
        let liked = self.stepped(post, Counter::Likes, 1);
        let confirmed = liked.clone();
        let write = async move {
            self.write_only(ApiRequest::post(format!("{}like/", post_path(post))))
                .await?;
            Ok::<_, ApiError>(((), confirmed))
        };
        self.cache.submit(&self.key, liked, write).await
    }

    async fn unlike_post(&self, post: PostId) -> Result<(), ApiError> {
        let unliked = self.stepped(post, Counter::Likes, -1);
        let confirmed = unliked.clone();
        let write = async move {
            self.write_only(ApiRequest::delete(format!("{}like/", post_path(post))))
                .await?;
            Ok::<_, ApiError>(((), confirmed))
        };
        self.cache.submit(&self.key, unliked, write).await
    }

    async fn add_comment(&self, post: PostId, text: String) -> Result<Comment, ApiError> {
        let request = ApiRequest::post(format!("{}comments/", post_path(post)))
            .with_json(&CommentRequest { text: &text })?;
        let commented = self.stepped(post, Counter::Comments, 1);
        let confirmed = commented.clone();
        let write = async move {
            let comment: Comment = self.client.execute(request).await?.json()?;
            Ok::<_, ApiError>((comment, confirmed))
        };
        self.cache.submit(&self.key, commented, write).await
    }
}
