use elevate::application_impl::*;
use elevate::application_port::*;
use elevate::client::*;
use elevate::domain_model::*;
use elevate::domain_port::*;
use elevate::infra_memory::*;
use std::sync::Arc;
use std::time::Duration;

struct Harness {
    fake: Arc<FakeTransport>,
    navigator: Arc<RecordingNavigator>,
    client: Arc<Client>,
    me: UserId,
    first: PostId,
}

async fn signed_in() -> Harness {
    let fake = Arc::new(FakeTransport::new());
    let me = fake.add_user("ada@campus.edu", "lovelace", "ada");
    let first = fake.seed_post("A", "grace");
    let tokens = fake.issue_tokens(me);
    let store = Arc::new(MemoryCredentialStore::with_tokens(
        &tokens.access.0,
        &tokens.refresh.0,
    ));
    let navigator = Arc::new(RecordingNavigator::new());
    let manager = TokenSessionManager::restore(
        fake.clone(),
        store,
        navigator.clone(),
        AuthEndpoints::default(),
    )
    .await
    .unwrap();
    let client = Arc::new(Client::from_session(Arc::new(manager)));
    client.feed_service.load().await.unwrap();
    Harness {
        fake,
        navigator,
        client,
        me,
        first,
    }
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    })
    .await
    .unwrap();
}

fn new_post(title: &str) -> NewPost {
    NewPost {
        title: title.to_string(),
        description: format!("{title} details"),
        category: Some("academics".to_string()),
        image: None,
    }
}

fn spawn_create(
    client: &Arc<Client>,
    title: &str,
) -> tokio::task::JoinHandle<Result<Post, ApiError>> {
    let client = client.clone();
    let input = new_post(title);
    tokio::spawn(async move { client.feed_service.create_post(input).await })
}

fn titles(posts: &[Post]) -> Vec<String> {
    posts.iter().map(|post| post.title.clone()).collect()
}

#[tokio::test]
async fn load_reads_the_server_feed() {
    let h = signed_in().await;
    h.fake.seed_post("B", "grace");
    h.fake.paginate(true);

    let posts = h.client.feed_service.load().await.unwrap();

    assert_eq!(titles(&posts), ["B", "A"]);
    assert!(posts.iter().all(|post| !post.key.is_provisional()));
    assert_eq!(h.client.feed_service.posts(), posts);
}

#[tokio::test]
async fn created_post_shows_up_before_the_server_answers() {
    let h = signed_in().await;
    let mut feed = h.client.feed_service.subscribe();
    h.fake.hold_writes();

    let create = spawn_create(&h.client, "B");
    let during = feed
        .wait_for(|posts| posts.len() == 2)
        .await
        .unwrap()
        .clone();
    assert_eq!(titles(&during), ["B", "A"]);
    assert!(during[0].key.is_provisional());
    assert_eq!(during[0].author, "You");
    assert_eq!(during[1].key, RecordKey::Confirmed(h.first));

    wait_until(|| h.fake.writes_waiting() == 1).await;
    h.fake.release_writes();
    let created = create.await.unwrap().unwrap();

    assert!(!created.key.is_provisional());
    let after = h.client.feed_service.posts();
    assert_eq!(titles(&after), ["B", "A"]);
    assert_eq!(after[0].key, created.key);
    assert!(after.iter().all(|post| !post.key.is_provisional()));
    assert_eq!(after[0].author, "ada");
}

#[tokio::test]
async fn rejected_post_is_rolled_back() {
    let h = signed_in().await;
    let before = h.client.feed_service.posts();
    h.fake.fail_posts_titled("B");

    let err = h
        .client
        .feed_service
        .create_post(new_post("B"))
        .await
        .unwrap_err();

    assert!(matches!(err, ApiError::MutationFailed(_)));
    assert!(matches!(err.root(), ApiError::Status { status: 400, .. }));
    assert_eq!(h.client.feed_service.posts(), before);
    assert_eq!(h.fake.server_posts().len(), 1);
}

#[tokio::test]
async fn overlapping_posts_resolve_independently() {
    let h = signed_in().await;
    h.fake.fail_posts_titled("B");
    h.fake.hold_writes();

    let b = spawn_create(&h.client, "B");
    wait_until(|| h.fake.writes_waiting() == 1).await;
    let c = spawn_create(&h.client, "C");
    wait_until(|| h.fake.writes_waiting() == 2).await;

    let during = h.client.feed_service.posts();
    assert_eq!(titles(&during), ["C", "B", "A"]);
    assert_eq!(during.iter().filter(|post| post.key.is_provisional()).count(), 2);

    h.fake.release_writes();
    assert!(b.await.unwrap().is_err());
    let c = c.await.unwrap().unwrap();

    let after = h.client.feed_service.posts();
    assert_eq!(titles(&after), ["C", "A"]);
    assert_eq!(after[0].key, c.key);
    assert!(after.iter().all(|post| !post.key.is_provisional()));
}

#[tokio::test]
async fn like_is_counted_right_away() {
    let h = signed_in().await;
    h.fake.hold_writes();

    let like = {
        let client = h.client.clone();
        let post = h.first;
        tokio::spawn(async move { client.feed_service.like_post(post).await })
    };
    wait_until(|| h.fake.writes_waiting() == 1).await;
    assert_eq!(h.client.feed_service.posts()[0].like_count, 1);
    assert_eq!(h.fake.server_posts()[0].like_count, 0);

    h.fake.release_writes();
    like.await.unwrap().unwrap();
    assert_eq!(h.client.feed_service.posts()[0].like_count, 1);
    assert_eq!(h.fake.server_posts()[0].like_count, 1);
}

#[tokio::test]
async fn refetch_that_already_counts_a_like_does_not_double_it() {
    let h = signed_in().await;
    h.fake.hold_replies();

    let like = {
        let client = h.client.clone();
        let post = h.first;
        tokio::spawn(async move { client.feed_service.like_post(post).await })
    };
    wait_until(|| h.fake.replies_waiting() == 1).await;
    assert_eq!(h.fake.server_posts()[0].like_count, 1);

    h.client.feed_service.load().await.unwrap();
    assert_eq!(h.client.feed_service.posts()[0].like_count, 1);

    h.fake.release_replies();
    like.await.unwrap().unwrap();
    assert_eq!(h.client.feed_service.posts()[0].like_count, 1);
}

#[tokio::test]
async fn failed_unlike_restores_the_count() {
    let h = signed_in().await;
    h.client.feed_service.like_post(h.first).await.unwrap();
    wait_until(|| h.client.feed_service.posts()[0].like_count == 1).await;

    h.fake.fail_next_write(503);
    let err = h.client.feed_service.unlike_post(h.first).await.unwrap_err();

    assert!(matches!(err.root(), ApiError::Status { status: 503, .. }));
    assert_eq!(h.client.feed_service.posts()[0].like_count, 1);
}

#[tokio::test]
async fn delete_removes_and_failed_delete_restores() {
    let h = signed_in().await;
    let second = h.fake.seed_post("B", "grace");
    h.client.feed_service.load().await.unwrap();

    h.fake.fail_next_write(500);
    assert!(h.client.feed_service.delete_post(second).await.is_err());
    assert_eq!(titles(&h.client.feed_service.posts()), ["B", "A"]);

    h.client.feed_service.delete_post(second).await.unwrap();
    assert_eq!(titles(&h.client.feed_service.posts()), ["A"]);
    assert_eq!(h.fake.server_posts().len(), 1);
}

#[tokio::test]
async fn comments_bump_the_count_and_can_be_listed() {
    let h = signed_in().await;

    let comment = h
        .client
        .feed_service
        .add_comment(h.first, "congrats!".to_string())
        .await
        .unwrap();

    assert_eq!(comment.post, h.first);
    assert_eq!(h.client.feed_service.posts()[0].comment_count, 1);
    let listed = h.client.engagement_service.comments(h.first).await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].text, "congrats!");
}

#[tokio::test]
async fn write_after_token_expiry_refreshes_transparently() {
    let h = signed_in().await;
    h.fake.expire_access_tokens();

    let created = h.client.feed_service.create_post(new_post("B")).await.unwrap();

    assert_eq!(h.fake.refresh_calls(), 1);
    assert_eq!(h.client.feed_service.posts()[0].key, created.key);
}

#[tokio::test]
async fn write_that_loses_the_session_rolls_back_and_signs_out() {
    let h = signed_in().await;
    h.fake.expire_access_tokens();
    h.fake.fail_refresh(true);

    let err = h
        .client
        .feed_service
        .create_post(new_post("B"))
        .await
        .unwrap_err();

    assert!(matches!(err.root(), ApiError::RefreshFailed(_)));
    assert!(err.ends_session());
    assert_eq!(titles(&h.client.feed_service.posts()), ["A"]);
    assert!(!h.client.session_service.is_authenticated());
    assert_eq!(h.navigator.routes(), vec![Route::Login]);
}

#[tokio::test]
async fn logout_clears_the_cached_feed() {
    let h = signed_in().await;
    assert_eq!(h.client.feed_service.posts().len(), 1);

    h.client.logout().await.unwrap();

    assert!(h.client.feed_service.posts().is_empty());
    assert_eq!(
        h.client.feed_service.load().await.unwrap_err(),
        ApiError::Unauthenticated
    );
}

#[tokio::test]
async fn follow_and_unfollow() {
    let h = signed_in().await;
    let grace = h.fake.add_user("grace@campus.edu", "hopper", "grace");

    h.client.engagement_service.follow(grace).await.unwrap();
    assert!(h.fake.is_following(h.me, grace));

    h.client.engagement_service.unfollow(grace).await.unwrap();
    assert!(!h.fake.is_following(h.me, grace));

    let err = h.client.engagement_service.follow(h.me).await.unwrap_err();
    assert!(matches!(err, ApiError::Status { status: 400, .. }));
}

#[tokio::test]
async fn profiles_and_follow_lists() {
    let h = signed_in().await;
    let grace = h.fake.add_user("grace@campus.edu", "hopper", "grace");
    let alan = h.fake.add_user("alan@campus.edu", "turing", "alan");

    h.client.engagement_service.follow(grace).await.unwrap();
    h.client.engagement_service.follow(alan).await.unwrap();

    let profile = h.client.engagement_service.profile(grace).await.unwrap();
    assert_eq!(profile.username, "grace");
    assert!(profile.campus_verified);

    let following = h.client.engagement_service.following(h.me).await.unwrap();
    let names: Vec<_> = following.iter().map(|user| user.username.as_str()).collect();
    assert_eq!(names, ["grace", "alan"]);

    let followers = h.client.engagement_service.followers(grace).await.unwrap();
    assert_eq!(followers.len(), 1);
    assert_eq!(followers[0].id, h.me);
    assert!(h.client.engagement_service.followers(h.me).await.unwrap().is_empty());

    let missing = h.client.engagement_service.profile(UserId(99)).await.unwrap_err();
    assert!(matches!(missing, ApiError::Status { status: 404, .. }));
}

#[tokio::test]
async fn leaderboard_is_filtered_by_field() {
    let h = signed_in().await;
    let entry = |rank: u32, username: &str, field: &str, score: i64| LeaderboardEntry {
        rank,
        username: username.to_string(),
        field: field.to_string(),
        score,
        total_likes: 0,
        total_comments: 0,
        total_follows: 0,
    };
    h.fake.seed_leaderboard(vec![
        entry(1, "ada", "academics", 42),
        entry(2, "grace", "academics", 17),
        entry(1, "alan", "sports", 9),
    ]);

    let board = h
        .client
        .engagement_service
        .leaderboard("academics", TimePeriod::AllTime)
        .await
        .unwrap();

    assert_eq!(board.len(), 2);
    assert_eq!(board[0].username, "ada");
    let call = h.fake.calls().pop().unwrap();
    assert_eq!(call.path, "/api/leaderboard/");
}
