use elevate::application_impl::*;
use elevate::application_port::*;
use elevate::domain_model::*;
use elevate::domain_port::*;
use elevate::infra_memory::*;
use std::sync::Arc;
use std::time::Duration;

struct Harness {
    fake: Arc<FakeTransport>,
    store: Arc<MemoryCredentialStore>,
    navigator: Arc<RecordingNavigator>,
    manager: Arc<TokenSessionManager>,
    tokens: TokenPair,
}

async fn manager_over(
    fake: &Arc<FakeTransport>,
    store: &Arc<MemoryCredentialStore>,
    navigator: &Arc<RecordingNavigator>,
) -> Arc<TokenSessionManager> {
    Arc::new(
        TokenSessionManager::restore(
            fake.clone(),
            store.clone(),
            navigator.clone(),
            AuthEndpoints::default(),
        )
        .await
        .unwrap(),
    )
}

async fn signed_in() -> Harness {
    let fake = Arc::new(FakeTransport::new());
    let user = fake.add_user("ada@campus.edu", "lovelace", "ada");
    fake.seed_post("Dean's list", "ada");
    let tokens = fake.issue_tokens(user);
    let store = Arc::new(MemoryCredentialStore::with_tokens(
        &tokens.access.0,
        &tokens.refresh.0,
    ));
    let navigator = Arc::new(RecordingNavigator::new());
    let manager = manager_over(&fake, &store, &navigator).await;
    Harness {
        fake,
        store,
        navigator,
        manager,
        tokens,
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

fn spawn_get(
    manager: &Arc<TokenSessionManager>,
    path: &str,
) -> tokio::task::JoinHandle<Result<ApiResponse, ApiError>> {
    let manager = manager.clone();
    let request = ApiRequest::get(path);
    tokio::spawn(async move { manager.execute(request).await })
}

#[tokio::test]
async fn restored_session_attaches_bearer() {
    let h = signed_in().await;
    assert!(h.manager.is_authenticated());

    let response = h.manager.execute(ApiRequest::get("/api/posts/")).await.unwrap();
    assert_eq!(response.status, 200);

    let calls = h.fake.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].bearer.as_deref(), Some(h.tokens.access.0.as_str()));
    assert_eq!(h.fake.refresh_calls(), 0);
}

#[tokio::test]
async fn concurrent_unauthorized_requests_share_one_refresh() {
    let h = signed_in().await;
    h.fake.expire_access_tokens();
    h.fake.hold_refresh();

    let handles: Vec<_> = (0..5).map(|_| spawn_get(&h.manager, "/api/posts/")).collect();
    wait_until(|| h.fake.refresh_calls() == 1 && h.manager.queued_refresh_waiters() == 4).await;
    assert!(h.manager.is_refreshing());

    h.fake.release_refresh();
    for handle in handles {
        assert_eq!(handle.await.unwrap().unwrap().status, 200);
    }

    assert_eq!(h.fake.refresh_calls(), 1);
    assert!(!h.manager.is_refreshing());

    let fresh = h.manager.access_token().unwrap();
    assert_ne!(fresh, h.tokens.access);
    let replays: Vec<_> = h
        .fake
        .calls()
        .into_iter()
        .filter(|call| call.path == "/api/posts/" && call.status == 200)
        .collect();
    assert_eq!(replays.len(), 5);
    assert!(replays
        .iter()
        .all(|call| call.bearer.as_deref() == Some(fresh.0.as_str())));
    assert_eq!(
        h.store.peek(CredentialKey::Access).as_deref(),
        Some(fresh.0.as_str())
    );
}

#[tokio::test]
async fn failed_refresh_rejects_every_waiter_and_signs_out() {
    let h = signed_in().await;
    h.fake.expire_access_tokens();
    h.fake.fail_refresh(true);
    h.fake.hold_refresh();

    let handles: Vec<_> = (0..3).map(|_| spawn_get(&h.manager, "/api/posts/")).collect();
    wait_until(|| h.fake.refresh_calls() == 1 && h.manager.queued_refresh_waiters() == 2).await;
    h.fake.release_refresh();

    for handle in handles {
        let err = handle.await.unwrap().unwrap_err();
        assert!(matches!(err, ApiError::RefreshFailed(_)), "{err:?}");
        assert!(err.ends_session());
    }

    assert_eq!(h.fake.refresh_calls(), 1);
    assert!(!h.manager.is_authenticated());
    assert!(h.manager.session().is_empty());
    assert_eq!(h.store.peek(CredentialKey::Access), None);
    assert_eq!(h.store.peek(CredentialKey::Refresh), None);
    assert_eq!(h.navigator.routes(), vec![Route::Login]);
}

#[tokio::test]
async fn second_unauthorized_after_replay_is_final() {
    let h = signed_in().await;
    h.fake.reject_all_access(true);

    let err = h
        .manager
        .execute(ApiRequest::get("/api/posts/"))
        .await
        .unwrap_err();

    assert_eq!(err, ApiError::AuthorizationExpired);
    assert_eq!(h.fake.refresh_calls(), 1);
    let attempts = h
        .fake
        .calls()
        .into_iter()
        .filter(|call| call.path == "/api/posts/")
        .count();
    assert_eq!(attempts, 2);
    // The refresh itself worked, so the session is kept.
    assert!(h.manager.is_authenticated());
    assert!(h.navigator.routes().is_empty());
}

#[tokio::test]
async fn other_errors_pass_through_without_refresh() {
    let h = signed_in().await;

    let err = h
        .manager
        .execute(ApiRequest::get("/api/unknown/"))
        .await
        .unwrap_err();

    assert!(matches!(err, ApiError::Status { status: 404, .. }));
    assert_eq!(h.fake.refresh_calls(), 0);
    assert_eq!(h.fake.calls().len(), 1);
}

#[tokio::test]
async fn missing_refresh_token_fails_without_refreshing() {
    let fake = Arc::new(FakeTransport::new());
    let user = fake.add_user("ada@campus.edu", "lovelace", "ada");
    let tokens = fake.issue_tokens(user);
    let store = Arc::new(MemoryCredentialStore::new());
    store.set(CredentialKey::Access, &tokens.access.0).await.unwrap();
    let navigator = Arc::new(RecordingNavigator::new());
    let manager = manager_over(&fake, &store, &navigator).await;

    fake.expire_access_tokens();
    let err = manager
        .execute(ApiRequest::get("/api/posts/"))
        .await
        .unwrap_err();

    assert_eq!(err, ApiError::Unauthenticated);
    assert_eq!(fake.refresh_calls(), 0);
    assert!(navigator.routes().is_empty());
}

#[tokio::test]
async fn late_unauthorized_replays_with_the_new_token() {
    let h = signed_in().await;
    let post = h.fake.server_posts()[0].id;

    h.fake.hold_writes();
    let like = {
        let manager = h.manager.clone();
        tokio::spawn(async move {
            manager
                .execute(ApiRequest::post(format!("/api/posts/{post}/like/")))
                .await
        })
    };
    wait_until(|| h.fake.writes_waiting() == 1).await;

    h.fake.expire_access_tokens();
    let response = h.manager.execute(ApiRequest::get("/api/posts/")).await.unwrap();
    assert_eq!(response.status, 200);
    assert_eq!(h.fake.refresh_calls(), 1);

    h.fake.release_writes();
    assert_eq!(like.await.unwrap().unwrap().status, 201);
    assert_eq!(h.fake.refresh_calls(), 1);
    assert_eq!(h.fake.server_posts()[0].like_count, 1);
}

#[tokio::test]
async fn rotated_refresh_token_is_persisted() {
    let h = signed_in().await;
    h.fake.rotate_refresh_tokens(true);
    h.fake.expire_access_tokens();

    h.manager.execute(ApiRequest::get("/api/posts/")).await.unwrap();

    let stored_refresh = h.store.peek(CredentialKey::Refresh).unwrap();
    assert_ne!(stored_refresh, h.tokens.refresh.0);
    assert_eq!(
        h.manager.session().refresh_token().map(|t| t.0.clone()),
        Some(stored_refresh)
    );

    let restarted = manager_over(&h.fake, &h.store, &h.navigator).await;
    assert_eq!(restarted.access_token(), h.manager.access_token());
}

#[tokio::test]
async fn sign_out_during_refresh_is_not_undone() {
    let h = signed_in().await;
    h.fake.expire_access_tokens();
    h.fake.hold_refresh();

    let pending = spawn_get(&h.manager, "/api/posts/");
    wait_until(|| h.fake.refresh_calls() == 1).await;

    h.manager.logout().await.unwrap();
    h.fake.release_refresh();

    assert_eq!(pending.await.unwrap().unwrap_err(), ApiError::Unauthenticated);
    assert!(!h.manager.is_authenticated());
    assert_eq!(h.store.peek(CredentialKey::Access), None);
    assert!(h.navigator.routes().is_empty());
}

#[tokio::test]
async fn abandoned_refresh_releases_waiters() {
    let h = signed_in().await;
    h.fake.expire_access_tokens();
    h.fake.hold_refresh();

    let owner = spawn_get(&h.manager, "/api/posts/");
    wait_until(|| h.fake.refresh_calls() == 1).await;
    let waiter = spawn_get(&h.manager, "/api/posts/");
    wait_until(|| h.manager.queued_refresh_waiters() == 1).await;

    owner.abort();
    assert!(owner.await.unwrap_err().is_cancelled());

    let err = waiter.await.unwrap().unwrap_err();
    assert!(matches!(err, ApiError::RefreshFailed(_)));
    assert!(!h.manager.is_refreshing());
    h.fake.release_refresh();
}

#[tokio::test]
async fn login_and_logout_round_trip_through_the_store() {
    let fake = Arc::new(FakeTransport::new());
    fake.add_user("ada@campus.edu", "lovelace", "ada");
    let store = Arc::new(MemoryCredentialStore::new());
    let navigator = Arc::new(RecordingNavigator::new());
    let manager = manager_over(&fake, &store, &navigator).await;
    assert!(!manager.is_authenticated());
    assert_eq!(manager.current_user().await, Err(ApiError::Unauthenticated));

    let wrong = manager
        .login(LoginInput {
            email: "ada@campus.edu".to_string(),
            password: "babbage".to_string(),
        })
        .await;
    assert_eq!(wrong, Err(ApiError::InvalidCredentials));
    assert!(!manager.is_authenticated());

    manager
        .login(LoginInput {
            email: "ada@campus.edu".to_string(),
            password: "lovelace".to_string(),
        })
        .await
        .unwrap();
    assert!(manager.is_authenticated());
    assert!(store.peek(CredentialKey::Access).is_some());
    assert!(store.peek(CredentialKey::Refresh).is_some());

    let me_calls = fake.calls().len();
    let user = manager.current_user().await.unwrap();
    assert_eq!(user.display_name(), "ada");
    // Cached by login.
    assert_eq!(fake.calls().len(), me_calls);

    manager.logout().await.unwrap();
    assert!(!manager.is_authenticated());
    assert_eq!(store.peek(CredentialKey::Access), None);
    assert_eq!(store.peek(CredentialKey::Refresh), None);
    assert_eq!(manager.current_user().await, Err(ApiError::Unauthenticated));
    assert!(navigator.routes().is_empty());
}

fn ada_login() -> LoginInput {
    LoginInput {
        email: "ada@campus.edu".to_string(),
        password: "lovelace".to_string(),
    }
}

#[tokio::test]
async fn failed_refresh_from_an_old_session_spares_the_new_one() {
    let h = signed_in().await;
    h.fake.expire_access_tokens();
    h.fake.fail_refresh(true);
    h.fake.hold_refresh();

    let pending = spawn_get(&h.manager, "/api/posts/");
    wait_until(|| h.fake.refresh_calls() == 1).await;

    h.manager.logout().await.unwrap();
    h.manager.login(ada_login()).await.unwrap();
    let fresh = h.manager.access_token().unwrap();
    h.fake.release_refresh();

    // Carries on under the new session.
    assert_eq!(pending.await.unwrap().unwrap().status, 200);
    assert!(h.manager.is_authenticated());
    assert!(!h.manager.is_refreshing());
    assert_eq!(h.manager.access_token(), Some(fresh.clone()));
    assert_eq!(
        h.store.peek(CredentialKey::Access).as_deref(),
        Some(fresh.0.as_str())
    );
    assert!(h.store.peek(CredentialKey::Refresh).is_some());
    assert!(h.navigator.routes().is_empty());
}

#[tokio::test]
async fn sign_out_during_token_storage_is_not_undone() {
    let h = signed_in().await;
    h.fake.expire_access_tokens();
    h.store.hold_writes();

    let pending = spawn_get(&h.manager, "/api/posts/");
    wait_until(|| h.store.writes_waiting() == 1).await;

    let logout = {
        let manager = h.manager.clone();
        tokio::spawn(async move { manager.logout().await })
    };
    wait_until(|| !h.manager.is_authenticated()).await;
    h.store.release_writes();

    logout.await.unwrap().unwrap();
    assert!(pending.await.unwrap().is_err());
    assert_eq!(h.store.peek(CredentialKey::Access), None);
    assert_eq!(h.store.peek(CredentialKey::Refresh), None);

    let restarted = manager_over(&h.fake, &h.store, &h.navigator).await;
    assert!(!restarted.is_authenticated());
    assert!(h.navigator.routes().is_empty());
}

fn grace_registration(password2: &str) -> RegisterInput {
    RegisterInput {
        username: "grace".to_string(),
        email: "grace@campus.edu".to_string(),
        password: "hopper".to_string(),
        password2: password2.to_string(),
        field_of_interest: Some("academics".to_string()),
        first_name: None,
        last_name: None,
    }
}

#[tokio::test]
async fn register_then_verify_signs_in() {
    let fake = Arc::new(FakeTransport::new());
    let store = Arc::new(MemoryCredentialStore::new());
    let navigator = Arc::new(RecordingNavigator::new());
    let manager = manager_over(&fake, &store, &navigator).await;

    let user = manager.register(grace_registration("hopper")).await.unwrap();
    assert_eq!(user.username, "grace");
    assert!(!user.campus_verified);
    assert!(!manager.is_authenticated());

    let wrong = manager.verify_email("grace@campus.edu", "000000").await;
    assert!(matches!(wrong, Err(ApiError::Status { status: 400, .. })));
    assert!(!manager.is_authenticated());

    let otp = fake.otp_for("grace@campus.edu").unwrap();
    manager.verify_email("grace@campus.edu", &otp).await.unwrap();

    assert!(manager.is_authenticated());
    assert!(store.peek(CredentialKey::Access).is_some());
    assert_eq!(manager.current_user().await.unwrap().id, user.id);
    assert_eq!(fake.otp_for("grace@campus.edu"), None);
}

#[tokio::test]
async fn registration_errors_come_back_as_status() {
    let fake = Arc::new(FakeTransport::new());
    fake.add_user("grace@campus.edu", "hopper", "grace");
    let store = Arc::new(MemoryCredentialStore::new());
    let navigator = Arc::new(RecordingNavigator::new());
    let manager = manager_over(&fake, &store, &navigator).await;

    let taken = manager.register(grace_registration("hopper")).await.unwrap_err();
    assert!(matches!(&taken, ApiError::Status { status: 400, message } if message.contains("already registered")));

    let mismatch = manager.register(grace_registration("other")).await.unwrap_err();
    assert!(matches!(mismatch, ApiError::Status { status: 400, .. }));
    assert_eq!(fake.refresh_calls(), 0);
}
