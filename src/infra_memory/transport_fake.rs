use crate::domain_model::*;
use crate::domain_port::*;
use chrono::Utc;
use parking_lot::Mutex;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::watch;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedCall {
    pub method: Method,
    pub path: String,
    pub bearer: Option<String>,
    pub status: u16,
}

struct FakeUser {
    id: UserId,
    email: String,
    password: String,
    username: String,
    field_of_interest: Option<String>,
    campus_verified: bool,
}

impl FakeUser {
    fn profile(&self) -> Value {
        json!({
            "id": self.id,
            "username": self.username,
            "email": self.email,
            "first_name": "",
            "last_name": "",
            "field_of_interest": self.field_of_interest,
            "bio": null,
            "campus_verified": self.campus_verified
        })
    }
}

#[derive(Deserialize)]
struct Registration {
    username: String,
    email: String,
    password: String,
    password2: String,
    #[serde(default)]
    field_of_interest: Option<String>,
}

#[derive(Deserialize)]
struct Verification {
    email: String,
    otp_code: String,
}

#[derive(Deserialize)]
struct Credentials {
    email: String,
    password: String,
}

#[derive(Deserialize)]
struct RefreshBody {
    refresh: String,
}

#[derive(Deserialize)]
struct PostBody {
    title: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    category: Option<String>,
    #[serde(default)]
    image: Option<String>,
}

#[derive(Deserialize)]
struct CommentBody {
    text: String,
}

#[derive(Default)]
struct State {
    users: Vec<FakeUser>,
    access: HashMap<String, UserId>,
    refresh: HashMap<String, UserId>,
    posts: Vec<PostRecord>,
    comments: Vec<Comment>,
    likes: HashSet<(UserId, PostId)>,
    follows: HashSet<(UserId, UserId)>,
    otps: HashMap<String, String>,
    leaderboard: Vec<LeaderboardEntry>,
    serial: u64,
    fail_refresh: bool,
    reject_all_access: bool,
    rotate_refresh: bool,
    paginate: bool,
    fail_next_write: Option<u16>,
    fail_titles: HashSet<String>,
    calls: Vec<RecordedCall>,
    refresh_calls: usize,
    unauthorized: usize,
}

fn reply(status: u16, body: Value) -> ApiResponse {
    ApiResponse::new(status, body)
}

fn detail(status: u16, message: &str) -> ApiResponse {
    reply(status, json!({ "detail": message }))
}

fn token_not_valid() -> ApiResponse {
    reply(
        401,
        json!({ "detail": "Given token not valid for any token type", "code": "token_not_valid" }),
    )
}

fn body<T: DeserializeOwned>(request: &ApiRequest) -> Result<T, ApiResponse> {
    let value = request.body.clone().unwrap_or(Value::Null);
    serde_json::from_value(value).map_err(|e| detail(400, &e.to_string()))
}

fn segments(path: &str) -> Vec<&str> {
    path.trim_start_matches("/api/")
        .split('/')
        .filter(|segment| !segment.is_empty())
        .collect()
}

impl State {
    fn next_serial(&mut self) -> u64 {
        self.serial += 1;
        self.serial
    }

    fn issue(&mut self, user: UserId) -> TokenPair {
        let serial = self.next_serial();
        let access = format!("fake-access-token:{}:{}", user, serial);
        let refresh = format!("fake-refresh-token:{}:{}", user, serial);
        self.access.insert(access.clone(), user);
        self.refresh.insert(refresh.clone(), user);
        TokenPair {
            access: AccessToken(access),
            refresh: RefreshToken(refresh),
        }
    }

    fn authorize(&self, request: &ApiRequest) -> Option<UserId> {
        if self.reject_all_access {
            return None;
        }
        let token = request.bearer.as_ref()?;
        self.access.get(&token.0).copied()
    }

    fn user(&self, id: UserId) -> Option<&FakeUser> {
        self.users.iter().find(|user| user.id == id)
    }

    fn post_mut(&mut self, id: PostId) -> Option<&mut PostRecord> {
        self.posts.iter_mut().find(|post| post.id == id)
    }

    fn take_write_failure(&mut self) -> Option<ApiResponse> {
        self.fail_next_write
            .take()
            .map(|status| detail(status, "write rejected"))
    }

    fn login(&mut self, request: &ApiRequest) -> ApiResponse {
        let credentials: Credentials = match body(request) {
            Ok(credentials) => credentials,
            Err(response) => return response,
        };
        let found = self
            .users
            .iter()
            .find(|user| user.email == credentials.email && user.password == credentials.password)
            .map(|user| user.id);
        match found {
            Some(user) => {
                let pair = self.issue(user);
                reply(200, json!({ "access": pair.access.0, "refresh": pair.refresh.0 }))
            }
            None => detail(401, "No active account found with the given credentials"),
        }
    }

    fn register(&mut self, request: &ApiRequest) -> ApiResponse {
        let input: Registration = match body(request) {
            Ok(input) => input,
            Err(response) => return response,
        };
        if input.password != input.password2 {
            return reply(400, json!({ "password": ["Password fields didn't match."] }));
        }
        if self.users.iter().any(|user| user.email == input.email) {
            return reply(400, json!({ "email": ["Email already registered."] }));
        }
        let id = UserId(self.users.len() as u64 + 1);
        let otp = format!("{:06}", 100_000 + self.next_serial() % 900_000);
        self.otps.insert(input.email.clone(), otp);
        let user = FakeUser {
            id,
            email: input.email,
            password: input.password,
            username: input.username,
            field_of_interest: input.field_of_interest,
            campus_verified: false,
        };
        let profile = user.profile();
        self.users.push(user);
        reply(
            201,
            json!({ "user": profile, "message": "OTP sent to your campus email for verification." }),
        )
    }

    fn verify_email(&mut self, request: &ApiRequest) -> ApiResponse {
        let input: Verification = match body(request) {
            Ok(input) => input,
            Err(response) => return response,
        };
        if self.otps.get(&input.email) != Some(&input.otp_code) {
            return reply(400, json!({ "non_field_errors": ["Invalid or expired OTP."] }));
        }
        self.otps.remove(&input.email);
        let Some(user) = self.users.iter_mut().find(|user| user.email == input.email) else {
            return reply(400, json!({ "non_field_errors": ["User with this email does not exist."] }));
        };
        user.campus_verified = true;
        let (id, profile) = (user.id, user.profile());
        let pair = self.issue(id);
        reply(
            200,
            json!({
                "user": profile,
                "access": pair.access.0,
                "refresh": pair.refresh.0,
                "message": "Email verified successfully!"
            }),
        )
    }

    fn related(&self, id: &str, followers: bool) -> ApiResponse {
        let Ok(target) = id.parse::<UserId>() else {
            return detail(404, "Not found.");
        };
        if self.user(target).is_none() {
            return detail(404, "Not found.");
        }
        let users: Vec<Value> = self
            .users
            .iter()
            .filter(|user| {
                let edge = if followers {
                    (user.id, target)
                } else {
                    (target, user.id)
                };
                self.follows.contains(&edge)
            })
            .map(FakeUser::profile)
            .collect();
        reply(200, json!(users))
    }

    fn refresh(&mut self, request: &ApiRequest) -> ApiResponse {
        let refresh: RefreshBody = match body(request) {
            Ok(refresh) => refresh,
            Err(response) => return response,
        };
        if self.fail_refresh {
            return token_not_valid();
        }
        let Some(user) = self.refresh.get(&refresh.refresh).copied() else {
            return token_not_valid();
        };

        let serial = self.next_serial();
        let access = format!("fake-access-token:{}:{}", user, serial);
        self.access.insert(access.clone(), user);
        if self.rotate_refresh {
            self.refresh.remove(&refresh.refresh);
            let rotated = format!("fake-refresh-token:{}:{}", user, serial);
            self.refresh.insert(rotated.clone(), user);
            reply(200, json!({ "access": access, "refresh": rotated }))
        } else {
            reply(200, json!({ "access": access }))
        }
    }

    fn route(&mut self, request: &ApiRequest, user: UserId) -> ApiResponse {
        let parts = segments(&request.path);
        match (request.method, parts.as_slice()) {
            (Method::Get, ["auth", "me"]) => match self.user(user) {
                Some(found) => reply(200, found.profile()),
                None => detail(404, "Not found."),
            },
            (Method::Get, ["users", id]) => match id.parse::<UserId>().ok().and_then(|id| self.user(id)) {
                Some(found) => reply(200, found.profile()),
                None => detail(404, "Not found."),
            },
            (Method::Get, ["users", id, "followers"]) => self.related(id, true),
            (Method::Get, ["users", id, "following"]) => self.related(id, false),
            (Method::Get, ["posts"]) => {
                let posts = json!(self.posts);
                if self.paginate {
                    reply(
                        200,
                        json!({ "count": self.posts.len(), "next": null, "previous": null, "results": posts }),
                    )
                } else {
                    reply(200, posts)
                }
            }
            (Method::Post, ["posts"]) => self.create_post(request, user),
            (Method::Delete, ["posts", id]) => match id.parse::<PostId>() {
                Ok(id) if self.posts.iter().any(|post| post.id == id) => {
                    self.posts.retain(|post| post.id != id);
                    reply(204, Value::Null)
                }
                _ => detail(404, "Not found."),
            },
            (Method::Post, ["posts", id, "like"]) => self.like(id, user, true),
            (Method::Delete, ["posts", id, "like"]) => self.like(id, user, false),
            (Method::Get, ["posts", id, "comments"]) => match id.parse::<PostId>() {
                Ok(id) => {
                    let comments: Vec<&Comment> =
                        self.comments.iter().filter(|c| c.post == id).collect();
                    reply(200, json!(comments))
                }
                Err(_) => detail(404, "Not found."),
            },
            (Method::Post, ["posts", id, "comments"]) => self.comment(request, id, user),
            (Method::Post, ["users", id, "follow"]) => self.follow(id, user, true),
            (Method::Delete, ["users", id, "follow"]) => self.follow(id, user, false),
            (Method::Get, ["leaderboard"]) => {
                let field = request
                    .query
                    .iter()
                    .find(|(name, _)| name == "field")
                    .map(|(_, value)| value.as_str());
                let entries: Vec<&LeaderboardEntry> = self
                    .leaderboard
                    .iter()
                    .filter(|entry| field.is_none_or(|field| entry.field == field))
                    .collect();
                reply(200, json!(entries))
            }
            _ => detail(404, "Not found."),
        }
    }

    fn create_post(&mut self, request: &ApiRequest, user: UserId) -> ApiResponse {
        let input: PostBody = match body(request) {
            Ok(input) => input,
            Err(response) => return response,
        };
        if let Some(response) = self.take_write_failure() {
            return response;
        }
        if self.fail_titles.contains(&input.title) {
            return reply(400, json!({ "title": ["This title is not allowed."] }));
        }
        let id = PostId(self.next_serial());
        let author = self
            .user(user)
            .map(|found| found.username.clone())
            .unwrap_or_default();
        let now = Utc::now();
        let record = PostRecord {
            id,
            user: author,
            title: input.title,
            description: input.description,
            category: input.category,
            image: input.image,
            created_at: now,
            updated_at: now,
            like_count: 0,
            comment_count: 0,
        };
        self.posts.insert(0, record.clone());
        reply(201, json!(record))
    }

    fn like(&mut self, id: &str, user: UserId, liked: bool) -> ApiResponse {
        if let Some(response) = self.take_write_failure() {
            return response;
        }
        let Ok(id) = id.parse::<PostId>() else {
            return detail(404, "Not found.");
        };
        if self.post_mut(id).is_none() {
            return detail(404, "Not found.");
        }
        let changed = if liked {
            self.likes.insert((user, id))
        } else {
            self.likes.remove(&(user, id))
        };
        let Some(post) = self.post_mut(id) else {
            return detail(404, "Not found.");
        };
        if !changed {
            return detail(400, if liked { "Already liked" } else { "Not liked" });
        }
        if liked {
            post.like_count += 1;
            reply(201, json!({ "liked": true }))
        } else {
            post.like_count = post.like_count.saturating_sub(1);
            reply(204, Value::Null)
        }
    }

    fn comment(&mut self, request: &ApiRequest, id: &str, user: UserId) -> ApiResponse {
        let input: CommentBody = match body(request) {
            Ok(input) => input,
            Err(response) => return response,
        };
        if let Some(response) = self.take_write_failure() {
            return response;
        }
        let Ok(post) = id.parse::<PostId>() else {
            return detail(404, "Not found.");
        };
        let Some(record) = self.post_mut(post) else {
            return detail(404, "Not found.");
        };
        record.comment_count += 1;

        let username = self
            .user(user)
            .map(|found| found.username.clone())
            .unwrap_or_default();
        let comment = Comment {
            id: CommentId(self.next_serial()),
            post,
            text: input.text,
            user: json!({ "id": user, "username": username }),
            created_at: Utc::now(),
        };
        self.comments.push(comment.clone());
        reply(201, json!(comment))
    }

    fn follow(&mut self, id: &str, user: UserId, follow: bool) -> ApiResponse {
        if let Some(response) = self.take_write_failure() {
            return response;
        }
        let Ok(target) = id.parse::<UserId>() else {
            return detail(404, "Not found.");
        };
        if self.user(target).is_none() {
            return detail(404, "Not found.");
        }
        if target == user {
            return detail(400, "You cannot follow yourself");
        }
        if follow {
            self.follows.insert((user, target));
            reply(201, json!({ "following": true }))
        } else {
            self.follows.remove(&(user, target));
            reply(204, Value::Null)
        }
    }
}

/// In-process stand-in for the ElevateU REST API.
///
/// Tokens are opaque strings tracked in memory. The refresh endpoint and all
/// writes can be held at a gate so tests can line up concurrent requests.
/// Write replies have their own gate, passed after the write has landed.
pub struct FakeTransport {
    state: Mutex<State>,
    refresh_gate: watch::Sender<bool>,
    write_gate: watch::Sender<bool>,
    reply_gate: watch::Sender<bool>,
    writes_waiting: AtomicUsize,
    replies_waiting: AtomicUsize,
}

impl Default for FakeTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeTransport {
    pub fn new() -> Self {
        let (refresh_gate, _) = watch::channel(true);
        let (write_gate, _) = watch::channel(true);
        let (reply_gate, _) = watch::channel(true);
        FakeTransport {
            state: Mutex::new(State::default()),
            refresh_gate,
            write_gate,
            reply_gate,
            writes_waiting: AtomicUsize::new(0),
            replies_waiting: AtomicUsize::new(0),
        }
    }

    pub fn add_user(&self, email: &str, password: &str, username: &str) -> UserId {
        let mut state = self.state.lock();
        let id = UserId(state.users.len() as u64 + 1);
        state.users.push(FakeUser {
            id,
            email: email.to_string(),
            password: password.to_string(),
            username: username.to_string(),
            field_of_interest: None,
            campus_verified: true,
        });
        id
    }

    /// One-time code mailed to `email` on registration, until it is used.
    pub fn otp_for(&self, email: &str) -> Option<String> {
        self.state.lock().otps.get(email).cloned()
    }

    /// Tokens as if `user` had signed in earlier.
    pub fn issue_tokens(&self, user: UserId) -> TokenPair {
        self.state.lock().issue(user)
    }

    pub fn seed_post(&self, title: &str, author: &str) -> PostId {
        let mut state = self.state.lock();
        let id = PostId(state.next_serial());
        let now = Utc::now();
        state.posts.insert(
            0,
            PostRecord {
                id,
                user: author.to_string(),
                title: title.to_string(),
                description: String::new(),
                category: None,
                image: None,
                created_at: now,
                updated_at: now,
                like_count: 0,
                comment_count: 0,
            },
        );
        id
    }

    pub fn seed_leaderboard(&self, entries: Vec<LeaderboardEntry>) {
        self.state.lock().leaderboard = entries;
    }

    pub fn server_posts(&self) -> Vec<PostRecord> {
        self.state.lock().posts.clone()
    }

    pub fn is_following(&self, follower: UserId, target: UserId) -> bool {
        self.state.lock().follows.contains(&(follower, target))
    }

    /// Every access token issued so far stops being accepted.
    pub fn expire_access_tokens(&self) {
        self.state.lock().access.clear();
    }

    pub fn fail_refresh(&self, fail: bool) {
        self.state.lock().fail_refresh = fail;
    }

    /// Answer 401 to every authenticated call, fresh tokens included.
    pub fn reject_all_access(&self, reject: bool) {
        self.state.lock().reject_all_access = reject;
    }

    pub fn rotate_refresh_tokens(&self, rotate: bool) {
        self.state.lock().rotate_refresh = rotate;
    }

    pub fn paginate(&self, paginate: bool) {
        self.state.lock().paginate = paginate;
    }

    pub fn fail_next_write(&self, status: u16) {
        self.state.lock().fail_next_write = Some(status);
    }

    pub fn fail_posts_titled(&self, title: &str) {
        self.state.lock().fail_titles.insert(title.to_string());
    }

    pub fn hold_refresh(&self) {
        self.refresh_gate.send_replace(false);
    }

    pub fn release_refresh(&self) {
        self.refresh_gate.send_replace(true);
    }

    pub fn hold_writes(&self) {
        self.write_gate.send_replace(false);
    }

    pub fn release_writes(&self) {
        self.write_gate.send_replace(true);
    }

    /// Writes parked at the write gate.
    pub fn writes_waiting(&self) -> usize {
        self.writes_waiting.load(Ordering::SeqCst)
    }

    pub fn hold_replies(&self) {
        self.reply_gate.send_replace(false);
    }

    pub fn release_replies(&self) {
        self.reply_gate.send_replace(true);
    }

    /// Writes already applied whose replies are parked.
    pub fn replies_waiting(&self) -> usize {
        self.replies_waiting.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.state.lock().calls.clone()
    }

    pub fn refresh_calls(&self) -> usize {
        self.state.lock().refresh_calls
    }

    pub fn unauthorized_responses(&self) -> usize {
        self.state.lock().unauthorized
    }

    async fn pass(gate: &watch::Sender<bool>) {
        let mut open = gate.subscribe();
        // The sender lives as long as the transport, so this only ends when opened.
        let _ = open.wait_for(|open| *open).await;
    }

    fn locked<R>(&self, f: impl FnOnce(&mut State) -> R) -> R {
        f(&mut self.state.lock())
    }

    async fn dispatch(&self, request: &ApiRequest) -> ApiResponse {
        let parts = segments(&request.path);
        match (request.method, parts.as_slice()) {
            (Method::Post, ["auth", "token"]) => self.locked(|state| state.login(request)),
            (Method::Post, ["auth", "register"]) => self.locked(|state| state.register(request)),
            (Method::Post, ["auth", "verify-email"]) => {
                self.locked(|state| state.verify_email(request))
            }
            (Method::Post, ["auth", "token", "refresh"]) => {
                self.locked(|state| state.refresh_calls += 1);
                Self::pass(&self.refresh_gate).await;
                self.locked(|state| state.refresh(request))
            }
            _ => {
                if self.locked(|state| state.authorize(request)).is_none() {
                    return token_not_valid();
                }
                let write = request.method != Method::Get;
                if write {
                    self.writes_waiting.fetch_add(1, Ordering::SeqCst);
                    Self::pass(&self.write_gate).await;
                    self.writes_waiting.fetch_sub(1, Ordering::SeqCst);
                }
                let response = self.locked(|state| match state.authorize(request) {
                    Some(user) => state.route(request, user),
                    None => token_not_valid(),
                });
                if write {
                    self.replies_waiting.fetch_add(1, Ordering::SeqCst);
                    Self::pass(&self.reply_gate).await;
                    self.replies_waiting.fetch_sub(1, Ordering::SeqCst);
                }
                response
            }
        }
    }
}

#[async_trait::async_trait]
impl HttpTransport for FakeTransport {
    async fn send(&self, request: &ApiRequest) -> Result<ApiResponse, TransportError> {
        let response = self.dispatch(request).await;
        debug!(method = %request.method, path = %request.path, status = response.status, "fake api");

        self.locked(|state| {
            if response.status == 401 {
                state.unauthorized += 1;
            }
            state.calls.push(RecordedCall {
                method: request.method,
                path: request.path.clone(),
                bearer: request.bearer.as_ref().map(|token| token.0.clone()),
                status: response.status,
            });
        });
        Ok(response)
    }
}
