use crate::application_port::*;
use crate::domain_model::*;
use crate::domain_port::*;
use nanoid::nanoid;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::{Instrument, debug, info, warn};

#[derive(Debug, Clone)]
pub struct AuthEndpoints {
    pub login: String,
    pub refresh: String,
    pub me: String,
    pub register: String,
    pub verify_email: String,
}

impl Default for AuthEndpoints {
    fn default() -> Self {
        AuthEndpoints {
            login: "/api/auth/token/".to_string(),
            refresh: "/api/auth/token/refresh/".to_string(),
            me: "/api/auth/me/".to_string(),
            register: "/api/auth/register/".to_string(),
            verify_email: "/api/auth/verify-email/".to_string(),
        }
    }
}

type RefreshOutcome = Result<AccessToken, ApiError>;

enum RefreshState {
    Idle,
    Refreshing {
        waiters: Vec<oneshot::Sender<RefreshOutcome>>,
    },
}

enum Disposition {
    Done(Result<ApiResponse, ApiError>),
    Refresh,
    Replay,
}

#[derive(Serialize)]
struct LoginRequest<'a> {
    email: &'a str,
    password: &'a str,
}

#[derive(Serialize)]
struct VerifyEmailRequest<'a> {
    email: &'a str,
    otp_code: &'a str,
}

#[derive(Deserialize)]
struct Registered {
    user: UserProfile,
}

#[derive(Serialize)]
struct RefreshRequest<'a> {
    refresh: &'a str,
}

#[derive(Deserialize)]
struct RefreshResponse {
    access: AccessToken,
    #[serde(default)]
    refresh: Option<RefreshToken>,
}

/// Owns the session and is the only path requests take to the server.
///
/// Refresh is single-flight: the first 401 moves the manager to `Refreshing`
/// and calls the refresh endpoint, every other 401 seen meanwhile parks a
/// oneshot in `waiters` and is released with the same outcome.
pub struct TokenSessionManager {
    transport: Arc<dyn HttpTransport>,
    store: Arc<dyn CredentialStore>,
    navigator: Arc<dyn Navigator>,
    endpoints: AuthEndpoints,
    session: RwLock<Session>,
    // Held for every credential store write, which only lands while the
    // session epoch it belongs to is still current.
    store_writes: tokio::sync::Mutex<()>,
    refresh_state: Mutex<RefreshState>,
    current_user: RwLock<Option<CurrentUser>>,
}

impl TokenSessionManager {
    pub fn new(
        transport: Arc<dyn HttpTransport>,
        store: Arc<dyn CredentialStore>,
        navigator: Arc<dyn Navigator>,
        endpoints: AuthEndpoints,
    ) -> Self {
        TokenSessionManager {
            transport,
            store,
            navigator,
            endpoints,
            session: RwLock::new(Session::default()),
            store_writes: tokio::sync::Mutex::new(()),
            refresh_state: Mutex::new(RefreshState::Idle),
            current_user: RwLock::new(None),
        }
    }

    /// Picks up the credentials a previous process left in `store`.
    pub async fn restore(
        transport: Arc<dyn HttpTransport>,
        store: Arc<dyn CredentialStore>,
        navigator: Arc<dyn Navigator>,
        endpoints: AuthEndpoints,
    ) -> Result<Self, ApiError> {
        let access = store.get(CredentialKey::Access).await?.map(AccessToken);
        let refresh = store.get(CredentialKey::Refresh).await?.map(RefreshToken);
        debug!(
            has_access = access.is_some(),
            has_refresh = refresh.is_some(),
            "restored credentials"
        );

        let manager = Self::new(transport, store, navigator, endpoints);
        *manager.session.write() = Session::new(access, refresh);
        Ok(manager)
    }

    pub fn session(&self) -> Session {
        self.session.read().clone()
    }

    pub fn access_token(&self) -> Option<AccessToken> {
        self.session.read().access_token().cloned()
    }

    pub fn is_refreshing(&self) -> bool {
        matches!(*self.refresh_state.lock(), RefreshState::Refreshing { .. })
    }

    /// Requests parked behind the refresh in flight.
    pub fn queued_refresh_waiters(&self) -> usize {
        match &*self.refresh_state.lock() {
            RefreshState::Refreshing { waiters } => waiters.len(),
            RefreshState::Idle => 0,
        }
    }

    /// Copy of `request` carrying the current access token, if there is one.
    pub fn attach_credentials(&self, request: &ApiRequest) -> ApiRequest {
        request.clone().with_bearer(self.access_token())
    }

    fn handle_response(
        &self,
        request: &mut ApiRequest,
        sent_with: Option<&AccessToken>,
        response: ApiResponse,
    ) -> Disposition {
        if !response.is_unauthorized() {
            return Disposition::Done(into_result(response));
        }
        if request.retried {
            debug!("unauthorized after replay");
            return Disposition::Done(Err(ApiError::AuthorizationExpired));
        }
        request.retried = true;

        let current = self.access_token();
        if current.is_some() && current.as_ref() != sent_with {
            // Sent with a token that has been replaced since.
            return Disposition::Replay;
        }
        Disposition::Refresh
    }

    async fn run(&self, mut request: ApiRequest) -> Result<ApiResponse, ApiError> {
        loop {
            let outgoing = self.attach_credentials(&request);
            let response = self.transport.send(&outgoing).await?;
            debug!(status = response.status, retried = request.retried, "response");

            match self.handle_response(&mut request, outgoing.bearer.as_ref(), response) {
                Disposition::Done(result) => return result,
                Disposition::Replay => continue,
                Disposition::Refresh => {
                    self.refresh_session().await?;
                }
            }
        }
    }

    /// Obtains a fresh access token, joining the refresh in flight if there
    /// is one.
    pub async fn refresh_session(&self) -> Result<AccessToken, ApiError> {
        let owned = {
            let mut state = self.refresh_state.lock();
            if let RefreshState::Refreshing { waiters } = &mut *state {
                let (tx, rx) = oneshot::channel();
                waiters.push(tx);
                Err(rx)
            } else {
                let session = self.session.read();
                let Some(refresh) = session.refresh_token().cloned() else {
                    return Err(ApiError::Unauthenticated);
                };
                *state = RefreshState::Refreshing {
                    waiters: Vec::new(),
                };
                Ok((refresh, session.epoch()))
            }
        };

        let (refresh, epoch) = match owned {
            Ok(owned) => owned,
            Err(rx) => {
                debug!("refresh in flight, waiting");
                return rx.await.unwrap_or_else(|_| {
                    Err(ApiError::RefreshFailed("refresh was abandoned".to_string()))
                });
            }
        };

        let flight = RefreshFlight {
            state: &self.refresh_state,
            settled: false,
        };
        let mut outcome = self.request_new_tokens(refresh, epoch).await;
        if let Err(e @ ApiError::RefreshFailed(_)) = &outcome {
            if !self.expire_session(e, epoch).await {
                debug!("session replaced during failed refresh, keeping it");
                outcome = self.superseded();
            }
        }
        flight.settle(&outcome);
        outcome
    }

    /// Outcome for a refresh whose session was replaced while it ran: the
    /// caller carries on with whatever the current session holds.
    fn superseded(&self) -> RefreshOutcome {
        self.access_token().ok_or(ApiError::Unauthenticated)
    }

    async fn request_new_tokens(&self, refresh: RefreshToken, epoch: u64) -> RefreshOutcome {
        let request = ApiRequest::post(&self.endpoints.refresh)
            .with_json(&RefreshRequest { refresh: &refresh.0 })
            .map_err(|e| ApiError::RefreshFailed(e.to_string()))?;

        info!("refreshing session");
        let response = self
            .transport
            .send(&request)
            .await
            .map_err(|e| ApiError::RefreshFailed(e.to_string()))?;
        if !response.is_success() {
            return Err(ApiError::RefreshFailed(format!(
                "refresh endpoint answered {}: {}",
                response.status,
                response.message()
            )));
        }
        let tokens: RefreshResponse = response
            .json()
            .map_err(|e| ApiError::RefreshFailed(e.to_string()))?;

        let rotated = {
            let mut session = self.session.write();
            if session.epoch() == epoch {
                session.rotate(tokens.access.clone(), tokens.refresh.clone());
                true
            } else {
                false
            }
        };
        if !rotated {
            // Signed out or signed in again while the refresh was out.
            debug!("session replaced during refresh, discarding result");
            return self.superseded();
        }

        if let Err(e) = self.persist_refresh(&tokens, epoch).await {
            warn!(error = %e, "refreshed tokens were not persisted");
        }
        Ok(tokens.access)
    }

    async fn persist_refresh(&self, tokens: &RefreshResponse, epoch: u64) -> Result<(), StoreError> {
        let _writes = self.store_writes.lock().await;
        let current = self.session.read().epoch();
        if current != epoch {
            debug!("session replaced before refreshed tokens were stored");
            return Ok(());
        }
        self.store.set(CredentialKey::Access, &tokens.access.0).await?;
        if let Some(refresh) = &tokens.refresh {
            self.store.set(CredentialKey::Refresh, &refresh.0).await?;
        }
        Ok(())
    }

    async fn forget_persisted(&self) -> Result<(), StoreError> {
        self.store.remove(CredentialKey::Access).await?;
        self.store.remove(CredentialKey::Refresh).await?;
        Ok(())
    }

    /// Signs out the session of `epoch`. Returns false, leaving everything
    /// alone, when that session has already been replaced.
    async fn expire_session(&self, reason: &ApiError, epoch: u64) -> bool {
        let writes = self.store_writes.lock().await;
        {
            let mut session = self.session.write();
            if session.epoch() != epoch {
                return false;
            }
            session.clear();
        }
        warn!(%reason, "session could not be refreshed, signing out");
        self.current_user.write().take();
        if let Err(e) = self.forget_persisted().await {
            warn!(error = %e, "stale credentials left in store");
        }
        drop(writes);
        self.navigator.navigate(Route::Login);
        true
    }

    /// Makes `tokens` the session, persisting them before they become
    /// visible, and loads the profile best-effort.
    async fn sign_in(&self, tokens: TokenPair) -> Result<(), ApiError> {
        {
            let _writes = self.store_writes.lock().await;
            self.store.set(CredentialKey::Access, &tokens.access.0).await?;
            self.store.set(CredentialKey::Refresh, &tokens.refresh.0).await?;
            self.session.write().set(tokens);
        }
        self.current_user.write().take();

        if let Err(e) = self.reload_current_user().await {
            warn!(error = %e, "signed in but the profile could not be loaded");
        }
        Ok(())
    }

    async fn reload_current_user(&self) -> Result<CurrentUser, ApiError> {
        let epoch = self.session.read().epoch();
        let user: CurrentUser = self
            .execute(ApiRequest::get(&self.endpoints.me))
            .await?
            .json()?;
        if self.session.read().epoch() == epoch {
            *self.current_user.write() = Some(user.clone());
        }
        Ok(user)
    }
}

fn into_result(response: ApiResponse) -> Result<ApiResponse, ApiError> {
    if response.is_success() {
        Ok(response)
    } else {
        Err(ApiError::Status {
            status: response.status,
            message: response.message(),
        })
    }
}

/// Resets the state machine when the refresh owner goes away. If it is
/// dropped before `settle`, waiters see their sender vanish.
struct RefreshFlight<'a> {
    state: &'a Mutex<RefreshState>,
    settled: bool,
}

impl RefreshFlight<'_> {
    fn settle(mut self, outcome: &RefreshOutcome) {
        self.settled = true;
        let waiters = self.take_waiters();
        debug!(waiters = waiters.len(), ok = outcome.is_ok(), "refresh settled");
        for waiter in waiters {
            let _ = waiter.send(outcome.clone());
        }
    }

    fn take_waiters(&self) -> Vec<oneshot::Sender<RefreshOutcome>> {
        match std::mem::replace(&mut *self.state.lock(), RefreshState::Idle) {
            RefreshState::Refreshing { waiters } => waiters,
            RefreshState::Idle => Vec::new(),
        }
    }
}

impl Drop for RefreshFlight<'_> {
    fn drop(&mut self) {
        if !self.settled {
            let waiters = self.take_waiters();
            warn!(waiters = waiters.len(), "refresh abandoned");
        }
    }
}

#[async_trait::async_trait]
impl ApiClient for TokenSessionManager {
    async fn execute(&self, request: ApiRequest) -> Result<ApiResponse, ApiError> {
        let request_id = nanoid!(8);
        let span = tracing::debug_span!(
            "api",
            id = %request_id,
            method = %request.method,
            path = %request.path,
        );
        self.run(request).instrument(span).await
    }
}

#[async_trait::async_trait]
impl SessionService for TokenSessionManager {
    async fn register(&self, input: RegisterInput) -> Result<UserProfile, ApiError> {
        let request = ApiRequest::post(&self.endpoints.register).with_json(&input)?;
        let registered: Registered = into_result(self.transport.send(&request).await?)?.json()?;
        info!(email = %input.email, user = %registered.user.id, "registered, awaiting verification");
        Ok(registered.user)
    }

    async fn verify_email(&self, email: &str, otp_code: &str) -> Result<(), ApiError> {
        let request = ApiRequest::post(&self.endpoints.verify_email)
            .with_json(&VerifyEmailRequest { email, otp_code })?;
        let tokens: TokenPair = into_result(self.transport.send(&request).await?)?.json()?;
        info!(%email, "email verified, signed in");
        self.sign_in(tokens).await
    }

    async fn login(&self, input: LoginInput) -> Result<(), ApiError> {
        let request = ApiRequest::post(&self.endpoints.login).with_json(&LoginRequest {
            email: &input.email,
            password: &input.password,
        })?;
        let response = self.transport.send(&request).await?;
        match response.status {
            200..=299 => {}
            400 | 401 => return Err(ApiError::InvalidCredentials),
            status => {
                return Err(ApiError::Status {
                    status,
                    message: response.message(),
                });
            }
        }
        let tokens: TokenPair = response.json()?;
        info!(email = %input.email, "signed in");
        self.sign_in(tokens).await
    }

    async fn logout(&self) -> Result<(), ApiError> {
        let epoch = {
            let mut session = self.session.write();
            session.clear();
            session.epoch()
        };
        self.current_user.write().take();

        let _writes = self.store_writes.lock().await;
        let current = self.session.read().epoch();
        // A sign-in that got in first owns the store now.
        if current == epoch {
            self.forget_persisted().await?;
        }
        info!("signed out");
        Ok(())
    }

    async fn current_user(&self) -> Result<CurrentUser, ApiError> {
        let cached = self.current_user.read().clone();
        if let Some(user) = cached {
            return Ok(user);
        }
        if self.session.read().is_empty() {
            return Err(ApiError::Unauthenticated);
        }
        self.reload_current_user().await
    }

    fn is_authenticated(&self) -> bool {
        self.session.read().access_token().is_some()
    }
}
