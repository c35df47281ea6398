use crate::application_impl::*;
use crate::application_port::*;
use crate::domain_port::*;
use crate::infra_fs::*;
use crate::infra_http::*;
use crate::infra_memory::*;
use crate::infra_redis::*;
use crate::logger::*;
use crate::settings::Settings;
use nanoid::nanoid;
use std::sync::Arc;
use std::time::Duration;

const DEFAULT_CREDENTIALS_PATH: &str = ".elevate/credentials.json";

pub struct Client {
    pub session_service: Arc<dyn SessionService>,
    pub feed_service: Arc<dyn FeedService>,
    pub engagement_service: Arc<dyn EngagementService>,
    session: Arc<TokenSessionManager>,
    feed: Arc<RealFeedService>,
}

impl Client {
    pub async fn try_new(settings: &Settings) -> anyhow::Result<Self> {
        let alphabet: [char; 16] = [
            '1', '2', '3', '4', '5', '6', '7', '8', '9', '0', 'a', 'b', 'c', 'd', 'e', 'f',
        ];
        let run_id = nanoid!(10, &alphabet);

        let transport: Arc<dyn HttpTransport> = match settings.api.backend.as_str() {
            "fake" => Arc::new(demo_transport()),
            "real" => Arc::new(ReqwestTransport::new(
                settings.api.base_url.clone(),
                Duration::from_secs(settings.api.timeout_secs),
            )?),
            other => return Err(anyhow::anyhow!("Unknown api backend: {}", other)),
        };

        let store: Arc<dyn CredentialStore> = match settings.credentials.backend.as_str() {
            "memory" => Arc::new(MemoryCredentialStore::new()),
            "file" => Arc::new(FileCredentialStore::new(
                settings
                    .credentials
                    .path
                    .as_deref()
                    .unwrap_or(DEFAULT_CREDENTIALS_PATH),
            )),
            "redis" => {
                let url = settings
                    .credentials
                    .redis_url
                    .as_deref()
                    .ok_or_else(|| anyhow::anyhow!("credentials.redis_url is required"))?;
                Arc::new(RedisCredentialStore::connect(url, settings.credentials.prefix.clone()).await?)
            }
            other => return Err(anyhow::anyhow!("Unknown credentials backend: {}", other)),
        };

        let endpoints = AuthEndpoints {
            login: settings.api.login_path.clone(),
            refresh: settings.api.refresh_path.clone(),
            me: settings.api.me_path.clone(),
            register: settings.api.register_path.clone(),
            verify_email: settings.api.verify_email_path.clone(),
        };
        let session = Arc::new(
            TokenSessionManager::restore(transport, store, Arc::new(TracingNavigator), endpoints)
                .await?,
        );

        info!(%run_id, api = %settings.api.backend, credentials = %settings.credentials.backend, "client started");
        Ok(Self::from_session(session))
    }

    /// Wires the services around an already built session manager.
    pub fn from_session(session: Arc<TokenSessionManager>) -> Self {
        let api: Arc<dyn ApiClient> = session.clone();
        let feed = Arc::new(RealFeedService::new(api.clone()));
        Client {
            session_service: session.clone(),
            feed_service: feed.clone(),
            engagement_service: Arc::new(RealEngagementService::new(api)),
            session,
            feed,
        }
    }

    pub fn session(&self) -> &TokenSessionManager {
        &self.session
    }

    /// Signs out and drops everything cached for the previous account.
    pub async fn logout(&self) -> Result<(), ApiError> {
        self.session_service.logout().await?;
        self.feed.clear();
        Ok(())
    }
}

fn demo_transport() -> FakeTransport {
    let transport = FakeTransport::new();
    transport.add_user("demo@campus.edu", "demo", "demo");
    transport.add_user("ada@campus.edu", "lovelace", "ada");
    transport.seed_post("Dean's list, fall term", "ada");
    transport.seed_post("Won the robotics hackathon", "ada");
    transport
}
