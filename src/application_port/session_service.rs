use crate::application_port::ApiError;
use crate::domain_model::{CurrentUser, UserProfile};
use crate::domain_port::{ApiRequest, ApiResponse};

#[derive(Debug, Clone)]
pub struct LoginInput {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct RegisterInput {
    pub username: String,
    pub email: String,
    pub password: String,
    pub password2: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field_of_interest: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
}

/// Authenticated request pipeline. Every call gets the current bearer token
/// and is replayed once after a transparent refresh if it comes back 401.
#[async_trait::async_trait]
pub trait ApiClient: Send + Sync {
    async fn execute(&self, request: ApiRequest) -> Result<ApiResponse, ApiError>;
}

#[async_trait::async_trait]
pub trait SessionService: Send + Sync {
    /// Creates an unverified account. The server mails a one-time code that
    /// `verify_email` trades for a session.
    async fn register(&self, input: RegisterInput) -> Result<UserProfile, ApiError>;
    async fn verify_email(&self, email: &str, otp_code: &str) -> Result<(), ApiError>;
    async fn login(&self, input: LoginInput) -> Result<(), ApiError>;
    async fn logout(&self) -> Result<(), ApiError>;
    async fn current_user(&self) -> Result<CurrentUser, ApiError>;
    fn is_authenticated(&self) -> bool;
}
