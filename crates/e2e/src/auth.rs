//! Login sequences against the Thunderdome auth API
//!
//! Requests go through the role context's own API client, so the session
//! cookie the application sets lands in that context's jar and nowhere else.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info};

use crate::config::{AccountCredentials, AccountsConfig};
use crate::engine::{ApiRequest, ApiResponse, BrowserEngine, ContextId};
use crate::error::{E2eError, E2eResult};
use crate::page::PageTimeouts;
use crate::session::{Identity, Role};

pub const LOGIN_PATH: &str = "/api/auth";
pub const GUEST_PATH: &str = "/api/auth/guest";
pub const REGISTER_PATH: &str = "/api/auth/register";

/// Thunderdome's standard response envelope
#[derive(Debug, Deserialize)]
pub struct StandardResponse<T> {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub error: String,
    pub data: Option<T>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiUser {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(rename = "type")]
    pub user_type: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginData {
    pub user: ApiUser,
    #[serde(default)]
    pub mfa_required: bool,
}

/// Performs the login sequence for a role inside a given context
pub struct Authenticator {
    engine: Arc<dyn BrowserEngine>,
    accounts: AccountsConfig,
    landing_path: String,
    request_timeout: Duration,
    page_timeouts: PageTimeouts,
    auth_requests: AtomicU64,
}

impl Authenticator {
    pub fn new(
        engine: Arc<dyn BrowserEngine>,
        accounts: AccountsConfig,
        landing_path: String,
        request_timeout: Duration,
        page_timeouts: PageTimeouts,
    ) -> Self {
        Self {
            engine,
            accounts,
            landing_path,
            request_timeout,
            page_timeouts,
            auth_requests: AtomicU64::new(0),
        }
    }

    /// Number of auth API calls made so far
    pub fn auth_requests(&self) -> u64 {
        self.auth_requests.load(Ordering::SeqCst)
    }

    /// Authenticate `context` as `role` and wait for the session to settle
    pub async fn login(&self, role: Role, context: ContextId) -> E2eResult<Identity> {
        let user = match role {
            Role::Unauthenticated => {
                return Err(E2eError::AuthenticationFailure {
                    role,
                    reason: "unauthenticated sessions have no login sequence".to_string(),
                })
            }
            Role::Guest => self.create_guest(context).await?,
            Role::Registered => {
                let account = self.accounts.registered.clone();
                self.sign_in(role, context, &account).await?
            }
            Role::Admin => {
                let account = self.accounts.admin.clone();
                self.sign_in(role, context, &account).await?
            }
        };

        let expected = role.user_type().unwrap_or_default();
        if user.user_type != expected {
            return Err(E2eError::AuthenticationFailure {
                role,
                reason: format!(
                    "application reports user type {} for {}, expected {}",
                    user.user_type,
                    user.email.as_deref().unwrap_or(&user.name),
                    expected
                ),
            });
        }

        self.settle(role, context).await?;

        info!(role = %role, user = %user.id, "session authenticated");
        Ok(Identity {
            user_id: user.id,
            name: user.name,
            email: user.email,
            user_type: user.user_type,
        })
    }

    async fn create_guest(&self, context: ContextId) -> E2eResult<ApiUser> {
        let name = format!("{}-{}", self.accounts.guest_name_prefix, uuid::Uuid::new_v4().simple());
        let response = self
            .send(context, ApiRequest::post(GUEST_PATH, json!({ "name": name })))
            .await?;
        let envelope: StandardResponse<ApiUser> = parse_envelope(Role::Guest, &response)?;
        success_data(Role::Guest, &response, envelope)
    }

    /// Register the account if needed, otherwise log in with it
    async fn sign_in(
        &self,
        role: Role,
        context: ContextId,
        account: &AccountCredentials,
    ) -> E2eResult<ApiUser> {
        let registration = self
            .send(
                context,
                ApiRequest::post(
                    REGISTER_PATH,
                    json!({
                        "name": account.name,
                        "email": account.email,
                        "password1": account.password,
                        "password2": account.password,
                    }),
                ),
            )
            .await?;

        if registration.is_success() {
            let envelope: StandardResponse<ApiUser> = parse_envelope(role, &registration)?;
            if envelope.success {
                debug!(role = %role, email = %account.email, "registered new account");
                return success_data(role, &registration, envelope);
            }
        }
        debug!(
            role = %role,
            email = %account.email,
            status = registration.status,
            "registration refused, logging in with existing account"
        );

        let response = self
            .send(
                context,
                ApiRequest::post(
                    LOGIN_PATH,
                    json!({ "email": account.email, "password": account.password }),
                ),
            )
            .await?;
        let envelope: StandardResponse<LoginData> = parse_envelope(role, &response)?;
        let login = success_data(role, &response, envelope)?;
        if login.mfa_required {
            return Err(E2eError::AuthenticationFailure {
                role,
                reason: format!("{} requires MFA", account.email),
            });
        }
        Ok(login.user)
    }

    /// Let post-login redirects resolve and confirm the context holds a session
    async fn settle(&self, role: Role, context: ContextId) -> E2eResult<()> {
        let page = self.engine.new_page(context).await?;
        let navigation = self
            .engine
            .goto(page, &self.landing_path, self.page_timeouts.navigation)
            .await;
        let closed = self.engine.close_page(page).await;
        let navigation = navigation.map_err(|e| E2eError::AuthenticationFailure {
            role,
            reason: format!("post-login navigation did not settle: {e}"),
        })?;
        closed?;
        debug!(role = %role, url = %navigation.url, "post-login navigation settled");

        if self.engine.cookies(context).await?.is_empty() {
            return Err(E2eError::AuthenticationFailure {
                role,
                reason: "no session cookie was stored".to_string(),
            });
        }
        Ok(())
    }

    async fn send(&self, context: ContextId, request: ApiRequest) -> E2eResult<ApiResponse> {
        self.auth_requests.fetch_add(1, Ordering::SeqCst);
        debug!(context = %context, "{} {}", request.method, request.path);
        self.engine
            .request(context, request, self.request_timeout)
            .await
    }
}

fn parse_envelope<T: DeserializeOwned>(
    role: Role,
    response: &ApiResponse,
) -> E2eResult<StandardResponse<T>> {
    let body = response
        .body
        .clone()
        .ok_or_else(|| E2eError::AuthenticationFailure {
            role,
            reason: format!("HTTP {} with no JSON body", response.status),
        })?;
    serde_json::from_value(body).map_err(|e| E2eError::AuthenticationFailure {
        role,
        reason: format!("unexpected response shape: {e}"),
    })
}

fn success_data<T>(role: Role, response: &ApiResponse, envelope: StandardResponse<T>) -> E2eResult<T> {
    if !response.is_success() || !envelope.success {
        let reason = if envelope.error.is_empty() {
            format!("HTTP {}", response.status)
        } else {
            format!("HTTP {}: {}", response.status, envelope.error)
        };
        return Err(E2eError::AuthenticationFailure { role, reason });
    }
    envelope.data.ok_or_else(|| E2eError::AuthenticationFailure {
        role,
        reason: "response carried no data".to_string(),
    })
}
