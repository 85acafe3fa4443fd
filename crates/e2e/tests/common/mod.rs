//! In-memory browser engine that plays the part of a Thunderdome instance
//!
//! Contexts are isolated cookie jars, the auth API issues session cookies, and
//! navigating to an admin route renders the login form, the landing page or
//! the admin screen depending on who the context's cookie belongs to.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::json;

use thunderdome_e2e::config::E2eConfig;
use thunderdome_e2e::engine::{
    ApiRequest, ApiResponse, BrowserEngine, ContextId, Cookie, Navigation, PageId,
};
use thunderdome_e2e::pages::{HEADING_SELECTOR, LANDING_HEADING, LOGIN_TITLE, LOGIN_TITLE_SELECTOR};
use thunderdome_e2e::{E2eError, E2eResult};

#[derive(Debug, Clone)]
struct User {
    id: String,
    name: String,
    email: Option<String>,
    password: String,
    user_type: String,
}

impl User {
    fn json(&self) -> serde_json::Value {
        json!({ "id": self.id, "name": self.name, "email": self.email, "type": self.user_type })
    }
}

#[derive(Default)]
struct FakeContext {
    cookies: Vec<Cookie>,
    closed: bool,
}

struct FakePage {
    context: u64,
    history: Vec<String>,
    rendered: HashMap<String, String>,
    closed: bool,
}

#[derive(Default)]
struct State {
    contexts: HashMap<u64, FakeContext>,
    pages: HashMap<u64, FakePage>,
    users: HashMap<String, User>,
    /// cookie value -> user id
    sessions: HashMap<String, String>,
    users_by_id: HashMap<String, User>,
    requests: HashMap<String, u64>,
}

/// Knobs for making the fake misbehave
#[derive(Default)]
pub struct Behaviour {
    /// Emails the app promotes to ADMIN on registration
    pub admins: HashSet<String>,
    /// Delay applied to every auth API call
    pub auth_delay: Option<Duration>,
    /// Delay for auth calls carrying one of these emails, in place of `auth_delay`
    pub slow_accounts: HashMap<String, Duration>,
    /// Emails whose password check always fails
    pub reject: HashSet<String>,
    /// Paths whose navigation never settles
    pub stuck_paths: HashSet<String>,
    pub fail_new_context: bool,
}

pub struct FakeApp {
    state: Mutex<State>,
    behaviour: Mutex<Behaviour>,
    next_handle: AtomicU64,
}

impl FakeApp {
    /// An app that promotes the default admin account from `config`
    pub fn new(config: &E2eConfig) -> Arc<Self> {
        let mut behaviour = Behaviour::default();
        behaviour.admins.insert(config.accounts.admin.email.clone());
        Self::with_behaviour(behaviour)
    }

    pub fn with_behaviour(behaviour: Behaviour) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(State::default()),
            behaviour: Mutex::new(behaviour),
            next_handle: AtomicU64::new(1),
        })
    }

    pub fn behaviour(&self) -> parking_lot::MutexGuard<'_, Behaviour> {
        self.behaviour.lock()
    }

    /// Pre-create an account as if an earlier run had registered it
    pub fn seed_user(&self, name: &str, email: &str, password: &str, user_type: &str) {
        let user = User {
            id: format!("seed-{email}"),
            name: name.to_string(),
            email: Some(email.to_string()),
            password: password.to_string(),
            user_type: user_type.to_string(),
        };
        let mut state = self.state.lock();
        state.users_by_id.insert(user.id.clone(), user.clone());
        state.users.insert(email.to_string(), user);
    }

    /// How many times an auth endpoint was called
    pub fn request_count(&self, path: &str) -> u64 {
        self.state.lock().requests.get(path).copied().unwrap_or(0)
    }

    pub fn auth_request_total(&self) -> u64 {
        self.state.lock().requests.values().sum()
    }

    pub fn contexts_created(&self) -> usize {
        self.state.lock().contexts.len()
    }

    pub fn open_contexts(&self) -> usize {
        self.state.lock().contexts.values().filter(|c| !c.closed).count()
    }

    pub fn is_context_closed(&self, context: ContextId) -> bool {
        self.state
            .lock()
            .contexts
            .get(&context.0)
            .map(|c| c.closed)
            .unwrap_or(false)
    }

    pub fn cookie_values(&self, context: ContextId) -> Vec<String> {
        self.state
            .lock()
            .contexts
            .get(&context.0)
            .map(|c| c.cookies.iter().map(|k| k.value.clone()).collect())
            .unwrap_or_default()
    }

    pub fn history(&self, page: PageId) -> Vec<String> {
        self.state
            .lock()
            .pages
            .get(&page.0)
            .map(|p| p.history.clone())
            .unwrap_or_default()
    }

    fn handle(&self) -> u64 {
        self.next_handle.fetch_add(1, Ordering::SeqCst)
    }

    fn set_cookie(state: &mut State, context: u64, name: &str, token: &str, user_id: &str) {
        state.sessions.insert(token.to_string(), user_id.to_string());
        if let Some(ctx) = state.contexts.get_mut(&context) {
            ctx.cookies.retain(|c| c.name != name);
            ctx.cookies.push(Cookie {
                name: name.to_string(),
                value: token.to_string(),
                domain: "127.0.0.1".to_string(),
                path: "/".to_string(),
            });
        }
    }

    fn current_user(state: &State, context: u64) -> Option<User> {
        let ctx = state.contexts.get(&context)?;
        ctx.cookies
            .iter()
            .filter_map(|c| state.sessions.get(&c.value))
            .filter_map(|id| state.users_by_id.get(id))
            .next()
            .cloned()
    }

    fn render(user: Option<&User>, path: &str) -> (String, HashMap<String, String>) {
        let mut rendered = HashMap::new();
        let admin_heading = match path {
            "/admin/battles" => Some("Battles"),
            "/admin/teams" => Some("Teams"),
            "/admin/users" => Some("Users"),
            "/admin/organizations" => Some("Organizations"),
            _ => None,
        };

        if path.starts_with("/admin") {
            match user {
                None => {
                    rendered.insert(LOGIN_TITLE_SELECTOR.to_string(), LOGIN_TITLE.to_string());
                    return ("/login".to_string(), rendered);
                }
                Some(u) if u.user_type != "ADMIN" => {
                    rendered.insert(HEADING_SELECTOR.to_string(), LANDING_HEADING.to_string());
                    return ("/".to_string(), rendered);
                }
                Some(_) => {
                    rendered.insert(
                        HEADING_SELECTOR.to_string(),
                        admin_heading.unwrap_or("Admin").to_string(),
                    );
                    return (path.to_string(), rendered);
                }
            }
        }

        rendered.insert(HEADING_SELECTOR.to_string(), LANDING_HEADING.to_string());
        (path.to_string(), rendered)
    }

    fn api(&self, context: u64, request: &ApiRequest) -> ApiResponse {
        let mut state = self.state.lock();
        *state.requests.entry(request.path.clone()).or_insert(0) += 1;
        let body = request.body.clone().unwrap_or_default();
        let behaviour = self.behaviour.lock();

        let (status, payload) = match (request.method.as_str(), request.path.as_str()) {
            ("POST", "/api/auth/guest") => {
                let user = User {
                    id: format!("guest-{}", self.handle()),
                    name: body["name"].as_str().unwrap_or_default().to_string(),
                    email: None,
                    password: String::new(),
                    user_type: "GUEST".to_string(),
                };
                state.users_by_id.insert(user.id.clone(), user.clone());
                let token = format!("user-token-{}", self.handle());
                Self::set_cookie(&mut state, context, "user", &token, &user.id);
                (200, json!({ "success": true, "error": "", "data": user.json() }))
            }
            ("POST", "/api/auth/register") => {
                let email = body["email"].as_str().unwrap_or_default().to_string();
                if state.users.contains_key(&email) {
                    (500, json!({ "success": false, "error": "EMAIL_ALREADY_EXISTS", "data": null }))
                } else {
                    let user = User {
                        id: format!("user-{}", self.handle()),
                        name: body["name"].as_str().unwrap_or_default().to_string(),
                        email: Some(email.clone()),
                        password: body["password1"].as_str().unwrap_or_default().to_string(),
                        user_type: if behaviour.admins.contains(&email) {
                            "ADMIN".to_string()
                        } else {
                            "REGISTERED".to_string()
                        },
                    };
                    state.users.insert(email, user.clone());
                    state.users_by_id.insert(user.id.clone(), user.clone());
                    let token = format!("session-token-{}", self.handle());
                    Self::set_cookie(&mut state, context, "session", &token, &user.id);
                    (200, json!({ "success": true, "error": "", "data": user.json() }))
                }
            }
            ("POST", "/api/auth") => {
                let email = body["email"].as_str().unwrap_or_default();
                let password = body["password"].as_str().unwrap_or_default();
                match state.users.get(email).cloned() {
                    Some(user) if user.password == password && !behaviour.reject.contains(email) => {
                        let token = format!("session-token-{}", self.handle());
                        Self::set_cookie(&mut state, context, "session", &token, &user.id);
                        (
                            200,
                            json!({
                                "success": true,
                                "error": "",
                                "data": { "user": user.json(), "sessionId": token, "mfaRequired": false }
                            }),
                        )
                    }
                    _ => (401, json!({ "success": false, "error": "INVALID_LOGIN", "data": null })),
                }
            }
            _ => (404, json!({ "success": false, "error": "NOT_FOUND", "data": null })),
        };

        ApiResponse {
            status,
            body: Some(payload),
        }
    }
}

#[async_trait]
impl BrowserEngine for FakeApp {
    async fn new_context(&self) -> E2eResult<ContextId> {
        if self.behaviour.lock().fail_new_context {
            return Err(E2eError::Engine("browser has crashed".to_string()));
        }
        let id = self.handle();
        self.state.lock().contexts.insert(id, FakeContext::default());
        Ok(ContextId(id))
    }

    async fn close_context(&self, context: ContextId) -> E2eResult<()> {
        let mut state = self.state.lock();
        if let Some(ctx) = state.contexts.get_mut(&context.0) {
            ctx.closed = true;
        }
        for page in state.pages.values_mut().filter(|p| p.context == context.0) {
            page.closed = true;
        }
        Ok(())
    }

    async fn clear_cookies(&self, context: ContextId) -> E2eResult<()> {
        if let Some(ctx) = self.state.lock().contexts.get_mut(&context.0) {
            ctx.cookies.clear();
        }
        Ok(())
    }

    async fn cookies(&self, context: ContextId) -> E2eResult<Vec<Cookie>> {
        Ok(self
            .state
            .lock()
            .contexts
            .get(&context.0)
            .map(|c| c.cookies.clone())
            .unwrap_or_default())
    }

    async fn request(
        &self,
        context: ContextId,
        request: ApiRequest,
        _timeout: Duration,
    ) -> E2eResult<ApiResponse> {
        let delay = {
            let behaviour = self.behaviour.lock();
            request
                .body
                .as_ref()
                .and_then(|body| body["email"].as_str())
                .and_then(|email| behaviour.slow_accounts.get(email).copied())
                .or(behaviour.auth_delay)
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        Ok(self.api(context.0, &request))
    }

    async fn new_page(&self, context: ContextId) -> E2eResult<PageId> {
        let id = self.handle();
        let mut state = self.state.lock();
        match state.contexts.get(&context.0) {
            Some(ctx) if !ctx.closed => {}
            _ => return Err(E2eError::Engine(format!("context {context} is closed"))),
        }
        state.pages.insert(
            id,
            FakePage {
                context: context.0,
                history: Vec::new(),
                rendered: HashMap::new(),
                closed: false,
            },
        );
        Ok(PageId(id))
    }

    async fn close_page(&self, page: PageId) -> E2eResult<()> {
        if let Some(p) = self.state.lock().pages.get_mut(&page.0) {
            p.closed = true;
        }
        Ok(())
    }

    async fn goto(&self, page: PageId, path: &str, timeout: Duration) -> E2eResult<Navigation> {
        let stuck = self.behaviour.lock().stuck_paths.contains(path);
        if stuck {
            tokio::time::sleep(timeout).await;
            return Err(E2eError::NavigationFailure {
                path: path.to_string(),
                reason: format!("Timeout {}ms exceeded", timeout.as_millis()),
            });
        }

        let mut state = self.state.lock();
        let context = match state.pages.get(&page.0) {
            Some(p) if !p.closed => p.context,
            _ => return Err(E2eError::Engine(format!("page {page} is closed"))),
        };
        let user = Self::current_user(&state, context);
        let (url, rendered) = Self::render(user.as_ref(), path);
        if let Some(p) = state.pages.get_mut(&page.0) {
            p.history.push(url.clone());
            p.rendered = rendered;
        }
        Ok(Navigation {
            url: format!("http://127.0.0.1:8080{url}"),
            status: Some(200),
        })
    }

    async fn text_content(&self, page: PageId, selector: &str) -> E2eResult<Option<String>> {
        Ok(self
            .state
            .lock()
            .pages
            .get(&page.0)
            .and_then(|p| p.rendered.get(selector).cloned()))
    }

    async fn shutdown(&self) -> E2eResult<()> {
        let mut state = self.state.lock();
        for ctx in state.contexts.values_mut() {
            ctx.closed = true;
        }
        Ok(())
    }
}

/// Configuration with short timeouts for fast failure tests
pub fn test_config() -> E2eConfig {
    let mut config = E2eConfig::default();
    config.timeouts.login_ms = 2_000;
    config.timeouts.navigation_ms = 500;
    config.timeouts.assertion_ms = 300;
    config.timeouts.request_ms = 500;
    config
}
