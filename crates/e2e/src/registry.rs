//! Role session registry
//!
//! Owns at most one live [`RoleSession`] per role for the lifetime of a run.
//! The first request for a role spawns the login; everyone who asks while it
//! is running awaits the same shared handle, so a role is logged in exactly
//! once no matter how many tests race for it. The login runs in its own task:
//! a test that gets cancelled while waiting drops only its own handle and the
//! login still completes into the cache.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::auth::Authenticator;
use crate::config::{E2eConfig, GuestPolicy};
use crate::engine::BrowserEngine;
use crate::error::{E2eError, E2eResult};
use crate::page::{Page, PageTimeouts};
use crate::session::{Role, RoleSession, SessionState};

/// Failure shared between every waiter of one login attempt
#[derive(Debug, Clone)]
enum AcquireError {
    Authentication { role: Role, reason: String },
    Engine(String),
}

impl From<AcquireError> for E2eError {
    fn from(err: AcquireError) -> Self {
        match err {
            AcquireError::Authentication { role, reason } => {
                E2eError::AuthenticationFailure { role, reason }
            }
            AcquireError::Engine(reason) => E2eError::Engine(reason),
        }
    }
}

type Acquired = Result<Arc<RoleSession>, AcquireError>;
type PendingLogin = Shared<BoxFuture<'static, Acquired>>;

enum Slot {
    Uninitialized,
    Authenticating { generation: u64, pending: PendingLogin },
    Ready(Arc<RoleSession>),
}

/// Completed login sequences per role
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoginAudit {
    pub logins: BTreeMap<Role, u64>,
    pub auth_requests: u64,
}

impl LoginAudit {
    pub fn logins(&self, role: Role) -> u64 {
        self.logins.get(&role).copied().unwrap_or(0)
    }

    /// Roles that went through more than one login sequence
    pub fn duplicated(&self) -> Vec<Role> {
        self.logins
            .iter()
            .filter(|(_, count)| **count > 1)
            .map(|(role, _)| *role)
            .collect()
    }
}

struct RegistryInner {
    engine: Arc<dyn BrowserEngine>,
    authenticator: Authenticator,
    guest_policy: GuestPolicy,
    login_timeout: Duration,
    page_timeouts: PageTimeouts,
    slots: [Mutex<Slot>; 4],
    /// Per-test guest sessions, closed on shutdown
    ephemeral: Mutex<Vec<Arc<RoleSession>>>,
    /// Per-test guest logins not yet awaited by shutdown
    ephemeral_pending: Mutex<Vec<PendingLogin>>,
    logins: [AtomicU64; 4],
    generation: AtomicU64,
}

/// Scoped provider of role sessions, constructed once per run
#[derive(Clone)]
pub struct SessionRegistry {
    inner: Arc<RegistryInner>,
}

impl SessionRegistry {
    pub fn new(engine: Arc<dyn BrowserEngine>, config: &E2eConfig) -> Self {
        let page_timeouts = PageTimeouts {
            navigation: config.timeouts.navigation(),
            assertion: config.timeouts.assertion(),
        };
        let authenticator = Authenticator::new(
            engine.clone(),
            config.accounts.clone(),
            config.landing_path.clone(),
            config.timeouts.request(),
            page_timeouts.clone(),
        );

        Self {
            inner: Arc::new(RegistryInner {
                engine,
                authenticator,
                guest_policy: config.guest_policy,
                login_timeout: config.timeouts.login(),
                page_timeouts,
                slots: std::array::from_fn(|_| Mutex::new(Slot::Uninitialized)),
                ephemeral: Mutex::new(Vec::new()),
                ephemeral_pending: Mutex::new(Vec::new()),
                logins: std::array::from_fn(|_| AtomicU64::new(0)),
                generation: AtomicU64::new(1),
            }),
        }
    }

    /// Browsing context with no credentials; never logs in
    pub async fn acquire_unauthenticated_session(&self) -> E2eResult<Arc<RoleSession>> {
        self.acquire(Role::Unauthenticated).await
    }

    pub async fn acquire_guest_session(&self) -> E2eResult<Arc<RoleSession>> {
        self.acquire(Role::Guest).await
    }

    pub async fn acquire_registered_session(&self) -> E2eResult<Arc<RoleSession>> {
        self.acquire(Role::Registered).await
    }

    pub async fn acquire_admin_session(&self) -> E2eResult<Arc<RoleSession>> {
        self.acquire(Role::Admin).await
    }

    /// Return the role's session, logging in first if nobody has yet
    pub async fn acquire(&self, role: Role) -> E2eResult<Arc<RoleSession>> {
        if role == Role::Guest && self.inner.guest_policy == GuestPolicy::PerTest {
            return self.acquire_ephemeral(role).await;
        }

        let pending = {
            let mut slot = self.inner.slots[role.index()].lock();
            match &*slot {
                Slot::Ready(session) if session.is_ready() => {
                    debug!(role = %role, "reusing cached session");
                    return Ok(session.clone());
                }
                Slot::Authenticating { pending, .. } => {
                    debug!(role = %role, "waiting for in-flight login");
                    pending.clone()
                }
                _ => {
                    let generation = self.inner.generation.fetch_add(1, Ordering::SeqCst);
                    let pending = self.spawn_login(role, generation);
                    *slot = Slot::Authenticating {
                        generation,
                        pending: pending.clone(),
                    };
                    pending
                }
            }
        };

        pending.await.map_err(E2eError::from)
    }

    /// Acquire the role's session and open a fresh page in it
    pub async fn page_for(&self, role: Role) -> E2eResult<Page> {
        self.acquire(role).await?.new_page().await
    }

    /// Where the cached session for `role` currently is in its lifecycle
    pub fn state(&self, role: Role) -> SessionState {
        match &*self.inner.slots[role.index()].lock() {
            Slot::Uninitialized => SessionState::Uninitialized,
            Slot::Authenticating { .. } => SessionState::Authenticating,
            Slot::Ready(session) => session.state(),
        }
    }

    pub fn login_audit(&self) -> LoginAudit {
        let logins = Role::ALL
            .iter()
            .filter(|role| role.user_type().is_some())
            .map(|role| (*role, self.inner.logins[role.index()].load(Ordering::SeqCst)))
            .collect();
        LoginAudit {
            logins,
            auth_requests: self.inner.authenticator.auth_requests(),
        }
    }

    /// Close every session and reset all roles to `Uninitialized`
    ///
    /// Logins still in flight are awaited and their sessions closed too.
    pub async fn shutdown(&self) -> E2eResult<()> {
        let mut sessions = Vec::new();
        let mut in_flight = Vec::new();
        for slot in &self.inner.slots {
            match std::mem::replace(&mut *slot.lock(), Slot::Uninitialized) {
                Slot::Ready(session) => sessions.push(session),
                Slot::Authenticating { pending, .. } => in_flight.push(pending),
                Slot::Uninitialized => {}
            }
        }
        for pending in in_flight {
            if let Ok(session) = pending.await {
                sessions.push(session);
            }
        }
        // Per-test logins add themselves to `ephemeral` before they resolve
        let ephemeral_pending = std::mem::take(&mut *self.inner.ephemeral_pending.lock());
        futures::future::join_all(ephemeral_pending).await;
        sessions.extend(self.inner.ephemeral.lock().drain(..));

        let mut first_error = None;
        for session in sessions {
            info!(role = %session.role(), context = %session.context(), "closing session");
            if let Err(e) = session.close().await {
                warn!(role = %session.role(), "failed to close session: {}", e);
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn spawn_login(&self, role: Role, generation: u64) -> PendingLogin {
        let inner = self.inner.clone();
        let task = tokio::spawn(async move {
            let result = inner.establish(role).await;
            inner.settle_slot(role, generation, &result);
            result
        });

        let inner = self.inner.clone();
        async move {
            match task.await {
                Ok(result) => result,
                Err(e) => {
                    let result = Err(AcquireError::Engine(format!("login task failed: {e}")));
                    inner.settle_slot(role, generation, &result);
                    result
                }
            }
        }
        .boxed()
        .shared()
    }

    async fn acquire_ephemeral(&self, role: Role) -> E2eResult<Arc<RoleSession>> {
        let inner = self.inner.clone();
        let task = tokio::spawn(async move {
            let session = inner.establish(role).await?;
            inner.ephemeral.lock().push(session.clone());
            Ok::<_, AcquireError>(session)
        });

        let pending: PendingLogin = async move {
            match task.await {
                Ok(result) => result,
                Err(e) => Err(AcquireError::Engine(format!("login task failed: {e}"))),
            }
        }
        .boxed()
        .shared();

        {
            let mut in_flight = self.inner.ephemeral_pending.lock();
            in_flight.retain(|p| p.peek().is_none());
            in_flight.push(pending.clone());
        }

        pending.await.map_err(E2eError::from)
    }
}

impl RegistryInner {
    /// Create a context for `role` and take it to `Ready`
    async fn establish(&self, role: Role) -> Acquired {
        let context = self
            .engine
            .new_context()
            .await
            .map_err(|e| AcquireError::Engine(e.to_string()))?;
        let session = Arc::new(RoleSession::new(
            role,
            context,
            self.engine.clone(),
            self.page_timeouts.clone(),
        ));

        if role == Role::Unauthenticated {
            session
                .transition(SessionState::Ready)
                .map_err(|e| AcquireError::Engine(e.to_string()))?;
            return Ok(session);
        }

        session
            .transition(SessionState::Authenticating)
            .map_err(|e| AcquireError::Engine(e.to_string()))?;
        self.logins[role.index()].fetch_add(1, Ordering::SeqCst);
        info!(role = %role, context = %context, "logging in");

        let reason = match tokio::time::timeout(
            self.login_timeout,
            self.authenticator.login(role, context),
        )
        .await
        {
            Ok(Ok(identity)) => {
                session.set_identity(identity);
                session
                    .transition(SessionState::Ready)
                    .map_err(|e| AcquireError::Engine(e.to_string()))?;
                return Ok(session);
            }
            Ok(Err(E2eError::AuthenticationFailure { reason, .. })) => reason,
            Ok(Err(e)) => e.to_string(),
            Err(_) => format!("login did not settle within {:?}", self.login_timeout),
        };

        warn!(role = %role, "login failed: {}", reason);
        if let Err(e) = session.close().await {
            warn!(role = %role, "failed to release context after login failure: {}", e);
        }
        Err(AcquireError::Authentication { role, reason })
    }

    /// Record a finished login in its slot unless the slot moved on (e.g. shutdown)
    fn settle_slot(&self, role: Role, generation: u64, result: &Acquired) {
        let mut slot = self.slots[role.index()].lock();
        let current = matches!(
            &*slot,
            Slot::Authenticating { generation: g, .. } if *g == generation
        );
        if current {
            *slot = match result {
                Ok(session) => Slot::Ready(session.clone()),
                Err(_) => Slot::Uninitialized,
            };
        }
    }
}
