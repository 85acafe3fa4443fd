//! Role sessions - one isolated browsing context bound to one identity class

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::engine::{BrowserEngine, ContextId};
use crate::error::{E2eError, E2eResult};
use crate::page::{Page, PageTimeouts};

/// Identity class a session is authenticated as
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Unauthenticated,
    Guest,
    Registered,
    Admin,
}

impl Role {
    pub const ALL: [Role; 4] = [
        Role::Unauthenticated,
        Role::Guest,
        Role::Registered,
        Role::Admin,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Unauthenticated => "unauthenticated",
            Role::Guest => "guest",
            Role::Registered => "registered",
            Role::Admin => "admin",
        }
    }

    /// Value of the `type` field Thunderdome reports for a user of this role
    pub fn user_type(&self) -> Option<&'static str> {
        match self {
            Role::Unauthenticated => None,
            Role::Guest => Some("GUEST"),
            Role::Registered => Some("REGISTERED"),
            Role::Admin => Some("ADMIN"),
        }
    }

    pub(crate) fn index(&self) -> usize {
        match self {
            Role::Unauthenticated => 0,
            Role::Guest => 1,
            Role::Registered => 2,
            Role::Admin => 3,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Role {
    type Err = E2eError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "unauthenticated" | "anonymous" => Ok(Role::Unauthenticated),
            "guest" => Ok(Role::Guest),
            "registered" => Ok(Role::Registered),
            "admin" => Ok(Role::Admin),
            other => Err(E2eError::Config(format!("unknown role: {other}"))),
        }
    }
}

/// Lifecycle of a role session
///
/// ```text
/// Uninitialized -> Authenticating -> Ready -> Closed
///                        |                      ^
///                        +------(failure)-------+
/// ```
///
/// Unauthenticated sessions skip `Authenticating`. `Closed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Uninitialized,
    Authenticating,
    Ready,
    Closed,
}

impl SessionState {
    fn can_transition_to(self, next: SessionState, role: Role) -> bool {
        use SessionState::*;
        match (self, next) {
            (Uninitialized, Authenticating) => role != Role::Unauthenticated,
            (Uninitialized, Ready) => role == Role::Unauthenticated,
            (Uninitialized, Closed) => true,
            (Authenticating, Ready) | (Authenticating, Closed) => true,
            (Ready, Closed) => true,
            _ => false,
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SessionState::Uninitialized => "uninitialized",
            SessionState::Authenticating => "authenticating",
            SessionState::Ready => "ready",
            SessionState::Closed => "closed",
        };
        f.write_str(s)
    }
}

/// Account a session is logged in as
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub user_id: String,
    pub name: String,
    pub email: Option<String>,
    pub user_type: String,
}

/// An isolated browsing context authenticated as one role
pub struct RoleSession {
    role: Role,
    context: ContextId,
    engine: Arc<dyn BrowserEngine>,
    timeouts: PageTimeouts,
    created_at: DateTime<Utc>,
    identity: Mutex<Option<Identity>>,
    state: Mutex<SessionState>,
}

impl RoleSession {
    pub(crate) fn new(
        role: Role,
        context: ContextId,
        engine: Arc<dyn BrowserEngine>,
        timeouts: PageTimeouts,
    ) -> Self {
        Self {
            role,
            context,
            engine,
            timeouts,
            created_at: Utc::now(),
            identity: Mutex::new(None),
            state: Mutex::new(SessionState::Uninitialized),
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn context(&self) -> ContextId {
        self.context
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn state(&self) -> SessionState {
        *self.state.lock()
    }

    /// Liveness flag: true only while the session can be handed to tests
    pub fn is_ready(&self) -> bool {
        self.state() == SessionState::Ready
    }

    /// Credential material the session was authenticated with (none when unauthenticated)
    pub fn identity(&self) -> Option<Identity> {
        self.identity.lock().clone()
    }

    pub(crate) fn set_identity(&self, identity: Identity) {
        *self.identity.lock() = Some(identity);
    }

    pub(crate) fn transition(&self, next: SessionState) -> E2eResult<()> {
        let mut state = self.state.lock();
        if !state.can_transition_to(next, self.role) {
            return Err(E2eError::InvalidStateTransition {
                from: state.to_string(),
                to: next.to_string(),
            });
        }
        debug!(role = %self.role, from = %*state, to = %next, "session transition");
        *state = next;
        Ok(())
    }

    /// Open a fresh page in this session's context
    ///
    /// Pages share the context's cookies but never each other's history.
    pub async fn new_page(&self) -> E2eResult<Page> {
        if !self.is_ready() {
            return Err(E2eError::Engine(format!(
                "{} session is {}, not ready",
                self.role,
                self.state()
            )));
        }
        if self.role == Role::Unauthenticated {
            self.engine.clear_cookies(self.context).await?;
        }
        let id = self.engine.new_page(self.context).await?;
        Ok(Page::new(self.engine.clone(), id, self.timeouts.clone()))
    }

    /// Release the browsing context. Closing twice is a no-op.
    pub(crate) async fn close(&self) -> E2eResult<()> {
        {
            let mut state = self.state.lock();
            if *state == SessionState::Closed {
                return Ok(());
            }
            *state = SessionState::Closed;
        }
        debug!(role = %self.role, context = %self.context, "closing session context");
        self.engine.close_context(self.context).await
    }
}

impl fmt::Debug for RoleSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RoleSession")
            .field("role", &self.role)
            .field("context", &self.context)
            .field("state", &self.state())
            .field("created_at", &self.created_at)
            .finish()
    }
}
