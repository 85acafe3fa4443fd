//! Harness configuration
//!
//! Defaults, then an optional TOML file, then `THUNDERDOME_E2E_*` environment
//! variables. The harness binary applies CLI flags last; clap binds the
//! environment variables for those flags itself (`THUNDERDOME_E2E_BASE_URL`,
//! `_BROWSER`, `_HEADLESS`, `_GUEST_POLICY`, `_WORKERS`).

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{E2eError, E2eResult};
use crate::playwright::Browser;

pub const ENV_PREFIX: &str = "THUNDERDOME_E2E_";

/// Top-level harness configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct E2eConfig {
    /// Base URL of the application under test; unset means there is nothing to run against
    pub base_url: Option<String>,

    /// Path polled before the run starts
    pub health_path: String,

    /// Path visited after login to let redirects settle
    pub landing_path: String,

    pub browser: BrowserConfig,

    pub timeouts: TimeoutConfig,

    pub accounts: AccountsConfig,

    pub guest_policy: GuestPolicy,

    /// Maximum number of tests running at once
    pub workers: usize,
}

impl Default for E2eConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            health_path: "/api/healthcheck".to_string(),
            landing_path: "/".to_string(),
            browser: BrowserConfig::default(),
            timeouts: TimeoutConfig::default(),
            accounts: AccountsConfig::default(),
            guest_policy: GuestPolicy::Shared,
            workers: 4,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrowserConfig {
    pub kind: Browser,
    pub headless: bool,

    /// node_modules directory holding the `playwright` package (None = resolve from cwd)
    pub node_modules: Option<PathBuf>,

    pub viewport_width: u32,
    pub viewport_height: u32,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            kind: Browser::Chromium,
            headless: true,
            node_modules: None,
            viewport_width: 1280,
            viewport_height: 720,
        }
    }
}

/// Timeouts in milliseconds
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Whole login sequence including the settle navigation
    pub login_ms: u64,
    pub navigation_ms: u64,
    /// How long `expect_text` keeps retrying
    pub assertion_ms: u64,
    /// Single API request made during login
    pub request_ms: u64,
    /// Application readiness and driver launch
    pub startup_ms: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            login_ms: 30_000,
            navigation_ms: 15_000,
            assertion_ms: 5_000,
            request_ms: 10_000,
            startup_ms: 30_000,
        }
    }
}

impl TimeoutConfig {
    pub fn login(&self) -> Duration {
        Duration::from_millis(self.login_ms)
    }

    pub fn navigation(&self) -> Duration {
        Duration::from_millis(self.navigation_ms)
    }

    pub fn assertion(&self) -> Duration {
        Duration::from_millis(self.assertion_ms)
    }

    pub fn request(&self) -> Duration {
        Duration::from_millis(self.request_ms)
    }

    pub fn startup(&self) -> Duration {
        Duration::from_millis(self.startup_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountCredentials {
    pub name: String,
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AccountsConfig {
    pub registered: AccountCredentials,

    /// Must be an account the application treats as an administrator
    pub admin: AccountCredentials,

    pub guest_name_prefix: String,
}

impl Default for AccountsConfig {
    fn default() -> Self {
        Self {
            registered: AccountCredentials {
                name: "E2E Registered".to_string(),
                email: "e2e-registered@thunderdome.dev".to_string(),
                password: "e2e-registered-password".to_string(),
            },
            admin: AccountCredentials {
                name: "E2E Admin".to_string(),
                email: "e2e-admin@thunderdome.dev".to_string(),
                password: "e2e-admin-password".to_string(),
            },
            guest_name_prefix: "e2e-guest".to_string(),
        }
    }
}

/// How guest identities are shared across tests
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GuestPolicy {
    /// One guest per run, cached like every other role
    #[default]
    Shared,
    /// A uniquely named guest in its own context for every acquisition
    PerTest,
}

impl std::str::FromStr for GuestPolicy {
    type Err = E2eError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "shared" => Ok(GuestPolicy::Shared),
            "per_test" | "per-test" => Ok(GuestPolicy::PerTest),
            other => Err(E2eError::Config(format!("unknown guest policy: {other}"))),
        }
    }
}

impl E2eConfig {
    /// Load configuration from a TOML file, falling back to defaults if it doesn't exist
    pub fn load(path: &Path) -> E2eResult<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            Ok(toml::from_str(&content)?)
        } else {
            Ok(Self::default())
        }
    }

    /// Apply `THUNDERDOME_E2E_*` overrides from the process environment
    pub fn apply_env(&mut self) -> E2eResult<()> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from any key lookup
    pub fn apply_overrides<F>(&mut self, lookup: F) -> E2eResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(&format!("{ENV_PREFIX}{name}"));

        if let Some(v) = var("HEALTH_PATH") {
            self.health_path = v;
        }
        if let Some(v) = var("LANDING_PATH") {
            self.landing_path = v;
        }
        if let Some(v) = var("NODE_MODULES") {
            self.browser.node_modules = Some(PathBuf::from(v));
        }
        if let Some(v) = var("LOGIN_TIMEOUT_MS") {
            self.timeouts.login_ms = parse_number("LOGIN_TIMEOUT_MS", &v)?;
        }
        if let Some(v) = var("NAVIGATION_TIMEOUT_MS") {
            self.timeouts.navigation_ms = parse_number("NAVIGATION_TIMEOUT_MS", &v)?;
        }
        if let Some(v) = var("ASSERTION_TIMEOUT_MS") {
            self.timeouts.assertion_ms = parse_number("ASSERTION_TIMEOUT_MS", &v)?;
        }
        if let Some(v) = var("REGISTERED_EMAIL") {
            self.accounts.registered.email = v;
        }
        if let Some(v) = var("REGISTERED_PASSWORD") {
            self.accounts.registered.password = v;
        }
        if let Some(v) = var("ADMIN_EMAIL") {
            self.accounts.admin.email = v;
        }
        if let Some(v) = var("ADMIN_PASSWORD") {
            self.accounts.admin.password = v;
        }

        Ok(())
    }

    /// Base URL of the application under test
    pub fn base_url(&self) -> E2eResult<&str> {
        self.base_url.as_deref().ok_or_else(|| {
            E2eError::Config(format!(
                "no base_url configured (set it in the config file, {ENV_PREFIX}BASE_URL or --base-url)"
            ))
        })
    }

    /// Reject configurations that cannot produce a working run
    pub fn validate(&self) -> E2eResult<()> {
        let base_url = self.base_url()?;
        if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
            return Err(E2eError::Config(format!(
                "base_url must be an http(s) URL, got {base_url}"
            )));
        }
        if self.workers == 0 {
            return Err(E2eError::Config("workers must be at least 1".to_string()));
        }
        if self.accounts.registered.email == self.accounts.admin.email {
            return Err(E2eError::Config(
                "registered and admin accounts must use different emails".to_string(),
            ));
        }
        // Thunderdome enforces 6..=72 character passwords
        for account in [&self.accounts.registered, &self.accounts.admin] {
            let len = account.password.chars().count();
            if !(6..=72).contains(&len) {
                return Err(E2eError::Config(format!(
                    "password for {} must be 6-72 characters",
                    account.email
                )));
            }
        }
        Ok(())
    }
}

fn parse_number<T: std::str::FromStr>(name: &str, value: &str) -> E2eResult<T> {
    value
        .parse()
        .map_err(|_| E2eError::Config(format!("{ENV_PREFIX}{name}: expected a number, got {value}")))
}
