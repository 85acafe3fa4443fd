//! Thunderdome admin E2E test framework
//!
//! This crate provides a Rust-controlled E2E harness that:
//! - Checks the application under test is up
//! - Drives Playwright through a long-lived Node.js driver (JSON lines)
//! - Keeps one authenticated browsing context per role for the whole run
//! - Runs declarative YAML role x page specs against the admin screens
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    E2E Test Runner (Rust)                   │
//! ├─────────────────────────────────────────────────────────────┤
//! │  TestRunner                                                 │
//! │    ├── AppServer::wait_until_ready()                        │
//! │    ├── PlaywrightEngine::launch() -> dyn BrowserEngine      │
//! │    └── run(specs) -> TestSuiteResult                        │
//! ├─────────────────────────────────────────────────────────────┤
//! │  SessionRegistry (one per run)                              │
//! │    ├── acquire_unauthenticated_session()                    │
//! │    ├── acquire_guest_session()                              │
//! │    ├── acquire_registered_session()                         │
//! │    ├── acquire_admin_session()                              │
//! │    └── shutdown()                                           │
//! ├─────────────────────────────────────────────────────────────┤
//! │  RoleSession -> Page -> PageObject::goto() -> Outcome       │
//! └─────────────────────────────────────────────────────────────┘
//! ```

pub mod auth;
pub mod config;
pub mod engine;
pub mod error;
pub mod page;
pub mod pages;
pub mod playwright;
pub mod registry;
pub mod runner;
pub mod server;
pub mod session;
pub mod spec;

pub use config::{E2eConfig, GuestPolicy};
pub use engine::BrowserEngine;
pub use error::{E2eError, E2eResult};
pub use page::{Locator, Page};
pub use pages::{AdminGamesPage, AdminTeamsPage, Outcome, PageObject};
pub use registry::SessionRegistry;
pub use runner::TestRunner;
pub use session::{Role, RoleSession, SessionState};
pub use spec::{TestCase, TestSpec};
