//! Error types for E2E testing

use thiserror::Error;

use crate::session::Role;

#[derive(Error, Debug)]
pub enum E2eError {
    #[error("Application not ready after {0} health check attempts")]
    ServerHealthCheck(usize),

    #[error("Playwright not found. Install with: npm install playwright && npx playwright install")]
    PlaywrightNotFound,

    #[error("Playwright driver error: {0}")]
    Driver(String),

    #[error("Browser engine error: {0}")]
    Engine(String),

    #[error("Authentication failed for {role} session: {reason}")]
    AuthenticationFailure { role: Role, reason: String },

    #[error("Navigation to {path} failed: {reason}")]
    NavigationFailure { path: String, reason: String },

    #[error("Assertion failed on '{selector}'\n  expected: {expected:?}\n  actual:   {}", display_actual(.actual))]
    AssertionFailure {
        selector: String,
        expected: String,
        actual: Option<String>,
    },

    #[error("Invalid session state transition: {from} -> {to}")]
    InvalidStateTransition { from: String, to: String },

    #[error("Test spec parse error: {0}")]
    SpecParse(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Timeout waiting for: {0}")]
    Timeout(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

fn display_actual(actual: &Option<String>) -> String {
    match actual {
        Some(text) => format!("{text:?}"),
        None => "<no element>".to_string(),
    }
}

impl E2eError {
    /// Whether this failure came from a session fixture rather than the test body
    pub fn is_fixture_failure(&self) -> bool {
        matches!(
            self,
            E2eError::AuthenticationFailure { .. } | E2eError::Engine(_) | E2eError::Driver(_)
        )
    }
}

pub type E2eResult<T> = Result<T, E2eError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assertion_failure_shows_expected_and_actual() {
        let err = E2eError::AssertionFailure {
            selector: "h1".to_string(),
            expected: "Battles".to_string(),
            actual: Some("Thunderdome".to_string()),
        };
        let msg = err.to_string();
        assert!(msg.contains("expected: \"Battles\""));
        assert!(msg.contains("actual:   \"Thunderdome\""));
    }

    #[test]
    fn assertion_failure_without_element() {
        let err = E2eError::AssertionFailure {
            selector: "h1".to_string(),
            expected: "Battles".to_string(),
            actual: None,
        };
        assert!(err.to_string().contains("<no element>"));
    }

    #[test]
    fn authentication_failure_is_fixture_failure() {
        let err = E2eError::AuthenticationFailure {
            role: Role::Admin,
            reason: "INVALID_LOGIN".to_string(),
        };
        assert!(err.is_fixture_failure());
        assert_eq!(
            err.to_string(),
            "Authentication failed for admin session: INVALID_LOGIN"
        );
    }
}
