//! Declarative YAML test specification
//!
//! One file describes one admin screen and the outcome each role must see
//! when navigating to it.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{E2eError, E2eResult};
use crate::pages::{AdminScreen, Outcome};
use crate::session::Role;

/// A complete test specification parsed from YAML
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestSpec {
    /// Unique name for this spec
    pub name: String,

    /// Human-readable description
    #[serde(default)]
    pub description: String,

    /// Tags for filtering
    #[serde(default)]
    pub tags: Vec<String>,

    /// Screen every case navigates to
    pub screen: AdminScreen,

    pub cases: Vec<TestCase>,

    /// File the spec was loaded from
    #[serde(skip)]
    pub source: Option<PathBuf>,
}

/// One role's expectation for the spec's screen
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestCase {
    pub title: String,

    pub role: Role,

    pub expect: Expectation,

    /// Heading override for `admin_view`; defaults to the screen's title
    #[serde(default)]
    pub heading: Option<String>,

    /// Run the case this many times in the same run
    #[serde(default = "default_repeat")]
    pub repeat: u32,
}

fn default_repeat() -> u32 {
    1
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Expectation {
    Login,
    Landing,
    AdminView,
}

impl TestCase {
    pub fn outcome(&self, screen: AdminScreen) -> Outcome {
        match self.expect {
            Expectation::Login => Outcome::Login,
            Expectation::Landing => Outcome::Landing,
            Expectation::AdminView => Outcome::AdminView {
                heading: self
                    .heading
                    .clone()
                    .unwrap_or_else(|| screen.title().to_string()),
            },
        }
    }
}

impl TestSpec {
    /// Parse a test spec from YAML string
    pub fn from_yaml(yaml: &str) -> E2eResult<Self> {
        let spec: Self = serde_yaml::from_str(yaml)?;
        spec.validate()?;
        Ok(spec)
    }

    /// Parse a test spec from a YAML file
    pub fn from_file(path: &Path) -> E2eResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let mut spec = Self::from_yaml(&content)
            .map_err(|e| E2eError::SpecParse(format!("{}: {}", path.display(), e)))?;
        spec.source = Some(path.to_path_buf());
        Ok(spec)
    }

    /// Load all test specs from a directory, ordered by path
    pub fn load_all(dir: &Path) -> E2eResult<Vec<Self>> {
        let mut specs = Vec::new();

        for entry in walkdir::WalkDir::new(dir)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| {
                e.path()
                    .extension()
                    .map(|ext| ext == "yaml" || ext == "yml")
                    .unwrap_or(false)
            })
        {
            specs.push(Self::from_file(entry.path())?);
        }

        Ok(specs)
    }

    /// Filter specs by tag
    pub fn filter_by_tag<'a>(specs: &'a [Self], tag: &str) -> Vec<&'a Self> {
        specs.iter().filter(|s| s.tags.iter().any(|t| t == tag)).collect()
    }

    fn validate(&self) -> E2eResult<()> {
        if self.cases.is_empty() {
            return Err(E2eError::SpecParse(format!("{}: no cases", self.name)));
        }
        for case in &self.cases {
            if case.repeat == 0 {
                return Err(E2eError::SpecParse(format!(
                    "{} / {}: repeat must be at least 1",
                    self.name, case.title
                )));
            }
            if case.heading.is_some() && case.expect != Expectation::AdminView {
                return Err(E2eError::SpecParse(format!(
                    "{} / {}: heading only applies to admin_view",
                    self.name, case.title
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const GAMES: &str = r#"
name: admin-poker-games
description: The Admin Poker Games Page
tags:
  - admin
screen: games
cases:
  - title: redirects to login
    role: unauthenticated
    expect: login
  - title: redirects to landing
    role: guest
    expect: landing
  - title: loads Games page
    role: admin
    expect: admin_view
    repeat: 2
"#;

    #[test]
    fn test_parse_simple_spec() {
        let spec = TestSpec::from_yaml(GAMES).unwrap();
        assert_eq!(spec.name, "admin-poker-games");
        assert_eq!(spec.screen, AdminScreen::Games);
        assert_eq!(spec.cases.len(), 3);
        assert_eq!(spec.cases[0].role, Role::Unauthenticated);
        assert_eq!(spec.cases[0].repeat, 1);
        assert_eq!(spec.cases[2].repeat, 2);
    }

    #[test]
    fn admin_view_defaults_to_screen_title() {
        let spec = TestSpec::from_yaml(GAMES).unwrap();
        assert_eq!(
            spec.cases[2].outcome(spec.screen),
            Outcome::AdminView {
                heading: "Battles".to_string()
            }
        );
        assert_eq!(spec.cases[1].outcome(spec.screen), Outcome::Landing);
    }

    #[test]
    fn heading_on_redirect_case_is_rejected() {
        let yaml = r#"
name: bad
screen: teams
cases:
  - title: nonsense
    role: guest
    expect: landing
    heading: Teams
"#;
        assert!(matches!(TestSpec::from_yaml(yaml), Err(E2eError::SpecParse(_))));
    }

    #[test]
    fn empty_cases_are_rejected() {
        let yaml = "name: empty\nscreen: teams\ncases: []\n";
        assert!(TestSpec::from_yaml(yaml).is_err());
    }

    #[test]
    fn unknown_role_is_a_parse_error() {
        let yaml = r#"
name: bad-role
screen: teams
cases:
  - title: root
    role: superuser
    expect: landing
"#;
        assert!(TestSpec::from_yaml(yaml).is_err());
    }

    #[test]
    fn loads_directory_in_order() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("b-games.yaml"), GAMES).unwrap();
        std::fs::write(
            dir.path().join("a-teams.yml"),
            "name: teams\ntags: [admin, smoke]\nscreen: teams\ncases:\n  - title: t\n    role: admin\n    expect: admin_view\n",
        )
        .unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let specs = TestSpec::load_all(dir.path()).unwrap();
        assert_eq!(specs.len(), 2);
        assert_eq!(specs[0].name, "teams");
        assert!(specs[0].source.is_some());
        assert_eq!(TestSpec::filter_by_tag(&specs, "smoke").len(), 1);
        assert_eq!(TestSpec::filter_by_tag(&specs, "admin").len(), 2);
    }
}
