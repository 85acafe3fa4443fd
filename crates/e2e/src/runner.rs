//! Main test runner that orchestrates the app check, the browser and the session registry

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::config::{E2eConfig, GuestPolicy};
use crate::engine::BrowserEngine;
use crate::error::{E2eError, E2eResult};
use crate::pages::{AdminScreen, Outcome};
use crate::playwright::PlaywrightEngine;
use crate::registry::{LoginAudit, SessionRegistry};
use crate::server::AppServer;
use crate::session::Role;
use crate::spec::TestSpec;

/// Result of running a single test
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestResult {
    pub spec: String,
    pub title: String,
    pub role: Role,
    pub route: String,
    /// 1-based repetition index
    pub iteration: u32,
    pub success: bool,
    pub duration_ms: u64,
    pub error: Option<String>,
    /// The failure came from the role's session fixture, not the assertion
    pub fixture_failure: bool,
}

/// Result of running all tests
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestSuiteResult {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub duration_ms: u64,
    pub results: Vec<TestResult>,
    pub login_audit: LoginAudit,
    /// Roles that were logged in more than once
    pub audit_failures: Vec<String>,
}

impl TestSuiteResult {
    pub fn success(&self) -> bool {
        self.failed == 0 && self.audit_failures.is_empty()
    }
}

/// Which tests to run
#[derive(Debug, Clone, Default)]
pub struct TestFilter {
    pub tag: Option<String>,
    /// Spec name or file stem
    pub name: Option<String>,
    /// Substring of `"<spec> <case title>"`
    pub title: Option<String>,
}

impl TestFilter {
    fn matches_spec(&self, spec: &TestSpec) -> bool {
        if let Some(tag) = &self.tag {
            if !spec.tags.iter().any(|t| t == tag) {
                return false;
            }
        }
        if let Some(name) = &self.name {
            let stem_matches = spec
                .source
                .as_ref()
                .and_then(|p| p.file_stem())
                .map(|s| s.to_string_lossy() == name.as_str())
                .unwrap_or(false);
            if spec.name != *name && !stem_matches {
                return false;
            }
        }
        true
    }

    fn matches_title(&self, spec: &TestSpec, title: &str) -> bool {
        match &self.title {
            Some(filter) => format!("{} {}", spec.name, title).contains(filter.as_str()),
            None => true,
        }
    }
}

/// A single (role, screen) navigation scheduled for a run
#[derive(Debug, Clone)]
pub struct PlannedTest {
    pub spec: String,
    pub title: String,
    pub role: Role,
    pub screen: AdminScreen,
    pub outcome: Outcome,
    pub iteration: u32,
}

/// Configuration for the test runner
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    pub e2e: E2eConfig,
    pub specs_dir: PathBuf,
    pub output_dir: PathBuf,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            e2e: E2eConfig::default(),
            specs_dir: PathBuf::from("specs"),
            output_dir: PathBuf::from("test-results"),
        }
    }
}

/// Main E2E test runner
pub struct TestRunner {
    config: E2eConfig,

    /// Test specs directory
    specs_dir: PathBuf,

    /// Output directory for results
    output_dir: PathBuf,
}

impl TestRunner {
    /// Create a new test runner with default configuration
    pub fn new() -> Self {
        Self::with_config(RunnerConfig::default())
    }

    /// Create a test runner with custom configuration
    pub fn with_config(config: RunnerConfig) -> Self {
        Self {
            config: config.e2e,
            specs_dir: config.specs_dir,
            output_dir: config.output_dir,
        }
    }

    pub fn config(&self) -> &E2eConfig {
        &self.config
    }

    /// Load the specs selected by `filter`
    pub fn load_specs(&self, filter: &TestFilter) -> E2eResult<Vec<TestSpec>> {
        let specs = TestSpec::load_all(&self.specs_dir)?;
        Ok(specs.into_iter().filter(|s| filter.matches_spec(s)).collect())
    }

    /// Expand specs into individual tests, one per case repetition
    pub fn plan(specs: &[TestSpec], filter: &TestFilter) -> Vec<PlannedTest> {
        let mut planned = Vec::new();
        for spec in specs.iter().filter(|s| filter.matches_spec(s)) {
            for case in spec
                .cases
                .iter()
                .filter(|c| filter.matches_title(spec, &c.title))
            {
                for iteration in 1..=case.repeat {
                    planned.push(PlannedTest {
                        spec: spec.name.clone(),
                        title: case.title.clone(),
                        role: case.role,
                        screen: spec.screen,
                        outcome: case.outcome(spec.screen),
                        iteration,
                    });
                }
            }
        }
        planned
    }

    /// Check the app is up, launch Playwright, run, and tear everything down
    pub async fn run_with_playwright(&self, filter: &TestFilter) -> E2eResult<TestSuiteResult> {
        self.config.validate()?;
        let base_url = self.config.base_url()?;
        let specs = self.load_specs(filter)?;

        AppServer::new(base_url, &self.config.health_path)
            .wait_until_ready(self.config.timeouts.startup())
            .await?;

        let engine: Arc<dyn BrowserEngine> = Arc::new(
            PlaywrightEngine::launch(
                &self.config.browser,
                base_url,
                self.config.timeouts.startup(),
            )
            .await?,
        );

        let result = self.run(engine.clone(), &specs, filter).await;

        if let Err(e) = engine.shutdown().await {
            warn!("Browser engine shutdown failed: {}", e);
        }
        result
    }

    /// Run specs against an engine with a registry scoped to this call
    pub async fn run(
        &self,
        engine: Arc<dyn BrowserEngine>,
        specs: &[TestSpec],
        filter: &TestFilter,
    ) -> E2eResult<TestSuiteResult> {
        let start = Instant::now();
        let planned = Self::plan(specs, filter);
        let registry = SessionRegistry::new(engine, &self.config);
        let test_timeout = self.test_timeout();

        info!("Running {} test(s)...", planned.len());

        let mut results: Vec<TestResult> = stream::iter(planned)
            .map(|test| {
                let registry = registry.clone();
                async move { run_test(&registry, test, test_timeout).await }
            })
            .buffer_unordered(self.config.workers.max(1))
            .collect()
            .await;

        results.sort_by(|a, b| {
            (a.spec.as_str(), a.title.as_str(), a.iteration)
                .cmp(&(b.spec.as_str(), b.title.as_str(), b.iteration))
        });

        let login_audit = registry.login_audit();
        let audit_failures = self.audit_failures(&login_audit);
        for failure in &audit_failures {
            error!("✗ {}", failure);
        }

        if let Err(e) = registry.shutdown().await {
            warn!("Session teardown failed: {}", e);
        }

        let passed = results.iter().filter(|r| r.success).count();
        let failed = results.len() - passed;
        let duration_ms = start.elapsed().as_millis() as u64;

        info!("");
        info!(
            "Test Results: {} passed, {} failed, {} skipped ({} ms)",
            passed, failed, 0, duration_ms
        );

        Ok(TestSuiteResult {
            total: results.len(),
            passed,
            failed,
            skipped: 0,
            duration_ms,
            results,
            login_audit,
            audit_failures,
        })
    }

    fn audit_failures(&self, audit: &LoginAudit) -> Vec<String> {
        audit
            .duplicated()
            .into_iter()
            .filter(|role| !(*role == Role::Guest && self.config.guest_policy == GuestPolicy::PerTest))
            .map(|role| {
                format!(
                    "{} session logged in {} times in one run",
                    role,
                    audit.logins(role)
                )
            })
            .collect()
    }

    /// Upper bound for one test: login, navigation and assertion back to back
    fn test_timeout(&self) -> Duration {
        let t = &self.config.timeouts;
        t.login() + t.navigation() + t.assertion() + Duration::from_secs(5)
    }

    /// Write test results to JSON file
    pub fn write_results(&self, results: &TestSuiteResult) -> E2eResult<PathBuf> {
        std::fs::create_dir_all(&self.output_dir)?;

        let path = self.output_dir.join("test-results.json");
        let json = serde_json::to_string_pretty(results)?;
        std::fs::write(&path, json)?;

        info!("Results written to: {}", path.display());
        Ok(path)
    }
}

impl Default for TestRunner {
    fn default() -> Self {
        Self::new()
    }
}

async fn run_test(registry: &SessionRegistry, test: PlannedTest, limit: Duration) -> TestResult {
    let start = Instant::now();
    debug!("Running test: {} / {} (#{})", test.spec, test.title, test.iteration);

    let outcome = match tokio::time::timeout(limit, execute(registry, &test)).await {
        Ok(outcome) => outcome,
        Err(_) => Err(E2eError::Timeout(format!("test exceeded {:?}", limit))),
    };
    let duration_ms = start.elapsed().as_millis() as u64;

    let label = format!("{} › {} [{}]", test.spec, test.title, test.role);
    match &outcome {
        Ok(()) => info!("✓ {} ({} ms)", label, duration_ms),
        Err(e) => error!("✗ {} - {}", label, e),
    }

    TestResult {
        spec: test.spec,
        title: test.title,
        role: test.role,
        route: test.screen.route().to_string(),
        iteration: test.iteration,
        success: outcome.is_ok(),
        duration_ms,
        fixture_failure: outcome.as_ref().err().map(|e| e.is_fixture_failure()).unwrap_or(false),
        error: outcome.err().map(|e| e.to_string()),
    }
}

/// Navigate through the screen's page object and check the rendered outcome
async fn execute(registry: &SessionRegistry, test: &PlannedTest) -> E2eResult<()> {
    let page = registry.page_for(test.role).await?;

    let result = async {
        test.screen.visit(&page).await?;
        test.outcome.verify(&page).await
    }
    .await;

    if let Err(e) = page.close().await {
        warn!("Failed to close page: {}", e);
    }
    result
}
