//! Page objects for the admin screens and the outcomes they can render

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::engine::Navigation;
use crate::error::E2eResult;
use crate::page::Page;

/// Primary heading of the landing page
pub const LANDING_HEADING: &str = "Thunderdome is an Agile Planning Poker app with a fun theme";

pub const LOGIN_TITLE_SELECTOR: &str = r#"[data-formtitle="login"]"#;
pub const LOGIN_TITLE: &str = "Login";
pub const HEADING_SELECTOR: &str = "h1";

/// Navigation wrapper for one screen
#[async_trait]
pub trait PageObject: Sync {
    const ROUTE: &'static str;

    /// Heading the screen renders for an administrator
    const TITLE: &'static str;

    fn page(&self) -> &Page;

    async fn goto(&self) -> E2eResult<Navigation> {
        self.page().goto(Self::ROUTE).await
    }
}

/// Admin poker games screen
pub struct AdminGamesPage<'a> {
    page: &'a Page,
}

impl<'a> AdminGamesPage<'a> {
    pub fn new(page: &'a Page) -> Self {
        Self { page }
    }
}

impl PageObject for AdminGamesPage<'_> {
    const ROUTE: &'static str = "/admin/battles";
    const TITLE: &'static str = "Battles";

    fn page(&self) -> &Page {
        self.page
    }
}

pub struct AdminTeamsPage<'a> {
    page: &'a Page,
}

impl<'a> AdminTeamsPage<'a> {
    pub fn new(page: &'a Page) -> Self {
        Self { page }
    }
}

impl PageObject for AdminTeamsPage<'_> {
    const ROUTE: &'static str = "/admin/teams";
    const TITLE: &'static str = "Teams";

    fn page(&self) -> &Page {
        self.page
    }
}

pub struct AdminUsersPage<'a> {
    page: &'a Page,
}

impl<'a> AdminUsersPage<'a> {
    pub fn new(page: &'a Page) -> Self {
        Self { page }
    }
}

impl PageObject for AdminUsersPage<'_> {
    const ROUTE: &'static str = "/admin/users";
    const TITLE: &'static str = "Users";

    fn page(&self) -> &Page {
        self.page
    }
}

pub struct AdminOrganizationsPage<'a> {
    page: &'a Page,
}

impl<'a> AdminOrganizationsPage<'a> {
    pub fn new(page: &'a Page) -> Self {
        Self { page }
    }
}

impl PageObject for AdminOrganizationsPage<'_> {
    const ROUTE: &'static str = "/admin/organizations";
    const TITLE: &'static str = "Organizations";

    fn page(&self) -> &Page {
        self.page
    }
}

/// Admin screens addressable from spec files
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdminScreen {
    #[serde(alias = "battles")]
    Games,
    Teams,
    Users,
    Organizations,
}

impl AdminScreen {
    pub fn route(&self) -> &'static str {
        match self {
            AdminScreen::Games => AdminGamesPage::ROUTE,
            AdminScreen::Teams => AdminTeamsPage::ROUTE,
            AdminScreen::Users => AdminUsersPage::ROUTE,
            AdminScreen::Organizations => AdminOrganizationsPage::ROUTE,
        }
    }

    pub fn title(&self) -> &'static str {
        match self {
            AdminScreen::Games => AdminGamesPage::TITLE,
            AdminScreen::Teams => AdminTeamsPage::TITLE,
            AdminScreen::Users => AdminUsersPage::TITLE,
            AdminScreen::Organizations => AdminOrganizationsPage::TITLE,
        }
    }

    /// Navigate `page` to this screen through its page object
    pub async fn visit(&self, page: &Page) -> E2eResult<Navigation> {
        match self {
            AdminScreen::Games => AdminGamesPage::new(page).goto().await,
            AdminScreen::Teams => AdminTeamsPage::new(page).goto().await,
            AdminScreen::Users => AdminUsersPage::new(page).goto().await,
            AdminScreen::Organizations => AdminOrganizationsPage::new(page).goto().await,
        }
    }
}

/// Observable result of visiting an admin route
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    /// Redirected to the login form
    Login,
    /// Redirected to the landing page
    Landing,
    /// The admin screen itself, identified by its heading
    AdminView { heading: String },
}

impl Outcome {
    pub fn selector(&self) -> &'static str {
        match self {
            Outcome::Login => LOGIN_TITLE_SELECTOR,
            Outcome::Landing | Outcome::AdminView { .. } => HEADING_SELECTOR,
        }
    }

    pub fn expected_text(&self) -> &str {
        match self {
            Outcome::Login => LOGIN_TITLE,
            Outcome::Landing => LANDING_HEADING,
            Outcome::AdminView { heading } => heading,
        }
    }

    /// Assert the page currently renders this outcome
    pub async fn verify(&self, page: &Page) -> E2eResult<()> {
        page.locator(self.selector())
            .expect_text(self.expected_text())
            .await
    }
}
