//! The seam between the crawl engine and the browser.
//!
//! Flows in `extractor`, `connector` and `crawler` only talk to [`Driver`], so
//! they can run against Chrome (see `browser_controller`) or a scripted page
//! in tests.

use std::{fmt, sync::Arc, time::Duration};

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DriverError {
    #[error("driver_init: {0}")]
    Init(String),
    #[error("navigation: {0}")]
    Navigation(String),
    #[error("element_not_found: {0}")]
    ElementNotFound(String),
    #[error("element_not_interactable: {0}")]
    NotInteractable(String),
    #[error("script: {0}")]
    Script(String),
    #[error("browser released")]
    Released,
}

/// Page elements the engine interacts with, independent of their selectors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Control {
    LoginEmail,
    LoginPassword,
    /// Only present once signed in.
    AuthenticatedMarker,
    ResultsContainer,
    /// Overflow-actions menu of the given result row.
    RowMenu(usize),
    ConnectButton,
    NoteField,
    SendButton,
    NextPage,
}

impl fmt::Display for Control {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Control::LoginEmail => write!(f, "login email field"),
            Control::LoginPassword => write!(f, "login password field"),
            Control::AuthenticatedMarker => write!(f, "authenticated marker"),
            Control::ResultsContainer => write!(f, "results container"),
            Control::RowMenu(i) => write!(f, "actions menu of row {}", i + 1),
            Control::ConnectButton => write!(f, "'Connect' button"),
            Control::NoteField => write!(f, "note field"),
            Control::SendButton => write!(f, "'Send' button"),
            Control::NextPage => write!(f, "next page button"),
        }
    }
}

/// Name element of a result row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowIdentity {
    pub name: String,
    pub profile_url: String,
}

pub trait Driver {
    fn navigate(&mut self, url: &str) -> Result<(), DriverError>;

    fn current_url(&mut self) -> Result<String, DriverError>;

    /// Polls until `control` is present, failing with `ElementNotFound` once
    /// `timeout` has elapsed.
    fn wait_for(&mut self, control: Control, timeout: Duration) -> Result<(), DriverError>;

    fn is_enabled(&mut self, control: Control) -> Result<bool, DriverError>;

    fn click(&mut self, control: Control) -> Result<(), DriverError>;

    /// Appends `text` to the field, without clearing it first.
    fn type_text(&mut self, control: Control, text: &str) -> Result<(), DriverError>;

    fn submit(&mut self, control: Control) -> Result<(), DriverError>;

    /// Scrollable height of the results container, in pixels.
    fn scroll_height(&mut self) -> Result<u64, DriverError>;

    fn scroll_to(&mut self, offset: u64) -> Result<(), DriverError>;

    fn row_count(&mut self) -> Result<usize, DriverError>;

    fn row_identity(&mut self, row: usize) -> Result<RowIdentity, DriverError>;

    /// A handle able to tear the browser down from another thread.
    fn kill_switch(&self) -> KillSwitch;

    fn close(&mut self);
}

pub trait DriverFactory: Send + Sync {
    fn launch(&self) -> Result<Box<dyn Driver>, DriverError>;
}

#[derive(Clone)]
pub struct KillSwitch(Arc<dyn Fn() -> bool + Send + Sync>);

impl KillSwitch {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn() -> bool + Send + Sync + 'static,
    {
        KillSwitch(Arc::new(f))
    }

    /// Returns whether something was actually torn down.
    pub fn fire(&self) -> bool {
        (self.0)()
    }
}

impl fmt::Debug for KillSwitch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("KillSwitch")
    }
}
