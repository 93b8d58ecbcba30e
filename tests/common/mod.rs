#![allow(dead_code)]

use std::{
    path::Path,
    sync::{Arc, Mutex, MutexGuard},
    time::Duration,
};

use tokio::sync::mpsc::UnboundedReceiver;

use leadcrawler::{
    crawler::{CrawlSession, Pacing, SessionHandle, SessionOptions, SessionOptionsBuilder},
    driver::{Control, Driver, DriverError, DriverFactory, KillSwitch, RowIdentity},
    reporter::Reporter,
    types::{Credentials, EventStatus, ProgressEvent, SessionOutcome},
};

pub const HOME: &str = "https://fake.test/home";
pub const LOGIN: &str = "https://fake.test/login";
pub const SEARCH: &str = "https://fake.test/search?savedSearchId=42";

const ROW_HEIGHT: u64 = 100;

#[derive(Debug, Clone)]
pub struct FakeRow {
    pub name: Option<String>,
    pub profile_url: String,
    pub connect_enabled: bool,
    pub note_field: bool,
    pub send_enabled: bool,
}

impl FakeRow {
    pub fn new(name: &str, profile_url: &str) -> Self {
        FakeRow {
            name: Some(name.into()),
            profile_url: profile_url.into(),
            connect_enabled: true,
            note_field: true,
            send_enabled: true,
        }
    }

    pub fn nameless(profile_url: &str) -> Self {
        FakeRow {
            name: None,
            ..FakeRow::new("", profile_url)
        }
    }

    pub fn connect_disabled(mut self) -> Self {
        self.connect_enabled = false;
        self
    }

    pub fn without_note_field(mut self) -> Self {
        self.note_field = false;
        self
    }

    pub fn send_disabled(mut self) -> Self {
        self.send_enabled = false;
        self
    }
}

/// `pages` pages of `per_page` distinct leads each.
pub fn grid(pages: usize, per_page: usize) -> Vec<Vec<FakeRow>> {
    (0..pages)
        .map(|p| {
            (0..per_page)
                .map(|r| {
                    FakeRow::new(
                        &format!("lead {}-{}", p + 1, r + 1),
                        &format!("https://fake.test/lead/{}-{}", p + 1, r + 1),
                    )
                })
                .collect()
        })
        .collect()
}

/// A scripted results page. Everything the session did to it is recorded.
#[derive(Debug, Default)]
pub struct FakeState {
    pub pages: Vec<Vec<FakeRow>>,
    pub page: usize,
    pub pages_visited: Vec<usize>,
    // rows rendered up front and per scroll to the bottom, all at once when unset
    pub lazy: Option<(usize, usize)>,
    pub loaded: usize,
    pub require_login: bool,
    pub logged_in: bool,
    pub login_works: bool,
    pub location: String,
    pub typed_email: String,
    pub typed_password: String,
    pub open_menu: Option<usize>,
    pub connect_clicked: bool,
    pub note_text: String,
    pub sent: Vec<(String, String)>,
    pub killed: bool,
    pub closed: bool,
    pub fail_launch: bool,
    pub panic_on_launch: bool,
    pub launches: usize,
    // 1-based pages whose results container never renders
    pub broken_pages: Vec<usize>,
    // "next" looks enabled but clicking it fails
    pub next_page_fault: bool,
    pub stop_after_sends: Option<(usize, SessionHandle)>,
}

impl FakeState {
    fn on_search(&self) -> bool {
        self.location == SEARCH
    }

    fn rows(&self) -> &[FakeRow] {
        self.pages.get(self.page).map(Vec::as_slice).unwrap_or(&[])
    }

    fn show_page(&mut self, page: usize) {
        self.page = page;
        self.pages_visited.push(page + 1);
        let total = self.rows().len();
        self.loaded = match self.lazy {
            Some((initial, _)) => initial.min(total),
            None => total,
        };
        self.reset_flow();
    }

    fn reset_flow(&mut self) {
        self.open_menu = None;
        self.connect_clicked = false;
        self.note_text.clear();
    }

    fn open_row(&self) -> Option<&FakeRow> {
        self.open_menu.and_then(|i| self.rows().get(i))
    }

    fn present(&self, control: Control) -> bool {
        match control {
            Control::LoginEmail | Control::LoginPassword => self.location.starts_with(LOGIN),
            Control::AuthenticatedMarker => self.logged_in && !self.location.starts_with(LOGIN),
            Control::ResultsContainer => {
                self.on_search() && !self.broken_pages.contains(&(self.page + 1))
            }
            Control::NextPage => self.on_search(),
            Control::RowMenu(i) => self.on_search() && i < self.loaded,
            Control::ConnectButton => self.open_row().is_some(),
            Control::NoteField | Control::SendButton => {
                self.connect_clicked && self.open_row().map(|r| r.note_field).unwrap_or(false)
            }
        }
    }
}

#[derive(Clone, Default)]
pub struct Fake {
    state: Arc<Mutex<FakeState>>,
}

impl Fake {
    pub fn new(pages: Vec<Vec<FakeRow>>) -> Self {
        let fake = Fake::default();
        fake.state().pages = pages;
        fake
    }

    pub fn state(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn factory(&self) -> Arc<dyn DriverFactory> {
        Arc::new(self.clone())
    }
}

impl DriverFactory for Fake {
    fn launch(&self) -> Result<Box<dyn Driver>, DriverError> {
        let mut state = self.state();
        if state.fail_launch {
            return Err(DriverError::Init("no browser binary".into()));
        }
        if state.panic_on_launch {
            drop(state);
            panic!("browser crashed while starting");
        }
        state.launches += 1;
        Ok(Box::new(FakeDriver {
            state: self.state.clone(),
        }))
    }
}

pub struct FakeDriver {
    state: Arc<Mutex<FakeState>>,
}

impl FakeDriver {
    fn live(&self) -> Result<MutexGuard<'_, FakeState>, DriverError> {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if state.killed || state.closed {
            return Err(DriverError::Released);
        }
        Ok(state)
    }
}

impl Driver for FakeDriver {
    fn navigate(&mut self, url: &str) -> Result<(), DriverError> {
        let mut s = self.live()?;
        if url == SEARCH && s.require_login && !s.logged_in {
            s.location = format!("{}?session_redirect=search", LOGIN);
            return Ok(());
        }
        s.location = url.to_string();
        if url == SEARCH {
            s.show_page(0);
        }
        Ok(())
    }

    fn current_url(&mut self) -> Result<String, DriverError> {
        Ok(self.live()?.location.clone())
    }

    fn wait_for(&mut self, control: Control, _timeout: Duration) -> Result<(), DriverError> {
        if self.live()?.present(control) {
            Ok(())
        } else {
            Err(DriverError::ElementNotFound(control.to_string()))
        }
    }

    fn is_enabled(&mut self, control: Control) -> Result<bool, DriverError> {
        let s = self.live()?;
        if !s.present(control) {
            return Err(DriverError::ElementNotFound(control.to_string()));
        }
        Ok(match control {
            Control::ConnectButton => s.open_row().map(|r| r.connect_enabled).unwrap_or(false),
            Control::SendButton => s.open_row().map(|r| r.send_enabled).unwrap_or(false),
            Control::NextPage => s.page + 1 < s.pages.len(),
            _ => true,
        })
    }

    fn click(&mut self, control: Control) -> Result<(), DriverError> {
        let mut s = self.live()?;
        if !s.present(control) {
            return Err(DriverError::ElementNotFound(control.to_string()));
        }
        match control {
            Control::RowMenu(i) => {
                s.reset_flow();
                s.open_menu = Some(i);
            }
            Control::ConnectButton => s.connect_clicked = true,
            Control::SendButton => {
                let name = s.open_row().and_then(|r| r.name.clone()).unwrap_or_default();
                let note = s.note_text.clone();
                s.sent.push((name, note));
                s.reset_flow();

                let sent = s.sent.len();
                let stop = match &s.stop_after_sends {
                    Some((n, handle)) if *n == sent => Some(handle.clone()),
                    _ => None,
                };
                // the kill switch locks the state too
                drop(s);
                if let Some(handle) = stop {
                    handle.stop();
                }
            }
            Control::NextPage => {
                let next = s.page + 1;
                if s.next_page_fault || next >= s.pages.len() {
                    return Err(DriverError::NotInteractable(control.to_string()));
                }
                s.show_page(next);
            }
            _ => {}
        }
        Ok(())
    }

    fn type_text(&mut self, control: Control, text: &str) -> Result<(), DriverError> {
        let mut s = self.live()?;
        match control {
            Control::LoginEmail => s.typed_email.push_str(text),
            Control::LoginPassword => s.typed_password.push_str(text),
            Control::NoteField if s.present(control) => s.note_text.push_str(text),
            _ => return Err(DriverError::ElementNotFound(control.to_string())),
        }
        Ok(())
    }

    fn submit(&mut self, control: Control) -> Result<(), DriverError> {
        let mut s = self.live()?;
        if control != Control::LoginPassword {
            return Err(DriverError::NotInteractable(control.to_string()));
        }
        if s.login_works {
            s.logged_in = true;
            s.location = HOME.into();
        }
        Ok(())
    }

    fn scroll_height(&mut self) -> Result<u64, DriverError> {
        Ok(self.live()?.loaded as u64 * ROW_HEIGHT)
    }

    fn scroll_to(&mut self, offset: u64) -> Result<(), DriverError> {
        let mut s = self.live()?;
        let height = s.loaded as u64 * ROW_HEIGHT;
        if offset >= height {
            if let Some((_, chunk)) = s.lazy {
                let total = s.rows().len();
                s.loaded = (s.loaded + chunk).min(total);
            }
        }
        Ok(())
    }

    fn row_count(&mut self) -> Result<usize, DriverError> {
        Ok(self.live()?.loaded)
    }

    fn row_identity(&mut self, row: usize) -> Result<RowIdentity, DriverError> {
        let s = self.live()?;
        let r = s
            .rows()
            .get(row)
            .ok_or_else(|| DriverError::ElementNotFound(format!("row {}", row + 1)))?;
        let name = r
            .name
            .clone()
            .ok_or_else(|| DriverError::ElementNotFound("lead name".into()))?;
        Ok(RowIdentity {
            name,
            profile_url: r.profile_url.clone(),
        })
    }

    fn kill_switch(&self) -> KillSwitch {
        let state = self.state.clone();
        KillSwitch::new(move || {
            let mut s = state.lock().unwrap_or_else(|e| e.into_inner());
            if s.killed || s.closed {
                return false;
            }
            s.killed = true;
            true
        })
    }

    fn close(&mut self) {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).closed = true;
    }
}

pub fn options(dir: &Path) -> SessionOptionsBuilder {
    let mut b = SessionOptions::default_builder();
    b.search_url(SEARCH)
        .credentials(Credentials::new("me@example.com", "hunter2"))
        .store_dir(dir)
        .pacing(Pacing::none())
        .home_url(HOME)
        .login_url(LOGIN);
    b
}

pub fn prepare(fake: &Fake, options: SessionOptions) -> (CrawlSession, UnboundedReceiver<ProgressEvent>) {
    let (reporter, rx) = Reporter::channel("test");
    (CrawlSession::new("test", options, fake.factory(), reporter), rx)
}

pub fn drain(rx: &mut UnboundedReceiver<ProgressEvent>) -> Vec<ProgressEvent> {
    let mut events = vec![];
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

/// Runs a session to the end on this thread and returns every event it emitted.
pub fn run(fake: &Fake, options: SessionOptions) -> (SessionOutcome, Vec<ProgressEvent>) {
    let (session, mut rx) = prepare(fake, options);
    let outcome = session.run();
    (outcome, drain(&mut rx))
}

pub fn with_status(events: &[ProgressEvent], status: EventStatus) -> Vec<&ProgressEvent> {
    events.iter().filter(|e| e.status == status).collect()
}

pub fn has_message(events: &[ProgressEvent], needle: &str) -> bool {
    events.iter().any(|e| e.message.contains(needle))
}
