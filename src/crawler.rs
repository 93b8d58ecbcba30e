use std::{
    path::PathBuf,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use crate::{
    connector::{type_like_human, ConnectionRequest},
    driver::{Control, Driver, DriverError, DriverFactory, KillSwitch},
    extractor::LeadExtractor,
    reporter::Reporter,
    store::LeadStore,
    types::{Candidate, CrawlError, Credentials, EventStatus, Lead, SessionOutcome, SessionStatus},
    utils::{is_login_redirect, today, DB_DIR, HOME_URL, LOGIN_URL},
};

pub const DEFAULT_NOTE: &str = "Hi! I'd love to connect and learn more about your work.";

/// A randomized delay, drawn uniformly from `[min, max]` on every pause.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pace {
    pub min: Duration,
    pub max: Duration,
}

impl Pace {
    pub const fn between_ms(min: u64, max: u64) -> Self {
        Pace {
            min: Duration::from_millis(min),
            max: Duration::from_millis(max),
        }
    }

    pub const fn fixed_ms(ms: u64) -> Self {
        Self::between_ms(ms, ms)
    }

    pub const fn none() -> Self {
        Self::fixed_ms(0)
    }

    pub fn pause(&self) {
        crate::utils::pause(self.min, self.max)
    }
}

/// Human-like pacing of the UI flows. The jitter keeps the session from
/// firing actions in machine-regular bursts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pacing {
    pub typing: Pace,
    pub after_click: Pace,
    pub after_send: Pace,
    pub after_navigation: Pace,
    pub between_pages: Pace,
    pub scroll_step: Pace,
    pub scroll_settle: Pace,
    pub after_scroll_reset: Pace,
    pub login_settle: Pace,
}

impl Default for Pacing {
    fn default() -> Self {
        Pacing {
            typing: Pace::between_ms(50, 150),
            after_click: Pace::between_ms(1000, 2000),
            after_send: Pace::between_ms(2000, 3000),
            after_navigation: Pace::between_ms(2000, 4000),
            between_pages: Pace::between_ms(3000, 5000),
            scroll_step: Pace::fixed_ms(1000),
            scroll_settle: Pace::fixed_ms(5000),
            after_scroll_reset: Pace::between_ms(1000, 2000),
            login_settle: Pace::fixed_ms(5000),
        }
    }
}

impl Pacing {
    pub fn none() -> Self {
        Pacing {
            typing: Pace::none(),
            after_click: Pace::none(),
            after_send: Pace::none(),
            after_navigation: Pace::none(),
            between_pages: Pace::none(),
            scroll_step: Pace::none(),
            scroll_settle: Pace::none(),
            after_scroll_reset: Pace::none(),
            login_settle: Pace::none(),
        }
    }
}

/// Upper bounds on waiting for page elements to show up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Timeouts {
    pub element: Duration,
    pub note_field: Duration,
    pub results_container: Duration,
    pub authenticated_marker: Duration,
    pub login_verification: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Timeouts {
            element: Duration::from_secs(3),
            note_field: Duration::from_secs(3),
            results_container: Duration::from_secs(10),
            authenticated_marker: Duration::from_secs(5),
            login_verification: Duration::from_secs(15),
        }
    }
}

#[derive(Builder, Debug, Clone)]
#[builder(setter(into), build_fn(validate = "Self::validate"))]
pub struct SessionOptions {
    // saved search the crawl starts from
    search_url: String,
    // note template, [lead_name] is substituted per lead
    #[builder(default = "DEFAULT_NOTE.to_string()")]
    note: String,
    // names the daily store file, no daily store without it
    #[builder(default)]
    template_name: Option<String>,
    // ceiling on successful leads for this session
    #[builder(default)]
    lead_limit: Option<usize>,
    credentials: Credentials,
    #[builder(default = "DB_DIR.clone()")]
    store_dir: PathBuf,
    #[builder(default)]
    pacing: Pacing,
    #[builder(default)]
    timeouts: Timeouts,
    // bound on scroll rounds while waiting for lazy rows
    #[builder(default = "50")]
    max_scroll_rounds: u32,
    #[builder(default = "HOME_URL.clone()")]
    home_url: String,
    #[builder(default = "LOGIN_URL.clone()")]
    login_url: String,
}

impl SessionOptions {
    pub fn default_builder() -> SessionOptionsBuilder {
        SessionOptionsBuilder::default()
    }

    pub fn search_url(&self) -> &str {
        &self.search_url
    }

    pub fn template_name(&self) -> Option<&str> {
        self.template_name.as_deref()
    }

    pub fn lead_limit(&self) -> Option<usize> {
        self.lead_limit
    }

    pub fn store_dir(&self) -> &PathBuf {
        &self.store_dir
    }
}

impl SessionOptionsBuilder {
    fn validate(&self) -> Result<(), String> {
        match &self.search_url {
            Some(url) if url.trim().is_empty() => Err("search_url must not be empty".into()),
            _ => Ok(()),
        }
    }
}

/// Shared view of a running session: its status, and the means to stop it
/// from any thread.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    id: String,
    running: Arc<AtomicBool>,
    status: Arc<Mutex<SessionStatus>>,
    kill_switch: Arc<Mutex<Option<KillSwitch>>>,
}

impl SessionHandle {
    fn new(id: &str) -> Self {
        SessionHandle {
            id: id.into(),
            running: Arc::new(AtomicBool::new(true)),
            status: Arc::new(Mutex::new(SessionStatus::Running)),
            kill_switch: Arc::new(Mutex::new(None)),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn status(&self) -> SessionStatus {
        *self.status.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Clears the running flag and tears the browser down right away; the
    /// session itself notices at its next checkpoint. Returns `false` when
    /// the session was not running anymore.
    pub fn stop(&self) -> bool {
        if !self.running.swap(false, Ordering::SeqCst) {
            return false;
        }
        info!("[{}] stop requested", self.id);
        let kill_switch = self
            .kill_switch
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(k) = kill_switch {
            if k.fire() {
                debug!("[{}] browser killed", self.id);
            }
        }
        true
    }

    fn arm(&self, kill_switch: KillSwitch) {
        *self.kill_switch.lock().unwrap_or_else(|e| e.into_inner()) = Some(kill_switch);
        // stop() may have run between launch and arm
        if !self.is_running() {
            if let Some(k) = self
                .kill_switch
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .take()
            {
                k.fire();
            }
        }
    }

    fn disarm(&self) {
        self.kill_switch
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
    }

    pub(crate) fn finish(&self, status: SessionStatus) {
        self.running.store(false, Ordering::SeqCst);
        *self.status.lock().unwrap_or_else(|e| e.into_inner()) = status;
    }
}

/// Owns the browser for the length of a crawl and closes it on every exit.
struct DriverGuard {
    driver: Box<dyn Driver>,
    handle: SessionHandle,
}

impl DriverGuard {
    fn new(driver: Box<dyn Driver>, handle: SessionHandle) -> Self {
        handle.arm(driver.kill_switch());
        DriverGuard { driver, handle }
    }

    fn driver(&mut self) -> &mut dyn Driver {
        self.driver.as_mut()
    }
}

impl Drop for DriverGuard {
    fn drop(&mut self) {
        self.handle.disarm();
        self.driver.close();
        debug!("[{}] browser released", self.handle.id());
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Termination {
    LimitReached,
    NoMorePages,
    Stopped,
}

/// One crawl from the saved search to a terminal state.
///
/// Cancellation and the lead limit are evaluated at checkpoints: the head of
/// the page loop, before every candidate, right after a send (before the lead
/// is recorded) and before moving to the next page.
pub struct CrawlSession {
    options: SessionOptions,
    handle: SessionHandle,
    reporter: Reporter,
    store: LeadStore,
    factory: Arc<dyn DriverFactory>,
    collected_leads: Vec<Lead>,
}

impl CrawlSession {
    pub fn new(
        id: &str,
        options: SessionOptions,
        factory: Arc<dyn DriverFactory>,
        reporter: Reporter,
    ) -> Self {
        let store = LeadStore::new(options.store_dir.clone());
        CrawlSession {
            options,
            handle: SessionHandle::new(id),
            reporter,
            store,
            factory,
            collected_leads: vec![],
        }
    }

    pub fn handle(&self) -> SessionHandle {
        self.handle.clone()
    }

    /// Runs to completion on the calling thread. Blocks for the whole crawl.
    pub fn run(mut self) -> SessionOutcome {
        info!(
            "[{}] crawling {} with template {:?} and limit {:?}",
            self.handle.id(),
            self.options.search_url,
            self.options.template_name,
            self.options.lead_limit
        );

        let result = self.crawl();
        // a stopped session reports as stopped even when the teardown surfaced
        // as a driver fault or an early end of pagination
        let status = if !self.handle.is_running() {
            self.stopped()
        } else {
            match result {
                Ok(termination) => {
                    debug!("[{}] terminated on {:?}", self.handle.id(), termination);
                    self.reporter
                        .emit("Crawler completed", EventStatus::Completed, None);
                    SessionStatus::Completed
                }
                Err(CrawlError::EarlyTermination) => self.stopped(),
                Err(e) => {
                    self.reporter.error(&format!("Error in crawler: {}", e));
                    SessionStatus::Error
                }
            }
        };

        self.handle.finish(status);
        info!(
            "[{}] finished as {:?} with {} leads",
            self.handle.id(),
            status,
            self.collected_leads.len()
        );

        SessionOutcome {
            id: self.handle.id().to_string(),
            status,
            leads: self.collected_leads,
        }
    }

    fn stopped(&self) -> SessionStatus {
        self.reporter
            .emit("Crawler stopped by user", EventStatus::Stopped, None);
        SessionStatus::Stopped
    }

    fn crawl(&mut self) -> Result<Termination, CrawlError> {
        if !self.handle.is_running() {
            return Err(CrawlError::EarlyTermination);
        }

        let driver = self.factory.launch().map_err(CrawlError::DriverInit)?;
        let mut guard = DriverGuard::new(driver, self.handle.clone());
        self.reporter.info("Browser ready");

        self.open_search(guard.driver())?;

        let mut page = 1;
        loop {
            if let Some(t) = self.checkpoint() {
                return Ok(t);
            }

            self.reporter.info(&format!("Processing page {}", page));
            if let Err(e) = self.process_page(guard.driver()) {
                if page == 1 {
                    return Err(CrawlError::Page(e));
                }
                self.reporter
                    .error(&format!("Error processing page {}: {}", page, e));
            }

            if let Some(t) = self.checkpoint() {
                return Ok(t);
            }

            match Self::next_page(guard.driver()) {
                Ok(true) => {}
                Ok(false) => {
                    self.reporter.info("No more pages to process");
                    return Ok(Termination::NoMorePages);
                }
                Err(e) => {
                    debug!("[{}] pagination ended on: {}", self.handle.id(), e);
                    self.reporter.info("No more pages to process");
                    return Ok(Termination::NoMorePages);
                }
            }
            page += 1;
            self.reporter.info(&format!("Moving to page {}", page));
            self.options.pacing.between_pages.pause();
        }
    }

    fn checkpoint(&self) -> Option<Termination> {
        if !self.handle.is_running() {
            return Some(Termination::Stopped);
        }
        if let Some(limit) = self.options.lead_limit {
            if self.collected_leads.len() >= limit {
                self.reporter.info(&format!(
                    "Reached lead limit of {}. Stopping crawler...",
                    limit
                ));
                return Some(Termination::LimitReached);
            }
        }
        None
    }

    fn limit_reached(&self) -> bool {
        matches!(self.options.lead_limit, Some(limit) if self.collected_leads.len() >= limit)
    }

    fn open_search(&self, driver: &mut dyn Driver) -> Result<(), CrawlError> {
        let url = self.options.search_url.clone();
        self.navigate(driver, &url).map_err(CrawlError::Navigation)?;

        let location = driver.current_url().map_err(CrawlError::Navigation)?;
        if !is_login_redirect(&location) {
            return Ok(());
        }

        self.reporter.info("Login required, signing in");
        self.login(driver)?;

        self.navigate(driver, &url).map_err(CrawlError::Navigation)?;
        let location = driver.current_url().map_err(CrawlError::Navigation)?;
        if is_login_redirect(&location) {
            return Err(CrawlError::Login(format!(
                "still redirected to {} after signing in",
                location
            )));
        }
        Ok(())
    }

    fn navigate(&self, driver: &mut dyn Driver, url: &str) -> Result<(), DriverError> {
        debug!("[{}] navigating to {}", self.handle.id(), url);
        driver.navigate(url)?;
        self.options.pacing.after_navigation.pause();
        Ok(())
    }

    /// Single attempt. Success means the authenticated-only marker shows up
    /// after the credentials were submitted.
    fn login(&self, driver: &mut dyn Driver) -> Result<(), CrawlError> {
        let login_err = |e: DriverError| CrawlError::Login(e.to_string());
        let options = &self.options;

        self.navigate(driver, &options.home_url).map_err(login_err)?;
        if driver
            .wait_for(Control::AuthenticatedMarker, options.timeouts.authenticated_marker)
            .is_ok()
        {
            self.reporter.info("Already signed in, skipping login");
            return Ok(());
        }
        self.reporter
            .info("No active session found, continuing with login");

        self.navigate(driver, &options.login_url).map_err(login_err)?;
        driver
            .wait_for(Control::LoginEmail, options.timeouts.element)
            .map_err(login_err)?;
        type_like_human(
            driver,
            Control::LoginEmail,
            &options.credentials.email,
            &options.pacing.typing,
        )
        .map_err(login_err)?;
        type_like_human(
            driver,
            Control::LoginPassword,
            &options.credentials.password,
            &options.pacing.typing,
        )
        .map_err(login_err)?;
        driver.submit(Control::LoginPassword).map_err(login_err)?;
        options.pacing.login_settle.pause();

        driver
            .wait_for(Control::AuthenticatedMarker, options.timeouts.login_verification)
            .map_err(|_| {
                CrawlError::Login("not signed in after submitting credentials".into())
            })?;
        self.reporter.info("Signed in");
        Ok(())
    }

    fn process_page(&mut self, driver: &mut dyn Driver) -> Result<(), DriverError> {
        let candidates = LeadExtractor::new(
            &self.options.pacing,
            &self.options.timeouts,
            self.options.max_scroll_rounds,
        )
        .extract(driver, &self.reporter)?;

        let total = candidates.len();
        for candidate in &candidates {
            if !self.handle.is_running() || self.limit_reached() {
                break;
            }
            self.process_candidate(driver, candidate, total);
        }
        Ok(())
    }

    fn process_candidate(&mut self, driver: &mut dyn Driver, candidate: &Candidate, total: usize) {
        self.reporter.info(&format!(
            "Processing lead {} {} of {} {}",
            candidate.name,
            candidate.index + 1,
            total,
            candidate.profile_url
        ));

        if let Some(template) = self.options.template_name.as_deref() {
            if self
                .store
                .daily_contains(&candidate.profile_url, template, today())
            {
                self.reporter.info(&format!(
                    "Already sent a request to {} today with template {}, skipping",
                    candidate.name, template
                ));
                return;
            }
        }

        let lead = match ConnectionRequest::new(
            &self.options.note,
            &self.options.pacing,
            &self.options.timeouts,
        )
        .attempt(driver, candidate, &self.options.search_url)
        {
            Ok(lead) => lead,
            Err(e) => {
                self.reporter.error(&format!(
                    "Could not connect with lead {} {}: {}, moving to the next lead",
                    candidate.index + 1,
                    candidate.name,
                    e
                ));
                return;
            }
        };

        if !self.handle.is_running() {
            self.reporter.info(&format!(
                "Request to {} went out after stop was requested, not recording it",
                lead.name
            ));
            return;
        }

        self.collected_leads.push(lead.clone());
        self.persist(&lead);
        self.reporter.success(
            &format!("Successfully connected with: {}", lead.name),
            Some(lead),
        );
    }

    fn persist(&self, lead: &Lead) {
        let limit = match self.options.lead_limit {
            Some(l) => l.to_string(),
            None => "unlimited".into(),
        };
        match self.store.append(lead, self.options.template_name.as_deref()) {
            Ok(outcome) => self.reporter.info(&format!(
                "Lead saved: {} - {} ({}/{}), {} new in global store, {} new in daily store",
                lead.name,
                lead.profile_url,
                self.collected_leads.len(),
                limit,
                outcome.global_added,
                outcome.daily_added.unwrap_or(0)
            )),
            Err(e) => self
                .reporter
                .error(&format!("Error saving lead {} to file: {}", lead.name, e)),
        }
    }

    fn next_page(driver: &mut dyn Driver) -> Result<bool, DriverError> {
        if !driver.is_enabled(Control::NextPage)? {
            return Ok(false);
        }
        driver.click(Control::NextPage)?;
        Ok(true)
    }
}
